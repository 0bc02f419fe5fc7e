//! Runtime for trellis.
//!
//! This crate provides schema construction and field execution plumbing:
//! - `store`: Declaration graph with lazy, memoized resolution
//! - `config`: Resolved type and field configurations
//! - `extension`: Extension hooks and the ordered pipeline
//! - `builder`: Schema builder
//! - `schema`: Built, immutable schema
//! - `resolver`: Field execution functions
//! - `step`: Ordered resolve steps
//! - `context`: Request context
//! - `cache`: Per-request memoization
//! - `dataloader`: DataLoader for N+1 prevention
//! - `error`: Request-time field errors

pub mod builder;
pub mod cache;
pub mod config;
pub mod context;
pub mod dataloader;
pub mod error;
pub mod extension;
pub mod resolver;
pub mod schema;
pub mod step;
pub mod store;

pub use builder::{ArgOptions, BuildOptions, FieldOptions, SchemaBuilder, TypeOptions, BUILTIN_SCALARS};
pub use cache::{AsyncContextCache, ContextCache, FactoryId, RequestCache};
pub use config::{Config, FieldConfig, InputFieldConfig, InputFieldKind, OutputFieldConfig, TypeConfig};
pub use context::{ContextData, RequestContext, WeakRequestContext};
pub use dataloader::{BatchFn, BatchResult, DataLoader, LoadError, LoaderConfig, LoaderFactory};
pub use error::{ErrorCode, FieldError, FieldResult};
pub use extension::{Extension, Pipeline};
pub use resolver::{
    default_resolver, join_path, resolve_fn, resolve_sync_fn, PathSegment, ResolveFn, ResolveFuture,
    ResolverArgs, ResolverInfo,
};
pub use schema::{FieldSummary, Schema, SchemaField, SchemaSummary, SchemaType, TypeSummary};
pub use step::{ChainState, ResolveStep, ScopeSet, StepChain, StepFn, StepInput, StepKind};
pub use store::{ConfigStore, Deferred, Thunk};
pub use trellis_core::{BuildError, BuildResult, Options, RefKind, Reference, TypeRef};
