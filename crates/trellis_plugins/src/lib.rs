//! Extensions for trellis.
//!
//! This crate provides the extensions most schemas register:
//! - `scope_auth`: Scope-based authorization and grants
//! - `validation`: Argument constraints checked before resolution
//! - `loadable`: Batched loading of fields and object types
//!
//! Register them with [`trellis_runtime::SchemaBuilder::new`]. Registration
//! order decides the order of their steps around each resolver.

pub mod loadable;
pub mod scope_auth;
pub mod validation;

pub use loadable::{LoadKey, Loadable, LoadableField, LoadableObject, Loader};
pub use scope_auth::{
    AuthScopeMap, AuthScopes, GrantScopes, ScopeAuth, ScopeAuthConfig, ScopeCheck, ScopeExpr,
    SkipInterfaceScopes, SkipTypeScopes,
};
pub use validation::{
    ArgRules, FieldValidate, Rule, Validation, ValidationError, ValidationErrorCode, ValidationErrors,
};
