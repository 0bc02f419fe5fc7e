//! Core types for trellis.
//!
//! This crate provides the identities and diagnostics shared by every other
//! trellis crate:
//! - `reference`: Stable placeholders for types and fields
//! - `options`: Type-keyed metadata attached to configurations
//! - `error`: Build-time error taxonomy

pub mod error;
pub mod options;
pub mod reference;

pub use error::{BuildError, BuildResult};
pub use options::Options;
pub use reference::{RefKind, Reference, TypeRef};
