//! Build-time errors.
//!
//! Every variant is fatal: a schema that failed any of these checks is never
//! handed out. Each carries the name of the offending type or field.

use crate::reference::RefKind;
use miette::Diagnostic;
use thiserror::Error;

/// An error raised while declaring or building a schema.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum BuildError {
    #[error("`{name}` has already been declared")]
    #[diagnostic(
        code(trellis::duplicate_declaration),
        help("each reference can be implemented exactly once")
    )]
    DuplicateDeclaration { name: String },

    #[error("`{name}` is referenced but was never declared")]
    #[diagnostic(code(trellis::unknown_reference))]
    UnknownReference { name: String },

    #[error("`{name}` was declared but never resolved")]
    #[diagnostic(
        code(trellis::dangling_declaration),
        help("declare types before building, or resolve them from the thunk that declares them")
    )]
    DanglingDeclaration { name: String },

    #[error("another declaration is already named `{name}`")]
    #[diagnostic(code(trellis::duplicate_name))]
    DuplicateName { name: String },

    #[error("`{name}` was created as {expected} but its configuration is {found}")]
    #[diagnostic(code(trellis::kind_mismatch))]
    KindMismatch {
        name: String,
        expected: RefKind,
        found: RefKind,
    },

    #[error("`{name}` was resolved while its own declaration was still being resolved")]
    #[diagnostic(
        code(trellis::circular_resolution),
        help("register a callback with `ConfigStore::on_resolved` to read it once it is populated")
    )]
    CircularResolution { name: String },

    #[error("invalid configuration for `{name}`: {reason}")]
    #[diagnostic(code(trellis::invalid_config))]
    InvalidConfig { name: String, reason: String },

    #[error("extension `{name}`: {reason}")]
    #[diagnostic(code(trellis::extension))]
    Extension { name: String, reason: String },
}

impl BuildError {
    /// Creates an invalid configuration error.
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Returns the name of the type, field or extension at fault.
    pub fn name(&self) -> &str {
        match self {
            Self::DuplicateDeclaration { name }
            | Self::UnknownReference { name }
            | Self::DanglingDeclaration { name }
            | Self::DuplicateName { name }
            | Self::KindMismatch { name, .. }
            | Self::CircularResolution { name }
            | Self::InvalidConfig { name, .. }
            | Self::Extension { name, .. } => name,
        }
    }
}

/// Result alias for build-time operations.
pub type BuildResult<T> = Result<T, BuildError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_offender() {
        let err = BuildError::DuplicateDeclaration {
            name: "User".into(),
        };
        assert_eq!(err.to_string(), "`User` has already been declared");
        assert_eq!(err.name(), "User");

        let err = BuildError::KindMismatch {
            name: "Node".into(),
            expected: RefKind::Interface,
            found: RefKind::Object,
        };
        assert_eq!(
            err.to_string(),
            "`Node` was created as Interface but its configuration is Object"
        );
    }

    #[test]
    fn test_diagnostic_codes() {
        let err = BuildError::invalid("Query.user", "missing resolver");
        let code = err.code().map(|c| c.to_string());
        assert_eq!(code.as_deref(), Some("trellis::invalid_config"));
    }
}
