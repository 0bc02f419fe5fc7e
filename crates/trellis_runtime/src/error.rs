//! Request-time errors.
//!
//! A [`FieldError`] is reported as the error of the one field whose resolver
//! produced it; sibling fields keep resolving.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Typed error codes exposed under `extensions.code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Forbidden,
    ValidationError,
    BatchKeyFailed,
    BadUserInput,
    FieldNotFound,
    ResolverError,
}

impl ErrorCode {
    /// Returns the string representation of the error code.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Forbidden => "FORBIDDEN",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::BatchKeyFailed => "BATCH_KEY_FAILED",
            Self::BadUserInput => "BAD_USER_INPUT",
            Self::FieldNotFound => "FIELD_NOT_FOUND",
            Self::ResolverError => "RESOLVER_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned from a field's execution function.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FieldError {
    /// An authorization step denied access.
    #[error("{message}")]
    AuthorizationDenied { message: String },

    /// Argument validation failed. `details` lists every violation.
    #[error("{message}")]
    ValidationFailed { message: String, details: Value },

    /// The batched load for this field's key failed.
    #[error("failed to load {key}: {message}")]
    BatchKeyFailed { key: String, message: String },

    /// Missing required argument.
    #[error("missing required argument: {0}")]
    MissingArgument(String),

    /// Argument could not be deserialized.
    #[error("failed to parse argument '{0}': {1}")]
    ArgumentParse(String, String),

    /// No such field on the schema.
    #[error("field not found: {0}")]
    FieldNotFound(String),

    /// Any other resolver failure.
    #[error("{0}")]
    Resolver(String),
}

impl FieldError {
    /// Creates an authorization failure.
    pub fn denied(message: impl Into<String>) -> Self {
        Self::AuthorizationDenied {
            message: message.into(),
        }
    }

    /// Creates a plain resolver failure.
    pub fn resolver(message: impl Into<String>) -> Self {
        Self::Resolver(message.into())
    }

    /// Returns the typed error code.
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::AuthorizationDenied { .. } => ErrorCode::Forbidden,
            Self::ValidationFailed { .. } => ErrorCode::ValidationError,
            Self::BatchKeyFailed { .. } => ErrorCode::BatchKeyFailed,
            Self::MissingArgument(_) | Self::ArgumentParse(..) => ErrorCode::BadUserInput,
            Self::FieldNotFound(_) => ErrorCode::FieldNotFound,
            Self::Resolver(_) => ErrorCode::ResolverError,
        }
    }

    /// Renders the error as a GraphQL response error entry.
    pub fn to_graphql_error(&self) -> Value {
        let mut extensions = serde_json::Map::new();
        extensions.insert("code".into(), Value::String(self.code().to_string()));
        if let Self::ValidationFailed { details, .. } = self {
            extensions.insert("details".into(), details.clone());
        }
        serde_json::json!({
            "message": self.to_string(),
            "extensions": extensions,
        })
    }
}

/// Result type for field execution.
pub type FieldResult = Result<Value, FieldError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(FieldError::denied("no").code(), ErrorCode::Forbidden);
        assert_eq!(
            FieldError::MissingArgument("id".into()).code(),
            ErrorCode::BadUserInput
        );
        assert_eq!(ErrorCode::BatchKeyFailed.to_string(), "BATCH_KEY_FAILED");
    }

    #[test]
    fn test_graphql_rendering() {
        let err = FieldError::ValidationFailed {
            message: "invalid arguments".into(),
            details: serde_json::json!([{"field": "email"}]),
        };
        let json = err.to_graphql_error();
        assert_eq!(json["message"], "invalid arguments");
        assert_eq!(json["extensions"]["code"], "VALIDATION_ERROR");
        assert_eq!(json["extensions"]["details"][0]["field"], "email");
    }

    #[test]
    fn test_batch_key_message() {
        let err = FieldError::BatchKeyFailed {
            key: "\"7\"".into(),
            message: "not found".into(),
        };
        assert_eq!(err.to_string(), "failed to load \"7\": not found");
    }
}
