//! Field execution functions.
//!
//! Every output field ends up with one [`ResolveFn`]: the user's resolver,
//! possibly wrapped by extensions. The query engine calls it with the parent
//! value, the argument bag, the request context and execution info.

use crate::context::RequestContext;
use crate::error::{FieldError, FieldResult};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Arguments passed to a resolver.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolverArgs {
    args: HashMap<String, Value>,
}

impl ResolverArgs {
    /// Creates new resolver args.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates resolver args from a list of (name, value) pairs.
    pub fn from_pairs(pairs: Vec<(String, Value)>) -> Self {
        Self {
            args: pairs.into_iter().collect(),
        }
    }

    /// Creates resolver args from a JSON object; anything else yields no args.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(map) => Self {
                args: map.into_iter().collect(),
            },
            _ => Self::default(),
        }
    }

    /// Gets an argument by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }

    /// Gets an argument as a specific type.
    pub fn get_as<T: serde::de::DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.args
            .get(name)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Gets a required argument, returning an error if not found.
    pub fn require<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<T, FieldError> {
        self.args
            .get(name)
            .ok_or_else(|| FieldError::MissingArgument(name.to_string()))
            .and_then(|v| {
                serde_json::from_value(v.clone())
                    .map_err(|e| FieldError::ArgumentParse(name.to_string(), e.to_string()))
            })
    }

    /// Returns all arguments.
    pub fn all(&self) -> &HashMap<String, Value> {
        &self.args
    }

    /// Returns true if empty.
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Sets an argument.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.args.insert(name.into(), value);
    }
}

/// A segment of a response path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(name) => f.write_str(name),
            Self::Index(index) => write!(f, "{index}"),
        }
    }
}

/// Info about the field being resolved.
#[derive(Debug, Clone, Default)]
pub struct ResolverInfo {
    /// The field name being resolved.
    pub field_name: String,

    /// The return type name.
    pub return_type: String,

    /// The parent type name.
    pub parent_type: String,

    /// Path to this field.
    pub path: Vec<PathSegment>,
}

impl ResolverInfo {
    /// Creates new resolver info with a single-segment path.
    pub fn new(field_name: impl Into<String>, parent_type: impl Into<String>) -> Self {
        let field_name = field_name.into();
        Self {
            path: vec![PathSegment::Field(field_name.clone())],
            field_name,
            return_type: String::new(),
            parent_type: parent_type.into(),
        }
    }

    /// Sets the return type.
    #[must_use]
    pub fn with_return_type(mut self, ty: impl Into<String>) -> Self {
        self.return_type = ty.into();
        self
    }

    /// Sets the path.
    #[must_use]
    pub fn with_path(mut self, path: Vec<PathSegment>) -> Self {
        self.path = path;
        self
    }

    /// Returns the path joined with dots, e.g. `users.0.name`.
    pub fn path_key(&self) -> String {
        join_path(&self.path)
    }
}

/// Joins path segments with dots.
pub fn join_path(path: &[PathSegment]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

/// Future returned by a field's execution function.
pub type ResolveFuture = BoxFuture<'static, FieldResult>;

/// A field's execution function.
pub type ResolveFn =
    Arc<dyn Fn(Value, ResolverArgs, RequestContext, ResolverInfo) -> ResolveFuture + Send + Sync>;

/// Wraps an async closure as a [`ResolveFn`].
pub fn resolve_fn<F, Fut>(f: F) -> ResolveFn
where
    F: Fn(Value, ResolverArgs, RequestContext, ResolverInfo) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FieldResult> + Send + 'static,
{
    Arc::new(move |parent, args, ctx, info| Box::pin(f(parent, args, ctx, info)))
}

/// Wraps a synchronous closure as a [`ResolveFn`].
pub fn resolve_sync_fn<F>(f: F) -> ResolveFn
where
    F: Fn(&Value, &ResolverArgs, &RequestContext, &ResolverInfo) -> FieldResult
        + Send
        + Sync
        + 'static,
{
    Arc::new(move |parent, args, ctx, info| {
        let result = f(&parent, &args, &ctx, &info);
        Box::pin(futures::future::ready(result))
    })
}

/// Returns the resolver that reads the field from the parent object.
pub fn default_resolver() -> ResolveFn {
    resolve_sync_fn(|parent, _args, _ctx, info| property(parent, &info.field_name))
}

fn property(parent: &Value, field_name: &str) -> FieldResult {
    match parent {
        Value::Object(map) => Ok(map
            .get(field_name)
            .or_else(|| map.get(&to_snake_case(field_name)))
            .cloned()
            .unwrap_or(Value::Null)),
        Value::Null => Ok(Value::Null),
        _ => Err(FieldError::FieldNotFound(field_name.to_string())),
    }
}

/// Converts camelCase to snake_case.
fn to_snake_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.extend(c.to_lowercase());
        } else {
            result.push(c);
        }
    }
    result
}
