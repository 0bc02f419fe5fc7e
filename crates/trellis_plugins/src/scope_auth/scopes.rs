//! Scope expressions and the per-request scope map.

use futures::future::{BoxFuture, FutureExt};
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::warn;
use trellis_runtime::{FieldError, RequestContext, ScopeSet};

/// A boolean expression over scopes.
#[derive(Debug, Clone, PartialEq)]
pub enum ScopeExpr {
    /// A scope from the request's [`AuthScopeMap`], with an optional
    /// parameter for parameterized checks.
    Scope { name: String, param: Value },
    /// A scope granted earlier in the chain or by the parent field.
    Granted(String),
    /// At least one sub-expression holds.
    Any(Vec<ScopeExpr>),
    /// Every sub-expression holds.
    All(Vec<ScopeExpr>),
    Allow,
    Deny,
}

impl ScopeExpr {
    pub fn scope(name: impl Into<String>) -> Self {
        Self::Scope {
            name: name.into(),
            param: Value::Null,
        }
    }

    pub fn scope_with(name: impl Into<String>, param: Value) -> Self {
        Self::Scope {
            name: name.into(),
            param,
        }
    }

    pub fn granted(name: impl Into<String>) -> Self {
        Self::Granted(name.into())
    }

    pub fn any(exprs: impl IntoIterator<Item = ScopeExpr>) -> Self {
        Self::Any(exprs.into_iter().collect())
    }

    pub fn all(exprs: impl IntoIterator<Item = ScopeExpr>) -> Self {
        Self::All(exprs.into_iter().collect())
    }
}

/// A parameterized scope check.
pub type ScopeCheckFn =
    Arc<dyn Fn(Value, RequestContext) -> BoxFuture<'static, Result<bool, FieldError>> + Send + Sync>;

/// How one scope is decided.
#[derive(Clone)]
pub enum ScopeCheck {
    Flag(bool),
    Check(ScopeCheckFn),
}

impl fmt::Debug for ScopeCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flag(value) => f.debug_tuple("Flag").field(value).finish(),
            Self::Check(_) => f.write_str("Check(..)"),
        }
    }
}

/// The scopes a request holds, built once per request.
#[derive(Debug, Clone, Default)]
pub struct AuthScopeMap {
    scopes: FxHashMap<String, ScopeCheck>,
}

impl AuthScopeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a scope with a fixed answer.
    #[must_use]
    pub fn flag(mut self, name: impl Into<String>, value: bool) -> Self {
        self.scopes.insert(name.into(), ScopeCheck::Flag(value));
        self
    }

    /// Adds a scope decided by `check(param, ctx)`.
    #[must_use]
    pub fn check<F, Fut>(mut self, name: impl Into<String>, check: F) -> Self
    where
        F: Fn(Value, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, FieldError>> + Send + 'static,
    {
        let check: ScopeCheckFn = Arc::new(move |param, ctx| check(param, ctx).boxed());
        self.scopes.insert(name.into(), ScopeCheck::Check(check));
        self
    }

    pub fn get(&self, name: &str) -> Option<&ScopeCheck> {
        self.scopes.get(name)
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}

/// Evaluates `expr`. Unknown scopes and failing checks evaluate to false.
pub(crate) fn evaluate<'a>(
    expr: &'a ScopeExpr,
    scopes: &'a AuthScopeMap,
    granted: &'a ScopeSet,
    ctx: &'a RequestContext,
) -> BoxFuture<'a, bool> {
    async move {
        match expr {
            ScopeExpr::Allow => true,
            ScopeExpr::Deny => false,
            ScopeExpr::Granted(name) => granted.contains(name),
            ScopeExpr::Scope { name, param } => match scopes.get(name) {
                Some(ScopeCheck::Flag(value)) => *value,
                Some(ScopeCheck::Check(check)) => match check(param.clone(), ctx.clone()).await {
                    Ok(value) => value,
                    Err(error) => {
                        warn!(scope = %name, %error, "scope check failed, denying");
                        false
                    }
                },
                None => {
                    warn!(scope = %name, "unknown scope, denying");
                    false
                }
            },
            ScopeExpr::Any(exprs) => {
                for expr in exprs {
                    if evaluate(expr, scopes, granted, ctx).await {
                        return true;
                    }
                }
                false
            }
            ScopeExpr::All(exprs) => {
                for expr in exprs {
                    if !evaluate(expr, scopes, granted, ctx).await {
                        return false;
                    }
                }
                true
            }
        }
    }
    .boxed()
}
