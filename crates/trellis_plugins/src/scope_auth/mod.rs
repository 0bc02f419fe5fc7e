//! Scope-based authorization.
//!
//! Types, interfaces and fields declare [`AuthScopes`] that must hold before
//! a field resolves, and [`GrantScopes`] that later checks can rely on. For
//! every field the extension assembles, in this order: the parent type's
//! check, each interface's check, the parent type's grant, each interface's
//! grant, the field's check, the resolver, the field's grant. Steps without
//! configuration are left out, so unprotected fields keep their resolver.
//!
//! The scopes a request holds come from an initializer that runs once per
//! request.

mod scopes;
mod steps;

pub use scopes::{AuthScopeMap, ScopeCheck, ScopeCheckFn, ScopeExpr};

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use steps::{AuthRuntime, GrantRegistry};
use tracing::debug;
use trellis_core::{BuildError, BuildResult};
use trellis_runtime::{
    AsyncContextCache, ConfigStore, Extension, FieldError, OutputFieldConfig, RequestContext,
    ResolveFn, ResolveStep, StepChain, StepInput, StepKind,
};

/// Scopes a type, interface or field requires.
#[derive(Clone)]
pub enum AuthScopes {
    Static(ScopeExpr),
    Dynamic(Arc<dyn Fn(Arc<StepInput>) -> BoxFuture<'static, Result<ScopeExpr, FieldError>> + Send + Sync>),
}

impl AuthScopes {
    /// Scopes computed per execution from the parent, arguments and context.
    pub fn dynamic<F, Fut>(f: F) -> Self
    where
        F: Fn(Arc<StepInput>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ScopeExpr, FieldError>> + Send + 'static,
    {
        Self::Dynamic(Arc::new(move |input| f(input).boxed()))
    }
}

impl From<ScopeExpr> for AuthScopes {
    fn from(expr: ScopeExpr) -> Self {
        Self::Static(expr)
    }
}

impl fmt::Debug for AuthScopes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(expr) => f.debug_tuple("Static").field(expr).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// Scopes granted to later steps, and for fields, to child fields.
#[derive(Clone)]
pub enum GrantScopes {
    Static(Vec<String>),
    Dynamic(Arc<dyn Fn(Arc<StepInput>) -> BoxFuture<'static, Result<Vec<String>, FieldError>> + Send + Sync>),
}

impl GrantScopes {
    pub fn new<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Static(scopes.into_iter().map(Into::into).collect())
    }

    pub fn dynamic<F, Fut>(f: F) -> Self
    where
        F: Fn(Arc<StepInput>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<String>, FieldError>> + Send + 'static,
    {
        Self::Dynamic(Arc::new(move |input| f(input).boxed()))
    }
}

impl fmt::Debug for GrantScopes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(scopes) => f.debug_tuple("Static").field(scopes).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// Field option: ignore the parent type's [`AuthScopes`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SkipTypeScopes;

/// Field option: ignore the interfaces' [`AuthScopes`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SkipInterfaceScopes;

/// ScopeAuth settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeAuthConfig {
    /// Leave every resolver unwrapped.
    pub disabled: bool,
    /// Message for every denial instead of the per-target default.
    pub unauthorized_message: Option<String>,
}

/// The authorization extension.
pub struct ScopeAuth {
    config: ScopeAuthConfig,
    runtime: AuthRuntime,
}

impl ScopeAuth {
    /// Creates the extension. `initializer` builds the request's scopes and
    /// runs at most once per request.
    pub fn new<F, Fut>(initializer: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<AuthScopeMap, FieldError>> + Send + 'static,
    {
        let scopes = AsyncContextCache::new(move |ctx| initializer(ctx).map(|map| map.map(Arc::new)));
        Self {
            config: ScopeAuthConfig::default(),
            runtime: AuthRuntime {
                scopes,
                grants: GrantRegistry::new(),
                unauthorized_message: None,
            },
        }
    }

    /// Applies settings.
    #[must_use]
    pub fn with_config(mut self, config: ScopeAuthConfig) -> Self {
        self.runtime.unauthorized_message = config.unauthorized_message.clone();
        self.config = config;
        self
    }

    /// Returns the request's scopes.
    pub async fn scopes(&self, ctx: &RequestContext) -> Result<Arc<AuthScopeMap>, FieldError> {
        self.runtime.scopes.get(ctx).await
    }

    fn build_chain(
        &self,
        resolver: ResolveFn,
        field: &OutputFieldConfig,
        store: &ConfigStore,
    ) -> BuildResult<StepChain> {
        let parent = store.resolve_type(field.parent)?;
        if !parent.kind.has_fields() {
            return Err(BuildError::invalid(
                field.coordinate(),
                format!("{} is {} which cannot have fields", parent.name, parent.kind),
            ));
        }
        let interfaces = parent
            .interfaces
            .iter()
            .map(|reference| store.resolve_type(*reference))
            .collect::<BuildResult<Vec<_>>>()?;

        let runtime = &self.runtime;
        let mut chain = StepChain::new();

        if let Some(scopes) = parent.options.get::<AuthScopes>() {
            if !field.options.contains::<SkipTypeScopes>() {
                let kind = StepKind::TypeAuth(parent.name.clone());
                chain.push(steps::type_auth(runtime, kind, &parent.name, scopes.clone()));
            }
        }
        if !field.options.contains::<SkipInterfaceScopes>() {
            for interface in &interfaces {
                if let Some(scopes) = interface.options.get::<AuthScopes>() {
                    let kind = StepKind::InterfaceAuth(interface.name.clone());
                    chain.push(steps::type_auth(runtime, kind, &interface.name, scopes.clone()));
                }
            }
        }
        if let Some(grants) = parent.options.get::<GrantScopes>() {
            chain.push(steps::type_grant(StepKind::TypeGrant(parent.name.clone()), grants.clone()));
        }
        for interface in &interfaces {
            if let Some(grants) = interface.options.get::<GrantScopes>() {
                let kind = StepKind::InterfaceGrant(interface.name.clone());
                chain.push(steps::type_grant(kind, grants.clone()));
            }
        }
        if let Some(scopes) = field.options.get::<AuthScopes>() {
            chain.push(steps::field_auth(runtime, &field.coordinate(), scopes.clone()));
        }
        chain.push(ResolveStep::resolve(resolver));
        if let Some(grants) = field.options.get::<GrantScopes>() {
            chain.push(steps::field_grant(runtime, grants.clone()));
        }
        Ok(chain)
    }
}

impl fmt::Debug for ScopeAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeAuth")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Extension for ScopeAuth {
    fn name(&self) -> &str {
        "ScopeAuth"
    }

    fn wrap_resolve(
        &self,
        resolver: ResolveFn,
        field: &OutputFieldConfig,
        store: &ConfigStore,
    ) -> BuildResult<ResolveFn> {
        if self.config.disabled {
            return Ok(resolver);
        }
        let chain = self.build_chain(resolver, field, store)?;
        if chain.len() > 1 {
            debug!(field = %field.coordinate(), steps = ?chain.kinds(), "installed auth steps");
        }
        Ok(chain.into_resolve_fn())
    }
}
