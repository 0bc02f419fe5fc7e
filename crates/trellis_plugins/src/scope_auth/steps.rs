//! Authorization and grant steps.

use super::scopes::{evaluate, AuthScopeMap};
use super::{AuthScopes, GrantScopes};
use futures::future::FutureExt;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::warn;
use trellis_runtime::{
    join_path, AsyncContextCache, ChainState, ContextCache, FieldError, PathSegment, RequestContext,
    ResolveStep, ScopeSet, StepInput, StepKind,
};

/// Field-level grants of one request, keyed by response path.
#[derive(Clone)]
pub(crate) struct GrantRegistry {
    cache: ContextCache<Arc<Mutex<FxHashMap<String, ScopeSet>>>>,
}

impl GrantRegistry {
    pub(crate) fn new() -> Self {
        Self {
            cache: ContextCache::new(|_| Arc::default()),
        }
    }

    pub(crate) fn record(&self, ctx: &RequestContext, path: &[PathSegment], scopes: &[String]) {
        if scopes.is_empty() {
            return;
        }
        self.cache
            .get(ctx)
            .lock()
            .entry(join_path(path))
            .or_default()
            .extend(scopes.iter().cloned());
    }

    /// Returns the grants recorded for the field that produced the parent
    /// of the field at `path`.
    pub(crate) fn inherited(&self, ctx: &RequestContext, path: &[PathSegment]) -> ScopeSet {
        let Some((_, mut parent)) = path.split_last() else {
            return ScopeSet::default();
        };
        while let Some((PathSegment::Index(_), rest)) = parent.split_last() {
            parent = rest;
        }
        if parent.is_empty() {
            return ScopeSet::default();
        }
        self.cache
            .get(ctx)
            .lock()
            .get(&join_path(parent))
            .cloned()
            .unwrap_or_default()
    }
}

pub(crate) type ScopeCache = AsyncContextCache<Result<Arc<AuthScopeMap>, FieldError>>;

/// What every step needs at request time.
#[derive(Clone)]
pub(crate) struct AuthRuntime {
    pub(crate) scopes: ScopeCache,
    pub(crate) grants: GrantRegistry,
    pub(crate) unauthorized_message: Option<String>,
}

impl AuthRuntime {
    fn denied(&self, default: String) -> FieldError {
        FieldError::denied(self.unauthorized_message.clone().unwrap_or(default))
    }

    async fn authorize(
        &self,
        scopes: &AuthScopes,
        input: Arc<StepInput>,
        mut granted: ScopeSet,
        denial: String,
    ) -> Result<(), FieldError> {
        let expr = match scopes {
            AuthScopes::Static(expr) => expr.clone(),
            AuthScopes::Dynamic(scopes) => match scopes(Arc::clone(&input)).await {
                Ok(expr) => expr,
                Err(error) => {
                    warn!(%error, field = %input.info.path_key(), "auth scopes failed, denying");
                    return Err(self.denied(denial));
                }
            },
        };
        let map = match self.scopes.get(&input.context).await {
            Ok(map) => map,
            Err(error) => {
                warn!(%error, "scope initializer failed, denying");
                return Err(self.denied(denial));
            }
        };

        granted.extend(self.grants.inherited(&input.context, &input.info.path));
        if evaluate(&expr, &map, &granted, &input.context).await {
            Ok(())
        } else {
            Err(self.denied(denial))
        }
    }
}

async fn grant_list(grants: &GrantScopes, input: Arc<StepInput>) -> Vec<String> {
    match grants {
        GrantScopes::Static(scopes) => scopes.clone(),
        GrantScopes::Dynamic(grants) => match grants(Arc::clone(&input)).await {
            Ok(scopes) => scopes,
            Err(error) => {
                warn!(%error, field = %input.info.path_key(), "grant scopes failed, granting nothing");
                Vec::new()
            }
        },
    }
}

/// Checks type or interface scopes before any field of it resolves.
pub(crate) fn type_auth(runtime: &AuthRuntime, kind: StepKind, type_name: &str, scopes: AuthScopes) -> ResolveStep {
    let runtime = runtime.clone();
    let denial = format!("Not authorized to read fields for {type_name}");
    ResolveStep::check(kind, move |input, granted| {
        let (runtime, scopes, denial) = (runtime.clone(), scopes.clone(), denial.clone());
        async move { runtime.authorize(&scopes, input, granted, denial).await }
    })
}

/// Checks field scopes.
pub(crate) fn field_auth(runtime: &AuthRuntime, coordinate: &str, scopes: AuthScopes) -> ResolveStep {
    let runtime = runtime.clone();
    let denial = format!("Not authorized to resolve {coordinate}");
    ResolveStep::check(StepKind::FieldAuth, move |input, granted| {
        let (runtime, scopes, denial) = (runtime.clone(), scopes.clone(), denial.clone());
        async move { runtime.authorize(&scopes, input, granted, denial).await }
    })
}

/// Grants type or interface scopes to the rest of the chain.
pub(crate) fn type_grant(kind: StepKind, grants: GrantScopes) -> ResolveStep {
    ResolveStep::grant(kind, move |input| {
        let grants = grants.clone();
        async move { grant_list(&grants, input).await }
    })
}

/// Grants field scopes to the rest of the chain and to child fields.
pub(crate) fn field_grant(runtime: &AuthRuntime, grants: GrantScopes) -> ResolveStep {
    let registry = runtime.grants.clone();
    ResolveStep::new(
        StepKind::FieldGrant,
        Arc::new(move |input: Arc<StepInput>, mut state: ChainState| {
            let (registry, grants) = (registry.clone(), grants.clone());
            async move {
                let scopes = grant_list(&grants, Arc::clone(&input)).await;
                registry.record(&input.context, &input.info.path, &scopes);
                state.grant(scopes);
                Ok(state)
            }
            .boxed()
        }),
    )
}
