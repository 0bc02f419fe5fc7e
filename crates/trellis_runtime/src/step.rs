//! Ordered resolve steps.
//!
//! A field's execution can be split into checks, grants and the core
//! resolution. The steps of one chain run strictly one after another. The
//! first failing step ends the chain, and its error becomes the field's
//! error.

use crate::context::RequestContext;
use crate::error::{FieldError, FieldResult};
use crate::resolver::{resolve_fn, ResolveFn, ResolverArgs, ResolverInfo};
use futures::future::{BoxFuture, FutureExt};
use rustc_hash::FxHashSet;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::trace;

/// Scopes granted so far.
pub type ScopeSet = FxHashSet<String>;

/// The arguments of one field execution, shared by every step.
#[derive(Debug, Clone)]
pub struct StepInput {
    pub parent: Value,
    pub args: ResolverArgs,
    pub context: RequestContext,
    pub info: ResolverInfo,
}

/// State threaded through a chain.
#[derive(Debug, Clone, Default)]
pub struct ChainState {
    /// Scopes granted by earlier steps.
    pub granted: ScopeSet,
    /// The resolved value, once the resolve step has run.
    pub value: Option<Value>,
}

impl ChainState {
    /// Adds scopes.
    pub fn grant<I, S>(&mut self, scopes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.granted.extend(scopes.into_iter().map(Into::into));
    }

    /// Returns whether `scope` has been granted.
    pub fn has_grant(&self, scope: &str) -> bool {
        self.granted.contains(scope)
    }
}

pub type StepFuture = BoxFuture<'static, Result<ChainState, FieldError>>;

/// A step's execution function.
pub type StepFn = Arc<dyn Fn(Arc<StepInput>, ChainState) -> StepFuture + Send + Sync>;

/// What a step does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepKind {
    TypeAuth(String),
    InterfaceAuth(String),
    TypeGrant(String),
    InterfaceGrant(String),
    FieldAuth,
    Validate,
    Resolve,
    FieldGrant,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeAuth(name) => write!(f, "type-auth({name})"),
            Self::InterfaceAuth(name) => write!(f, "interface-auth({name})"),
            Self::TypeGrant(name) => write!(f, "type-grant({name})"),
            Self::InterfaceGrant(name) => write!(f, "interface-grant({name})"),
            Self::FieldAuth => f.write_str("field-auth"),
            Self::Validate => f.write_str("validate"),
            Self::Resolve => f.write_str("resolve"),
            Self::FieldGrant => f.write_str("field-grant"),
        }
    }
}

#[derive(Clone)]
enum StepAction {
    Run(StepFn),
    Resolve(ResolveFn),
}

/// One stage of a field's execution.
#[derive(Clone)]
pub struct ResolveStep {
    kind: StepKind,
    action: StepAction,
}

impl ResolveStep {
    /// Creates a step from a raw step function.
    pub fn new(kind: StepKind, run: StepFn) -> Self {
        Self {
            kind,
            action: StepAction::Run(run),
        }
    }

    /// A step that may fail the chain. `check` sees the scopes granted by
    /// earlier steps.
    pub fn check<F, Fut>(kind: StepKind, check: F) -> Self
    where
        F: Fn(Arc<StepInput>, ScopeSet) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), FieldError>> + Send + 'static,
    {
        Self::new(
            kind,
            Arc::new(move |input, state: ChainState| {
                let pending = check(input, state.granted.clone());
                async move { pending.await.map(|()| state) }.boxed()
            }),
        )
    }

    /// A step that adds scopes for later steps. Grants never fail.
    pub fn grant<F, Fut>(kind: StepKind, grant: F) -> Self
    where
        F: Fn(Arc<StepInput>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Vec<String>> + Send + 'static,
    {
        Self::new(
            kind,
            Arc::new(move |input, mut state: ChainState| {
                let pending = grant(input);
                async move {
                    state.grant(pending.await);
                    Ok(state)
                }
                .boxed()
            }),
        )
    }

    /// The core resolution step.
    pub fn resolve(resolver: ResolveFn) -> Self {
        Self {
            kind: StepKind::Resolve,
            action: StepAction::Resolve(resolver),
        }
    }

    pub fn kind(&self) -> &StepKind {
        &self.kind
    }

    async fn run(&self, input: &Arc<StepInput>, mut state: ChainState) -> Result<ChainState, FieldError> {
        trace!(step = %self.kind, field = %input.info.field_name, "running resolve step");
        match &self.action {
            StepAction::Run(run) => run(Arc::clone(input), state).await,
            StepAction::Resolve(resolver) => {
                let value = resolver(
                    input.parent.clone(),
                    input.args.clone(),
                    input.context.clone(),
                    input.info.clone(),
                )
                .await?;
                state.value = Some(value);
                Ok(state)
            }
        }
    }
}

impl fmt::Debug for ResolveStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolveStep")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// An ordered list of steps.
#[derive(Debug, Clone, Default)]
pub struct StepChain {
    steps: Vec<ResolveStep>,
}

impl StepChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a step.
    pub fn push(&mut self, step: ResolveStep) {
        self.steps.push(step);
    }

    /// Appends a step, builder style.
    #[must_use]
    pub fn with(mut self, step: ResolveStep) -> Self {
        self.push(step);
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns the step kinds in execution order.
    pub fn kinds(&self) -> Vec<&StepKind> {
        self.steps.iter().map(ResolveStep::kind).collect()
    }

    /// Turns the chain into one execution function.
    ///
    /// A chain holding nothing but a resolve step yields that step's
    /// resolver itself.
    pub fn into_resolve_fn(mut self) -> ResolveFn {
        if self.steps.len() == 1 {
            if let StepAction::Resolve(resolver) = &self.steps[0].action {
                return Arc::clone(resolver);
            }
        }

        let steps: Arc<[ResolveStep]> = std::mem::take(&mut self.steps).into();
        resolve_fn(move |parent, args, context, info| {
            let input = Arc::new(StepInput {
                parent,
                args,
                context,
                info,
            });
            run_steps(Arc::clone(&steps), input)
        })
    }
}

async fn run_steps(steps: Arc<[ResolveStep]>, input: Arc<StepInput>) -> FieldResult {
    let mut state = ChainState::default();
    for step in steps.iter() {
        state = step.run(&input, state).await?;
    }
    Ok(state.value.unwrap_or(Value::Null))
}

impl FromIterator<ResolveStep> for StepChain {
    fn from_iter<I: IntoIterator<Item = ResolveStep>>(iter: I) -> Self {
        Self {
            steps: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::resolve_sync_fn;
    use parking_lot::Mutex;
    use serde_json::json;

    fn call(resolver: &ResolveFn) -> crate::resolver::ResolveFuture {
        resolver(
            json!({}),
            ResolverArgs::new(),
            RequestContext::default(),
            ResolverInfo::new("field", "Query"),
        )
    }

    #[tokio::test]
    async fn test_single_resolve_step_is_the_resolver() {
        let base = resolve_sync_fn(|_, _, _, _| Ok(json!(1)));
        let resolver = StepChain::new()
            .with(ResolveStep::resolve(Arc::clone(&base)))
            .into_resolve_fn();

        assert!(Arc::ptr_eq(&base, &resolver));
        assert_eq!(call(&resolver).await, Ok(json!(1)));
    }

    #[tokio::test]
    async fn test_steps_run_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (first, second, third) = (Arc::clone(&log), Arc::clone(&log), Arc::clone(&log));

        let chain = StepChain::new()
            .with(ResolveStep::check(StepKind::FieldAuth, move |_, _| {
                let log = Arc::clone(&first);
                async move {
                    tokio::task::yield_now().await;
                    log.lock().push("check");
                    Ok(())
                }
            }))
            .with(ResolveStep::resolve(resolve_sync_fn(move |_, _, _, _| {
                second.lock().push("resolve");
                Ok(json!("value"))
            })))
            .with(ResolveStep::grant(StepKind::FieldGrant, move |_| {
                third.lock().push("grant");
                async { vec!["done".to_string()] }
            }));
        assert_eq!(
            chain.kinds(),
            vec![&StepKind::FieldAuth, &StepKind::Resolve, &StepKind::FieldGrant]
        );

        let resolver = chain.into_resolve_fn();
        assert_eq!(call(&resolver).await, Ok(json!("value")));
        assert_eq!(*log.lock(), vec!["check", "resolve", "grant"]);
    }

    #[tokio::test]
    async fn test_failed_check_short_circuits() {
        let resolved = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&resolved);
        let resolver = StepChain::new()
            .with(ResolveStep::check(StepKind::TypeAuth("User".into()), |_, _| async {
                Err(FieldError::denied("no"))
            }))
            .with(ResolveStep::resolve(resolve_sync_fn(move |_, _, _, _| {
                *flag.lock() = true;
                Ok(json!(1))
            })))
            .into_resolve_fn();

        assert_eq!(call(&resolver).await, Err(FieldError::denied("no")));
        assert!(!*resolved.lock());
    }

    #[tokio::test]
    async fn test_checks_see_only_earlier_grants() {
        fn requires_x() -> ResolveStep {
            ResolveStep::check(StepKind::FieldAuth, |_, granted: ScopeSet| async move {
                if granted.contains("x") {
                    Ok(())
                } else {
                    Err(FieldError::denied("missing x"))
                }
            })
        }
        fn grants_x() -> ResolveStep {
            ResolveStep::grant(StepKind::TypeGrant("User".into()), |_| async {
                vec!["x".to_string()]
            })
        }
        let base = resolve_sync_fn(|_, _, _, _| Ok(json!(true)));

        let granted_first = StepChain::from_iter([
            grants_x(),
            requires_x(),
            ResolveStep::resolve(Arc::clone(&base)),
        ])
        .into_resolve_fn();
        assert_eq!(call(&granted_first).await, Ok(json!(true)));

        let checked_first = StepChain::from_iter([
            requires_x(),
            grants_x(),
            ResolveStep::resolve(base),
        ])
        .into_resolve_fn();
        assert_eq!(call(&checked_first).await, Err(FieldError::denied("missing x")));
    }
}
