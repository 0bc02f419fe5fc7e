//! Batched loading of fields and object types.
//!
//! A field marked [`LoadableField`] resolves to a key, or a list of keys, and
//! the extension loads the values through a per-request [`DataLoader`] owned
//! by that field. An object type marked [`LoadableObject`] owns one loader
//! per request shared by every field that returns it.

use futures::future::FutureExt;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::debug;
use trellis_core::{BuildResult, RefKind};
use trellis_runtime::{
    resolve_fn, BatchFn, BatchResult, ConfigStore, DataLoader, Extension, FieldError, LoadError,
    LoaderConfig, LoaderFactory, OutputFieldConfig, RequestContext, ResolveFn, Schema, TypeConfig,
};

/// A loader key: any JSON value a resolver returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadKey(pub Value);

impl Hash for LoadKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_string().hash(state);
    }
}

impl fmt::Display for LoadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::String(s) => f.write_str(s),
            other => write!(f, "{other}"),
        }
    }
}

/// The loader every Loadable option builds on.
pub type Loader = DataLoader<LoadKey, Value>;

fn boxed_batch_fn<F, Fut>(load: F) -> BatchFn<LoadKey, Value>
where
    F: Fn(Vec<LoadKey>, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = BatchResult<Value>> + Send + 'static,
{
    Arc::new(move |keys, ctx| load(keys, ctx).boxed())
}

/// Field option: the resolver yields keys loaded in batches.
#[derive(Clone)]
pub struct LoadableField {
    config: LoaderConfig,
    load: BatchFn<LoadKey, Value>,
}

impl LoadableField {
    pub fn new<F, Fut>(config: LoaderConfig, load: F) -> Self
    where
        F: Fn(Vec<LoadKey>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BatchResult<Value>> + Send + 'static,
    {
        Self {
            config,
            load: boxed_batch_fn(load),
        }
    }
}

impl fmt::Debug for LoadableField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadableField")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Type option: fields returning this object type yield keys.
#[derive(Clone)]
pub struct LoadableObject {
    config: LoaderConfig,
    load: BatchFn<LoadKey, Value>,
}

impl LoadableObject {
    pub fn new<F, Fut>(config: LoaderConfig, load: F) -> Self
    where
        F: Fn(Vec<LoadKey>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BatchResult<Value>> + Send + 'static,
    {
        Self {
            config,
            load: boxed_batch_fn(load),
        }
    }
}

impl fmt::Debug for LoadableObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadableObject")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Loader factory attached to a configuration during the build.
#[derive(Debug, Clone)]
struct AttachedLoader(LoaderFactory<LoadKey, Value>);

/// The batched loading extension.
#[derive(Debug, Default)]
pub struct Loadable;

impl Loadable {
    pub fn new() -> Self {
        Self
    }

    /// Returns the request's loader of a loadable object type.
    pub fn loader_for(schema: &Schema, type_name: &str, ctx: &RequestContext) -> Option<Arc<Loader>> {
        schema
            .type_config(type_name)?
            .options
            .get::<AttachedLoader>()
            .map(|attached| attached.0.loader(ctx))
    }
}

impl Extension for Loadable {
    fn name(&self) -> &str {
        "Loadable"
    }

    fn on_type_config(&self, mut config: TypeConfig, _store: &ConfigStore) -> BuildResult<TypeConfig> {
        if config.kind == RefKind::Object {
            if let Some(loadable) = config.options.get::<LoadableObject>().cloned() {
                let factory = LoaderFactory::with_batch_fn(loadable.config, loadable.load);
                config.options.insert(AttachedLoader(factory));
            }
        }
        Ok(config)
    }

    fn on_output_field_config(
        &self,
        mut config: OutputFieldConfig,
        _store: &ConfigStore,
    ) -> BuildResult<OutputFieldConfig> {
        if let Some(loadable) = config.options.get::<LoadableField>().cloned() {
            let factory = LoaderFactory::with_batch_fn(loadable.config, loadable.load);
            config.options.insert(AttachedLoader(factory));
        }
        Ok(config)
    }

    fn wrap_resolve(
        &self,
        resolver: ResolveFn,
        field: &OutputFieldConfig,
        store: &ConfigStore,
    ) -> BuildResult<ResolveFn> {
        let factory = match field.options.get::<AttachedLoader>() {
            Some(attached) => attached.0.clone(),
            None => {
                let returned = field.ty.named_ref();
                if returned.kind() != RefKind::Object {
                    return Ok(resolver);
                }
                match store.resolve_type(returned)?.options.get::<AttachedLoader>() {
                    Some(attached) => attached.0.clone(),
                    None => return Ok(resolver),
                }
            }
        };
        let is_list = field.ty.list_item().is_some();
        debug!(field = %field.coordinate(), list = is_list, "installed batched loading");

        Ok(resolve_fn(move |parent, args, ctx, info| {
            let keys = resolver(parent, args, ctx.clone(), info);
            let loader = factory.loader(&ctx);
            async move {
                let keys = keys.await?;
                if is_list {
                    load_list(&loader, keys).await
                } else {
                    load_one(&loader, keys).await
                }
            }
        }))
    }
}

/// Values that are already loaded, or absent, skip the loader.
fn is_settled(value: &Value) -> bool {
    matches!(value, Value::Null | Value::Object(_))
}

fn key_failed(key: &LoadKey, error: &LoadError) -> FieldError {
    FieldError::BatchKeyFailed {
        key: key.to_string(),
        message: error.message().to_string(),
    }
}

async fn load_one(loader: &Loader, key: Value) -> Result<Value, FieldError> {
    if is_settled(&key) {
        return Ok(key);
    }
    let key = LoadKey(key);
    loader.load(key.clone()).await.map_err(|e| key_failed(&key, &e))
}

async fn load_list(loader: &Loader, keys: Value) -> Result<Value, FieldError> {
    let Value::Array(items) = keys else {
        return load_one(loader, keys).await;
    };
    let pending: Vec<LoadKey> = items
        .iter()
        .filter(|item| !is_settled(item))
        .cloned()
        .map(LoadKey)
        .collect();
    let mut loaded = pending
        .iter()
        .cloned()
        .zip(loader.load_many(pending.clone()).await)
        .map(|(key, outcome)| outcome.map_err(|e| key_failed(&key, &e)));

    let mut values = Vec::with_capacity(items.len());
    for item in items {
        if is_settled(&item) {
            values.push(item);
        } else if let Some(outcome) = loaded.next() {
            values.push(outcome?);
        }
    }
    Ok(Value::Array(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use trellis_runtime::{resolve_sync_fn, FieldOptions, ResolverArgs, SchemaBuilder, TypeOptions, TypeRef};

    fn users(batches: Arc<Mutex<Vec<Vec<LoadKey>>>>) -> LoadableObject {
        LoadableObject::new(LoaderConfig::new(), move |keys: Vec<LoadKey>, _ctx| {
            batches.lock().push(keys.clone());
            async move {
                Ok(keys
                    .into_iter()
                    .map(|key| match key.0.as_str() {
                        Some("ghost") => Err(LoadError::new("not found")),
                        _ => Ok(json!({ "id": key.0 })),
                    })
                    .collect())
            }
        })
    }

    #[tokio::test]
    async fn test_object_fields_share_one_loader() {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let mut builder = SchemaBuilder::new(vec![Arc::new(Loadable::new())]).unwrap();
        let query = builder.object_type("Query", TypeOptions::new()).unwrap();
        let user = builder
            .object_type("User", TypeOptions::new().option(users(Arc::clone(&batches))))
            .unwrap();
        builder
            .field(
                query,
                "me",
                FieldOptions::new(TypeRef::named(user)).resolver(resolve_sync_fn(|_, _, _, _| Ok(json!("1")))),
            )
            .unwrap();
        builder
            .field(
                query,
                "friends",
                FieldOptions::new(TypeRef::list(TypeRef::option(TypeRef::named(user))))
                    .resolver(resolve_sync_fn(|_, _, _, _| Ok(json!(["2", null, {"id": "3"}, "ghost"])))),
            )
            .unwrap();
        builder.query_type(query);
        let schema = builder.build().unwrap();

        let ctx = RequestContext::default();
        let (me, friends) = tokio::join!(
            schema.resolve_field("Query", "me", json!({}), ResolverArgs::new(), &ctx),
            schema.resolve_field("Query", "friends", json!({}), ResolverArgs::new(), &ctx),
        );
        assert_eq!(me, Ok(json!({ "id": "1" })));
        assert_eq!(
            friends,
            Err(FieldError::BatchKeyFailed {
                key: "ghost".into(),
                message: "not found".into()
            })
        );
        assert_eq!(
            *batches.lock(),
            vec![vec![LoadKey(json!("1")), LoadKey(json!("2")), LoadKey(json!("ghost"))]]
        );

        let loader = Loadable::loader_for(&schema, "User", &ctx).unwrap();
        assert_eq!(loader.load(LoadKey(json!("2"))).await, Ok(json!({ "id": "2" })));
        assert!(Loadable::loader_for(&schema, "Query", &ctx).is_none());
    }

    #[test]
    fn test_key_display() {
        assert_eq!(LoadKey(json!("abc")).to_string(), "abc");
        assert_eq!(LoadKey(json!(42)).to_string(), "42");
    }
}
