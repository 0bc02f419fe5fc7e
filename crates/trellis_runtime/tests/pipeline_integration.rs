//! Integration tests for schema construction and field execution.

use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use trellis_runtime::{
    resolve_fn, resolve_sync_fn, ArgOptions, AsyncContextCache, BuildError, BuildResult, Config,
    ConfigStore, ContextCache, Extension, FieldError, FieldOptions, LoadError, LoaderConfig, LoaderFactory,
    OutputFieldConfig, RefKind, RequestContext, ResolveFn, ResolverArgs, Schema, SchemaBuilder,
    TypeConfig, TypeOptions, TypeRef,
};

fn build_social_schema(users_first: bool) -> Schema {
    let mut builder = SchemaBuilder::new(Vec::new()).unwrap();
    let (user, post) = if users_first {
        let user = builder.object_ref("User").unwrap();
        let post = builder.object_ref("Post").unwrap();
        (user, post)
    } else {
        let post = builder.object_ref("Post").unwrap();
        let user = builder.object_ref("User").unwrap();
        (user, post)
    };
    let query = builder.object_ref("Query").unwrap();
    let id = builder.named("ID").unwrap();

    let declare_user = |builder: &SchemaBuilder| {
        builder.implement(user, TypeOptions::new()).unwrap();
        builder.field(user, "id", FieldOptions::new(id.clone())).unwrap();
        builder
            .field(user, "posts", FieldOptions::new(TypeRef::list(TypeRef::named(post))))
            .unwrap();
        builder
            .field(user, "bestFriend", FieldOptions::new(TypeRef::option(TypeRef::named(user))))
            .unwrap();
    };
    let declare_post = |builder: &SchemaBuilder| {
        builder.implement(post, TypeOptions::new()).unwrap();
        builder.field(post, "id", FieldOptions::new(id.clone())).unwrap();
        builder
            .field(post, "author", FieldOptions::new(TypeRef::named(user)))
            .unwrap();
    };

    if users_first {
        declare_user(&builder);
        declare_post(&builder);
    } else {
        declare_post(&builder);
        declare_user(&builder);
    }
    builder.implement(query, TypeOptions::new()).unwrap();
    builder
        .field(query, "me", FieldOptions::new(TypeRef::named(user)))
        .unwrap();
    builder.query_type(query);
    builder.build().unwrap()
}

/// Test that mutually recursive declarations build the same schema in any order.
#[test]
fn test_declaration_order_invariance() {
    let forward = build_social_schema(true);
    let backward = build_social_schema(false);

    let type_of = |schema: &Schema, ty: &str, field: &str| {
        schema.render_type(&schema.output_field(ty, field).unwrap().ty)
    };
    for schema in [&forward, &backward] {
        assert_eq!(type_of(schema, "User", "posts"), "[Post!]!");
        assert_eq!(type_of(schema, "Post", "author"), "User!");
        assert_eq!(type_of(schema, "User", "bestFriend"), "User");
    }

    let mut left = forward.summary().types;
    let mut right = backward.summary().types;
    left.sort_by(|a, b| a.name.cmp(&b.name));
    right.sort_by(|a, b| a.name.cmp(&b.name));
    assert_eq!(left, right);
}

/// Test that resolving a reference twice returns the same configuration.
#[test]
fn test_resolution_identity() {
    let builder = SchemaBuilder::new(Vec::new()).unwrap();
    let user = builder.object_ref("User").unwrap();
    builder.implement(user, TypeOptions::new()).unwrap();

    let store = builder.store();
    let first = store.resolve(user).unwrap();
    let second = store.resolve(user).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

/// Test that an undeclared reference fails the build with its name.
#[test]
fn test_unknown_reference_fails_build() {
    let mut builder = SchemaBuilder::new(Vec::new()).unwrap();
    let query = builder.object_type("Query", TypeOptions::new()).unwrap();
    let ghost = builder.object_ref("Ghost").unwrap();
    builder
        .field(query, "ghost", FieldOptions::new(TypeRef::named(ghost)))
        .unwrap();
    builder.query_type(query);

    assert_eq!(
        builder.build().unwrap_err(),
        BuildError::UnknownReference {
            name: "Ghost".into()
        }
    );
}

/// Test that two types whose thunks read each other's configuration build.
#[test]
fn test_mutually_dependent_thunks_build() {
    let mut builder = SchemaBuilder::new(Vec::new()).unwrap();
    let a = builder.object_ref("A").unwrap();
    let b = builder.object_ref("B").unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&seen);
    builder
        .declare(a, move |store| {
            let b_config = store.resolve(b)?;
            log.lock().push(format!("A -> {}", b_config.name()));
            Ok(Config::Type(TypeConfig::new("A", RefKind::Object)))
        })
        .unwrap();
    let log = Arc::clone(&seen);
    builder
        .declare(b, move |store| {
            store.on_resolved(a, move |_, a_config| {
                log.lock().push(format!("B -> {}", a_config.name()));
                Ok(())
            })?;
            Ok(Config::Type(TypeConfig::new("B", RefKind::Object)))
        })
        .unwrap();
    for (parent, target) in [(a, b), (b, a)] {
        builder
            .field(parent, "other", FieldOptions::new(TypeRef::named(target)))
            .unwrap();
    }
    let query = builder.object_type("Query", TypeOptions::new()).unwrap();
    builder
        .field(query, "a", FieldOptions::new(TypeRef::named(a)))
        .unwrap();
    builder.query_type(query);

    let schema = builder.build().unwrap();
    assert_eq!(*seen.lock(), vec!["A -> B", "B -> A"]);
    assert!(schema.type_config("B").is_some());
}

struct Tag {
    name: String,
    log: Arc<Mutex<Vec<String>>>,
}

impl Extension for Tag {
    fn name(&self) -> &str {
        &self.name
    }

    fn wrap_resolve(
        &self,
        resolver: ResolveFn,
        _field: &OutputFieldConfig,
        _store: &ConfigStore,
    ) -> BuildResult<ResolveFn> {
        let name = self.name.clone();
        let log = Arc::clone(&self.log);
        Ok(resolve_fn(move |parent, args, ctx, info| {
            let (name, log, inner) = (name.clone(), Arc::clone(&log), Arc::clone(&resolver));
            async move {
                log.lock().push(format!("before {name}"));
                let result = inner(parent, args, ctx, info).await;
                log.lock().push(format!("after {name}"));
                result
            }
        }))
    }
}

struct Passthrough(&'static str);

impl Extension for Passthrough {
    fn name(&self) -> &str {
        self.0
    }
}

fn hello_schema(extensions: Vec<Arc<dyn Extension>>, base: ResolveFn) -> Schema {
    let mut builder = SchemaBuilder::new(extensions).unwrap();
    let query = builder.object_type("Query", TypeOptions::new()).unwrap();
    builder
        .field(
            query,
            "hello",
            FieldOptions::new(builder.named("String").unwrap()).resolver(base),
        )
        .unwrap();
    builder.query_type(query);
    builder.build().unwrap()
}

/// Test that the first extension's wrapper is the outermost layer.
#[tokio::test]
async fn test_wrap_order_is_first_outermost() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let extensions: Vec<Arc<dyn Extension>> = (1..=3)
        .map(|n| {
            Arc::new(Tag {
                name: n.to_string(),
                log: Arc::clone(&log),
            }) as Arc<dyn Extension>
        })
        .collect();
    let core_log = Arc::clone(&log);
    let base = resolve_sync_fn(move |_, _, _, _| {
        core_log.lock().push("resolve".to_string());
        Ok(json!("world"))
    });

    let schema = hello_schema(extensions, base);
    let value = schema
        .resolve_field("Query", "hello", json!({}), ResolverArgs::new(), &RequestContext::default())
        .await;

    assert_eq!(value, Ok(json!("world")));
    assert_eq!(
        *log.lock(),
        vec![
            "before 1", "before 2", "before 3", "resolve", "after 3", "after 2", "after 1"
        ]
    );
}

/// Test that fields without cross-cutting behavior run the bare resolver.
#[tokio::test]
async fn test_passthrough_installs_base_resolver() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let base = resolve_sync_fn(move |_, _, _, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(json!("hi"))
    });

    let schema = hello_schema(
        vec![Arc::new(Passthrough("a")), Arc::new(Passthrough("b"))],
        Arc::clone(&base),
    );
    let installed = schema.resolver("Query", "hello").unwrap();
    assert!(Arc::ptr_eq(installed, &base));

    let ctx = RequestContext::default();
    schema
        .resolve_field("Query", "hello", json!({}), ResolverArgs::new(), &ctx)
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Test that a per-request factory runs once per request under concurrency.
#[tokio::test]
async fn test_request_cache_constructs_once() {
    let constructed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&constructed);
    let cache = AsyncContextCache::new(move |_ctx| {
        let counter = Arc::clone(&counter);
        async move {
            tokio::task::yield_now().await;
            counter.fetch_add(1, Ordering::SeqCst) + 1
        }
    });

    let ctx = RequestContext::default();
    let values = join_all((0..16).map(|_| cache.get(&ctx))).await;
    assert!(values.iter().all(|v| *v == 1));
    assert_eq!(constructed.load(Ordering::SeqCst), 1);

    let fresh = RequestContext::default();
    assert_eq!(cache.get(&fresh).await, 2);
    assert_eq!(constructed.load(Ordering::SeqCst), 2);

    let sync_calls = Arc::new(AtomicUsize::new(0));
    let sync_counter = Arc::clone(&sync_calls);
    let sync_cache = ContextCache::new(move |_ctx| sync_counter.fetch_add(1, Ordering::SeqCst));
    assert_eq!(sync_cache.get(&ctx), sync_cache.get(&ctx));
    assert_eq!(sync_calls.load(Ordering::SeqCst), 1);
}

/// Test that sibling fields share one loader batch.
#[tokio::test]
async fn test_sibling_fields_share_batches() {
    let batches = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&batches);
    let users: LoaderFactory<String, serde_json::Value> =
        LoaderFactory::new(LoaderConfig::new().max_batch_size(2), move |keys: Vec<String>, _ctx| {
            recorded.lock().push(keys.clone());
            async move {
                Ok(keys
                    .into_iter()
                    .map(|id| {
                        if id == "404" {
                            Err(LoadError::new("no such user"))
                        } else {
                            Ok(json!({ "id": id }))
                        }
                    })
                    .collect())
            }
        });

    let mut builder = SchemaBuilder::new(Vec::new()).unwrap();
    let query = builder.object_type("Query", TypeOptions::new()).unwrap();
    let user = builder.object_type("User", TypeOptions::new()).unwrap();
    let id = builder.named("ID").unwrap();
    builder.field(user, "id", FieldOptions::new(id.clone())).unwrap();
    builder
        .field(
            query,
            "user",
            FieldOptions::new(TypeRef::named(user))
                .arg("id", ArgOptions::new(id))
                .resolve(move |_, args, ctx, _| {
                    let loader = users.loader(&ctx);
                    let id = args.require::<String>("id");
                    async move {
                        match id {
                            Ok(id) => loader
                                .load(id)
                                .await
                                .map_err(|e| FieldError::resolver(e.message())),
                            Err(error) => Err(error),
                        }
                    }
                }),
        )
        .unwrap();
    builder.query_type(query);
    let schema = builder.build().unwrap();

    let ctx = RequestContext::default();
    let fetch = |id: &str| {
        schema.resolve_field(
            "Query",
            "user",
            json!({}),
            ResolverArgs::from_json(json!({ "id": id })),
            &ctx,
        )
    };

    let (a, b, c) = tokio::join!(fetch("A"), fetch("B"), fetch("404"));
    assert_eq!(a, Ok(json!({ "id": "A" })));
    assert_eq!(b, Ok(json!({ "id": "B" })));
    assert!(c.is_err());
    assert_eq!(
        *batches.lock(),
        vec![
            vec!["A".to_string(), "B".to_string()],
            vec!["404".to_string()]
        ]
    );

    assert_eq!(fetch("A").await, Ok(json!({ "id": "A" })));
    assert_eq!(batches.lock().len(), 2);
}
