//! DataLoader for trellis.
//!
//! Provides per-request batching and caching to prevent N+1 fetches. Keys
//! requested while sibling fields are still being polled are collected into
//! one queue. The first key of a window spawns a flush task that yields once
//! to the scheduler and then dispatches the queue in chunks of at most
//! `max_batch_size` keys.

use crate::cache::{ContextCache, FactoryId};
use crate::context::{RequestContext, WeakRequestContext};
use futures::future::{join_all, BoxFuture, FutureExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

/// Failure of a single key, or of a whole batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct LoadError {
    message: String,
}

impl LoadError {
    /// Creates a load error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Outcome of a batch call: one entry per key, in key order.
pub type BatchResult<V> = Result<Vec<Result<V, LoadError>>, LoadError>;

/// A batch load function.
pub type BatchFn<K, V> =
    Arc<dyn Fn(Vec<K>, RequestContext) -> BoxFuture<'static, BatchResult<V>> + Send + Sync>;

/// Loader configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Maximum number of keys per batch call. `0` is treated as `1`.
    pub max_batch_size: usize,
    /// Keep results for the rest of the request.
    pub cache: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            cache: true,
        }
    }
}

impl LoaderConfig {
    /// Creates a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum batch size.
    #[must_use]
    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Disables result caching.
    #[must_use]
    pub fn no_cache(mut self) -> Self {
        self.cache = false;
        self
    }
}

enum Entry<V> {
    Pending(Vec<oneshot::Sender<Result<V, LoadError>>>),
    Ready(Result<V, LoadError>),
}

struct LoaderState<K, V> {
    entries: FxHashMap<K, Entry<V>>,
    queue: Vec<K>,
    scheduled: bool,
}

/// A DataLoader that batches and caches loads for one request.
pub struct DataLoader<K, V> {
    inner: Arc<LoaderInner<K, V>>,
}

/// Everything a detached dispatch needs once the caller that scheduled it
/// has gone away.
struct LoaderInner<K, V> {
    batch_fn: BatchFn<K, V>,
    config: LoaderConfig,
    context: WeakRequestContext,
    state: Mutex<LoaderState<K, V>>,
}

impl<K, V> DataLoader<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a loader bound to `ctx`.
    pub fn new<F, Fut>(ctx: &RequestContext, config: LoaderConfig, load: F) -> Self
    where
        F: Fn(Vec<K>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BatchResult<V>> + Send + 'static,
    {
        Self::with_batch_fn(ctx, config, Arc::new(move |keys, ctx| load(keys, ctx).boxed()))
    }

    /// Creates a loader from an already boxed batch function.
    pub fn with_batch_fn(ctx: &RequestContext, config: LoaderConfig, batch_fn: BatchFn<K, V>) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                batch_fn,
                config,
                context: ctx.downgrade(),
                state: Mutex::new(LoaderState {
                    entries: FxHashMap::default(),
                    queue: Vec::new(),
                    scheduled: false,
                }),
            }),
        }
    }

    /// Loads a value by key.
    ///
    /// The first key of a batch window schedules the flush as its own task,
    /// so the batch completes for every waiter even if that first caller is
    /// dropped.
    pub async fn load(&self, key: K) -> Result<V, LoadError> {
        let (receiver, leader) = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let (sender, receiver) = oneshot::channel();
            match state.entries.get_mut(&key) {
                Some(Entry::Ready(outcome)) => return outcome.clone(),
                Some(Entry::Pending(waiters)) => {
                    waiters.push(sender);
                    (receiver, false)
                }
                None => {
                    state.entries.insert(key.clone(), Entry::Pending(vec![sender]));
                    state.queue.push(key);
                    let leader = !state.scheduled;
                    state.scheduled = true;
                    (receiver, leader)
                }
            }
        };

        if leader {
            let inner = Arc::clone(&self.inner);
            let flush = async move {
                // Let sibling futures enqueue their keys before the batch closes.
                tokio::task::yield_now().await;
                inner.dispatch().await;
            };
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => drop(handle.spawn(flush)),
                Err(_) => flush.await,
            }
        }

        receiver
            .await
            .unwrap_or_else(|_| Err(LoadError::new("loader dropped before the batch completed")))
    }

    /// Loads multiple values, in key order.
    pub async fn load_many(&self, keys: Vec<K>) -> Vec<Result<V, LoadError>> {
        join_all(keys.into_iter().map(|key| self.load(key))).await
    }

    /// Primes the cache with a value. Existing entries are kept.
    pub fn prime(&self, key: K, value: V) {
        self.inner
            .state
            .lock()
            .entries
            .entry(key)
            .or_insert_with(|| Entry::Ready(Ok(value)));
    }

    /// Clears a settled key from the cache.
    pub fn clear(&self, key: &K) {
        let mut state = self.inner.state.lock();
        if matches!(state.entries.get(key), Some(Entry::Ready(_))) {
            state.entries.remove(key);
        }
    }

    /// Clears every settled key from the cache.
    pub fn clear_all(&self) {
        self.inner
            .state
            .lock()
            .entries
            .retain(|_, entry| matches!(entry, Entry::Pending(_)));
    }
}

impl<K, V> LoaderInner<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn dispatch(&self) {
        let keys = {
            let mut state = self.state.lock();
            state.scheduled = false;
            std::mem::take(&mut state.queue)
        };
        if keys.is_empty() {
            return;
        }

        let Some(ctx) = self.context.upgrade() else {
            let error = LoadError::new("request context dropped before dispatch");
            let count = keys.len();
            self.settle(keys, vec![Err(error); count]);
            return;
        };

        let size = self.config.max_batch_size.max(1);
        let batches = keys.chunks(size).map(|chunk| {
            let chunk = chunk.to_vec();
            let pending = (self.batch_fn)(chunk.clone(), ctx.clone());
            async move { (chunk, pending.await) }
        });

        for (chunk, result) in join_all(batches).await {
            debug!(keys = chunk.len(), "dispatched loader batch");
            let expected = chunk.len();
            let outcomes = match result {
                Ok(outcomes) if outcomes.len() == expected => outcomes,
                Ok(outcomes) => {
                    let error = LoadError::new(format!(
                        "batch function returned {} results for {} keys",
                        outcomes.len(),
                        expected
                    ));
                    vec![Err(error); expected]
                }
                Err(error) => vec![Err(error); expected],
            };
            self.settle(chunk, outcomes);
        }
    }

    fn settle(&self, keys: Vec<K>, outcomes: Vec<Result<V, LoadError>>) {
        let mut state = self.state.lock();
        for (key, outcome) in keys.into_iter().zip(outcomes) {
            let previous = if self.config.cache {
                state.entries.insert(key, Entry::Ready(outcome.clone()))
            } else {
                state.entries.remove(&key)
            };
            if let Some(Entry::Pending(waiters)) = previous {
                for waiter in waiters {
                    let _ = waiter.send(outcome.clone());
                }
            }
        }
    }
}

impl<K, V> fmt::Debug for DataLoader<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("DataLoader")
            .field("config", &self.inner.config)
            .field("entries", &state.entries.len())
            .field("queued", &state.queue.len())
            .finish()
    }
}

/// Creates one [`DataLoader`] per request.
pub struct LoaderFactory<K, V> {
    cache: ContextCache<Arc<DataLoader<K, V>>>,
}

impl<K, V> Clone for LoaderFactory<K, V> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
        }
    }
}

impl<K, V> LoaderFactory<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a factory with a fresh identity.
    pub fn new<F, Fut>(config: LoaderConfig, load: F) -> Self
    where
        F: Fn(Vec<K>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BatchResult<V>> + Send + 'static,
    {
        let batch_fn: BatchFn<K, V> = Arc::new(move |keys, ctx| load(keys, ctx).boxed());
        Self::with_batch_fn(config, batch_fn)
    }

    /// Creates a factory from an already boxed batch function.
    pub fn with_batch_fn(config: LoaderConfig, batch_fn: BatchFn<K, V>) -> Self {
        Self {
            cache: ContextCache::new(move |ctx| {
                Arc::new(DataLoader::with_batch_fn(
                    ctx,
                    config.clone(),
                    Arc::clone(&batch_fn),
                ))
            }),
        }
    }

    /// Returns the request's loader.
    pub fn loader(&self, ctx: &RequestContext) -> Arc<DataLoader<K, V>> {
        self.cache.get(ctx)
    }

    /// Returns this factory's identity.
    pub fn id(&self) -> FactoryId {
        self.cache.id()
    }
}

impl<K, V> fmt::Debug for LoaderFactory<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderFactory")
            .field("id", &self.cache.id())
            .finish()
    }
}
