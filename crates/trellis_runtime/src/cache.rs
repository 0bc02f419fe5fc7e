//! Per-request memoization keyed by factory identity.
//!
//! A [`ContextCache`] pairs a constructor with a process-unique
//! [`FactoryId`]. Asking it for a value with a given [`RequestContext`]
//! constructs the value on first use and returns the stored value on every
//! later call for the same request. A new request starts empty.

use crate::context::RequestContext;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::any::{Any, TypeId};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

static NEXT_FACTORY_ID: AtomicU64 = AtomicU64::new(0);

/// Identity of a cached factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FactoryId(u64);

impl FactoryId {
    /// Allocates a new unique id.
    pub(crate) fn next() -> Self {
        Self(NEXT_FACTORY_ID.fetch_add(1, Ordering::Relaxed))
    }
}

type Slot = Arc<dyn Any + Send + Sync>;

/// The memo table owned by one request.
///
/// Slots are keyed by factory and value type together, so a slot always
/// holds the type it is read as.
#[derive(Default)]
pub struct RequestCache {
    slots: Mutex<FxHashMap<(FactoryId, TypeId), Slot>>,
}

impl RequestCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value stored for `id`, running `factory` if there is none.
    ///
    /// The factory runs outside the table lock so it may use other caches of
    /// the same request. Concurrent callers for the same id wait for the
    /// first one instead of running the factory again.
    pub fn get_or_create<T, F>(&self, id: FactoryId, factory: F) -> T
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        self.slot::<T>(id).get_or_init(factory).clone()
    }

    /// Returns true if a slot exists for `id`.
    pub fn contains(&self, id: FactoryId) -> bool {
        self.slots.lock().keys().any(|(slot_id, _)| *slot_id == id)
    }

    /// Returns the number of slots.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Returns true if nothing has been cached yet.
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    fn slot<T: Send + Sync + 'static>(&self, id: FactoryId) -> Arc<OnceLock<T>> {
        let key = (id, TypeId::of::<T>());
        let mut slots = self.slots.lock();
        if let Some(slot) = slots
            .get(&key)
            .and_then(|slot| Arc::clone(slot).downcast::<OnceLock<T>>().ok())
        {
            return slot;
        }
        let slot = Arc::new(OnceLock::<T>::new());
        slots.insert(key, Arc::clone(&slot) as Slot);
        slot
    }
}

impl fmt::Debug for RequestCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestCache")
            .field("slots", &self.len())
            .finish()
    }
}

/// A constructor memoized per request.
///
/// Clones keep the same identity.
pub struct ContextCache<T> {
    id: FactoryId,
    factory: Arc<dyn Fn(&RequestContext) -> T + Send + Sync>,
}

impl<T> Clone for ContextCache<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            factory: Arc::clone(&self.factory),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> ContextCache<T> {
    /// Creates a cache with a fresh identity.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&RequestContext) -> T + Send + Sync + 'static,
    {
        Self {
            id: FactoryId::next(),
            factory: Arc::new(factory),
        }
    }

    /// Returns this factory's identity.
    pub fn id(&self) -> FactoryId {
        self.id
    }

    /// Returns the request's value, constructing it on first use.
    pub fn get(&self, ctx: &RequestContext) -> T {
        ctx.cache().get_or_create(self.id, || (self.factory)(ctx))
    }
}

impl<T> fmt::Debug for ContextCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextCache").field("id", &self.id).finish()
    }
}

/// An asynchronous constructor memoized per request.
///
/// The pending future itself is stored, so callers arriving before it has
/// finished await the same construction.
pub struct AsyncContextCache<T> {
    id: FactoryId,
    factory: Arc<dyn Fn(RequestContext) -> BoxFuture<'static, T> + Send + Sync>,
}

impl<T> Clone for AsyncContextCache<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            factory: Arc::clone(&self.factory),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> AsyncContextCache<T> {
    /// Creates a cache with a fresh identity.
    pub fn new<F, Fut>(factory: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        Self {
            id: FactoryId::next(),
            factory: Arc::new(move |ctx| factory(ctx).boxed()),
        }
    }

    /// Returns this factory's identity.
    pub fn id(&self) -> FactoryId {
        self.id
    }

    /// Returns the shared construction future for the request.
    pub fn future(&self, ctx: &RequestContext) -> Shared<BoxFuture<'static, T>> {
        ctx.cache()
            .get_or_create(self.id, || (self.factory)(ctx.clone()).shared())
    }

    /// Awaits the request's value, constructing it on first use.
    pub async fn get(&self, ctx: &RequestContext) -> T {
        self.future(ctx).await
    }
}

impl<T> fmt::Debug for AsyncContextCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncContextCache")
            .field("id", &self.id)
            .finish()
    }
}
