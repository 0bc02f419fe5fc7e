//! Request-scoped context.
//!
//! The query engine creates one [`RequestContext`] per request and passes it
//! to every field. It carries the caller's typed data (current user, roles,
//! handles to backends) and the request's [`RequestCache`].

use crate::cache::RequestCache;
use rustc_hash::FxHashMap;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

/// Type-safe storage for request-scoped data.
///
/// # Example
///
/// ```
/// use trellis_runtime::context::ContextData;
///
/// #[derive(Clone)]
/// struct UserId(String);
///
/// let data = ContextData::new().with(UserId("123".into()));
/// assert_eq!(data.get::<UserId>().unwrap().0, "123");
/// assert!(data.get::<String>().is_none());
/// ```
#[derive(Default)]
pub struct ContextData {
    data: FxHashMap<TypeId, Box<dyn Any + Send + Sync>>,
    headers: HashMap<String, String>,
}

impl ContextData {
    /// Creates a new empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value into the context.
    ///
    /// If a value of the same type already exists, it is replaced.
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.data
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|boxed| boxed.downcast().ok().map(|b| *b))
    }

    /// Adds a value and returns self.
    #[must_use]
    pub fn with<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.insert(value);
        self
    }

    /// Gets a reference to a value by type.
    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.data
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref())
    }

    /// Returns true if the context contains a value of the given type.
    pub fn contains<T: 'static>(&self) -> bool {
        self.data.contains_key(&TypeId::of::<T>())
    }

    /// Sets a header value.
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key.into(), value.into());
    }

    /// Adds a header and returns self.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(key, value);
        self
    }

    /// Gets a header value.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }
}

impl fmt::Debug for ContextData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextData")
            .field("data_count", &self.data.len())
            .field("headers", &self.headers)
            .finish()
    }
}

struct RequestInner {
    data: ContextData,
    cache: RequestCache,
}

/// One request's context. Clones share the same data and cache.
#[derive(Clone)]
pub struct RequestContext {
    inner: Arc<RequestInner>,
}

impl RequestContext {
    /// Creates a fresh context with an empty cache.
    pub fn new(data: ContextData) -> Self {
        Self {
            inner: Arc::new(RequestInner {
                data,
                cache: RequestCache::new(),
            }),
        }
    }

    /// Returns the request's typed data.
    pub fn data(&self) -> &ContextData {
        &self.inner.data
    }

    /// Shorthand for `data().get()`.
    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.inner.data.get()
    }

    /// Returns the request's memo table.
    pub fn cache(&self) -> &RequestCache {
        &self.inner.cache
    }

    /// Returns a handle that does not keep the request alive.
    pub fn downgrade(&self) -> WeakRequestContext {
        WeakRequestContext {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Returns true if both handles belong to the same request.
    pub fn same_request(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(ContextData::default())
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("data", &self.inner.data)
            .field("cached", &self.inner.cache.len())
            .finish()
    }
}

/// A non-owning [`RequestContext`] handle.
///
/// Objects stored in the request's own cache hold this instead of a
/// `RequestContext` so the request can be dropped.
#[derive(Clone)]
pub struct WeakRequestContext {
    inner: Weak<RequestInner>,
}

impl WeakRequestContext {
    /// Returns the context if the request is still alive.
    pub fn upgrade(&self) -> Option<RequestContext> {
        self.inner.upgrade().map(|inner| RequestContext { inner })
    }
}

impl fmt::Debug for WeakRequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakRequestContext")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct CurrentUser(String);

    #[test]
    fn test_context_data() {
        let mut data = ContextData::new().with_header("Authorization", "Bearer token");
        assert!(data.insert(CurrentUser("old".into())).is_none());
        let old = data.insert(CurrentUser("new".into()));

        assert_eq!(old, Some(CurrentUser("old".into())));
        assert_eq!(data.get::<CurrentUser>(), Some(&CurrentUser("new".into())));
        assert_eq!(data.header("Authorization"), Some("Bearer token"));
    }

    #[test]
    fn test_clones_share_request() {
        let ctx = RequestContext::new(ContextData::new().with(CurrentUser("a".into())));
        let clone = ctx.clone();
        assert!(ctx.same_request(&clone));
        assert!(!ctx.same_request(&RequestContext::default()));
        assert_eq!(clone.get::<CurrentUser>(), Some(&CurrentUser("a".into())));
    }

    #[test]
    fn test_weak_handle_does_not_keep_request_alive() {
        let ctx = RequestContext::default();
        let weak = ctx.downgrade();
        assert!(weak.upgrade().is_some());
        drop(ctx);
        assert!(weak.upgrade().is_none());
    }
}
