//! Type-keyed metadata attached to configurations.
//!
//! Extensions describe their per-type and per-field settings with their own
//! Rust types and store them here, one value per type. The map is cheap to
//! clone so that hooks can return modified copies of a configuration.

use rustc_hash::FxHashMap;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// A map from Rust type to a single shared value of that type.
///
/// # Example
///
/// ```
/// use trellis_core::Options;
///
/// #[derive(Debug, PartialEq)]
/// struct MaxDepth(u32);
///
/// let options = Options::new().with(MaxDepth(3));
/// assert_eq!(options.get::<MaxDepth>(), Some(&MaxDepth(3)));
/// assert!(options.get::<String>().is_none());
/// ```
#[derive(Clone, Default)]
pub struct Options {
    data: FxHashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Options {
    /// Creates an empty option map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, returning true if a value of the same type was replaced.
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) -> bool {
        self.data
            .insert(TypeId::of::<T>(), Arc::new(value))
            .is_some()
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
            .and_then(|value| value.downcast_ref())
    }

    /// Returns true if a value of the given type is present.
    pub fn contains<T: 'static>(&self) -> bool {
        self.data.contains_key(&TypeId::of::<T>())
    }

    /// Removes a value by type, returning true if one was present.
    pub fn remove<T: 'static>(&mut self) -> bool {
        self.data.remove(&TypeId::of::<T>()).is_some()
    }

    /// Returns the number of stored values.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if no values are stored.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("len", &self.data.len())
            .finish()
    }
}
