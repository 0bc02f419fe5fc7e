//! Extensions and the ordered hook pipeline.
//!
//! Registration order is the precedence order for every hook. Transform
//! hooks are folded front to back. Resolver wrapping is folded back to front,
//! so the first extension's wrapper is the outermost layer.

use crate::config::{InputFieldConfig, OutputFieldConfig, TypeConfig};
use crate::resolver::ResolveFn;
use crate::store::ConfigStore;
use rustc_hash::FxHashSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use trellis_core::{BuildError, BuildResult};

/// A participant in schema construction.
///
/// Every hook defaults to returning its input unchanged.
pub trait Extension: Send + Sync {
    /// Unique extension name.
    fn name(&self) -> &str;

    /// Transforms a type configuration.
    fn on_type_config(&self, config: TypeConfig, _store: &ConfigStore) -> BuildResult<TypeConfig> {
        Ok(config)
    }

    /// Transforms an argument or input-object field configuration.
    fn on_input_field_config(
        &self,
        config: InputFieldConfig,
        _store: &ConfigStore,
    ) -> BuildResult<InputFieldConfig> {
        Ok(config)
    }

    /// Transforms an output field configuration. Its arguments have already
    /// been through [`Extension::on_input_field_config`].
    fn on_output_field_config(
        &self,
        config: OutputFieldConfig,
        _store: &ConfigStore,
    ) -> BuildResult<OutputFieldConfig> {
        Ok(config)
    }

    /// Wraps a field's execution function. Returning `resolver` itself adds
    /// no layer.
    fn wrap_resolve(
        &self,
        resolver: ResolveFn,
        _field: &OutputFieldConfig,
        _store: &ConfigStore,
    ) -> BuildResult<ResolveFn> {
        Ok(resolver)
    }
}

/// Registered extensions, in precedence order.
#[derive(Clone, Default)]
pub struct Pipeline {
    extensions: Vec<Arc<dyn Extension>>,
}

impl Pipeline {
    /// Creates a pipeline, rejecting duplicate names.
    pub fn new(extensions: Vec<Arc<dyn Extension>>) -> BuildResult<Self> {
        let mut seen = FxHashSet::default();
        for extension in &extensions {
            if !seen.insert(extension.name().to_string()) {
                return Err(BuildError::Extension {
                    name: extension.name().to_string(),
                    reason: "registered more than once".into(),
                });
            }
        }
        Ok(Self { extensions })
    }

    /// Creates a pipeline with no extensions.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Returns extension names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.extensions.iter().map(|e| e.name()).collect()
    }

    /// Finds an extension by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Extension>> {
        self.extensions.iter().find(|e| e.name() == name)
    }

    /// Runs `on_type_config` through every extension.
    pub fn on_type_config(&self, config: TypeConfig, store: &ConfigStore) -> BuildResult<TypeConfig> {
        self.extensions
            .iter()
            .try_fold(config, |config, ext| ext.on_type_config(config, store))
    }

    /// Runs `on_input_field_config` through every extension.
    pub fn on_input_field_config(
        &self,
        config: InputFieldConfig,
        store: &ConfigStore,
    ) -> BuildResult<InputFieldConfig> {
        self.extensions
            .iter()
            .try_fold(config, |config, ext| ext.on_input_field_config(config, store))
    }

    /// Runs every argument through `on_input_field_config`, then the field
    /// through `on_output_field_config`.
    pub fn on_output_field_config(
        &self,
        mut config: OutputFieldConfig,
        store: &ConfigStore,
    ) -> BuildResult<OutputFieldConfig> {
        if !self.extensions.is_empty() {
            config.args = std::mem::take(&mut config.args)
                .into_iter()
                .map(|(name, arg)| Ok((name, self.on_input_field_config(arg, store)?)))
                .collect::<BuildResult<_>>()?;
        }
        self.extensions
            .iter()
            .try_fold(config, |config, ext| ext.on_output_field_config(config, store))
    }

    /// Wraps `resolver` with every extension, the first one outermost.
    pub fn wrap_resolve(
        &self,
        resolver: ResolveFn,
        field: &OutputFieldConfig,
        store: &ConfigStore,
    ) -> BuildResult<ResolveFn> {
        let mut current = resolver;
        for ext in self.extensions.iter().rev() {
            let wrapped = ext.wrap_resolve(Arc::clone(&current), field, store)?;
            if !Arc::ptr_eq(&wrapped, &current) {
                debug!(
                    extension = ext.name(),
                    field = %field.coordinate(),
                    "wrapped resolver"
                );
            }
            current = wrapped;
        }
        Ok(current)
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("extensions", &self.names())
            .finish()
    }
}
