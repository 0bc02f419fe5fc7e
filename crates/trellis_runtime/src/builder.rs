//! Schema builder.
//!
//! Types and fields are declared through references. Nothing is resolved
//! until [`SchemaBuilder::build`], so declarations may appear in any order
//! and may refer to types that are declared later, or to themselves.

use crate::config::{
    Config, FieldConfig, InputFieldConfig, InputFieldKind, OutputFieldConfig, TypeConfig,
};
use crate::context::RequestContext;
use crate::error::FieldResult;
use crate::extension::{Extension, Pipeline};
use crate::resolver::{default_resolver, resolve_fn, ResolveFn, ResolverArgs, ResolverInfo};
use crate::schema::{Schema, SchemaField, SchemaType};
use crate::store::ConfigStore;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::info;
use trellis_core::{BuildError, BuildResult, Options, RefKind, Reference, TypeRef};

/// Built-in scalar names.
pub const BUILTIN_SCALARS: [&str; 5] = ["String", "Int", "Float", "Boolean", "ID"];

/// Build-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildOptions {
    /// Give fields without a resolver the property-lookup resolver.
    pub default_resolver: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            default_resolver: true,
        }
    }
}

/// Options for a type declaration.
#[derive(Debug, Clone, Default)]
pub struct TypeOptions {
    pub description: Option<String>,
    pub interfaces: Vec<Reference>,
    pub members: Vec<Reference>,
    pub values: Vec<String>,
    pub options: Options,
}

impl TypeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Adds an implemented interface.
    #[must_use]
    pub fn implements(mut self, interface: Reference) -> Self {
        self.interfaces.push(interface);
        self
    }

    /// Adds a union member.
    #[must_use]
    pub fn member(mut self, member: Reference) -> Self {
        self.members.push(member);
        self
    }

    /// Adds an enum value.
    #[must_use]
    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.values.push(value.into());
        self
    }

    /// Attaches extension metadata.
    #[must_use]
    pub fn option<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.options.insert(value);
        self
    }
}

/// Options for an argument or input-object field.
#[derive(Debug, Clone)]
pub struct ArgOptions {
    pub ty: TypeRef,
    pub default_value: Option<Value>,
    pub description: Option<String>,
    pub options: Options,
}

impl ArgOptions {
    pub fn new(ty: TypeRef) -> Self {
        Self {
            ty,
            default_value: None,
            description: None,
            options: Options::new(),
        }
    }

    #[must_use]
    pub fn default_value(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attaches extension metadata.
    #[must_use]
    pub fn option<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.options.insert(value);
        self
    }

    fn into_config(
        self,
        name: String,
        kind: InputFieldKind,
        parent: Reference,
        parent_type: String,
        parent_field: Option<String>,
    ) -> InputFieldConfig {
        InputFieldConfig {
            name,
            kind,
            parent,
            parent_type,
            parent_field,
            ty: self.ty,
            default_value: self.default_value,
            description: self.description,
            options: self.options,
        }
    }
}

/// Options for an output field.
#[derive(Clone)]
pub struct FieldOptions {
    pub ty: TypeRef,
    pub args: IndexMap<String, ArgOptions>,
    pub description: Option<String>,
    pub resolver: Option<ResolveFn>,
    pub options: Options,
}

impl FieldOptions {
    pub fn new(ty: TypeRef) -> Self {
        Self {
            ty,
            args: IndexMap::new(),
            description: None,
            resolver: None,
            options: Options::new(),
        }
    }

    /// Adds an argument.
    #[must_use]
    pub fn arg(mut self, name: impl Into<String>, arg: ArgOptions) -> Self {
        self.args.insert(name.into(), arg);
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the resolver.
    #[must_use]
    pub fn resolver(mut self, resolver: ResolveFn) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Sets the resolver from an async closure.
    #[must_use]
    pub fn resolve<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Value, ResolverArgs, RequestContext, ResolverInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FieldResult> + Send + 'static,
    {
        self.resolver(resolve_fn(f))
    }

    /// Attaches extension metadata.
    #[must_use]
    pub fn option<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.options.insert(value);
        self
    }

    fn into_config(self, name: String, parent: Reference, parent_type: String) -> OutputFieldConfig {
        let args = self
            .args
            .into_iter()
            .map(|(arg_name, arg)| {
                let config = arg.into_config(
                    arg_name.clone(),
                    InputFieldKind::Arg,
                    parent,
                    parent_type.clone(),
                    Some(name.clone()),
                );
                (arg_name, config)
            })
            .collect();
        OutputFieldConfig {
            name,
            parent,
            parent_type,
            ty: self.ty,
            args,
            description: self.description,
            resolver: self.resolver,
            options: self.options,
        }
    }
}

impl std::fmt::Debug for FieldOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldOptions")
            .field("ty", &self.ty)
            .field("args", &self.args)
            .field("has_resolver", &self.resolver.is_some())
            .finish_non_exhaustive()
    }
}

/// Collects declarations and builds a [`Schema`].
#[derive(Debug)]
pub struct SchemaBuilder {
    store: ConfigStore,
    options: BuildOptions,
    query: Option<Reference>,
    mutation: Option<Reference>,
    subscription: Option<Reference>,
}

impl SchemaBuilder {
    /// Creates a builder with the given extensions, in precedence order.
    pub fn new(extensions: Vec<Arc<dyn Extension>>) -> BuildResult<Self> {
        let builder = Self {
            store: ConfigStore::new(Pipeline::new(extensions)?),
            options: BuildOptions::default(),
            query: None,
            mutation: None,
            subscription: None,
        };
        for name in BUILTIN_SCALARS {
            builder.scalar_type(
                name,
                TypeOptions::new().description(format!("Built-in {name} scalar")),
            )?;
        }
        Ok(builder)
    }

    /// Sets build options.
    #[must_use]
    pub fn options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns the declaration graph.
    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// Finds a declared type by name.
    pub fn type_ref(&self, name: &str) -> BuildResult<Reference> {
        self.store
            .lookup(name)
            .ok_or_else(|| BuildError::UnknownReference {
                name: name.to_string(),
            })
    }

    /// Shorthand for a non-null reference to a declared type.
    pub fn named(&self, name: &str) -> BuildResult<TypeRef> {
        self.type_ref(name).map(TypeRef::named)
    }

    pub fn object_ref(&self, name: impl Into<String>) -> BuildResult<Reference> {
        self.store.create_ref(RefKind::Object, name)
    }

    pub fn interface_ref(&self, name: impl Into<String>) -> BuildResult<Reference> {
        self.store.create_ref(RefKind::Interface, name)
    }

    pub fn input_ref(&self, name: impl Into<String>) -> BuildResult<Reference> {
        self.store.create_ref(RefKind::InputObject, name)
    }

    pub fn scalar_ref(&self, name: impl Into<String>) -> BuildResult<Reference> {
        self.store.create_ref(RefKind::Scalar, name)
    }

    pub fn enum_ref(&self, name: impl Into<String>) -> BuildResult<Reference> {
        self.store.create_ref(RefKind::Enum, name)
    }

    pub fn union_ref(&self, name: impl Into<String>) -> BuildResult<Reference> {
        self.store.create_ref(RefKind::Union, name)
    }

    /// Declares the type behind `reference`.
    pub fn implement(&self, reference: Reference, options: TypeOptions) -> BuildResult<()> {
        if reference.kind() == RefKind::Field {
            return Err(BuildError::invalid(
                self.store.display_name(reference),
                "field references are implemented with `field`",
            ));
        }
        let name = self.store.name_of(reference);
        self.store.declare(reference, move |_| {
            Ok(Config::Type(TypeConfig {
                name,
                kind: reference.kind(),
                description: options.description,
                interfaces: options.interfaces,
                members: options.members,
                values: options.values,
                options: options.options,
            }))
        })
    }

    /// Declares `reference` with a custom thunk.
    pub fn declare<F>(&self, reference: Reference, thunk: F) -> BuildResult<()>
    where
        F: FnOnce(&ConfigStore) -> BuildResult<Config> + 'static,
    {
        self.store.declare(reference, thunk)
    }

    fn create_type(&self, kind: RefKind, name: impl Into<String>, options: TypeOptions) -> BuildResult<Reference> {
        let reference = self.store.create_ref(kind, name)?;
        self.implement(reference, options)?;
        Ok(reference)
    }

    pub fn object_type(&self, name: impl Into<String>, options: TypeOptions) -> BuildResult<Reference> {
        self.create_type(RefKind::Object, name, options)
    }

    pub fn interface_type(&self, name: impl Into<String>, options: TypeOptions) -> BuildResult<Reference> {
        self.create_type(RefKind::Interface, name, options)
    }

    pub fn input_type(&self, name: impl Into<String>, options: TypeOptions) -> BuildResult<Reference> {
        self.create_type(RefKind::InputObject, name, options)
    }

    pub fn scalar_type(&self, name: impl Into<String>, options: TypeOptions) -> BuildResult<Reference> {
        self.create_type(RefKind::Scalar, name, options)
    }

    pub fn enum_type(&self, name: impl Into<String>, options: TypeOptions) -> BuildResult<Reference> {
        self.create_type(RefKind::Enum, name, options)
    }

    pub fn union_type(&self, name: impl Into<String>, options: TypeOptions) -> BuildResult<Reference> {
        self.create_type(RefKind::Union, name, options)
    }

    /// Declares an output field on an object or interface.
    pub fn field(
        &self,
        parent: Reference,
        name: impl Into<String>,
        options: FieldOptions,
    ) -> BuildResult<Reference> {
        self.field_with(parent, name, move |_| Ok(options))
    }

    /// Declares an output field whose options are computed during the build.
    pub fn field_with<F>(&self, parent: Reference, name: impl Into<String>, options: F) -> BuildResult<Reference>
    where
        F: FnOnce(&ConfigStore) -> BuildResult<FieldOptions> + 'static,
    {
        let name = name.into();
        if !parent.kind().has_fields() {
            return Err(BuildError::invalid(
                format!("{}.{}", self.store.name_of(parent), name),
                format!("output fields require an object or interface, found {}", parent.kind()),
            ));
        }
        let reference = self.store.create_field_ref(parent, name.clone())?;
        self.store.declare(reference, move |store| {
            let options = options(store)?;
            let config = options.into_config(name, parent, store.name_of(parent));
            Ok(Config::Field(FieldConfig::Output(config)))
        })?;
        Ok(reference)
    }

    /// Declares a field on an input object.
    pub fn input_field(
        &self,
        parent: Reference,
        name: impl Into<String>,
        options: ArgOptions,
    ) -> BuildResult<Reference> {
        let name = name.into();
        if parent.kind() != RefKind::InputObject {
            return Err(BuildError::invalid(
                format!("{}.{}", self.store.name_of(parent), name),
                format!("input fields require an input object, found {}", parent.kind()),
            ));
        }
        let reference = self.store.create_field_ref(parent, name.clone())?;
        self.store.declare(reference, move |store| {
            let config = options.into_config(name, InputFieldKind::InputObject, parent, store.name_of(parent), None);
            Ok(Config::Field(FieldConfig::Input(config)))
        })?;
        Ok(reference)
    }

    /// Sets the query root.
    pub fn query_type(&mut self, reference: Reference) {
        self.query = Some(reference);
    }

    /// Sets the mutation root.
    pub fn mutation_type(&mut self, reference: Reference) {
        self.mutation = Some(reference);
    }

    /// Sets the subscription root.
    pub fn subscription_type(&mut self, reference: Reference) {
        self.subscription = Some(reference);
    }

    /// Resolves every declaration, runs the extension hooks and installs
    /// the final execution function of every output field.
    pub fn build(self) -> BuildResult<Schema> {
        let store = &self.store;
        store.resolve_all()?;
        store.finish()?;

        let roots = [self.query, self.mutation, self.subscription];
        for root in roots.iter().flatten() {
            if root.kind() != RefKind::Object || !store.is_declared(*root) {
                return Err(BuildError::invalid(
                    store.name_of(*root),
                    "root types must be declared object types",
                ));
            }
        }

        let mut types = IndexMap::new();
        let mut field_count = 0;
        for reference in store.types() {
            let config = store.resolve(reference)?;
            let mut fields = IndexMap::new();
            for field_ref in store.fields_of(reference) {
                let field_config = store.resolve(field_ref)?;
                let resolver = match field_config.as_output_field() {
                    Some(field) => Some(self.install_resolver(field)?),
                    None => None,
                };
                fields.insert(
                    field_config.name().to_string(),
                    SchemaField {
                        config: field_config,
                        resolver,
                    },
                );
                field_count += 1;
            }
            types.insert(config.name().to_string(), SchemaType { config, fields });
        }

        let root_name = |root: Option<Reference>| root.map(|r| store.name_of(r));
        let schema = Schema::new(
            types,
            store.reference_names(),
            root_name(self.query),
            root_name(self.mutation),
            root_name(self.subscription),
        );
        info!(
            types = schema.type_count(),
            fields = field_count,
            extensions = store.pipeline().len(),
            "schema built"
        );
        Ok(schema)
    }

    fn install_resolver(&self, field: &OutputFieldConfig) -> BuildResult<ResolveFn> {
        let base = match &field.resolver {
            Some(resolver) => Arc::clone(resolver),
            None if self.options.default_resolver => default_resolver(),
            None => {
                return Err(BuildError::invalid(
                    field.coordinate(),
                    "field has no resolver and default resolvers are disabled",
                ))
            }
        };
        self.store.pipeline().wrap_resolve(base, field, &self.store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::resolve_sync_fn;
    use serde_json::json;

    #[test]
    fn test_builtin_scalars() {
        let builder = SchemaBuilder::new(Vec::new()).unwrap();
        for name in BUILTIN_SCALARS {
            assert_eq!(builder.type_ref(name).unwrap().kind(), RefKind::Scalar);
        }
        assert!(builder.type_ref("Missing").is_err());
    }

    #[test]
    fn test_field_on_union_is_rejected() {
        let builder = SchemaBuilder::new(Vec::new()).unwrap();
        let result = builder.union_ref("SearchResult").unwrap();
        let err = builder
            .field(result, "id", FieldOptions::new(builder.named("ID").unwrap()))
            .unwrap_err();
        assert_eq!(err.name(), "SearchResult.id");
    }

    #[test]
    fn test_missing_resolver_without_default() {
        let mut builder = SchemaBuilder::new(Vec::new())
            .unwrap()
            .options(BuildOptions {
                default_resolver: false,
            });
        let query = builder.object_type("Query", TypeOptions::new()).unwrap();
        builder
            .field(query, "hello", FieldOptions::new(builder.named("String").unwrap()))
            .unwrap();
        builder.query_type(query);

        let err = builder.build().unwrap_err();
        assert_eq!(
            err,
            BuildError::invalid(
                "Query.hello",
                "field has no resolver and default resolvers are disabled"
            )
        );
    }

    #[test]
    fn test_root_must_be_object() {
        let mut builder = SchemaBuilder::new(Vec::new()).unwrap();
        let node = builder.interface_type("Node", TypeOptions::new()).unwrap();
        builder.query_type(node);
        assert!(matches!(builder.build(), Err(BuildError::InvalidConfig { .. })));
    }

    #[test]
    fn test_build_options_from_json() {
        let options: BuildOptions = serde_json::from_value(json!({})).unwrap();
        assert!(options.default_resolver);

        let options: BuildOptions = serde_json::from_value(json!({ "default_resolver": false })).unwrap();
        assert!(!options.default_resolver);
    }

    #[test]
    fn test_arguments_carry_coordinates() {
        let mut builder = SchemaBuilder::new(Vec::new()).unwrap();
        let query = builder.object_type("Query", TypeOptions::new()).unwrap();
        let id = builder.named("ID").unwrap();
        builder
            .field(
                query,
                "user",
                FieldOptions::new(TypeRef::option(builder.named("String").unwrap()))
                    .arg("id", ArgOptions::new(id))
                    .resolver(resolve_sync_fn(|_, _, _, _| Ok(Value::Null))),
            )
            .unwrap();
        builder.query_type(query);

        let schema = builder.build().unwrap();
        let field = schema.output_field("Query", "user").unwrap();
        assert_eq!(field.args["id"].coordinate(), "Query.user(id)");
    }
}
