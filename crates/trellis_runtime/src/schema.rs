//! The built schema.
//!
//! Immutable after [`SchemaBuilder::build`](crate::SchemaBuilder::build),
//! cheap to share between request handlers.

use crate::config::{Config, FieldConfig, OutputFieldConfig, TypeConfig};
use crate::context::RequestContext;
use crate::error::{FieldError, FieldResult};
use crate::resolver::{ResolveFn, ResolveFuture, ResolverArgs, ResolverInfo};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use trellis_core::{RefKind, Reference, TypeRef};

/// A field of a built type.
#[derive(Clone)]
pub struct SchemaField {
    pub(crate) config: Arc<Config>,
    pub(crate) resolver: Option<ResolveFn>,
}

impl SchemaField {
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the installed execution function of an output field.
    pub fn resolver(&self) -> Option<&ResolveFn> {
        self.resolver.as_ref()
    }
}

impl fmt::Debug for SchemaField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaField")
            .field("config", &self.config)
            .field("has_resolver", &self.resolver.is_some())
            .finish()
    }
}

/// A built type and its fields.
#[derive(Debug, Clone)]
pub struct SchemaType {
    pub(crate) config: Arc<Config>,
    pub(crate) fields: IndexMap<String, SchemaField>,
}

impl SchemaType {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &SchemaField)> {
        self.fields.iter()
    }
}

/// A built schema.
#[derive(Debug, Clone)]
pub struct Schema {
    types: IndexMap<String, SchemaType>,
    names: Vec<String>,
    query: Option<String>,
    mutation: Option<String>,
    subscription: Option<String>,
}

impl Schema {
    pub(crate) fn new(
        types: IndexMap<String, SchemaType>,
        names: Vec<String>,
        query: Option<String>,
        mutation: Option<String>,
        subscription: Option<String>,
    ) -> Self {
        Self {
            types,
            names,
            query,
            mutation,
            subscription,
        }
    }

    pub fn query_type(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn mutation_type(&self) -> Option<&str> {
        self.mutation.as_deref()
    }

    pub fn subscription_type(&self) -> Option<&str> {
        self.subscription.as_deref()
    }

    /// Returns the number of types, built-in scalars included.
    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// Iterates over types in declaration order.
    pub fn types(&self) -> impl Iterator<Item = (&String, &SchemaType)> {
        self.types.iter()
    }

    pub fn get_type(&self, name: &str) -> Option<&SchemaType> {
        self.types.get(name)
    }

    pub fn type_config(&self, name: &str) -> Option<&TypeConfig> {
        self.types.get(name).and_then(|ty| ty.config.as_type())
    }

    pub fn field_config(&self, type_name: &str, field_name: &str) -> Option<&Config> {
        self.types
            .get(type_name)
            .and_then(|ty| ty.fields.get(field_name))
            .map(|field| field.config.as_ref())
    }

    pub fn output_field(&self, type_name: &str, field_name: &str) -> Option<&OutputFieldConfig> {
        self.field_config(type_name, field_name)
            .and_then(Config::as_output_field)
    }

    /// Returns the final execution function of a field.
    pub fn resolver(&self, type_name: &str, field_name: &str) -> Option<&ResolveFn> {
        self.types
            .get(type_name)
            .and_then(|ty| ty.fields.get(field_name))
            .and_then(SchemaField::resolver)
    }

    /// Returns the name a reference was created with.
    pub fn name_of(&self, reference: Reference) -> Option<&str> {
        self.names.get(reference.index() as usize).map(String::as_str)
    }

    /// Returns the object types implementing `interface`.
    pub fn implementations(&self, interface: &str) -> Vec<&str> {
        self.types
            .values()
            .filter_map(|ty| ty.config.as_type())
            .filter(|config| {
                config
                    .interfaces
                    .iter()
                    .any(|r| self.name_of(*r) == Some(interface))
            })
            .map(|config| config.name.as_str())
            .collect()
    }

    /// Renders a type reference, e.g. `[User!]`.
    pub fn render_type(&self, ty: &TypeRef) -> String {
        self.render(ty, false)
    }

    fn render(&self, ty: &TypeRef, nullable: bool) -> String {
        let rendered = match ty {
            TypeRef::Option(inner) => return self.render(inner, true),
            TypeRef::Named(reference) => self.name_of(*reference).unwrap_or("?").to_string(),
            TypeRef::List(inner) => format!("[{}]", self.render(inner, false)),
        };
        if nullable {
            rendered
        } else {
            format!("{rendered}!")
        }
    }

    /// Runs a field's execution function with explicit info.
    pub fn execute_field(
        &self,
        type_name: &str,
        field_name: &str,
        parent: Value,
        args: ResolverArgs,
        ctx: RequestContext,
        info: ResolverInfo,
    ) -> ResolveFuture {
        match self.resolver(type_name, field_name) {
            Some(resolver) => resolver(parent, args, ctx, info),
            None => {
                let error = FieldError::FieldNotFound(format!("{type_name}.{field_name}"));
                Box::pin(futures::future::ready(Err(error)))
            }
        }
    }

    /// Runs a field's execution function at the top of the response.
    pub async fn resolve_field(
        &self,
        type_name: &str,
        field_name: &str,
        parent: Value,
        args: ResolverArgs,
        ctx: &RequestContext,
    ) -> FieldResult {
        let mut info = ResolverInfo::new(field_name, type_name);
        if let Some(field) = self.output_field(type_name, field_name) {
            info = info.with_return_type(self.render_type(&field.ty));
        }
        self.execute_field(type_name, field_name, parent, args, ctx.clone(), info)
            .await
    }

    /// Returns a serializable overview of the schema.
    pub fn summary(&self) -> SchemaSummary {
        let types = self
            .types
            .values()
            .filter_map(|ty| {
                let config = ty.config.as_type()?;
                Some(TypeSummary {
                    name: config.name.clone(),
                    kind: config.kind,
                    interfaces: config
                        .interfaces
                        .iter()
                        .filter_map(|r| self.name_of(*r).map(str::to_string))
                        .collect(),
                    fields: ty
                        .fields
                        .values()
                        .map(|field| self.field_summary(&field.config))
                        .collect(),
                })
            })
            .collect();

        SchemaSummary {
            query: self.query.clone(),
            mutation: self.mutation.clone(),
            subscription: self.subscription.clone(),
            types,
        }
    }

    fn field_summary(&self, config: &Config) -> FieldSummary {
        match config {
            Config::Field(FieldConfig::Output(field)) => FieldSummary {
                name: field.name.clone(),
                ty: self.render_type(&field.ty),
                args: field
                    .args
                    .values()
                    .map(|arg| format!("{}: {}", arg.name, self.render_type(&arg.ty)))
                    .collect(),
            },
            Config::Field(FieldConfig::Input(field)) => FieldSummary {
                name: field.name.clone(),
                ty: self.render_type(&field.ty),
                args: Vec::new(),
            },
            Config::Type(ty) => FieldSummary {
                name: ty.name.clone(),
                ty: String::new(),
                args: Vec::new(),
            },
        }
    }
}

/// Serializable overview of a schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaSummary {
    pub query: Option<String>,
    pub mutation: Option<String>,
    pub subscription: Option<String>,
    pub types: Vec<TypeSummary>,
}

/// Serializable overview of a type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeSummary {
    pub name: String,
    #[serde(serialize_with = "serialize_kind")]
    pub kind: RefKind,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldSummary>,
}

/// Serializable overview of a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn serialize_kind<S: serde::Serializer>(kind: &RefKind, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(kind.as_str())
}
