//! Resolved configuration records.
//!
//! A thunk produces one [`Config`] per reference. After the extension hooks
//! have run, the store keeps it behind an `Arc` and never changes it again.

use crate::resolver::ResolveFn;
use indexmap::IndexMap;
use serde_json::Value;
use std::fmt;
use trellis_core::{Options, RefKind, Reference, TypeRef};

/// Configuration of a named type.
#[derive(Debug, Clone)]
pub struct TypeConfig {
    /// Type name.
    pub name: String,
    /// Kind of type.
    pub kind: RefKind,
    /// Description.
    pub description: Option<String>,
    /// Implemented interfaces, in declaration order.
    pub interfaces: Vec<Reference>,
    /// Union members.
    pub members: Vec<Reference>,
    /// Enum values.
    pub values: Vec<String>,
    /// Extension metadata.
    pub options: Options,
}

impl TypeConfig {
    /// Creates an empty configuration.
    pub fn new(name: impl Into<String>, kind: RefKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: None,
            interfaces: Vec::new(),
            members: Vec::new(),
            values: Vec::new(),
            options: Options::new(),
        }
    }
}

/// Where an input field lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFieldKind {
    /// Argument of an output field.
    Arg,
    /// Field of an input object.
    InputObject,
}

/// Configuration of an argument or an input-object field.
#[derive(Debug, Clone)]
pub struct InputFieldConfig {
    /// Field or argument name.
    pub name: String,
    /// Argument or input-object field.
    pub kind: InputFieldKind,
    /// Owning type.
    pub parent: Reference,
    /// Owning type name.
    pub parent_type: String,
    /// Owning output field, for arguments.
    pub parent_field: Option<String>,
    /// Input type.
    pub ty: TypeRef,
    /// Default value.
    pub default_value: Option<Value>,
    /// Description.
    pub description: Option<String>,
    /// Extension metadata.
    pub options: Options,
}

impl InputFieldConfig {
    /// Returns `Type.field(arg)` for arguments and `Type.field` for
    /// input-object fields.
    pub fn coordinate(&self) -> String {
        match &self.parent_field {
            Some(field) => format!("{}.{}({})", self.parent_type, field, self.name),
            None => format!("{}.{}", self.parent_type, self.name),
        }
    }
}

/// Configuration of a field on an object or interface.
#[derive(Clone)]
pub struct OutputFieldConfig {
    /// Field name.
    pub name: String,
    /// Owning type.
    pub parent: Reference,
    /// Owning type name.
    pub parent_type: String,
    /// Return type.
    pub ty: TypeRef,
    /// Arguments, in declaration order.
    pub args: IndexMap<String, InputFieldConfig>,
    /// Description.
    pub description: Option<String>,
    /// User resolver.
    pub resolver: Option<ResolveFn>,
    /// Extension metadata.
    pub options: Options,
}

impl OutputFieldConfig {
    /// Returns `Type.field`.
    pub fn coordinate(&self) -> String {
        format!("{}.{}", self.parent_type, self.name)
    }
}

impl fmt::Debug for OutputFieldConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputFieldConfig")
            .field("name", &self.name)
            .field("parent_type", &self.parent_type)
            .field("ty", &self.ty)
            .field("args", &self.args.keys().collect::<Vec<_>>())
            .field("has_resolver", &self.resolver.is_some())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// A field configuration.
#[derive(Debug, Clone)]
pub enum FieldConfig {
    Output(OutputFieldConfig),
    Input(InputFieldConfig),
}

impl FieldConfig {
    pub fn name(&self) -> &str {
        match self {
            Self::Output(field) => &field.name,
            Self::Input(field) => &field.name,
        }
    }

    pub fn parent(&self) -> Reference {
        match self {
            Self::Output(field) => field.parent,
            Self::Input(field) => field.parent,
        }
    }
}

/// Any resolved configuration.
#[derive(Debug, Clone)]
pub enum Config {
    Type(TypeConfig),
    Field(FieldConfig),
}

impl Config {
    /// Returns the configuration's own name.
    pub fn name(&self) -> &str {
        match self {
            Self::Type(ty) => &ty.name,
            Self::Field(field) => field.name(),
        }
    }

    /// Returns the reference kind this configuration satisfies.
    pub fn kind(&self) -> RefKind {
        match self {
            Self::Type(ty) => ty.kind,
            Self::Field(_) => RefKind::Field,
        }
    }

    pub fn as_type(&self) -> Option<&TypeConfig> {
        match self {
            Self::Type(ty) => Some(ty),
            Self::Field(_) => None,
        }
    }

    pub fn as_output_field(&self) -> Option<&OutputFieldConfig> {
        match self {
            Self::Field(FieldConfig::Output(field)) => Some(field),
            _ => None,
        }
    }

    pub fn as_input_field(&self) -> Option<&InputFieldConfig> {
        match self {
            Self::Field(FieldConfig::Input(field)) => Some(field),
            _ => None,
        }
    }

    /// Collects every reference this configuration points at.
    pub fn references(&self) -> Vec<Reference> {
        match self {
            Self::Type(ty) => ty.interfaces.iter().chain(&ty.members).copied().collect(),
            Self::Field(FieldConfig::Output(field)) => {
                let mut refs = vec![field.parent, field.ty.named_ref()];
                refs.extend(field.args.values().map(|arg| arg.ty.named_ref()));
                refs
            }
            Self::Field(FieldConfig::Input(field)) => vec![field.parent, field.ty.named_ref()],
        }
    }
}
