//! Stable identities for types and fields.
//!
//! A [`Reference`] can be handed out, copied and embedded in other
//! configurations long before the thing it names has been declared. It is
//! only an index into the declaration graph; the name and the resolved
//! configuration live in the graph itself.

use std::fmt;

/// What a reference stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    Object,
    Interface,
    InputObject,
    Scalar,
    Enum,
    Union,
    Field,
}

impl RefKind {
    /// Returns the display name of the kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Object => "Object",
            Self::Interface => "Interface",
            Self::InputObject => "InputObject",
            Self::Scalar => "Scalar",
            Self::Enum => "Enum",
            Self::Union => "Union",
            Self::Field => "Field",
        }
    }

    /// Returns true for every kind except `Field`.
    pub const fn is_type(self) -> bool {
        !matches!(self, Self::Field)
    }

    /// Returns true if types of this kind declare output fields.
    pub const fn has_fields(self) -> bool {
        matches!(self, Self::Object | Self::Interface)
    }

    /// Returns true if this kind may appear in argument position.
    pub const fn is_input(self) -> bool {
        matches!(self, Self::InputObject | Self::Scalar | Self::Enum)
    }

    /// Returns true if this kind may be returned from a field.
    pub const fn is_output(self) -> bool {
        matches!(
            self,
            Self::Object | Self::Interface | Self::Union | Self::Scalar | Self::Enum
        )
    }
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An opaque handle for a type or field.
///
/// Two references are equal only if they were produced by the same
/// `create_ref` call. Names are never compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reference {
    index: u32,
    kind: RefKind,
}

impl Reference {
    /// Creates a reference from a raw arena index.
    #[must_use]
    pub const fn from_raw(index: u32, kind: RefKind) -> Self {
        Self { index, kind }
    }

    /// Returns the raw arena index.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Returns the kind this reference was created with.
    #[must_use]
    pub const fn kind(self) -> RefKind {
        self.kind
    }
}

/// A possibly wrapped reference to a named type.
///
/// Types are non-null unless wrapped in `Option`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Named(Reference),
    Option(Box<TypeRef>),
    List(Box<TypeRef>),
}

impl TypeRef {
    pub fn named(reference: Reference) -> Self {
        Self::Named(reference)
    }

    pub fn option(inner: TypeRef) -> Self {
        Self::Option(Box::new(inner))
    }

    pub fn list(inner: TypeRef) -> Self {
        Self::List(Box::new(inner))
    }

    /// Returns the innermost named reference.
    pub fn named_ref(&self) -> Reference {
        match self {
            Self::Named(reference) => *reference,
            Self::Option(inner) | Self::List(inner) => inner.named_ref(),
        }
    }

    /// Returns true if the outermost layer accepts null.
    pub fn is_nullable(&self) -> bool {
        matches!(self, Self::Option(_))
    }

    /// Returns the list wrapper's item type, looking through nullability.
    pub fn list_item(&self) -> Option<&TypeRef> {
        match self {
            Self::List(inner) => Some(inner),
            Self::Option(inner) => inner.list_item(),
            Self::Named(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_identity_ignores_names() {
        let a = Reference::from_raw(0, RefKind::Object);
        let b = Reference::from_raw(1, RefKind::Object);
        assert_ne!(a, b);
        assert_eq!(a, Reference::from_raw(0, RefKind::Object));
    }

    #[test]
    fn test_type_ref_unwrapping() {
        let user = Reference::from_raw(3, RefKind::Object);
        let ty = TypeRef::option(TypeRef::list(TypeRef::named(user)));

        assert!(ty.is_nullable());
        assert_eq!(ty.named_ref(), user);
        assert_eq!(ty.list_item(), Some(&TypeRef::named(user)));
        assert_eq!(TypeRef::named(user).list_item(), None);
    }

    #[test]
    fn test_kind_classification() {
        assert!(RefKind::Object.has_fields());
        assert!(!RefKind::Union.has_fields());
        assert!(RefKind::InputObject.is_input());
        assert!(!RefKind::Object.is_input());
        assert!(!RefKind::Field.is_type());
        assert_eq!(RefKind::InputObject.to_string(), "InputObject");
    }
}
