//! Explicit field layouts for serializable types.
//!
//! A type declares its fields once through a [`TypeDescriptor`]; the registry builds
//! its handler from that table instead of inspecting values at runtime.

use std::{collections::HashSet, hash::Hasher};

use serde::{Deserialize, Serialize};

use crate::{error::SerializationError, value::Value};

#[cfg_attr(feature = "fuzzing", derive(arbitrary::Arbitrary))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeId(pub u64);

impl TypeId {
    pub const LIST: TypeId = TypeId(1);
    pub const MAP: TypeId = TypeId(2);
    /// Marks a chunk whose root is a plain value rather than an object.
    pub const ROOT_VALUE: TypeId = TypeId(3);

    /// Ids below this are reserved for built-in types.
    pub const FIRST_USER: u64 = 1000;

    pub fn is_reserved(&self) -> bool {
        self.0 < Self::FIRST_USER
    }
}

impl std::fmt::Display for TypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    Bool = 0,
    Int = 1,
    Float = 2,
    Text = 3,
    Date = 4,
    Reference = 5,
    /// Any value, written with a leading value tag.
    Any = 6,
}

impl FieldKind {
    /// The value a freshly allocated instance holds for a field of this kind.
    pub fn default_value(&self) -> Value {
        match self {
            FieldKind::Bool => Value::Bool(false),
            FieldKind::Int => Value::Int(0),
            FieldKind::Float => Value::Float(0.0),
            FieldKind::Text | FieldKind::Date | FieldKind::Reference | FieldKind::Any => {
                Value::Null
            }
        }
    }

    /// Whether a value may be stored in a field of this kind.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (FieldKind::Any, _) => true,
            (FieldKind::Bool, Value::Bool(_)) => true,
            (FieldKind::Int, Value::Int(_)) => true,
            (FieldKind::Float, Value::Float(_)) => true,
            (FieldKind::Text, Value::Text(_) | Value::Null) => true,
            (FieldKind::Date, Value::Date(_) | Value::Null) => true,
            (FieldKind::Reference, Value::Ref(_) | Value::Null) => true,
            _ => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    /// Transient fields are skipped by the default field policy.
    pub transient: bool,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            transient: false,
        }
    }

    pub fn transient(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            transient: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    name: String,
    type_id: TypeId,
    fields: Vec<FieldDescriptor>,
}

impl TypeDescriptor {
    pub fn builder(name: impl Into<String>) -> TypeDescriptorBuilder {
        TypeDescriptorBuilder {
            name: name.into(),
            type_id: None,
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }

    pub fn validate(&self) -> Result<(), SerializationError> {
        if self.name.trim().is_empty() {
            return Err(SerializationError::InvalidDescriptor(
                "type name is empty".to_string(),
            ));
        }

        if self.type_id.is_reserved() {
            return Err(SerializationError::InvalidDescriptor(format!(
                "type {} uses reserved id {}",
                self.name, self.type_id
            )));
        }

        let mut names = HashSet::new();
        for field in &self.fields {
            if !names.insert(field.name.as_str()) {
                return Err(SerializationError::InvalidDescriptor(format!(
                    "type {} declares field {} twice",
                    self.name, field.name
                )));
            }
        }

        Ok(())
    }
}

pub struct TypeDescriptorBuilder {
    name: String,
    type_id: Option<TypeId>,
    fields: Vec<FieldDescriptor>,
}

impl TypeDescriptorBuilder {
    /// Pin the type id instead of deriving it from the layout.
    pub fn type_id(mut self, id: u64) -> Self {
        self.type_id = Some(TypeId(id));
        self
    }

    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldDescriptor::new(name, kind));
        self
    }

    pub fn transient_field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldDescriptor::transient(name, kind));
        self
    }

    pub fn build(self) -> TypeDescriptor {
        let type_id = self
            .type_id
            .unwrap_or_else(|| derive_type_id(&self.name, &self.fields));

        TypeDescriptor {
            name: self.name,
            type_id,
            fields: self.fields,
        }
    }
}

/// Hash the name and layout, so two processes describing the same type agree on its id
/// without exchanging anything. The top bit keeps derived ids out of the reserved range.
fn derive_type_id(name: &str, fields: &[FieldDescriptor]) -> TypeId {
    let mut hasher = twox_hash::XxHash64::with_seed(0);
    hasher.write(name.as_bytes());
    hasher.write_u8(0);
    for field in fields {
        hasher.write(field.name.as_bytes());
        hasher.write_u8(0);
        hasher.write_u8(field.kind as u8);
        hasher.write_u8(field.transient as u8);
    }

    TypeId(hasher.finish() | (1 << 63))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> TypeDescriptor {
        TypeDescriptor::builder("Person")
            .field("name", FieldKind::Text)
            .field("date_of_birth", FieldKind::Date)
            .build()
    }

    #[test]
    fn test_derived_id_is_stable() {
        assert_eq!(person().type_id(), person().type_id());
        assert!(!person().type_id().is_reserved());
    }

    #[test]
    fn test_derived_id_depends_on_layout() {
        let other = TypeDescriptor::builder("Person")
            .field("name", FieldKind::Text)
            .field("date_of_birth", FieldKind::Int)
            .build();

        assert_ne!(person().type_id(), other.type_id());
    }

    #[test]
    fn test_validate() {
        assert!(person().validate().is_ok());

        let reserved = TypeDescriptor::builder("Reserved").type_id(7).build();
        assert!(matches!(
            reserved.validate(),
            Err(SerializationError::InvalidDescriptor(_))
        ));

        let duplicate = TypeDescriptor::builder("Dup")
            .field("a", FieldKind::Int)
            .field("a", FieldKind::Text)
            .build();
        assert!(duplicate.validate().is_err());
    }

    #[test]
    fn test_kind_accepts() {
        assert!(FieldKind::Text.accepts(&Value::Null));
        assert!(FieldKind::Text.accepts(&Value::Text("x".to_string())));
        assert!(!FieldKind::Int.accepts(&Value::Null));
        assert!(!FieldKind::Bool.accepts(&Value::Int(1)));
        assert!(FieldKind::Any.accepts(&Value::Float(1.5)));
    }
}
