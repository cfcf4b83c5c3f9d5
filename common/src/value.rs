//! The in-memory object model the engine serializes.
//!
//! Plain values live inline in [`Value`]. Anything with identity (instances of described
//! types, lists and maps) lives behind an [`ObjectRef`], so two fields can share one object
//! and graphs can be cyclic.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chrono::NaiveDate;

use crate::{
    descriptor::{FieldKind, TypeDescriptor},
    error::SerializationError,
};

#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Ref(ObjectRef),
}

impl Value {
    pub fn object(object: Object) -> Self {
        Value::Ref(ObjectRef::new(object))
    }

    pub fn list(values: Vec<Value>) -> Self {
        Value::object(Object::List(values))
    }

    pub fn map(entries: Vec<(Value, Value)>) -> Self {
        Value::object(Object::Map(entries))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Ref(object) => Some(object),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

impl From<ObjectRef> for Value {
    fn from(value: ObjectRef) -> Self {
        Value::Ref(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// A shared handle to an object. Clones point at the same object; identity is the
/// allocation, not the contents.
#[derive(Clone)]
pub struct ObjectRef(Arc<Mutex<Object>>);

impl ObjectRef {
    pub fn new(object: Object) -> Self {
        Self(Arc::new(Mutex::new(object)))
    }

    /// Lock the object. A panic in another holder doesn't invalidate plain data, so
    /// poisoning is ignored.
    pub fn lock(&self) -> MutexGuard<'_, Object> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Address of the shared allocation. Only meaningful while a handle is held.
    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

/// Releasing the last handle tears the graph down with a worklist, so dropping a long
/// chain can't overflow the stack.
impl Drop for ObjectRef {
    fn drop(&mut self) {
        let Some(mutex) = Arc::get_mut(&mut self.0) else {
            return;
        };

        let mut pending = take_children(mutex.get_mut().unwrap_or_else(PoisonError::into_inner));
        while let Some(mut child) = pending.pop() {
            if let Some(mutex) = Arc::get_mut(&mut child.0) {
                pending.extend(take_children(
                    mutex.get_mut().unwrap_or_else(PoisonError::into_inner),
                ));
            }
            // `child` now holds no references, its own drop stops here
        }
    }
}

/// Move every directly referenced object out of `object`.
fn take_children(object: &mut Object) -> Vec<ObjectRef> {
    let values = match object {
        Object::Instance(instance) => std::mem::take(&mut instance.fields),
        Object::List(values) => std::mem::take(values),
        Object::Map(entries) => std::mem::take(entries)
            .into_iter()
            .flat_map(|(key, value)| [key, value])
            .collect(),
    };

    values
        .into_iter()
        .filter_map(|value| match value {
            Value::Ref(object) => Some(object),
            _ => None,
        })
        .collect()
}

impl std::fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the contents, the graph may be cyclic
        write!(f, "ObjectRef({:#x})", self.identity())
    }
}

#[derive(Clone, Debug)]
pub enum Object {
    Instance(Instance),
    List(Vec<Value>),
    /// Ordered key-value mapping. Insertion order is preserved through serialization.
    Map(Vec<(Value, Value)>),
}

impl Object {
    pub fn type_name(&self) -> &str {
        match self {
            Object::Instance(instance) => instance.type_name(),
            Object::List(_) => "List",
            Object::Map(_) => "Map",
        }
    }

    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            Object::Instance(instance) => Some(instance),
            _ => None,
        }
    }

    pub fn as_instance_mut(&mut self) -> Option<&mut Instance> {
        match self {
            Object::Instance(instance) => Some(instance),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Object::List(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Object::List(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Object::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut Vec<(Value, Value)>> {
        match self {
            Object::Map(entries) => Some(entries),
            _ => None,
        }
    }
}

/// A value of a described type. Holds exactly one value per declared field, in
/// declaration order.
#[derive(Clone, Debug)]
pub struct Instance {
    descriptor: Arc<TypeDescriptor>,
    fields: Vec<Value>,
}

impl Instance {
    pub fn new(
        descriptor: Arc<TypeDescriptor>,
        fields: Vec<Value>,
    ) -> Result<Self, SerializationError> {
        if fields.len() != descriptor.fields().len() {
            return Err(SerializationError::InvalidDescriptor(format!(
                "type {} has {} fields, got {} values",
                descriptor.name(),
                descriptor.fields().len(),
                fields.len()
            )));
        }

        for (field, value) in descriptor.fields().iter().zip(&fields) {
            if !field.kind.accepts(value) {
                return Err(SerializationError::FieldKindMismatch {
                    type_name: descriptor.name().to_string(),
                    field: field.name.clone(),
                    expected: field.kind,
                });
            }
        }

        Ok(Self { descriptor, fields })
    }

    /// An instance with every field at its kind's default.
    pub fn empty(descriptor: Arc<TypeDescriptor>) -> Self {
        let fields = descriptor
            .fields()
            .iter()
            .map(|field| field.kind.default_value())
            .collect();

        Self { descriptor, fields }
    }

    pub fn descriptor(&self) -> &Arc<TypeDescriptor> {
        &self.descriptor
    }

    pub fn type_name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn fields(&self) -> &[Value] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Result<&Value, SerializationError> {
        let index = self.index_of(name)?;
        Ok(&self.fields[index])
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), SerializationError> {
        let index = self.index_of(name)?;
        self.set_index(index, value.into())
    }

    pub(crate) fn set_index(&mut self, index: usize, value: Value) -> Result<(), SerializationError> {
        let field = &self.descriptor.fields()[index];
        if !field.kind.accepts(&value) {
            return Err(self.mismatch(&field.name, field.kind));
        }

        self.fields[index] = value;
        Ok(())
    }

    pub fn get_bool(&self, name: &str) -> Result<bool, SerializationError> {
        self.get(name)?
            .as_bool()
            .ok_or_else(|| self.mismatch(name, FieldKind::Bool))
    }

    pub fn get_int(&self, name: &str) -> Result<i64, SerializationError> {
        self.get(name)?
            .as_int()
            .ok_or_else(|| self.mismatch(name, FieldKind::Int))
    }

    pub fn get_float(&self, name: &str) -> Result<f64, SerializationError> {
        self.get(name)?
            .as_float()
            .ok_or_else(|| self.mismatch(name, FieldKind::Float))
    }

    pub fn get_text(&self, name: &str) -> Result<Option<&str>, SerializationError> {
        match self.get(name)? {
            Value::Null => Ok(None),
            Value::Text(text) => Ok(Some(text)),
            _ => Err(self.mismatch(name, FieldKind::Text)),
        }
    }

    pub fn get_date(&self, name: &str) -> Result<Option<NaiveDate>, SerializationError> {
        match self.get(name)? {
            Value::Null => Ok(None),
            Value::Date(date) => Ok(Some(*date)),
            _ => Err(self.mismatch(name, FieldKind::Date)),
        }
    }

    pub fn get_ref(&self, name: &str) -> Result<Option<ObjectRef>, SerializationError> {
        match self.get(name)? {
            Value::Null => Ok(None),
            Value::Ref(object) => Ok(Some(object.clone())),
            _ => Err(self.mismatch(name, FieldKind::Reference)),
        }
    }

    fn index_of(&self, name: &str) -> Result<usize, SerializationError> {
        self.descriptor
            .field_index(name)
            .ok_or_else(|| SerializationError::UnknownField {
                type_name: self.type_name().to_string(),
                field: name.to_string(),
            })
    }

    fn mismatch(&self, field: &str, expected: FieldKind) -> SerializationError {
        SerializationError::FieldKindMismatch {
            type_name: self.type_name().to_string(),
            field: field.to_string(),
            expected,
        }
    }
}

/// Structural equality of two graphs. Primitive values must be equal, and the sharing
/// structure must match: two references to one object on the left must be two references
/// to one object on the right. Cycles are handled.
pub fn graph_eq(left: &Value, right: &Value) -> bool {
    let mut left_to_right = HashMap::<usize, usize>::new();
    let mut right_to_left = HashMap::<usize, usize>::new();
    let mut pending = vec![(left.clone(), right.clone())];

    while let Some((left, right)) = pending.pop() {
        match (&left, &right) {
            (Value::Null, Value::Null) => {}
            (Value::Bool(a), Value::Bool(b)) if a == b => {}
            (Value::Int(a), Value::Int(b)) if a == b => {}
            (Value::Float(a), Value::Float(b)) if a == b || a.to_bits() == b.to_bits() => {}
            (Value::Text(a), Value::Text(b)) if a == b => {}
            (Value::Date(a), Value::Date(b)) if a == b => {}
            (Value::Ref(a), Value::Ref(b)) => {
                let (a_id, b_id) = (a.identity(), b.identity());
                match (left_to_right.get(&a_id), right_to_left.get(&b_id)) {
                    (Some(mapped_b), Some(mapped_a)) => {
                        if *mapped_b != b_id || *mapped_a != a_id {
                            return false;
                        }
                        continue;
                    }
                    (None, None) => {
                        left_to_right.insert(a_id, b_id);
                        right_to_left.insert(b_id, a_id);
                    }
                    _ => return false,
                }

                if a.ptr_eq(b) {
                    continue;
                }

                // Snapshot each side separately, so two locks are never held at once
                let a_object = a.lock().clone();
                let b_object = b.lock().clone();

                match (a_object, b_object) {
                    (Object::Instance(a), Object::Instance(b)) => {
                        if a.descriptor() != b.descriptor() {
                            return false;
                        }
                        pending.extend(a.fields.into_iter().zip(b.fields));
                    }
                    (Object::List(a), Object::List(b)) => {
                        if a.len() != b.len() {
                            return false;
                        }
                        pending.extend(a.into_iter().zip(b));
                    }
                    (Object::Map(a), Object::Map(b)) => {
                        if a.len() != b.len() {
                            return false;
                        }
                        for ((a_key, a_value), (b_key, b_value)) in a.into_iter().zip(b) {
                            pending.push((a_key, b_key));
                            pending.push((a_value, b_value));
                        }
                    }
                    _ => return false,
                }
            }
            _ => return false,
        }
    }

    true
}
