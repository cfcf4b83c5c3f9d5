use std::sync::Arc;

use crate::{
    descriptor::{TypeDescriptor, TypeId},
    error::SerializationError,
    payload::{PayloadReader, PayloadWriter},
    policy::FieldPolicy,
    value::{Instance, Object, ObjectRef, Value},
};

/// Encode/decode strategy for one type.
pub trait TypeHandler: Send + Sync {
    fn type_id(&self) -> TypeId;

    fn type_name(&self) -> &str;

    /// Declared layout. Built-in collection handlers have none.
    fn descriptor(&self) -> Option<&Arc<TypeDescriptor>>;

    /// Objects referenced from the encoded part of `object`, in payload order.
    fn references(&self, object: &Object) -> Vec<ObjectRef>;

    fn encode(&self, object: &Object, writer: &mut PayloadWriter<'_>)
        -> Result<(), SerializationError>;

    /// An empty skeleton, allocated before any payload is read so references to it can
    /// resolve.
    fn allocate(&self) -> Object;

    fn populate(
        &self,
        object: &mut Object,
        reader: &mut PayloadReader<'_>,
    ) -> Result<(), SerializationError>;
}

fn wrong_shape(handler: &dyn TypeHandler, object: &Object) -> SerializationError {
    SerializationError::TypeConflict(format!(
        "handler for {} was given a {}",
        handler.type_name(),
        object.type_name()
    ))
}

fn collect_refs<'a>(values: impl Iterator<Item = &'a Value>) -> Vec<ObjectRef> {
    values.filter_map(Value::as_object).cloned().collect()
}

/// Handler for instances of a described type. Only fields the policy selected are
/// written; the rest keep their defaults when decoded.
pub struct InstanceHandler {
    descriptor: Arc<TypeDescriptor>,
    selected: Vec<usize>,
}

impl InstanceHandler {
    pub fn new(descriptor: Arc<TypeDescriptor>, policy: &dyn FieldPolicy) -> Self {
        let selected = descriptor
            .fields()
            .iter()
            .enumerate()
            .filter(|(_, field)| policy.is_selected(field))
            .map(|(index, _)| index)
            .collect();

        Self {
            descriptor,
            selected,
        }
    }

    fn instance<'a>(&self, object: &'a Object) -> Result<&'a Instance, SerializationError> {
        object
            .as_instance()
            .filter(|instance| instance.type_name() == self.descriptor.name())
            .ok_or_else(|| wrong_shape(self, object))
    }
}

impl TypeHandler for InstanceHandler {
    fn type_id(&self) -> TypeId {
        self.descriptor.type_id()
    }

    fn type_name(&self) -> &str {
        self.descriptor.name()
    }

    fn descriptor(&self) -> Option<&Arc<TypeDescriptor>> {
        Some(&self.descriptor)
    }

    fn references(&self, object: &Object) -> Vec<ObjectRef> {
        let Some(instance) = object.as_instance() else {
            return Vec::new();
        };

        collect_refs(self.selected.iter().map(|index| &instance.fields()[*index]))
    }

    fn encode(
        &self,
        object: &Object,
        writer: &mut PayloadWriter<'_>,
    ) -> Result<(), SerializationError> {
        let instance = self.instance(object)?;

        for index in &self.selected {
            let field = &self.descriptor.fields()[*index];
            let value = &instance.fields()[*index];

            if !field.kind.accepts(value) {
                return Err(SerializationError::FieldKindMismatch {
                    type_name: self.descriptor.name().to_string(),
                    field: field.name.clone(),
                    expected: field.kind,
                });
            }

            writer.write_field(field.kind, value)?;
        }

        Ok(())
    }

    fn allocate(&self) -> Object {
        Object::Instance(Instance::empty(self.descriptor.clone()))
    }

    fn populate(
        &self,
        object: &mut Object,
        reader: &mut PayloadReader<'_>,
    ) -> Result<(), SerializationError> {
        let instance = match object {
            Object::Instance(instance) => instance,
            other => return Err(wrong_shape(self, other)),
        };

        for index in &self.selected {
            let kind = self.descriptor.fields()[*index].kind;
            let value = reader.read_field(kind)?;
            instance.set_index(*index, value)?;
        }

        Ok(())
    }
}

/// Built-in handler for [`Object::List`]: a count, then each element as an `Any` value.
pub struct ListHandler;

impl TypeHandler for ListHandler {
    fn type_id(&self) -> TypeId {
        TypeId::LIST
    }

    fn type_name(&self) -> &str {
        "List"
    }

    fn descriptor(&self) -> Option<&Arc<TypeDescriptor>> {
        None
    }

    fn references(&self, object: &Object) -> Vec<ObjectRef> {
        object
            .as_list()
            .map(|values| collect_refs(values.iter()))
            .unwrap_or_default()
    }

    fn encode(
        &self,
        object: &Object,
        writer: &mut PayloadWriter<'_>,
    ) -> Result<(), SerializationError> {
        let values = object.as_list().ok_or_else(|| wrong_shape(self, object))?;

        writer.write_count(values.len())?;
        for value in values {
            writer.write_any(value)?;
        }

        Ok(())
    }

    fn allocate(&self) -> Object {
        Object::List(Vec::new())
    }

    fn populate(
        &self,
        object: &mut Object,
        reader: &mut PayloadReader<'_>,
    ) -> Result<(), SerializationError> {
        let count = reader.read_count()?;
        let values = object
            .as_list_mut()
            .ok_or_else(|| SerializationError::malformed("list skeleton expected"))?;

        values.reserve(count);
        for _ in 0..count {
            values.push(reader.read_any()?);
        }

        Ok(())
    }
}

/// Built-in handler for [`Object::Map`]: a count, then key and value pairs in order.
pub struct MapHandler;

impl TypeHandler for MapHandler {
    fn type_id(&self) -> TypeId {
        TypeId::MAP
    }

    fn type_name(&self) -> &str {
        "Map"
    }

    fn descriptor(&self) -> Option<&Arc<TypeDescriptor>> {
        None
    }

    fn references(&self, object: &Object) -> Vec<ObjectRef> {
        object
            .as_map()
            .map(|entries| {
                collect_refs(entries.iter().flat_map(|(key, value)| [key, value]))
            })
            .unwrap_or_default()
    }

    fn encode(
        &self,
        object: &Object,
        writer: &mut PayloadWriter<'_>,
    ) -> Result<(), SerializationError> {
        let entries = object.as_map().ok_or_else(|| wrong_shape(self, object))?;

        writer.write_count(entries.len())?;
        for (key, value) in entries {
            writer.write_any(key)?;
            writer.write_any(value)?;
        }

        Ok(())
    }

    fn allocate(&self) -> Object {
        Object::Map(Vec::new())
    }

    fn populate(
        &self,
        object: &mut Object,
        reader: &mut PayloadReader<'_>,
    ) -> Result<(), SerializationError> {
        let count = reader.read_count()?;
        let entries = object
            .as_map_mut()
            .ok_or_else(|| SerializationError::malformed("map skeleton expected"))?;

        entries.reserve(count);
        for _ in 0..count {
            let key = reader.read_any()?;
            let value = reader.read_any()?;
            entries.push((key, value));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        descriptor::FieldKind, identity::ObjectIdentityRegistry, policy::PersistentFields,
    };

    fn session_descriptor() -> Arc<TypeDescriptor> {
        Arc::new(
            TypeDescriptor::builder("Session")
                .field("user", FieldKind::Text)
                .transient_field("cache", FieldKind::Reference)
                .field("hits", FieldKind::Int)
                .build(),
        )
    }

    #[test]
    fn test_transient_fields_are_skipped() {
        let descriptor = session_descriptor();
        let handler = InstanceHandler::new(descriptor.clone(), &PersistentFields);

        let cache = ObjectRef::new(Object::List(vec![]));
        let instance = Instance::new(
            descriptor,
            vec!["ann".into(), cache.clone().into(), Value::Int(3)],
        )
        .unwrap();
        let object = Object::Instance(instance);

        assert!(handler.references(&object).is_empty());

        // The cache object never gets an id; encoding must not touch it
        let ids = ObjectIdentityRegistry::new();
        let mut writer = PayloadWriter::new(&ids);
        handler.encode(&object, &mut writer).unwrap();
        let bytes = writer.into_bytes();
        assert_eq!(bytes.len(), 4 + 3 + 8);

        let mut skeleton = handler.allocate();
        let mut reader = PayloadReader::new(&bytes, &ids);
        handler.populate(&mut skeleton, &mut reader).unwrap();
        reader.finish().unwrap();

        let instance = skeleton.as_instance().unwrap();
        assert_eq!(instance.get_text("user").unwrap(), Some("ann"));
        assert_eq!(instance.get_int("hits").unwrap(), 3);
        assert!(instance.get("cache").unwrap().is_null());
    }

    #[test]
    fn test_map_references_cover_keys_and_values() {
        let key = ObjectRef::new(Object::List(vec![]));
        let value = ObjectRef::new(Object::List(vec![]));
        let map = Object::Map(vec![
            (key.clone().into(), Value::Int(1)),
            ("k".into(), value.clone().into()),
        ]);

        let refs = MapHandler.references(&map);
        assert_eq!(refs.len(), 2);
        assert!(refs[0].ptr_eq(&key));
        assert!(refs[1].ptr_eq(&value));
    }

    #[test]
    fn test_handler_rejects_other_shapes() {
        let ids = ObjectIdentityRegistry::new();
        let mut writer = PayloadWriter::new(&ids);
        assert!(matches!(
            ListHandler.encode(&Object::Map(vec![]), &mut writer),
            Err(SerializationError::TypeConflict(_))
        ));
    }
}
