//! The serialize/deserialize entry point.

use std::sync::{Arc, Mutex, PoisonError};

use crate::{
    chunks::{assemble, split},
    codec,
    config::SerializerConfig,
    entity::Entity,
    error::SerializationError,
    identity::ObjectIdentityRegistry,
    traverser::GraphTraverser,
    type_registry::TypeRegistry,
    value::{Object, Value},
};

/// Turns object graphs into chunks and back.
///
/// One call runs at a time per instance; concurrent callers wait. Use one serializer per
/// thread (sharing a [`TypeRegistry`]) for parallelism.
pub struct Serializer {
    config: SerializerConfig,
    types: Arc<TypeRegistry>,
    /// None once closed
    ids: Mutex<Option<ObjectIdentityRegistry>>,
}

impl Serializer {
    pub fn new(config: SerializerConfig) -> Self {
        Self::with_registry(config, Arc::new(TypeRegistry::new()))
    }

    pub fn with_registry(config: SerializerConfig, types: Arc<TypeRegistry>) -> Self {
        Self {
            config,
            types,
            ids: Mutex::new(Some(ObjectIdentityRegistry::new())),
        }
    }

    pub fn types(&self) -> &Arc<TypeRegistry> {
        &self.types
    }

    pub fn config(&self) -> &SerializerConfig {
        &self.config
    }

    pub fn serialize(&self, value: &Value) -> Result<Vec<u8>, SerializationError> {
        self.with_ids(|ids| {
            self.prepare_types(value)?;

            let records = codec::encode(value, ids, &self.types)?;
            let bytes = assemble(&records, self.config.max_chunk_len)?;

            tracing::trace!(
                "Serialized {} objects into {} records, {} bytes",
                ids.len(),
                records.len(),
                bytes.len()
            );

            Ok(bytes)
        })
    }

    pub fn deserialize(&self, bytes: &[u8]) -> Result<Value, SerializationError> {
        self.with_ids(|ids| {
            let records = split(bytes, self.config.max_chunk_len)?;
            let value = codec::decode(&records, ids, &self.types)?;

            tracing::trace!(
                "Deserialized {} bytes, {} records into {} objects",
                bytes.len(),
                records.len(),
                ids.len()
            );

            Ok(value)
        })
    }

    pub fn serialize_entity<T: Entity>(&self, entity: &T) -> Result<Vec<u8>, SerializationError> {
        self.serialize(&entity.to_value()?)
    }

    pub fn deserialize_entity<T: Entity>(&self, bytes: &[u8]) -> Result<T, SerializationError> {
        T::from_value(&self.deserialize(bytes)?)
    }

    /// Drop per-call state. Every later call fails with [`SerializationError::Closed`].
    pub fn close(&self) {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    pub fn is_closed(&self) -> bool {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Run one call with a fresh identity registry, and leave it empty afterwards so no
    /// graph is kept alive between calls.
    fn with_ids<T>(
        &self,
        call: impl FnOnce(&mut ObjectIdentityRegistry) -> Result<T, SerializationError>,
    ) -> Result<T, SerializationError> {
        let mut guard = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        let ids = guard.as_mut().ok_or(SerializationError::Closed)?;

        ids.clear();
        let result = call(ids);
        ids.clear();

        result
    }

    /// Make sure every instance type reachable from `value` has a handler.
    fn prepare_types(&self, value: &Value) -> Result<(), SerializationError> {
        let traverser = GraphTraverser::new(self.types.policy().as_ref());

        traverser.traverse(value, |object| {
            let object = object.lock();
            let Object::Instance(instance) = &*object else {
                return Ok(());
            };

            if self.config.lazy_type_registration {
                self.types.ensure_handler(instance.descriptor())?;
            } else {
                self.types.handler_for_object(&object)?;
            }

            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::OnceLock, thread};

    use chrono::NaiveDate;

    use super::*;
    use crate::{
        config::DEFAULT_MAX_LEN,
        descriptor::{FieldKind, TypeDescriptor},
        value::{graph_eq, Instance, ObjectRef},
    };

    #[derive(Debug, PartialEq)]
    struct Person {
        name: String,
        date_of_birth: NaiveDate,
    }

    impl Entity for Person {
        fn descriptor() -> Arc<TypeDescriptor> {
            static DESCRIPTOR: OnceLock<Arc<TypeDescriptor>> = OnceLock::new();
            DESCRIPTOR
                .get_or_init(|| {
                    Arc::new(
                        TypeDescriptor::builder("Person")
                            .field("name", FieldKind::Text)
                            .field("date_of_birth", FieldKind::Date)
                            .build(),
                    )
                })
                .clone()
        }

        fn to_fields(&self) -> Vec<Value> {
            vec![self.name.clone().into(), self.date_of_birth.into()]
        }

        fn from_instance(instance: &Instance) -> Result<Self, SerializationError> {
            Ok(Self {
                name: instance.get_text("name")?.unwrap_or_default().to_string(),
                date_of_birth: instance
                    .get_date("date_of_birth")?
                    .unwrap_or_default(),
            })
        }
    }

    fn ada() -> Person {
        Person {
            name: "Ada".to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(1815, 12, 10).unwrap(),
        }
    }

    #[test]
    fn test_entity_round_trip() {
        let serializer = Serializer::new(SerializerConfig::default());
        let bytes = serializer.serialize_entity(&ada()).unwrap();

        // One defining record, registered lazily
        assert!(serializer.types().is_registered("Person"));
        let name_len = 4 + 3;
        assert_eq!(bytes.len(), 20 + name_len + 4);

        let person: Person = serializer.deserialize_entity(&bytes).unwrap();
        assert_eq!(person, ada());
    }

    fn shared_pair() -> (Value, ObjectRef) {
        let shared = ObjectRef::new(Object::Instance(ada().to_instance().unwrap()));
        let root = Value::map(vec![
            ("first".into(), shared.clone().into()),
            ("second".into(), shared.clone().into()),
        ]);
        (root, shared)
    }

    #[test]
    fn test_identity_is_scoped_per_call() {
        let serializer = Serializer::new(SerializerConfig::default());

        let (first_root, _) = shared_pair();
        serializer.serialize(&first_root).unwrap();

        // A distinct graph with the same shape; nothing from the first call may leak in
        let (second_root, _) = shared_pair();
        let bytes = serializer.serialize(&second_root).unwrap();

        let records = split(&bytes, DEFAULT_MAX_LEN).unwrap();
        let ids: Vec<u64> = records.iter().map(|record| record.object_id.0).collect();
        assert_eq!(ids, [1, 2, 2]);

        let defining = records
            .iter()
            .filter(|record| record.object_id.0 == 2 && !record.payload.is_empty())
            .count();
        assert_eq!(defining, 1);

        let fresh = Serializer::new(SerializerConfig::default());
        assert_eq!(bytes, fresh.serialize(&second_root).unwrap());
    }

    #[test]
    fn test_identity_is_scoped_per_deserialize() {
        let serializer = Serializer::new(SerializerConfig::default());
        let (root, _) = shared_pair();
        let bytes = serializer.serialize(&root).unwrap();

        let first = serializer.deserialize(&bytes).unwrap();
        let second = serializer.deserialize(&bytes).unwrap();

        let values = |value: &Value| -> Vec<ObjectRef> {
            let map = value.as_object().unwrap().lock();
            let values = map
                .as_map()
                .unwrap()
                .iter()
                .map(|(_, value)| value.as_object().unwrap().clone())
                .collect();
            values
        };

        let first_values = values(&first);
        let second_values = values(&second);
        assert!(second_values[0].ptr_eq(&second_values[1]));
        assert!(!second_values[0].ptr_eq(&first_values[0]));
        assert!(graph_eq(&first, &second));
    }

    #[test]
    fn test_deep_graph_is_dropped_without_recursion() {
        const DEPTH: usize = 150_000;

        // A small stack makes any recursive teardown fail loudly
        let handle = thread::Builder::new()
            .stack_size(256 * 1024)
            .spawn(|| {
                let serializer = Serializer::new(SerializerConfig::default());

                let mut root = Value::list(Vec::new());
                for _ in 1..DEPTH {
                    root = Value::list(vec![root]);
                }
                let bytes = serializer.serialize(&root).unwrap();
                drop(root);

                let decoded = serializer.deserialize(&bytes).unwrap();

                let mut depth = 0;
                let mut current = decoded.as_object().cloned();
                while let Some(object) = current {
                    depth += 1;
                    current = object
                        .lock()
                        .as_list()
                        .and_then(|values| values.first())
                        .and_then(Value::as_object)
                        .cloned();
                }

                drop(decoded);
                depth
            })
            .unwrap();

        assert_eq!(handle.join().unwrap(), DEPTH);
    }

    #[test]
    fn test_graph_round_trip_preserves_sharing() {
        let serializer = Serializer::new(SerializerConfig::default());
        let shared = ObjectRef::new(Object::Instance(ada().to_instance().unwrap()));
        let root = Value::map(vec![
            ("first".into(), shared.clone().into()),
            ("second".into(), shared.into()),
        ]);

        let decoded = serializer
            .deserialize(&serializer.serialize(&root).unwrap())
            .unwrap();
        assert!(graph_eq(&root, &decoded));
    }

    #[test]
    fn test_whitelist_mode() {
        let config = SerializerConfig {
            lazy_type_registration: false,
            ..Default::default()
        };
        let serializer = Serializer::new(config.clone());

        assert!(matches!(
            serializer.serialize_entity(&ada()),
            Err(SerializationError::UnregisteredType(_))
        ));
        assert!(!serializer.types().is_registered("Person"));

        let types = Arc::new(TypeRegistry::with_types([(*Person::descriptor()).clone()]).unwrap());
        let serializer = Serializer::with_registry(config, types);
        assert!(serializer.serialize_entity(&ada()).is_ok());
    }

    #[test]
    fn test_closed() {
        let serializer = Serializer::new(SerializerConfig::default());
        let bytes = serializer.serialize(&Value::Int(1)).unwrap();

        serializer.close();
        serializer.close();

        assert!(serializer.is_closed());
        assert!(matches!(
            serializer.serialize(&Value::Int(1)),
            Err(SerializationError::Closed)
        ));
        assert!(matches!(
            serializer.deserialize(&bytes),
            Err(SerializationError::Closed)
        ));
    }

    #[test]
    fn test_chunk_limit() {
        let serializer = Serializer::new(SerializerConfig {
            max_chunk_len: 64,
            ..Default::default()
        });

        let big = Value::from("x".repeat(100));
        assert!(matches!(
            serializer.serialize(&big),
            Err(SerializationError::ChunkTooLarge { .. })
        ));
    }

    #[test]
    fn test_unknown_type_on_the_other_side() {
        let sender = Serializer::new(SerializerConfig::default());
        let receiver = Serializer::new(SerializerConfig::default());

        let bytes = sender.serialize_entity(&ada()).unwrap();
        assert!(matches!(
            receiver.deserialize(&bytes),
            Err(SerializationError::UnknownType(_))
        ));

        // The failure doesn't poison the receiver
        assert!(receiver.deserialize(&sender.serialize(&"hi".into()).unwrap()).is_ok());
    }

    #[test]
    fn test_shared_registry_across_threads() {
        let types = Arc::new(TypeRegistry::new());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let types = types.clone();
                thread::spawn(move || {
                    let serializer = Serializer::with_registry(SerializerConfig::default(), types);
                    let bytes = serializer.serialize_entity(&ada()).unwrap();
                    serializer.deserialize_entity::<Person>(&bytes).unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), ada());
        }
    }
}
