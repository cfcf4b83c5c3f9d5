//! Type id to handler mapping.
//!
//! Registration is append-only. A registry is meant to be shared (`Arc<TypeRegistry>`)
//! between facades and channels; lookups take a read lock and only first-time
//! registration takes the write lock.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use crate::{
    descriptor::{TypeDescriptor, TypeId},
    dictionary::TypeDictionary,
    error::SerializationError,
    policy::{FieldPolicy, PersistentFields},
    type_handler::{InstanceHandler, ListHandler, MapHandler, TypeHandler},
    value::Object,
};

struct RegistryInner {
    by_id: HashMap<TypeId, Arc<dyn TypeHandler>>,
    by_name: HashMap<String, TypeId>,
}

impl RegistryInner {
    fn insert(&mut self, handler: Arc<dyn TypeHandler>) {
        self.by_name
            .insert(handler.type_name().to_string(), handler.type_id());
        self.by_id.insert(handler.type_id(), handler);
    }

    /// The handler registered under `descriptor`'s name, if its layout is the same.
    fn existing(
        &self,
        descriptor: &TypeDescriptor,
    ) -> Result<Option<Arc<dyn TypeHandler>>, SerializationError> {
        let Some(id) = self.by_name.get(descriptor.name()) else {
            if let Some(other) = self.by_id.get(&descriptor.type_id()) {
                return Err(SerializationError::TypeConflict(format!(
                    "type {} wants id {}, already used by {}",
                    descriptor.name(),
                    descriptor.type_id(),
                    other.type_name()
                )));
            }
            return Ok(None);
        };

        let handler = &self.by_id[id];
        match handler.descriptor() {
            Some(registered) if **registered == *descriptor => Ok(Some(handler.clone())),
            _ => Err(SerializationError::TypeConflict(format!(
                "type {} is already registered with a different layout",
                descriptor.name()
            ))),
        }
    }
}

pub struct TypeRegistry {
    policy: Arc<dyn FieldPolicy>,
    inner: RwLock<RegistryInner>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::with_policy(PersistentFields)
    }

    pub fn with_policy(policy: impl FieldPolicy + 'static) -> Self {
        let mut inner = RegistryInner {
            by_id: HashMap::new(),
            by_name: HashMap::new(),
        };
        inner.insert(Arc::new(ListHandler));
        inner.insert(Arc::new(MapHandler));

        Self {
            policy: Arc::new(policy),
            inner: RwLock::new(inner),
        }
    }

    /// A registry with a fixed set of types registered up front.
    pub fn with_types(
        descriptors: impl IntoIterator<Item = TypeDescriptor>,
    ) -> Result<Self, SerializationError> {
        let registry = Self::new();
        for descriptor in descriptors {
            registry.register(descriptor)?;
        }
        Ok(registry)
    }

    pub fn policy(&self) -> &Arc<dyn FieldPolicy> {
        &self.policy
    }

    pub fn register(
        &self,
        descriptor: TypeDescriptor,
    ) -> Result<Arc<dyn TypeHandler>, SerializationError> {
        self.ensure_handler(&Arc::new(descriptor))
    }

    /// The handler for `descriptor`, registering one on first use. Registering the same
    /// layout twice is a no-op; the same name or id with another layout is a conflict.
    pub fn ensure_handler(
        &self,
        descriptor: &Arc<TypeDescriptor>,
    ) -> Result<Arc<dyn TypeHandler>, SerializationError> {
        self.ensure_handler_inner(descriptor)
            .map(|(handler, _)| handler)
    }

    fn ensure_handler_inner(
        &self,
        descriptor: &Arc<TypeDescriptor>,
    ) -> Result<(Arc<dyn TypeHandler>, bool), SerializationError> {
        if let Some(handler) = self.read().existing(descriptor)? {
            return Ok((handler, false));
        }

        descriptor.validate()?;

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        // Another thread may have won the race between the two locks
        if let Some(handler) = inner.existing(descriptor)? {
            return Ok((handler, false));
        }

        let handler: Arc<dyn TypeHandler> =
            Arc::new(InstanceHandler::new(descriptor.clone(), self.policy.as_ref()));
        inner.insert(handler.clone());

        tracing::debug!(
            "Registered type {} with id {}",
            descriptor.name(),
            descriptor.type_id()
        );

        Ok((handler, true))
    }

    pub fn lookup(&self, type_id: TypeId) -> Result<Arc<dyn TypeHandler>, SerializationError> {
        self.read()
            .by_id
            .get(&type_id)
            .cloned()
            .ok_or(SerializationError::UnknownType(type_id))
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.read().by_name.contains_key(name)
    }

    /// The handler for a live object, without registering anything.
    pub fn handler_for_object(
        &self,
        object: &Object,
    ) -> Result<Arc<dyn TypeHandler>, SerializationError> {
        match object {
            Object::List(_) => self.lookup(TypeId::LIST),
            Object::Map(_) => self.lookup(TypeId::MAP),
            Object::Instance(instance) => self
                .read()
                .existing(instance.descriptor())?
                .ok_or_else(|| SerializationError::UnregisteredType(instance.type_name().to_string())),
        }
    }

    pub fn dictionary(&self) -> TypeDictionary {
        let mut types: Vec<TypeDescriptor> = self
            .read()
            .by_id
            .values()
            .filter_map(|handler| handler.descriptor())
            .map(|descriptor| (**descriptor).clone())
            .collect();
        types.sort_by_key(|descriptor| descriptor.type_id());

        TypeDictionary { types }
    }

    /// Register every type of a peer's dictionary. Returns how many were new.
    pub fn import(&self, dictionary: &TypeDictionary) -> Result<usize, SerializationError> {
        let mut added = 0;
        for descriptor in &dictionary.types {
            let (_, is_new) = self.ensure_handler_inner(&Arc::new(descriptor.clone()))?;
            if is_new {
                added += 1;
            }
        }

        if added > 0 {
            tracing::debug!("Imported {} types from a type dictionary", added);
        }

        Ok(added)
    }

    /// Number of registered types, built-ins included.
    pub fn len(&self) -> usize {
        self.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().by_id.is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::{descriptor::FieldKind, value::Instance};

    fn person() -> TypeDescriptor {
        TypeDescriptor::builder("Person")
            .field("name", FieldKind::Text)
            .field("date_of_birth", FieldKind::Date)
            .build()
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = TypeRegistry::new();
        let handler = registry.register(person()).unwrap();

        assert_eq!(handler.type_id(), person().type_id());
        assert_eq!(registry.lookup(person().type_id()).unwrap().type_name(), "Person");
        assert!(registry.is_registered("Person"));
        assert!(matches!(
            registry.lookup(TypeId(123456)),
            Err(SerializationError::UnknownType(TypeId(123456)))
        ));
    }

    #[test]
    fn test_double_registration_is_idempotent() {
        let registry = TypeRegistry::new();
        let before = registry.len();
        registry.register(person()).unwrap();
        registry.register(person()).unwrap();
        assert_eq!(registry.len(), before + 1);
    }

    #[test]
    fn test_conflicting_layout_is_rejected() {
        let registry = TypeRegistry::new();
        registry.register(person()).unwrap();

        let other = TypeDescriptor::builder("Person")
            .field("name", FieldKind::Text)
            .build();
        assert!(matches!(
            registry.register(other),
            Err(SerializationError::TypeConflict(_))
        ));

        let same_id = TypeDescriptor::builder("Human")
            .type_id(person().type_id().0)
            .build();
        assert!(matches!(
            registry.register(same_id),
            Err(SerializationError::TypeConflict(_))
        ));

        let builtin_name = TypeDescriptor::builder("List").build();
        assert!(registry.register(builtin_name).is_err());
    }

    #[test]
    fn test_concurrent_first_use() {
        let registry = Arc::new(TypeRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || registry.register(person()).unwrap().type_id())
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), person().type_id());
        }
        assert_eq!(registry.dictionary().types.len(), 1);
    }

    #[test]
    fn test_handler_for_object() {
        let registry = TypeRegistry::new();
        let descriptor = Arc::new(person());
        let object = Object::Instance(Instance::empty(descriptor.clone()));

        assert!(matches!(
            registry.handler_for_object(&object),
            Err(SerializationError::UnregisteredType(_))
        ));

        registry.ensure_handler(&descriptor).unwrap();
        assert_eq!(
            registry.handler_for_object(&object).unwrap().type_id(),
            descriptor.type_id()
        );
        assert_eq!(
            registry
                .handler_for_object(&Object::List(vec![]))
                .unwrap()
                .type_id(),
            TypeId::LIST
        );
    }

    #[test]
    fn test_dictionary_import() {
        let host = TypeRegistry::with_types([person()]).unwrap();
        let client = TypeRegistry::new();

        assert_eq!(client.import(&host.dictionary()).unwrap(), 1);
        assert_eq!(client.import(&host.dictionary()).unwrap(), 0);
        assert!(client.lookup(person().type_id()).is_ok());
    }
}
