use std::collections::HashMap;

use crate::{error::SerializationError, value::ObjectRef};

#[cfg_attr(feature = "fuzzing", derive(arbitrary::Arbitrary))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

impl ObjectId {
    /// A null reference, or a record that isn't an object.
    pub const NULL: ObjectId = ObjectId(0);

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Maps object identity to object ids for one serialize or deserialize cycle.
///
/// Every registered object is retained until [`clear`](Self::clear), so an address used
/// as a key can't be freed and reused by a different object mid-cycle.
pub struct ObjectIdentityRegistry {
    ids: HashMap<usize, ObjectId>,
    objects: HashMap<ObjectId, ObjectRef>,
    next_id: u64,
}

impl Default for ObjectIdentityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectIdentityRegistry {
    pub fn new() -> Self {
        Self {
            ids: HashMap::new(),
            objects: HashMap::new(),
            next_id: 1,
        }
    }

    /// Returns the id of `object`, assigning the next one if it hasn't been seen this
    /// cycle. The flag is true when the id was assigned by this call.
    pub fn id_for(&mut self, object: &ObjectRef) -> (ObjectId, bool) {
        if let Some(id) = self.ids.get(&object.identity()) {
            return (*id, false);
        }

        let id = ObjectId(self.next_id);
        self.next_id += 1;

        self.ids.insert(object.identity(), id);
        self.objects.insert(id, object.clone());

        (id, true)
    }

    /// The id already assigned to `object`, if any.
    pub fn id_of(&self, object: &ObjectRef) -> Option<ObjectId> {
        self.ids.get(&object.identity()).copied()
    }

    /// Bind an incoming id to a freshly allocated object.
    pub fn register(&mut self, id: ObjectId, object: ObjectRef) -> Result<(), SerializationError> {
        if id.is_null() {
            return Err(SerializationError::malformed("object id 0 is reserved"));
        }

        if self.objects.contains_key(&id) {
            return Err(SerializationError::malformed(format!(
                "object id {} is defined twice",
                id
            )));
        }

        self.ids.insert(object.identity(), id);
        self.objects.insert(id, object);
        self.next_id = self.next_id.max(id.0.saturating_add(1));

        Ok(())
    }

    pub fn object_for(&self, id: ObjectId) -> Option<&ObjectRef> {
        self.objects.get(&id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Forget every mapping and restart ids at 1.
    pub fn clear(&mut self) {
        self.ids.clear();
        self.objects.clear();
        self.next_id = 1;
    }
}
