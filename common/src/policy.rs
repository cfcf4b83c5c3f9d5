use crate::descriptor::FieldDescriptor;

/// Decides which declared fields take part in traversal and encoding.
pub trait FieldPolicy: Send + Sync {
    fn is_selected(&self, field: &FieldDescriptor) -> bool;
}

impl<F> FieldPolicy for F
where
    F: Fn(&FieldDescriptor) -> bool + Send + Sync,
{
    fn is_selected(&self, field: &FieldDescriptor) -> bool {
        self(field)
    }
}

/// Every field except those marked transient. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct PersistentFields;

impl FieldPolicy for PersistentFields {
    fn is_selected(&self, field: &FieldDescriptor) -> bool {
        !field.transient
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AllFields;

impl FieldPolicy for AllFields {
    fn is_selected(&self, _field: &FieldDescriptor) -> bool {
        true
    }
}
