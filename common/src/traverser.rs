//! Reachability walk over an object graph.

use std::collections::HashSet;

use crate::{
    policy::FieldPolicy,
    value::{Object, ObjectRef, Value},
};

/// Walks everything reachable from a root through the fields a [`FieldPolicy`] selects.
pub struct GraphTraverser<'a> {
    policy: &'a dyn FieldPolicy,
}

impl<'a> GraphTraverser<'a> {
    pub fn new(policy: &'a dyn FieldPolicy) -> Self {
        Self { policy }
    }

    /// Call `visitor` once per distinct object reachable from `root`, pre-order, fields
    /// in declared order. The first visitor error stops the walk.
    ///
    /// No lock is held while the visitor runs.
    pub fn traverse<E>(
        &self,
        root: &Value,
        mut visitor: impl FnMut(&ObjectRef) -> Result<(), E>,
    ) -> Result<(), E> {
        let Some(root) = root.as_object() else {
            return Ok(());
        };

        let mut visited = HashSet::new();
        // Keeps visited objects alive, so an address in `visited` can't be reused
        let mut retained = Vec::new();
        let mut stack = vec![root.clone()];

        while let Some(object) = stack.pop() {
            if !visited.insert(object.identity()) {
                continue;
            }

            visitor(&object)?;

            let children = self.children(&object.lock());
            stack.extend(children.into_iter().rev());
            retained.push(object);
        }

        Ok(())
    }

    fn children(&self, object: &Object) -> Vec<ObjectRef> {
        let values: Vec<&Value> = match object {
            Object::Instance(instance) => instance
                .descriptor()
                .fields()
                .iter()
                .zip(instance.fields())
                .filter(|(field, _)| self.policy.is_selected(field))
                .map(|(_, value)| value)
                .collect(),
            Object::List(values) => values.iter().collect(),
            Object::Map(entries) => entries.iter().flat_map(|(k, v)| [k, v]).collect(),
        };

        values
            .into_iter()
            .filter_map(Value::as_object)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        descriptor::{FieldKind, TypeDescriptor},
        policy::{AllFields, PersistentFields},
        value::Instance,
    };

    fn node_descriptor() -> Arc<TypeDescriptor> {
        Arc::new(
            TypeDescriptor::builder("Node")
                .field("label", FieldKind::Text)
                .field("next", FieldKind::Reference)
                .transient_field("shadow", FieldKind::Reference)
                .build(),
        )
    }

    fn node(label: &str) -> ObjectRef {
        let mut instance = Instance::empty(node_descriptor());
        instance.set("label", label).unwrap();
        ObjectRef::new(Object::Instance(instance))
    }

    fn link(from: &ObjectRef, field: &str, to: &ObjectRef) {
        from.lock()
            .as_instance_mut()
            .unwrap()
            .set(field, to.clone())
            .unwrap();
    }

    fn labels(root: &Value, policy: &dyn FieldPolicy) -> Vec<String> {
        let mut seen = Vec::new();
        GraphTraverser::new(policy)
            .traverse::<()>(root, |object| {
                let object = object.lock();
                let label = match &*object {
                    Object::Instance(instance) => {
                        instance.get_text("label").unwrap().unwrap_or("").to_string()
                    }
                    other => other.type_name().to_string(),
                };
                seen.push(label);
                Ok(())
            })
            .unwrap();
        seen
    }

    #[test]
    fn test_cycle_is_visited_once() {
        let a = node("a");
        let b = node("b");
        link(&a, "next", &b);
        link(&b, "next", &a);

        assert_eq!(labels(&a.clone().into(), &PersistentFields), ["a", "b"]);
    }

    #[test]
    fn test_preorder_through_collections() {
        let a = node("a");
        let b = node("b");
        let root = Value::list(vec![
            a.clone().into(),
            Value::map(vec![("key".into(), b.clone().into())]),
            a.into(),
            Value::Int(4),
        ]);

        assert_eq!(labels(&root, &PersistentFields), ["List", "a", "Map", "b"]);
    }

    #[test]
    fn test_policy_decides_which_fields_are_followed() {
        let a = node("a");
        let hidden = node("hidden");
        link(&a, "shadow", &hidden);

        let root: Value = a.into();
        assert_eq!(labels(&root, &PersistentFields), ["a"]);
        assert_eq!(labels(&root, &AllFields), ["a", "hidden"]);
    }

    #[test]
    fn test_visitor_error_stops_the_walk() {
        let a = node("a");
        link(&a, "next", &node("b"));

        let mut calls = 0;
        let result = GraphTraverser::new(&PersistentFields).traverse(&a.into(), |_| {
            calls += 1;
            Err("stop")
        });

        assert_eq!(result, Err("stop"));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_deep_chain() {
        let head = node("0");
        let mut tail = head.clone();
        for i in 1..100_000 {
            let next = node(&i.to_string());
            link(&tail, "next", &next);
            tail = next;
        }

        let mut count = 0;
        GraphTraverser::new(&PersistentFields)
            .traverse::<()>(&head.clone().into(), |_| {
                count += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 100_000);
    }
}
