use std::sync::Arc;

use crate::{
    descriptor::TypeDescriptor,
    error::SerializationError,
    value::{Instance, Object, Value},
};

/// A plain Rust type with a declared layout, convertible to and from an [`Instance`].
///
/// Implementations usually keep their descriptor in a `OnceLock` so every call returns
/// the same `Arc`.
pub trait Entity: Sized {
    fn descriptor() -> Arc<TypeDescriptor>;

    /// One value per declared field, in declaration order.
    fn to_fields(&self) -> Vec<Value>;

    fn from_instance(instance: &Instance) -> Result<Self, SerializationError>;

    fn to_instance(&self) -> Result<Instance, SerializationError> {
        Instance::new(Self::descriptor(), self.to_fields())
    }

    fn to_value(&self) -> Result<Value, SerializationError> {
        Ok(Value::object(Object::Instance(self.to_instance()?)))
    }

    fn from_value(value: &Value) -> Result<Self, SerializationError> {
        let descriptor = Self::descriptor();
        let found = match value.as_object() {
            Some(object) => {
                let object = object.lock();
                match object.as_instance() {
                    Some(instance) if **instance.descriptor() == *descriptor => {
                        return Self::from_instance(instance)
                    }
                    _ => object.type_name().to_string(),
                }
            }
            None => "a plain value".to_string(),
        };

        Err(SerializationError::TypeConflict(format!(
            "expected {}, found {}",
            descriptor.name(),
            found
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::OnceLock;

    use super::*;
    use crate::descriptor::FieldKind;

    #[derive(Debug, PartialEq)]
    struct Point {
        x: i64,
        y: i64,
    }

    impl Entity for Point {
        fn descriptor() -> Arc<TypeDescriptor> {
            static DESCRIPTOR: OnceLock<Arc<TypeDescriptor>> = OnceLock::new();
            DESCRIPTOR
                .get_or_init(|| {
                    Arc::new(
                        TypeDescriptor::builder("Point")
                            .field("x", FieldKind::Int)
                            .field("y", FieldKind::Int)
                            .build(),
                    )
                })
                .clone()
        }

        fn to_fields(&self) -> Vec<Value> {
            vec![self.x.into(), self.y.into()]
        }

        fn from_instance(instance: &Instance) -> Result<Self, SerializationError> {
            Ok(Self {
                x: instance.get_int("x")?,
                y: instance.get_int("y")?,
            })
        }
    }

    #[test]
    fn test_value_conversion() {
        let point = Point { x: 3, y: -4 };
        let value = point.to_value().unwrap();
        assert_eq!(Point::from_value(&value).unwrap(), point);
    }

    #[test]
    fn test_from_other_value() {
        assert!(matches!(
            Point::from_value(&Value::Int(1)),
            Err(SerializationError::TypeConflict(_))
        ));
        assert!(Point::from_value(&Value::list(vec![])).is_err());
    }
}
