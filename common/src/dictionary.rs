use serde::{Deserialize, Serialize};

use crate::descriptor::TypeDescriptor;

/// Every user type a registry knows, in type id order. Sent by a host so clients can
/// decode types they never registered themselves.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeDictionary {
    pub types: Vec<TypeDescriptor>,
}

impl TypeDictionary {
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn to_bytes(&self) -> bincode::Result<Vec<u8>> {
        bincode::serialize(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> bincode::Result<Self> {
        bincode::deserialize(bytes)
    }

    /// Human readable form, for logs and debugging.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::FieldKind;

    fn dictionary() -> TypeDictionary {
        TypeDictionary {
            types: vec![TypeDescriptor::builder("Person")
                .field("name", FieldKind::Text)
                .transient_field("age_cache", FieldKind::Int)
                .build()],
        }
    }

    #[test]
    fn test_binary_form() {
        let bytes = dictionary().to_bytes().unwrap();
        assert_eq!(TypeDictionary::from_bytes(&bytes).unwrap(), dictionary());
        assert!(TypeDictionary::from_bytes(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn test_json_form() {
        let json = dictionary().to_json().unwrap();
        assert!(json.contains("\"Person\""));
        assert!(json.contains("\"transient\": true"));
    }
}
