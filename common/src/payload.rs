//! Field payload encoding. Every kind has one fixed little-endian layout, shared by the
//! encode and decode side.

use std::io::{Cursor, Read};

use chrono::{Datelike, NaiveDate};
use num_derive::{FromPrimitive, ToPrimitive};

use crate::{
    binary_serialize::{read_array, read_u32_le, read_u64_le, read_u8},
    descriptor::FieldKind,
    error::SerializationError,
    identity::{ObjectId, ObjectIdentityRegistry},
    value::{ObjectRef, Value},
};

const NULL_TEXT_LEN: u32 = u32::MAX;
const NULL_DATE_DAYS: i32 = i32::MIN;

/// Leading byte of an `Any` encoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum ValueTag {
    Null = 0,
    Bool = 1,
    Int = 2,
    Float = 3,
    Text = 4,
    Date = 5,
    Reference = 6,
}

impl ValueTag {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueTag::Null,
            Value::Bool(_) => ValueTag::Bool,
            Value::Int(_) => ValueTag::Int,
            Value::Float(_) => ValueTag::Float,
            Value::Text(_) => ValueTag::Text,
            Value::Date(_) => ValueTag::Date,
            Value::Ref(_) => ValueTag::Reference,
        }
    }

    fn kind(&self) -> Option<FieldKind> {
        match self {
            ValueTag::Null => None,
            ValueTag::Bool => Some(FieldKind::Bool),
            ValueTag::Int => Some(FieldKind::Int),
            ValueTag::Float => Some(FieldKind::Float),
            ValueTag::Text => Some(FieldKind::Text),
            ValueTag::Date => Some(FieldKind::Date),
            ValueTag::Reference => Some(FieldKind::Reference),
        }
    }
}

/// Writes one record's payload. References are written as the ids the identity registry
/// already assigned to them.
pub struct PayloadWriter<'a> {
    buf: Vec<u8>,
    ids: &'a ObjectIdentityRegistry,
}

impl<'a> PayloadWriter<'a> {
    pub fn new(ids: &'a ObjectIdentityRegistry) -> Self {
        Self {
            buf: Vec::new(),
            ids,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Write a value as a field of the given kind. The caller checks that the kind
    /// accepts the value.
    pub fn write_field(&mut self, kind: FieldKind, value: &Value) -> Result<(), SerializationError> {
        match (kind, value) {
            (FieldKind::Any, value) => self.write_any(value),
            (FieldKind::Bool, Value::Bool(value)) => {
                self.write_bool(*value);
                Ok(())
            }
            (FieldKind::Int, Value::Int(value)) => {
                self.write_int(*value);
                Ok(())
            }
            (FieldKind::Float, Value::Float(value)) => {
                self.write_float(*value);
                Ok(())
            }
            (FieldKind::Text, Value::Text(value)) => self.write_text(Some(value)),
            (FieldKind::Text, Value::Null) => self.write_text(None),
            (FieldKind::Date, Value::Date(value)) => {
                self.write_date(Some(*value));
                Ok(())
            }
            (FieldKind::Date, Value::Null) => {
                self.write_date(None);
                Ok(())
            }
            (FieldKind::Reference, Value::Ref(object)) => self.write_reference(Some(object)),
            (FieldKind::Reference, Value::Null) => self.write_reference(None),
            // No descriptor at this level, the value's own tag names the field
            _ => Err(SerializationError::FieldKindMismatch {
                type_name: "value".to_string(),
                field: format!("{:?}", ValueTag::of(value)).to_lowercase(),
                expected: kind,
            }),
        }
    }

    pub fn write_any(&mut self, value: &Value) -> Result<(), SerializationError> {
        let tag = ValueTag::of(value);
        self.buf.push(tag as u8);

        match tag.kind() {
            Some(kind) => self.write_field(kind, value),
            None => Ok(()),
        }
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(value as u8);
    }

    pub fn write_int(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_float(&mut self, value: f64) {
        self.buf.extend_from_slice(&value.to_bits().to_le_bytes());
    }

    pub fn write_text(&mut self, value: Option<&str>) -> Result<(), SerializationError> {
        let Some(value) = value else {
            self.buf.extend_from_slice(&NULL_TEXT_LEN.to_le_bytes());
            return Ok(());
        };

        let len = value.len();
        if len >= NULL_TEXT_LEN as usize {
            return Err(SerializationError::ChunkTooLarge {
                len,
                max: NULL_TEXT_LEN as usize - 1,
            });
        }

        self.buf.extend_from_slice(&(len as u32).to_le_bytes());
        self.buf.extend_from_slice(value.as_bytes());
        Ok(())
    }

    pub fn write_date(&mut self, value: Option<NaiveDate>) {
        let days = value.map_or(NULL_DATE_DAYS, |date| date.num_days_from_ce());
        self.buf.extend_from_slice(&days.to_le_bytes());
    }

    pub fn write_reference(&mut self, object: Option<&ObjectRef>) -> Result<(), SerializationError> {
        let id = match object {
            Some(object) => self
                .ids
                .id_of(object)
                .ok_or(SerializationError::GraphChanged)?,
            None => ObjectId::NULL,
        };

        self.buf.extend_from_slice(&id.0.to_le_bytes());
        Ok(())
    }

    pub fn write_count(&mut self, count: usize) -> Result<(), SerializationError> {
        let count = u32::try_from(count).map_err(|_| SerializationError::ChunkTooLarge {
            len: count,
            max: u32::MAX as usize,
        })?;

        self.buf.extend_from_slice(&count.to_le_bytes());
        Ok(())
    }
}

/// Reads one record's payload, resolving references against objects allocated in the
/// first decode pass.
pub struct PayloadReader<'a> {
    cursor: Cursor<&'a [u8]>,
    ids: &'a ObjectIdentityRegistry,
}

impl<'a> PayloadReader<'a> {
    pub fn new(payload: &'a [u8], ids: &'a ObjectIdentityRegistry) -> Self {
        Self {
            cursor: Cursor::new(payload),
            ids,
        }
    }

    fn remaining(&self) -> usize {
        let len = self.cursor.get_ref().len() as u64;
        (len - self.cursor.position().min(len)) as usize
    }

    pub fn read_field(&mut self, kind: FieldKind) -> Result<Value, SerializationError> {
        let value = match kind {
            FieldKind::Any => return self.read_any(),
            FieldKind::Bool => match read_u8(&mut self.cursor)? {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                other => {
                    return Err(SerializationError::malformed(format!(
                        "invalid bool byte {}",
                        other
                    )))
                }
            },
            FieldKind::Int => Value::Int(i64::from_le_bytes(read_array(&mut self.cursor)?)),
            FieldKind::Float => Value::Float(f64::from_bits(read_u64_le(&mut self.cursor)?)),
            FieldKind::Text => self.read_text()?,
            FieldKind::Date => self.read_date()?,
            FieldKind::Reference => self.read_reference()?,
        };

        Ok(value)
    }

    pub fn read_any(&mut self) -> Result<Value, SerializationError> {
        let tag = read_u8(&mut self.cursor)?;
        let tag: ValueTag = num_traits::FromPrimitive::from_u8(tag).ok_or_else(|| {
            SerializationError::malformed(format!("invalid value tag {}", tag))
        })?;

        match tag.kind() {
            Some(kind) => self.read_field(kind),
            None => Ok(Value::Null),
        }
    }

    fn read_text(&mut self) -> Result<Value, SerializationError> {
        let len = read_u32_le(&mut self.cursor)?;
        if len == NULL_TEXT_LEN {
            return Ok(Value::Null);
        }

        if len as usize > self.remaining() {
            return Err(SerializationError::malformed(format!(
                "text length {} exceeds remaining payload {}",
                len,
                self.remaining()
            )));
        }

        let mut bytes = vec![0u8; len as usize];
        self.cursor.read_exact(&mut bytes)?;
        let text = String::from_utf8(bytes)
            .map_err(|_| SerializationError::malformed("text is not valid UTF-8"))?;

        Ok(Value::Text(text))
    }

    fn read_date(&mut self) -> Result<Value, SerializationError> {
        let days = i32::from_le_bytes(read_array(&mut self.cursor)?);
        if days == NULL_DATE_DAYS {
            return Ok(Value::Null);
        }

        NaiveDate::from_num_days_from_ce_opt(days)
            .map(Value::Date)
            .ok_or_else(|| SerializationError::malformed(format!("date {} out of range", days)))
    }

    fn read_reference(&mut self) -> Result<Value, SerializationError> {
        let id = ObjectId(read_u64_le(&mut self.cursor)?);
        if id.is_null() {
            return Ok(Value::Null);
        }

        self.ids
            .object_for(id)
            .map(|object| Value::Ref(object.clone()))
            .ok_or_else(|| {
                SerializationError::malformed(format!("reference to undefined object id {}", id))
            })
    }

    /// Read an element count. Every element takes at least one byte, which bounds the
    /// count before anything is allocated for it.
    pub fn read_count(&mut self) -> Result<usize, SerializationError> {
        let count = read_u32_le(&mut self.cursor)? as usize;
        if count > self.remaining() {
            return Err(SerializationError::malformed(format!(
                "element count {} exceeds remaining payload {}",
                count,
                self.remaining()
            )));
        }

        Ok(count)
    }

    /// Check the payload was consumed exactly.
    pub fn finish(self) -> Result<(), SerializationError> {
        match self.remaining() {
            0 => Ok(()),
            left => Err(SerializationError::malformed(format!(
                "{} trailing payload bytes",
                left
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Object;

    #[test]
    fn test_field_layouts() {
        let ids = ObjectIdentityRegistry::new();
        let mut writer = PayloadWriter::new(&ids);

        writer.write_field(FieldKind::Int, &Value::Int(-2)).unwrap();
        writer.write_field(FieldKind::Text, &Value::Null).unwrap();
        writer.write_field(FieldKind::Text, &"hi".into()).unwrap();
        writer.write_field(FieldKind::Bool, &Value::Bool(true)).unwrap();

        let bytes = writer.into_bytes();
        assert_eq!(&bytes[..8], &(-2i64).to_le_bytes());
        assert_eq!(&bytes[8..12], &u32::MAX.to_le_bytes());
        assert_eq!(&bytes[12..16], &2u32.to_le_bytes());
        assert_eq!(&bytes[16..18], b"hi");
        assert_eq!(bytes[18], 1);
        assert_eq!(bytes.len(), 19);
    }

    #[test]
    fn test_write_field_rejects_other_kinds() {
        let ids = ObjectIdentityRegistry::new();
        let mut writer = PayloadWriter::new(&ids);

        let err = writer.write_field(FieldKind::Text, &Value::Int(3)).unwrap_err();
        assert!(
            matches!(
                &err,
                SerializationError::FieldKindMismatch { field, expected: FieldKind::Text, .. } if field == "int"
            ),
            "{:?}",
            err
        );

        let err = writer.write_field(FieldKind::Reference, &Value::Bool(true)).unwrap_err();
        assert!(matches!(
            err,
            SerializationError::FieldKindMismatch { expected: FieldKind::Reference, .. }
        ));
        assert!(writer.into_bytes().is_empty());
    }

    #[test]
    fn test_any_values() {
        let ids = ObjectIdentityRegistry::new();
        let date = NaiveDate::from_ymd_opt(1980, 12, 24).unwrap();
        let values = vec![
            Value::Null,
            Value::Bool(false),
            Value::Int(i64::MIN),
            Value::Float(2.5),
            Value::Text(String::new()),
            Value::Date(date),
        ];

        let mut writer = PayloadWriter::new(&ids);
        for value in &values {
            writer.write_any(value).unwrap();
        }
        let bytes = writer.into_bytes();

        let mut reader = PayloadReader::new(&bytes, &ids);
        for value in &values {
            let read = reader.read_any().unwrap();
            assert!(crate::value::graph_eq(value, &read));
        }
        reader.finish().unwrap();
    }

    #[test]
    fn test_references_use_assigned_ids() {
        let mut ids = ObjectIdentityRegistry::new();
        let object = ObjectRef::new(Object::List(vec![]));
        let stranger = ObjectRef::new(Object::List(vec![]));
        ids.id_for(&object);

        let mut writer = PayloadWriter::new(&ids);
        writer.write_reference(Some(&object)).unwrap();
        writer.write_reference(None).unwrap();
        assert!(matches!(
            writer.write_reference(Some(&stranger)),
            Err(SerializationError::GraphChanged)
        ));

        let bytes = writer.into_bytes();
        assert_eq!(&bytes[..8], &1u64.to_le_bytes());
        assert_eq!(&bytes[8..16], &0u64.to_le_bytes());
    }

    #[test]
    fn test_reader_rejects_bad_input() {
        let ids = ObjectIdentityRegistry::new();

        // Reference to an id nobody defined
        let bytes = 5u64.to_le_bytes();
        let mut reader = PayloadReader::new(&bytes, &ids);
        assert!(matches!(
            reader.read_field(FieldKind::Reference),
            Err(SerializationError::MalformedRecord(_))
        ));

        // Text claiming more bytes than there are
        let bytes = 100u32.to_le_bytes();
        let mut reader = PayloadReader::new(&bytes, &ids);
        assert!(reader.read_field(FieldKind::Text).is_err());

        // Unknown tag
        let bytes = [42u8];
        let mut reader = PayloadReader::new(&bytes, &ids);
        assert!(reader.read_any().is_err());

        // Truncated int
        let bytes = [1u8, 2];
        let mut reader = PayloadReader::new(&bytes, &ids);
        assert!(reader.read_field(FieldKind::Int).is_err());

        // Trailing bytes
        let bytes = [1u8, 0];
        let mut reader = PayloadReader::new(&bytes, &ids);
        reader.read_field(FieldKind::Bool).unwrap();
        assert!(reader.finish().is_err());
    }
}
