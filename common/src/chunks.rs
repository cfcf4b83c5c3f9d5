//! Records and the chunks that pack them.
//!
//! ```text
//! +-------------+---------------+----------------+---------+
//! | type id u64 | object id u64 | payload len u32| payload |
//! +-------------+---------------+----------------+---------+
//! ```
//!
//! All integers are little-endian. A chunk is records back to back with no framing of
//! its own; the record lengths delimit it.

use std::io::{Cursor, Read};

use crate::{
    binary_serialize::{read_u32_le, read_u64_le, BinarySerialize},
    descriptor::TypeId,
    error::SerializationError,
    identity::ObjectId,
};

pub const RECORD_HEADER_LEN: usize = 8 + 8 + 4;

#[cfg_attr(feature = "fuzzing", derive(arbitrary::Arbitrary))]
#[derive(Clone, Debug, PartialEq)]
pub struct BinaryRecord {
    pub type_id: TypeId,
    pub object_id: ObjectId,
    pub payload: Vec<u8>,
}

impl BinaryRecord {
    pub fn defining(type_id: TypeId, object_id: ObjectId, payload: Vec<u8>) -> Self {
        Self {
            type_id,
            object_id,
            payload,
        }
    }

    /// A repeat occurrence of an already defined object.
    pub fn reference(type_id: TypeId, object_id: ObjectId) -> Self {
        Self {
            type_id,
            object_id,
            payload: Vec::new(),
        }
    }
}

impl BinarySerialize for BinaryRecord {
    fn serialize_to_stream(&self, writer: &mut impl std::io::Write) -> std::io::Result<()> {
        writer.write_all(&self.type_id.0.to_le_bytes())?;
        writer.write_all(&self.object_id.0.to_le_bytes())?;

        let len = self.payload.len() as u32;
        writer.write_all(&len.to_le_bytes())?;

        writer.write_all(&self.payload)?;

        Ok(())
    }

    fn length_when_serialized(&self) -> u32 {
        RECORD_HEADER_LEN as u32 + self.payload.len() as u32
    }

    fn deserialize_from_stream(reader: &mut impl std::io::Read) -> std::io::Result<Self>
    where
        Self: Sized,
    {
        let type_id = TypeId(read_u64_le(reader)?);
        let object_id = ObjectId(read_u64_le(reader)?);
        let len = read_u32_le(reader)?;

        // Read through `take` so a corrupt length can't allocate more than is really there
        let mut payload = Vec::new();
        reader.take(len as u64).read_to_end(&mut payload)?;
        if payload.len() != len as usize {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "record payload length {} exceeds remaining {} bytes",
                    len,
                    payload.len()
                ),
            ));
        }

        Ok(Self {
            type_id,
            object_id,
            payload,
        })
    }
}

/// Pack records into one contiguous chunk.
pub fn assemble(records: &[BinaryRecord], max_len: usize) -> Result<Vec<u8>, SerializationError> {
    let len: usize = records
        .iter()
        .map(|record| RECORD_HEADER_LEN + record.payload.len())
        .sum();

    if len > max_len {
        return Err(SerializationError::ChunkTooLarge { len, max: max_len });
    }

    for record in records {
        if record.payload.len() > u32::MAX as usize {
            return Err(SerializationError::ChunkTooLarge {
                len: record.payload.len(),
                max: u32::MAX as usize,
            });
        }
    }

    let mut bytes = Vec::with_capacity(len);
    for record in records {
        record.serialize_to_stream(&mut bytes)?;
    }

    Ok(bytes)
}

/// Split a chunk back into its records. Only the structure is checked here.
pub fn split(bytes: &[u8], max_len: usize) -> Result<Vec<BinaryRecord>, SerializationError> {
    if bytes.len() > max_len {
        return Err(SerializationError::ChunkTooLarge {
            len: bytes.len(),
            max: max_len,
        });
    }

    let mut cursor = Cursor::new(bytes);
    let mut records = Vec::new();

    while (cursor.position() as usize) < bytes.len() {
        let remaining = bytes.len() - cursor.position() as usize;
        if remaining < RECORD_HEADER_LEN {
            return Err(SerializationError::malformed(format!(
                "truncated record header, {} bytes left",
                remaining
            )));
        }

        records.push(BinaryRecord::deserialize_from_stream(&mut cursor)?);
    }

    Ok(records)
}
