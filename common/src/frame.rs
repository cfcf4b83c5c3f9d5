//! Message framing on a byte stream.
//!
//! ```text
//! +--------+------+-------------+---------+---------------+
//! | "GWIR" | kind | len u32 LE  | payload | xxh64 u64 LE  |
//! +--------+------+-------------+---------+---------------+
//! ```
//!
//! The checksum covers the payload only.

use std::io::{self, Read, Write};

use num_derive::{FromPrimitive, ToPrimitive};

use crate::{
    binary_serialize::{read_array, read_u32_le, read_u64_le, read_u8, BinarySerialize},
    config::DEFAULT_MAX_LEN,
    dictionary::TypeDictionary,
    substream::SubstreamReader,
};

use self::hashing::{HashedReader, HashedWriter};

mod hashing;

pub const FRAME_SIGNATURE: &[u8; 4] = b"GWIR";

/// Bytes a frame adds around its payload.
pub const FRAME_OVERHEAD: usize = 4 + 1 + 4 + 8;

#[cfg_attr(feature = "fuzzing", derive(arbitrary::Arbitrary))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum FrameKind {
    /// Payload is one serialized chunk
    Message = 0,
    /// Payload is a bincode encoded [`TypeDictionary`]
    TypeDictionary = 1,
}

#[cfg_attr(feature = "fuzzing", derive(arbitrary::Arbitrary))]
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub kind: FrameKind,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn message(chunk: Vec<u8>) -> Self {
        Self {
            kind: FrameKind::Message,
            payload: chunk,
        }
    }

    pub fn type_dictionary(dictionary: &TypeDictionary) -> io::Result<Self> {
        let payload = dictionary
            .to_bytes()
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

        Ok(Self {
            kind: FrameKind::TypeDictionary,
            payload,
        })
    }

    pub fn to_type_dictionary(&self) -> io::Result<TypeDictionary> {
        TypeDictionary::from_bytes(&self.payload)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }

    /// Write the frame with a single `write_all`, refusing payloads above `max_len`.
    pub fn write_to(&self, writer: &mut impl io::Write, max_len: usize) -> io::Result<()> {
        check_len(self.payload.len(), max_len)?;

        let bytes = self.serialize_to_vec()?;
        writer.write_all(&bytes)?;
        writer.flush()
    }

    pub fn read_from(reader: &mut impl io::Read, max_len: usize) -> io::Result<Self> {
        let signature: [u8; 4] = read_array(reader)?;
        if &signature != FRAME_SIGNATURE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Invalid frame signature",
            ));
        }

        let kind = read_u8(reader)?;
        let kind: FrameKind = num_traits::FromPrimitive::from_u8(kind).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Invalid frame kind {}", kind),
            )
        })?;

        let len = read_u32_le(reader)? as usize;
        check_len(len, max_len)?;

        // Grows with the bytes actually received, so a bogus length can't force a huge allocation
        let mut payload_reader = SubstreamReader::new(HashedReader::new(&mut *reader), len);
        let mut payload = Vec::new();
        payload_reader.read_to_end(&mut payload)?;
        if !payload_reader.reached_end() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("Frame ended after {} of {} payload bytes", payload.len(), len),
            ));
        }
        let calculated_hash = payload_reader.into_inner().result();

        let hash = read_u64_le(reader)?;
        if hash != calculated_hash {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Invalid frame checksum",
            ));
        }

        Ok(Self { kind, payload })
    }
}

fn check_len(len: usize, max_len: usize) -> io::Result<()> {
    if len > max_len || len > u32::MAX as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Frame length {} exceeds {}", len, max_len),
        ));
    }
    Ok(())
}

impl BinarySerialize for Frame {
    fn serialize_to_stream(&self, writer: &mut impl io::Write) -> io::Result<()> {
        writer.write_all(FRAME_SIGNATURE)?;
        writer.write_all(&[self.kind as u8])?;
        writer.write_all(&(self.payload.len() as u32).to_le_bytes())?;

        let mut hashed = HashedWriter::new(&mut *writer);
        hashed.write_all(&self.payload)?;
        let hash = hashed.result();
        writer.write_all(&hash.to_le_bytes())?;

        Ok(())
    }

    fn length_when_serialized(&self) -> u32 {
        (FRAME_OVERHEAD + self.payload.len()) as u32
    }

    fn deserialize_from_stream(reader: &mut impl io::Read) -> io::Result<Self>
    where
        Self: Sized,
    {
        Self::read_from(reader, DEFAULT_MAX_LEN)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::descriptor::{FieldKind, TypeDescriptor};

    const MAX: usize = 1 << 16;

    fn encoded(frame: &Frame) -> Vec<u8> {
        let mut bytes = Vec::new();
        frame.write_to(&mut bytes, MAX).unwrap();
        bytes
    }

    #[test]
    fn test_frame_layout() {
        let frame = Frame::message(vec![1, 2, 3]);
        let bytes = encoded(&frame);

        assert_eq!(bytes.len(), frame.length_when_serialized() as usize);
        assert_eq!(&bytes[..4], b"GWIR");
        assert_eq!(bytes[4], 0);
        assert_eq!(&bytes[5..9], &3u32.to_le_bytes());
        assert_eq!(&bytes[9..12], &[1, 2, 3]);

        let read = Frame::read_from(&mut Cursor::new(bytes), MAX).unwrap();
        assert_eq!(read, frame);
    }

    #[test]
    fn test_frames_back_to_back() {
        let first = Frame::message(vec![9; 100]);
        let dictionary = TypeDictionary {
            types: vec![TypeDescriptor::builder("Person")
                .field("name", FieldKind::Text)
                .build()],
        };
        let second = Frame::type_dictionary(&dictionary).unwrap();

        let mut bytes = encoded(&first);
        bytes.extend(encoded(&second));

        let mut cursor = Cursor::new(bytes);
        assert_eq!(Frame::read_from(&mut cursor, MAX).unwrap(), first);
        let read = Frame::read_from(&mut cursor, MAX).unwrap();
        assert_eq!(read.kind, FrameKind::TypeDictionary);
        assert_eq!(read.to_type_dictionary().unwrap(), dictionary);
    }

    #[test]
    fn test_corruption_is_detected() {
        let bytes = encoded(&Frame::message(vec![5; 32]));

        for index in 0..bytes.len() {
            let mut corrupt = bytes.clone();
            corrupt[index] ^= 0x40;

            let result = Frame::read_from(&mut Cursor::new(corrupt), MAX);
            assert!(result.is_err(), "flip at {} went unnoticed", index);
        }
    }

    #[test]
    fn test_length_limits() {
        let frame = Frame::message(vec![0; 200]);
        assert!(frame.write_to(&mut Vec::new(), 100).is_err());

        let bytes = encoded(&frame);
        let err = Frame::read_from(&mut Cursor::new(bytes), 100).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_truncated_frame() {
        let bytes = encoded(&Frame::message(vec![7; 50]));
        for cut in [0, 3, 8, 30, bytes.len() - 1] {
            let err = Frame::read_from(&mut Cursor::new(&bytes[..cut]), MAX).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof, "cut at {}", cut);
        }
    }
}
