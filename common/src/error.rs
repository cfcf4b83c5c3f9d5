use std::io;

use thiserror::Error;

use crate::descriptor::{FieldKind, TypeId};

#[derive(Debug, Error)]
pub enum SerializationError {
    /// A record names a type id that was never registered on this side.
    #[error("unknown type id {0}")]
    UnknownType(TypeId),

    /// Whitelist mode found an instance of a type that was not registered up front.
    #[error("type {0} is not registered")]
    UnregisteredType(String),

    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("serializer is closed")]
    Closed,

    #[error("type conflict: {0}")]
    TypeConflict(String),

    #[error("invalid type descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("field {type_name}.{field} expects a value of kind {expected:?}")]
    FieldKindMismatch {
        type_name: String,
        field: String,
        expected: FieldKind,
    },

    #[error("type {type_name} has no field {field}")]
    UnknownField { type_name: String, field: String },

    #[error("chunk length {len} exceeds maximum {max}")]
    ChunkTooLarge { len: usize, max: usize },

    /// The object graph was modified by another thread while it was being encoded.
    #[error("object graph changed during serialization")]
    GraphChanged,
}

impl SerializationError {
    pub fn malformed(message: impl Into<String>) -> Self {
        SerializationError::MalformedRecord(message.into())
    }
}

impl From<io::Error> for SerializationError {
    fn from(err: io::Error) -> Self {
        // Only in-memory cursors are read by the codec, so any io error is a short or bad record.
        SerializationError::MalformedRecord(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error(transparent)]
    Serialization(SerializationError),

    #[error("channel is closed")]
    Closed,
}

impl From<SerializationError> for ChannelError {
    fn from(err: SerializationError) -> Self {
        match err {
            // A chunk that does not parse is a broken message on the wire, not an application error
            SerializationError::MalformedRecord(message) => {
                ChannelError::Transport(io::Error::new(io::ErrorKind::InvalidData, message))
            }
            other => ChannelError::Serialization(other),
        }
    }
}

impl ChannelError {
    pub fn is_transport(&self) -> bool {
        matches!(self, ChannelError::Transport(_))
    }
}
