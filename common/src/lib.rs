pub mod binary_serialize;
pub mod channel;
pub mod chunks;
pub mod codec;
pub mod config;
pub mod descriptor;
pub mod dictionary;
pub mod entity;
pub mod error;
pub mod frame;
pub mod identity;
pub mod payload;
pub mod policy;
pub mod serializer;
pub mod substream;
pub mod transport;
pub mod traverser;
pub mod type_handler;
pub mod type_registry;
pub mod value;

pub use channel::{Channel, ChannelCloser, ChannelRole, ChannelState};
pub use config::{ChannelConfig, SerializerConfig};
pub use descriptor::{FieldDescriptor, FieldKind, TypeDescriptor, TypeId};
pub use entity::Entity;
pub use error::{ChannelError, SerializationError};
pub use identity::ObjectId;
pub use serializer::Serializer;
pub use type_registry::TypeRegistry;
pub use value::{graph_eq, Instance, Object, ObjectRef, Value};
