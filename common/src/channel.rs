//! Request/reply exchange of serialized values over one connection.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use uuid::Uuid;

use crate::{
    config::ChannelConfig,
    error::{ChannelError, SerializationError},
    frame::{Frame, FrameKind},
    serializer::Serializer,
    transport::{Connection, ConnectionCloser},
    type_registry::TypeRegistry,
    value::Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    Host,
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
}

/// Closes a channel from any thread. A `receive` blocked on the channel returns with a
/// transport error.
#[derive(Clone)]
pub struct ChannelCloser {
    closed: Arc<AtomicBool>,
    connection: Arc<dyn ConnectionCloser>,
}

impl ChannelCloser {
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            if let Err(err) = self.connection.close() {
                tracing::debug!("Failed to shut down connection: {}", err);
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// One side of a connection. Owns its serializer, so identity state is never shared
/// between channels; the type registry may be.
pub struct Channel {
    id: Uuid,
    role: ChannelRole,
    state: ChannelState,
    connection: Box<dyn Connection>,
    closer: ChannelCloser,
    serializer: Serializer,
    config: ChannelConfig,
}

impl Channel {
    /// Take over an established connection. On the host side this sends the type
    /// dictionary first when the config asks for it.
    pub fn open(
        mut connection: Box<dyn Connection>,
        role: ChannelRole,
        types: Arc<TypeRegistry>,
        config: ChannelConfig,
    ) -> Result<Self, ChannelError> {
        connection.set_read_timeout(config.read_timeout())?;
        let closer = ChannelCloser {
            closed: Arc::new(AtomicBool::new(false)),
            connection: Arc::from(connection.try_clone_closer()?),
        };

        let mut channel = Self {
            id: Uuid::new_v4(),
            role,
            state: ChannelState::Connecting,
            connection,
            closer,
            serializer: Serializer::with_registry(config.serializer.clone(), types),
            config,
        };

        if role == ChannelRole::Host && channel.config.exchange_type_dictionary {
            let result = channel.send_type_dictionary();
            channel.close_on_error(result)?;
        }

        channel.state = ChannelState::Open;
        tracing::debug!(
            "Channel {} open as {:?}, peer {}",
            channel.id,
            role,
            channel.connection.peer()
        );

        Ok(channel)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn role(&self) -> ChannelRole {
        self.role
    }

    pub fn state(&self) -> ChannelState {
        if self.closer.is_closed() {
            ChannelState::Closed
        } else {
            self.state
        }
    }

    pub fn peer(&self) -> String {
        self.connection.peer()
    }

    pub fn types(&self) -> &Arc<TypeRegistry> {
        self.serializer.types()
    }

    pub fn closer(&self) -> ChannelCloser {
        self.closer.clone()
    }

    pub fn send(&mut self, value: &Value) -> Result<(), ChannelError> {
        self.ensure_open()?;
        let result = self.send_inner(value);
        self.close_on_error(result)
    }

    /// Block until the next value arrives. On the client side, type dictionary frames on
    /// the way are imported into the registry; a host refuses them.
    pub fn receive(&mut self) -> Result<Value, ChannelError> {
        self.ensure_open()?;
        let result = self.receive_inner();
        self.close_on_error(result)
    }

    /// Send one value and wait for exactly one reply.
    pub fn request(&mut self, value: &Value) -> Result<Value, ChannelError> {
        self.send(value)?;
        self.receive()
    }

    /// Close the channel. Closing twice is a no-op.
    pub fn close(&mut self) {
        if self.state == ChannelState::Closed {
            return;
        }

        self.state = ChannelState::Closed;
        self.closer.close();
        if let Err(err) = self.connection.shutdown() {
            tracing::debug!("Channel {}: shutdown failed: {}", self.id, err);
        }
        self.serializer.close();

        tracing::debug!("Channel {} closed", self.id);
    }

    fn ensure_open(&self) -> Result<(), ChannelError> {
        match self.state() {
            ChannelState::Closed => Err(ChannelError::Closed),
            _ => Ok(()),
        }
    }

    fn close_on_error<T>(&mut self, result: Result<T, ChannelError>) -> Result<T, ChannelError> {
        if let Err(err) = &result {
            tracing::debug!("Channel {} failed: {}", self.id, err);
            self.close();
        }
        result
    }

    fn send_type_dictionary(&mut self) -> Result<(), ChannelError> {
        let dictionary = self.serializer.types().dictionary();
        let frame = Frame::type_dictionary(&dictionary)?;
        frame.write_to(&mut self.connection, self.config.max_frame_len)?;

        tracing::trace!(
            "Channel {} sent type dictionary with {} types",
            self.id,
            dictionary.types.len()
        );
        Ok(())
    }

    fn send_inner(&mut self, value: &Value) -> Result<(), ChannelError> {
        let chunk = self.serializer.serialize(value)?;
        Frame::message(chunk).write_to(&mut self.connection, self.config.max_frame_len)?;
        Ok(())
    }

    fn receive_inner(&mut self) -> Result<Value, ChannelError> {
        loop {
            let frame = Frame::read_from(&mut self.connection, self.config.max_frame_len)?;

            match frame.kind {
                FrameKind::Message => return Ok(self.serializer.deserialize(&frame.payload)?),
                // The host's registry is shared by every connection, peers may not add to it
                FrameKind::TypeDictionary if self.role == ChannelRole::Host => {
                    return Err(ChannelError::Transport(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "Type dictionary frames are only accepted by clients",
                    )));
                }
                FrameKind::TypeDictionary => {
                    let dictionary = frame.to_type_dictionary()?;
                    let added = self.serializer.types().import(&dictionary)?;
                    tracing::debug!(
                        "Channel {} imported {} new types from the host",
                        self.id,
                        added
                    );
                }
            }
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("state", &self.state())
            .finish()
    }
}

/// Whether an error means the peer or the wire is gone, as opposed to a value that
/// couldn't be handled.
pub fn is_disconnect(err: &ChannelError) -> bool {
    match err {
        ChannelError::Transport(err) => matches!(
            err.kind(),
            std::io::ErrorKind::UnexpectedEof
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe
        ),
        ChannelError::Closed => true,
        ChannelError::Serialization(SerializationError::Closed) => true,
        ChannelError::Serialization(_) => false,
    }
}
