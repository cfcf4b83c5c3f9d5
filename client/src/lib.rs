use std::sync::Arc;

use common::{
    transport::Connector, Channel, ChannelConfig, ChannelError, ChannelRole, TypeRegistry, Value,
};

/// Opens channels to a host. Cheap to share between threads; each request gets its
/// own connection.
pub struct Client<C: Connector> {
    connector: C,
    types: Arc<TypeRegistry>,
    config: ChannelConfig,
}

impl<C: Connector> Client<C> {
    pub fn new(connector: C, types: Arc<TypeRegistry>, config: ChannelConfig) -> Self {
        Self {
            connector,
            types,
            config,
        }
    }

    pub fn types(&self) -> &Arc<TypeRegistry> {
        &self.types
    }

    /// Open a channel for a longer conversation. The caller closes it.
    pub fn connect(&self) -> Result<Channel, ChannelError> {
        let connection = self.connector.connect()?;
        tracing::debug!("Connected to {}", connection.peer());

        Channel::open(
            connection,
            ChannelRole::Client,
            self.types.clone(),
            self.config.clone(),
        )
    }

    /// Connect, send one value, wait for the reply and close.
    pub fn request(&self, value: &Value) -> Result<Value, ChannelError> {
        let mut channel = self.connect()?;
        let reply = channel.request(value);
        channel.close();
        reply
    }
}
