use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread::{self, JoinHandle},
};

use common::{transport::Connection, Channel, ChannelConfig, ChannelRole, TypeRegistry};
use crossbeam_channel::Sender;
use uuid::Uuid;

use crate::{Acceptor, HostMessage};

pub(crate) fn spawn_connection(
    id: Uuid,
    connection: Box<dyn Connection>,
    types: Arc<TypeRegistry>,
    config: ChannelConfig,
    acceptor: Arc<Acceptor>,
    host_messages: Sender<HostMessage>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        serve(id, connection, types, config, &*acceptor);

        // The host may already be gone while stopping
        host_messages.send(HostMessage::ConnectionFinished(id)).ok();
    })
}

fn serve(
    id: Uuid,
    connection: Box<dyn Connection>,
    types: Arc<TypeRegistry>,
    config: ChannelConfig,
    acceptor: &Acceptor,
) {
    let peer = connection.peer();
    let mut channel = match Channel::open(connection, ChannelRole::Host, types, config) {
        Ok(channel) => channel,
        Err(err) => {
            tracing::error!("Connection {} from {}: failed to open channel: {}", id, peer, err);
            return;
        }
    };

    match panic::catch_unwind(AssertUnwindSafe(|| acceptor(&mut channel))) {
        Ok(Ok(())) => {
            tracing::debug!("Connection {} from {} handled", id, peer);
        }
        Ok(Err(err)) => {
            tracing::error!("Connection {} from {}: handler failed: {:?}", id, peer, err);
        }
        Err(panic) => {
            tracing::error!(
                "Connection {} from {}: handler panicked: {}",
                id,
                peer,
                panic_message(panic.as_ref())
            );
        }
    }

    channel.close();
    tracing::info!("Connection {} from {} closed", id, peer);
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}
