use std::{
    collections::HashMap,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::Context;
use common::{
    transport::{ConnectionCloser, Listener},
    Channel, ChannelConfig, TypeRegistry,
};
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use self::connection::spawn_connection;

mod connection;

/// Handles one accepted channel. The host closes the channel when this returns.
pub type Acceptor = dyn Fn(&mut Channel) -> anyhow::Result<()> + Send + Sync;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub channel: ChannelConfig,

    /// How long one accept call waits before the loop checks for a stop request
    pub accept_poll_ms: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            channel: ChannelConfig::default(),
            accept_poll_ms: 50,
        }
    }
}

pub(crate) enum HostMessage {
    /// A connection thread finished and can be joined
    ConnectionFinished(Uuid),
    /// Stop accepting, close every open connection and return from `run`
    Stop,
}

struct OpenConnection {
    closer: Box<dyn ConnectionCloser>,
    join_handle: JoinHandle<()>,
}

pub struct Host<L: Listener> {
    listener: L,
    types: Arc<TypeRegistry>,
    config: HostConfig,
    acceptor: Arc<Acceptor>,
    messages: (Sender<HostMessage>, Receiver<HostMessage>),
}

/// Stops a running host from another thread.
#[derive(Clone)]
pub struct HostStopper {
    messages: Sender<HostMessage>,
}

impl HostStopper {
    pub fn stop(&self) {
        self.messages.send(HostMessage::Stop).ok();
    }
}

impl<L: Listener + 'static> Host<L> {
    pub fn new(
        listener: L,
        types: Arc<TypeRegistry>,
        config: HostConfig,
        acceptor: impl Fn(&mut Channel) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            listener,
            types,
            config,
            acceptor: Arc::new(acceptor),
            messages: crossbeam_channel::unbounded(),
        }
    }

    pub fn local_addr(&self) -> String {
        self.listener.local_addr()
    }

    pub fn stopper(&self) -> HostStopper {
        HostStopper {
            messages: self.messages.0.clone(),
        }
    }

    /// Accept connections until stopped. Each connection gets its own thread; a failing
    /// or panicking acceptor only ends its own connection.
    pub fn run(&self) -> anyhow::Result<()> {
        let poll = Duration::from_millis(self.config.accept_poll_ms);
        let mut connections: HashMap<Uuid, OpenConnection> = HashMap::new();

        tracing::info!("Host listening on {}", self.listener.local_addr());

        let result: anyhow::Result<()> = loop {
            if self.process_messages(&mut connections) {
                break Ok(());
            }

            let connection = match self.listener.accept(poll) {
                Ok(Some(connection)) => connection,
                Ok(None) => continue,
                Err(err) => break Err(err).context("Failed to accept connection"),
            };

            let id = Uuid::new_v4();
            let closer = match connection.try_clone_closer() {
                Ok(closer) => closer,
                Err(err) => {
                    tracing::error!("Dropping connection from {}: {}", connection.peer(), err);
                    continue;
                }
            };

            tracing::info!("Accepted connection {} from {}", id, connection.peer());

            let join_handle = spawn_connection(
                id,
                connection,
                self.types.clone(),
                self.config.channel.clone(),
                self.acceptor.clone(),
                self.messages.0.clone(),
            );
            connections.insert(
                id,
                OpenConnection {
                    closer,
                    join_handle,
                },
            );
        };

        self.close_all(connections);
        tracing::info!("Host on {} stopped", self.listener.local_addr());

        result
    }

    /// Run on a background thread.
    pub fn spawn(self) -> HostHandle {
        let stopper = self.stopper();
        let local_addr = self.local_addr();

        let join_handle = thread::spawn(move || {
            if let Err(err) = self.run() {
                tracing::error!("Host stopped with an error: {:?}", err);
            }
        });

        HostHandle {
            stopper,
            local_addr,
            join_handle: Some(join_handle),
        }
    }

    /// Returns true when a stop was requested.
    fn process_messages(&self, connections: &mut HashMap<Uuid, OpenConnection>) -> bool {
        while let Ok(message) = self.messages.1.try_recv() {
            match message {
                HostMessage::ConnectionFinished(id) => {
                    if let Some(connection) = connections.remove(&id) {
                        connection.join_handle.join().ok();
                    }
                }
                HostMessage::Stop => return true,
            }
        }

        false
    }

    fn close_all(&self, connections: HashMap<Uuid, OpenConnection>) {
        for connection in connections.values() {
            if let Err(err) = connection.closer.close() {
                tracing::debug!("Failed to close connection: {}", err);
            }
        }

        for (_, connection) in connections {
            connection.join_handle.join().ok();
        }
    }
}

/// A host running on its own thread. Dropping the handle stops the host without
/// waiting for it.
pub struct HostHandle {
    stopper: HostStopper,
    local_addr: String,
    join_handle: Option<JoinHandle<()>>,
}

impl HostHandle {
    pub fn local_addr(&self) -> &str {
        &self.local_addr
    }

    pub fn stopper(&self) -> HostStopper {
        self.stopper.clone()
    }

    /// Stop accepting, close open connections and wait for every thread to finish.
    pub fn stop(mut self) {
        self.stopper.stop();
        if let Some(handle) = self.join_handle.take() {
            handle.join().ok();
        }
    }
}

impl Drop for HostHandle {
    fn drop(&mut self) {
        self.stopper.stop();
    }
}
