//! Byte stream transports a channel can run over.

use std::{io, time::Duration};

mod memory;
mod tcp;

pub use memory::{memory_transport, MemoryConnector, MemoryListener};
pub use tcp::{TcpConnector, TcpListenerTransport};

/// One established, bidirectional byte stream.
pub trait Connection: io::Read + io::Write + Send {
    /// Close both directions. Blocked reads on either side end.
    fn shutdown(&self) -> io::Result<()>;

    /// A handle that can shut this connection down from another thread.
    fn try_clone_closer(&self) -> io::Result<Box<dyn ConnectionCloser>>;

    /// Peer description for logs.
    fn peer(&self) -> String;

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;
}

pub trait ConnectionCloser: Send + Sync {
    fn close(&self) -> io::Result<()>;
}

pub trait Listener: Send {
    /// Wait up to `timeout` for a connection. `Ok(None)` when none arrived in time.
    fn accept(&self, timeout: Duration) -> io::Result<Option<Box<dyn Connection>>>;

    fn local_addr(&self) -> String;
}

pub trait Connector: Send + Sync {
    fn connect(&self) -> io::Result<Box<dyn Connection>>;
}
