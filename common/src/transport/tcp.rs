use std::{
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    time::{Duration, Instant},
};

use super::{Connection, ConnectionCloser, Connector, Listener};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// TCP listener polled in non-blocking mode, so an accept loop can check for a stop
/// request between connections.
pub struct TcpListenerTransport {
    listener: TcpListener,
}

impl TcpListenerTransport {
    pub fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self { listener })
    }

    pub fn socket_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Listener for TcpListenerTransport {
    fn accept(&self, timeout: Duration) -> io::Result<Option<Box<dyn Connection>>> {
        let deadline = Instant::now() + timeout;

        loop {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    stream.set_nonblocking(false)?;
                    stream.set_nodelay(true)?;
                    return Ok(Some(Box::new(TcpConnection(stream))));
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Ok(None);
                    }
                    std::thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn local_addr(&self) -> String {
        self.listener
            .local_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "tcp:unknown".to_string())
    }
}

pub struct TcpConnector {
    addr: SocketAddr,
}

impl TcpConnector {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

impl Connector for TcpConnector {
    fn connect(&self) -> io::Result<Box<dyn Connection>> {
        let stream = TcpStream::connect(self.addr)?;
        stream.set_nodelay(true)?;
        Ok(Box::new(TcpConnection(stream)))
    }
}

struct TcpConnection(TcpStream);

impl io::Read for TcpConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl io::Write for TcpConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

fn shutdown_stream(stream: &TcpStream) -> io::Result<()> {
    match stream.shutdown(Shutdown::Both) {
        // Already closed by the peer
        Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
        result => result,
    }
}

impl Connection for TcpConnection {
    fn shutdown(&self) -> io::Result<()> {
        shutdown_stream(&self.0)
    }

    fn try_clone_closer(&self) -> io::Result<Box<dyn ConnectionCloser>> {
        Ok(Box::new(TcpCloser(self.0.try_clone()?)))
    }

    fn peer(&self) -> String {
        self.0
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "tcp:disconnected".to_string())
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.0.set_read_timeout(timeout)
    }
}

struct TcpCloser(TcpStream);

impl ConnectionCloser for TcpCloser {
    fn close(&self) -> io::Result<()> {
        shutdown_stream(&self.0)
    }
}
