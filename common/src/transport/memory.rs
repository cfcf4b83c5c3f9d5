//! In-process transport over crossbeam channels. Used by tests and the tester binary.

use std::{
    io::{self, Read, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use super::{Connection, ConnectionCloser, Connector, Listener};

const PIPE_BUF_SIZE: usize = 4096;
const PIPE_CAPACITY: usize = 256;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

struct BytePipeSnd {
    snd: Sender<Vec<u8>>,
    kill_signal: Arc<AtomicBool>,
    current_buf: Vec<u8>,
}

impl BytePipeSnd {
    fn is_killed(&self) -> bool {
        self.kill_signal.load(Ordering::Relaxed)
    }

    fn send_buf(&mut self) -> io::Result<()> {
        if self.current_buf.is_empty() {
            return Ok(());
        }

        let mut buf = std::mem::take(&mut self.current_buf);
        loop {
            if self.is_killed() {
                return Err(io::ErrorKind::BrokenPipe.into());
            }

            // A timeout just means the reader is slow; check the kill signal and retry
            match self.snd.send_timeout(buf, POLL_INTERVAL) {
                Ok(()) => return Ok(()),
                Err(err) if err.is_timeout() => buf = err.into_inner(),
                Err(_) => return Err(io::ErrorKind::BrokenPipe.into()),
            }
        }
    }
}

impl io::Write for BytePipeSnd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.is_killed() {
            return Err(io::ErrorKind::BrokenPipe.into());
        }

        let room = PIPE_BUF_SIZE - self.current_buf.len();
        let written = room.min(buf.len());
        self.current_buf.extend_from_slice(&buf[..written]);

        if self.current_buf.len() == PIPE_BUF_SIZE {
            self.send_buf()?;
        }

        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buf()
    }
}

struct BytePipeRcv {
    rcv: Receiver<Vec<u8>>,
    kill_signal: Arc<AtomicBool>,
    last_buf: Vec<u8>,
    pos: usize,
    read_timeout: Option<Duration>,
}

impl BytePipeRcv {
    /// The next buffer, or None at end of stream. Buffers already queued are still
    /// delivered after a kill.
    fn get_next(&self) -> io::Result<Option<Vec<u8>>> {
        let deadline = self.read_timeout.map(|timeout| Instant::now() + timeout);

        loop {
            if let Ok(buf) = self.rcv.try_recv() {
                return Ok(Some(buf));
            }

            if self.kill_signal.load(Ordering::Relaxed) {
                return Ok(None);
            }

            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(io::ErrorKind::TimedOut.into());
                    }
                    POLL_INTERVAL.min(deadline - now)
                }
                None => POLL_INTERVAL,
            };

            match self.rcv.recv_timeout(wait) {
                Ok(buf) => return Ok(Some(buf)),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Ok(None),
            }
        }
    }
}

impl io::Read for BytePipeRcv {
    /// Blocks only until at least one byte is available.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        while self.pos == self.last_buf.len() {
            match self.get_next()? {
                Some(next) => {
                    self.last_buf = next;
                    self.pos = 0;
                }
                None => return Ok(0),
            }
        }

        let available = &self.last_buf[self.pos..];
        let len = available.len().min(buf.len());
        buf[..len].copy_from_slice(&available[..len]);
        self.pos += len;

        Ok(len)
    }
}

fn make_pipe(kill_signal: Arc<AtomicBool>) -> (BytePipeSnd, BytePipeRcv) {
    let (snd, rcv) = crossbeam_channel::bounded(PIPE_CAPACITY);
    (
        BytePipeSnd {
            snd,
            kill_signal: kill_signal.clone(),
            current_buf: Vec::with_capacity(PIPE_BUF_SIZE),
        },
        BytePipeRcv {
            rcv,
            kill_signal,
            last_buf: Vec::new(),
            pos: 0,
            read_timeout: None,
        },
    )
}

/// One end of an in-memory duplex connection. Both ends share one kill signal.
struct MemoryConnection {
    peer: String,
    snd: BytePipeSnd,
    rcv: BytePipeRcv,
    kill_signal: Arc<AtomicBool>,
}

impl io::Read for MemoryConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.rcv.read(buf)
    }
}

impl io::Write for MemoryConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.snd.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.snd.flush()
    }
}

struct MemoryCloser(Arc<AtomicBool>);

impl ConnectionCloser for MemoryCloser {
    fn close(&self) -> io::Result<()> {
        self.0.store(true, Ordering::Relaxed);
        Ok(())
    }
}

impl Connection for MemoryConnection {
    fn shutdown(&self) -> io::Result<()> {
        self.kill_signal.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn try_clone_closer(&self) -> io::Result<Box<dyn ConnectionCloser>> {
        Ok(Box::new(MemoryCloser(self.kill_signal.clone())))
    }

    fn peer(&self) -> String {
        self.peer.clone()
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.rcv.read_timeout = timeout;
        Ok(())
    }
}

fn connection_pair(id: u64) -> (MemoryConnection, MemoryConnection) {
    let kill_signal = Arc::new(AtomicBool::new(false));
    let (client_snd, host_rcv) = make_pipe(kill_signal.clone());
    let (host_snd, client_rcv) = make_pipe(kill_signal.clone());

    (
        MemoryConnection {
            peer: "memory-host".to_string(),
            snd: client_snd,
            rcv: client_rcv,
            kill_signal: kill_signal.clone(),
        },
        MemoryConnection {
            peer: format!("memory-client-{}", id),
            snd: host_snd,
            rcv: host_rcv,
            kill_signal,
        },
    )
}

pub struct MemoryListener {
    incoming: Receiver<MemoryConnection>,
}

impl Listener for MemoryListener {
    fn accept(&self, timeout: Duration) -> io::Result<Option<Box<dyn Connection>>> {
        match self.incoming.recv_timeout(timeout) {
            Ok(connection) => Ok(Some(Box::new(connection))),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            // No connector left, so nothing will ever arrive. Idle like a quiet listener.
            Err(RecvTimeoutError::Disconnected) => {
                std::thread::sleep(timeout);
                Ok(None)
            }
        }
    }

    fn local_addr(&self) -> String {
        "memory-host".to_string()
    }
}

#[derive(Clone)]
pub struct MemoryConnector {
    outgoing: Sender<MemoryConnection>,
    next_id: Arc<std::sync::atomic::AtomicU64>,
}

impl Connector for MemoryConnector {
    fn connect(&self) -> io::Result<Box<dyn Connection>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (client, host) = connection_pair(id);

        self.outgoing
            .send(host)
            .map_err(|_| io::Error::from(io::ErrorKind::ConnectionRefused))?;

        Ok(Box::new(client))
    }
}

/// A listener and a connector joined in memory. Connectors can be cloned freely.
pub fn memory_transport() -> (MemoryListener, MemoryConnector) {
    let (outgoing, incoming) = crossbeam_channel::unbounded();
    (
        MemoryListener { incoming },
        MemoryConnector {
            outgoing,
            next_id: Arc::new(std::sync::atomic::AtomicU64::new(1)),
        },
    )
}
