//! In-memory transport for driving connections in tests.
//!
//! A [`LocalTransport`] is a pair of byte queues shared between the connection
//! under test (which sees it through [`Transport`]) and the test itself, which
//! feeds inbound bytes, closes the peer half and collects what was written.
//! Reads and writes never block; an empty inbound queue reports `WouldBlock`
//! until the peer is closed, after which it reports end of stream.

use crate::network::transport::Transport;
use crate::types::wrapper_types::BoxFuture;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::Interest;

#[derive(Debug, Default)]
struct Pipe {
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
    closed: bool,
    /// Bytes the outbound side still accepts; `None` means unlimited.
    write_capacity: Option<usize>,
}

/// Cloneable handle to an in-memory byte pipe.
#[derive(Clone, Debug, Default)]
pub struct LocalTransport {
    pipe: Arc<Mutex<Pipe>>,
    name: String,
}

impl LocalTransport {
    pub fn new(name: &str) -> Self {
        Self {
            pipe: Arc::default(),
            name: name.to_string(),
        }
    }

    fn pipe(&self) -> MutexGuard<'_, Pipe> {
        self.pipe.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues bytes for the connection to read.
    pub fn feed(&self, bytes: &[u8]) {
        self.pipe().inbound.extend(bytes);
    }

    /// Closes the peer's sending half.
    pub fn close(&self) {
        self.pipe().closed = true;
    }

    /// Takes everything the connection has written so far.
    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut self.pipe().outbound)
    }

    /// Limits how many more bytes writes accept before reporting `WouldBlock`.
    pub fn set_write_capacity(&self, capacity: Option<usize>) {
        self.pipe().write_capacity = capacity;
    }

    /// Number of inbound bytes not read yet.
    pub fn pending_input(&self) -> usize {
        self.pipe().inbound.len()
    }
}

impl Transport for LocalTransport {
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut pipe = self.pipe();
        if pipe.inbound.is_empty() {
            return if pipe.closed {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }

        let n = buf.len().min(pipe.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(pipe.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut pipe = self.pipe();
        let n = match pipe.write_capacity {
            Some(0) => return Err(io::ErrorKind::WouldBlock.into()),
            Some(capacity) => capacity.min(buf.len()),
            None => buf.len(),
        };
        if let Some(capacity) = pipe.write_capacity.as_mut() {
            *capacity -= n;
        }
        pipe.outbound.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn ready(&self, _interest: Interest) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn peer(&self) -> String {
        self.name.clone()
    }
}
