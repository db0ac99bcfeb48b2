//! Non-blocking byte transport used by the connection state machine.
//!
//! The state machine never awaits inside a tick: it performs one `try_*`
//! call, and the reactor awaits readiness through [`Transport::ready`]
//! between ticks.

use crate::types::wrapper_types::BoxFuture;
use std::io;
use tokio::io::Interest;
use tokio::net::TcpStream;

/// A byte stream with non-blocking reads and writes.
///
/// `try_read` and `try_write` follow the tokio conventions: `Ok(0)` from a read
/// means the peer closed its half, and `ErrorKind::WouldBlock` means no progress
/// is possible until the transport becomes ready again.
pub trait Transport: Send + Sync {
    /// Reads whatever is available into `buf`.
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes as much of `buf` as the transport accepts.
    fn try_write(&self, buf: &[u8]) -> io::Result<usize>;

    /// Resolves once the transport is ready for the given interest.
    fn ready(&self, interest: Interest) -> BoxFuture<'_, io::Result<()>>;

    /// Human readable peer address, for logs.
    fn peer(&self) -> String;
}

impl Transport for TcpStream {
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        TcpStream::try_read(self, buf)
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        TcpStream::try_write(self, buf)
    }

    fn ready(&self, interest: Interest) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move { TcpStream::ready(self, interest).await.map(|_| ()) })
    }

    fn peer(&self) -> String {
        self.peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "<unknown>".to_string())
    }
}
