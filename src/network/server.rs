//! Single-threaded reactor serving every client from one shared VM.
//!
//! The server owns the listener, the connection table and the [`Vm`]. Each
//! iteration it waits for a new client, readiness on any connection, or a
//! shutdown signal; when some connection can progress without I/O (it is
//! running a program or has frames buffered) it only yields to the runtime
//! instead of waiting. Then every connection is ticked once and finished
//! connections are dropped.

use crate::network::connection::Connection;
use crate::network::connection_table::ConnectionTable;
use crate::types::wrapper_types::BoxFuture;
use crate::virtual_machine::vm::budget::DEFAULT_SLICE_BUDGET;
use crate::virtual_machine::vm::Vm;
use crate::{debug, info, warn};
use futures::future::select_all;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 8080;
/// Default cap on simultaneously open connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;

/// Configuration options for the server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Address the listener binds to.
    pub listen_addr: SocketAddr,
    /// Instructions a running program may execute per reactor tick.
    pub slice_budget: u32,
    /// Connections beyond this many are closed right after accept.
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            slice_budget: DEFAULT_SLICE_BUDGET,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

enum Event {
    Shutdown,
    Accepted(io::Result<(TcpStream, SocketAddr)>),
    Ready,
}

pub struct Server {
    config: ServerConfig,
    listener: TcpListener,
    table: ConnectionTable<TcpStream>,
    vm: Vm,
}

impl Server {
    /// Binds the listener. Nothing is served until [`Server::run`].
    pub async fn bind(config: ServerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        Ok(Self {
            config,
            listener,
            table: ConnectionTable::new(),
            vm: Vm::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves clients until `shutdown` resolves or its sender is dropped,
    /// then closes every connection and hands back the VM.
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) -> Vm {
        match self.local_addr() {
            Ok(addr) => info!("listening on {addr}"),
            Err(err) => warn!("listening on an unknown address: {err}"),
        }

        loop {
            let busy = self.table.any_ready_now();
            let event = tokio::select! {
                biased;
                _ = &mut shutdown => Event::Shutdown,
                accepted = self.listener.accept() => Event::Accepted(accepted),
                _ = wait_any(self.table.poll_set()), if !busy => Event::Ready,
                _ = tokio::task::yield_now(), if busy => Event::Ready,
            };

            match event {
                Event::Shutdown => break,
                Event::Accepted(Ok((stream, addr))) => self.accept(stream, addr),
                Event::Accepted(Err(err)) => warn!("accept failed: {err}"),
                Event::Ready => {}
            }
            self.tick_all();
        }

        info!(
            "shutting down, closing {} connection(s)",
            self.table.len()
        );
        self.vm
    }

    fn accept(&mut self, stream: TcpStream, addr: SocketAddr) {
        if self.table.len() >= self.config.max_connections {
            warn!(
                "refusing {addr}: {} connections already open",
                self.table.len()
            );
            return;
        }
        if let Err(err) = stream.set_nodelay(true) {
            debug!("{addr}: could not disable Nagle: {err}");
        }
        let id = self.table.insert(Connection::new(stream));
        info!("accepted {addr} as connection {id}");
    }

    /// Gives every connection one non-blocking step, then drops the finished
    /// ones.
    fn tick_all(&mut self) {
        let budget = self.config.slice_budget;
        for (id, conn) in self.table.iter_mut() {
            conn.tick(&mut self.vm, budget);
            if conn.is_closed() {
                debug!("connection {id} finished");
            }
        }
        self.table.reap();
    }
}

/// Resolves once any readiness future does, or never if there are none.
async fn wait_any(set: Vec<BoxFuture<'_, io::Result<()>>>) {
    if set.is_empty() {
        std::future::pending::<()>().await;
    } else {
        let _ = select_all(set).await;
    }
}
