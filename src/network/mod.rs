//! Network layer serving the shared VM over TCP.
//!
//! - [`protocol`]: Frame layout, methods, status codes and payload records
//! - [`handlers`]: One handler per method, operating on the shared VM
//! - [`connection`]: Per-client state machine (read, respond, execute)
//! - [`connection_table`]: Slot table of live connections and their poll set
//! - [`transport`]: Non-blocking transport trait and its TCP implementation
//! - [`local_transport`]: In-memory transport for testing
//! - [`server`]: Reactor loop and server configuration
//! - [`client`]: Async client implementing the chunked upload/download contracts

pub mod client;
pub mod connection;
pub mod connection_table;
pub mod handlers;
pub mod local_transport;
pub mod protocol;
pub mod server;
pub mod transport;
