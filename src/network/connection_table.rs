//! Slot table of live connections.

use crate::network::connection::{Connection, Wants};
use crate::network::transport::Transport;
use crate::types::wrapper_types::BoxFuture;
use std::io;
use tokio::io::Interest;

/// Connections indexed by a slot id that stays stable for the connection's
/// lifetime. Freed slots are reused.
pub struct ConnectionTable<T> {
    slots: Vec<Option<Connection<T>>>,
    live: usize,
}

impl<T> Default for ConnectionTable<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            live: 0,
        }
    }
}

impl<T: Transport> ConnectionTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a connection and returns its slot id.
    pub fn insert(&mut self, conn: Connection<T>) -> usize {
        self.live += 1;
        match self.slots.iter().position(Option::is_none) {
            Some(id) => {
                self.slots[id] = Some(conn);
                id
            }
            None => {
                self.slots.push(Some(conn));
                self.slots.len() - 1
            }
        }
    }

    pub fn remove(&mut self, id: usize) -> Option<Connection<T>> {
        let conn = self.slots.get_mut(id)?.take()?;
        self.live -= 1;
        Some(conn)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection<T>> {
        self.slots.get_mut(id)?.as_mut()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut Connection<T>)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_mut().map(|conn| (id, conn)))
    }

    /// Drops every connection in the `End` state and returns how many went.
    pub fn reap(&mut self) -> usize {
        let mut reaped = 0;
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(Connection::is_closed) {
                *slot = None;
                reaped += 1;
            }
        }
        self.live -= reaped;
        reaped
    }

    /// Whether some connection can progress without waiting for I/O.
    pub fn any_ready_now(&self) -> bool {
        self.slots
            .iter()
            .flatten()
            .any(|conn| conn.wants() == Wants::Now)
    }

    /// One readiness future per connection waiting on I/O.
    pub fn poll_set(&self) -> Vec<BoxFuture<'_, io::Result<()>>> {
        self.slots
            .iter()
            .flatten()
            .filter_map(|conn| {
                let interest = match conn.wants() {
                    Wants::Readable => Interest::READABLE,
                    Wants::Writable => Interest::WRITABLE,
                    Wants::Now | Wants::Closed => return None,
                };
                Some(conn.transport().ready(interest))
            })
            .collect()
    }
}
