//! Connection pool for the memcake façade.
//!
//! Fixed-size pool with round-robin dispatch and lazy reconnection. Slots
//! start vacant and are filled on first use; a connection that fails
//! terminally is vacated by the façade and replaced the next time its slot
//! comes around.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::debug;

use crate::connection::Connection;
use crate::error::{Error, Result};

enum Slot {
    Connected(Arc<Connection>),
    Vacant,
}

struct Slots {
    entries: Vec<Slot>,
    next: usize,
}

pub(crate) struct Pool {
    addr: SocketAddr,
    slots: Mutex<Slots>,
}

impl Pool {
    /// Create a pool of `size` slots for one server address. All slots
    /// start vacant; nothing connects until the first acquire.
    pub(crate) fn new(addr: SocketAddr, size: usize) -> Pool {
        let mut entries = Vec::with_capacity(size.max(1));
        for _ in 0..size.max(1) {
            entries.push(Slot::Vacant);
        }
        Pool {
            addr,
            slots: Mutex::new(Slots { entries, next: 0 }),
        }
    }

    /// Get a connection from the next healthy slot.
    ///
    /// Advances the round-robin cursor. Vacant (or terminally failed)
    /// slots are reconnected on the spot. Returns
    /// [`Error::AllConnectionsFailed`] after a full sweep of failures.
    pub(crate) async fn acquire(&self) -> Result<Arc<Connection>> {
        let size = self.slots.lock().unwrap().entries.len();

        for _ in 0..size {
            let index = {
                let mut slots = self.slots.lock().unwrap();
                let index = slots.next;
                slots.next = (slots.next + 1) % size;

                let live = match &slots.entries[index] {
                    Slot::Connected(conn) if !conn.is_closed() => Some(conn.clone()),
                    _ => None,
                };
                if let Some(conn) = live {
                    return Ok(conn);
                }
                slots.entries[index] = Slot::Vacant;
                index
            };

            match Connection::open(self.addr).await {
                Ok(conn) => {
                    debug!("opened connection for slot {index}");
                    let conn = Arc::new(conn);
                    self.slots.lock().unwrap().entries[index] = Slot::Connected(conn.clone());
                    return Ok(conn);
                }
                Err(error) => {
                    debug!("connect to {} failed: {error}", self.addr);
                }
            }
        }
        Err(Error::AllConnectionsFailed)
    }

    /// Vacate the slot holding this connection so the next acquire
    /// replaces it.
    pub(crate) fn mark_dead(&self, dead: &Arc<Connection>) {
        let mut slots = self.slots.lock().unwrap();
        for slot in &mut slots.entries {
            if let Slot::Connected(conn) = slot {
                if Arc::ptr_eq(conn, dead) {
                    *slot = Slot::Vacant;
                    return;
                }
            }
        }
    }

    /// Close every live connection: quit is sent on each, bounded by
    /// `timeout`, before the sockets are torn down.
    pub(crate) async fn close_all(&self, timeout: Duration) {
        let connections: Vec<Arc<Connection>> = {
            let mut slots = self.slots.lock().unwrap();
            slots
                .entries
                .iter_mut()
                .filter_map(|slot| match std::mem::replace(slot, Slot::Vacant) {
                    Slot::Connected(conn) => Some(conn),
                    Slot::Vacant => None,
                })
                .collect()
        };

        for conn in connections {
            conn.close(timeout).await;
        }
    }

    /// Number of currently connected slots.
    pub(crate) fn connected_count(&self) -> usize {
        self.slots
            .lock()
            .unwrap()
            .entries
            .iter()
            .filter(|slot| matches!(slot, Slot::Connected(conn) if !conn.is_closed()))
            .count()
    }
}
