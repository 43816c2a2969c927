//! Asynchronous, pipelined memcached binary protocol client.
//!
//! [`Memcake`] owns a fixed-size pool of [`Connection`]s to one server and
//! exposes a fluent, future-based operation builder per protocol opcode.
//! Every connection multiplexes many in-flight commands over one socket,
//! matching responses to requests by opaque token, so callers pipeline
//! simply by not awaiting one future before submitting the next.
//!
//! Quiet opcodes (`setq`, `getq`, ...) respond only on error; their
//! futures resolve once a later non-quiet command (typically `noop`)
//! fences them. Fences act per connection, so drive a quiet pipeline and
//! its fence over a single [`Connection`], or size the pool to one.
//!
//! All key and value parameters accept `impl AsRef<[u8]>`, so you can
//! pass `&str`, `String`, `&[u8]`, `Vec<u8>`, etc.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use memcake::Memcake;
//!
//! # async fn example() -> Result<(), memcake::Error> {
//! let mc = Memcake::create(
//!     "127.0.0.1:11211".parse().unwrap(),
//!     4,
//!     Duration::from_secs(1),
//! );
//! mc.set("hello", "world").flags(1).execute().await?;
//! let value = mc.get("hello").execute().await?;
//! assert_eq!(value.unwrap().data.as_ref(), b"world");
//! mc.close().await;
//! # Ok(())
//! # }
//! ```

mod connection;
mod error;
mod ops;
mod pool;
mod responder;
mod value;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

pub use connection::Connection;
pub use error::{Error, Result};
pub use memcake_proto::{Opcode, Status};
pub use ops::{
    CounterOp, CounterQuietOp, DeleteOp, FlushOp, GetOp, NoopOp, StatOp, StoreOp, StoreQuietOp,
    VersionOp,
};
pub use value::{Counter, Value, Version};

use crate::pool::Pool;

/// Client façade: a connection pool plus per-opcode operation builders.
///
/// Operations are created with the builder methods (`set`, `get`,
/// `increment`, ...), optionally configured, and run with `execute()`.
/// Connections are opened lazily, reused across operations, and replaced
/// after terminal failures.
pub struct Memcake {
    pool: Pool,
    default_timeout: Duration,
}

impl Memcake {
    /// Create a client for one server address with up to
    /// `max_connections` pooled connections.
    ///
    /// Nothing connects until the first operation executes.
    /// `default_timeout` bounds every operation that does not override it
    /// with its own `timeout(..)`.
    pub fn create(addr: SocketAddr, max_connections: usize, default_timeout: Duration) -> Memcake {
        Memcake {
            pool: Pool::new(addr, max_connections),
            default_timeout,
        }
    }

    /// Gracefully shut down: sends `quit` on each pooled connection,
    /// waits up to the default timeout per connection, then closes the
    /// sockets.
    pub async fn close(&self) {
        self.pool.close_all(self.default_timeout).await;
    }

    /// Number of currently live pooled connections.
    pub fn connected_count(&self) -> usize {
        self.pool.connected_count()
    }

    pub(crate) fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Run one operation on a pooled connection.
    ///
    /// A terminal failure vacates the connection's slot so the next call
    /// opens a replacement; the error itself still reaches the caller,
    /// who retries by executing a new operation.
    pub(crate) async fn call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce(Arc<Connection>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let conn = self.pool.acquire().await?;
        let result = op(conn.clone()).await;
        if let Err(error) = &result {
            if error.is_terminal() {
                self.pool.mark_dead(&conn);
            }
        }
        result
    }
}
