//! A pipelined connection to a single memcached server.
//!
//! One TCP socket carries many in-flight commands at once. Each submission
//! allocates a 32-bit opaque token, records a responder under it, and
//! queues the encoded frame for a single writer task; a single reader task
//! frames 24-byte headers, reads the sized body, and resolves the matching
//! responder by opaque. Quiet commands respond only on error, so their
//! responders also sit in a FIFO buffer that is drained to implicit
//! success whenever a later non-quiet response arrives.
//!
//! The connection never recovers from an I/O or protocol fault: the first
//! such error is stored, every live responder fails with it, and all later
//! submissions are rejected with the same error. Replacement is the
//! pool's job.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use bytes::Bytes;
use log::{debug, warn};
use memcake_proto::{Body, Command, HEADER_SIZE, ParseError, ResponseHeader};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::responder::Responder;
use crate::value::{Counter, Value, Version};

/// One command awaiting its response.
///
/// `seq` is a monotonically increasing submission number. The wire opaque
/// is only 32 bits and wraps, so quiet-buffer ordering is decided by `seq`
/// rather than by comparing opaques.
struct InFlight {
    seq: u64,
    responder: Responder,
}

struct State {
    in_flight: HashMap<u32, InFlight>,
    /// Quiet commands in submission order, awaiting an implicit-success
    /// fence. Entries also live in `in_flight` so an error can find them.
    quiet: VecDeque<(u64, u32)>,
    next_seq: u64,
    next_opaque: u32,
    /// Commands that hit their deadline. A non-zero count makes responses
    /// for unknown opaques a discardable late arrival instead of a
    /// protocol violation.
    expired: u64,
    /// First terminal error wins; set once, read by every later submit.
    terminal: Option<Error>,
}

struct Inner {
    state: Mutex<State>,
    queue: mpsc::UnboundedSender<Vec<u8>>,
}

/// A live connection to one memcached server.
///
/// All methods take `&self`; submissions are thread-safe and may be
/// pipelined freely. Dropping the connection aborts its I/O tasks.
pub struct Connection {
    inner: Arc<Inner>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Connection {
    /// Open a TCP connection and start the reader and writer tasks.
    pub async fn open(addr: SocketAddr) -> Result<Connection> {
        let stream = TcpStream::connect(addr).await.map_err(Error::from_io)?;
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();

        let (queue, queue_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            state: Mutex::new(State {
                in_flight: HashMap::new(),
                quiet: VecDeque::new(),
                next_seq: 0,
                next_opaque: 0,
                expired: 0,
                terminal: None,
            }),
            queue,
        });

        let writer = tokio::spawn(write_loop(inner.clone(), write_half, queue_rx));
        let reader = tokio::spawn(read_loop(inner.clone(), read_half));

        Ok(Connection {
            inner,
            reader,
            writer,
        })
    }

    /// Returns true once a terminal error is set (or the connection was
    /// explicitly closed).
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().unwrap().terminal.is_some()
    }

    /// Send `quit`, wait up to `timeout` for the acknowledgement, then
    /// tear the connection down. Later submissions fail with
    /// [`Error::Closed`].
    pub async fn close(&self, timeout: Duration) {
        if !self.is_closed() {
            let _ = self.quit(timeout).await;
        }
        self.inner.fail(Error::Closed);
        self.reader.abort();
        self.writer.abort();
    }

    // -- Storage commands ----------------------------------------------------

    pub async fn set(
        &self,
        key: &[u8],
        value: &[u8],
        flags: u32,
        expires: u32,
        cas: Version,
        timeout: Duration,
    ) -> Result<Version> {
        self.submit_store(
            Command::Set { key, value, flags, expires, cas: cas.token() },
            timeout,
        )
        .await
    }

    pub async fn setq(
        &self,
        key: &[u8],
        value: &[u8],
        flags: u32,
        expires: u32,
        cas: Version,
        timeout: Duration,
    ) -> Result<()> {
        self.submit_unit(
            Command::SetQ { key, value, flags, expires, cas: cas.token() },
            timeout,
        )
        .await
    }

    pub async fn add(
        &self,
        key: &[u8],
        value: &[u8],
        flags: u32,
        expires: u32,
        timeout: Duration,
    ) -> Result<Version> {
        self.submit_store(Command::Add { key, value, flags, expires }, timeout)
            .await
    }

    pub async fn addq(
        &self,
        key: &[u8],
        value: &[u8],
        flags: u32,
        expires: u32,
        timeout: Duration,
    ) -> Result<()> {
        self.submit_unit(Command::AddQ { key, value, flags, expires }, timeout)
            .await
    }

    pub async fn replace(
        &self,
        key: &[u8],
        value: &[u8],
        flags: u32,
        expires: u32,
        cas: Version,
        timeout: Duration,
    ) -> Result<Version> {
        self.submit_store(
            Command::Replace { key, value, flags, expires, cas: cas.token() },
            timeout,
        )
        .await
    }

    pub async fn replaceq(
        &self,
        key: &[u8],
        value: &[u8],
        flags: u32,
        expires: u32,
        cas: Version,
        timeout: Duration,
    ) -> Result<()> {
        self.submit_unit(
            Command::ReplaceQ { key, value, flags, expires, cas: cas.token() },
            timeout,
        )
        .await
    }

    pub async fn append(
        &self,
        key: &[u8],
        value: &[u8],
        cas: Version,
        timeout: Duration,
    ) -> Result<Version> {
        self.submit_store(Command::Append { key, value, cas: cas.token() }, timeout)
            .await
    }

    pub async fn appendq(
        &self,
        key: &[u8],
        value: &[u8],
        cas: Version,
        timeout: Duration,
    ) -> Result<()> {
        self.submit_unit(Command::AppendQ { key, value, cas: cas.token() }, timeout)
            .await
    }

    pub async fn prepend(
        &self,
        key: &[u8],
        value: &[u8],
        cas: Version,
        timeout: Duration,
    ) -> Result<Version> {
        self.submit_store(Command::Prepend { key, value, cas: cas.token() }, timeout)
            .await
    }

    pub async fn prependq(
        &self,
        key: &[u8],
        value: &[u8],
        cas: Version,
        timeout: Duration,
    ) -> Result<()> {
        self.submit_unit(Command::PrependQ { key, value, cas: cas.token() }, timeout)
            .await
    }

    // -- Retrieval commands --------------------------------------------------

    pub async fn get(&self, key: &[u8], timeout: Duration) -> Result<Option<Value>> {
        self.submit_fetch(Command::Get { key }, timeout).await
    }

    /// Quiet get: a miss produces no response at all, so the returned
    /// future resolves to `None` only once a later non-quiet response
    /// fences it.
    pub async fn getq(&self, key: &[u8], timeout: Duration) -> Result<Option<Value>> {
        self.submit_fetch(Command::GetQ { key }, timeout).await
    }

    pub async fn getk(&self, key: &[u8], timeout: Duration) -> Result<Option<Value>> {
        self.submit_fetch(Command::GetK { key }, timeout).await
    }

    pub async fn getkq(&self, key: &[u8], timeout: Duration) -> Result<Option<Value>> {
        self.submit_fetch(Command::GetKQ { key }, timeout).await
    }

    // -- Everything else -----------------------------------------------------

    pub async fn delete(&self, key: &[u8], cas: Version, timeout: Duration) -> Result<()> {
        self.submit_unit(Command::Delete { key, cas: cas.token() }, timeout)
            .await
    }

    pub async fn deleteq(&self, key: &[u8], cas: Version, timeout: Duration) -> Result<()> {
        self.submit_unit(Command::DeleteQ { key, cas: cas.token() }, timeout)
            .await
    }

    pub async fn increment(
        &self,
        key: &[u8],
        delta: u64,
        initial: u64,
        expires: u32,
        cas: Version,
        timeout: Duration,
    ) -> Result<Counter> {
        self.submit_counter(
            Command::Increment { key, delta, initial, expires, cas: cas.token() },
            timeout,
        )
        .await
    }

    pub async fn incrementq(
        &self,
        key: &[u8],
        delta: u64,
        initial: u64,
        expires: u32,
        cas: Version,
        timeout: Duration,
    ) -> Result<()> {
        self.submit_unit(
            Command::IncrementQ { key, delta, initial, expires, cas: cas.token() },
            timeout,
        )
        .await
    }

    pub async fn decrement(
        &self,
        key: &[u8],
        delta: u64,
        initial: u64,
        expires: u32,
        cas: Version,
        timeout: Duration,
    ) -> Result<Counter> {
        self.submit_counter(
            Command::Decrement { key, delta, initial, expires, cas: cas.token() },
            timeout,
        )
        .await
    }

    pub async fn decrementq(
        &self,
        key: &[u8],
        delta: u64,
        initial: u64,
        expires: u32,
        cas: Version,
        timeout: Duration,
    ) -> Result<()> {
        self.submit_unit(
            Command::DecrementQ { key, delta, initial, expires, cas: cas.token() },
            timeout,
        )
        .await
    }

    pub async fn flush(&self, expires: u32, timeout: Duration) -> Result<()> {
        self.submit_unit(Command::Flush { expires }, timeout).await
    }

    pub async fn flushq(&self, expires: u32, timeout: Duration) -> Result<()> {
        self.submit_unit(Command::FlushQ { expires }, timeout).await
    }

    pub async fn noop(&self, timeout: Duration) -> Result<()> {
        self.submit_unit(Command::Noop, timeout).await
    }

    pub async fn version(&self, timeout: Duration) -> Result<String> {
        let (sender, receiver) = oneshot::channel();
        self.submit(Command::Version, timeout, Responder::Text(Some(sender)));
        resolve(receiver).await
    }

    pub async fn quit(&self, timeout: Duration) -> Result<()> {
        self.submit_unit(Command::Quit, timeout).await
    }

    pub async fn quitq(&self, timeout: Duration) -> Result<()> {
        self.submit_unit(Command::QuitQ, timeout).await
    }

    /// Request server statistics, optionally scoped to a statistics group
    /// such as `items` or `slabs`. Entries stream in one response per pair
    /// and the future resolves on the terminator.
    pub async fn stat(
        &self,
        key: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<BTreeMap<String, String>> {
        let (sender, receiver) = oneshot::channel();
        self.submit(
            Command::Stat { key },
            timeout,
            Responder::Stats { sender: Some(sender), entries: BTreeMap::new() },
        );
        resolve(receiver).await
    }

    // -- Submission ----------------------------------------------------------

    async fn submit_store(&self, command: Command<'_>, timeout: Duration) -> Result<Version> {
        let (sender, receiver) = oneshot::channel();
        self.submit(command, timeout, Responder::Store(Some(sender)));
        resolve(receiver).await
    }

    async fn submit_fetch(&self, command: Command<'_>, timeout: Duration) -> Result<Option<Value>> {
        let (sender, receiver) = oneshot::channel();
        self.submit(command, timeout, Responder::Fetch(Some(sender)));
        resolve(receiver).await
    }

    async fn submit_counter(&self, command: Command<'_>, timeout: Duration) -> Result<Counter> {
        let (sender, receiver) = oneshot::channel();
        self.submit(command, timeout, Responder::Counter(Some(sender)));
        resolve(receiver).await
    }

    async fn submit_unit(&self, command: Command<'_>, timeout: Duration) -> Result<()> {
        let (sender, receiver) = oneshot::channel();
        self.submit(command, timeout, Responder::Unit(Some(sender)));
        resolve(receiver).await
    }

    /// Register the responder and queue the encoded frame.
    ///
    /// The in-flight entry is inserted before the bytes can reach the
    /// wire, so a response can never beat its responder into the map. The
    /// allocation, insertion, and queue push happen under one lock, which
    /// makes submission order, quiet-buffer order, and write order agree.
    fn submit(&self, command: Command<'_>, timeout: Duration, mut responder: Responder) {
        if let Some(key) = command.key() {
            if key.len() > u16::MAX as usize {
                responder.fail(Error::Protocol(ParseError::Protocol(
                    "key exceeds 65535 bytes",
                )));
                return;
            }
        }

        let quiet = command.is_quiet();
        let (seq, opaque) = {
            let mut state = self.inner.state.lock().unwrap();
            let terminal = state.terminal.clone();
            if let Some(error) = terminal {
                drop(state);
                responder.fail(error);
                return;
            }

            let seq = state.next_seq;
            state.next_seq += 1;

            // Skip opaques still occupied by abandoned entries; keeps
            // in-flight tokens distinct across 32-bit wraparound.
            let mut opaque = state.next_opaque;
            while state.in_flight.contains_key(&opaque) {
                opaque = opaque.wrapping_add(1);
            }
            state.next_opaque = opaque.wrapping_add(1);

            let frame = command.encode(opaque);
            state.in_flight.insert(opaque, InFlight { seq, responder });
            if quiet {
                state.quiet.push_back((seq, opaque));
            }

            // A closed queue means the writer died; its failure path
            // drains the map, including the entry inserted above.
            let _ = self.inner.queue.send(frame);
            (seq, opaque)
        };

        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(expire_after(inner, timeout, opaque, seq));
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Await the responder's outcome. The sender side only disappears without
/// resolving if the runtime tears the connection down mid-flight.
async fn resolve<T>(receiver: oneshot::Receiver<Result<T>>) -> Result<T> {
    receiver.await.unwrap_or(Err(Error::Closed))
}

async fn expire_after(inner: Weak<Inner>, timeout: Duration, opaque: u32, seq: u64) {
    tokio::time::sleep(timeout).await;
    if let Some(inner) = inner.upgrade() {
        inner.expire(opaque, seq);
    }
}

/// Drain the outbound queue, one frame at a time. `write_all` retries
/// partial writes internally; any error is terminal.
async fn write_loop(
    inner: Arc<Inner>,
    mut socket: OwnedWriteHalf,
    mut queue: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    while let Some(frame) = queue.recv().await {
        if let Err(error) = socket.write_all(&frame).await {
            inner.fail(Error::from_io(error));
            return;
        }
    }
}

/// Frame responses: exactly 24 header bytes, then exactly the body the
/// header promises, then dispatch by opaque.
async fn read_loop(inner: Arc<Inner>, mut socket: OwnedReadHalf) {
    let mut header_buf = [0u8; HEADER_SIZE];
    loop {
        if let Err(error) = socket.read_exact(&mut header_buf).await {
            inner.fail(Error::from_io(error));
            return;
        }
        let header = match ResponseHeader::parse(&header_buf) {
            Ok(header) => header,
            Err(error) => {
                inner.fail(Error::Protocol(error));
                return;
            }
        };

        let mut body = vec![0u8; header.total_body_length as usize];
        if let Err(error) = socket.read_exact(&mut body).await {
            inner.fail(Error::from_io(error));
            return;
        }

        if let Err(error) = inner.dispatch(&header, Bytes::from(body)) {
            inner.fail(error);
            return;
        }
    }
}

impl Inner {
    /// Route one response to its responder.
    ///
    /// Any non-quiet response first fences the quiet buffer: every quiet
    /// command submitted before the responding command is completed with
    /// implicit success. Then the response itself resolves, fails, or
    /// (for stat entries) feeds the matching responder.
    fn dispatch(&self, header: &ResponseHeader, body: Bytes) -> Result<()> {
        let mut state = self.state.lock().unwrap();

        let seq = match state.in_flight.get(&header.opaque) {
            Some(entry) => entry.seq,
            None if state.expired > 0 => {
                debug!(
                    "discarding response for expired opaque {:#010x}",
                    header.opaque
                );
                return Ok(());
            }
            None => return Err(Error::UnknownOpaque(header.opaque)),
        };

        if !header.opcode.is_quiet() {
            while let Some(&(quiet_seq, quiet_opaque)) = state.quiet.front() {
                if quiet_seq >= seq {
                    break;
                }
                state.quiet.pop_front();
                if let Some(mut entry) = state.in_flight.remove(&quiet_opaque) {
                    entry.responder.complete_quiet();
                }
            }
        }

        if header.status != 0 {
            if let Some(mut entry) = state.in_flight.remove(&header.opaque) {
                if header.opcode.is_quiet() {
                    state.quiet.retain(|&(_, opaque)| opaque != header.opaque);
                }
                entry.responder.fail(Error::Status {
                    code: header.status,
                    message: String::from_utf8_lossy(&body).into_owned(),
                });
            }
            return Ok(());
        }

        let parsed = Body::parse(header, body)?;
        let done = match state.in_flight.get_mut(&header.opaque) {
            Some(entry) => entry.responder.complete(header, parsed)?,
            None => return Ok(()),
        };
        if done {
            state.in_flight.remove(&header.opaque);
            if header.opcode.is_quiet() {
                state.quiet.retain(|&(_, opaque)| opaque != header.opaque);
            }
        }
        Ok(())
    }

    /// Deadline handler for one command.
    ///
    /// The caller's future fails now, but the entry stays in the map as a
    /// tombstone: the quiet-fence bookkeeping needs its sequence number,
    /// and the reader uses it to recognize the late response when (if) it
    /// arrives. The matching `seq` check keeps a recycled opaque from
    /// expiring a newer command.
    fn expire(&self, opaque: u32, seq: u64) {
        let mut state = self.state.lock().unwrap();
        if state.terminal.is_some() {
            return;
        }
        if let Some(entry) = state.in_flight.get_mut(&opaque) {
            if entry.seq == seq && !entry.responder.is_done() {
                entry.responder.fail(Error::TimedOut);
                state.expired += 1;
            }
        }
    }

    /// Terminal failure: first error wins, every live responder fails
    /// with it, and all later submissions are rejected with the same
    /// error.
    fn fail(&self, error: Error) {
        let mut state = self.state.lock().unwrap();
        if state.terminal.is_some() {
            return;
        }
        if !matches!(error, Error::Closed) {
            warn!("connection failed: {error}");
        }
        state.terminal = Some(error.clone());
        state.quiet.clear();
        for (_, mut entry) in state.in_flight.drain() {
            entry.responder.fail(error.clone());
        }
    }
}
