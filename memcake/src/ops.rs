//! Fluent operation builders.
//!
//! Each builder carries the parameters for one opcode family, defaults
//! them sensibly (no flags, no expiry, no CAS constraint, the client's
//! default timeout), and submits through the pool on `execute()`. Quiet
//! variants get their own builder because their futures resolve to unit
//! rather than to a CAS token or counter.

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;

use crate::value::{Counter, Value, Version};
use crate::{Memcake, Result};

#[derive(Debug, Clone, Copy)]
enum StoreKind {
    Set,
    Add,
    Replace,
    Append,
    Prepend,
}

#[derive(Debug, Clone, Copy)]
enum GetKind {
    Get,
    GetQ,
    GetK,
    GetKQ,
}

#[derive(Debug, Clone, Copy)]
enum CounterKind {
    Increment,
    Decrement,
}

/// When a counter op has no initial value, this expiry tells the server
/// to fail on a missing key instead of creating it.
const COUNTER_NO_CREATE: u32 = 0xFFFF_FFFF;

fn counter_extras(initial: Option<u64>, expires: u32) -> (u64, u32) {
    match initial {
        Some(initial) => (initial, expires),
        None => (0, COUNTER_NO_CREATE),
    }
}

/// Builder for `set`, `add`, `replace`, `append`, and `prepend`.
/// Resolves to the stored item's new [`Version`].
pub struct StoreOp<'a> {
    client: &'a Memcake,
    kind: StoreKind,
    key: Bytes,
    value: Bytes,
    flags: u32,
    expires: u32,
    cas: Version,
    timeout: Duration,
}

impl StoreOp<'_> {
    /// Flags stored alongside the value. Ignored by append/prepend.
    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    /// Expiration in seconds (or a unix timestamp); 0 means never.
    /// Ignored by append/prepend.
    pub fn expires(mut self, expires: u32) -> Self {
        self.expires = expires;
        self
    }

    /// Only store if the server's current CAS token matches. Ignored by
    /// add, which requires the key to be absent anyway.
    pub fn cas(mut self, version: Version) -> Self {
        self.cas = version;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn execute(self) -> Result<Version> {
        let StoreOp { client, kind, key, value, flags, expires, cas, timeout } = self;
        client
            .call(move |conn| async move {
                match kind {
                    StoreKind::Set => conn.set(&key, &value, flags, expires, cas, timeout).await,
                    StoreKind::Add => conn.add(&key, &value, flags, expires, timeout).await,
                    StoreKind::Replace => {
                        conn.replace(&key, &value, flags, expires, cas, timeout).await
                    }
                    StoreKind::Append => conn.append(&key, &value, cas, timeout).await,
                    StoreKind::Prepend => conn.prepend(&key, &value, cas, timeout).await,
                }
            })
            .await
    }
}

/// Builder for the quiet storage variants (`setq`, `addq`, ...).
/// Resolves to unit on implicit success.
pub struct StoreQuietOp<'a> {
    client: &'a Memcake,
    kind: StoreKind,
    key: Bytes,
    value: Bytes,
    flags: u32,
    expires: u32,
    cas: Version,
    timeout: Duration,
}

impl StoreQuietOp<'_> {
    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn expires(mut self, expires: u32) -> Self {
        self.expires = expires;
        self
    }

    pub fn cas(mut self, version: Version) -> Self {
        self.cas = version;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn execute(self) -> Result<()> {
        let StoreQuietOp { client, kind, key, value, flags, expires, cas, timeout } = self;
        client
            .call(move |conn| async move {
                match kind {
                    StoreKind::Set => conn.setq(&key, &value, flags, expires, cas, timeout).await,
                    StoreKind::Add => conn.addq(&key, &value, flags, expires, timeout).await,
                    StoreKind::Replace => {
                        conn.replaceq(&key, &value, flags, expires, cas, timeout).await
                    }
                    StoreKind::Append => conn.appendq(&key, &value, cas, timeout).await,
                    StoreKind::Prepend => conn.prependq(&key, &value, cas, timeout).await,
                }
            })
            .await
    }
}

/// Builder for `get`, `getq`, `getk`, and `getkq`. Resolves to `None` on
/// a miss; the key field of the returned [`Value`] is populated by the
/// getk variants.
pub struct GetOp<'a> {
    client: &'a Memcake,
    kind: GetKind,
    key: Bytes,
    timeout: Duration,
}

impl GetOp<'_> {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn execute(self) -> Result<Option<Value>> {
        let GetOp { client, kind, key, timeout } = self;
        client
            .call(move |conn| async move {
                match kind {
                    GetKind::Get => conn.get(&key, timeout).await,
                    GetKind::GetQ => conn.getq(&key, timeout).await,
                    GetKind::GetK => conn.getk(&key, timeout).await,
                    GetKind::GetKQ => conn.getkq(&key, timeout).await,
                }
            })
            .await
    }
}

/// Builder for `delete` and `deleteq`.
pub struct DeleteOp<'a> {
    client: &'a Memcake,
    quiet: bool,
    key: Bytes,
    cas: Version,
    timeout: Duration,
}

impl DeleteOp<'_> {
    /// Only delete if the server's current CAS token matches.
    pub fn cas(mut self, version: Version) -> Self {
        self.cas = version;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn execute(self) -> Result<()> {
        let DeleteOp { client, quiet, key, cas, timeout } = self;
        client
            .call(move |conn| async move {
                if quiet {
                    conn.deleteq(&key, cas, timeout).await
                } else {
                    conn.delete(&key, cas, timeout).await
                }
            })
            .await
    }
}

/// Builder for `increment` and `decrement`. Resolves to the new counter
/// value.
///
/// Without [`initial_value`](CounterOp::initial_value) the operation
/// fails with "key not found" on a missing key; with it, the missing key
/// is created at the initial value.
pub struct CounterOp<'a> {
    client: &'a Memcake,
    kind: CounterKind,
    key: Bytes,
    delta: u64,
    initial: Option<u64>,
    expires: u32,
    cas: Version,
    timeout: Duration,
}

impl CounterOp<'_> {
    /// Value to create the key at when it does not exist.
    pub fn initial_value(mut self, initial: u64) -> Self {
        self.initial = Some(initial);
        self
    }

    /// Expiration used when the key is created. Only meaningful together
    /// with an initial value.
    pub fn expires(mut self, expires: u32) -> Self {
        self.expires = expires;
        self
    }

    pub fn cas(mut self, version: Version) -> Self {
        self.cas = version;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn execute(self) -> Result<Counter> {
        let CounterOp { client, kind, key, delta, initial, expires, cas, timeout } = self;
        let (initial, expires) = counter_extras(initial, expires);
        client
            .call(move |conn| async move {
                match kind {
                    CounterKind::Increment => {
                        conn.increment(&key, delta, initial, expires, cas, timeout).await
                    }
                    CounterKind::Decrement => {
                        conn.decrement(&key, delta, initial, expires, cas, timeout).await
                    }
                }
            })
            .await
    }
}

/// Builder for `incrementq` and `decrementq`.
pub struct CounterQuietOp<'a> {
    client: &'a Memcake,
    kind: CounterKind,
    key: Bytes,
    delta: u64,
    initial: Option<u64>,
    expires: u32,
    cas: Version,
    timeout: Duration,
}

impl CounterQuietOp<'_> {
    pub fn initial_value(mut self, initial: u64) -> Self {
        self.initial = Some(initial);
        self
    }

    pub fn expires(mut self, expires: u32) -> Self {
        self.expires = expires;
        self
    }

    pub fn cas(mut self, version: Version) -> Self {
        self.cas = version;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn execute(self) -> Result<()> {
        let CounterQuietOp { client, kind, key, delta, initial, expires, cas, timeout } = self;
        let (initial, expires) = counter_extras(initial, expires);
        client
            .call(move |conn| async move {
                match kind {
                    CounterKind::Increment => {
                        conn.incrementq(&key, delta, initial, expires, cas, timeout).await
                    }
                    CounterKind::Decrement => {
                        conn.decrementq(&key, delta, initial, expires, cas, timeout).await
                    }
                }
            })
            .await
    }
}

/// Builder for `flush` and `flushq`.
pub struct FlushOp<'a> {
    client: &'a Memcake,
    quiet: bool,
    expires: u32,
    timeout: Duration,
}

impl FlushOp<'_> {
    /// Delay in seconds before the flush takes effect; 0 flushes now.
    pub fn expires(mut self, expires: u32) -> Self {
        self.expires = expires;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn execute(self) -> Result<()> {
        let FlushOp { client, quiet, expires, timeout } = self;
        client
            .call(move |conn| async move {
                if quiet {
                    conn.flushq(expires, timeout).await
                } else {
                    conn.flush(expires, timeout).await
                }
            })
            .await
    }
}

/// Builder for `noop`, the usual fence for quiet commands.
pub struct NoopOp<'a> {
    client: &'a Memcake,
    timeout: Duration,
}

impl NoopOp<'_> {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn execute(self) -> Result<()> {
        let NoopOp { client, timeout } = self;
        client
            .call(move |conn| async move { conn.noop(timeout).await })
            .await
    }
}

/// Builder for `version`.
pub struct VersionOp<'a> {
    client: &'a Memcake,
    timeout: Duration,
}

impl VersionOp<'_> {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn execute(self) -> Result<String> {
        let VersionOp { client, timeout } = self;
        client
            .call(move |conn| async move { conn.version(timeout).await })
            .await
    }
}

/// Builder for `stat`. Resolves to the full name-to-value mapping.
pub struct StatOp<'a> {
    client: &'a Memcake,
    key: Option<Bytes>,
    timeout: Duration,
}

impl StatOp<'_> {
    /// Scope the statistics to a group such as `items` or `slabs`.
    pub fn key(mut self, key: impl AsRef<[u8]>) -> Self {
        self.key = Some(Bytes::copy_from_slice(key.as_ref()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn execute(self) -> Result<BTreeMap<String, String>> {
        let StatOp { client, key, timeout } = self;
        client
            .call(move |conn| async move { conn.stat(key.as_deref(), timeout).await })
            .await
    }
}

impl Memcake {
    fn store(&self, kind: StoreKind, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> StoreOp<'_> {
        StoreOp {
            client: self,
            kind,
            key: Bytes::copy_from_slice(key.as_ref()),
            value: Bytes::copy_from_slice(value.as_ref()),
            flags: 0,
            expires: 0,
            cas: Version::NONE,
            timeout: self.default_timeout(),
        }
    }

    fn store_quiet(
        &self,
        kind: StoreKind,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> StoreQuietOp<'_> {
        StoreQuietOp {
            client: self,
            kind,
            key: Bytes::copy_from_slice(key.as_ref()),
            value: Bytes::copy_from_slice(value.as_ref()),
            flags: 0,
            expires: 0,
            cas: Version::NONE,
            timeout: self.default_timeout(),
        }
    }

    fn fetch(&self, kind: GetKind, key: impl AsRef<[u8]>) -> GetOp<'_> {
        GetOp {
            client: self,
            kind,
            key: Bytes::copy_from_slice(key.as_ref()),
            timeout: self.default_timeout(),
        }
    }

    fn counter(&self, kind: CounterKind, key: impl AsRef<[u8]>, delta: u64) -> CounterOp<'_> {
        CounterOp {
            client: self,
            kind,
            key: Bytes::copy_from_slice(key.as_ref()),
            delta,
            initial: None,
            expires: 0,
            cas: Version::NONE,
            timeout: self.default_timeout(),
        }
    }

    fn counter_quiet(
        &self,
        kind: CounterKind,
        key: impl AsRef<[u8]>,
        delta: u64,
    ) -> CounterQuietOp<'_> {
        CounterQuietOp {
            client: self,
            kind,
            key: Bytes::copy_from_slice(key.as_ref()),
            delta,
            initial: None,
            expires: 0,
            cas: Version::NONE,
            timeout: self.default_timeout(),
        }
    }

    /// Store a value unconditionally (or conditionally via `.cas(..)`).
    pub fn set(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> StoreOp<'_> {
        self.store(StoreKind::Set, key, value)
    }

    pub fn setq(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> StoreQuietOp<'_> {
        self.store_quiet(StoreKind::Set, key, value)
    }

    /// Store only if the key does not exist yet.
    pub fn add(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> StoreOp<'_> {
        self.store(StoreKind::Add, key, value)
    }

    pub fn addq(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> StoreQuietOp<'_> {
        self.store_quiet(StoreKind::Add, key, value)
    }

    /// Store only if the key already exists.
    pub fn replace(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> StoreOp<'_> {
        self.store(StoreKind::Replace, key, value)
    }

    pub fn replaceq(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> StoreQuietOp<'_> {
        self.store_quiet(StoreKind::Replace, key, value)
    }

    /// Append bytes to an existing value.
    pub fn append(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> StoreOp<'_> {
        self.store(StoreKind::Append, key, value)
    }

    pub fn appendq(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> StoreQuietOp<'_> {
        self.store_quiet(StoreKind::Append, key, value)
    }

    /// Prepend bytes to an existing value.
    pub fn prepend(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> StoreOp<'_> {
        self.store(StoreKind::Prepend, key, value)
    }

    pub fn prependq(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> StoreQuietOp<'_> {
        self.store_quiet(StoreKind::Prepend, key, value)
    }

    /// Fetch a value. Resolves to `None` on a miss.
    pub fn get(&self, key: impl AsRef<[u8]>) -> GetOp<'_> {
        self.fetch(GetKind::Get, key)
    }

    pub fn getq(&self, key: impl AsRef<[u8]>) -> GetOp<'_> {
        self.fetch(GetKind::GetQ, key)
    }

    /// Fetch a value with the key echoed back in the result.
    pub fn getk(&self, key: impl AsRef<[u8]>) -> GetOp<'_> {
        self.fetch(GetKind::GetK, key)
    }

    pub fn getkq(&self, key: impl AsRef<[u8]>) -> GetOp<'_> {
        self.fetch(GetKind::GetKQ, key)
    }

    pub fn delete(&self, key: impl AsRef<[u8]>) -> DeleteOp<'_> {
        DeleteOp {
            client: self,
            quiet: false,
            key: Bytes::copy_from_slice(key.as_ref()),
            cas: Version::NONE,
            timeout: self.default_timeout(),
        }
    }

    pub fn deleteq(&self, key: impl AsRef<[u8]>) -> DeleteOp<'_> {
        DeleteOp {
            client: self,
            quiet: true,
            key: Bytes::copy_from_slice(key.as_ref()),
            cas: Version::NONE,
            timeout: self.default_timeout(),
        }
    }

    /// Add `delta` to a numeric value.
    pub fn increment(&self, key: impl AsRef<[u8]>, delta: u64) -> CounterOp<'_> {
        self.counter(CounterKind::Increment, key, delta)
    }

    pub fn incrementq(&self, key: impl AsRef<[u8]>, delta: u64) -> CounterQuietOp<'_> {
        self.counter_quiet(CounterKind::Increment, key, delta)
    }

    /// Subtract `delta` from a numeric value, stopping at zero.
    pub fn decrement(&self, key: impl AsRef<[u8]>, delta: u64) -> CounterOp<'_> {
        self.counter(CounterKind::Decrement, key, delta)
    }

    pub fn decrementq(&self, key: impl AsRef<[u8]>, delta: u64) -> CounterQuietOp<'_> {
        self.counter_quiet(CounterKind::Decrement, key, delta)
    }

    /// Invalidate every item in the cache.
    pub fn flush(&self) -> FlushOp<'_> {
        FlushOp {
            client: self,
            quiet: false,
            expires: 0,
            timeout: self.default_timeout(),
        }
    }

    pub fn flushq(&self) -> FlushOp<'_> {
        FlushOp {
            client: self,
            quiet: true,
            expires: 0,
            timeout: self.default_timeout(),
        }
    }

    /// A round trip that does nothing; fences outstanding quiet commands.
    pub fn noop(&self) -> NoopOp<'_> {
        NoopOp {
            client: self,
            timeout: self.default_timeout(),
        }
    }

    /// The server's version string.
    pub fn version(&self) -> VersionOp<'_> {
        VersionOp {
            client: self,
            timeout: self.default_timeout(),
        }
    }

    /// Server statistics.
    pub fn stat(&self) -> StatOp<'_> {
        StatOp {
            client: self,
            key: None,
            timeout: self.default_timeout(),
        }
    }
}
