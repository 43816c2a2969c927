//! Integration tests against a real Memcached server.
//!
//! These tests are `#[ignore]` by default because they require a running
//! Memcached instance on `127.0.0.1:11211`. Run them with:
//!
//!   cargo test -p memcake --test integration -- --ignored --nocapture
//!
//! Every test flushes the cache on setup, so the suite is serialized with
//! a process-wide lock.

use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use memcake::{Memcake, Status};

static TEST_SERIALIZE: Mutex<()> = Mutex::new(());

const MEMCACHE_ADDR: &str = "127.0.0.1:11211";
const TIMEOUT: Duration = Duration::from_secs(1);

fn addr() -> SocketAddr {
    MEMCACHE_ADDR.parse().unwrap()
}

fn require_server() {
    if std::net::TcpStream::connect_timeout(&addr(), Duration::from_secs(2)).is_err() {
        panic!("Memcached not reachable at {MEMCACHE_ADDR}");
    }
}

/// Single-connection client over a freshly flushed cache. One connection
/// keeps quiet commands and their fences on the same socket.
async fn client() -> Memcake {
    require_server();
    let mc = Memcake::create(addr(), 1, TIMEOUT);
    mc.flush().execute().await.expect("flush");
    mc
}

#[tokio::test]
#[ignore]
async fn set_then_get_roundtrip() {
    let _guard = TEST_SERIALIZE.lock().unwrap_or_else(|e| e.into_inner());
    let mc = client().await;

    let version = mc.set("hello", "world").flags(1).execute().await.unwrap();

    let value = mc.get("hello").execute().await.unwrap().unwrap();
    assert_eq!(value.data.as_ref(), b"world");
    assert_eq!(value.flags, 1);
    assert_eq!(value.version, version);
    assert_eq!(value.key, None);

    mc.close().await;
}

#[tokio::test]
#[ignore]
async fn getk_echoes_the_key() {
    let _guard = TEST_SERIALIZE.lock().unwrap_or_else(|e| e.into_inner());
    let mc = client().await;

    mc.set("echo", "value").execute().await.unwrap();
    let value = mc.getk("echo").execute().await.unwrap().unwrap();
    assert_eq!(value.key.as_deref(), Some(b"echo".as_slice()));
    assert_eq!(value.data.as_ref(), b"value");

    mc.close().await;
}

#[tokio::test]
#[ignore]
async fn delete_removes_the_entry() {
    let _guard = TEST_SERIALIZE.lock().unwrap_or_else(|e| e.into_inner());
    let mc = client().await;

    mc.set("gone", "soon").execute().await.unwrap();
    mc.delete("gone").execute().await.unwrap();
    assert_eq!(mc.get("gone").execute().await.unwrap(), None);

    mc.close().await;
}

#[tokio::test]
#[ignore]
async fn append_with_cas_token() {
    let _guard = TEST_SERIALIZE.lock().unwrap_or_else(|e| e.into_inner());
    let mc = client().await;

    let version = mc.set("hello", "wo").execute().await.unwrap();
    mc.append("hello", "rld").cas(version).execute().await.unwrap();

    let value = mc.get("hello").execute().await.unwrap().unwrap();
    assert_eq!(value.data.as_ref(), b"world");

    mc.close().await;
}

#[tokio::test]
#[ignore]
async fn add_then_prepend_changes_the_version() {
    let _guard = TEST_SERIALIZE.lock().unwrap_or_else(|e| e.into_inner());
    let mc = client().await;

    let added = mc.add("hello", "rld").execute().await.unwrap();
    mc.prepend("hello", "wo").execute().await.unwrap();

    let value = mc.get("hello").execute().await.unwrap().unwrap();
    assert_eq!(value.data.as_ref(), b"world");
    assert_ne!(value.version, added);

    mc.close().await;
}

#[tokio::test]
#[ignore]
async fn add_on_an_existing_key_fails() {
    let _guard = TEST_SERIALIZE.lock().unwrap_or_else(|e| e.into_inner());
    let mc = client().await;

    mc.set("taken", "first").execute().await.unwrap();
    let err = mc.add("taken", "second").execute().await.unwrap_err();
    assert_eq!(err.status(), Some(Status::KeyExists));

    mc.close().await;
}

#[tokio::test]
#[ignore]
async fn quiet_add_lands_before_a_following_delete() {
    let _guard = TEST_SERIALIZE.lock().unwrap_or_else(|e| e.into_inner());
    let mc = client().await;

    // The delete is the fence that retires the quiet add.
    let (addq, delete) = tokio::join!(
        mc.addq("jello", "mold").execute(),
        mc.delete("jello").execute(),
    );
    addq.unwrap();
    delete.unwrap();

    assert_eq!(mc.get("jello").execute().await.unwrap(), None);

    mc.close().await;
}

#[tokio::test]
#[ignore]
async fn quiet_add_completes_after_a_noop() {
    let _guard = TEST_SERIALIZE.lock().unwrap_or_else(|e| e.into_inner());
    let mc = client().await;

    let (addq, noop) = tokio::join!(
        mc.addq("joke", "haha").execute(),
        mc.noop().execute(),
    );
    noop.unwrap();
    addq.unwrap();

    let value = mc.get("joke").execute().await.unwrap().unwrap();
    assert_eq!(value.data.as_ref(), b"haha");

    mc.close().await;
}

#[tokio::test]
#[ignore]
async fn decrement_without_initial_fails_on_a_missing_key() {
    let _guard = TEST_SERIALIZE.lock().unwrap_or_else(|e| e.into_inner());
    let mc = client().await;

    let err = mc.decrement("hello", 1).execute().await.unwrap_err();
    assert_eq!(err.status(), Some(Status::KeyNotFound));

    mc.close().await;
}

#[tokio::test]
#[ignore]
async fn decrement_with_initial_creates_the_counter() {
    let _guard = TEST_SERIALIZE.lock().unwrap_or_else(|e| e.into_inner());
    let mc = client().await;

    let counter = mc
        .decrement("countdown", 1)
        .initial_value(3)
        .execute()
        .await
        .unwrap();
    assert_eq!(counter.value, 3);

    mc.close().await;
}

#[tokio::test]
#[ignore]
async fn increment_applies_initial_then_delta() {
    let _guard = TEST_SERIALIZE.lock().unwrap_or_else(|e| e.into_inner());
    let mc = client().await;

    let first = mc
        .increment("visits", 2)
        .initial_value(10)
        .execute()
        .await
        .unwrap();
    assert_eq!(first.value, 10);

    let value = mc.get("visits").execute().await.unwrap().unwrap();
    assert_eq!(value.data.as_ref(), b"10");

    let second = mc.increment("visits", 2).execute().await.unwrap();
    assert_eq!(second.value, 12);

    mc.close().await;
}

#[tokio::test]
#[ignore]
async fn stat_reports_server_counters() {
    let _guard = TEST_SERIALIZE.lock().unwrap_or_else(|e| e.into_inner());
    let mc = client().await;

    let stats = mc.stat().execute().await.unwrap();
    assert!(stats.contains_key("pid"));
    assert!(stats.contains_key("total_items"));

    for key in ["a", "b", "c"] {
        mc.set(key, "x").execute().await.unwrap();
    }
    let items = mc.stat().key("items").execute().await.unwrap();
    assert_eq!(items.get("items:1:number").map(String::as_str), Some("3"));

    mc.close().await;
}

#[tokio::test]
#[ignore]
async fn version_returns_a_nonempty_string() {
    let _guard = TEST_SERIALIZE.lock().unwrap_or_else(|e| e.into_inner());
    let mc = client().await;

    let version = mc.version().execute().await.unwrap();
    assert!(!version.is_empty());

    mc.close().await;
}

#[tokio::test]
#[ignore]
async fn flush_clears_every_entry() {
    let _guard = TEST_SERIALIZE.lock().unwrap_or_else(|e| e.into_inner());
    let mc = client().await;

    mc.set("doomed", "value").execute().await.unwrap();
    mc.flush().execute().await.unwrap();
    assert_eq!(mc.get("doomed").execute().await.unwrap(), None);

    mc.close().await;
}
