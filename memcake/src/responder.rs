//! Completion of caller futures from parsed responses.
//!
//! A responder is bound to one submitted command and consumes at most one
//! outcome: a parsed success body, a server status error, an implicit
//! quiet success, or a connection-level failure. The sender is taken on
//! first use, so a responder whose command already expired degrades to a
//! tombstone that absorbs the late response.

use std::collections::BTreeMap;

use memcake_proto::{Body, ResponseHeader, Status};
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::value::{Counter, Value, Version};

type Sender<T> = Option<oneshot::Sender<Result<T>>>;

/// Per-family completion sink for one in-flight command.
pub(crate) enum Responder {
    /// set/add/replace/append/prepend: resolves to the new CAS token.
    Store(Sender<Version>),
    /// get/getq/getk/getkq: resolves to the value, or None on a miss.
    Fetch(Sender<Option<Value>>),
    /// increment/decrement: resolves to the counter result.
    Counter(Sender<Counter>),
    /// Quiet writes, delete, flush, noop, quit: resolves to unit.
    Unit(Sender<()>),
    /// version: resolves to the server's version string.
    Text(Sender<String>),
    /// stat: accumulates entries until the empty terminator arrives.
    Stats {
        sender: Sender<BTreeMap<String, String>>,
        entries: BTreeMap<String, String>,
    },
}

impl Responder {
    /// Whether the caller future has already been resolved.
    pub(crate) fn is_done(&self) -> bool {
        match self {
            Responder::Store(sender) => sender.is_none(),
            Responder::Fetch(sender) => sender.is_none(),
            Responder::Counter(sender) => sender.is_none(),
            Responder::Unit(sender) => sender.is_none(),
            Responder::Text(sender) => sender.is_none(),
            Responder::Stats { sender, .. } => sender.is_none(),
        }
    }

    /// Fail the caller's future.
    ///
    /// A get resolves a key-not-found status to a plain miss instead, the
    /// same way a quiet get treats silence.
    pub(crate) fn fail(&mut self, error: Error) {
        match self {
            Responder::Fetch(sender) => {
                let miss = matches!(&error, Error::Status { code, .. }
                    if Status::from_u16(*code) == Some(Status::KeyNotFound));
                if let Some(sender) = sender.take() {
                    let _ = sender.send(if miss { Ok(None) } else { Err(error) });
                }
            }
            Responder::Store(sender) => send(sender, Err(error)),
            Responder::Counter(sender) => send(sender, Err(error)),
            Responder::Unit(sender) => send(sender, Err(error)),
            Responder::Text(sender) => send(sender, Err(error)),
            Responder::Stats { sender, .. } => send(sender, Err(error)),
        }
    }

    /// Complete a quiet command whose success was implied by a later
    /// non-quiet response.
    pub(crate) fn complete_quiet(&mut self) {
        match self {
            Responder::Unit(sender) => send(sender, Ok(())),
            Responder::Fetch(sender) => send(sender, Ok(None)),
            // Quiet commands are only ever submitted with the two sinks
            // above.
            _ => debug_assert!(false, "non-quiet responder in quiet buffer"),
        }
    }

    /// Complete the caller's future from a parsed success response.
    ///
    /// Returns `Ok(true)` when the command is finished and its opaque can
    /// be retired; a stat entry other than the terminator returns
    /// `Ok(false)` because more responses share the opaque. A body that
    /// does not fit the expected family is a protocol violation.
    pub(crate) fn complete(&mut self, header: &ResponseHeader, body: Body) -> Result<bool> {
        match (self, body) {
            (Responder::Store(sender), Body::Empty) => {
                send(sender, Ok(Version::new(header.cas)));
                Ok(true)
            }
            (Responder::Fetch(sender), Body::Value { flags, key, data }) => {
                let value = Value {
                    key,
                    flags,
                    data,
                    version: Version::new(header.cas),
                };
                send(sender, Ok(Some(value)));
                Ok(true)
            }
            (Responder::Counter(sender), Body::Counter(value)) => {
                let counter = Counter {
                    value,
                    version: Version::new(header.cas),
                };
                send(sender, Ok(counter));
                Ok(true)
            }
            (Responder::Unit(sender), Body::Empty) => {
                send(sender, Ok(()));
                Ok(true)
            }
            (Responder::Text(sender), Body::Text(text)) => {
                send(sender, Ok(text));
                Ok(true)
            }
            (Responder::Stats { sender, entries }, Body::Stat { key, value }) => {
                if key.is_empty() && value.is_empty() {
                    let entries = std::mem::take(entries);
                    send(sender, Ok(entries));
                    Ok(true)
                } else {
                    entries.insert(
                        String::from_utf8_lossy(&key).into_owned(),
                        String::from_utf8_lossy(&value).into_owned(),
                    );
                    Ok(false)
                }
            }
            _ => Err(Error::Protocol(memcake_proto::ParseError::Protocol(
                "response body does not match command",
            ))),
        }
    }
}

fn send<T>(sender: &mut Sender<T>, outcome: Result<T>) {
    if let Some(sender) = sender.take() {
        let _ = sender.send(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use memcake_proto::Opcode;

    fn header(opcode: Opcode, cas: u64) -> ResponseHeader {
        let mut header = ResponseHeader::new(opcode, 0);
        header.cas = cas;
        header
    }

    #[test]
    fn store_resolves_to_version() {
        let (tx, mut rx) = oneshot::channel();
        let mut responder = Responder::Store(Some(tx));
        let done = responder
            .complete(&header(Opcode::Set, 42), Body::Empty)
            .unwrap();
        assert!(done);
        assert_eq!(rx.try_recv().unwrap().unwrap(), Version::new(42));
    }

    #[test]
    fn fetch_maps_not_found_to_miss() {
        let (tx, mut rx) = oneshot::channel();
        let mut responder = Responder::Fetch(Some(tx));
        responder.fail(Error::Status {
            code: Status::KeyNotFound as u16,
            message: "Key not found".to_string(),
        });
        assert_eq!(rx.try_recv().unwrap().unwrap(), None);
    }

    #[test]
    fn fetch_surfaces_other_statuses() {
        let (tx, mut rx) = oneshot::channel();
        let mut responder = Responder::Fetch(Some(tx));
        responder.fail(Error::Status {
            code: Status::ValueTooLarge as u16,
            message: "Value too large".to_string(),
        });
        let err = rx.try_recv().unwrap().unwrap_err();
        assert_eq!(err.status(), Some(Status::ValueTooLarge));
    }

    #[test]
    fn quiet_completion_per_family() {
        let (tx, mut rx) = oneshot::channel();
        let mut responder = Responder::Unit(Some(tx));
        responder.complete_quiet();
        assert!(rx.try_recv().unwrap().is_ok());

        let (tx, mut rx) = oneshot::channel();
        let mut responder = Responder::Fetch(Some(tx));
        responder.complete_quiet();
        assert_eq!(rx.try_recv().unwrap().unwrap(), None);
    }

    #[test]
    fn stats_accumulate_until_terminator() {
        let (tx, mut rx) = oneshot::channel();
        let mut responder = Responder::Stats {
            sender: Some(tx),
            entries: BTreeMap::new(),
        };

        let done = responder
            .complete(
                &header(Opcode::Stat, 0),
                Body::Stat {
                    key: Bytes::from_static(b"pid"),
                    value: Bytes::from_static(b"123"),
                },
            )
            .unwrap();
        assert!(!done);

        let done = responder
            .complete(
                &header(Opcode::Stat, 0),
                Body::Stat {
                    key: Bytes::new(),
                    value: Bytes::new(),
                },
            )
            .unwrap();
        assert!(done);

        let stats = rx.try_recv().unwrap().unwrap();
        assert_eq!(stats.get("pid").map(String::as_str), Some("123"));
    }

    #[test]
    fn mismatched_body_is_protocol_error() {
        let (tx, _rx) = oneshot::channel();
        let mut responder = Responder::Counter(Some(tx));
        let err = responder
            .complete(&header(Opcode::Increment, 0), Body::Empty)
            .unwrap_err();
        assert!(err.is_terminal());
    }

    #[test]
    fn abandoned_responder_absorbs_completion() {
        let (tx, mut rx) = oneshot::channel();
        let mut responder = Responder::Store(Some(tx));
        responder.fail(Error::TimedOut);
        assert!(responder.is_done());

        // A late response resolves nothing but still retires the entry.
        let done = responder
            .complete(&header(Opcode::Set, 9), Body::Empty)
            .unwrap();
        assert!(done);
        assert!(rx.try_recv().unwrap().unwrap_err().status().is_none());
    }
}
