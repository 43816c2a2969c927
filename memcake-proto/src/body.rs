//! Parsing of success-response bodies.
//!
//! The response reader frames a 24-byte header and then reads exactly
//! `total_body_length` bytes; this module turns that body into the typed
//! payload for the opcode family. Error responses (non-zero status) carry
//! a textual description instead and never reach [`Body::parse`].

use bytes::Bytes;

use crate::error::ParseError;
use crate::header::{Opcode, ResponseHeader};

/// The parsed body of a success response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// get/getq/getk/getkq: stored flags, optional echoed key, value bytes.
    Value {
        flags: u32,
        key: Option<Bytes>,
        data: Bytes,
    },
    /// increment/decrement: the counter value after the operation.
    Counter(u64),
    /// Operations that acknowledge with an empty body.
    Empty,
    /// version: ASCII version string.
    Text(String),
    /// One stat entry; the terminator has an empty key and value.
    Stat { key: Bytes, value: Bytes },
}

impl Body {
    /// Parse a success-response body for the header's opcode.
    ///
    /// `body` must hold exactly `header.total_body_length` bytes; the
    /// header itself has already validated that extras and key fit inside
    /// it. Layout violations are protocol errors, not defaults.
    pub fn parse(header: &ResponseHeader, body: Bytes) -> Result<Body, ParseError> {
        if body.len() != header.total_body_length as usize {
            return Err(ParseError::Protocol("body length mismatch"));
        }

        match header.opcode {
            Opcode::Get | Opcode::GetQ => {
                if header.extras_length != 4 {
                    return Err(ParseError::Protocol("unexpected extras length"));
                }
                let flags = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
                Ok(Body::Value {
                    flags,
                    key: None,
                    data: body.slice(4..),
                })
            }
            Opcode::GetK | Opcode::GetKQ => {
                if header.extras_length != 4 {
                    return Err(ParseError::Protocol("unexpected extras length"));
                }
                let key_end = 4 + header.key_length as usize;
                let flags = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
                Ok(Body::Value {
                    flags,
                    key: Some(body.slice(4..key_end)),
                    data: body.slice(key_end..),
                })
            }
            Opcode::Increment | Opcode::IncrementQ | Opcode::Decrement | Opcode::DecrementQ => {
                if body.len() != 8 {
                    return Err(ParseError::Protocol("counter body must be 8 bytes"));
                }
                Ok(Body::Counter(u64::from_be_bytes([
                    body[0], body[1], body[2], body[3], body[4], body[5], body[6], body[7],
                ])))
            }
            Opcode::Version => Ok(Body::Text(
                String::from_utf8_lossy(&body).into_owned(),
            )),
            Opcode::Stat => {
                let key_end = header.key_length as usize;
                Ok(Body::Stat {
                    key: body.slice(..key_end),
                    value: body.slice(key_end..),
                })
            }
            Opcode::Set
            | Opcode::SetQ
            | Opcode::Add
            | Opcode::AddQ
            | Opcode::Replace
            | Opcode::ReplaceQ
            | Opcode::Append
            | Opcode::AppendQ
            | Opcode::Prepend
            | Opcode::PrependQ
            | Opcode::Delete
            | Opcode::DeleteQ
            | Opcode::Flush
            | Opcode::FlushQ
            | Opcode::Noop
            | Opcode::Quit
            | Opcode::QuitQ => {
                if !body.is_empty() {
                    return Err(ParseError::Protocol("unexpected body"));
                }
                Ok(Body::Empty)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::ResponseHeader;

    fn header(opcode: Opcode, extras: u8, key: u16, total: u32) -> ResponseHeader {
        let mut header = ResponseHeader::new(opcode, 0);
        header.extras_length = extras;
        header.key_length = key;
        header.total_body_length = total;
        header
    }

    #[test]
    fn parse_get_value() {
        let mut body = Vec::new();
        body.extend_from_slice(&7u32.to_be_bytes());
        body.extend_from_slice(b"world");

        let parsed = Body::parse(&header(Opcode::Get, 4, 0, 9), Bytes::from(body)).unwrap();
        assert_eq!(
            parsed,
            Body::Value {
                flags: 7,
                key: None,
                data: Bytes::from_static(b"world"),
            }
        );
    }

    #[test]
    fn parse_getk_value_includes_key() {
        let mut body = Vec::new();
        body.extend_from_slice(&1u32.to_be_bytes());
        body.extend_from_slice(b"hello");
        body.extend_from_slice(b"world");

        let parsed = Body::parse(&header(Opcode::GetK, 4, 5, 14), Bytes::from(body)).unwrap();
        assert_eq!(
            parsed,
            Body::Value {
                flags: 1,
                key: Some(Bytes::from_static(b"hello")),
                data: Bytes::from_static(b"world"),
            }
        );
    }

    #[test]
    fn parse_counter() {
        let body = Bytes::copy_from_slice(&42u64.to_be_bytes());
        let parsed = Body::parse(&header(Opcode::Increment, 0, 0, 8), body).unwrap();
        assert_eq!(parsed, Body::Counter(42));

        let short = Bytes::copy_from_slice(&[0, 0, 0, 1]);
        assert_eq!(
            Body::parse(&header(Opcode::Decrement, 0, 0, 4), short),
            Err(ParseError::Protocol("counter body must be 8 bytes"))
        );
    }

    #[test]
    fn parse_version_text() {
        let parsed = Body::parse(
            &header(Opcode::Version, 0, 0, 5),
            Bytes::from_static(b"1.6.9"),
        )
        .unwrap();
        assert_eq!(parsed, Body::Text("1.6.9".to_string()));
    }

    #[test]
    fn parse_stat_entry_and_terminator() {
        let parsed = Body::parse(
            &header(Opcode::Stat, 0, 3, 8),
            Bytes::from_static(b"pid12345"),
        )
        .unwrap();
        assert_eq!(
            parsed,
            Body::Stat {
                key: Bytes::from_static(b"pid"),
                value: Bytes::from_static(b"12345"),
            }
        );

        let parsed = Body::parse(&header(Opcode::Stat, 0, 0, 0), Bytes::new()).unwrap();
        assert_eq!(
            parsed,
            Body::Stat {
                key: Bytes::new(),
                value: Bytes::new(),
            }
        );
    }

    #[test]
    fn parse_empty_acknowledgements() {
        for opcode in [
            Opcode::Set,
            Opcode::Delete,
            Opcode::Flush,
            Opcode::Noop,
            Opcode::Quit,
        ] {
            let parsed = Body::parse(&header(opcode, 0, 0, 0), Bytes::new()).unwrap();
            assert_eq!(parsed, Body::Empty);
        }

        assert_eq!(
            Body::parse(&header(Opcode::Set, 0, 0, 3), Bytes::from_static(b"huh")),
            Err(ParseError::Protocol("unexpected body"))
        );
    }

    #[test]
    fn parse_rejects_length_mismatch() {
        assert_eq!(
            Body::parse(&header(Opcode::Get, 4, 0, 9), Bytes::from_static(b"tiny")),
            Err(ParseError::Protocol("body length mismatch"))
        );
    }

    #[test]
    fn parse_rejects_missing_flags_extras() {
        assert_eq!(
            Body::parse(&header(Opcode::Get, 0, 0, 5), Bytes::from_static(b"world")),
            Err(ParseError::Protocol("unexpected extras length"))
        );
    }
}
