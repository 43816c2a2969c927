//! Error type for wire-level parsing.

/// Error type for binary protocol parsing operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Need more data to complete parsing.
    #[error("incomplete data")]
    Incomplete,

    /// Invalid magic byte.
    #[error("invalid magic byte: {0:#04x}")]
    InvalidMagic(u8),

    /// Unknown opcode.
    #[error("unknown opcode: {0:#04x}")]
    UnknownOpcode(u8),

    /// Invalid protocol format.
    #[error("protocol error: {0}")]
    Protocol(&'static str),
}
