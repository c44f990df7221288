//! Error types for the Waymark wire protocol.

use thiserror::Error;

/// Byte-stream framing errors
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Buffer does not start and end with the flag byte
    #[error("missing flag delimiters")]
    MissingFlags,

    /// An unescaped flag byte occurs inside the frame body
    #[error("unescaped flag inside frame body")]
    UnescapedFlag,

    /// The frame body ends in the middle of an escape sequence
    #[error("incomplete escape sequence")]
    DanglingEscape,
}

/// Packet header and payload decode errors
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    /// Packet shorter than the fixed header
    #[error("packet too short: expected at least {expected}, got {actual}")]
    TooShort {
        /// Minimum length required
        expected: usize,
        /// Length received
        actual: usize,
    },

    /// Header type nibble does not name a known packet type
    #[error("bad packet type: 0x{0:02x}")]
    UnknownType(u8),

    /// Zero-length listener ids are not supported
    #[error("zero length listener id")]
    EmptyListenerId,

    /// Declared listener-id length exceeds the bytes present
    #[error("listener id length {declared} exceeds remaining {remaining} bytes")]
    ListenerIdOverflow {
        /// Length declared in the header
        declared: usize,
        /// Bytes actually remaining after the header
        remaining: usize,
    },

    /// SECURE payload is not exactly the fixed report size
    #[error("secure payload must be {expected} bytes, got {actual}")]
    BadSecureLength {
        /// Required payload length
        expected: usize,
        /// Length received
        actual: usize,
    },
}
