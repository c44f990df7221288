//! # Waymark Proto
//!
//! Wire protocol shared by Waymark listeners and the backend.
//!
//! This crate provides:
//! - HDLC-style byte-stream framing (flag delimiter + byte stuffing)
//! - Packet header and listener-id decoding
//! - SECURE telemetry payload layout
//!
//! ## Wire format
//!
//! ```text
//! frame    := 0x7E escaped(packet) 0x7E
//! packet   := [version:4 | type:4][reserved:8][lid_len:8] listener_id payload
//! SECURE   := beacon_id:6 | nonce:16 | ciphertext:9 | tag:4
//!             | distance:u16le | variance:u16le          (39 bytes)
//! ```
//!
//! Framing errors and header errors are expected, recoverable conditions:
//! every fallible operation returns an error-kind value the dispatch layer
//! converts into a NACK. Nothing here panics on hostile input.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod error;
pub mod hdlc;
pub mod packet;

pub use error::{FrameError, PacketError};
pub use hdlc::{ESC, FLAG, frame, unframe};
pub use packet::{BeaconId, ListenerId, Packet, PacketType, SecureReport};

/// Fixed packet header size in bytes
pub const HEADER_LEN: usize = 3;

/// Beacon hardware address size
pub const BEACON_ID_LEN: usize = 6;

/// EAX nonce size carried in SECURE payloads
pub const NONCE_LEN: usize = 16;

/// Encrypted reading size
pub const CIPHERTEXT_LEN: usize = 9;

/// Truncated authentication tag size
pub const TAG_LEN: usize = 4;

/// Total SECURE payload size
pub const SECURE_PAYLOAD_LEN: usize = 39;
