//! # Waymark Crypto
//!
//! Cryptographic primitives for the Waymark beacon protocol.
//!
//! This crate provides:
//! - Per-beacon key derivation (`CMAC-AES-128` over the beacon address)
//! - AES-128-EAX authenticated decryption of telemetry readings with a
//!   truncated 4-byte tag
//! - The dynamic-key (DK) evolution and replay-validation algorithm
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm | Notes |
//! |----------|-----------|-------|
//! | KDF | CMAC-AES-128 | deterministic, keyed by the master key |
//! | AEAD | AES-128-EAX | 16-byte nonce, 4-byte tag, beacon id as AAD |
//! | Replay defense | DK epoch masking | no key-exchange traffic |
//!
//! The crate is deliberately standalone: it operates on raw byte arrays
//! so the wire-format and cache layers stay free of cipher types.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod auth;
pub mod dk;
pub mod error;
pub mod keys;

pub use auth::{BeaconReading, open_report, seal_reading};
pub use dk::{DkPolicy, DkVerdict, Epoch, evolve};
pub use error::CryptoError;
pub use keys::{BeaconKey, MasterKey};

/// AES-128 key size shared by the master key and derived beacon keys
pub const KEY_SIZE: usize = 16;

/// EAX nonce size (one AES block)
pub const NONCE_SIZE: usize = 16;

/// Truncated EAX tag size
pub const TAG_SIZE: usize = 4;

/// Decrypted reading size: `clock:u32 | dk:u32 | flags:u8`
pub const READING_SIZE: usize = 9;
