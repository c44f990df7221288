//! # Waymark Server
//!
//! The backend daemon tying the protocol pipeline together.
//!
//! This crate provides:
//! - The per-connection session state machine (frame accumulation,
//!   ACK/NACK emission)
//! - The packet dispatch pipeline (decode, authenticate, validate,
//!   cache write)
//! - The TCP listener transport
//! - Configuration loading
//!
//! ## Data flow
//!
//! ```text
//! raw bytes ──▶ LinkSession ──▶ PacketHandler.dispatch ──▶ ACK/NACK
//!                                      │
//!                          (SECURE, after the ACK is queued)
//!                                      ▼
//!                        PacketHandler.authenticate
//!                    decrypt ▶ DK/replay ▶ cache write
//! ```
//!
//! The authentication sequence is fully synchronous: between header
//! decode and the final cache write there is no await point, so no
//! other packet or the persister can observe a half-updated record.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod config;
pub mod dispatch;
pub mod error;
pub mod server;
pub mod session;

pub use config::Config;
pub use dispatch::{PacketHandler, SecureJob};
pub use error::ServerError;
pub use server::run;
pub use session::{LinkSession, Response, SessionEvent};
