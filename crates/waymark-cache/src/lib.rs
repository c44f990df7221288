//! # Waymark Cache
//!
//! In-memory source of truth for beacon and listener state, with
//! dirty-tracked batched write-back to durable storage.
//!
//! This crate provides:
//! - Statically-typed `Beacon` / `Listener` records with an enumerable
//!   dirty-field bitset
//! - The `CacheService`, an injected cache object owning the live records
//! - The `Storage` trait (fetch-many / multi-row upsert-on-conflict) and
//!   an in-memory implementation
//! - The periodic `Persister` reconciling cache and storage
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     packet pipeline                      │
//! │        (reads/writes records, marks fields dirty)        │
//! ├──────────────────────────────────────────────────────────┤
//! │                      CacheService                        │
//! │     (exclusive owner of live Beacon/Listener records)    │
//! ├──────────────────────────────────────────────────────────┤
//! │                       Persister                          │
//! │  (periodic: backfill missing keys, flush dirty columns)  │
//! ├──────────────────────────────────────────────────────────┤
//! │                     Storage trait                        │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The hot path never awaits storage: once an entity has been seen in
//! the process lifetime, authentication is answered from memory.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod cache;
pub mod entity;
pub mod error;
pub mod persist;
pub mod storage;

pub use cache::{AuthSnapshot, CacheService, Rejection};
pub use entity::{
    Beacon, BeaconField, BeaconPatch, BeaconRow, Field, FieldSet, Listener, ListenerField,
    ListenerPatch, ListenerRow,
};
pub use error::StorageError;
pub use persist::{Persister, PersistencePolicy};
pub use storage::{MemoryStorage, Storage};
