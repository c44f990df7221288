//! Durable-storage abstraction.
//!
//! The persister consumes exactly two shapes of operation per entity
//! kind: keyed fetch-many, and multi-row upsert-on-conflict where every
//! row in one call carries the same column set. Columns outside a
//! patch's set are left untouched in storage, which is what lets the
//! persister batch heterogeneous dirty snapshots after partitioning.
//!
//! [`MemoryStorage`] implements the trait over hash maps; it backs the
//! tests and standalone deployments without a database.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;

use async_trait::async_trait;
use waymark_proto::{BeaconId, ListenerId};

use crate::entity::{
    BeaconField, BeaconPatch, BeaconRow, ListenerField, ListenerPatch, ListenerRow,
};
use crate::error::StorageError;

/// Keyed entity storage.
///
/// Upserts must be idempotent: replaying an identical patch leaves the
/// stored row unchanged, which makes next-cycle retry after a partial
/// failure safe.
#[async_trait]
pub trait Storage: Send + Sync {
    /// All beacon primary keys currently stored.
    async fn beacon_ids(&self) -> Result<Vec<BeaconId>, StorageError>;

    /// All listener primary keys currently stored.
    async fn listener_ids(&self) -> Result<Vec<ListenerId>, StorageError>;

    /// Fetch full rows for the given beacon keys; unknown keys are
    /// silently absent from the result.
    async fn fetch_beacons(&self, ids: &[BeaconId]) -> Result<Vec<BeaconRow>, StorageError>;

    /// Fetch full rows for the given listener keys.
    async fn fetch_listeners(&self, ids: &[ListenerId]) -> Result<Vec<ListenerRow>, StorageError>;

    /// Insert-or-update the given beacon patches. Every patch in one
    /// call must carry the same column set.
    async fn upsert_beacons(&self, patches: &[BeaconPatch]) -> Result<(), StorageError>;

    /// Insert-or-update the given listener patches.
    async fn upsert_listeners(&self, patches: &[ListenerPatch]) -> Result<(), StorageError>;

    /// Delete a beacon row (administrative).
    async fn delete_beacon(&self, id: &BeaconId) -> Result<(), StorageError>;

    /// Delete a listener row (administrative).
    async fn delete_listener(&self, id: &ListenerId) -> Result<(), StorageError>;
}

/// Hash-map storage backend.
#[derive(Default)]
pub struct MemoryStorage {
    beacons: Mutex<HashMap<BeaconId, BeaconRow>>,
    listeners: Mutex<HashMap<ListenerId, ListenerRow>>,
}

impl MemoryStorage {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn apply_beacon(row: &mut BeaconRow, patch: &BeaconPatch) {
        let cols = patch.columns;
        if cols.contains(BeaconField::Name) {
            row.name = patch.name.clone();
        }
        if cols.contains(BeaconField::GroupId) {
            row.group_id = patch.group_id;
        }
        if cols.contains(BeaconField::Key) {
            row.key = patch.key;
        }
        if cols.contains(BeaconField::Dk) {
            row.dk = patch.dk;
        }
        if cols.contains(BeaconField::Clock) {
            row.clock = patch.clock;
        }
        if cols.contains(BeaconField::ClockOrigin) {
            row.clock_origin = patch.clock_origin;
        }
        if cols.contains(BeaconField::ListenerId) {
            row.listener_id = patch.listener_id.clone();
        }
        if cols.contains(BeaconField::LastSeen) {
            row.last_seen = patch.last_seen;
        }
        if cols.contains(BeaconField::RejectedReplay) {
            row.rejected_replay = patch.rejected_replay;
        }
        if cols.contains(BeaconField::RejectedMac) {
            row.rejected_mac = patch.rejected_mac;
        }
        if cols.contains(BeaconField::RejectedDk) {
            row.rejected_dk = patch.rejected_dk;
        }
    }

    fn insert_beacon(patch: &BeaconPatch) -> Result<BeaconRow, StorageError> {
        // key/dk/clock are non-null; snapshots always carry them.
        if !patch.columns.contains(BeaconField::Key) {
            return Err(StorageError::MissingColumn("key"));
        }
        let mut row = BeaconRow {
            id: patch.id,
            name: None,
            group_id: None,
            key: patch.key,
            dk: patch.dk,
            clock: patch.clock,
            clock_origin: 0.0,
            listener_id: None,
            last_seen: SystemTime::UNIX_EPOCH,
            rejected_replay: 0,
            rejected_mac: 0,
            rejected_dk: 0,
        };
        Self::apply_beacon(&mut row, patch);
        Ok(row)
    }

    fn apply_listener(row: &mut ListenerRow, patch: &ListenerPatch) {
        let cols = patch.columns;
        if cols.contains(ListenerField::Name) {
            row.name = patch.name.clone();
        }
        if cols.contains(ListenerField::ZoneId) {
            row.zone_id = patch.zone_id;
        }
        if cols.contains(ListenerField::LastSeen) {
            row.last_seen = patch.last_seen;
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn beacon_ids(&self) -> Result<Vec<BeaconId>, StorageError> {
        Ok(self
            .beacons
            .lock()
            .expect("storage lock poisoned")
            .keys()
            .copied()
            .collect())
    }

    async fn listener_ids(&self) -> Result<Vec<ListenerId>, StorageError> {
        Ok(self
            .listeners
            .lock()
            .expect("storage lock poisoned")
            .keys()
            .cloned()
            .collect())
    }

    async fn fetch_beacons(&self, ids: &[BeaconId]) -> Result<Vec<BeaconRow>, StorageError> {
        let beacons = self.beacons.lock().expect("storage lock poisoned");
        Ok(ids.iter().filter_map(|id| beacons.get(id).cloned()).collect())
    }

    async fn fetch_listeners(&self, ids: &[ListenerId]) -> Result<Vec<ListenerRow>, StorageError> {
        let listeners = self.listeners.lock().expect("storage lock poisoned");
        Ok(ids
            .iter()
            .filter_map(|id| listeners.get(id).cloned())
            .collect())
    }

    async fn upsert_beacons(&self, patches: &[BeaconPatch]) -> Result<(), StorageError> {
        let mut beacons = self.beacons.lock().expect("storage lock poisoned");
        for patch in patches {
            match beacons.get_mut(&patch.id) {
                Some(row) => Self::apply_beacon(row, patch),
                None => {
                    let row = Self::insert_beacon(patch)?;
                    beacons.insert(patch.id, row);
                }
            }
        }
        Ok(())
    }

    async fn upsert_listeners(&self, patches: &[ListenerPatch]) -> Result<(), StorageError> {
        let mut listeners = self.listeners.lock().expect("storage lock poisoned");
        for patch in patches {
            match listeners.get_mut(&patch.id) {
                Some(row) => Self::apply_listener(row, patch),
                None => {
                    let mut row = ListenerRow {
                        id: patch.id.clone(),
                        name: None,
                        zone_id: None,
                        last_seen: SystemTime::UNIX_EPOCH,
                    };
                    Self::apply_listener(&mut row, patch);
                    listeners.insert(patch.id.clone(), row);
                }
            }
        }
        Ok(())
    }

    async fn delete_beacon(&self, id: &BeaconId) -> Result<(), StorageError> {
        self.beacons
            .lock()
            .expect("storage lock poisoned")
            .remove(id);
        Ok(())
    }

    async fn delete_listener(&self, id: &ListenerId) -> Result<(), StorageError> {
        self.listeners
            .lock()
            .expect("storage lock poisoned")
            .remove(id);
        Ok(())
    }
}
