//! The cache service: exclusive owner of live entity records.
//!
//! Encapsulates what the packet pipeline and the persister share. All
//! operations take the internal lock, do their in-memory work, and
//! return before any await point, so a packet's authentication sequence
//! can never observe a partially-updated record.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use tracing::debug;
use waymark_crypto::BeaconKey;
use waymark_proto::{BeaconId, ListenerId};

use crate::entity::{
    Beacon, BeaconPatch, BeaconRow, Listener, ListenerPatch, ListenerRow,
};

/// Copy of the beacon state the authentication path needs.
#[derive(Debug, Clone)]
pub struct AuthSnapshot {
    /// Cached symmetric key
    pub key: BeaconKey,
    /// Last validated dynamic key
    pub dk: u32,
    /// Last validated clock
    pub clock: u32,
    /// Estimated wall-clock offset of clock zero
    pub clock_origin: f64,
}

/// Why a decrypted or received reading was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Clock regression
    Replay,
    /// Tag verification failure
    BadMac,
    /// Dynamic-key mismatch
    BadDk,
}

#[derive(Default)]
struct Shelves {
    beacons: HashMap<BeaconId, Beacon>,
    listeners: HashMap<ListenerId, Listener>,
}

/// Process-wide entity cache, injected into the packet pipeline and the
/// persister rather than accessed as ambient global state.
#[derive(Default)]
pub struct CacheService {
    inner: Mutex<Shelves>,
}

impl CacheService {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shelves> {
        self.inner.lock().expect("cache lock poisoned")
    }

    // ---- hot path -------------------------------------------------------

    /// Create the listener record if unseen, else touch `last_seen`.
    ///
    /// Returns `true` when the listener was created.
    pub fn touch_listener(&self, id: &ListenerId, now: SystemTime) -> bool {
        let mut shelves = self.lock();
        match shelves.listeners.get_mut(id) {
            Some(listener) => {
                listener.touch(now);
                false
            }
            None => {
                shelves
                    .listeners
                    .insert(id.clone(), Listener::first_sight(id.clone(), now));
                true
            }
        }
    }

    /// Snapshot the state needed to authenticate a reading, if the
    /// beacon is known.
    #[must_use]
    pub fn beacon_auth_state(&self, id: &BeaconId) -> Option<AuthSnapshot> {
        let shelves = self.lock();
        shelves.beacons.get(id).map(|b| AuthSnapshot {
            key: b.key().clone(),
            dk: b.dk(),
            clock: b.clock(),
            clock_origin: b.clock_origin(),
        })
    }

    /// Install a trust-on-first-use record.
    pub fn insert_first_sight(&self, beacon: Beacon) {
        self.lock().beacons.insert(beacon.id(), beacon);
    }

    /// Commit a validated reading into the record.
    pub fn apply_validated(
        &self,
        id: &BeaconId,
        dk: u32,
        clock: u32,
        listener_id: ListenerId,
        now: SystemTime,
    ) {
        if let Some(beacon) = self.lock().beacons.get_mut(id) {
            beacon.record_validated(dk, clock, listener_id, now);
        }
    }

    /// Bump the rejection counter for a known beacon.
    ///
    /// Rejected candidates never touch `dk`, `clock` or `last_seen`.
    pub fn record_rejection(&self, id: &BeaconId, rejection: Rejection) {
        if let Some(beacon) = self.lock().beacons.get_mut(id) {
            match rejection {
                Rejection::Replay => beacon.record_replay(),
                Rejection::BadMac => beacon.record_mac_failure(),
                Rejection::BadDk => beacon.record_dk_mismatch(),
            }
        }
    }

    // ---- administrative surface -----------------------------------------

    /// Rename a beacon. Returns `false` for unknown ids.
    pub fn rename_beacon(&self, id: &BeaconId, name: String) -> bool {
        match self.lock().beacons.get_mut(id) {
            Some(beacon) => {
                beacon.set_name(name);
                true
            }
            None => false,
        }
    }

    /// Rename a listener. Returns `false` for unknown ids.
    pub fn rename_listener(&self, id: &ListenerId, name: String) -> bool {
        match self.lock().listeners.get_mut(id) {
            Some(listener) => {
                listener.set_name(name);
                true
            }
            None => false,
        }
    }

    /// Remove a beacon from the cache (administrative delete; the
    /// caller also deletes the stored row).
    pub fn remove_beacon(&self, id: &BeaconId) -> bool {
        self.lock().beacons.remove(id).is_some()
    }

    /// Remove a listener from the cache.
    pub fn remove_listener(&self, id: &ListenerId) -> bool {
        self.lock().listeners.remove(id).is_some()
    }

    /// Copy out every beacon row (administrative listing).
    #[must_use]
    pub fn beacon_rows(&self) -> Vec<BeaconRow> {
        self.lock().beacons.values().map(Beacon::to_row).collect()
    }

    /// Copy out every listener row.
    #[must_use]
    pub fn listener_rows(&self) -> Vec<ListenerRow> {
        self.lock().listeners.values().map(Listener::to_row).collect()
    }

    /// Copy out one beacon row.
    #[must_use]
    pub fn beacon_row(&self, id: &BeaconId) -> Option<BeaconRow> {
        self.lock().beacons.get(id).map(Beacon::to_row)
    }

    /// Number of cached beacons.
    #[must_use]
    pub fn beacon_count(&self) -> usize {
        self.lock().beacons.len()
    }

    /// Number of cached listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    // ---- persistence support --------------------------------------------

    /// Stored keys with no cache entry, in need of backfill.
    #[must_use]
    pub fn missing_beacon_ids(&self, stored: &[BeaconId]) -> Vec<BeaconId> {
        let shelves = self.lock();
        stored
            .iter()
            .filter(|id| !shelves.beacons.contains_key(id))
            .copied()
            .collect()
    }

    /// Stored listener keys with no cache entry.
    #[must_use]
    pub fn missing_listener_ids(&self, stored: &[ListenerId]) -> Vec<ListenerId> {
        let shelves = self.lock();
        stored
            .iter()
            .filter(|id| !shelves.listeners.contains_key(id))
            .cloned()
            .collect()
    }

    /// Merge fetched rows into the cache. An already-cached record wins
    /// over storage, since the cache may be more current. Returns how
    /// many rows were actually merged.
    pub fn merge_beacon_rows(&self, rows: Vec<BeaconRow>) -> usize {
        let mut shelves = self.lock();
        let mut merged = 0;
        for row in rows {
            if shelves.beacons.contains_key(&row.id) {
                debug!(beacon = %row.id, "cache entry newer than storage, keeping");
                continue;
            }
            shelves.beacons.insert(row.id, Beacon::from_row(row));
            merged += 1;
        }
        merged
    }

    /// Merge fetched listener rows; cache wins on conflict.
    pub fn merge_listener_rows(&self, rows: Vec<ListenerRow>) -> usize {
        let mut shelves = self.lock();
        let mut merged = 0;
        for row in rows {
            if shelves.listeners.contains_key(&row.id) {
                continue;
            }
            shelves
                .listeners
                .insert(row.id.clone(), Listener::from_row(row));
            merged += 1;
        }
        merged
    }

    /// Snapshot every dirty, non-stale beacon for write-back.
    #[must_use]
    pub fn dirty_beacon_patches(&self, now: SystemTime, stale_after: Duration) -> Vec<BeaconPatch> {
        self.lock()
            .beacons
            .values()
            .filter(|b| !b.dirty().is_empty() && !b.is_stale(now, stale_after))
            .map(Beacon::snapshot)
            .collect()
    }

    /// Snapshot every dirty, non-stale listener for write-back.
    #[must_use]
    pub fn dirty_listener_patches(
        &self,
        now: SystemTime,
        stale_after: Duration,
    ) -> Vec<ListenerPatch> {
        self.lock()
            .listeners
            .values()
            .filter(|l| !l.dirty().is_empty() && !l.is_stale(now, stale_after))
            .map(Listener::snapshot)
            .collect()
    }

    /// Clear the dirty bits captured by successfully written snapshots.
    pub fn confirm_beacon_flush(&self, patches: &[BeaconPatch]) {
        let mut shelves = self.lock();
        for patch in patches {
            if let Some(beacon) = shelves.beacons.get_mut(&patch.id) {
                beacon.clear_dirty(patch.captured);
            }
        }
    }

    /// Clear captured listener dirty bits after a successful write.
    pub fn confirm_listener_flush(&self, patches: &[ListenerPatch]) {
        let mut shelves = self.lock();
        for patch in patches {
            if let Some(listener) = shelves.listeners.get_mut(&patch.id) {
                listener.clear_dirty(patch.captured);
            }
        }
    }
}
