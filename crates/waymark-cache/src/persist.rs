//! Periodic cache/storage reconciliation.
//!
//! The persister runs on its own timer, independent of packet arrival.
//! Each cycle backfills cache-missing rows from storage, then flushes
//! dirty non-stale records in batched upserts, one batch per distinct
//! column set. The snapshot happens under the cache lock; the storage
//! write awaits afterwards, so packets authenticated during the write
//! simply dirty more bits for the next cycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use crate::cache::CacheService;
use crate::entity::{BeaconPatch, FieldSet, ListenerPatch};
use crate::error::StorageError;
use crate::storage::Storage;

/// Persistence timing knobs.
#[derive(Debug, Clone, Copy)]
pub struct PersistencePolicy {
    /// Delay between reconciliation cycles
    pub interval: Duration,
    /// Age past which an unseen entity is excluded from write-back
    pub stale_after: Duration,
}

impl Default for PersistencePolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            stale_after: Duration::from_secs(30),
        }
    }
}

/// The periodic persistence service.
pub struct Persister {
    cache: Arc<CacheService>,
    storage: Arc<dyn Storage>,
    policy: PersistencePolicy,
}

impl Persister {
    /// Build a persister over a cache and a storage backend.
    #[must_use]
    pub fn new(
        cache: Arc<CacheService>,
        storage: Arc<dyn Storage>,
        policy: PersistencePolicy,
    ) -> Self {
        Self {
            cache,
            storage,
            policy,
        }
    }

    /// Run reconciliation cycles forever.
    ///
    /// Cycle failures are logged and retried on the next tick; a hung
    /// storage write delays this task only, never packet processing.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.policy.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(error) = self.cycle().await {
                warn!(%error, "persistence cycle failed");
            }
        }
    }

    /// One reconciliation cycle: backfill, then flush.
    ///
    /// # Errors
    ///
    /// Returns the error when reading the stored key set fails; flush
    /// failures are logged per batch and retried next cycle instead.
    pub async fn cycle(&self) -> Result<(), StorageError> {
        self.backfill().await?;
        self.flush().await;
        Ok(())
    }

    /// Pull rows present in storage but absent from the cache.
    async fn backfill(&self) -> Result<(), StorageError> {
        let stored = self.storage.beacon_ids().await?;
        let missing = self.cache.missing_beacon_ids(&stored);
        if !missing.is_empty() {
            let rows = self.storage.fetch_beacons(&missing).await?;
            let merged = self.cache.merge_beacon_rows(rows);
            debug!(merged, "backfilled beacons from storage");
        }

        let stored = self.storage.listener_ids().await?;
        let missing = self.cache.missing_listener_ids(&stored);
        if !missing.is_empty() {
            let rows = self.storage.fetch_listeners(&missing).await?;
            let merged = self.cache.merge_listener_rows(rows);
            debug!(merged, "backfilled listeners from storage");
        }
        Ok(())
    }

    /// Write every dirty, non-stale record back, batched by column set.
    async fn flush(&self) {
        let now = SystemTime::now();
        let beacons = self
            .cache
            .dirty_beacon_patches(now, self.policy.stale_after);
        for (columns, batch) in partition_by(beacons, |p: &BeaconPatch| p.columns) {
            match self.storage.upsert_beacons(&batch).await {
                Ok(()) => self.cache.confirm_beacon_flush(&batch),
                Err(error) => {
                    warn!(%error, rows = batch.len(), ?columns, "beacon flush failed, will retry");
                }
            }
        }

        let listeners = self
            .cache
            .dirty_listener_patches(now, self.policy.stale_after);
        for (columns, batch) in partition_by(listeners, |p: &ListenerPatch| p.columns) {
            match self.storage.upsert_listeners(&batch).await {
                Ok(()) => self.cache.confirm_listener_flush(&batch),
                Err(error) => {
                    warn!(%error, rows = batch.len(), ?columns, "listener flush failed, will retry");
                }
            }
        }
    }
}

/// Group snapshots by their exact column set so each batch can go out
/// as one uniform multi-row upsert.
fn partition_by<T, F: Fn(&T) -> FieldSet>(items: Vec<T>, key: F) -> HashMap<FieldSet, Vec<T>> {
    let mut groups: HashMap<FieldSet, Vec<T>> = HashMap::new();
    for item in items {
        groups.entry(key(&item)).or_default().push(item);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Beacon, BeaconField, Field};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use waymark_crypto::MasterKey;
    use waymark_proto::{BeaconId, ListenerId};

    fn setup(now: SystemTime) -> (Arc<CacheService>, Arc<crate::MemoryStorage>) {
        let cache = Arc::new(CacheService::new());
        let storage = Arc::new(crate::MemoryStorage::new());
        let id = BeaconId::from_bytes([1, 1, 1, 1, 1, 1]);
        let key = MasterKey::new([0xc3; 16]).derive_beacon_key(id.as_bytes());
        cache.insert_first_sight(Beacon::first_sight(
            id,
            key,
            5,
            50,
            0.0,
            ListenerId::Opaque(b"gate".to_vec()),
            now,
        ));
        cache.touch_listener(&ListenerId::Opaque(b"gate".to_vec()), now);
        (cache, storage)
    }

    fn persister(cache: &Arc<CacheService>, storage: Arc<dyn Storage>) -> Persister {
        Persister::new(
            cache.clone(),
            storage,
            PersistencePolicy {
                interval: Duration::from_millis(10),
                stale_after: Duration::from_secs(3600),
            },
        )
    }

    #[tokio::test]
    async fn cycle_flushes_dirty_records() {
        let (cache, storage) = setup(SystemTime::now());
        let p = persister(&cache, storage.clone());
        p.cycle().await.unwrap();

        assert_eq!(storage.beacon_ids().await.unwrap().len(), 1);
        assert_eq!(storage.listener_ids().await.unwrap().len(), 1);
        // Everything clean: second cycle has nothing to write.
        assert!(cache
            .dirty_beacon_patches(SystemTime::now(), Duration::from_secs(3600))
            .is_empty());
    }

    #[tokio::test]
    async fn backfill_restores_missing_rows_without_overwriting() {
        let now = SystemTime::now();
        let (cache, storage) = setup(now);
        let p = persister(&cache, storage.clone());
        p.cycle().await.unwrap();

        let id = BeaconId::from_bytes([1, 1, 1, 1, 1, 1]);
        cache.remove_beacon(&id);
        assert_eq!(cache.beacon_count(), 0);

        p.cycle().await.unwrap();
        assert_eq!(cache.beacon_count(), 1);
        assert_eq!(cache.beacon_row(&id).unwrap().dk, 5);

        // Cached state beats storage on the next backfill.
        cache.apply_validated(&id, 6, 60, ListenerId::Opaque(b"gate".to_vec()), now);
        p.cycle().await.unwrap();
        assert_eq!(cache.beacon_row(&id).unwrap().dk, 6);
    }

    #[tokio::test]
    async fn mixed_column_sets_are_partitioned() {
        let now = SystemTime::now();
        let (cache, storage) = setup(now);
        // A second beacon with a different dirty shape.
        let id2 = BeaconId::from_bytes([2, 2, 2, 2, 2, 2]);
        let key = MasterKey::new([0xc3; 16]).derive_beacon_key(id2.as_bytes());
        cache.insert_first_sight(Beacon::first_sight(
            id2,
            key,
            9,
            90,
            0.0,
            ListenerId::Opaque(b"gate".to_vec()),
            now,
        ));
        let p = persister(&cache, storage.clone());
        p.cycle().await.unwrap();

        let id1 = BeaconId::from_bytes([1, 1, 1, 1, 1, 1]);
        cache.record_rejection(&id1, crate::Rejection::BadMac);
        cache.apply_validated(&id2, 10, 95, ListenerId::Opaque(b"gate".to_vec()), now);

        let patches = cache.dirty_beacon_patches(now, Duration::from_secs(3600));
        let groups = partition_by(patches, |p: &BeaconPatch| p.columns);
        assert_eq!(groups.len(), 2);

        p.cycle().await.unwrap();
        let rows = storage.fetch_beacons(&[id1, id2]).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    /// Storage that fails every upsert until released.
    #[derive(Default)]
    struct FlakyStorage {
        inner: crate::MemoryStorage,
        failing: AtomicBool,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Storage for FlakyStorage {
        async fn beacon_ids(&self) -> Result<Vec<BeaconId>, StorageError> {
            self.inner.beacon_ids().await
        }
        async fn listener_ids(&self) -> Result<Vec<ListenerId>, StorageError> {
            self.inner.listener_ids().await
        }
        async fn fetch_beacons(&self, ids: &[BeaconId]) -> Result<Vec<crate::BeaconRow>, StorageError> {
            self.inner.fetch_beacons(ids).await
        }
        async fn fetch_listeners(
            &self,
            ids: &[ListenerId],
        ) -> Result<Vec<crate::ListenerRow>, StorageError> {
            self.inner.fetch_listeners(ids).await
        }
        async fn upsert_beacons(&self, patches: &[BeaconPatch]) -> Result<(), StorageError> {
            self.attempts.fetch_add(1, Ordering::Relaxed);
            if self.failing.load(Ordering::Relaxed) {
                return Err(StorageError::Unavailable);
            }
            self.inner.upsert_beacons(patches).await
        }
        async fn upsert_listeners(&self, patches: &[ListenerPatch]) -> Result<(), StorageError> {
            if self.failing.load(Ordering::Relaxed) {
                return Err(StorageError::Unavailable);
            }
            self.inner.upsert_listeners(patches).await
        }
        async fn delete_beacon(&self, id: &BeaconId) -> Result<(), StorageError> {
            self.inner.delete_beacon(id).await
        }
        async fn delete_listener(&self, id: &ListenerId) -> Result<(), StorageError> {
            self.inner.delete_listener(id).await
        }
    }

    #[tokio::test]
    async fn failed_flush_keeps_dirty_bits_for_retry() {
        let now = SystemTime::now();
        let (cache, _) = setup(now);
        let storage = Arc::new(FlakyStorage::default());
        storage.failing.store(true, Ordering::Relaxed);
        let p = persister(&cache, storage.clone());

        p.cycle().await.unwrap();
        assert!(storage.attempts.load(Ordering::Relaxed) >= 1);
        let id = BeaconId::from_bytes([1, 1, 1, 1, 1, 1]);
        assert!(cache
            .beacon_row(&id)
            .is_some_and(|_| !cache
                .dirty_beacon_patches(now, Duration::from_secs(3600))
                .is_empty()));

        storage.failing.store(false, Ordering::Relaxed);
        p.cycle().await.unwrap();
        assert_eq!(storage.beacon_ids().await.unwrap().len(), 1);
        assert!(cache
            .dirty_beacon_patches(now, Duration::from_secs(3600))
            .is_empty());
    }

    #[test]
    fn partition_groups_by_exact_column_set() {
        let mut a = FieldSet::EMPTY;
        a.insert(BeaconField::Dk);
        let mut b = FieldSet::EMPTY;
        b.insert(BeaconField::Dk);
        b.insert(BeaconField::Clock);
        let groups = partition_by(vec![a, a, b], |set: &FieldSet| *set);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[&a].len(), 2);
        assert_eq!(groups[&b].len(), 1);
        // Field trait is what keeps the sets type-checked.
        assert!(groups[&b][0].contains(BeaconField::Clock));
        let _ = BeaconField::Clock.mask();
    }
}
