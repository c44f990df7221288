//! Dirty-tracked entity records.
//!
//! Every mutable field write marks its field in a per-record bitset;
//! persistence snapshots the dirty columns and clears exactly the bits
//! it captured once the durable write succeeds. Records are statically
//! typed: the set of fields is the [`BeaconField`] / [`ListenerField`]
//! enums, checked at compile time rather than against a column list at
//! runtime.

use std::time::{Duration, SystemTime};

use waymark_crypto::BeaconKey;
use waymark_proto::{BeaconId, ListenerId};

/// A field marker usable in a [`FieldSet`]
pub trait Field: Copy {
    /// Unique single-bit mask for this field
    fn mask(self) -> u16;
}

/// Small bitset of entity fields.
///
/// Used both as the per-record dirty set and as the partition key when
/// grouping snapshots with identical column sets into one batched
/// upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FieldSet(u16);

impl FieldSet {
    /// The empty set
    pub const EMPTY: Self = Self(0);

    /// Add a field
    pub fn insert<F: Field>(&mut self, field: F) {
        self.0 |= field.mask();
    }

    /// Check membership
    #[must_use]
    pub fn contains<F: Field>(self, field: F) -> bool {
        self.0 & field.mask() != 0
    }

    /// Union of two sets
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Remove every field present in `other`
    pub fn clear(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// True when no field is set
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }
}

/// Beacon record fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum BeaconField {
    /// Display name
    Name = 1 << 0,
    /// Beacon-group reference
    GroupId = 1 << 1,
    /// Derived symmetric key
    Key = 1 << 2,
    /// Last validated dynamic key
    Dk = 1 << 3,
    /// Last validated clock
    Clock = 1 << 4,
    /// Estimated wall-clock offset of clock zero
    ClockOrigin = 1 << 5,
    /// Most recent relaying listener
    ListenerId = 1 << 6,
    /// Last validated sighting
    LastSeen = 1 << 7,
    /// Replay rejection counter
    RejectedReplay = 1 << 8,
    /// MAC rejection counter
    RejectedMac = 1 << 9,
    /// DK rejection counter
    RejectedDk = 1 << 10,
}

impl BeaconField {
    /// Every beacon field
    pub const ALL: FieldSet = FieldSet::from_bits((1 << 11) - 1);

    /// Columns every snapshot must carry so a batched upsert can also
    /// insert (non-null constraints on key, dk and clock).
    pub const MANDATORY: FieldSet = FieldSet::from_bits(
        (BeaconField::Key as u16) | (BeaconField::Dk as u16) | (BeaconField::Clock as u16),
    );
}

impl Field for BeaconField {
    fn mask(self) -> u16 {
        self as u16
    }
}

/// Listener record fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ListenerField {
    /// Display name
    Name = 1 << 0,
    /// Zone reference
    ZoneId = 1 << 1,
    /// Last sighting on the wire
    LastSeen = 1 << 2,
}

impl ListenerField {
    /// Every listener field
    pub const ALL: FieldSet = FieldSet::from_bits((1 << 3) - 1);
}

impl Field for ListenerField {
    fn mask(self) -> u16 {
        self as u16
    }
}

/// Authoritative in-memory beacon record.
///
/// Created trust-on-first-use when an address first appears on the
/// wire, or hydrated clean from a stored row. Mutation happens only
/// through the setters, which maintain the dirty set.
#[derive(Debug, Clone)]
pub struct Beacon {
    id: BeaconId,
    name: Option<String>,
    group_id: Option<i32>,
    key: BeaconKey,
    dk: u32,
    clock: u32,
    clock_origin: f64,
    listener_id: Option<ListenerId>,
    last_seen: SystemTime,
    rejected_replay: u32,
    rejected_mac: u32,
    rejected_dk: u32,
    dirty: FieldSet,
}

impl Beacon {
    /// Create a record for a beacon never seen before.
    ///
    /// Every field starts dirty so the first persistence cycle inserts
    /// the complete row.
    #[must_use]
    pub fn first_sight(
        id: BeaconId,
        key: BeaconKey,
        dk: u32,
        clock: u32,
        clock_origin: f64,
        listener_id: ListenerId,
        now: SystemTime,
    ) -> Self {
        Self {
            id,
            name: Some(format!("Beacon {id}")),
            group_id: None,
            key,
            dk,
            clock,
            clock_origin,
            listener_id: Some(listener_id),
            last_seen: now,
            rejected_replay: 0,
            rejected_mac: 0,
            rejected_dk: 0,
            dirty: BeaconField::ALL,
        }
    }

    /// Hydrate a clean record from a stored row.
    #[must_use]
    pub fn from_row(row: BeaconRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            group_id: row.group_id,
            key: BeaconKey::from_bytes(row.key),
            dk: row.dk,
            clock: row.clock,
            clock_origin: row.clock_origin,
            listener_id: row.listener_id,
            last_seen: row.last_seen,
            rejected_replay: row.rejected_replay,
            rejected_mac: row.rejected_mac,
            rejected_dk: row.rejected_dk,
            dirty: FieldSet::EMPTY,
        }
    }

    /// Beacon hardware address
    #[must_use]
    pub fn id(&self) -> BeaconId {
        self.id
    }

    /// Derived symmetric key (never recomputed once stored)
    #[must_use]
    pub fn key(&self) -> &BeaconKey {
        &self.key
    }

    /// Last validated dynamic key
    #[must_use]
    pub fn dk(&self) -> u32 {
        self.dk
    }

    /// Last validated clock
    #[must_use]
    pub fn clock(&self) -> u32 {
        self.clock
    }

    /// Estimated wall-clock seconds of the beacon's clock zero
    #[must_use]
    pub fn clock_origin(&self) -> f64 {
        self.clock_origin
    }

    /// Display name
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Replay rejection count
    #[must_use]
    pub fn rejected_replay(&self) -> u32 {
        self.rejected_replay
    }

    /// MAC rejection count
    #[must_use]
    pub fn rejected_mac(&self) -> u32 {
        self.rejected_mac
    }

    /// DK rejection count
    #[must_use]
    pub fn rejected_dk(&self) -> u32 {
        self.rejected_dk
    }

    /// Current dirty set
    #[must_use]
    pub fn dirty(&self) -> FieldSet {
        self.dirty
    }

    /// Rename the beacon (administrative surface).
    pub fn set_name(&mut self, name: String) {
        if self.name.as_deref() == Some(&name) {
            return;
        }
        self.name = Some(name);
        self.dirty.insert(BeaconField::Name);
    }

    /// Assign the beacon to a group (administrative surface).
    pub fn set_group(&mut self, group_id: Option<i32>) {
        if self.group_id == group_id {
            return;
        }
        self.group_id = group_id;
        self.dirty.insert(BeaconField::GroupId);
    }

    /// Commit a validated reading: the only way `dk` and `clock` move.
    ///
    /// Validation happens against a snapshot taken outside the cache
    /// lock, so two connections relaying the same beacon can validate
    /// readings concurrently and commit out of order. The stored clock
    /// never regresses: a commit below it lost that race and is
    /// discarded whole.
    pub fn record_validated(
        &mut self,
        dk: u32,
        clock: u32,
        listener_id: ListenerId,
        now: SystemTime,
    ) {
        if clock < self.clock {
            return;
        }
        if self.dk != dk {
            self.dk = dk;
            self.dirty.insert(BeaconField::Dk);
        }
        if self.clock != clock {
            self.clock = clock;
            self.dirty.insert(BeaconField::Clock);
        }
        if self.listener_id.as_ref() != Some(&listener_id) {
            self.listener_id = Some(listener_id);
            self.dirty.insert(BeaconField::ListenerId);
        }
        self.last_seen = now;
        self.dirty.insert(BeaconField::LastSeen);
    }

    /// Count a rejected replay attempt.
    pub fn record_replay(&mut self) {
        self.rejected_replay += 1;
        self.dirty.insert(BeaconField::RejectedReplay);
    }

    /// Count a failed tag verification.
    pub fn record_mac_failure(&mut self) {
        self.rejected_mac += 1;
        self.dirty.insert(BeaconField::RejectedMac);
    }

    /// Count a dynamic-key mismatch.
    pub fn record_dk_mismatch(&mut self) {
        self.rejected_dk += 1;
        self.dirty.insert(BeaconField::RejectedDk);
    }

    /// Whether the beacon has been unseen past `timeout`.
    ///
    /// Stale records are skipped by persistence so timed-out hardware
    /// state is not resurrected, but they stay cached until an
    /// administrator deletes them.
    #[must_use]
    pub fn is_stale(&self, now: SystemTime, timeout: Duration) -> bool {
        now.duration_since(self.last_seen)
            .is_ok_and(|age| age > timeout)
    }

    /// Snapshot the dirty columns for write-back.
    ///
    /// The snapshot always carries the primary key plus the mandatory
    /// columns, so a partition of snapshots can be upserted even when
    /// some of its rows do not exist in storage yet.
    #[must_use]
    pub fn snapshot(&self) -> BeaconPatch {
        let captured = self.dirty;
        let columns = captured.union(BeaconField::MANDATORY);
        BeaconPatch {
            id: self.id,
            columns,
            captured,
            name: self.name.clone(),
            group_id: self.group_id,
            key: *self.key.as_bytes(),
            dk: self.dk,
            clock: self.clock,
            clock_origin: self.clock_origin,
            listener_id: self.listener_id.clone(),
            last_seen: self.last_seen,
            rejected_replay: self.rejected_replay,
            rejected_mac: self.rejected_mac,
            rejected_dk: self.rejected_dk,
        }
    }

    /// Clear dirty bits captured by a successfully written snapshot.
    ///
    /// Bits dirtied after the snapshot was taken are untouched; a field
    /// re-dirtied during the write keeps last-writer-wins semantics on
    /// the bit, not the written value.
    pub fn clear_dirty(&mut self, captured: FieldSet) {
        self.dirty.clear(captured);
    }

    /// Copy out a full row (administrative listing, tests).
    #[must_use]
    pub fn to_row(&self) -> BeaconRow {
        BeaconRow {
            id: self.id,
            name: self.name.clone(),
            group_id: self.group_id,
            key: *self.key.as_bytes(),
            dk: self.dk,
            clock: self.clock,
            clock_origin: self.clock_origin,
            listener_id: self.listener_id.clone(),
            last_seen: self.last_seen,
            rejected_replay: self.rejected_replay,
            rejected_mac: self.rejected_mac,
            rejected_dk: self.rejected_dk,
        }
    }
}

/// Authoritative in-memory listener record.
#[derive(Debug, Clone)]
pub struct Listener {
    id: ListenerId,
    name: Option<String>,
    zone_id: Option<i32>,
    last_seen: SystemTime,
    dirty: FieldSet,
}

impl Listener {
    /// Create a record for a listener never seen before.
    #[must_use]
    pub fn first_sight(id: ListenerId, now: SystemTime) -> Self {
        let name = Some(format!("Listener {id}"));
        Self {
            id,
            name,
            zone_id: None,
            last_seen: now,
            dirty: ListenerField::ALL,
        }
    }

    /// Hydrate a clean record from a stored row.
    #[must_use]
    pub fn from_row(row: ListenerRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            zone_id: row.zone_id,
            last_seen: row.last_seen,
            dirty: FieldSet::EMPTY,
        }
    }

    /// Listener address
    #[must_use]
    pub fn id(&self) -> &ListenerId {
        &self.id
    }

    /// Display name
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Last sighting
    #[must_use]
    pub fn last_seen(&self) -> SystemTime {
        self.last_seen
    }

    /// Current dirty set
    #[must_use]
    pub fn dirty(&self) -> FieldSet {
        self.dirty
    }

    /// Record a sighting on the wire.
    pub fn touch(&mut self, now: SystemTime) {
        self.last_seen = now;
        self.dirty.insert(ListenerField::LastSeen);
    }

    /// Rename the listener (administrative surface).
    pub fn set_name(&mut self, name: String) {
        if self.name.as_deref() == Some(&name) {
            return;
        }
        self.name = Some(name);
        self.dirty.insert(ListenerField::Name);
    }

    /// Assign the listener to a zone (administrative surface).
    pub fn set_zone(&mut self, zone_id: Option<i32>) {
        if self.zone_id == zone_id {
            return;
        }
        self.zone_id = zone_id;
        self.dirty.insert(ListenerField::ZoneId);
    }

    /// Whether the listener has been unseen past `timeout`.
    #[must_use]
    pub fn is_stale(&self, now: SystemTime, timeout: Duration) -> bool {
        now.duration_since(self.last_seen)
            .is_ok_and(|age| age > timeout)
    }

    /// Snapshot the dirty columns for write-back.
    #[must_use]
    pub fn snapshot(&self) -> ListenerPatch {
        let captured = self.dirty;
        ListenerPatch {
            id: self.id.clone(),
            columns: captured,
            captured,
            name: self.name.clone(),
            zone_id: self.zone_id,
            last_seen: self.last_seen,
        }
    }

    /// Clear dirty bits captured by a successfully written snapshot.
    pub fn clear_dirty(&mut self, captured: FieldSet) {
        self.dirty.clear(captured);
    }

    /// Copy out a full row.
    #[must_use]
    pub fn to_row(&self) -> ListenerRow {
        ListenerRow {
            id: self.id.clone(),
            name: self.name.clone(),
            zone_id: self.zone_id,
            last_seen: self.last_seen,
        }
    }
}

/// Full beacon row as stored durably.
#[derive(Debug, Clone, PartialEq)]
pub struct BeaconRow {
    /// Primary key
    pub id: BeaconId,
    /// Display name, nullable
    pub name: Option<String>,
    /// Group reference, nullable
    pub group_id: Option<i32>,
    /// Derived symmetric key
    pub key: [u8; 16],
    /// Last validated dynamic key
    pub dk: u32,
    /// Last validated clock
    pub clock: u32,
    /// Estimated wall-clock offset of clock zero
    pub clock_origin: f64,
    /// Most recent relaying listener, nullable
    pub listener_id: Option<ListenerId>,
    /// Last validated sighting
    pub last_seen: SystemTime,
    /// Replay rejection counter
    pub rejected_replay: u32,
    /// MAC rejection counter
    pub rejected_mac: u32,
    /// DK rejection counter
    pub rejected_dk: u32,
}

/// Dirty-column snapshot of a beacon.
///
/// `columns` names the columns this snapshot carries; values outside it
/// are unspecified and must be left untouched by the upsert. `captured`
/// records which dirty bits to clear after a successful write.
#[derive(Debug, Clone)]
pub struct BeaconPatch {
    /// Primary key
    pub id: BeaconId,
    /// Exact column set, the partition key for batching
    pub columns: FieldSet,
    /// Dirty bits captured at snapshot time
    pub captured: FieldSet,
    /// Name value, meaningful iff `columns` contains [`BeaconField::Name`]
    pub name: Option<String>,
    /// Group value, meaningful iff `columns` contains [`BeaconField::GroupId`]
    pub group_id: Option<i32>,
    /// Key bytes, always carried
    pub key: [u8; 16],
    /// Dynamic key, always carried
    pub dk: u32,
    /// Clock, always carried
    pub clock: u32,
    /// Clock origin, meaningful iff in `columns`
    pub clock_origin: f64,
    /// Listener reference, meaningful iff in `columns`
    pub listener_id: Option<ListenerId>,
    /// Last sighting, meaningful iff in `columns`
    pub last_seen: SystemTime,
    /// Replay counter, meaningful iff in `columns`
    pub rejected_replay: u32,
    /// MAC counter, meaningful iff in `columns`
    pub rejected_mac: u32,
    /// DK counter, meaningful iff in `columns`
    pub rejected_dk: u32,
}

/// Full listener row as stored durably.
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerRow {
    /// Primary key
    pub id: ListenerId,
    /// Display name, nullable
    pub name: Option<String>,
    /// Zone reference, nullable
    pub zone_id: Option<i32>,
    /// Last sighting
    pub last_seen: SystemTime,
}

/// Dirty-column snapshot of a listener.
#[derive(Debug, Clone)]
pub struct ListenerPatch {
    /// Primary key
    pub id: ListenerId,
    /// Exact column set, the partition key for batching
    pub columns: FieldSet,
    /// Dirty bits captured at snapshot time
    pub captured: FieldSet,
    /// Name value, meaningful iff in `columns`
    pub name: Option<String>,
    /// Zone value, meaningful iff in `columns`
    pub zone_id: Option<i32>,
    /// Last sighting, meaningful iff in `columns`
    pub last_seen: SystemTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use waymark_crypto::MasterKey;

    fn beacon(now: SystemTime) -> Beacon {
        let id = BeaconId::from_bytes([1, 2, 3, 4, 5, 6]);
        let key = MasterKey::new([0xc3; 16]).derive_beacon_key(id.as_bytes());
        Beacon::first_sight(
            id,
            key,
            0x1111,
            100,
            0.0,
            ListenerId::Opaque(b"gate".to_vec()),
            now,
        )
    }

    #[test]
    fn first_sight_is_fully_dirty() {
        let b = beacon(SystemTime::UNIX_EPOCH);
        assert_eq!(b.dirty(), BeaconField::ALL);
        assert_eq!(b.name(), Some("Beacon 010203040506"));
    }

    #[test]
    fn hydrated_row_is_clean() {
        let b = Beacon::from_row(beacon(SystemTime::UNIX_EPOCH).to_row());
        assert!(b.dirty().is_empty());
    }

    #[test]
    fn setters_mark_exactly_their_fields() {
        let now = SystemTime::UNIX_EPOCH;
        let mut b = Beacon::from_row(beacon(now).to_row());
        b.record_replay();
        assert!(b.dirty().contains(BeaconField::RejectedReplay));
        assert!(!b.dirty().contains(BeaconField::Dk));

        b.record_validated(0x2222, 200, ListenerId::Opaque(b"gate".to_vec()), now);
        assert!(b.dirty().contains(BeaconField::Dk));
        assert!(b.dirty().contains(BeaconField::Clock));
        assert!(b.dirty().contains(BeaconField::LastSeen));
        // Same listener as before: no spurious dirty bit.
        assert!(!b.dirty().contains(BeaconField::ListenerId));
    }

    #[test]
    fn unchanged_write_does_not_dirty() {
        let mut b = Beacon::from_row(beacon(SystemTime::UNIX_EPOCH).to_row());
        b.set_name("Beacon 010203040506".to_string());
        assert!(b.dirty().is_empty());
        b.set_name("dock door".to_string());
        assert!(b.dirty().contains(BeaconField::Name));
    }

    #[test]
    fn snapshot_carries_mandatory_columns() {
        let mut b = Beacon::from_row(beacon(SystemTime::UNIX_EPOCH).to_row());
        b.record_mac_failure();
        let patch = b.snapshot();
        assert!(patch.columns.contains(BeaconField::RejectedMac));
        assert!(patch.columns.contains(BeaconField::Key));
        assert!(patch.columns.contains(BeaconField::Dk));
        assert!(patch.columns.contains(BeaconField::Clock));
        assert!(!patch.columns.contains(BeaconField::Name));
        assert!(!patch.captured.contains(BeaconField::Key));
    }

    #[test]
    fn clear_dirty_spares_later_writes() {
        let now = SystemTime::UNIX_EPOCH;
        let mut b = Beacon::from_row(beacon(now).to_row());
        b.record_mac_failure();
        let patch = b.snapshot();
        // A write lands between snapshot and confirmation.
        b.record_replay();
        b.clear_dirty(patch.captured);
        assert!(!b.dirty().contains(BeaconField::RejectedMac));
        assert!(b.dirty().contains(BeaconField::RejectedReplay));
    }

    #[test]
    fn out_of_order_commit_is_discarded() {
        let now = SystemTime::UNIX_EPOCH;
        let mut b = Beacon::from_row(beacon(now).to_row());
        b.record_validated(0x2222, 105, ListenerId::Opaque(b"gate".to_vec()), now);
        // A slower connection commits an older reading afterwards.
        b.record_validated(0x3333, 103, ListenerId::Opaque(b"door".to_vec()), now);
        assert_eq!(b.clock(), 105);
        assert_eq!(b.dk(), 0x2222);
        assert_eq!(
            b.to_row().listener_id,
            Some(ListenerId::Opaque(b"gate".to_vec()))
        );
    }

    #[test]
    fn staleness_is_age_based() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        let b = beacon(SystemTime::UNIX_EPOCH);
        assert!(b.is_stale(now, Duration::from_secs(30)));
        assert!(!b.is_stale(now, Duration::from_secs(100)));
    }

    #[test]
    fn listener_touch_marks_last_seen_only() {
        let now = SystemTime::UNIX_EPOCH;
        let mut l = Listener::from_row(Listener::first_sight(
            ListenerId::Opaque(b"gate".to_vec()),
            now,
        )
        .to_row());
        l.touch(now + Duration::from_secs(1));
        assert!(l.dirty().contains(ListenerField::LastSeen));
        assert!(!l.dirty().contains(ListenerField::Name));
    }

    #[test]
    fn listener_first_sight_name_uses_display_form() {
        let l = Listener::first_sight(
            ListenerId::Hardware([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]),
            SystemTime::UNIX_EPOCH,
        );
        assert_eq!(l.name(), Some("Listener aabbccddeeff"));
    }
}
