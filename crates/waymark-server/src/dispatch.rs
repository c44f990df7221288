//! Packet dispatch pipeline.
//!
//! Dispatch is split in two phases around the wire reply. The first
//! phase decodes the header and listener id, upserts the listener, and
//! decides ACK or NACK; for a well-formed SECURE packet it returns the
//! deferred authentication work. The connection sends the reply and
//! only then runs the second phase. The ordering is a deliberate
//! timing-channel mitigation: a rejection after the ACK (bad MAC,
//! replay, bad DK) is the beacon's fault, not the listener's, and must
//! not be distinguishable on the wire from a success by latency or by
//! ACK/NACK choice. Rejections surface through the per-beacon counters
//! and the log instead.

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};
use waymark_cache::{Beacon, CacheService, Rejection};
use waymark_crypto::{DkPolicy, DkVerdict, MasterKey, open_report};
use waymark_proto::{ListenerId, Packet, PacketType, SecureReport};

use crate::session::Response;

/// Deferred SECURE authentication work, run after the ACK is sent.
#[derive(Debug)]
pub struct SecureJob {
    listener_id: ListenerId,
    report: SecureReport,
}

/// Stateless dispatcher over the shared cache.
pub struct PacketHandler {
    cache: std::sync::Arc<CacheService>,
    master_key: MasterKey,
    dk_policy: DkPolicy,
}

impl PacketHandler {
    /// Build a handler over the injected cache.
    #[must_use]
    pub fn new(
        cache: std::sync::Arc<CacheService>,
        master_key: MasterKey,
        dk_policy: DkPolicy,
    ) -> Self {
        Self {
            cache,
            master_key,
            dk_policy,
        }
    }

    /// Phase one: decode, upsert the listener, pick the reply.
    ///
    /// Returns the reply to put on the wire and, for a well-formed
    /// SECURE packet, the authentication job to run once the reply has
    /// been sent.
    #[must_use]
    pub fn dispatch(&self, packet: &[u8]) -> (Response, Option<SecureJob>) {
        let now = SystemTime::now();

        let decoded = match Packet::parse(packet) {
            Ok(decoded) => decoded,
            Err(error) => {
                debug!(%error, "rejecting packet");
                return (Response::Nack, None);
            }
        };
        let listener_id = match decoded.listener_id() {
            Ok(listener_id) => listener_id,
            Err(error) => {
                debug!(%error, "rejecting packet");
                return (Response::Nack, None);
            }
        };

        if self.cache.touch_listener(&listener_id, now) {
            info!(listener = %listener_id, "new listener");
        }

        match decoded.packet_type() {
            PacketType::Keepalive => {
                debug!(listener = %listener_id, "keepalive");
                (Response::Ack, None)
            }
            PacketType::Data => {
                debug!(listener = %listener_id, "legacy data packet, ignored");
                (Response::Ack, None)
            }
            PacketType::Secure => {
                let payload = match decoded.payload() {
                    Ok(payload) => payload,
                    Err(error) => {
                        debug!(%error, "rejecting packet");
                        return (Response::Nack, None);
                    }
                };
                match SecureReport::parse(payload) {
                    Ok(report) => (
                        Response::Ack,
                        Some(SecureJob {
                            listener_id,
                            report,
                        }),
                    ),
                    Err(error) => {
                        debug!(listener = %listener_id, %error, "rejecting secure payload");
                        (Response::Nack, None)
                    }
                }
            }
        }
    }

    /// Phase two: decrypt, validate, commit. Entirely in-memory; runs
    /// without a suspension point so the beacon record is never seen
    /// half-updated.
    pub fn authenticate(&self, job: SecureJob) {
        let now = SystemTime::now();
        let SecureJob {
            listener_id,
            report,
        } = job;
        let beacon_id = report.beacon_id;

        let stored = self.cache.beacon_auth_state(&beacon_id);
        // Derive once on first sight; cached forever after.
        let key = match &stored {
            Some(snapshot) => snapshot.key.clone(),
            None => self.master_key.derive_beacon_key(beacon_id.as_bytes()),
        };

        let reading = match open_report(
            &key,
            beacon_id.as_bytes(),
            &report.nonce,
            &report.ciphertext,
            &report.tag,
        ) {
            Ok(reading) => reading,
            Err(error) => {
                warn!(beacon = %beacon_id, listener = %listener_id, %error, "report rejected");
                if stored.is_some() {
                    self.cache.record_rejection(&beacon_id, Rejection::BadMac);
                }
                return;
            }
        };

        let Some(stored) = stored else {
            let clock_origin = (unix_seconds(now) - f64::from(reading.clock)).max(0.0);
            info!(
                beacon = %beacon_id,
                listener = %listener_id,
                clock = reading.clock,
                "new beacon, trusting on first use"
            );
            self.cache.insert_first_sight(Beacon::first_sight(
                beacon_id,
                key,
                reading.dk,
                reading.clock,
                clock_origin,
                listener_id,
                now,
            ));
            return;
        };

        match self
            .dk_policy
            .validate(stored.dk, stored.clock, reading.dk, reading.clock)
        {
            DkVerdict::Replay => {
                warn!(
                    beacon = %beacon_id,
                    listener = %listener_id,
                    stored_clock = stored.clock,
                    claimed_clock = reading.clock,
                    "attempted replay"
                );
                self.cache.record_rejection(&beacon_id, Rejection::Replay);
            }
            DkVerdict::Mismatch => {
                warn!(beacon = %beacon_id, listener = %listener_id, "invalid dk");
                self.cache.record_rejection(&beacon_id, Rejection::BadDk);
            }
            DkVerdict::Accepted => {
                let skew = unix_seconds(now) - (stored.clock_origin + f64::from(reading.clock));
                debug!(
                    beacon = %beacon_id,
                    listener = %listener_id,
                    clock = reading.clock,
                    flags = reading.flags,
                    skew_s = format_args!("{skew:.2}"),
                    distance_m = report.distance_m(),
                    variance_m = report.variance_m(),
                    "validated reading"
                );
                self.cache
                    .apply_validated(&beacon_id, reading.dk, reading.clock, listener_id, now);
            }
        }
    }
}

fn unix_seconds(now: SystemTime) -> f64 {
    now.duration_since(UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64())
}
