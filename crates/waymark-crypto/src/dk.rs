//! Dynamic-key evolution and replay validation.
//!
//! Each beacon evolves a 32-bit dynamic key (DK) in lock-step with the
//! backend, with no key-exchange traffic: every `dk0_interval` clock
//! ticks the low 16 bits shift left one (epoch 0), every `dk1_interval`
//! ticks the high 16 bits do (epoch 1). The backend cannot know which
//! bits shifted in on the beacon side, so it shifts zeros into both the
//! key and a trust mask; a bit shifted out of the mask is a bit the
//! backend no longer gets to check.
//!
//! The reference firmware documentation nested the epoch-1 step inside
//! the epoch-0 branch, which made high-half evolution unreachable. The
//! two epochs are intentionally independent, so this implementation
//! evaluates them as independent boundary checks.

/// Which half of the dynamic key an epoch boundary evolves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Epoch {
    /// Low 16 bits, short interval
    Zero,
    /// High 16 bits, long interval
    One,
}

/// Outcome of validating one incoming reading against stored state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DkVerdict {
    /// Reading is consistent with the stored DK under the current mask
    Accepted,
    /// Clock regression: reject regardless of the DK value
    Replay,
    /// DK disagrees in a bit the backend still trusts
    Mismatch,
}

/// Advance one epoch boundary: shift the epoch's half of `dk` and
/// `mask` left one bit, discarding the top bit and filling with zero.
#[must_use]
pub fn evolve(dk: u32, mask: u32, epoch: Epoch) -> (u32, u32) {
    let (mut high, mut low) = (dk >> 16, dk & 0xffff);
    let (mut m_high, mut m_low) = (mask >> 16, mask & 0xffff);
    match epoch {
        Epoch::Zero => {
            low = (low << 1) & 0xffff;
            m_low = (m_low << 1) & 0xffff;
        }
        Epoch::One => {
            high = (high << 1) & 0xffff;
            m_high = (m_high << 1) & 0xffff;
        }
    }
    ((high << 16) | low, (m_high << 16) | m_low)
}

/// Epoch interval configuration, in clock ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DkPolicy {
    /// Ticks between low-half (epoch 0) boundaries
    pub dk0_interval: u32,
    /// Ticks between high-half (epoch 1) boundaries
    pub dk1_interval: u32,
}

impl Default for DkPolicy {
    fn default() -> Self {
        Self {
            dk0_interval: 7200,
            dk1_interval: 86400,
        }
    }
}

impl DkPolicy {
    /// Project stored DK state forward to `to_clock`, returning the
    /// expected `(dk, mask)` pair.
    ///
    /// Evolves once per epoch boundary in `(from_clock, to_clock]`.
    /// A half is fully shifted away after 16 boundaries, so the count
    /// saturates there and the projection is O(1) in elapsed time.
    #[must_use]
    pub fn project(&self, dk: u32, from_clock: u32, to_clock: u32) -> (u32, u32) {
        let mut dk = dk;
        let mut mask = 0xffff_ffff;
        for _ in 0..boundaries(from_clock, to_clock, self.dk0_interval).min(16) {
            (dk, mask) = evolve(dk, mask, Epoch::Zero);
        }
        for _ in 0..boundaries(from_clock, to_clock, self.dk1_interval).min(16) {
            (dk, mask) = evolve(dk, mask, Epoch::One);
        }
        (dk, mask)
    }

    /// Validate an incoming `(dk, clock)` pair against stored state.
    ///
    /// The replay check runs first and is independent of DK validity: a
    /// non-zero stored clock may never regress. An all-zero mask means
    /// every trusted bit has shifted away since last contact, so the
    /// reading is accepted unconditionally and trust re-established.
    #[must_use]
    pub fn validate(
        &self,
        stored_dk: u32,
        stored_clock: u32,
        new_dk: u32,
        new_clock: u32,
    ) -> DkVerdict {
        if stored_clock != 0 && new_clock < stored_clock {
            return DkVerdict::Replay;
        }
        let (expected, mask) = self.project(stored_dk, stored_clock, new_clock);
        if mask == 0 {
            return DkVerdict::Accepted;
        }
        if expected == new_dk & mask {
            DkVerdict::Accepted
        } else {
            DkVerdict::Mismatch
        }
    }
}

/// Count of multiples of `interval` in the half-open range `(from, to]`.
fn boundaries(from: u32, to: u32, interval: u32) -> u32 {
    if interval == 0 || to <= from {
        return 0;
    }
    to / interval - from / interval
}
