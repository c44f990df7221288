//! Master key handling and per-beacon key derivation.
//!
//! Every beacon shares no provisioning traffic with the backend; its
//! symmetric key is derived on first sight as
//! `CMAC-AES-128(master_key, beacon_id)` and cached for the life of the
//! record. Derivation is deterministic, so a wiped cache recovers the
//! same key from the same address.

use crate::error::CryptoError;
use crate::KEY_SIZE;
use aes::Aes128;
use cmac::{Cmac, Mac};
use zeroize::ZeroizeOnDrop;

/// Deployment-wide master key (16 bytes).
///
/// Zeroized on drop. Loading and storage of the key material is the
/// configuration layer's concern.
#[derive(Clone, ZeroizeOnDrop)]
pub struct MasterKey([u8; KEY_SIZE]);

impl MasterKey {
    /// Create from raw key bytes.
    #[must_use]
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a slice.
    ///
    /// # Errors
    ///
    /// Fails if the slice is not exactly [`KEY_SIZE`] bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; KEY_SIZE] =
            slice
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: KEY_SIZE,
                    actual: slice.len(),
                })?;
        Ok(Self(bytes))
    }

    /// Derive the symmetric key for a beacon address.
    #[must_use]
    pub fn derive_beacon_key(&self, beacon_id: &[u8]) -> BeaconKey {
        let mut mac = Cmac::<Aes128>::new(&self.0.into());
        mac.update(beacon_id);
        let digest = mac.finalize().into_bytes();
        BeaconKey(digest.into())
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

/// Per-beacon symmetric key, derived once and then cached.
#[derive(Clone, PartialEq, Eq, ZeroizeOnDrop)]
pub struct BeaconKey([u8; KEY_SIZE]);

impl BeaconKey {
    /// Create from raw key bytes (e.g. a stored row).
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes, for persistence.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for BeaconKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BeaconKey(..)")
    }
}
