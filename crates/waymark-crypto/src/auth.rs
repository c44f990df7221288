//! AES-128-EAX authenticated decryption of beacon readings.
//!
//! A beacon encrypts its 9-byte reading under its derived key with a
//! 16-byte nonce of its own choosing, binding its own address as
//! associated data. The tag is truncated to 4 bytes to fit radio
//! budgets; the dynamic-key check compensates for the short tag.

use crate::error::CryptoError;
use crate::keys::BeaconKey;
use crate::{NONCE_SIZE, READING_SIZE, TAG_SIZE};
use aes::Aes128;
use eax::Eax;
use eax::aead::consts::U4;
use eax::aead::generic_array::GenericArray;
use eax::aead::{Aead, KeyInit, Payload};

/// AES-128-EAX with a 4-byte tag
type ReportCipher = Eax<Aes128, U4>;

/// Decrypted beacon telemetry reading.
///
/// Wire layout (little-endian): `clock:u32 | dk:u32 | flags:u8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaconReading {
    /// Monotonically non-decreasing counter maintained by the beacon
    pub clock: u32,
    /// Current dynamic-key value
    pub dk: u32,
    /// Firmware status flags
    pub flags: u8,
}

impl BeaconReading {
    /// Parse a decrypted plaintext.
    ///
    /// # Errors
    ///
    /// Fails unless the plaintext is exactly [`READING_SIZE`] bytes.
    pub fn from_plaintext(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != READING_SIZE {
            return Err(CryptoError::InvalidReadingLength {
                expected: READING_SIZE,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            clock: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            dk: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            flags: bytes[8],
        })
    }

    /// Serialize to the plaintext wire layout.
    #[must_use]
    pub fn to_plaintext(&self) -> [u8; READING_SIZE] {
        let mut out = [0u8; READING_SIZE];
        out[..4].copy_from_slice(&self.clock.to_le_bytes());
        out[4..8].copy_from_slice(&self.dk.to_le_bytes());
        out[8] = self.flags;
        out
    }
}

/// Decrypt and verify a sealed reading.
///
/// `beacon_id` is bound as associated data, so a reading cannot be
/// replayed under a different beacon address.
///
/// # Errors
///
/// Returns [`CryptoError::VerificationFailed`] on any tag mismatch.
/// Callers must not distinguish forgery from corruption.
pub fn open_report(
    key: &BeaconKey,
    beacon_id: &[u8],
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8; READING_SIZE],
    tag: &[u8; TAG_SIZE],
) -> Result<BeaconReading, CryptoError> {
    let cipher = ReportCipher::new(key.as_bytes().into());
    let mut sealed = [0u8; READING_SIZE + TAG_SIZE];
    sealed[..READING_SIZE].copy_from_slice(ciphertext);
    sealed[READING_SIZE..].copy_from_slice(tag);
    let plaintext = cipher
        .decrypt(
            GenericArray::from_slice(nonce),
            Payload {
                msg: &sealed,
                aad: beacon_id,
            },
        )
        .map_err(|_| CryptoError::VerificationFailed)?;
    BeaconReading::from_plaintext(&plaintext)
}

/// Seal a reading the way beacon firmware does.
///
/// Returns `(ciphertext, tag)`. Used by the beacon emulator and by
/// end-to-end tests to produce genuine SECURE payloads.
///
/// # Errors
///
/// Returns [`CryptoError::EncryptionFailed`] if the cipher rejects the
/// input (it does not for fixed-size readings).
pub fn seal_reading(
    key: &BeaconKey,
    beacon_id: &[u8],
    nonce: &[u8; NONCE_SIZE],
    reading: &BeaconReading,
) -> Result<([u8; READING_SIZE], [u8; TAG_SIZE]), CryptoError> {
    let cipher = ReportCipher::new(key.as_bytes().into());
    let sealed = cipher
        .encrypt(
            GenericArray::from_slice(nonce),
            Payload {
                msg: &reading.to_plaintext(),
                aad: beacon_id,
            },
        )
        .map_err(|_| CryptoError::EncryptionFailed)?;
    let mut ciphertext = [0u8; READING_SIZE];
    let mut tag = [0u8; TAG_SIZE];
    ciphertext.copy_from_slice(&sealed[..READING_SIZE]);
    tag.copy_from_slice(&sealed[READING_SIZE..]);
    Ok((ciphertext, tag))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::MasterKey;

    fn key() -> BeaconKey {
        MasterKey::new([0xc3; 16]).derive_beacon_key(b"\xaa\xbb\xcc\xdd\xee\xff")
    }

    #[test]
    fn seal_open_roundtrip() {
        let reading = BeaconReading {
            clock: 1234,
            dk: 0xdead_beef,
            flags: 0x03,
        };
        let nonce = [7u8; NONCE_SIZE];
        let (ct, tag) = seal_reading(&key(), b"\xaa\xbb\xcc\xdd\xee\xff", &nonce, &reading).unwrap();
        let opened = open_report(&key(), b"\xaa\xbb\xcc\xdd\xee\xff", &nonce, &ct, &tag).unwrap();
        assert_eq!(opened, reading);
    }

    #[test]
    fn tampered_tag_fails() {
        let reading = BeaconReading {
            clock: 1,
            dk: 2,
            flags: 0,
        };
        let nonce = [1u8; NONCE_SIZE];
        let (ct, mut tag) =
            seal_reading(&key(), b"\xaa\xbb\xcc\xdd\xee\xff", &nonce, &reading).unwrap();
        tag[0] ^= 0x01;
        assert_eq!(
            open_report(&key(), b"\xaa\xbb\xcc\xdd\xee\xff", &nonce, &ct, &tag),
            Err(CryptoError::VerificationFailed)
        );
    }

    #[test]
    fn wrong_beacon_id_fails() {
        // The address is AAD: moving a report to another id must fail.
        let reading = BeaconReading {
            clock: 1,
            dk: 2,
            flags: 0,
        };
        let nonce = [1u8; NONCE_SIZE];
        let (ct, tag) =
            seal_reading(&key(), b"\xaa\xbb\xcc\xdd\xee\xff", &nonce, &reading).unwrap();
        assert_eq!(
            open_report(&key(), b"\x00\x11\x22\x33\x44\x55", &nonce, &ct, &tag),
            Err(CryptoError::VerificationFailed)
        );
    }

    #[test]
    fn zero_filled_report_fails_verification() {
        assert_eq!(
            open_report(
                &key(),
                b"\xaa\xbb\xcc\xdd\xee\xff",
                &[0u8; NONCE_SIZE],
                &[0u8; READING_SIZE],
                &[0u8; TAG_SIZE]
            ),
            Err(CryptoError::VerificationFailed)
        );
    }

    #[test]
    fn reading_layout_is_little_endian() {
        let reading = BeaconReading::from_plaintext(&[
            0x01, 0x00, 0x00, 0x00, // clock = 1
            0xff, 0x00, 0x00, 0x00, // dk = 255
            0x07,
        ])
        .unwrap();
        assert_eq!(reading.clock, 1);
        assert_eq!(reading.dk, 255);
        assert_eq!(reading.flags, 7);
        assert_eq!(
            reading.to_plaintext(),
            [0x01, 0x00, 0x00, 0x00, 0xff, 0x00, 0x00, 0x00, 0x07]
        );
    }
}
