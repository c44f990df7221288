//! Packet header, listener-id, and payload decoding.
//!
//! The 3-byte header is `[version:4 | type:4][reserved:8][lid_len:8]`,
//! followed by `lid_len` bytes of listener id, followed by the payload.
//! All numeric payload fields are little-endian. Parsing is zero-copy:
//! [`Packet`] is a view into the caller's buffer.

use crate::error::PacketError;
use crate::{BEACON_ID_LEN, CIPHERTEXT_LEN, HEADER_LEN, NONCE_LEN, SECURE_PAYLOAD_LEN, TAG_LEN};
use std::fmt;

/// Packet types carried in the low nibble of the first header byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Listener heartbeat, no payload semantics
    Keepalive = 0,
    /// Legacy cleartext telemetry, acknowledged but ignored
    Data = 1,
    /// Authenticated beacon telemetry
    Secure = 2,
}

impl TryFrom<u8> for PacketType {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Keepalive),
            1 => Ok(Self::Data),
            2 => Ok(Self::Secure),
            other => Err(PacketError::UnknownType(other)),
        }
    }
}

/// Fixed-length beacon hardware address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BeaconId([u8; BEACON_ID_LEN]);

impl BeaconId {
    /// Create from raw address bytes
    #[must_use]
    pub fn from_bytes(bytes: [u8; BEACON_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, if it has the right length
    #[must_use]
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        let bytes: [u8; BEACON_ID_LEN] = slice.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Raw address bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; BEACON_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for BeaconId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Listener address as observed on the wire.
///
/// A 6-byte id is a hardware address and is displayed and looked up in
/// hex form; anything else is treated as opaque bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ListenerId {
    /// 6-byte hardware address
    Hardware([u8; 6]),
    /// Free-form id bytes (e.g. a hostname)
    Opaque(Vec<u8>),
}

impl ListenerId {
    /// Classify raw id bytes from a packet.
    #[must_use]
    pub fn from_wire(bytes: &[u8]) -> Self {
        match <[u8; 6]>::try_from(bytes) {
            Ok(addr) => Self::Hardware(addr),
            Err(_) => Self::Opaque(bytes.to_vec()),
        }
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hardware(addr) => f.write_str(&hex::encode(addr)),
            Self::Opaque(bytes) => write!(f, "{}", String::from_utf8_lossy(bytes)),
        }
    }
}

/// Zero-copy packet view over a de-framed buffer
#[derive(Debug)]
pub struct Packet<'a> {
    raw: &'a [u8],
    packet_type: PacketType,
}

impl<'a> Packet<'a> {
    /// Parse the fixed header.
    ///
    /// # Errors
    ///
    /// Fails if the buffer is shorter than the header or the type nibble
    /// is unknown. Listener-id bounds are checked by [`Packet::listener_id`].
    pub fn parse(raw: &'a [u8]) -> Result<Self, PacketError> {
        if raw.len() < HEADER_LEN {
            return Err(PacketError::TooShort {
                expected: HEADER_LEN,
                actual: raw.len(),
            });
        }
        let packet_type = PacketType::try_from(raw[0] & 0x0f)?;
        Ok(Self { raw, packet_type })
    }

    /// Protocol version from the high nibble (currently ignored)
    #[must_use]
    pub fn version(&self) -> u8 {
        self.raw[0] >> 4
    }

    /// Decoded packet type
    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    fn lid_len(&self) -> usize {
        self.raw[2] as usize
    }

    /// Extract the relaying listener's id.
    ///
    /// # Errors
    ///
    /// Fails on a zero-length id or when the declared length exceeds the
    /// bytes remaining after the header.
    pub fn listener_id(&self) -> Result<ListenerId, PacketError> {
        let declared = self.lid_len();
        let remaining = self.raw.len() - HEADER_LEN;
        if remaining < declared {
            return Err(PacketError::ListenerIdOverflow {
                declared,
                remaining,
            });
        }
        if declared == 0 {
            return Err(PacketError::EmptyListenerId);
        }
        Ok(ListenerId::from_wire(
            &self.raw[HEADER_LEN..HEADER_LEN + declared],
        ))
    }

    /// Bytes after the header and listener id; may be empty.
    ///
    /// # Errors
    ///
    /// Fails when the declared listener-id length exceeds the packet.
    pub fn payload(&self) -> Result<&'a [u8], PacketError> {
        let declared = self.lid_len();
        let remaining = self.raw.len() - HEADER_LEN;
        if remaining < declared {
            return Err(PacketError::ListenerIdOverflow {
                declared,
                remaining,
            });
        }
        Ok(&self.raw[HEADER_LEN + declared..])
    }
}

/// Decoded SECURE payload (39 bytes on the wire)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureReport {
    /// Reporting beacon's hardware address
    pub beacon_id: BeaconId,
    /// EAX nonce chosen by the beacon
    pub nonce: [u8; NONCE_LEN],
    /// Encrypted reading
    pub ciphertext: [u8; CIPHERTEXT_LEN],
    /// Truncated authentication tag
    pub tag: [u8; TAG_LEN],
    distance_cm: u16,
    variance_cm: u16,
}

impl SecureReport {
    /// Parse a SECURE payload.
    ///
    /// # Errors
    ///
    /// Fails unless the payload is exactly [`SECURE_PAYLOAD_LEN`] bytes.
    pub fn parse(payload: &[u8]) -> Result<Self, PacketError> {
        if payload.len() != SECURE_PAYLOAD_LEN {
            return Err(PacketError::BadSecureLength {
                expected: SECURE_PAYLOAD_LEN,
                actual: payload.len(),
            });
        }
        let mut nonce = [0u8; NONCE_LEN];
        let mut ciphertext = [0u8; CIPHERTEXT_LEN];
        let mut tag = [0u8; TAG_LEN];
        let mut id = [0u8; BEACON_ID_LEN];
        id.copy_from_slice(&payload[..6]);
        nonce.copy_from_slice(&payload[6..22]);
        ciphertext.copy_from_slice(&payload[22..31]);
        tag.copy_from_slice(&payload[31..35]);
        let distance_cm = u16::from_le_bytes([payload[35], payload[36]]);
        let variance_cm = u16::from_le_bytes([payload[37], payload[38]]);
        Ok(Self {
            beacon_id: BeaconId::from_bytes(id),
            nonce,
            ciphertext,
            tag,
            distance_cm,
            variance_cm,
        })
    }

    /// Construct a report from its parts (beacon emulation and tests).
    #[must_use]
    pub fn assemble(
        beacon_id: BeaconId,
        nonce: [u8; NONCE_LEN],
        ciphertext: [u8; CIPHERTEXT_LEN],
        tag: [u8; TAG_LEN],
        distance_cm: u16,
        variance_cm: u16,
    ) -> Self {
        Self {
            beacon_id,
            nonce,
            ciphertext,
            tag,
            distance_cm,
            variance_cm,
        }
    }

    /// Measured distance in meters
    #[must_use]
    pub fn distance_m(&self) -> f64 {
        f64::from(self.distance_cm) / 100.0
    }

    /// Measurement variance in meters
    #[must_use]
    pub fn variance_m(&self) -> f64 {
        f64::from(self.variance_cm) / 100.0
    }

    /// Serialize back to the 39-byte wire layout.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; SECURE_PAYLOAD_LEN] {
        let mut out = [0u8; SECURE_PAYLOAD_LEN];
        out[..6].copy_from_slice(self.beacon_id.as_bytes());
        out[6..22].copy_from_slice(&self.nonce);
        out[22..31].copy_from_slice(&self.ciphertext);
        out[31..35].copy_from_slice(&self.tag);
        out[35..37].copy_from_slice(&self.distance_cm.to_le_bytes());
        out[37..39].copy_from_slice(&self.variance_cm.to_le_bytes());
        out
    }
}
