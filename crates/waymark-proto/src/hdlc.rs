//! HDLC-style framing for packets carried over a byte stream.
//!
//! Frames are delimited by the flag byte `0x7E`. Any occurrence of the
//! flag or the escape byte `0x7D` inside the payload is stuffed as
//! `[0x7D, byte & !0x20]` and recovered by OR-ing bit 5 back in.
//!
//! `unframe(frame(x)) == x` holds for every byte sequence `x`.

use crate::error::FrameError;

/// Frame delimiter
pub const FLAG: u8 = 0x7e;

/// Escape byte introducing a stuffed sequence
pub const ESC: u8 = 0x7d;

/// Bit cleared on encode and restored on decode
const ESC_MASK: u8 = 1 << 5;

/// Wrap `data` in flag delimiters, escaping reserved bytes.
///
/// Always succeeds; the result is at least two bytes long.
#[must_use]
pub fn frame(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 2);
    out.push(FLAG);
    for &byte in data {
        if byte == FLAG || byte == ESC {
            out.push(ESC);
            out.push(byte & !ESC_MASK);
        } else {
            out.push(byte);
        }
    }
    out.push(FLAG);
    out
}

/// Recover the payload from a flag-delimited frame.
///
/// The payload may be empty (a bare flag pair is a link keepalive).
///
/// # Errors
///
/// Returns a [`FrameError`] if the buffer is not bracketed by flag
/// bytes, contains an unescaped interior flag, or ends mid-escape.
pub fn unframe(buf: &[u8]) -> Result<Vec<u8>, FrameError> {
    if buf.len() < 2 || buf[0] != FLAG || buf[buf.len() - 1] != FLAG {
        return Err(FrameError::MissingFlags);
    }

    // Runs of consecutive flags on either end are idle padding.
    let start = buf.iter().position(|&b| b != FLAG);
    let body = match start {
        None => return Ok(Vec::new()),
        Some(start) => {
            let end = buf.iter().rposition(|&b| b != FLAG).unwrap_or(start);
            &buf[start..=end]
        }
    };

    if body.contains(&FLAG) {
        return Err(FrameError::UnescapedFlag);
    }

    let mut data = Vec::with_capacity(body.len());
    let mut bytes = body.iter();
    while let Some(&byte) = bytes.next() {
        if byte == ESC {
            match bytes.next() {
                Some(&escaped) => data.push(escaped | ESC_MASK),
                None => return Err(FrameError::DanglingEscape),
            }
        } else {
            data.push(byte);
        }
    }
    Ok(data)
}
