//! Per-connection session state machine.
//!
//! A listener speaks a continuous byte stream; the session accumulates
//! bytes until a closing flag completes a frame, then either hands the
//! de-escaped packet up for dispatch or emits a NACK for a malformed
//! frame. Empty frames (a bare flag pair) are link keepalives and are
//! ignored. The buffer is the only state; nothing carries over between
//! packets.

use std::mem;

use tracing::debug;
use waymark_proto::hdlc;

/// Transport-level reply, exactly the ASCII bytes `ACK` or `NACK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// Frame accepted
    Ack,
    /// Frame rejected
    Nack,
}

impl Response {
    /// Wire encoding of the reply.
    #[must_use]
    pub const fn as_bytes(self) -> &'static [u8] {
        match self {
            Self::Ack => b"ACK",
            Self::Nack => b"NACK",
        }
    }
}

/// Output of feeding bytes into a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A complete de-escaped packet, ready for dispatch
    Packet(Vec<u8>),
    /// A reply the connection must send (framing NACK)
    Respond(Response),
}

/// Upper bound on an accumulating frame, delimiters included.
///
/// The largest legal packet is 3 header bytes, a 255-byte listener id
/// and the 39-byte SECURE payload; fully escaped that is under 600
/// bytes on the wire. Anything longer cannot decode to a valid packet,
/// so the session drops it instead of buffering it.
const MAX_FRAME_LEN: usize = 600;

/// Frame accumulator for one logical connection.
#[derive(Debug, Default)]
pub struct LinkSession {
    buffer: Vec<u8>,
}

impl LinkSession {
    /// Create a session with an empty accumulation buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed received bytes, returning the events they complete.
    ///
    /// A single read may complete any number of frames; events come out
    /// in wire order.
    pub fn receive(&mut self, bytes: &[u8]) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        for &byte in bytes {
            if self.buffer.is_empty() {
                // Discard noise until a frame opens.
                if byte == hdlc::FLAG {
                    self.buffer.push(byte);
                }
                continue;
            }
            self.buffer.push(byte);
            if byte != hdlc::FLAG {
                if self.buffer.len() > MAX_FRAME_LEN {
                    debug!(len = self.buffer.len(), "oversized frame dropped");
                    self.buffer.clear();
                    events.push(SessionEvent::Respond(Response::Nack));
                }
                continue;
            }
            let frame = mem::take(&mut self.buffer);
            match hdlc::unframe(&frame) {
                Ok(packet) if packet.is_empty() => {
                    // Flag-flag keepalive; nothing to dispatch.
                }
                Ok(packet) => events.push(SessionEvent::Packet(packet)),
                Err(error) => {
                    debug!(%error, "malformed frame");
                    events.push(SessionEvent::Respond(Response::Nack));
                }
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waymark_proto::frame;

    fn packets(events: Vec<SessionEvent>) -> Vec<Vec<u8>> {
        events
            .into_iter()
            .map(|e| match e {
                SessionEvent::Packet(p) => p,
                SessionEvent::Respond(r) => panic!("unexpected response {r:?}"),
            })
            .collect()
    }

    #[test]
    fn empty_frames_are_ignored() {
        let mut session = LinkSession::new();
        assert!(session.receive(b"\x7e\x7e\x7e").is_empty());
    }

    #[test]
    fn single_frame_yields_packet() {
        let mut session = LinkSession::new();
        let events = session.receive(&frame(b"\x00\x00\x04Test"));
        assert_eq!(packets(events), vec![b"\x00\x00\x04Test".to_vec()]);
    }

    #[test]
    fn multiple_frames_per_read() {
        let mut session = LinkSession::new();
        let mut wire = frame(b"ab");
        wire.extend_from_slice(&frame(b"cd"));
        let events = session.receive(&wire);
        assert_eq!(packets(events), vec![b"ab".to_vec(), b"cd".to_vec()]);
    }

    #[test]
    fn frame_split_across_reads() {
        let mut session = LinkSession::new();
        let wire = frame(b"hello");
        let (a, b) = wire.split_at(3);
        assert!(session.receive(a).is_empty());
        assert_eq!(packets(session.receive(b)), vec![b"hello".to_vec()]);
    }

    #[test]
    fn malformed_frame_nacks_and_resets() {
        let mut session = LinkSession::new();
        let events = session.receive(b"\x7e\x7d\x7e");
        assert_eq!(events, vec![SessionEvent::Respond(Response::Nack)]);
        // Buffer reset: a good frame still decodes afterwards.
        assert_eq!(packets(session.receive(&frame(b"ok"))), vec![b"ok".to_vec()]);
    }

    #[test]
    fn noise_before_first_flag_is_discarded() {
        let mut session = LinkSession::new();
        let mut wire = b"garbage".to_vec();
        wire.extend_from_slice(&frame(b"ok"));
        assert_eq!(packets(session.receive(&wire)), vec![b"ok".to_vec()]);
    }

    #[test]
    fn escaped_flag_does_not_close_frame() {
        let mut session = LinkSession::new();
        // Payload containing the flag byte survives framing intact.
        let events = session.receive(&frame(b"\x00\x7e\x00"));
        assert_eq!(packets(events), vec![b"\x00\x7e\x00".to_vec()]);
    }

    #[test]
    fn oversized_frame_nacks_and_bounds_memory() {
        let mut session = LinkSession::new();
        let mut wire = vec![0x7e];
        wire.extend_from_slice(&[0x41; 4096]);
        let events = session.receive(&wire);
        // One NACK at the cap, then the rest of the flood is discarded
        // as noise without accumulating.
        assert_eq!(events, vec![SessionEvent::Respond(Response::Nack)]);

        // The connection recovers at the next frame.
        wire = frame(b"ok");
        assert_eq!(packets(session.receive(&wire)), vec![b"ok".to_vec()]);
    }

    #[test]
    fn maximum_size_packet_still_decodes() {
        let mut session = LinkSession::new();
        let mut packet = vec![0x02, 0x00, 0xff];
        packet.extend_from_slice(&[0x30; 255]);
        packet.extend_from_slice(&[0x31; 39]);
        let events = session.receive(&frame(&packet));
        assert_eq!(packets(events), vec![packet]);
    }

    #[test]
    fn response_bytes_are_exact() {
        assert_eq!(Response::Ack.as_bytes(), b"ACK");
        assert_eq!(Response::Nack.as_bytes(), b"NACK");
    }
}
