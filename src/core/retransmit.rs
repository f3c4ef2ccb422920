//! Bounded retransmit cache for outbound RTP, answering inbound NACKs.
//!
//! FIFO of the last N sent packets (default 300 per handle per direction)
//! plus a seq-indexed map for O(1) lookup. Retransmissions either go out
//! unchanged or, when RFC 4588 was negotiated, wrapped as rtx packets with
//! the original sequence number prepended to the payload.

use crate::rtp::RtpHeader;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Ignore duplicate NACKs for the same seq within this interval.
const NACK_DEDUP: Duration = Duration::from_millis(10);

/// A cached outbound packet.
#[derive(Debug, Clone)]
struct StoredPacket {
    data: Vec<u8>,
    created: Instant,
}

#[derive(Debug, Default)]
pub struct RetransmitBuffer {
    capacity: usize,
    order: VecDeque<u16>,
    packets: HashMap<u16, StoredPacket>,
    /// (seq -> when we last answered a NACK for it), for dedup.
    answered: HashMap<u16, Instant>,
}

impl RetransmitBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            packets: HashMap::new(),
            answered: HashMap::new(),
        }
    }

    /// Store one sent packet under its (rewritten) sequence number.
    pub fn store(&mut self, seq: u16, data: Vec<u8>, now: Instant) {
        if self.packets.insert(seq, StoredPacket { data, created: now }).is_none() {
            self.order.push_back(seq);
        }
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.packets.remove(&old);
                self.answered.remove(&old);
            }
        }
    }

    /// Look a requested sequence number up, honoring the per-NACK dedup:
    /// a seq answered within the last 10 ms is not answered again.
    pub fn lookup(&mut self, seq: u16, now: Instant) -> Option<Vec<u8>> {
        let stored = self.packets.get(&seq)?;
        if let Some(last) = self.answered.get(&seq)
            && now.duration_since(*last) < NACK_DEDUP
        {
            return None;
        }
        self.answered.insert(seq, now);
        Some(stored.data.clone())
    }

    /// Age of the oldest cached packet, if any.
    pub fn oldest_age(&self, now: Instant) -> Option<Duration> {
        let oldest = self.order.front()?;
        self.packets
            .get(oldest)
            .map(|p| now.duration_since(p.created))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.packets.clear();
        self.answered.clear();
    }
}

/// Wrap a cached packet as an RFC 4588 rtx retransmission: rtx payload type
/// and SSRC, a fresh rtx sequence number, and the original sequence number
/// as a 2-byte prefix (OSN) of the payload.
pub fn wrap_rtx(original: &[u8], rtx_pt: u8, rtx_ssrc: u32, rtx_seq: u16) -> Option<Vec<u8>> {
    let (mut header, payload_off) = RtpHeader::decode(original).ok()?;
    let osn = header.sequence_number;
    header.payload_type = rtx_pt;
    header.ssrc = rtx_ssrc;
    header.sequence_number = rtx_seq;

    let mut out = Vec::with_capacity(original.len() + 2);
    header.encode_into(&mut out);
    out.extend_from_slice(&osn.to_be_bytes());
    out.extend_from_slice(&original[payload_off..]);
    Some(out)
}

/// Undo rtx wrapping on an inbound retransmission: strip the OSN and
/// re-present the packet under the given media SSRC and payload type.
/// Returns the recovered packet.
pub fn unwrap_rtx(packet: &[u8], media_pt: u8, media_ssrc: u32) -> Option<Vec<u8>> {
    let (mut header, payload_off) = RtpHeader::decode(packet).ok()?;
    if packet.len() < payload_off + 2 {
        return None;
    }
    let osn = u16::from_be_bytes([packet[payload_off], packet[payload_off + 1]]);
    header.sequence_number = osn;
    header.payload_type = media_pt;
    header.ssrc = media_ssrc;

    let mut out = Vec::with_capacity(packet.len() - 2);
    header.encode_into(&mut out);
    out.extend_from_slice(&packet[payload_off + 2..]);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp::RtpPacket;

    fn packet(seq: u16) -> Vec<u8> {
        RtpPacket::simple(96, false, seq, u32::from(seq) * 960, 0xAABB, vec![seq as u8, 1, 2])
            .encode()
    }

    #[test]
    fn lookup_returns_identical_payload() {
        let mut buf = RetransmitBuffer::new(300);
        let now = Instant::now();
        for seq in [42u16, 44, 47] {
            buf.store(seq, packet(seq), now);
        }

        // NACK for PID=42, BLP=0x0005 asks for 42, 43, 45
        let mut hits = Vec::new();
        for seq in [42u16, 43, 45] {
            if let Some(data) = buf.lookup(seq, now) {
                hits.push((seq, data));
            }
        }
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, 42);
        assert_eq!(hits[0].1, packet(42));
        // 44 and 47 were never requested, 43/45 are absent
        assert!(buf.lookup(44, now + NACK_DEDUP).is_some());
    }

    #[test]
    fn dedup_suppresses_immediate_repeats() {
        let mut buf = RetransmitBuffer::new(10);
        let now = Instant::now();
        buf.store(5, packet(5), now);
        assert!(buf.lookup(5, now).is_some());
        assert!(buf.lookup(5, now + Duration::from_millis(5)).is_none());
        assert!(buf.lookup(5, now + Duration::from_millis(20)).is_some());
    }

    #[test]
    fn capacity_is_enforced_fifo() {
        let mut buf = RetransmitBuffer::new(300);
        let now = Instant::now();
        for seq in 0..400u16 {
            buf.store(seq, packet(seq), now);
        }
        assert_eq!(buf.len(), 300);
        assert!(buf.lookup(0, now).is_none());
        assert!(buf.lookup(399, now).is_some());
    }

    #[test]
    fn rtx_wrap_and_unwrap_restore_the_original() {
        let original = packet(1234);
        let wrapped = wrap_rtx(&original, 97, 0xDDEE, 7).unwrap();

        let (h, off) = RtpHeader::decode(&wrapped).unwrap();
        assert_eq!(h.payload_type, 97);
        assert_eq!(h.ssrc, 0xDDEE);
        assert_eq!(h.sequence_number, 7);
        // OSN prefix
        assert_eq!(
            u16::from_be_bytes([wrapped[off], wrapped[off + 1]]),
            1234
        );

        let recovered = unwrap_rtx(&wrapped, 96, 0xAABB).unwrap();
        assert_eq!(recovered, original);
    }
}
