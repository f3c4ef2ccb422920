use super::{
    common_header::{CommonHeader, finish_packet},
    packet_type::{PT_RTPFB, RTPFB_FMT_NACK, RtcpPacketType},
    rtcp::RtcpPacket,
    rtcp_error::RtcpError,
};

/// Generic NACK feedback (RTPFB, FMT=1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericNack {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    /// Each entry is (PID, BLP) per RFC 4585 §6.2.1.
    pub entries: Vec<(u16, u16)>,
}

impl RtcpPacketType for GenericNack {
    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), RtcpError> {
        let start = out.len();
        CommonHeader::new(RTPFB_FMT_NACK, PT_RTPFB, false).encode_into(out);
        out.extend_from_slice(&self.sender_ssrc.to_be_bytes());
        out.extend_from_slice(&self.media_ssrc.to_be_bytes());
        for (pid, blp) in &self.entries {
            out.extend_from_slice(&pid.to_be_bytes());
            out.extend_from_slice(&blp.to_be_bytes());
        }
        finish_packet(out, start);
        Ok(())
    }

    fn decode(hdr: &CommonHeader, payload: &[u8]) -> Result<RtcpPacket, RtcpError> {
        if payload.len() < 8 {
            return Err(RtcpError::TooShort);
        }
        if hdr.rc_or_fmt() != RTPFB_FMT_NACK {
            return Err(RtcpError::Invalid);
        }
        let sender_ssrc = u32::from_be_bytes(payload[0..4].try_into().unwrap());
        let media_ssrc = u32::from_be_bytes(payload[4..8].try_into().unwrap());

        let mut idx = 8usize;
        let mut entries = Vec::new();
        while idx + 4 <= payload.len() {
            let pid = u16::from_be_bytes(payload[idx..idx + 2].try_into().unwrap());
            let blp = u16::from_be_bytes(payload[idx + 2..idx + 4].try_into().unwrap());
            entries.push((pid, blp));
            idx += 4;
        }
        if idx != payload.len() {
            return Err(RtcpError::Truncated);
        }
        Ok(RtcpPacket::Nack(GenericNack {
            sender_ssrc,
            media_ssrc,
            entries,
        }))
    }
}

impl GenericNack {
    pub fn new(sender_ssrc: u32, media_ssrc: u32, entries: Vec<(u16, u16)>) -> Self {
        Self {
            sender_ssrc,
            media_ssrc,
            entries,
        }
    }

    /// Compress a sorted list of missing sequence numbers into (PID, BLP)
    /// entries.
    pub fn from_seqs(sender_ssrc: u32, media_ssrc: u32, seqs: &[u16]) -> Self {
        let mut entries: Vec<(u16, u16)> = Vec::new();
        for &seq in seqs {
            if let Some((pid, blp)) = entries.last_mut() {
                let dist = seq.wrapping_sub(*pid);
                if dist >= 1 && dist <= 16 {
                    *blp |= 1 << (dist - 1);
                    continue;
                }
            }
            entries.push((seq, 0));
        }
        Self::new(sender_ssrc, media_ssrc, entries)
    }

    /// Expand the (PID, BLP) entries into the full list of requested
    /// sequence numbers.
    pub fn seqs(&self) -> Vec<u16> {
        let mut out = Vec::new();
        for &(pid, blp) in &self.entries {
            out.push(pid);
            for bit in 0..16u16 {
                if blp & (1 << bit) != 0 {
                    out.push(pid.wrapping_add(bit + 1));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blp_expansion() {
        // PID=42, BLP=0x0005 asks for 42, 43 (bit 0) and 45 (bit 2)
        let nack = GenericNack::new(1, 2, vec![(42, 0x0005)]);
        assert_eq!(nack.seqs(), vec![42, 43, 45]);
    }

    #[test]
    fn seq_list_compression_round_trips() {
        let seqs = vec![10u16, 11, 14, 26, 27, 60_000, 60_001];
        let nack = GenericNack::from_seqs(1, 2, &seqs);
        assert_eq!(nack.seqs(), seqs);
    }

    #[test]
    fn wire_round_trip() {
        let nack = GenericNack::from_seqs(0xAA, 0xBB, &[100, 101, 116]);
        let mut buf = Vec::new();
        nack.encode_into(&mut buf).unwrap();
        let (hdr, total) = CommonHeader::decode(&buf).unwrap();
        assert_eq!(total, buf.len());
        let RtcpPacket::Nack(back) = GenericNack::decode(&hdr, &buf[4..]).unwrap() else {
            panic!("not a NACK");
        };
        assert_eq!(back, nack);
    }
}
