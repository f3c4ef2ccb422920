use super::{
    common_header::{CommonHeader, finish_packet},
    packet_type::{PSFB_FMT_AFB, PT_PSFB, RtcpPacketType},
    rtcp::RtcpPacket,
    rtcp_error::RtcpError,
};

/// Receiver Estimated Max Bitrate (application-layer feedback carrying the
/// "REMB" identifier, draft-alvestrand-rmcat-remb).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remb {
    pub sender_ssrc: u32,
    /// Estimated bitrate, bits per second.
    pub bitrate: u64,
    /// SSRCs the estimate applies to.
    pub ssrcs: Vec<u32>,
}

impl RtcpPacketType for Remb {
    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), RtcpError> {
        let start = out.len();
        CommonHeader::new(PSFB_FMT_AFB, PT_PSFB, false).encode_into(out);
        out.extend_from_slice(&self.sender_ssrc.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes()); // media ssrc is always 0
        out.extend_from_slice(b"REMB");

        // 6-bit exponent + 18-bit mantissa
        let mut exp = 0u32;
        let mut mantissa = self.bitrate;
        while mantissa > 0x3FFFF {
            mantissa >>= 1;
            exp += 1;
        }
        out.push(self.ssrcs.len() as u8);
        out.push(((exp << 2) | ((mantissa >> 16) & 0x3) as u32) as u8);
        out.push(((mantissa >> 8) & 0xFF) as u8);
        out.push((mantissa & 0xFF) as u8);
        for ssrc in &self.ssrcs {
            out.extend_from_slice(&ssrc.to_be_bytes());
        }
        finish_packet(out, start);
        Ok(())
    }

    fn decode(hdr: &CommonHeader, payload: &[u8]) -> Result<RtcpPacket, RtcpError> {
        if hdr.rc_or_fmt() != PSFB_FMT_AFB {
            return Err(RtcpError::Invalid);
        }
        if payload.len() < 16 || &payload[8..12] != b"REMB" {
            return Err(RtcpError::Invalid);
        }
        let sender_ssrc = u32::from_be_bytes(payload[0..4].try_into().unwrap());
        let num_ssrc = payload[12] as usize;
        let exp = u32::from(payload[13] >> 2);
        let mantissa = (u64::from(payload[13] & 0x3) << 16)
            | (u64::from(payload[14]) << 8)
            | u64::from(payload[15]);
        let bitrate = mantissa << exp;

        let mut ssrcs = Vec::with_capacity(num_ssrc);
        let mut idx = 16usize;
        for _ in 0..num_ssrc {
            if payload.len() < idx + 4 {
                return Err(RtcpError::Truncated);
            }
            ssrcs.push(u32::from_be_bytes(payload[idx..idx + 4].try_into().unwrap()));
            idx += 4;
        }

        Ok(RtcpPacket::Remb(Remb {
            sender_ssrc,
            bitrate,
            ssrcs,
        }))
    }
}

impl Remb {
    pub fn new(sender_ssrc: u32, bitrate: u64, ssrcs: Vec<u32>) -> Self {
        Self {
            sender_ssrc,
            bitrate,
            ssrcs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remb_round_trip_preserves_bitrate() {
        let remb = Remb::new(0x1234, 1_200_000, vec![0xAAA, 0xBBB]);
        let mut buf = Vec::new();
        remb.encode_into(&mut buf).unwrap();
        let (hdr, total) = CommonHeader::decode(&buf).unwrap();
        assert_eq!(total, buf.len());
        let RtcpPacket::Remb(back) = Remb::decode(&hdr, &buf[4..]).unwrap() else {
            panic!("not a REMB");
        };
        assert_eq!(back.sender_ssrc, 0x1234);
        assert_eq!(back.ssrcs, vec![0xAAA, 0xBBB]);
        // exponent/mantissa encoding may round down, never up
        assert!(back.bitrate <= 1_200_000);
        assert!(back.bitrate > 1_190_000);
    }
}
