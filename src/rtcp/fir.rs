use super::{
    common_header::{CommonHeader, finish_packet},
    packet_type::{PSFB_FMT_FIR, PT_PSFB, RtcpPacketType},
    rtcp::RtcpPacket,
    rtcp_error::RtcpError,
};

/// Full Intra Request (PSFB, FMT=4, RFC 5104). The FCI carries the target
/// SSRC plus a command sequence number so duplicated requests can be told
/// apart from new ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullIntraRequest {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub seq_nr: u8,
}

impl RtcpPacketType for FullIntraRequest {
    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), RtcpError> {
        let start = out.len();
        CommonHeader::new(PSFB_FMT_FIR, PT_PSFB, false).encode_into(out);
        out.extend_from_slice(&self.sender_ssrc.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes()); // media ssrc unused for FIR
        out.extend_from_slice(&self.media_ssrc.to_be_bytes());
        out.push(self.seq_nr);
        out.extend_from_slice(&[0, 0, 0]); // reserved
        finish_packet(out, start);
        Ok(())
    }

    fn decode(hdr: &CommonHeader, payload: &[u8]) -> Result<RtcpPacket, RtcpError> {
        if payload.len() < 16 {
            return Err(RtcpError::TooShort);
        }
        if hdr.rc_or_fmt() != PSFB_FMT_FIR {
            return Err(RtcpError::Invalid);
        }
        Ok(RtcpPacket::Fir(FullIntraRequest {
            sender_ssrc: u32::from_be_bytes(payload[0..4].try_into().unwrap()),
            media_ssrc: u32::from_be_bytes(payload[8..12].try_into().unwrap()),
            seq_nr: payload[12],
        }))
    }
}

impl FullIntraRequest {
    pub fn new(sender_ssrc: u32, media_ssrc: u32, seq_nr: u8) -> Self {
        Self {
            sender_ssrc,
            media_ssrc,
            seq_nr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fir_round_trip() {
        let fir = FullIntraRequest::new(0x11, 0x22, 7);
        let mut buf = Vec::new();
        fir.encode_into(&mut buf).unwrap();
        let (hdr, total) = CommonHeader::decode(&buf).unwrap();
        assert_eq!(total, buf.len());
        let RtcpPacket::Fir(back) = FullIntraRequest::decode(&hdr, &buf[4..]).unwrap() else {
            panic!("not a FIR");
        };
        assert_eq!(back, fir);
    }
}
