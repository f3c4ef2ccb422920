use super::{
    common_header::{CommonHeader, finish_packet},
    packet_type::{PSFB_FMT_PLI, PT_PSFB, RtcpPacketType},
    rtcp::RtcpPacket,
    rtcp_error::RtcpError,
};

/// Picture Loss Indication (PSFB, FMT=1). No FCI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PictureLossIndication {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
}

impl RtcpPacketType for PictureLossIndication {
    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), RtcpError> {
        let start = out.len();
        CommonHeader::new(PSFB_FMT_PLI, PT_PSFB, false).encode_into(out);
        out.extend_from_slice(&self.sender_ssrc.to_be_bytes());
        out.extend_from_slice(&self.media_ssrc.to_be_bytes());
        finish_packet(out, start);
        Ok(())
    }

    fn decode(hdr: &CommonHeader, payload: &[u8]) -> Result<RtcpPacket, RtcpError> {
        if payload.len() < 8 {
            return Err(RtcpError::TooShort);
        }
        if hdr.rc_or_fmt() != PSFB_FMT_PLI {
            return Err(RtcpError::Invalid);
        }
        Ok(RtcpPacket::Pli(PictureLossIndication {
            sender_ssrc: u32::from_be_bytes(payload[0..4].try_into().unwrap()),
            media_ssrc: u32::from_be_bytes(payload[4..8].try_into().unwrap()),
        }))
    }
}

impl PictureLossIndication {
    pub fn new(sender_ssrc: u32, media_ssrc: u32) -> Self {
        Self {
            sender_ssrc,
            media_ssrc,
        }
    }
}
