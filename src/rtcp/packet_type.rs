use super::{common_header::CommonHeader, rtcp::RtcpPacket, rtcp_error::RtcpError};

// RTCP packet types (RFC 3550; feedback per RFC 4585/5104)
pub const PT_SR: u8 = 200;
pub const PT_RR: u8 = 201;
pub const PT_SDES: u8 = 202;
pub const PT_BYE: u8 = 203;
pub const PT_APP: u8 = 204;
pub const PT_RTPFB: u8 = 205; // transport layer FB (generic NACK, TWCC)
pub const PT_PSFB: u8 = 206; // payload-specific FB (PLI, FIR, REMB)

// Feedback message types within PT_RTPFB
pub const RTPFB_FMT_NACK: u8 = 1;
pub const RTPFB_FMT_TWCC: u8 = 15;

// Feedback message types within PT_PSFB
pub const PSFB_FMT_PLI: u8 = 1;
pub const PSFB_FMT_FIR: u8 = 4;
pub const PSFB_FMT_AFB: u8 = 15; // application layer FB, carries REMB

pub trait RtcpPacketType {
    /// Encode the full packet (common header included) into `out`.
    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), RtcpError>;

    /// Decode the packet from its common header and payload.
    fn decode(hdr: &CommonHeader, payload: &[u8]) -> Result<RtcpPacket, RtcpError>;
}
