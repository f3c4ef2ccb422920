//! RTCP parsing, building and per-stream accounting.
//!
//! One file per packet type, all hanging off the [`RtcpPacketType`] trait;
//! [`rtcp::RtcpPacket`] is the union used when splitting compound packets.
//! [`context::RtcpContext`] keeps the loss/jitter bookkeeping a stream needs
//! to emit receiver/sender reports.

pub mod bye;
pub mod common_header;
pub mod context;
pub mod fir;
pub mod generic_nack;
pub mod packet_type;
pub mod picture_loss;
pub mod receiver_report;
pub mod remb;
pub mod report_block;
pub mod rtcp;
pub mod rtcp_error;
pub mod sdes;
pub mod sender_info;
pub mod sender_report;
pub mod twcc;

pub use context::RtcpContext;
pub use rtcp::RtcpPacket;
pub use rtcp_error::RtcpError;

pub const RTCP_VERSION: u8 = 2;
