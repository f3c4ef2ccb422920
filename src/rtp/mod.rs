//! RTP processing: header codec, RFC 5285 extensions, per-lane rewrite
//! context and skew compensation.
//!
//! The gateway does little more than relaying frames around, so the only
//! thing this module cares about is the RTP header, how to reach its payload,
//! and how to keep seq/ts continuity when the upstream source changes.

pub mod extension;
pub mod keyframe;
pub mod rtp_error;
pub mod rtp_header;
pub mod rtp_packet;
pub mod skew;
pub mod switching_context;
pub mod time;

pub use rtp_error::RtpError;
pub use rtp_header::RtpHeader;
pub use rtp_packet::RtpPacket;
pub use switching_context::RtpSwitchingContext;

pub const RTP_VERSION: u8 = 2;
pub const RTP_HEADER_SIZE: usize = 12;

/// Default clock rates assumed when the negotiation did not pin one down.
pub const AUDIO_CLOCK_RATE: u32 = 48_000;
pub const VIDEO_CLOCK_RATE: u32 = 90_000;

// Header extension namespaces recognized by the gateway.
pub const EXTMAP_AUDIO_LEVEL: &str = "urn:ietf:params:rtp-hdrext:ssrc-audio-level";
pub const EXTMAP_TOFFSET: &str = "urn:ietf:params:rtp-hdrext:toffset";
pub const EXTMAP_ABS_SEND_TIME: &str = "http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time";
pub const EXTMAP_VIDEO_ORIENTATION: &str = "urn:3gpp:video-orientation";
pub const EXTMAP_TRANSPORT_WIDE_CC: &str =
    "http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01";
pub const EXTMAP_PLAYOUT_DELAY: &str =
    "http://www.webrtc.org/experiments/rtp-hdrext/playout-delay";
pub const EXTMAP_RTP_STREAM_ID: &str = "urn:ietf:params:rtp-hdrext:sdes:rtp-stream-id";
