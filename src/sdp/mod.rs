//! Just enough SDP: a line-preserving session model, extraction of the
//! WebRTC attributes the core cares about, and enrichment of plugin-provided
//! SDPs with the transport attributes (ICE credentials, DTLS fingerprint,
//! candidates).
//!
//! Codec negotiation stays with the plugins; the core never rewrites m-lines
//! beyond what the transport needs.

pub mod sdp_error;
pub mod session_description;
pub mod webrtc_info;

pub use sdp_error::SdpError;
pub use session_description::{MediaSection, SessionDescription};
pub use webrtc_info::{MediaDirection, TransportParams, WebRtcInfo, extract_webrtc_info};
