//! rtcgate is a general-purpose WebRTC gateway core.
//!
//! It terminates a browser's PeerConnection (ICE, DTLS-SRTP, RTP/RTCP, SCTP
//! DataChannels) per handle and relays the media to an attached application
//! plugin; the plugins implement the actual use cases (echo test, rooms,
//! gateways) while the core stays a signaling front-end and media relay with
//! retransmission, simulcast handling and congestion signaling.
//!
//! The crate is structured into several modules, each responsible for one
//! aspect of the gateway.

/// Token-based request authentication.
pub mod auth;
/// Configuration loading (INI) and the typed gateway snapshot.
pub mod config;
/// The session/handle/stream/component tree and the gateway server.
pub mod core;
/// SCTP DataChannels over the DTLS connection.
pub mod datachannel;
/// DTLS handshake driver and SRTP key export.
pub mod dtls;
/// ICE: gathering, connectivity checks, trickling, demultiplexing.
pub mod ice;
/// Logging utilities (leveled sinks, buffered logger).
pub mod log;
/// text2pcap packet captures.
pub mod pcap;
/// The plugin boundary: traits, session mapping, registry, echo test.
pub mod plugin;
/// RTCP parsing, building and per-stream accounting.
pub mod rtcp;
/// RTP header codec, extensions, rewrite context, skew compensation.
pub mod rtp;
/// Minimal SDP handling for the transport-level attributes.
pub mod sdp;
/// SRTP/SRTCP protection.
pub mod srtp;
/// The transport boundary for signaling carriers.
pub mod transport;
