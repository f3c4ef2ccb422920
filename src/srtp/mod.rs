//! SRTP/SRTCP protection (AES128-CM with HMAC-SHA1-80), keyed from the DTLS
//! handshake's exported material.

pub mod constants;
pub mod replay_window;
pub mod session_keys;
pub mod srtp_context;
pub mod srtp_error;
pub mod utils;

pub use srtp_context::SrtpContext;
pub use srtp_error::SrtpError;

/// SRTP protection profiles the gateway can negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrtpProfile {
    Aes128CmHmacSha1_80,
}

/// Master key + salt for one direction, as exported from DTLS.
#[derive(Debug, Clone)]
pub struct SrtpEndpointKeys {
    pub master_key: Vec<u8>,
    pub master_salt: Vec<u8>,
}

/// Keying for both directions of one component.
#[derive(Debug, Clone)]
pub struct SrtpSessionConfig {
    pub profile: SrtpProfile,
    pub outbound: SrtpEndpointKeys,
    pub inbound: SrtpEndpointKeys,
}
