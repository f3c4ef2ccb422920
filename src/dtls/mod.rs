//! DTLS handshake driver (OpenSSL) and SRTP key export.
//!
//! Each component hands its demultiplexed DTLS datagrams to a
//! [`packet_channel::PacketChannel`]; a dedicated thread runs the blocking
//! handshake over it and, on completion, exports the SRTP keying material.

pub mod dtls_error;
pub mod dtls_role;
pub mod identity;
pub mod packet_channel;
pub mod runtime;

pub use dtls_error::DtlsError;
pub use dtls_role::DtlsRole;
pub use identity::DtlsIdentity;
pub use packet_channel::PacketChannel;
pub use runtime::{DtlsConnection, run_dtls_handshake};
