use core::fmt;
use std::io;

use openssl::error::ErrorStack;

#[derive(Debug)]
pub enum DtlsError {
    Io(io::Error),
    Ssl(String),
    Handshake(String),
    /// The peer sent a fatal alert (or close-notify): the PeerConnection is
    /// not usable any more.
    Alert(String),
    FingerprintMismatch,
    NoSrtpProfile,
    KeyExport(String),
}

impl fmt::Display for DtlsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DtlsError::Io(e) => write!(f, "IO error: {e}"),
            DtlsError::Ssl(s) => write!(f, "OpenSSL error: {s}"),
            DtlsError::Handshake(s) => write!(f, "handshake error: {s}"),
            DtlsError::Alert(s) => write!(f, "DTLS alert: {s}"),
            DtlsError::FingerprintMismatch => write!(f, "remote certificate fingerprint mismatch"),
            DtlsError::NoSrtpProfile => write!(f, "no SRTP profile negotiated"),
            DtlsError::KeyExport(s) => write!(f, "key export failed: {s}"),
        }
    }
}

impl std::error::Error for DtlsError {}

impl From<io::Error> for DtlsError {
    fn from(e: io::Error) -> Self {
        DtlsError::Io(e)
    }
}
impl From<ErrorStack> for DtlsError {
    fn from(e: ErrorStack) -> Self {
        DtlsError::Ssl(format!("{e}"))
    }
}
