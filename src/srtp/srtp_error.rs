use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SrtpError {
    TooShort,
    BadMasterKey,
    AuthTagMismatch { ssrc: u32 },
    Replay { ssrc: u32, index: u64 },
    MalformedHeader,
}

impl fmt::Display for SrtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use SrtpError::*;
        match self {
            TooShort => write!(f, "packet too short for SRTP"),
            BadMasterKey => write!(f, "master key material has a bad length"),
            AuthTagMismatch { ssrc } => write!(f, "auth tag mismatch for ssrc {ssrc:#010x}"),
            Replay { ssrc, index } => {
                write!(f, "replayed packet: ssrc {ssrc:#010x} index {index}")
            }
            MalformedHeader => write!(f, "malformed RTP header inside SRTP packet"),
        }
    }
}

impl std::error::Error for SrtpError {}
