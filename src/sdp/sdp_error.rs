use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdpError {
    Empty,
    MissingVersion,
    BadMLine(String),
}

impl fmt::Display for SdpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpError::Empty => write!(f, "empty SDP"),
            SdpError::MissingVersion => write!(f, "SDP does not start with v="),
            SdpError::BadMLine(l) => write!(f, "malformed m-line: {l}"),
        }
    }
}

impl std::error::Error for SdpError {}
