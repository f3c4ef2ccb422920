use std::{fmt, io};

#[derive(Debug)]
pub enum IceError {
    Io(io::Error),
    NoUsableInterface,
    NoPortAvailable { min: u16, max: u16 },
    BadCandidate(String),
    BadStun(String),
    AgentClosed,
}

impl fmt::Display for IceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use IceError::*;
        match self {
            Io(e) => write!(f, "IO error: {e}"),
            NoUsableInterface => write!(f, "no usable local interface for ICE"),
            NoPortAvailable { min, max } => {
                write!(f, "no free UDP port in the {min}-{max} range")
            }
            BadCandidate(s) => write!(f, "malformed candidate: {s}"),
            BadStun(s) => write!(f, "malformed STUN message: {s}"),
            AgentClosed => write!(f, "ICE agent already closed"),
        }
    }
}

impl std::error::Error for IceError {}

impl From<io::Error> for IceError {
    fn from(e: io::Error) -> Self {
        IceError::Io(e)
    }
}
