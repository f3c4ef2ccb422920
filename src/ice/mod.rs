//! ICE: candidate gathering, connectivity checks, trickling, and the
//! RFC 7983 demultiplexer that splits STUN/DTLS/RTP sharing one socket.

pub mod agent;
pub mod candidate;
pub mod candidate_type;
pub mod gathering;
pub mod ice_error;
pub mod stun;
pub mod trickle;

pub use agent::{IceAgent, IceConfig, IceState};
pub use candidate::Candidate;
pub use candidate_type::CandidateType;
pub use ice_error::IceError;
pub use trickle::TrickleCandidate;

/// What an inbound datagram is, by its first byte (RFC 7983).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketClass {
    Stun,
    ZrtpOrTurn,
    Dtls,
    TurnChannel,
    Rtp,
    Unknown,
}

/// Classify a datagram sharing the ICE socket.
pub fn classify(first_byte: u8) -> PacketClass {
    match first_byte {
        0..=3 => PacketClass::Stun,
        16..=19 => PacketClass::ZrtpOrTurn,
        20..=63 => PacketClass::Dtls,
        64..=79 => PacketClass::TurnChannel,
        128..=191 => PacketClass::Rtp,
        _ => PacketClass::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demux_ranges() {
        assert_eq!(classify(0), PacketClass::Stun);
        assert_eq!(classify(1), PacketClass::Stun);
        assert_eq!(classify(22), PacketClass::Dtls);
        assert_eq!(classify(63), PacketClass::Dtls);
        assert_eq!(classify(64), PacketClass::TurnChannel);
        assert_eq!(classify(128), PacketClass::Rtp);
        assert_eq!(classify(191), PacketClass::Rtp);
        assert_eq!(classify(255), PacketClass::Unknown);
    }
}
