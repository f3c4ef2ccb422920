//! RTP packet model + encode/decode per RFC 3550. No session logic here
//! (no jitter calc, no rtx): immutable packet structs and safe serialization.

use super::{rtp_error::RtpError, rtp_header::RtpHeader};

/// Complete RTP packet (header + payload).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub header: RtpHeader,
    /// Payload without any trailing padding bytes. If padding was present,
    /// `padding_bytes` records how much was removed during decode.
    pub payload: Vec<u8>,
    /// Count of padding bytes (from the last byte) if the P bit was set.
    pub padding_bytes: u8,
}

impl RtpPacket {
    pub fn new(header: RtpHeader, payload: Vec<u8>) -> Self {
        Self {
            header,
            payload,
            padding_bytes: 0,
        }
    }

    /// Convenience constructor.
    pub fn simple(
        payload_type: u8,
        marker: bool,
        seq: u16,
        ts: u32,
        ssrc: u32,
        payload: Vec<u8>,
    ) -> Self {
        let header = RtpHeader::new(payload_type, seq, ts, ssrc).with_marker(marker);
        Self::new(header, payload)
    }

    /// Encode into a fresh `Vec<u8>` (network byte order).
    pub fn encode(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(12 + self.header.csrcs.len() * 4 + self.payload.len() + 4);
        self.header.encode_into(&mut out);
        out.extend_from_slice(&self.payload);

        if self.header.padding && self.padding_bytes > 0 {
            // (padding_bytes - 1) zeros, then the count itself
            if self.padding_bytes > 1 {
                out.extend(std::iter::repeat_n(0u8, (self.padding_bytes - 1) as usize));
            }
            out.push(self.padding_bytes);
        }

        out
    }

    /// Decode a single RTP packet from `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, RtpError> {
        let (header, idx) = RtpHeader::decode(buf)?;

        // Determine payload region (handle the P bit: trailing padding whose
        // last byte carries the pad length).
        let mut payload_end = buf.len();
        let mut padding_bytes = 0u8;

        if header.padding {
            if payload_end == idx {
                return Err(RtpError::PaddingTooShort);
            }
            let pad = buf[payload_end - 1];
            if pad == 0 || pad as usize > payload_end - idx {
                return Err(RtpError::PaddingTooShort);
            }
            padding_bytes = pad;
            payload_end -= pad as usize;
        }

        if payload_end < idx {
            return Err(RtpError::Invalid);
        }
        let payload = buf[idx..payload_end].to_vec();

        Ok(RtpPacket {
            header,
            payload,
            padding_bytes,
        })
    }

    // Convenience getters
    pub fn payload_type(&self) -> u8 {
        self.header.payload_type
    }
    pub fn marker(&self) -> bool {
        self.header.marker
    }
    pub fn seq(&self) -> u16 {
        self.header.sequence_number
    }
    pub fn timestamp(&self) -> u32 {
        self.header.timestamp
    }
    pub fn ssrc(&self) -> u32 {
        self.header.ssrc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_simple_packet() {
        let pkt = RtpPacket::simple(96, true, 7, 90_000, 0xAABB_CCDD, vec![1, 2, 3, 4]);
        let wire = pkt.encode();
        let back = RtpPacket::decode(&wire).unwrap();
        assert_eq!(back, pkt);
    }

    #[test]
    fn strips_trailing_padding() {
        let mut pkt = RtpPacket::simple(0, false, 1, 160, 0x11, vec![9, 9]);
        pkt.header.padding = true;
        pkt.padding_bytes = 4;
        let wire = pkt.encode();
        assert_eq!(wire.len(), 12 + 2 + 4);

        let back = RtpPacket::decode(&wire).unwrap();
        assert_eq!(back.payload, vec![9, 9]);
        assert_eq!(back.padding_bytes, 4);
    }

    #[test]
    fn rejects_padding_longer_than_payload() {
        let mut wire = RtpPacket::simple(0, false, 1, 160, 0x11, vec![]).encode();
        wire[0] |= 0x20; // set P bit
        wire.push(200); // bogus pad count
        assert_eq!(RtpPacket::decode(&wire), Err(RtpError::PaddingTooShort));
    }
}
