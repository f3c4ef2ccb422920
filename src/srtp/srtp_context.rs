use crate::log::log_sink::LogSink;
use crate::srtp::SrtpEndpointKeys;
use crate::srtp::constants::{AUTH_TAG_LEN, SRTCP_INDEX_LEN};
use crate::srtp::replay_window::ReplayWindow;
use crate::srtp::session_keys::SessionKeys;
use crate::srtp::srtp_error::SrtpError;
use crate::srtp::utils::{
    Aes128Ctr, HmacSha1, compute_iv, constant_time_eq, derive_rtcp_session_keys,
    derive_rtp_session_keys, rtp_header_len,
};
use crate::{sink_trace, sink_warn};
use aes::cipher::{KeyIvInit, StreamCipher};
use byteorder::{BigEndian, ByteOrder};
use hmac::Mac;
use std::collections::HashMap;
use std::sync::Arc;

/// One direction of SRTP/SRTCP protection.
///
/// Each component owns two of these (inbound and outbound), created when the
/// DTLS handshake exports keying material. Packets are transformed in place:
/// `protect*` appends the auth tag, `unprotect*` verifies and strips it.
pub struct SrtpContext {
    logger: Arc<dyn LogSink>,
    rtp_keys: SessionKeys,
    rtcp_keys: SessionKeys,
    /// Rollover counters per SSRC (RTP index = ROC << 16 | seq).
    rocs: HashMap<u32, u32>,
    last_seqs: HashMap<u32, u16>,
    replay_windows: HashMap<u32, ReplayWindow>,
    rtcp_replay_windows: HashMap<u32, ReplayWindow>,
    /// Our 31-bit SRTCP index, incremented per protected compound.
    srtcp_index: u32,
}

impl SrtpContext {
    pub fn new(logger: Arc<dyn LogSink>, master: &SrtpEndpointKeys) -> Result<Self, SrtpError> {
        Ok(Self {
            logger,
            rtp_keys: derive_rtp_session_keys(master)?,
            rtcp_keys: derive_rtcp_session_keys(master)?,
            rocs: HashMap::new(),
            last_seqs: HashMap::new(),
            replay_windows: HashMap::new(),
            rtcp_replay_windows: HashMap::new(),
            srtcp_index: 0,
        })
    }

    /// Encrypt + authenticate an RTP packet in place (tag appended).
    pub fn protect_rtp(&mut self, packet: &mut Vec<u8>) -> Result<(), SrtpError> {
        if packet.len() < 12 {
            return Err(SrtpError::TooShort);
        }
        let seq = BigEndian::read_u16(&packet[2..4]);
        let ssrc = BigEndian::read_u32(&packet[8..12]);
        let roc = self.roc_for_outbound(ssrc, seq);
        let index = (u64::from(roc) << 16) | u64::from(seq);

        let header_len = rtp_header_len(packet)?;

        let iv = compute_iv(&self.rtp_keys.salt, ssrc, index);
        let mut cipher = Aes128Ctr::new(&self.rtp_keys.enc_key.into(), &iv.into());
        cipher.apply_keystream(&mut packet[header_len..]);

        let mut mac =
            HmacSha1::new_from_slice(&self.rtp_keys.auth_key).map_err(|_| SrtpError::BadMasterKey)?;
        mac.update(packet);
        mac.update(&roc.to_be_bytes());
        let tag = mac.finalize().into_bytes();
        packet.extend_from_slice(&tag[..AUTH_TAG_LEN]);

        sink_trace!(
            self.logger,
            "[SRTP] protected ssrc={ssrc:#010x} seq={seq} roc={roc} len={}",
            packet.len()
        );
        Ok(())
    }

    /// Verify + decrypt an SRTP packet in place (tag stripped).
    pub fn unprotect_rtp(&mut self, packet: &mut Vec<u8>) -> Result<(), SrtpError> {
        if packet.len() < 12 + AUTH_TAG_LEN {
            return Err(SrtpError::TooShort);
        }

        let tag_start = packet.len() - AUTH_TAG_LEN;
        let (content, received_tag) = packet.split_at(tag_start);

        let seq = BigEndian::read_u16(&content[2..4]);
        let ssrc = BigEndian::read_u32(&content[8..12]);
        let roc = self.estimate_roc(ssrc, seq);
        let index = (u64::from(roc) << 16) | u64::from(seq);

        let window = self.replay_windows.entry(ssrc).or_insert_with(ReplayWindow::new);
        if window.is_replay(index) {
            sink_warn!(
                self.logger,
                "[SRTP] replay detected: ssrc={ssrc:#010x} seq={seq} index={index}"
            );
            return Err(SrtpError::Replay { ssrc, index });
        }

        let mut mac =
            HmacSha1::new_from_slice(&self.rtp_keys.auth_key).map_err(|_| SrtpError::BadMasterKey)?;
        mac.update(content);
        mac.update(&roc.to_be_bytes());
        let computed = mac.finalize().into_bytes();
        if !constant_time_eq(&computed[..AUTH_TAG_LEN], received_tag) {
            return Err(SrtpError::AuthTagMismatch { ssrc });
        }

        packet.truncate(tag_start);
        let header_len = rtp_header_len(packet)?;
        let iv = compute_iv(&self.rtp_keys.salt, ssrc, index);
        let mut cipher = Aes128Ctr::new(&self.rtp_keys.enc_key.into(), &iv.into());
        cipher.apply_keystream(&mut packet[header_len..]);

        self.rocs.insert(ssrc, roc);
        self.last_seqs.insert(ssrc, seq);
        self.replay_windows
            .get_mut(&ssrc)
            .expect("window was just inserted")
            .record(index);

        Ok(())
    }

    /// Encrypt + authenticate an RTCP compound in place: payload encrypted
    /// from byte 8, E-flag + index appended, then the auth tag.
    pub fn protect_rtcp(&mut self, packet: &mut Vec<u8>) -> Result<(), SrtpError> {
        if packet.len() < 8 {
            return Err(SrtpError::TooShort);
        }
        let ssrc = BigEndian::read_u32(&packet[4..8]);
        self.srtcp_index = (self.srtcp_index + 1) & 0x7FFF_FFFF;
        let index = self.srtcp_index;

        let iv = compute_iv(&self.rtcp_keys.salt, ssrc, u64::from(index));
        let mut cipher = Aes128Ctr::new(&self.rtcp_keys.enc_key.into(), &iv.into());
        cipher.apply_keystream(&mut packet[8..]);

        // E flag set: payload is encrypted
        packet.extend_from_slice(&(index | 0x8000_0000).to_be_bytes());

        let mut mac = HmacSha1::new_from_slice(&self.rtcp_keys.auth_key)
            .map_err(|_| SrtpError::BadMasterKey)?;
        mac.update(packet);
        let tag = mac.finalize().into_bytes();
        packet.extend_from_slice(&tag[..AUTH_TAG_LEN]);
        Ok(())
    }

    /// Verify + decrypt an SRTCP compound in place.
    pub fn unprotect_rtcp(&mut self, packet: &mut Vec<u8>) -> Result<(), SrtpError> {
        if packet.len() < 8 + SRTCP_INDEX_LEN + AUTH_TAG_LEN {
            return Err(SrtpError::TooShort);
        }

        let tag_start = packet.len() - AUTH_TAG_LEN;
        let (content, received_tag) = packet.split_at(tag_start);

        let mut mac = HmacSha1::new_from_slice(&self.rtcp_keys.auth_key)
            .map_err(|_| SrtpError::BadMasterKey)?;
        mac.update(content);
        let computed = mac.finalize().into_bytes();
        let ssrc = BigEndian::read_u32(&content[4..8]);
        if !constant_time_eq(&computed[..AUTH_TAG_LEN], received_tag) {
            return Err(SrtpError::AuthTagMismatch { ssrc });
        }

        let index_start = tag_start - SRTCP_INDEX_LEN;
        let e_and_index = BigEndian::read_u32(&packet[index_start..tag_start]);
        let encrypted = e_and_index & 0x8000_0000 != 0;
        let index = u64::from(e_and_index & 0x7FFF_FFFF);

        let window = self
            .rtcp_replay_windows
            .entry(ssrc)
            .or_insert_with(ReplayWindow::new);
        if window.is_replay(index) {
            return Err(SrtpError::Replay { ssrc, index });
        }

        packet.truncate(index_start);
        if encrypted {
            let iv = compute_iv(&self.rtcp_keys.salt, ssrc, index);
            let mut cipher = Aes128Ctr::new(&self.rtcp_keys.enc_key.into(), &iv.into());
            cipher.apply_keystream(&mut packet[8..]);
        }

        self.rtcp_replay_windows
            .get_mut(&ssrc)
            .expect("window was just inserted")
            .record(index);
        Ok(())
    }

    fn roc_for_outbound(&mut self, ssrc: u32, seq: u16) -> u32 {
        let Some(&last_seq) = self.last_seqs.get(&ssrc) else {
            self.last_seqs.insert(ssrc, seq);
            self.rocs.insert(ssrc, 0);
            return 0;
        };

        let mut roc = *self.rocs.get(&ssrc).unwrap_or(&0);
        if seq < last_seq && last_seq.wrapping_sub(seq) > 0x8000 {
            roc = roc.wrapping_add(1);
        }
        self.last_seqs.insert(ssrc, seq);
        self.rocs.insert(ssrc, roc);
        roc
    }

    fn estimate_roc(&self, ssrc: u32, seq: u16) -> u32 {
        let last_seq = match self.last_seqs.get(&ssrc) {
            Some(&s) => s,
            None => return 0,
        };
        let last_roc = *self.rocs.get(&ssrc).unwrap_or(&0);

        let delta = i32::from(seq) - i32::from(last_seq);
        if delta <= -32768 {
            return last_roc.wrapping_add(1);
        }
        if delta >= 32768 {
            return last_roc.wrapping_sub(1);
        }
        last_roc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::NoopLogSink;
    use crate::rtp::RtpPacket;

    fn keys() -> SrtpEndpointKeys {
        SrtpEndpointKeys {
            master_key: (0..16u8).collect(),
            master_salt: (100..114u8).collect(),
        }
    }

    fn pair() -> (SrtpContext, SrtpContext) {
        let logger = Arc::new(NoopLogSink);
        (
            SrtpContext::new(logger.clone(), &keys()).unwrap(),
            SrtpContext::new(logger, &keys()).unwrap(),
        )
    }

    #[test]
    fn rtp_protect_unprotect_round_trip() {
        let (mut tx, mut rx) = pair();
        for seq in 0u16..32 {
            let plain = RtpPacket::simple(96, false, seq, u32::from(seq) * 960, 0xABCD, vec![
                1, 2, 3, seq as u8,
            ])
            .encode();
            let mut wire = plain.clone();
            tx.protect_rtp(&mut wire).unwrap();
            assert_ne!(wire[12..16], plain[12..16], "payload must be encrypted");
            rx.unprotect_rtp(&mut wire).unwrap();
            assert_eq!(wire, plain);
        }
    }

    #[test]
    fn replayed_rtp_packet_is_rejected() {
        let (mut tx, mut rx) = pair();
        let mut wire = RtpPacket::simple(96, false, 7, 7000, 0xABCD, vec![1]).encode();
        tx.protect_rtp(&mut wire).unwrap();
        let replay = wire.clone();
        rx.unprotect_rtp(&mut wire).unwrap();

        let mut again = replay;
        assert!(matches!(
            rx.unprotect_rtp(&mut again),
            Err(SrtpError::Replay { .. })
        ));
    }

    #[test]
    fn tampered_rtp_packet_fails_auth() {
        let (mut tx, mut rx) = pair();
        let mut wire = RtpPacket::simple(96, false, 9, 9000, 0xABCD, vec![1, 2]).encode();
        tx.protect_rtp(&mut wire).unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 0xFF;
        assert!(matches!(
            rx.unprotect_rtp(&mut wire),
            Err(SrtpError::AuthTagMismatch { .. })
        ));
    }

    #[test]
    fn rtcp_protect_unprotect_round_trip() {
        let (mut tx, mut rx) = pair();
        // minimal RR: header + ssrc
        let plain: Vec<u8> = vec![0x80, 201, 0x00, 0x01, 0x00, 0x00, 0xAB, 0xCD];
        let mut wire = plain.clone();
        tx.protect_rtcp(&mut wire).unwrap();
        assert!(wire.len() > plain.len());
        rx.unprotect_rtcp(&mut wire).unwrap();
        assert_eq!(wire, plain);
    }

    #[test]
    fn wrong_key_fails_auth() {
        let logger = Arc::new(NoopLogSink);
        let mut tx = SrtpContext::new(logger.clone(), &keys()).unwrap();
        let other = SrtpEndpointKeys {
            master_key: vec![9u8; 16],
            master_salt: vec![7u8; 14],
        };
        let mut rx = SrtpContext::new(logger, &other).unwrap();

        let mut wire = RtpPacket::simple(96, false, 1, 100, 0xABCD, vec![5]).encode();
        tx.protect_rtp(&mut wire).unwrap();
        assert!(rx.unprotect_rtp(&mut wire).is_err());
    }
}
