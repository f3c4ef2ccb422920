use crate::dtls::{DtlsRole, runtime::RemoteFingerprint};
use crate::rtcp::context::RtcpContext;
use crate::rtp::{
    AUDIO_CLOCK_RATE, EXTMAP_TRANSPORT_WIDE_CC, VIDEO_CLOCK_RATE, keyframe,
    keyframe::KeyframeDetector, switching_context::RtpSwitchingContext,
};
use crate::sdp::webrtc_info::{MediaDirection, WebRtcInfo};
use rand::{RngCore, rngs::OsRng};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

/// Media classification of one inbound RTP packet after SSRC matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SsrcClass {
    Audio,
    /// Video simulcast layer 0..=2.
    Video(usize),
    /// rtx repair stream for a video layer.
    VideoRtx(usize),
    Unknown,
}

/// The bundled media lane of a handle. One per handle: audio, video (with up
/// to three simulcast layers) and data share a single transport.
///
/// All mutable negotiation and rewrite state lives behind one mutex; the
/// lock order is handle -> stream -> component.
pub struct Stream {
    pub handle_id: u64,
    state: Mutex<StreamState>,
}

pub struct StreamState {
    // Our SSRCs.
    pub audio_ssrc: u32,
    pub video_ssrc: u32,
    pub video_ssrc_rtx: u32,

    // Peer SSRCs (video may be simulcasting).
    pub audio_ssrc_peer: Option<u32>,
    pub video_ssrc_peer: [Option<u32>; 3],
    pub video_ssrc_peer_rtx: [Option<u32>; 3],
    /// Simulcast rid identifiers, offer order.
    pub rids: Vec<String>,

    // Outbound rewrite contexts (continuity towards the peer).
    pub audio_out_ctx: RtpSwitchingContext,
    pub video_out_ctx: [RtpSwitchingContext; 3],
    // Inbound contexts (continuity + skew towards the plugin).
    pub audio_in_ctx: RtpSwitchingContext,
    pub video_in_ctx: [RtpSwitchingContext; 3],

    // Negotiated payload types.
    pub audio_payload_types: Vec<u8>,
    pub video_payload_types: Vec<u8>,
    /// rtx payload type -> base payload type.
    pub rtx_payload_types: HashMap<u8, u8>,
    pub audio_codec: Option<String>,
    pub video_codec: Option<String>,
    pub audio_clock_rate: u32,
    pub video_clock_rate: u32,
    pub video_is_keyframe: Option<KeyframeDetector>,

    // Directions, from our perspective.
    pub audio_send: bool,
    pub audio_recv: bool,
    pub video_send: bool,
    pub video_recv: bool,

    // Per-layer RTCP accounting.
    pub audio_rtcp_ctx: RtcpContext,
    pub video_rtcp_ctx: [RtcpContext; 3],

    pub audio_nacks: bool,
    pub video_nacks: bool,
    pub remb_enabled: bool,

    // Transport-wide CC.
    pub do_twcc: bool,
    pub twcc_ext_id: u8,
    pub twcc_cycles: u16,
    pub twcc_last_seq: Option<u16>,
    /// Pending (extended wide seq, arrival us) waiting for feedback.
    pub twcc_pending: Vec<(u32, i64)>,
    pub twcc_feedback_count: u8,
    pub twcc_last_feedback: Option<Instant>,

    // DTLS/ICE facts from the remote SDP.
    pub dtls_role: DtlsRole,
    pub remote_fingerprint: Option<RemoteFingerprint>,
    pub remote_ufrag: Option<String>,
    pub remote_pwd: Option<String>,
}

impl Stream {
    pub fn new(handle_id: u64) -> Self {
        Self {
            handle_id,
            state: Mutex::new(StreamState::new()),
        }
    }

    /// Run `f` under the stream mutex.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut StreamState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }
}

impl StreamState {
    fn new() -> Self {
        Self {
            audio_ssrc: OsRng.next_u32(),
            video_ssrc: OsRng.next_u32(),
            video_ssrc_rtx: OsRng.next_u32(),
            audio_ssrc_peer: None,
            video_ssrc_peer: [None; 3],
            video_ssrc_peer_rtx: [None; 3],
            rids: Vec::new(),
            audio_out_ctx: RtpSwitchingContext::new(),
            video_out_ctx: std::array::from_fn(|_| RtpSwitchingContext::new()),
            audio_in_ctx: RtpSwitchingContext::new(),
            video_in_ctx: std::array::from_fn(|_| RtpSwitchingContext::new()),
            audio_payload_types: Vec::new(),
            video_payload_types: Vec::new(),
            rtx_payload_types: HashMap::new(),
            audio_codec: None,
            video_codec: None,
            audio_clock_rate: AUDIO_CLOCK_RATE,
            video_clock_rate: VIDEO_CLOCK_RATE,
            video_is_keyframe: None,
            audio_send: false,
            audio_recv: false,
            video_send: false,
            video_recv: false,
            audio_rtcp_ctx: RtcpContext::new(AUDIO_CLOCK_RATE),
            video_rtcp_ctx: std::array::from_fn(|_| RtcpContext::new(VIDEO_CLOCK_RATE)),
            audio_nacks: false,
            video_nacks: false,
            remb_enabled: false,
            do_twcc: false,
            twcc_ext_id: 0,
            twcc_cycles: 0,
            twcc_last_seq: None,
            twcc_pending: Vec::new(),
            twcc_feedback_count: 0,
            twcc_last_feedback: None,
            dtls_role: DtlsRole::Client,
            remote_fingerprint: None,
            remote_ufrag: None,
            remote_pwd: None,
        }
    }

    /// Apply what the remote SDP negotiated. Called when an offer or answer
    /// is processed; on renegotiation the rewrite contexts survive so media
    /// continuity holds.
    pub fn apply_remote_info(&mut self, info: &WebRtcInfo) {
        self.remote_ufrag = info.ufrag.clone();
        self.remote_pwd = info.pwd.clone();
        self.remote_fingerprint = info.fingerprint.clone();
        if let Some(setup) = &info.setup {
            self.dtls_role = DtlsRole::from_remote_setup(setup);
        }
        self.rids = info.rids.clone();
        self.rtx_payload_types = info.rtx_payload_types.clone();

        if let Some(audio) = &info.audio {
            self.audio_payload_types = audio.payload_types.clone();
            self.audio_codec = audio.codec.clone();
            if let Some(rate) = audio.clock_rate {
                self.audio_clock_rate = rate;
            }
            // Directions are the peer's: their sendonly is our recv-only.
            self.audio_recv = matches!(
                audio.direction,
                MediaDirection::SendRecv | MediaDirection::SendOnly
            );
            self.audio_send = matches!(
                audio.direction,
                MediaDirection::SendRecv | MediaDirection::RecvOnly
            );
            self.audio_nacks = audio.nack_enabled;
            if self.audio_ssrc_peer.is_none() {
                self.audio_ssrc_peer = audio.ssrcs.first().copied();
            }
        }

        if let Some(video) = &info.video {
            self.video_payload_types = video.payload_types.clone();
            self.video_codec = video.codec.clone();
            if let Some(rate) = video.clock_rate {
                self.video_clock_rate = rate;
            }
            self.video_recv = matches!(
                video.direction,
                MediaDirection::SendRecv | MediaDirection::SendOnly
            );
            self.video_send = matches!(
                video.direction,
                MediaDirection::SendRecv | MediaDirection::RecvOnly
            );
            self.video_nacks = video.nack_enabled;
            self.remb_enabled = video.remb_enabled;
            self.video_is_keyframe = video
                .codec
                .as_deref()
                .and_then(keyframe::detector_for);
            for (i, ssrc) in video.ssrcs.iter().take(3).enumerate() {
                self.video_ssrc_peer[i] = Some(*ssrc);
            }
            for (i, ssrc) in video.rtx_ssrcs.iter().take(3).enumerate() {
                self.video_ssrc_peer_rtx[i] = Some(*ssrc);
            }
            if video.twcc_enabled {
                for (id, uri) in &info.extmaps {
                    if uri == EXTMAP_TRANSPORT_WIDE_CC {
                        self.do_twcc = true;
                        self.twcc_ext_id = *id;
                    }
                }
            }
        }
    }

    /// Match an inbound SSRC against what we know of the peer, learning
    /// unannounced SSRCs when the SDP did not pin them down.
    pub fn classify_ssrc(&mut self, ssrc: u32, payload_type: u8) -> SsrcClass {
        if self.audio_ssrc_peer == Some(ssrc) {
            return SsrcClass::Audio;
        }
        for (i, peer) in self.video_ssrc_peer.iter().enumerate() {
            if *peer == Some(ssrc) {
                return SsrcClass::Video(i);
            }
        }
        for (i, peer) in self.video_ssrc_peer_rtx.iter().enumerate() {
            if *peer == Some(ssrc) {
                return SsrcClass::VideoRtx(i);
            }
        }

        // Unannounced SSRC: classify by payload type and learn it.
        if self.audio_payload_types.contains(&payload_type) {
            if self.audio_ssrc_peer.is_none() {
                self.audio_ssrc_peer = Some(ssrc);
                return SsrcClass::Audio;
            }
        } else if self.rtx_payload_types.contains_key(&payload_type) {
            for (i, peer) in self.video_ssrc_peer_rtx.iter_mut().enumerate() {
                if peer.is_none() {
                    *peer = Some(ssrc);
                    return SsrcClass::VideoRtx(i);
                }
            }
        } else if self.video_payload_types.contains(&payload_type) {
            for (i, peer) in self.video_ssrc_peer.iter_mut().enumerate() {
                if peer.is_none() {
                    *peer = Some(ssrc);
                    return SsrcClass::Video(i);
                }
            }
        }
        SsrcClass::Unknown
    }

    /// The base payload type an rtx payload type repairs, if negotiated.
    pub fn rtx_base_payload_type(&self, rtx_pt: u8) -> Option<u8> {
        self.rtx_payload_types.get(&rtx_pt).copied()
    }

    /// Record one inbound transport-wide sequence number with its arrival
    /// time, extending it over wraps.
    pub fn twcc_received(&mut self, wide_seq: u16, arrival_us: i64) {
        if let Some(last) = self.twcc_last_seq
            && wide_seq < last
            && last - wide_seq > 0x8000
        {
            self.twcc_cycles = self.twcc_cycles.wrapping_add(1);
        }
        self.twcc_last_seq = Some(wide_seq);
        let extended = (u32::from(self.twcc_cycles) << 16) | u32::from(wide_seq);
        self.twcc_pending.push((extended, arrival_us));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdp::{SessionDescription, extract_webrtc_info};

    const OFFER: &str = "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\ns=-\r\nt=0 0\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
a=ice-ufrag:abcd\r\na=ice-pwd:0123456789abcdef012345\r\n\
a=fingerprint:sha-256 AA:BB\r\na=setup:actpass\r\n\
a=rtpmap:111 opus/48000/2\r\na=sendrecv\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96 97\r\n\
a=rtpmap:96 VP8/90000\r\na=rtpmap:97 rtx/90000\r\na=fmtp:97 apt=96\r\n\
a=rtcp-fb:96 nack\r\n\
a=ssrc-group:FID 111111 222222\r\n\
a=ssrc:111111 cname:x\r\na=ssrc:222222 cname:x\r\n\
a=sendonly\r\n";

    fn negotiated_state() -> StreamState {
        let sdp = SessionDescription::parse(OFFER).unwrap();
        let info = extract_webrtc_info(&sdp);
        let mut state = StreamState::new();
        state.apply_remote_info(&info);
        state
    }

    #[test]
    fn applies_negotiation() {
        let state = negotiated_state();
        assert_eq!(state.audio_codec.as_deref(), Some("OPUS"));
        assert!(state.audio_send && state.audio_recv);
        // peer is sendonly on video: we only receive
        assert!(state.video_recv);
        assert!(!state.video_send);
        assert!(state.video_nacks);
        assert!(state.video_is_keyframe.is_some());
        assert_eq!(state.dtls_role, DtlsRole::Client); // actpass -> we go active
        assert_eq!(state.video_ssrc_peer[0], Some(111_111));
        assert_eq!(state.video_ssrc_peer_rtx[0], Some(222_222));
    }

    #[test]
    fn classifies_known_and_learned_ssrcs() {
        let mut state = negotiated_state();
        state.audio_ssrc_peer = Some(555);

        assert_eq!(state.classify_ssrc(555, 111), SsrcClass::Audio);
        assert_eq!(state.classify_ssrc(111_111, 96), SsrcClass::Video(0));
        assert_eq!(state.classify_ssrc(222_222, 97), SsrcClass::VideoRtx(0));
        // a new video ssrc with a video pt takes the next free layer
        assert_eq!(state.classify_ssrc(333_333, 96), SsrcClass::Video(1));
        // garbage pt stays unknown
        assert_eq!(state.classify_ssrc(444_444, 33), SsrcClass::Unknown);
    }

    #[test]
    fn twcc_extends_over_wraps() {
        let mut state = StreamState::new();
        state.twcc_received(65_534, 1);
        state.twcc_received(65_535, 2);
        state.twcc_received(0, 3);
        assert_eq!(state.twcc_pending.len(), 3);
        assert_eq!(state.twcc_pending[2].0, 65_536);
    }
}
