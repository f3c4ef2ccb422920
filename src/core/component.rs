use crate::core::retransmit::{self, RetransmitBuffer};
use crate::core::seq_window::SeqWindow;
use crate::core::stats::{MediaStats, SlowLinkTracker};
use crate::core::stream::{SsrcClass, Stream};
use crate::ice::agent::IceAgent;
use crate::log::log_sink::LogSink;
use crate::rtcp::{
    RtcpPacket, context::RtcpContext, generic_nack::GenericNack, packet_type::RtcpPacketType,
    receiver_report::ReceiverReport, sender_report::SenderReport, twcc::TwccFeedback,
};
use crate::rtp::{RtpHeader, extension, time as rtp_time};
use crate::srtp::{SrtpContext, SrtpError, SrtpSessionConfig};
use crate::{sink_debug, sink_trace, sink_warn};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Log SRTP errors at most this often.
const SRTP_ERROR_LOG_INTERVAL: Duration = Duration::from_secs(5);
/// ICE failure grace period before hanging up.
pub const ICE_FAILED_TIMEOUT: Duration = Duration::from_secs(5);
/// Fallback RTT when no RTCP round trip was measured yet.
const DEFAULT_NACK_RTT: Duration = Duration::from_millis(100);

/// The transport of a stream: the ICE agent, the SRTP contexts and the
/// retransmission machinery. Everything mutable sits behind one mutex, taken
/// after the stream's (lock order handle -> stream -> component).
pub struct Component {
    pub handle_id: u64,
    logger: Arc<dyn LogSink>,
    pub agent: Mutex<Option<Arc<IceAgent>>>,
    /// Inbound DTLS datagrams are forwarded to the handshake thread here.
    pub dtls_tx: Mutex<Option<Sender<Vec<u8>>>>,
    state: Mutex<ComponentState>,
}

pub struct ComponentState {
    pub srtp_in: Option<SrtpContext>,
    pub srtp_out: Option<SrtpContext>,

    pub audio_retransmit: RetransmitBuffer,
    pub video_retransmit: RetransmitBuffer,
    pub audio_seq_window: SeqWindow,
    pub video_seq_windows: [SeqWindow; 3],

    pub in_stats: MediaStats,
    pub out_stats: MediaStats,
    pub slow_link_in: [SlowLinkTracker; 2],  // audio, video
    pub slow_link_out: [SlowLinkTracker; 2], // audio, video

    /// Sequence counter for the RFC 4588 rtx session.
    pub rtx_seq_number: u16,

    /// When ICE failure was first observed (for the icefailed timer).
    pub ice_failed_since: Option<Instant>,
    /// Monotonic time of the last media packet, for the no-media timer.
    pub last_media: Option<Instant>,
    pub no_media_notified: bool,

    // Error accounting with log suppression.
    pub srtp_error_count: u32,
    last_srtp_error_log: Option<Instant>,
    pub retransmit_recent_count: u32,
}

impl Component {
    pub fn new(handle_id: u64, logger: Arc<dyn LogSink>, nack_queue: usize) -> Self {
        Self {
            handle_id,
            logger,
            agent: Mutex::new(None),
            dtls_tx: Mutex::new(None),
            state: Mutex::new(ComponentState {
                srtp_in: None,
                srtp_out: None,
                audio_retransmit: RetransmitBuffer::new(nack_queue),
                video_retransmit: RetransmitBuffer::new(nack_queue),
                audio_seq_window: SeqWindow::new(),
                video_seq_windows: std::array::from_fn(|_| SeqWindow::new()),
                in_stats: MediaStats::default(),
                out_stats: MediaStats::default(),
                slow_link_in: Default::default(),
                slow_link_out: Default::default(),
                rtx_seq_number: 0,
                ice_failed_since: None,
                last_media: None,
                no_media_notified: false,
                srtp_error_count: 0,
                last_srtp_error_log: None,
                retransmit_recent_count: 0,
            }),
        }
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut ComponentState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    /// Install the SRTP contexts exported by the DTLS handshake.
    pub fn install_srtp(&self, config: &SrtpSessionConfig) -> Result<(), SrtpError> {
        let srtp_in = SrtpContext::new(self.logger.clone(), &config.inbound)?;
        let srtp_out = SrtpContext::new(self.logger.clone(), &config.outbound)?;
        let mut state = self.state.lock().unwrap();
        state.srtp_in = Some(srtp_in);
        state.srtp_out = Some(srtp_out);
        Ok(())
    }

    pub fn has_srtp(&self) -> bool {
        self.state.lock().unwrap().srtp_in.is_some()
    }

    /// Inbound SRTP packet: decrypt, classify, unwrap rtx, run the inbound
    /// rewrite/skew contexts, update the NACK window and stats.
    ///
    /// Returns the plaintext packet and whether it is video, or `None` when
    /// the packet was dropped (bad SRTP, unknown SSRC, skew drop).
    pub fn receive_rtp(
        &self,
        mut packet: Vec<u8>,
        stream: &Stream,
        now: Instant,
    ) -> Option<(bool, Vec<u8>)> {
        // SRTP first, under the component lock only.
        {
            let mut state = self.state.lock().unwrap();
            match state.srtp_in.as_mut() {
                Some(srtp) => {
                    if let Err(e) = srtp.unprotect_rtp(&mut packet) {
                        state.srtp_error_count += 1;
                        let log_due = state
                            .last_srtp_error_log
                            .is_none_or(|at| now.duration_since(at) >= SRTP_ERROR_LOG_INTERVAL);
                        if log_due {
                            state.last_srtp_error_log = Some(now);
                            sink_warn!(
                                &self.logger,
                                "[CORE][{}] SRTP unprotect failed ({} so far): {e}",
                                self.handle_id,
                                state.srtp_error_count
                            );
                        }
                        return None;
                    }
                }
                None => return None, // media before DTLS completed
            }
        }

        let (header, _) = RtpHeader::decode(&packet).ok()?;
        let mut out_packet = packet;

        // Classification and rewriting under the stream lock; the results
        // needed afterwards come out as plain values.
        struct InboundFacts {
            video: bool,
            layer: usize,
            seq: u16,
            nacks_wanted: bool,
        }
        let facts: Option<InboundFacts> = stream.with_state(|s| {
            let class = s.classify_ssrc(header.ssrc, header.payload_type);
            let (layer, video) = match class {
                SsrcClass::Audio => (0usize, false),
                SsrcClass::Video(l) => (l, true),
                SsrcClass::VideoRtx(l) => {
                    // Strip the OSN and re-present under the base SSRC.
                    let base_pt = s
                        .rtx_base_payload_type(header.payload_type)
                        .unwrap_or(header.payload_type);
                    let base_ssrc = s.video_ssrc_peer[l].unwrap_or(header.ssrc);
                    out_packet = retransmit::unwrap_rtx(&out_packet, base_pt, base_ssrc)?;
                    (l, true)
                }
                SsrcClass::Unknown => {
                    sink_debug!(
                        &self.logger,
                        "[CORE][{}] dropping RTP with unknown ssrc={:#010x} pt={}",
                        self.handle_id,
                        header.ssrc,
                        header.payload_type
                    );
                    return None;
                }
            };

            let (mut header, _) = RtpHeader::decode(&out_packet).ok()?;

            // Transport-wide CC bookkeeping happens before any rewriting.
            if s.do_twcc
                && let Some(ext) = header.header_extension.as_ref()
                && let Some(wide_seq) = extension::parse_transport_wide_cc(ext, s.twcc_ext_id)
            {
                s.twcc_received(wide_seq, monotonic_us(now));
            }

            // Inbound continuity + skew compensation.
            let clock_rate = if video {
                s.video_clock_rate
            } else {
                s.audio_clock_rate
            };
            let step = clock_rate / 50;
            let threshold_ms = if video {
                crate::rtp::skew::VIDEO_SKEW_TH_MS
            } else {
                crate::rtp::skew::AUDIO_SKEW_TH_MS
            };
            let ctx = if video {
                &mut s.video_in_ctx[layer]
            } else {
                &mut s.audio_in_ctx
            };
            ctx.update(&mut header, now, step);
            if ctx.skew_compensate(&mut header, now, clock_rate, threshold_ms) < 0 {
                return None; // sender runs fast: drop this packet
            }

            header.patch_into(&mut out_packet);

            // RTCP accounting under the rewritten numbers.
            let rtcp_ctx: &mut RtcpContext = if video {
                &mut s.video_rtcp_ctx[layer]
            } else {
                &mut s.audio_rtcp_ctx
            };
            rtcp_ctx.received_rtp(header.sequence_number, header.timestamp, monotonic_us(now));

            Some(InboundFacts {
                video,
                layer,
                seq: header.sequence_number,
                nacks_wanted: if video { s.video_nacks } else { s.audio_nacks },
            })
        });
        let facts = facts?;

        // NACK window and stats under the component lock, taken after the
        // stream lock was released.
        {
            let mut state = self.state.lock().unwrap();
            if facts.nacks_wanted {
                let window = if facts.video {
                    &mut state.video_seq_windows[facts.layer]
                } else {
                    &mut state.audio_seq_window
                };
                window.received(facts.seq, now);
            }
            state
                .in_stats
                .media(facts.video, facts.layer)
                .account(out_packet.len(), now);
            state.last_media = Some(now);
            state.no_media_notified = false;
        }

        sink_trace!(
            &self.logger,
            "[CORE][{}] inbound {} packet ({} bytes)",
            self.handle_id,
            if facts.video { "video" } else { "audio" },
            out_packet.len()
        );
        Some((facts.video, out_packet))
    }

    /// Inbound SRTCP: decrypt and split the compound.
    pub fn receive_rtcp(&self, mut packet: Vec<u8>, now: Instant) -> Option<Vec<RtcpPacket>> {
        let mut state = self.state.lock().unwrap();
        match state.srtp_in.as_mut() {
            Some(srtp) => {
                if let Err(e) = srtp.unprotect_rtcp(&mut packet) {
                    state.srtp_error_count += 1;
                    let log_due = state
                        .last_srtp_error_log
                        .is_none_or(|at| now.duration_since(at) >= SRTP_ERROR_LOG_INTERVAL);
                    if log_due {
                        state.last_srtp_error_log = Some(now);
                        sink_warn!(
                            &self.logger,
                            "[CORE][{}] SRTCP unprotect failed: {e}",
                            self.handle_id
                        );
                    }
                    return None;
                }
            }
            None => return None,
        }
        drop(state);

        match RtcpPacket::decode_compound(&packet) {
            Ok(pkts) => Some(pkts),
            Err(e) => {
                sink_debug!(
                    &self.logger,
                    "[CORE][{}] malformed RTCP compound: {e}",
                    self.handle_id
                );
                None
            }
        }
    }

    /// Outbound RTP from the plugin: rewrite for continuity, stamp our SSRC,
    /// cache for retransmission, protect. Returns the wire bytes.
    pub fn send_rtp(
        &self,
        mut packet: Vec<u8>,
        video: bool,
        stream: &Stream,
        now: Instant,
    ) -> Option<Vec<u8>> {
        let (mut header, _) = RtpHeader::decode(&packet).ok()?;

        stream.with_state(|s| {
            let step = if video {
                s.video_clock_rate / 30 // one frame at ~30fps
            } else {
                s.audio_clock_rate / 50 // 20 ms of audio
            };
            let ctx = if video {
                &mut s.video_out_ctx[0]
            } else {
                &mut s.audio_out_ctx
            };
            ctx.update(&mut header, now, step);
            header.ssrc = if video { s.video_ssrc } else { s.audio_ssrc };
            header.patch_into(&mut packet);

            let rtcp_ctx = if video {
                &mut s.video_rtcp_ctx[0]
            } else {
                &mut s.audio_rtcp_ctx
            };
            rtcp_ctx.sent_rtp(packet.len(), header.timestamp);
        });

        let mut state = self.state.lock().unwrap();
        let retransmit = if video {
            &mut state.video_retransmit
        } else {
            &mut state.audio_retransmit
        };
        retransmit.store(header.sequence_number, packet.clone(), now);

        state.out_stats.media(video, 0).account(packet.len(), now);

        let srtp = state.srtp_out.as_mut()?;
        if srtp.protect_rtp(&mut packet).is_err() {
            return None;
        }
        Some(packet)
    }

    /// Outbound RTCP from the plugin or our own reports: protect.
    pub fn send_rtcp(&self, mut packet: Vec<u8>) -> Option<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        let srtp = state.srtp_out.as_mut()?;
        if srtp.protect_rtcp(&mut packet).is_err() {
            return None;
        }
        Some(packet)
    }

    /// Answer an inbound NACK: collect the requested retransmissions,
    /// already SRTP-protected, rtx-wrapped when negotiated.
    pub fn handle_nack(
        &self,
        seqs: &[u16],
        video: bool,
        rfc4588: Option<(u8, u32)>, // (rtx payload type, rtx ssrc)
        now: Instant,
    ) -> Vec<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        let mut out = Vec::new();

        for &seq in seqs {
            let buffer = if video {
                &mut state.video_retransmit
            } else {
                &mut state.audio_retransmit
            };
            let Some(original) = buffer.lookup(seq, now) else {
                continue;
            };
            let mut packet = match rfc4588 {
                Some((rtx_pt, rtx_ssrc)) => {
                    state.rtx_seq_number = state.rtx_seq_number.wrapping_add(1);
                    let rtx_seq = state.rtx_seq_number;
                    match retransmit::wrap_rtx(&original, rtx_pt, rtx_ssrc, rtx_seq) {
                        Some(p) => p,
                        None => continue,
                    }
                }
                None => original,
            };
            if let Some(srtp) = state.srtp_out.as_mut()
                && srtp.protect_rtp(&mut packet).is_ok()
            {
                out.push(packet);
            }
            state.out_stats.media(video, 0).account_nack();
            state.retransmit_recent_count += 1;
        }
        out
    }

    /// Poll the NACK generation windows; returns the generated NACK
    /// compounds (unprotected) per media, plus how many sequence numbers
    /// were requested (for slow-link accounting).
    pub fn nacks_due(
        &self,
        stream: &Stream,
        now: Instant,
    ) -> Vec<(bool, GenericNack, u32)> {
        let rtt = stream.with_state(|s| {
            s.audio_rtcp_ctx
                .rtt_ms()
                .or_else(|| s.video_rtcp_ctx[0].rtt_ms())
                .map(|ms| Duration::from_millis(u64::from(ms.max(1))))
                .unwrap_or(DEFAULT_NACK_RTT)
        });

        let (audio_peer, video_peers, our_audio_ssrc, our_video_ssrc) = stream.with_state(|s| {
            (
                s.audio_ssrc_peer,
                s.video_ssrc_peer,
                s.audio_ssrc,
                s.video_ssrc,
            )
        });

        let mut state = self.state.lock().unwrap();
        let mut out = Vec::new();

        if let Some(peer_ssrc) = audio_peer {
            let due = state.audio_seq_window.nacks_due(now, rtt);
            if !due.is_empty() {
                state.in_stats.audio.nacks += due.len() as u32;
                out.push((
                    false,
                    GenericNack::from_seqs(our_audio_ssrc, peer_ssrc, &due),
                    due.len() as u32,
                ));
            }
        }
        for layer in 0..3 {
            if let Some(peer_ssrc) = video_peers[layer] {
                let due = state.video_seq_windows[layer].nacks_due(now, rtt);
                if !due.is_empty() {
                    state.in_stats.video[layer].nacks += due.len() as u32;
                    out.push((
                        true,
                        GenericNack::from_seqs(our_video_ssrc, peer_ssrc, &due),
                        due.len() as u32,
                    ));
                }
            }
        }
        out
    }

    /// Build the periodic RTCP report compound (RR with report blocks; SR
    /// when we are sending). Returns the unprotected compound, if any.
    pub fn build_rtcp_report(&self, stream: &Stream) -> Option<Vec<u8>> {
        stream.with_state(|s| {
            let mut packets: Vec<RtcpPacket> = Vec::new();
            let ntp = rtp_time::ntp_now();

            if let Some(si) = s.audio_rtcp_ctx.build_sender_info(ntp) {
                packets.push(RtcpPacket::Sr(SenderReport::new(s.audio_ssrc, si, vec![])));
            }
            if let Some(si) = s.video_rtcp_ctx[0].build_sender_info(ntp) {
                packets.push(RtcpPacket::Sr(SenderReport::new(s.video_ssrc, si, vec![])));
            }

            let mut blocks = Vec::new();
            if let Some(peer) = s.audio_ssrc_peer
                && let Some(rb) = s.audio_rtcp_ctx.build_report_block(peer)
            {
                blocks.push(rb);
            }
            for layer in 0..3 {
                if let Some(peer) = s.video_ssrc_peer[layer]
                    && let Some(rb) = s.video_rtcp_ctx[layer].build_report_block(peer)
                {
                    blocks.push(rb);
                }
            }
            if !blocks.is_empty() {
                packets.push(RtcpPacket::Rr(ReceiverReport::new(s.audio_ssrc, blocks)));
            }

            if packets.is_empty() {
                return None;
            }
            RtcpPacket::encode_compound(&packets).ok()
        })
    }

    /// Build transport-wide CC feedback from the pending arrivals, when due
    /// (every 100 ms or when the backlog crosses the threshold).
    pub fn build_twcc_feedback(&self, stream: &Stream, now: Instant) -> Option<Vec<u8>> {
        stream.with_state(|s| {
            if !s.do_twcc || s.twcc_pending.is_empty() {
                return None;
            }
            let backlog = s.twcc_pending.len();
            let due = backlog >= 100
                || s
                    .twcc_last_feedback
                    .is_none_or(|at| now.duration_since(at) >= Duration::from_millis(100));
            if !due {
                return None;
            }
            s.twcc_last_feedback = Some(now);

            s.twcc_pending.sort_by_key(|(seq, _)| *seq);
            let base_ext = s.twcc_pending.first()?.0;
            let last_ext = s.twcc_pending.last()?.0;
            let span = (last_ext - base_ext) as usize + 1;
            // A pathological gap means we lost track; start over.
            if span > 0x7FFF {
                s.twcc_pending.clear();
                return None;
            }
            let mut arrivals: Vec<Option<i64>> = vec![None; span];
            for (seq, at) in s.twcc_pending.drain(..) {
                arrivals[(seq - base_ext) as usize] = Some(at);
            }

            s.twcc_feedback_count = s.twcc_feedback_count.wrapping_add(1);
            let fb = TwccFeedback::from_arrivals(
                s.audio_ssrc,
                s.video_ssrc_peer[0].or(s.audio_ssrc_peer).unwrap_or(0),
                base_ext as u16,
                s.twcc_feedback_count,
                &arrivals,
            );
            let mut buf = Vec::new();
            fb.encode_into(&mut buf).ok()?;
            Some(buf)
        })
    }

    /// Release everything the media path allocated. Phase two of teardown.
    pub fn free_resources(&self) {
        *self.agent.lock().unwrap() = None;
        *self.dtls_tx.lock().unwrap() = None;
        let mut state = self.state.lock().unwrap();
        state.srtp_in = None;
        state.srtp_out = None;
        state.audio_retransmit.clear();
        state.video_retransmit.clear();
        state.audio_seq_window.clear();
        for w in &mut state.video_seq_windows {
            w.clear();
        }
    }
}

/// Microseconds on a monotonic-ish scale for jitter/TWCC math.
fn monotonic_us(now: Instant) -> i64 {
    use std::sync::OnceLock;
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = *EPOCH.get_or_init(|| now);
    now.duration_since(epoch).as_micros() as i64
}
