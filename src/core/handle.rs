use crate::config::GatewayConfig;
use crate::core::component::{Component, ICE_FAILED_TIMEOUT};
use crate::core::events::{self, ClientEvent};
use crate::core::flags::{self, WebRtcFlags};
use crate::core::stream::Stream;
use crate::datachannel::{DataChannelEvent, DataChannelSession};
use crate::dtls::{
    DtlsError, DtlsIdentity, DtlsRole, PacketChannel, run_dtls_handshake,
};
use crate::ice::{
    IceAgent, IceConfig, IceState, PacketClass, classify,
    agent::TurnConfig,
    trickle::{ParsedTrickle, TrickleCandidate, parse_trickle},
};
use crate::log::log_sink::LogSink;
use crate::pcap::{PcapDirection, PcapSink};
use crate::plugin::{Jsep, JsepType, Plugin, PluginSession};
use crate::rtcp::RtcpPacket;
use crate::sdp::{
    SessionDescription, TransportParams, extract_webrtc_info, webrtc_info::apply_transport,
};
use crate::{sink_debug, sink_error, sink_info, sink_warn};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, SyncSender, TrySendError, channel, sync_channel};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Depth of the per-handle outbound packet queue. When producers outrun the
/// send worker the queue drops (with a counter) rather than stalling them.
const SEND_QUEUE_DEPTH: usize = 1024;
/// Transient socket errors are retried at most this many times per packet.
const SEND_RETRIES: u32 = 3;
/// Overall time allowed for the DTLS handshake.
const DTLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
/// Grace between webrtc hangup (phase one) and free (phase two).
pub const FREE_GRACE: Duration = Duration::from_secs(2);

/// A packet queued towards the send worker.
pub enum OutboundPacket {
    Rtp { video: bool, data: Vec<u8> },
    Rtcp { data: Vec<u8> },
    /// Already protected (retransmissions); sent as-is.
    PreparedRtp(Vec<u8>),
    Data(Vec<u8>),
    Quit,
}

/// One PeerConnection attempt on behalf of a session.
///
/// The handle owns the stream/component pair, the ICE loop thread, the DTLS
/// thread and the send worker. Teardown is two-phased: `hangup` stops the
/// media path and notifies everyone, the watchdog calls `webrtc_free` a
/// grace period later so in-flight callbacks drain first.
pub struct Handle {
    pub id: u64,
    pub session_id: u64,
    pub opaque_id: Option<String>,
    pub created: Instant,
    pub flags: WebRtcFlags,

    logger: Arc<dyn LogSink>,
    config: Arc<GatewayConfig>,
    identity: Arc<DtlsIdentity>,

    plugin: Mutex<Option<Arc<dyn Plugin>>>,
    plugin_session: Mutex<Option<Arc<PluginSession>>>,

    pub local_sdp: Mutex<Option<String>>,
    pub remote_sdp: Mutex<Option<String>>,
    hangup_reason: Mutex<Option<String>>,

    pending_trickles: Mutex<Vec<TrickleCandidate>>,

    pub stream: Arc<Stream>,
    pub component: Arc<Component>,

    queue_tx: Mutex<Option<SyncSender<OutboundPacket>>>,
    data_tx: Mutex<Option<Sender<Vec<u8>>>>,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
    stop: Arc<AtomicBool>,
    dtls_started: AtomicBool,

    event_tx: Sender<ClientEvent>,
    pcap: Mutex<Option<Arc<PcapSink>>>,
    /// Dropped-packet counter for queue back-pressure.
    pub queue_drops: Mutex<u64>,
    /// When phase two (free) is due; consumed by the watchdog.
    pub free_at: Mutex<Option<Instant>>,
}

impl Handle {
    pub fn new(
        id: u64,
        session_id: u64,
        opaque_id: Option<String>,
        logger: Arc<dyn LogSink>,
        config: Arc<GatewayConfig>,
        identity: Arc<DtlsIdentity>,
        event_tx: Sender<ClientEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            session_id,
            opaque_id,
            created: Instant::now(),
            flags: WebRtcFlags::new(),
            component: Arc::new(Component::new(id, logger.clone(), config.nack_queue)),
            stream: Arc::new(Stream::new(id)),
            logger,
            config,
            identity,
            plugin: Mutex::new(None),
            plugin_session: Mutex::new(None),
            local_sdp: Mutex::new(None),
            remote_sdp: Mutex::new(None),
            hangup_reason: Mutex::new(None),
            pending_trickles: Mutex::new(Vec::new()),
            queue_tx: Mutex::new(None),
            data_tx: Mutex::new(None),
            threads: Mutex::new(Vec::new()),
            stop: Arc::new(AtomicBool::new(false)),
            dtls_started: AtomicBool::new(false),
            event_tx,
            pcap: Mutex::new(None),
            queue_drops: Mutex::new(0),
            free_at: Mutex::new(None),
        })
    }

    // ------------------------------------------------------------------
    // plugin binding
    // ------------------------------------------------------------------

    /// Bind this handle to a plugin; allowed exactly once for its lifetime.
    pub fn attach_plugin(self: &Arc<Self>, plugin: Arc<dyn Plugin>) -> Result<(), i32> {
        let mut slot = self.plugin.lock().unwrap();
        if slot.is_some() {
            return Err(crate::core::api_error::ERROR_PLUGIN_ATTACH);
        }
        let session = Arc::new(PluginSession::new(self.id));
        plugin.create_session(&session)?;
        *slot = Some(plugin);
        *self.plugin_session.lock().unwrap() = Some(session);
        Ok(())
    }

    pub fn plugin(&self) -> Option<Arc<dyn Plugin>> {
        self.plugin.lock().unwrap().clone()
    }

    pub fn plugin_session(&self) -> Option<Arc<PluginSession>> {
        self.plugin_session.lock().unwrap().clone()
    }

    pub fn hangup_reason(&self) -> Option<String> {
        self.hangup_reason.lock().unwrap().clone()
    }

    /// Enable packet capture to a text2pcap file.
    pub fn set_pcap(&self, sink: Option<Arc<PcapSink>>) {
        *self.pcap.lock().unwrap() = sink;
    }

    // ------------------------------------------------------------------
    // SDP processing
    // ------------------------------------------------------------------

    /// Process a remote JSEP (the client's offer or answer): extract the
    /// transport facts, create the agent when needed, drain buffered
    /// trickles, start the media machinery.
    pub fn process_remote_jsep(self: &Arc<Self>, jsep: &Jsep) -> Result<(), i32> {
        if self.flags.is_set(flags::CLEANING) {
            return Err(crate::core::api_error::ERROR_HANDLE_NOT_FOUND);
        }
        let sdp = SessionDescription::parse(&jsep.sdp)
            .map_err(|_| crate::core::api_error::ERROR_JSEP_INVALID_SDP)?;
        let info = extract_webrtc_info(&sdp);

        let offer = jsep.kind == JsepType::Offer;
        if offer {
            self.flags.set(flags::PROCESSING_OFFER | flags::GOT_OFFER);
        } else {
            if !self.flags.is_set(flags::GOT_OFFER) {
                return Err(crate::core::api_error::ERROR_UNEXPECTED_ANSWER);
            }
            self.flags.set(flags::GOT_ANSWER);
        }
        if info.audio.is_some() {
            self.flags.set(flags::HAS_AUDIO);
        }
        if info.video.is_some() {
            self.flags.set(flags::HAS_VIDEO);
        }
        if info.data_channels {
            self.flags.set(flags::DATA_CHANNELS);
        }
        if info.trickle {
            self.flags.set(flags::TRICKLE);
        }
        if !info.rtx_payload_types.is_empty() && self.config.rfc4588 {
            self.flags.set(flags::RFC4588_RTX);
        }

        self.stream.with_state(|s| s.apply_remote_info(&info));
        *self.remote_sdp.lock().unwrap() = Some(jsep.sdp.clone());

        // Answerer mode: the agent is created after the remote offer was
        // parsed; in offerer mode it already exists from our local offer.
        if !self.flags.is_set(flags::HAS_AGENT) {
            self.setup_agent(!offer).map_err(|e| {
                sink_error!(&self.logger, "[CORE][{}] ICE setup failed: {e}", self.id);
                crate::core::api_error::ERROR_UNKNOWN
            })?;
        }

        let agent = self.agent();
        if let Some(agent) = &agent {
            if let (Some(ufrag), Some(pwd)) = (&info.ufrag, &info.pwd) {
                agent.set_remote_credentials(ufrag, pwd);
            }
            for cand in &info.candidates {
                agent.add_remote_candidate(cand.clone());
            }
        }
        if info.end_of_candidates {
            self.flags.set(flags::ALL_TRICKLES);
        }

        self.flags.clear(flags::PROCESSING_OFFER);
        self.drain_trickles();
        self.start_media_threads();
        self.flags.set(flags::START);
        Ok(())
    }

    /// Process a plugin-provided JSEP (our offer or answer): create the
    /// agent when we are the offerer, enrich the SDP with our transport
    /// attributes, keep it as the local SDP.
    pub fn process_local_jsep(self: &Arc<Self>, jsep: &Jsep) -> Result<Jsep, i32> {
        if self.flags.is_set(flags::CLEANING) {
            return Err(crate::core::api_error::ERROR_HANDLE_NOT_FOUND);
        }
        if jsep.restart {
            self.ice_restart();
        }
        let mut sdp = SessionDescription::parse(&jsep.sdp)
            .map_err(|_| crate::core::api_error::ERROR_JSEP_INVALID_SDP)?;

        let offer = jsep.kind == JsepType::Offer;
        if offer && !self.flags.is_set(flags::HAS_AGENT) {
            // Offerer mode: the plugin speaks first, we gather before the
            // SDP leaves the building.
            self.setup_agent(true).map_err(|e| {
                sink_error!(&self.logger, "[CORE][{}] ICE setup failed: {e}", self.id);
                crate::core::api_error::ERROR_UNKNOWN
            })?;
        }

        let agent = self
            .agent()
            .ok_or(crate::core::api_error::ERROR_UNKNOWN)?;
        let (ufrag, pwd) = agent.local_credentials();
        let fingerprint = self
            .identity
            .fingerprint_sha256()
            .map_err(|_| crate::core::api_error::ERROR_UNKNOWN)?;
        let setup = if offer {
            "actpass".to_string()
        } else {
            self.stream
                .with_state(|s| s.dtls_role.setup_attribute())
                .to_string()
        };

        let params = TransportParams {
            ufrag,
            pwd,
            fingerprint,
            setup,
            candidates: agent.local_candidates(),
            end_of_candidates: !self.config.full_trickle,
        };
        apply_transport(&mut sdp, &params);

        let enriched = sdp.to_sdp_string();
        *self.local_sdp.lock().unwrap() = Some(enriched.clone());

        let mut out = jsep.clone();
        out.sdp = enriched;
        Ok(out)
    }

    fn agent(&self) -> Option<Arc<IceAgent>> {
        self.component.agent.lock().unwrap().clone()
    }

    fn setup_agent(&self, controlling: bool) -> Result<(), crate::ice::IceError> {
        let cfg = &self.config;
        let stun_server = cfg.stun_server.as_ref().and_then(|host| {
            format!("{host}:{}", cfg.stun_port)
                .parse::<SocketAddr>()
                .ok()
        });
        let turn = cfg.turn_server.as_ref().map(|server| TurnConfig {
            server: server.clone(),
            port: cfg.turn_port,
            transport: cfg.turn_type,
            user: cfg.turn_user.clone(),
            pwd: cfg.turn_pwd.clone(),
            rest_api: cfg.turn_rest_api.clone(),
        });
        let ice_config = IceConfig {
            ice_lite: cfg.ice_lite,
            ice_tcp: cfg.ice_tcp,
            full_trickle: cfg.full_trickle,
            ipv6: cfg.ipv6,
            stun_server,
            turn,
            port_min: cfg.rtp_port_min,
            port_max: cfg.rtp_port_max,
            enforce_interfaces: cfg.enforce_interfaces.clone(),
            ignore_interfaces: cfg.ignore_interfaces.clone(),
            nat_1_1: cfg.nat_1_1_mapping,
        };
        let agent = Arc::new(IceAgent::new(self.logger.clone(), ice_config, controlling)?);
        *self.component.agent.lock().unwrap() = Some(agent);
        self.flags.set(flags::HAS_AGENT);
        Ok(())
    }

    // ------------------------------------------------------------------
    // trickle candidates
    // ------------------------------------------------------------------

    /// Ingest one trickle request. Candidates arriving while the offer is
    /// still being processed (or before the agent exists) are buffered and
    /// drained in receipt order later.
    pub fn trickle(&self, transaction: &str, candidate: Value) -> Result<(), i32> {
        if self.flags.is_set(flags::CLEANING) {
            return Err(crate::core::api_error::ERROR_HANDLE_NOT_FOUND);
        }
        self.flags.set(flags::TRICKLE);
        if self.flags.is_set(flags::PROCESSING_OFFER) || !self.flags.is_set(flags::HAS_AGENT) {
            self.pending_trickles
                .lock()
                .unwrap()
                .push(TrickleCandidate::new(transaction, candidate));
            return Ok(());
        }
        self.apply_trickle(&candidate)
    }

    fn apply_trickle(&self, candidate: &Value) -> Result<(), i32> {
        match parse_trickle(candidate) {
            Ok(ParsedTrickle::Candidate(cand)) => {
                if let Some(agent) = self.agent() {
                    agent.add_remote_candidate(cand);
                }
                Ok(())
            }
            Ok(ParsedTrickle::EndOfCandidates) => {
                self.flags.set(flags::ALL_TRICKLES);
                Ok(())
            }
            Err(_) => Err(crate::core::api_error::ERROR_TRICKLE_INVALID_CANDIDATE),
        }
    }

    /// Apply the buffered trickles, in receipt order.
    fn drain_trickles(&self) {
        let pending: Vec<TrickleCandidate> =
            self.pending_trickles.lock().unwrap().drain(..).collect();
        if pending.is_empty() {
            return;
        }
        sink_debug!(
            &self.logger,
            "[CORE][{}] draining {} buffered trickle candidate(s)",
            self.id,
            pending.len()
        );
        for t in pending {
            let _ = self.apply_trickle(&t.candidate);
        }
        self.flags.set(flags::TRICKLE_SYNCED);
    }

    pub fn pending_trickle_count(&self) -> usize {
        self.pending_trickles.lock().unwrap().len()
    }

    /// ICE restart, requested by the plugin through a jsep restart flag.
    /// Rewrite contexts survive so media continuity is maintained.
    pub fn ice_restart(&self) {
        if !self.flags.is_set(flags::HAS_AGENT) {
            return;
        }
        sink_info!(&self.logger, "[CORE][{}] ICE restart", self.id);
        self.flags.apply_ice_restart();
        if let Some(agent) = self.agent() {
            agent.restart();
        }
    }

    // ------------------------------------------------------------------
    // outbound media entry points (plugin side)
    // ------------------------------------------------------------------

    /// Enqueue a packet for the send worker, dropping under back-pressure.
    pub fn queue_packet(&self, packet: OutboundPacket) {
        if self.flags.is_set(flags::CLEANING) || self.stop.load(Ordering::SeqCst) {
            return;
        }
        let guard = self.queue_tx.lock().unwrap();
        let Some(tx) = guard.as_ref() else {
            return;
        };
        match tx.try_send(packet) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                *self.queue_drops.lock().unwrap() += 1;
            }
        }
    }

    // ------------------------------------------------------------------
    // worker threads
    // ------------------------------------------------------------------

    fn start_media_threads(self: &Arc<Self>) {
        let mut threads = self.threads.lock().unwrap();
        if !threads.is_empty() {
            return; // renegotiation: the machinery is already running
        }
        let (tx, rx) = sync_channel(SEND_QUEUE_DEPTH);
        *self.queue_tx.lock().unwrap() = Some(tx);

        let handle = Arc::clone(self);
        threads.push(
            thread::Builder::new()
                .name(format!("hndl-{}-send", self.id))
                .spawn(move || handle.send_worker_loop(rx))
                .expect("spawning the send worker"),
        );

        let handle = Arc::clone(self);
        threads.push(
            thread::Builder::new()
                .name(format!("hndl-{}-ice", self.id))
                .spawn(move || handle.ice_loop())
                .expect("spawning the ICE loop"),
        );
    }

    /// The only writer of the socket for this handle: drains the packet
    /// queue, applies rewrite + SRTP, writes via the agent.
    fn send_worker_loop(self: Arc<Self>, rx: Receiver<OutboundPacket>) {
        sink_debug!(&self.logger, "[CORE][{}] send worker up", self.id);
        while !self.stop.load(Ordering::SeqCst) {
            let packet = match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(p) => p,
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            };
            let now = Instant::now();
            match packet {
                OutboundPacket::Rtp { video, data } => {
                    if let Some(pcap) = self.pcap.lock().unwrap().clone() {
                        pcap.dump(PcapDirection::Outgoing, &data, 0);
                    }
                    if let Some(wire) = self.component.send_rtp(data, video, &self.stream, now) {
                        self.send_on_wire(&wire);
                    }
                }
                OutboundPacket::Rtcp { data } => {
                    if let Some(wire) = self.component.send_rtcp(data) {
                        self.send_on_wire(&wire);
                    }
                }
                OutboundPacket::PreparedRtp(wire) => {
                    self.send_on_wire(&wire);
                }
                OutboundPacket::Data(data) => {
                    let guard = self.data_tx.lock().unwrap();
                    if let Some(tx) = guard.as_ref() {
                        let _ = tx.send(data);
                    }
                }
                OutboundPacket::Quit => break,
            }
        }
        sink_debug!(&self.logger, "[CORE][{}] send worker done", self.id);
    }

    fn send_on_wire(&self, wire: &[u8]) {
        let Some(agent) = self.agent() else { return };
        for attempt in 0..SEND_RETRIES {
            match agent.send(wire) {
                Ok(_) => return,
                Err(crate::ice::IceError::Io(e))
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::Interrupted =>
                {
                    if attempt + 1 == SEND_RETRIES {
                        *self.queue_drops.lock().unwrap() += 1;
                    }
                    thread::yield_now();
                }
                Err(_) => {
                    *self.queue_drops.lock().unwrap() += 1;
                    return;
                }
            }
        }
    }

    /// The per-handle event loop: socket reads, demultiplexing, timers.
    fn ice_loop(self: Arc<Self>) {
        let Some(agent) = self.agent() else { return };
        let socket = agent.socket();
        let _ = socket.set_nonblocking(false);
        let _ = socket.set_read_timeout(Some(Duration::from_millis(20)));

        let mut buf = vec![0u8; 1500];
        let mut last_checks = Instant::now();
        let mut last_rtcp_tick = Instant::now();

        sink_debug!(&self.logger, "[CORE][{}] ICE loop up", self.id);
        while !self.stop.load(Ordering::SeqCst) {
            match socket.recv_from(&mut buf) {
                Ok((n, from)) => self.dispatch_inbound(&agent, &buf[..n], from),
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    sink_warn!(&self.logger, "[CORE][{}] socket error: {e}", self.id);
                    break;
                }
            }

            let now = Instant::now();

            // Connectivity checks while connecting (full ICE only).
            if agent.state() == IceState::Connecting
                && now.duration_since(last_checks) >= Duration::from_millis(200)
            {
                last_checks = now;
                agent.send_checks();
            }

            // DTLS starts once a pair is selected.
            if agent.selected_peer().is_some()
                && !self.dtls_started.swap(true, Ordering::SeqCst)
            {
                self.spawn_dtls_thread();
            }

            // NACK generation + inbound slow-link detection.
            for (video, nack, count) in self.component.nacks_due(&self.stream, now) {
                let mut out = Vec::new();
                use crate::rtcp::packet_type::RtcpPacketType;
                if nack.encode_into(&mut out).is_ok() {
                    self.queue_packet(OutboundPacket::Rtcp { data: out });
                }
                let fire = self.component.with_state(|c| {
                    c.slow_link_in[usize::from(video)].record_nacks(count, now)
                });
                if fire {
                    self.fire_slow_link(false, video, count);
                }
            }

            // Periodic RR/SR.
            if now.duration_since(last_rtcp_tick) >= Duration::from_secs(1) {
                last_rtcp_tick = now;
                if let Some(compound) = self.component.build_rtcp_report(&self.stream) {
                    self.queue_packet(OutboundPacket::Rtcp { data: compound });
                }
                self.check_ice_failed(&agent, now);
                self.check_no_media(now);
            }

            // TWCC feedback (its own cadence, checked every iteration).
            if let Some(feedback) = self.component.build_twcc_feedback(&self.stream, now) {
                self.queue_packet(OutboundPacket::Rtcp { data: feedback });
            }
        }
        sink_debug!(&self.logger, "[CORE][{}] ICE loop done", self.id);
    }

    fn dispatch_inbound(&self, agent: &Arc<IceAgent>, buf: &[u8], from: SocketAddr) {
        let Some(&first) = buf.first() else { return };
        match classify(first) {
            PacketClass::Stun => {
                if let Some(response) = agent.handle_stun(buf, from) {
                    let _ = agent.socket().send_to(&response, from);
                }
            }
            PacketClass::Dtls => {
                let guard = self.component.dtls_tx.lock().unwrap();
                if let Some(tx) = guard.as_ref() {
                    let _ = tx.send(buf.to_vec());
                }
            }
            PacketClass::Rtp => {
                if is_rtcp(buf) {
                    self.handle_inbound_rtcp(buf.to_vec());
                } else {
                    self.handle_inbound_rtp(buf.to_vec());
                }
            }
            PacketClass::ZrtpOrTurn | PacketClass::TurnChannel | PacketClass::Unknown => {
                sink_debug!(
                    &self.logger,
                    "[CORE][{}] ignoring unexpected datagram (first byte {first})",
                    self.id
                );
            }
        }
    }

    fn handle_inbound_rtp(&self, packet: Vec<u8>) {
        let now = Instant::now();
        let Some((video, plain)) = self.component.receive_rtp(packet, &self.stream, now) else {
            return;
        };
        if let Some(pcap) = self.pcap.lock().unwrap().clone() {
            pcap.dump(PcapDirection::Incoming, &plain, 0);
        }
        if let (Some(plugin), Some(session)) = (self.plugin(), self.plugin_session()) {
            if session.is_alive() {
                plugin.incoming_rtp(&session, video, &plain);
            }
        }
    }

    fn handle_inbound_rtcp(&self, packet: Vec<u8>) {
        let now = Instant::now();
        let Some(packets) = self.component.receive_rtcp(packet, now) else {
            return;
        };
        let arrival_compact = crate::rtp::time::now_ntp_compact();
        let ntp_now = crate::rtp::time::ntp_now();
        let mut forward: Vec<(bool, RtcpPacket)> = Vec::new();

        for pkt in packets {
            match &pkt {
                RtcpPacket::Sr(sr) => {
                    self.stream.with_state(|s| {
                        if s.audio_ssrc_peer == Some(sr.ssrc) {
                            s.audio_rtcp_ctx.on_sender_report(&sr.info, ntp_now);
                        }
                        for layer in 0..3 {
                            if s.video_ssrc_peer[layer] == Some(sr.ssrc) {
                                s.video_rtcp_ctx[layer].on_sender_report(&sr.info, ntp_now);
                            }
                        }
                        for rb in &sr.reports {
                            if rb.ssrc == s.audio_ssrc {
                                s.audio_rtcp_ctx.on_report_block(rb, arrival_compact);
                            } else if rb.ssrc == s.video_ssrc {
                                s.video_rtcp_ctx[0].on_report_block(rb, arrival_compact);
                            }
                        }
                    });
                }
                RtcpPacket::Rr(rr) => {
                    self.stream.with_state(|s| {
                        for rb in &rr.reports {
                            if rb.ssrc == s.audio_ssrc {
                                s.audio_rtcp_ctx.on_report_block(rb, arrival_compact);
                            } else if rb.ssrc == s.video_ssrc {
                                s.video_rtcp_ctx[0].on_report_block(rb, arrival_compact);
                            }
                        }
                    });
                }
                RtcpPacket::Sdes(_) => {}
                RtcpPacket::Bye(_) => {
                    sink_debug!(&self.logger, "[CORE][{}] peer sent RTCP BYE", self.id);
                }
                RtcpPacket::Nack(nack) => {
                    let video = self
                        .stream
                        .with_state(|s| nack.media_ssrc == s.video_ssrc);
                    let seqs = nack.seqs();
                    let rfc4588 = if self.flags.is_set(flags::RFC4588_RTX) && video {
                        self.stream.with_state(|s| {
                            s.rtx_payload_types
                                .keys()
                                .next()
                                .map(|pt| (*pt, s.video_ssrc_rtx))
                        })
                    } else {
                        None
                    };
                    let retransmissions =
                        self.component
                            .handle_nack(&seqs, video, rfc4588, now);
                    for wire in retransmissions {
                        self.queue_packet(OutboundPacket::PreparedRtp(wire));
                    }
                    let fire = self.component.with_state(|c| {
                        c.slow_link_out[usize::from(video)]
                            .record_nacks(seqs.len() as u32, now)
                    });
                    if fire {
                        self.fire_slow_link(true, video, seqs.len() as u32);
                    }
                }
                RtcpPacket::Pli(_) | RtcpPacket::Fir(_) => {
                    // Keyframe requests go to the plugin, which owns the
                    // source that can produce one.
                    forward.push((true, pkt.clone()));
                }
                RtcpPacket::Remb(remb) => {
                    sink_debug!(
                        &self.logger,
                        "[CORE][{}] REMB: peer estimates {} bps",
                        self.id,
                        remb.bitrate
                    );
                    forward.push((true, pkt.clone()));
                }
                RtcpPacket::Twcc(_) => {
                    // Feedback about our sending: the plugin's business.
                    forward.push((true, pkt.clone()));
                }
                RtcpPacket::Other(..) => {}
            }
        }

        if !forward.is_empty()
            && let (Some(plugin), Some(session)) = (self.plugin(), self.plugin_session())
            && session.is_alive()
        {
            for (video, pkt) in forward {
                if let Ok(bytes) = RtcpPacket::encode_compound(&[pkt]) {
                    plugin.incoming_rtcp(&session, video, &bytes);
                }
            }
        }
    }

    fn spawn_dtls_thread(self: &Arc<Self>) {
        let (in_tx, in_rx) = channel::<Vec<u8>>();
        *self.component.dtls_tx.lock().unwrap() = Some(in_tx);

        // Outbound DTLS datagrams go to the selected pair through a small
        // forwarder, so the handshake thread never touches the socket.
        let (out_tx, out_rx) = channel::<Vec<u8>>();
        if let Some(agent) = self.agent() {
            let stop = Arc::clone(&self.stop);
            let forwarder_agent = Arc::clone(&agent);
            let _ = thread::Builder::new()
                .name(format!("hndl-{}-dtls-out", self.id))
                .spawn(move || {
                    while !stop.load(Ordering::SeqCst) {
                        match out_rx.recv_timeout(Duration::from_millis(100)) {
                            Ok(datagram) => {
                                let _ = forwarder_agent.send(&datagram);
                            }
                            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
                            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
                        }
                    }
                });
        }

        let handle = Arc::clone(self);
        let packet_channel = PacketChannel::new(in_rx, out_tx, Duration::from_millis(50));
        let mut threads = self.threads.lock().unwrap();
        threads.push(
            thread::Builder::new()
                .name(format!("hndl-{}-dtls", self.id))
                .spawn(move || handle.dtls_loop(packet_channel))
                .expect("spawning the DTLS thread"),
        );
    }

    /// Drive the DTLS handshake, install SRTP, then babysit the connection
    /// (DataChannel traffic in both directions, alert detection).
    fn dtls_loop(self: Arc<Self>, packet_channel: PacketChannel) {
        let (role, expected) = self
            .stream
            .with_state(|s| (s.dtls_role, s.remote_fingerprint.clone()));

        let conn = run_dtls_handshake(
            packet_channel,
            role,
            &self.identity,
            expected,
            self.logger.clone(),
            DTLS_HANDSHAKE_TIMEOUT,
        );
        let mut conn = match conn {
            Ok(conn) => conn,
            Err(e) => {
                sink_error!(&self.logger, "[CORE][{}] DTLS failed: {e}", self.id);
                self.hangup("dtls-alert");
                return;
            }
        };

        if let Err(e) = self.component.install_srtp(&conn.srtp) {
            sink_error!(&self.logger, "[CORE][{}] SRTP init failed: {e}", self.id);
            self.hangup("srtp-error");
            return;
        }

        self.flags.set(flags::READY);
        if let Some(agent) = self.agent() {
            agent.set_state(IceState::Ready);
        }
        sink_info!(&self.logger, "[CORE][{}] PeerConnection is up", self.id);
        let _ = self
            .event_tx
            .send(events::webrtc_up(self.session_id, self.id));
        if let (Some(plugin), Some(session)) = (self.plugin(), self.plugin_session())
            && session.is_alive()
        {
            plugin.setup_media(&session);
        }

        // DataChannels, when negotiated, ride this thread.
        let mut dcs = if self.flags.is_set(flags::DATA_CHANNELS) {
            let (data_tx, data_rx) = channel::<Vec<u8>>();
            *self.data_tx.lock().unwrap() = Some(data_tx);
            Some((
                DataChannelSession::new(self.logger.clone(), role == DtlsRole::Client),
                data_rx,
            ))
        } else {
            None
        };

        let mut buf = vec![0u8; 65_535];
        let mut dc_events = Vec::new();
        while !self.stop.load(Ordering::SeqCst) {
            match conn.read_app_data(&mut buf) {
                Ok(n) => {
                    if let Some((dcs, _)) = dcs.as_mut() {
                        dcs.handle_inbound(&buf[..n], &mut dc_events);
                    }
                }
                Err(DtlsError::Io(e)) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if let Some((dcs, _)) = dcs.as_mut() {
                        dcs.handle_timeout(&mut dc_events);
                    }
                }
                Err(e) => {
                    sink_warn!(&self.logger, "[CORE][{}] DTLS torn down: {e}", self.id);
                    self.hangup("dtls-alert");
                    break;
                }
            }

            if let Some((dcs, data_rx)) = dcs.as_mut() {
                // Outbound messages from the plugin.
                while let Ok(message) = data_rx.try_recv() {
                    dcs.send(&message, &mut dc_events);
                }
                for event in dc_events.drain(..) {
                    match event {
                        DataChannelEvent::Connected => {
                            sink_info!(&self.logger, "[CORE][{}] DataChannel open", self.id);
                        }
                        DataChannelEvent::Message(data) => {
                            if let (Some(plugin), Some(session)) =
                                (self.plugin(), self.plugin_session())
                                && session.is_alive()
                            {
                                plugin.incoming_data(&session, &data);
                            }
                        }
                        DataChannelEvent::Transmit(datagrams) => {
                            for datagram in datagrams {
                                let _ = conn.write_app_data(&datagram);
                            }
                        }
                        DataChannelEvent::Closed => {
                            sink_warn!(&self.logger, "[CORE][{}] DataChannel closed", self.id);
                        }
                    }
                }
            }
        }
        conn.shutdown();
    }

    fn fire_slow_link(&self, uplink: bool, video: bool, nacks: u32) {
        sink_info!(
            &self.logger,
            "[CORE][{}] slow link ({}, {})",
            self.id,
            if uplink { "uplink" } else { "downlink" },
            if video { "video" } else { "audio" }
        );
        if let (Some(plugin), Some(session)) = (self.plugin(), self.plugin_session())
            && session.is_alive()
        {
            plugin.slow_link(&session, uplink, video);
        }
        let _ = self.event_tx.send(events::slow_link_event(
            self.session_id,
            self.id,
            uplink,
            video,
            nacks,
        ));
    }

    fn check_ice_failed(&self, agent: &Arc<IceAgent>, now: Instant) {
        if agent.state() != IceState::Connecting || agent.remote_candidate_count() == 0 {
            self.component.with_state(|c| c.ice_failed_since = None);
            return;
        }
        // Connecting with remote candidates and the clock running: if this
        // lasts past the grace period, ICE failed.
        let expired = self.component.with_state(|c| {
            let since = c.ice_failed_since.get_or_insert(now);
            now.duration_since(*since) >= ICE_FAILED_TIMEOUT
        });
        if expired && self.flags.is_set(flags::ALL_TRICKLES) {
            agent.set_state(IceState::Failed);
            self.hangup("ice-failed");
        }
    }

    fn check_no_media(&self, now: Instant) {
        if self.config.no_media_timer == 0 || !self.flags.is_set(flags::READY) {
            return;
        }
        let timer = Duration::from_secs(self.config.no_media_timer);
        let expired = self.component.with_state(|c| {
            match c.last_media {
                Some(at) if now.duration_since(at) >= timer && !c.no_media_notified => {
                    c.no_media_notified = true;
                    true
                }
                _ => false,
            }
        });
        if expired {
            sink_info!(
                &self.logger,
                "[CORE][{}] no media for {}s",
                self.id,
                self.config.no_media_timer
            );
            let _ = self.event_tx.send(events::media_event(
                self.session_id,
                self.id,
                false,
                false,
            ));
            if self.config.no_media_hangup {
                self.hangup("no-media");
            }
        }
    }

    // ------------------------------------------------------------------
    // teardown
    // ------------------------------------------------------------------

    /// Phase one: stop the media path, tell the plugin and the client.
    /// Safe to call repeatedly; only the first call does anything.
    pub fn hangup(&self, reason: &str) {
        if self.flags.is_set(flags::CLEANING) {
            return;
        }
        self.flags.set(flags::STOP | flags::ALERT | flags::CLEANING);
        *self.hangup_reason.lock().unwrap() = Some(reason.to_string());
        sink_info!(&self.logger, "[CORE][{}] hangup: {reason}", self.id);

        // Stop the workers; queue producers start dropping immediately.
        self.stop.store(true, Ordering::SeqCst);
        if let Some(tx) = self.queue_tx.lock().unwrap().as_ref() {
            let _ = tx.try_send(OutboundPacket::Quit);
        }

        // The plugin sees hangup_media exactly once, on a still-valid
        // session mapping.
        if let (Some(plugin), Some(session)) = (self.plugin(), self.plugin_session()) {
            plugin.hangup_media(&session);
        }

        let _ = self
            .event_tx
            .send(events::hangup_event(self.session_id, self.id, reason));

        // Phase two happens from the watchdog, once callbacks drained.
        *self.free_at.lock().unwrap() = Some(Instant::now() + FREE_GRACE);
    }

    /// Phase two: release transport resources. Idempotent.
    pub fn webrtc_free(&self) {
        self.stop.store(true, Ordering::SeqCst);
        let mut threads = self.threads.lock().unwrap();
        for t in threads.drain(..) {
            let _ = t.join();
        }
        drop(threads);
        *self.queue_tx.lock().unwrap() = None;
        *self.data_tx.lock().unwrap() = None;
        self.component.free_resources();
        *self.free_at.lock().unwrap() = None;
    }

    /// Detach from the plugin (handle destruction). Runs both phases if the
    /// hangup did not happen yet.
    pub fn detach(&self) {
        if !self.flags.is_set(flags::CLEANING) {
            self.hangup("detached");
        }
        if let Some(session) = self.plugin_session() {
            session.stop();
            if let Some(plugin) = self.plugin() {
                let _ = plugin.destroy_session(&session);
            }
        }
        *self.plugin_session.lock().unwrap() = None;
        *self.plugin.lock().unwrap() = None;
    }
}

/// RTCP versus RTP on the muxed socket: the second byte of RTCP packets is
/// the packet type, 200..=206.
fn is_rtcp(buf: &[u8]) -> bool {
    buf.len() >= 2 && (200..=206).contains(&buf[1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::NoopLogSink;
    use serde_json::json;
    use std::sync::mpsc::channel;

    fn test_handle() -> (Arc<Handle>, Receiver<ClientEvent>) {
        let (tx, rx) = channel();
        let config = Arc::new(GatewayConfig {
            enforce_interfaces: vec!["127.0.0.1".into()],
            rtp_port_min: 42_000,
            rtp_port_max: 42_999,
            ..Default::default()
        });
        let identity = Arc::new(DtlsIdentity::generate().unwrap());
        let handle = Handle::new(
            1,
            100,
            None,
            Arc::new(NoopLogSink),
            config,
            identity,
            tx,
        );
        (handle, rx)
    }

    fn trickle_json(port: u16) -> Value {
        json!({
            "candidate": format!(
                "candidate:1 1 udp 1677729535 192.0.2.1 {port} typ host"
            ),
            "sdpMLineIndex": 0
        })
    }

    #[test]
    fn trickles_before_offer_are_buffered_then_drained() {
        let (handle, _rx) = test_handle();

        // Three candidates arrive before any offer was processed.
        for port in [4000, 4001, 4002] {
            handle.trickle("t1", trickle_json(port)).unwrap();
        }
        assert_eq!(handle.pending_trickle_count(), 3);
        assert!(!handle.flags.is_set(flags::ALL_TRICKLES));

        let offer = "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\ns=-\r\nt=0 0\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
a=ice-ufrag:F7gI\r\na=ice-pwd:x9cml/YzichV2+XlhiMu8g\r\n\
a=fingerprint:sha-256 AA:BB\r\na=setup:actpass\r\n\
a=rtpmap:111 opus/48000/2\r\na=sendrecv\r\n";
        handle
            .process_remote_jsep(&Jsep::offer(offer))
            .expect("offer processed");

        // All three were applied to the agent, in order.
        assert_eq!(handle.pending_trickle_count(), 0);
        let agent = handle.agent().unwrap();
        assert_eq!(agent.remote_candidate_count(), 3);
        // End-of-candidates has not been seen yet.
        assert!(!handle.flags.is_set(flags::ALL_TRICKLES));

        // Now the sentinel arrives.
        handle.trickle("t2", json!({"completed": true})).unwrap();
        assert!(handle.flags.is_set(flags::ALL_TRICKLES));

        handle.webrtc_free();
    }

    #[test]
    fn bad_trickle_is_rejected_once_agent_exists() {
        let (handle, _rx) = test_handle();
        let offer = "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\ns=-\r\nt=0 0\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=ice-ufrag:x\r\na=ice-pwd:y\r\n\
a=fingerprint:sha-256 AA\r\na=setup:actpass\r\na=rtpmap:111 opus/48000/2\r\n";
        handle.process_remote_jsep(&Jsep::offer(offer)).unwrap();
        let err = handle
            .trickle("t", json!({"candidate": "candidate:garbage"}))
            .unwrap_err();
        assert_eq!(err, crate::core::api_error::ERROR_TRICKLE_INVALID_CANDIDATE);
        handle.webrtc_free();
    }

    #[test]
    fn local_jsep_is_enriched_with_transport_attributes() {
        let (handle, _rx) = test_handle();
        let offer = "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\ns=-\r\nt=0 0\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=rtpmap:111 opus/48000/2\r\na=sendrecv\r\n";
        let enriched = handle.process_local_jsep(&Jsep::offer(offer)).unwrap();

        assert!(enriched.sdp.contains("a=ice-ufrag:"));
        assert!(enriched.sdp.contains("a=fingerprint:sha-256 "));
        assert!(enriched.sdp.contains("a=setup:actpass"));
        assert!(enriched.sdp.contains("a=candidate:"));
        assert!(handle.flags.is_set(flags::HAS_AGENT));
        handle.webrtc_free();
    }

    #[test]
    fn answer_without_offer_is_rejected() {
        let (handle, _rx) = test_handle();
        let err = handle
            .process_remote_jsep(&Jsep::answer("v=0\r\nm=audio 9 X 0\r\n"))
            .unwrap_err();
        assert_eq!(err, crate::core::api_error::ERROR_UNEXPECTED_ANSWER);
    }

    #[test]
    fn hangup_is_one_shot_and_schedules_free() {
        let (handle, rx) = test_handle();
        handle.hangup("dtls-alert");
        assert!(handle.flags.is_set(flags::ALERT));
        assert!(handle.flags.is_set(flags::STOP));
        assert!(handle.free_at.lock().unwrap().is_some());
        assert_eq!(handle.hangup_reason().as_deref(), Some("dtls-alert"));

        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.body["janus"], "hangup");
        assert_eq!(ev.body["reason"], "dtls-alert");

        // Second hangup is a no-op: no second event.
        handle.hangup("again");
        assert!(rx.try_recv().is_err());
        assert_eq!(handle.hangup_reason().as_deref(), Some("dtls-alert"));
    }
}
