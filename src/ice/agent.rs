use crate::ice::{
    candidate::Candidate,
    gathering,
    ice_error::IceError,
    stun::{
        ATTR_ERROR_CODE, BINDING_ERROR, BINDING_REQUEST, BINDING_SUCCESS, StunMessage, is_stun,
    },
};
use crate::log::log_sink::LogSink;
use crate::{sink_debug, sink_info, sink_warn};
use rand::{Rng, RngCore, rngs::OsRng};
use std::{
    net::{IpAddr, SocketAddr, UdpSocket},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU8, Ordering},
    },
};

/// ICE connectivity state of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceState {
    Disconnected,
    Gathering,
    Connecting,
    Connected,
    Ready,
    Failed,
}

impl IceState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => IceState::Gathering,
            2 => IceState::Connecting,
            3 => IceState::Connected,
            4 => IceState::Ready,
            5 => IceState::Failed,
            _ => IceState::Disconnected,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            IceState::Disconnected => "disconnected",
            IceState::Gathering => "gathering",
            IceState::Connecting => "connecting",
            IceState::Connected => "connected",
            IceState::Ready => "ready",
            IceState::Failed => "failed",
        }
    }
}

/// TURN server settings, as resolved from the configuration (static
/// credentials or a TURN REST API descriptor).
#[derive(Debug, Clone)]
pub struct TurnConfig {
    pub server: String,
    pub port: u16,
    pub transport: crate::config::TurnType,
    pub user: Option<String>,
    pub pwd: Option<String>,
    pub rest_api: Option<String>,
}

/// Everything the agent needs from the gateway configuration snapshot.
#[derive(Debug, Clone, Default)]
pub struct IceConfig {
    pub ice_lite: bool,
    pub ice_tcp: bool,
    pub full_trickle: bool,
    pub ipv6: bool,
    pub stun_server: Option<SocketAddr>,
    pub turn: Option<TurnConfig>,
    pub port_min: u16,
    pub port_max: u16,
    pub enforce_interfaces: Vec<String>,
    pub ignore_interfaces: Vec<String>,
    pub nat_1_1: Option<IpAddr>,
}

/// The per-handle ICE agent: owns the component socket, the candidate sets
/// and the connectivity-check state machine.
///
/// The gateway is usually the answerer, and in ice-lite mode it only answers
/// the peer's binding requests; in full mode it also sends its own checks
/// with aggressive nomination when it is the controlling side.
pub struct IceAgent {
    logger: Arc<dyn LogSink>,
    cfg: IceConfig,
    socket: Arc<UdpSocket>,
    controlling: bool,
    tie_breaker: u64,

    local_ufrag: Mutex<String>,
    local_pwd: Mutex<String>,
    remote_credentials: Mutex<Option<(String, String)>>,

    local_candidates: Mutex<Vec<Candidate>>,
    remote_candidates: Mutex<Vec<Candidate>>,
    selected_peer: Mutex<Option<SocketAddr>>,

    state: AtomicU8,
}

impl IceAgent {
    /// Create the agent and gather local candidates.
    pub fn new(
        logger: Arc<dyn LogSink>,
        cfg: IceConfig,
        controlling: bool,
    ) -> Result<Self, IceError> {
        let ip = gathering::discover_local_ip(
            &cfg.enforce_interfaces,
            &cfg.ignore_interfaces,
            cfg.ipv6,
        )?;
        let socket = gathering::bind_in_range(ip, cfg.port_min, cfg.port_max)?;
        socket.set_nonblocking(true)?;

        let agent = Self {
            logger,
            socket: Arc::new(socket),
            controlling,
            tie_breaker: OsRng.next_u64(),
            local_ufrag: Mutex::new(random_ice_string(4)),
            local_pwd: Mutex::new(random_ice_string(22)),
            remote_credentials: Mutex::new(None),
            local_candidates: Mutex::new(Vec::new()),
            remote_candidates: Mutex::new(Vec::new()),
            selected_peer: Mutex::new(None),
            state: AtomicU8::new(IceState::Gathering as u8),
            cfg,
        };

        if agent.cfg.turn.is_some() {
            // TODO: allocate a relay candidate on the configured TURN server
            // (RFC 5766 Allocate + permissions) instead of only advertising
            // host/srflx.
            sink_warn!(
                &agent.logger,
                "[ICE] TURN configured but relay allocation is not performed; relying on host/srflx candidates"
            );
        }

        let cands = gathering::gather(
            &agent.socket,
            agent.cfg.nat_1_1,
            agent.cfg.stun_server,
            1,
        );
        sink_info!(
            &agent.logger,
            "[ICE] gathered {} candidate(s) on {}",
            cands.len(),
            agent.socket.local_addr().map(|a| a.to_string()).unwrap_or_default()
        );
        *agent.local_candidates.lock().unwrap() = cands;
        agent.set_state(IceState::Connecting);
        Ok(agent)
    }

    pub fn socket(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.socket)
    }

    pub fn state(&self) -> IceState {
        IceState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn set_state(&self, state: IceState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn is_lite(&self) -> bool {
        self.cfg.ice_lite
    }

    pub fn local_credentials(&self) -> (String, String) {
        (
            self.local_ufrag.lock().unwrap().clone(),
            self.local_pwd.lock().unwrap().clone(),
        )
    }

    pub fn set_remote_credentials(&self, ufrag: &str, pwd: &str) {
        *self.remote_credentials.lock().unwrap() = Some((ufrag.to_string(), pwd.to_string()));
    }

    pub fn local_candidates(&self) -> Vec<Candidate> {
        self.local_candidates.lock().unwrap().clone()
    }

    pub fn add_remote_candidate(&self, candidate: Candidate) {
        sink_debug!(&self.logger, "[ICE] remote candidate: {candidate}");
        self.remote_candidates.lock().unwrap().push(candidate);
    }

    pub fn remote_candidate_count(&self) -> usize {
        self.remote_candidates.lock().unwrap().len()
    }

    /// The peer address media is flowing with, once a pair was selected.
    pub fn selected_peer(&self) -> Option<SocketAddr> {
        *self.selected_peer.lock().unwrap()
    }

    /// Text form of the selected pair for stats/admin output.
    pub fn selected_pair(&self) -> Option<String> {
        let peer = self.selected_peer()?;
        let local = self.socket.local_addr().ok()?;
        Some(format!("{local} <-> {peer}"))
    }

    /// Handle one inbound STUN datagram; returns the response to send back,
    /// if any.
    pub fn handle_stun(&self, buf: &[u8], from: SocketAddr) -> Option<Vec<u8>> {
        if !is_stun(buf) {
            return None;
        }
        let msg = match StunMessage::decode(buf) {
            Ok(m) => m,
            Err(e) => {
                sink_debug!(&self.logger, "[ICE] dropping bad STUN from {from}: {e}");
                return None;
            }
        };

        match msg.msg_type {
            BINDING_REQUEST => self.handle_binding_request(buf, &msg, from),
            BINDING_SUCCESS => {
                // Answer to one of our own checks: the pair works.
                self.select_peer(from);
                None
            }
            BINDING_ERROR => {
                sink_warn!(&self.logger, "[ICE] binding error from {from}");
                None
            }
            _ => None,
        }
    }

    fn handle_binding_request(
        &self,
        raw: &[u8],
        msg: &StunMessage,
        from: SocketAddr,
    ) -> Option<Vec<u8>> {
        let (local_ufrag, local_pwd) = self.local_credentials();

        // USERNAME must be "ourUfrag:theirUfrag".
        let username_ok = msg
            .username()
            .and_then(|u| u.split(':').next().map(|l| l == local_ufrag))
            .unwrap_or(false);
        if !username_ok || !StunMessage::verify_integrity(raw, local_pwd.as_bytes()) {
            sink_warn!(&self.logger, "[ICE] rejecting binding request from {from}");
            let mut err = StunMessage::new(BINDING_ERROR, msg.transaction_id);
            // 401 Unauthorized
            err.add_attribute(ATTR_ERROR_CODE, vec![0, 0, 4, 1]);
            return Some(err.encode(None));
        }

        // A valid check from the peer: in lite mode (or with USE-CANDIDATE
        // from the controlling peer) that selects the pair.
        if self.cfg.ice_lite || msg.has_use_candidate() || !self.controlling {
            self.select_peer(from);
        }

        let mut resp = StunMessage::new(BINDING_SUCCESS, msg.transaction_id);
        resp.add_xor_mapped_address(from);
        Some(resp.encode(Some(local_pwd.as_bytes())))
    }

    fn select_peer(&self, from: SocketAddr) {
        let mut selected = self.selected_peer.lock().unwrap();
        if selected.is_none() {
            sink_info!(&self.logger, "[ICE] selected pair with {from}");
        }
        *selected = Some(from);
        if matches!(self.state(), IceState::Connecting | IceState::Disconnected) {
            self.set_state(IceState::Connected);
        }
    }

    /// Send one round of connectivity checks to every known remote
    /// candidate. Used in full (non-lite) mode; the caller re-invokes this on
    /// its check timer until the pair is selected.
    pub fn send_checks(&self) {
        if self.cfg.ice_lite {
            return;
        }
        let Some((remote_ufrag, remote_pwd)) = self.remote_credentials.lock().unwrap().clone()
        else {
            return;
        };
        let (local_ufrag, _) = self.local_credentials();
        let candidates = self.remote_candidates.lock().unwrap().clone();

        for cand in candidates {
            let mut transaction_id = [0u8; 12];
            OsRng.fill_bytes(&mut transaction_id);
            let mut req = StunMessage::new(BINDING_REQUEST, transaction_id);
            req.add_username(&format!("{remote_ufrag}:{local_ufrag}"));
            req.add_priority(cand.priority);
            req.add_ice_role(self.controlling, self.tie_breaker);
            if self.controlling {
                // aggressive nomination
                req.add_use_candidate();
            }
            let wire = req.encode(Some(remote_pwd.as_bytes()));
            let _ = self.socket.send_to(&wire, cand.address);
        }
    }

    /// Send a datagram to the selected peer.
    pub fn send(&self, buf: &[u8]) -> Result<usize, IceError> {
        let peer = self.selected_peer().ok_or(IceError::AgentClosed)?;
        Ok(self.socket.send_to(buf, peer)?)
    }

    /// ICE restart: fresh credentials, connectivity starts over, candidates
    /// and socket survive so media can keep flowing on the old pair until
    /// the new checks succeed.
    pub fn restart(&self) {
        *self.local_ufrag.lock().unwrap() = random_ice_string(4);
        *self.local_pwd.lock().unwrap() = random_ice_string(22);
        *self.remote_credentials.lock().unwrap() = None;
        self.set_state(IceState::Connecting);
        sink_info!(&self.logger, "[ICE] restart: new local credentials generated");
    }
}

/// Random alphanumeric string for ufrag/pwd.
fn random_ice_string(len: usize) -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    (0..len)
        .map(|_| CHARSET[OsRng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::NoopLogSink;

    fn test_agent(ice_lite: bool, controlling: bool) -> IceAgent {
        let cfg = IceConfig {
            ice_lite,
            enforce_interfaces: vec!["127.0.0.1".into()],
            port_min: 41_000,
            port_max: 41_999,
            ..Default::default()
        };
        IceAgent::new(Arc::new(NoopLogSink), cfg, controlling).unwrap()
    }

    #[test]
    fn gathers_a_host_candidate_and_credentials() {
        let agent = test_agent(false, true);
        assert_eq!(agent.state(), IceState::Connecting);
        assert!(!agent.local_candidates().is_empty());
        let (ufrag, pwd) = agent.local_credentials();
        assert_eq!(ufrag.len(), 4);
        assert_eq!(pwd.len(), 22);
    }

    #[test]
    fn valid_binding_request_selects_pair_in_lite_mode() {
        let agent = test_agent(true, false);
        let (ufrag, pwd) = agent.local_credentials();

        let mut req = StunMessage::new(BINDING_REQUEST, [7u8; 12]);
        req.add_username(&format!("{ufrag}:peer"));
        let wire = req.encode(Some(pwd.as_bytes()));

        let from: SocketAddr = "127.0.0.1:55555".parse().unwrap();
        let resp = agent.handle_stun(&wire, from).expect("a response");
        let resp = StunMessage::decode(&resp).unwrap();
        assert_eq!(resp.msg_type, BINDING_SUCCESS);
        assert_eq!(resp.xor_mapped_address(), Some(from));
        assert_eq!(agent.selected_peer(), Some(from));
        assert_eq!(agent.state(), IceState::Connected);
    }

    #[test]
    fn bad_credentials_get_an_error_response() {
        let agent = test_agent(true, false);
        let (ufrag, _) = agent.local_credentials();

        let mut req = StunMessage::new(BINDING_REQUEST, [7u8; 12]);
        req.add_username(&format!("{ufrag}:peer"));
        let wire = req.encode(Some(b"wrong password"));

        let from: SocketAddr = "127.0.0.1:55556".parse().unwrap();
        let resp = agent.handle_stun(&wire, from).expect("a response");
        let resp = StunMessage::decode(&resp).unwrap();
        assert_eq!(resp.msg_type, BINDING_ERROR);
        assert!(agent.selected_peer().is_none());
    }

    #[test]
    fn restart_changes_credentials() {
        let agent = test_agent(false, true);
        let before = agent.local_credentials();
        agent.restart();
        let after = agent.local_credentials();
        assert_ne!(before, after);
        assert_eq!(agent.state(), IceState::Connecting);
    }
}
