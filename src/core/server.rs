use crate::auth::TokenAuth;
use crate::config::GatewayConfig;
use crate::core::api_error::{self, error_response};
use crate::core::events::{ClientEvent, EventHandler, plugin_event};
use crate::core::handle::{Handle, OutboundPacket};
use crate::core::session::Session;
use crate::core::watchdog;
use crate::core::{flags, random_id};
use crate::dtls::DtlsIdentity;
use crate::log::log_sink::LogSink;
use crate::plugin::{GatewayCallbacks, Jsep, PluginRegistry, PluginResult, PluginSession};
use crate::transport::{Transport, TransportCallbacks};
use crate::{sink_info, sink_warn};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub const GATEWAY_NAME: &str = "rtcgate";
pub const GATEWAY_VERSION: u32 = 30;
pub const GATEWAY_VERSION_STRING: &str = "0.3.0";

/// The gateway core: owns the sessions, the plugin registry, the transport
/// registry and the global machinery (event routing, watchdog, auth).
pub struct GatewayCore {
    logger: Arc<dyn LogSink>,
    /// Whole-snapshot configuration; replaced atomically under this lock,
    /// readers clone the `Arc` and keep it for the duration of a call.
    config: Mutex<Arc<GatewayConfig>>,
    identity: Arc<DtlsIdentity>,
    pub auth: Arc<TokenAuth>,

    sessions: Mutex<HashMap<u64, Arc<Session>>>,
    /// handle id -> owning session id, for O(1) routing from plugin callbacks.
    handle_index: Mutex<HashMap<u64, u64>>,
    /// handle id -> when media statistics were last fanned out.
    stats_emitted: Mutex<HashMap<u64, Instant>>,

    plugins: Mutex<PluginRegistry>,
    transports: Mutex<HashMap<&'static str, Arc<dyn Transport>>>,
    event_handlers: Mutex<Vec<Arc<dyn EventHandler>>>,

    event_tx: Sender<ClientEvent>,
    stop: Arc<AtomicBool>,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl GatewayCore {
    /// Build the core and start its service threads (event router,
    /// watchdog). Plugins must be registered and initialized afterwards via
    /// [`setup_plugins`](Self::setup_plugins).
    pub fn new(logger: Arc<dyn LogSink>, config: GatewayConfig) -> Result<Arc<Self>, String> {
        let identity = DtlsIdentity::generate().map_err(|e| format!("DTLS identity: {e}"))?;
        let auth = Arc::new(TokenAuth::new(config.token_auth, config.token_secret.clone()));
        let (event_tx, event_rx) = channel();

        let core = Arc::new(Self {
            logger,
            config: Mutex::new(Arc::new(config)),
            identity: Arc::new(identity),
            auth,
            sessions: Mutex::new(HashMap::new()),
            handle_index: Mutex::new(HashMap::new()),
            stats_emitted: Mutex::new(HashMap::new()),
            plugins: Mutex::new(PluginRegistry::new()),
            transports: Mutex::new(HashMap::new()),
            event_handlers: Mutex::new(Vec::new()),
            event_tx,
            stop: Arc::new(AtomicBool::new(false)),
            threads: Mutex::new(Vec::new()),
        });

        let mut threads = core.threads.lock().unwrap();
        let router = Arc::clone(&core);
        threads.push(
            thread::Builder::new()
                .name("gate-events".into())
                .spawn(move || router.event_router_loop(event_rx))
                .expect("spawning the event router"),
        );
        threads.push(watchdog::spawn_watchdog(
            Arc::clone(&core),
            Arc::clone(&core.stop),
        ));
        drop(threads);

        Ok(core)
    }

    pub fn config(&self) -> Arc<GatewayConfig> {
        Arc::clone(&self.config.lock().unwrap())
    }

    /// Publish a new configuration snapshot. Existing handles keep the
    /// snapshot they started with.
    pub fn update_config(&self, config: GatewayConfig) {
        *self.config.lock().unwrap() = Arc::new(config);
    }

    /// Register and initialize the given plugins (honoring the disable list).
    pub fn setup_plugins(
        self: &Arc<Self>,
        plugins: Vec<Arc<dyn crate::plugin::Plugin>>,
        config_dir: Option<&str>,
    ) {
        let disabled = self.config().plugins_disabled.clone();
        let callbacks: Arc<dyn GatewayCallbacks> = Arc::clone(self) as _;
        let mut registry = self.plugins.lock().unwrap();
        for plugin in plugins {
            registry.register(plugin);
        }
        registry.init_all(callbacks, config_dir, &disabled, &self.logger);
    }

    /// Register a transport (honoring the disable list).
    pub fn register_transport(&self, transport: Arc<dyn Transport>) {
        let package = transport.package();
        if self
            .config()
            .transports_disabled
            .iter()
            .any(|d| d == package)
        {
            sink_info!(&self.logger, "[CORE] transport {package} disabled");
            return;
        }
        self.transports.lock().unwrap().insert(package, transport);
    }

    pub fn register_event_handler(&self, handler: Arc<dyn EventHandler>) {
        self.event_handlers.lock().unwrap().push(handler);
    }

    /// Orderly shutdown: destroy sessions, plugins and service threads.
    pub fn destroy(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.lock().unwrap().values().cloned().collect();
        for session in sessions {
            self.destroy_session(&session, false);
        }
        self.stop.store(true, Ordering::SeqCst);
        let mut threads = self.threads.lock().unwrap();
        for t in threads.drain(..) {
            let _ = t.join();
        }
        self.plugins.lock().unwrap().destroy_all();
    }

    // ------------------------------------------------------------------
    // lookups
    // ------------------------------------------------------------------

    pub fn session(&self, id: u64) -> Option<Arc<Session>> {
        self.sessions.lock().unwrap().get(&id).cloned()
    }

    fn handle_by_id(&self, handle_id: u64) -> Option<(Arc<Session>, Arc<Handle>)> {
        let session_id = *self.handle_index.lock().unwrap().get(&handle_id)?;
        let session = self.session(session_id)?;
        let handle = session.handle(handle_id)?;
        Some((session, handle))
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    // ------------------------------------------------------------------
    // event routing
    // ------------------------------------------------------------------

    fn event_router_loop(self: Arc<Self>, rx: Receiver<ClientEvent>) {
        while !self.stop.load(Ordering::SeqCst) {
            match rx.recv_timeout(Duration::from_millis(200)) {
                Ok(event) => self.route_event(event),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn route_event(&self, event: ClientEvent) {
        let Some(session) = self.session(event.session_id) else {
            return;
        };
        let transport = self
            .transports
            .lock()
            .unwrap()
            .get(session.transport_package.as_str())
            .cloned();
        match transport {
            Some(t) => {
                if let Err(e) =
                    t.send_message(session.transport_cookie, None, false, event.body)
                {
                    sink_warn!(&self.logger, "[CORE] transport send failed: {e}");
                }
            }
            None => {
                sink_warn!(
                    &self.logger,
                    "[CORE] no transport {} for session {}",
                    session.transport_package,
                    event.session_id
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // watchdog duties
    // ------------------------------------------------------------------

    /// Reap idle sessions, run deferred handle frees and fan out periodic
    /// media statistics. Called by the watchdog on every tick.
    pub fn reap(&self, now: Instant) {
        let stats_period = self.config().event_stats_period;
        let emit_stats = stats_period > 0 && self.events_is_enabled();

        let sessions: Vec<Arc<Session>> = self.sessions.lock().unwrap().values().cloned().collect();
        for session in sessions {
            if session.timed_out(now) && !session.is_destroyed() {
                sink_info!(&self.logger, "[CORE] session {} timed out", session.id);
                self.destroy_session(&session, true);
                continue;
            }
            for handle in session.handles() {
                let due = handle
                    .free_at
                    .lock()
                    .unwrap()
                    .is_some_and(|at| now >= at);
                if due {
                    handle.webrtc_free();
                }
                if emit_stats {
                    self.maybe_emit_stats(&handle, stats_period, now);
                }
            }
        }
    }

    /// Media statistics towards the event handlers, once per configured
    /// period per handle.
    fn maybe_emit_stats(&self, handle: &Arc<Handle>, period_secs: u64, now: Instant) {
        {
            let mut emitted = self.stats_emitted.lock().unwrap();
            let last = emitted.entry(handle.id).or_insert(now);
            if now.duration_since(*last) < Duration::from_secs(period_secs) {
                return;
            }
            *last = now;
        }
        let Some(plugin) = handle.plugin() else { return };
        let Some(plugin_session) = handle.plugin_session() else {
            return;
        };

        let stats = handle.component.with_state(|c| {
            json!({
                "in": {
                    "audio": {
                        "packets": c.in_stats.audio.packets,
                        "bytes": c.in_stats.audio.bytes,
                        "bytes_lastsec": c.in_stats.audio.bytes_lastsec,
                        "nacks": c.in_stats.audio.nacks,
                    },
                    "video": {
                        "packets": c.in_stats.video[0].packets,
                        "bytes": c.in_stats.video[0].bytes,
                        "bytes_lastsec": c.in_stats.video[0].bytes_lastsec,
                        "nacks": c.in_stats.video[0].nacks,
                    },
                },
                "out": {
                    "audio": {
                        "packets": c.out_stats.audio.packets,
                        "bytes": c.out_stats.audio.bytes,
                    },
                    "video": {
                        "packets": c.out_stats.video[0].packets,
                        "bytes": c.out_stats.video[0].bytes,
                    },
                },
            })
        });
        self.notify_event(plugin.package(), Some(&plugin_session), stats);
    }

    fn destroy_session(&self, session: &Arc<Session>, timeout: bool) {
        if !session.mark_destroyed() {
            return;
        }
        for handle in session.handles() {
            handle.detach();
            handle.webrtc_free();
            self.handle_index.lock().unwrap().remove(&handle.id);
            self.stats_emitted.lock().unwrap().remove(&handle.id);
            session.remove_handle(handle.id);
        }
        self.sessions.lock().unwrap().remove(&session.id);
        let transport = self
            .transports
            .lock()
            .unwrap()
            .get(session.transport_package.as_str())
            .cloned();
        if let Some(t) = transport {
            t.session_over(session.transport_cookie, session.id, timeout);
        }
    }

    // ------------------------------------------------------------------
    // signaling request dispatch
    // ------------------------------------------------------------------

    fn reply(
        &self,
        transport_package: &str,
        transport_cookie: u64,
        request_id: Option<&str>,
        admin: bool,
        message: Value,
    ) {
        let transport = self
            .transports
            .lock()
            .unwrap()
            .get(transport_package)
            .cloned();
        if let Some(t) = transport
            && let Err(e) = t.send_message(transport_cookie, request_id, admin, message)
        {
            sink_warn!(&self.logger, "[CORE] transport reply failed: {e}");
        }
    }

    fn check_auth(&self, message: &Value) -> Result<(), (i32, String)> {
        let config = self.config();
        if let Some(secret) = &config.api_secret {
            let provided = message.get("apisecret").and_then(Value::as_str);
            if provided != Some(secret.as_str()) {
                return Err((
                    api_error::ERROR_UNAUTHORIZED,
                    "unauthorized request (wrong or missing secret)".into(),
                ));
            }
        }
        if self.auth.is_enabled() {
            let token = message.get("token").and_then(Value::as_str).unwrap_or("");
            if !self.auth.check_token(token) {
                return Err((
                    api_error::ERROR_TOKEN_NOT_FOUND,
                    "invalid or expired token".into(),
                ));
            }
        }
        Ok(())
    }

    fn dispatch(
        &self,
        transport_package: &str,
        transport_cookie: u64,
        message: Value,
    ) -> Value {
        let transaction = message
            .get("transaction")
            .and_then(Value::as_str)
            .map(String::from);
        let transaction = transaction.as_deref();
        let session_id = message.get("session_id").and_then(Value::as_u64);

        let Some(request) = message.get("janus").and_then(Value::as_str) else {
            return error_response(
                session_id,
                transaction,
                api_error::ERROR_MISSING_REQUEST,
                "missing request verb",
            );
        };

        if let Err((code, reason)) = self.check_auth(&message) {
            return error_response(session_id, transaction, code, reason);
        }

        match request {
            "info" => self.info_response(transaction),
            "create" => self.request_create(transport_package, transport_cookie, transaction),
            _ => {
                // Everything else addresses an existing session.
                let Some(session) =
                    session_id.and_then(|id| self.session(id)).filter(|s| !s.is_destroyed())
                else {
                    return error_response(
                        session_id,
                        transaction,
                        api_error::ERROR_SESSION_NOT_FOUND,
                        "no such session",
                    );
                };
                session.touch();
                match request {
                    "keepalive" => json!({
                        "janus": "ack",
                        "session_id": session.id,
                        "transaction": transaction,
                    }),
                    "attach" => self.request_attach(&session, transaction, &message),
                    "destroy" => {
                        self.destroy_session(&session, false);
                        json!({
                            "janus": "success",
                            "session_id": session.id,
                            "transaction": transaction,
                        })
                    }
                    "message" | "trickle" | "hangup" | "detach" => {
                        let Some(handle) = message
                            .get("handle_id")
                            .and_then(Value::as_u64)
                            .and_then(|id| session.handle(id))
                        else {
                            return error_response(
                                Some(session.id),
                                transaction,
                                api_error::ERROR_HANDLE_NOT_FOUND,
                                "no such handle",
                            );
                        };
                        match request {
                            "message" => {
                                self.request_message(&session, &handle, transaction, &message)
                            }
                            "trickle" => self.request_trickle(&session, &handle, transaction, &message),
                            "hangup" => {
                                handle.hangup("janus-api");
                                json!({
                                    "janus": "success",
                                    "session_id": session.id,
                                    "transaction": transaction,
                                })
                            }
                            "detach" => {
                                handle.detach();
                                self.handle_index.lock().unwrap().remove(&handle.id);
                                session.remove_handle(handle.id);
                                json!({
                                    "janus": "success",
                                    "session_id": session.id,
                                    "transaction": transaction,
                                })
                            }
                            _ => unreachable!(),
                        }
                    }
                    other => error_response(
                        Some(session.id),
                        transaction,
                        api_error::ERROR_UNKNOWN_REQUEST,
                        format!("unknown request '{other}'"),
                    ),
                }
            }
        }
    }

    fn info_response(&self, transaction: Option<&str>) -> Value {
        let plugins: Value = self
            .plugins
            .lock()
            .unwrap()
            .iter()
            .map(|p| {
                (
                    p.package().to_string(),
                    json!({
                        "name": p.name(),
                        "author": p.author(),
                        "description": p.description(),
                        "version": p.version(),
                        "version_string": p.version_string(),
                    }),
                )
            })
            .collect::<serde_json::Map<String, Value>>()
            .into();
        json!({
            "janus": "server_info",
            "transaction": transaction,
            "name": GATEWAY_NAME,
            "version": GATEWAY_VERSION,
            "version_string": GATEWAY_VERSION_STRING,
            "plugins": plugins,
        })
    }

    fn request_create(
        &self,
        transport_package: &str,
        transport_cookie: u64,
        transaction: Option<&str>,
    ) -> Value {
        let id = random_id();
        let session = Session::new(id, transport_package, transport_cookie);
        self.sessions.lock().unwrap().insert(id, session);
        sink_info!(&self.logger, "[CORE] session {id} created");

        let transport = self
            .transports
            .lock()
            .unwrap()
            .get(transport_package)
            .cloned();
        if let Some(t) = transport {
            t.session_created(transport_cookie, id);
        }

        json!({
            "janus": "success",
            "transaction": transaction,
            "data": { "id": id },
        })
    }

    fn request_attach(
        &self,
        session: &Arc<Session>,
        transaction: Option<&str>,
        message: &Value,
    ) -> Value {
        let Some(package) = message.get("plugin").and_then(Value::as_str) else {
            return error_response(
                Some(session.id),
                transaction,
                api_error::ERROR_MISSING_MANDATORY_ELEMENT,
                "missing plugin",
            );
        };
        let Some(plugin) = self.plugins.lock().unwrap().get(package) else {
            return error_response(
                Some(session.id),
                transaction,
                api_error::ERROR_PLUGIN_NOT_FOUND,
                format!("no such plugin '{package}'"),
            );
        };

        if self.auth.is_enabled() {
            let token = message.get("token").and_then(Value::as_str).unwrap_or("");
            if !self.auth.check_plugin(token, package) {
                return error_response(
                    Some(session.id),
                    transaction,
                    api_error::ERROR_UNAUTHORIZED,
                    "token has no access to this plugin",
                );
            }
        }

        let opaque_id = message
            .get("opaque_id")
            .and_then(Value::as_str)
            .map(String::from);
        let handle_id = random_id();
        let handle = Handle::new(
            handle_id,
            session.id,
            opaque_id,
            self.logger.clone(),
            self.config(),
            Arc::clone(&self.identity),
            self.event_tx.clone(),
        );
        if let Err(code) = handle.attach_plugin(plugin) {
            return error_response(
                Some(session.id),
                transaction,
                code,
                "plugin rejected the session",
            );
        }
        session.insert_handle(Arc::clone(&handle));
        self.handle_index
            .lock()
            .unwrap()
            .insert(handle_id, session.id);
        sink_info!(
            &self.logger,
            "[CORE] handle {handle_id} attached to {package} (session {})",
            session.id
        );

        json!({
            "janus": "success",
            "session_id": session.id,
            "transaction": transaction,
            "data": { "id": handle_id },
        })
    }

    fn request_message(
        &self,
        session: &Arc<Session>,
        handle: &Arc<Handle>,
        transaction: Option<&str>,
        message: &Value,
    ) -> Value {
        let Some(plugin) = handle.plugin() else {
            return error_response(
                Some(session.id),
                transaction,
                api_error::ERROR_PLUGIN_MESSAGE,
                "no plugin attached",
            );
        };
        let Some(plugin_session) = handle.plugin_session() else {
            return error_response(
                Some(session.id),
                transaction,
                api_error::ERROR_PLUGIN_MESSAGE,
                "no plugin session",
            );
        };

        // A JSEP from the client is processed by the core before the plugin
        // sees the message.
        let jsep = message.get("jsep").and_then(Jsep::from_value);
        if let Some(jsep) = &jsep
            && let Err(code) = handle.process_remote_jsep(jsep)
        {
            return error_response(
                Some(session.id),
                transaction,
                code,
                "error processing the session description",
            );
        }

        let body = message.get("body").cloned().unwrap_or(Value::Null);
        let result = plugin.handle_message(
            &plugin_session,
            transaction.unwrap_or_default(),
            body,
            jsep,
        );

        match result {
            PluginResult::Ok(content) => json!({
                "janus": "success",
                "session_id": session.id,
                "sender": handle.id,
                "transaction": transaction,
                "plugindata": {
                    "plugin": plugin.package(),
                    "data": content,
                }
            }),
            PluginResult::OkWait(hint) => {
                let mut ack = json!({
                    "janus": "ack",
                    "session_id": session.id,
                    "transaction": transaction,
                });
                if let Some(hint) = hint {
                    ack["hint"] = json!(hint);
                }
                ack
            }
            PluginResult::Error(text) => {
                // Surfaced to the client unchanged.
                error_response(
                    Some(session.id),
                    transaction,
                    api_error::ERROR_PLUGIN_MESSAGE,
                    text,
                )
            }
        }
    }

    fn request_trickle(
        &self,
        session: &Arc<Session>,
        handle: &Arc<Handle>,
        transaction: Option<&str>,
        message: &Value,
    ) -> Value {
        // Either a single candidate object or an array of them.
        let candidates: Vec<Value> = if let Some(list) = message.get("candidates") {
            list.as_array().cloned().unwrap_or_default()
        } else if let Some(single) = message.get("candidate") {
            vec![single.clone()]
        } else {
            return error_response(
                Some(session.id),
                transaction,
                api_error::ERROR_MISSING_MANDATORY_ELEMENT,
                "missing candidate",
            );
        };

        for candidate in candidates {
            if let Err(code) = handle.trickle(transaction.unwrap_or_default(), candidate) {
                return error_response(
                    Some(session.id),
                    transaction,
                    code,
                    "error processing the trickle candidate",
                );
            }
        }
        json!({
            "janus": "ack",
            "session_id": session.id,
            "transaction": transaction,
        })
    }
}

impl TransportCallbacks for GatewayCore {
    fn incoming_request(
        &self,
        transport_package: &str,
        transport_cookie: u64,
        request_id: Option<String>,
        admin: bool,
        message: Value,
    ) {
        let response = self.dispatch(transport_package, transport_cookie, message);
        self.reply(
            transport_package,
            transport_cookie,
            request_id.as_deref(),
            admin,
            response,
        );
    }
}

impl GatewayCallbacks for GatewayCore {
    fn push_event(
        &self,
        session: &PluginSession,
        plugin_package: &str,
        transaction: Option<&str>,
        message: Value,
        jsep: Option<Jsep>,
    ) -> i32 {
        let Some((owning_session, handle)) = self.handle_by_id(session.handle_id) else {
            return api_error::ERROR_HANDLE_NOT_FOUND;
        };
        if handle.flags.is_set(flags::CLEANING) {
            return api_error::ERROR_HANDLE_NOT_FOUND;
        }

        // A plugin-provided JSEP gets our transport attributes before it
        // reaches the client.
        let jsep_value = match jsep {
            Some(jsep) => match handle.process_local_jsep(&jsep) {
                Ok(enriched) => Some(enriched.to_value()),
                Err(code) => return code,
            },
            None => None,
        };

        let event = plugin_event(
            owning_session.id,
            handle.id,
            transaction,
            plugin_package,
            message,
            jsep_value,
        );
        if self.event_tx.send(event).is_err() {
            return api_error::ERROR_UNKNOWN;
        }
        0
    }

    fn relay_rtp(&self, session: &PluginSession, video: bool, buf: &[u8]) {
        if let Some((_, handle)) = self.handle_by_id(session.handle_id) {
            handle.queue_packet(OutboundPacket::Rtp {
                video,
                data: buf.to_vec(),
            });
        }
    }

    fn relay_rtcp(&self, session: &PluginSession, _video: bool, buf: &[u8]) {
        if let Some((_, handle)) = self.handle_by_id(session.handle_id) {
            handle.queue_packet(OutboundPacket::Rtcp { data: buf.to_vec() });
        }
    }

    fn relay_data(&self, session: &PluginSession, buf: &[u8]) {
        if let Some((_, handle)) = self.handle_by_id(session.handle_id) {
            handle.queue_packet(OutboundPacket::Data(buf.to_vec()));
        }
    }

    fn close_pc(&self, session: &PluginSession) {
        if let Some((_, handle)) = self.handle_by_id(session.handle_id) {
            handle.hangup("close-pc");
        }
    }

    fn end_session(&self, session: &PluginSession) {
        if let Some((owning_session, handle)) = self.handle_by_id(session.handle_id) {
            handle.detach();
            handle.webrtc_free();
            self.handle_index.lock().unwrap().remove(&handle.id);
            owning_session.remove_handle(handle.id);
        }
    }

    fn events_is_enabled(&self) -> bool {
        !self.event_handlers.lock().unwrap().is_empty()
    }

    fn notify_event(&self, plugin_package: &str, session: Option<&PluginSession>, event: Value) {
        let handlers: Vec<Arc<dyn EventHandler>> =
            self.event_handlers.lock().unwrap().clone();
        if handlers.is_empty() {
            return;
        }
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        let wrapped = json!({
            "plugin": plugin_package,
            "handle_id": session.map(|s| s.handle_id),
            "timestamp": timestamp,
            "event": event,
        });
        for handler in handlers {
            handler.handle_event(wrapped.clone());
        }
    }

    fn auth_is_signature_valid(&self, plugin_package: &str, token: &str) -> bool {
        self.auth.check_signature(token, plugin_package)
    }

    fn auth_signature_contains(&self, plugin_package: &str, token: &str, descriptor: &str) -> bool {
        self.auth
            .check_signature_contains(token, plugin_package, descriptor)
    }
}

impl Drop for GatewayCore {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Ok(mut threads) = self.threads.lock() {
            for t in threads.drain(..) {
                let _ = t.join();
            }
        }
    }
}
