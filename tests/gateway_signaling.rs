//! End-to-end signaling flow against the gateway core: create a session,
//! attach the echo test plugin, negotiate, trickle, hang up, destroy.

use rtcgate::config::GatewayConfig;
use rtcgate::core::GatewayCore;
use rtcgate::log::NoopLogSink;
use rtcgate::plugin::echo::EchoTestPlugin;
use rtcgate::transport::channel_transport::TransportEvent;
use rtcgate::transport::{ChannelTransport, TransportCallbacks};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

const TRANSPORT: &str = "gate.transport.channel";
const COOKIE: u64 = 99;

struct Fixture {
    core: Arc<GatewayCore>,
    events: Receiver<TransportEvent>,
    /// Messages received but not yet claimed by a `wait_for` predicate:
    /// replies and asynchronous events can arrive in either order.
    pending: std::cell::RefCell<Vec<Value>>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_plugins(vec![Arc::new(EchoTestPlugin::new())])
    }

    fn with_plugins(plugins: Vec<Arc<dyn rtcgate::plugin::Plugin>>) -> Self {
        let config = GatewayConfig {
            enforce_interfaces: vec!["127.0.0.1".into()],
            rtp_port_min: 43_000,
            rtp_port_max: 43_999,
            ..Default::default()
        };
        let core = GatewayCore::new(Arc::new(NoopLogSink), config).unwrap();
        core.setup_plugins(plugins, None);
        let (transport, events) = ChannelTransport::new();
        core.register_transport(Arc::new(transport));
        Self {
            core,
            events,
            pending: std::cell::RefCell::new(Vec::new()),
        }
    }

    fn request(&self, message: Value) {
        self.core
            .incoming_request(TRANSPORT, COOKIE, None, false, message);
    }

    /// Wait for a JSON message matching `pred`, buffering the others.
    fn wait_for(&self, mut pred: impl FnMut(&Value) -> bool) -> Value {
        {
            let mut pending = self.pending.borrow_mut();
            if let Some(pos) = pending.iter().position(&mut pred) {
                return pending.remove(pos);
            }
        }
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            let remaining = deadline
                .checked_duration_since(std::time::Instant::now())
                .expect("timed out waiting for a message");
            match self.events.recv_timeout(remaining) {
                Ok(TransportEvent::Message { message, .. }) => {
                    if pred(&message) {
                        return message;
                    }
                    self.pending.borrow_mut().push(message);
                }
                Ok(_) => continue,
                Err(e) => panic!("no matching message: {e}"),
            }
        }
    }
}

fn offer_sdp() -> String {
    "v=0\r\n\
o=- 20518 0 IN IP4 0.0.0.0\r\n\
s=-\r\n\
t=0 0\r\n\
a=group:BUNDLE 0\r\n\
a=ice-options:trickle\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
a=ice-ufrag:F7gI\r\n\
a=ice-pwd:x9cml/YzichV2+XlhiMu8g\r\n\
a=fingerprint:sha-256 D2:FA:0E:C3:22:59:5E:14:95:69:92:3D:13:B4:84:24:2C:C2:A2:C0:3E:FD:34:8E:5E:EA:6F:AF:52:CE:E6:0F\r\n\
a=setup:actpass\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=sendrecv\r\n\
a=ssrc:889900 cname:tester\r\n"
        .to_string()
}

#[test]
fn full_signaling_round_trip() {
    let fx = Fixture::new();

    // create
    fx.request(json!({"janus": "create", "transaction": "t1"}));
    let created = fx.wait_for(|m| m["transaction"] == "t1");
    assert_eq!(created["janus"], "success");
    let session_id = created["data"]["id"].as_u64().unwrap();

    // the transport is told about its new session too
    // (SessionCreated arrives on the same channel, skipped by wait_for)

    // attach
    fx.request(json!({
        "janus": "attach",
        "transaction": "t2",
        "session_id": session_id,
        "plugin": "gate.plugin.echotest",
    }));
    let attached = fx.wait_for(|m| m["transaction"] == "t2");
    assert_eq!(attached["janus"], "success");
    let handle_id = attached["data"]["id"].as_u64().unwrap();

    // message with a JSEP offer: the ack comes synchronously, the answer
    // arrives as an asynchronous event with the enriched SDP
    fx.request(json!({
        "janus": "message",
        "transaction": "t3",
        "session_id": session_id,
        "handle_id": handle_id,
        "body": {"audio": true, "video": true},
        "jsep": {"type": "offer", "sdp": offer_sdp()},
    }));
    let ack = fx.wait_for(|m| m["transaction"] == "t3" && m["janus"] != "event");
    assert_eq!(ack["janus"], "ack");

    let event = fx.wait_for(|m| m["janus"] == "event" && m.get("jsep").is_some());
    assert_eq!(event["sender"].as_u64(), Some(handle_id));
    assert_eq!(event["plugindata"]["plugin"], "gate.plugin.echotest");
    assert_eq!(event["jsep"]["type"], "answer");
    let answer_sdp = event["jsep"]["sdp"].as_str().unwrap();
    assert!(answer_sdp.contains("a=ice-ufrag:"));
    assert!(answer_sdp.contains("a=fingerprint:sha-256 "));
    assert!(answer_sdp.contains("a=setup:active"));
    assert!(answer_sdp.contains("a=candidate:"));
    // our credentials, not the client's
    assert!(!answer_sdp.contains("F7gI"));

    // trickle a candidate and the end-of-candidates sentinel
    fx.request(json!({
        "janus": "trickle",
        "transaction": "t4",
        "session_id": session_id,
        "handle_id": handle_id,
        "candidate": {
            "candidate": "candidate:1 1 udp 1677729535 192.0.2.4 50000 typ host",
            "sdpMLineIndex": 0,
        },
    }));
    let trickled = fx.wait_for(|m| m["transaction"] == "t4");
    assert_eq!(trickled["janus"], "ack");

    fx.request(json!({
        "janus": "trickle",
        "transaction": "t5",
        "session_id": session_id,
        "handle_id": handle_id,
        "candidate": {"completed": true},
    }));
    fx.wait_for(|m| m["transaction"] == "t5");

    // keepalive
    fx.request(json!({
        "janus": "keepalive",
        "transaction": "t6",
        "session_id": session_id,
    }));
    let ka = fx.wait_for(|m| m["transaction"] == "t6");
    assert_eq!(ka["janus"], "ack");

    // hangup: success reply plus an asynchronous hangup notification
    fx.request(json!({
        "janus": "hangup",
        "transaction": "t7",
        "session_id": session_id,
        "handle_id": handle_id,
    }));
    let hung = fx.wait_for(|m| m["transaction"] == "t7");
    assert_eq!(hung["janus"], "success");
    let notification = fx.wait_for(|m| m["janus"] == "hangup");
    assert_eq!(notification["sender"].as_u64(), Some(handle_id));

    // destroy
    fx.request(json!({
        "janus": "destroy",
        "transaction": "t8",
        "session_id": session_id,
    }));
    let destroyed = fx.wait_for(|m| m["transaction"] == "t8");
    assert_eq!(destroyed["janus"], "success");
    assert_eq!(fx.core.session_count(), 0);
}

#[test]
fn requests_for_missing_sessions_fail_with_458() {
    let fx = Fixture::new();
    fx.request(json!({
        "janus": "keepalive",
        "transaction": "x1",
        "session_id": 12345,
    }));
    let err = fx.wait_for(|m| m["transaction"] == "x1");
    assert_eq!(err["janus"], "error");
    assert_eq!(err["error"]["code"], 458);
}

#[test]
fn attach_to_unknown_plugin_fails_with_460() {
    let fx = Fixture::new();
    fx.request(json!({"janus": "create", "transaction": "c"}));
    let created = fx.wait_for(|m| m["transaction"] == "c");
    let session_id = created["data"]["id"].as_u64().unwrap();

    fx.request(json!({
        "janus": "attach",
        "transaction": "a",
        "session_id": session_id,
        "plugin": "gate.plugin.nonexistent",
    }));
    let err = fx.wait_for(|m| m["transaction"] == "a");
    assert_eq!(err["error"]["code"], 460);
}

/// A plugin that only counts lifecycle callbacks.
struct CountingPlugin {
    hangups: std::sync::atomic::AtomicU32,
}

impl CountingPlugin {
    fn new() -> Self {
        Self {
            hangups: std::sync::atomic::AtomicU32::new(0),
        }
    }
}

impl rtcgate::plugin::Plugin for CountingPlugin {
    fn init(
        &self,
        _callbacks: Arc<dyn rtcgate::plugin::GatewayCallbacks>,
        _config_dir: Option<&str>,
    ) -> Result<(), String> {
        Ok(())
    }
    fn destroy(&self) {}
    fn version(&self) -> u32 {
        1
    }
    fn version_string(&self) -> &'static str {
        "0.0.1"
    }
    fn description(&self) -> &'static str {
        "counts callbacks"
    }
    fn name(&self) -> &'static str {
        "Counting plugin"
    }
    fn author(&self) -> &'static str {
        "tests"
    }
    fn package(&self) -> &'static str {
        "gate.plugin.counting"
    }
    fn create_session(&self, _s: &Arc<rtcgate::plugin::PluginSession>) -> Result<(), i32> {
        Ok(())
    }
    fn handle_message(
        &self,
        _s: &Arc<rtcgate::plugin::PluginSession>,
        _transaction: &str,
        _message: Value,
        _jsep: Option<rtcgate::plugin::Jsep>,
    ) -> rtcgate::plugin::PluginResult {
        rtcgate::plugin::PluginResult::ok(json!({"counting": "ok"}))
    }
    fn query_session(&self, _s: &Arc<rtcgate::plugin::PluginSession>) -> Value {
        Value::Null
    }
    fn destroy_session(&self, _s: &Arc<rtcgate::plugin::PluginSession>) -> Result<(), i32> {
        Ok(())
    }
    fn hangup_media(&self, _s: &Arc<rtcgate::plugin::PluginSession>) {
        self.hangups
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}

#[test]
fn hangup_media_fires_exactly_once_and_free_is_deferred() {
    let counting = Arc::new(CountingPlugin::new());
    let fx =
        Fixture::with_plugins(vec![Arc::clone(&counting) as Arc<dyn rtcgate::plugin::Plugin>]);

    fx.request(json!({"janus": "create", "transaction": "c"}));
    let created = fx.wait_for(|m| m["transaction"] == "c");
    let session_id = created["data"]["id"].as_u64().unwrap();

    fx.request(json!({
        "janus": "attach",
        "transaction": "a",
        "session_id": session_id,
        "plugin": "gate.plugin.counting",
    }));
    let attached = fx.wait_for(|m| m["transaction"] == "a");
    let handle_id = attached["data"]["id"].as_u64().unwrap();

    // Two hangups in a row: the plugin hears about it exactly once.
    for tx in ["h1", "h2"] {
        fx.request(json!({
            "janus": "hangup",
            "transaction": tx,
            "session_id": session_id,
            "handle_id": handle_id,
        }));
        fx.wait_for(|m| m["transaction"] == tx);
    }
    assert_eq!(
        counting.hangups.load(std::sync::atomic::Ordering::SeqCst),
        1
    );

    // The free is deferred: right after the hangup the handle still exists,
    // so in-flight callbacks observe a valid object.
    let session = fx.core.session(session_id).unwrap();
    assert!(session.handle(handle_id).is_some());
}

#[test]
fn info_lists_the_registered_plugins() {
    let fx = Fixture::new();
    fx.request(json!({"janus": "info", "transaction": "i"}));
    let info = fx.wait_for(|m| m["transaction"] == "i");
    assert_eq!(info["janus"], "server_info");
    assert_eq!(info["name"], "rtcgate");
    assert!(info["plugins"]["gate.plugin.echotest"].is_object());
}
