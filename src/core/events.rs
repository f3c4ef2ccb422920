//! Events the core pushes to clients (through their transport) and to the
//! optional event-handler fan-out.

use serde_json::{Value, json};

/// An event addressed to the client owning a session.
#[derive(Debug, Clone)]
pub struct ClientEvent {
    pub session_id: u64,
    pub body: Value,
}

/// `webrtcup`: the PeerConnection for a handle is up.
pub fn webrtc_up(session_id: u64, handle_id: u64) -> ClientEvent {
    ClientEvent {
        session_id,
        body: json!({
            "janus": "webrtcup",
            "session_id": session_id,
            "sender": handle_id,
        }),
    }
}

/// `media`: media of a kind started or stopped flowing.
pub fn media_event(session_id: u64, handle_id: u64, video: bool, receiving: bool) -> ClientEvent {
    ClientEvent {
        session_id,
        body: json!({
            "janus": "media",
            "session_id": session_id,
            "sender": handle_id,
            "type": if video { "video" } else { "audio" },
            "receiving": receiving,
        }),
    }
}

/// `slowlink`: too many NACKs within the last second on this path.
pub fn slow_link_event(
    session_id: u64,
    handle_id: u64,
    uplink: bool,
    video: bool,
    nacks: u32,
) -> ClientEvent {
    ClientEvent {
        session_id,
        body: json!({
            "janus": "slowlink",
            "session_id": session_id,
            "sender": handle_id,
            "uplink": uplink,
            "media": if video { "video" } else { "audio" },
            "nacks": nacks,
        }),
    }
}

/// `hangup`: the PeerConnection was torn down.
pub fn hangup_event(session_id: u64, handle_id: u64, reason: &str) -> ClientEvent {
    ClientEvent {
        session_id,
        body: json!({
            "janus": "hangup",
            "session_id": session_id,
            "sender": handle_id,
            "reason": reason,
        }),
    }
}

/// A plugin event, optionally with a JSEP payload.
pub fn plugin_event(
    session_id: u64,
    handle_id: u64,
    transaction: Option<&str>,
    plugin_package: &str,
    data: Value,
    jsep: Option<Value>,
) -> ClientEvent {
    let mut body = json!({
        "janus": "event",
        "session_id": session_id,
        "sender": handle_id,
        "plugindata": {
            "plugin": plugin_package,
            "data": data,
        }
    });
    if let Some(t) = transaction {
        body["transaction"] = json!(t);
    }
    if let Some(jsep) = jsep {
        body["jsep"] = jsep;
    }
    ClientEvent { session_id, body }
}

/// Receiver of the optional telemetry fan-out (`notify_event`).
pub trait EventHandler: Send + Sync {
    fn handle_event(&self, event: Value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugin_event_shape() {
        let ev = plugin_event(
            1,
            2,
            Some("tx"),
            "gate.plugin.echotest",
            json!({"echotest": "event"}),
            Some(json!({"type": "answer", "sdp": "v=0"})),
        );
        assert_eq!(ev.body["janus"], "event");
        assert_eq!(ev.body["sender"], 2);
        assert_eq!(ev.body["plugindata"]["plugin"], "gate.plugin.echotest");
        assert_eq!(ev.body["jsep"]["type"], "answer");
    }

    #[test]
    fn hangup_carries_reason() {
        let ev = hangup_event(1, 2, "dtls-alert");
        assert_eq!(ev.body["janus"], "hangup");
        assert_eq!(ev.body["reason"], "dtls-alert");
    }
}
