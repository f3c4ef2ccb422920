//! Echo test plugin: everything the peer sends comes straight back.
//!
//! The classic sanity-check use case. It exercises the whole media path
//! (RTP, RTCP, DataChannels) without understanding any of it, and shows the
//! minimal shape of a plugin: a per-session state struct, a JSON message
//! surface (`audio`/`video` mute toggles and a `bitrate` cap answered with a
//! REMB), and SDP answering by mirroring the offer.

use crate::plugin::{
    callbacks::GatewayCallbacks,
    jsep::{Jsep, JsepType},
    plugin::Plugin,
    plugin_session::PluginSession,
    result::PluginResult,
};
use crate::rtcp::{packet_type::RtcpPacketType, remb::Remb};
use crate::sdp::SessionDescription;
use serde_json::{Value, json};
use std::sync::{Arc, OnceLock};

#[derive(Debug, Clone)]
struct EchoState {
    audio_active: bool,
    video_active: bool,
    bitrate: u64,
}

pub struct EchoTestPlugin {
    callbacks: OnceLock<Arc<dyn GatewayCallbacks>>,
}

impl EchoTestPlugin {
    pub fn new() -> Self {
        Self {
            callbacks: OnceLock::new(),
        }
    }

    fn callbacks(&self) -> Option<&Arc<dyn GatewayCallbacks>> {
        self.callbacks.get()
    }

    /// The echo answer is the offer with the directions mirrored.
    fn answer_sdp(offer: &str) -> Option<String> {
        let mut sdp = SessionDescription::parse(offer).ok()?;
        for section in &mut sdp.media {
            let sendonly = section.has_flag("sendonly");
            let recvonly = section.has_flag("recvonly");
            section.remove_attribute("sendonly");
            section.remove_attribute("recvonly");
            if sendonly {
                section.add_flag("recvonly");
            } else if recvonly {
                section.add_flag("sendonly");
            }
        }
        Some(sdp.to_sdp_string())
    }
}

impl Default for EchoTestPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for EchoTestPlugin {
    fn init(
        &self,
        callbacks: Arc<dyn GatewayCallbacks>,
        _config_dir: Option<&str>,
    ) -> Result<(), String> {
        self.callbacks
            .set(callbacks)
            .map_err(|_| "echo test initialized twice".to_string())
    }

    fn destroy(&self) {}

    fn version(&self) -> u32 {
        7
    }
    fn version_string(&self) -> &'static str {
        "0.7.0"
    }
    fn description(&self) -> &'static str {
        "Echo test: sends media and data back to the peer that produced them"
    }
    fn name(&self) -> &'static str {
        "Echo test"
    }
    fn author(&self) -> &'static str {
        "rtcgate"
    }
    fn package(&self) -> &'static str {
        "gate.plugin.echotest"
    }

    fn create_session(&self, session: &Arc<PluginSession>) -> Result<(), i32> {
        session.set_data(EchoState {
            audio_active: true,
            video_active: true,
            bitrate: 0,
        });
        Ok(())
    }

    fn handle_message(
        &self,
        session: &Arc<PluginSession>,
        transaction: &str,
        message: Value,
        jsep: Option<Jsep>,
    ) -> PluginResult {
        if !session.is_alive() {
            return PluginResult::error("session is gone");
        }

        let mut new_bitrate = None;
        session.with_data(|state: &mut EchoState| {
            if let Some(audio) = message.get("audio").and_then(Value::as_bool) {
                state.audio_active = audio;
            }
            if let Some(video) = message.get("video").and_then(Value::as_bool) {
                state.video_active = video;
            }
            if let Some(bitrate) = message.get("bitrate").and_then(Value::as_u64) {
                state.bitrate = bitrate;
                new_bitrate = Some(bitrate);
            }
        });

        let Some(callbacks) = self.callbacks() else {
            return PluginResult::error("plugin not initialized");
        };

        // A bitrate cap is enforced by telling the sender through a REMB.
        if let Some(bitrate) = new_bitrate
            && bitrate > 0
        {
            let remb = Remb::new(0, bitrate, vec![]);
            let mut buf = Vec::new();
            if remb.encode_into(&mut buf).is_ok() {
                callbacks.relay_rtcp(session, true, &buf);
            }
        }

        // Mirror an offer into an answer; the core fills in the transport.
        let answer = jsep.and_then(|j| match j.kind {
            JsepType::Offer => Self::answer_sdp(&j.sdp).map(Jsep::answer),
            JsepType::Answer => None,
        });

        let event = json!({
            "echotest": "event",
            "result": "ok"
        });
        callbacks.push_event(session, self.package(), Some(transaction), event, answer);
        PluginResult::ok_wait("processing")
    }

    fn query_session(&self, session: &Arc<PluginSession>) -> Value {
        session
            .with_data(|state: &mut EchoState| {
                json!({
                    "audio_active": state.audio_active,
                    "video_active": state.video_active,
                    "bitrate": state.bitrate,
                })
            })
            .unwrap_or(Value::Null)
    }

    fn destroy_session(&self, session: &Arc<PluginSession>) -> Result<(), i32> {
        session.clear_data();
        Ok(())
    }

    fn setup_media(&self, _session: &Arc<PluginSession>) {}

    fn incoming_rtp(&self, session: &Arc<PluginSession>, video: bool, buf: &[u8]) {
        if !session.is_alive() {
            return;
        }
        let active = session
            .with_data(|state: &mut EchoState| {
                if video {
                    state.video_active
                } else {
                    state.audio_active
                }
            })
            .unwrap_or(false);
        if active && let Some(callbacks) = self.callbacks() {
            callbacks.relay_rtp(session, video, buf);
        }
    }

    fn incoming_rtcp(&self, session: &Arc<PluginSession>, video: bool, buf: &[u8]) {
        if session.is_alive()
            && let Some(callbacks) = self.callbacks()
        {
            callbacks.relay_rtcp(session, video, buf);
        }
    }

    fn incoming_data(&self, session: &Arc<PluginSession>, buf: &[u8]) {
        if session.is_alive()
            && let Some(callbacks) = self.callbacks()
        {
            callbacks.relay_data(session, buf);
        }
    }

    fn slow_link(&self, session: &Arc<PluginSession>, uplink: bool, video: bool) {
        if let Some(callbacks) = self.callbacks() {
            let event = json!({
                "echotest": "event",
                "result": {
                    "status": "slow_link",
                    "uplink": uplink,
                    "media": if video { "video" } else { "audio" },
                }
            });
            callbacks.push_event(session, self.package(), None, event, None);
        }
    }

    fn hangup_media(&self, session: &Arc<PluginSession>) {
        session.with_data(|state: &mut EchoState| {
            state.bitrate = 0;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answer_mirrors_directions() {
        let offer = "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\ns=-\r\nt=0 0\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=sendonly\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96\r\na=recvonly\r\n";
        let answer = EchoTestPlugin::answer_sdp(offer).unwrap();
        let sdp = SessionDescription::parse(&answer).unwrap();
        assert!(sdp.section("audio").unwrap().has_flag("recvonly"));
        assert!(sdp.section("video").unwrap().has_flag("sendonly"));
    }
}
