use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSEP type carried alongside a signaling message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsepType {
    Offer,
    Answer,
}

/// A JSEP payload: type + SDP, plus the renegotiation flags. Plugins set
/// `restart` to force an ICE restart; the core sets `update` when the remote
/// is renegotiating an existing PeerConnection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jsep {
    #[serde(rename = "type")]
    pub kind: JsepType,
    pub sdp: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub restart: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub update: bool,
}

impl Jsep {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: JsepType::Offer,
            sdp: sdp.into(),
            restart: false,
            update: false,
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: JsepType::Answer,
            sdp: sdp.into(),
            restart: false,
            update: false,
        }
    }

    pub fn from_value(v: &Value) -> Option<Self> {
        serde_json::from_value(v.clone()).ok()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("jsep always serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips_through_json() {
        let jsep = Jsep::offer("v=0\r\n");
        let v = jsep.to_value();
        assert_eq!(v["type"], "offer");
        assert_eq!(v.get("restart"), None);

        let back = Jsep::from_value(&v).unwrap();
        assert_eq!(back.kind, JsepType::Offer);
        assert_eq!(back.sdp, "v=0\r\n");
    }

    #[test]
    fn restart_flag_survives() {
        let v = json!({"type": "answer", "sdp": "v=0", "restart": true});
        let jsep = Jsep::from_value(&v).unwrap();
        assert!(jsep.restart);
        assert_eq!(jsep.to_value()["restart"], json!(true));
    }
}
