use super::session_description::{MediaSection, SessionDescription};
use crate::dtls::runtime::RemoteFingerprint;
use crate::ice::candidate::Candidate;
use std::collections::HashMap;

/// Media direction, from the SDP owner's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaDirection {
    #[default]
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

impl MediaDirection {
    fn from_section(section: &MediaSection) -> Self {
        if section.has_flag("inactive") {
            MediaDirection::Inactive
        } else if section.has_flag("sendonly") {
            MediaDirection::SendOnly
        } else if section.has_flag("recvonly") {
            MediaDirection::RecvOnly
        } else {
            MediaDirection::SendRecv
        }
    }
}

/// What the remote offers/answers for one media kind.
#[derive(Debug, Clone, Default)]
pub struct MediaInfo {
    pub payload_types: Vec<u8>,
    /// Primary (non-rtx) codec name, uppercase.
    pub codec: Option<String>,
    pub clock_rate: Option<u32>,
    pub direction: MediaDirection,
    /// Peer SSRCs in announcement order (up to three video simulcast layers).
    pub ssrcs: Vec<u32>,
    /// rtx SSRCs paired by ssrc-group:FID, same order as `ssrcs`.
    pub rtx_ssrcs: Vec<u32>,
    pub nack_enabled: bool,
    pub remb_enabled: bool,
    pub twcc_enabled: bool,
}

/// Everything the core extracts from a remote SDP before creating the agent.
#[derive(Debug, Clone, Default)]
pub struct WebRtcInfo {
    pub ufrag: Option<String>,
    pub pwd: Option<String>,
    pub fingerprint: Option<RemoteFingerprint>,
    /// Remote `a=setup` value.
    pub setup: Option<String>,
    pub trickle: bool,
    pub audio: Option<MediaInfo>,
    pub video: Option<MediaInfo>,
    pub data_channels: bool,
    /// extmap id to namespace URI.
    pub extmaps: HashMap<u8, String>,
    /// Simulcast rid identifiers, in offer order.
    pub rids: Vec<String>,
    /// rtx payload type to the base payload type it repairs (`a=fmtp apt=`).
    pub rtx_payload_types: HashMap<u8, u8>,
    /// Remote candidates already present in the SDP.
    pub candidates: Vec<Candidate>,
    pub end_of_candidates: bool,
}

/// Parse a remote SDP into the transport-level facts the core needs.
pub fn extract_webrtc_info(sdp: &SessionDescription) -> WebRtcInfo {
    let mut info = WebRtcInfo::default();

    for section in &sdp.media {
        if info.ufrag.is_none() {
            info.ufrag = sdp
                .attribute_anywhere(section, "ice-ufrag")
                .map(String::from);
        }
        if info.pwd.is_none() {
            info.pwd = sdp.attribute_anywhere(section, "ice-pwd").map(String::from);
        }
        if info.fingerprint.is_none()
            && let Some(fp) = sdp.attribute_anywhere(section, "fingerprint")
            && let Some((hashing, value)) = fp.split_once(' ')
        {
            info.fingerprint = Some(RemoteFingerprint {
                hashing: hashing.to_string(),
                fingerprint: value.to_string(),
            });
        }
        if info.setup.is_none() {
            info.setup = section.attribute("setup").map(String::from);
        }

        for options in section.attribute_values("ice-options") {
            if options.split_whitespace().any(|o| o == "trickle") {
                info.trickle = true;
            }
        }
        if let Some(options) = sdp.session_attribute("ice-options")
            && options.split_whitespace().any(|o| o == "trickle")
        {
            info.trickle = true;
        }

        for ext in section.attribute_values("extmap") {
            // "<id>[/direction] <uri>"
            if let Some((id_part, uri)) = ext.split_once(' ') {
                let id = id_part.split('/').next().and_then(|v| v.parse::<u8>().ok());
                if let Some(id) = id {
                    info.extmaps.insert(id, uri.trim().to_string());
                }
            }
        }

        for rid in section.attribute_values("rid") {
            // "<rid> recv ..." / "<rid> send ..."
            if let Some(name) = rid.split_whitespace().next()
                && !info.rids.contains(&name.to_string())
            {
                info.rids.push(name.to_string());
            }
        }

        for cand in section.attribute_values("candidate") {
            if let Ok(c) = Candidate::from_sdp_value(cand) {
                info.candidates.push(c);
            }
        }
        if section.has_flag("end-of-candidates") {
            info.end_of_candidates = true;
        }

        match section.media.as_str() {
            "application" => info.data_channels = true,
            "audio" | "video" => {
                let media_info = parse_media_section(section, &mut info.rtx_payload_types);
                if section.media == "audio" {
                    info.audio = Some(media_info);
                } else {
                    info.video = Some(media_info);
                }
            }
            _ => {}
        }
    }

    info
}

fn parse_media_section(
    section: &MediaSection,
    rtx_payload_types: &mut HashMap<u8, u8>,
) -> MediaInfo {
    let mut out = MediaInfo {
        payload_types: section
            .formats
            .iter()
            .filter_map(|f| f.parse().ok())
            .collect(),
        direction: MediaDirection::from_section(section),
        ..Default::default()
    };

    let mut rtx_pts = Vec::new();
    for rtpmap in section.attribute_values("rtpmap") {
        // "<pt> <codec>/<rate>[/<ch>]"
        let Some((pt, rest)) = rtpmap.split_once(' ') else {
            continue;
        };
        let Ok(pt) = pt.parse::<u8>() else { continue };
        let mut parts = rest.split('/');
        let codec = parts.next().unwrap_or_default();
        let rate = parts.next().and_then(|r| r.parse::<u32>().ok());
        if codec.eq_ignore_ascii_case("rtx") {
            rtx_pts.push(pt);
        } else if out.codec.is_none() {
            out.codec = Some(codec.to_ascii_uppercase());
            out.clock_rate = rate;
        }
    }

    for fmtp in section.attribute_values("fmtp") {
        // rtx pairing: "<rtx-pt> apt=<base-pt>"
        if let Some((pt, rest)) = fmtp.split_once(' ')
            && let Ok(pt) = pt.parse::<u8>()
            && rtx_pts.contains(&pt)
            && let Some(apt) = rest
                .split(';')
                .find_map(|kv| kv.trim().strip_prefix("apt="))
            && let Ok(apt) = apt.parse::<u8>()
        {
            rtx_payload_types.insert(pt, apt);
        }
    }

    for fb in section.attribute_values("rtcp-fb") {
        // "<pt|*> nack [pli]" / "<pt|*> goog-remb" / "<pt|*> transport-cc"
        let mut parts = fb.split_whitespace();
        let _pt = parts.next();
        match parts.next() {
            Some("nack") => {
                // plain nack only; "nack pli" is keyframe feedback
                if parts.next().is_none() {
                    out.nack_enabled = true;
                }
            }
            Some("goog-remb") => out.remb_enabled = true,
            Some("transport-cc") => out.twcc_enabled = true,
            _ => {}
        }
    }

    // SSRC layout: ssrc-group:FID pairs (base, rtx), ssrc-group:SIM order,
    // then any a=ssrc line not already seen.
    let mut sim_order: Vec<u32> = Vec::new();
    for group in section.attribute_values("ssrc-group") {
        let mut parts = group.split_whitespace();
        match parts.next() {
            Some("FID") => {
                let ids: Vec<u32> = parts.filter_map(|p| p.parse().ok()).collect();
                if ids.len() == 2 {
                    if !out.ssrcs.contains(&ids[0]) {
                        out.ssrcs.push(ids[0]);
                    }
                    out.rtx_ssrcs.push(ids[1]);
                }
            }
            Some("SIM") => {
                sim_order = parts.filter_map(|p| p.parse().ok()).collect();
            }
            _ => {}
        }
    }
    if !sim_order.is_empty() {
        // SIM fixes the layer order; keep FID rtx pairing aligned.
        let mut reordered_rtx = Vec::new();
        for ssrc in &sim_order {
            if let Some(pos) = out.ssrcs.iter().position(|s| s == ssrc) {
                if let Some(rtx) = out.rtx_ssrcs.get(pos) {
                    reordered_rtx.push(*rtx);
                }
            }
        }
        if !reordered_rtx.is_empty() {
            out.rtx_ssrcs = reordered_rtx;
        }
        out.ssrcs = sim_order;
    }
    for ssrc_line in section.attribute_values("ssrc") {
        if let Some(id) = ssrc_line.split_whitespace().next()
            && let Ok(id) = id.parse::<u32>()
            && !out.ssrcs.contains(&id)
            && !out.rtx_ssrcs.contains(&id)
        {
            out.ssrcs.push(id);
        }
    }
    out.ssrcs.truncate(3);

    out
}

/// Our transport attributes, applied onto a plugin-provided SDP before it is
/// sent to the client.
#[derive(Debug, Clone)]
pub struct TransportParams {
    pub ufrag: String,
    pub pwd: String,
    /// Local certificate fingerprint, e.g. "AA:BB:...".
    pub fingerprint: String,
    /// `a=setup` value we advertise.
    pub setup: String,
    pub candidates: Vec<Candidate>,
    /// Whether to close the gathering with `a=end-of-candidates`
    /// (half-trickle); full-trickle leaves it open.
    pub end_of_candidates: bool,
}

/// Replace/insert the transport-level attributes in every media section.
/// Everything else in the plugin's SDP is left alone.
pub fn apply_transport(sdp: &mut SessionDescription, params: &TransportParams) {
    for section in &mut sdp.media {
        for name in [
            "ice-ufrag",
            "ice-pwd",
            "ice-options",
            "fingerprint",
            "setup",
            "candidate",
            "end-of-candidates",
        ] {
            section.remove_attribute(name);
        }

        section.add_attribute("ice-ufrag", &params.ufrag);
        section.add_attribute("ice-pwd", &params.pwd);
        section.add_attribute("ice-options", "trickle");
        section.add_attribute("fingerprint", &format!("sha-256 {}", params.fingerprint));
        section.add_attribute("setup", &params.setup);
        if !section.has_flag("rtcp-mux") && section.media != "application" {
            section.add_flag("rtcp-mux");
        }
        for cand in &params.candidates {
            section.add_attribute("candidate", &cand.to_string());
        }
        if params.end_of_candidates {
            section.add_flag("end-of-candidates");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER: &str = "v=0\r\n\
o=- 20518 0 IN IP4 0.0.0.0\r\n\
s=-\r\n\
t=0 0\r\n\
a=group:BUNDLE 0 1 2\r\n\
a=ice-options:trickle\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
a=ice-ufrag:F7gI\r\n\
a=ice-pwd:x9cml/YzichV2+XlhiMu8g\r\n\
a=fingerprint:sha-256 D2:FA:0E:C3:22:59:5E:14:95:69:92:3D:13:B4:84:24:2C:C2:A2:C0:3E:FD:34:8E:5E:EA:6F:AF:52:CE:E6:0F\r\n\
a=setup:actpass\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=rtcp-fb:111 transport-cc\r\n\
a=extmap:1 urn:ietf:params:rtp-hdrext:ssrc-audio-level\r\n\
a=sendrecv\r\n\
a=ssrc:889900 cname:user1\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96 97\r\n\
a=rtpmap:96 VP8/90000\r\n\
a=rtpmap:97 rtx/90000\r\n\
a=fmtp:97 apt=96\r\n\
a=rtcp-fb:96 nack\r\n\
a=rtcp-fb:96 nack pli\r\n\
a=rtcp-fb:96 goog-remb\r\n\
a=extmap:3 http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01\r\n\
a=sendonly\r\n\
a=ssrc-group:FID 112233 445566\r\n\
a=ssrc:112233 cname:user1\r\n\
a=ssrc:445566 cname:user1\r\n\
m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n\
a=sctp-port:5000\r\n";

    #[test]
    fn extracts_transport_level_facts() {
        let sdp = SessionDescription::parse(OFFER).unwrap();
        let info = extract_webrtc_info(&sdp);
        assert_eq!(info.ufrag.as_deref(), Some("F7gI"));
        assert_eq!(info.pwd.as_deref(), Some("x9cml/YzichV2+XlhiMu8g"));
        let fp = info.fingerprint.as_ref().unwrap();
        assert_eq!(fp.hashing, "sha-256");
        assert!(fp.fingerprint.starts_with("D2:FA"));
        assert_eq!(info.setup.as_deref(), Some("actpass"));
        assert!(info.trickle);
        assert!(info.data_channels);
    }

    #[test]
    fn extracts_media_details() {
        let sdp = SessionDescription::parse(OFFER).unwrap();
        let info = extract_webrtc_info(&sdp);

        let audio = info.audio.unwrap();
        assert_eq!(audio.codec.as_deref(), Some("OPUS"));
        assert_eq!(audio.clock_rate, Some(48_000));
        assert!(audio.twcc_enabled);
        assert_eq!(audio.ssrcs, vec![889_900]);

        let video = info.video.unwrap();
        assert_eq!(video.codec.as_deref(), Some("VP8"));
        assert!(video.nack_enabled);
        assert!(video.remb_enabled);
        assert_eq!(video.direction, MediaDirection::SendOnly);
        assert_eq!(video.ssrcs, vec![112_233]);
        assert_eq!(video.rtx_ssrcs, vec![445_566]);

        assert_eq!(info.rtx_payload_types.get(&97), Some(&96));
        assert_eq!(
            info.extmaps.get(&1).map(String::as_str),
            Some("urn:ietf:params:rtp-hdrext:ssrc-audio-level")
        );
        assert_eq!(info.extmaps.get(&3).map(|s| s.contains("transport-wide-cc")), Some(true));
    }

    #[test]
    fn applies_our_transport_attributes() {
        let mut sdp = SessionDescription::parse(OFFER).unwrap();
        let params = TransportParams {
            ufrag: "abcd".into(),
            pwd: "0123456789abcdef012345".into(),
            fingerprint: "AA:BB".into(),
            setup: "active".into(),
            candidates: vec![Candidate::host("10.0.0.1:46000".parse().unwrap(), 1)],
            end_of_candidates: true,
        };
        apply_transport(&mut sdp, &params);

        let audio = sdp.section("audio").unwrap();
        assert_eq!(audio.attribute("ice-ufrag"), Some("abcd"));
        assert_eq!(audio.attribute("setup"), Some("active"));
        assert!(audio.attribute("candidate").is_some());
        assert!(audio.has_flag("end-of-candidates"));
        assert!(audio.has_flag("rtcp-mux"));
        // the old credentials are gone
        let rendered = sdp.to_sdp_string();
        assert!(!rendered.contains("F7gI"));

        // still parses as valid SDP
        let info = extract_webrtc_info(&SessionDescription::parse(&rendered).unwrap());
        assert_eq!(info.ufrag.as_deref(), Some("abcd"));
    }
}
