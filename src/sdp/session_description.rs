use super::sdp_error::SdpError;

/// One `m=` section with its attribute lines, kept in original order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSection {
    /// Media type token: "audio", "video", "application".
    pub media: String,
    pub port: u16,
    pub proto: String,
    /// Format list (payload types, or "webrtc-datachannel").
    pub formats: Vec<String>,
    /// All lines following the m-line, verbatim (without CRLF).
    pub lines: Vec<String>,
}

impl MediaSection {
    /// Values of every `a=<name>:` attribute in this section.
    pub fn attribute_values<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> {
        let prefix = format!("a={name}:");
        self.lines.iter().filter_map(move |l| {
            l.strip_prefix(prefix.as_str())
        })
    }

    /// First value of an `a=<name>:` attribute.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attribute_values(name).next()
    }

    /// Whether a flag attribute (`a=<name>` with no value) is present.
    pub fn has_flag(&self, name: &str) -> bool {
        let flag = format!("a={name}");
        self.lines.iter().any(|l| *l == flag)
    }

    pub fn add_attribute(&mut self, name: &str, value: &str) {
        self.lines.push(format!("a={name}:{value}"));
    }

    pub fn add_flag(&mut self, name: &str) {
        self.lines.push(format!("a={name}"));
    }

    /// Drop every `a=<name>` / `a=<name>:...` line.
    pub fn remove_attribute(&mut self, name: &str) {
        let flag = format!("a={name}");
        let prefix = format!("a={name}:");
        self.lines
            .retain(|l| *l != flag && !l.starts_with(prefix.as_str()));
    }
}

/// A parsed SDP: the session-level lines plus the media sections, preserving
/// everything we do not understand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    /// Lines before the first m-line, verbatim.
    pub session_lines: Vec<String>,
    pub media: Vec<MediaSection>,
}

impl SessionDescription {
    pub fn parse(raw: &str) -> Result<Self, SdpError> {
        let mut lines = raw
            .lines()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.is_empty());

        let first = lines.next().ok_or(SdpError::Empty)?;
        if !first.starts_with("v=") {
            return Err(SdpError::MissingVersion);
        }

        let mut session_lines = vec![first.to_string()];
        let mut media: Vec<MediaSection> = Vec::new();

        for line in lines {
            if let Some(mline) = line.strip_prefix("m=") {
                let fields: Vec<&str> = mline.split_whitespace().collect();
                if fields.len() < 3 {
                    return Err(SdpError::BadMLine(line.to_string()));
                }
                let port = fields[1].parse().unwrap_or(9);
                media.push(MediaSection {
                    media: fields[0].to_string(),
                    port,
                    proto: fields[2].to_string(),
                    formats: fields[3..].iter().map(|s| s.to_string()).collect(),
                    lines: Vec::new(),
                });
            } else if let Some(section) = media.last_mut() {
                section.lines.push(line.to_string());
            } else {
                session_lines.push(line.to_string());
            }
        }

        Ok(Self {
            session_lines,
            media,
        })
    }

    /// Session-level attribute lookup (`a=<name>:` before any m-line).
    pub fn session_attribute(&self, name: &str) -> Option<&str> {
        let prefix = format!("a={name}:");
        self.session_lines
            .iter()
            .find_map(|l| l.strip_prefix(prefix.as_str()))
    }

    /// Attribute lookup trying the media section first, then session level
    /// (ufrag/pwd/fingerprint may live at either).
    pub fn attribute_anywhere<'a>(&'a self, section: &'a MediaSection, name: &str) -> Option<&'a str> {
        section.attribute(name).or_else(|| self.session_attribute(name))
    }

    pub fn section(&self, media: &str) -> Option<&MediaSection> {
        self.media.iter().find(|m| m.media == media)
    }

    pub fn section_mut(&mut self, media: &str) -> Option<&mut MediaSection> {
        self.media.iter_mut().find(|m| m.media == media)
    }

    /// Serialize with CRLF line endings.
    pub fn to_sdp_string(&self) -> String {
        let mut out = String::new();
        for line in &self.session_lines {
            out.push_str(line);
            out.push_str("\r\n");
        }
        for m in &self.media {
            out.push_str(&format!(
                "m={} {} {} {}\r\n",
                m.media,
                m.port,
                m.proto,
                m.formats.join(" ")
            ));
            for line in &m.lines {
                out.push_str(line);
                out.push_str("\r\n");
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "v=0\r\n\
o=- 1 1 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
a=group:BUNDLE 0 1\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
c=IN IP4 0.0.0.0\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=sendrecv\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96 97\r\n\
a=rtpmap:96 VP8/90000\r\n\
a=rtpmap:97 rtx/90000\r\n\
a=fmtp:97 apt=96\r\n";

    #[test]
    fn parses_sections() {
        let sdp = SessionDescription::parse(SAMPLE).unwrap();
        assert_eq!(sdp.session_lines.len(), 5);
        assert_eq!(sdp.media.len(), 2);
        assert_eq!(sdp.media[0].media, "audio");
        assert_eq!(sdp.media[1].formats, vec!["96", "97"]);
        assert_eq!(sdp.session_attribute("group"), Some("BUNDLE 0 1"));
    }

    #[test]
    fn attribute_helpers() {
        let sdp = SessionDescription::parse(SAMPLE).unwrap();
        let video = sdp.section("video").unwrap();
        assert_eq!(video.attribute("rtpmap"), Some("96 VP8/90000"));
        let rtpmaps: Vec<&str> = video.attribute_values("rtpmap").collect();
        assert_eq!(rtpmaps.len(), 2);
        let audio = sdp.section("audio").unwrap();
        assert!(audio.has_flag("sendrecv"));
    }

    #[test]
    fn serialization_round_trips() {
        let sdp = SessionDescription::parse(SAMPLE).unwrap();
        let again = SessionDescription::parse(&sdp.to_sdp_string()).unwrap();
        assert_eq!(sdp, again);
    }

    #[test]
    fn rejects_non_sdp() {
        assert!(SessionDescription::parse("hello world").is_err());
        assert!(SessionDescription::parse("").is_err());
    }
}
