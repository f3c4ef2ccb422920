//! RFC 5285 header-extension parsing.
//!
//! Supports the one-byte-header (profile 0xBEDE) and two-byte-header
//! (profile 0x1000-0x100F) element formats, plus typed accessors for the
//! extension namespaces the gateway recognizes. All accessors are
//! best-effort: a malformed element yields `None` and the packet still
//! relays.

use super::rtp_header::RtpHeaderExtension;

pub const ONE_BYTE_PROFILE: u16 = 0xBEDE;
pub const TWO_BYTE_PROFILE_BASE: u16 = 0x1000;

/// One element of an extension block: negotiated id plus raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionElement<'a> {
    pub id: u8,
    pub data: &'a [u8],
}

/// ssrc-audio-level (RFC 6464): voice-activity flag plus level in -dBov
/// (0 = loudest, 127 = silence).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioLevel {
    pub vad: bool,
    pub level: u8,
}

/// urn:3gpp:video-orientation C/F/R1/R0 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoOrientation {
    pub camera: bool,
    pub flip: bool,
    pub rotation_r1: bool,
    pub rotation_r0: bool,
}

/// playout-delay: min/max in 10 ms units, 12 bits each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayoutDelay {
    pub min_delay: u16,
    pub max_delay: u16,
}

/// Iterates the elements of an extension block. Unknown ids are yielded
/// as raw bytes; padding and malformed tails are skipped silently.
pub fn elements(ext: &RtpHeaderExtension) -> Vec<ExtensionElement<'_>> {
    let mut out = Vec::new();
    let data = &ext.data[..];

    if ext.profile == ONE_BYTE_PROFILE {
        let mut idx = 0usize;
        while idx < data.len() {
            let b = data[idx];
            if b == 0 {
                // padding
                idx += 1;
                continue;
            }
            let id = b >> 4;
            let len = (b & 0x0F) as usize + 1;
            if id == 15 {
                // reserved: stop processing
                break;
            }
            idx += 1;
            if idx + len > data.len() {
                break;
            }
            out.push(ExtensionElement {
                id,
                data: &data[idx..idx + len],
            });
            idx += len;
        }
    } else if ext.profile & 0xFFF0 == TWO_BYTE_PROFILE_BASE {
        let mut idx = 0usize;
        while idx + 2 <= data.len() {
            let id = data[idx];
            if id == 0 {
                idx += 1;
                continue;
            }
            let len = data[idx + 1] as usize;
            idx += 2;
            if idx + len > data.len() {
                break;
            }
            out.push(ExtensionElement {
                id,
                data: &data[idx..idx + len],
            });
            idx += len;
        }
    }

    out
}

fn find<'a>(ext: &'a RtpHeaderExtension, id: u8) -> Option<&'a [u8]> {
    if id == 0 {
        return None;
    }
    elements(ext).into_iter().find(|e| e.id == id).map(|e| e.data)
}

/// ssrc-audio-level: 1 byte, high bit = voice activity, low 7 = -dBov level.
pub fn parse_audio_level(ext: &RtpHeaderExtension, id: u8) -> Option<AudioLevel> {
    let data = find(ext, id)?;
    let b = *data.first()?;
    Some(AudioLevel {
        vad: b & 0x80 != 0,
        level: b & 0x7F,
    })
}

/// toffset: 24-bit transmission offset in RTP clock units.
pub fn parse_toffset(ext: &RtpHeaderExtension, id: u8) -> Option<u32> {
    let data = find(ext, id)?;
    if data.len() < 3 {
        return None;
    }
    Some(u32::from(data[0]) << 16 | u32::from(data[1]) << 8 | u32::from(data[2]))
}

/// abs-send-time: 24-bit 6.18 fixed-point seconds.
pub fn parse_abs_send_time(ext: &RtpHeaderExtension, id: u8) -> Option<u32> {
    let data = find(ext, id)?;
    if data.len() < 3 {
        return None;
    }
    Some(u32::from(data[0]) << 16 | u32::from(data[1]) << 8 | u32::from(data[2]))
}

/// urn:3gpp:video-orientation: single byte with C/F/R1/R0 in the low nibble.
pub fn parse_video_orientation(ext: &RtpHeaderExtension, id: u8) -> Option<VideoOrientation> {
    let data = find(ext, id)?;
    let b = *data.first()?;
    Some(VideoOrientation {
        camera: b & 0x08 != 0,
        flip: b & 0x04 != 0,
        rotation_r1: b & 0x02 != 0,
        rotation_r0: b & 0x01 != 0,
    })
}

/// transport-wide-cc: 16-bit transport-wide sequence number.
pub fn parse_transport_wide_cc(ext: &RtpHeaderExtension, id: u8) -> Option<u16> {
    let data = find(ext, id)?;
    if data.len() < 2 {
        return None;
    }
    Some(u16::from(data[0]) << 8 | u16::from(data[1]))
}

/// playout-delay: two 12-bit fields packed into 3 bytes.
pub fn parse_playout_delay(ext: &RtpHeaderExtension, id: u8) -> Option<PlayoutDelay> {
    let data = find(ext, id)?;
    if data.len() < 3 {
        return None;
    }
    let min_delay = u16::from(data[0]) << 4 | u16::from(data[1]) >> 4;
    let max_delay = (u16::from(data[1]) & 0x0F) << 8 | u16::from(data[2]);
    Some(PlayoutDelay {
        min_delay,
        max_delay,
    })
}

/// rtp-stream-id: variable-length ASCII identifier.
pub fn parse_rtp_stream_id(ext: &RtpHeaderExtension, id: u8) -> Option<String> {
    let data = find(ext, id)?;
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    let rid = std::str::from_utf8(&data[..end]).ok()?;
    if rid.is_empty() {
        return None;
    }
    Some(rid.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_byte(data: Vec<u8>) -> RtpHeaderExtension {
        RtpHeaderExtension::new(ONE_BYTE_PROFILE, data)
    }

    #[test]
    fn iterates_one_byte_elements() {
        // id=1 len=1 (audio level), padding, id=3 len=2 (twcc)
        let ext = one_byte(vec![0x10, 0x85, 0x00, 0x31, 0x01, 0x02, 0x00, 0x00]);
        let els = elements(&ext);
        assert_eq!(els.len(), 2);
        assert_eq!(els[0].id, 1);
        assert_eq!(els[0].data, &[0x85]);
        assert_eq!(els[1].id, 3);
        assert_eq!(els[1].data, &[0x01, 0x02]);
    }

    #[test]
    fn iterates_two_byte_elements() {
        let ext = RtpHeaderExtension::new(0x1000, vec![5, 3, b'h', b'i', b'!', 0, 0, 0]);
        let els = elements(&ext);
        assert_eq!(els.len(), 1);
        assert_eq!(els[0].id, 5);
        assert_eq!(els[0].data, b"hi!");
    }

    #[test]
    fn audio_level_has_vad_and_level() {
        let ext = one_byte(vec![0x10, 0x85, 0x00, 0x00]);
        let al = parse_audio_level(&ext, 1).unwrap();
        assert!(al.vad);
        assert_eq!(al.level, 5);
        assert!(parse_audio_level(&ext, 2).is_none());
    }

    #[test]
    fn transport_wide_cc_sequence() {
        let ext = one_byte(vec![0x31, 0x01, 0x02, 0x00]);
        assert_eq!(parse_transport_wide_cc(&ext, 3), Some(0x0102));
    }

    #[test]
    fn playout_delay_unpacks_two_twelve_bit_fields() {
        // min = 0x123, max = 0x456 -> bytes 0x12 0x34 0x56
        let ext = one_byte(vec![0x42, 0x12, 0x34, 0x56, 0x00, 0x00, 0x00, 0x00]);
        let pd = parse_playout_delay(&ext, 4).unwrap();
        assert_eq!(pd.min_delay, 0x123);
        assert_eq!(pd.max_delay, 0x456);
    }

    #[test]
    fn rid_is_ascii_string() {
        let ext = one_byte(vec![0x61, b'h', b'i', 0x00]);
        assert_eq!(parse_rtp_stream_id(&ext, 6), Some("hi".to_string()));
    }

    #[test]
    fn video_orientation_bits() {
        let ext = one_byte(vec![0x20, 0x0B, 0x00, 0x00]);
        let vo = parse_video_orientation(&ext, 2).unwrap();
        assert!(vo.camera);
        assert!(!vo.flip);
        assert!(vo.rotation_r1);
        assert!(vo.rotation_r0);
    }

    #[test]
    fn truncated_element_is_none_not_error() {
        // claims len 2 but only 1 byte follows
        let ext = one_byte(vec![0x31, 0x01]);
        assert!(parse_transport_wide_cc(&ext, 3).is_none());
    }
}
