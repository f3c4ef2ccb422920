//! Per-codec keyframe detection on raw RTP payloads.
//!
//! The gateway never decodes media, but simulcast layer switching and PLI
//! handling need to know where a decodable point starts. The negotiated
//! video codec selects one of these detectors at SDP time.

/// Signature of a keyframe detector over an RTP payload.
pub type KeyframeDetector = fn(&[u8]) -> bool;

/// Pick the detector matching a negotiated codec name, if we know it.
pub fn detector_for(codec: &str) -> Option<KeyframeDetector> {
    match codec.to_ascii_uppercase().as_str() {
        "VP8" => Some(vp8_is_keyframe),
        "VP9" => Some(vp9_is_keyframe),
        "H264" => Some(h264_is_keyframe),
        _ => None,
    }
}

/// VP8 (RFC 7741): skip the payload descriptor, then check the P bit of the
/// first payload octet (0 = keyframe).
pub fn vp8_is_keyframe(payload: &[u8]) -> bool {
    let mut idx = 0usize;
    let Some(&b0) = payload.first() else {
        return false;
    };
    idx += 1;
    if b0 & 0x80 != 0 {
        // X bit: extended control bits present
        let Some(&b1) = payload.get(idx) else {
            return false;
        };
        idx += 1;
        if b1 & 0x80 != 0 {
            // I bit: PictureID, one or two bytes
            let Some(&pid) = payload.get(idx) else {
                return false;
            };
            idx += if pid & 0x80 != 0 { 2 } else { 1 };
        }
        if b1 & 0x40 != 0 {
            // L bit: TL0PICIDX
            idx += 1;
        }
        if b1 & 0x30 != 0 {
            // T or K bit: TID/KEYIDX
            idx += 1;
        }
    }
    // Only the first partition of a frame carries the frame header.
    if b0 & 0x10 == 0 || b0 & 0x07 != 0 {
        return false;
    }
    payload.get(idx).is_some_and(|&first| first & 0x01 == 0)
}

/// VP9 (draft payload format): P bit clear and B bit set marks the start of
/// a keyframe.
pub fn vp9_is_keyframe(payload: &[u8]) -> bool {
    let Some(&b0) = payload.first() else {
        return false;
    };
    b0 & 0x40 == 0 && b0 & 0x08 != 0
}

/// H.264 (RFC 6184): IDR or SPS NAL units, directly, inside a STAP-A
/// aggregate, or as the start of an FU-A fragment.
pub fn h264_is_keyframe(payload: &[u8]) -> bool {
    let Some(&b0) = payload.first() else {
        return false;
    };
    match b0 & 0x1F {
        5 | 7 => true, // IDR slice / SPS
        24 => {
            // STAP-A: [len16][nal]...
            let mut idx = 1usize;
            while idx + 2 < payload.len() {
                let size = usize::from(payload[idx]) << 8 | usize::from(payload[idx + 1]);
                idx += 2;
                if idx >= payload.len() {
                    break;
                }
                match payload[idx] & 0x1F {
                    5 | 7 => return true,
                    _ => {}
                }
                idx += size;
            }
            false
        }
        28 => {
            // FU-A: start fragment of an IDR
            payload
                .get(1)
                .is_some_and(|&fu| fu & 0x80 != 0 && fu & 0x1F == 5)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vp8_keyframe_and_interframe() {
        // S=1, PartID=0, no X -> payload starts at byte 1
        assert!(vp8_is_keyframe(&[0x10, 0x00, 0x00]));
        assert!(!vp8_is_keyframe(&[0x10, 0x01, 0x00]));
        // not the first partition
        assert!(!vp8_is_keyframe(&[0x00, 0x00, 0x00]));
    }

    #[test]
    fn vp8_skips_extended_descriptor() {
        // X=1 S=1, then I with two-byte picture id
        let payload = [0x90, 0x80, 0x81, 0x23, 0x00];
        assert!(vp8_is_keyframe(&payload));
    }

    #[test]
    fn vp9_start_of_keyframe() {
        assert!(vp9_is_keyframe(&[0x08]));
        assert!(!vp9_is_keyframe(&[0x48])); // P set
        assert!(!vp9_is_keyframe(&[0x00])); // B clear
    }

    #[test]
    fn h264_idr_sps_stap_and_fua() {
        assert!(h264_is_keyframe(&[0x65])); // IDR
        assert!(h264_is_keyframe(&[0x67])); // SPS
        assert!(!h264_is_keyframe(&[0x61])); // non-IDR slice
        // STAP-A carrying an SPS
        assert!(h264_is_keyframe(&[0x78, 0x00, 0x02, 0x67, 0x42]));
        // FU-A start of IDR
        assert!(h264_is_keyframe(&[0x7C, 0x85]));
        // FU-A continuation of IDR
        assert!(!h264_is_keyframe(&[0x7C, 0x05]));
    }

    #[test]
    fn detector_lookup_is_case_insensitive() {
        assert!(detector_for("vp8").is_some());
        assert!(detector_for("H264").is_some());
        assert!(detector_for("av1").is_none());
    }
}
