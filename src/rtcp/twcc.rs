use super::{
    common_header::{CommonHeader, finish_packet},
    packet_type::{PT_RTPFB, RTPFB_FMT_TWCC, RtcpPacketType},
    rtcp::RtcpPacket,
    rtcp_error::RtcpError,
};

/// Transport-wide congestion control feedback (RTPFB, FMT=15,
/// draft-holmer-rmcat-transport-wide-cc-extensions-01).
///
/// The gateway only generates this feedback (the browser runs the actual
/// bandwidth estimator), but decoding is implemented too so inbound feedback
/// can be relayed to plugins in parsed form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwccFeedback {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub base_seq: u16,
    /// 24-bit reference time in 64 ms units.
    pub reference_time: u32,
    pub fb_pkt_count: u8,
    /// One entry per transport-wide sequence number starting at `base_seq`:
    /// arrival offset from the reference time in microseconds, or `None` for
    /// packets not received.
    pub packets: Vec<Option<i64>>,
}

const STATUS_NOT_RECEIVED: u8 = 0;
const STATUS_SMALL_DELTA: u8 = 1;
const STATUS_LARGE_DELTA: u8 = 2;

/// Delta resolution: 0.25 ms.
const DELTA_UNIT_US: i64 = 250;
/// Reference time resolution: 64 ms.
const REF_UNIT_US: i64 = 64_000;

impl TwccFeedback {
    /// Build feedback from a run of received packets.
    ///
    /// `arrivals` maps each transport-wide sequence number from `base_seq`
    /// onward to its arrival time in microseconds (monotonic); `None` marks a
    /// packet never seen.
    pub fn from_arrivals(
        sender_ssrc: u32,
        media_ssrc: u32,
        base_seq: u16,
        fb_pkt_count: u8,
        arrivals: &[Option<i64>],
    ) -> Self {
        let first = arrivals.iter().flatten().next().copied().unwrap_or(0);
        let reference_time = ((first / REF_UNIT_US) & 0x00FF_FFFF) as u32;
        let ref_us = i64::from(reference_time) * REF_UNIT_US;
        let packets = arrivals
            .iter()
            .map(|a| a.map(|t| t - ref_us))
            .collect();
        Self {
            sender_ssrc,
            media_ssrc,
            base_seq,
            reference_time,
            fb_pkt_count,
            packets,
        }
    }

    fn statuses_and_deltas(&self) -> (Vec<u8>, Vec<i64>) {
        let mut statuses = Vec::with_capacity(self.packets.len());
        let mut deltas = Vec::new();
        let mut prev_us = 0i64; // relative to reference time
        for p in &self.packets {
            match p {
                None => statuses.push(STATUS_NOT_RECEIVED),
                Some(arrival) => {
                    let delta = (arrival - prev_us) / DELTA_UNIT_US;
                    prev_us += delta * DELTA_UNIT_US;
                    if (0..=255).contains(&delta) {
                        statuses.push(STATUS_SMALL_DELTA);
                    } else {
                        statuses.push(STATUS_LARGE_DELTA);
                    }
                    deltas.push(delta);
                }
            }
        }
        (statuses, deltas)
    }
}

impl RtcpPacketType for TwccFeedback {
    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), RtcpError> {
        let start = out.len();
        CommonHeader::new(RTPFB_FMT_TWCC, PT_RTPFB, false).encode_into(out);
        out.extend_from_slice(&self.sender_ssrc.to_be_bytes());
        out.extend_from_slice(&self.media_ssrc.to_be_bytes());
        out.extend_from_slice(&self.base_seq.to_be_bytes());
        out.extend_from_slice(&(self.packets.len() as u16).to_be_bytes());
        out.push(((self.reference_time >> 16) & 0xFF) as u8);
        out.push(((self.reference_time >> 8) & 0xFF) as u8);
        out.push((self.reference_time & 0xFF) as u8);
        out.push(self.fb_pkt_count);

        let (statuses, deltas) = self.statuses_and_deltas();

        // Packet status chunks. A uniform run of 8+ becomes a run-length
        // chunk; anything else goes into two-bit status vectors (7 symbols).
        let mut idx = 0usize;
        while idx < statuses.len() {
            let status = statuses[idx];
            let mut run = 1usize;
            while idx + run < statuses.len() && statuses[idx + run] == status && run < 0x1FFF {
                run += 1;
            }
            if run >= 8 {
                let chunk: u16 = (u16::from(status) << 13) | run as u16;
                out.extend_from_slice(&chunk.to_be_bytes());
                idx += run;
            } else {
                let mut chunk: u16 = 0b1100_0000_0000_0000; // vector, 2-bit symbols
                for i in 0..7 {
                    let sym = statuses.get(idx + i).copied().unwrap_or(STATUS_NOT_RECEIVED);
                    chunk |= u16::from(sym) << (12 - 2 * i);
                }
                out.extend_from_slice(&chunk.to_be_bytes());
                idx += 7;
            }
        }

        // Receive deltas.
        for delta in deltas {
            if (0..=255).contains(&delta) {
                out.push(delta as u8);
            } else {
                let clamped = delta.clamp(i64::from(i16::MIN), i64::from(i16::MAX)) as i16;
                out.extend_from_slice(&clamped.to_be_bytes());
            }
        }

        finish_packet(out, start);
        Ok(())
    }

    fn decode(hdr: &CommonHeader, payload: &[u8]) -> Result<RtcpPacket, RtcpError> {
        if hdr.rc_or_fmt() != RTPFB_FMT_TWCC {
            return Err(RtcpError::Invalid);
        }
        if payload.len() < 16 {
            return Err(RtcpError::TooShort);
        }
        let sender_ssrc = u32::from_be_bytes(payload[0..4].try_into().unwrap());
        let media_ssrc = u32::from_be_bytes(payload[4..8].try_into().unwrap());
        let base_seq = u16::from_be_bytes(payload[8..10].try_into().unwrap());
        let status_count = u16::from_be_bytes(payload[10..12].try_into().unwrap()) as usize;
        let reference_time =
            (u32::from(payload[12]) << 16) | (u32::from(payload[13]) << 8) | u32::from(payload[14]);
        let fb_pkt_count = payload[15];

        // Status chunks
        let mut statuses: Vec<u8> = Vec::with_capacity(status_count);
        let mut idx = 16usize;
        while statuses.len() < status_count {
            if payload.len() < idx + 2 {
                return Err(RtcpError::Truncated);
            }
            let chunk = u16::from_be_bytes(payload[idx..idx + 2].try_into().unwrap());
            idx += 2;
            if chunk & 0x8000 == 0 {
                // run-length chunk
                let status = ((chunk >> 13) & 0x3) as u8;
                let run = (chunk & 0x1FFF) as usize;
                for _ in 0..run.min(status_count - statuses.len()) {
                    statuses.push(status);
                }
            } else if chunk & 0x4000 != 0 {
                // two-bit vector
                for i in 0..7 {
                    if statuses.len() >= status_count {
                        break;
                    }
                    statuses.push(((chunk >> (12 - 2 * i)) & 0x3) as u8);
                }
            } else {
                // one-bit vector: received-small / not received
                for i in 0..14 {
                    if statuses.len() >= status_count {
                        break;
                    }
                    let bit = (chunk >> (13 - i)) & 0x1;
                    statuses.push(if bit != 0 {
                        STATUS_SMALL_DELTA
                    } else {
                        STATUS_NOT_RECEIVED
                    });
                }
            }
        }

        // Deltas
        let mut packets = Vec::with_capacity(status_count);
        let mut acc_us = 0i64;
        for status in statuses {
            match status {
                STATUS_SMALL_DELTA => {
                    if payload.len() < idx + 1 {
                        return Err(RtcpError::Truncated);
                    }
                    acc_us += i64::from(payload[idx]) * DELTA_UNIT_US;
                    idx += 1;
                    packets.push(Some(acc_us));
                }
                STATUS_LARGE_DELTA => {
                    if payload.len() < idx + 2 {
                        return Err(RtcpError::Truncated);
                    }
                    let d = i16::from_be_bytes(payload[idx..idx + 2].try_into().unwrap());
                    acc_us += i64::from(d) * DELTA_UNIT_US;
                    idx += 2;
                    packets.push(Some(acc_us));
                }
                _ => packets.push(None),
            }
        }

        Ok(RtcpPacket::Twcc(TwccFeedback {
            sender_ssrc,
            media_ssrc,
            base_seq,
            reference_time,
            fb_pkt_count,
            packets,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feedback_round_trip_with_losses() {
        // packets at 0, +5ms, lost, lost, +12ms
        let arrivals = vec![
            Some(1_000_000),
            Some(1_005_000),
            None,
            None,
            Some(1_012_000),
        ];
        let fb = TwccFeedback::from_arrivals(0xA, 0xB, 17, 3, &arrivals);

        let mut buf = Vec::new();
        fb.encode_into(&mut buf).unwrap();
        assert_eq!(buf.len() % 4, 0);

        let (hdr, total) = CommonHeader::decode(&buf).unwrap();
        assert_eq!(total, buf.len());
        let RtcpPacket::Twcc(back) = TwccFeedback::decode(&hdr, &buf[4..]).unwrap() else {
            panic!("not TWCC");
        };
        assert_eq!(back.base_seq, 17);
        assert_eq!(back.fb_pkt_count, 3);
        assert_eq!(back.packets.len(), 5);
        assert!(back.packets[0].is_some());
        assert!(back.packets[2].is_none());
        assert!(back.packets[3].is_none());
        // quarter-ms resolution: 12 ms between first and last arrival
        let first = back.packets[0].unwrap();
        let last = back.packets[4].unwrap();
        assert_eq!(last - first, 12_000);
    }

    #[test]
    fn long_uniform_run_uses_run_length_chunk() {
        // 100 packets, all received 1 ms apart: one run-length chunk expected
        let arrivals: Vec<Option<i64>> = (0..100).map(|i| Some(i * 1_000)).collect();
        let fb = TwccFeedback::from_arrivals(1, 2, 0, 0, &arrivals);
        let mut buf = Vec::new();
        fb.encode_into(&mut buf).unwrap();

        let (hdr, _) = CommonHeader::decode(&buf).unwrap();
        let RtcpPacket::Twcc(back) = TwccFeedback::decode(&hdr, &buf[4..]).unwrap() else {
            panic!("not TWCC");
        };
        assert_eq!(back.packets.len(), 100);
        assert!(back.packets.iter().all(Option::is_some));
    }
}
