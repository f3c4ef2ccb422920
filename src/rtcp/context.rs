use super::{report_block::ReportBlock, sender_info::SenderInfo};
use crate::rtp::time::{now_ntp_compact, ntp_to_compact};
use std::time::Instant;

/// Per-layer RTCP accounting.
///
/// One instance per media lane (audio, or one per simulcast video layer).
/// Inbound it tracks loss, jitter and SR anchoring so the gateway can build
/// receiver reports; outbound it digests the report blocks the peer sends
/// about our stream (including an RTT estimate via LSR/DLSR).
#[derive(Debug, Clone)]
pub struct RtcpContext {
    clock_rate: u32,

    // --- inbound (peer to us) ---
    seq_cycles: u32,
    last_seq: u16,
    have_seq: bool,
    base_ext_seq: Option<u32>,
    highest_ext_seq: u32,
    received: u32,
    expected_prior: u32,
    received_prior: u32,
    // RFC 3550 A.8
    jitter: u32,
    last_transit: Option<u32>,
    // SR timing for LSR/DLSR and A/V sync
    last_sr_compact: Option<u32>,
    last_sr_arrival_compact: Option<u32>,
    last_sr_ntp: Option<(u32, u32)>,
    last_sr_rtp_ts: Option<u32>,

    // --- outbound (us to peer), fed by the peer's report blocks ---
    pub remote_fraction_lost: u8,
    pub remote_cumulative_lost: i32,
    pub remote_highest_ext_seq: u32,
    pub remote_jitter: u32,
    last_sr_sent_compact: u32,
    rtt_ms: Option<u32>,
    last_rr_at: Option<Instant>,

    // --- our sender stats for SR generation ---
    sent_packets: u32,
    sent_octets: u32,
    last_sent_rtp_ts: u32,
}

impl RtcpContext {
    pub fn new(clock_rate: u32) -> Self {
        Self {
            clock_rate: clock_rate.max(1),
            seq_cycles: 0,
            last_seq: 0,
            have_seq: false,
            base_ext_seq: None,
            highest_ext_seq: 0,
            received: 0,
            expected_prior: 0,
            received_prior: 0,
            jitter: 0,
            last_transit: None,
            last_sr_compact: None,
            last_sr_arrival_compact: None,
            last_sr_ntp: None,
            last_sr_rtp_ts: None,
            remote_fraction_lost: 0,
            remote_cumulative_lost: 0,
            remote_highest_ext_seq: 0,
            remote_jitter: 0,
            last_sr_sent_compact: 0,
            rtt_ms: None,
            last_rr_at: None,
            sent_packets: 0,
            sent_octets: 0,
            last_sent_rtp_ts: 0,
        }
    }

    /// Sequence number extended with wrap cycles.
    fn extend_seq(&mut self, seq: u16) -> u32 {
        if self.have_seq && seq < self.last_seq && self.last_seq.wrapping_sub(seq) > 0x8000 {
            self.seq_cycles = self.seq_cycles.wrapping_add(1 << 16);
        }
        self.have_seq = true;
        self.last_seq = seq;
        self.seq_cycles | u32::from(seq)
    }

    /// Account one unique inbound RTP packet (after duplicate filtering).
    /// `arrival_us` is the monotonic arrival time in microseconds.
    pub fn received_rtp(&mut self, seq: u16, rtp_ts: u32, arrival_us: i64) {
        let ext = self.extend_seq(seq);
        if self.base_ext_seq.is_none() {
            self.base_ext_seq = Some(ext);
        }
        if ext > self.highest_ext_seq {
            self.highest_ext_seq = ext;
        }
        self.received = self.received.wrapping_add(1);

        // Jitter per RFC 3550 A.8, in RTP clock units.
        let arrival_units =
            ((arrival_us as i128 * i128::from(self.clock_rate)) / 1_000_000) as u32;
        let transit = arrival_units.wrapping_sub(rtp_ts);
        if let Some(prev) = self.last_transit {
            let d_abs = if transit >= prev {
                transit - prev
            } else {
                prev - transit
            };
            let diff = i64::from(d_abs) - i64::from(self.jitter);
            self.jitter = (i64::from(self.jitter) + diff / 16).max(0) as u32;
        }
        self.last_transit = Some(transit);
    }

    /// Digest an inbound SR from the peer: anchors LSR/DLSR and keeps the
    /// NTP/RTP pair around for A/V sync.
    pub fn on_sender_report(&mut self, info: &SenderInfo, arrival_ntp: (u32, u32)) {
        self.last_sr_compact = Some(ntp_to_compact(info.ntp_msw, info.ntp_lsw));
        self.last_sr_arrival_compact = Some(ntp_to_compact(arrival_ntp.0, arrival_ntp.1));
        self.last_sr_ntp = Some((info.ntp_msw, info.ntp_lsw));
        self.last_sr_rtp_ts = Some(info.rtp_ts);
    }

    /// Build one report block about the peer's stream, consuming the
    /// per-interval deltas. `None` until the first packet arrived.
    pub fn build_report_block(&mut self, remote_ssrc: u32) -> Option<ReportBlock> {
        let base = self.base_ext_seq?;
        let expected_total = self.highest_ext_seq.saturating_sub(base) + 1;
        let cumulative_lost = i64::from(expected_total) - i64::from(self.received);

        let exp_delta = expected_total.saturating_sub(self.expected_prior);
        let rec_delta = self.received.saturating_sub(self.received_prior);
        let lost_delta = exp_delta.saturating_sub(rec_delta);
        let fraction_lost = if exp_delta == 0 {
            0
        } else {
            ((lost_delta * 256) / exp_delta) as u8
        };

        self.expected_prior = expected_total;
        self.received_prior = self.received;

        let (lsr, dlsr) = match (self.last_sr_compact, self.last_sr_arrival_compact) {
            (Some(lsr), Some(arrival)) => (lsr, now_ntp_compact().wrapping_sub(arrival)),
            _ => (0, 0),
        };

        Some(ReportBlock {
            ssrc: remote_ssrc,
            fraction_lost,
            cumulative_lost: cumulative_lost.clamp(-8_388_608, 8_388_607) as i32,
            highest_seq_received: self.highest_ext_seq,
            interarrival_jitter: self.jitter,
            lsr,
            dlsr,
        })
    }

    /// Record that we just emitted an SR with this NTP timestamp, so a later
    /// report block's LSR can be matched back for the RTT computation.
    pub fn mark_sr_sent(&mut self, ntp_msw: u32, ntp_lsw: u32) {
        self.last_sr_sent_compact = ntp_to_compact(ntp_msw, ntp_lsw);
    }

    /// Digest a report block the peer sent about *our* stream.
    /// `arrival_ntp_compact` is when we received the enclosing SR/RR.
    pub fn on_report_block(&mut self, rb: &ReportBlock, arrival_ntp_compact: u32) {
        self.remote_fraction_lost = rb.fraction_lost;
        self.remote_cumulative_lost = rb.cumulative_lost;
        self.remote_highest_ext_seq = rb.highest_seq_received;
        self.remote_jitter = rb.interarrival_jitter;
        self.last_rr_at = Some(Instant::now());

        // RTT = arrival - LSR - DLSR (RFC 3550 A.3), in 1/65536 s units.
        if rb.lsr != 0
            && self.last_sr_sent_compact != 0
            && rb.lsr == self.last_sr_sent_compact
        {
            let rtt_units = arrival_ntp_compact
                .wrapping_sub(rb.lsr)
                .wrapping_sub(rb.dlsr);
            let rtt_ms = (u64::from(rtt_units) * 1000) >> 16;
            self.rtt_ms = Some(rtt_ms as u32);
        }
    }

    /// Account one outbound RTP packet of ours.
    pub fn sent_rtp(&mut self, payload_len: usize, rtp_ts: u32) {
        self.sent_packets = self.sent_packets.wrapping_add(1);
        self.sent_octets = self.sent_octets.wrapping_add(payload_len as u32);
        self.last_sent_rtp_ts = rtp_ts;
    }

    /// Sender info for an SR of ours; `None` when we never sent anything.
    pub fn build_sender_info(&mut self, ntp: (u32, u32)) -> Option<SenderInfo> {
        if self.sent_packets == 0 {
            return None;
        }
        self.mark_sr_sent(ntp.0, ntp.1);
        Some(SenderInfo::new(
            ntp.0,
            ntp.1,
            self.last_sent_rtp_ts,
            self.sent_packets,
            self.sent_octets,
        ))
    }

    /// Last computed round-trip estimate.
    pub fn rtt_ms(&self) -> Option<u32> {
        self.rtt_ms
    }

    /// Peer SR anchoring pair for A/V sync, if an SR was seen.
    pub fn sync_anchor(&self) -> Option<((u32, u32), u32)> {
        Some((self.last_sr_ntp?, self.last_sr_rtp_ts?))
    }

    pub fn received_count(&self) -> u32 {
        self.received
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_loss_over_an_interval() {
        let mut ctx = RtcpContext::new(48_000);
        // 10 packets expected, 2 missing
        for seq in [0u16, 1, 2, 3, 5, 6, 8, 9] {
            ctx.received_rtp(seq, u32::from(seq) * 960, i64::from(seq) * 20_000);
        }
        let rb = ctx.build_report_block(0xAA).unwrap();
        assert_eq!(rb.ssrc, 0xAA);
        assert_eq!(rb.cumulative_lost, 2);
        assert_eq!(rb.highest_seq_received, 9);
        // 2/10 lost -> 51/256
        assert_eq!(rb.fraction_lost, 51);

        // next interval: everything received again
        for seq in 10u16..20 {
            ctx.received_rtp(seq, u32::from(seq) * 960, i64::from(seq) * 20_000);
        }
        let rb = ctx.build_report_block(0xAA).unwrap();
        assert_eq!(rb.fraction_lost, 0);
        assert_eq!(rb.cumulative_lost, 2);
    }

    #[test]
    fn no_report_before_first_packet() {
        let mut ctx = RtcpContext::new(48_000);
        assert!(ctx.build_report_block(1).is_none());
    }

    #[test]
    fn jitter_rises_with_irregular_arrivals() {
        let mut ctx = RtcpContext::new(8_000);
        let mut arrival = 0i64;
        for seq in 0u16..50 {
            // alternate 20 ms / 60 ms inter-arrival while ts steps 20 ms
            arrival += if seq % 2 == 0 { 20_000 } else { 60_000 };
            ctx.received_rtp(seq, u32::from(seq) * 160, arrival);
        }
        let rb = ctx.build_report_block(1).unwrap();
        assert!(rb.interarrival_jitter > 0);
    }

    #[test]
    fn seq_wrap_extends_highest() {
        let mut ctx = RtcpContext::new(90_000);
        ctx.received_rtp(65_534, 0, 0);
        ctx.received_rtp(65_535, 0, 0);
        ctx.received_rtp(0, 0, 0);
        ctx.received_rtp(1, 0, 0);
        let rb = ctx.build_report_block(1).unwrap();
        assert_eq!(rb.highest_seq_received, 65_537);
        assert_eq!(rb.cumulative_lost, 0);
    }

    #[test]
    fn rtt_computed_from_matching_lsr() {
        let mut ctx = RtcpContext::new(90_000);
        ctx.mark_sr_sent(0x0001_0000, 0x8000_0000);
        let lsr = ntp_to_compact(0x0001_0000, 0x8000_0000);
        let rb = ReportBlock {
            ssrc: 1,
            lsr,
            dlsr: 65_536, // 1 s
            ..Default::default()
        };
        // RR arrives 2 s after our SR
        let arrival = lsr.wrapping_add(2 * 65_536);
        ctx.on_report_block(&rb, arrival);
        assert_eq!(ctx.rtt_ms(), Some(1000));
    }

    #[test]
    fn sender_info_tracks_counters() {
        let mut ctx = RtcpContext::new(90_000);
        assert!(ctx.build_sender_info((1, 2)).is_none());
        ctx.sent_rtp(1200, 3000);
        ctx.sent_rtp(800, 6000);
        let si = ctx.build_sender_info((1, 2)).unwrap();
        assert_eq!(si.packet_count, 2);
        assert_eq!(si.octet_count, 2000);
        assert_eq!(si.rtp_ts, 6000);
    }
}
