use super::rtp_header::RtpHeader;
use std::time::Instant;

/// Per-lane RTP rewrite context.
///
/// Keeps seq/ts continuity towards the downstream receiver when the upstream
/// source changes: a plugin switching sources, a simulcast layer change, or
/// an ICE restart all show up here as a new SSRC, and the receiver must keep
/// seeing one contiguous stream. The context computes a sequence offset and a
/// timestamp offset that are applied to every outbound packet.
///
/// Callers must serialize `update` calls per lane (the stream mutex does
/// this); the mapping is bijective on `(seq, ts)` between SSRC changes, which
/// the retransmit lookup relies on.
#[derive(Debug, Clone)]
pub struct RtpSwitchingContext {
    epoch: Instant,

    pub(super) last_ssrc: Option<u32>,
    pub(super) last_ts: u32,
    pub(super) prev_ts: u32,
    pub(super) base_ts: u32,
    pub(super) base_ts_prev: u32,
    pub(super) start_ts: u32,
    pub(super) last_seq: u16,
    pub(super) prev_seq: u16,
    pub(super) base_seq: u16,
    pub(super) base_seq_prev: u16,

    /// Wrapping offsets applied to every outbound packet.
    pub(super) seq_offset: u16,
    pub(super) ts_offset: u32,

    /// One-shot flags, consumed by the next update/skew pass.
    pub(super) new_ssrc: bool,
    pub(super) seq_reset: bool,

    // Skew detection state (see skew.rs).
    pub(super) last_time_us: i64,
    pub(super) reference_time_us: i64,
    pub(super) start_time_us: i64,
    pub(super) prev_delay_us: i64,
    pub(super) active_delay_us: i64,
}

impl RtpSwitchingContext {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_ssrc: None,
            last_ts: 0,
            prev_ts: 0,
            base_ts: 0,
            base_ts_prev: 0,
            start_ts: 0,
            last_seq: 0,
            prev_seq: 0,
            base_seq: 0,
            base_seq_prev: 0,
            seq_offset: 0,
            ts_offset: 0,
            new_ssrc: false,
            seq_reset: false,
            last_time_us: 0,
            reference_time_us: 0,
            start_time_us: 0,
            prev_delay_us: 0,
            active_delay_us: 0,
        }
    }

    /// Reset all fields; used on renegotiation when continuity is not wanted.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Flag that the peer reset its sequence numbers without an SSRC change
    /// (e.g. the source was paused for a while).
    pub fn mark_seq_reset(&mut self) {
        self.seq_reset = true;
    }

    pub(super) fn micros_since_epoch(&self, now: Instant) -> i64 {
        now.duration_since(self.epoch).as_micros() as i64
    }

    /// Rewrite `header`'s seq/ts in place so the downstream receiver sees a
    /// contiguous stream.
    ///
    /// `step` is the timestamp jump applied across an SSRC switch, typically
    /// one frame at the negotiated clock rate; callers pass 1 when unknown.
    pub fn update(&mut self, header: &mut RtpHeader, now: Instant, step: u32) {
        let ssrc = header.ssrc;
        let ts = header.timestamp;
        let seq = header.sequence_number;

        match self.last_ssrc {
            None => {
                // First packet on this lane: pass through, start the bases.
                self.last_ssrc = Some(ssrc);
                self.base_ts = ts;
                self.start_ts = ts;
                self.base_seq = seq;
            }
            Some(current) if current != ssrc => {
                self.new_ssrc = true;
                self.base_ts_prev = self.base_ts;
                self.base_ts = ts;
                self.base_seq_prev = self.base_seq;
                self.base_seq = seq;
                let step = if step == 0 { 1 } else { step };
                // outgoing seq = last_seq + 1, outgoing ts = last_ts + step
                self.seq_offset = self.last_seq.wrapping_add(1).wrapping_sub(seq);
                self.ts_offset = self.last_ts.wrapping_add(step).wrapping_sub(ts);
                self.last_ssrc = Some(ssrc);
            }
            _ => {}
        }

        if self.seq_reset {
            // Peer wrapped or restarted its counter: re-anchor seq only.
            self.seq_reset = false;
            self.base_seq_prev = self.base_seq;
            self.base_seq = seq;
            self.seq_offset = self.last_seq.wrapping_add(1).wrapping_sub(seq);
        }

        let out_seq = seq.wrapping_add(self.seq_offset);
        let out_ts = ts.wrapping_add(self.ts_offset);

        self.prev_ts = self.last_ts;
        self.last_ts = out_ts;
        self.prev_seq = self.last_seq;
        self.last_seq = out_seq;
        self.last_time_us = self.micros_since_epoch(now);

        header.sequence_number = out_seq;
        header.timestamp = out_ts;
    }

    /// Last sequence number handed downstream.
    pub fn last_seq(&self) -> u16 {
        self.last_seq
    }

    /// Last timestamp handed downstream.
    pub fn last_ts(&self) -> u32 {
        self.last_ts
    }
}

impl Default for RtpSwitchingContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(ssrc: u32, seq: u16, ts: u32) -> RtpHeader {
        RtpHeader::new(96, seq, ts, ssrc)
    }

    #[test]
    fn first_packet_passes_through() {
        let mut ctx = RtpSwitchingContext::new();
        let mut h = header(0xAAA, 100, 1000);
        ctx.update(&mut h, Instant::now(), 960);
        assert_eq!(h.sequence_number, 100);
        assert_eq!(h.timestamp, 1000);
    }

    #[test]
    fn ssrc_switch_keeps_continuity() {
        let mut ctx = RtpSwitchingContext::new();
        let now = Instant::now();

        let mut first = header(0xAAA, 100, 1000);
        ctx.update(&mut first, now, 960);
        assert_eq!((first.sequence_number, first.timestamp), (100, 1000));

        // Source switch: wildly different seq/ts must come out contiguous.
        let mut second = header(0xBBB, 5, 99_000);
        ctx.update(&mut second, now, 960);
        assert_eq!(second.sequence_number, 101);
        assert_eq!(second.timestamp, 1000 + 960);

        // And the new base sticks for the following packets.
        let mut third = header(0xBBB, 6, 99_960);
        ctx.update(&mut third, now, 960);
        assert_eq!(third.sequence_number, 102);
        assert_eq!(third.timestamp, 1000 + 960 + 960);
    }

    #[test]
    fn outbound_seq_strictly_increases_across_many_switches() {
        let mut ctx = RtpSwitchingContext::new();
        let now = Instant::now();
        let mut last_seq: Option<u16> = None;
        let mut last_ts: Option<u32> = None;

        // Four sources, each with its own unrelated seq/ts plan.
        let sources = [
            (0x111u32, 60000u16, 10_000u32),
            (0x222, 17, 4_000_000),
            (0x333, 40000, 123),
            (0x444, 65530, 999_999),
        ];
        for (ssrc, seq0, ts0) in sources {
            for i in 0..200u16 {
                let mut h = header(ssrc, seq0.wrapping_add(i), ts0.wrapping_add(u32::from(i) * 960));
                ctx.update(&mut h, now, 960);
                if let Some(prev) = last_seq {
                    assert_eq!(h.sequence_number, prev.wrapping_add(1));
                }
                if let Some(prev_ts) = last_ts {
                    // non-decreasing modulo 2^32, and the jump is small
                    let delta = h.timestamp.wrapping_sub(prev_ts);
                    assert!(delta <= 960, "ts jumped by {delta}");
                }
                last_seq = Some(h.sequence_number);
                last_ts = Some(h.timestamp);
            }
        }
    }

    #[test]
    fn seq_reset_reanchors_without_touching_ts() {
        let mut ctx = RtpSwitchingContext::new();
        let now = Instant::now();

        let mut h = header(0xAAA, 100, 1000);
        ctx.update(&mut h, now, 960);
        let mut h = header(0xAAA, 101, 1960);
        ctx.update(&mut h, now, 960);

        ctx.mark_seq_reset();
        let mut h = header(0xAAA, 9000, 2920);
        ctx.update(&mut h, now, 960);
        assert_eq!(h.sequence_number, 102);
        // timestamp flows through untouched (same SSRC, offset 0)
        assert_eq!(h.timestamp, 2920);
    }

    #[test]
    fn wraps_around_u16_space() {
        let mut ctx = RtpSwitchingContext::new();
        let now = Instant::now();
        let mut h = header(0xAAA, u16::MAX, 1000);
        ctx.update(&mut h, now, 960);
        assert_eq!(h.sequence_number, u16::MAX);
        let mut h = header(0xBBB, 1234, 5000);
        ctx.update(&mut h, now, 960);
        assert_eq!(h.sequence_number, 0); // 65535 + 1 wraps
    }
}
