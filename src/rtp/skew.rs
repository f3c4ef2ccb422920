//! Clock-drift (skew) compensation between a sender's RTP clock and the
//! gateway's monotonic clock.
//!
//! A reference pair (ts0, t0) is captured once a warm-up period has elapsed
//! (ICE and DTLS settling make the first seconds useless). From then on every
//! packet's expected arrival is `t0 + (ts - ts0)/rate`; the smoothed delta
//! between expected and actual arrival is the active delay. A sender running
//! slow accumulates positive delay and gets sequence numbers skipped (the
//! receiver conceals them as loss); a sender running fast accumulates
//! negative delay and gets packets dropped.

use super::rtp_header::RtpHeader;
use super::switching_context::RtpSwitchingContext;
use super::{AUDIO_CLOCK_RATE, VIDEO_CLOCK_RATE};
use std::time::Instant;

/// Threshold before compensating, audio.
pub const AUDIO_SKEW_TH_MS: i64 = 40;
/// Threshold before compensating, video.
pub const VIDEO_SKEW_TH_MS: i64 = 40;
/// Warm-up before the detector arms itself.
pub const SKEW_DETECTION_WAIT_TIME_SECS: i64 = 15;

impl RtpSwitchingContext {
    /// Audio variant of [`skew_compensate`](Self::skew_compensate) at 48 kHz.
    pub fn skew_compensate_audio(&mut self, header: &mut RtpHeader, now: Instant) -> i32 {
        self.skew_compensate(header, now, AUDIO_CLOCK_RATE, AUDIO_SKEW_TH_MS)
    }

    /// Video variant of [`skew_compensate`](Self::skew_compensate) at 90 kHz.
    pub fn skew_compensate_video(&mut self, header: &mut RtpHeader, now: Instant) -> i32 {
        self.skew_compensate(header, now, VIDEO_CLOCK_RATE, VIDEO_SKEW_TH_MS)
    }

    /// Returns 0 when no compensation is needed, +N after N silent sequence
    /// numbers have been inserted (seq offset bumped), or -N when the caller
    /// must drop this packet.
    ///
    /// Call after [`update`](Self::update), under the stream mutex. When the
    /// clock rate is unknown compensation should be disabled by not calling
    /// this at all.
    pub fn skew_compensate(
        &mut self,
        header: &mut RtpHeader,
        now: Instant,
        rate: u32,
        threshold_ms: i64,
    ) -> i32 {
        let now_us = self.micros_since_epoch(now);

        // A new source invalidates every reference we had.
        if self.new_ssrc {
            self.new_ssrc = false;
            self.reference_time_us = now_us;
            self.start_time_us = 0;
            self.prev_delay_us = 0;
            self.active_delay_us = 0;
        }
        if self.reference_time_us == 0 {
            self.reference_time_us = now_us;
        }

        // Warm-up: never compensate in the first seconds.
        if now_us - self.reference_time_us < SKEW_DETECTION_WAIT_TIME_SECS * 1_000_000 {
            return 0;
        }
        if self.start_time_us == 0 {
            // Capture the reference pair (ts0, t0).
            self.start_time_us = now_us;
            self.start_ts = header.timestamp;
            return 0;
        }

        let rate = i64::from(rate);
        let expected_us = self.start_time_us
            + (i64::from(header.timestamp.wrapping_sub(self.start_ts) as i32) * 1_000_000) / rate;
        let delay_us = now_us - expected_us;

        // Exponential smoothing, 1/16 gain.
        self.prev_delay_us = self.active_delay_us;
        self.active_delay_us += (delay_us - self.active_delay_us) / 16;

        let threshold_us = threshold_ms * 1_000;

        if self.active_delay_us > threshold_us {
            // Sender is slow: realign the timestamp offset and skip sequence
            // numbers so the receiver treats the hole as concealable loss.
            let ticks = ((self.active_delay_us * rate) / 1_000_000) as u32;
            let step = self.packet_ts_step(rate as u32);
            let n = (ticks / step.max(1)).max(1);

            self.ts_offset = self.ts_offset.wrapping_add(ticks);
            self.seq_offset = self.seq_offset.wrapping_add(n as u16);
            self.rebase(now_us, header.timestamp.wrapping_add(ticks));
            return n as i32;
        }

        if self.active_delay_us < -threshold_us {
            // Sender is fast: ask the caller to drop this packet and close
            // the hole it leaves.
            let ticks = ((-self.active_delay_us * rate) / 1_000_000) as u32;
            self.ts_offset = self.ts_offset.wrapping_sub(ticks);
            self.seq_offset = self.seq_offset.wrapping_sub(1);
            self.rebase(now_us, header.timestamp.wrapping_sub(ticks));
            return -1;
        }

        0
    }

    /// Per-packet timestamp increment, estimated from the last two packets.
    fn packet_ts_step(&self, rate: u32) -> u32 {
        let delta = self.last_ts.wrapping_sub(self.prev_ts);
        if delta == 0 || delta > rate {
            // Unusable estimate, assume 20 ms worth of ticks.
            rate / 50
        } else {
            delta
        }
    }

    fn rebase(&mut self, now_us: i64, ts: u32) {
        self.start_time_us = now_us;
        self.start_ts = ts;
        self.prev_delay_us = 0;
        self.active_delay_us = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp::RtpHeader;
    use std::time::Duration;

    fn header(seq: u16, ts: u32) -> RtpHeader {
        RtpHeader::new(111, seq, ts, 0xAAA)
    }

    #[test]
    fn silent_during_warm_up() {
        let mut ctx = RtpSwitchingContext::new();
        let start = Instant::now();

        // 14 seconds of perfectly late packets: still warm-up, always 0.
        for i in 0..700u32 {
            let now = start + Duration::from_millis(u64::from(i) * 20 + 500);
            let mut h = header(i as u16, i * 960);
            ctx.update(&mut h, now, 960);
            assert_eq!(ctx.skew_compensate_audio(&mut h, now), 0);
        }
    }

    #[test]
    fn slow_audio_sender_gets_sequence_jump() {
        let mut ctx = RtpSwitchingContext::new();
        let start = Instant::now();
        let mut compensated = 0i32;

        // 60 s of audio at 48 kHz, 20 ms packets, each arriving 2 ms later
        // than the previous one (cumulative drift).
        for i in 0..3000u32 {
            let now = start + Duration::from_millis(u64::from(i) * 22);
            let mut h = header(i as u16, i * 960);
            ctx.update(&mut h, now, 960);
            let r = ctx.skew_compensate_audio(&mut h, now);
            assert!(r >= 0, "slow sender must never request drops");
            if r > 0 {
                compensated += r;
            }
        }
        assert!(compensated >= 1, "skew was never compensated");
    }

    #[test]
    fn fast_sender_gets_drops() {
        let mut ctx = RtpSwitchingContext::new();
        let start = Instant::now();
        let mut drops = 0;

        // Timestamps advance 22 ms per packet while 20 ms of wall clock pass:
        // the sender's clock runs fast.
        for i in 0..3000u32 {
            let now = start + Duration::from_millis(u64::from(i) * 20);
            let mut h = header(i as u16, i * 1056);
            ctx.update(&mut h, now, 960);
            if ctx.skew_compensate_audio(&mut h, now) < 0 {
                drops += 1;
            }
        }
        assert!(drops >= 1, "fast sender never triggered a drop");
    }

    #[test]
    fn new_ssrc_resets_detection() {
        let mut ctx = RtpSwitchingContext::new();
        let start = Instant::now();

        // Build up past warm-up with a drifting source.
        for i in 0..1500u32 {
            let now = start + Duration::from_millis(u64::from(i) * 22);
            let mut h = header(i as u16, i * 960);
            ctx.update(&mut h, now, 960);
            ctx.skew_compensate_audio(&mut h, now);
        }

        // Switch source: detection starts over, first packet must be 0.
        let now = start + Duration::from_secs(40);
        let mut h = RtpHeader::new(111, 7, 123, 0xBBB);
        ctx.update(&mut h, now, 960);
        assert_eq!(ctx.skew_compensate_audio(&mut h, now), 0);
    }
}
