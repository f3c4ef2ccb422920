use std::time::{Duration, Instant};

/// Counters for one direction of one media kind.
#[derive(Debug, Clone, Default)]
pub struct StatsInfo {
    pub packets: u32,
    pub bytes: u64,
    /// Bytes seen in the last closed one-second window.
    pub bytes_lastsec: u32,
    bytes_lastsec_temp: u32,
    updated: Option<Instant>,
    pub nacks: u32,
}

impl StatsInfo {
    /// Account one packet and roll the per-second window when due.
    pub fn account(&mut self, len: usize, now: Instant) {
        self.packets = self.packets.wrapping_add(1);
        self.bytes = self.bytes.wrapping_add(len as u64);
        match self.updated {
            Some(started) if now.duration_since(started) < Duration::from_secs(1) => {
                self.bytes_lastsec_temp += len as u32;
            }
            _ => {
                self.bytes_lastsec = self.bytes_lastsec_temp;
                self.bytes_lastsec_temp = len as u32;
                self.updated = Some(now);
            }
        }
    }

    pub fn account_nack(&mut self) {
        self.nacks = self.nacks.wrapping_add(1);
    }
}

/// Stats for one direction of a component: audio, up to three simulcast
/// video layers, and data.
#[derive(Debug, Clone, Default)]
pub struct MediaStats {
    pub audio: StatsInfo,
    pub video: [StatsInfo; 3],
    pub data: StatsInfo,
}

impl MediaStats {
    pub fn media(&mut self, video: bool, layer: usize) -> &mut StatsInfo {
        if video {
            &mut self.video[layer.min(2)]
        } else {
            &mut self.audio
        }
    }
}

/// NACK-rate tracking for slow-link detection, per direction per media.
///
/// Counts NACKs within a sliding one-second period; when the count crosses
/// the threshold the plugin gets a `slow_link` callback, at most once per
/// second.
#[derive(Debug, Clone, Default)]
pub struct SlowLinkTracker {
    period_start: Option<Instant>,
    recent_nacks: u32,
    last_notified: Option<Instant>,
}

/// NACKs per second before a link counts as slow.
pub const SLOW_LINK_NACKS_PER_SEC: u32 = 4;

impl SlowLinkTracker {
    /// Record `count` NACKs; returns true when the slow-link callback should
    /// fire now.
    pub fn record_nacks(&mut self, count: u32, now: Instant) -> bool {
        match self.period_start {
            Some(start) if now.duration_since(start) < Duration::from_secs(1) => {
                self.recent_nacks += count;
            }
            _ => {
                self.period_start = Some(now);
                self.recent_nacks = count;
            }
        }
        if self.recent_nacks < SLOW_LINK_NACKS_PER_SEC {
            return false;
        }
        let due = match self.last_notified {
            Some(at) => now.duration_since(at) >= Duration::from_secs(1),
            None => true,
        };
        if due {
            self.last_notified = Some(now);
            self.recent_nacks = 0;
            self.period_start = Some(now);
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lastsec_window_rolls() {
        let mut s = StatsInfo::default();
        let t0 = Instant::now();
        s.account(100, t0);
        s.account(200, t0 + Duration::from_millis(500));
        assert_eq!(s.bytes_lastsec, 0); // window not closed yet
        s.account(50, t0 + Duration::from_millis(1100));
        assert_eq!(s.bytes_lastsec, 300);
        assert_eq!(s.packets, 3);
        assert_eq!(s.bytes, 350);
    }

    #[test]
    fn slow_link_fires_once_per_second() {
        let mut t = SlowLinkTracker::default();
        let t0 = Instant::now();
        assert!(!t.record_nacks(1, t0));
        assert!(!t.record_nacks(2, t0 + Duration::from_millis(100)));
        // crosses the threshold
        assert!(t.record_nacks(2, t0 + Duration::from_millis(200)));
        // more NACKs inside the same second: suppressed
        assert!(!t.record_nacks(10, t0 + Duration::from_millis(300)));
        // a second later it may fire again
        assert!(t.record_nacks(10, t0 + Duration::from_millis(1400)));
    }

    #[test]
    fn sparse_nacks_never_fire() {
        let mut t = SlowLinkTracker::default();
        let t0 = Instant::now();
        for i in 0..10 {
            assert!(!t.record_nacks(1, t0 + Duration::from_secs(i)));
        }
    }
}
