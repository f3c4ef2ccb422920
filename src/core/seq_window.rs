//! Sliding window over recently-seen inbound sequence numbers, driving NACK
//! generation.
//!
//! Fixed capacity of the last 160 sequence numbers per media lane. When a
//! packet arrives with a gap behind it, the missing slots are created as
//! `Missing`; a timer promotes them to `Nacked` (emitting a NACK) after one
//! RTT, and to `GiveUp` after a maximum without a retransmission showing up.
//! Slots recycle in FIFO order.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Window length, in sequence numbers.
pub const LAST_SEQS_MAX_LEN: usize = 160;

/// How long a NACKed packet may stay outstanding before we give up on it.
pub const NACK_GIVEUP: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqState {
    Missing,
    Nacked,
    GiveUp,
    Recved,
}

#[derive(Debug, Clone)]
struct SeqSlot {
    seq: u16,
    state: SeqState,
    since: Instant,
}

/// Per-lane sequence window.
#[derive(Debug, Clone, Default)]
pub struct SeqWindow {
    slots: VecDeque<SeqSlot>,
    last_seq: Option<u16>,
}

impl SeqWindow {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, slot: SeqSlot) {
        if self.slots.len() == LAST_SEQS_MAX_LEN {
            self.slots.pop_front();
        }
        self.slots.push_back(slot);
    }

    /// Record an arrived sequence number. Gaps behind it become `Missing`;
    /// a late arrival flips its slot to `Recved`.
    pub fn received(&mut self, seq: u16, now: Instant) {
        let Some(last) = self.last_seq else {
            self.last_seq = Some(seq);
            self.push(SeqSlot {
                seq,
                state: SeqState::Recved,
                since: now,
            });
            return;
        };

        let advance = seq.wrapping_sub(last);
        if advance == 0 {
            return; // duplicate of the newest packet
        }
        if advance < 0x8000 {
            // In-order or a gap: create missing slots for the hole.
            let gap = advance - 1;
            // A hole wider than the window means the counter jumped (reset);
            // the switching context deals with that, we just resync.
            if gap as usize >= LAST_SEQS_MAX_LEN {
                self.slots.clear();
            } else {
                for i in 1..=gap {
                    self.push(SeqSlot {
                        seq: last.wrapping_add(i),
                        state: SeqState::Missing,
                        since: now,
                    });
                }
            }
            self.push(SeqSlot {
                seq,
                state: SeqState::Recved,
                since: now,
            });
            self.last_seq = Some(seq);
        } else {
            // Out-of-order arrival: a retransmission or reordering filled a
            // hole.
            if let Some(slot) = self.slots.iter_mut().find(|s| s.seq == seq) {
                slot.state = SeqState::Recved;
            }
        }
    }

    /// Collect the sequence numbers whose NACK is due: `Missing` slots older
    /// than `rtt` become `Nacked` and are returned; `Nacked` slots older
    /// than the give-up limit are abandoned.
    pub fn nacks_due(&mut self, now: Instant, rtt: Duration) -> Vec<u16> {
        let mut due = Vec::new();
        for slot in &mut self.slots {
            match slot.state {
                SeqState::Missing => {
                    if now.duration_since(slot.since) >= rtt {
                        slot.state = SeqState::Nacked;
                        slot.since = now;
                        due.push(slot.seq);
                    }
                }
                SeqState::Nacked => {
                    if now.duration_since(slot.since) >= NACK_GIVEUP {
                        slot.state = SeqState::GiveUp;
                    }
                }
                _ => {}
            }
        }
        due
    }

    /// Number of slots currently tracked (test/introspection).
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.last_seq = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gap_creates_missing_then_nacks() {
        let mut w = SeqWindow::new();
        let t0 = Instant::now();
        w.received(100, t0);
        w.received(104, t0); // 101..103 missing

        let rtt = Duration::from_millis(50);
        assert!(w.nacks_due(t0 + Duration::from_millis(10), rtt).is_empty());
        let due = w.nacks_due(t0 + Duration::from_millis(60), rtt);
        assert_eq!(due, vec![101, 102, 103]);
        // already nacked: not due again
        assert!(w.nacks_due(t0 + Duration::from_millis(70), rtt).is_empty());
    }

    #[test]
    fn late_arrival_cancels_the_nack() {
        let mut w = SeqWindow::new();
        let t0 = Instant::now();
        w.received(10, t0);
        w.received(12, t0);
        w.received(11, t0 + Duration::from_millis(5)); // reordered, not lost
        assert!(
            w.nacks_due(t0 + Duration::from_millis(100), Duration::from_millis(50))
                .is_empty()
        );
    }

    #[test]
    fn gives_up_after_the_limit() {
        let mut w = SeqWindow::new();
        let t0 = Instant::now();
        w.received(1, t0);
        w.received(3, t0);
        let rtt = Duration::from_millis(10);
        assert_eq!(w.nacks_due(t0 + Duration::from_millis(20), rtt), vec![2]);
        // past the give-up limit nothing is ever requested again
        let _ = w.nacks_due(t0 + Duration::from_millis(20) + NACK_GIVEUP, rtt);
        assert!(
            w.nacks_due(t0 + Duration::from_secs(5), rtt).is_empty()
        );
    }

    #[test]
    fn window_is_bounded() {
        let mut w = SeqWindow::new();
        let t0 = Instant::now();
        for seq in 0..1000u16 {
            w.received(seq, t0);
        }
        assert!(w.len() <= LAST_SEQS_MAX_LEN);
    }

    #[test]
    fn wild_jump_resyncs_instead_of_flooding() {
        let mut w = SeqWindow::new();
        let t0 = Instant::now();
        w.received(10, t0);
        w.received(10_000, t0);
        assert!(w.len() <= 2);
        assert!(
            w.nacks_due(t0 + Duration::from_secs(1), Duration::from_millis(10))
                .is_empty()
        );
    }
}
