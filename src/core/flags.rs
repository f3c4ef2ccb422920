use std::sync::atomic::{AtomicU32, Ordering};

/// WebRTC lifecycle flags of a handle.
///
/// Mostly monotonic: once a phase has been reached the bit stays set.
/// `ICE_RESTART` clears a few gathering-related bits when it fires, and
/// `CLEANING` dominates everything (once set, most operations short-circuit
/// on [`WebRtcFlags::is_set`] checks).
pub const PROCESSING_OFFER: u32 = 1 << 0;
pub const START: u32 = 1 << 1;
pub const READY: u32 = 1 << 2;
pub const STOP: u32 = 1 << 3;
pub const ALERT: u32 = 1 << 4;
pub const TRICKLE: u32 = 1 << 7;
pub const ALL_TRICKLES: u32 = 1 << 8;
pub const TRICKLE_SYNCED: u32 = 1 << 9;
pub const DATA_CHANNELS: u32 = 1 << 10;
pub const CLEANING: u32 = 1 << 11;
pub const HAS_AUDIO: u32 = 1 << 12;
pub const HAS_VIDEO: u32 = 1 << 13;
pub const GOT_OFFER: u32 = 1 << 14;
pub const GOT_ANSWER: u32 = 1 << 15;
pub const HAS_AGENT: u32 = 1 << 16;
pub const ICE_RESTART: u32 = 1 << 17;
pub const RESEND_TRICKLES: u32 = 1 << 18;
pub const RFC4588_RTX: u32 = 1 << 19;

/// Atomic bitset holding the flags above.
#[derive(Debug, Default)]
pub struct WebRtcFlags(AtomicU32);

impl WebRtcFlags {
    pub fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    pub fn set(&self, flag: u32) {
        self.0.fetch_or(flag, Ordering::SeqCst);
    }

    pub fn clear(&self, flag: u32) {
        self.0.fetch_and(!flag, Ordering::SeqCst);
    }

    pub fn is_set(&self, flag: u32) -> bool {
        self.0.load(Ordering::SeqCst) & flag != 0
    }

    pub fn raw(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }

    /// The bits an ICE restart invalidates: trickle bookkeeping starts over.
    pub fn apply_ice_restart(&self) {
        self.clear(ALL_TRICKLES | TRICKLE_SYNCED | START);
        self.set(ICE_RESTART | RESEND_TRICKLES);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_clear_check() {
        let flags = WebRtcFlags::new();
        assert!(!flags.is_set(READY));
        flags.set(READY | HAS_AUDIO);
        assert!(flags.is_set(READY));
        assert!(flags.is_set(HAS_AUDIO));
        flags.clear(READY);
        assert!(!flags.is_set(READY));
        assert!(flags.is_set(HAS_AUDIO));
    }

    #[test]
    fn ice_restart_resets_trickle_state() {
        let flags = WebRtcFlags::new();
        flags.set(ALL_TRICKLES | TRICKLE_SYNCED | START | READY);
        flags.apply_ice_restart();
        assert!(!flags.is_set(ALL_TRICKLES));
        assert!(!flags.is_set(TRICKLE_SYNCED));
        assert!(!flags.is_set(START));
        assert!(flags.is_set(ICE_RESTART));
        assert!(flags.is_set(RESEND_TRICKLES));
        // unrelated state survives
        assert!(flags.is_set(READY));
    }
}
