use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current wall clock as an NTP timestamp (seconds since 1900) split into
/// (most significant word, least significant word).
pub fn ntp_now() -> (u32, u32) {
    // NTP epoch offset from Unix (1900 -> 1970)
    const NTP_UNIX_EPOCH_DIFF: u64 = 2_208_988_800; // seconds
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0));
    let secs = now.as_secs() + NTP_UNIX_EPOCH_DIFF;
    let frac = ((now.subsec_nanos() as u64) << 32) / 1_000_000_000u64;
    (secs as u32, frac as u32)
}

/// Convert a 64-bit NTP timestamp to the 32-bit "compact" form used by
/// RFC 3550 LSR/DLSR fields: `(MSW << 16) | (LSW >> 16)`.
#[inline]
pub fn ntp_to_compact(msw: u32, lsw: u32) -> u32 {
    (msw << 16) | (lsw >> 16)
}

/// Compact NTP for "now".
pub fn now_ntp_compact() -> u32 {
    let (s, f) = ntp_now();
    ntp_to_compact(s, f)
}
