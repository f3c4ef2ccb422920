use crate::log::log_level::LogLevel;
use std::time::{SystemTime, UNIX_EPOCH};

/// A single log event, as queued towards the logger worker.
#[derive(Debug, Clone)]
pub struct LogMsg {
    /// Severity of the event.
    pub level: LogLevel,
    /// Wall-clock timestamp in milliseconds since the epoch.
    pub ts_ms: u128,
    /// Formatted message payload.
    pub text: String,
    /// Origin of the log, typically the static module path.
    pub target: &'static str,
}

impl LogMsg {
    pub fn new(level: LogLevel, text: impl Into<String>, target: &'static str) -> Self {
        Self {
            level,
            ts_ms: now_millis(),
            text: text.into(),
            target,
        }
    }
}

/// Milliseconds since the Unix epoch (0 if the clock is before it).
pub fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}
