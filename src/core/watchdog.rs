//! The reaper: expires idle sessions and performs the deferred second phase
//! of handle teardown.

use crate::core::server::GatewayCore;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// How often the watchdog wakes up.
pub const WATCHDOG_TICK: Duration = Duration::from_millis(500);

pub fn spawn_watchdog(core: Arc<GatewayCore>, stop: Arc<AtomicBool>) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("gate-watchdog".into())
        .spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                thread::sleep(WATCHDOG_TICK);
                core.reap(Instant::now());
            }
        })
        .expect("spawning the watchdog")
}
