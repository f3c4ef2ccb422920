use crate::core::handle::Handle;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Idle time before the watchdog reaps a session.
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(60);

/// A signaling session: owned by a transport connection, owner of a set of
/// handles. Created on a client `create` request, destroyed on `destroy` or
/// by the idle-timeout reaper.
pub struct Session {
    pub id: u64,
    /// Which transport this session talks through, and the opaque client
    /// identifier on that transport.
    pub transport_package: String,
    pub transport_cookie: u64,
    pub created: Instant,
    last_activity: Mutex<Instant>,
    handles: Mutex<HashMap<u64, Arc<Handle>>>,
    destroyed: AtomicBool,
}

impl Session {
    pub fn new(id: u64, transport_package: &str, transport_cookie: u64) -> Arc<Self> {
        let now = Instant::now();
        Arc::new(Self {
            id,
            transport_package: transport_package.to_string(),
            transport_cookie,
            created: now,
            last_activity: Mutex::new(now),
            handles: Mutex::new(HashMap::new()),
            destroyed: AtomicBool::new(false),
        })
    }

    /// Any client activity (requests, keepalives) refreshes the timeout.
    pub fn touch(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    pub fn timed_out(&self, now: Instant) -> bool {
        now.duration_since(*self.last_activity.lock().unwrap()) >= SESSION_TIMEOUT
    }

    pub fn insert_handle(&self, handle: Arc<Handle>) {
        self.handles.lock().unwrap().insert(handle.id, handle);
    }

    pub fn handle(&self, id: u64) -> Option<Arc<Handle>> {
        self.handles.lock().unwrap().get(&id).cloned()
    }

    pub fn remove_handle(&self, id: u64) -> Option<Arc<Handle>> {
        self.handles.lock().unwrap().remove(&id)
    }

    pub fn handles(&self) -> Vec<Arc<Handle>> {
        self.handles.lock().unwrap().values().cloned().collect()
    }

    pub fn handle_count(&self) -> usize {
        self.handles.lock().unwrap().len()
    }

    pub fn mark_destroyed(&self) -> bool {
        !self.destroyed.swap(true, Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destroy_is_one_shot() {
        let s = Session::new(1, "gate.transport.channel", 7);
        assert!(!s.is_destroyed());
        assert!(s.mark_destroyed());
        assert!(!s.mark_destroyed());
        assert!(s.is_destroyed());
    }
}
