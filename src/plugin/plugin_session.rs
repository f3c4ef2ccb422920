use std::any::Any;
use std::sync::{
    Mutex,
    atomic::{AtomicBool, Ordering},
};

/// The mapping between a gateway handle and a plugin's own session state.
///
/// The handle owns this struct; the plugin keeps a non-owning `Arc` and must
/// check [`is_alive`](Self::is_alive) before acting on it. The core flips
/// `stopped` at the start of teardown so in-flight plugin callbacks observe a
/// valid but dead mapping instead of a dangling one.
pub struct PluginSession {
    /// The owning gateway handle.
    pub handle_id: u64,
    stopped: AtomicBool,
    /// Plugin-private state, opaque to the core.
    data: Mutex<Option<Box<dyn Any + Send>>>,
}

impl PluginSession {
    pub fn new(handle_id: u64) -> Self {
        Self {
            handle_id,
            stopped: AtomicBool::new(false),
            data: Mutex::new(None),
        }
    }

    /// False once the core has started tearing the handle down.
    pub fn is_alive(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }

    /// Mark the mapping dead. Called by the core, before `hangup_media` and
    /// `destroy_session` run.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Store plugin-private state.
    pub fn set_data<T: Any + Send>(&self, value: T) {
        *self.data.lock().unwrap() = Some(Box::new(value));
    }

    /// Run `f` over the plugin-private state, if set and of the right type.
    pub fn with_data<T: Any + Send, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut guard = self.data.lock().unwrap();
        guard.as_mut()?.downcast_mut::<T>().map(f)
    }

    /// Drop the plugin-private state.
    pub fn clear_data(&self) {
        *self.data.lock().unwrap() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_round_trip() {
        let s = PluginSession::new(42);
        assert!(s.is_alive());
        s.set_data(7u32);
        assert_eq!(s.with_data(|v: &mut u32| *v), Some(7));
        // wrong type: untouched
        assert_eq!(s.with_data(|v: &mut String| v.clone()), None);
        s.clear_data();
        assert_eq!(s.with_data(|v: &mut u32| *v), None);
    }

    #[test]
    fn stop_is_terminal() {
        let s = PluginSession::new(1);
        s.stop();
        assert!(!s.is_alive());
    }
}
