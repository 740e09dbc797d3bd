//! Wormhole attack orchestrators: forward frames between an "entry" radio
//! near a victim and an "exit" radio near a gateway.

pub mod dedup;
pub mod downlink_delayed;
pub mod node;
pub mod rx2;

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

/// A listener never vetoes; it just observes. A panicking listener is
/// caught so it can't take the node task down with it.
pub type FrameListener = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// A filter can veto forwarding by returning `false`. All registered
/// filters must pass (AND-combined) for a frame to go through.
pub type UplinkFilter = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

#[derive(Clone, Default)]
pub struct Hooks {
    uplink_listeners: Arc<Mutex<Vec<FrameListener>>>,
    downlink_listeners: Arc<Mutex<Vec<FrameListener>>>,
    filters: Arc<Mutex<Vec<UplinkFilter>>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_uplink_listener(&self, listener: FrameListener) {
        self.uplink_listeners.lock().unwrap().push(listener);
    }

    pub fn add_downlink_listener(&self, listener: FrameListener) {
        self.downlink_listeners.lock().unwrap().push(listener);
    }

    pub fn add_filter(&self, filter: UplinkFilter) {
        self.filters.lock().unwrap().push(filter);
    }

    pub fn passes_filters(&self, payload: &[u8]) -> bool {
        self.filters.lock().unwrap().iter().all(|f| f(payload))
    }

    pub fn notify_uplink(&self, payload: &[u8]) {
        for listener in self.uplink_listeners.lock().unwrap().iter() {
            call_listener(listener, payload);
        }
    }

    pub fn notify_downlink(&self, payload: &[u8]) {
        for listener in self.downlink_listeners.lock().unwrap().iter() {
            call_listener(listener, payload);
        }
    }
}

fn call_listener(listener: &FrameListener, payload: &[u8]) {
    if panic::catch_unwind(AssertUnwindSafe(|| listener(payload))).is_err() {
        tracing::warn!("uplink/downlink listener panicked, ignoring");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn filter_veto_is_and_combined() {
        let hooks = Hooks::new();
        hooks.add_filter(Arc::new(|_: &[u8]| true));
        hooks.add_filter(Arc::new(|p: &[u8]| p.first() == Some(&0xAA)));
        assert!(hooks.passes_filters(&[0xAA]));
        assert!(!hooks.passes_filters(&[0xBB]));
    }

    #[test]
    fn listeners_fan_out_to_all() {
        let hooks = Hooks::new();
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let calls = calls.clone();
            hooks.add_uplink_listener(Arc::new(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            }));
        }
        hooks.notify_uplink(&[1]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn panicking_listener_does_not_stop_the_rest() {
        let hooks = Hooks::new();
        let calls = Arc::new(AtomicUsize::new(0));
        hooks.add_uplink_listener(Arc::new(|_| panic!("boom")));
        let after = calls.clone();
        hooks.add_uplink_listener(Arc::new(move |_| {
            after.fetch_add(1, Ordering::SeqCst);
        }));
        hooks.notify_uplink(&[1]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
