//! Cross-node deduplication: a single shared window catches the case where
//! an exit node's replay of a frame is then re-heard by an entry node.

use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const DEDUP_THRESHOLD: Duration = Duration::from_millis(500);

#[derive(Default)]
pub struct DedupWindow {
    seen: Mutex<Vec<(Vec<u8>, Instant)>>,
}

impl DedupWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if an identical payload was recorded within the last
    /// `DEDUP_THRESHOLD`. Otherwise records this one and returns `false`.
    pub fn is_duplicate(&self, payload: &[u8]) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock().unwrap();
        seen.retain(|(_, t)| now.duration_since(*t) < DEDUP_THRESHOLD);
        if seen.iter().any(|(p, _)| p.as_slice() == payload) {
            true
        } else {
            seen.push((payload.to_vec(), now));
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn s6_dedup_within_window_then_after() {
        let window = DedupWindow::new();
        assert!(!window.is_duplicate(&[0xAA]));
        sleep(Duration::from_millis(100));
        assert!(window.is_duplicate(&[0xAA]));
        sleep(Duration::from_millis(700));
        assert!(!window.is_duplicate(&[0xAA]));
    }

    #[test]
    fn distinct_payloads_never_collide() {
        let window = DedupWindow::new();
        assert!(!window.is_duplicate(&[1, 2, 3]));
        assert!(!window.is_duplicate(&[1, 2, 4]));
    }
}
