use std::time::{Duration, Instant};

/// Leading-edge debounce: the first check passes, later checks within
/// `window` of the last passing one are dropped.
#[derive(Debug)]
pub struct DebounceGate {
    window: Duration,
    last_pass: Option<Instant>,
}

impl DebounceGate {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_pass: None,
        }
    }

    pub fn try_pass(&mut self, now: Instant) -> bool {
        match self.last_pass {
            Some(last) if now.saturating_duration_since(last) < self.window => false,
            _ => {
                self.last_pass = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leading_edge_passes_then_suppresses() {
        let mut gate = DebounceGate::new(Duration::from_secs(10));
        let start = Instant::now();
        assert!(gate.try_pass(start));
        assert!(!gate.try_pass(start + Duration::from_secs(3)));
        assert!(!gate.try_pass(start + Duration::from_millis(9_999)));
        assert!(gate.try_pass(start + Duration::from_secs(10)));
    }

    #[test]
    fn test_suppressed_checks_do_not_extend_window() {
        let mut gate = DebounceGate::new(Duration::from_secs(10));
        let start = Instant::now();
        assert!(gate.try_pass(start));
        assert!(!gate.try_pass(start + Duration::from_secs(8)));
        assert!(gate.try_pass(start + Duration::from_secs(11)));
    }
}
