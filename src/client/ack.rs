/// Window-acknowledgement bookkeeping for one connection.
///
/// Mutated under the mutex shared between the reader thread and any writer
/// that emits the acknowledgement, so cumulative values are never
/// duplicated.
#[derive(Debug)]
pub struct AckTracker {
    window: u32,
    total: u64,
    last_ack: u64,
}

impl AckTracker {
    /// Create with the peer's initial window size
    pub fn new(window: u32) -> Self {
        AckTracker {
            window,
            total: 0,
            last_ack: 0,
        }
    }

    /// Update the peer-advertised window
    pub fn set_window(&mut self, window: u32) {
        self.window = window.max(1);
    }

    /// Current peer window
    pub fn window(&self) -> u32 {
        self.window
    }

    /// Cumulative bytes received
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Record received bytes. Returns the cumulative count to acknowledge
    /// when the window threshold is crossed.
    pub fn on_bytes(&mut self, n: usize) -> Option<u32> {
        self.total += n as u64;
        if self.total - self.last_ack >= self.window as u64 {
            self.last_ack = self.total;
            Some(self.total as u32)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_on_window_boundary() {
        let mut tracker = AckTracker::new(2_500_000);

        // 25 reads of 100,000 bytes land exactly on the window
        let mut acks = Vec::new();
        for _ in 0..50 {
            if let Some(v) = tracker.on_bytes(100_000) {
                acks.push(v);
            }
        }
        if let Some(v) = tracker.on_bytes(50) {
            acks.push(v);
        }

        assert_eq!(acks, vec![2_500_000, 5_000_000]);
        assert_eq!(tracker.total(), 5_000_050);
    }

    #[test]
    fn test_no_duplicate_ack_values() {
        let mut tracker = AckTracker::new(1000);
        let mut acks = Vec::new();
        for _ in 0..100 {
            if let Some(v) = tracker.on_bytes(333) {
                acks.push(v);
            }
        }
        let mut deduped = acks.clone();
        deduped.dedup();
        assert_eq!(acks, deduped);
        assert!(acks.len() >= 30);
    }

    #[test]
    fn test_window_update_applies() {
        let mut tracker = AckTracker::new(1_000_000);
        assert!(tracker.on_bytes(500_000).is_none());
        tracker.set_window(100_000);
        // Already half a megabyte past the new window
        assert_eq!(tracker.on_bytes(1), Some(500_001));
    }
}
