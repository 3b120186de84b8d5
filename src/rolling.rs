//! One-second rolling-window throughput accumulator.
//!
//! Used identically for a single [`crate::part::Part`]'s transfer rate and
//! for the download-wide counter: each incoming chunk of length `L` lands in
//! the bucket for the current wall-clock second; when the second changes,
//! the previous bucket's total becomes the published "speed" sample.

use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current Unix time truncated to whole seconds.
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Default)]
pub struct RollingWindow {
    history_num: u64,
    history_time: i64,
}

impl RollingWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a chunk of `len` bytes arriving at second `t` into the window.
    ///
    /// Returns `Some(speed)` when `t` rolled the window over to a new
    /// second, where `speed` is the total bytes seen during the just-closed
    /// second. Returns `None` when `t` is still within the current second.
    pub fn add_bytes(&mut self, len: u64, t: i64) -> Option<u64> {
        if t != self.history_time {
            let published = self.history_num;
            self.history_time = t;
            self.history_num = len;
            Some(published)
        } else {
            self.history_num += len;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_within_same_second() {
        let mut w = RollingWindow::new();
        assert_eq!(w.add_bytes(10, 5), Some(0));
        assert_eq!(w.add_bytes(20, 5), None);
        assert_eq!(w.history_num, 30);
    }

    #[test]
    fn rolls_over_on_new_second_and_publishes_prior_total() {
        let mut w = RollingWindow::new();
        w.add_bytes(10, 5);
        w.add_bytes(20, 5);
        let published = w.add_bytes(5, 6);
        assert_eq!(published, Some(30));
        assert_eq!(w.history_num, 5);
    }
}
