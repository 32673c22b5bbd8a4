//! Supplemented feature: debounced rescan triggering. Coalesces a
//! stream of raw filesystem notifications into at most one
//! `startScanning()` call per debounce window, the same shape as the
//! streaming indexer's debounce state in the wider corpus, trimmed to
//! what a single folder's watch loop needs.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct DebounceConfig {
    pub debounce: Duration,
    pub max_batch_wait: Duration,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(750),
            max_batch_wait: Duration::from_secs(3),
        }
    }
}

pub struct DebounceState {
    config: DebounceConfig,
    dirty: bool,
    first_event: Option<Instant>,
    last_event: Option<Instant>,
}

impl DebounceState {
    pub fn new(config: DebounceConfig) -> Self {
        Self {
            config,
            dirty: false,
            first_event: None,
            last_event: None,
        }
    }

    pub fn record_event(&mut self, now: Instant) {
        self.dirty = true;
        if self.first_event.is_none() {
            self.first_event = Some(now);
        }
        self.last_event = Some(now);
    }

    /// True once the quiet period has elapsed since the last event, or
    /// the max batch wait has elapsed since the first event in the
    /// current burst (so a steady trickle of events cannot starve a
    /// rescan indefinitely).
    pub fn should_run(&self, now: Instant) -> bool {
        if !self.dirty {
            return false;
        }
        let quiet_elapsed = self
            .last_event
            .map(|t| now.duration_since(t) >= self.config.debounce)
            .unwrap_or(false);
        let batch_elapsed = self
            .first_event
            .map(|t| now.duration_since(t) >= self.config.max_batch_wait)
            .unwrap_or(false);
        quiet_elapsed || batch_elapsed
    }

    /// The instant the driver loop should next wake up to re-check
    /// `should_run`, for use in a `tokio::select!` sleep branch.
    pub fn next_deadline(&self) -> Option<Instant> {
        if !self.dirty {
            return None;
        }
        let quiet_deadline = self.last_event.map(|t| t + self.config.debounce);
        let batch_deadline = self.first_event.map(|t| t + self.config.max_batch_wait);
        match (quiet_deadline, batch_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn reset(&mut self) {
        self.dirty = false;
        self.first_event = None;
        self.last_event = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn not_due_until_quiet_period_elapses() {
        let mut d = DebounceState::new(DebounceConfig {
            debounce: Duration::from_millis(50),
            max_batch_wait: Duration::from_secs(10),
        });
        let t0 = Instant::now();
        d.record_event(t0);
        assert!(!d.should_run(t0));
        assert!(d.should_run(t0 + Duration::from_millis(51)));
    }

    #[test]
    fn max_batch_wait_forces_a_run_under_constant_events() {
        let mut d = DebounceState::new(DebounceConfig {
            debounce: Duration::from_millis(50),
            max_batch_wait: Duration::from_millis(100),
        });
        let t0 = Instant::now();
        d.record_event(t0);
        d.record_event(t0 + Duration::from_millis(40));
        d.record_event(t0 + Duration::from_millis(80));
        // Quiet period keeps resetting, but max_batch_wait from t0 fires.
        assert!(d.should_run(t0 + Duration::from_millis(101)));
    }

    #[test]
    fn reset_clears_dirty_flag() {
        let mut d = DebounceState::new(DebounceConfig::default());
        d.record_event(Instant::now());
        d.reset();
        assert!(!d.should_run(Instant::now() + Duration::from_secs(5)));
    }
}
