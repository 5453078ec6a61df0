//! Fixed-timestep scheduler
//!
//! Decouples logical ticks from wall-clock jitter. The owner calls
//! [`FixedTimestep::tick`] from whatever wall-clock callback it has (a tokio
//! sleep on the server, a render callback on the client). At most one logical
//! step happens per call, so an overloaded caller falls behind real time
//! instead of bursting to catch up.

/// Steps fire when the clock is within this many milliseconds of the deadline.
pub const DEADLINE_TOLERANCE_MS: f64 = 3.0;

/// Continuous time reading for render-side consumers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurrentTime {
    /// Continuous game time in ms since the tick origin
    pub time: f64,
    /// Progress towards the next tick
    pub alpha: f64,
}

/// Fixed-timestep driver.
///
/// All times are milliseconds on the caller's monotonic clock.
#[derive(Debug, Clone)]
pub struct FixedTimestep {
    timestep_ms: f64,
    ticks: i64,
    start_time: f64,
    next_tick: f64,
    enabled: bool,
}

impl FixedTimestep {
    pub fn new(timestep_ms: f64) -> Self {
        Self {
            timestep_ms,
            ticks: 0,
            start_time: 0.0,
            next_tick: 0.0,
            enabled: false,
        }
    }

    pub fn timestep_ms(&self) -> f64 {
        self.timestep_ms
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Current tick counter
    pub fn ticks(&self) -> i64 {
        self.ticks
    }

    /// Arm the scheduler.
    ///
    /// `origin_time` is the clock reading of tick 0, `first_deadline` the
    /// reading at which the first step fires, and `initial_tick` the counter
    /// value before that step (the first step yields `initial_tick + 1`).
    pub fn start(&mut self, origin_time: f64, first_deadline: f64, initial_tick: i64) {
        self.enabled = true;
        self.ticks = initial_tick;
        self.start_time = origin_time;
        self.next_tick = first_deadline;
    }

    /// Start immediately, treating `now` as the moment of `tick`.
    pub fn start_now_at_tick(&mut self, now: f64, tick: i64) {
        self.start(now - tick as f64 * self.timestep_ms, now, tick - 1);
    }

    /// Disable the scheduler. Calling it again is a no-op.
    pub fn stop(&mut self) {
        self.enabled = false;
    }

    /// Check the clock and step at most once.
    ///
    /// Returns the new tick number when a step happened; the caller runs its
    /// step callback for that tick.
    pub fn tick(&mut self, now: f64) -> Option<i64> {
        if !self.enabled {
            return None;
        }
        if now - self.next_tick > -DEADLINE_TOLERANCE_MS {
            self.ticks += 1;
            self.next_tick += self.timestep_ms;
            return Some(self.ticks);
        }
        None
    }

    /// Milliseconds until the next deadline, `None` when stopped.
    ///
    /// Zero when the deadline already passed (the caller is behind).
    pub fn time_until_next(&self, now: f64) -> Option<f64> {
        if !self.enabled {
            return None;
        }
        Some((self.next_tick - now).max(0.0))
    }

    /// Clock reading of the next deadline
    pub fn next_deadline(&self) -> Option<f64> {
        self.enabled.then_some(self.next_tick)
    }

    /// Current discrete game time in ms
    pub fn stepped_time(&self) -> f64 {
        self.ticks as f64 * self.timestep_ms
    }

    pub fn current_time(&self, now: f64) -> CurrentTime {
        CurrentTime {
            time: now - self.start_time,
            alpha: 1.0 - (self.next_tick - now) / self.timestep_ms,
        }
    }

    /// Whole seconds until `tick`, rounded up
    pub fn seconds_until(&self, tick: i64) -> i64 {
        ((tick - self.ticks) as f64 * (self.timestep_ms / 1000.0)).ceil() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_once_per_check() {
        let mut ts = FixedTimestep::new(50.0);
        ts.start(0.0, 0.0, -1);

        assert_eq!(ts.tick(0.0), Some(0));
        // Way behind real time: still only one step per call
        assert_eq!(ts.tick(1000.0), Some(1));
        assert_eq!(ts.tick(1000.0), Some(2));
        assert_eq!(ts.ticks(), 2);
    }

    #[test]
    fn test_tolerance_absorbs_early_callbacks() {
        let mut ts = FixedTimestep::new(50.0);
        ts.start(0.0, 50.0, 0);

        assert_eq!(ts.tick(40.0), None);
        assert_eq!(ts.tick(47.5), Some(1));
        assert_eq!(ts.next_deadline(), Some(100.0));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut ts = FixedTimestep::new(50.0);
        ts.start(0.0, 0.0, 0);
        ts.stop();
        let after_one = ts.clone();
        ts.stop();

        assert!(!ts.is_enabled());
        assert_eq!(ts.ticks(), after_one.ticks());
        assert_eq!(ts.time_until_next(10.0), None);
        assert_eq!(ts.tick(500.0), None);
    }

    #[test]
    fn test_start_now_at_tick() {
        let mut ts = FixedTimestep::new(50.0);
        ts.start_now_at_tick(1000.0, 10);

        assert_eq!(ts.tick(1000.0), Some(10));
        assert_eq!(ts.stepped_time(), 500.0);
        let current = ts.current_time(1025.0);
        assert!((current.time - 525.0).abs() < 1e-9);
        assert!((current.alpha - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_seconds_until() {
        let mut ts = FixedTimestep::new(50.0);
        ts.start(0.0, 0.0, 0);
        assert_eq!(ts.seconds_until(60), 3);
        assert_eq!(ts.seconds_until(61), 4);
    }
}
