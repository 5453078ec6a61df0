//! Time utilities for game simulation

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Tick rate configuration
pub const SIMULATION_TPS: u32 = 20; // 20 ticks per second
/// Timestep in milliseconds
pub const TIMESTEP_MS: f64 = 1000.0 / SIMULATION_TPS as f64;
/// One second worth of ticks
pub const TICKS_1S: u64 = SIMULATION_TPS as u64;
/// Three seconds worth of ticks
pub const TICKS_3S: u64 = 3 * TICKS_1S;
/// Half a second worth of ticks
pub const TICKS_HALF_S: u64 = TICKS_1S / 2;

/// Calculate delta time for physics (in seconds)
pub fn tick_delta() -> f32 {
    1.0 / SIMULATION_TPS as f32
}

/// Convert a duration in seconds into whole ticks, rounding up
pub fn secs_to_ticks(secs: f32) -> u64 {
    // Table values like 1.2s are not exact in f32
    (secs * SIMULATION_TPS as f32 - 1e-3).ceil().max(0.0) as u64
}

/// Monotonic millisecond clock anchored at creation.
///
/// Schedulers and interpolators work in `f64` milliseconds; this is the
/// server-side source for them. Backed by tokio's clock so paused-time tests
/// drive it too.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: tokio::time::Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }

    pub fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }

    /// Instant corresponding to a millisecond reading of this clock
    pub fn instant_at(&self, ms: f64) -> tokio::time::Instant {
        self.origin + Duration::from_secs_f64(ms.max(0.0) / 1000.0)
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_constants() {
        assert_eq!(TIMESTEP_MS, 50.0);
        assert_eq!(TICKS_3S, 60);
        assert_eq!(TICKS_HALF_S, 10);
    }

    #[test]
    fn test_secs_to_ticks_rounds_up() {
        assert_eq!(secs_to_ticks(1.0), 20);
        assert_eq!(secs_to_ticks(1.2), 24);
        assert_eq!(secs_to_ticks(0.7), 14);
        assert_eq!(secs_to_ticks(0.71), 15);
    }
}
