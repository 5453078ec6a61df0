//! Render-time interpolation of networked samples

use std::collections::VecDeque;

/// One timestamped reading. Scalars use `y = 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub time: f64,
    pub x: f64,
    pub y: f64,
}

impl Sample {
    fn lerp(a: Sample, b: Sample, alpha: f64) -> Sample {
        Sample {
            time: a.time + (b.time - a.time) * alpha,
            x: a.x + (b.x - a.x) * alpha,
            y: a.y + (b.y - a.y) * alpha,
        }
    }
}

/// Bounded ring of samples queried `window` ms in the past.
///
/// Capacity is `ceil(window * size_coef / min_step) + 1`, enough to always
/// hold two samples bracketing the query time at the expected cadence. The
/// coefficient leaves headroom for bursts after jitter.
#[derive(Debug, Clone)]
pub struct Interpolator {
    window: f64,
    capacity: usize,
    samples: VecDeque<Sample>,
}

impl Interpolator {
    pub fn new(window: f64, min_step: f64, size_coef: f64) -> Self {
        let capacity = ((window * size_coef) / min_step.max(f64::EPSILON)).ceil() as usize + 1;
        let capacity = capacity.max(2);
        Self {
            window,
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Append a sample, evicting the oldest when full
    pub fn add(&mut self, time: f64, x: f64, y: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample { time, x, y });
    }

    /// Value at `time - window`. Clamped to the oldest sample when the
    /// query falls before it and to the newest when it runs past it.
    pub fn at(&mut self, time: f64) -> Option<Sample> {
        let time = time - self.window;
        self.clear_older_than(time);

        let first = *self.samples.front()?;
        let second = match self.samples.get(1) {
            Some(s) if first.time < time => *s,
            _ => return Some(first),
        };
        let span = second.time - first.time;
        if span <= 0.0 {
            return Some(second);
        }
        let alpha = ((time - first.time) / span).clamp(0.0, 1.0);
        Some(Sample::lerp(first, second, alpha))
    }

    /// True when two samples bracket the start of playback at `time`
    pub fn can_start(&self, time: f64) -> bool {
        self.samples.len() > 1 && self.samples.front().is_some_and(|s| s.time <= time - self.window)
    }

    pub fn has_data_for(&self, time: f64) -> bool {
        self.samples.back().is_some_and(|s| s.time >= time - self.window)
    }

    /// Drop samples that can no longer bracket `time`, keeping at least two
    fn clear_older_than(&mut self, time: f64) {
        while self.samples.len() > 2 && self.samples.get(1).is_some_and(|s| s.time < time) {
            self.samples.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}
