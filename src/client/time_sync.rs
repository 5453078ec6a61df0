//! Estimating the local-clock moment play starts

/// Below this many samples the trimmed estimate is not trusted
const MIN_SAMPLES: usize = 4;

/// Collects "play starts in N ticks" observations during the countdown and
/// turns them into one start time on the local clock.
#[derive(Debug, Clone)]
pub struct StartTimeSync {
    timestep_ms: f64,
    estimates: Vec<f64>,
}

impl StartTimeSync {
    pub fn new(timestep_ms: f64) -> Self {
        Self {
            timestep_ms,
            estimates: Vec::new(),
        }
    }

    /// Record that `ticks_left` ticks remained at local time `now_ms`
    pub fn add_time_point(&mut self, now_ms: f64, ticks_left: u64) {
        self.estimates.push(now_ms + ticks_left as f64 * self.timestep_ms);
    }

    pub fn len(&self) -> usize {
        self.estimates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.estimates.is_empty()
    }

    /// Mean of the middle half, then re-averaged over the samples within one
    /// timestep of it. Falls back to the plain mean when too few samples
    /// survive either stage. `None` without samples.
    pub fn estimate(&self) -> Option<f64> {
        if self.estimates.is_empty() {
            return None;
        }
        let mut sorted = self.estimates.clone();
        sorted.sort_by(f64::total_cmp);

        let n = sorted.len();
        let start = n / 4;
        let end = (n * 3).div_ceil(4);
        let middle = &sorted[start..end];
        if middle.len() < MIN_SAMPLES {
            return Some(mean(&sorted));
        }

        let trimmed = mean(middle);
        let kept: Vec<f64> = sorted
            .iter()
            .copied()
            .filter(|v| (v - trimmed).abs() <= self.timestep_ms)
            .collect();
        if kept.len() < MIN_SAMPLES {
            return Some(trimmed);
        }
        Some(mean(&kept))
    }

    pub fn clear(&mut self) {
        self.estimates.clear();
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}
