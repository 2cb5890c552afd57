// Copyright 2015-2020 Eirene developers.
// This file is part of Eirene.

// Eirene is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// Eirene is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with Eirene.  If not, see <http://www.gnu.org/licenses/>.

//! Profiler hooks: rolling per-stage timing samples used to name the
//! current bottleneck and flag sustained high load, feeding the
//! auto-tuner's score and any operator-facing diagnostics. Sampled
//! timings fold into a rolling mean without retaining the full
//! history.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

/// The block-processing pipeline stages: header verification,
/// dependency analysis, batch execution, state transition, and
/// snapshot persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Verify,
    Dependency,
    BatchExecution,
    StateTransition,
    SnapshotPersist,
}

#[derive(Debug, Clone, Copy, Default)]
struct RollingStat {
    mean_nanos: f64,
    samples: u64,
}

impl RollingStat {
    fn record(&mut self, sample: Duration) {
        self.samples += 1;
        let x = sample.as_nanos() as f64;
        // Exponential moving average so recent samples dominate
        // without retaining the full history.
        let alpha = 2.0 / (self.samples.min(32) as f64 + 1.0);
        self.mean_nanos = if self.samples == 1 { x } else { self.mean_nanos + alpha * (x - self.mean_nanos) };
    }
}

/// Samples stage durations and reports the current bottleneck (the
/// stage with the highest rolling mean) and whether the pool is under
/// sustained high load (queue depth above a configurable fraction of
/// capacity for a configurable number of consecutive samples).
pub struct Profiler {
    stats: Mutex<HashMap<Stage, RollingStat>>,
    high_load_streak: std::sync::atomic::AtomicU32,
    high_load_threshold: f64,
    high_load_streak_required: u32,
}

impl Profiler {
    pub fn new(high_load_threshold: f64, high_load_streak_required: u32) -> Self {
        Profiler {
            stats: Mutex::new(HashMap::new()),
            high_load_streak: std::sync::atomic::AtomicU32::new(0),
            high_load_threshold: high_load_threshold.clamp(0.0, 1.0),
            high_load_streak_required: high_load_streak_required.max(1),
        }
    }

    pub fn record(&self, stage: Stage, duration: Duration) {
        self.stats.lock().entry(stage).or_default().record(duration);
    }

    /// The stage with the highest rolling mean duration, or `None` if
    /// nothing has been sampled yet.
    pub fn bottleneck(&self) -> Option<Stage> {
        self.stats
            .lock()
            .iter()
            .max_by(|a, b| a.1.mean_nanos.total_cmp(&b.1.mean_nanos))
            .map(|(stage, _)| *stage)
    }

    pub fn mean_duration(&self, stage: Stage) -> Option<Duration> {
        self.stats
            .lock()
            .get(&stage)
            .map(|s| Duration::from_nanos(s.mean_nanos.max(0.0) as u64))
    }

    /// Feeds one queue-occupancy observation (a fraction in `[0, 1]`)
    /// into the high-load streak counter, returning `true` once the
    /// streak has reached `high_load_streak_required`.
    pub fn observe_queue_occupancy(&self, occupancy: f64) -> bool {
        use std::sync::atomic::Ordering;
        if occupancy >= self.high_load_threshold {
            let streak = self.high_load_streak.fetch_add(1, Ordering::AcqRel) + 1;
            streak >= self.high_load_streak_required
        } else {
            self.high_load_streak.store(0, Ordering::Release);
            false
        }
    }

    pub fn is_high_load(&self) -> bool {
        self.high_load_streak.load(std::sync::atomic::Ordering::Acquire) >= self.high_load_streak_required
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bottleneck_is_none_with_no_samples() {
        let profiler = Profiler::new(0.8, 3);
        assert!(profiler.bottleneck().is_none());
    }

    #[test]
    fn bottleneck_identifies_the_slowest_recorded_stage() {
        let profiler = Profiler::new(0.8, 3);
        profiler.record(Stage::Verify, Duration::from_micros(50));
        profiler.record(Stage::BatchExecution, Duration::from_millis(5));
        profiler.record(Stage::Dependency, Duration::from_micros(10));
        assert_eq!(profiler.bottleneck(), Some(Stage::BatchExecution));
    }

    #[test]
    fn high_load_requires_a_sustained_streak() {
        let profiler = Profiler::new(0.8, 3);
        assert!(!profiler.observe_queue_occupancy(0.9));
        assert!(!profiler.observe_queue_occupancy(0.9));
        assert!(profiler.observe_queue_occupancy(0.9));
        assert!(profiler.is_high_load());
    }

    #[test]
    fn a_low_occupancy_sample_resets_the_streak() {
        let profiler = Profiler::new(0.8, 3);
        profiler.observe_queue_occupancy(0.9);
        profiler.observe_queue_occupancy(0.9);
        profiler.observe_queue_occupancy(0.1); // resets
        assert!(!profiler.observe_queue_occupancy(0.9));
        assert!(!profiler.is_high_load());
    }

    #[test]
    fn mean_duration_tracks_an_exponential_moving_average() {
        let profiler = Profiler::new(0.8, 3);
        for _ in 0..10 {
            profiler.record(Stage::StateTransition, Duration::from_millis(10));
        }
        let mean = profiler.mean_duration(Stage::StateTransition).unwrap();
        assert!(mean.as_millis() >= 9 && mean.as_millis() <= 11);
    }
}
