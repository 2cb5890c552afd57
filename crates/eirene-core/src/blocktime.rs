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

//! Block-time controller: adjusts the target inter-block period once
//! per adjustment interval from three observed signals — network
//! load, transaction throughput, and validator performance — each
//! clamped to a unit deviation and averaged into one multiplicative
//! correction.

use parking_lot::RwLock;

use crate::config::PeriodBounds;

/// One adjustment interval's worth of observed signals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Signals {
    /// Network load, as a fraction of capacity, in `[0, 1]`.
    pub network_load: f64,
    /// Observed transactions per second over the interval.
    pub current_tps: f64,
    /// Mean validator performance (uptime-weighted), in `[0, 1]`.
    pub avg_performance: f64,
}

/// Set points the three signals are measured against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Network load above this pushes the period up.
    pub load_threshold: f64,
    /// Throughput below this pushes the period up.
    pub tps_threshold: f64,
    /// Performance below this pushes the period up.
    pub perf_min: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            load_threshold: 0.7,
            tps_threshold: 1_000.0,
            perf_min: 0.9,
        }
    }
}

fn clamp_signal(x: f64) -> f64 {
    x.clamp(-1.0, 1.0)
}

/// Maintains the current target block period, adjusting it once per
/// adjustment interval with `P' = clamp(round(P * (1 + f*k)), bounds)`,
/// where `f` averages the three clamped signal deviations.
pub struct BlockTimeController {
    period: RwLock<u64>,
    bounds: PeriodBounds,
    thresholds: Thresholds,
    adjustment_factor: f64,
}

impl BlockTimeController {
    pub fn new(initial_period: u64, bounds: PeriodBounds, adjustment_factor: f64) -> Self {
        BlockTimeController::with_thresholds(
            initial_period,
            bounds,
            Thresholds::default(),
            adjustment_factor,
        )
    }

    pub fn with_thresholds(
        initial_period: u64,
        bounds: PeriodBounds,
        thresholds: Thresholds,
        adjustment_factor: f64,
    ) -> Self {
        BlockTimeController {
            period: RwLock::new(initial_period.clamp(bounds.min, bounds.max)),
            bounds,
            thresholds,
            adjustment_factor,
        }
    }

    /// The current target inter-block interval, fed into header `time`
    /// computation during `prepare`.
    pub fn target_period(&self) -> u64 {
        *self.period.read()
    }

    /// Overrides the target directly (the auto-tuner's block-time knob),
    /// clamped to the configured bounds.
    pub fn set_target_period(&self, period: u64) {
        *self.period.write() = period.clamp(self.bounds.min, self.bounds.max);
    }

    /// Applies one adjustment step from `signals`, returning the new
    /// target period in seconds.
    ///
    /// Each signal contributes a deviation in `[-1, 1]`: overload and
    /// underperformance lengthen the period, spare throughput capacity
    /// shortens it, and the three deviations are averaged before being
    /// scaled by the adjustment factor.
    pub fn adjust(&self, signals: &Signals) -> u64 {
        let t = &self.thresholds;
        let f_net = clamp_signal(2.0 * (signals.network_load - t.load_threshold));
        let f_tps = if t.tps_threshold > 0.0 {
            clamp_signal((t.tps_threshold - signals.current_tps) / t.tps_threshold)
        } else {
            0.0
        };
        let f_perf = clamp_signal(2.0 * (t.perf_min - signals.avg_performance));
        let f = (f_net + f_tps + f_perf) / 3.0;

        let mut period = self.period.write();
        let updated = (*period as f64 * (1.0 + f * self.adjustment_factor)).round() as u64;
        *period = updated.clamp(self.bounds.min, self.bounds.max);
        log::debug!(
            target: "blocktime",
            "adjusted target period to {}s (f={:.4}, net={:.2}, tps={:.2}, perf={:.2})",
            *period, f, f_net, f_tps, f_perf
        );
        *period
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> BlockTimeController {
        BlockTimeController::new(4, PeriodBounds { min: 1, max: 30 }, 0.2)
    }

    /// Signal values whose three deviations cancel to zero.
    fn neutral() -> Signals {
        Signals {
            network_load: 0.7,
            current_tps: 1_000.0,
            avg_performance: 0.9,
        }
    }

    #[test]
    fn neutral_signals_leave_the_period_unchanged() {
        let c = controller();
        assert_eq!(c.adjust(&neutral()), 4);
    }

    #[test]
    fn overload_and_poor_performance_lengthen_the_period() {
        let c = controller();
        let updated = c.adjust(&Signals {
            network_load: 1.0,
            current_tps: 100.0,
            avg_performance: 0.4,
        });
        assert!(updated > 4, "expected period to lengthen, got {}", updated);
    }

    #[test]
    fn spare_throughput_capacity_shortens_the_period() {
        let c = BlockTimeController::new(10, PeriodBounds { min: 1, max: 30 }, 0.5);
        let updated = c.adjust(&Signals {
            network_load: 0.1,
            current_tps: 5_000.0,
            avg_performance: 1.0,
        });
        assert!(updated < 10, "expected period to shorten, got {}", updated);
    }

    #[test]
    fn period_stays_within_bounds_for_extreme_signal_tuples() {
        let extremes = [0.0, 0.5, 1.0];
        let tps = [0.0, 1_000.0, 1_000_000.0];
        for &load in &extremes {
            for &t in &tps {
                for &perf in &extremes {
                    let c = BlockTimeController::new(4, PeriodBounds { min: 2, max: 8 }, 10.0);
                    for _ in 0..10 {
                        let updated = c.adjust(&Signals {
                            network_load: load,
                            current_tps: t,
                            avg_performance: perf,
                        });
                        assert!((2..=8).contains(&updated));
                    }
                }
            }
        }
    }

    #[test]
    fn set_target_period_is_clamped_to_bounds() {
        let c = controller();
        c.set_target_period(100);
        assert_eq!(c.target_period(), 30);
        c.set_target_period(0);
        assert_eq!(c.target_period(), 1);
    }
}
