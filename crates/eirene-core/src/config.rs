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

//! Tunable parameters, collected in one plain-data struct with a
//! `Default` impl matching the documented defaults. No file-format
//! parsing lives here; loading configuration is the host's job.

/// Proof-of-stake consensus configuration. Plain data; every field
/// carries a production default.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Target inter-block interval, in seconds.
    pub period: u64,
    /// Blocks per epoch; validator set changes activate at epoch boundaries.
    pub epoch: u64,
    /// Height interval at which snapshots are durably persisted.
    pub checkpoint_interval: u64,
    /// Maximum size of the active validator set.
    pub max_validators: usize,
    /// Minimum stake, in wei, required to be an active validator.
    pub min_stake: ethereum_types::U256,
    /// Fraction of the validator set, by weight, required for BFT consensus.
    pub consensus_threshold: f64,
    /// Blocks after which unverified evidence expires.
    pub evidence_expiry_blocks: u64,
    /// Blocks between block-time controller adjustments.
    pub adjustment_interval: u64,
    /// `k` in the block-time controller's `P' = P * (1 + f*k)`.
    pub adjustment_factor: f64,
    /// Floor on the worker pool's size.
    pub worker_min: usize,
    /// Ceiling on the worker pool's size.
    pub worker_max: usize,
    /// Bounded task queue capacity for the worker pool.
    pub queue_size: usize,
    /// Capacity of the LRU read cache.
    pub cache_size: usize,
    /// Transactions buffered between state flushes.
    pub batch_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            period: 4,
            epoch: 30_000,
            checkpoint_interval: 1_024,
            max_validators: 100,
            min_stake: ethereum_types::U256::from(1_000u64) * ethereum_types::U256::exp10(18),
            consensus_threshold: 2.0 / 3.0,
            evidence_expiry_blocks: 100_000,
            adjustment_interval: 100,
            adjustment_factor: 0.2,
            worker_min: 2,
            worker_max: 2 * num_cpus::get(),
            queue_size: 1_000,
            cache_size: 1_024,
            batch_size: 100,
        }
    }
}

/// Minimum and maximum bounds on the block-time controller's target
/// period, expressed in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeriodBounds {
    pub min: u64,
    pub max: u64,
}

impl Default for PeriodBounds {
    fn default() -> Self {
        PeriodBounds { min: 1, max: 30 }
    }
}

/// Slashing parameters for the two evidence kinds. Ratios are
/// expressed as a fraction of stake in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlashingConfig {
    pub double_sign_ratio: f64,
    pub double_sign_jail_period: u64,
    pub downtime_ratio: f64,
    pub downtime_jail_period: u64,
}

impl Default for SlashingConfig {
    fn default() -> Self {
        SlashingConfig {
            double_sign_ratio: 0.05,
            double_sign_jail_period: 86_400,
            downtime_ratio: 0.001,
            downtime_jail_period: 600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_table() {
        let c = Config::default();
        assert_eq!(c.period, 4);
        assert_eq!(c.epoch, 30_000);
        assert_eq!(c.checkpoint_interval, 1_024);
        assert_eq!(c.max_validators, 100);
        assert_eq!(c.evidence_expiry_blocks, 100_000);
        assert_eq!(c.adjustment_interval, 100);
        assert!((c.adjustment_factor - 0.2).abs() < 1e-9);
        assert_eq!(c.worker_min, 2);
        assert_eq!(c.queue_size, 1_000);
        assert_eq!(c.cache_size, 1_024);
        assert_eq!(c.batch_size, 100);
    }
}
