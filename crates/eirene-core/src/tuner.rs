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

//! Auto-tuner: a small hill-climbing registry over the runtime's
//! adjustable knobs (worker pool size, batch size, cache size,
//! block-time target). Each tuning interval either perturbs a random
//! parameter or continues in the direction that improved the sampled
//! score last time, with the exploration rate decaying geometrically
//! to a floor.

use std::collections::HashMap;

use parking_lot::Mutex;
use rand::Rng;

/// One tunable knob's bounds, step size, and contribution weight to
/// the tuner's scalar score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Parameter {
    pub current: f64,
    pub min: f64,
    pub max: f64,
    pub step_size: f64,
    pub weight: f64,
}

impl Parameter {
    pub fn new(current: f64, min: f64, max: f64, step_size: f64, weight: f64) -> Self {
        Parameter { current, min, max, step_size, weight }
    }

    fn clamp(&mut self) {
        self.current = self.current.clamp(self.min, self.max);
    }
}

struct History {
    last_direction: f64,
    last_score: Option<f64>,
}

/// Owns the parameter registry and the exploration schedule.
/// `tick` should be called once per `tuningInterval`.
pub struct AutoTuner {
    params: Mutex<HashMap<String, (Parameter, History)>>,
    exploration_rate: Mutex<f64>,
    exploration_floor: f64,
    exploration_decay: f64,
}

const DEFAULT_EXPLORATION_RATE: f64 = 0.3;
const DEFAULT_EXPLORATION_FLOOR: f64 = 0.02;
const DEFAULT_EXPLORATION_DECAY: f64 = 0.97;

impl AutoTuner {
    pub fn new() -> Self {
        AutoTuner {
            params: Mutex::new(HashMap::new()),
            exploration_rate: Mutex::new(DEFAULT_EXPLORATION_RATE),
            exploration_floor: DEFAULT_EXPLORATION_FLOOR,
            exploration_decay: DEFAULT_EXPLORATION_DECAY,
        }
    }

    pub fn register(&self, name: &str, param: Parameter) {
        self.params.lock().insert(
            name.to_string(),
            (param, History { last_direction: 1.0, last_score: None }),
        );
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.params.lock().get(name).map(|(p, _)| p.current)
    }

    pub fn exploration_rate(&self) -> f64 {
        *self.exploration_rate.lock()
    }

    /// One tuning step: given the latest sampled `score` (higher is
    /// better), either perturbs a random parameter (with probability
    /// `exploration_rate`) or nudges the previously-perturbed
    /// parameter further in the direction that improved the score.
    pub fn tick(&self, score: f64) {
        let mut params = self.params.lock();
        if params.is_empty() {
            return;
        }
        let mut rng = rand::thread_rng();
        let explore = rng.gen_bool((*self.exploration_rate.lock()).clamp(0.0, 1.0));

        let names: Vec<String> = params.keys().cloned().collect();
        let chosen = if explore {
            names[rng.gen_range(0, names.len())].clone()
        } else {
            // Exploit: move whichever parameter most recently improved
            // the score, continuing in its last direction. Falls back
            // to a random parameter if nothing has a recorded score yet.
            names
                .iter()
                .find(|n| params.get(*n).map(|(_, h)| h.last_score.is_some()).unwrap_or(false))
                .cloned()
                .unwrap_or_else(|| names[rng.gen_range(0, names.len())].clone())
        };

        if let Some((param, history)) = params.get_mut(&chosen) {
            let improved = history.last_score.map(|prev| score > prev).unwrap_or(true);
            let direction = if improved { history.last_direction } else { -history.last_direction };
            param.current += direction * param.step_size;
            param.clamp();
            history.last_direction = direction;
            history.last_score = Some(score);
            log::debug!(
                target: "tuner",
                "tuned {} to {:.3} (direction={:.0}, score={:.4})",
                chosen, param.current, direction, score
            );
        }

        drop(params);
        let mut rate = self.exploration_rate.lock();
        *rate = (*rate * self.exploration_decay).max(self.exploration_floor);
    }
}

impl Default for AutoTuner {
    fn default() -> Self {
        AutoTuner::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_parameter_value_is_retrievable() {
        let tuner = AutoTuner::new();
        tuner.register("worker_pool_size", Parameter::new(4.0, 2.0, 16.0, 1.0, 1.0));
        assert_eq!(tuner.value("worker_pool_size"), Some(4.0));
        assert_eq!(tuner.value("missing"), None);
    }

    #[test]
    fn tick_keeps_every_parameter_within_its_bounds() {
        let tuner = AutoTuner::new();
        tuner.register("batch_size", Parameter::new(100.0, 10.0, 120.0, 50.0, 1.0));
        for i in 0..200 {
            tuner.tick(i as f64 % 5.0);
        }
        let v = tuner.value("batch_size").unwrap();
        assert!(v >= 10.0 && v <= 120.0);
    }

    #[test]
    fn exploration_rate_decays_toward_the_floor() {
        let tuner = AutoTuner::new();
        tuner.register("cache_size", Parameter::new(1024.0, 128.0, 8192.0, 128.0, 1.0));
        let initial = tuner.exploration_rate();
        for _ in 0..500 {
            tuner.tick(1.0);
        }
        let later = tuner.exploration_rate();
        assert!(later < initial);
        assert!(later >= DEFAULT_EXPLORATION_FLOOR - 1e-9);
    }

    #[test]
    fn tick_on_an_empty_registry_is_a_no_op() {
        let tuner = AutoTuner::new();
        tuner.tick(1.0); // must not panic
    }

    #[test]
    fn improving_score_continues_in_the_same_direction() {
        let tuner = AutoTuner::new();
        tuner.register("only", Parameter::new(0.0, -100.0, 100.0, 1.0, 1.0));
        tuner.tick(1.0);
        let after_first = tuner.value("only").unwrap();
        // Force exploitation by registering only one parameter, so the
        // exploit branch always selects it regardless of the dice roll.
        tuner.tick(2.0); // improved: keep moving the same direction
        let after_second = tuner.value("only").unwrap();
        let first_delta = after_first - 0.0;
        let second_delta = after_second - after_first;
        if first_delta != 0.0 {
            assert_eq!(first_delta.signum(), second_delta.signum());
        }
    }
}
