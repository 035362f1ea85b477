// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tuning-goal (reward) derivation from a PI vector.

use regex::Regex;

/// Pure PI-vector → reward function. The result must lie in [-1, 1].
pub trait TuningGoal: Send + Sync {
    fn reward(&self, pis: &[f64]) -> f64;
}

/// Averages the PI elements whose names match a configured regex.
pub struct RegexTuningGoal {
    pi_count: usize,
    indices: Vec<usize>,
}

impl RegexTuningGoal {
    /// Resolve the matching PI indices once, at construction. No match is a
    /// configuration error.
    pub fn new(pi_names: &[String], goal_regex: &str) -> anyhow::Result<Self> {
        let regex = Regex::new(goal_regex)?;
        let indices: Vec<usize> = pi_names
            .iter()
            .enumerate()
            .filter(|(_, name)| regex.is_match(name))
            .map(|(i, _)| i)
            .collect();
        if indices.is_empty() {
            anyhow::bail!("no PI name matches tuning_goal_regex '{goal_regex}'");
        }
        Ok(Self { pi_count: pi_names.len(), indices })
    }
}

impl TuningGoal for RegexTuningGoal {
    fn reward(&self, pis: &[f64]) -> f64 {
        debug_assert_eq!(pis.len(), self.pi_count);
        let sum: f64 = self.indices.iter().filter_map(|&i| pis.get(i)).sum();
        let reward = sum / self.indices.len() as f64;
        debug_assert!((-1.0..=1.0).contains(&reward));
        reward
    }
}

#[cfg(test)]
#[path = "goal_tests.rs"]
mod tests;
