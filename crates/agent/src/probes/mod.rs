// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Probe contracts and the per-tick fanout.
//!
//! Getters produce normalized performance indicators, setters apply
//! normalized tuning actions. The session only ever talks to the trait
//! objects; concrete probes are chosen by name from the registry at
//! startup.

pub mod conf_setter;
pub mod file_getter;
pub mod normalize;

use serde_json::{Map, Value};
use tracing::{debug, warn};

/// A performance-indicator probe.
///
/// `collect` returning an empty vector means the probe has nothing for this
/// tick (transient unavailability); an `Err` is an agent-fatal condition.
pub trait Getter: Send {
    fn name(&self) -> &str;

    /// Acquire background resources. Called once before the first collect.
    fn start(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Release resources. Guaranteed to be called on all exits.
    fn stop(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Stable, fully-qualified PI names, in the order `collect` emits them.
    fn pi_names(&self) -> &[String];

    fn collect(&mut self, interval: i64, requested_time: f64) -> anyhow::Result<Vec<f64>>;
}

/// An actuator applying a slice of the action vector.
pub trait Setter: Send {
    fn name(&self) -> &str;

    fn start(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Stable parameter names; the length determines this setter's slice of
    /// the action vector.
    fn parameter_names(&self) -> &[String];

    fn action(&mut self, interval: i64, actions: &[f64]) -> anyhow::Result<()>;
}

/// Configuration view handed to probe constructors: the host name used to
/// qualify PI/parameter names plus the free-form extension keys.
pub struct ProbeConfig<'a> {
    pub host: &'a str,
    pub extra: &'a Map<String, Value>,
}

impl ProbeConfig<'_> {
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }

    pub fn require_str(&self, key: &str) -> anyhow::Result<&str> {
        self.get_str(key).ok_or_else(|| anyhow::anyhow!("missing probe config key '{key}'"))
    }

    pub fn require_i64(&self, key: &str) -> anyhow::Result<i64> {
        self.extra
            .get(key)
            .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok())))
            .ok_or_else(|| anyhow::anyhow!("probe config key '{key}' is not an integer"))
    }
}

/// Instantiate the configured getters, in configuration order.
pub fn build_getters(modules: &str, config: &ProbeConfig) -> anyhow::Result<Vec<Box<dyn Getter>>> {
    let mut getters: Vec<Box<dyn Getter>> = Vec::new();
    for module in split_modules(modules) {
        match module {
            "file" => getters.push(Box::new(file_getter::FileGetter::from_config(config)?)),
            other => anyhow::bail!("unknown getter module '{other}'"),
        }
    }
    Ok(getters)
}

/// Instantiate the configured setters, in configuration order.
pub fn build_setters(modules: &str, config: &ProbeConfig) -> anyhow::Result<Vec<Box<dyn Setter>>> {
    let mut setters: Vec<Box<dyn Setter>> = Vec::new();
    for module in split_modules(modules) {
        match module {
            "conf_file" => setters.push(Box::new(conf_setter::ConfFileSetter::from_config(config)?)),
            other => anyhow::bail!("unknown setter module '{other}'"),
        }
    }
    Ok(setters)
}

fn split_modules(modules: &str) -> impl Iterator<Item = &str> {
    modules.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// Collect from every getter in registration order and concatenate.
///
/// A getter returning nothing is logged and skipped; the others still
/// collect. An empty aggregate means the tick produces no PI frame.
pub fn collect_all(
    getters: &mut [Box<dyn Getter>],
    interval: i64,
    requested_time: f64,
) -> anyhow::Result<Vec<f64>> {
    let mut pi_data = Vec::new();
    for getter in getters.iter_mut() {
        let data = getter.collect(interval, requested_time)?;
        if data.is_empty() {
            warn!(getter = getter.name(), "getter returned no data");
        } else {
            debug!(getter = getter.name(), values = ?data, "collected");
            pi_data.extend(data);
        }
    }
    Ok(pi_data)
}

/// Split the action vector into per-setter slices, in registration order,
/// and apply each.
pub fn apply_action(
    setters: &mut [Box<dyn Setter>],
    interval: i64,
    actions: &[f64],
) -> anyhow::Result<()> {
    let expected: usize = setters.iter().map(|s| s.parameter_names().len()).sum();
    if actions.len() != expected {
        anyhow::bail!(
            "action vector length {} does not match {} registered parameters",
            actions.len(),
            expected
        );
    }
    let mut offset = 0;
    for setter in setters.iter_mut() {
        let len = setter.parameter_names().len();
        setter.action(interval, &actions[offset..offset + len])?;
        offset += len;
    }
    Ok(())
}

/// Merged PI name list: the tuning-goal name first, then every getter's
/// names in registration order.
pub fn merged_pi_names(tuning_goal_name: &str, getters: &[Box<dyn Getter>]) -> Vec<String> {
    let mut names = vec![tuning_goal_name.to_owned()];
    for getter in getters {
        names.extend(getter.pi_names().iter().cloned());
    }
    names
}

/// Merged parameter name list across all setters, in registration order.
pub fn merged_parameter_names(setters: &[Box<dyn Setter>]) -> Vec<String> {
    setters.iter().flat_map(|s| s.parameter_names().iter().cloned()).collect()
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
