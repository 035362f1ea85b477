// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Setter that applies actions by rewriting configuration files.
//!
//! Parameter writes buffer into in-memory copies of the target files; one
//! flush per action materialises each touched file exactly once, and each
//! distinct post-set hook (e.g. a service reload) runs at most once per
//! action no matter how many parameters requested it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::process::Command;

use regex::{NoExpand, RegexBuilder};
use tracing::{debug, info};

use super::normalize::{param_value_from_range, parse_range};
use super::{ProbeConfig, Setter};

/// One configured tunable parameter.
#[derive(Debug, Clone)]
struct ParameterInfo {
    short_name: String,
    config_file: String,
    /// Candidate value range; the normalized action maps linearly onto it.
    range: (f64, f64),
    post_set_cmd: Option<String>,
}

/// Config-file setter. Configured through `conf_file_setter_params` plus
/// `<name>_interval` / `<name>_config_file` / `<name>_config_line_regex` /
/// `<name>_config_new_line` / `<name>_candidate_values` and the optional
/// `<name>_post_set_cmd` sub-keys.
pub struct ConfFileSetter {
    parameter_names: Vec<String>,
    /// Parameters grouped by their set interval.
    parameters: BTreeMap<i64, Vec<ParameterInfo>>,
    /// Target files grouped by interval.
    config_files: BTreeMap<i64, BTreeSet<String>>,
    /// In-memory file images with `$name$` placeholders in place.
    file_images: HashMap<String, String>,
    /// Latest value per parameter. Values from other intervals are kept so
    /// a partial action never erases them from shared files.
    values: HashMap<String, String>,
}

impl ConfFileSetter {
    pub fn from_config(config: &ProbeConfig) -> anyhow::Result<Self> {
        let mut names: Vec<String> = config
            .require_str("conf_file_setter_params")?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect();
        if names.is_empty() {
            anyhow::bail!("conf_file_setter_params lists no parameters");
        }
        names.sort();

        let mut parameters: BTreeMap<i64, Vec<ParameterInfo>> = BTreeMap::new();
        let mut config_files: BTreeMap<i64, BTreeSet<String>> = BTreeMap::new();
        let mut file_images: HashMap<String, String> = HashMap::new();
        let mut parameter_names = Vec::with_capacity(names.len());
        for name in &names {
            let interval = config.require_i64(&format!("{name}_interval"))?;
            let config_file = config.require_str(&format!("{name}_config_file"))?.to_owned();
            if !file_images.contains_key(&config_file) {
                file_images.insert(config_file.clone(), std::fs::read_to_string(&config_file)?);
            }
            let line_regex = config.require_str(&format!("{name}_config_line_regex"))?;
            let regex = RegexBuilder::new(line_regex).multi_line(true).build()?;
            let new_line = config.require_str(&format!("{name}_config_new_line"))?;
            // NoExpand keeps the `$name$` placeholders literal instead of
            // treating them as capture-group references.
            if let Some(image) = file_images.get_mut(&config_file) {
                *image = regex.replace_all(image, NoExpand(new_line)).into_owned();
            }

            let cand_spec = config.require_str(&format!("{name}_candidate_values"))?;
            let range = parse_range(cand_spec).ok_or_else(|| {
                anyhow::anyhow!("cannot parse candidate values '{cand_spec}' for {name}")
            })?;
            let post_set_cmd =
                config.get_str(&format!("{name}_post_set_cmd")).map(str::to_owned);

            let full_name = format!("{}/{}", config.host, name);
            info!(
                parameter = %full_name,
                interval,
                config_file = %config_file,
                candidate_values = %cand_spec,
                "loaded parameter"
            );
            config_files.entry(interval).or_default().insert(config_file.clone());
            parameters.entry(interval).or_default().push(ParameterInfo {
                short_name: name.clone(),
                config_file,
                range,
                post_set_cmd,
            });
            parameter_names.push(full_name);
        }

        Ok(Self {
            parameter_names,
            parameters,
            config_files,
            file_images,
            values: HashMap::new(),
        })
    }

    fn resolve_interval(&self, interval: i64) -> anyhow::Result<i64> {
        if interval != -1 {
            return Ok(interval);
        }
        if self.parameters.len() != 1 {
            anyhow::bail!("interval -1 requires a single interval group");
        }
        self.parameters
            .keys()
            .next()
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no parameters configured"))
    }

    /// Write every touched file of this interval exactly once, with all
    /// known parameter values substituted.
    fn commit(&self, interval: i64) -> anyhow::Result<()> {
        for config_file in self.config_files.get(&interval).into_iter().flatten() {
            let Some(image) = self.file_images.get(config_file) else {
                continue;
            };
            let mut rendered = image.clone();
            for (name, value) in &self.values {
                rendered = rendered.replace(&format!("${name}$"), value);
            }
            std::fs::write(config_file, rendered)?;
            debug!(file = %config_file, "committed config file");
        }
        Ok(())
    }
}

impl Setter for ConfFileSetter {
    fn name(&self) -> &str {
        "conf_file"
    }

    fn parameter_names(&self) -> &[String] {
        &self.parameter_names
    }

    fn action(&mut self, interval: i64, actions: &[f64]) -> anyhow::Result<()> {
        let interval = self.resolve_interval(interval)?;
        let parameters = self
            .parameters
            .get(&interval)
            .ok_or_else(|| anyhow::anyhow!("no parameters for interval {interval}"))?
            .clone();
        if parameters.len() != actions.len() {
            anyhow::bail!(
                "received {} actions for {} parameters",
                actions.len(),
                parameters.len()
            );
        }

        let mut hooks: Vec<&str> = Vec::new();
        for (param, action_value) in parameters.iter().zip(actions) {
            let value = param_value_from_range(param.range.0, param.range.1, *action_value);
            self.values.insert(param.short_name.clone(), value);
            if let Some(ref cmd) = param.post_set_cmd {
                if !hooks.contains(&cmd.as_str()) {
                    hooks.push(cmd.as_str());
                }
            }
        }
        self.commit(interval)?;

        for cmd in hooks {
            debug!(%cmd, "running post-set hook");
            let output = Command::new("sh").arg("-c").arg(cmd).output()?;
            if !output.status.success() {
                anyhow::bail!(
                    "post-set hook '{cmd}' failed with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr)
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "conf_setter_tests.rs"]
mod tests;
