// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Getter reading timestamped CSV records from local files or FIFOs.
//!
//! Each input line is `ts,field0,field1,...`. Collection asks for the
//! record matching a requested time; a line that is older than the request
//! is held back until a newer line proves no exact match will arrive, at
//! which point the held line is served (telemetry writers are not always
//! aligned to our tick boundary).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader};

use tracing::{debug, info, warn};

use super::normalize::{clip, normalize_from_range, parse_range};
use super::{Getter, ProbeConfig};

/// One configured performance indicator.
#[derive(Debug, Clone)]
struct PiInfo {
    full_name: String,
    input_file: String,
    field: usize,
    range: (f64, f64),
}

/// File-backed getter. Configured through `file_getter_params` plus
/// `<name>_input_file` / `<name>_field` / `<name>_range` / `<name>_interval`
/// sub-keys.
pub struct FileGetter {
    pi_names: Vec<String>,
    /// PIs grouped by their collection interval.
    pis: BTreeMap<i64, Vec<PiInfo>>,
    /// Input files grouped by interval.
    input_files: BTreeMap<i64, BTreeSet<String>>,
    readers: HashMap<String, BufReader<File>>,
    /// Last line read per file whose timestamp has not been consumed yet.
    lookbehind: HashMap<String, Vec<String>>,
}

impl FileGetter {
    pub fn from_config(config: &ProbeConfig) -> anyhow::Result<Self> {
        let mut names: Vec<String> = config
            .require_str("file_getter_params")?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect();
        if names.is_empty() {
            anyhow::bail!("file_getter_params lists no PIs");
        }
        // Sort by name so the PI layout is stable regardless of how the
        // user ordered the list.
        names.sort();

        let mut pis: BTreeMap<i64, Vec<PiInfo>> = BTreeMap::new();
        let mut input_files: BTreeMap<i64, BTreeSet<String>> = BTreeMap::new();
        let mut pi_names = Vec::with_capacity(names.len());
        for name in &names {
            let interval = config.require_i64(&format!("{name}_interval"))?;
            let input_file = config.require_str(&format!("{name}_input_file"))?.to_owned();
            let field = usize::try_from(config.require_i64(&format!("{name}_field"))?)
                .map_err(|_| anyhow::anyhow!("{name}_field must be non-negative"))?;
            let range_spec = config.require_str(&format!("{name}_range"))?;
            let range = parse_range(range_spec)
                .ok_or_else(|| anyhow::anyhow!("cannot parse range '{range_spec}' for {name}"))?;
            let full_name = format!("{}/{}", config.host, name);
            info!(
                pi = %full_name,
                interval,
                input_file = %input_file,
                range = %range_spec,
                "loaded range PI"
            );
            input_files.entry(interval).or_default().insert(input_file.clone());
            pis.entry(interval).or_default().push(PiInfo {
                full_name: full_name.clone(),
                input_file,
                field,
                range,
            });
            pi_names.push(full_name);
        }

        Ok(Self {
            pi_names,
            pis,
            input_files,
            readers: HashMap::new(),
            lookbehind: HashMap::new(),
        })
    }

    /// Resolve `-1` (apply to all) to the single configured interval.
    fn resolve_interval(&self, interval: i64) -> anyhow::Result<i64> {
        if interval != -1 {
            return Ok(interval);
        }
        if self.pis.len() != 1 {
            anyhow::bail!("interval -1 requires a single interval group");
        }
        self.pis.keys().next().copied().ok_or_else(|| anyhow::anyhow!("no PIs configured"))
    }

    /// Read lines until one matches `required_time`, maintaining the
    /// per-file lookbehind. Returns `None` when no suitable record exists
    /// yet.
    fn required_line(
        &mut self,
        file_name: &str,
        required_time: f64,
    ) -> anyhow::Result<Option<Vec<String>>> {
        // A previously held line may already satisfy the request.
        if let Some(prev) = self.lookbehind.get(file_name) {
            if line_ts(prev).is_some_and(|ts| ts >= required_time) {
                return Ok(self.lookbehind.remove(file_name));
            }
        }

        if !self.readers.contains_key(file_name) {
            // Read+write so a FIFO never delivers EOF when its writer
            // restarts.
            match OpenOptions::new().read(true).write(true).open(file_name) {
                Ok(file) => {
                    self.readers.insert(file_name.to_owned(), BufReader::new(file));
                }
                Err(err) => {
                    warn!(file = file_name, %err, "cannot open input file");
                    return Ok(None);
                }
            }
        }
        let readers = &mut self.readers;
        let lookbehind = &mut self.lookbehind;
        let Some(reader) = readers.get_mut(file_name) else {
            return Ok(None);
        };
        loop {
            let mut line = String::new();
            let read = reader.read_line(&mut line)?;
            if read == 0 {
                // Nothing more to read right now.
                return Ok(None);
            }
            let columns: Vec<String> =
                line.trim_end_matches(['\r', '\n']).split(',').map(str::to_owned).collect();
            debug!(file = file_name, line = %line.trim_end(), "read input line");
            let Some(ts) = line_ts(&columns) else {
                warn!(file = file_name, "skipping line without a numeric timestamp");
                continue;
            };
            if ts < required_time {
                lookbehind.insert(file_name.to_owned(), columns);
            } else if ts == required_time {
                lookbehind.remove(file_name);
                return Ok(Some(columns));
            } else {
                // Newer than requested: serve the held older line if we
                // have one, otherwise report nothing for this tick.
                let held = lookbehind.insert(file_name.to_owned(), columns);
                return Ok(held);
            }
        }
    }
}

fn line_ts(columns: &[String]) -> Option<f64> {
    columns.first().and_then(|c| c.trim().parse().ok())
}

impl Getter for FileGetter {
    fn name(&self) -> &str {
        "file"
    }

    fn pi_names(&self) -> &[String] {
        &self.pi_names
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        self.readers.clear();
        Ok(())
    }

    fn collect(&mut self, interval: i64, requested_time: f64) -> anyhow::Result<Vec<f64>> {
        let interval = self.resolve_interval(interval)?;
        let file_names: Vec<String> = self
            .input_files
            .get(&interval)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();

        let mut lines: HashMap<String, Vec<String>> = HashMap::new();
        for file_name in &file_names {
            match self.required_line(file_name, requested_time)? {
                Some(columns) => {
                    lines.insert(file_name.clone(), columns);
                }
                None => return Ok(Vec::new()),
            }
        }

        let pis = self.pis.get(&interval).cloned().unwrap_or_default();
        let mut result = Vec::with_capacity(pis.len());
        for pi in &pis {
            let raw: f64 = lines
                .get(&pi.input_file)
                .and_then(|cols| cols.get(pi.field))
                .and_then(|col| col.trim().parse().ok())
                .ok_or_else(|| {
                    anyhow::anyhow!("field {} missing for PI {}", pi.field, pi.full_name)
                })?;
            let value = normalize_from_range(pi.range.0, pi.range.1, raw);
            if !(-1.0..=1.0).contains(&value) {
                warn!(
                    pi = %pi.full_name,
                    raw,
                    "raw value outside the configured normalization range"
                );
            }
            result.push(clip(value, -1.0, 1.0));
        }
        Ok(result)
    }
}

#[cfg(test)]
#[path = "file_getter_tests.rs"]
mod tests;
