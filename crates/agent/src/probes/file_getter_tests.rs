// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::io::Write;

use serde_json::{json, Map, Value};

use super::FileGetter;
use crate::probes::{Getter, ProbeConfig};

fn config_map(input_file: &str) -> Map<String, Value> {
    let mut extra = Map::new();
    extra.insert("file_getter_params".into(), json!("latency"));
    extra.insert("latency_interval".into(), json!(1));
    extra.insert("latency_input_file".into(), json!(input_file));
    extra.insert("latency_field".into(), json!(1));
    extra.insert("latency_range".into(), json!("[0 100]"));
    extra
}

fn getter_for(extra: &Map<String, Value>) -> anyhow::Result<FileGetter> {
    FileGetter::from_config(&ProbeConfig { host: "n1", extra })
}

#[test]
fn names_are_host_qualified_and_sorted() -> anyhow::Result<()> {
    let mut extra = config_map("/dev/null");
    extra.insert("file_getter_params".into(), json!("zz_second, latency"));
    extra.insert("zz_second_interval".into(), json!(1));
    extra.insert("zz_second_input_file".into(), json!("/dev/null"));
    extra.insert("zz_second_field".into(), json!(2));
    extra.insert("zz_second_range".into(), json!("[0 10]"));
    let getter = getter_for(&extra)?;
    assert_eq!(getter.pi_names(), ["n1/latency", "n1/zz_second"]);
    Ok(())
}

#[test]
fn missing_subkey_is_an_init_error() {
    let mut extra = config_map("/dev/null");
    extra.remove("latency_range");
    assert!(getter_for(&extra).is_err());
}

#[test]
fn exact_timestamp_match_is_normalized() -> anyhow::Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "9,10")?;
    writeln!(file, "10,75")?;
    let extra = config_map(&file.path().to_string_lossy());
    let mut getter = getter_for(&extra)?;
    let values = getter.collect(-1, 10.0)?;
    // 75 in [0, 100] → 0.5.
    assert_eq!(values, vec![0.5]);
    Ok(())
}

#[test]
fn older_line_is_served_once_a_newer_one_arrives() -> anyhow::Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    // Data for t=3 and t=5, but never t=4.
    writeln!(file, "3,25")?;
    writeln!(file, "5,100")?;
    let extra = config_map(&file.path().to_string_lossy());
    let mut getter = getter_for(&extra)?;
    // The t=5 line proves t=4 will never arrive, so t=3 is served.
    let values = getter.collect(-1, 4.0)?;
    assert_eq!(values, vec![-0.5]);
    // The held t=5 line satisfies the next request.
    let values = getter.collect(-1, 5.0)?;
    assert_eq!(values, vec![1.0]);
    Ok(())
}

#[test]
fn future_only_data_returns_empty() -> anyhow::Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "100,50")?;
    let extra = config_map(&file.path().to_string_lossy());
    let mut getter = getter_for(&extra)?;
    // Only a newer-than-requested record with nothing held: no data.
    assert!(getter.collect(-1, 10.0)?.is_empty());
    Ok(())
}

#[test]
fn no_data_yet_returns_empty() -> anyhow::Result<()> {
    let file = tempfile::NamedTempFile::new()?;
    let extra = config_map(&file.path().to_string_lossy());
    let mut getter = getter_for(&extra)?;
    assert!(getter.collect(-1, 10.0)?.is_empty());
    Ok(())
}

#[test]
fn unreadable_file_is_transient_not_fatal() -> anyhow::Result<()> {
    let extra = config_map("/nonexistent/telemetry.csv");
    let mut getter = getter_for(&extra)?;
    assert!(getter.collect(-1, 1.0)?.is_empty());
    Ok(())
}

#[test]
fn out_of_range_values_are_clipped() -> anyhow::Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "10,250")?;
    let extra = config_map(&file.path().to_string_lossy());
    let mut getter = getter_for(&extra)?;
    assert_eq!(getter.collect(-1, 10.0)?, vec![1.0]);
    Ok(())
}
