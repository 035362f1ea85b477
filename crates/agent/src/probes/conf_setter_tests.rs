// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::io::Write;
use std::path::Path;

use serde_json::{json, Map, Value};
use tempfile::TempDir;

use super::ConfFileSetter;
use crate::probes::{ProbeConfig, Setter};

fn write_conf(dir: &TempDir, name: &str, contents: &str) -> anyhow::Result<String> {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path)?;
    file.write_all(contents.as_bytes())?;
    Ok(path.to_string_lossy().into_owned())
}

fn two_param_config(
    conf_path: &str,
    marker_dir: &Path,
) -> Map<String, Value> {
    let marker = marker_dir.join("reloads");
    let hook = format!("echo x >> {}", marker.to_string_lossy());
    let mut extra = Map::new();
    extra.insert("conf_file_setter_params".into(), json!("cache_size, workers"));
    for name in ["cache_size", "workers"] {
        extra.insert(format!("{name}_interval"), json!(1));
        extra.insert(format!("{name}_config_file"), json!(conf_path));
        extra.insert(format!("{name}_post_set_cmd"), json!(hook.clone()));
    }
    extra.insert(
        "cache_size_config_line_regex".into(),
        json!("^cache_size .*$"),
    );
    extra.insert(
        "cache_size_config_new_line".into(),
        json!("cache_size $cache_size$;"),
    );
    extra.insert("cache_size_candidate_values".into(), json!("[128 512]"));
    extra.insert("workers_config_line_regex".into(), json!("^workers .*$"));
    extra.insert("workers_config_new_line".into(), json!("workers $workers$;"));
    extra.insert("workers_candidate_values".into(), json!("[1 9]"));
    extra
}

#[test]
fn parameter_names_are_sorted_and_host_qualified() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let conf = write_conf(&dir, "svc.conf", "cache_size 256;\nworkers 4;\n")?;
    let extra = two_param_config(&conf, dir.path());
    let setter = ConfFileSetter::from_config(&ProbeConfig { host: "n1", extra: &extra })?;
    assert_eq!(setter.parameter_names(), ["n1/cache_size", "n1/workers"]);
    Ok(())
}

#[test]
fn action_rewrites_the_file_once_with_both_values() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let conf = write_conf(&dir, "svc.conf", "cache_size 256;\nworkers 4;\nkeep this\n")?;
    let extra = two_param_config(&conf, dir.path());
    let mut setter = ConfFileSetter::from_config(&ProbeConfig { host: "n1", extra: &extra })?;

    // cache_size: 0.0 → 320; workers: 1.0 → 9.
    setter.action(-1, &[0.0, 1.0])?;
    let written = std::fs::read_to_string(&conf)?;
    assert_eq!(written, "cache_size 320;\nworkers 9;\nkeep this\n");
    Ok(())
}

#[test]
fn shared_post_set_hook_runs_once_per_action() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let conf = write_conf(&dir, "svc.conf", "cache_size 256;\nworkers 4;\n")?;
    let extra = two_param_config(&conf, dir.path());
    let mut setter = ConfFileSetter::from_config(&ProbeConfig { host: "n1", extra: &extra })?;

    setter.action(-1, &[0.5, -0.5])?;
    // Both parameters share one hook; it must have appended exactly one line.
    let marker = std::fs::read_to_string(dir.path().join("reloads"))?;
    assert_eq!(marker.lines().count(), 1);

    setter.action(-1, &[-1.0, 1.0])?;
    let marker = std::fs::read_to_string(dir.path().join("reloads"))?;
    assert_eq!(marker.lines().count(), 2);
    Ok(())
}

#[test]
fn failing_hook_is_an_error() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let conf = write_conf(&dir, "svc.conf", "cache_size 256;\nworkers 4;\n")?;
    let mut extra = two_param_config(&conf, dir.path());
    extra.insert("cache_size_post_set_cmd".into(), json!("exit 3"));
    extra.insert("workers_post_set_cmd".into(), json!("exit 3"));
    let mut setter = ConfFileSetter::from_config(&ProbeConfig { host: "n1", extra: &extra })?;
    assert!(setter.action(-1, &[0.0, 0.0]).is_err());
    Ok(())
}

#[test]
fn wrong_action_width_is_an_error() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let conf = write_conf(&dir, "svc.conf", "cache_size 256;\nworkers 4;\n")?;
    let extra = two_param_config(&conf, dir.path());
    let mut setter = ConfFileSetter::from_config(&ProbeConfig { host: "n1", extra: &extra })?;
    assert!(setter.action(-1, &[0.0]).is_err());
    Ok(())
}

#[test]
fn missing_config_file_is_an_init_error() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let extra = two_param_config("/nonexistent/svc.conf", dir.path());
    assert!(ConfFileSetter::from_config(&ProbeConfig { host: "n1", extra: &extra }).is_err());
    Ok(())
}
