// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::{RegexTuningGoal, TuningGoal};

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_owned()).collect()
}

#[test]
fn averages_matching_pis() -> anyhow::Result<()> {
    let pi_names = names(&["n1/throughput", "n1/latency", "n1/cpu"]);
    let goal = RegexTuningGoal::new(&pi_names, "throughput|latency")?;
    let reward = goal.reward(&[0.8, 0.2, -0.9]);
    assert!((reward - 0.5).abs() < 1e-12);
    Ok(())
}

#[test]
fn single_match_passes_through() -> anyhow::Result<()> {
    let pi_names = names(&["n1/throughput", "n1/cpu"]);
    let goal = RegexTuningGoal::new(&pi_names, "throughput")?;
    assert_eq!(goal.reward(&[0.3, -1.0]), 0.3);
    Ok(())
}

#[test]
fn regex_is_a_search_not_a_full_match() -> anyhow::Result<()> {
    // A bare substring matches anywhere in the fully-qualified name.
    let pi_names = names(&["web-1/requests_per_sec"]);
    let goal = RegexTuningGoal::new(&pi_names, "requests")?;
    assert_eq!(goal.reward(&[0.7]), 0.7);
    Ok(())
}

#[test]
fn no_match_is_a_config_error() {
    let pi_names = names(&["n1/cpu"]);
    assert!(RegexTuningGoal::new(&pi_names, "memory").is_err());
}

#[test]
fn invalid_regex_is_a_config_error() {
    let pi_names = names(&["n1/cpu"]);
    assert!(RegexTuningGoal::new(&pi_names, "[unclosed").is_err());
}
