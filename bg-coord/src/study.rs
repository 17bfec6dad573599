// Copyright (c) Facebook, Inc. and its affiliates.
use anyhow::{Context, Result};
use glob::glob;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;

use bg_coord_intf::{Args, SlaAveraging};

// Labeled fields the generator prints into its summary. The extractor keys
// on these prefixes, one value per log.
pub const THROUGHPUT_PREFIX: &str = "OVERALLTHROUGHPUT(SESSIONS/SECS):";
pub const SATISFYING_PREFIX: &str = "[SatisfyingPerc] ";
pub const STALENESS_PREFIX: &str = "[OVERALL], Staleness(staleReads/totalReads), ";

/// First line containing `prefix` wins; the remainder of that line is the
/// value. Anything unparsable counts as not-found, never as an error.
pub fn extract_field(text: &str, prefix: &str) -> Option<f64> {
    for line in text.lines() {
        if let Some(idx) = line.find(prefix) {
            return line[idx + prefix.len()..].trim().parse::<f64>().ok();
        }
    }
    None
}

/// Reads every worker log tagged with `run` under `dir`, in filename order.
pub fn collect_run_logs(dir: &str, run: u32) -> Result<Vec<String>> {
    let pattern = format!("{}/BGMainClass-*-run-{}.log", dir, run);
    let mut paths: Vec<_> = glob(&pattern)
        .with_context(|| format!("Bad log glob pattern {:?}", &pattern))?
        .filter_map(|x| x.ok())
        .collect();
    paths.sort();

    debug!("study: Found {} worker logs for run {}", paths.len(), run);

    let mut logs = vec![];
    for path in paths.iter() {
        logs.push(
            fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?,
        );
    }
    Ok(logs)
}

/// One recorded trial outcome.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrialStat {
    pub throughput: f64,
    pub sla_met: bool,
}

/// The declared SLA plus the aggregation policy for combining per-worker
/// figures into a trial verdict.
#[derive(Debug, Clone, Copy)]
pub struct SlaPolicy {
    pub perc: f64,
    pub staleness: f64,
    pub validation: bool,
    pub averaging: SlaAveraging,
}

impl SlaPolicy {
    pub fn from_args(args: &Args) -> Self {
        Self {
            perc: args.perc,
            staleness: args.staleness,
            validation: args.validation,
            averaging: args.sla_averaging,
        }
    }

    /// Combines worker logs into a single (sla_met, throughput) verdict.
    /// Throughput adds up across workers. SLA percentage combines by the
    /// configured averaging; workers carry unequal load shares, so the
    /// weighted form is the default. A worker log that is absent or lacks
    /// a field fails the whole trial, it does not silently drop out.
    pub fn evaluate(&self, logs: &[String], nr_expected: usize) -> TrialStat {
        let mut total_tp = 0.0;
        let mut weighted_sla = 0.0;
        let mut plain_sla = 0.0;
        let mut weighted_stale = 0.0;
        let mut plain_stale = 0.0;
        let mut missing = false;

        if logs.len() < nr_expected {
            warn!(
                "study: Expected {} worker logs, found {}",
                nr_expected,
                logs.len()
            );
            missing = true;
        }

        for text in logs.iter() {
            let tp = extract_field(text, THROUGHPUT_PREFIX);
            let sp = extract_field(text, SATISFYING_PREFIX);
            match (tp, sp) {
                (Some(tp), Some(sp)) => {
                    total_tp += tp;
                    weighted_sla += sp * tp;
                    plain_sla += sp;
                    if self.validation {
                        match extract_field(text, STALENESS_PREFIX) {
                            Some(st) => {
                                weighted_stale += st * tp;
                                plain_stale += st;
                            }
                            None => {
                                warn!("study: Worker log missing staleness field");
                                missing = true;
                            }
                        }
                    }
                }
                _ => {
                    warn!("study: Worker log missing throughput or SLA field");
                    missing = true;
                    if let Some(tp) = tp {
                        total_tp += tp;
                    }
                }
            }
        }

        let sla_met = if missing || logs.is_empty() || total_tp <= 0.0 {
            false
        } else {
            let agg_sla = match self.averaging {
                SlaAveraging::ThroughputWeighted => weighted_sla / total_tp,
                SlaAveraging::Mean => plain_sla / logs.len() as f64,
            };
            let mut met = agg_sla >= self.perc;
            if self.validation {
                let agg_stale = match self.averaging {
                    SlaAveraging::ThroughputWeighted => weighted_stale / total_tp,
                    SlaAveraging::Mean => plain_stale / logs.len() as f64,
                };
                met = met && agg_stale <= self.staleness;
            }
            met
        };

        TrialStat {
            throughput: total_tp,
            sla_met,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn policy(perc: f64) -> SlaPolicy {
        SlaPolicy {
            perc,
            staleness: 1.0,
            validation: false,
            averaging: SlaAveraging::ThroughputWeighted,
        }
    }

    fn make_log(tp: f64, sp: f64) -> String {
        format!(
            "Still initializing...\n{} {}\n{}{}\nStop requested for workload. Now Joining!\n",
            THROUGHPUT_PREFIX, tp, SATISFYING_PREFIX, sp
        )
    }

    #[test]
    fn test_extract_field() {
        let log = make_log(123.4, 97.5);
        assert_eq!(extract_field(&log, THROUGHPUT_PREFIX), Some(123.4));
        assert_eq!(extract_field(&log, SATISFYING_PREFIX), Some(97.5));
        assert_eq!(extract_field(&log, STALENESS_PREFIX), None);
        assert_eq!(extract_field("", THROUGHPUT_PREFIX), None);
        assert_eq!(
            extract_field("OVERALLTHROUGHPUT(SESSIONS/SECS): oops\n", THROUGHPUT_PREFIX),
            None
        );
    }

    #[test]
    fn test_evaluate_single() {
        let stat = policy(95.0).evaluate(&[make_log(1000.0, 96.0)], 1);
        assert!(stat.sla_met);
        assert_eq!(stat.throughput, 1000.0);

        let stat = policy(95.0).evaluate(&[make_log(1000.0, 94.0)], 1);
        assert!(!stat.sla_met);
    }

    #[test]
    fn test_aggregation_idempotent_under_splitting() {
        let whole = policy(95.0).evaluate(&[make_log(1000.0, 96.0)], 1);
        let split = policy(95.0).evaluate(&[make_log(500.0, 96.0), make_log(500.0, 96.0)], 2);
        assert_eq!(whole.sla_met, split.sla_met);
        assert_eq!(whole.throughput, split.throughput);
    }

    #[test]
    fn test_weighted_vs_mean() {
        let logs = vec![make_log(900.0, 90.0), make_log(100.0, 99.0)];

        // weighted: (90*900 + 99*100) / 1000 = 90.9
        assert!(!policy(92.0).evaluate(&logs, 2).sla_met);

        // mean: (90 + 99) / 2 = 94.5
        let mut mean = policy(92.0);
        mean.averaging = SlaAveraging::Mean;
        assert!(mean.evaluate(&logs, 2).sla_met);
    }

    #[test]
    fn test_missing_fields_fail_conservatively() {
        // No labels at all: not met, no panic.
        let stat = policy(95.0).evaluate(&["no labeled lines here\n".to_string()], 1);
        assert!(!stat.sla_met);

        // One good worker, one mute worker: whole trial fails.
        let logs = vec![make_log(1000.0, 99.0), "garbage\n".to_string()];
        assert!(!policy(95.0).evaluate(&logs, 2).sla_met);

        // Fewer logs than workers: fails even if the present one is fine.
        assert!(!policy(95.0).evaluate(&[make_log(1000.0, 99.0)], 2).sla_met);

        // No logs at all.
        assert!(!policy(95.0).evaluate(&[], 1).sla_met);
    }

    #[test]
    fn test_zero_throughput_fails() {
        assert!(!policy(95.0).evaluate(&[make_log(0.0, 100.0)], 1).sla_met);
    }

    #[test]
    fn test_staleness_validation() {
        let mut log = make_log(1000.0, 99.0);
        log.push_str(&format!("{}0.5\n", STALENESS_PREFIX));

        let mut val = policy(95.0);
        val.validation = true;
        assert!(val.evaluate(&[log.clone()], 1).sla_met);

        val.staleness = 0.1;
        assert!(!val.evaluate(&[log], 1).sla_met);

        // Validation enabled but no staleness field.
        assert!(!val.evaluate(&[make_log(1000.0, 99.0)], 1).sla_met);
    }

    #[test]
    fn test_collect_run_logs() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().to_str().unwrap();
        for name in &[
            "BGMainClass-client-localhost-run-7.log",
            "BGMainClass-client-remote0-run-7.log",
            "BGMainClass-client-localhost-run-17.log",
            "BGMainLoad-7.log",
        ] {
            fs::write(dir.path().join(name), *name).unwrap();
        }

        let logs = collect_run_logs(base, 7).unwrap();
        assert_eq!(logs.len(), 2);
        assert!(logs[0].contains("localhost-run-7"));
        assert!(logs[1].contains("remote0-run-7"));
    }
}
