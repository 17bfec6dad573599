// Copyright (c) Facebook, Inc. and its affiliates.
use anyhow::{bail, Context, Result};
use glob::glob;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::launcher::{Launcher, Role, LOAD_COMPLETE_MARKERS, RUN_COMPLETE_MARKERS};
use crate::monitor::MonitorShim;
use crate::progress::TrialProgress;
use crate::search::Prober;
use crate::study::{collect_run_logs, SlaPolicy, TrialStat};
use crate::watcher::{watch, MarkerDetector};
use bg_coord_intf::{Args, WorkloadProps};
use bg_util::remote::SshOpts;
use bg_util::{format_unix_time, prog_exiting, unix_now};

// Wall-clock slack past the generator's own execution-time bound before a
// run process is declared hung and killed.
const WATCH_GRACE_SECS: u64 = 120;

// Load and clear have no execution-time bound of their own.
const LOAD_TIMEOUT_SECS: u64 = 3600;

const WARMUP_THREADS: u32 = 10;

/// Splits `threads` across `nr_clients` as evenly as possible, remainder
/// going to the first clients.
fn split_threads(threads: u32, nr_clients: usize) -> Vec<u32> {
    let nr_clients = nr_clients.max(1) as u32;
    (0..nr_clients)
        .map(|i| threads / nr_clients + if i < threads % nr_clients { 1 } else { 0 })
        .collect()
}

fn client_file_tag(client: &str) -> String {
    client.replace('.', "-")
}

fn save_log(dir: &str, file_name: &str, content: &str) -> Result<()> {
    let path = Path::new(dir).join(file_name);
    fs::write(&path, content).with_context(|| format!("Failed to write {:?}", &path))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrialRecord {
    pub threads: u32,
    pub run: u32,
    pub throughput: f64,
    pub sla_met: bool,
}

/// Owns everything one trial needs: the launcher, the SLA policy, the
/// completion detectors and the monitoring hookup. This is the real
/// `Prober` behind both search strategies.
pub struct RunCtx<'a> {
    args: &'a Args,
    populate: &'a WorkloadProps,
    launcher: Launcher,
    policy: SlaPolicy,
    monitor: Option<&'a MonitorShim<'a>>,
    monitor_prefix: String,
    write_workload: bool,
    run_detector: MarkerDetector,
    load_detector: MarkerDetector,
    trials: Vec<TrialRecord>,
}

impl<'a> RunCtx<'a> {
    pub fn new(
        args: &'a Args,
        populate: &'a WorkloadProps,
        write_workload: bool,
        monitor: Option<&'a MonitorShim<'a>>,
        monitor_prefix: String,
        ssh: SshOpts,
    ) -> Self {
        Self {
            args,
            populate,
            launcher: Launcher::new(args, ssh),
            policy: SlaPolicy::from_args(args),
            monitor,
            monitor_prefix,
            write_workload,
            run_detector: MarkerDetector::new(RUN_COMPLETE_MARKERS),
            load_detector: MarkerDetector::new(LOAD_COMPLETE_MARKERS),
            trials: vec![],
        }
    }

    pub fn trials(&self) -> &[TrialRecord] {
        &self.trials
    }

    /// Generator stat dumps and worker logs left over from an earlier use
    /// of this run id would pollute the log-set glob.
    fn clear_run_artifacts(&self, run: u32) {
        let patterns = [
            "read*.txt".to_string(),
            "update*.txt".to_string(),
            format!("{}/BGMainClass-*-run-{}.log", &self.args.dir, run),
        ];
        for pattern in patterns.iter() {
            for path in glob(pattern).unwrap().filter_map(|x| x.ok()) {
                match fs::remove_file(&path) {
                    Ok(()) => debug!("run: Deleted {:?}", &path),
                    Err(e) => warn!("run: Failed to delete {:?} ({})", &path, &e),
                }
            }
        }
    }

    pub fn clear_db(&self, run: u32) -> Result<()> {
        info!("run: Clearing database for run {}", run);
        let child = self
            .launcher
            .launch(Role::Clear, 0, 0, &self.args.populate_workload, "localhost")?;
        let res = watch(
            child,
            &format!("clear-{}", run),
            &self.load_detector,
            Duration::from_secs(LOAD_TIMEOUT_SECS),
            None,
        )?;
        if res.timed_out {
            warn!("run: Database clear timed out for run {}", run);
        }
        save_log(&self.args.dir, &format!("BGMainClear-{}.log", run), &res.output)
    }

    pub fn load_db(&self, run: u32) -> Result<()> {
        info!("run: Loading database for run {}", run);
        let child = self
            .launcher
            .launch(Role::Load, 0, 0, &self.args.populate_workload, "localhost")?;
        let res = watch(
            child,
            &format!("load-{}", run),
            &self.load_detector,
            Duration::from_secs(LOAD_TIMEOUT_SECS),
            None,
        )?;
        if res.timed_out {
            warn!("run: Database load timed out for run {}", run);
        }
        save_log(&self.args.dir, &format!("BGMainLoad-{}.log", run), &res.output)
    }

    /// Brings caches and connections to steady state with a scale-matched
    /// short run that is excluded from measurement.
    pub fn warmup(&self, run: u32) -> Result<()> {
        let plan = self.populate.warmup_plan()?;
        info!("run: Warming up for {} seconds...", plan.max_exec_time);
        let child = self.launcher.launch(
            Role::Run,
            WARMUP_THREADS,
            plan.max_exec_time,
            &plan.workload,
            "localhost",
        )?;
        let res = watch(
            child,
            &format!("warmup-{}", run),
            &self.run_detector,
            Duration::from_secs(plan.max_exec_time as u64 + WATCH_GRACE_SECS),
            None,
        )?;
        if res.timed_out {
            warn!("run: Warm-up timed out for run {}", run);
        }
        save_log(
            &self.args.dir,
            &format!("BGMainClass-warmup-{}.log", run),
            &res.output,
        )
    }

    /// Fresh database and warm caches ahead of a measured run. Read-only
    /// workloads need this once; write-heavy ones before every trial.
    pub fn refresh_database(&self, run: u32) -> Result<()> {
        if self.args.do_load {
            self.clear_db(run)?;
            self.load_db(run)?;
        }
        if self.args.do_warmup {
            self.warmup(run)?;
        }
        Ok(())
    }

    fn mark_all_nodes(&self, msg: &str) {
        if let Some(shim) = self.monitor {
            shim.log_to_all(&self.monitor_prefix, msg);
        }
    }

    fn run_trial(&mut self, threads: u32, run: u32) -> Result<TrialStat> {
        self.clear_run_artifacts(run);
        if self.write_workload {
            self.refresh_database(run)?;
        }

        self.mark_all_nodes(&format!(
            "=== START TEST run={} threads={} at {} ===",
            run,
            threads,
            format_unix_time(unix_now())
        ));

        let splits = split_threads(threads, self.args.clients.len());
        let active: Vec<(&str, u32)> = self
            .args
            .clients
            .iter()
            .zip(splits.iter())
            .filter(|(_, n)| **n > 0)
            .map(|(c, n)| (c.as_str(), *n))
            .collect();

        info!(
            "run: Distributing {} threads across {} clients for run {}",
            threads,
            active.len(),
            run
        );

        let progress = TrialProgress::new();
        let launcher = &self.launcher;
        let detector = &self.run_detector;
        let args = self.args;
        let watch_dur = Duration::from_secs(args.duration as u64 + WATCH_GRACE_SECS);

        // One blocking launch+watch task per client; every task must finish
        // before evaluation so aggregate throughput is not mis-measured.
        let results: Vec<(String, Result<()>)> = crossbeam::thread::scope(|s| {
            let handles: Vec<_> = active
                .iter()
                .map(|(client, client_threads)| {
                    let client = *client;
                    let client_threads = *client_threads;
                    let mut bar = progress.add_task(&format!("{}x{}", client, client_threads));
                    s.spawn(move |_| -> Result<()> {
                        let child = launcher.launch(
                            Role::Run,
                            client_threads,
                            args.duration,
                            &args.workload,
                            client,
                        )?;
                        let res = watch(
                            child,
                            &format!("run-{}-{}", run, client),
                            detector,
                            watch_dur,
                            Some(&mut bar),
                        )?;
                        if res.timed_out {
                            warn!("run: Client {} timed out in run {}", client, run);
                        }
                        save_log(
                            &args.dir,
                            &format!(
                                "BGMainClass-client-{}-run-{}.log",
                                client_file_tag(client),
                                run
                            ),
                            &res.output,
                        )
                    })
                })
                .collect();
            active
                .iter()
                .zip(handles)
                .map(|((client, _), jh)| (client.to_string(), jh.join().unwrap()))
                .collect()
        })
        .unwrap();

        for (client, res) in results.iter() {
            if let Err(e) = res {
                error!(
                    "run: Client {} failed in run {} at {} threads ({:#})",
                    client, run, threads, e
                );
            }
        }

        if prog_exiting() {
            bail!("exiting");
        }

        let logs = collect_run_logs(&self.args.dir, run)?;
        let stat = self.policy.evaluate(&logs, active.len());

        info!(
            "run: threads: {}, run: {}, SLA: {}, throughput: {:.2}",
            threads, run, stat.sla_met, stat.throughput
        );

        self.mark_all_nodes(&format!(
            "=== END TEST run={} threads={} at {} ===",
            run,
            threads,
            format_unix_time(unix_now())
        ));

        self.trials.push(TrialRecord {
            threads,
            run,
            throughput: stat.throughput,
            sla_met: stat.sla_met,
        });
        Ok(stat)
    }
}

impl Prober for RunCtx<'_> {
    fn probe(&mut self, threads: u32, run: u32) -> Result<TrialStat> {
        self.run_trial(threads, run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_threads() {
        assert_eq!(split_threads(10, 1), vec![10]);
        assert_eq!(split_threads(10, 4), vec![3, 3, 2, 2]);
        assert_eq!(split_threads(12, 4), vec![3, 3, 3, 3]);
        assert_eq!(split_threads(2, 4), vec![1, 1, 0, 0]);
        assert_eq!(split_threads(0, 3), vec![0, 0, 0]);
    }

    #[test]
    fn test_split_threads_conserves_total() {
        for threads in [1, 7, 63, 1000] {
            for nr in [1usize, 2, 3, 10] {
                let split = split_threads(threads, nr);
                assert_eq!(split.iter().sum::<u32>(), threads);
                assert!(split.iter().max().unwrap() - split.iter().min().unwrap() <= 1);
            }
        }
    }

    #[test]
    fn test_client_file_tag() {
        assert_eq!(client_file_tag("10.0.0.1"), "10-0-0-1");
        assert_eq!(client_file_tag("localhost"), "localhost");
    }

    fn fake_generator_args(dir: &tempfile::TempDir, script_body: &str) -> Args {
        let script = dir.path().join("fake-bgmain.sh");
        fs::write(&script, script_body).unwrap();

        let mut args = Args::default();
        args.workload = "workloads/core".into();
        args.generator = format!("sh {}", script.display());
        args.dir = dir.path().to_str().unwrap().to_string();
        args.do_warmup = false;
        args.duration = 30;
        args
    }

    #[test]
    fn test_probe_end_to_end_with_fake_generator() {
        let dir = tempfile::tempdir().unwrap();
        let args = fake_generator_args(
            &dir,
            "echo '1234,56'\n\
             echo 'OVERALLTHROUGHPUT(SESSIONS/SECS): 512.5'\n\
             echo '[SatisfyingPerc] 97.25'\n\
             echo 'Stop requested for workload. Now Joining!'\n\
             sleep 30\n",
        );
        let populate = WorkloadProps::default();
        let mut rctx = RunCtx::new(&args, &populate, false, None, "test".into(), Default::default());

        let stat = rctx.probe(16, 0).unwrap();
        assert!(stat.sla_met);
        assert!((stat.throughput - 512.5).abs() < f64::EPSILON);
        assert_eq!(rctx.trials().len(), 1);

        let log = fs::read_to_string(
            dir.path().join("BGMainClass-client-localhost-run-0.log"),
        )
        .unwrap();
        assert!(log.contains("OVERALLTHROUGHPUT"));
        assert!(!log.contains("1234,56"));
    }

    #[test]
    fn test_probe_mute_generator_fails_sla() {
        let dir = tempfile::tempdir().unwrap();
        let args = fake_generator_args(&dir, "echo 'nothing to see here'\n");
        let populate = WorkloadProps::default();
        let mut rctx = RunCtx::new(&args, &populate, false, None, "test".into(), Default::default());

        let stat = rctx.probe(4, 0).unwrap();
        assert!(!stat.sla_met);
        assert_eq!(stat.throughput, 0.0);
    }
}
