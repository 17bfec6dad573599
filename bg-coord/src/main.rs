// Copyright (c) Facebook, Inc. and its affiliates.
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use log::{error, info};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::process::exit;
use std::time::{Duration, UNIX_EPOCH};

mod launcher;
mod monitor;
mod progress;
mod run;
mod search;
mod study;
mod watcher;

use bg_coord_intf::{Args, NodeRegistry, Objective, WorkloadProps};
use bg_util::*;

use monitor::MonitorShim;
use run::RunCtx;

#[derive(Serialize)]
struct SearchResult<'a> {
    objective: &'static str,
    best: i64,
    started_at: u64,
    ended_at: u64,
    trials: &'a [run::TrialRecord],
}

/// Monitor artifacts are namespaced by the capture session so one cluster
/// can host consecutive searches without mixing logs.
fn monitor_prefix(dir: &str) -> String {
    Path::new(dir)
        .file_name()
        .map(|x| x.to_string_lossy().into_owned())
        .unwrap_or_else(|| "bgcoord".into())
}

fn run_coord(args: &Args) -> Result<()> {
    if args.workload.is_empty() {
        bail!("--workload is required");
    }
    if (args.do_load || args.do_warmup) && args.populate_workload.is_empty() {
        bail!("--populate is required when loading or warm-up is enabled");
    }

    let workload = WorkloadProps::load(&args.workload)?;
    let populate = match args.populate_workload.is_empty() {
        true => Default::default(),
        false => WorkloadProps::load(&args.populate_workload)?,
    };

    fs::create_dir_all(&args.dir)
        .with_context(|| format!("Failed to create output directory {:?}", &args.dir))?;

    let write_workload = workload.is_write_heavy();
    info!(
        "coord: Workload is {}, database refresh {} trial",
        match write_workload {
            true => "write-heavy",
            false => "read-only",
        },
        match write_workload {
            true => "before every",
            false => "once before the first",
        }
    );

    let registry = match args.nodes.as_ref() {
        Some(path) => NodeRegistry::load(path)
            .with_context(|| format!("Failed to load node registry {:?}", path))?,
        None => Default::default(),
    };

    let shim = MonitorShim::new(&registry);
    let mon = match args.do_monitor {
        true => Some(&shim),
        false => None,
    };
    let prefix = monitor_prefix(&args.dir);
    if let Some(shim) = mon {
        shim.delete_logs_all(&prefix);
        shim.start_all(&prefix);
    }

    let mut rctx = RunCtx::new(
        args,
        &populate,
        write_workload,
        mon,
        prefix,
        registry.ssh.clone(),
    );

    if !write_workload {
        rctx.refresh_database(0)?;
    }

    let started_at = unix_now();
    let best = match args.objective {
        Objective::Socialites => search::max_sla_concurrency(&mut rctx, args.minimum)?,
        Objective::Soar => search::max_throughput_concurrency(&mut rctx, args.minimum)?,
    };
    let ended_at = unix_now();

    if let Some(shim) = mon {
        shim.stop_all();
    }

    let best_val: i64 = best.map(|v| v as i64).unwrap_or(-1);

    println!(
        "\n[{} result] {} - {}\n",
        args.objective.as_str(),
        DateTime::<Local>::from(UNIX_EPOCH + Duration::from_secs(started_at))
            .format("%Y-%m-%d %T"),
        DateTime::<Local>::from(UNIX_EPOCH + Duration::from_secs(ended_at)).format("%T")
    );
    println!("Result: {}", best_val);

    if let Some(path) = args.result.as_ref() {
        let record = SearchResult {
            objective: args.objective.as_str(),
            best: best_val,
            started_at,
            ended_at,
            trials: rctx.trials(),
        };
        let serialized =
            serde_json::to_string_pretty(&record).context("Failed to serialize result")?;
        fs::write(path, serialized + "\n")
            .with_context(|| format!("Failed to write result file {:?}", path))?;
        info!("coord: Result written to {:?}", path);
    }

    Ok(())
}

fn main() {
    setup_prog_state();

    let args_file = Args::init_args_and_logging().unwrap_or_else(|e| {
        error!("Failed to process args file ({})", &e);
        exit(1);
    });
    info!("bg-coord {}", *bg_coord_intf::VERSION);

    if let Err(e) = run_coord(&args_file.data) {
        error!("{:#}", &e);
        exit(1);
    }
}
