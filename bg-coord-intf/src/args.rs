// Copyright (c) Facebook, Inc. and its affiliates.
use anyhow::bail;
use clap;
use lazy_static::lazy_static;
use log::error;
use serde::{Deserialize, Serialize};
use std::process::exit;
use std::str::FromStr;

use bg_util::*;

const HELP_BODY: &str = "\
Capacity-search coordinator for the BG social-graph workload generator.

bg-coord drives the external workload generator end-to-end. It probes the
target database at chosen concurrency levels, captures and parses the
generator's output, and searches for either the highest concurrency that
still meets the declared SLA (socialites) or the concurrency that maximizes
raw throughput among SLA-satisfying points (soar).

Workload and populate-workload files are property files shared with the
generator. Captured per-run logs land under the output directory and are
re-read to extract throughput, SLA-satisfaction and staleness figures.
";

lazy_static! {
    static ref ARGS_STR: String = format!(
        "-w, --workload=[FILE]     'Core workload property file'
         -p, --populate=[FILE]     'Populate (load phase) workload property file'
         -d, --dir=[DIR]           'Output directory for captured logs (default: {dfl_dir})'
         -o, --objective=[OBJ]     'soar or socialites (default: {dfl_obj})'
         -m, --minimum=[THREADS]   'Minimum starting concurrency (default: {dfl_min})'
         -D, --duration=[SECS]     'Execution time bound per trial (default: {dfl_dur})'
         -l, --latency=[MSECS]     'SLA latency target in milliseconds (default: {dfl_lat})'
         -P, --perc=[PCT]          'Min percentage of requests meeting the latency target (default: {dfl_perc})'
         -S, --staleness=[PCT]     'Staleness upper bound percentage, used with --validation'
         -b, --db-addr=[HOST]      'Database endpoint (default: {dfl_db})'
         -g, --generator=[CMD]     'Workload generator launch command (default: {dfl_gen})'
         -c, --clients=[HOSTS]     'Comma-separated client hosts (default: localhost)'
         -n, --nodes=[FILE]        'Remote node registry json for monitoring'
         -r, --result=[FILE]       'Result json file'
             --sla-averaging=[POLICY] 'weighted or mean SLA aggregation (default: {dfl_avg})'
             --validation          'Additionally bound replica staleness'
             --load                'Clear and reload the database before measuring'
             --monitor             'Drive monitoring scripts on all registered nodes'
             --no-cache            'Disable the generator-side cache'
             --no-warmup           'Skip warm-up passes'
         -a, --args=[FILE]         'Load base command line arguments from FILE'
         -v...                     'Sets the level of verbosity'",
        dfl_dir = Args::default().dir,
        dfl_obj = Args::default().objective.as_str(),
        dfl_min = Args::default().minimum,
        dfl_dur = Args::default().duration,
        dfl_lat = Args::default().latency,
        dfl_perc = Args::default().perc,
        dfl_db = Args::default().db_addr,
        dfl_gen = Args::default().generator,
        dfl_avg = Args::default().sla_averaging.as_str(),
    );
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Objective {
    /// Maximize throughput among SLA-satisfying concurrency levels.
    Soar,
    /// Maximize concurrency subject to the SLA holding.
    Socialites,
}

impl Objective {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Soar => "soar",
            Self::Socialites => "socialites",
        }
    }
}

impl FromStr for Objective {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "soar" => Ok(Self::Soar),
            "socialites" => Ok(Self::Socialites),
            _ => bail!("objective must be 'soar' or 'socialites', got {:?}", s),
        }
    }
}

/// How per-worker SLA percentages combine into the trial aggregate. Which
/// form is right depends on how load shares land on the clients, so it
/// stays an operator-selectable policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlaAveraging {
    ThroughputWeighted,
    Mean,
}

impl SlaAveraging {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ThroughputWeighted => "weighted",
            Self::Mean => "mean",
        }
    }
}

impl FromStr for SlaAveraging {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "weighted" => Ok(Self::ThroughputWeighted),
            "mean" => Ok(Self::Mean),
            _ => bail!("sla-averaging must be 'weighted' or 'mean', got {:?}", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Args {
    pub workload: String,
    pub populate_workload: String,
    pub dir: String,
    pub objective: Objective,
    pub minimum: u32,
    pub duration: u32,
    pub latency: f64,
    pub perc: f64,
    pub staleness: f64,
    pub db_addr: String,
    pub generator: String,
    pub clients: Vec<String>,
    pub nodes: Option<String>,
    pub sla_averaging: SlaAveraging,
    pub validation: bool,
    pub do_load: bool,
    pub do_cache: bool,
    pub do_warmup: bool,
    pub do_monitor: bool,

    #[serde(skip)]
    pub result: Option<String>,
    #[serde(skip)]
    pub verbosity: u32,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            workload: "".into(),
            populate_workload: "".into(),
            dir: "bg-logs".into(),
            objective: Objective::Socialites,
            minimum: 1,
            duration: 180,
            latency: 100.0,
            perc: 95.0,
            staleness: 1.0,
            db_addr: "127.0.0.1".into(),
            generator: "bgmain".into(),
            clients: vec!["localhost".into()],
            nodes: None,
            sla_averaging: SlaAveraging::ThroughputWeighted,
            validation: false,
            do_load: false,
            do_cache: true,
            do_warmup: true,
            do_monitor: false,
            result: None,
            verbosity: 0,
        }
    }
}

impl JsonLoad for Args {}
impl JsonSave for Args {}

impl JsonArgs for Args {
    fn match_cmdline() -> clap::ArgMatches<'static> {
        clap::App::new("bg-coord")
            .version(env!("CARGO_PKG_VERSION"))
            .about(HELP_BODY)
            .args_from_usage(&ARGS_STR)
            .setting(clap::AppSettings::UnifiedHelpMessage)
            .setting(clap::AppSettings::DeriveDisplayOrder)
            .get_matches()
    }

    fn verbosity(matches: &clap::ArgMatches) -> u32 {
        matches.occurrences_of("v") as u32
    }

    fn process_cmdline(&mut self, matches: &clap::ArgMatches) -> bool {
        let dfl = Args::default();
        let mut updated_base = false;

        if let Some(v) = matches.value_of("workload") {
            self.workload = v.to_string();
            updated_base = true;
        }
        if let Some(v) = matches.value_of("populate") {
            self.populate_workload = v.to_string();
            updated_base = true;
        }
        if let Some(v) = matches.value_of("dir") {
            self.dir = if v.len() > 0 {
                v.to_string()
            } else {
                dfl.dir.clone()
            };
            updated_base = true;
        }
        if let Some(v) = matches.value_of("objective") {
            self.objective = v.parse().unwrap_or_else(|e| {
                error!("{}", &e);
                exit(1);
            });
            updated_base = true;
        }
        if let Some(v) = matches.value_of("minimum") {
            self.minimum = v.parse::<u32>().unwrap().max(1);
            updated_base = true;
        }
        if let Some(v) = matches.value_of("duration") {
            self.duration = v.parse::<u32>().unwrap();
            updated_base = true;
        }
        if let Some(v) = matches.value_of("latency") {
            self.latency = v.parse::<f64>().unwrap();
            updated_base = true;
        }
        if let Some(v) = matches.value_of("perc") {
            self.perc = v.parse::<f64>().unwrap();
            updated_base = true;
        }
        if let Some(v) = matches.value_of("staleness") {
            self.staleness = v.parse::<f64>().unwrap();
            updated_base = true;
        }
        if let Some(v) = matches.value_of("db-addr") {
            self.db_addr = v.to_string();
            updated_base = true;
        }
        if let Some(v) = matches.value_of("generator") {
            self.generator = v.to_string();
            updated_base = true;
        }
        if let Some(v) = matches.value_of("clients") {
            self.clients = v
                .split(',')
                .filter(|x| x.len() > 0)
                .map(|x| x.trim().to_string())
                .collect();
            if self.clients.is_empty() {
                self.clients = dfl.clients.clone();
            }
            updated_base = true;
        }
        if let Some(v) = matches.value_of("nodes") {
            self.nodes = if v.len() > 0 {
                Some(v.to_string())
            } else {
                None
            };
            updated_base = true;
        }
        if let Some(v) = matches.value_of("sla-averaging") {
            self.sla_averaging = v.parse().unwrap_or_else(|e| {
                error!("{}", &e);
                exit(1);
            });
            updated_base = true;
        }

        if matches.is_present("validation") {
            self.validation = true;
            updated_base = true;
        }
        if matches.is_present("load") {
            self.do_load = true;
            updated_base = true;
        }
        if matches.is_present("monitor") {
            self.do_monitor = true;
            updated_base = true;
        }
        if matches.is_present("no-cache") {
            self.do_cache = false;
            updated_base = true;
        }
        if matches.is_present("no-warmup") {
            self.do_warmup = false;
            updated_base = true;
        }

        self.result = matches.value_of("result").map(|x| x.to_string());
        self.verbosity = Self::verbosity(matches);

        updated_base
    }
}
