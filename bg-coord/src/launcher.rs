// Copyright (c) Facebook, Inc. and its affiliates.
use log::debug;
use std::process::Child;
use thiserror::Error;

use bg_util::remote::{executor_for, SshOpts};
use bg_coord_intf::Args;

// Substrings the generator prints when a phase is done. Scraping them out
// of the output stream is the only completion signal the generator offers;
// see watcher::CompletionDetector for the seam isolating this.
pub const RUN_COMPLETE_MARKERS: &[&str] = &["Stop requested for workload. Now Joining!"];
pub const LOAD_COMPLETE_MARKERS: &[&str] = &["SHUTDOWN!!!"];

// The load and clear phases are internally parallel and insensitive to the
// exact count.
const LOAD_THREADS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Load,
    Run,
    Clear,
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Run => "run",
            Self::Clear => "clear",
        }
    }
}

/// A process that could not be created at all. Always surfaced to the
/// caller; retrying a malformed launch would burn a whole trial cycle.
#[derive(Error, Debug)]
#[error("failed to start {role} process on {host}: {source}")]
pub struct LaunchError {
    pub role: &'static str,
    pub host: String,
    #[source]
    pub source: std::io::Error,
}

/// Builds and starts generator processes. One instance per coordinator,
/// constructed from the parsed arguments at startup.
pub struct Launcher {
    generator: Vec<String>,
    db_addr: String,
    do_cache: bool,
    latency: f64,
    ssh: SshOpts,
}

impl Launcher {
    pub fn new(args: &Args, ssh: SshOpts) -> Self {
        Self {
            generator: args
                .generator
                .split_whitespace()
                .map(|x| x.to_string())
                .collect(),
            db_addr: args.db_addr.clone(),
            do_cache: args.do_cache,
            latency: args.latency,
            ssh,
        }
    }

    /// Full argument vector for one generator invocation. The flag set is
    /// the generator's CLI contract and must not drift from it.
    pub fn argv(&self, role: Role, threads: u32, max_exec_time: u32, workload: &str) -> Vec<String> {
        let mut argv = self.generator.clone();
        argv.push("onetime".into());
        match role {
            Role::Run => argv.push("-t".into()),
            Role::Load => argv.push("-load".into()),
            Role::Clear => argv.push("-clear".into()),
        }
        if role != Role::Clear {
            argv.push("-threads".into());
            argv.push(format!(
                "{}",
                match role {
                    Role::Run => threads,
                    _ => LOAD_THREADS,
                }
            ));
        }
        argv.push("-db".into());
        argv.push(self.db_addr.clone());
        argv.push("-P".into());
        argv.push(workload.into());
        if role == Role::Run {
            argv.push("-doCache".into());
            argv.push(format!("{}", self.do_cache));
            argv.push("-latency".into());
            argv.push(format!("{}", self.latency));
            argv.push("-maxexecutiontime".into());
            argv.push(format!("{}", max_exec_time));
        }
        argv.push("-s".into());
        argv.push("true".into());
        argv
    }

    /// Starts a generator process on `host` with merged-capturable output.
    /// Local hosts spawn directly, remote hosts get the same command line
    /// wrapped in an SSH invocation whose output is still captured locally.
    pub fn launch(
        &self,
        role: Role,
        threads: u32,
        max_exec_time: u32,
        workload: &str,
        host: &str,
    ) -> Result<Child, LaunchError> {
        let argv = self.argv(role, threads, max_exec_time, workload);
        debug!("launcher: Starting {:?} on {}", &argv, host);
        executor_for(host, &self.ssh)
            .spawn(&argv)
            .map_err(|e| LaunchError {
                role: role.name(),
                host: host.into(),
                source: e,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_launcher() -> Launcher {
        let mut args = Args::default();
        args.generator = "bgmain".into();
        args.db_addr = "10.10.1.1".into();
        args.latency = 100.0;
        Launcher::new(&args, Default::default())
    }

    #[test]
    fn test_run_argv() {
        let argv = test_launcher().argv(Role::Run, 16, 180, "workloads/core");
        assert_eq!(
            argv,
            vec![
                "bgmain",
                "onetime",
                "-t",
                "-threads",
                "16",
                "-db",
                "10.10.1.1",
                "-P",
                "workloads/core",
                "-doCache",
                "true",
                "-latency",
                "100",
                "-maxexecutiontime",
                "180",
                "-s",
                "true",
            ]
        );
    }

    #[test]
    fn test_load_argv() {
        let argv = test_launcher().argv(Role::Load, 64, 0, "workloads/populate");
        assert_eq!(
            argv,
            vec![
                "bgmain",
                "onetime",
                "-load",
                "-threads",
                "10",
                "-db",
                "10.10.1.1",
                "-P",
                "workloads/populate",
                "-s",
                "true",
            ]
        );
    }

    #[test]
    fn test_multi_word_generator() {
        let mut args = Args::default();
        args.generator = "java -cp target/classes BGMainClass".into();
        let launcher = Launcher::new(&args, Default::default());
        let argv = launcher.argv(Role::Clear, 0, 0, "workloads/populate");
        assert_eq!(&argv[..4], &["java", "-cp", "target/classes", "BGMainClass"]);
        assert!(argv.contains(&"-clear".to_string()));
        assert!(!argv.contains(&"-threads".to_string()));
    }

    #[test]
    fn test_launch_error_surfaces() {
        let mut args = Args::default();
        args.generator = "/nonexistent/bgmain".into();
        let launcher = Launcher::new(&args, Default::default());
        let err = launcher
            .launch(Role::Run, 1, 10, "workloads/core", "localhost")
            .unwrap_err();
        assert_eq!(err.role, "run");
        assert_eq!(err.host, "localhost");
    }
}
