// Copyright (c) Facebook, Inc. and its affiliates.
use anyhow::Result;
use log::debug;
use serde::{Deserialize, Serialize};
use std::io;
use std::process::{Child, Command, Stdio};

use super::run_command;

/// Transport-level knobs for the SSH executor. The remote user and identity
/// file are deployment properties and live in the node registry file rather
/// than on the command line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshOpts {
    pub user: String,
    pub identity_file: String,
    pub timeout_secs: u64,
}

impl Default for SshOpts {
    fn default() -> Self {
        Self {
            user: "root".into(),
            identity_file: "~/.ssh/id_rsa".into(),
            timeout_secs: 120,
        }
    }
}

pub fn is_local_host(host: &str) -> bool {
    host.is_empty() || host.eq_ignore_ascii_case("localhost") || host == "127.0.0.1"
}

fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,".contains(c))
    {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}

pub fn shell_join(argv: &[String]) -> String {
    argv.iter()
        .map(|x| shell_quote(x))
        .collect::<Vec<String>>()
        .join(" ")
}

/// One command-execution channel to a single host. `run` blocks until the
/// command exits and fails on non-zero status; `spawn` hands back the child
/// with both output streams piped so the caller can watch them.
pub trait RemoteExecutor {
    fn host(&self) -> &str;
    fn run(&self, shell_cmd: &str) -> Result<()>;
    fn spawn(&self, argv: &[String]) -> io::Result<Child>;
}

pub struct LocalExec;

impl RemoteExecutor for LocalExec {
    fn host(&self) -> &str {
        "localhost"
    }

    fn run(&self, shell_cmd: &str) -> Result<()> {
        debug!("local: Running {:?}", shell_cmd);
        run_command(
            Command::new("bash").arg("-c").arg(shell_cmd),
            "local command failed",
        )
    }

    fn spawn(&self, argv: &[String]) -> io::Result<Child> {
        if argv.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty argv"));
        }
        Command::new(&argv[0])
            .args(&argv[1..])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
    }
}

pub struct SshExec {
    host: String,
    opts: SshOpts,
}

impl SshExec {
    pub fn new(host: &str, opts: SshOpts) -> Self {
        Self {
            host: host.into(),
            opts,
        }
    }

    fn ssh_argv(&self, shell_cmd: &str) -> Vec<String> {
        vec![
            "ssh".into(),
            "-o".into(),
            "StrictHostKeyChecking=no".into(),
            "-i".into(),
            self.opts.identity_file.clone(),
            format!("{}@{}", self.opts.user, self.host),
            shell_cmd.into(),
        ]
    }
}

impl RemoteExecutor for SshExec {
    fn host(&self) -> &str {
        &self.host
    }

    fn run(&self, shell_cmd: &str) -> Result<()> {
        let argv = self.ssh_argv(shell_cmd);
        debug!("ssh: Running {:?} on {}", shell_cmd, &self.host);
        run_command(
            Command::new("timeout")
                .arg(format!("{}", self.opts.timeout_secs))
                .args(&argv),
            "remote command failed",
        )
    }

    fn spawn(&self, argv: &[String]) -> io::Result<Child> {
        if argv.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty argv"));
        }
        let ssh_argv = self.ssh_argv(&shell_join(argv));
        Command::new(&ssh_argv[0])
            .args(&ssh_argv[1..])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
    }
}

/// Picks the transport for a host. Local names short-circuit to direct
/// execution so a single-machine setup needs no SSH configuration.
pub fn executor_for(host: &str, opts: &SshOpts) -> Box<dyn RemoteExecutor> {
    if is_local_host(host) {
        Box::new(LocalExec)
    } else {
        Box::new(SshExec::new(host, opts.clone()))
    }
}
