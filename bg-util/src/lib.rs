// Copyright (c) Facebook, Inc. and its affiliates.
use anyhow::{bail, Result};
use chrono::{DateTime, Local};
use crossbeam::channel::Sender;
use log::{info, warn};
use simplelog as sl;
use std::io::prelude::*;
use std::io::BufReader;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, UNIX_EPOCH};

pub mod json_file;
pub mod remote;

pub use json_file::{JsonArgs, JsonArgsHelper, JsonConfigFile, JsonLoad, JsonSave};
pub use remote::{LocalExec, RemoteExecutor, SshExec, SshOpts};

pub fn unix_now() -> u64 {
    UNIX_EPOCH.elapsed().unwrap().as_secs()
}

pub fn format_unix_time(time: u64) -> String {
    DateTime::<Local>::from(UNIX_EPOCH + Duration::from_secs(time))
        .format("%x %T")
        .to_string()
}

pub fn init_logging(verbosity: u32) {
    if std::env::var("RUST_LOG").is_ok() {
        env_logger::init();
    } else {
        let sl_level = match verbosity {
            0 | 1 => sl::LevelFilter::Info,
            2 => sl::LevelFilter::Debug,
            _ => sl::LevelFilter::Trace,
        };
        let mut lcfg = sl::ConfigBuilder::new();
        lcfg.set_time_level(sl::LevelFilter::Off)
            .set_location_level(sl::LevelFilter::Off)
            .set_target_level(sl::LevelFilter::Off)
            .set_thread_level(sl::LevelFilter::Off);
        if !console::user_attended_stderr()
            || sl::TermLogger::init(
                sl_level,
                lcfg.build(),
                sl::TerminalMode::Stderr,
                sl::ColorChoice::Auto,
            )
            .is_err()
        {
            sl::SimpleLogger::init(sl_level, lcfg.build()).unwrap();
        }
    }
}

/// Reads lines from a child process output stream and forwards them through
/// the channel until EOF or until the receiving end goes away.
pub fn child_reader_thread<R: Read>(name: String, stream: R, tx: Sender<String>) {
    let reader = BufReader::new(stream);
    for line in reader.lines() {
        match line {
            Ok(line) => {
                if let Err(e) = tx.send(line) {
                    info!("{}: Reader thread terminating ({:?})", &name, &e);
                    break;
                }
            }
            Err(e) => {
                warn!("{}: Failed to read process output ({:?})", &name, &e);
                break;
            }
        }
    }
}

pub fn run_command(cmd: &mut Command, emsg: &str) -> Result<()> {
    let cmd_str = format!("{:?}", &cmd);

    match cmd.status() {
        Ok(rc) if rc.success() => Ok(()),
        Ok(rc) => bail!("{:?} ({:?}): {}", &cmd_str, &rc, emsg),
        Err(e) => bail!("{:?} ({:?}): {}", &cmd_str, &e, emsg),
    }
}

static PROG_EXITING: AtomicBool = AtomicBool::new(false);

pub fn setup_prog_state() {
    ctrlc::set_handler(move || {
        info!("SIGINT/TERM received, exiting...");
        set_prog_exiting();
    })
    .expect("Error setting term handler");
}

pub fn set_prog_exiting() {
    PROG_EXITING.store(true, Ordering::Relaxed);
}

pub fn prog_exiting() -> bool {
    PROG_EXITING.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use crossbeam::channel;
    use std::io::Write;
    use std::process::{Command, Stdio};
    use std::thread::spawn;

    #[test]
    fn test_child_reader_thread() {
        let mut child = Command::new("cat")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();
        let mut stdin = child.stdin.take().unwrap();
        let stdout = child.stdout.take().unwrap();

        let (tx, rx) = channel::unbounded::<String>();
        let jh = spawn(move || super::child_reader_thread("test".into(), stdout, tx));

        stdin.write_all(b"hello\nworld\n").unwrap();
        drop(stdin);

        assert_eq!(rx.recv().unwrap(), "hello");
        assert_eq!(rx.recv().unwrap(), "world");
        assert!(rx.recv().is_err());

        let _ = child.wait();
        jh.join().unwrap();
    }

    #[test]
    fn test_run_command() {
        assert!(super::run_command(Command::new("true").arg("x"), "true failed").is_ok());
        assert!(super::run_command(&mut Command::new("false"), "expected").is_err());
    }
}
