// Copyright (c) Facebook, Inc. and its affiliates.
use anyhow::{bail, Result};
use crossbeam::channel::{self, RecvTimeoutError};
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;
use std::process::Child;
use std::thread::spawn;
use std::time::{Duration, Instant};

use crate::progress::TaskBar;
use bg_util::{child_reader_thread, prog_exiting};

lazy_static! {
    // High-frequency `completedOps,elapsed` progress stats. Not meaningful
    // to the extractor, so they never reach the capture buffer.
    static ref NUMERIC_STAT_RE: Regex = Regex::new(r"^\d+\s*,\s*\d+$").unwrap();
}

const EXIT_POLL_INTV: Duration = Duration::from_secs(1);

pub fn is_noise(line: &str) -> bool {
    NUMERIC_STAT_RE.is_match(line)
}

/// Decides from the output stream when the watched process is done. The
/// stock implementation substring-matches the generator's fixed markers;
/// anything smarter (exit codes, sentinel files) can slot in here without
/// touching the search logic.
pub trait CompletionDetector: Sync {
    fn is_complete(&self, line: &str) -> bool;
}

pub struct MarkerDetector {
    markers: Vec<String>,
}

impl MarkerDetector {
    pub fn new(markers: &[&str]) -> Self {
        Self {
            markers: markers.iter().map(|x| x.to_string()).collect(),
        }
    }
}

impl CompletionDetector for MarkerDetector {
    fn is_complete(&self, line: &str) -> bool {
        self.markers.iter().any(|m| line.contains(m.as_str()))
    }
}

/// Captured output of one watched process. A timeout is a degraded but
/// usable outcome; the extractor simply won't find the missing fields.
#[derive(Debug)]
pub struct WatchedOutput {
    pub output: String,
    pub timed_out: bool,
}

enum Outcome {
    Completed,
    TimedOut,
    Ended,
    Exiting,
}

/// Consumes the child's output line by line until a completion marker, the
/// deadline, stream end or program exit, whichever comes first. The child
/// is force-killed and always reaped before returning. Lines the generator
/// may buffer past the marker can still land in the capture; that race is
/// part of the contract.
pub fn watch(
    mut child: Child,
    name: &str,
    detector: &dyn CompletionDetector,
    max_duration: Duration,
    mut bar: Option<&mut TaskBar>,
) -> Result<WatchedOutput> {
    // The readers are left to exit on their own at stream EOF. A grandchild
    // holding the pipe open past the kill must not stall the trial.
    let (tx, rx) = channel::unbounded::<String>();
    if let Some(stdout) = child.stdout.take() {
        let tx = tx.clone();
        let tname = format!("{}-stdout", name);
        spawn(move || child_reader_thread(tname, stdout, tx));
    }
    if let Some(stderr) = child.stderr.take() {
        let tx = tx.clone();
        let tname = format!("{}-stderr", name);
        spawn(move || child_reader_thread(tname, stderr, tx));
    }
    drop(tx);

    let deadline = Instant::now() + max_duration;
    let mut buf = String::new();

    let outcome = loop {
        if prog_exiting() {
            break Outcome::Exiting;
        }

        let now = Instant::now();
        if now >= deadline {
            warn!(
                "{}: No completion marker within {:?}, killing",
                name, max_duration
            );
            break Outcome::TimedOut;
        }

        match rx.recv_timeout((deadline - now).min(EXIT_POLL_INTV)) {
            Ok(line) => {
                if is_noise(&line) {
                    if let Some(bar) = bar.as_mut() {
                        bar.update(&line);
                    }
                    continue;
                }
                debug!("[{}] {}", name, &line);
                buf.push_str(&line);
                buf.push('\n');
                if detector.is_complete(&line) {
                    debug!("{}: Detected completion marker", name);
                    break Outcome::Completed;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break Outcome::Ended,
        }
    };

    let _ = child.kill();
    let _ = child.wait();

    match outcome {
        Outcome::Exiting => bail!("exiting"),
        outcome => Ok(WatchedOutput {
            output: buf,
            timed_out: matches!(outcome, Outcome::TimedOut),
        }),
    }
}
