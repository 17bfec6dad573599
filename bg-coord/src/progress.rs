// Copyright (c) Facebook, Inc. and its affiliates.
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::debug;

// The generator emits a `completedOps,elapsed` stat line several times a
// second. When stderr is not a terminal, surface only every Nth update.
const UNATTENDED_LOG_INTV: u64 = 500;

pub struct TrialProgress {
    main: Option<MultiProgress>,
}

impl TrialProgress {
    pub fn new() -> Self {
        let main = match console::user_attended_stderr() {
            true => Some(MultiProgress::new()),
            false => None,
        };
        Self { main }
    }

    pub fn add_task(&self, name: &str) -> TaskBar {
        let bar = self.main.as_ref().map(|main| {
            let bar = main.add(ProgressBar::new_spinner());
            bar.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} [{elapsed_precise}] {prefix:.green} {msg}")
                    .unwrap(),
            );
            bar.set_prefix(name.to_string());
            bar.tick();
            bar
        });
        TaskBar {
            bar,
            name: name.to_string(),
            nr_updates: 0,
        }
    }
}

pub struct TaskBar {
    bar: Option<ProgressBar>,
    name: String,
    nr_updates: u64,
}

impl TaskBar {
    pub fn update(&mut self, status: &str) {
        self.nr_updates += 1;
        match self.bar.as_ref() {
            Some(bar) => bar.set_message(status.to_string()),
            None => {
                if self.nr_updates % UNATTENDED_LOG_INTV == 0 {
                    debug!("{}: {}", &self.name, status);
                }
            }
        }
    }
}

impl Drop for TaskBar {
    fn drop(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}
