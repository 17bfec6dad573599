// Copyright (c) Facebook, Inc. and its affiliates.
use anyhow::Result;
use log::{debug, warn};

use bg_coord_intf::{NodeRegistry, LOCAL_NODE_NAME};
use bg_util::remote::{executor_for, LocalExec, RemoteExecutor};

fn monitor_log_file(node: &str, prefix: &str) -> String {
    format!("{}_{}_monitor.log", node, prefix)
}

fn start_cmd(script: &str, node: &str, prefix: &str) -> String {
    format!(
        "nohup {} {}_{} > {} 2>&1 &",
        script,
        node,
        prefix,
        monitor_log_file(node, prefix)
    )
}

fn stop_cmd(script: &str) -> String {
    let name = script.rsplit('/').next().unwrap_or(script);
    format!("pkill -9 -f {}", name)
}

fn append_cmd(node: &str, prefix: &str, msg: &str) -> String {
    format!(
        "echo '{}' >> {}",
        msg.replace('\'', "'\\''"),
        monitor_log_file(node, prefix)
    )
}

fn delete_cmd(prefix: &str) -> String {
    format!("rm -f {}*.log", prefix)
}

/// Fans monitoring control out to every registered node plus the local
/// pseudo-node. Monitoring is diagnostic, not load-bearing: per-node
/// failures are logged and the loop keeps going, and ops are tolerated in
/// the already-target state (start when started, stop when stopped).
pub struct MonitorShim<'a> {
    registry: &'a NodeRegistry,
}

impl<'a> MonitorShim<'a> {
    pub fn new(registry: &'a NodeRegistry) -> Self {
        Self { registry }
    }

    fn for_each_node<F>(&self, desc: &str, f: F)
    where
        F: Fn(&str, &dyn RemoteExecutor, &str) -> Result<()>,
    {
        for node in self.registry.nodes.iter() {
            let exec = executor_for(&node.addr, &self.registry.ssh);
            if let Err(e) = f(&node.name, &*exec, &self.registry.remote_script) {
                warn!("monitor: {} failed on {} ({:#})", desc, &node.name, &e);
            }
        }
        if let Err(e) = f(LOCAL_NODE_NAME, &LocalExec, &self.registry.local_script) {
            warn!("monitor: {} failed on {} ({:#})", desc, LOCAL_NODE_NAME, &e);
        }
    }

    pub fn start_all(&self, prefix: &str) {
        debug!("monitor: Starting monitoring with prefix {:?}", prefix);
        self.for_each_node("start", |node, exec, script| {
            exec.run(&start_cmd(script, node, prefix))
        });
    }

    pub fn stop_all(&self) {
        debug!("monitor: Stopping monitoring");
        self.for_each_node("stop", |_node, exec, script| exec.run(&stop_cmd(script)));
    }

    pub fn log_to_all(&self, prefix: &str, msg: &str) {
        self.for_each_node("marker append", |node, exec, _script| {
            exec.run(&append_cmd(node, prefix, msg))
        });
    }

    pub fn delete_logs_all(&self, prefix: &str) {
        debug!("monitor: Deleting old monitor logs with prefix {:?}", prefix);
        self.for_each_node("log deletion", |_node, exec, _script| {
            exec.run(&delete_cmd(prefix))
        });
    }
}
