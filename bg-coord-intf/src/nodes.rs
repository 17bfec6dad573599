// Copyright (c) Facebook, Inc. and its affiliates.
use serde::{Deserialize, Serialize};

use bg_util::remote::SshOpts;
use bg_util::{JsonLoad, JsonSave};

/// Logical name of the pseudo-node representing the coordinator machine.
/// Commands addressed to it execute directly instead of over SSH.
pub const LOCAL_NODE_NAME: &str = "bgClient";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteNode {
    pub name: String,
    pub addr: String,
}

impl RemoteNode {
    pub fn new(name: &str, addr: &str) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
        }
    }
}

/// Fixed registry of the cluster nodes monitoring fans out to, read from a
/// json file at startup and read-only afterwards. The defaults describe the
/// four-node FoundationDB + JanusGraph testbed layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeRegistry {
    pub ssh: SshOpts,
    pub remote_script: String,
    pub local_script: String,
    pub nodes: Vec<RemoteNode>,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self {
            ssh: Default::default(),
            remote_script: "scripts/monitor_perf.sh".into(),
            local_script: "scripts/monitor_perf.sh".into(),
            nodes: vec![
                RemoteNode::new("fdbCache", "apt068.apt.emulab.net"),
                RemoteNode::new("fdbStorage", "apt071.apt.emulab.net"),
                RemoteNode::new("fdbLogServer", "apt069.apt.emulab.net"),
                RemoteNode::new("janusGraph", "apt075.apt.emulab.net"),
            ],
        }
    }
}

impl JsonLoad for NodeRegistry {}
impl JsonSave for NodeRegistry {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_json_round_trip() {
        let reg = NodeRegistry::default();
        let json = bg_util::JsonSave::as_json(&reg).unwrap();
        let parsed: NodeRegistry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.nodes.len(), reg.nodes.len());
        assert_eq!(parsed.nodes[0].name, "fdbCache");
        assert_eq!(parsed.ssh.timeout_secs, reg.ssh.timeout_secs);
    }
}
