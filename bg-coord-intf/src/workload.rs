// Copyright (c) Facebook, Inc. and its affiliates.
use anyhow::{bail, Context, Result};
use scan_fmt::scan_fmt;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

// Action-mix keys whose nonzero weight makes a workload write-heavy. A
// write-heavy workload mutates the graph, so each trial must start from a
// freshly loaded database.
const WRITE_ACTION_KEYS: [&str; 4] = [
    "AcceptFriendReqAction",
    "RejectFriendReqAction",
    "ThawFriendshipAction",
    "InviteFriendAction",
];

/// Warm-up pass matched to the populate workload's scale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmupPlan {
    pub workload: String,
    pub max_exec_time: u32,
}

/// A generator property file (java-properties style `key=value` lines).
#[derive(Debug, Clone, Default)]
pub struct WorkloadProps {
    props: BTreeMap<String, String>,
}

impl WorkloadProps {
    pub fn parse(text: &str) -> Self {
        let mut props = BTreeMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            if let Ok((key, val)) = scan_fmt!(line, "{}={}", String, String) {
                props.insert(key, val);
            }
        }
        Self { props }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read workload file {:?}", path))?;
        Ok(Self::parse(&text))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.props.get(key).map(|x| x.as_str())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|x| x.trim().parse::<f64>().ok())
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get(key).and_then(|x| x.trim().parse::<u32>().ok())
    }

    pub fn is_write_heavy(&self) -> bool {
        WRITE_ACTION_KEYS
            .iter()
            .any(|key| self.get_f64(key).unwrap_or(0.0) > 0.0)
    }

    /// Picks the warm-up workload and execution-time bound for the populate
    /// workload's user and friendship scale. Small friend counts warm up
    /// much faster, hence the split bounds.
    pub fn warmup_plan(&self) -> Result<WarmupPlan> {
        let user_count = match self.get_u32("usercount") {
            Some(v) => v,
            None => bail!("workload does not have a valid usercount"),
        };
        let friend_count = match self.get_u32("friendcountperuser") {
            Some(v) => v,
            None => bail!("workload does not have a valid friendcountperuser"),
        };

        let (max_exec_time, workload) = match user_count {
            1000 => (
                if friend_count == 10 { 20 } else { 120 },
                "workloads/warmupWorkload1",
            ),
            10000 => (
                if friend_count == 10 { 300 } else { 600 },
                "workloads/warmupWorkload2",
            ),
            100000 => (
                if friend_count == 10 { 600 } else { 2400 },
                "workloads/warmupWorkload3",
            ),
            v => bail!("no warm-up profile for usercount {}", v),
        };

        Ok(WarmupPlan {
            workload: workload.into(),
            max_exec_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const READ_WORKLOAD: &str = "\
# friendship actions
usercount=10000
friendcountperuser=10
ViewProfileAction=0.9
ListFriendsAction=0.1
InviteFriendAction=0
AcceptFriendReqAction=0.0
";

    const WRITE_WORKLOAD: &str = "\
usercount=1000
friendcountperuser=100
ViewProfileAction=0.8
InviteFriendAction=0.1
AcceptFriendReqAction=0.05
RejectFriendReqAction=0.05
";

    #[test]
    fn test_parse() {
        let props = WorkloadProps::parse(READ_WORKLOAD);
        assert_eq!(props.get("usercount"), Some("10000"));
        assert_eq!(props.get_f64("ViewProfileAction"), Some(0.9));
        assert_eq!(props.get("friendship actions"), None);
        assert_eq!(props.get("nosuchkey"), None);
    }

    #[test]
    fn test_write_heavy() {
        assert!(!WorkloadProps::parse(READ_WORKLOAD).is_write_heavy());
        assert!(WorkloadProps::parse(WRITE_WORKLOAD).is_write_heavy());
        assert!(!WorkloadProps::parse("ViewProfileAction=1.0\n").is_write_heavy());
    }

    #[test]
    fn test_warmup_plan() {
        let plan = WorkloadProps::parse(READ_WORKLOAD).warmup_plan().unwrap();
        assert_eq!(
            plan,
            WarmupPlan {
                workload: "workloads/warmupWorkload2".into(),
                max_exec_time: 300,
            }
        );

        let plan = WorkloadProps::parse(WRITE_WORKLOAD).warmup_plan().unwrap();
        assert_eq!(
            plan,
            WarmupPlan {
                workload: "workloads/warmupWorkload1".into(),
                max_exec_time: 120,
            }
        );

        assert!(WorkloadProps::parse("usercount=42\nfriendcountperuser=10\n")
            .warmup_plan()
            .is_err());
        assert!(WorkloadProps::parse("").warmup_plan().is_err());
    }
}
