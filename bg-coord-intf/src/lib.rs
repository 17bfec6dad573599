// Copyright (c) Facebook, Inc. and its affiliates.
pub mod args;
pub mod nodes;
pub mod workload;

pub use args::{Args, Objective, SlaAveraging};
pub use nodes::{NodeRegistry, RemoteNode, LOCAL_NODE_NAME};
pub use workload::{WarmupPlan, WorkloadProps};

lazy_static::lazy_static! {
    pub static ref VERSION: &'static str = env!("CARGO_PKG_VERSION");
}
