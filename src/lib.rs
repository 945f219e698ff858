//! fleetctl - agent 集群运维库
//!
//! 检查、重启和部署远程主机上的 gravity-agent 进程

pub mod artifact;
pub mod config;
pub mod deploy;
pub mod error;
pub mod fleet;
pub mod notify;
pub mod redact;
pub mod registry;
pub mod remote;
pub mod tunnel;

mod orchestrator;

pub use error::{FleetError, FleetResult};
pub use orchestrator::Orchestrator;
