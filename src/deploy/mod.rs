//! 远程部署模块
//!
//! 把一个 agent 从零部署到目标主机
//!
//! # 流程
//!
//! `LOOKUP → RESOLVE_TUNNEL → WRITE_CONFIG → ENSURE_BINARY → TRANSFER → RESTART → DONE`
//!
//! 任一步失败即终止，不自动重试，失败信息带有步骤名。
//!
//! # 使用示例
//!
//! ```bash
//! fleetctl deploy --target madrid-3-3
//!
//! # DNS 中查不到隧道时手动指定
//! fleetctl deploy --target madrid-3-3 --tunnel-id 6f1c...
//! ```

mod pipeline;
mod templates;

pub use pipeline::{BinarySource, DeployFailure, DeployOptions, DeployStep, Deployer, DeploymentPlan};
pub use templates::{agent_env_file, AgentEnv};
