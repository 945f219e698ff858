//! 远程执行模块
//!
//! 通过 SSH 在 agent 主机上执行命令、上传文件
//!
//! # 功能
//!
//! - 同步执行单条命令，返回退出码和输出，非零退出码不视为错误
//! - 递归上传文件或目录到主目录下的工作目录
//! - 所有主机共用同一组用户名/密码

mod ssh;

pub use ssh::{SshConnection, SshShell};
pub(crate) use ssh::shell_quote;

use std::path::Path;

use crate::error::FleetResult;

/// 远程命令执行结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// 远程 shell 传输
///
/// `Err` 只表示主机不可达 (连接、认证、传输失败)。命令本身的失败通过
/// [`ExecutionResult::exit_code`] 返回，由调用方判断。
pub trait RemoteShell {
    /// 在 `host` 上执行 `command`
    fn run(&self, host: &str, command: &str) -> FleetResult<ExecutionResult>;

    /// 上传本地文件或目录到 `remote_path` (相对用户主目录)
    ///
    /// 目录会被递归上传，`remote_path` 为目标目录本身。
    fn copy(&self, host: &str, local: &Path, remote_path: &str) -> FleetResult<()>;
}
