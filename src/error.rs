//! 错误类型
//!
//! 底层传输错误 (reqwest / ssh2 / serde_json) 在组件边界被转换为以下分类，
//! 流水线逻辑只处理 `FleetError`。

use thiserror::Error;

/// 运维操作错误
#[derive(Debug, Error)]
pub enum FleetError {
    /// 凭据或地址未配置
    #[error("配置缺失: {0}")]
    ConfigurationMissing(String),

    /// SSH 连接失败或超时
    #[error("无法连接 {host}: {reason}")]
    RemoteUnreachable { host: String, reason: String },

    /// 无法解析隧道 ID
    #[error("隧道 ID 解析失败: {0}")]
    ResolutionFailure(String),

    /// 二进制下载或资源查找失败
    #[error("制品获取失败: {0}")]
    ArtifactFailure(String),

    /// Agent 清单不可用
    #[error("Agent 清单获取失败: {0}")]
    RegistryFailure(String),

    #[error("Agent {0} 不在清单中")]
    AgentNotFound(String),

    #[error("Agent {0} 缺少 ssh_host")]
    MissingHost(String),

    /// 环境文件字段包含换行
    #[error("字段 {key} 非法: {reason}")]
    InvalidField { key: String, reason: String },

    /// 远程命令返回了非零退出码 (调用方显式判定为失败时使用)
    #[error("远程命令失败 (退出码: {code}): {detail}")]
    CommandFailed { code: i32, detail: String },

    #[error("本地文件错误: {0}")]
    Io(#[from] std::io::Error),
}

impl FleetError {
    pub fn unreachable(host: &str, reason: impl ToString) -> Self {
        FleetError::RemoteUnreachable {
            host: host.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type FleetResult<T> = Result<T, FleetError>;
