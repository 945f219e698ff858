//! CLI argument definitions for fleetctl
//!
//! This module contains all command-line argument parsing logic.

use clap::{Parser, Subcommand};

/// fleetctl - 命令行参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// 配置文件路径
    #[arg(short, long, env = "FLEETCTL_CONFIG")]
    pub config: Option<String>,

    /// 日志级别 (0=warn, 1=info, 2=debug, 3=trace)
    #[arg(short, long)]
    pub verbose: Option<u8>,
}

/// 子命令
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 检查所有 agent 的进程状态
    Check {
        /// 只检查指定的 agent
        #[arg(long)]
        target: Option<String>,
    },

    /// 重启 agent 进程
    Restart {
        /// 只重启指定的 agent
        #[arg(long)]
        target: Option<String>,
    },

    /// 完整部署一个 agent
    Deploy {
        /// 要部署的 agent 名
        #[arg(long)]
        target: String,

        /// DNS 中查不到隧道时使用的隧道 ID
        #[arg(long)]
        tunnel_id: Option<String>,

        /// 指定发布版本 tag (默认最新)
        #[arg(long)]
        release: Option<String>,
    },

    /// 在单台主机上运行诊断命令
    Debug {
        /// 要诊断的 agent 名
        #[arg(long)]
        target: String,
    },
}
