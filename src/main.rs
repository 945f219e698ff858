//! fleetctl - agent 集群运维工具
//!
//! 主入口程序

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use cli::{Args, Commands};
use fleetctl::artifact::GitHubReleases;
use fleetctl::config::Config;
use fleetctl::deploy::DeployOptions;
use fleetctl::notify;
use fleetctl::redact::Redactor;
use fleetctl::registry::RegistryClient;
use fleetctl::remote::SshShell;
use fleetctl::tunnel::{CloudflareDns, TunnelResolver};
use fleetctl::Orchestrator;

fn main() -> Result<()> {
    // 解析命令行参数
    let args = Args::parse();

    // 加载配置：文件 → 环境变量
    let config_path = Config::get_config_path(args.config.as_deref());
    let mut config = Config::load(&config_path)?;
    config.apply_env(|key| std::env::var(key).ok());
    config.validate()?;
    let config = config;

    // 初始化日志
    commands::init_logging(args.verbose, &config.logging.level);

    info!("fleetctl v{} 启动中...", env!("CARGO_PKG_VERSION"));
    if config_path.exists() {
        info!("配置加载成功: {:?}", config_path);
    } else {
        warn!("配置文件不存在: {:?}, 使用默认配置", config_path);
    }

    let redactor = Redactor::new(config.secrets());
    let notifier = notify::create_notifier(&config, redactor.clone());
    let shell = SshShell::new(config.ssh.clone());
    let tunnels = TunnelResolver::new(config.cloudflare.clone(), CloudflareDns::new()?, redactor.clone());
    let artifacts = GitHubReleases::new(config.release.clone(), config.github_token.clone())?;

    let orch = Orchestrator {
        config: &config,
        redactor: &redactor,
        shell: &shell,
        tunnels: &tunnels,
        artifacts: &artifacts,
        notifier: notifier.as_ref(),
    };

    // 获取清单，失败时已告警，直接结束
    let Some(registry) =
        RegistryClient::from_config(&config, redactor.clone()).fetch_registry(notifier.as_ref())
    else {
        println!("无法获取 agent 清单，本次不执行任何操作");
        return Ok(());
    };

    match args.command {
        Commands::Check { target } => {
            commands::handle_check(&orch, &registry.select(target.as_deref())?)
        }
        Commands::Restart { target } => {
            commands::handle_restart(&orch, &registry.select(target.as_deref())?)
        }
        Commands::Deploy {
            target,
            tunnel_id,
            release,
        } => {
            let options = DeployOptions {
                tunnel_override: tunnel_id,
                version: release,
            };
            commands::handle_deploy(&orch, &registry, &target, &options)
        }
        Commands::Debug { target } => commands::handle_debug(&orch, &registry, &target),
    }
}
