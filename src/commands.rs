//! Command handlers for fleetctl
//!
//! Each handler prints a human-readable summary and maps terminal failures to a
//! non-zero exit through `anyhow`.

use anyhow::{bail, Result};
use fleetctl::deploy::DeployOptions;
use fleetctl::fleet::{DiagnosticStatus, ProcessState};
use fleetctl::registry::Registry;
use fleetctl::Orchestrator;

/// Initialize logging with the specified verbosity level
///
/// `RUST_LOG` takes precedence when set, then `-v`, then the config file level.
pub fn init_logging(verbose: Option<u8>, config_level: &str) {
    use tracing_subscriber::EnvFilter;

    let log_level = match verbose {
        Some(0) => "warn",
        Some(1) => "info",
        Some(2) => "debug",
        Some(_) => "trace",
        None => config_level,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(filter)
        .init();
}

/// Handle the check command
pub fn handle_check(orch: &Orchestrator<'_>, registry: &Registry) -> Result<()> {
    if registry.is_empty() {
        println!("清单为空，无事可做");
        return Ok(());
    }

    let report = orch.check(registry);

    println!();
    println!("最新版本: {}", report.latest_tag.as_deref().unwrap_or("未知"));
    for (name, state) in &report.statuses {
        match state {
            ProcessState::Running => println!("  ✅ {:<24} 运行中", name),
            ProcessState::NotRunning => println!("  ❌ {:<24} 未运行", name),
            ProcessState::Unreachable(reason) => println!("  ❌ {:<24} 无法连接: {}", name, reason),
        }
    }
    if !report.missing_config.is_empty() {
        println!("  ⚠️ 缺少 ssh_host: {}", report.missing_config.join(", "));
    }

    Ok(())
}

/// Handle the restart command
pub fn handle_restart(orch: &Orchestrator<'_>, registry: &Registry) -> Result<()> {
    if registry.is_empty() {
        println!("清单为空，无事可做");
        return Ok(());
    }

    let report = orch.restart(registry);

    for (name, outcome) in &report.outcomes {
        match outcome {
            Ok(()) => println!("  ✅ {:<24} 已触发重启", name),
            Err(reason) => println!("  ❌ {:<24} 重启失败: {}", name, reason),
        }
    }
    if !report.missing_config.is_empty() {
        println!("  ⚠️ 缺少 ssh_host: {}", report.missing_config.join(", "));
    }

    let failed = report.failures().count();
    if failed > 0 {
        bail!("{} 台主机重启失败", failed);
    }
    Ok(())
}

/// Handle the deploy command
pub fn handle_deploy(
    orch: &Orchestrator<'_>,
    registry: &Registry,
    target: &str,
    options: &DeployOptions,
) -> Result<()> {
    match orch.deploy(registry, target, options) {
        Ok(plan) => {
            println!();
            println!("✅ {} 部署完成", plan.agent_name);
            println!("  主机:    {}", plan.ssh_host.as_deref().unwrap_or("-"));
            println!("  隧道 ID: {}", plan.tunnel_id.as_deref().unwrap_or("-"));
            if let Some(binary) = &plan.binary_source {
                println!("  二进制:  {:?}", binary);
            }
            Ok(())
        }
        Err(failure) => bail!("{}", orch.redactor.redact(&failure.to_string())),
    }
}

/// Handle the debug command
pub fn handle_debug(orch: &Orchestrator<'_>, registry: &Registry, target: &str) -> Result<()> {
    let checks = match orch.debug(registry, target) {
        Ok(checks) => checks,
        Err(e) => bail!("{}", orch.redactor.redact(&e.to_string())),
    };

    for check in checks {
        let status = match check.status {
            DiagnosticStatus::Exited(code) => format!("退出码 {}", code),
            DiagnosticStatus::Unreachable => "无法连接".to_string(),
        };
        println!("=== {} ({}) ===", check.name, status);
        println!("$ {}", check.command);
        println!("{}", check.output.trim_end());
        println!();
    }

    Ok(())
}
