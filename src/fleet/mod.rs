//! Fleet 运维操作
//!
//! - check: 探测每台主机上的 agent 进程是否存活
//! - restart: 按精确进程名结束旧进程并在后台重新启动
//! - debug: 对单台主机运行一组只读诊断命令
//!
//! 所有操作逐台串行执行，单台主机失败不影响其余主机。

mod diagnostic;

pub use diagnostic::{DiagnosticCheck, DiagnosticStatus, DIAGNOSTIC_COMMANDS};

use tracing::{info, warn};

use crate::config::AgentSettings;
use crate::error::{FleetError, FleetResult};
use crate::notify::Notifier;
use crate::redact::Redactor;
use crate::registry::{ActionableAgent, Registry};
use crate::remote::{shell_quote, RemoteShell};

/// 进程状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    NotRunning,
    /// 无法连接主机，附带脱敏后的原因
    Unreachable(String),
}

/// check 的结果
#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    /// 最新发布版本，仅供参考
    pub latest_tag: Option<String>,
    pub statuses: Vec<(String, ProcessState)>,
    /// 缺少 ssh_host 的 agent
    pub missing_config: Vec<String>,
}

impl CheckReport {
    pub fn state_of(&self, name: &str) -> Option<&ProcessState> {
        self.statuses.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }
}

/// restart 的结果
#[derive(Debug, Clone, Default)]
pub struct RestartReport {
    /// 每台主机的结果，失败时附带脱敏后的原因
    pub outcomes: Vec<(String, Result<(), String>)>,
    pub missing_config: Vec<String>,
}

impl RestartReport {
    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outcomes.iter().filter_map(|(name, r)| match r {
            Err(reason) => Some((name.as_str(), reason.as_str())),
            Ok(()) => None,
        })
    }

    pub fn all_succeeded(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// 运维操作执行器
pub struct FleetOps<'a> {
    agent: &'a AgentSettings,
    shell: &'a dyn RemoteShell,
    notifier: &'a dyn Notifier,
    redactor: &'a Redactor,
}

impl<'a> FleetOps<'a> {
    pub fn new(
        agent: &'a AgentSettings,
        shell: &'a dyn RemoteShell,
        notifier: &'a dyn Notifier,
        redactor: &'a Redactor,
    ) -> Self {
        Self {
            agent,
            shell,
            notifier,
            redactor,
        }
    }

    /// 进程探测命令，按精确进程名匹配
    pub fn pgrep_command(&self) -> String {
        format!("pgrep -x {}", shell_quote(&self.agent.process_name))
    }

    /// 结束进程的命令
    ///
    /// 只匹配进程名 (`-x`)，不匹配完整命令行：执行本命令的远程 shell 自身的
    /// 命令行里就包含进程名，用 `-f` 会把自己也杀掉。
    /// 进程名长度受 [`crate::config::MAX_PROCESS_NAME_LEN`] 限制，由 `Config::validate` 检查。
    pub fn kill_command(&self) -> String {
        format!("pkill -9 -x {}", shell_quote(&self.agent.process_name))
    }

    pub fn chmod_command(&self) -> String {
        format!("chmod +x {}", shell_quote(&format!("~/{}", self.agent.remote_binary())))
    }

    pub fn launch_command(&self) -> String {
        format!(
            "cd {} && nohup ./{} > {} 2>&1 < /dev/null &",
            shell_quote(&format!("~/{}", self.agent.remote_dir)),
            shell_quote(&self.agent.process_name),
            shell_quote(&self.agent.log_file),
        )
    }

    /// 检查所有 agent 的进程状态
    ///
    /// 只对缺少 ssh_host 的情况发一条汇总告警，进程未运行不告警。
    pub fn check(&self, registry: &Registry, latest_tag: Option<String>) -> CheckReport {
        let (actionable, missing) = registry.partition();
        let mut report = CheckReport {
            latest_tag,
            ..CheckReport::default()
        };

        for name in &missing {
            warn!("⚠️ 跳过 {}: 缺少 ssh_host", name);
        }

        for agent in actionable {
            info!("检查 {} ({})...", agent.name, agent.ssh_host);
            let state = match self.shell.run(agent.ssh_host, &self.pgrep_command()) {
                Ok(result) if result.success() => {
                    info!("✅ {}: 服务运行中", agent.name);
                    ProcessState::Running
                }
                Ok(_) => {
                    warn!("❌ {}: 服务未运行", agent.name);
                    ProcessState::NotRunning
                }
                Err(e) => {
                    let reason = self.redactor.redact(&e.to_string());
                    warn!("❌ {}: {}", agent.name, reason);
                    ProcessState::Unreachable(reason)
                }
            };
            report.statuses.push((agent.name.to_string(), state));
        }

        report.missing_config = missing.into_iter().map(str::to_string).collect();
        self.report_missing(&report.missing_config);
        report
    }

    /// 重启所有可操作的 agent
    pub fn restart(&self, registry: &Registry) -> RestartReport {
        let (actionable, missing) = registry.partition();
        let mut report = RestartReport::default();

        for agent in actionable {
            let outcome = self
                .restart_one(&agent)
                .map_err(|e| self.redactor.redact(&e.to_string()));
            match &outcome {
                Ok(()) => info!("✅ {}: 已触发重启", agent.name),
                Err(reason) => warn!("❌ {}: 重启失败: {}", agent.name, reason),
            }
            report.outcomes.push((agent.name.to_string(), outcome));
        }

        report.missing_config = missing.into_iter().map(str::to_string).collect();
        self.report_missing(&report.missing_config);
        report
    }

    /// 重启单台主机：结束旧进程、恢复执行权限、后台启动
    pub fn restart_one(&self, agent: &ActionableAgent<'_>) -> FleetResult<()> {
        info!("🔄 重启 {}...", agent.name);

        // pkill 退出码 1 表示没有匹配的进程
        let killed = self.shell.run(agent.ssh_host, &self.kill_command())?;
        if killed.exit_code > 1 {
            return Err(FleetError::CommandFailed {
                code: killed.exit_code,
                detail: killed.stderr.trim().to_string(),
            });
        }

        // 上传可能丢失执行权限
        let chmod = self.shell.run(agent.ssh_host, &self.chmod_command())?;
        if !chmod.success() {
            return Err(FleetError::CommandFailed {
                code: chmod.exit_code,
                detail: chmod.stderr.trim().to_string(),
            });
        }

        let launched = self.shell.run(agent.ssh_host, &self.launch_command())?;
        if !launched.success() {
            return Err(FleetError::CommandFailed {
                code: launched.exit_code,
                detail: launched.stderr.trim().to_string(),
            });
        }

        Ok(())
    }

    /// 对单台主机运行诊断命令
    pub fn debug(&self, registry: &Registry, name: &str) -> FleetResult<Vec<DiagnosticCheck>> {
        let entry = registry
            .get(name)
            .ok_or_else(|| FleetError::AgentNotFound(name.to_string()))?;
        let host = entry
            .ssh_host()
            .ok_or_else(|| FleetError::MissingHost(name.to_string()))?;

        info!("诊断 {} ({})...", name, host);
        Ok(diagnostic::run_diagnostics(self.shell, host, self.agent, self.redactor))
    }

    fn report_missing(&self, missing: &[String]) {
        if missing.is_empty() {
            return;
        }
        let msg = format!(
            "⚠️ **Configuration Missing**\nThe following agents lack `ssh_host` config:\n`{}`\nPlease update `agents.json`.",
            missing.join(", ")
        );
        self.notifier.notify(&self.redactor.redact(&msg));
    }
}
