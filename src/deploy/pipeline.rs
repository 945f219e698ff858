//! 部署流水线
//!
//! 显式状态机：[`Deployer::transition`] 执行当前步骤并返回下一步，
//! 每一步都可以单独测试。

use std::fmt;
use std::path::PathBuf;
use tracing::{info, warn};

use super::templates::{self, AgentEnv};
use crate::artifact::{ArtifactFetcher, ArtifactVersion};
use crate::config::AgentSettings;
use crate::error::{FleetError, FleetResult};
use crate::fleet::FleetOps;
use crate::notify::Notifier;
use crate::redact::Redactor;
use crate::registry::{ActionableAgent, Registry};
use crate::remote::{shell_quote, RemoteShell};
use crate::tunnel::TunnelLookup;

/// 部署步骤
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployStep {
    Lookup,
    ResolveTunnel,
    WriteConfig,
    EnsureBinary,
    Transfer,
    Restart,
    Done,
}

impl fmt::Display for DeployStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeployStep::Lookup => "LOOKUP",
            DeployStep::ResolveTunnel => "RESOLVE_TUNNEL",
            DeployStep::WriteConfig => "WRITE_CONFIG",
            DeployStep::EnsureBinary => "ENSURE_BINARY",
            DeployStep::Transfer => "TRANSFER",
            DeployStep::Restart => "RESTART",
            DeployStep::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// 本次部署使用的二进制
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinarySource {
    /// 暂存目录中已有的文件，未发起网络请求
    Cached(PathBuf),
    /// 本次下载
    Downloaded(PathBuf),
}

impl BinarySource {
    pub fn path(&self) -> &PathBuf {
        match self {
            BinarySource::Cached(p) | BinarySource::Downloaded(p) => p,
        }
    }
}

/// 部署计划，随流水线推进逐步填充
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentPlan {
    pub agent_name: String,
    pub ssh_host: Option<String>,
    pub public_url: Option<String>,
    pub tunnel_id: Option<String>,
    pub binary_source: Option<BinarySource>,
    /// 本地渲染好的环境文件
    pub env_file: Option<PathBuf>,
}

impl DeploymentPlan {
    pub fn new(agent_name: &str) -> Self {
        Self {
            agent_name: agent_name.to_string(),
            ..Self::default()
        }
    }

    fn require<'p>(value: &'p Option<String>, field: &str) -> FleetResult<&'p str> {
        value
            .as_deref()
            .ok_or_else(|| FleetError::ConfigurationMissing(format!("部署计划缺少 {}", field)))
    }

    fn ssh_host(&self) -> FleetResult<&str> {
        Self::require(&self.ssh_host, "ssh_host")
    }
}

/// 调用方提供的部署选项
#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    /// DNS 解析失败时使用的隧道 ID
    pub tunnel_override: Option<String>,
    /// 要部署的版本
    pub version: Option<String>,
}

/// 部署失败：所在步骤和原因
#[derive(Debug)]
pub struct DeployFailure {
    pub step: DeployStep,
    pub error: FleetError,
    /// 失败时已经填充的计划
    pub plan: DeploymentPlan,
}

impl fmt::Display for DeployFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.step, self.error)
    }
}

impl std::error::Error for DeployFailure {}

/// 单个 agent 的部署器
pub struct Deployer<'a> {
    pub(crate) agent: &'a AgentSettings,
    pub(crate) deploy_token: Option<&'a str>,
    /// 配置文件中固定的版本，`DeployOptions::version` 优先
    pub(crate) pinned_version: Option<&'a str>,
    pub(crate) shell: &'a dyn RemoteShell,
    pub(crate) tunnels: &'a dyn TunnelLookup,
    pub(crate) artifacts: &'a dyn ArtifactFetcher,
    pub(crate) notifier: &'a dyn Notifier,
    pub(crate) redactor: &'a Redactor,
}

impl<'a> Deployer<'a> {
    /// 执行完整部署流程
    ///
    /// 失败时发送一条告警。
    pub fn deploy(
        &self,
        registry: &Registry,
        name: &str,
        options: &DeployOptions,
    ) -> Result<DeploymentPlan, DeployFailure> {
        info!("🚀 开始部署 {}...", name);

        let mut plan = DeploymentPlan::new(name);
        let mut step = DeployStep::Lookup;

        while step != DeployStep::Done {
            match self.transition(step, registry, &mut plan, options) {
                Ok(next) => step = next,
                Err(error) => {
                    let reason = self.redactor.redact(&error.to_string());
                    warn!("❌ 部署 {} 在 {} 步骤失败: {}", name, step, reason);
                    self.notifier.notify(&format!(
                        "❌ **Deployment Failed**\nAgent `{}` failed at `{}`: {}",
                        name, step, reason
                    ));
                    return Err(DeployFailure { step, error, plan });
                }
            }
        }

        info!("✅ {} 部署完成", name);
        Ok(plan)
    }

    /// 执行 `step` 并返回下一步
    pub fn transition(
        &self,
        step: DeployStep,
        registry: &Registry,
        plan: &mut DeploymentPlan,
        options: &DeployOptions,
    ) -> FleetResult<DeployStep> {
        match step {
            DeployStep::Lookup => {
                self.lookup(registry, plan)?;
                Ok(DeployStep::ResolveTunnel)
            }
            DeployStep::ResolveTunnel => {
                self.resolve_tunnel(plan, options)?;
                Ok(DeployStep::WriteConfig)
            }
            DeployStep::WriteConfig => {
                self.write_config(plan)?;
                Ok(DeployStep::EnsureBinary)
            }
            DeployStep::EnsureBinary => {
                self.ensure_binary(plan, options)?;
                Ok(DeployStep::Transfer)
            }
            DeployStep::Transfer => {
                self.transfer(plan)?;
                Ok(DeployStep::Restart)
            }
            DeployStep::Restart => {
                self.restart(plan)?;
                Ok(DeployStep::Done)
            }
            DeployStep::Done => Ok(DeployStep::Done),
        }
    }

    fn lookup(&self, registry: &Registry, plan: &mut DeploymentPlan) -> FleetResult<()> {
        let entry = registry
            .get(&plan.agent_name)
            .ok_or_else(|| FleetError::AgentNotFound(plan.agent_name.clone()))?;
        let host = entry
            .ssh_host()
            .ok_or_else(|| FleetError::MissingHost(plan.agent_name.clone()))?;

        plan.ssh_host = Some(host.to_string());
        plan.public_url = entry.public_url().map(str::to_string);
        info!("目标主机: {}", host);
        Ok(())
    }

    /// 用 SSH 主机名 (而非公网地址) 查 DNS：隧道的 CNAME 绑定的是机器
    fn resolve_tunnel(&self, plan: &mut DeploymentPlan, options: &DeployOptions) -> FleetResult<()> {
        let host = plan.ssh_host()?;
        let dns_name = host.rsplit_once(':').map_or(host, |(h, _)| h);

        let tunnel_id = match self.tunnels.resolve_tunnel_id(dns_name) {
            Some(id) => id,
            None => match options.tunnel_override.as_deref().map(str::trim) {
                Some(manual) if !manual.is_empty() => {
                    info!("使用手动指定的隧道 ID");
                    manual.to_string()
                }
                _ => {
                    return Err(FleetError::ResolutionFailure(format!(
                        "无法自动部署: 未能解析 {} 的隧道 ID，请通过 --tunnel-id 手动指定",
                        dns_name
                    )))
                }
            },
        };

        plan.tunnel_id = Some(tunnel_id);
        Ok(())
    }

    fn write_config(&self, plan: &mut DeploymentPlan) -> FleetResult<()> {
        let public_url = DeploymentPlan::require(&plan.public_url, "url")?;
        let tunnel_id = DeploymentPlan::require(&plan.tunnel_id, "tunnel_id")?;

        let token = self.deploy_token.unwrap_or_else(|| {
            warn!("未配置 GITHUB_TOKEN，环境文件中的令牌为空");
            ""
        });

        let content = templates::agent_env_file(&AgentEnv {
            agent_name: &plan.agent_name,
            tunnel_id,
            public_url,
            worker_url: &self.agent.worker_url,
            deploy_token: token,
            headless: true,
        })?;

        let path = self.agent.staged_env();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&path, content)?;

        info!("环境文件已生成: {}", path.display());
        plan.env_file = Some(path);
        Ok(())
    }

    fn ensure_binary(&self, plan: &mut DeploymentPlan, options: &DeployOptions) -> FleetResult<()> {
        let staged = self.agent.staged_binary();

        let source = if staged.exists() {
            info!("使用已暂存的二进制: {}", staged.display());
            BinarySource::Cached(staged)
        } else {
            let version =
                ArtifactVersion::from_option(options.version.as_deref().or(self.pinned_version));
            info!("⬇️ 下载二进制 ({})...", version);
            BinarySource::Downloaded(self.artifacts.fetch_binary(&version, &staged)?)
        };

        plan.binary_source = Some(source);
        Ok(())
    }

    fn transfer(&self, plan: &DeploymentPlan) -> FleetResult<()> {
        let host = plan.ssh_host()?;
        let binary = plan
            .binary_source
            .as_ref()
            .ok_or_else(|| FleetError::ArtifactFailure("没有可上传的二进制".to_string()))?;
        let env_file = plan
            .env_file
            .as_ref()
            .ok_or_else(|| FleetError::ConfigurationMissing("环境文件未生成".to_string()))?;

        let mkdir = format!("mkdir -p {}", shell_quote(&format!("~/{}", self.agent.remote_dir)));
        let created = self.shell.run(host, &mkdir)?;
        if !created.success() {
            return Err(FleetError::CommandFailed {
                code: created.exit_code,
                detail: created.stderr.trim().to_string(),
            });
        }

        // 运行中的二进制不能被直接覆盖写入 (ETXTBSY)，先传到临时路径再改名
        info!("📤 上传二进制...");
        let upload = self.agent.remote_binary_upload();
        self.shell.copy(host, binary.path(), &upload)?;

        let replace = format!(
            "mv -f {} {}",
            shell_quote(&format!("~/{}", upload)),
            shell_quote(&format!("~/{}", self.agent.remote_binary()))
        );
        let replaced = self.shell.run(host, &replace)?;
        if !replaced.success() {
            return Err(FleetError::CommandFailed {
                code: replaced.exit_code,
                detail: replaced.stderr.trim().to_string(),
            });
        }

        let templates = &self.agent.templates_dir;
        if templates.is_dir() {
            info!("📤 上传模板目录...");
            let dir_name = templates
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "templates".to_string());
            self.shell
                .copy(host, templates, &format!("{}/{}", self.agent.remote_dir, dir_name))?;
        } else {
            warn!(
                "⚠️ 本地没有模板目录 {}，依赖模板的 UI 自动化将会失败",
                templates.display()
            );
        }

        info!("📤 上传环境文件...");
        self.shell.copy(host, env_file, &self.agent.remote_env())?;
        Ok(())
    }

    fn restart(&self, plan: &DeploymentPlan) -> FleetResult<()> {
        let fleet = FleetOps::new(self.agent, self.shell, self.notifier, self.redactor);
        fleet.restart_one(&ActionableAgent {
            name: &plan.agent_name,
            ssh_host: plan.ssh_host()?,
            public_url: plan.public_url.as_deref(),
        })
    }
}
