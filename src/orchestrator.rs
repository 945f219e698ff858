//! 运维入口
//!
//! 把配置和各个外部能力组合在一起，对外提供 check / restart / deploy / debug。

use tracing::{info, warn};

use crate::artifact::ArtifactFetcher;
use crate::config::Config;
use crate::deploy::{DeployFailure, DeployOptions, Deployer, DeploymentPlan};
use crate::error::FleetResult;
use crate::fleet::{CheckReport, DiagnosticCheck, FleetOps, RestartReport};
use crate::notify::Notifier;
use crate::redact::Redactor;
use crate::registry::Registry;
use crate::remote::RemoteShell;
use crate::tunnel::TunnelLookup;

/// 一次调用内使用的全部依赖
pub struct Orchestrator<'a> {
    pub config: &'a Config,
    pub redactor: &'a Redactor,
    pub shell: &'a dyn RemoteShell,
    pub tunnels: &'a dyn TunnelLookup,
    pub artifacts: &'a dyn ArtifactFetcher,
    pub notifier: &'a dyn Notifier,
}

impl<'a> Orchestrator<'a> {
    fn fleet(&self) -> FleetOps<'_> {
        FleetOps::new(&self.config.agent, self.shell, self.notifier, self.redactor)
    }

    fn deployer(&self) -> Deployer<'_> {
        Deployer {
            agent: &self.config.agent,
            deploy_token: self.config.github_token.as_deref(),
            pinned_version: self.config.release.version.as_deref(),
            shell: self.shell,
            tunnels: self.tunnels,
            artifacts: self.artifacts,
            notifier: self.notifier,
            redactor: self.redactor,
        }
    }

    /// 检查进程状态，并附带最新发布版本供参考
    pub fn check(&self, registry: &Registry) -> CheckReport {
        let latest_tag = match self.artifacts.latest_tag() {
            Ok(tag) => {
                info!("最新版本: {}", tag);
                Some(tag)
            }
            Err(e) => {
                warn!("无法获取最新版本: {}", self.redactor.redact(&e.to_string()));
                None
            }
        };

        self.fleet().check(registry, latest_tag)
    }

    pub fn restart(&self, registry: &Registry) -> RestartReport {
        self.fleet().restart(registry)
    }

    pub fn deploy(
        &self,
        registry: &Registry,
        name: &str,
        options: &DeployOptions,
    ) -> Result<DeploymentPlan, DeployFailure> {
        self.deployer().deploy(registry, name, options)
    }

    pub fn debug(&self, registry: &Registry, name: &str) -> FleetResult<Vec<DiagnosticCheck>> {
        self.fleet().debug(registry, name)
    }
}
