//! Agent 清单
//!
//! 清单文件是一个 JSON 文档，顶层 `agents` 对象把 agent 名映射到连接描述。
//! 兼容两种条目格式：旧版的纯字符串 (没有 ssh_host，不可操作) 和结构化对象。

mod sources;

pub use sources::{DirectUrl, GitHubContents, RegistrySource};

use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{FleetError, FleetResult};
use crate::notify::Notifier;
use crate::redact::Redactor;

/// 结构化的 agent 描述
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AgentDescriptor {
    #[serde(default)]
    pub ssh_host: Option<String>,
    /// 公网地址
    #[serde(default, rename = "url")]
    pub public_url: Option<String>,
}

/// 清单条目
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum AgentEntry {
    /// 旧格式：值只是一个字符串
    Legacy(String),
    Structured(AgentDescriptor),
}

impl AgentEntry {
    /// 非空的 SSH 主机，旧格式条目总是 `None`
    pub fn ssh_host(&self) -> Option<&str> {
        match self {
            AgentEntry::Legacy(_) => None,
            AgentEntry::Structured(d) => d
                .ssh_host
                .as_deref()
                .map(str::trim)
                .filter(|h| !h.is_empty()),
        }
    }

    pub fn public_url(&self) -> Option<&str> {
        match self {
            AgentEntry::Legacy(_) => None,
            AgentEntry::Structured(d) => d.public_url.as_deref().filter(|u| !u.is_empty()),
        }
    }

    /// 是否可以执行远程操作
    pub fn is_actionable(&self) -> bool {
        self.ssh_host().is_some()
    }
}

#[derive(Debug, Deserialize)]
struct RegistryDocument {
    agents: BTreeMap<String, AgentEntry>,
}

/// 可以执行远程操作的 agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionableAgent<'a> {
    pub name: &'a str,
    pub ssh_host: &'a str,
    pub public_url: Option<&'a str>,
}

/// agent 名 → 条目
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    agents: BTreeMap<String, AgentEntry>,
}

impl Registry {
    /// 解析清单文档，缺少 `agents` 对象或条目格式错误均视为失败
    pub fn parse(text: &str) -> FleetResult<Self> {
        let doc: RegistryDocument = serde_json::from_str(text)
            .map_err(|e| FleetError::RegistryFailure(format!("清单格式错误: {}", e)))?;
        Ok(Self { agents: doc.agents })
    }

    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, AgentEntry)>,
    {
        Self {
            agents: entries.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn get(&self, name: &str) -> Option<&AgentEntry> {
        self.agents.get(name)
    }

    /// 只保留指定的 agent；`None` 表示不过滤
    ///
    /// 指定的 agent 不在清单中时返回 `AgentNotFound`。
    pub fn select(mut self, target: Option<&str>) -> FleetResult<Self> {
        if let Some(target) = target {
            if !self.agents.contains_key(target) {
                return Err(FleetError::AgentNotFound(target.to_string()));
            }
            self.agents.retain(|name, _| name == target);
        }
        Ok(self)
    }

    /// 把清单分成可操作的 agent 和缺少 ssh_host 的 agent 名
    pub fn partition(&self) -> (Vec<ActionableAgent<'_>>, Vec<&str>) {
        let mut actionable = Vec::new();
        let mut missing = Vec::new();

        for (name, entry) in &self.agents {
            match entry.ssh_host() {
                Some(ssh_host) => actionable.push(ActionableAgent {
                    name,
                    ssh_host,
                    public_url: entry.public_url(),
                }),
                None => missing.push(name.as_str()),
            }
        }

        (actionable, missing)
    }
}

/// 清单客户端：按固定顺序尝试各个来源
pub struct RegistryClient {
    sources: Vec<Box<dyn RegistrySource>>,
    redactor: Redactor,
}

impl RegistryClient {
    pub fn new(sources: Vec<Box<dyn RegistrySource>>, redactor: Redactor) -> Self {
        Self { sources, redactor }
    }

    /// 按配置创建：有 GitHub 令牌和仓库时先走内容 API，再回退到直接地址
    pub fn from_config(config: &Config, redactor: Redactor) -> Self {
        let mut sources: Vec<Box<dyn RegistrySource>> = Vec::new();

        if let (Some(token), Some(repo)) = (&config.github_token, &config.registry.repo) {
            sources.push(Box::new(GitHubContents::new(
                repo,
                &config.registry.path,
                config.registry.git_ref.as_deref(),
                token,
            )));
        }
        if let Some(url) = &config.registry.url {
            sources.push(Box::new(DirectUrl::new(url)));
        }

        Self::new(sources, redactor)
    }

    /// 获取清单
    ///
    /// 所有来源都失败时发送一条告警并返回 `None`，调用方应直接结束本次调用，
    /// 不再对任何 agent 执行操作。
    pub fn fetch_registry(&self, notifier: &dyn Notifier) -> Option<Registry> {
        match self.try_sources() {
            Ok(registry) => Some(registry),
            Err(e) => {
                let msg = format!(
                    "❌ **Fleet Alert**\nFailed to fetch `agents.json`: {}",
                    self.redactor.redact(&e.to_string())
                );
                warn!("{}", msg);
                notifier.notify(&msg);
                None
            }
        }
    }

    fn try_sources(&self) -> FleetResult<Registry> {
        if self.sources.is_empty() {
            return Err(FleetError::ConfigurationMissing(
                "未配置清单来源 (AGENTS_REPO + GITHUB_TOKEN 或 AGENTS_JSON_URL)".to_string(),
            ));
        }

        let mut last_error = None;
        for source in &self.sources {
            info!("从 {} 获取 agent 清单...", self.redactor.redact(&source.describe()));
            match source.fetch().and_then(|text| Registry::parse(&text)) {
                Ok(registry) => {
                    info!("清单包含 {} 个 agent", registry.len());
                    return Ok(registry);
                }
                Err(e) => {
                    warn!(
                        "清单来源 {} 失败: {}",
                        self.redactor.redact(&source.describe()),
                        self.redactor.redact(&e.to_string())
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| FleetError::RegistryFailure("没有可用的清单来源".to_string())))
    }
}
