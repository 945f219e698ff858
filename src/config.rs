//! 配置管理模块
//!
//! 启动时构造一次，之后以只读引用传入各组件。组件不直接读取环境变量。

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use zeroize::Zeroize;

use crate::error::{FleetError, FleetResult};

/// 内核记录的进程名 (`/proc/<pid>/comm`) 最长 15 字节，`pgrep -x` / `pkill -x` 只比较这部分
pub const MAX_PROCESS_NAME_LEN: usize = 15;

/// 应用程序配置
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub ssh: SshSettings,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub release: ReleaseConfig,
    #[serde(default)]
    pub cloudflare: CloudflareConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// GitHub 令牌：用于清单内容 API、Release 下载，并写入 agent 的环境文件
    #[serde(default, skip_serializing)]
    pub github_token: Option<String>,
}

/// Agent 清单来源
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    /// 托管清单文件的仓库 (owner/name)，需要配合 GitHub 令牌使用
    #[serde(default)]
    pub repo: Option<String>,
    /// 仓库内的文件路径
    #[serde(default = "default_registry_path")]
    pub path: String,
    /// 分支或提交
    #[serde(default)]
    pub git_ref: Option<String>,
    /// 直接下载地址 (可能在查询参数中带 token)
    #[serde(default)]
    pub url: Option<String>,
}

/// SSH 连接参数，所有主机共用同一组凭据
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SshSettings {
    #[serde(default = "default_ssh_user")]
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: Option<SecureString>,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// 建立连接的超时 (秒)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

/// 远程 agent 进程与本地暂存文件的布局
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentSettings {
    /// 进程名，同时也是二进制文件名
    #[serde(default = "default_process_name")]
    pub process_name: String,
    /// 远程工作目录，相对于用户主目录
    #[serde(default = "default_remote_dir")]
    pub remote_dir: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,
    #[serde(default = "default_env_file")]
    pub env_file: String,
    #[serde(default = "default_worker_url")]
    pub worker_url: String,
    /// 本地模板目录 (可选上传)
    #[serde(default = "default_templates_dir")]
    pub templates_dir: PathBuf,
    /// 本地暂存目录：二进制和渲染后的环境文件
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
}

/// 制品下载方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadMode {
    /// 按 `<tag>/<asset>` 约定拼接下载地址
    #[default]
    Tag,
    /// 在 Release 资源列表中按名称精确查找
    Asset,
}

/// 发布仓库配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReleaseConfig {
    #[serde(default = "default_release_repo")]
    pub repo: String,
    #[serde(default = "default_asset_name")]
    pub asset_name: String,
    #[serde(default)]
    pub mode: DownloadMode,
    /// 固定部署的版本 tag，未设置时部署最新版本；命令行 `--release` 优先
    #[serde(default)]
    pub version: Option<String>,
}

/// Cloudflare 凭据
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct CredentialContext {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub zone_id: Option<String>,
}

impl CredentialContext {
    /// 返回第一个缺失的字段名
    pub fn missing_field(&self) -> Option<&'static str> {
        let blank = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());
        if blank(&self.email) {
            Some("email")
        } else if blank(&self.api_key) {
            Some("api_key")
        } else if blank(&self.zone_id) {
            Some("zone_id")
        } else {
            None
        }
    }

    pub fn is_complete(&self) -> bool {
        self.missing_field().is_none()
    }
}

/// 域名后缀 → 凭据 的映射规则
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DomainRule {
    pub suffix: String,
    #[serde(flatten)]
    pub credentials: CredentialContext,
    /// 环境变量后缀，例如 `B` 对应 `CF_API_EMAIL_B`
    #[serde(default)]
    pub env_suffix: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CloudflareConfig {
    /// 未匹配任何规则时使用的凭据
    #[serde(default)]
    pub default: CredentialContext,
    #[serde(default = "default_domain_rules")]
    pub domains: Vec<DomainRule>,
}

/// Telegram 通知配置
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NotifyConfig {
    #[serde(default, skip_serializing)]
    pub telegram_bot_token: Option<String>,
    #[serde(default)]
    pub telegram_chat_id: Option<String>,
}

/// 日志配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// 日志级别: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// 安全字符串包装，在 Drop 时自动清除内存
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct SecureString(String);

impl SecureString {
    pub fn new(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Drop for SecureString {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl From<String> for SecureString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl std::fmt::Debug for SecureString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecureString(***)")
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            repo: None,
            path: default_registry_path(),
            git_ref: None,
            url: None,
        }
    }
}

impl Default for SshSettings {
    fn default() -> Self {
        SshSettings {
            username: default_ssh_user(),
            password: None,
            port: default_ssh_port(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        AgentSettings {
            process_name: default_process_name(),
            remote_dir: default_remote_dir(),
            log_file: default_log_file(),
            env_file: default_env_file(),
            worker_url: default_worker_url(),
            templates_dir: default_templates_dir(),
            staging_dir: default_staging_dir(),
        }
    }
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        ReleaseConfig {
            repo: default_release_repo(),
            asset_name: default_asset_name(),
            mode: DownloadMode::default(),
            version: None,
        }
    }
}

impl Default for CloudflareConfig {
    fn default() -> Self {
        CloudflareConfig {
            default: CredentialContext::default(),
            domains: default_domain_rules(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}

fn default_registry_path() -> String {
    "agents.json".to_string()
}

fn default_ssh_user() -> String {
    "sw".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_process_name() -> String {
    "gravity-agent".to_string()
}

fn default_remote_dir() -> String {
    "gravity-agent".to_string()
}

fn default_log_file() -> String {
    "agent.log".to_string()
}

fn default_env_file() -> String {
    ".env".to_string()
}

fn default_worker_url() -> String {
    "https://gravity-bridge-worker.58.workers.dev".to_string()
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from("templates")
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_release_repo() -> String {
    "suwei8/GravityBridge-Go".to_string()
}

fn default_asset_name() -> String {
    "gravity-agent-linux-arm64".to_string()
}

fn default_domain_rules() -> Vec<DomainRule> {
    vec![DomainRule {
        suffix: "555606.xyz".to_string(),
        credentials: CredentialContext::default(),
        env_suffix: Some("B".to_string()),
    }]
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AgentSettings {
    /// 远程二进制路径 (相对主目录)
    pub fn remote_binary(&self) -> String {
        format!("{}/{}", self.remote_dir, self.process_name)
    }

    pub fn remote_log(&self) -> String {
        format!("{}/{}", self.remote_dir, self.log_file)
    }

    /// 上传新二进制时使用的临时路径，上传完成后改名覆盖 [`Self::remote_binary`]
    pub fn remote_binary_upload(&self) -> String {
        format!("{}.new", self.remote_binary())
    }

    pub fn remote_env(&self) -> String {
        format!("{}/{}", self.remote_dir, self.env_file)
    }

    /// 本地暂存的二进制
    pub fn staged_binary(&self) -> PathBuf {
        self.staging_dir.join(&self.process_name)
    }

    /// 本地渲染的环境文件
    pub fn staged_env(&self) -> PathBuf {
        self.staging_dir.join(".env.tmp")
    }
}

impl Config {
    /// 从文件加载配置
    ///
    /// 如果文件不存在，返回默认配置
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("配置文件解析失败 {:?}: {}", path, e))?;

        Ok(config)
    }

    /// 获取配置文件路径
    ///
    /// 优先级: 命令行指定 > 当前目录 > 用户配置目录
    pub fn get_config_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }

        let local = PathBuf::from("fleetctl.toml");
        if local.exists() {
            return local;
        }

        if let Some(dir) = dirs::config_dir() {
            let candidate = dir.join("fleetctl").join("config.toml");
            if candidate.exists() {
                return candidate;
            }
        }

        local
    }

    /// 用环境变量覆盖密钥和地址
    ///
    /// `lookup` 通常是 `|k| std::env::var(k).ok()`，测试中可以替换为固定映射。
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("AGENTS_JSON_URL") {
            self.registry.url = Some(v);
        }
        if let Some(v) = get("AGENTS_REPO") {
            self.registry.repo = Some(v);
        }
        if let Some(v) = get("AGENTS_PATH") {
            self.registry.path = v;
        }
        if let Some(v) = get("SSH_USERNAME") {
            self.ssh.username = v;
        }
        if let Some(v) = get("SSH_PASSWORD") {
            self.ssh.password = Some(SecureString::new(v));
        }
        if let Some(v) = get("GITHUB_TOKEN") {
            self.github_token = Some(v);
        }
        if let Some(v) = get("TELEGRAM_BOT_TOKEN") {
            self.notify.telegram_bot_token = Some(v);
        }
        if let Some(v) = get("TELEGRAM_CHAT_ID") {
            self.notify.telegram_chat_id = Some(v);
        }

        overlay_credentials(&mut self.cloudflare.default, "", &get);
        for rule in &mut self.cloudflare.domains {
            if let Some(suffix) = rule.env_suffix.clone() {
                overlay_credentials(&mut rule.credentials, &format!("_{}", suffix), &get);
            }
        }
    }

    /// 检查无法在运行时补救的配置项
    pub fn validate(&self) -> FleetResult<()> {
        let name = &self.agent.process_name;
        if name.is_empty() || name.contains('/') {
            return Err(FleetError::InvalidField {
                key: "agent.process_name".to_string(),
                reason: "必须是非空的文件名".to_string(),
            });
        }
        if name.len() > MAX_PROCESS_NAME_LEN {
            return Err(FleetError::InvalidField {
                key: "agent.process_name".to_string(),
                reason: format!(
                    "长度 {} 超过 {} 字节，按精确进程名匹配将永远失败",
                    name.len(),
                    MAX_PROCESS_NAME_LEN
                ),
            });
        }
        Ok(())
    }

    /// 需要从日志和通知中抹去的所有密钥
    pub fn secrets(&self) -> Vec<String> {
        let mut secrets = Vec::new();
        if let Some(p) = &self.ssh.password {
            secrets.push(p.as_str().to_string());
        }
        secrets.extend(self.github_token.clone());
        secrets.extend(self.notify.telegram_bot_token.clone());
        secrets.extend(self.cloudflare.default.api_key.clone());
        for rule in &self.cloudflare.domains {
            secrets.extend(rule.credentials.api_key.clone());
        }
        secrets
    }
}

fn overlay_credentials<F>(ctx: &mut CredentialContext, suffix: &str, get: &F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = get(&format!("CF_API_EMAIL{}", suffix)) {
        ctx.email = Some(v);
    }
    if let Some(v) = get(&format!("CF_API_KEY{}", suffix)) {
        ctx.api_key = Some(v);
    }
    if let Some(v) = get(&format!("CF_ZONE_ID{}", suffix)) {
        ctx.zone_id = Some(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.ssh.username, "sw");
        assert_eq!(config.ssh.connect_timeout_secs, 10);
        assert_eq!(config.agent.process_name, "gravity-agent");
        assert_eq!(config.agent.remote_binary(), "gravity-agent/gravity-agent");
        assert_eq!(config.cloudflare.domains.len(), 1);
        assert_eq!(config.cloudflare.domains[0].suffix, "555606.xyz");
    }

    #[test]
    fn test_env_overlay() {
        let vars = env(&[
            ("SSH_PASSWORD", "pw"),
            ("CF_API_EMAIL", "a@example.com"),
            ("CF_API_KEY", "k1"),
            ("CF_ZONE_ID", "z1"),
            ("CF_API_EMAIL_B", "b@example.com"),
            ("GITHUB_TOKEN", ""),
        ]);
        let mut config = Config::default();
        config.apply_env(|k| vars.get(k).cloned());

        assert_eq!(config.ssh.password.as_ref().map(|p| p.as_str()), Some("pw"));
        assert!(config.cloudflare.default.is_complete());
        let secondary = &config.cloudflare.domains[0].credentials;
        assert_eq!(secondary.email.as_deref(), Some("b@example.com"));
        assert_eq!(secondary.missing_field(), Some("api_key"));
        // 空值视为未配置
        assert!(config.github_token.is_none());
    }

    #[test]
    fn test_parse_toml() {
        let text = r#"
            [registry]
            repo = "ops/fleet"

            [release]
            mode = "asset"
            version = "v1.4.2"

            [[cloudflare.domains]]
            suffix = "example.org"
            email = "ops@example.org"
            api_key = "key"
            zone_id = "zone"
        "#;
        let config: Config = toml::from_str(text).unwrap();
        assert_eq!(config.registry.repo.as_deref(), Some("ops/fleet"));
        assert_eq!(config.registry.path, "agents.json");
        assert_eq!(config.release.mode, DownloadMode::Asset);
        assert_eq!(config.release.version.as_deref(), Some("v1.4.2"));
        assert_eq!(Config::default().release.version, None);
        assert!(config.cloudflare.domains[0].credentials.is_complete());
    }

    #[test]
    fn test_validate_process_name() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.agent.process_name = "gravity-agent-v2".to_string();
        match config.validate() {
            Err(FleetError::InvalidField { key, .. }) => assert_eq!(key, "agent.process_name"),
            other => panic!("unexpected: {:?}", other),
        }

        config.agent.process_name = "a".repeat(MAX_PROCESS_NAME_LEN);
        assert!(config.validate().is_ok());

        config.agent.process_name = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_secure_string_debug_hides_value() {
        let s = SecureString::new("secret".to_string());
        assert_eq!(s.as_str(), "secret");
        assert!(!format!("{:?}", s).contains("secret"));
    }
}
