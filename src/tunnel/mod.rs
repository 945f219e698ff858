//! 隧道 ID 解析
//!
//! agent 主机名在 DNS 中是一条指向 `<tunnel-id>.cfargotunnel.com` 的 CNAME。
//! 不同域名归属不同的 Cloudflare 账号，按域名后缀选择凭据。

mod cloudflare;

pub use cloudflare::CloudflareDns;

use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use crate::config::{CloudflareConfig, CredentialContext};
use crate::error::FleetResult;
use crate::redact::Redactor;

/// DNS 提供方
pub trait DnsProvider {
    /// 查询名为 `name` 的 CNAME 记录，返回第一条记录的目标
    fn cname_target(&self, credentials: &CredentialContext, name: &str) -> FleetResult<Option<String>>;
}

/// 隧道 ID 查询，`None` 是统一的失败信号
pub trait TunnelLookup {
    fn resolve_tunnel_id(&self, hostname: &str) -> Option<String>;
}

static TUNNEL_TARGET_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^([a-f0-9-]+)\.cfargotunnel\.com\.?$").expect("valid regex")
});

/// 从 CNAME 目标中提取隧道 ID
pub fn extract_tunnel_id(target: &str) -> Option<String> {
    TUNNEL_TARGET_RE
        .captures(target.trim())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// 按后缀选择凭据，未匹配时使用默认凭据
///
/// 匹配要求落在标签边界上：`a.555606.xyz` 匹配 `555606.xyz`，`x555606.xyz` 不匹配。
pub fn select_credentials<'a>(config: &'a CloudflareConfig, hostname: &str) -> &'a CredentialContext {
    let host = hostname.trim_end_matches('.').to_ascii_lowercase();

    config
        .domains
        .iter()
        .find(|rule| {
            let suffix = rule.suffix.trim_start_matches('.').to_ascii_lowercase();
            host == suffix || host.ends_with(&format!(".{}", suffix))
        })
        .map(|rule| &rule.credentials)
        .unwrap_or(&config.default)
}

/// 组合凭据选择、DNS 查询和 ID 提取
pub struct TunnelResolver<D> {
    config: CloudflareConfig,
    dns: D,
    redactor: Redactor,
}

impl<D: DnsProvider> TunnelResolver<D> {
    pub fn new(config: CloudflareConfig, dns: D, redactor: Redactor) -> Self {
        Self {
            config,
            dns,
            redactor,
        }
    }
}

impl<D: DnsProvider> TunnelLookup for TunnelResolver<D> {
    fn resolve_tunnel_id(&self, hostname: &str) -> Option<String> {
        let credentials = select_credentials(&self.config, hostname);

        if let Some(field) = credentials.missing_field() {
            warn!("Cloudflare 凭据缺少 {}，无法自动解析 {} 的隧道 ID", field, hostname);
            return None;
        }

        let target = match self.dns.cname_target(credentials, hostname) {
            Ok(Some(target)) => target,
            Ok(None) => {
                warn!("{} 没有 CNAME 记录", hostname);
                return None;
            }
            Err(e) => {
                warn!(
                    "解析 {} 的隧道 ID 失败: {}",
                    hostname,
                    self.redactor.redact(&e.to_string())
                );
                return None;
            }
        };

        debug!("{} CNAME -> {}", hostname, target);
        match extract_tunnel_id(&target) {
            Some(id) => {
                info!("{} 的隧道 ID: {}", hostname, id);
                Some(id)
            }
            None => {
                warn!("CNAME 目标不是 Cloudflare 隧道: {}", target);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DomainRule;
    use crate::error::FleetError;
    use std::cell::RefCell;

    fn complete(tag: &str) -> CredentialContext {
        CredentialContext {
            email: Some(format!("{}@example.com", tag)),
            api_key: Some(format!("key-{}", tag)),
            zone_id: Some(format!("zone-{}", tag)),
        }
    }

    fn cloudflare(secondary: CredentialContext) -> CloudflareConfig {
        CloudflareConfig {
            default: complete("a"),
            domains: vec![DomainRule {
                suffix: "555606.xyz".to_string(),
                credentials: secondary,
                env_suffix: Some("B".to_string()),
            }],
        }
    }

    /// 记录每次查询用到的 zone
    struct RecordingDns {
        answer: FleetResult<Option<String>>,
        zones: RefCell<Vec<String>>,
    }

    impl RecordingDns {
        fn answering(target: &str) -> Self {
            Self {
                answer: Ok(Some(target.to_string())),
                zones: RefCell::new(Vec::new()),
            }
        }
    }

    impl DnsProvider for &RecordingDns {
        fn cname_target(&self, credentials: &CredentialContext, _name: &str) -> FleetResult<Option<String>> {
            self.zones
                .borrow_mut()
                .push(credentials.zone_id.clone().unwrap_or_default());
            match &self.answer {
                Ok(v) => Ok(v.clone()),
                Err(e) => Err(FleetError::ResolutionFailure(e.to_string())),
            }
        }
    }

    #[test]
    fn test_extract_tunnel_id() {
        assert_eq!(
            extract_tunnel_id("abcd1234-5678-90ef.cfargotunnel.com"),
            Some("abcd1234-5678-90ef".to_string())
        );
        assert_eq!(
            extract_tunnel_id("abcd1234.cfargotunnel.com."),
            Some("abcd1234".to_string())
        );
        assert_eq!(
            extract_tunnel_id(" abcd1234.cfargotunnel.com\n"),
            Some("abcd1234".to_string())
        );
        assert_eq!(extract_tunnel_id("example.com"), None);
        assert_eq!(extract_tunnel_id("ABCD.cfargotunnel.com"), None);
        assert_eq!(extract_tunnel_id("abcd.cfargotunnel.com.evil.net"), None);
    }

    #[test]
    fn test_select_credentials_by_suffix() {
        let config = cloudflare(complete("b"));
        assert_eq!(select_credentials(&config, "m-1.555606.xyz").zone_id.as_deref(), Some("zone-b"));
        assert_eq!(select_credentials(&config, "555606.xyz").zone_id.as_deref(), Some("zone-b"));
        assert_eq!(select_credentials(&config, "x555606.xyz").zone_id.as_deref(), Some("zone-a"));
        assert_eq!(select_credentials(&config, "h1.example.com").zone_id.as_deref(), Some("zone-a"));
    }

    #[test]
    fn test_secondary_domain_never_falls_back_to_default() {
        let incomplete = CredentialContext {
            email: Some("b@example.com".to_string()),
            ..CredentialContext::default()
        };
        let dns = RecordingDns::answering("abcd.cfargotunnel.com");
        let resolver = TunnelResolver::new(cloudflare(incomplete), &dns, Redactor::default());

        assert_eq!(resolver.resolve_tunnel_id("m-1.555606.xyz"), None);
        assert!(dns.zones.borrow().is_empty());
    }

    #[test]
    fn test_resolves_with_selected_zone() {
        let dns = RecordingDns::answering("abcd1234-ef.cfargotunnel.com");
        let resolver = TunnelResolver::new(cloudflare(complete("b")), &dns, Redactor::default());

        assert_eq!(resolver.resolve_tunnel_id("m-1.555606.xyz").as_deref(), Some("abcd1234-ef"));
        assert_eq!(resolver.resolve_tunnel_id("h1.example.com").as_deref(), Some("abcd1234-ef"));
        assert_eq!(*dns.zones.borrow(), vec!["zone-b".to_string(), "zone-a".to_string()]);
    }

    #[test]
    fn test_transport_error_resolves_to_none() {
        let dns = RecordingDns {
            answer: Err(FleetError::ResolutionFailure("HTTP 500".to_string())),
            zones: RefCell::new(Vec::new()),
        };
        let resolver = TunnelResolver::new(cloudflare(complete("b")), &dns, Redactor::default());
        assert_eq!(resolver.resolve_tunnel_id("h1.example.com"), None);
    }

    #[test]
    fn test_non_tunnel_target_resolves_to_none() {
        let dns = RecordingDns::answering("lb.example.net");
        let resolver = TunnelResolver::new(cloudflare(complete("b")), &dns, Redactor::default());
        assert_eq!(resolver.resolve_tunnel_id("h1.example.com"), None);
    }
}
