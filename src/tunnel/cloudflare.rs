//! Cloudflare DNS 查询
//!
//! 使用 v4 REST API，以 `X-Auth-Email` / `X-Auth-Key` 认证

use reqwest::blocking::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::DnsProvider;
use crate::config::CredentialContext;
use crate::error::{FleetError, FleetResult};

const CLOUDFLARE_API: &str = "https://api.cloudflare.com/client/v4";

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiError>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i32,
    message: String,
}

#[derive(Debug, Deserialize)]
struct DnsRecord {
    content: String,
}

/// 解析 dns_records 列表响应，返回第一条记录的内容
pub(crate) fn first_record_content(body: &str) -> FleetResult<Option<String>> {
    let response: ApiResponse<Vec<DnsRecord>> = serde_json::from_str(body)
        .map_err(|e| FleetError::ResolutionFailure(format!("Cloudflare 响应格式错误: {}", e)))?;

    if !response.success {
        let errors: Vec<String> = response
            .errors
            .iter()
            .map(|e| format!("{} ({})", e.message, e.code))
            .collect();
        return Err(FleetError::ResolutionFailure(format!(
            "Cloudflare API 错误: {}",
            errors.join(", ")
        )));
    }

    Ok(response
        .result
        .unwrap_or_default()
        .into_iter()
        .next()
        .map(|r| r.content))
}

/// Cloudflare DNS 客户端
pub struct CloudflareDns {
    client: Client,
    base_url: String,
}

impl CloudflareDns {
    pub fn new() -> FleetResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| FleetError::ResolutionFailure(format!("创建 HTTP 客户端失败: {}", e)))?;

        Ok(Self {
            client,
            base_url: CLOUDFLARE_API.to_string(),
        })
    }
}

impl DnsProvider for CloudflareDns {
    fn cname_target(&self, credentials: &CredentialContext, name: &str) -> FleetResult<Option<String>> {
        let (Some(email), Some(key), Some(zone)) = (
            credentials.email.as_deref(),
            credentials.api_key.as_deref(),
            credentials.zone_id.as_deref(),
        ) else {
            return Err(FleetError::ConfigurationMissing("Cloudflare 凭据不完整".to_string()));
        };

        let url = format!("{}/zones/{}/dns_records", self.base_url, zone);
        debug!("查询 CNAME: {} (zone {})", name, zone);

        let resp = self
            .client
            .get(&url)
            .query(&[("name", name), ("type", "CNAME")])
            .header("X-Auth-Email", email)
            .header("X-Auth-Key", key)
            .header("Content-Type", "application/json")
            .send()
            .map_err(|e| FleetError::ResolutionFailure(e.without_url().to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .map_err(|e| FleetError::ResolutionFailure(e.without_url().to_string()))?;

        if !status.is_success() {
            return Err(FleetError::ResolutionFailure(format!("HTTP {}", status)));
        }

        first_record_content(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_record_content() {
        let body = r#"{"success": true, "errors": [], "result": [
            {"id": "1", "type": "CNAME", "name": "h1", "content": "abcd.cfargotunnel.com"},
            {"id": "2", "type": "CNAME", "name": "h1", "content": "other.cfargotunnel.com"}
        ]}"#;
        assert_eq!(
            first_record_content(body).unwrap().as_deref(),
            Some("abcd.cfargotunnel.com")
        );
    }

    #[test]
    fn test_empty_result() {
        let body = r#"{"success": true, "errors": [], "result": []}"#;
        assert_eq!(first_record_content(body).unwrap(), None);
    }

    #[test]
    fn test_api_error() {
        let body = r#"{"success": false, "errors": [{"code": 10000, "message": "Authentication error"}], "result": null}"#;
        let err = first_record_content(body).unwrap_err();
        assert!(err.to_string().contains("Authentication error"));
    }
}
