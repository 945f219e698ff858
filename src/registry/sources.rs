//! 清单来源
//!
//! - GitHub 内容 API：返回 base64 编码的文件内容
//! - 直接地址：返回原始 JSON

use base64::Engine;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::error::{FleetError, FleetResult};

const GITHUB_API: &str = "https://api.github.com";
const CLIENT_UA: &str = concat!("fleetctl/", env!("CARGO_PKG_VERSION"));

/// 一种获取清单原文的方式
pub trait RegistrySource {
    /// 用于日志的描述，可能包含需要脱敏的地址
    fn describe(&self) -> String;

    /// 返回清单 JSON 原文
    fn fetch(&self) -> FleetResult<String>;
}

fn http_client() -> FleetResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| FleetError::RegistryFailure(format!("创建 HTTP 客户端失败: {}", e)))
}

fn transport_error(e: reqwest::Error) -> FleetError {
    FleetError::RegistryFailure(e.without_url().to_string())
}

/// GitHub 内容 API 响应
#[derive(Debug, Deserialize)]
struct ContentsResponse {
    content: String,
    #[serde(default)]
    encoding: Option<String>,
}

/// 解码内容 API 响应中的文件正文
pub(crate) fn decode_contents(body: &str) -> FleetResult<String> {
    let resp: ContentsResponse = serde_json::from_str(body)
        .map_err(|e| FleetError::RegistryFailure(format!("内容 API 响应格式错误: {}", e)))?;

    if let Some(enc) = resp.encoding.as_deref() {
        if enc != "base64" {
            return Err(FleetError::RegistryFailure(format!("不支持的编码: {}", enc)));
        }
    }

    // GitHub 每 60 个字符插入一个换行
    let compact: String = resp.content.split_whitespace().collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| FleetError::RegistryFailure(format!("base64 解码失败: {}", e)))?;

    String::from_utf8(bytes)
        .map_err(|e| FleetError::RegistryFailure(format!("清单不是 UTF-8: {}", e)))
}

/// 通过 GitHub 内容 API 读取仓库中的清单文件
pub struct GitHubContents {
    url: String,
    token: String,
}

impl GitHubContents {
    pub fn new(repo: &str, path: &str, git_ref: Option<&str>, token: &str) -> Self {
        let mut url = format!(
            "{}/repos/{}/contents/{}",
            GITHUB_API,
            repo,
            path.trim_start_matches('/')
        );
        if let Some(r) = git_ref {
            url.push_str("?ref=");
            url.extend(url::form_urlencoded::byte_serialize(r.as_bytes()));
        }

        Self {
            url,
            token: token.to_string(),
        }
    }
}

impl RegistrySource for GitHubContents {
    fn describe(&self) -> String {
        self.url.clone()
    }

    fn fetch(&self) -> FleetResult<String> {
        debug!("GET {}", self.url);
        let resp = http_client()?
            .get(&self.url)
            .header(AUTHORIZATION, format!("token {}", self.token))
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, CLIENT_UA)
            .send()
            .map_err(transport_error)?
            .error_for_status()
            .map_err(transport_error)?;

        let body = resp.text().map_err(transport_error)?;
        decode_contents(&body)
    }
}

/// 直接从地址下载清单
pub struct DirectUrl {
    url: String,
}

impl DirectUrl {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
        }
    }
}

impl RegistrySource for DirectUrl {
    fn describe(&self) -> String {
        self.url.clone()
    }

    fn fetch(&self) -> FleetResult<String> {
        let resp = http_client()?
            .get(&self.url)
            .header(USER_AGENT, CLIENT_UA)
            .send()
            .map_err(transport_error)?
            .error_for_status()
            .map_err(transport_error)?;

        resp.text().map_err(transport_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_contents_with_line_breaks() {
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(r#"{"agents": {"a1": {"ssh_host": "h1"}}}"#);
        let (head, tail) = encoded.split_at(10);
        let body = format!(
            r#"{{"content": "{}\n{}\n", "encoding": "base64"}}"#,
            head, tail
        );

        let text = decode_contents(&body).unwrap();
        assert!(text.contains("\"h1\""));
    }

    #[test]
    fn test_decode_contents_rejects_garbage() {
        assert!(decode_contents(r#"{"content": "!!!", "encoding": "base64"}"#).is_err());
        assert!(decode_contents(r#"{"content": "", "encoding": "utf-8"}"#).is_err());
        assert!(decode_contents(r#"{"message": "Not Found"}"#).is_err());
    }

    #[test]
    fn test_contents_url() {
        let src = GitHubContents::new("ops/fleet", "/data/agents.json", Some("main"), "t");
        assert_eq!(
            src.describe(),
            "https://api.github.com/repos/ops/fleet/contents/data/agents.json?ref=main"
        );

        let src = GitHubContents::new("ops/fleet", "agents.json", Some("release/v1 rc"), "t");
        assert!(src.describe().ends_with("?ref=release%2Fv1+rc"));
    }
}
