//! GitHub Release 下载

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::{ArtifactFetcher, ArtifactVersion};
use crate::config::{DownloadMode, ReleaseConfig};
use crate::error::{FleetError, FleetResult};

const GITHUB_API: &str = "https://api.github.com";
const GITHUB_WEB: &str = "https://github.com";
const CLIENT_UA: &str = concat!("fleetctl/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Deserialize)]
struct ReleaseAsset {
    name: String,
    /// API 地址，配合 `Accept: application/octet-stream` 返回文件内容
    url: String,
}

/// 在资源列表中按名称精确查找
fn find_asset<'a>(release: &'a Release, name: &str) -> Option<&'a ReleaseAsset> {
    release.assets.iter().find(|a| a.name == name)
}

fn artifact_error(e: reqwest::Error) -> FleetError {
    FleetError::ArtifactFailure(e.without_url().to_string())
}

/// GitHub Release 制品源
pub struct GitHubReleases {
    client: Client,
    config: ReleaseConfig,
    token: Option<String>,
}

impl GitHubReleases {
    pub fn new(config: ReleaseConfig, token: Option<String>) -> FleetResult<Self> {
        // 下载可能较慢，只限制连接时间
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(None)
            .build()
            .map_err(|e| FleetError::ArtifactFailure(format!("创建 HTTP 客户端失败: {}", e)))?;

        Ok(Self {
            client,
            config,
            token,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header(USER_AGENT, CLIENT_UA);
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("token {}", token)),
            None => request,
        }
    }

    fn release(&self, version: &ArtifactVersion) -> FleetResult<Release> {
        let url = match version {
            ArtifactVersion::Latest => {
                format!("{}/repos/{}/releases/latest", GITHUB_API, self.config.repo)
            }
            ArtifactVersion::Tag(tag) => {
                format!("{}/repos/{}/releases/tags/{}", GITHUB_API, self.config.repo, tag)
            }
        };
        debug!("GET {}", url);

        let resp = self
            .authorized(self.client.get(&url))
            .header(ACCEPT, "application/vnd.github+json")
            .send()
            .map_err(artifact_error)?;

        if !resp.status().is_success() {
            return Err(FleetError::ArtifactFailure(format!(
                "查询 Release {} 失败: HTTP {}",
                version,
                resp.status()
            )));
        }

        resp.json().map_err(artifact_error)
    }

    fn download_response(&self, version: &ArtifactVersion) -> FleetResult<Response> {
        let release = self.release(version)?;
        info!("Release 版本: {}", release.tag_name);

        let request = match self.config.mode {
            DownloadMode::Tag => {
                let url = format!(
                    "{}/{}/releases/download/{}/{}",
                    GITHUB_WEB, self.config.repo, release.tag_name, self.config.asset_name
                );
                info!("下载 {}", url);
                self.authorized(self.client.get(url))
            }
            DownloadMode::Asset => {
                let asset = find_asset(&release, &self.config.asset_name).ok_or_else(|| {
                    FleetError::ArtifactFailure(format!(
                        "Release {} 中没有资源 {}",
                        release.tag_name, self.config.asset_name
                    ))
                })?;
                info!("下载资源 {}", asset.name);
                self.authorized(self.client.get(&asset.url))
                    .header(ACCEPT, "application/octet-stream")
            }
        };

        let resp = request.send().map_err(artifact_error)?;
        if !resp.status().is_success() {
            return Err(FleetError::ArtifactFailure(format!(
                "下载二进制失败: HTTP {}",
                resp.status()
            )));
        }
        Ok(resp)
    }
}

impl ArtifactFetcher for GitHubReleases {
    fn latest_tag(&self) -> FleetResult<String> {
        Ok(self.release(&ArtifactVersion::Latest)?.tag_name)
    }

    fn fetch_binary(&self, version: &ArtifactVersion, dest: &Path) -> FleetResult<PathBuf> {
        if dest.exists() {
            debug!("{} 已存在，跳过下载", dest.display());
            return Ok(dest.to_path_buf());
        }

        let mut resp = self.download_response(version)?;
        let digest = stream_to_file(&mut resp, dest)?;
        info!("二进制已保存: {} (sha256 {})", dest.display(), digest);

        Ok(dest.to_path_buf())
    }
}

/// 写入同目录下的临时文件，完整写完后原子改名，返回 SHA-256
///
/// 中途失败时临时文件随 drop 删除，`dest` 不会出现半截文件。
pub(crate) fn stream_to_file<R: Read>(reader: &mut R, dest: &Path) -> FleetResult<String> {
    let dir = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;

    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| FleetError::ArtifactFailure(format!("下载中断: {}", e)))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        tmp.write_all(&buf[..n])?;
        total += n as u64;
    }

    if total == 0 {
        return Err(FleetError::ArtifactFailure("下载内容为空".to_string()));
    }

    tmp.as_file().sync_all()?;
    set_executable(tmp.path())?;
    tmp.persist(dest).map_err(|e| FleetError::Io(e.error))?;

    debug!("写入 {} 字节", total);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(unix)]
fn set_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
