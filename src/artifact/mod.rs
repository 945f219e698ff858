//! 制品下载
//!
//! 从 GitHub Release 获取 agent 二进制。本地已存在的文件被视为缓存，不重新校验。

mod github;

pub use github::GitHubReleases;

use std::path::{Path, PathBuf};

use crate::error::FleetResult;

/// 要下载的版本
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactVersion {
    Latest,
    Tag(String),
}

impl ArtifactVersion {
    pub fn from_option(tag: Option<&str>) -> Self {
        match tag {
            Some(t) if !t.is_empty() => ArtifactVersion::Tag(t.to_string()),
            _ => ArtifactVersion::Latest,
        }
    }
}

impl std::fmt::Display for ArtifactVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactVersion::Latest => f.write_str("latest"),
            ArtifactVersion::Tag(t) => f.write_str(t),
        }
    }
}

/// 制品获取
pub trait ArtifactFetcher {
    /// 最新发布的 tag
    fn latest_tag(&self) -> FleetResult<String>;

    /// 下载二进制到 `dest` 并设为可执行；`dest` 已存在时直接返回
    fn fetch_binary(&self, version: &ArtifactVersion, dest: &Path) -> FleetResult<PathBuf>;
}
