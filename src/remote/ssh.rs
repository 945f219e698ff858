//! SSH 连接管理
//!
//! 提供 SSH 连接、命令执行和文件上传功能
//!
//! 不校验主机密钥，也不读取 known_hosts。

use ssh2::Session;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ExecutionResult, RemoteShell};
use crate::config::{SecureString, SshSettings};
use crate::error::{FleetError, FleetResult};

/// SSH 连接管理器
pub struct SshConnection {
    session: Session,
    host: String,
}

impl SshConnection {
    /// 建立 SSH 连接 (密码认证)
    pub fn connect(
        host: &str,
        port: u16,
        username: &str,
        password: &SecureString,
        timeout: Duration,
    ) -> FleetResult<Self> {
        info!("连接到 {}@{}:{}...", username, host, port);

        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| FleetError::unreachable(host, e))?
            .next()
            .ok_or_else(|| FleetError::unreachable(host, "无法解析主机地址"))?;

        // TCP 连接
        let tcp = TcpStream::connect_timeout(&addr, timeout)
            .map_err(|e| FleetError::unreachable(host, e))?;

        // 创建 SSH 会话
        let mut session = Session::new().map_err(|e| FleetError::unreachable(host, e))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(timeout.as_millis() as u32);
        session
            .handshake()
            .map_err(|e| FleetError::unreachable(host, e))?;

        session
            .userauth_password(username, password.as_str())
            .map_err(|e| FleetError::unreachable(host, format!("SSH 认证失败: {}", e)))?;

        if !session.authenticated() {
            return Err(FleetError::unreachable(host, "SSH 认证失败"));
        }

        // 握手完成后不再限制单次读写，长命令由传输层默认行为决定
        session.set_timeout(0);

        debug!("SSH 连接成功: {}", host);
        Ok(Self {
            session,
            host: host.to_string(),
        })
    }

    /// 执行远程命令
    pub fn exec(&self, command: &str) -> FleetResult<ExecutionResult> {
        debug!("执行命令: {}", command);
        let fail = |e: ssh2::Error| FleetError::unreachable(&self.host, e);

        let mut channel = self.session.channel_session().map_err(fail)?;
        channel.exec(command).map_err(fail)?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        channel
            .read_to_string(&mut stdout)
            .map_err(|e| FleetError::unreachable(&self.host, e))?;
        channel
            .stderr()
            .read_to_string(&mut stderr)
            .map_err(|e| FleetError::unreachable(&self.host, e))?;
        channel.wait_close().map_err(fail)?;

        let exit_code = channel.exit_status().map_err(fail)?;

        if exit_code != 0 {
            debug!("命令返回非零状态: {}", exit_code);
            if !stderr.is_empty() {
                debug!("stderr: {}", stderr.trim());
            }
        }

        Ok(ExecutionResult {
            exit_code,
            stdout,
            stderr,
        })
    }

    /// 上传文件，保留本地权限位
    pub fn upload_file(&self, local_path: &Path, remote_path: &str) -> FleetResult<()> {
        info!("上传文件: {} -> {}", local_path.display(), remote_path);

        let content = std::fs::read(local_path)?;
        self.upload_content(&content, remote_path, file_mode(local_path))
    }

    /// 递归上传目录
    pub fn upload_dir(&self, local_dir: &Path, remote_dir: &str) -> FleetResult<()> {
        info!("上传目录: {} -> {}", local_dir.display(), remote_dir);

        let created = self.exec(&format!("mkdir -p {}", shell_quote(remote_dir)))?;
        if !created.success() {
            return Err(FleetError::CommandFailed {
                code: created.exit_code,
                detail: created.stderr.trim().to_string(),
            });
        }

        for entry in std::fs::read_dir(local_dir)? {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name();
            let target = format!("{}/{}", remote_dir, name.to_string_lossy());

            if entry.file_type()?.is_dir() {
                self.upload_dir(&path, &target)?;
            } else {
                self.upload_file(&path, &target)?;
            }
        }

        Ok(())
    }

    /// 上传内容
    pub fn upload_content(&self, content: &[u8], remote_path: &str, mode: i32) -> FleetResult<()> {
        debug!("上传内容到 {} ({} 字节)", remote_path, content.len());
        let fail = |e: ssh2::Error| FleetError::unreachable(&self.host, e);

        let mut remote_file = self
            .session
            .scp_send(Path::new(remote_path), mode, content.len() as u64, None)
            .map_err(fail)?;

        remote_file
            .write_all(content)
            .map_err(|e| FleetError::unreachable(&self.host, e))?;
        remote_file.send_eof().map_err(fail)?;
        remote_file.wait_eof().map_err(fail)?;
        remote_file.close().map_err(fail)?;
        remote_file.wait_close().map_err(fail)?;

        Ok(())
    }
}

#[cfg(unix)]
fn file_mode(path: &Path) -> i32 {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| (m.permissions().mode() & 0o777) as i32)
        .unwrap_or(0o644)
}

#[cfg(not(unix))]
fn file_mode(_path: &Path) -> i32 {
    0o644
}

/// 单引号转义，`~` 开头的路径保留展开
pub(crate) fn shell_quote(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        return format!("~/{}", shell_quote(rest));
    }
    format!("'{}'", path.replace('\'', r"'\''"))
}

/// 拆分 `host[:port]`
fn split_host_port(host: &str, default_port: u16) -> (&str, u16) {
    match host.rsplit_once(':') {
        Some((h, p)) if !h.contains(':') => match p.parse() {
            Ok(port) => (h, port),
            Err(_) => (host, default_port),
        },
        _ => (host, default_port),
    }
}

/// 基于 ssh2 的 [`RemoteShell`] 实现
///
/// 每次调用建立一个新会话，主机之间互不影响。
pub struct SshShell {
    settings: SshSettings,
}

impl SshShell {
    pub fn new(settings: SshSettings) -> Self {
        if settings.password.is_none() {
            warn!("未配置 SSH_PASSWORD，远程操作将全部失败");
        }
        Self { settings }
    }

    fn open(&self, host: &str) -> FleetResult<SshConnection> {
        let password = self.settings.password.as_ref().ok_or_else(|| {
            FleetError::ConfigurationMissing("SSH_PASSWORD".to_string())
        })?;
        let (hostname, port) = split_host_port(host, self.settings.port);

        SshConnection::connect(
            hostname,
            port,
            &self.settings.username,
            password,
            Duration::from_secs(self.settings.connect_timeout_secs),
        )
    }
}

impl RemoteShell for SshShell {
    fn run(&self, host: &str, command: &str) -> FleetResult<ExecutionResult> {
        self.open(host)?.exec(command)
    }

    fn copy(&self, host: &str, local: &Path, remote_path: &str) -> FleetResult<()> {
        let conn = self.open(host)?;
        if local.is_dir() {
            conn.upload_dir(local, remote_path)
        } else {
            conn.upload_file(local, remote_path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("h1", 22), ("h1", 22));
        assert_eq!(split_host_port("h1:2222", 22), ("h1", 2222));
        assert_eq!(split_host_port("h1:abc", 22), ("h1:abc", 22));
        // IPv6 字面量不拆分
        assert_eq!(split_host_port("::1", 22), ("::1", 22));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("gravity-agent"), "'gravity-agent'");
        assert_eq!(shell_quote("~/gravity-agent"), "~/'gravity-agent'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_missing_password_is_configuration_error() {
        let shell = SshShell::new(SshSettings::default());
        let err = shell.run("h1", "true").unwrap_err();
        assert!(matches!(err, FleetError::ConfigurationMissing(_)));
    }
}
