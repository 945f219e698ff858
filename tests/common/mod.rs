//! 测试替身：内存中的远程 shell、DNS，以及 mockall 生成的通知器和制品源

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use mockall::mock;

use fleetctl::artifact::{ArtifactFetcher, ArtifactVersion};
use fleetctl::config::{Config, CredentialContext};
use fleetctl::notify::Notifier;
use fleetctl::remote::{ExecutionResult, RemoteShell};
use fleetctl::tunnel::DnsProvider;
use fleetctl::{FleetError, FleetResult};

mock! {
    pub Notify {}
    impl Notifier for Notify {
        fn notify(&self, message: &str);
    }
}

mock! {
    pub Fetcher {}
    impl ArtifactFetcher for Fetcher {
        fn latest_tag(&self) -> FleetResult<String>;
        fn fetch_binary(&self, version: &ArtifactVersion, dest: &Path) -> FleetResult<PathBuf>;
    }
}

/// 远程调用记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Run { host: String, command: String },
    Copy { host: String, local: PathBuf, remote: String },
}

/// 远程主机上的一个进程
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Process {
    /// 进程名 (pgrep/pkill -x 匹配的对象)
    pub comm: String,
    /// 完整命令行 (pkill -f 匹配的对象)
    pub args: String,
}

impl Process {
    pub fn new(comm: &str, args: &str) -> Self {
        Self {
            comm: comm.to_string(),
            args: args.to_string(),
        }
    }
}

/// 模拟 pgrep / pkill / nohup 行为的远程 shell
#[derive(Default)]
pub struct FakeShell {
    pub calls: RefCell<Vec<Call>>,
    pub processes: RefCell<HashMap<String, Vec<Process>>>,
    pub unreachable: HashSet<String>,
    /// 命令包含该子串时返回的固定输出
    pub canned: HashMap<String, ExecutionResult>,
}

impl FakeShell {
    pub fn with_process(self, host: &str, process: Process) -> Self {
        self.processes
            .borrow_mut()
            .entry(host.to_string())
            .or_default()
            .push(process);
        self
    }

    pub fn processes_on(&self, host: &str) -> Vec<Process> {
        self.processes.borrow().get(host).cloned().unwrap_or_default()
    }

    pub fn runs(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                Call::Run { command, .. } => Some(command.clone()),
                Call::Copy { .. } => None,
            })
            .collect()
    }

    pub fn copies(&self) -> Vec<(PathBuf, String)> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                Call::Copy { local, remote, .. } => Some((local.clone(), remote.clone())),
                Call::Run { .. } => None,
            })
            .collect()
    }

    fn pattern(command: &str) -> String {
        command
            .split_whitespace()
            .last()
            .unwrap_or_default()
            .trim_matches('\'')
            .to_string()
    }

    fn matches(command: &str, process: &Process, pattern: &str) -> bool {
        let flags: Vec<&str> = command.split_whitespace().collect();
        if flags.contains(&"-f") {
            process.args.contains(pattern)
        } else if flags.contains(&"-x") {
            process.comm == pattern
        } else {
            process.comm.contains(pattern)
        }
    }

    fn exit(code: i32) -> ExecutionResult {
        ExecutionResult {
            exit_code: code,
            ..ExecutionResult::default()
        }
    }
}

impl RemoteShell for FakeShell {
    fn run(&self, host: &str, command: &str) -> FleetResult<ExecutionResult> {
        self.calls.borrow_mut().push(Call::Run {
            host: host.to_string(),
            command: command.to_string(),
        });

        if self.unreachable.contains(host) {
            return Err(FleetError::unreachable(host, "connection timed out"));
        }

        if let Some((_, result)) = self.canned.iter().find(|(k, _)| command.contains(k.as_str())) {
            return Ok(result.clone());
        }

        let mut processes = self.processes.borrow_mut();
        let running = processes.entry(host.to_string()).or_default();

        if command.starts_with("pgrep") {
            let pattern = Self::pattern(command);
            let found = running.iter().any(|p| Self::matches(command, p, &pattern));
            return Ok(Self::exit(if found { 0 } else { 1 }));
        }

        if command.starts_with("pkill") {
            let pattern = Self::pattern(command);
            let before = running.len();
            running.retain(|p| !Self::matches(command, p, &pattern));
            return Ok(Self::exit(if running.len() < before { 0 } else { 1 }));
        }

        if command.contains("nohup") {
            let binary = command
                .split_whitespace()
                .find(|w| w.starts_with("./"))
                .unwrap_or_default()
                .trim_start_matches("./")
                .trim_matches('\'')
                .to_string();
            running.push(Process::new(&binary, &format!("./{}", binary)));
        }

        Ok(Self::exit(0))
    }

    fn copy(&self, host: &str, local: &Path, remote_path: &str) -> FleetResult<()> {
        self.calls.borrow_mut().push(Call::Copy {
            host: host.to_string(),
            local: local.to_path_buf(),
            remote: remote_path.to_string(),
        });
        if self.unreachable.contains(host) {
            return Err(FleetError::unreachable(host, "connection timed out"));
        }
        Ok(())
    }
}

/// 固定的 CNAME 表，记录每次查询用到的凭据
#[derive(Default)]
pub struct FakeDns {
    pub records: HashMap<String, String>,
    pub queries: RefCell<Vec<(String, Option<String>)>>,
}

impl FakeDns {
    pub fn with_record(mut self, name: &str, target: &str) -> Self {
        self.records.insert(name.to_string(), target.to_string());
        self
    }
}

impl DnsProvider for &FakeDns {
    fn cname_target(&self, credentials: &CredentialContext, name: &str) -> FleetResult<Option<String>> {
        self.queries
            .borrow_mut()
            .push((name.to_string(), credentials.zone_id.clone()));
        Ok(self.records.get(name).cloned())
    }
}

/// 凭据齐全、暂存目录指向 `staging` 的配置
pub fn test_config(staging: &Path) -> Config {
    let mut config = Config::default();
    config.agent.staging_dir = staging.to_path_buf();
    config.agent.templates_dir = staging.join("templates");
    config.github_token = Some("ghp_testtoken".to_string());
    config.cloudflare.default = CredentialContext {
        email: Some("ops@example.com".to_string()),
        api_key: Some("cf-key".to_string()),
        zone_id: Some("zone-a".to_string()),
    };
    config
}
