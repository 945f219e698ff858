//! 远程诊断
//!
//! 一组固定的只读命令，供人工排查使用。输出全部经过脱敏。

use crate::config::AgentSettings;
use crate::redact::Redactor;
use crate::remote::{shell_quote, RemoteShell};

/// 诊断状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticStatus {
    /// 命令已执行，附带退出码
    Exited(i32),
    /// 无法连接
    Unreachable,
}

/// 单条诊断结果
#[derive(Debug, Clone)]
pub struct DiagnosticCheck {
    pub name: &'static str,
    pub command: String,
    pub status: DiagnosticStatus,
    pub output: String,
}

/// 诊断项：名称和命令模板
///
/// 模板中 `{dir}` `{bin}` `{log}` `{env}` `{name}` 会被替换为已转义的路径。
pub const DIAGNOSTIC_COMMANDS: &[(&str, &str)] = &[
    ("进程列表", "ps -eo pid,etime,args | grep -v grep | grep {name}"),
    ("工作目录", "ls -la {dir}"),
    ("日志尾部", "tail -n 50 {log}"),
    ("环境文件", "cat {env}"),
    ("二进制自检", "{bin} --version"),
    ("操作系统", "cat /etc/os-release; uname -a"),
    ("显示套接字", "ls -la /tmp/.X11-unix"),
    ("登录会话", "who"),
];

fn render(template: &str, agent: &AgentSettings) -> String {
    let home = |p: String| shell_quote(&format!("~/{}", p));
    template
        .replace("{dir}", &home(agent.remote_dir.clone()))
        .replace("{bin}", &home(agent.remote_binary()))
        .replace("{log}", &home(agent.remote_log()))
        .replace("{env}", &home(agent.remote_env()))
        .replace("{name}", &shell_quote(&agent.process_name))
}

pub(crate) fn run_diagnostics(
    shell: &dyn RemoteShell,
    host: &str,
    agent: &AgentSettings,
    redactor: &Redactor,
) -> Vec<DiagnosticCheck> {
    DIAGNOSTIC_COMMANDS
        .iter()
        .map(|&(name, template)| {
            let command = render(template, agent);
            match shell.run(host, &command) {
                Ok(result) => {
                    let mut output = result.stdout;
                    if !result.stderr.trim().is_empty() {
                        output.push_str(&result.stderr);
                    }
                    DiagnosticCheck {
                        name,
                        command,
                        status: DiagnosticStatus::Exited(result.exit_code),
                        output: redactor.redact(&output),
                    }
                }
                Err(e) => DiagnosticCheck {
                    name,
                    command,
                    status: DiagnosticStatus::Unreachable,
                    output: redactor.redact(&e.to_string()),
                },
            }
        })
        .collect()
}
