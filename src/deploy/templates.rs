//! 部署模板
//!
//! 生成 agent 的 `.env` 环境文件

use crate::error::{FleetError, FleetResult};

/// 环境文件的字段
#[derive(Debug, Clone)]
pub struct AgentEnv<'a> {
    pub agent_name: &'a str,
    pub tunnel_id: &'a str,
    pub public_url: &'a str,
    pub worker_url: &'a str,
    pub deploy_token: &'a str,
    pub headless: bool,
}

/// 生成环境文件
///
/// 每行一个 `KEY=VALUE`，值按字面写入不做转义，因此任何字段包含换行都会被拒绝。
pub fn agent_env_file(env: &AgentEnv<'_>) -> FleetResult<String> {
    let headless = if env.headless { "true" } else { "false" };
    let entries = [
        ("AGENT_NAME", env.agent_name),
        ("TUNNEL_ID", env.tunnel_id),
        ("PUBLIC_URL", env.public_url),
        ("WORKER_URL", env.worker_url),
        ("GITHUB_TOKEN", env.deploy_token),
        ("HEADLESS", headless),
    ];

    let mut content = String::new();
    for (key, value) in entries {
        if value.contains('\n') || value.contains('\r') {
            return Err(FleetError::InvalidField {
                key: key.to_string(),
                reason: "包含换行符".to_string(),
            });
        }
        content.push_str(key);
        content.push('=');
        content.push_str(value);
        content.push('\n');
    }

    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample<'a>() -> AgentEnv<'a> {
        AgentEnv {
            agent_name: "a1",
            tunnel_id: "abcd1234",
            public_url: "https://a1.example.com",
            worker_url: "https://worker.example.com",
            deploy_token: "ghp_x",
            headless: true,
        }
    }

    #[test]
    fn test_agent_env_file() {
        let content = agent_env_file(&sample()).unwrap();
        assert_eq!(
            content,
            "AGENT_NAME=a1\n\
             TUNNEL_ID=abcd1234\n\
             PUBLIC_URL=https://a1.example.com\n\
             WORKER_URL=https://worker.example.com\n\
             GITHUB_TOKEN=ghp_x\n\
             HEADLESS=true\n"
        );
    }

    #[test]
    fn test_rejects_embedded_newline() {
        let env = AgentEnv {
            tunnel_id: "abcd\nHEADLESS=false",
            ..sample()
        };
        match agent_env_file(&env) {
            Err(FleetError::InvalidField { key, .. }) => assert_eq!(key, "TUNNEL_ID"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
