//! 敏感信息脱敏
//!
//! 所有写入日志或发往通知渠道的文本都必须先经过 [`Redactor::redact`]。

use regex::Regex;

/// 脱敏后的占位符
pub const MASK: &str = "***";

/// 文本脱敏器
///
/// 替换 `token=<value>` 形式的参数值 (不区分大小写，因此也覆盖 `GITHUB_TOKEN=...`)，
/// 以及所有已配置密钥的字面出现。
#[derive(Debug, Clone)]
pub struct Redactor {
    token_param: Regex,
    secrets: Vec<String>,
}

impl Redactor {
    /// `secrets` 中的空值和纯 `*` 值会被忽略
    pub fn new<I, S>(secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let secrets = secrets
            .into_iter()
            .map(Into::into)
            .filter(|s| !s.is_empty() && !s.chars().all(|c| c == '*'))
            .collect();

        Self {
            token_param: Regex::new(r"(?i)(token=)[^&\s]+").expect("token 参数正则无效"),
            secrets,
        }
    }

    /// 不带任何密钥的脱敏器，只处理 `token=` 参数
    pub fn without_secrets() -> Self {
        Self::new(Vec::<String>::new())
    }

    pub fn redact(&self, text: &str) -> String {
        let mut current = text.to_string();
        // 替换可能拼出新的匹配 (例如密钥跨越掩码边界)，迭代到不动点为止
        loop {
            let mut next = current.clone();
            for secret in &self.secrets {
                while next.contains(secret.as_str()) {
                    next = next.replace(secret.as_str(), MASK);
                }
            }
            let next = self
                .token_param
                .replace_all(&next, format!("${{1}}{MASK}").as_str())
                .into_owned();

            if next == current {
                return next;
            }
            current = next;
        }
    }

    /// 对可选文本脱敏，`None` 原样返回
    pub fn redact_opt(&self, text: Option<&str>) -> Option<String> {
        text.map(|t| self.redact(t))
    }
}

impl Default for Redactor {
    fn default() -> Self {
        Self::without_secrets()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_masks_token_query_parameter() {
        let r = Redactor::without_secrets();
        assert_eq!(
            r.redact("https://example.com/agents.json?token=abc123&x=1"),
            "https://example.com/agents.json?token=***&x=1"
        );
    }

    #[test]
    fn test_masks_env_style_token() {
        let r = Redactor::without_secrets();
        assert_eq!(r.redact("GITHUB_TOKEN=ghp_xyz\nHEADLESS=true"), "GITHUB_TOKEN=***\nHEADLESS=true");
    }

    #[test]
    fn test_masks_configured_secret() {
        let r = Redactor::new(["hunter2"]);
        assert_eq!(r.redact("sshpass -p hunter2 scp"), "sshpass -p *** scp");
    }

    #[test]
    fn test_overlapping_secret_is_fully_removed() {
        let r = Redactor::new(["a*"]);
        let out = r.redact("aa*");
        assert!(!out.contains("a*"));
    }

    #[test]
    fn test_empty_input() {
        let r = Redactor::new(["secret"]);
        assert_eq!(r.redact(""), "");
        assert_eq!(r.redact_opt(None), None);
    }

    proptest! {
        #[test]
        fn prop_redact_is_idempotent(text in ".{0,64}", secret in "[a-z0-9*=]{1,6}") {
            let r = Redactor::new([secret.clone()]);
            let once = r.redact(&text);
            prop_assert_eq!(r.redact(&once), once.clone());
            if !secret.chars().all(|c| c == '*') {
                prop_assert!(!once.contains(&secret));
            }
        }
    }
}
