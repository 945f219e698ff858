//! Telegram Bot 通知

use reqwest::blocking::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::Notifier;
use crate::redact::Redactor;

const TELEGRAM_API: &str = "https://api.telegram.org";

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

/// 通过 Bot API 发送消息
pub struct TelegramNotifier {
    client: Client,
    endpoint: String,
    chat_id: String,
    redactor: Redactor,
}

impl TelegramNotifier {
    pub fn new(bot_token: &str, chat_id: &str, redactor: Redactor) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            endpoint: format!("{}/bot{}/sendMessage", TELEGRAM_API, bot_token),
            chat_id: chat_id.to_string(),
            redactor,
        }
    }
}

impl Notifier for TelegramNotifier {
    fn notify(&self, message: &str) {
        let text = self.redactor.redact(message);
        let request = SendMessageRequest {
            chat_id: &self.chat_id,
            text: &text,
            parse_mode: "Markdown",
        };

        // 请求地址含 bot token，不记录
        match self.client.post(&self.endpoint).json(&request).send() {
            Ok(resp) if resp.status().is_success() => debug!("Telegram 消息已发送"),
            Ok(resp) => warn!("Telegram 返回错误状态: {}", resp.status()),
            Err(e) => warn!(
                "Telegram 发送失败: {}",
                self.redactor.redact(&e.without_url().to_string())
            ),
        }
    }
}
