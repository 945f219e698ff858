//! 告警通知模块
//!
//! 通知是尽力而为的：发送失败只记录日志，永远不会中断调用方。
//! 所有消息在离开进程前都会经过脱敏。

mod telegram;

pub use telegram::TelegramNotifier;

use tracing::warn;

use crate::config::Config;
use crate::redact::Redactor;

/// 告警能力
pub trait Notifier {
    fn notify(&self, message: &str);
}

/// 未配置通知渠道时的降级实现：仅写本地日志
pub struct LogNotifier {
    redactor: Redactor,
}

impl LogNotifier {
    pub fn new(redactor: Redactor) -> Self {
        Self { redactor }
    }
}

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) {
        warn!("通知渠道未配置，跳过消息: {}", self.redactor.redact(message));
    }
}

/// 根据配置创建通知器
pub fn create_notifier(config: &Config, redactor: Redactor) -> Box<dyn Notifier> {
    match (
        config.notify.telegram_bot_token.as_deref(),
        config.notify.telegram_chat_id.as_deref(),
    ) {
        (Some(token), Some(chat_id)) => Box::new(TelegramNotifier::new(token, chat_id, redactor)),
        _ => Box::new(LogNotifier::new(redactor)),
    }
}
