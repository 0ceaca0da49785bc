//! Telegram adapter (teloxide).
//!
//! Implements the `modbot-core` MessagingPort over the Telegram Bot API and
//! runs the long-polling moderation loop.

use async_trait::async_trait;

use teloxide::{prelude::*, types::ParseMode};

use tokio::time::sleep;

pub mod handlers;
pub mod router;

use modbot_core::{
    domain::{ChatId, MessageRef},
    errors::Error,
    formatting::TELEGRAM_MESSAGE_LIMIT,
    messaging::{
        port::MessagingPort,
        types::{MessagingCapabilities, OutgoingText},
    },
    Result,
};

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    teloxide::RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        tracing::warn!(retry_after = ?d, "telegram flood control; retrying once");
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            max_message_len: TELEGRAM_MESSAGE_LIMIT,
        }
    }

    async fn send(&self, chat_id: ChatId, msg: OutgoingText) -> Result<MessageRef> {
        let sent = self
            .with_retry(|| {
                let mut req = self.bot.send_message(Self::tg_chat(chat_id), msg.text.clone());
                if msg.html {
                    req = req.parse_mode(ParseMode::Html);
                }
                if let Some(id) = msg.reply_to {
                    req = req
                        .reply_to_message_id(teloxide::types::MessageId(id))
                        .allow_sending_without_reply(true);
                }
                req
            })
            .await?;

        Ok(MessageRef {
            chat_id,
            message_id: sent.id.0,
        })
    }
}
