use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageRef},
    messaging::types::{MessagingCapabilities, OutgoingText},
    Result,
};

/// Outbound messenger port.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    fn capabilities(&self) -> MessagingCapabilities;

    async fn send(&self, chat_id: ChatId, msg: OutgoingText) -> Result<MessageRef>;
}
