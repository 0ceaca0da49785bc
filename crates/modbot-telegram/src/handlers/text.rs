use teloxide::types::Message as TgMessage;
use tracing::{error, info, warn};

use modbot_core::{
    audit::AuditEvent,
    domain::{ChatId, Decision, Member, MemberId, Message, MessageId},
    formatting::clip_reply,
    messaging::types::OutgoingText,
};

use crate::router::AppState;

/// A group message reduced to what moderation needs.
#[derive(Clone, Debug)]
pub struct IncomingText {
    pub chat_id: i64,
    pub message_id: i32,
    pub user_id: i64,
    pub display_name: String,
    pub reply_to: Option<i32>,
    pub text: String,
}

impl IncomingText {
    /// Text or caption of a user message; `None` for service and media-only updates.
    pub fn from_message(msg: &TgMessage) -> Option<Self> {
        let user = msg.from()?;
        let text = msg.text().or_else(|| msg.caption())?;
        if text.trim().is_empty() {
            return None;
        }

        let display_name = user
            .username
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| user.first_name.clone());

        Some(Self {
            chat_id: msg.chat.id.0,
            message_id: msg.id.0,
            user_id: user.id.0 as i64,
            display_name,
            reply_to: msg.reply_to_message().map(|m| m.id.0),
            text: text.to_string(),
        })
    }
}

/// Record the message, run the pipeline and deliver the reply, if any.
///
/// Callers hold the chat lock so history and quota see messages in order.
pub async fn moderate(state: &AppState, incoming: IncomingText) -> Decision {
    let chat = ChatId(incoming.chat_id);
    let sender_id = MemberId::new(incoming.user_id.to_string());
    let sender = if state.cfg.is_admin(incoming.user_id) {
        Member::admin(sender_id.clone(), incoming.display_name.clone())
    } else {
        Member::user(sender_id.clone(), incoming.display_name.clone())
    };

    let mut message = Message::new(incoming.message_id.to_string(), sender_id, incoming.text.clone());
    if let Some(id) = incoming.reply_to {
        message = message.replying_to(MessageId(id.to_string()));
    }

    let (history, members) = {
        let mut rooms = state.rooms.lock().await;
        rooms.upsert_member(chat, sender);
        rooms.upsert_member(chat, state.bot_member.clone());
        rooms.push(chat, message.clone());
        (rooms.history(chat), rooms.members(chat))
    };

    let decision = state
        .pipeline
        .evaluate(&message, &history, &members, &state.bot_cfg)
        .await;

    audit(
        state,
        AuditEvent::decision(
            incoming.chat_id,
            incoming.user_id,
            &incoming.display_name,
            &incoming.text,
            &decision,
        ),
    );

    let max_len = state.messenger.capabilities().max_message_len;
    let Some(text) = decision.response().map(|r| clip_reply(r, max_len)) else {
        return decision;
    };

    let out = OutgoingText::plain(text.clone()).replying_to(incoming.message_id);
    match state.messenger.send(chat, out).await {
        Ok(sent) => {
            info!(
                chat_id = incoming.chat_id,
                reply_to = incoming.message_id,
                message_id = sent.message_id,
                "reply delivered"
            );
            let reply = Message::new(
                sent.message_id.to_string(),
                state.bot_member.id.clone(),
                text,
            )
            .replying_to(message.id.clone());
            state.rooms.lock().await.push(chat, reply);
        }
        Err(e) => {
            error!(chat_id = incoming.chat_id, error = %e, "reply delivery failed");
            audit(
                state,
                AuditEvent::error(
                    incoming.chat_id,
                    &incoming.display_name,
                    &e.to_string(),
                    Some("send reply"),
                ),
            );
        }
    }

    decision
}

/// Audit failures are logged and never interrupt moderation.
fn audit(state: &AppState, event: AuditEvent) {
    if let Err(e) = state.audit.write(event) {
        warn!(path = %state.audit.path().display(), error = %e, "audit write failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    };

    use async_trait::async_trait;
    use modbot_core::{
        config::Config,
        domain::MessageRef,
        messaging::{port::MessagingPort, types::MessagingCapabilities},
        model::{
            client::ReasoningClient,
            types::{ModelCapabilities, ProviderKind, ReasoningRequest},
        },
        pipeline::ModerationPipeline,
        quota::QuotaTracker,
        reasoning::ReasoningInvoker,
        Error, Result,
    };

    struct CannedReasoner(&'static str);

    #[async_trait]
    impl ReasoningClient for CannedReasoner {
        fn provider(&self) -> ProviderKind {
            ProviderKind::Local
        }

        fn model_name(&self) -> &str {
            "canned"
        }

        fn capabilities(&self) -> ModelCapabilities {
            ModelCapabilities {
                supports_search: false,
                supports_structured_output: true,
            }
        }

        async fn generate(&self, _req: ReasoningRequest) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[derive(Default)]
    struct FakeMessenger {
        sent: Mutex<Vec<(i64, OutgoingText)>>,
        fail: bool,
    }

    #[async_trait]
    impl MessagingPort for FakeMessenger {
        fn capabilities(&self) -> MessagingCapabilities {
            MessagingCapabilities {
                max_message_len: 4096,
            }
        }

        async fn send(&self, chat_id: ChatId, msg: OutgoingText) -> Result<MessageRef> {
            if self.fail {
                return Err(Error::External("telegram error: chat not found".into()));
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push((chat_id.0, msg));
            Ok(MessageRef {
                chat_id,
                message_id: 1000 + sent.len() as i32,
            })
        }
    }

    fn state(answer: &'static str) -> (AppState, Arc<FakeMessenger>) {
        let audit_path = std::env::temp_dir().join(format!(
            "modbot-text-test-{}-{}.log",
            std::process::id(),
            answer.len()
        ));
        build_state(answer, audit_path, FakeMessenger::default())
    }

    fn build_state(
        answer: &'static str,
        audit_path: std::path::PathBuf,
        messenger: FakeMessenger,
    ) -> (AppState, Arc<FakeMessenger>) {
        let env: HashMap<&str, String> = HashMap::from([
            ("TELEGRAM_BOT_TOKEN", "t".to_string()),
            ("GEMINI_API_KEY", "k".to_string()),
            ("ADMIN_USER_IDS", "99".to_string()),
            ("AUDIT_LOG_PATH", audit_path.display().to_string()),
            ("AUDIT_LOG_JSON", "true".to_string()),
        ]);
        let cfg = Arc::new(Config::from_lookup(|k| env.get(k).cloned()).unwrap());

        let quota = Arc::new(QuotaTracker::new(cfg.quota_policy()));
        let pipeline = Arc::new(ModerationPipeline::new(
            quota,
            ReasoningInvoker::new(Arc::new(CannedReasoner(answer))),
        ));
        let messenger = Arc::new(messenger);
        let bot = Member::bot(MemberId::new("1"), cfg.bot_name.clone());
        (
            AppState::new(cfg, pipeline, messenger.clone(), bot),
            messenger,
        )
    }

    fn incoming(user_id: i64, message_id: i32, text: &str) -> IncomingText {
        IncomingText {
            chat_id: -100,
            message_id,
            user_id,
            display_name: format!("user{user_id}"),
            reply_to: None,
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn reply_quotes_message_and_lands_in_history() {
        let (state, messenger) = state(
            r#"{"shouldReply": true, "reasoning": "Scammer detected", "response": "Scam alert! @DecentralizedJM"}"#,
        );
        let d = moderate(&state, incoming(5, 42, "Sell USDT cheap, DM me")).await;
        assert!(d.should_reply());

        let sent = messenger.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, -100);
        assert_eq!(sent[0].1.reply_to, Some(42));
        assert_eq!(sent[0].1.text, "Scam alert! @DecentralizedJM");

        let rooms = state.rooms.lock().await;
        let history = rooms.history(ChatId(-100));
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].sender, state.bot_member.id);
        assert_eq!(history[1].reply_to, Some(MessageId("42".to_string())));
        assert!(rooms.member(ChatId(-100), &state.bot_member.id).unwrap().is_bot);
    }

    #[tokio::test]
    async fn filtered_message_sends_nothing() {
        let (state, messenger) = state(
            r#"{"shouldReply": true, "reasoning": "x", "response": "should not be sent"}"#,
        );
        let d = moderate(&state, incoming(5, 1, "lol")).await;
        assert!(!d.should_reply());
        assert!(messenger.sent.lock().unwrap().is_empty());
        assert_eq!(state.rooms.lock().await.history(ChatId(-100)).len(), 1);
    }

    #[tokio::test]
    async fn configured_admins_skip_the_sender_cap() {
        let (state, messenger) = state(
            r#"{"shouldReply": true, "reasoning": "help", "response": "Here to help"}"#,
        );
        for i in 0..5 {
            assert!(moderate(&state, incoming(99, i, "need help please")).await.should_reply());
        }
        for i in 0..4 {
            let d = moderate(&state, incoming(7, 100 + i, "need help please")).await;
            assert_eq!(d.should_reply(), i < 3);
        }
        assert_eq!(messenger.sent.lock().unwrap().len(), 8);

        let member = state
            .rooms
            .lock()
            .await
            .member(ChatId(-100), &MemberId::new("99"))
            .cloned()
            .unwrap();
        assert!(member.is_admin);
    }

    #[tokio::test]
    async fn failed_delivery_is_audited_and_history_unchanged() {
        let audit_path = std::env::temp_dir().join(format!(
            "modbot-text-send-fail-{}.log",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&audit_path);
        let (state, messenger) = build_state(
            r#"{"shouldReply": true, "reasoning": "help", "response": "Here to help"}"#,
            audit_path.clone(),
            FakeMessenger {
                fail: true,
                ..Default::default()
            },
        );

        let d = moderate(&state, incoming(5, 7, "need help please")).await;
        assert!(d.should_reply());
        assert!(messenger.sent.lock().unwrap().is_empty());
        assert_eq!(state.rooms.lock().await.history(ChatId(-100)).len(), 1);

        let written = std::fs::read_to_string(&audit_path).unwrap();
        let lines: Vec<serde_json::Value> = written
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["context"], "send reply");
        assert!(lines[1]["error"].as_str().unwrap().contains("chat not found"));
        let _ = std::fs::remove_file(&audit_path);
    }

    #[tokio::test]
    async fn unwritable_audit_log_does_not_block_replies() {
        let (state, messenger) = build_state(
            r#"{"shouldReply": true, "reasoning": "help", "response": "Here to help"}"#,
            std::env::temp_dir(),
            FakeMessenger::default(),
        );
        let d = moderate(&state, incoming(5, 8, "need help please")).await;
        assert!(d.should_reply());
        assert_eq!(messenger.sent.lock().unwrap().len(), 1);
    }
}
