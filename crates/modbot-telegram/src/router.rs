use std::{collections::HashMap, sync::Arc};

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use modbot_core::messaging::throttled::{ThrottleConfig, ThrottledMessenger};
use modbot_core::{
    audit::AuditLogger,
    config::Config,
    domain::{BotConfig, Member, MemberId},
    history::RoomBook,
    messaging::port::MessagingPort,
    pipeline::ModerationPipeline,
};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub bot_cfg: Arc<BotConfig>,
    pub pipeline: Arc<ModerationPipeline>,
    pub messenger: Arc<dyn MessagingPort>,
    pub rooms: Arc<Mutex<RoomBook>>,
    pub chat_locks: Arc<ChatLocks>,
    pub audit: Arc<AuditLogger>,
    /// The bot's own roster entry; its replies are logged under it.
    pub bot_member: Member,
}

impl AppState {
    pub fn new(
        cfg: Arc<Config>,
        pipeline: Arc<ModerationPipeline>,
        messenger: Arc<dyn MessagingPort>,
        bot_member: Member,
    ) -> Self {
        Self {
            bot_cfg: Arc::new(cfg.bot_config()),
            rooms: Arc::new(Mutex::new(RoomBook::new(cfg.history_capacity))),
            chat_locks: Arc::new(ChatLocks::default()),
            audit: Arc::new(AuditLogger::new(
                cfg.audit_log_path.clone(),
                cfg.audit_log_json,
            )),
            cfg,
            pipeline,
            messenger,
            bot_member,
        }
    }
}

/// One lock per chat: messages of a room are evaluated strictly in order.
#[derive(Default)]
pub struct ChatLocks {
    inner: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl ChatLocks {
    pub async fn lock_chat(&self, chat_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(chat_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

pub async fn run_polling(cfg: Arc<Config>, pipeline: Arc<ModerationPipeline>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    let bot_member = match bot.get_me().await {
        Ok(me) => {
            info!(username = %me.username(), "moderation bot started");
            Member::bot(MemberId::new(me.id.0.to_string()), cfg.bot_name.clone())
        }
        Err(e) => {
            warn!(error = %e, "get_me failed; using configured bot name only");
            Member::bot(MemberId::new("bot"), cfg.bot_name.clone())
        }
    };
    info!(
        model = pipeline.model_name(),
        admins = cfg.admin_user_ids.len(),
        policy = ?pipeline.quota().policy(),
        "pipeline ready"
    );

    // Replies go through the throttling decorator; RetryAfter is retried once in the adapter.
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig::default(),
    ));

    let state = Arc::new(AppState::new(cfg, pipeline, messenger, bot_member));

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    Ok(())
}
