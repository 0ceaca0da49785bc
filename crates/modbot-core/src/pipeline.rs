//! Moderation decision pipeline.
//!
//! Stages run in a fixed order and stop at the first denial:
//! quota -> local filters -> transcript -> reasoning -> commit.
//! Only the reasoning stage may block; every outcome is a [`Decision`].

use std::sync::Arc;

use tracing::{debug, info};

use crate::{
    context::{build_transcript, DEFAULT_CONTEXT_WINDOW},
    domain::{BotConfig, Decision, DecisionOrigin, Members, Message},
    filters::FilterVerdict,
    quota::{DailyStats, QuotaTracker},
    reasoning::{Evaluated, ReasoningInvoker},
};

/// Display name used when the sender is missing from the member lookup.
pub const UNKNOWN_USER: &str = "Unknown User";

pub struct ModerationPipeline {
    quota: Arc<QuotaTracker>,
    invoker: ReasoningInvoker,
    window: usize,
}

impl ModerationPipeline {
    pub fn new(quota: Arc<QuotaTracker>, invoker: ReasoningInvoker) -> Self {
        Self {
            quota,
            invoker,
            window: DEFAULT_CONTEXT_WINDOW,
        }
    }

    pub fn with_context_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    pub fn model_name(&self) -> &str {
        self.invoker.model_name()
    }

    pub fn context_window(&self) -> usize {
        self.window
    }

    /// Decide whether (and how) the bot answers `message`.
    ///
    /// `history` is the room's recent messages, oldest first, and may or may
    /// not already contain `message`. A delivered reply is counted against
    /// the quota only when the returned decision says to reply.
    pub async fn evaluate(
        &self,
        message: &Message,
        history: &[Message],
        members: &Members,
        cfg: &BotConfig,
    ) -> Decision {
        let sender = members.get(&message.sender);
        let sender_name = sender
            .map(|m| m.display_name.as_str())
            .unwrap_or(UNKNOWN_USER);
        let is_admin = sender.map(|m| m.is_admin).unwrap_or(false);

        let reservation = match self.quota.try_reserve(&message.sender, is_admin) {
            Ok(r) => r,
            Err(denial) => {
                info!(
                    message_id = %message.id,
                    sender = %message.sender,
                    denial = %denial,
                    "quota denied"
                );
                return Decision::silent(DecisionOrigin::Quota, denial.describe(sender_name));
            }
        };

        let verdict = FilterVerdict::classify(&message.text, cfg);
        if let Err(gate) = verdict.gate() {
            debug!(
                message_id = %message.id,
                sender = %message.sender,
                gate = %gate,
                "filtered before reasoning"
            );
            return Decision::silent(DecisionOrigin::Filter, gate.reasoning());
        }

        let transcript = build_transcript(history, members, self.window);
        let decision = self
            .invoker
            .decide(
                &transcript,
                Evaluated {
                    text: &message.text,
                    sender_name,
                },
                cfg,
            )
            .await;

        info!(
            message_id = %message.id,
            sender = %message.sender,
            critical = verdict.critical,
            direct = verdict.direct,
            should_reply = decision.should_reply(),
            origin = ?decision.origin(),
            reasoning = decision.reasoning(),
            "moderation decision"
        );

        if decision.should_reply() {
            reservation.commit();
        }
        decision
    }

    /// Read-only quota snapshot (after a lazy day reset).
    pub fn daily_stats(&self) -> DailyStats {
        self.quota.daily_stats()
    }
}
