use std::sync::Arc;

use teloxide::prelude::*;
use tracing::debug;

use modbot_core::{
    domain::ChatId,
    formatting::escape_html,
    messaging::types::OutgoingText,
    quota::{AdminGlobalPolicy, DailyStats, QuotaPolicy},
};

use crate::router::AppState;

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

fn format_cap(cap: Option<u32>) -> String {
    cap.map(|c| c.to_string())
        .unwrap_or_else(|| "unlimited".to_string())
}

fn format_stats(stats: &DailyStats, policy: &QuotaPolicy, model: &str) -> String {
    let admins = match policy.admins {
        AdminGlobalPolicy::Exempt => "exempt from all caps",
        AdminGlobalPolicy::Counted => "counted toward the daily cap",
    };
    let remaining = stats
        .remaining
        .map(|r| r.to_string())
        .unwrap_or_else(|| "unlimited".to_string());

    format!(
        "📊 <b>Moderation stats</b>\n\n\
Replies today: {replies} / {limit}\n\
Remaining: {remaining}\n\
In flight: {in_flight}\n\
Per-user limit: {per_user}\n\
Admins: {admins}\n\
Last reset: {reset}\n\
Model: <code>{model}</code>",
        replies = stats.replies_today,
        limit = format_cap(stats.limit),
        in_flight = stats.in_flight,
        per_user = format_cap(stats.per_sender_limit),
        reset = stats.last_reset.format("%Y-%m-%d"),
        model = escape_html(model),
    )
}

fn help_text(state: &AppState) -> String {
    let policy = state.pipeline.quota().policy();
    format!(
        "🤖 <b>{name}</b>\n\n\
I keep an eye on this chat for {company}: scams get flagged, questions get answered, \
chatter gets left alone.\n\n\
<b>📋 Commands:</b>\n\
/start - Show this help message\n\
/help - Show this help message\n\
/stats - Today's reply quota (admins only)\n\n\
I reply at most {global} times a day, and {per_user} times per person.",
        name = escape_html(&state.bot_cfg.bot_name),
        company = escape_html(&state.bot_cfg.company_name),
        global = format_cap(policy.global_daily_cap),
        per_user = format_cap(policy.per_sender_daily_cap),
    )
}

pub async fn handle_command(_bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let user_id = user.id.0 as i64;
    let chat_id = ChatId(msg.chat.id.0);

    let (cmd, _arg) = parse_command(text);

    let body = match cmd.as_str() {
        "start" | "help" => help_text(&state),
        "stats" => {
            if !state.cfg.is_admin(user_id) {
                debug!(user_id, "non-admin asked for stats");
                return Ok(());
            }
            format_stats(
                &state.pipeline.daily_stats(),
                &state.pipeline.quota().policy(),
                state.pipeline.model_name(),
            )
        }
        // Unknown commands are ignored; in a group they are usually meant for other bots.
        _ => return Ok(()),
    };

    let out = OutgoingText::html(body).replying_to(msg.id.0);
    if let Err(e) = state.messenger.send(chat_id, out).await {
        tracing::warn!(error = %e, command = %cmd, "command reply failed");
    }
    Ok(())
}
