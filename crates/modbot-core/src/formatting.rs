//! Telegram text helpers.

/// Telegram's hard cap on message length (UTF-16 units; chars is close enough for replies).
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Clip a reply to `max_chars`, ending on an ellipsis when cut.
pub fn clip_reply(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(1);
    let mut out: String = text.chars().take(keep).collect();
    out.push('…');
    out
}
