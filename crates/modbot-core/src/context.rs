use std::fmt;

use serde::Serialize;

use crate::domain::{Members, Message};

/// Messages of recent history handed to the reasoning step.
pub const DEFAULT_CONTEXT_WINDOW: usize = 15;

/// Smaller window for deployments that want less context per call.
pub const COMPACT_CONTEXT_WINDOW: usize = 10;

/// Label for senders missing from the member lookup.
pub const UNKNOWN_SENDER: &str = "Unknown";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Bot,
    User,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Role::Bot => "Bot",
            Role::User => "User",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TranscriptLine {
    pub display_name: String,
    pub role: Role,
    pub text: String,
}

impl fmt::Display for TranscriptLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.display_name, self.role.label(), self.text)
    }
}

/// Last `window` messages of `history`, oldest first, with senders resolved.
///
/// Older messages are dropped silently; nothing is cached between calls.
pub fn build_transcript(
    history: &[Message],
    members: &Members,
    window: usize,
) -> Vec<TranscriptLine> {
    let start = history.len().saturating_sub(window);
    history[start..]
        .iter()
        .map(|m| match members.get(&m.sender) {
            Some(member) => TranscriptLine {
                display_name: member.display_name.clone(),
                role: if member.is_bot { Role::Bot } else { Role::User },
                text: m.text.clone(),
            },
            None => TranscriptLine {
                display_name: UNKNOWN_SENDER.to_string(),
                role: Role::User,
                text: m.text.clone(),
            },
        })
        .collect()
}

/// One line per message, `Name (Role): text`.
pub fn render_transcript(lines: &[TranscriptLine]) -> String {
    lines
        .iter()
        .map(|l| l.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}
