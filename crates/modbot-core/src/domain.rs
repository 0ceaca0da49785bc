use std::{collections::HashMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    config::{DEFAULT_KNOWLEDGE_BASE, DEFAULT_PERSONA},
    errors::Error,
};

/// Opaque member identifier (Telegram user id, simulator handle, ...).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MemberId(pub String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque message identifier, unique within a room.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct MessageId(pub String);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transport chat id (numeric, Telegram style).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

/// A stable reference to a delivered transport message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: i32,
}

/// A chat message as seen by the pipeline. Immutable once created.
#[derive(Clone, Debug)]
pub struct Message {
    pub id: MessageId,
    pub sender: MemberId,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub reply_to: Option<MessageId>,
}

impl Message {
    pub fn new(id: impl Into<String>, sender: MemberId, text: impl Into<String>) -> Self {
        Self {
            id: MessageId(id.into()),
            sender,
            text: text.into(),
            timestamp: Utc::now(),
            reply_to: None,
        }
    }

    pub fn replying_to(mut self, id: MessageId) -> Self {
        self.reply_to = Some(id);
        self
    }
}

/// A chat participant.
#[derive(Clone, Debug)]
pub struct Member {
    pub id: MemberId,
    pub display_name: String,
    /// Display tint for UI callers; only a lookup key here.
    pub tint: String,
    pub is_bot: bool,
    /// Admins bypass the quota checks.
    pub is_admin: bool,
}

impl Member {
    pub fn user(id: MemberId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            tint: String::new(),
            is_bot: false,
            is_admin: false,
        }
    }

    pub fn admin(id: MemberId, display_name: impl Into<String>) -> Self {
        Self {
            is_admin: true,
            ..Self::user(id, display_name)
        }
    }

    pub fn bot(id: MemberId, display_name: impl Into<String>) -> Self {
        Self {
            is_bot: true,
            is_admin: true,
            ..Self::user(id, display_name)
        }
    }
}

/// Member lookup for one decision.
pub type Members = HashMap<MemberId, Member>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SarcasmLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl SarcasmLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            SarcasmLevel::Low => "low",
            SarcasmLevel::Medium => "medium",
            SarcasmLevel::High => "high",
        }
    }
}

impl FromStr for SarcasmLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(SarcasmLevel::Low),
            "medium" => Ok(SarcasmLevel::Medium),
            "high" => Ok(SarcasmLevel::High),
            other => Err(Error::Config(format!(
                "invalid sarcasm level {other:?} (expected low, medium or high)"
            ))),
        }
    }
}

/// Per-invocation bot persona. Supplied fresh for every call; never mutated by the core.
#[derive(Clone, Debug)]
pub struct BotConfig {
    pub bot_name: String,
    pub company_name: String,
    pub sarcasm: SarcasmLevel,
    pub knowledge_base: String,
    pub persona_instructions: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            bot_name: "Mudrex Intern".to_string(),
            company_name: "Mudrex".to_string(),
            sarcasm: SarcasmLevel::Medium,
            knowledge_base: DEFAULT_KNOWLEDGE_BASE.to_string(),
            persona_instructions: DEFAULT_PERSONA.to_string(),
        }
    }
}

/// Which stage produced a decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOrigin {
    /// Denied by the quota tracker before any filtering.
    Quota,
    /// Denied by the local filter stage.
    Filter,
    /// Structured verdict from the reasoning collaborator.
    Reasoner,
    /// Unstructured collaborator output used verbatim.
    Fallback,
    /// Transport, credential, timeout or empty-output failure.
    Failure,
}

/// The pipeline's sole output.
///
/// Fields are private so a reply without text cannot be constructed:
/// `should_reply` implies a non-empty `response`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    should_reply: bool,
    response: Option<String>,
    reasoning: String,
    origin: DecisionOrigin,
}

impl Decision {
    pub fn silent(origin: DecisionOrigin, reasoning: impl Into<String>) -> Self {
        Self {
            should_reply: false,
            response: None,
            reasoning: reasoning.into(),
            origin,
        }
    }

    /// Build a reply; demoted to silence when `response` is blank.
    pub fn reply(
        origin: DecisionOrigin,
        response: impl Into<String>,
        reasoning: impl Into<String>,
    ) -> Self {
        Self::from_parts(origin, true, Some(response.into()), reasoning)
    }

    /// Assemble a decision from untrusted parts, enforcing the reply invariant.
    pub fn from_parts(
        origin: DecisionOrigin,
        should_reply: bool,
        response: Option<String>,
        reasoning: impl Into<String>,
    ) -> Self {
        let reasoning = reasoning.into();
        let response = response.filter(|r| !r.trim().is_empty());
        match (should_reply, response) {
            (true, Some(text)) => Self {
                should_reply: true,
                response: Some(text),
                reasoning,
                origin,
            },
            (true, None) => Self::silent(
                origin,
                format!("{reasoning} (demoted: reply requested without response text)"),
            ),
            (false, _) => Self::silent(origin, reasoning),
        }
    }

    pub fn should_reply(&self) -> bool {
        self.should_reply
    }

    pub fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    pub fn origin(&self) -> DecisionOrigin {
        self.origin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_without_text_is_demoted() {
        let d = Decision::from_parts(DecisionOrigin::Reasoner, true, None, "scam");
        assert!(!d.should_reply());
        assert!(d.response().is_none());
        assert!(d.reasoning().starts_with("scam"));

        let d = Decision::reply(DecisionOrigin::Reasoner, "   ", "blank");
        assert!(!d.should_reply());
    }

    #[test]
    fn silent_drops_stray_response() {
        let d = Decision::from_parts(
            DecisionOrigin::Reasoner,
            false,
            Some("hello".to_string()),
            "ignored",
        );
        assert!(!d.should_reply());
        assert!(d.response().is_none());
    }

    #[test]
    fn serializes_with_camel_case_fields() {
        let d = Decision::reply(DecisionOrigin::Reasoner, "hi", "greeting");
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["shouldReply"], true);
        assert_eq!(v["response"], "hi");
        assert_eq!(v["origin"], "reasoner");
    }

    #[test]
    fn parses_sarcasm_levels() {
        assert_eq!("HIGH".parse::<SarcasmLevel>().unwrap(), SarcasmLevel::High);
        assert!("extreme".parse::<SarcasmLevel>().is_err());
    }
}
