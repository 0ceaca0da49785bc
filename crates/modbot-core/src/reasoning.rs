//! Reasoning invoker: policy prompt in, validated [`Decision`] out.
//!
//! The collaborator's output is untrusted. It is unwrapped from incidental
//! formatting, parsed leniently and coerced into a `Decision`; every transport
//! or credential failure becomes a silent decision naming the failure class.

use std::{sync::Arc, time::Duration};

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::{
    context::{render_transcript, TranscriptLine},
    domain::{BotConfig, Decision, DecisionOrigin, SarcasmLevel},
    errors::Error,
    filters::is_market_query,
    model::{client::ReasoningClient, types::ReasoningRequest},
};

pub const DEFAULT_REASONING_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_TEMPERATURE: f32 = 0.8;

/// Fixed parts of the moderation preamble.
#[derive(Clone, Debug)]
pub struct ModerationPolicy {
    /// Handles tagged on scams and abuse.
    pub escalation_contacts: Vec<String>,
    /// Where support requests are routed.
    pub support_contact: String,
    /// Closing line for declined financial-advice requests.
    pub advice_catchphrase: String,
}

impl Default for ModerationPolicy {
    fn default() -> Self {
        Self {
            escalation_contacts: vec!["@DecentralizedJM".to_string(), "@babaearn23".to_string()],
            support_contact: "help@mudrex.com".to_string(),
            advice_catchphrase: "...but honestly, buy BIT (Bitcoin) anytime.".to_string(),
        }
    }
}

/// Classified reasons a verdict could not be obtained.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReasoningFailure {
    MissingCredential,
    Timeout,
    HttpStatus(u16),
    Transport(String),
    EmptyOutput,
}

impl ReasoningFailure {
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::MissingCredential(_) => ReasoningFailure::MissingCredential,
            Error::Timeout(_) => ReasoningFailure::Timeout,
            Error::Http { status, .. } => ReasoningFailure::HttpStatus(*status),
            other => ReasoningFailure::Transport(other.to_string()),
        }
    }

    pub fn reasoning(&self) -> String {
        match self {
            ReasoningFailure::MissingCredential => "No API key configured".to_string(),
            ReasoningFailure::Timeout => "Reasoning service timed out".to_string(),
            ReasoningFailure::HttpStatus(status) => {
                format!("Reasoning service returned HTTP {status}")
            }
            ReasoningFailure::Transport(_) => "Error contacting reasoning service".to_string(),
            ReasoningFailure::EmptyOutput => {
                "Reasoning service returned an empty or unparseable response".to_string()
            }
        }
    }

    fn into_decision(self) -> Decision {
        Decision::silent(DecisionOrigin::Failure, self.reasoning())
    }
}

/// The message being judged, with its resolved sender.
#[derive(Clone, Copy, Debug)]
pub struct Evaluated<'a> {
    pub text: &'a str,
    pub sender_name: &'a str,
}

pub struct ReasoningInvoker {
    client: Arc<dyn ReasoningClient>,
    policy: ModerationPolicy,
    timeout: Duration,
    temperature: f32,
    web_search: bool,
}

impl ReasoningInvoker {
    pub fn new(client: Arc<dyn ReasoningClient>) -> Self {
        Self {
            client,
            policy: ModerationPolicy::default(),
            timeout: DEFAULT_REASONING_TIMEOUT,
            temperature: DEFAULT_TEMPERATURE,
            web_search: true,
        }
    }

    pub fn with_policy(mut self, policy: ModerationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_web_search(mut self, enabled: bool) -> Self {
        self.web_search = enabled;
        self
    }

    pub fn model_name(&self) -> &str {
        self.client.model_name()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Ask the collaborator for a verdict. Never fails: errors become silent decisions.
    pub async fn decide(
        &self,
        transcript: &[TranscriptLine],
        message: Evaluated<'_>,
        cfg: &BotConfig,
    ) -> Decision {
        let caps = self.client.capabilities();
        let enable_search = self.web_search && caps.supports_search && is_market_query(message.text);

        let req = ReasoningRequest {
            system_instruction: build_system_instruction(cfg, &self.policy, message, enable_search),
            prompt: build_evaluation_prompt(transcript, message, &self.policy),
            response_schema: caps.supports_structured_output.then(decision_schema),
            temperature: self.temperature,
            enable_search,
        };

        debug!(
            provider = self.client.provider().as_str(),
            model = self.client.model_name(),
            enable_search,
            transcript_len = transcript.len(),
            "requesting moderation verdict"
        );

        let raw = match tokio::time::timeout(self.timeout, self.client.generate(req)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                let failure = ReasoningFailure::from_error(&e);
                warn!(error = %e, class = ?failure, "reasoning call failed");
                return failure.into_decision();
            }
            Err(_) => {
                warn!(timeout = ?self.timeout, "reasoning call timed out");
                return ReasoningFailure::Timeout.into_decision();
            }
        };

        parse_decision(&raw)
    }
}

/// Output schema requested from the collaborator.
pub fn decision_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "shouldReply": {
                "type": "BOOLEAN",
                "description": "True if the bot needs to intervene."
            },
            "reasoning": {
                "type": "STRING",
                "description": "Why the bot replied or stayed silent (e.g. 'Scammer detected', 'Troll ignored')."
            },
            "response": {
                "type": "STRING",
                "nullable": true,
                "description": "The reply text. Null if shouldReply is false."
            }
        },
        "required": ["shouldReply", "reasoning"]
    })
}

fn tone_guidance(level: SarcasmLevel) -> &'static str {
    match level {
        SarcasmLevel::Low => "Warm and straightforward. No sarcasm.",
        SarcasmLevel::Medium => "Friendly with light wit. Sarcasm only for obvious trolls.",
        SarcasmLevel::High => "Sharp and witty. Roast scammers and trolls, never regular users.",
    }
}

/// The moderation preamble: persona, rules, knowledge base and extra instructions.
pub fn build_system_instruction(
    cfg: &BotConfig,
    policy: &ModerationPolicy,
    message: Evaluated<'_>,
    search_enabled: bool,
) -> String {
    let tags = policy.escalation_contacts.join(" ");
    let market_rule = if search_enabled {
        "Use the search tool and give a short, data-backed summary of current conditions."
    } else {
        "Give a short, balanced view without price predictions."
    };

    format!(
        r#"ROLE: You are {bot}, the autonomous community manager for {company}.

CONTEXT:
- You are monitoring a community group chat.
- You are evaluating the message "{text}" from {sender}.

TONE ({level}): {tone}
- Use English by default. Switch language only if the user does.
- Vary your vocabulary. Do not repeat stock phrases.

INTERVENTION RULES:
1. SCAMS / SOLICITATION (P2P deals, USDT selling, signal groups, guaranteed returns, "DM me"):
   Intervene firmly but professionally. Warn the community. You MUST tag {tags}.
2. FINANCIAL ADVICE ("what should I buy?", "is this a good investment?"):
   Politely decline to give advice, then close with: "{catchphrase}"
3. MARKET ANALYSIS (news, trends, why the market moved):
   {market_rule}
4. PANIC / DISTRESS (fear, losses, "where is my money"):
   Never sarcastic. Be empathetic and reassuring.
5. ABUSE / PROFANITY: stay respectful and tag {tags}.
6. UNKNOWN OR AMBIGUOUS CONTEXT: stay silent (shouldReply false). Never ask clarifying questions. Never guess.
7. SUPPORT REQUESTS (withdrawals, deposits, account problems): route to {support}.
8. CASUAL CHATTER: if you already replied to this person recently, stay silent.
9. COMPANY QUESTIONS: answer from the knowledge base only.

KNOWLEDGE BASE:
{kb}

ADDITIONAL INSTRUCTIONS:
{persona}
"#,
        bot = cfg.bot_name,
        company = cfg.company_name,
        text = message.text,
        sender = message.sender_name,
        level = cfg.sarcasm.as_str(),
        tone = tone_guidance(cfg.sarcasm),
        tags = tags,
        catchphrase = policy.advice_catchphrase,
        market_rule = market_rule,
        support = policy.support_contact,
        kb = cfg.knowledge_base.trim(),
        persona = cfg.persona_instructions.trim(),
    )
}

/// The user turn: transcript, the message under evaluation and the task.
pub fn build_evaluation_prompt(
    transcript: &[TranscriptLine],
    message: Evaluated<'_>,
    policy: &ModerationPolicy,
) -> String {
    let history = if transcript.is_empty() {
        "(no earlier messages)".to_string()
    } else {
        render_transcript(transcript)
    };

    format!(
        "Current Chat History (Context):\n{history}\n\n\
LATEST MESSAGE TO EVALUATE:\n{sender}: {text}\n\n\
Task:\n\
1. Decide if THIS message needs a reply.\n\
2. Scam or spam -> warn and tag {tags}.\n\
3. Trolling -> ignore, or answer once with kindness.\n\
4. Anger or panic -> de-escalate with empathy.\n\
5. Otherwise unclear -> stay silent.\n\n\
Output only a JSON object: {{\"shouldReply\": boolean, \"reasoning\": string, \"response\": string or null}}.",
        sender = message.sender_name,
        text = message.text,
        tags = policy.escalation_contacts.join(" "),
    )
}

/// Coerce raw collaborator output into a decision.
///
/// Structured output is unwrapped and validated. Unstructured non-empty text
/// is used as the reply itself; empty output is a silent failure.
pub fn parse_decision(raw: &str) -> Decision {
    let Some(obj) = first_json_object(raw) else {
        let text = raw.trim();
        if text.is_empty() {
            return ReasoningFailure::EmptyOutput.into_decision();
        }
        debug!(len = text.len(), "unstructured verdict; using raw text as reply");
        return Decision::reply(
            DecisionOrigin::Fallback,
            text,
            "Unstructured output from reasoning service used as reply",
        );
    };

    let should_reply = obj
        .get("shouldReply")
        .or_else(|| obj.get("should_reply"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let response = obj
        .get("response")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string());
    let reasoning = obj
        .get("reasoning")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("No reasoning provided.");

    let decision = Decision::from_parts(DecisionOrigin::Reasoner, should_reply, response, reasoning);
    if should_reply && !decision.should_reply() {
        warn!(reasoning, "verdict asked to reply without text; demoted to silence");
    }
    decision
}

/// First complete JSON object in model output.
///
/// Markdown fences, leading prose and anything after the object (search
/// citations, sign-offs) are skipped: each `{` is tried as the start of a
/// value and the streaming parser stops at the end of the first one.
fn first_json_object(text: &str) -> Option<Map<String, Value>> {
    text.match_indices('{').find_map(|(start, _)| {
        let mut values = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        match values.next() {
            Some(Ok(Value::Object(obj))) => Some(obj),
            _ => None,
        }
    })
}
