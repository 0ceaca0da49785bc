//! Local pre-filters that run before any reasoning call.
//!
//! All classifiers are pure functions over the message text (and the bot
//! persona for direct engagement). The gate opens for scam vocabulary
//! unconditionally, otherwise only for non-spam messages that engage the bot.

use std::{fmt, sync::OnceLock};

use regex::Regex;

use crate::domain::BotConfig;

/// Messages this short (in characters, after trimming) are noise.
pub const MAX_NOISE_CHARS: usize = 3;

/// Acknowledgements and greetings that never warrant a reply on their own.
pub const LOW_INFORMATION_TOKENS: &[&str] = &[
    "lol", "lmao", "haha", "ok", "k", "yes", "no", "nice", "cool", "wow", "gm", "gn", "hi",
    "hello",
];

/// Support/domain words that count as direct engagement (the organization name is added per call).
pub const SUPPORT_KEYWORDS: &[&str] = &[
    "help", "support", "withdraw", "deposit", "issue", "problem", "error",
];

fn punctuation_only() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[\s\p{P}]+$").expect("valid regex"))
}

fn pictographs_only() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^[\s\x{200D}\x{20E3}\x{FE0F}\x{2600}-\x{27BF}\x{2B00}-\x{2BFF}\x{1F000}-\x{1FAFF}]+$",
        )
        .expect("valid regex")
    })
}

fn scam_vocabulary() -> &'static [Regex] {
    static RE: OnceLock<Vec<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        [
            r"(?i)\b(sell\s+usdt|buy\s+usdt|p2p\s+(deal|trade|sale|seller)|dm\s+me|contact\s+me|inbox\s+me|free\s+usdt)\b",
            r"(?i)\b(vip\s+signals?|signals?\s+group|join\s+my\s+(group|channel)|click\s+here)\b",
            r"(?i)\b(guaranteed\s+(profits?|returns?)|investment\s+opportunity|double\s+your\s+money)\b",
            r"(?i)\b\d{2,}\s*%\s*(profits?|returns?|daily)\b",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("valid regex"))
        .collect()
    })
}

fn market_vocabulary() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(markets?|prices?|charts?|trends?|news|bull(ish)?|bear(ish)?|pump|dump|crash|rally|btc|bitcoin|eth|ethereum|altcoins?)\b",
        )
        .expect("valid regex")
    })
}

/// Empty, very short, acknowledgement-only, punctuation-only or emoji-only text.
pub fn is_spam(text: &str) -> bool {
    let t = text.trim();
    if t.chars().count() <= MAX_NOISE_CHARS {
        return true;
    }

    let bare = t
        .trim_end_matches(|c: char| c.is_ascii_punctuation())
        .to_lowercase();
    if LOW_INFORMATION_TOKENS.contains(&bare.as_str()) {
        return true;
    }

    punctuation_only().is_match(t) || pictographs_only().is_match(t)
}

/// Scam / solicitation vocabulary: P2P sales, "DM me", guaranteed returns, signal groups.
pub fn has_critical_keywords(text: &str) -> bool {
    scam_vocabulary().iter().any(|re| re.is_match(text))
}

/// Mentions the bot, a support keyword or the organization, or asks a question.
pub fn is_direct_engagement(text: &str, cfg: &BotConfig) -> bool {
    if text.contains('?') {
        return true;
    }

    let lower = text.to_lowercase();
    let bot = cfg.bot_name.trim().to_lowercase();
    if !bot.is_empty() {
        let handle: String = bot.chars().filter(|c| !c.is_whitespace()).collect();
        if lower.contains(&bot) || lower.contains(&format!("@{handle}")) {
            return true;
        }
    }

    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    if words.iter().any(|w| SUPPORT_KEYWORDS.contains(w)) {
        return true;
    }

    let company = cfg.company_name.to_lowercase();
    let company: Vec<&str> = company
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    !company.is_empty() && words.windows(company.len()).any(|w| w == company.as_slice())
}

/// Market-news/trend questions, answered in search-augmented mode when available.
pub fn is_market_query(text: &str) -> bool {
    market_vocabulary().is_match(text)
}

/// The gate that closed for a filtered message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterGate {
    Spam,
    NotEngaged,
}

impl FilterGate {
    pub fn reasoning(self) -> &'static str {
        match self {
            FilterGate::Spam => "Message too short or spam-like",
            FilterGate::NotEngaged => "Not critical, not directly engaged",
        }
    }
}

impl fmt::Display for FilterGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FilterGate::Spam => "spam",
            FilterGate::NotEngaged => "not_engaged",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FilterVerdict {
    pub spam: bool,
    pub critical: bool,
    pub direct: bool,
}

impl FilterVerdict {
    /// Spam is classified first; critical vocabulary is classified on its own and overrides it.
    pub fn classify(text: &str, cfg: &BotConfig) -> Self {
        let spam = is_spam(text);
        let critical = has_critical_keywords(text);
        let direct = !spam && is_direct_engagement(text, cfg);
        Self {
            spam,
            critical,
            direct,
        }
    }

    /// `Ok` when the message may proceed to the reasoning step.
    pub fn gate(&self) -> Result<(), FilterGate> {
        if self.critical {
            return Ok(());
        }
        if self.spam {
            return Err(FilterGate::Spam);
        }
        if self.direct {
            return Ok(());
        }
        Err(FilterGate::NotEngaged)
    }
}
