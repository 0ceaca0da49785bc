use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    context::DEFAULT_CONTEXT_WINDOW,
    domain::{BotConfig, SarcasmLevel},
    errors::Error,
    history::DEFAULT_HISTORY_CAPACITY,
    quota::{AdminGlobalPolicy, QuotaPolicy},
    reasoning::{ModerationPolicy, DEFAULT_TEMPERATURE},
    Result,
};

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-3-pro-preview";

pub const DEFAULT_KNOWLEDGE_BASE: &str = "\
Q: What is Mudrex?
A: Mudrex is a crypto investment platform automating your trading with Coin Sets and bots.

Q: How do I deposit?
A: Wallet -> Add Funds -> USDT or Bank Transfer.

Q: Withdrawal issues?
A: There are no lock-ins. You can withdraw anytime. If stuck, contact support.

Q: Is it safe?
A: Yes, 1-1 backing with Binance liquidity and high-grade security.

Q: Why is the market down?
A: Market volatility. We don't control the candles.
";

pub const DEFAULT_PERSONA: &str = "\
ROLE: Loyal Mudrex Intern.
TRAITS: Witty, Skeptical, Empathetic, Anti-Spam, Finance-Obsessed.

CORE PHILOSOPHY:
\"I only speak when I add value. Silence is better than noise.\"

HARD RULES:
1. P2P / USDT selling / scams: zero tolerance. Flag it immediately.
2. Financial advice: politely avoid giving it.
3. Market analysis: give a short, data-backed summary.
4. Empathy: if a user is panicked or fearful, never be sarcastic. \"Markets cycle, stay strong.\"
5. Unknown context: ignore it. Do not guess.
6. Support: route to the support contact.
";

/// Typed configuration for the moderation bot.
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub telegram_bot_token: String,
    pub gemini_api_key: String,
    pub gemini_model: String,

    // Persona
    pub bot_name: String,
    pub company_name: String,
    pub sarcasm: SarcasmLevel,
    pub knowledge_base: String,
    pub persona_instructions: String,

    // Moderation policy
    pub escalation_contacts: Vec<String>,
    pub support_contact: String,
    pub advice_catchphrase: String,

    // Quotas
    pub admin_user_ids: Vec<i64>,
    pub daily_reply_limit: Option<u32>,
    pub per_user_daily_limit: Option<u32>,
    pub admins_count_toward_global: bool,

    // Reasoning
    pub context_window: usize,
    pub history_capacity: usize,
    pub reasoning_timeout: Duration,
    pub reasoning_temperature: f32,
    pub web_search_enabled: bool,

    // Audit
    pub audit_log_path: PathBuf,
    pub audit_log_json: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup (the process environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);

        // Required
        let telegram_bot_token = get("TELEGRAM_BOT_TOKEN").ok_or_else(|| {
            Error::Config("TELEGRAM_BOT_TOKEN environment variable is required".to_string())
        })?;
        let gemini_api_key = get("GEMINI_API_KEY").ok_or_else(|| {
            Error::Config("GEMINI_API_KEY environment variable is required".to_string())
        })?;
        let gemini_model = get("GEMINI_MODEL").unwrap_or(DEFAULT_GEMINI_MODEL.to_string());

        // Persona (files override the built-in defaults)
        let defaults = ModerationPolicy::default();
        let bot_name = get("BOT_NAME").unwrap_or("Mudrex Intern".to_string());
        let company_name = get("COMPANY_NAME").unwrap_or("Mudrex".to_string());
        let sarcasm = match get("SARCASM_LEVEL") {
            Some(s) => s.parse()?,
            None => SarcasmLevel::default(),
        };
        let knowledge_base = read_text_file(get("KNOWLEDGE_BASE_FILE"))?
            .unwrap_or(DEFAULT_KNOWLEDGE_BASE.to_string());
        let persona_instructions =
            read_text_file(get("PERSONA_FILE"))?.unwrap_or(DEFAULT_PERSONA.to_string());

        let escalation_contacts = parse_csv(get("ESCALATION_CONTACTS"));
        let escalation_contacts = if escalation_contacts.is_empty() {
            defaults.escalation_contacts
        } else {
            escalation_contacts
        };
        let support_contact = get("SUPPORT_CONTACT").unwrap_or(defaults.support_contact);
        let advice_catchphrase =
            get("ADVICE_CATCHPHRASE").unwrap_or(defaults.advice_catchphrase);

        // Quotas (0 disables a cap)
        let admin_user_ids = parse_csv_i64(get("ADMIN_USER_IDS"))?;
        let daily_reply_limit = cap(parse_num(&get, "DAILY_REPLY_LIMIT")?
            .unwrap_or(QuotaPolicy::DEFAULT_GLOBAL_CAP));
        let per_user_daily_limit = cap(parse_num(&get, "PER_USER_DAILY_LIMIT")?
            .unwrap_or(QuotaPolicy::DEFAULT_PER_SENDER_CAP));
        let admins_count_toward_global =
            parse_bool(get("ADMINS_COUNT_TOWARD_GLOBAL")).unwrap_or(false);

        // Reasoning
        let context_window =
            parse_num(&get, "CONTEXT_WINDOW")?.unwrap_or(DEFAULT_CONTEXT_WINDOW);
        let history_capacity = parse_num(&get, "HISTORY_CAPACITY")?
            .unwrap_or(DEFAULT_HISTORY_CAPACITY)
            .max(context_window);
        let reasoning_timeout =
            Duration::from_millis(parse_num(&get, "REASONING_TIMEOUT_MS")?.unwrap_or(30_000));
        let reasoning_temperature =
            parse_num(&get, "REASONING_TEMPERATURE")?.unwrap_or(DEFAULT_TEMPERATURE);
        let web_search_enabled = parse_bool(get("WEB_SEARCH_ENABLED")).unwrap_or(true);

        // Audit logging
        let audit_log_path = PathBuf::from(
            get("AUDIT_LOG_PATH").unwrap_or("/tmp/modbot-audit.log".to_string()),
        );
        let audit_log_json = parse_bool(get("AUDIT_LOG_JSON")).unwrap_or(false);

        Ok(Self {
            telegram_bot_token,
            gemini_api_key,
            gemini_model,
            bot_name,
            company_name,
            sarcasm,
            knowledge_base,
            persona_instructions,
            escalation_contacts,
            support_contact,
            advice_catchphrase,
            admin_user_ids,
            daily_reply_limit,
            per_user_daily_limit,
            admins_count_toward_global,
            context_window,
            history_capacity,
            reasoning_timeout,
            reasoning_temperature,
            web_search_enabled,
            audit_log_path,
            audit_log_json,
        })
    }

    pub fn bot_config(&self) -> BotConfig {
        BotConfig {
            bot_name: self.bot_name.clone(),
            company_name: self.company_name.clone(),
            sarcasm: self.sarcasm,
            knowledge_base: self.knowledge_base.clone(),
            persona_instructions: self.persona_instructions.clone(),
        }
    }

    pub fn quota_policy(&self) -> QuotaPolicy {
        QuotaPolicy {
            global_daily_cap: self.daily_reply_limit,
            per_sender_daily_cap: self.per_user_daily_limit,
            admins: if self.admins_count_toward_global {
                AdminGlobalPolicy::Counted
            } else {
                AdminGlobalPolicy::Exempt
            },
        }
    }

    pub fn moderation_policy(&self) -> ModerationPolicy {
        ModerationPolicy {
            escalation_contacts: self.escalation_contacts.clone(),
            support_contact: self.support_contact.clone(),
            advice_catchphrase: self.advice_catchphrase.clone(),
        }
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_user_ids.contains(&user_id)
    }
}

fn cap(n: u32) -> Option<u32> {
    (n > 0).then_some(n)
}

fn read_text_file(path: Option<String>) -> Result<Option<String>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let text = fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("failed to read {path}: {e}")))?;
    Ok(non_empty(text))
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        env::set_var(key, unquote(v.trim()));
    }
}

fn unquote(val: &str) -> &str {
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        &val[1..val.len() - 1]
    } else {
        val
    }
}

fn parse_bool(v: Option<String>) -> Option<bool> {
    v.map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn parse_num<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    get(key)
        .map(|s| {
            s.trim()
                .parse::<T>()
                .map_err(|_| Error::Config(format!("{key} must be a number, got {s:?}")))
        })
        .transpose()
}

fn parse_csv(v: Option<String>) -> Vec<String> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_csv_i64(v: Option<String>) -> Result<Vec<i64>> {
    parse_csv(v)
        .into_iter()
        .map(|s| {
            s.parse::<i64>()
                .map_err(|_| Error::Config(format!("invalid user id in ADMIN_USER_IDS: {s:?}")))
        })
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    const REQUIRED: [(&str, &str); 2] = [("TELEGRAM_BOT_TOKEN", "123:abc"), ("GEMINI_API_KEY", "key")];

    #[test]
    fn defaults_match_community_policy() {
        let cfg = Config::from_lookup(lookup(&REQUIRED)).unwrap();
        assert_eq!(cfg.gemini_model, DEFAULT_GEMINI_MODEL);
        assert_eq!(cfg.quota_policy(), QuotaPolicy::community());
        assert_eq!(cfg.context_window, 15);
        assert_eq!(cfg.history_capacity, 100);
        assert_eq!(cfg.reasoning_timeout, Duration::from_secs(30));
        assert!(cfg.web_search_enabled);
        assert!(cfg.admin_user_ids.is_empty());

        let bot = cfg.bot_config();
        assert_eq!(bot.bot_name, "Mudrex Intern");
        assert!(bot.knowledge_base.contains("What is Mudrex?"));
        assert_eq!(cfg.moderation_policy().support_contact, "help@mudrex.com");
    }

    #[test]
    fn missing_credentials_fail_fast() {
        let err = Config::from_lookup(lookup(&[("TELEGRAM_BOT_TOKEN", "t")])).unwrap_err();
        assert!(err.to_string().contains("GEMINI_API_KEY"));

        let err = Config::from_lookup(lookup(&[
            ("TELEGRAM_BOT_TOKEN", "  "),
            ("GEMINI_API_KEY", "k"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("TELEGRAM_BOT_TOKEN"));
    }

    #[test]
    fn overrides_and_disabled_caps() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("ADMIN_USER_IDS", "1, 2,3"),
            ("DAILY_REPLY_LIMIT", "10"),
            ("PER_USER_DAILY_LIMIT", "0"),
            ("ADMINS_COUNT_TOWARD_GLOBAL", "yes"),
            ("SARCASM_LEVEL", "high"),
            ("ESCALATION_CONTACTS", "@a, @b"),
            ("WEB_SEARCH_ENABLED", "false"),
            ("CONTEXT_WINDOW", "20"),
            ("HISTORY_CAPACITY", "5"),
        ]);
        let cfg = Config::from_lookup(lookup(&pairs)).unwrap();

        assert_eq!(cfg.admin_user_ids, vec![1, 2, 3]);
        assert!(cfg.is_admin(2));
        let policy = cfg.quota_policy();
        assert_eq!(policy.global_daily_cap, Some(10));
        assert_eq!(policy.per_sender_daily_cap, None);
        assert_eq!(policy.admins, AdminGlobalPolicy::Counted);
        assert_eq!(cfg.sarcasm, SarcasmLevel::High);
        assert_eq!(cfg.escalation_contacts, vec!["@a", "@b"]);
        assert!(!cfg.web_search_enabled);
        assert_eq!(cfg.history_capacity, 20);
    }

    #[test]
    fn rejects_malformed_values() {
        for (k, v) in [
            ("DAILY_REPLY_LIMIT", "lots"),
            ("ADMIN_USER_IDS", "1,bob"),
            ("SARCASM_LEVEL", "extreme"),
            ("KNOWLEDGE_BASE_FILE", "/definitely/not/here.txt"),
        ] {
            let mut pairs = REQUIRED.to_vec();
            pairs.push((k, v));
            assert!(
                matches!(Config::from_lookup(lookup(&pairs)), Err(Error::Config(_))),
                "{k}={v} should be rejected"
            );
        }
    }

    #[test]
    fn strips_dotenv_quotes() {
        assert_eq!(unquote("\"abc\""), "abc");
        assert_eq!(unquote("'x y'"), "x y");
        assert_eq!(unquote("plain"), "plain");
    }
}
