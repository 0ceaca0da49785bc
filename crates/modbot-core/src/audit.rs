use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::Utc;
use serde::Serialize;

use crate::{
    domain::{Decision, DecisionOrigin},
    errors::Error,
    Result,
};

const AUDIT_MAX_TEXT: usize = 500;

#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event: String,

    pub chat_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub should_reply: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<DecisionOrigin>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl AuditEvent {
    fn base(event: &str, chat_id: i64, user_id: Option<i64>, username: &str) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event: event.to_string(),
            chat_id,
            user_id,
            username: Some(username.to_string()),
            content: None,
            should_reply: None,
            origin: None,
            reasoning: None,
            response: None,
            error: None,
            context: None,
        }
    }

    /// One evaluated message and the verdict it got.
    pub fn decision(
        chat_id: i64,
        user_id: i64,
        username: &str,
        content: &str,
        decision: &Decision,
    ) -> Self {
        Self {
            content: Some(content.to_string()),
            should_reply: Some(decision.should_reply()),
            origin: Some(decision.origin()),
            reasoning: Some(decision.reasoning().to_string()),
            response: decision.response().map(|s| s.to_string()),
            ..Self::base("decision", chat_id, Some(user_id), username)
        }
    }

    pub fn error(chat_id: i64, username: &str, error: &str, context: Option<&str>) -> Self {
        Self {
            error: Some(error.to_string()),
            context: context.map(|s| s.to_string()),
            ..Self::base("error", chat_id, None, username)
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuditLogger {
    path: PathBuf,
    json: bool,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>, json: bool) -> Self {
        Self {
            path: path.into(),
            json,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, mut event: AuditEvent) -> Result<()> {
        if let Some(s) = &event.content {
            event.content = Some(truncate_text(s, AUDIT_MAX_TEXT));
        }
        if let Some(s) = &event.response {
            event.response = Some(truncate_text(s, AUDIT_MAX_TEXT));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if self.json {
            let line = serde_json::to_string(&event)?;
            writeln!(file, "{line}")?;
            return Ok(());
        }

        let mut out = String::new();
        out.push('\n');
        out.push_str(&"=".repeat(60));

        let value = serde_json::to_value(&event)?;
        let Some(obj) = value.as_object() else {
            return Err(Error::External(
                "audit event is not a JSON object".to_string(),
            ));
        };
        for (k, v) in obj {
            out.push('\n');
            out.push_str(k);
            out.push_str(": ");
            out.push_str(&json_value_to_display(v));
        }
        out.push('\n');

        file.write_all(out.as_bytes())?;
        Ok(())
    }
}

pub fn truncate_text(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out = s.chars().take(max_chars).collect::<String>();
    out.push_str("...");
    out
}

fn json_value_to_display(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.to_string(),
        other => serde_json::to_string(other).unwrap_or_else(|_| "<unprintable>".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn tmp_file(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_nanos();
        let pid = std::process::id();
        std::env::temp_dir().join(format!("{prefix}-{pid}-{ts}.log"))
    }

    #[test]
    fn truncate_counts_chars() {
        assert_eq!(truncate_text("héllo", 5), "héllo");
        assert_eq!(truncate_text("héllo!", 5), "héllo...");
    }

    #[test]
    fn json_lines_carry_the_verdict() {
        let log = AuditLogger::new(tmp_file("modbot-audit-json"), true);
        let d = Decision::reply(DecisionOrigin::Reasoner, "Stay safe!", "Scammer detected");
        let content = "x".repeat(AUDIT_MAX_TEXT + 1);
        log.write(AuditEvent::decision(-100, 7, "alice", &content, &d))
            .unwrap();

        let written = std::fs::read_to_string(log.path()).unwrap();
        let v: serde_json::Value = serde_json::from_str(written.trim()).unwrap();
        assert_eq!(v["event"], "decision");
        assert_eq!(v["should_reply"], true);
        assert_eq!(v["origin"], "reasoner");
        assert_eq!(v["response"], "Stay safe!");
        assert!(v["content"].as_str().unwrap().ends_with("..."));
        let _ = std::fs::remove_file(log.path());
    }

    #[test]
    fn plain_format_omits_empty_fields() {
        let log = AuditLogger::new(tmp_file("modbot-audit-plain"), false);
        let d = Decision::silent(DecisionOrigin::Filter, "Message too short or spam-like");
        log.write(AuditEvent::decision(1, 2, "bob", "lol", &d)).unwrap();
        log.write(AuditEvent::error(1, "bob", "send failed", Some("reply")))
            .unwrap();

        let written = std::fs::read_to_string(log.path()).unwrap();
        assert!(written.contains("reasoning: Message too short or spam-like"));
        assert!(written.contains("origin: filter"));
        assert!(written.contains("error: send failed"));
        assert!(!written.contains("response:"));
        let _ = std::fs::remove_file(log.path());
    }
}
