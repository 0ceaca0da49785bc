//! Gemini adapter for the reasoning port.
//!
//! Calls `models/{model}:generateContent` with the moderation preamble as the
//! system instruction. Structured (JSON schema) output is requested unless
//! Google Search grounding is on, since the API rejects the two together.

use std::time::Duration;

use async_trait::async_trait;
use modbot_core::{
    errors::Error,
    model::{
        client::ReasoningClient,
        types::{ModelCapabilities, ProviderKind, ReasoningRequest},
    },
    Result,
};
use serde_json::{json, Value};
use tracing::debug;

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Clone, Debug)]
pub struct GeminiClient {
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::External(format!("gemini client build failed: {e}")))?;
        Ok(Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: GEMINI_API_BASE.to_string(),
            timeout,
            http,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

#[async_trait]
impl ReasoningClient for GeminiClient {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn capabilities(&self) -> ModelCapabilities {
        ModelCapabilities {
            supports_search: true,
            supports_structured_output: true,
        }
    }

    async fn generate(&self, req: ReasoningRequest) -> Result<String> {
        if self.api_key.trim().is_empty() {
            return Err(Error::MissingCredential("GEMINI_API_KEY".to_string()));
        }

        let body = build_request_body(&req);
        let resp = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Http {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let v: Value = resp
            .json()
            .await
            .map_err(|e| Error::External(format!("gemini json error: {e}")))?;

        let text = extract_text(&v);
        debug!(
            model = %self.model,
            search = req.enable_search,
            len = text.len(),
            "gemini response received"
        );
        Ok(text)
    }
}

impl GeminiClient {
    fn map_transport_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout(self.timeout)
        } else {
            Error::External(format!("gemini request error: {e}"))
        }
    }
}

/// `generateContent` request body for a reasoning request.
pub fn build_request_body(req: &ReasoningRequest) -> Value {
    let mut generation_config = json!({ "temperature": req.temperature });

    let mut body = json!({
        "systemInstruction": { "parts": [{ "text": req.system_instruction }] },
        "contents": [{ "role": "user", "parts": [{ "text": req.prompt }] }],
    });

    if req.enable_search {
        body["tools"] = json!([{ "google_search": {} }]);
    } else if let Some(schema) = &req.response_schema {
        generation_config["responseMimeType"] = json!("application/json");
        generation_config["responseSchema"] = schema.clone();
    }

    body["generationConfig"] = generation_config;
    body
}

/// Concatenated text parts of the first candidate; empty when absent.
pub fn extract_text(v: &Value) -> String {
    v.get("candidates")
        .and_then(Value::as_array)
        .and_then(|arr| arr.first())
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<String>()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(enable_search: bool) -> ReasoningRequest {
        ReasoningRequest {
            system_instruction: "ROLE: intern".to_string(),
            prompt: "LATEST MESSAGE: hi".to_string(),
            response_schema: Some(json!({ "type": "OBJECT" })),
            temperature: 0.8,
            enable_search,
        }
    }

    #[test]
    fn structured_request_carries_schema() {
        let body = build_request_body(&req(false));
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "ROLE: intern");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "LATEST MESSAGE: hi");
        assert_eq!(
            body["generationConfig"]["responseMimeType"],
            "application/json"
        );
        assert_eq!(body["generationConfig"]["responseSchema"]["type"], "OBJECT");
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn search_request_drops_schema() {
        let body = build_request_body(&req(true));
        assert!(body["tools"][0].get("google_search").is_some());
        assert!(body["generationConfig"].get("responseSchema").is_none());
        assert!(body["generationConfig"]["temperature"].is_number());
    }

    #[test]
    fn extracts_and_joins_parts() {
        let v = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "{\"shouldReply\":" }, { "text": " false}" }] }
            }]
        });
        assert_eq!(extract_text(&v), "{\"shouldReply\": false}");
        assert_eq!(extract_text(&json!({ "candidates": [] })), "");
        assert_eq!(extract_text(&json!({ "promptFeedback": {} })), "");
    }

    #[tokio::test]
    async fn empty_key_is_missing_credential() {
        let client = GeminiClient::new("  ", "gemini-test", Duration::from_secs(1)).unwrap();
        let err = client.generate(req(false)).await.unwrap_err();
        assert!(matches!(err, Error::MissingCredential(_)));
    }

    #[test]
    fn endpoint_uses_model_and_base() {
        let client = GeminiClient::new("k", "gemini-test", Duration::from_secs(1))
            .unwrap()
            .with_base_url("http://localhost:9/v1beta/");
        assert_eq!(
            client.endpoint(),
            "http://localhost:9/v1beta/models/gemini-test:generateContent"
        );
        assert_eq!(client.model_name(), "gemini-test");
    }
}
