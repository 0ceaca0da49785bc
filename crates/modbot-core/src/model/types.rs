use serde::Serialize;

/// The provider backend answering reasoning requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Gemini,
    Local,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::Local => "local",
        }
    }
}

/// Model capabilities for feature gating.
#[derive(Clone, Copy, Debug)]
pub struct ModelCapabilities {
    /// Can ground answers in live web search.
    pub supports_search: bool,
    /// Honors a response schema (JSON mode).
    pub supports_structured_output: bool,
}

/// Normalized request for a single moderation verdict.
#[derive(Clone, Debug)]
pub struct ReasoningRequest {
    pub system_instruction: String,
    pub prompt: String,
    /// JSON schema (OpenAPI subset) the output should follow.
    pub response_schema: Option<serde_json::Value>,
    pub temperature: f32,
    pub enable_search: bool,
}
