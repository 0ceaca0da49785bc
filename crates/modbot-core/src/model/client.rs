use async_trait::async_trait;

use crate::Result;

use super::types::*;

/// Reasoning backend used by the invoker.
///
/// Implementations return the raw model text; validation of its shape is the
/// caller's job, since backends are not trusted to honor the schema.
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    fn provider(&self) -> ProviderKind;
    fn model_name(&self) -> &str;
    fn capabilities(&self) -> ModelCapabilities;

    async fn generate(&self, req: ReasoningRequest) -> Result<String>;
}
