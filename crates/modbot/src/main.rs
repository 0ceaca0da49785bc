use std::sync::Arc;

use modbot_core::{
    config::Config, pipeline::ModerationPipeline, quota::QuotaTracker, reasoning::ReasoningInvoker,
};
use modbot_gemini::GeminiClient;

#[tokio::main]
async fn main() -> Result<(), modbot_core::Error> {
    modbot_core::logging::init("modbot")?;

    let cfg = Arc::new(Config::load()?);

    let client = Arc::new(GeminiClient::new(
        cfg.gemini_api_key.clone(),
        cfg.gemini_model.clone(),
        cfg.reasoning_timeout,
    )?);

    let invoker = ReasoningInvoker::new(client)
        .with_policy(cfg.moderation_policy())
        .with_timeout(cfg.reasoning_timeout)
        .with_temperature(cfg.reasoning_temperature)
        .with_web_search(cfg.web_search_enabled);

    let quota = Arc::new(QuotaTracker::new(cfg.quota_policy()));
    let pipeline = Arc::new(
        ModerationPipeline::new(quota, invoker).with_context_window(cfg.context_window),
    );

    tracing::info!(
        model = %cfg.gemini_model,
        context_window = cfg.context_window,
        web_search = cfg.web_search_enabled,
        "starting moderation bot"
    );

    modbot_telegram::router::run_polling(cfg, pipeline)
        .await
        .map_err(|e| modbot_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
