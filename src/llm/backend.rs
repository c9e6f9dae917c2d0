use std::sync::Arc;
use std::time::Duration;

use crate::llm::client::{resolve_model, LlmClient, Provider, ProviderConfig};
use crate::llm::prompt::LlmPrompt;

#[derive(Debug, Clone)]
pub struct ChatReply {
    pub text: String,
    pub conversation_id: Option<String>,
}

/// The one capability the suggestion client needs from an AI backend.
pub trait ChatBackend: Send + Sync {
    fn name(&self) -> &str;
    fn send_message(&self, prompt: &LlmPrompt) -> Result<ChatReply, String>;
}

impl ChatBackend for LlmClient {
    fn name(&self) -> &str {
        &self.config().model
    }

    fn send_message(&self, prompt: &LlmPrompt) -> Result<ChatReply, String> {
        let out = self.run(prompt)?;
        Ok(ChatReply {
            text: out.text,
            conversation_id: out.response_id,
        })
    }
}

#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub model: String,
    pub openai_key: Option<String>,
    pub anthropic_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout: Duration,
}

impl BackendSettings {
    pub fn from_env(model: &str, base_url: Option<String>, timeout: Duration) -> Self {
        Self {
            model: model.to_string(),
            openai_key: std::env::var("OPENAI_API_KEY").ok(),
            anthropic_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            base_url,
            timeout,
        }
    }
}

/// Picks the backend variant by model name. An error means the backend is
/// not initialized; callers heal with `None` and every suggestion is empty.
pub fn select_backend(s: &BackendSettings) -> Result<Arc<dyn ChatBackend>, String> {
    let model = resolve_model(&s.model);
    let provider = Provider::for_model(&model);

    let api_key = match provider {
        Provider::OpenAI => s.openai_key.clone(),
        Provider::Anthropic => s.anthropic_key.clone(),
    }
    .unwrap_or_default();

    let client = LlmClient::new(
        ProviderConfig {
            provider,
            model,
            api_key,
            base_url: s.base_url.clone(),
        },
        s.timeout,
    )?;

    Ok(Arc::new(client))
}
