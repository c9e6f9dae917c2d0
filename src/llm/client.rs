// src/llm/client.rs

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::llm::prompt::LlmPrompt;

const PROMPT_ABI_VERSION: &str = "v1-locator-heal";

pub const DEFAULT_MODEL: &str = "gpt-4";
pub const DEFAULT_CLAUDE_MODEL: &str = "claude-3-5-sonnet-latest";

#[derive(Debug, Clone)]
pub struct LlmRunResult {
    pub text: String,
    pub response_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Anthropic,
}

impl Provider {
    /// `claude` and `claude-*` go to Anthropic, everything else to OpenAI.
    pub fn for_model(model: &str) -> Self {
        let m = model.trim().to_ascii_lowercase();
        if m == "claude" || m.starts_with("claude-") {
            Provider::Anthropic
        } else {
            Provider::OpenAI
        }
    }

    pub fn key_env(&self) -> &'static str {
        match self {
            Provider::OpenAI => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
        }
    }
}

/// Expands the short model names accepted on the command line.
pub fn resolve_model(name: &str) -> String {
    match name.trim() {
        "" => DEFAULT_MODEL.to_string(),
        "gpt-3" => "gpt-3.5-turbo-0613".to_string(),
        "claude" => DEFAULT_CLAUDE_MODEL.to_string(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider: Provider,
    pub model: String,
    pub api_key: String,
    pub base_url: Option<String>,
}

#[derive(Clone)]
pub struct LlmClient {
    cfg: ProviderConfig,
    http: reqwest::blocking::Client,
}

impl LlmClient {
    pub fn new(cfg: ProviderConfig, timeout: Duration) -> Result<Self, String> {
        if cfg.api_key.trim().is_empty() {
            return Err(format!("{} not set", cfg.provider.key_env()));
        }

        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| e.to_string())?;

        Ok(Self { cfg, http })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.cfg
    }

    /// Execute LLM request
    pub fn run(&self, prompt: &LlmPrompt) -> Result<LlmRunResult, String> {
        let prompt_hash = hash_prompt(prompt);
        let (url, headers, body) = build_request(&self.cfg, prompt, &prompt_hash);

        let mut req = self.http.post(url).json(&body);
        for (k, v) in headers {
            req = req.header(k, v);
        }

        let resp = req.send().map_err(|e| e.to_string())?;
        let status = resp.status();
        let json: Value = resp.json().map_err(|e| e.to_string())?;

        if !status.is_success() {
            return Err(format!("LLM error {}: {}", status, json));
        }

        let text = extract_text(&self.cfg.provider, &json)?;
        let response_id = json.get("id").and_then(Value::as_str).map(str::to_owned);

        Ok(LlmRunResult {
            text,
            response_id,
        })
    }
}

fn hash_prompt(prompt: &LlmPrompt) -> String {
    let mut h = Sha256::new();
    h.update(PROMPT_ABI_VERSION.as_bytes());
    h.update(prompt.system.as_bytes());
    h.update(prompt.user.as_bytes());
    hex::encode(h.finalize())
}

fn build_request(
    cfg: &ProviderConfig,
    prompt: &LlmPrompt,
    prompt_hash: &str,
) -> (String, Vec<(&'static str, String)>, Value) {
    match cfg.provider {
        Provider::OpenAI => {
            let url = cfg
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1/responses".into());

            let body = serde_json::json!({
                "model": cfg.model,
                "instructions": prompt.system,
                "input": prompt.user,
                "prompt_cache_key": prompt_hash,
            });

            (
                url,
                vec![("Authorization", format!("Bearer {}", cfg.api_key))],
                body,
            )
        }

        Provider::Anthropic => {
            let url = cfg
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.anthropic.com/v1/messages".into());

            let body = serde_json::json!({
                "model": cfg.model,
                "max_tokens": 1024,
                "system": prompt.system,
                "messages": [
                    { "role": "user", "content": prompt.user }
                ]
            });

            (
                url,
                vec![
                    ("x-api-key", cfg.api_key.clone()),
                    ("anthropic-version", "2023-06-01".into()),
                ],
                body,
            )
        }
    }
}

fn extract_text(provider: &Provider, v: &Value) -> Result<String, String> {
    match provider {
        Provider::OpenAI => {
            v.get("output")
                .and_then(|o| o.as_array())
                .and_then(|arr| {
                    arr.iter().find_map(|item| {
                        item.get("content")?
                            .as_array()?
                            .iter()
                            .find_map(|c| c.get("text")?.as_str())
                    })
                })
                .map(str::to_owned)
                .ok_or("OpenAI response parse failure".into())
        }

        Provider::Anthropic => {
            v.pointer("/content/0/text")
                .and_then(|v| v.as_str())
                .map(str::to_owned)
                .ok_or("Anthropic response parse failure".into())
        }
    }
}
