//! Generation provider implementations.
//!
//! [`OpenAIGenerator`] calls an OpenAI-compatible
//! `POST {base_url}/chat/completions` endpoint with a single user message
//! and returns `choices[0].message.content`.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use papertrail_core::error::CapabilityError;
use papertrail_core::generation::Generator;
use serde::Deserialize;

use crate::config::{GenerationConfig, RetryConfig};
use crate::http::{build_client, check_status, classify_error};
use crate::retry::{RetryPolicy, RetryingGenerator};

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &str) -> Result<String, CapabilityError> {
        Err(CapabilityError::Disabled(
            "generation provider is disabled; set [generation] provider in config".to_string(),
        ))
    }
}

pub struct OpenAIGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for OpenAI provider"))?;
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            anyhow::anyhow!("{} environment variable not set", config.api_key_env)
        })?;

        Ok(Self {
            client: build_client(config.timeout_secs)?,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

fn first_content(response: ChatResponse) -> Result<String, CapabilityError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| CapabilityError::InvalidResponse("completion has no content".to_string()))
}

#[async_trait]
impl Generator for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, CapabilityError> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(classify_error)?;
        let response = check_status(response).await?;
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::InvalidResponse(e.to_string()))?;
        first_content(parsed)
    }
}

/// Build the configured generator, wrapped in the retry policy.
pub fn create_generator(
    config: &GenerationConfig,
    retry: &RetryConfig,
) -> Result<Arc<dyn Generator>> {
    let inner: Arc<dyn Generator> = match config.provider.as_str() {
        "disabled" => Arc::new(DisabledGenerator),
        "openai" => Arc::new(OpenAIGenerator::new(config)?),
        other => bail!("Unknown generation provider: {}", other),
    };
    Ok(Arc::new(RetryingGenerator::new(
        inner,
        RetryPolicy::from_config(retry),
    )))
}
