//! Embedding provider implementations.
//!
//! - **[`OpenAIEmbedder`]**: OpenAI-compatible `POST {base_url}/embeddings`.
//! - **[`HashingEmbedder`]**: deterministic offline feature hashing.
//! - **[`DisabledEmbedder`]**: fails every call; used when
//!   `embedding.provider = "disabled"`.
//!
//! Providers make a single attempt per call. Retries are layered on by
//! [`RetryingEmbedder`](crate::retry::RetryingEmbedder) in
//! [`create_embedder`].
//!
//! ```rust,no_run
//! # use papertrail::config::{EmbeddingConfig, RetryConfig};
//! # use papertrail::embedding::create_embedder;
//! # use papertrail_core::embedding::Embedder;
//! let mut config = EmbeddingConfig::default();
//! config.provider = "hashing".to_string();
//! config.dims = Some(256);
//! let embedder = create_embedder(&config, &RetryConfig::default()).unwrap();
//! assert_eq!(embedder.dims(), 256);
//! ```

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use papertrail_core::embedding::Embedder;
use papertrail_core::error::CapabilityError;
use serde::Deserialize;

pub use papertrail_core::embedding::HashingEmbedder;

use crate::config::{EmbeddingConfig, RetryConfig};
use crate::http::{build_client, check_status, classify_error};
use crate::retry::{RetryPolicy, RetryingEmbedder};

// ============ Disabled ============

pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, CapabilityError> {
        Err(CapabilityError::Disabled(
            "embedding provider is disabled; set [embedding] provider in config".to_string(),
        ))
    }
}

// ============ OpenAI ============

/// Embedder for the OpenAI embeddings API or any compatible server.
///
/// The API key is read once, at construction, from the environment
/// variable named by `embedding.api_key_env`.
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dims: usize,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            anyhow::anyhow!("{} environment variable not set", config.api_key_env)
        })?;

        Ok(Self {
            client: build_client(config.timeout_secs)?,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            api_key,
            model,
            dims,
        })
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CapabilityError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
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
        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::InvalidResponse(e.to_string()))?;

        order_embeddings(parsed.data, texts.len(), self.dims)
    }
}

/// Sort by `index` and check count, dimensionality and finiteness.
fn order_embeddings(
    mut data: Vec<EmbeddingItem>,
    expected: usize,
    dims: usize,
) -> Result<Vec<Vec<f32>>, CapabilityError> {
    if data.len() != expected {
        return Err(CapabilityError::InvalidResponse(format!(
            "expected {} embeddings, got {}",
            expected,
            data.len()
        )));
    }
    data.sort_by_key(|item| item.index);
    data.into_iter()
        .map(|item| {
            if item.embedding.len() != dims {
                Err(CapabilityError::InvalidResponse(format!(
                    "embedding has {} dimensions, configured {}",
                    item.embedding.len(),
                    dims
                )))
            } else if item.embedding.iter().any(|x| !x.is_finite()) {
                Err(CapabilityError::InvalidResponse(format!(
                    "embedding {} contains non-finite values",
                    item.index
                )))
            } else {
                Ok(item.embedding)
            }
        })
        .collect()
}

/// Build the configured embedder, wrapped in the retry policy.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"openai"` | [`OpenAIEmbedder`] |
/// | `"hashing"` | [`HashingEmbedder`] |
pub fn create_embedder(config: &EmbeddingConfig, retry: &RetryConfig) -> Result<Arc<dyn Embedder>> {
    let inner: Arc<dyn Embedder> = match config.provider.as_str() {
        "disabled" => Arc::new(DisabledEmbedder),
        "openai" => Arc::new(OpenAIEmbedder::new(config)?),
        "hashing" => {
            let dims = config
                .dims
                .ok_or_else(|| anyhow::anyhow!("embedding.dims required for hashing provider"))?;
            Arc::new(HashingEmbedder::new(dims))
        }
        other => bail!("Unknown embedding provider: {}", other),
    };
    Ok(Arc::new(RetryingEmbedder::new(
        inner,
        RetryPolicy::from_config(retry),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(index: usize, embedding: Vec<f32>) -> EmbeddingItem {
        EmbeddingItem { index, embedding }
    }

    #[test]
    fn test_order_embeddings_sorts_by_index() {
        let out = order_embeddings(
            vec![item(1, vec![2.0, 2.0]), item(0, vec![1.0, 1.0])],
            2,
            2,
        )
        .unwrap();
        assert_eq!(out, vec![vec![1.0, 1.0], vec![2.0, 2.0]]);
    }

    #[test]
    fn test_order_embeddings_rejects_count_and_dims() {
        assert!(order_embeddings(vec![item(0, vec![1.0])], 2, 1).is_err());
        assert!(order_embeddings(vec![item(0, vec![1.0, 2.0, 3.0])], 1, 2).is_err());
    }

    #[test]
    fn test_order_embeddings_rejects_non_finite() {
        let err = order_embeddings(vec![item(0, vec![f32::NAN, 1.0])], 1, 2).unwrap_err();
        assert!(matches!(err, CapabilityError::InvalidResponse(_)));
        assert!(order_embeddings(vec![item(0, vec![f32::INFINITY, 1.0])], 1, 2).is_err());
    }

    #[test]
    fn test_parse_openai_response_shape() {
        let json = r#"{"object":"list","data":[{"object":"embedding","index":0,"embedding":[0.5,-0.25]}],"model":"m"}"#;
        let parsed: EmbeddingResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.data[0].embedding, vec![0.5, -0.25]);
    }

    #[tokio::test]
    async fn test_disabled_embedder_errors() {
        let err = DisabledEmbedder.embed("x").await.unwrap_err();
        assert!(matches!(err, CapabilityError::Disabled(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_create_hashing_embedder() {
        let config = EmbeddingConfig {
            provider: "hashing".into(),
            dims: Some(32),
            ..Default::default()
        };
        let e = create_embedder(&config, &RetryConfig::default()).unwrap();
        assert_eq!(e.dims(), 32);
        assert_eq!(e.model_name(), "hashing-32");
    }

    #[test]
    fn test_openai_requires_api_key() {
        let config = EmbeddingConfig {
            provider: "openai".into(),
            model: Some("text-embedding-3-small".into()),
            dims: Some(1536),
            api_key_env: "PAPERTRAIL_TEST_KEY_THAT_IS_NEVER_SET".into(),
            ..Default::default()
        };
        let err = create_embedder(&config, &RetryConfig::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("PAPERTRAIL_TEST_KEY_THAT_IS_NEVER_SET"));
    }
}
