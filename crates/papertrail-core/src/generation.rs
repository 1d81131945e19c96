//! Text generation capability trait.

use async_trait::async_trait;

use crate::error::CapabilityError;

/// Opaque `generate(prompt) -> text` capability backed by an LLM.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Model identifier (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;
    /// Produce a completion for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<String, CapabilityError>;
}
