//! Vision-model interaction: one prompt plus one image in, generated text out.
//!
//! [`VisionModel`] is the seam the reconciliation stage talks to. The
//! production implementation, [`LlmVisionModel`], wraps any
//! `edgequake_llm` provider; tests substitute scripted or failing models.
//! No retries happen here: a failed call is a single fallback trigger.

use crate::error::ReconcileError;
use crate::prompts::SYSTEM_PROMPT;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// "Given a prompt and an image, return generated text."
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn generate(&self, prompt: &str, image: ImageData) -> Result<String, ReconcileError>;

    /// Short label for logs.
    fn label(&self) -> String {
        "vision-model".to_string()
    }
}

/// [`VisionModel`] backed by an `edgequake_llm` provider.
pub struct LlmVisionModel {
    provider: Arc<dyn LLMProvider>,
    label: String,
    temperature: f32,
    max_tokens: usize,
}

impl LlmVisionModel {
    pub fn new(provider: Arc<dyn LLMProvider>, temperature: f32, max_tokens: usize) -> Self {
        Self {
            provider,
            label: "llm".to_string(),
            temperature,
            max_tokens,
        }
    }

    /// Name shown in logs, e.g. `"gemini/gemini-2.0-flash"`.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl VisionModel for LlmVisionModel {
    /// ## Message Layout
    ///
    /// 1. **System message**: the parser persona ([`SYSTEM_PROMPT`])
    /// 2. **User message**: the reconciliation prompt with the card photo attached
    async fn generate(&self, prompt: &str, image: ImageData) -> Result<String, ReconcileError> {
        let start = Instant::now();
        let messages = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user_with_images(prompt, vec![image]),
        ];
        let options = self.options();

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| ReconcileError::ModelFailed {
                detail: e.to_string(),
            })?;

        debug!(
            "Reconcile: {} input tokens, {} output tokens, {:?}",
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        if response.content.trim().is_empty() {
            return Err(ReconcileError::EmptyResponse);
        }
        Ok(response.content)
    }

    fn label(&self) -> String {
        self.label.clone()
    }
}

// ── Scripted model (always available, used for tests) ───────────────────────

/// Returns a preset answer (or error) for every call, ignoring the input.
pub struct ScriptedVisionModel {
    answer: Result<String, ReconcileError>,
}

impl ScriptedVisionModel {
    pub fn answering(text: impl Into<String>) -> Self {
        Self {
            answer: Ok(text.into()),
        }
    }

    pub fn failing(err: ReconcileError) -> Self {
        Self { answer: Err(err) }
    }
}

#[async_trait]
impl VisionModel for ScriptedVisionModel {
    async fn generate(&self, _prompt: &str, _image: ImageData) -> Result<String, ReconcileError> {
        self.answer.clone()
    }

    fn label(&self) -> String {
        "scripted".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl VisionModel for Echo {
        async fn generate(&self, prompt: &str, image: ImageData) -> Result<String, ReconcileError> {
            Ok(format!("{prompt}|{}", image.mime_type))
        }
    }

    #[tokio::test]
    async fn trait_objects_are_usable() {
        let model: Arc<dyn VisionModel> = Arc::new(Echo);
        let out = model
            .generate("hi", ImageData::new("AAAA".to_string(), "image/png"))
            .await
            .unwrap();
        assert_eq!(out, "hi|image/png");
        assert_eq!(model.label(), "vision-model");
    }
}
