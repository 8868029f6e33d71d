//! Process-wide pipeline context.
//!
//! A [`PipelineContext`] is built once at startup and passed to every
//! extraction call. It owns the collaborators: the OCR backend, the entity
//! recogniser and the optional vision model. Everything is behind `Arc`, so
//! cloning is cheap and one context can serve concurrent HTTP requests.
//!
//! ```rust,no_run
//! use cardreader::{ExtractionConfig, PipelineContext};
//!
//! let config = ExtractionConfig::builder().ai_enabled(false).build().unwrap();
//! let ctx = PipelineContext::from_config(config);
//! assert!(!ctx.ai_available());
//! ```

use crate::config::ExtractionConfig;
use crate::error::ReconcileError;
use crate::pipeline::entities::{EntityRecognizer, HeuristicNer};
use crate::pipeline::llm::{LlmVisionModel, VisionModel};
use crate::pipeline::recognize::{OcrBackend, TesseractCli};
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Default model when only `GEMINI_API_KEY` is configured.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

/// Shared collaborators for every pipeline run.
#[derive(Clone)]
pub struct PipelineContext {
    config: Arc<ExtractionConfig>,
    ocr: Arc<dyn OcrBackend>,
    ner: Arc<dyn EntityRecognizer>,
    vision: Option<Arc<dyn VisionModel>>,
    /// Why `vision` is `None`, for logs and the CLI banner.
    vision_unavailable: Option<String>,
}

impl fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineContext")
            .field("config", &self.config)
            .field("ocr", &self.ocr.name())
            .field("vision", &self.vision.as_ref().map(|v| v.label()))
            .field("vision_unavailable", &self.vision_unavailable)
            .finish()
    }
}

impl PipelineContext {
    /// Build a context with the default collaborators for `config`.
    pub fn from_config(config: ExtractionConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: ExtractionConfig) -> PipelineContextBuilder {
        PipelineContextBuilder {
            config,
            ocr: None,
            ner: None,
            vision: VisionChoice::Resolve,
        }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    pub fn ocr(&self) -> &Arc<dyn OcrBackend> {
        &self.ocr
    }

    pub fn entity_recognizer(&self) -> &Arc<dyn EntityRecognizer> {
        &self.ner
    }

    pub fn vision_model(&self) -> Option<&Arc<dyn VisionModel>> {
        self.vision.as_ref()
    }

    /// Whether the reconciliation stage has a model to call.
    pub fn ai_available(&self) -> bool {
        self.vision.is_some()
    }

    pub fn vision_unavailable_reason(&self) -> Option<&str> {
        self.vision_unavailable.as_deref()
    }
}

enum VisionChoice {
    Resolve,
    Given(Arc<dyn VisionModel>),
    Disabled,
}

/// Builder for [`PipelineContext`]; unset collaborators get defaults.
pub struct PipelineContextBuilder {
    config: ExtractionConfig,
    ocr: Option<Arc<dyn OcrBackend>>,
    ner: Option<Arc<dyn EntityRecognizer>>,
    vision: VisionChoice,
}

impl PipelineContextBuilder {
    pub fn ocr_backend(mut self, backend: Arc<dyn OcrBackend>) -> Self {
        self.ocr = Some(backend);
        self
    }

    pub fn entity_recognizer(mut self, ner: Arc<dyn EntityRecognizer>) -> Self {
        self.ner = Some(ner);
        self
    }

    pub fn vision_model(mut self, model: Arc<dyn VisionModel>) -> Self {
        self.vision = VisionChoice::Given(model);
        self
    }

    /// Run without the reconciliation stage.
    pub fn without_vision(mut self) -> Self {
        self.vision = VisionChoice::Disabled;
        self
    }

    pub fn build(self) -> PipelineContext {
        let ocr = self.ocr.unwrap_or_else(|| default_ocr_backend(&self.config));
        let ner = self.ner.unwrap_or_else(|| Arc::new(HeuristicNer));

        let (vision, vision_unavailable) = match self.vision {
            VisionChoice::Given(model) => (Some(model), None),
            VisionChoice::Disabled => (None, Some("disabled by caller".to_string())),
            VisionChoice::Resolve if !self.config.ai_enabled => {
                (None, Some("AI reconciliation disabled".to_string()))
            }
            VisionChoice::Resolve => match resolve_vision_model(&self.config) {
                Ok(model) => {
                    info!("AI reconciliation via {}", model.label());
                    (Some(model), None)
                }
                Err(e) => {
                    warn!("{e}; continuing with heuristics only");
                    (None, Some(e.to_string()))
                }
            },
        };

        PipelineContext {
            config: Arc::new(self.config),
            ocr,
            ner,
            vision,
            vision_unavailable,
        }
    }
}

#[cfg(not(feature = "leptess"))]
fn default_ocr_backend(config: &ExtractionConfig) -> Arc<dyn OcrBackend> {
    let mut cli = TesseractCli::new(config.ocr_language.clone());
    if let Some(cmd) = &config.tesseract_cmd {
        cli = cli.with_command(cmd);
    }
    if let Some(dir) = &config.tessdata_dir {
        cli = cli.with_tessdata_dir(dir);
    }
    Arc::new(cli)
}

#[cfg(feature = "leptess")]
fn default_ocr_backend(config: &ExtractionConfig) -> Arc<dyn OcrBackend> {
    use crate::pipeline::recognize::LeptessRecognizer;
    // An explicit binary path means the caller wants the CLI engine.
    if config.tesseract_cmd.is_some() {
        let mut cli = TesseractCli::new(config.ocr_language.clone());
        if let Some(cmd) = &config.tesseract_cmd {
            cli = cli.with_command(cmd);
        }
        if let Some(dir) = &config.tessdata_dir {
            cli = cli.with_tessdata_dir(dir);
        }
        return Arc::new(cli);
    }
    let data_path = config
        .tessdata_dir
        .as_ref()
        .map(|p| p.display().to_string());
    Arc::new(LeptessRecognizer::new(data_path, config.ocr_language.clone()))
}

fn resolve_vision_model(config: &ExtractionConfig) -> Result<Arc<dyn VisionModel>, ReconcileError> {
    let (provider, label) = resolve_provider(config)?;
    Ok(Arc::new(
        LlmVisionModel::new(provider, config.temperature, config.max_tokens).with_label(label),
    ))
}

fn default_model(provider: &str) -> &'static str {
    match provider {
        "gemini" => DEFAULT_GEMINI_MODEL,
        "anthropic" => "claude-sonnet-4-20250514",
        "ollama" => "llava",
        _ => "gpt-4.1-nano",
    }
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<(Arc<dyn LLMProvider>, String), ReconcileError> {
    let provider = ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ReconcileError::Unavailable {
            reason: format!("provider '{provider_name}' not configured: {e}"),
        }
    })?;
    Ok((provider, format!("{provider_name}/{model}")))
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`); the factory reads
///    the matching API key from the environment.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **`GEMINI_API_KEY`**, the card reader's historical default.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
fn resolve_provider(
    config: &ExtractionConfig,
) -> Result<(Arc<dyn LLMProvider>, String), ReconcileError> {
    if let Some(ref provider) = config.provider {
        return Ok((Arc::clone(provider), "custom".to_string()));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or_else(|| default_model(name));
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(key) = std::env::var("GEMINI_API_KEY") {
        if !key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_GEMINI_MODEL);
            return create_vision_provider("gemini", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ReconcileError::Unavailable {
            reason: format!(
                "no LLM provider could be detected (set GEMINI_API_KEY or \
                 EDGEQUAKE_LLM_PROVIDER + EDGEQUAKE_MODEL): {e}"
            ),
        })?;
    Ok((llm_provider, "auto".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::entities::NoopNer;
    use crate::pipeline::llm::ScriptedVisionModel;
    use crate::pipeline::recognize::ScriptedRecognizer;

    #[test]
    fn ai_disabled_config_has_no_model() {
        let config = ExtractionConfig::builder().ai_enabled(false).build().unwrap();
        let ctx = PipelineContext::from_config(config);
        assert!(!ctx.ai_available());
        assert_eq!(ctx.vision_unavailable_reason(), Some("AI reconciliation disabled"));
        #[cfg(not(feature = "leptess"))]
        assert_eq!(ctx.ocr().name(), "tesseract-cli");
    }

    #[test]
    fn injected_collaborators_are_used() {
        let ctx = PipelineContext::builder(ExtractionConfig::default())
            .ocr_backend(Arc::new(ScriptedRecognizer::uniform("x")))
            .entity_recognizer(Arc::new(NoopNer))
            .vision_model(Arc::new(ScriptedVisionModel::answering("{}")))
            .build();
        assert!(ctx.ai_available());
        assert_eq!(ctx.ocr().name(), "scripted");
        assert_eq!(ctx.vision_model().map(|m| m.label()), Some("scripted".into()));
    }

    #[test]
    fn without_vision_overrides_config() {
        let ctx = PipelineContext::builder(ExtractionConfig::default())
            .without_vision()
            .build();
        assert!(!ctx.ai_available());
    }

    #[test]
    fn context_is_send_sync_and_cheap_to_clone() {
        fn assert_send_sync<T: Send + Sync + Clone>() {}
        assert_send_sync::<PipelineContext>();
    }

    #[test]
    fn default_models_per_provider() {
        assert_eq!(default_model("gemini"), "gemini-2.0-flash");
        assert_eq!(default_model("openai"), "gpt-4.1-nano");
    }
}
