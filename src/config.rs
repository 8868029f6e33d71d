//! Configuration types for business-card extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. One struct holds every knob so a
//! config can be shared across requests and logged as a whole.

use crate::error::CardReaderError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for one pipeline context.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use cardreader::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .working_height(600)
///     .ai_enabled(false)
///     .build()
///     .unwrap();
/// assert_eq!(config.working_height, 600);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Height the rectifier downscales to before edge detection. Range:
    /// 100–2000. Default: 500.
    ///
    /// Contour search cost grows with pixel count; 500 px keeps a phone photo
    /// under a quarter megapixel while a card still spans hundreds of pixels.
    pub working_height: u32,

    /// How many of the largest contours are tried as the card boundary. Default: 5.
    pub max_candidate_contours: usize,

    /// Tesseract language code(s), e.g. "eng" or "eng+hin". Default: "eng".
    pub ocr_language: String,

    /// Path to the `tesseract` executable. If None, resolved on `PATH`.
    pub tesseract_cmd: Option<PathBuf>,

    /// Directory holding `*.traineddata`. If None, Tesseract's own default.
    pub tessdata_dir: Option<PathBuf>,

    /// Run the AI reconciliation stage when a model is available. Default: true.
    pub ai_enabled: bool,

    /// LLM provider name (e.g. "gemini", "openai", "ollama").
    /// If None along with `provider`, the environment is consulted.
    pub provider_name: Option<String>,

    /// LLM model identifier, e.g. "gemini-2.0-flash", "gpt-4.1-nano".
    pub model: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for the reconciliation call. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the model may generate. Default: 1024.
    ///
    /// The answer is a five-key JSON object; 1024 leaves room for long
    /// addresses without letting a confused model ramble.
    pub max_tokens: usize,

    /// Longest edge, in pixels, of the image sent to the model. Default: 2000.
    pub max_image_pixels: u32,

    /// Per-call timeout for the reconciliation request in seconds.
    /// Default: None (wait for the provider). An elapsed timeout is treated
    /// like any other reconciliation failure and is never retried.
    pub api_timeout_secs: Option<u64>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Optional observer for stage events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            working_height: 500,
            max_candidate_contours: 5,
            ocr_language: "eng".to_string(),
            tesseract_cmd: None,
            tessdata_dir: None,
            ai_enabled: true,
            provider_name: None,
            model: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 1024,
            max_image_pixels: 2000,
            api_timeout_secs: None,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("working_height", &self.working_height)
            .field("max_candidate_contours", &self.max_candidate_contours)
            .field("ocr_language", &self.ocr_language)
            .field("tesseract_cmd", &self.tesseract_cmd)
            .field("tessdata_dir", &self.tessdata_dir)
            .field("ai_enabled", &self.ai_enabled)
            .field("provider_name", &self.provider_name)
            .field("model", &self.model)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_image_pixels", &self.max_image_pixels)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ExtractionProgressCallback>"),
            )
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn working_height(mut self, px: u32) -> Self {
        self.config.working_height = px;
        self
    }

    pub fn max_candidate_contours(mut self, n: usize) -> Self {
        self.config.max_candidate_contours = n;
        self
    }

    pub fn ocr_language(mut self, lang: impl Into<String>) -> Self {
        self.config.ocr_language = lang.into();
        self
    }

    pub fn tesseract_cmd(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.tesseract_cmd = Some(path.into());
        self
    }

    pub fn tessdata_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.tessdata_dir = Some(path.into());
        self
    }

    pub fn ai_enabled(mut self, v: bool) -> Self {
        self.config.ai_enabled = v;
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_image_pixels(mut self, px: u32) -> Self {
        self.config.max_image_pixels = px.max(100);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = Some(secs);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, CardReaderError> {
        let c = &self.config;
        if !(100..=2000).contains(&c.working_height) {
            return Err(CardReaderError::InvalidConfig(format!(
                "working height must be 100–2000, got {}",
                c.working_height
            )));
        }
        if c.max_candidate_contours == 0 {
            return Err(CardReaderError::InvalidConfig(
                "max_candidate_contours must be ≥ 1".into(),
            ));
        }
        if c.ocr_language.trim().is_empty() {
            return Err(CardReaderError::InvalidConfig(
                "OCR language must not be empty".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(CardReaderError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if c.api_timeout_secs == Some(0) {
            return Err(CardReaderError::InvalidConfig(
                "api_timeout_secs must be ≥ 1 when set".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = ExtractionConfig::default();
        assert_eq!(c.working_height, 500);
        assert_eq!(c.max_candidate_contours, 5);
        assert_eq!(c.ocr_language, "eng");
        assert!(c.ai_enabled);
        assert!(c.api_timeout_secs.is_none());
        assert!((c.temperature - 0.1).abs() < f32::EPSILON);
    }

    #[test]
    fn build_rejects_out_of_range_height() {
        let err = ExtractionConfig::builder().working_height(50).build().unwrap_err();
        assert!(matches!(err, CardReaderError::InvalidConfig(_)));
        assert!(ExtractionConfig::builder().working_height(2000).build().is_ok());
    }

    #[test]
    fn build_rejects_zero_contours_and_empty_language() {
        assert!(ExtractionConfig::builder().max_candidate_contours(0).build().is_err());
        assert!(ExtractionConfig::builder().ocr_language("  ").build().is_err());
    }

    #[test]
    fn temperature_is_clamped() {
        let c = ExtractionConfig::builder().temperature(5.0).build().unwrap();
        assert_eq!(c.temperature, 2.0);
    }

    #[test]
    fn debug_hides_provider() {
        let c = ExtractionConfig::builder().model("gemini-2.0-flash").build().unwrap();
        let s = format!("{c:?}");
        assert!(s.contains("gemini-2.0-flash"));
        assert!(s.contains("provider: None"));
    }
}
