//! Multi-pass text recognition over the enhanced variants.
//!
//! Each variant is recognised independently; the page segmentation mode is
//! picked from the variant's position. Non-empty passes are concatenated
//! into one labelled corpus, in variant order:
//!
//! ```text
//! --- PASS 1 ---
//! <standard text>
//!
//!
//! --- PASS 3 ---
//! <dilated text>
//! ```
//!
//! Backends implement [`OcrBackend`]. The default shells out to the
//! `tesseract` binary; an in-process libtesseract backend is available behind
//! the `leptess` feature, and [`ScriptedRecognizer`] serves tests.

use crate::error::{CardReaderError, OcrError};
use crate::pipeline::enhance::Variant;
use image::GrayImage;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

/// Tesseract page segmentation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSegMode {
    /// Fully automatic page segmentation (PSM 3).
    Auto,
    /// Sparse text in no particular order (PSM 11).
    SparseText,
}

impl PageSegMode {
    /// Mode for the variant at `index`: sparse text for the dilated variant,
    /// automatic layout for the rest.
    pub fn for_variant(index: usize) -> Self {
        if index == 2 {
            PageSegMode::SparseText
        } else {
            PageSegMode::Auto
        }
    }

    pub fn as_psm(self) -> u32 {
        match self {
            PageSegMode::Auto => 3,
            PageSegMode::SparseText => 11,
        }
    }
}

/// Abstraction over a text-recognition engine.
///
/// Implementations are called from a blocking thread, one variant at a time.
pub trait OcrBackend: Send + Sync {
    fn recognize(&self, image: &GrayImage, mode: PageSegMode) -> Result<String, OcrError>;

    /// Short name for logs.
    fn name(&self) -> &str {
        "ocr"
    }
}

/// Text produced by one recognition pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassResult {
    /// Variant index the pass ran over.
    pub index: usize,
    pub mode: PageSegMode,
    pub text: String,
}

/// Run `backend` over every variant in order.
///
/// An engine failure aborts the run; an empty pass does not.
pub fn recognize_variants(
    backend: &dyn OcrBackend,
    variants: &[Variant],
) -> Result<Vec<PassResult>, CardReaderError> {
    let mut passes = Vec::with_capacity(variants.len());
    for variant in variants {
        let mode = PageSegMode::for_variant(variant.index);
        let text = backend
            .recognize(&variant.image, mode)
            .map_err(|source| CardReaderError::Recognition {
                pass: variant.index + 1,
                source,
            })?;
        debug!(
            "Recognize: pass {} ({:?}, psm {}) via {} → {} chars",
            variant.index + 1,
            variant.kind,
            mode.as_psm(),
            backend.name(),
            text.trim().len()
        );
        passes.push(PassResult {
            index: variant.index,
            mode,
            text,
        });
    }
    Ok(passes)
}

/// Concatenate non-empty passes under `--- PASS n ---` headers (1-based).
pub fn build_corpus(passes: &[PassResult]) -> String {
    let blocks: Vec<String> = passes
        .iter()
        .filter(|p| !p.text.trim().is_empty())
        .map(|p| format!("--- PASS {} ---\n{}\n", p.index + 1, p.text.trim()))
        .collect();
    if blocks.len() < passes.len() {
        debug!("Recognize: {} empty pass(es) omitted", passes.len() - blocks.len());
    }
    blocks.join("\n\n").trim().to_string()
}

// ── Tesseract CLI backend (default) ──────────────────────────────────────────

/// Runs `tesseract <png> stdout -l <lang> --oem 3 --psm <n>` per pass.
#[derive(Debug, Clone)]
pub struct TesseractCli {
    cmd: PathBuf,
    language: String,
    tessdata_dir: Option<PathBuf>,
}

impl TesseractCli {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            cmd: PathBuf::from("tesseract"),
            language: language.into(),
            tessdata_dir: None,
        }
    }

    pub fn with_command(mut self, cmd: impl Into<PathBuf>) -> Self {
        self.cmd = cmd.into();
        self
    }

    pub fn with_tessdata_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tessdata_dir = Some(dir.into());
        self
    }

    fn command_args(&self, image_path: &std::path::Path, mode: PageSegMode) -> Vec<String> {
        let mut args = vec![
            image_path.display().to_string(),
            "stdout".to_string(),
            "-l".to_string(),
            self.language.clone(),
            "--oem".to_string(),
            "3".to_string(),
            "--psm".to_string(),
            mode.as_psm().to_string(),
        ];
        if let Some(dir) = &self.tessdata_dir {
            args.push("--tessdata-dir".to_string());
            args.push(dir.display().to_string());
        }
        args
    }
}

impl OcrBackend for TesseractCli {
    fn recognize(&self, image: &GrayImage, mode: PageSegMode) -> Result<String, OcrError> {
        let mut tmp = tempfile::Builder::new()
            .prefix("cardreader-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| OcrError::ImageEncode(e.to_string()))?;
        image
            .write_to(&mut tmp, image::ImageFormat::Png)
            .map_err(|e| OcrError::ImageEncode(e.to_string()))?;
        tmp.flush().map_err(|e| OcrError::ImageEncode(e.to_string()))?;

        let output = Command::new(&self.cmd)
            .args(self.command_args(tmp.path(), mode))
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    OcrError::EngineMissing(format!(
                        "'{}' not found; install Tesseract or set --tesseract-cmd",
                        self.cmd.display()
                    ))
                } else {
                    OcrError::Engine(e.to_string())
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Engine(format!("tesseract failed: {}", stderr.trim())));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn name(&self) -> &str {
        "tesseract-cli"
    }
}

// ── In-process backend (optional, gated behind `leptess` feature) ───────────

#[cfg(feature = "leptess")]
pub use leptess_backend::LeptessRecognizer;

#[cfg(feature = "leptess")]
mod leptess_backend {
    use super::{OcrBackend, OcrError, PageSegMode};
    use image::GrayImage;
    use leptess::{LepTess, Variable};

    /// libtesseract via `leptess`. A fresh engine is created per pass since
    /// `LepTess` is not `Sync`.
    pub struct LeptessRecognizer {
        data_path: Option<String>,
        language: String,
    }

    impl LeptessRecognizer {
        pub fn new(data_path: Option<String>, language: impl Into<String>) -> Self {
            Self {
                data_path,
                language: language.into(),
            }
        }
    }

    impl OcrBackend for LeptessRecognizer {
        fn recognize(&self, image: &GrayImage, mode: PageSegMode) -> Result<String, OcrError> {
            let mut lt = LepTess::new(self.data_path.as_deref(), &self.language)
                .map_err(|e| OcrError::EngineMissing(e.to_string()))?;
            lt.set_variable(Variable::TesseditPagesegMode, &mode.as_psm().to_string())
                .map_err(|e| OcrError::Engine(e.to_string()))?;

            let mut png = Vec::new();
            image
                .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
                .map_err(|e| OcrError::ImageEncode(e.to_string()))?;
            lt.set_image_from_mem(&png)
                .map_err(|e| OcrError::ImageEncode(e.to_string()))?;
            lt.set_source_resolution(300);
            lt.get_utf8_text().map_err(|e| OcrError::Engine(e.to_string()))
        }

        fn name(&self) -> &str {
            "leptess"
        }
    }
}

// ── Scripted backend (always available, used for tests) ─────────────────────

/// Returns preset text for successive passes, ignoring the image.
///
/// Pass `n` of every run gets `script[n % script.len()]`, so one recogniser
/// can serve repeated pipeline runs. An entry of `Err` simulates an engine
/// failure on that pass.
pub struct ScriptedRecognizer {
    script: Vec<Result<String, String>>,
    calls: AtomicUsize,
}

impl ScriptedRecognizer {
    /// One entry per variant, in variant order.
    pub fn new<S: Into<String>>(passes: impl IntoIterator<Item = S>) -> Self {
        Self {
            script: passes.into_iter().map(|s| Ok(s.into())).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    /// The same text for every pass.
    pub fn uniform(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new([text.clone(), text.clone(), text])
    }

    /// Every pass fails with an engine error.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            script: vec![Err(message.into())],
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of passes served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OcrBackend for ScriptedRecognizer {
    fn recognize(&self, _image: &GrayImage, _mode: PageSegMode) -> Result<String, OcrError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.script.is_empty() {
            return Ok(String::new());
        }
        match &self.script[n % self.script.len()] {
            Ok(text) => Ok(text.clone()),
            Err(msg) => {
                warn!("ScriptedRecognizer: simulated failure on call {}", n + 1);
                Err(OcrError::Engine(msg.clone()))
            }
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
