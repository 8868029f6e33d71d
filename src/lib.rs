//! # cardreader
//!
//! Extract structured contact records from photos of business cards.
//!
//! ## Why this crate?
//!
//! A single OCR pass over a phone photo of a card is unreliable: the card is
//! skewed, the print is small, and logos or dark backgrounds defeat
//! binarisation. This crate flattens the card first, reads it three times
//! under different enhancements, picks fields with explicit rules, and then
//! lets a vision model correct the result while looking at the photo. Every
//! stage past image decoding degrades gracefully, so a caller always gets a
//! record back.
//!
//! ## Pipeline Overview
//!
//! ```text
//! photo
//!  │
//!  ├─ 1. Input      resolve local file, URL or upload; decode once
//!  ├─ 2. Rectify    Canny + contours → 4-point warp (falls back to the photo)
//!  ├─ 3. Enhance    standard / inverted / dilated binarisations
//!  ├─ 4. Recognize  one Tesseract pass per variant → "--- PASS n ---" corpus
//!  ├─ 5. Extract    entity recognition + regex rules → candidates
//!  ├─ 6. Select     ordered rules pick owner and company
//!  └─ 7. Reconcile  vision model corrects the record (falls back to step 6)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cardreader::{extract_card, ExtractionConfig, ExtractionOutcome, PipelineContext};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Vision model auto-detected from GEMINI_API_KEY / OPENAI_API_KEY / …
//!     let ctx = PipelineContext::from_config(ExtractionConfig::default());
//!     match extract_card("card.jpg", &ctx).await {
//!         ExtractionOutcome::Record(r) => println!("{} @ {}", r.primary_owner, r.primary_company),
//!         ExtractionOutcome::Failed(msg) => eprintln!("{msg}"),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature   | Default | Description |
//! |-----------|---------|-------------|
//! | `cli`     | on      | Enables the `cardreader` binary (clap + anyhow + indicatif + tracing-subscriber) |
//! | `server`  | off     | Enables [`server`] and `cardreader serve` (axum + tower-http) |
//! | `leptess` | off     | In-process Tesseract via libtesseract instead of the `tesseract` CLI |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod context;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
#[cfg(feature = "server")]
pub mod server;
pub mod storage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder};
pub use context::{PipelineContext, PipelineContextBuilder};
pub use error::{CardReaderError, OcrError, ReconcileError, StorageError};
pub use extract::{extract_card, extract_card_sync, extract_from_bytes, extract_from_image, run_pipeline};
pub use output::{
    Degradation, ExtractionOutcome, ExtractionRecord, ExtractionReport, StageOutcome, StageTimings,
};
pub use pipeline::entities::{EntityRecognizer, HeuristicNer, NoopNer};
pub use pipeline::llm::{LlmVisionModel, ScriptedVisionModel, VisionModel};
pub use pipeline::recognize::{OcrBackend, ScriptedRecognizer, TesseractCli};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback, Stage};
pub use storage::{ContactRow, CsvStore, SaveRequest};
