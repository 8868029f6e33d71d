//! Error types for the cardreader library.
//!
//! Three tiers reflect three distinct failure modes:
//!
//! * [`CardReaderError`] — **Fatal**: the pipeline cannot produce a record at
//!   all (missing file, undecodable image, OCR engine not installed). The
//!   outermost entry point [`crate::extract::extract_card`] turns these into
//!   the `"Error: <message>"` sentinel instead of propagating them.
//!
//! * [`ReconcileError`] — **Non-fatal**: the AI reconciliation pass failed.
//!   The orchestrator always falls back to the heuristic record.
//!
//! * [`OcrError`] / [`StorageError`] — collaborator failures, wrapped into the
//!   fatal tier (OCR) or reported by the storage caller (CSV store).

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the cardreader pipeline.
#[derive(Debug, Error)]
pub enum CardReaderError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Image file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The bytes were read but could not be decoded as a raster image.
    #[error("'{source_name}' is not a decodable image: {detail}")]
    NotAnImage { source_name: String, detail: String },

    // ── Recognition errors ────────────────────────────────────────────────
    /// The OCR engine failed outright (not merely an empty pass).
    #[error("Text recognition failed on pass {pass}: {source}")]
    Recognition {
        pass: usize,
        #[source]
        source: OcrError,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (task panic, runtime creation, …).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal failure of the AI reconciliation stage.
///
/// Every variant leads to the same outcome: the heuristic record is returned
/// unmodified. The variant only matters for logging.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ReconcileError {
    /// No vision model is configured (missing credential or `--no-ai`).
    #[error("AI reconciliation unavailable: {reason}")]
    Unavailable { reason: String },

    /// The provider call returned an error.
    #[error("Vision model call failed: {detail}")]
    ModelFailed { detail: String },

    /// The provider call exceeded `api_timeout_secs`.
    #[error("Vision model call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The image could not be encoded for the request.
    #[error("Failed to encode card image: {detail}")]
    ImageEncoding { detail: String },

    /// The model answered with nothing usable.
    #[error("Vision model returned an empty response")]
    EmptyResponse,

    /// The response body was not the expected JSON object.
    #[error("Malformed reconciliation JSON: {detail}")]
    MalformedResponse { detail: String },
}

/// Failure of a text-recognition backend.
#[derive(Debug, Error)]
pub enum OcrError {
    /// The engine binary or library could not be located.
    #[error("OCR engine not available: {0}")]
    EngineMissing(String),

    /// The engine ran but reported an error.
    #[error("OCR engine error: {0}")]
    Engine(String),

    /// The variant image could not be handed to the engine.
    #[error("Failed to prepare image for OCR: {0}")]
    ImageEncode(String),
}

/// Failure of the tabular store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed table '{path}': {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognition_error_names_the_pass() {
        let e = CardReaderError::Recognition {
            pass: 2,
            source: OcrError::EngineMissing("tesseract".into()),
        };
        let msg = e.to_string();
        assert!(msg.contains("pass 2"), "got: {msg}");
        assert!(msg.contains("tesseract"), "got: {msg}");
    }

    #[test]
    fn timeout_display() {
        let e = ReconcileError::Timeout { secs: 30 };
        assert!(e.to_string().contains("30s"));
    }

    #[test]
    fn not_an_image_display() {
        let e = CardReaderError::NotAnImage {
            source_name: "card.txt".into(),
            detail: "unsupported format".into(),
        };
        assert!(e.to_string().contains("card.txt"));
        assert!(e.to_string().contains("unsupported format"));
    }
}
