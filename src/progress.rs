//! Progress-callback trait for per-stage extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to observe the
//! pipeline as it moves from stage to stage. The CLI uses this to drive its
//! spinner; a server could forward events to a websocket.
//!
//! # Example
//!
//! ```rust
//! use cardreader::{ExtractionConfig, ExtractionProgressCallback, Stage};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     done: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for CountingCallback {
//!     fn on_stage_complete(&self, _stage: Stage, _elapsed_ms: u64) {
//!         self.done.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let cb = Arc::new(CountingCallback { done: AtomicUsize::new(0) });
//! let config = ExtractionConfig::builder()
//!     .progress_callback(cb as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::error::CardReaderError;
use crate::output::Degradation;
use std::fmt;
use std::sync::Arc;

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Load,
    Rectify,
    Enhance,
    Recognize,
    Extract,
    Select,
    Reconcile,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Load,
        Stage::Rectify,
        Stage::Enhance,
        Stage::Recognize,
        Stage::Extract,
        Stage::Select,
        Stage::Reconcile,
    ];

    /// 1-based position, handy for "step n/7" displays.
    pub fn ordinal(self) -> usize {
        Stage::ALL.iter().position(|s| *s == self).map_or(0, |i| i + 1)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Load => "loading image",
            Stage::Rectify => "rectifying card",
            Stage::Enhance => "building variants",
            Stage::Recognize => "recognizing text",
            Stage::Extract => "extracting candidates",
            Stage::Select => "selecting owner/company",
            Stage::Reconcile => "reconciling with AI",
        };
        f.write_str(s)
    }
}

/// Called by the pipeline as it runs each stage.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Stages run strictly in sequence per call, but one
/// callback may be shared by concurrent calls (e.g. in the HTTP server), so
/// implementations must be `Send + Sync`.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called just before a stage begins.
    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called when a stage finished, degraded or not.
    fn on_stage_complete(&self, stage: Stage, elapsed_ms: u64) {
        let _ = (stage, elapsed_ms);
    }

    /// Called when a stage fell back to its default value.
    fn on_stage_degraded(&self, stage: Stage, reason: &Degradation) {
        let _ = (stage, reason);
    }

    /// Called once with the final verdict of the run.
    fn on_extraction_complete(&self, reconciled: bool, total_ms: u64) {
        let _ = (reconciled, total_ms);
    }

    /// Called instead of `on_extraction_complete` when a fatal error ends the run.
    fn on_extraction_failed(&self, error: &CardReaderError) {
        let _ = error;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl ExtractionProgressCallback for Recorder {
        fn on_stage_start(&self, stage: Stage) {
            self.events.lock().unwrap().push(format!("start {stage:?}"));
        }

        fn on_stage_degraded(&self, stage: Stage, reason: &Degradation) {
            self.events
                .lock()
                .unwrap()
                .push(format!("degraded {stage:?} {reason}"));
        }

        fn on_extraction_complete(&self, reconciled: bool, _total_ms: u64) {
            self.events.lock().unwrap().push(format!("done {reconciled}"));
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_stage_start(Stage::Load);
        cb.on_stage_complete(Stage::Load, 3);
        cb.on_stage_degraded(Stage::Rectify, &Degradation::NoQuadrilateral);
        cb.on_extraction_complete(false, 10);
        cb.on_extraction_failed(&CardReaderError::Internal("boom".into()));
    }

    #[test]
    fn recorder_receives_events_in_order() {
        let rec = Recorder::default();
        let cb: &dyn ExtractionProgressCallback = &rec;
        cb.on_stage_start(Stage::Rectify);
        cb.on_stage_degraded(Stage::Rectify, &Degradation::NoQuadrilateral);
        cb.on_stage_complete(Stage::Rectify, 1);
        cb.on_extraction_complete(true, 5);

        let events = rec.events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], "start Rectify");
        assert!(events[1].starts_with("degraded Rectify"));
        assert_eq!(events[2], "done true");
    }

    #[test]
    fn stage_ordinals_follow_execution_order() {
        assert_eq!(Stage::Load.ordinal(), 1);
        assert_eq!(Stage::Reconcile.ordinal(), 7);
        assert_eq!(Stage::Recognize.to_string(), "recognizing text");
    }
}
