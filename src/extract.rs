//! Extraction entry points.
//!
//! [`run_pipeline`] drives one card through every stage and returns the full
//! [`ExtractionReport`]. [`extract_card`] is the boundary used by the HTTP
//! layer and the CLI: it folds fatal errors into the `"Error: …"` outcome so
//! callers always get a value back.
//!
//! Stages run strictly in sequence per call. The CPU-heavy ones (rectify,
//! enhance, OCR) go through `spawn_blocking` so concurrent requests on the
//! same runtime do not stall each other.

use crate::context::PipelineContext;
use crate::error::{CardReaderError, ReconcileError};
use crate::output::{
    Degradation, ExtractionOutcome, ExtractionRecord, ExtractionReport, StageOutcome,
    StageTimings,
};
use crate::pipeline::entities::{extract_candidates, CandidateSet};
use crate::pipeline::{encode, enhance, input, recognize, reconcile, rectify, select};
use crate::progress::{ProgressCallback, Stage};
use image::DynamicImage;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Run the full pipeline on a file path or HTTP(S) URL.
///
/// # Errors
/// Only fatal failures surface here: unreadable input, undecodable image,
/// an OCR engine error or a panicked worker. Every other problem is recorded
/// as a [`Degradation`] on the report.
pub async fn run_pipeline(
    input_str: impl AsRef<str>,
    ctx: &PipelineContext,
) -> Result<ExtractionReport, CardReaderError> {
    let input_str = input_str.as_ref();
    info!("Starting extraction: {}", input_str);
    let events = Events::new(ctx.config().progress_callback.as_ref());
    let result = load_and_run(input_str, ctx, &events).await;
    events.conclude(result)
}

/// Run the pipeline on in-memory bytes (an upload or a fixture).
pub async fn extract_from_bytes(
    source_name: &str,
    bytes: &[u8],
    ctx: &PipelineContext,
) -> Result<ExtractionReport, CardReaderError> {
    let events = Events::new(ctx.config().progress_callback.as_ref());
    let started = events.start(Stage::Load);
    let loaded = match input::decode_image(source_name, bytes) {
        Ok(loaded) => loaded,
        Err(e) => return events.conclude(Err(e)),
    };
    events.complete(Stage::Load, started);

    let result = run_stages(loaded.image, ctx, &events).await;
    events.conclude(result)
}

/// Run every stage after decoding on an already-loaded card photo.
pub async fn extract_from_image(
    image: DynamicImage,
    ctx: &PipelineContext,
) -> Result<ExtractionReport, CardReaderError> {
    let events = Events::new(ctx.config().progress_callback.as_ref());
    let result = run_stages(image, ctx, &events).await;
    events.conclude(result)
}

async fn load_and_run(
    input_str: &str,
    ctx: &PipelineContext,
    events: &Events<'_>,
) -> Result<ExtractionReport, CardReaderError> {
    let started = events.start(Stage::Load);
    let loaded = input::load_input(input_str, ctx.config().download_timeout_secs).await?;
    events.complete(Stage::Load, started);
    run_stages(loaded.image, ctx, events).await
}

async fn run_stages(
    image: DynamicImage,
    ctx: &PipelineContext,
    events: &Events<'_>,
) -> Result<ExtractionReport, CardReaderError> {
    let total_start = Instant::now();
    let config = ctx.config();
    let mut timings = StageTimings::default();
    let mut degradations = Vec::new();

    // ── Step 1: Rectify ──────────────────────────────────────────────────
    let started = events.start(Stage::Rectify);
    let (working_height, max_candidates) = (config.working_height, config.max_candidate_contours);
    let original = image.clone();
    let rectified = blocking("rectify", move || {
        rectify::rectify(&image, working_height, max_candidates)
    })
    .await?;
    let card = events.settle(Stage::Rectify, rectified, &mut degradations);
    timings.rectify_ms = events.complete(Stage::Rectify, started);

    // ── Step 2: Enhance ──────────────────────────────────────────────────
    let started = events.start(Stage::Enhance);
    let variants = blocking("enhance", move || enhance::generate_variants(&card)).await?;
    timings.enhance_ms = events.complete(Stage::Enhance, started);

    // ── Step 3: Recognize ────────────────────────────────────────────────
    let started = events.start(Stage::Recognize);
    let ocr = ctx.ocr().clone();
    let passes = blocking("recognize", move || {
        recognize::recognize_variants(ocr.as_ref(), &variants)
    })
    .await??;
    let corpus = recognize::build_corpus(&passes);
    timings.recognize_ms = events.complete(Stage::Recognize, started);
    if corpus.is_empty() {
        let reason = Degradation::EmptyCorpus;
        warn!("Recognize: every OCR pass came back empty");
        events.degraded(Stage::Recognize, &reason);
        degradations.push(reason);
    }

    // ── Step 4: Extract candidates ───────────────────────────────────────
    let started = events.start(Stage::Extract);
    let candidates = extract_candidates(&corpus, ctx.entity_recognizer().as_ref());
    events.complete(Stage::Extract, started);

    // ── Step 5: Select owner / company ───────────────────────────────────
    let select_started = events.start(Stage::Select);
    let heuristic = heuristic_record(&candidates, corpus);
    events.complete(Stage::Select, select_started);
    timings.extract_ms = started.elapsed().as_millis() as u64;
    debug!(
        "Heuristic record: owner='{}', company='{}'",
        heuristic.primary_owner, heuristic.primary_company
    );

    // ── Step 6: Reconcile ────────────────────────────────────────────────
    let started = events.start(Stage::Reconcile);
    let outcome = reconcile_stage(&heuristic, &original, ctx).await;
    let reconciled = !outcome.is_degraded();
    let record = events.settle(Stage::Reconcile, outcome, &mut degradations);
    timings.reconcile_ms = events.complete(Stage::Reconcile, started);

    timings.total_ms = total_start.elapsed().as_millis() as u64;
    events.finish(reconciled, timings.total_ms);
    info!(
        "Extraction complete in {}ms (reconciled: {}, degradations: {})",
        timings.total_ms,
        reconciled,
        degradations.len()
    );

    Ok(ExtractionReport {
        record,
        reconciled,
        degradations,
        timings,
    })
}

/// Boundary wrapper: the record, or `"Error: <message>"` on fatal failure.
pub async fn extract_card(input_str: impl AsRef<str>, ctx: &PipelineContext) -> ExtractionOutcome {
    match run_pipeline(input_str, ctx).await {
        Ok(report) => ExtractionOutcome::Record(report.record),
        Err(e) => {
            warn!("Extraction failed: {e}");
            ExtractionOutcome::failed(e)
        }
    }
}

/// Blocking version of [`extract_card`] for callers without a runtime.
///
/// Must not be called from inside an async context.
pub fn extract_card_sync(input_str: impl AsRef<str>, ctx: &PipelineContext) -> ExtractionOutcome {
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            return ExtractionOutcome::failed(CardReaderError::Internal(format!(
                "failed to create tokio runtime: {e}"
            )))
        }
    };
    rt.block_on(extract_card(input_str, ctx))
}

/// Assemble the pre-reconciliation record from the candidate set.
pub fn heuristic_record(candidates: &CandidateSet, corpus: String) -> ExtractionRecord {
    ExtractionRecord {
        primary_owner: select::select_owner(candidates),
        primary_company: select::select_company(candidates),
        potential_names: candidates.persons.iter().cloned().collect(),
        company_names: candidates.orgs.iter().cloned().collect(),
        emails: candidates.emails.clone(),
        phone_numbers: candidates.phones.clone(),
        address: candidates.address.clone(),
        raw_corpus: corpus,
    }
}

async fn reconcile_stage(
    heuristic: &ExtractionRecord,
    original: &DynamicImage,
    ctx: &PipelineContext,
) -> StageOutcome<ExtractionRecord> {
    let Some(model) = ctx.vision_model() else {
        debug!(
            "Reconcile: skipped ({})",
            ctx.vision_unavailable_reason().unwrap_or("no vision model")
        );
        return StageOutcome::degraded(heuristic.clone(), Degradation::AiUnavailable);
    };

    let image = match encode::encode_card(original, ctx.config().max_image_pixels) {
        Ok(image) => image,
        Err(e) => {
            let err = ReconcileError::ImageEncoding {
                detail: e.to_string(),
            };
            warn!("Reconcile: {err}; falling back to heuristic record");
            return StageOutcome::degraded(
                heuristic.clone(),
                Degradation::ReconciliationFailed(err.to_string()),
            );
        }
    };

    reconcile::reconcile_or_fallback(
        heuristic,
        image,
        Some(model.as_ref()),
        ctx.config().api_timeout_secs,
    )
    .await
}

async fn blocking<T, F>(stage: &'static str, f: F) -> Result<T, CardReaderError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CardReaderError::Internal(format!("{stage} task panicked: {e}")))
}

/// Progress plumbing: forwards to the configured callback, if any.
struct Events<'a> {
    cb: Option<&'a ProgressCallback>,
}

impl<'a> Events<'a> {
    fn new(cb: Option<&'a ProgressCallback>) -> Self {
        Self { cb }
    }

    fn start(&self, stage: Stage) -> Instant {
        debug!("Stage {}: {}", stage.ordinal(), stage);
        if let Some(cb) = self.cb {
            cb.on_stage_start(stage);
        }
        Instant::now()
    }

    fn complete(&self, stage: Stage, started: Instant) -> u64 {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        if let Some(cb) = self.cb {
            cb.on_stage_complete(stage, elapsed_ms);
        }
        elapsed_ms
    }

    fn degraded(&self, stage: Stage, reason: &Degradation) {
        if let Some(cb) = self.cb {
            cb.on_stage_degraded(stage, reason);
        }
    }

    /// Unwrap a stage outcome, recording its degradation.
    fn settle<T>(
        &self,
        stage: Stage,
        outcome: StageOutcome<T>,
        degradations: &mut Vec<Degradation>,
    ) -> T {
        let (value, reason) = outcome.into_parts();
        if let Some(reason) = reason {
            self.degraded(stage, &reason);
            degradations.push(reason);
        }
        value
    }

    fn finish(&self, reconciled: bool, total_ms: u64) {
        if let Some(cb) = self.cb {
            cb.on_extraction_complete(reconciled, total_ms);
        }
    }

    /// Report a fatal error to the callback and pass the result through.
    fn conclude<T>(&self, result: Result<T, CardReaderError>) -> Result<T, CardReaderError> {
        if let (Err(e), Some(cb)) = (&result, self.cb) {
            cb.on_extraction_failed(e);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractionConfig;
    use crate::pipeline::entities::HeuristicNer;
    use crate::pipeline::llm::ScriptedVisionModel;
    use crate::pipeline::recognize::ScriptedRecognizer;
    use crate::progress::ExtractionProgressCallback;
    use image::{Rgb, RgbImage};
    use std::sync::{Arc, Mutex};

    const CARD_TEXT: &str = "Prop. Jane Doe\nAcme Traders Solutions\njane@acme.com\n\
                             +1 555-123-4567\n221B Baker Street";

    fn blank_card() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(120, 80, Rgb([240, 240, 240])))
    }

    fn ctx_with(ocr: ScriptedRecognizer, config: ExtractionConfig) -> PipelineContext {
        PipelineContext::builder(config)
            .ocr_backend(Arc::new(ocr))
            .without_vision()
            .build()
    }

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
            self.events
                .lock()
                .unwrap()
                .push(format!("done {reconciled}"));
        }
        fn on_extraction_failed(&self, error: &CardReaderError) {
            self.events.lock().unwrap().push(format!("failed {error}"));
        }
    }

    fn recording_config(recorder: &Arc<Recorder>) -> ExtractionConfig {
        ExtractionConfig::builder()
            .progress_callback(recorder.clone())
            .build()
            .unwrap()
    }

    #[test]
    fn heuristic_record_collects_candidates() {
        let corpus = format!("--- PASS 1 ---\n{CARD_TEXT}");
        let candidates = extract_candidates(&corpus, &HeuristicNer);
        let r = heuristic_record(&candidates, corpus.clone());
        assert_eq!(r.primary_owner, "Jane Doe");
        assert_eq!(r.primary_company, "Acme Traders Solutions");
        assert!(r.phone_numbers.contains("+15551234567"));
        assert_eq!(r.raw_corpus, corpus);
    }

    #[tokio::test]
    async fn blank_card_runs_every_stage_without_ai() {
        let ocr = ScriptedRecognizer::uniform(CARD_TEXT);
        let ctx = ctx_with(ocr, ExtractionConfig::default());
        let report = extract_from_image(blank_card(), &ctx).await.unwrap();

        assert!(!report.reconciled);
        assert!(report.degradations.contains(&Degradation::NoQuadrilateral));
        assert!(report.degradations.contains(&Degradation::AiUnavailable));
        assert_eq!(report.record.primary_owner, "Jane Doe");
        assert!(report.record.raw_corpus.contains("--- PASS 3 ---"));
    }

    #[tokio::test]
    async fn empty_corpus_is_a_degradation_not_an_error() {
        let ctx = ctx_with(ScriptedRecognizer::uniform("   "), ExtractionConfig::default());
        let report = extract_from_image(blank_card(), &ctx).await.unwrap();
        assert!(report.degradations.contains(&Degradation::EmptyCorpus));
        assert_eq!(report.record.primary_owner, "");
        assert!(report.record.emails.is_empty());
    }

    #[tokio::test]
    async fn ocr_engine_failure_is_fatal() {
        let ctx = ctx_with(ScriptedRecognizer::failing("boom"), ExtractionConfig::default());
        let err = extract_from_image(blank_card(), &ctx).await.unwrap_err();
        assert!(matches!(err, CardReaderError::Recognition { pass: 1, .. }));
    }

    #[tokio::test]
    async fn vision_model_answer_replaces_fields() {
        let model = ScriptedVisionModel::answering(
            r#"{"primary_owner":"Jane Doe","primary_company":"Acme Traders Pvt Ltd","emails":[],"phone_numbers":[],"address":"221B Baker Street, London"}"#,
        );
        let ctx = PipelineContext::builder(ExtractionConfig::default())
            .ocr_backend(Arc::new(ScriptedRecognizer::uniform(CARD_TEXT)))
            .vision_model(Arc::new(model))
            .build();
        let report = extract_from_image(blank_card(), &ctx).await.unwrap();
        assert!(report.reconciled);
        assert_eq!(report.record.primary_company, "Acme Traders Pvt Ltd");
        assert!(report.record.emails.contains("jane@acme.com"));
    }

    #[tokio::test]
    async fn progress_events_follow_stage_order() {
        let recorder = Arc::new(Recorder::default());
        let ctx = ctx_with(ScriptedRecognizer::uniform(CARD_TEXT), recording_config(&recorder));
        extract_from_image(blank_card(), &ctx).await.unwrap();

        let events = recorder.events.lock().unwrap().clone();
        let starts: Vec<_> = events.iter().filter(|e| e.starts_with("start")).collect();
        assert_eq!(
            starts,
            [
                "start Rectify",
                "start Enhance",
                "start Recognize",
                "start Extract",
                "start Select",
                "start Reconcile"
            ]
        );
        assert!(events.iter().any(|e| e.starts_with("degraded Rectify")));
        assert_eq!(events.last().map(String::as_str), Some("done false"));
    }

    #[tokio::test]
    async fn fatal_ocr_error_reaches_the_callback() {
        let recorder = Arc::new(Recorder::default());
        let ctx = ctx_with(ScriptedRecognizer::failing("boom"), recording_config(&recorder));
        extract_from_image(blank_card(), &ctx).await.unwrap_err();

        let events = recorder.events.lock().unwrap().clone();
        let last = events.last().cloned().unwrap_or_default();
        assert!(last.starts_with("failed "), "events: {events:?}");
        assert!(!events.iter().any(|e| e.starts_with("done")));
    }

    #[tokio::test]
    async fn load_failures_reach_the_callback_once() {
        let recorder = Arc::new(Recorder::default());
        let ctx = ctx_with(ScriptedRecognizer::uniform(""), recording_config(&recorder));

        run_pipeline("/no/such/card.png", &ctx).await.unwrap_err();
        extract_from_bytes("notes.txt", b"not an image", &ctx).await.unwrap_err();

        let events = recorder.events.lock().unwrap().clone();
        let failures = events.iter().filter(|e| e.starts_with("failed")).count();
        assert_eq!(failures, 2, "events: {events:?}");
        assert_eq!(events[0], "start Load");
    }

    #[tokio::test]
    async fn missing_file_becomes_error_string() {
        let ctx = ctx_with(ScriptedRecognizer::uniform(""), ExtractionConfig::default());
        let outcome = extract_card("/no/such/card.png", &ctx).await;
        match outcome {
            ExtractionOutcome::Failed(msg) => assert!(msg.starts_with("Error: "), "{msg}"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn sync_wrapper_runs_outside_a_runtime() {
        let ctx = ctx_with(ScriptedRecognizer::uniform(""), ExtractionConfig::default());
        assert!(extract_card_sync("", &ctx).is_failure());
    }
}
