//! Pipeline stages for business-card extraction.
//!
//! Each submodule implements exactly one transformation step, so each can be
//! tested alone and swapped (a different OCR engine, a different recogniser)
//! without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ rectify ──▶ enhance ──▶ recognize ──▶ entities ──▶ select ──▶ reconcile
//! (path/URL) (warp)    (3 variants) (OCR corpus)  (candidates) (owner,   (vision model,
//!                                                              company)  fallback)
//! ```
//!
//! 1. [`input`]     — resolve a path, URL or upload and decode it once
//! 2. [`rectify`]   — find the card quadrilateral and warp it flat; CPU-bound
//! 3. [`enhance`]   — standard / inverted / dilated binarisations; CPU-bound
//! 4. [`recognize`] — one OCR pass per variant, concatenated into the corpus
//! 5. [`entities`]  — NER plus regex rules → [`entities::CandidateSet`]
//! 6. [`select`]    — ordered rules pick the primary owner and company
//! 7. [`reconcile`] — vision-model correction with heuristic fallback; the
//!    only stage with network I/O ([`llm`], [`encode`], [`postprocess`])

pub mod encode;
pub mod enhance;
pub mod entities;
pub mod input;
pub mod llm;
pub mod postprocess;
pub mod recognize;
pub mod reconcile;
pub mod rectify;
pub mod select;
