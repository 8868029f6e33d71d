//! Output types: the extraction record and the per-stage outcome marker.
//!
//! [`ExtractionRecord`] is the one structure every caller sees. It always
//! exists once the pipeline gets past image decoding; missing data shows up
//! as empty strings and empty sets, never as an absent record.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Best-effort structured contact record for one card.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    #[serde(default)]
    pub primary_owner: String,
    #[serde(default)]
    pub primary_company: String,
    #[serde(default)]
    pub potential_names: BTreeSet<String>,
    #[serde(default)]
    pub company_names: BTreeSet<String>,
    #[serde(default)]
    pub emails: BTreeSet<String>,
    #[serde(default)]
    pub phone_numbers: BTreeSet<String>,
    #[serde(default)]
    pub address: String,
    /// The multi-pass OCR corpus, kept for auditability whichever record wins.
    #[serde(default, rename = "debug_raw", alias = "raw_garbage")]
    pub raw_corpus: String,
}

/// The five fields the reconciliation stage is allowed to replace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciledFields {
    pub primary_owner: String,
    pub primary_company: String,
    pub emails: BTreeSet<String>,
    pub phone_numbers: BTreeSet<String>,
    pub address: String,
}

impl ExtractionRecord {
    /// Overwrite owner/company/emails/phones/address, keeping the candidate
    /// sets and the raw corpus.
    pub fn apply(mut self, fields: ReconciledFields) -> Self {
        self.primary_owner = fields.primary_owner;
        self.primary_company = fields.primary_company;
        self.emails = fields.emails;
        self.phone_numbers = fields.phone_numbers;
        self.address = fields.address;
        self
    }
}

/// Result shape handed to the HTTP/collaborator layer.
///
/// Serialises either as the record mapping or as a bare `"Error: …"` string;
/// callers must check the shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtractionOutcome {
    Record(ExtractionRecord),
    Failed(String),
}

impl ExtractionOutcome {
    /// Build the failure sentinel from any displayable error.
    pub fn failed(err: impl fmt::Display) -> Self {
        ExtractionOutcome::Failed(format!("Error: {err}"))
    }

    pub fn record(&self) -> Option<&ExtractionRecord> {
        match self {
            ExtractionOutcome::Record(r) => Some(r),
            ExtractionOutcome::Failed(_) => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ExtractionOutcome::Failed(_))
    }
}

// ── Stage outcomes ───────────────────────────────────────────────────────

/// Why a stage fell back to its default value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Degradation {
    /// No 4-vertex contour; the unrectified photo was used.
    NoQuadrilateral,
    /// Every recognition pass came back empty.
    EmptyCorpus,
    /// No vision model configured.
    AiUnavailable,
    /// The vision model call or its response failed.
    ReconciliationFailed(String),
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Degradation::NoQuadrilateral => write!(f, "no card boundary found, using full image"),
            Degradation::EmptyCorpus => write!(f, "all recognition passes were empty"),
            Degradation::AiUnavailable => write!(f, "AI reconciliation unavailable"),
            Degradation::ReconciliationFailed(d) => write!(f, "AI reconciliation failed: {d}"),
        }
    }
}

/// A stage result that is either complete or degraded to a defined fallback.
///
/// Both arms carry a usable value, so the orchestrator never needs a special
/// case to keep going; it only records the marker.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome<T> {
    Complete(T),
    Degraded { fallback: T, reason: Degradation },
}

impl<T> StageOutcome<T> {
    pub fn degraded(fallback: T, reason: Degradation) -> Self {
        StageOutcome::Degraded { fallback, reason }
    }

    pub fn degradation(&self) -> Option<&Degradation> {
        match self {
            StageOutcome::Complete(_) => None,
            StageOutcome::Degraded { reason, .. } => Some(reason),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degradation().is_some()
    }

    pub fn value(&self) -> &T {
        match self {
            StageOutcome::Complete(v) | StageOutcome::Degraded { fallback: v, .. } => v,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            StageOutcome::Complete(v) | StageOutcome::Degraded { fallback: v, .. } => v,
        }
    }

    /// Split into the value and the optional marker.
    pub fn into_parts(self) -> (T, Option<Degradation>) {
        match self {
            StageOutcome::Complete(v) => (v, None),
            StageOutcome::Degraded { fallback, reason } => (fallback, Some(reason)),
        }
    }
}

/// Wall-clock time spent in each stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageTimings {
    pub rectify_ms: u64,
    pub enhance_ms: u64,
    pub recognize_ms: u64,
    pub extract_ms: u64,
    pub reconcile_ms: u64,
    pub total_ms: u64,
}

/// Everything one successful pipeline run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionReport {
    pub record: ExtractionRecord,
    /// True when the AI stage replaced the heuristic fields.
    pub reconciled: bool,
    pub degradations: Vec<Degradation>,
    pub timings: StageTimings,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ExtractionRecord {
        ExtractionRecord {
            primary_owner: "Jane Doe".into(),
            primary_company: "Acme Traders".into(),
            potential_names: ["Jane Doe".to_string()].into(),
            company_names: BTreeSet::new(),
            emails: ["jane@acme.com".to_string()].into(),
            phone_numbers: ["+15551234567".to_string()].into(),
            address: "221B Baker Street".into(),
            raw_corpus: "--- PASS 1 ---\nJane Doe".into(),
        }
    }

    #[test]
    fn record_serialises_contract_keys() {
        let v = serde_json::to_value(sample()).unwrap();
        for key in [
            "primary_owner",
            "primary_company",
            "potential_names",
            "company_names",
            "emails",
            "phone_numbers",
            "address",
            "debug_raw",
        ] {
            assert!(v.get(key).is_some(), "missing key {key}");
        }
        assert!(v["emails"].is_array());
    }

    #[test]
    fn record_accepts_raw_garbage_alias() {
        let r: ExtractionRecord =
            serde_json::from_str(r#"{"primary_owner":"A B","raw_garbage":"text"}"#).unwrap();
        assert_eq!(r.raw_corpus, "text");
        assert!(r.emails.is_empty());
    }

    #[test]
    fn failure_outcome_is_a_bare_string() {
        let o = ExtractionOutcome::failed("image unreadable");
        assert_eq!(
            serde_json::to_value(&o).unwrap(),
            serde_json::Value::String("Error: image unreadable".into())
        );
        assert!(o.is_failure());
        assert!(o.record().is_none());
    }

    #[test]
    fn apply_keeps_candidates_and_corpus() {
        let base = sample();
        let out = base.clone().apply(ReconciledFields {
            primary_owner: "J. Doe".into(),
            ..Default::default()
        });
        assert_eq!(out.primary_owner, "J. Doe");
        assert!(out.emails.is_empty());
        assert_eq!(out.potential_names, base.potential_names);
        assert_eq!(out.raw_corpus, base.raw_corpus);
    }

    #[test]
    fn stage_outcome_yields_fallback_when_degraded() {
        let s = StageOutcome::degraded(7, Degradation::NoQuadrilateral);
        assert!(s.is_degraded());
        assert_eq!(*s.value(), 7);
        let (v, reason) = s.into_parts();
        assert_eq!(v, 7);
        assert_eq!(reason, Some(Degradation::NoQuadrilateral));

        let c = StageOutcome::Complete("x");
        assert!(c.degradation().is_none());
        assert_eq!(c.into_value(), "x");
    }
}
