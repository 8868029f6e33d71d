//! AI reconciliation: let a vision model correct the heuristic record.
//!
//! The model sees the full multi-pass corpus, the heuristic picks, the
//! normalised email/phone candidates and the original photo. Its JSON answer
//! replaces owner, company, emails, phones and address; the candidate sets
//! and the raw corpus always carry over from the heuristic record.
//!
//! Every failure (no model, provider error, timeout, empty or malformed
//! answer) is non-fatal: [`reconcile_or_fallback`] returns the heuristic
//! record unchanged, tagged with the reason.

use crate::error::ReconcileError;
use crate::output::{Degradation, ExtractionRecord, ReconciledFields, StageOutcome};
use crate::pipeline::entities::{normalize_email, normalize_phone};
use crate::pipeline::llm::VisionModel;
use crate::pipeline::postprocess::clean_model_json;
use crate::prompts::{build_reconcile_prompt, ReconcileHints};
use edgequake_llm::ImageData;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Keys the model must return.
pub const RESPONSE_KEYS: [&str; 5] = [
    "primary_owner",
    "primary_company",
    "emails",
    "phone_numbers",
    "address",
];

/// Normalise email candidates; empties are dropped, order kept.
pub fn normalize_emails<'a>(emails: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    emails
        .into_iter()
        .map(|e| normalize_email(e))
        .filter(|e| !e.is_empty())
        .collect()
}

/// Normalise phone candidates; empties are dropped, order kept.
pub fn normalize_phones<'a>(phones: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    phones
        .into_iter()
        .map(|p| normalize_phone(p))
        .filter(|p| !p.is_empty())
        .collect()
}

/// Ask `model` to reconcile `record` against the card photo.
pub async fn reconcile(
    record: &ExtractionRecord,
    image: ImageData,
    model: Option<&dyn VisionModel>,
    timeout_secs: Option<u64>,
) -> Result<ExtractionRecord, ReconcileError> {
    let model = model.ok_or_else(|| ReconcileError::Unavailable {
        reason: "no vision model configured".to_string(),
    })?;

    let emails = normalize_emails(&record.emails);
    let phones = normalize_phones(&record.phone_numbers);
    let prompt = build_reconcile_prompt(&ReconcileHints {
        corpus: &record.raw_corpus,
        owner: &record.primary_owner,
        company: &record.primary_company,
        other_names: &record.potential_names,
        other_companies: &record.company_names,
        emails: &emails,
        phones: &phones,
    });
    debug!("Reconcile: prompt {} chars via {}", prompt.len(), model.label());

    let call = model.generate(&prompt, image);
    let raw = match timeout_secs {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), call)
            .await
            .map_err(|_| ReconcileError::Timeout { secs })??,
        None => call.await?,
    };

    let fields = parse_response(&raw, &emails, &phones)?;
    Ok(record.clone().apply(fields))
}

/// [`reconcile`], with every failure mapped to the heuristic record.
pub async fn reconcile_or_fallback(
    record: &ExtractionRecord,
    image: ImageData,
    model: Option<&dyn VisionModel>,
    timeout_secs: Option<u64>,
) -> StageOutcome<ExtractionRecord> {
    match reconcile(record, image, model, timeout_secs).await {
        Ok(refined) => {
            info!("Reconcile: AI record accepted");
            StageOutcome::Complete(refined)
        }
        Err(ReconcileError::Unavailable { reason }) => {
            warn!("Reconcile: skipped ({reason}), keeping heuristic record");
            StageOutcome::degraded(record.clone(), Degradation::AiUnavailable)
        }
        Err(e) => {
            warn!("Reconcile: {e}; falling back to heuristic record");
            StageOutcome::degraded(
                record.clone(),
                Degradation::ReconciliationFailed(e.to_string()),
            )
        }
    }
}

/// Parse the model's answer into replacement fields.
///
/// All five keys must be present. An empty email or phone list is replaced
/// by the normalised heuristic list.
pub fn parse_response(
    raw: &str,
    fallback_emails: &[String],
    fallback_phones: &[String],
) -> Result<ReconciledFields, ReconcileError> {
    let cleaned = clean_model_json(raw);
    if cleaned.is_empty() {
        return Err(ReconcileError::EmptyResponse);
    }
    let value: Value =
        serde_json::from_str(&cleaned).map_err(|e| ReconcileError::MalformedResponse {
            detail: e.to_string(),
        })?;
    let obj = value
        .as_object()
        .ok_or_else(|| ReconcileError::MalformedResponse {
            detail: "top-level value is not an object".to_string(),
        })?;
    if let Some(missing) = RESPONSE_KEYS.iter().find(|k| !obj.contains_key(**k)) {
        return Err(ReconcileError::MalformedResponse {
            detail: format!("missing field '{missing}'"),
        });
    }

    let mut emails = normalize_emails(&string_list(obj, "emails")?);
    if emails.is_empty() {
        emails = fallback_emails.to_vec();
    }
    let mut phones = normalize_phones(&string_list(obj, "phone_numbers")?);
    if phones.is_empty() {
        phones = fallback_phones.to_vec();
    }

    Ok(ReconciledFields {
        primary_owner: string_field(obj, "primary_owner")?,
        primary_company: string_field(obj, "primary_company")?,
        emails: emails.into_iter().collect::<BTreeSet<_>>(),
        phone_numbers: phones.into_iter().collect::<BTreeSet<_>>(),
        address: string_field(obj, "address")?,
    })
}

fn string_field(obj: &Map<String, Value>, key: &str) -> Result<String, ReconcileError> {
    match &obj[key] {
        Value::String(s) => Ok(s.trim().to_string()),
        Value::Null => Ok(String::new()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(ReconcileError::MalformedResponse {
            detail: format!("'{key}' should be a string, got {other}"),
        }),
    }
}

/// A JSON array of strings/numbers, or one comma-separated string.
fn string_list(obj: &Map<String, Value>, key: &str) -> Result<Vec<String>, ReconcileError> {
    match &obj[key] {
        Value::Array(items) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => Ok(s.clone()),
                Value::Number(n) => Ok(n.to_string()),
                other => Err(ReconcileError::MalformedResponse {
                    detail: format!("'{key}' contains a non-string item {other}"),
                }),
            })
            .collect(),
        Value::String(s) => Ok(s.split(',').map(str::to_string).collect()),
        Value::Null => Ok(Vec::new()),
        other => Err(ReconcileError::MalformedResponse {
            detail: format!("'{key}' should be a list, got {other}"),
        }),
    }
}
