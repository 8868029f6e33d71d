//! Prompts for the AI reconciliation pass.
//!
//! All prompt text lives here so wording changes touch exactly one file and
//! tests can inspect the assembled prompt without calling a model.

use std::collections::BTreeSet;

/// System message sent ahead of every reconciliation request.
pub const SYSTEM_PROMPT: &str = "You are a highly accurate business card parser. \
You answer with a single JSON object and nothing else.";

/// Fixed rules for reconciling multi-pass OCR against the card image.
pub const RECONCILE_RULES: &str = r#"IMPORTANT: The '3-LAYER RAW OCR TEXT' below contains results from THREE different OCR passes (Standard, Inverted, and Dilated).
Some passes may have captured text that others missed.
Your goal is to compare all passes against the ORIGINAL card image to extract 100% correct structured information.

Rules:
1. MULTI-PASS OCR is your primary text source. If PASS 1 is empty, PASS 2 or 3 likely has the data.
2. Trust the IMAGE: if the OCR says '9B76' but the image clearly shows '9876', use the image.
3. KEEP the primary owner_name unless it is clearly incorrect.
4. KEEP the primary company_name unless it is clearly incorrect.
5. Phone numbers: combine broken segments. Fix 'O' to '0' and 'I' to '1' where the OCR confused them.
6. Ignore religious slogans (e.g. 'JAI MATA DI', 'Om', '786') and marketing taglines.
7. Do NOT invent information. If a field is missing, return ""."#;

/// Output schema the model must follow, keys in contract order.
pub const OUTPUT_SCHEMA: &str = r#"{
  "primary_owner": "",
  "primary_company": "",
  "emails": [],
  "phone_numbers": [],
  "address": ""
}"#;

/// Everything the prompt needs from the heuristic pass.
#[derive(Debug, Clone)]
pub struct ReconcileHints<'a> {
    pub corpus: &'a str,
    pub owner: &'a str,
    pub company: &'a str,
    pub other_names: &'a BTreeSet<String>,
    pub other_companies: &'a BTreeSet<String>,
    /// Already normalised.
    pub emails: &'a [String],
    /// Already normalised.
    pub phones: &'a [String],
}

/// Assemble the user prompt sent alongside the original card image.
pub fn build_reconcile_prompt(h: &ReconcileHints<'_>) -> String {
    format!(
        "{rules}\n\n\
Input Data:\n\
--------------------------------\n\
3-LAYER RAW OCR TEXT:\n\
{corpus}\n\
--------------------------------\n\
LOCAL EXTRACTION HINTS (Normalized):\n\
PRIMARY RULE-BASED EXTRACTION (MOST TRUSTED):\n\
- owner_name: \"{owner}\"\n\
- company_name: \"{company}\"\n\
SUPPORTING OCR CANDIDATES (USE ONLY IF PRIMARY IS WRONG):\n\
- Other detected names: {names}\n\
- Other detected companies: {companies}\n\
- Email Candidates: {emails}\n\
- Phone Candidates: {phones}\n\n\
Task:\n\
Extract owner_name, company_name, emails, phone_numbers, and address.\n\
Output ONLY valid JSON:\n\
{schema}",
        rules = RECONCILE_RULES,
        corpus = h.corpus,
        owner = h.owner,
        company = h.company,
        names = list_literal(h.other_names.iter()),
        companies = list_literal(h.other_companies.iter()),
        emails = list_literal(h.emails.iter()),
        phones = list_literal(h.phones.iter()),
        schema = OUTPUT_SCHEMA,
    )
}

/// `["a", "b"]`, JSON-quoted so embedded quotes cannot break the prompt.
fn list_literal<'a>(items: impl Iterator<Item = &'a String>) -> String {
    let quoted: Vec<String> = items
        .map(|s| serde_json::to_string(s).unwrap_or_else(|_| format!("\"{s}\"")))
        .collect();
    format!("[{}]", quoted.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_carries_corpus_hints_and_schema() {
        let names: BTreeSet<String> = ["Jane Doe".to_string()].into();
        let orgs = BTreeSet::new();
        let emails = vec!["jane@acme.com".to_string()];
        let phones = vec!["+15551234567".to_string()];
        let p = build_reconcile_prompt(&ReconcileHints {
            corpus: "--- PASS 1 ---\nJane Doe",
            owner: "Jane Doe",
            company: "Acme Traders",
            other_names: &names,
            other_companies: &orgs,
            emails: &emails,
            phones: &phones,
        });
        assert!(p.contains("3-LAYER RAW OCR TEXT:\n--- PASS 1 ---\nJane Doe"));
        assert!(p.contains("PRIMARY RULE-BASED EXTRACTION (MOST TRUSTED)"));
        assert!(p.contains("- owner_name: \"Jane Doe\""));
        assert!(p.contains("SUPPORTING OCR CANDIDATES (USE ONLY IF PRIMARY IS WRONG)"));
        assert!(p.contains("- Other detected companies: []"));
        assert!(p.contains("- Phone Candidates: [\"+15551234567\"]"));
        assert!(p.ends_with(OUTPUT_SCHEMA));
    }

    #[test]
    fn rules_cover_every_instruction() {
        for needle in ["Trust the IMAGE", "KEEP the primary owner", "'O' to '0'", "Do NOT invent"] {
            assert!(RECONCILE_RULES.contains(needle), "missing {needle}");
        }
    }
}
