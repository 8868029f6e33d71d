//! Heuristic selection of the primary owner and company.
//!
//! Each policy is an ordered list of independent [`SelectionRule`]s. Rules
//! are tried in order and the first `Some` wins; when every rule passes the
//! field is the empty string.

use crate::pipeline::entities::{contains_any, CandidateSet, COMPANY_KEYWORDS};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// One predicate-plus-extractor step of a selection policy.
#[derive(Clone, Copy)]
pub struct SelectionRule {
    pub name: &'static str,
    pub apply: fn(&CandidateSet) -> Option<String>,
}

impl std::fmt::Debug for SelectionRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectionRule").field("name", &self.name).finish()
    }
}

/// Owner policy: explicit role marker first, then the longest clean PERSON.
pub const OWNER_RULES: &[SelectionRule] = &[
    SelectionRule {
        name: "role-marker-line",
        apply: owner_from_role_marker,
    },
    SelectionRule {
        name: "longest-person",
        apply: owner_from_persons,
    },
];

/// Company policy: keyword line outside the address, then the first ORG.
pub const COMPANY_RULES: &[SelectionRule] = &[
    SelectionRule {
        name: "keyword-line",
        apply: company_from_keyword_line,
    },
    SelectionRule {
        name: "first-org",
        apply: company_from_orgs,
    },
];

/// Lowercase tokens that veto a line as a company name.
const COMPANY_LINE_VETO: &[&str] = &["floor", "near", "plot", "road", "sector"];

static RE_DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{3,}").unwrap());
static RE_NON_LETTER: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z ]").unwrap());
static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static RE_ROLE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:proprietor|owner)\b|\bprop\.").unwrap());

/// Evaluate `rules` in order; first hit wins, default empty.
pub fn apply_rules(rules: &[SelectionRule], candidates: &CandidateSet) -> String {
    for rule in rules {
        if let Some(value) = (rule.apply)(candidates) {
            debug!("Select: rule '{}' → {:?}", rule.name, value);
            return value;
        }
    }
    String::new()
}

pub fn select_owner(candidates: &CandidateSet) -> String {
    apply_rules(OWNER_RULES, candidates)
}

pub fn select_company(candidates: &CandidateSet) -> String {
    apply_rules(COMPANY_RULES, candidates)
}

/// Letters-only form of a name.
///
/// Order matters: runs of 3+ digits go first (phone fragments), then every
/// non-letter, then whitespace is collapsed and trimmed.
pub fn clean_name(text: &str) -> String {
    let s = RE_DIGIT_RUN.replace_all(text, "");
    let s = RE_NON_LETTER.replace_all(&s, "");
    let s = RE_WHITESPACE.replace_all(&s, " ");
    s.trim().to_string()
}

fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}

fn owner_from_role_marker(c: &CandidateSet) -> Option<String> {
    c.lines.iter().find_map(|line| {
        let low = line.to_lowercase();
        if !(low.contains("prop.") || low.contains("proprietor") || low.contains("owner")) {
            return None;
        }
        let name = clean_name(&RE_ROLE_MARKER.replace_all(line, " "));
        (word_count(&name) >= 2).then_some(name)
    })
}

fn owner_from_persons(c: &CandidateSet) -> Option<String> {
    let mut best: Option<String> = None;
    for person in &c.persons {
        let cleaned = clean_name(person);
        if word_count(&cleaned) < 2 {
            continue;
        }
        let longer = best
            .as_ref()
            .is_none_or(|b| cleaned.chars().count() > b.chars().count());
        if longer {
            best = Some(cleaned);
        }
    }
    best
}

fn company_from_keyword_line(c: &CandidateSet) -> Option<String> {
    c.lines.iter().find_map(|line| {
        let low = line.to_lowercase();
        if contains_any(&low, COMPANY_LINE_VETO) {
            return None;
        }
        contains_any(&low, COMPANY_KEYWORDS).then(|| line.trim().to_string())
    })
}

fn company_from_orgs(c: &CandidateSet) -> Option<String> {
    c.orgs.first().cloned()
}
