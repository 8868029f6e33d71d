//! Entity candidates: named entities plus regex rules over the OCR corpus.
//!
//! Output is a [`CandidateSet`]: loosely typed lists of persons, organisations,
//! emails, phone numbers and address fragments. Nothing here decides which
//! candidate wins; that is [`crate::pipeline::select`]'s job.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use tracing::debug;

/// Address value used when no line carries an address keyword.
pub const ADDRESS_SENTINEL: &str = "check raw content";

/// Case-insensitive substrings that mark a line as part of the address.
pub const ADDRESS_KEYWORDS: &[&str] = &[
    "street", "road", "floor", "block", "city", "sector", "pin", "zip", "district", "state",
    "country", "lane", "nagar", "building", "opposite", "near", "behind",
];

/// Case-insensitive substrings that mark a line as a business name.
pub const COMPANY_KEYWORDS: &[&str] = &[
    "sales",
    "electrical",
    "electronics",
    "services",
    "solutions",
    "repair",
    "traders",
    "enterprises",
    "industries",
    "systems",
];

/// Whole-word organisation suffixes (compared lowercase, punctuation stripped).
const ORG_SUFFIXES: &[&str] = &[
    "pvt",
    "ltd",
    "limited",
    "inc",
    "llc",
    "llp",
    "corp",
    "corporation",
    "company",
    "co",
    "group",
    "technologies",
    "associates",
];

static RE_EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[a-zA-Z0-9_.+\-]+@[a-zA-Z0-9\-]+\.[a-zA-Z0-9\-.]+").unwrap()
});

// Interior class is horizontal only, so a match never crosses a line break.
static RE_PHONE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\+?\d[\d \t\-]{8,}\d").unwrap());

static RE_POSTAL_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{6}\b").unwrap());

/// Minimum digit count for a phone candidate.
const MIN_PHONE_DIGITS: usize = 10;

// ── Named-entity recognition ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityLabel {
    Person,
    Org,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub text: String,
    pub label: EntityLabel,
}

impl Entity {
    fn new(text: impl Into<String>, label: EntityLabel) -> Self {
        Self {
            text: text.into(),
            label,
        }
    }
}

/// Named-entity recogniser over free text.
pub trait EntityRecognizer: Send + Sync {
    /// Entities in the order they occur in `text`.
    fn entities(&self, text: &str) -> Vec<Entity>;
}

/// Yields no entities; selection then relies on line rules alone.
pub struct NoopNer;

impl EntityRecognizer for NoopNer {
    fn entities(&self, _text: &str) -> Vec<Entity> {
        Vec::new()
    }
}

/// Rule-based recogniser tuned for business-card layouts.
///
/// Per line:
/// - a line with an organisation suffix (`Pvt`, `Ltd`, `Inc`, `Co.` …) is an ORG;
/// - otherwise, unless it carries a company or address keyword, each run of
///   2–3 capitalised alphabetic words is a PERSON.
///
/// Pass headers and lines with `@` or `/` (emails, URLs) are skipped.
#[derive(Debug, Default, Clone)]
pub struct HeuristicNer;

impl HeuristicNer {
    fn is_name_word(word: &str) -> bool {
        let mut chars = word.chars();
        match chars.next() {
            Some(first) if first.is_ascii_uppercase() => {
                let rest: Vec<char> = chars.collect();
                !rest.is_empty()
                    && rest.iter().all(|c| c.is_ascii_alphabetic())
                    // "Jane" or "JANE", never OCR noise like "AcMe".
                    && (rest.iter().all(|c| c.is_ascii_lowercase())
                        || rest.iter().all(|c| c.is_ascii_uppercase()))
            }
            _ => false,
        }
    }

    fn has_org_suffix(line: &str) -> bool {
        line.split_whitespace().any(|w| {
            let w = w.trim_matches(|c: char| !c.is_ascii_alphanumeric()).to_ascii_lowercase();
            ORG_SUFFIXES.contains(&w.as_str())
        })
    }

    fn push_run(run: &mut Vec<&str>, out: &mut Vec<Entity>) {
        if (2..=3).contains(&run.len()) {
            out.push(Entity::new(run.join(" "), EntityLabel::Person));
        }
        run.clear();
    }
}

impl EntityRecognizer for HeuristicNer {
    fn entities(&self, text: &str) -> Vec<Entity> {
        let mut out = Vec::new();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if line.starts_with("--- PASS") || line.contains('@') || line.contains('/') {
                continue;
            }
            if Self::has_org_suffix(line) {
                out.push(Entity::new(line, EntityLabel::Org));
                continue;
            }
            let low = line.to_lowercase();
            if contains_any(&low, COMPANY_KEYWORDS) || contains_any(&low, ADDRESS_KEYWORDS) {
                continue;
            }
            let mut run: Vec<&str> = Vec::new();
            for word in line.split_whitespace() {
                let bare = word.trim_end_matches([',', ';', ':']);
                if Self::is_name_word(bare) {
                    run.push(bare);
                } else {
                    Self::push_run(&mut run, &mut out);
                }
            }
            Self::push_run(&mut run, &mut out);
        }
        out
    }
}

// ── Candidate set ────────────────────────────────────────────────────────────

/// Raw, possibly noisy candidates for every field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateSet {
    /// Trimmed non-empty corpus lines, in corpus order.
    pub lines: Vec<String>,
    /// PERSON entities longer than 3 chars, in the order yielded.
    pub persons: Vec<String>,
    /// ORG entities, in the order yielded.
    pub orgs: Vec<String>,
    pub emails: BTreeSet<String>,
    /// Normalised: digits plus an optional leading `+`.
    pub phones: BTreeSet<String>,
    /// 6-digit postal codes seen anywhere in the corpus.
    pub postal_codes: BTreeSet<String>,
    /// Address lines joined by spaces, or [`ADDRESS_SENTINEL`].
    pub address: String,
}

/// Run entity recognition and the regex rules over `corpus`.
pub fn extract_candidates(corpus: &str, ner: &dyn EntityRecognizer) -> CandidateSet {
    let lines: Vec<String> = corpus
        .split('\n')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();

    let mut persons = Vec::new();
    let mut orgs = Vec::new();
    for entity in ner.entities(corpus) {
        match entity.label {
            EntityLabel::Person if entity.text.chars().count() > 3 => persons.push(entity.text),
            EntityLabel::Person => {}
            EntityLabel::Org => orgs.push(entity.text),
        }
    }

    let emails = find_emails(corpus);
    let phones = find_phones(corpus);
    let postal_codes = RE_POSTAL_CODE
        .find_iter(corpus)
        .map(|m| m.as_str().to_string())
        .collect();
    let address = address_from_lines(&lines);

    debug!(
        "Extract: {} lines, {} persons, {} orgs, {} emails, {} phones",
        lines.len(),
        persons.len(),
        orgs.len(),
        emails.len(),
        phones.len()
    );

    CandidateSet {
        lines,
        persons,
        orgs,
        emails,
        phones,
        postal_codes,
        address,
    }
}

pub fn find_emails(text: &str) -> BTreeSet<String> {
    RE_EMAIL
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Phone-like runs with at least ten digits, normalised.
pub fn find_phones(text: &str) -> BTreeSet<String> {
    RE_PHONE
        .find_iter(text)
        .map(|m| m.as_str())
        .filter(|raw| raw.chars().filter(char::is_ascii_digit).count() >= MIN_PHONE_DIGITS)
        .map(normalize_phone)
        .filter(|p| !p.is_empty())
        .collect()
}

/// Keep digits and a leading `+`; drop everything else.
pub fn normalize_phone(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut out = String::with_capacity(trimmed.len());
    if trimmed.starts_with('+') {
        out.push('+');
    }
    out.extend(trimmed.chars().filter(char::is_ascii_digit));
    if out == "+" {
        out.clear();
    }
    out
}

/// Trim, then drop embedded spaces and commas.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().replace([' ', ','], "")
}

fn address_from_lines(lines: &[String]) -> String {
    let parts: Vec<&str> = lines
        .iter()
        .filter(|l| contains_any(&l.to_lowercase(), ADDRESS_KEYWORDS))
        .map(String::as_str)
        .collect();
    if parts.is_empty() {
        ADDRESS_SENTINEL.to_string()
    } else {
        parts.join(" ")
    }
}

/// `haystack` must already be lowercase.
pub(crate) fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|k| haystack.contains(k))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_with_country_code_is_normalised() {
        let phones = find_phones("Call +91 98765-43210 today");
        assert_eq!(phones.into_iter().collect::<Vec<_>>(), ["+919876543210"]);
    }

    #[test]
    fn short_numbers_are_rejected() {
        assert!(find_phones("Ext 1234").is_empty());
        // Nine digits with separators: long enough for the pattern, too few digits.
        assert!(find_phones("123 456 789").is_empty());
    }

    #[test]
    fn phone_does_not_span_lines() {
        let phones = find_phones("+1 555-123-4567\n221B Baker Street");
        assert_eq!(phones.into_iter().collect::<Vec<_>>(), ["+15551234567"]);
    }

    #[test]
    fn duplicate_phones_collapse() {
        let phones = find_phones("98765 43210\n98765-43210");
        assert_eq!(phones.len(), 1);
    }

    #[test]
    fn emails_are_found_and_deduplicated() {
        let e = find_emails("jane@acme.com, JANE: jane@acme.com\nsales@acme-tools.co.in");
        assert_eq!(
            e.into_iter().collect::<Vec<_>>(),
            ["jane@acme.com", "sales@acme-tools.co.in"]
        );
    }

    #[test]
    fn normalizers() {
        assert_eq!(normalize_phone(" +91 (98765) 43210 "), "+919876543210");
        assert_eq!(normalize_phone("-- "), "");
        assert_eq!(normalize_email(" jane @acme.com, "), "jane@acme.com");
    }

    #[test]
    fn address_lines_joined_in_order() {
        let c = extract_candidates(
            "Jane Doe\n221B Baker Street\nNear City Mall\njane@acme.com",
            &NoopNer,
        );
        assert_eq!(c.address, "221B Baker Street Near City Mall");
    }

    #[test]
    fn address_falls_back_to_sentinel() {
        let c = extract_candidates("Jane Doe\nAcme", &NoopNer);
        assert_eq!(c.address, ADDRESS_SENTINEL);
    }

    #[test]
    fn postal_codes_are_collected() {
        let c = extract_candidates("Sector 5, Noida 201301", &NoopNer);
        assert!(c.postal_codes.contains("201301"));
    }

    #[test]
    fn heuristic_ner_finds_people_and_orgs() {
        let ents = HeuristicNer.entities(
            "--- PASS 1 ---\nProp. Jane Doe\nAcme Tools Pvt. Ltd.\nAcme Traders Solutions\n221B Baker Street",
        );
        assert_eq!(
            ents,
            vec![
                Entity::new("Jane Doe", EntityLabel::Person),
                Entity::new("Acme Tools Pvt. Ltd.", EntityLabel::Org),
            ]
        );
    }

    #[test]
    fn long_title_case_runs_are_not_people() {
        let ents = HeuristicNer.entities("Quality Work On Time Every Time");
        assert!(ents.is_empty());
    }

    #[test]
    fn short_person_entities_are_dropped() {
        struct Fixed;
        impl EntityRecognizer for Fixed {
            fn entities(&self, _text: &str) -> Vec<Entity> {
                vec![
                    Entity::new("Al", EntityLabel::Person),
                    Entity::new("Ravi Kumar", EntityLabel::Person),
                    Entity::new("IBM", EntityLabel::Org),
                ]
            }
        }
        let c = extract_candidates("anything", &Fixed);
        assert_eq!(c.persons, ["Ravi Kumar"]);
        assert_eq!(c.orgs, ["IBM"]);
    }
}
