//! Post-processing: deterministic cleanup of the model's JSON answer.
//!
//! Even when told to return strict JSON, vision models routinely wrap the
//! object in ```` ```json ```` fences, emit CRLF line endings, or leak
//! zero-width characters copied from the card text. These rules undo those
//! quirks before `serde_json` sees the body. They never repair the JSON
//! itself: a body that is still invalid after cleanup is a reconciliation
//! failure.
//!
//! ## Rule Order
//!
//! Line endings are normalised first so the fence regex only has to match
//! `\n`; invisible characters go before fence stripping because a BOM in
//! front of the opening fence would hide it.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules to the raw model output.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF → LF)
/// 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 3. Strip outer code fences (```` ```json ```` or bare ```` ``` ````)
/// 4. Drop stray fence lines the model left inside the body
/// 5. Cut leading/trailing chatter around the outermost `{ … }`
pub fn clean_model_json(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = strip_code_fences(&s);
    let s = drop_stray_fences(&s);
    isolate_object(&s)
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 3: Strip outer code fences ─────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z]*[ \t]*\n(.*?)\n?```\s*$").unwrap());

fn strip_code_fences(input: &str) -> String {
    let trimmed = input.trim();
    if let Some(caps) = RE_OUTER_FENCES.captures(trimmed) {
        caps[1].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

// ── Rule 4: Drop stray fence lines ──────────────────────────────────────────

fn drop_stray_fences(input: &str) -> String {
    input
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

// ── Rule 5: Isolate the JSON object ─────────────────────────────────────────

/// "Here is the result: {…} Let me know…" → "{…}". Bodies without braces are
/// returned unchanged so the parser reports them.
fn isolate_object(input: &str) -> String {
    match (input.find('{'), input.rfind('}')) {
        (Some(start), Some(end)) if start < end => input[start..=end].to_string(),
        _ => input.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_json_fences() {
        let input = "```json\n{\"a\": 1}\n```";
        assert_eq!(clean_model_json(input), "{\"a\": 1}");
    }

    #[test]
    fn test_strip_bare_fences() {
        let input = "```\n{\"a\": 1}\n```\n";
        assert_eq!(clean_model_json(input), "{\"a\": 1}");
    }

    #[test]
    fn test_no_fences_passthrough() {
        assert_eq!(clean_model_json("  {\"a\": 1}  "), "{\"a\": 1}");
    }

    #[test]
    fn test_crlf_and_bom() {
        let input = "\u{FEFF}```json\r\n{\"a\":\r\n 1}\r\n```";
        assert_eq!(clean_model_json(input), "{\"a\":\n 1}");
    }

    #[test]
    fn test_chatter_around_object() {
        let input = "Sure! Here it is:\n{\"a\": 1}\nHope this helps.";
        assert_eq!(clean_model_json(input), "{\"a\": 1}");
    }

    #[test]
    fn test_no_object_left_alone() {
        assert_eq!(clean_model_json("I cannot read this card."), "I cannot read this card.");
    }

    #[test]
    fn test_normalise_line_endings() {
        assert_eq!(normalise_line_endings("a\r\nb\rc"), "a\nb\nc");
    }
}
