//! Shared normalization helpers: case-folding, whitespace collapsing, and
//! the CWA-extraction regex.
//!
//! Regexes are compiled once at process start (`once_cell::sync::Lazy`) —
//! their match order is semantic for CWA extraction and equipment
//! sub-typing (see `duration.rs`) and must be preserved exactly.

use once_cell::sync::Lazy;
use regex::Regex;

/// Case-fold a string for comparison: trim, collapse internal whitespace
/// runs to a single space, lowercase. Used for dependency-rule keys, type
/// names, and any other "compare ignoring case/whitespace" lookup.
pub fn fold(s: &str) -> String {
    let collapsed = WHITESPACE_RUN.replace_all(s.trim(), " ");
    collapsed.to_lowercase()
}

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Normalize a layer name for the clean-stage join: collapse whitespace
/// runs to `_`, collapse `_` runs, lowercase.
pub fn join_key(s: &str) -> String {
    let spaces_to_underscore = WHITESPACE_RUN.replace_all(s.trim(), "_");
    let collapsed = UNDERSCORE_RUN.replace_all(&spaces_to_underscore, "_");
    collapsed.to_lowercase()
}

static UNDERSCORE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"_+").unwrap());

/// Normalize underscores/spaces in a name to single spaces, for the CWA
/// regex to find word boundaries regardless of the original separator.
fn spaces_normalized(s: &str) -> String {
    UNDERSCORE_OR_SPACE_RUN.replace_all(s, " ").to_string()
}

static UNDERSCORE_OR_SPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[_\s]+").unwrap());

static CWA_WITH_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bCWA\b\s*ASU\s*-\s*([A-Za-z0-9]+)").unwrap());
static CWA_BARE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bASU\s*-\s*([A-Za-z0-9]+)").unwrap());

/// Extract a CWA (Construction Work Area) code from a layer name.
///
/// Precedence: `CWA ASU-<code>` before bare `ASU-<code>`; null if neither
/// matches.
pub fn extract_cwa(name: &str) -> Option<String> {
    let normalized = spaces_normalized(name);
    if let Some(caps) = CWA_WITH_PREFIX.captures(&normalized) {
        return Some(caps[1].to_string());
    }
    if let Some(caps) = CWA_BARE.captures(&normalized) {
        return Some(caps[1].to_string());
    }
    None
}

/// Parse a value's string form as an `f64`, accepting scientific notation.
/// Returns `None` on anything unparseable (including `null`).
pub fn to_float(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_collapses_whitespace_and_case() {
        assert_eq!(fold("  Civil   Works "), "civil works");
        assert_eq!(fold("Piping"), "piping");
    }

    #[test]
    fn join_key_normalizes_separators() {
        assert_eq!(join_key("CWA_ASU-1A01_FoundationSlab"), "cwa_asu-1a01_foundationslab");
        assert_eq!(join_key("Foo  Bar__Baz"), "foo_bar_baz");
    }

    #[test]
    fn extract_cwa_prefers_cwa_asu_form() {
        assert_eq!(
            extract_cwa("CWA_ASU-1A01_FoundationSlab"),
            Some("1A01".to_string())
        );
        assert_eq!(extract_cwa("ASU-2B07-Stuff"), Some("2B07".to_string()));
        assert_eq!(extract_cwa("no code here"), None);
    }

    #[test]
    fn to_float_parses_scientific_notation() {
        assert_eq!(
            to_float(&serde_json::Value::String("9.99999974737875E-06".to_string())),
            Some(9.99999974737875E-06)
        );
        assert_eq!(to_float(&serde_json::Value::Null), None);
        assert_eq!(to_float(&serde_json::Value::String("not a number".to_string())), None);
    }
}
