//! Canonical keys for account identifiers.

/// Canonical comparison key: trimmed, lowercased, with every whitespace
/// character removed.
pub fn normalize(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Stricter key used for extracted identifiers and reference cells.
///
/// Anything other than an ASCII letter, digit or underscore is dropped
/// before the regular normalization runs.
pub fn normalize_strict(raw: &str) -> String {
    let kept: String = raw.chars().filter(|c| is_identifier_char(*c)).collect();
    normalize(&kept)
}

/// Characters allowed in an identifier run.
pub(crate) fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}
