//! Transcript normalization.
//!
//! STT engines disagree on casing, punctuation and how they spell fillers
//! ("uh-huh", "uh huh", "Uh-huh."). Everything downstream works on the
//! canonical form produced here.

/// Canonicalize raw transcript text.
///
/// Lowercases, turns `-` and `_` into spaces, folds the typographic
/// apostrophe into `'`, drops anything that is not a letter, digit,
/// apostrophe or whitespace, then collapses whitespace. Total and
/// idempotent: `normalize(&normalize(s)) == normalize(s)`.
pub fn normalize(text: &str) -> String {
    let mut cleaned = String::with_capacity(text.len());
    for c in text.chars().flat_map(char::to_lowercase) {
        match c {
            '-' | '_' => cleaned.push(' '),
            '\u{2019}' | '\'' => cleaned.push('\''),
            c if c.is_alphanumeric() || c.is_whitespace() => cleaned.push(c),
            _ => {}
        }
    }

    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Like [`normalize`], treating a missing transcript as empty.
pub fn normalize_opt(text: Option<&str>) -> String {
    text.map(normalize).unwrap_or_default()
}

/// Split normalized text into tokens.
pub(crate) fn tokens(normalized: &str) -> Vec<&str> {
    normalized.split(' ').filter(|t| !t.is_empty()).collect()
}
