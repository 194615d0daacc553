//! Text canonicalization used by the similarity scorer

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Characters that survive canonicalization. The accented set is the
/// Spanish vowels + ñ plus the Guarani nasal vowels, for inputs that
/// arrive in a pre-composed form NFD does not decompose.
fn is_allowed(c: char) -> bool {
    matches!(c,
        'a'..='z'
        | 'á' | 'é' | 'í' | 'ó' | 'ú' | 'ñ'
        | 'ã' | 'ẽ' | 'ĩ' | 'õ' | 'ũ'
        | '\'' | '’' | ' ')
}

/// Canonicalize text for scoring: strip diacritics (NFD decomposition,
/// combining marks dropped), lowercase, map everything outside the allowed
/// set to a space, collapse whitespace runs, trim.
///
/// Pure and total; empty input yields an empty string.
pub fn normalize(input: &str) -> String {
    let lowered: String = input
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();

    let mut out = String::with_capacity(lowered.len());
    let mut pending_space = false;
    for c in lowered.chars() {
        let c = if c.is_whitespace() || !is_allowed(c) { ' ' } else { c };
        if c == ' ' {
            pending_space = !out.is_empty();
        } else {
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            out.push(c);
        }
    }
    out
}
