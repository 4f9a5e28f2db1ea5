use once_cell::sync::Lazy;
use regex::Regex;

use crate::core::parse::simplify;

/*
 * The legal set is kept small on purpose: anything outside it could be a
 * special or invisible character the target filesystem rejects.
 */
const LEGAL_CHARS: &str = "-+' @()[]{}\u{b0}#,.&";

static UNDERSCORE_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new("_+").unwrap());

/// Sanitizes a stream title into a file base name: letters, digits and the
/// legal punctuation set survive, double quotes become single quotes, and
/// everything else collapses into single underscores.
pub fn clean_file_name(name: &str) -> String {
    let simplified = simplify(name);
    let mapped: String = simplified
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || LEGAL_CHARS.contains(c) {
                c
            } else if c == '"' {
                '\''
            } else {
                '_'
            }
        })
        .collect();
    simplify(&UNDERSCORE_RUNS.replace_all(&mapped, "_"))
}
