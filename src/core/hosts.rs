//! Decides whether a URL's host is claimed by an extractor host pattern.
//!
//! Patterns come from the extractor's site list and look like
//! `absnews.com` or `absnews:videos`: every token is mandatory and must
//! appear as one dot-component of the host, in any order.

/// ```
/// use mediagrab::core::hosts::matches_pattern;
///
/// assert!(matches_pattern("www.absnews.com", "absnews.com"));
/// assert!(matches_pattern("videos.absnews.com", "absnews:videos"));
/// assert!(!matches_pattern("www.absnews.com", "absnews:videos"));
/// ```
pub fn matches_pattern(host: &str, pattern: &str) -> bool {
    let components: Vec<&str> = host.split('.').filter(|s| !s.is_empty()).collect();
    pattern
        .split(['.', ':', '|'])
        .filter(|s| !s.is_empty())
        .all(|mandatory| {
            components
                .iter()
                .any(|component| component.eq_ignore_ascii_case(mandatory))
        })
}

/// Any-of matching against a pattern list.
pub fn matches_host<S: AsRef<str>>(host: &str, patterns: &[S]) -> bool {
    patterns
        .iter()
        .any(|pattern| matches_pattern(host, pattern.as_ref()))
}

/// Extracts the host of a page URL for matching.
pub fn url_host(page_url: &str) -> Option<String> {
    let parsed = url::Url::parse(page_url).ok()?;
    parsed.host_str().map(str::to_string)
}
