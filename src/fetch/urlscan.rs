//! URL extraction from chat messages.

use once_cell::sync::Lazy;
use regex::Regex;

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://[^ ]+").expect("URL regex compiles"));

/// All `http(s)` URLs in `message`, in text order. Duplicates are kept —
/// suppression is the caches' job downstream.
pub fn find_urls(message: &str) -> Vec<&str> {
    URL_RE.find_iter(message).map(|m| m.as_str()).collect()
}
