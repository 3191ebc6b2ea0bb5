//! Title-vs-URL similarity filter ("dynsearch").
//!
//! Suppresses title announcements that would only repeat what the URL
//! already says, e.g. `/foo-bar-baz` → "Foo Bar Baz". Both sides are
//! normalized (separators dropped, lower-cased), then the title must differ
//! enough from the path segments and their suffix concatenations.

use once_cell::sync::Lazy;
use percent_encoding::percent_decode_str;
use regex::Regex;
use url::Url;

/// Short strings compare exactly; from this length on, edit distance decides.
const EXACT_LENGTH_LIMIT: usize = 14;
/// Minimum edit distance for a long title to count as different.
const MIN_DISTANCE: usize = 7;

static TITLE_SPLIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[-–]").expect("title split regex compiles"));

/// Normalized path segments of `url`: percent-decoded, separators removed,
/// lower-cased, trailing digits stripped, split on `/`.
pub fn prepare_url(url: &Url) -> Vec<String> {
    let path = percent_decode_str(url.path()).decode_utf8_lossy();
    let cleaned: String = path
        .chars()
        .filter(|c| !matches!(c, '-' | ' ' | '+' | '_'))
        .flat_map(char::to_lowercase)
        .collect();
    let cleaned = cleaned.trim_end_matches(|c: char| c.is_ascii_digit());
    cleaned.split('/').map(str::to_string).collect()
}

/// Normalized title: separators removed, lower-cased, cut at the first
/// dash or en-dash (sites love "Page Title - Site Name").
pub fn prepare_title(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| !matches!(c, '+' | ' ' | '_'))
        .flat_map(char::to_lowercase)
        .collect();
    TITLE_SPLIT_RE
        .split(&cleaned)
        .next()
        .unwrap_or_default()
        .to_string()
}

fn difference_check(a: &str, s: &str) -> bool {
    let (a_len, s_len) = (a.chars().count(), s.chars().count());
    if a_len < EXACT_LENGTH_LIMIT || s_len < EXACT_LENGTH_LIMIT {
        a != s
    } else {
        strsim::levenshtein(a, s) >= MIN_DISTANCE
    }
}

/// Walk the path segments right to left, requiring the title to differ from
/// the final segment and from every suffix concatenation. Returns `true`
/// when the title is worth announcing.
pub fn dynsearch(segments: &[String], title: &str) -> bool {
    let Some((_, rest)) = segments.split_first() else {
        return difference_check("", title);
    };
    if rest.is_empty() {
        return difference_check(&segments[0], title);
    }
    if !dynsearch(rest, title) {
        return false;
    }
    difference_check(&rest.concat(), title)
}
