//! Hashtag extraction for manually authored posts.

use once_cell::sync::OnceCell;
use regex::Regex;

use crate::model::TagSet;

/// Collect `#tag` labels from whitespace-separated tokens.
///
/// A token counts when it starts with `#` followed by at least one
/// alphanumeric character; the tag is the alphanumeric run, case preserved,
/// so trailing punctuation such as `?` is dropped.
pub fn extract_tags(text: &str) -> TagSet {
    static RE_TAG: OnceCell<Regex> = OnceCell::new();
    let re = RE_TAG.get_or_init(|| Regex::new(r"^#([\p{L}\p{N}]+)").expect("valid hashtag regex"));

    text.split_whitespace()
        .filter_map(|tok| re.captures(tok))
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}
