//! Plain-text cleanup for provider fields.

use scraper::Html;

/// Strips markup, decodes entities and collapses whitespace. Empty results become `None`.
pub fn clean_text(raw: &str) -> Option<String> {
    let text = if raw.contains('<') || raw.contains('&') {
        let fragment = Html::parse_fragment(raw);
        fragment.root_element().text().collect::<String>()
    } else {
        raw.to_string()
    };
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}
