//! SHA-256 fingerprints that decide whether a stored item changed upstream.

use portal_core::ContentItem;
use sha2::{Digest, Sha256};

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Hash of the upstream-provided fields. Derived fields (score, category, tags) and
/// storage bookkeeping are excluded, so re-ingesting identical provider data is a no-op.
pub fn content_fingerprint(item: &ContentItem) -> String {
    let meta = item.meta();
    let mut parts: Vec<&str> = vec![
        item.kind().as_str(),
        meta.title.as_deref().unwrap_or_default(),
        meta.description.as_deref().unwrap_or_default(),
    ];
    let published = meta.published_at.to_rfc3339();
    parts.push(&published);
    let key = item.natural_key().map(|k| k.to_string()).unwrap_or_default();
    parts.push(&key);

    match item {
        ContentItem::News(article) => {
            parts.push(article.source_name.as_deref().unwrap_or_default());
            parts.push(article.author.as_deref().unwrap_or_default());
            parts.push(article.image_url.as_deref().unwrap_or_default());
        }
        ContentItem::Video(video) => {
            parts.push(video.channel_title.as_deref().unwrap_or_default());
            parts.push(video.thumbnail_url.as_deref().unwrap_or_default());
        }
    }

    sha256_hex(parts.join("\u{1f}").as_bytes())
}
