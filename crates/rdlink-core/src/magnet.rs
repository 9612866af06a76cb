//! Magnet URI inspection.

use std::sync::LazyLock;

use regex::Regex;

/// A v1 BitTorrent info hash: exactly 40 hex characters after `urn:btih:`.
static RE_BTIH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\burn:btih:([0-9a-f]{40})\b").unwrap());

/// Extract the lowercase 40-char hex info hash from a magnet link.
///
/// Base32 hashes and v2 (`btmh`) topics are not accepted.
pub fn extract_info_hash(link: &str) -> Option<String> {
    RE_BTIH
        .captures(link.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
}

/// The decoded `dn` (display name) parameter, if present.
pub fn display_name(link: &str) -> Option<String> {
    let parsed = url::Url::parse(link.trim()).ok()?;
    if parsed.scheme() != "magnet" {
        return None;
    }
    parsed
        .query_pairs()
        .find(|(k, _)| k == "dn")
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
