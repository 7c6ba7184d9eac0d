//! URL normalization and content-addressed item identity.
//!
//! Two URLs that differ only in scheme/host casing, a `www.` prefix, a
//! trailing slash, the fragment, tracking parameters, or query-parameter
//! order normalize to the same string and therefore hash to the same
//! [`ItemId`]. Paths stay case-sensitive and are hashed as written.

use itertools::Itertools;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use url::{Url, form_urlencoded};

/// Query keys dropped during normalization (compared case-insensitively).
pub const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "utm_id",
    "fbclid",
    "gclid",
    "gclsrc",
    "dclid",
    "msclkid",
    "ref",
    "source",
    "mc_cid",
    "mc_eid",
    "_ga",
    "_gl",
    "yclid",
    "twclid",
];

/// Hex SHA-256 of a normalized URL. Primary key of the index and the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    TRACKING_PARAMS.contains(&key.as_str())
}

/// Characters `quote_plus` leaves alone in query keys and values.
const QUERY_KEEP: &AsciiSet = &NON_ALPHANUMERIC.remove(b'_').remove(b'.').remove(b'-').remove(b'~');

/// Form-encode one query key or value. Spaces become `+`.
fn quote_plus(s: &str) -> String {
    utf8_percent_encode(s, QUERY_KEEP).to_string().replace("%20", "+")
}

/// Drop `;params` from the last path segment.
fn strip_path_params(path: &str) -> &str {
    let last_segment = path.rfind('/').unwrap_or(0);
    match path[last_segment..].find(';') {
        Some(i) => &path[..last_segment + i],
        None => path,
    }
}

/// Normalize a URL for deduplication.
///
/// The canonical string is assembled from the raw parts of the input: the
/// path is kept as written (no percent-encoding of non-ASCII characters),
/// explicit ports survive, and the query is re-encoded form style with `~`
/// left as is. Indexes written by earlier collector versions hash the same
/// way, so previously seen items stay duplicates.
///
/// # Arguments
///
/// * `raw` - The URL as it appeared in the feed
///
/// # Returns
///
/// The canonical URL. Input that does not parse as an absolute,
/// host-bearing URL is returned unchanged.
pub fn normalize(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(parsed) = Url::parse(trimmed) else {
        return raw.to_string();
    };
    let Some((_, rest)) = trimmed.split_once(':') else {
        return raw.to_string();
    };
    let Some(rest) = rest.strip_prefix("//") else {
        return raw.to_string();
    };

    let rest = rest.split('#').next().unwrap_or_default();
    let (rest, query) = match rest.split_once('?') {
        Some((rest, query)) => (rest, query),
        None => (rest, ""),
    };
    let (netloc, path) = rest.split_at(rest.find('/').unwrap_or(rest.len()));

    let netloc = netloc.to_lowercase();
    let host = match netloc.strip_prefix("www.") {
        Some(stripped) => stripped,
        None => netloc.as_str(),
    };

    let path = if parsed.scheme().starts_with("http") {
        strip_path_params(path)
    } else {
        path
    };
    let path = if path != "/" && path.ends_with('/') {
        path.trim_end_matches('/')
    } else {
        path
    };
    let path = if path.is_empty() { "/" } else { path };

    let kept = form_urlencoded::parse(query.as_bytes())
        .filter(|(k, v)| !v.is_empty() && !is_tracking_param(k))
        .sorted_by(|a, b| a.0.cmp(&b.0))
        .map(|(k, v)| format!("{}={}", quote_plus(&k), quote_plus(&v)))
        .join("&");

    let mut canonical = format!("{}://{host}{path}", parsed.scheme());
    if !kept.is_empty() {
        canonical.push('?');
        canonical.push_str(&kept);
    }
    canonical
}

/// Hash an already-normalized URL.
pub fn item_id_for(canonical: &str) -> ItemId {
    let digest = Sha256::digest(canonical.as_bytes());
    ItemId(format!("{:x}", digest))
}

/// Normalize `raw` and hash it.
pub fn identify(raw: &str) -> ItemId {
    item_id_for(&normalize(raw))
}
