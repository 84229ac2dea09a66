//! Common types used across the Poke ETL workspace

use serde::{Deserialize, Serialize};

use crate::error::{PokeError, Result};

// ============================================================================
// Catalog Types
// ============================================================================

/// One entry of the collection listing.
///
/// Created by the entity lister and consumed exactly once by the detail
/// fetcher. The `id` is the trailing path segment of `detail_url`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    /// Numeric identifier of the entity
    pub id: i64,

    /// Slug name of the entity (e.g., "bulbasaur")
    pub name: String,

    /// Absolute URL of the entity's detail document
    pub detail_url: String,
}

/// Canonical catalog record decoded from a detail document.
///
/// Field names follow the upstream API; `order` is stored as `poke_order`
/// by the relational sink because `order` is reserved in SQL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pokemon {
    pub id: i64,
    pub name: String,
    /// Nullable upstream for some alternate forms
    pub base_experience: Option<i64>,
    pub height: i64,
    pub weight: i64,
    pub order: i64,
}

/// A discovered media URL plus the structural label it was found under.
///
/// The label is the `_`-joined path of keys leading to the URL and is used to
/// build a readable, deterministic filename.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaRef {
    pub label: String,
    pub url: String,
}

impl MediaRef {
    pub fn new(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
        }
    }
}

/// Secondary sub-resource of an entity that needs its own fetch (a "form").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormRef {
    pub name: String,
    pub url: String,
}

// ============================================================================
// URL Helpers
// ============================================================================

/// Returns true if `value` looks like an HTTP(S) URL.
pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Parses the numeric id from the trailing path segment of a resource URL.
///
/// ```
/// use poke_common::types::id_from_url;
///
/// assert_eq!(id_from_url("https://pokeapi.co/api/v2/pokemon/25/").unwrap(), 25);
/// ```
pub fn id_from_url(resource_url: &str) -> Result<i64> {
    let parsed = url::Url::parse(resource_url)
        .map_err(|e| PokeError::invalid_url(resource_url, e.to_string()))?;

    let segment = parsed
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).next_back())
        .ok_or_else(|| PokeError::invalid_url(resource_url, "no path segments"))?;

    segment
        .parse::<i64>()
        .map_err(|_| PokeError::invalid_url(resource_url, format!("'{}' is not a numeric id", segment)))
}

/// Extension of the last path segment of `media_url`, without the dot.
///
/// Query strings and fragments are ignored. Returns `None` if the URL does
/// not parse or the final segment carries no extension.
pub fn url_extension(media_url: &str) -> Option<String> {
    let parsed = url::Url::parse(media_url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    let (stem, ext) = last.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
