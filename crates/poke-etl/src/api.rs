//! REST client for the catalog API
//!
//! Covers the two stages that talk to the upstream API:
//!
//! 1. Entity lister: one request to `{base}?limit=N`
//! 2. Detail fetcher: one request per entity, plus one per form

use poke_common::types::{id_from_url, EntityRef, FormRef, MediaRef, Pokemon};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::error::{FetchError, ListError};
use crate::extract::extract;
use crate::http::HttpClient;

/// Decoded detail document of one entity
#[derive(Debug, Clone)]
pub struct PokemonDetail {
    pub record: Pokemon,
    /// Media found under the `sprites` tree
    pub media: Vec<MediaRef>,
    /// Forms that need a follow-up fetch
    pub forms: Vec<FormRef>,
}

/// Decoded form document
#[derive(Debug, Clone)]
pub struct FormDetail {
    pub name: String,
    pub media: Vec<MediaRef>,
}

#[derive(Deserialize)]
struct ListDocument {
    results: Option<Vec<ListEntry>>,
}

#[derive(Deserialize)]
struct ListEntry {
    name: String,
    url: String,
}

#[derive(Deserialize)]
struct DetailDocument {
    id: i64,
    name: String,
    base_experience: Option<i64>,
    height: i64,
    weight: i64,
    order: i64,
    #[serde(default)]
    sprites: Value,
    /// Absent and `null` both mean no forms
    #[serde(default)]
    forms: Option<Vec<FormRef>>,
}

#[derive(Deserialize)]
struct FormDocument {
    name: String,
    #[serde(default)]
    sprites: Value,
}

#[derive(Clone, Debug)]
pub struct PokeApiClient {
    http: HttpClient,
    base_url: String,
}

impl PokeApiClient {
    pub fn new(http: HttpClient, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn list_url(&self, limit: usize) -> String {
        format!("{}?limit={}", self.base_url, limit)
    }

    /// Detail URL of the entity with numeric `id`
    pub fn detail_url(&self, id: i64) -> String {
        format!("{}/{}", self.base_url, id)
    }

    /// Entity reference for an explicit id, named after the id until fetched
    pub fn entity_for_id(&self, id: i64) -> EntityRef {
        EntityRef {
            id,
            name: id.to_string(),
            detail_url: self.detail_url(id),
        }
    }

    /// Fetch the collection listing
    ///
    /// Entries whose URL does not end in a numeric id are skipped with a warning.
    #[instrument(skip(self))]
    pub async fn list(&self, limit: usize) -> Result<Vec<EntityRef>, ListError> {
        let url = self.list_url(limit);

        let body = async {
            self.http
                .get(&url)
                .await?
                .error_for_status()?
                .bytes()
                .await
        }
        .await
        .map_err(|source| ListError::Request {
            url: url.clone(),
            source,
        })?;

        let document: ListDocument =
            serde_json::from_slice(&body).map_err(|source| ListError::Decode {
                url: url.clone(),
                source,
            })?;

        let results = document
            .results
            .ok_or_else(|| ListError::MissingResults { url: url.clone() })?;

        let entities: Vec<EntityRef> = results
            .into_iter()
            .filter_map(|entry| match id_from_url(&entry.url) {
                Ok(id) => Some(EntityRef {
                    id,
                    name: entry.name,
                    detail_url: entry.url,
                }),
                Err(e) => {
                    warn!(name = %entry.name, error = %e, "Skipping list entry without numeric id");
                    None
                },
            })
            .collect();

        debug!(count = entities.len(), "Listed entities");
        Ok(entities)
    }

    /// Fetch and decode one entity's detail document
    #[instrument(skip(self))]
    pub async fn fetch_detail(&self, detail_url: &str) -> Result<PokemonDetail, FetchError> {
        let document: DetailDocument = self.get_document(detail_url).await?;

        Ok(PokemonDetail {
            media: extract(&document.sprites),
            forms: document.forms.unwrap_or_default(),
            record: Pokemon {
                id: document.id,
                name: document.name,
                base_experience: document.base_experience,
                height: document.height,
                weight: document.weight,
                order: document.order,
            },
        })
    }

    /// Fetch and decode one form document
    #[instrument(skip(self), fields(form = %form.name))]
    pub async fn fetch_form(&self, form: &FormRef) -> Result<FormDetail, FetchError> {
        let document: FormDocument = self.get_document(&form.url).await?;

        Ok(FormDetail {
            media: extract(&document.sprites),
            name: document.name,
        })
    }

    async fn get_document<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let body = async { self.http.get(url).await?.error_for_status()?.bytes().await }
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        serde_json::from_slice(&body).map_err(|source| FetchError::Decode {
            url: url.to_string(),
            source,
        })
    }
}
