//! PostgreSQL sink for fetched records and uploaded media URLs
//!
//! Writes are plain bulk inserts with `ON CONFLICT DO NOTHING`, so a re-run
//! over the same entities is a no-op.

use poke_common::types::Pokemon;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::upload::UploadedMedia;

/// Rows per INSERT statement.
pub const CHUNK_SIZE: usize = 500;

pub struct PgRecordSink {
    pool: PgPool,
}

impl PgRecordSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Insert records keyed by `id_pokes`; returns rows actually inserted
    pub async fn save_pokemon(&self, records: &[Pokemon]) -> Result<u64> {
        let mut inserted = 0;
        for (chunk_idx, chunk) in records.chunks(CHUNK_SIZE).enumerate() {
            let result = pokemon_insert(chunk).build().execute(&self.pool).await?;
            inserted += result.rows_affected();
            debug!(chunk = chunk_idx, rows = chunk.len(), "Inserted pokes chunk");
        }

        info!(records = records.len(), inserted, "Saved pokemon records");
        Ok(inserted)
    }

    /// Insert `(name, media_url)` pairs; returns rows actually inserted
    pub async fn save_media(&self, media: &[UploadedMedia]) -> Result<u64> {
        let mut inserted = 0;
        for (chunk_idx, chunk) in media.chunks(CHUNK_SIZE).enumerate() {
            let result = media_insert(chunk).build().execute(&self.pool).await?;
            inserted += result.rows_affected();
            debug!(chunk = chunk_idx, rows = chunk.len(), "Inserted poke_media chunk");
        }

        info!(media = media.len(), inserted, "Saved media URLs");
        Ok(inserted)
    }
}

fn pokemon_insert(chunk: &[Pokemon]) -> QueryBuilder<'_, Postgres> {
    let mut query_builder = QueryBuilder::new(
        "INSERT INTO pokes (id_pokes, name, base_experience, height, weight, poke_order) ",
    );

    query_builder.push_values(chunk.iter(), |mut b, record| {
        b.push_bind(record.id)
            .push_bind(&record.name)
            .push_bind(record.base_experience)
            .push_bind(record.height)
            .push_bind(record.weight)
            .push_bind(record.order);
    });

    query_builder.push(" ON CONFLICT (id_pokes) DO NOTHING");
    query_builder
}

fn media_insert(chunk: &[UploadedMedia]) -> QueryBuilder<'_, Postgres> {
    let mut query_builder = QueryBuilder::new("INSERT INTO poke_media (name, media_url) ");

    query_builder.push_values(chunk.iter(), |mut b, media| {
        b.push_bind(&media.name).push_bind(&media.url);
    });

    query_builder.push(" ON CONFLICT (name, media_url) DO NOTHING");
    query_builder
}
