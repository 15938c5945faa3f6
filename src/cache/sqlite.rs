/// SQLite-backed implementation of CacheStore
///
/// Uses sqlx with WAL mode so cached answers survive restarts.
/// Runs migrations automatically on initialization.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqliteSynchronous},
    Row,
};

use super::{CacheEntry, CacheFilter, CacheStore};
use crate::errors::LitragError;
use crate::models::Citation;

const SELECT_COLUMNS: &str = "SELECT id, user_id, cache_key, query, paper_ids, response, citations, \
                              created_at, expires_at, hit_count FROM response_cache";

/// SQLite-backed cache store using a sqlx connection pool.
pub struct SqliteCacheStore {
    pool: SqlitePool,
}

impl SqliteCacheStore {
    /// Open (or create) the database at db_path and apply pending migrations.
    pub async fn new(db_path: &str) -> Result<Self, LitragError> {
        // SqliteConnectOptions wants a bare path
        let path = db_path.strip_prefix("sqlite://").unwrap_or(db_path);

        let opts = path
            .parse::<SqliteConnectOptions>()
            .map_err(|e| LitragError::Storage(format!("Invalid db_path '{}': {}", db_path, e)))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePool::connect_with(opts)
            .await
            .map_err(|e| LitragError::Storage(format!("Failed to connect to database: {}", e)))?;

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, applying migrations.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, LitragError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(SqliteCacheStore { pool })
    }
}

/// Fixed-width UTC timestamps so string comparison in SQL is chronological.
fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(column: &str, raw: &str) -> Result<DateTime<Utc>, LitragError> {
    raw.parse::<DateTime<Utc>>()
        .map_err(|e| LitragError::Storage(format!("Parse {} '{}': {}", column, raw, e)))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, LitragError> {
    serde_json::to_string(value).map_err(|e| LitragError::Internal(format!("Serialize cache row: {}", e)))
}

/// Map a sqlx row to a CacheEntry manually (JSON columns are plain TEXT).
fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<CacheEntry, LitragError> {
    let paper_ids_json: String = row.try_get("paper_ids")?;
    let citations_json: String = row.try_get("citations")?;
    let created_at: String = row.try_get("created_at")?;
    let expires_at: String = row.try_get("expires_at")?;

    let paper_ids: Vec<String> = serde_json::from_str(&paper_ids_json)
        .map_err(|e| LitragError::Storage(format!("Parse paper_ids: {}", e)))?;
    let citations: Vec<Citation> = serde_json::from_str(&citations_json)
        .map_err(|e| LitragError::Storage(format!("Parse citations: {}", e)))?;

    Ok(CacheEntry {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        cache_key: row.try_get("cache_key")?,
        query: row.try_get("query")?,
        paper_ids,
        response: row.try_get("response")?,
        citations,
        created_at: parse_ts("created_at", &created_at)?,
        expires_at: parse_ts("expires_at", &expires_at)?,
        hit_count: row.try_get("hit_count")?,
    })
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn get(&self, user_id: &str, cache_key: &str) -> Result<Option<CacheEntry>, LitragError> {
        let sql = format!("{} WHERE user_id = ? AND cache_key = ?", SELECT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(user_id)
            .bind(cache_key)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_entry).transpose()
    }

    async fn upsert(&self, entry: CacheEntry) -> Result<(), LitragError> {
        sqlx::query(
            "INSERT INTO response_cache \
             (id, user_id, cache_key, query, paper_ids, response, citations, created_at, expires_at, hit_count) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (user_id, cache_key) DO UPDATE SET \
             query = excluded.query, paper_ids = excluded.paper_ids, response = excluded.response, \
             citations = excluded.citations, created_at = excluded.created_at, \
             expires_at = excluded.expires_at, hit_count = excluded.hit_count",
        )
        .bind(&entry.id)
        .bind(&entry.user_id)
        .bind(&entry.cache_key)
        .bind(&entry.query)
        .bind(to_json(&entry.paper_ids)?)
        .bind(&entry.response)
        .bind(to_json(&entry.citations)?)
        .bind(format_ts(&entry.created_at))
        .bind(format_ts(&entry.expires_at))
        .bind(entry.hit_count)
        .execute(&self.pool)
        .await
        .map_err(|e| LitragError::Storage(format!("Failed to upsert cache entry: {}", e)))?;

        Ok(())
    }

    async fn delete_by_id(&self, id: &str) -> Result<bool, LitragError> {
        let result = sqlx::query("DELETE FROM response_cache WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_where(&self, user_id: &str, filter: &CacheFilter) -> Result<u64, LitragError> {
        // Build dynamic WHERE clause
        let mut conditions = vec!["user_id = ?".to_string()];
        let mut binds: Vec<String> = vec![user_id.to_string()];

        if let Some(ids) = &filter.paper_ids_any {
            if ids.is_empty() {
                return Ok(0);
            }
            let placeholders = vec!["?"; ids.len()].join(", ");
            conditions.push(format!(
                "EXISTS (SELECT 1 FROM json_each(response_cache.paper_ids) WHERE json_each.value IN ({}))",
                placeholders
            ));
            binds.extend(ids.iter().cloned());
        }
        if let Some(cutoff) = &filter.expired_before {
            conditions.push("expires_at < ?".to_string());
            binds.push(format_ts(cutoff));
        }

        let sql = format!("DELETE FROM response_cache WHERE {}", conditions.join(" AND "));
        let mut q = sqlx::query(&sql);
        for value in &binds {
            q = q.bind(value);
        }

        let result = q
            .execute(&self.pool)
            .await
            .map_err(|e| LitragError::Storage(format!("Failed to delete cache entries: {}", e)))?;
        Ok(result.rows_affected())
    }

    async fn list_by_owner(&self, user_id: &str) -> Result<Vec<CacheEntry>, LitragError> {
        let sql = format!("{} WHERE user_id = ? ORDER BY expires_at ASC, hit_count ASC", SELECT_COLUMNS);
        let rows = sqlx::query(&sql).bind(user_id).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_entry).collect()
    }

    async fn increment_hit_count(&self, id: &str) -> Result<(), LitragError> {
        sqlx::query("UPDATE response_cache SET hit_count = hit_count + 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
