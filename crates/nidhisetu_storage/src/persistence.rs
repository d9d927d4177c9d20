use std::collections::HashMap;
use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use nidhisetu_contract::PendingSubmission;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tokio::sync::RwLock;
use tracing::{debug, info};

const SCHEMA_SQL: &str = include_str!("sql/schema.sql");

/// The whole list lives under one key and is rewritten on every save.
#[async_trait]
pub trait DraftPersistence: Send + Sync {
    async fn load(&self, beneficiary_id: &str) -> Result<Vec<PendingSubmission>>;

    async fn save(&self, beneficiary_id: &str, drafts: &[PendingSubmission]) -> Result<()>;
}

pub fn drafts_key(beneficiary_id: &str) -> String {
    format!("drafts:{beneficiary_id}")
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub sqlite_path: String,
}

#[derive(Debug, Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        let uri = normalize_sqlite_uri(&config.sqlite_path);
        let options = SqliteConnectOptions::from_str(&uri)
            .with_context(|| format!("invalid sqlite URI: {}", uri))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("failed to connect sqlite pool")?;

        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA_SQL.split(';') {
            let sql = statement.trim();
            if sql.is_empty() {
                continue;
            }
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .with_context(|| format!("migration failed for statement: {sql}"))?;
        }
        info!("draft store sqlite schema ready");
        Ok(())
    }

    pub async fn get_value(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar::<_, String>("SELECT value_json FROM kv_entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("query kv entry {key}"))
    }

    pub async fn put_value(&self, key: &str, value_json: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO kv_entries(key, value_json, updated_at) VALUES (?, ?, ?) ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value_json)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("upsert kv entry {key}"))?;
        Ok(())
    }
}

#[async_trait]
impl DraftPersistence for SqlitePersistence {
    async fn load(&self, beneficiary_id: &str) -> Result<Vec<PendingSubmission>> {
        let key = drafts_key(beneficiary_id);
        match self.get_value(&key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("parse persisted drafts for {beneficiary_id}")),
            None => Ok(Vec::new()),
        }
    }

    async fn save(&self, beneficiary_id: &str, drafts: &[PendingSubmission]) -> Result<()> {
        let key = drafts_key(beneficiary_id);
        let value_json = serde_json::to_string(drafts).context("serialize draft list")?;
        self.put_value(&key, &value_json).await?;
        debug!(beneficiary_id = %beneficiary_id, drafts = drafts.len(), "draft list persisted");
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    entries: RwLock<HashMap<String, Vec<PendingSubmission>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DraftPersistence for InMemoryPersistence {
    async fn load(&self, beneficiary_id: &str) -> Result<Vec<PendingSubmission>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(&drafts_key(beneficiary_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn save(&self, beneficiary_id: &str, drafts: &[PendingSubmission]) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(drafts_key(beneficiary_id), drafts.to_vec());
        Ok(())
    }
}

fn normalize_sqlite_uri(raw: &str) -> String {
    if raw.starts_with("sqlite:") {
        raw.to_string()
    } else {
        format!("sqlite://{raw}")
    }
}
