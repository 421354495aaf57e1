//! SQLite-backed state store.
//!
//! Every document the engine must reload after a restart lives here:
//! block list, quota records, lifetime stats, actor registry, per-actor
//! identity archive, and the runtime-editable config scalars. Mutations
//! write through immediately; in-memory caching is the caller's concern.

use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;

use crate::identity::Identity;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("could not resolve database path: {0}")]
    Path(#[from] std::io::Error),

    #[error("stored document is malformed: {0}")]
    Decode(#[from] serde_json::Error),
}

/// One archived identity row, as persisted by the orchestrator.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IdentityRecord {
    pub address: String,
    pub secret_key: String,
    pub recovery_phrase: String,
    pub registered: bool,
    pub chat_count: u32,
    pub topics: Vec<String>,
    pub proxy_ref: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the engine database and run migrations.
    /// Handles both "sqlite:./foo.db" and bare path forms.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let file_path = database_url.strip_prefix("sqlite:").unwrap_or(database_url);

        let abs_path = std::env::current_dir()?.join(file_path);
        if let Some(parent) = abs_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(&abs_path)
                .create_if_missing(true),
        )
        .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS blocked_actors (
                actor_id TEXT PRIMARY KEY
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS known_actors (
                actor_id   TEXT PRIMARY KEY,
                first_seen TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS quota_records (
                actor_id TEXT    PRIMARY KEY,
                day      TEXT    NOT NULL,
                used     INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS lifetime_stats (
                key   TEXT    PRIMARY KEY,
                value INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS identities (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                actor_id        TEXT    NOT NULL,
                address         TEXT    NOT NULL,
                secret_key      TEXT    NOT NULL,
                recovery_phrase TEXT    NOT NULL,
                registered      INTEGER NOT NULL,
                chat_count      INTEGER NOT NULL,
                topics          TEXT    NOT NULL,
                proxy_ref       TEXT,
                created_at      TEXT    NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS identities_actor ON identities (actor_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS config_scalars (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ---- block list ----

    pub async fn block_actor(&self, actor_id: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT OR IGNORE INTO blocked_actors (actor_id) VALUES (?)")
            .bind(actor_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn unblock_actor(&self, actor_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM blocked_actors WHERE actor_id = ?")
            .bind(actor_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn is_blocked(&self, actor_id: &str) -> Result<bool, StoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT actor_id FROM blocked_actors WHERE actor_id = ?")
                .bind(actor_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    // ---- actor registry ----

    pub async fn record_actor(&self, actor_id: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT OR IGNORE INTO known_actors (actor_id, first_seen) VALUES (?, ?)")
            .bind(actor_id)
            .bind(chrono::Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn known_actors(&self) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT actor_id FROM known_actors ORDER BY first_seen")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn unique_actor_count(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM known_actors")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Per-actor usage for one calendar day, for admin reporting.
    pub async fn quota_usage_on(&self, day: &str) -> Result<Vec<(String, i64)>, StoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT actor_id, used FROM quota_records WHERE day = ? ORDER BY actor_id",
        )
        .bind(day)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ---- lifetime stats ----

    pub async fn incr_stat(&self, key: &str, delta: i64) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO lifetime_stats (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = value + excluded.value",
        )
        .bind(key)
        .bind(delta)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn stat(&self, key: &str) -> Result<i64, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT value FROM lifetime_stats WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(v,)| v).unwrap_or(0))
    }

    // ---- identity archive ----

    pub async fn append_identity(
        &self,
        actor_id: &str,
        identity: &Identity,
    ) -> Result<(), StoreError> {
        let topics = serde_json::to_string(&identity.topics)?;
        sqlx::query(
            "INSERT INTO identities
             (actor_id, address, secret_key, recovery_phrase, registered, chat_count, topics, proxy_ref, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(actor_id)
        .bind(&identity.address)
        .bind(&identity.secret_key)
        .bind(&identity.recovery_phrase)
        .bind(identity.registered as i64)
        .bind(identity.chat_count as i64)
        .bind(topics)
        .bind(&identity.proxy_ref)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn identities_for(&self, actor_id: &str) -> Result<Vec<IdentityRecord>, StoreError> {
        let rows: Vec<(String, String, String, i64, i64, String, Option<String>, String)> =
            sqlx::query_as(
                "SELECT address, secret_key, recovery_phrase, registered, chat_count, topics, proxy_ref, created_at
                 FROM identities WHERE actor_id = ? ORDER BY id",
            )
            .bind(actor_id)
            .fetch_all(&self.pool)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for (address, secret_key, recovery_phrase, registered, chat_count, topics, proxy_ref, created_at) in rows {
            records.push(IdentityRecord {
                address,
                secret_key,
                recovery_phrase,
                registered: registered != 0,
                chat_count: chat_count as u32,
                topics: serde_json::from_str(&topics)?,
                proxy_ref,
                created_at,
            });
        }
        Ok(records)
    }

    // ---- config scalars ----

    pub async fn scalar(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM config_scalars WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(v,)| v))
    }

    pub async fn set_scalar(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO config_scalars (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::create_identity;

    async fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flock.db");
        let store = Store::connect(path.to_str().unwrap()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn block_list_round_trips_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flock.db");
        let url = path.to_str().unwrap().to_string();

        {
            let store = Store::connect(&url).await.unwrap();
            store.block_actor("mallory").await.unwrap();
            assert!(store.is_blocked("mallory").await.unwrap());
            assert!(!store.is_blocked("alice").await.unwrap());
        }

        let store = Store::connect(&url).await.unwrap();
        assert!(store.is_blocked("mallory").await.unwrap());
        store.unblock_actor("mallory").await.unwrap();
        assert!(!store.is_blocked("mallory").await.unwrap());
    }

    #[tokio::test]
    async fn stats_and_actors_accumulate() {
        let (_dir, store) = temp_store().await;

        store.record_actor("alice").await.unwrap();
        store.record_actor("bob").await.unwrap();
        store.record_actor("alice").await.unwrap();
        assert_eq!(store.unique_actor_count().await.unwrap(), 2);

        store.incr_stat("identities_requested", 3).await.unwrap();
        store.incr_stat("identities_requested", 2).await.unwrap();
        assert_eq!(store.stat("identities_requested").await.unwrap(), 5);
        assert_eq!(store.stat("missing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn identity_archive_preserves_topics_and_flags() {
        let (_dir, store) = temp_store().await;

        let mut identity = create_identity().unwrap();
        identity.topics = vec!["t1".to_string(), "t2".to_string()];
        identity.registered = true;
        identity.chat_count = 4;
        identity.proxy_ref = Some("socks5://10.0.0.1:1080".to_string());

        store.append_identity("alice", &identity).await.unwrap();
        store
            .append_identity("alice", &create_identity().unwrap())
            .await
            .unwrap();

        let records = store.identities_for("alice").await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].address, identity.address);
        assert_eq!(records[0].topics, vec!["t1", "t2"]);
        assert!(records[0].registered);
        assert_eq!(records[0].chat_count, 4);
        assert!(!records[1].registered);

        assert!(store.identities_for("bob").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scalars_overwrite_in_place() {
        let (_dir, store) = temp_store().await;

        assert!(store.scalar("welcome_text").await.unwrap().is_none());
        store.set_scalar("welcome_text", "hello").await.unwrap();
        store.set_scalar("welcome_text", "howdy").await.unwrap();
        assert_eq!(
            store.scalar("welcome_text").await.unwrap().as_deref(),
            Some("howdy")
        );
    }
}
