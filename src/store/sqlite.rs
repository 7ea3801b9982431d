//! `sqlx`-backed (SQLite) implementation of [`CounterStore`]/[`QueueStore`],
//! against the schema recovered from `DBH`'s queries in
//! `examples/original_source/yubistack/ykval.py` (`yubikeys`, `clients`,
//! `queue` tables).

use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::Row;

use crate::error::StoreError;
use crate::model::{ClientRecord, KeyRecord, QueueEntry};
use crate::store::{CounterStore, QueueStore};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        SqliteStore { pool }
    }

    /// Create the schema if it doesn't exist yet. Intended for local/dev
    /// setups; production deployments migrate with `sqlx::migrate!`.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS yubikeys (
                public_name TEXT PRIMARY KEY,
                active      INTEGER NOT NULL DEFAULT 1,
                yk_counter  INTEGER NOT NULL DEFAULT -1,
                yk_use      INTEGER NOT NULL DEFAULT -1,
                yk_high     INTEGER NOT NULL DEFAULT -1,
                yk_low      INTEGER NOT NULL DEFAULT -1,
                nonce       TEXT NOT NULL DEFAULT '0000000000000000',
                modified    INTEGER NOT NULL DEFAULT -1,
                created     INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS clients (
                client_id INTEGER PRIMARY KEY,
                secret    TEXT NOT NULL,
                active    INTEGER NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queue (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                server_url   TEXT NOT NULL,
                modified     INTEGER NOT NULL,
                server_nonce TEXT NOT NULL,
                otp          TEXT NOT NULL,
                info         TEXT NOT NULL,
                queued       INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert or update a statically configured client, used to seed the
    /// `clients` table from `config.json` at startup.
    pub async fn upsert_client(
        &self,
        client_id: i64,
        secret: &str,
        active: bool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO clients (client_id, secret, active) VALUES (?, ?, ?) \
             ON CONFLICT(client_id) DO UPDATE SET secret = excluded.secret, active = excluded.active",
        )
        .bind(client_id)
        .bind(secret)
        .bind(active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CounterStore for SqliteStore {
    async fn get_or_create(&self, public_name: &str, created: i64) -> Result<KeyRecord, StoreError> {
        if let Some(row) = sqlx::query(
            "SELECT active, public_name, yk_counter, yk_use, yk_high, yk_low, nonce, modified, created \
             FROM yubikeys WHERE public_name = ?",
        )
        .bind(public_name)
        .fetch_optional(&self.pool)
        .await?
        {
            return Ok(row_to_key_record(&row));
        }

        let sentinel = KeyRecord::sentinel(public_name, created);
        sqlx::query(
            "INSERT INTO yubikeys (active, public_name, yk_counter, yk_use, yk_high, yk_low, nonce, modified, created) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(sentinel.active)
        .bind(&sentinel.public_name)
        .bind(sentinel.yk_counter)
        .bind(sentinel.yk_use)
        .bind(sentinel.yk_high)
        .bind(sentinel.yk_low)
        .bind(&sentinel.nonce)
        .bind(sentinel.modified)
        .bind(sentinel.created)
        .execute(&self.pool)
        .await?;
        Ok(sentinel)
    }

    async fn conditional_update(&self, record: &KeyRecord) -> Result<bool, StoreError> {
        // Mirrors `update_db_counters`: the comparison and the write are one
        // statement, so there's a single linearization point per public_name.
        let result = sqlx::query(
            r#"
            UPDATE yubikeys
            SET yk_counter = ?, yk_use = ?, yk_high = ?, yk_low = ?, nonce = ?, modified = ?
            WHERE public_name = ?
              AND (yk_counter < ? OR (yk_counter = ? AND yk_use < ?))
            "#,
        )
        .bind(record.yk_counter)
        .bind(record.yk_use)
        .bind(record.yk_high)
        .bind(record.yk_low)
        .bind(&record.nonce)
        .bind(record.modified)
        .bind(&record.public_name)
        .bind(record.yk_counter)
        .bind(record.yk_counter)
        .bind(record.yk_use)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_client(&self, client_id: i64) -> Result<ClientRecord, StoreError> {
        sqlx::query("SELECT client_id, secret, active FROM clients WHERE client_id = ?")
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| ClientRecord {
                client_id: row.get("client_id"),
                secret: row.get("secret"),
                active: row.get::<i64, _>("active") != 0,
            })
            .ok_or_else(|| StoreError::NotFound(format!("client {client_id}")))
    }

    async fn list_active_identities(&self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT public_name FROM yubikeys WHERE active != 0")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|row| row.get("public_name")).collect())
    }
}

#[async_trait]
impl QueueStore for SqliteStore {
    async fn enqueue(&self, entry: QueueEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO queue (server_url, modified, server_nonce, otp, info, queued) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.server_url)
        .bind(entry.modified)
        .bind(&entry.server_nonce)
        .bind(&entry.otp)
        .bind(&entry.info)
        .bind(entry.queued)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_queue(&self, modified: i64, server_nonce: &str) -> Result<Vec<QueueEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT server_url, modified, server_nonce, otp, info, queued \
             FROM queue WHERE modified = ? AND server_nonce = ?",
        )
        .bind(modified)
        .bind(server_nonce)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_queue_entry).collect())
    }

    async fn remove(&self, server_url: &str, modified: i64, server_nonce: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM queue WHERE server_url = ? AND modified = ? AND server_nonce = ?")
            .bind(server_url)
            .bind(modified)
            .bind(server_nonce)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn null_queued(&self, server_url: &str, modified: i64, server_nonce: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE queue SET queued = NULL WHERE server_url = ? AND modified = ? AND server_nonce = ?")
            .bind(server_url)
            .bind(modified)
            .bind(server_nonce)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_active(&self, server_url: &str) -> Result<Vec<QueueEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT server_url, modified, server_nonce, otp, info, queued \
             FROM queue WHERE server_url = ? AND queued IS NOT NULL",
        )
        .bind(server_url)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_queue_entry).collect())
    }

    async fn list_due_for_redrive(&self) -> Result<Vec<QueueEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT server_url, modified, server_nonce, otp, info, queued \
             FROM queue WHERE queued IS NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_queue_entry).collect())
    }
}

fn row_to_key_record(row: &sqlx::sqlite::SqliteRow) -> KeyRecord {
    KeyRecord {
        active: row.get::<i64, _>("active") != 0,
        public_name: row.get("public_name"),
        yk_counter: row.get("yk_counter"),
        yk_use: row.get("yk_use"),
        yk_high: row.get("yk_high"),
        yk_low: row.get("yk_low"),
        nonce: row.get("nonce"),
        modified: row.get("modified"),
        created: row.get("created"),
    }
}

fn row_to_queue_entry(row: &sqlx::sqlite::SqliteRow) -> QueueEntry {
    QueueEntry {
        server_url: row.get("server_url"),
        modified: row.get("modified"),
        server_nonce: row.get("server_nonce"),
        otp: row.get("otp"),
        info: row.get("info"),
        queued: row.get("queued"),
    }
}
