//! SQLite Dispatch Store
//!
//! Queue entries, sent campaigns and failures live in three tables.
//! Claims follow the visibility-timeout pattern: a candidate is selected,
//! then taken with a conditional UPDATE; zero rows affected means another
//! consumer won the race and the next candidate is tried.
//! Multi-statement writes run in `BEGIN IMMEDIATE` transactions so concurrent
//! writers queue on the busy timeout rather than failing with "database is
//! locked".

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

use mr_common::{CampaignRecord, ContentRef, FailedDispatch, QueueEntry};

use crate::store::DispatchStore;
use crate::{QueueError, Result};

const ENTRY_COLUMNS: &str = "sequence, type_tag, object_id, enqueued_at, claimed_until, attempts";

pub struct SqliteDispatchStore {
    pool: SqlitePool,
}

impl SqliteDispatchStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Read-then-write transactions take the write lock up front. A deferred
    /// transaction that has already read cannot wait for a competing writer;
    /// SQLite fails it with `SQLITE_BUSY` instead of honouring the busy timeout.
    async fn begin_immediate(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }

    fn parse_entry(row: &SqliteRow) -> Result<QueueEntry> {
        let claimed_until: Option<i64> = row.get("claimed_until");
        Ok(QueueEntry {
            content_ref: ContentRef::new(row.get::<String, _>("type_tag"), row.get::<i64, _>("object_id")),
            sequence: row.get("sequence"),
            enqueued_at: from_millis(row.get("enqueued_at"), "enqueued_at")?,
            claimed_until: claimed_until
                .map(|ms| from_millis(ms, "claimed_until"))
                .transpose()?,
            attempts: row.get::<i64, _>("attempts") as u32,
        })
    }

    fn parse_campaign(row: &SqliteRow) -> Result<CampaignRecord> {
        Ok(CampaignRecord {
            content_ref: ContentRef::new(row.get::<String, _>("type_tag"), row.get::<i64, _>("object_id")),
            remote_campaign_id: row.get("remote_campaign_id"),
            sent_at: from_millis(row.get("sent_at"), "sent_at")?,
        })
    }

    fn parse_failure(row: &SqliteRow) -> Result<FailedDispatch> {
        Ok(FailedDispatch {
            content_ref: ContentRef::new(row.get::<String, _>("type_tag"), row.get::<i64, _>("object_id")),
            reason: row.get("reason"),
            attempts: row.get::<i64, _>("attempts") as u32,
            failed_at: from_millis(row.get("failed_at"), "failed_at")?,
        })
    }
}

fn from_millis(ms: i64, column: &str) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| QueueError::Serialization(format!("invalid {} timestamp: {}", column, ms)))
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl DispatchStore for SqliteDispatchStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dispatch_queue (
                sequence INTEGER PRIMARY KEY AUTOINCREMENT,
                type_tag TEXT NOT NULL,
                object_id INTEGER NOT NULL,
                enqueued_at INTEGER NOT NULL,
                claimed_until INTEGER,
                attempts INTEGER NOT NULL DEFAULT 0,
                UNIQUE(type_tag, object_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Index for visible-entry polling
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_dispatch_queue_visible
            ON dispatch_queue (claimed_until, sequence)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS campaigns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                type_tag TEXT NOT NULL,
                object_id INTEGER NOT NULL,
                remote_campaign_id TEXT NOT NULL,
                sent_at INTEGER NOT NULL,
                UNIQUE(type_tag, object_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_campaigns_sent_at ON campaigns (sent_at)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS failed_dispatches (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                type_tag TEXT NOT NULL,
                object_id INTEGER NOT NULL,
                reason TEXT NOT NULL,
                attempts INTEGER NOT NULL,
                failed_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_failed_dispatches_ref
            ON failed_dispatches (type_tag, object_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("SQLite dispatch store schema initialized");
        Ok(())
    }

    async fn insert_entry(&self, content_ref: &ContentRef, enqueued_at: DateTime<Utc>) -> Result<QueueEntry> {
        let mut tx = self.begin_immediate().await?;

        let queued = sqlx::query("SELECT 1 FROM dispatch_queue WHERE type_tag = ? AND object_id = ?")
            .bind(&content_ref.type_tag)
            .bind(content_ref.object_id)
            .fetch_optional(&mut *tx)
            .await?;
        if queued.is_some() {
            return Err(QueueError::AlreadyQueued(content_ref.clone()));
        }

        let sent = sqlx::query("SELECT 1 FROM campaigns WHERE type_tag = ? AND object_id = ?")
            .bind(&content_ref.type_tag)
            .bind(content_ref.object_id)
            .fetch_optional(&mut *tx)
            .await?;
        if sent.is_some() {
            return Err(QueueError::AlreadySent(content_ref.clone()));
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO dispatch_queue (type_tag, object_id, enqueued_at, claimed_until, attempts)
            VALUES (?, ?, ?, NULL, 0)
            "#,
        )
        .bind(&content_ref.type_tag)
        .bind(content_ref.object_id)
        .bind(enqueued_at.timestamp_millis())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                QueueError::AlreadyQueued(content_ref.clone())
            } else {
                e.into()
            }
        })?;

        tx.commit().await?;

        Ok(QueueEntry {
            content_ref: content_ref.clone(),
            sequence: inserted.last_insert_rowid(),
            enqueued_at,
            claimed_until: None,
            attempts: 0,
        })
    }

    async fn remove_entry(&self, content_ref: &ContentRef) -> Result<bool> {
        let result = sqlx::query("DELETE FROM dispatch_queue WHERE type_tag = ? AND object_id = ?")
            .bind(&content_ref.type_tag)
            .bind(content_ref.object_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn claim_next(
        &self,
        after_sequence: i64,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>> {
        let now_ms = now.timestamp_millis();

        loop {
            let candidate: Option<i64> = sqlx::query_scalar(
                r#"
                SELECT sequence FROM dispatch_queue
                WHERE sequence > ? AND (claimed_until IS NULL OR claimed_until <= ?)
                ORDER BY sequence ASC
                LIMIT 1
                "#,
            )
            .bind(after_sequence)
            .bind(now_ms)
            .fetch_optional(&self.pool)
            .await?;

            let Some(sequence) = candidate else {
                return Ok(None);
            };

            let updated = sqlx::query(
                r#"
                UPDATE dispatch_queue
                SET claimed_until = ?, attempts = attempts + 1
                WHERE sequence = ? AND (claimed_until IS NULL OR claimed_until <= ?)
                "#,
            )
            .bind(lease_until.timestamp_millis())
            .bind(sequence)
            .bind(now_ms)
            .execute(&self.pool)
            .await?;

            if updated.rows_affected() == 0 {
                debug!(sequence, "Entry claimed by another consumer, retrying");
                continue;
            }

            let query = format!("SELECT {} FROM dispatch_queue WHERE sequence = ?", ENTRY_COLUMNS);
            let row = sqlx::query(&query)
                .bind(sequence)
                .fetch_optional(&self.pool)
                .await?;

            // Cancelled between claim and read
            let Some(row) = row else {
                continue;
            };
            return Self::parse_entry(&row).map(Some);
        }
    }

    async fn release(&self, content_ref: &ContentRef, visible_at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE dispatch_queue SET claimed_until = ? WHERE type_tag = ? AND object_id = ?",
        )
        .bind(visible_at.timestamp_millis())
        .bind(&content_ref.type_tag)
        .bind(content_ref.object_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::NotQueued(content_ref.clone()));
        }
        Ok(())
    }

    async fn recover_expired_claims(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE dispatch_queue
            SET claimed_until = NULL
            WHERE claimed_until IS NOT NULL AND claimed_until <= ?
            "#,
        )
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn find_entry(&self, content_ref: &ContentRef) -> Result<Option<QueueEntry>> {
        let query = format!(
            "SELECT {} FROM dispatch_queue WHERE type_tag = ? AND object_id = ?",
            ENTRY_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(&content_ref.type_tag)
            .bind(content_ref.object_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::parse_entry).transpose()
    }

    async fn pending_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dispatch_queue")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn finalize(
        &self,
        content_ref: &ContentRef,
        remote_campaign_id: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<CampaignRecord> {
        let mut tx = self.begin_immediate().await?;

        let sent = sqlx::query("SELECT 1 FROM campaigns WHERE type_tag = ? AND object_id = ?")
            .bind(&content_ref.type_tag)
            .bind(content_ref.object_id)
            .fetch_optional(&mut *tx)
            .await?;
        if sent.is_some() {
            return Err(QueueError::AlreadySent(content_ref.clone()));
        }

        let removed = sqlx::query("DELETE FROM dispatch_queue WHERE type_tag = ? AND object_id = ?")
            .bind(&content_ref.type_tag)
            .bind(content_ref.object_id)
            .execute(&mut *tx)
            .await?;
        if removed.rows_affected() == 0 {
            return Err(QueueError::NotQueued(content_ref.clone()));
        }

        sqlx::query(
            r#"
            INSERT INTO campaigns (type_tag, object_id, remote_campaign_id, sent_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&content_ref.type_tag)
        .bind(content_ref.object_id)
        .bind(remote_campaign_id)
        .bind(sent_at.timestamp_millis())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                QueueError::AlreadySent(content_ref.clone())
            } else {
                e.into()
            }
        })?;

        tx.commit().await?;

        Ok(CampaignRecord {
            content_ref: content_ref.clone(),
            remote_campaign_id: remote_campaign_id.to_string(),
            sent_at,
        })
    }

    async fn fail(&self, content_ref: &ContentRef, reason: &str, failed_at: DateTime<Utc>) -> Result<FailedDispatch> {
        let mut tx = self.begin_immediate().await?;

        let attempts: Option<i64> =
            sqlx::query_scalar("SELECT attempts FROM dispatch_queue WHERE type_tag = ? AND object_id = ?")
                .bind(&content_ref.type_tag)
                .bind(content_ref.object_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(attempts) = attempts else {
            return Err(QueueError::NotQueued(content_ref.clone()));
        };

        sqlx::query("DELETE FROM dispatch_queue WHERE type_tag = ? AND object_id = ?")
            .bind(&content_ref.type_tag)
            .bind(content_ref.object_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO failed_dispatches (type_tag, object_id, reason, attempts, failed_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&content_ref.type_tag)
        .bind(content_ref.object_id)
        .bind(reason)
        .bind(attempts)
        .bind(failed_at.timestamp_millis())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(FailedDispatch {
            content_ref: content_ref.clone(),
            reason: reason.to_string(),
            attempts: attempts as u32,
            failed_at,
        })
    }

    async fn find_campaign(&self, content_ref: &ContentRef) -> Result<Option<CampaignRecord>> {
        let row = sqlx::query(
            r#"
            SELECT type_tag, object_id, remote_campaign_id, sent_at
            FROM campaigns WHERE type_tag = ? AND object_id = ?
            "#,
        )
        .bind(&content_ref.type_tag)
        .bind(content_ref.object_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::parse_campaign).transpose()
    }

    async fn find_failure(&self, content_ref: &ContentRef) -> Result<Option<FailedDispatch>> {
        let row = sqlx::query(
            r#"
            SELECT type_tag, object_id, reason, attempts, failed_at
            FROM failed_dispatches WHERE type_tag = ? AND object_id = ?
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(&content_ref.type_tag)
        .bind(content_ref.object_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::parse_failure).transpose()
    }

    async fn campaign_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM campaigns")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn campaigns(&self, offset: u64, limit: u64) -> Result<Vec<CampaignRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT type_tag, object_id, remote_campaign_id, sent_at
            FROM campaigns
            ORDER BY sent_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(Self::parse_campaign(row)?);
        }
        Ok(records)
    }
}
