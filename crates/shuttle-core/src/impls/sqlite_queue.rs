//! SqliteQueueBackend - table-backed channels that survive a restart.
//!
//! Every envelope is one row of `shuttle_envelopes`. Taking an envelope is a
//! single statement, so two consumers can never both get the same row:
//! - `ConsumeFilter::Any` deletes the oldest row and returns it.
//! - `ConsumeFilter::Correlation` stamps the row with a reservation token and
//!   a `reserved_until` deadline. Ack deletes it, reject clears the stamp.
//!   A consumer that dies holding a reservation only hides the row until the
//!   deadline passes.
//!
//! Rows that no longer parse as an envelope are moved to
//! `shuttle_dead_letters` and reported once as `MalformedEnvelope`.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::domain::{ChannelName, CorrelationId, Envelope, EnvelopeId};
use crate::ports::{
    Clock, ConsumeFilter, Delivery, QueueBackend, QueueError, Settlement, SystemClock,
    deadline_after,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS shuttle_channels (
        name    TEXT PRIMARY KEY,
        created TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS shuttle_envelopes (
        seq            INTEGER PRIMARY KEY AUTOINCREMENT,
        channel        TEXT NOT NULL,
        id             TEXT NOT NULL,
        correlation_id TEXT NOT NULL,
        type_name      TEXT NOT NULL,
        content        TEXT NOT NULL,
        created        TEXT NOT NULL,
        status_date    TEXT NOT NULL,
        reserved_until INTEGER,
        reservation    TEXT
    )",
    "CREATE INDEX IF NOT EXISTS shuttle_envelopes_by_channel
        ON shuttle_envelopes (channel, seq)",
    "CREATE INDEX IF NOT EXISTS shuttle_envelopes_by_correlation
        ON shuttle_envelopes (channel, correlation_id)",
    "CREATE TABLE IF NOT EXISTS shuttle_dead_letters (
        seq            INTEGER PRIMARY KEY,
        channel        TEXT NOT NULL,
        id             TEXT NOT NULL,
        correlation_id TEXT NOT NULL,
        type_name      TEXT NOT NULL,
        content        TEXT NOT NULL,
        reason         TEXT NOT NULL,
        buried_at      TEXT NOT NULL
    )",
];

const TAKE_ANY: &str = "
    DELETE FROM shuttle_envelopes
    WHERE seq = (
        SELECT seq FROM shuttle_envelopes
        WHERE channel = ?1 AND (reserved_until IS NULL OR reserved_until < ?2)
        ORDER BY seq LIMIT 1
    )
    RETURNING seq, id, correlation_id, type_name, content, created, status_date";

const RESERVE_CORRELATED: &str = "
    UPDATE shuttle_envelopes
    SET reserved_until = ?3, reservation = ?4
    WHERE seq = (
        SELECT seq FROM shuttle_envelopes
        WHERE channel = ?1 AND correlation_id = ?2
          AND (reserved_until IS NULL OR reserved_until < ?5)
        ORDER BY seq LIMIT 1
    )
    RETURNING seq, id, correlation_id, type_name, content, created, status_date";

/// Tuning for the sqlite backend.
#[derive(Debug, Clone, Copy)]
pub struct SqliteQueueSettings {
    /// Longest nap between two empty attempts of one `consume_one`.
    pub poll_interval: Duration,
    /// How long a selective consumer may hold a reservation.
    pub visibility_timeout: Duration,
    /// How long one statement waits on another connection's write lock
    /// before failing with `Unavailable`.
    pub busy_timeout: Duration,
}

impl Default for SqliteQueueSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            visibility_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

pub struct SqliteQueueBackend {
    pool: SqlitePool,
    settings: SqliteQueueSettings,
    clock: Arc<dyn Clock>,
    /// Wakes local waiters on publish/requeue; other processes are caught by polling.
    notify: Arc<Notify>,
}

impl SqliteQueueBackend {
    /// Open (creating if missing) the database at `url` and install the schema.
    pub async fn connect(url: &str, settings: SqliteQueueSettings) -> Result<Self, QueueError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(storage_error)?
            .create_if_missing(true)
            .busy_timeout(settings.busy_timeout);

        // every connection to an in-memory database is a different database
        let max_connections = if url.contains(":memory:") { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(storage_error)?;

        Self::with_pool(pool, settings).await
    }

    pub async fn with_pool(pool: SqlitePool, settings: SqliteQueueSettings) -> Result<Self, QueueError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(storage_error)?;
        }
        Ok(Self {
            pool,
            settings,
            clock: Arc::new(SystemClock),
            notify: Arc::new(Notify::new()),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Rows moved aside because they could not be read back.
    pub async fn dead_letters(&self, channel: &ChannelName) -> Result<usize, QueueError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM shuttle_dead_letters WHERE channel = ?1")
                .bind(channel.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(storage_error)?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    async fn try_take(
        &self,
        channel: &ChannelName,
        filter: &ConsumeFilter,
    ) -> Result<Option<Delivery>, QueueError> {
        let now = self.now_ms();
        match filter {
            ConsumeFilter::Any => {
                let row = sqlx::query(TAKE_ANY)
                    .bind(channel.as_str())
                    .bind(now)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(storage_error)?;
                let Some(row) = row else {
                    return Ok(None);
                };
                let stored = StoredRow::read(&row)?;
                let envelope = self.parse_or_bury(channel, &stored).await?;
                Ok(Some(Delivery::auto_acked(envelope)))
            }
            ConsumeFilter::Correlation(correlation_id) => {
                let token = Uuid::new_v4().to_string();
                let until = now.saturating_add(
                    i64::try_from(self.settings.visibility_timeout.as_millis()).unwrap_or(i64::MAX),
                );
                let row = sqlx::query(RESERVE_CORRELATED)
                    .bind(channel.as_str())
                    .bind(correlation_id.as_uuid().to_string())
                    .bind(until)
                    .bind(&token)
                    .bind(now)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(storage_error)?;
                let Some(row) = row else {
                    return Ok(None);
                };
                let stored = StoredRow::read(&row)?;
                let envelope = self.parse_or_bury(channel, &stored).await?;
                let reservation = SqliteReservation {
                    pool: self.pool.clone(),
                    clock: self.clock.clone(),
                    notify: self.notify.clone(),
                    channel: channel.clone(),
                    seq: stored.seq,
                    token,
                };
                Ok(Some(Delivery::reserved(envelope, Box::new(reservation))))
            }
        }
    }

    async fn parse_or_bury(
        &self,
        channel: &ChannelName,
        stored: &StoredRow,
    ) -> Result<Envelope, QueueError> {
        match stored.to_envelope() {
            Ok(envelope) => Ok(envelope),
            Err(reason) => {
                warn!(%channel, seq = stored.seq, %reason, "moving unreadable envelope to dead letters");
                self.bury(channel, stored, &reason).await?;
                Err(QueueError::MalformedEnvelope {
                    channel: channel.to_string(),
                    reason,
                })
            }
        }
    }

    async fn bury(&self, channel: &ChannelName, stored: &StoredRow, reason: &str) -> Result<(), QueueError> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        sqlx::query(
            "INSERT OR REPLACE INTO shuttle_dead_letters
                (seq, channel, id, correlation_id, type_name, content, reason, buried_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(stored.seq)
        .bind(channel.as_str())
        .bind(&stored.id)
        .bind(&stored.correlation_id)
        .bind(&stored.type_name)
        .bind(&stored.content)
        .bind(reason)
        .bind(self.clock.now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;
        // already gone for Any; the reserved row of a selective take is removed here
        sqlx::query("DELETE FROM shuttle_envelopes WHERE seq = ?1")
            .bind(stored.seq)
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;
        tx.commit().await.map_err(storage_error)
    }
}

#[async_trait]
impl QueueBackend for SqliteQueueBackend {
    async fn declare(&self, channel: &ChannelName) -> Result<(), QueueError> {
        sqlx::query(
            "INSERT INTO shuttle_channels (name, created) VALUES (?1, ?2)
             ON CONFLICT (name) DO NOTHING",
        )
        .bind(channel.as_str())
        .bind(self.clock.now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    #[instrument(skip(self, channel, envelope), fields(channel = %channel, correlation_id = %envelope.correlation_id()))]
    async fn publish(&self, channel: &ChannelName, envelope: Envelope) -> Result<(), QueueError> {
        self.declare(channel).await?;
        sqlx::query(
            "INSERT INTO shuttle_envelopes
                (channel, id, correlation_id, type_name, content, created, status_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(channel.as_str())
        .bind(envelope.id().as_uuid().to_string())
        .bind(envelope.correlation_id().as_uuid().to_string())
        .bind(envelope.type_name())
        .bind(envelope.content())
        .bind(envelope.created().to_rfc3339())
        .bind(envelope.status_date().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        self.notify.notify_waiters();
        debug!("envelope stored");
        Ok(())
    }

    #[instrument(skip(self, channel), fields(channel = %channel))]
    async fn consume_one(
        &self,
        channel: &ChannelName,
        filter: &ConsumeFilter,
        timeout: Duration,
    ) -> Result<Option<Delivery>, QueueError> {
        let deadline = deadline_after(timeout);
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(delivery) = self.try_take(channel, filter).await? {
                return Ok(Some(delivery));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let nap = (deadline - now).min(self.settings.poll_interval);
            let _ = tokio::time::timeout(nap, notified).await;
        }
    }

    async fn depth(&self, channel: &ChannelName) -> Result<usize, QueueError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM shuttle_envelopes WHERE channel = ?1")
                .bind(channel.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(storage_error)?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

/// A row as stored, before any parsing.
#[derive(Debug)]
struct StoredRow {
    seq: i64,
    id: String,
    correlation_id: String,
    type_name: String,
    content: String,
    created: String,
    status_date: String,
}

impl StoredRow {
    fn read(row: &SqliteRow) -> Result<Self, QueueError> {
        Ok(Self {
            seq: row.try_get("seq").map_err(storage_error)?,
            id: row.try_get("id").map_err(storage_error)?,
            correlation_id: row.try_get("correlation_id").map_err(storage_error)?,
            type_name: row.try_get("type_name").map_err(storage_error)?,
            content: row.try_get("content").map_err(storage_error)?,
            created: row.try_get("created").map_err(storage_error)?,
            status_date: row.try_get("status_date").map_err(storage_error)?,
        })
    }

    fn to_envelope(&self) -> Result<Envelope, String> {
        let id: EnvelopeId = self.id.parse().map_err(|e| format!("id: {e}"))?;
        let correlation_id: CorrelationId = self
            .correlation_id
            .parse()
            .map_err(|e| format!("correlation_id: {e}"))?;
        Ok(Envelope::restore(
            id,
            correlation_id,
            self.type_name.clone(),
            self.content.clone(),
            parse_time("created", &self.created)?,
            parse_time("status_date", &self.status_date)?,
        ))
    }
}

fn parse_time(column: &str, raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("{column}: {e}"))
}

/// Busy/locked databases and pool exhaustion are worth retrying.
fn storage_error(err: sqlx::Error) -> QueueError {
    match &err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            QueueError::Unavailable(err.to_string())
        }
        sqlx::Error::Database(db)
            if db.message().contains("locked") || db.message().contains("busy") =>
        {
            QueueError::Unavailable(err.to_string())
        }
        _ => QueueError::Storage(err.to_string()),
    }
}

struct SqliteReservation {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    notify: Arc<Notify>,
    channel: ChannelName,
    seq: i64,
    token: String,
}

impl SqliteReservation {
    fn lost(&self) -> QueueError {
        QueueError::ReservationLost {
            channel: self.channel.to_string(),
        }
    }
}

#[async_trait]
impl Settlement for SqliteReservation {
    // 失敗しても行の予約スタンプはそのまま。同じトークンで ack をやり直せる。
    async fn ack(&mut self) -> Result<(), QueueError> {
        let done = sqlx::query("DELETE FROM shuttle_envelopes WHERE seq = ?1 AND reservation = ?2")
            .bind(self.seq)
            .bind(&self.token)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        if done.rows_affected() == 0 {
            return Err(self.lost());
        }
        Ok(())
    }

    async fn requeue(&mut self) -> Result<(), QueueError> {
        let done = sqlx::query(
            "UPDATE shuttle_envelopes
             SET reserved_until = NULL, reservation = NULL, status_date = ?3
             WHERE seq = ?1 AND reservation = ?2",
        )
        .bind(self.seq)
        .bind(&self.token)
        .bind(self.clock.now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        if done.rows_affected() == 0 {
            return Err(self.lost());
        }
        self.notify.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Classify;
    use crate::ports::FixedClock;
    use ulid::Ulid;

    async fn memory_backend() -> SqliteQueueBackend {
        SqliteQueueBackend::connect("sqlite::memory:", SqliteQueueSettings::default())
            .await
            .unwrap()
    }

    fn channel() -> ChannelName {
        ChannelName::new("client-queue").unwrap()
    }

    fn envelope(correlation: CorrelationId) -> Envelope {
        Envelope::new(
            EnvelopeId::from_ulid(Ulid::new()),
            correlation,
            "GetCarRequest",
            r#"{"dataId":"6f1c1d1e-0000-0000-0000-000000000001"}"#,
            Utc::now(),
        )
    }

    fn corr() -> CorrelationId {
        CorrelationId::from_ulid(Ulid::new())
    }

    #[tokio::test]
    async fn publish_then_consume_any_removes_the_row() {
        let q = memory_backend().await;
        let sent = envelope(corr());
        q.publish(&channel(), sent.clone()).await.unwrap();
        assert_eq!(q.depth(&channel()).await.unwrap(), 1);

        let got = q
            .consume_one(&channel(), &ConsumeFilter::Any, Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(got.envelope().id(), sent.id());
        assert_eq!(got.envelope().content(), sent.content());
        assert_eq!(q.depth(&channel()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reservation_hides_row_until_settled() {
        let q = memory_backend().await;
        let c = corr();
        q.publish(&channel(), envelope(c)).await.unwrap();

        let held = q
            .consume_one(&channel(), &ConsumeFilter::Correlation(c), Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();

        let second = q
            .consume_one(&channel(), &ConsumeFilter::Any, Duration::from_millis(20))
            .await
            .unwrap();
        assert!(second.is_none());

        held.reject().await.unwrap();
        let again = q
            .consume_one(&channel(), &ConsumeFilter::Correlation(c), Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();
        again.ack().await.unwrap();
        assert_eq!(q.depth(&channel()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn expired_reservation_becomes_visible_again() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let q = memory_backend().await.with_clock(clock.clone());
        let c = corr();
        q.publish(&channel(), envelope(c)).await.unwrap();

        let stale = q
            .consume_one(&channel(), &ConsumeFilter::Correlation(c), Duration::from_millis(20))
            .await
            .unwrap()
            .unwrap();

        clock.advance(chrono::Duration::seconds(31));
        let fresh = q
            .consume_one(&channel(), &ConsumeFilter::Correlation(c), Duration::from_millis(20))
            .await
            .unwrap()
            .unwrap();

        // the first holder lost its claim
        assert!(matches!(stale.ack().await, Err(QueueError::ReservationLost { .. })));
        fresh.ack().await.unwrap();
    }

    #[tokio::test]
    async fn ack_blocked_by_a_writer_can_be_retried() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("locked.db").display());
        let settings = SqliteQueueSettings {
            busy_timeout: Duration::from_millis(50),
            ..SqliteQueueSettings::default()
        };
        let q = SqliteQueueBackend::connect(&url, settings).await.unwrap();
        let c = corr();
        q.publish(&channel(), envelope(c)).await.unwrap();

        let mut held = q
            .consume_one(&channel(), &ConsumeFilter::Correlation(c), Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();

        // another connection holds the write lock while we ack
        let mut writer = q.pool().acquire().await.unwrap();
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *writer).await.unwrap();
        let err = held.try_ack().await.unwrap_err();
        assert!(err.is_transient(), "{err}");
        assert!(held.is_reserved());
        sqlx::query("COMMIT").execute(&mut *writer).await.unwrap();
        drop(writer);

        held.try_ack().await.unwrap();
        assert_eq!(held.into_envelope().correlation_id(), c);
        assert_eq!(q.depth(&channel()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn huge_consume_timeout_does_not_overflow() {
        let q = memory_backend().await;
        let c = corr();
        q.publish(&channel(), envelope(c)).await.unwrap();

        let got = q
            .consume_one(&channel(), &ConsumeFilter::Correlation(c), Duration::MAX)
            .await
            .unwrap();
        assert!(got.is_some());
    }

    #[tokio::test]
    async fn unreadable_row_goes_to_dead_letters() {
        let q = memory_backend().await;
        sqlx::query(
            "INSERT INTO shuttle_envelopes
                (channel, id, correlation_id, type_name, content, created, status_date)
             VALUES ('client-queue', 'not-a-uuid', 'also-not', 'GetCarRequest', '{}', 'x', 'y')",
        )
        .execute(q.pool())
        .await
        .unwrap();
        q.publish(&channel(), envelope(corr())).await.unwrap();

        let err = q
            .consume_one(&channel(), &ConsumeFilter::Any, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::MalformedEnvelope { .. }));
        assert_eq!(q.dead_letters(&channel()).await.unwrap(), 1);

        // the next envelope is unaffected
        let next = q
            .consume_one(&channel(), &ConsumeFilter::Any, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(next.is_some());
    }

    #[tokio::test]
    async fn envelopes_survive_reopening_the_database() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("shuttle.db").display());
        let sent = envelope(corr());

        {
            let q = SqliteQueueBackend::connect(&url, SqliteQueueSettings::default())
                .await
                .unwrap();
            q.publish(&channel(), sent.clone()).await.unwrap();
            q.pool().close().await;
        }

        let q = SqliteQueueBackend::connect(&url, SqliteQueueSettings::default())
            .await
            .unwrap();
        let got = q
            .consume_one(&channel(), &ConsumeFilter::Any, Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.envelope(), &sent);
    }

    #[tokio::test]
    async fn waiter_wakes_on_local_publish() {
        let q = Arc::new(memory_backend().await);
        let c = corr();

        let waiter = {
            let q = q.clone();
            tokio::spawn(async move {
                q.consume_one(&channel(), &ConsumeFilter::Correlation(c), Duration::from_secs(5))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.publish(&channel(), envelope(c)).await.unwrap();

        let got = waiter.await.unwrap().unwrap();
        assert!(got.is_some());
    }
}
