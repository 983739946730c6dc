//! SQLite store.
//!
//! One database file with three tables:
//! - `conversations`: recorded exchanges, messages stored as JSON
//! - `packages`: deliveries held at the front desk
//! - `bookings`: amenity reservations
//!
//! Timestamps are stored as fixed-width RFC 3339 strings so that text
//! ordering matches time ordering.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tides_core::error::StoreError;
use tides_core::message::{Message, SessionId};
use tides_core::store::{
    ConciergeStore, Exchange, ItemStatus, NewExchange, NewReservation, PendingItem,
};
use tracing::{debug, info};

/// A production SQLite concierge store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a SQLite store.
    ///
    /// Tables and indexes are created automatically. Pass `"sqlite::memory:"`
    /// for an in-process ephemeral database (useful for tests).
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Unavailable(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // Every connection to ":memory:" is its own database
        let max_connections = if path.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run schema migrations. Idempotent.
    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id   TEXT NOT NULL,
                unit_number  TEXT,
                messages     TEXT NOT NULL,
                created_at   TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("conversations table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_conversations_session ON conversations(session_id, created_at DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("conversations index: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS packages (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                unit_number  TEXT NOT NULL,
                courier      TEXT NOT NULL,
                status       TEXT NOT NULL DEFAULT 'pending',
                created_at   TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("packages table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_packages_unit_status ON packages(unit_number, status)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("packages index: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bookings (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                unit_number   TEXT NOT NULL,
                amenity       TEXT NOT NULL,
                booking_time  TEXT NOT NULL,
                created_at    TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("bookings table: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    /// Bookings for a unit, oldest first. Used by the CLI and tests.
    pub async fn bookings_for(&self, unit_number: &str) -> Result<Vec<NewReservation>, StoreError> {
        let rows = sqlx::query(
            "SELECT unit_number, amenity, booking_time, created_at FROM bookings WHERE unit_number = ? ORDER BY id",
        )
        .bind(unit_number)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("SELECT bookings failed: {e}")))?;

        rows.iter()
            .map(|row| {
                let amenity: String = column(row, "amenity")?;
                Ok(NewReservation {
                    unit_number: column(row, "unit_number")?,
                    amenity: amenity.parse()?,
                    time: column(row, "booking_time")?,
                    created_at: parse_timestamp(&column::<String>(row, "created_at")?)?,
                })
            })
            .collect()
    }

    fn row_to_exchange(row: &sqlx::sqlite::SqliteRow) -> Result<Exchange, StoreError> {
        let messages_json: String = column(row, "messages")?;
        let messages: Vec<Message> = serde_json::from_str(&messages_json)
            .map_err(|e| StoreError::Corrupt(format!("conversation messages: {e}")))?;

        Ok(Exchange {
            id: column(row, "id")?,
            session_id: SessionId(column(row, "session_id")?),
            unit_number: column(row, "unit_number")?,
            messages,
            created_at: parse_timestamp(&column::<String>(row, "created_at")?)?,
        })
    }

    fn row_to_item(row: &sqlx::sqlite::SqliteRow) -> Result<PendingItem, StoreError> {
        let status: String = column(row, "status")?;
        Ok(PendingItem {
            id: column(row, "id")?,
            unit_number: column(row, "unit_number")?,
            courier: column(row, "courier")?,
            status: status.parse()?,
            created_at: parse_timestamp(&column::<String>(row, "created_at")?)?,
        })
    }
}

fn column<'r, T>(row: &'r sqlx::sqlite::SqliteRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| StoreError::QueryFailed(format!("{name} column: {e}")))
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp '{raw}': {e}")))
}

#[async_trait]
impl ConciergeStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn fetch_recent_exchanges(
        &self,
        session_id: &SessionId,
        limit: usize,
    ) -> Result<Vec<Exchange>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, session_id, unit_number, messages, created_at
            FROM conversations
            WHERE session_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(session_id.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("SELECT conversations failed: {e}")))?;

        let mut exchanges = rows
            .iter()
            .map(Self::row_to_exchange)
            .collect::<Result<Vec<_>, _>>()?;
        // Most recent were fetched first; hand them back oldest first
        exchanges.reverse();
        Ok(exchanges)
    }

    async fn append_exchange(&self, exchange: NewExchange) -> Result<(), StoreError> {
        let messages_json = serde_json::to_string(&exchange.messages)
            .map_err(|e| StoreError::WriteFailed(format!("serialize messages: {e}")))?;

        sqlx::query(
            "INSERT INTO conversations (session_id, unit_number, messages, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(exchange.session_id.as_str())
        .bind(exchange.unit_number.as_deref())
        .bind(&messages_json)
        .bind(format_timestamp(&exchange.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::WriteFailed(format!("INSERT conversation failed: {e}")))?;

        debug!(session_id = %exchange.session_id, "Exchange recorded");
        Ok(())
    }

    async fn query_pending_items(&self, unit_number: &str) -> Result<Vec<PendingItem>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, unit_number, courier, status, created_at
            FROM packages
            WHERE unit_number = ? AND status = ?
            ORDER BY created_at, id
            "#,
        )
        .bind(unit_number)
        .bind(ItemStatus::Pending.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("SELECT packages failed: {e}")))?;

        rows.iter().map(Self::row_to_item).collect()
    }

    async fn update_items_status(
        &self,
        unit_number: &str,
        status: ItemStatus,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE packages SET status = ? WHERE unit_number = ? AND status = ?")
            .bind(status.as_str())
            .bind(unit_number)
            .bind(ItemStatus::Pending.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::WriteFailed(format!("UPDATE packages failed: {e}")))?;

        Ok(result.rows_affected())
    }

    async fn insert_reservation(&self, reservation: NewReservation) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO bookings (unit_number, amenity, booking_time, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&reservation.unit_number)
        .bind(reservation.amenity.as_str())
        .bind(&reservation.time)
        .bind(format_timestamp(&reservation.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::WriteFailed(format!("INSERT booking failed: {e}")))?;

        Ok(())
    }

    async fn add_package(&self, unit_number: &str, courier: &str) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO packages (unit_number, courier, status, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(unit_number)
        .bind(courier)
        .bind(ItemStatus::Pending.as_str())
        .bind(format_timestamp(&Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::WriteFailed(format!("INSERT package failed: {e}")))?;

        Ok(result.last_insert_rowid())
    }
}
