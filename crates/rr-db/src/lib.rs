//! Storage layer for machine run reports.
//!
//! Provides persistence for products, machines and ON/OFF events using
//! `rusqlite`.
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! A `Database` instance can be moved between threads but cannot be shared
//! across threads without external synchronization. Each report request opens
//! its own handle.
//!
//! # Schema
//!
//! ## Timestamp Format
//!
//! Timestamps are stored as TEXT in RFC 3339 format with millisecond precision
//! (e.g., `2024-01-15T10:30:00.000Z`), so lexicographic ordering matches
//! chronological ordering and range queries can compare strings.
//!
//! ## Relations
//!
//! `events` carries no foreign keys. Events may arrive before (or without)
//! their product and machine; such events come back from
//! [`Database::list_events_in_range`] with unresolved labels and are skipped
//! by the report pipeline.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rr_core::{Event, EventId, MachineId, MachineState, ProductId};
use rusqlite::{Connection, OptionalExtension, Row, params};
use thiserror::Error;

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Failed to parse a stored timestamp.
    #[error("invalid timestamp for event {event_id}: {timestamp}")]
    TimestampParse {
        event_id: String,
        timestamp: String,
        #[source]
        source: chrono::ParseError,
    },
    /// A stored event row violates the data model.
    #[error("invalid event data for {event_id}: {message}")]
    InvalidEventData { event_id: String, message: String },
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

/// A product ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductRecord {
    pub id: ProductId,
    pub name: String,
    pub category: Option<String>,
}

/// A machine ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineRecord {
    pub id: MachineId,
    pub name: String,
}

/// A raw state-change event ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub id: EventId,
    pub product_id: ProductId,
    pub machine_id: MachineId,
    pub state: MachineState,
    pub quantity: u64,
    pub occurred_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Event counts for the status command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventSummary {
    pub on_events: usize,
    pub off_events: usize,
    pub last_event_at: Option<String>,
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS products (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                category TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_products_category ON products(category);

            CREATE TABLE IF NOT EXISTS machines (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL
            );

            -- Events table: ON/OFF state changes
            -- occurred_at, closed_at: RFC 3339 UTC with milliseconds
            -- state: 'on' or 'off'
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                product_id TEXT NOT NULL,
                machine_id TEXT NOT NULL,
                state TEXT NOT NULL,
                quantity INTEGER NOT NULL DEFAULT 0,
                occurred_at TEXT NOT NULL,
                closed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_events_occurred_at ON events(occurred_at);
            CREATE INDEX IF NOT EXISTS idx_events_group ON events(product_id, machine_id);
            ",
        )?;
        Ok(())
    }

    /// Inserts or updates products by ID.
    pub fn upsert_products(&mut self, products: &[ProductRecord]) -> Result<usize, DbError> {
        if products.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO products (id, name, category) VALUES (?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    category = excluded.category
                ",
            )?;
            for product in products {
                written += stmt.execute(params![
                    product.id.as_str(),
                    product.name,
                    product.category
                ])?;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    /// Inserts or updates machines by ID.
    pub fn upsert_machines(&mut self, machines: &[MachineRecord]) -> Result<usize, DbError> {
        if machines.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO machines (id, name) VALUES (?, ?)
                ON CONFLICT(id) DO UPDATE SET name = excluded.name
                ",
            )?;
            for machine in machines {
                written += stmt.execute(params![machine.id.as_str(), machine.name])?;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    /// Inserts a batch of events, ignoring duplicates by ID.
    pub fn insert_events(&mut self, events: &[EventRecord]) -> Result<usize, DbError> {
        if events.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "
                INSERT OR IGNORE INTO events
                (id, product_id, machine_id, state, quantity, occurred_at, closed_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ",
            )?;
            for event in events {
                let quantity =
                    i64::try_from(event.quantity).map_err(|_| DbError::InvalidEventData {
                        event_id: event.id.to_string(),
                        message: format!("quantity {} is too large", event.quantity),
                    })?;
                inserted += stmt.execute(params![
                    event.id.as_str(),
                    event.product_id.as_str(),
                    event.machine_id.as_str(),
                    event.state.as_str(),
                    quantity,
                    format_timestamp(event.occurred_at),
                    event.closed_at.map(format_timestamp),
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Lists events within a time range with product and machine names resolved.
    ///
    /// The range is inclusive of `start` and exclusive of `end`. When
    /// `category` is set, only events of products in that category are
    /// returned. Events are ordered by `occurred_at`, then insertion order.
    pub fn list_events_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        category: Option<&str>,
    ) -> Result<Vec<Event>, DbError> {
        if end <= start {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(
            "
            SELECT e.id, e.product_id, e.machine_id, e.state, e.quantity,
                   e.occurred_at, e.closed_at, p.name, m.name
            FROM events e
            LEFT JOIN products p ON p.id = e.product_id
            LEFT JOIN machines m ON m.id = e.machine_id
            WHERE e.occurred_at >= ?1 AND e.occurred_at < ?2
              AND (?3 IS NULL OR p.category = ?3)
            ORDER BY e.occurred_at ASC, e.rowid ASC
            ",
        )?;
        let rows = stmt.query_map(
            params![format_timestamp(start), format_timestamp(end), category],
            StoredEvent::from_row,
        )?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?.into_event()?);
        }
        tracing::debug!(
            count = events.len(),
            %start,
            %end,
            category,
            "loaded events"
        );
        Ok(events)
    }

    /// Counts ON and OFF events and finds the most recent one.
    pub fn event_summary(&self) -> Result<EventSummary, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT state, COUNT(*) FROM events GROUP BY state")?;
        let rows = stmt.query_map([], |row| {
            let state: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((state, count))
        })?;
        let mut summary = EventSummary::default();
        for row in rows {
            let (state, count) = row?;
            let count = usize::try_from(count).unwrap_or_default();
            match state.parse::<MachineState>() {
                Ok(MachineState::On) => summary.on_events += count,
                Ok(MachineState::Off) => summary.off_events += count,
                Err(err) => tracing::warn!(%err, count, "ignoring events with unknown state"),
            }
        }
        summary.last_event_at = self
            .conn
            .query_row("SELECT MAX(occurred_at) FROM events", [], |row| {
                row.get::<_, Option<String>>(0)
            })
            .optional()?
            .flatten();
        Ok(summary)
    }
}

/// An events row as read from SQLite, before validation.
struct StoredEvent {
    id: String,
    product_id: String,
    machine_id: String,
    state: String,
    quantity: i64,
    occurred_at: String,
    closed_at: Option<String>,
    product_label: Option<String>,
    machine_label: Option<String>,
}

impl StoredEvent {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            product_id: row.get(1)?,
            machine_id: row.get(2)?,
            state: row.get(3)?,
            quantity: row.get(4)?,
            occurred_at: row.get(5)?,
            closed_at: row.get(6)?,
            product_label: row.get(7)?,
            machine_label: row.get(8)?,
        })
    }

    fn into_event(self) -> Result<Event, DbError> {
        let invalid = |message: String| DbError::InvalidEventData {
            event_id: self.id.clone(),
            message,
        };
        let state = self
            .state
            .parse::<MachineState>()
            .map_err(|err| invalid(err.to_string()))?;
        let quantity = u64::try_from(self.quantity)
            .map_err(|_| invalid(format!("negative quantity {}", self.quantity)))?;
        let product_id = ProductId::new(self.product_id.as_str())
            .map_err(|err| invalid(err.to_string()))?;
        let machine_id = MachineId::new(self.machine_id.as_str())
            .map_err(|err| invalid(err.to_string()))?;
        let occurred_at = parse_timestamp(&self.occurred_at, &self.id)?;
        let closed_at = self
            .closed_at
            .as_deref()
            .map(|ts| parse_timestamp(ts, &self.id))
            .transpose()?;
        let id = EventId::new(self.id.as_str()).map_err(|err| invalid(err.to_string()))?;

        Ok(Event {
            id,
            product_id,
            machine_id,
            state,
            quantity,
            occurred_at,
            closed_at,
            product_label: self.product_label,
            machine_label: self.machine_label,
        })
    }
}

fn parse_timestamp(timestamp: &str, event_id: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| DbError::TimestampParse {
            event_id: event_id.to_string(),
            timestamp: timestamp.to_string(),
            source,
        })
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}
