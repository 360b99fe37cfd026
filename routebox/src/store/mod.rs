//! # Route Store
//!
//! SQLite-backed persistence for routes and configuration history.
//!
//! Each route row keeps the full serialized [`Route`] document plus a few
//! scalar columns (name, visibility, bbox, timestamps) that back the
//! indexed lookups. Configuration is append-only: every save inserts a new
//! history row and the newest row is the current configuration.
//!
//! Subscribers receive the full, freshly read result set after every
//! committed mutation.
//!
//! [`Route`]: routecore::Route

mod config;
mod routes;
mod subscription;

pub use config::{ConfigEntity, ConfigHistory};
pub use subscription::Subscription;
pub(crate) use subscription::Listeners;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

use routecore::RouteEntity;

use crate::error::StoreResult;

/// Route table plus configuration history on one SQLite connection.
pub struct RouteStore {
    db: Connection,
    db_path: String,
    route_listeners: Listeners<RouteEntity>,
    config_listeners: Listeners<ConfigEntity>,
}

impl RouteStore {
    // ========================================================================
    // Initialization
    // ========================================================================

    /// Open (or create) the store at the given database path.
    pub fn open(db_path: &str) -> StoreResult<Self> {
        let db = Connection::open(db_path)?;
        Self::init_schema(&db)?;
        log::info!("[store] Opened database at {}", db_path);

        Ok(Self {
            db,
            db_path: db_path.to_string(),
            route_listeners: Listeners::new(),
            config_listeners: Listeners::new(),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> StoreResult<Self> {
        Self::open(":memory:")
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    fn init_schema(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(
            r#"
            -- Routes: scalar columns for lookups, full document in `data`
            CREATE TABLE IF NOT EXISTS routes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                visible INTEGER NOT NULL DEFAULT 1,
                color TEXT NOT NULL,
                distance REAL NOT NULL,
                min_lon REAL NOT NULL,
                min_lat REAL NOT NULL,
                max_lon REAL NOT NULL,
                max_lat REAL NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                data TEXT NOT NULL
            );

            -- Configuration history (append-only)
            CREATE TABLE IF NOT EXISTS app_config (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                config TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_routes_name ON routes(name);
            CREATE INDEX IF NOT EXISTS idx_routes_created_at ON routes(created_at);
            CREATE INDEX IF NOT EXISTS idx_routes_bbox ON routes(min_lon, max_lon, min_lat, max_lat);
            CREATE INDEX IF NOT EXISTS idx_app_config_updated_at ON app_config(updated_at);
            "#,
        )?;
        Ok(())
    }

    /// View over the configuration history sharing this connection.
    /// Queue change snapshots instead of calling listeners inside writes.
    ///
    /// Returns handles on the route and configuration listener sets; the
    /// caller delivers queued snapshots with `flush` once it no longer holds
    /// whatever lock guards this store.
    pub(crate) fn defer_notifications(
        &mut self,
    ) -> (Listeners<RouteEntity>, Listeners<ConfigEntity>) {
        self.route_listeners.defer();
        self.config_listeners.defer();
        (self.route_listeners.clone(), self.config_listeners.clone())
    }

    pub fn config_history(&self) -> ConfigHistory<'_> {
        ConfigHistory::new(&self.db, &self.config_listeners)
    }
}

/// Fixed-width RFC 3339 so lexical order matches time order.
pub(crate) fn timestamp(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_timestamp(text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}
