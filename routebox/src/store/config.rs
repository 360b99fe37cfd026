//! Append-only application configuration history.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{info, warn};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use routecore::AppConfiguration;

use super::subscription::{Listeners, Subscription};
use super::{parse_timestamp, timestamp};
use crate::error::StoreResult;

/// One stored configuration revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigEntity {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub config: AppConfiguration,
}

/// Configuration revisions stored next to the routes.
pub struct ConfigHistory<'a> {
    db: &'a Connection,
    listeners: &'a Listeners<ConfigEntity>,
}

const SELECT_CONFIG: &str = "SELECT id, created_at, updated_at, config FROM app_config";

fn read_row(row: &Row<'_>) -> rusqlite::Result<(i64, String, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn into_entity(
    (id, created_at, updated_at, config): (i64, String, String, String),
) -> StoreResult<ConfigEntity> {
    Ok(ConfigEntity {
        id,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        config: serde_json::from_str(&config)?,
    })
}

impl<'a> ConfigHistory<'a> {
    pub(crate) fn new(db: &'a Connection, listeners: &'a Listeners<ConfigEntity>) -> Self {
        Self { db, listeners }
    }

    /// Store a new revision. Older revisions are kept.
    pub fn save_config(&self, config: &AppConfiguration) -> StoreResult<ConfigEntity> {
        let now = Utc::now();
        let json = serde_json::to_string(config)?;
        self.db.execute(
            "INSERT INTO app_config (config, created_at, updated_at) VALUES (?, ?, ?)",
            params![json, timestamp(&now), timestamp(&now)],
        )?;

        let entity = ConfigEntity {
            id: self.db.last_insert_rowid(),
            created_at: now,
            updated_at: now,
            config: config.clone(),
        };
        info!("[store] Saved configuration revision {}", entity.id);

        if !self.listeners.is_empty() {
            self.listeners.publish(self.history()?);
        }
        Ok(entity)
    }

    /// The most recently updated revision, or defaults when none is stored.
    pub fn current_config(&self) -> StoreResult<AppConfiguration> {
        Ok(self
            .latest()?
            .map(|entity| entity.config)
            .unwrap_or_default())
    }

    pub fn latest(&self) -> StoreResult<Option<ConfigEntity>> {
        let row = self
            .db
            .query_row(
                &format!("{} ORDER BY updated_at DESC, id DESC LIMIT 1", SELECT_CONFIG),
                [],
                read_row,
            )
            .optional()?;
        match row.map(into_entity).transpose() {
            Ok(entity) => Ok(entity),
            Err(e) => {
                warn!("[store] Unreadable configuration revision: {}", e);
                Err(e)
            }
        }
    }

    /// Every revision, oldest first.
    pub fn history(&self) -> StoreResult<Vec<ConfigEntity>> {
        let mut stmt = self.db.prepare(&format!("{} ORDER BY id", SELECT_CONFIG))?;
        let rows = stmt
            .query_map([], read_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(into_entity).collect()
    }

    /// Call `listener` with the full history after every saved revision.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&[ConfigEntity]) + Send + Sync + 'static,
    {
        self.listeners.subscribe(Arc::new(listener))
    }
}

#[cfg(test)]
mod tests {
    use crate::store::RouteStore;
    use routecore::AppConfiguration;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_defaults_when_empty() {
        let store = RouteStore::in_memory().unwrap();
        let history = store.config_history();
        assert_eq!(history.current_config().unwrap(), AppConfiguration::default());
        assert!(history.latest().unwrap().is_none());
        assert!(history.history().unwrap().is_empty());
    }

    #[test]
    fn test_history_keeps_old_rows() {
        let store = RouteStore::in_memory().unwrap();
        let history = store.config_history();

        let first = history.save_config(&AppConfiguration::default()).unwrap();
        let mut changed = AppConfiguration::default();
        changed.export_options.route_simplification.tolerance = 0.001;
        changed.export_options.image_processing.enabled = false;
        let second = history.save_config(&changed).unwrap();

        assert!(second.id > first.id);
        assert_eq!(history.current_config().unwrap(), changed);

        let all = history.history().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].config, AppConfiguration::default());
        assert_eq!(all[1], second);
    }

    #[test]
    fn test_subscribe_config() {
        let store = RouteStore::in_memory().unwrap();
        let history = store.config_history();
        let lengths = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lengths);
        let subscription = history.subscribe(move |revisions| {
            sink.lock().unwrap().push(revisions.len());
        });

        history.save_config(&AppConfiguration::default()).unwrap();
        history.save_config(&AppConfiguration::default()).unwrap();
        drop(subscription);
        history.save_config(&AppConfiguration::default()).unwrap();

        assert_eq!(*lengths.lock().unwrap(), vec![1, 2]);
    }
}
