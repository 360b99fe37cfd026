//! Route CRUD, lookups and change notification.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, info};
use rusqlite::{params, OptionalExtension, Row};

use routecore::{Route, RouteEntity};

use super::subscription::Subscription;
use super::{parse_timestamp, timestamp, RouteStore};
use crate::error::{StoreError, StoreResult};

const SELECT_ROUTE: &str = "SELECT id, visible, data FROM routes";

fn read_row(row: &Row<'_>) -> rusqlite::Result<(i64, bool, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn into_entity((id, visible, data): (i64, bool, String)) -> StoreResult<RouteEntity> {
    let route: Route = serde_json::from_str(&data)?;
    Ok(RouteEntity { id, visible, route })
}

fn validated(route: &Route) -> StoreResult<()> {
    route.validate().map_err(StoreError::Validation)
}

impl RouteStore {
    // ========================================================================
    // Writes
    // ========================================================================

    /// Insert a new, visible route and return its id.
    pub fn add(&self, route: &Route) -> StoreResult<i64> {
        validated(route)?;
        let data = serde_json::to_string(route)?;
        let [min_lon, min_lat, max_lon, max_lat] = route.bbox;

        self.db.execute(
            "INSERT INTO routes (name, visible, color, distance, min_lon, min_lat, max_lon, max_lat,
                                 created_at, updated_at, data)
             VALUES (?, 1, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                route.name,
                route.color,
                route.distance,
                min_lon,
                min_lat,
                max_lon,
                max_lat,
                timestamp(&route.created_at),
                timestamp(&route.updated_at),
                data,
            ],
        )?;
        let id = self.db.last_insert_rowid();
        info!("[store] Added route {} '{}'", id, route.name);

        self.notify_routes()?;
        Ok(id)
    }

    /// Replace a stored route. The entity must pass validation and exist.
    pub fn put(&self, entity: &RouteEntity) -> StoreResult<()> {
        entity.validate().map_err(StoreError::Validation)?;
        self.write(entity)?;
        debug!("[store] Updated route {}", entity.id);
        self.notify_routes()
    }

    pub fn update_color(&self, id: i64, color: &str) -> StoreResult<RouteEntity> {
        let mut entity = self.get(id)?.ok_or(StoreError::NotFound(id))?;
        entity.route.color = color.to_string();
        entity.route.updated_at = Utc::now();
        self.put(&entity)?;
        Ok(entity)
    }

    pub fn update_visibility(&self, id: i64, visible: bool) -> StoreResult<RouteEntity> {
        let mut entity = self.get(id)?.ok_or(StoreError::NotFound(id))?;
        entity.visible = visible;
        entity.route.updated_at = Utc::now();
        self.put(&entity)?;
        Ok(entity)
    }

    /// Remove a route. Returns false when no row had that id.
    pub fn delete(&self, id: i64) -> StoreResult<bool> {
        let removed = self.db.execute("DELETE FROM routes WHERE id = ?", params![id])? > 0;
        if removed {
            info!("[store] Deleted route {}", id);
            self.notify_routes()?;
        }
        Ok(removed)
    }

    fn write(&self, entity: &RouteEntity) -> StoreResult<()> {
        let route = &entity.route;
        let data = serde_json::to_string(route)?;
        let [min_lon, min_lat, max_lon, max_lat] = route.bbox;

        let changed = self.db.execute(
            "UPDATE routes
             SET name = ?, visible = ?, color = ?, distance = ?,
                 min_lon = ?, min_lat = ?, max_lon = ?, max_lat = ?,
                 created_at = ?, updated_at = ?, data = ?
             WHERE id = ?",
            params![
                route.name,
                entity.visible,
                route.color,
                route.distance,
                min_lon,
                min_lat,
                max_lon,
                max_lat,
                timestamp(&route.created_at),
                timestamp(&route.updated_at),
                data,
                entity.id,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(entity.id));
        }
        Ok(())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn get(&self, id: i64) -> StoreResult<Option<RouteEntity>> {
        let row = self
            .db
            .query_row(&format!("{} WHERE id = ?", SELECT_ROUTE), params![id], read_row)
            .optional()?;
        row.map(into_entity).transpose()
    }

    /// All routes in insertion order.
    pub fn list_all(&self) -> StoreResult<Vec<RouteEntity>> {
        self.query(&format!("{} ORDER BY id", SELECT_ROUTE), &[])
    }

    pub fn find_by_name(&self, name: &str) -> StoreResult<Vec<RouteEntity>> {
        self.query(
            &format!("{} WHERE name = ? ORDER BY id", SELECT_ROUTE),
            &[&name],
        )
    }

    /// Routes whose bounding box intersects `[minLon, minLat, maxLon, maxLat]`.
    pub fn query_bbox(&self, bbox: [f64; 4]) -> StoreResult<Vec<RouteEntity>> {
        let [min_lon, min_lat, max_lon, max_lat] = bbox;
        self.query(
            &format!(
                "{} WHERE max_lon >= ? AND min_lon <= ? AND max_lat >= ? AND min_lat <= ?
                 ORDER BY id",
                SELECT_ROUTE
            ),
            &[&min_lon, &max_lon, &min_lat, &max_lat],
        )
    }

    /// Most recently created first, for listings.
    pub fn list_recent(&self, limit: usize) -> StoreResult<Vec<RouteEntity>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.query(
            &format!("{} ORDER BY created_at DESC, id DESC LIMIT ?", SELECT_ROUTE),
            &[&limit],
        )
    }

    fn query(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> StoreResult<Vec<RouteEntity>> {
        let mut stmt = self.db.prepare(sql)?;
        let rows = stmt
            .query_map(args, read_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(into_entity).collect()
    }

    /// Creation time of a stored route, read from its indexed column.
    pub fn created_at(&self, id: i64) -> StoreResult<Option<chrono::DateTime<Utc>>> {
        let text: Option<String> = self
            .db
            .query_row(
                "SELECT created_at FROM routes WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(text.map(|t| parse_timestamp(&t)).transpose()?)
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Call `listener` with the full route list after every committed change.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&[RouteEntity]) + Send + Sync + 'static,
    {
        self.route_listeners.subscribe(Arc::new(listener))
    }

    fn notify_routes(&self) -> StoreResult<()> {
        if self.route_listeners.is_empty() {
            return Ok(());
        }
        self.route_listeners.publish(self.list_all()?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::route;
    use std::sync::{Arc, Mutex};

    fn store() -> RouteStore {
        let _ = env_logger::builder().is_test(true).try_init();
        RouteStore::in_memory().unwrap()
    }

    #[test]
    fn test_add_and_get() {
        let store = store();
        let alpe = route("Alpe");
        let id = store.add(&alpe).unwrap();
        let entity = store.get(id).unwrap().unwrap();
        assert_eq!(entity.id, id);
        assert!(entity.visible);
        assert_eq!(entity.route, alpe);
        assert!(store.get(id + 100).unwrap().is_none());
    }

    #[test]
    fn test_ids_are_never_reused() {
        let store = store();
        let first = store.add(&route("A")).unwrap();
        assert!(store.delete(first).unwrap());
        let second = store.add(&route("B")).unwrap();
        assert!(second > first);
        assert!(!store.delete(first).unwrap());
    }

    #[test]
    fn test_add_rejects_invalid_route() {
        let store = store();
        let mut bad = route("Bad");
        bad.elevation.negative = -3.0;
        match store.add(&bad) {
            Err(StoreError::Validation(errors)) => {
                assert!(errors.iter().any(|e| e.contains("elevation.negative")))
            }
            other => panic!("expected validation error, got {:?}", other),
        }
        assert!(store.list_all().unwrap().is_empty());
    }

    #[test]
    fn test_put_invalid_leaves_row_untouched() {
        let store = store();
        let id = store.add(&route("Stable")).unwrap();
        let before = store.get(id).unwrap().unwrap();

        let mut mutated = before.clone();
        mutated.route.elevation.positive = -1.0;
        mutated.route.name = "Changed".to_string();
        assert!(matches!(store.put(&mutated), Err(StoreError::Validation(_))));

        assert_eq!(store.get(id).unwrap().unwrap(), before);
    }

    #[test]
    fn test_put_unknown_id_is_not_found() {
        let store = store();
        let id = store.add(&route("A")).unwrap();
        let mut entity = store.get(id).unwrap().unwrap();
        entity.id = 999;
        assert!(matches!(store.put(&entity), Err(StoreError::NotFound(999))));
    }

    #[test]
    fn test_color_and_visibility_updates() {
        let store = store();
        let id = store.add(&route("A")).unwrap();
        let before = store.get(id).unwrap().unwrap();

        let recolored = store.update_color(id, "#ff0000").unwrap();
        assert_eq!(recolored.route.color, "#ff0000");
        assert!(recolored.route.updated_at >= before.route.updated_at);

        let hidden = store.update_visibility(id, false).unwrap();
        assert!(!hidden.visible);
        assert_eq!(store.get(id).unwrap().unwrap(), hidden);

        assert!(matches!(
            store.update_color(id, "red"),
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            store.update_visibility(42, true),
            Err(StoreError::NotFound(42))
        ));
    }

    #[test]
    fn test_find_by_name_and_bbox() {
        let store = store();
        let alps = store.add(&route("Alps")).unwrap();
        let mut far = route("Far");
        far.bbox = [20.0, 50.0, 21.0, 51.0];
        let far_id = store.add(&far).unwrap();
        store.add(&route("Alps")).unwrap();

        let named = store.find_by_name("Alps").unwrap();
        assert_eq!(named.len(), 2);
        assert_eq!(named[0].id, alps);

        // Touches the sample bbox [6.0, 45.0, 6.02, 45.01] on its corner.
        let hits = store.query_bbox([6.02, 45.01, 7.0, 46.0]).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|e| e.id != far_id));

        let hits = store.query_bbox([20.5, 50.5, 30.0, 60.0]).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, far_id);
        assert!(store.query_bbox([-10.0, -10.0, -5.0, -5.0]).unwrap().is_empty());
    }

    #[test]
    fn test_list_recent_and_created_at() {
        let store = store();
        let mut old = route("Old");
        old.created_at = old.created_at - chrono::Duration::days(3);
        let old_id = store.add(&old).unwrap();
        let new_id = store.add(&route("New")).unwrap();

        let recent = store.list_recent(1).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, new_id);
        assert_eq!(store.created_at(old_id).unwrap(), Some(old.created_at));
        assert_eq!(store.created_at(999).unwrap(), None);
    }

    #[test]
    fn test_subscription_lifecycle() {
        let store = store();
        let seen: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscription = store.subscribe(move |routes| sink.lock().unwrap().push(routes.len()));

        let id = store.add(&route("A")).unwrap();
        store.add(&route("B")).unwrap();
        store.update_visibility(id, false).unwrap();
        store.delete(id).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 2, 1]);

        subscription.unsubscribe();
        store.add(&route("C")).unwrap();
        assert_eq!(seen.lock().unwrap().len(), 4);
    }

    #[test]
    fn test_dropping_subscription_unsubscribes() {
        let store = store();
        let count = Arc::new(Mutex::new(0));
        {
            let sink = Arc::clone(&count);
            let _subscription = store.subscribe(move |_| *sink.lock().unwrap() += 1);
            store.add(&route("A")).unwrap();
        }
        store.add(&route("B")).unwrap();
        assert_eq!(*count.lock().unwrap(), 1);
    }
}
