//! # Routes Manager
//!
//! Application façade over the route store, the current selection and the
//! export worker. One instance is usually installed process-wide with
//! [`init_routes_manager`] and reached through [`with_routes_manager`].

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use log::{info, warn};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use routecore::{
    prepare_routes_from_files, AppConfiguration, Elevation, ExportOptions, IngestOutcome,
    InputFile, Route, RouteEntity,
};

use crate::archive::{routes_export, ExportArtifact, FileSaver};
use crate::error::{AppError, AppResult, StoreError, StoreResult};
use crate::store::{ConfigEntity, Listeners, RouteStore, Subscription};
use crate::worker::{ExportWorker, ProgressCallback};

/// Archive name used when more than one route is exported.
pub const MULTI_ROUTE_ARCHIVE_NAME: &str = "routes-archives";
pub const ARCHIVE_DESCRIPTION: &str = "Routes archive";

/// Result of importing one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub file_name: String,
    /// Store id of the created route, when the import succeeded.
    pub id: Option<i64>,
    pub errors: Vec<String>,
}

/// Totals over the selected routes.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionInfo {
    pub count: usize,
    /// Kilometres.
    pub distance: f64,
    pub elevation: Elevation,
}

/// Store every parsed route; one report per outcome, in order.
fn store_outcomes(
    store: &RouteStore,
    outcomes: Vec<IngestOutcome>,
) -> StoreResult<Vec<ImportReport>> {
    let mut reports = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        let mut report = ImportReport {
            file_name: outcome.file_name,
            id: None,
            errors: outcome.errors,
        };
        if let Some(route) = outcome.route {
            match store.add(&route) {
                Ok(id) => report.id = Some(id),
                Err(StoreError::Validation(errors)) => {
                    warn!("[store] Rejected {}: {:?}", report.file_name, errors);
                    report.errors.extend(errors);
                }
                Err(e) => return Err(e),
            }
        }
        reports.push(report);
    }
    Ok(reports)
}

/// Listeners are called after the store lock is released, so they may call
/// back into the manager.
pub struct RoutesManager {
    store: Mutex<RouteStore>,
    route_events: Listeners<RouteEntity>,
    config_events: Listeners<ConfigEntity>,
    selected: Mutex<BTreeSet<i64>>,
    worker: ExportWorker,
}

impl RoutesManager {
    pub fn new(mut store: RouteStore, worker: ExportWorker) -> Self {
        let (route_events, config_events) = store.defer_notifications();
        Self {
            store: Mutex::new(store),
            route_events,
            config_events,
            selected: Mutex::new(BTreeSet::new()),
            worker,
        }
    }

    /// Open the store at `db_path` with the default image codec.
    pub fn open(db_path: &str) -> AppResult<Self> {
        Ok(Self::new(
            RouteStore::open(db_path)?,
            ExportWorker::with_default_codec(),
        ))
    }

    pub fn in_memory() -> AppResult<Self> {
        Self::open(":memory:")
    }

    fn store(&self) -> MutexGuard<'_, RouteStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn selection(&self) -> MutexGuard<'_, BTreeSet<i64>> {
        self.selected.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a store write, then deliver its change snapshots unlocked.
    fn write<R, E>(&self, op: impl FnOnce(&RouteStore) -> Result<R, E>) -> AppResult<R>
    where
        AppError: From<E>,
    {
        let result = op(&*self.store());
        self.route_events.flush();
        self.config_events.flush();
        Ok(result?)
    }

    // ========================================================================
    // Routes
    // ========================================================================

    pub fn routes(&self) -> AppResult<Vec<RouteEntity>> {
        Ok(self.store().list_all()?)
    }

    /// Live route list; see [`RouteStore::subscribe`].
    pub fn subscribe_routes<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&[RouteEntity]) + Send + Sync + 'static,
    {
        self.route_events.subscribe(Arc::new(listener))
    }

    pub fn get_route(&self, id: i64) -> AppResult<Option<RouteEntity>> {
        Ok(self.store().get(id)?)
    }

    pub fn create_route(&self, route: &Route) -> AppResult<i64> {
        self.write(|store| store.add(route))
    }

    /// Parse files and store every route that came out of them.
    ///
    /// One report per file, in input order. A file that fails to parse or
    /// to validate does not stop the others.
    pub fn import_files(&self, files: &[InputFile]) -> AppResult<Vec<ImportReport>> {
        let outcomes = prepare_routes_from_files(files);
        let reports = self.write(|store| store_outcomes(store, outcomes))?;

        info!(
            "[store] Imported {}/{} files",
            reports.iter().filter(|r| r.id.is_some()).count(),
            reports.len()
        );
        Ok(reports)
    }

    /// Store a modified route. `updatedAt` is bumped; invalid routes are
    /// rejected and the stored row is left as it was.
    pub fn update_route(&self, entity: &RouteEntity) -> AppResult<RouteEntity> {
        let mut updated = entity.clone();
        updated.route.updated_at = Utc::now();
        self.write(|store| store.put(&updated))?;
        Ok(updated)
    }

    pub fn update_route_color(&self, id: i64, color: &str) -> AppResult<RouteEntity> {
        self.write(|store| store.update_color(id, color))
    }

    pub fn update_route_visibility(&self, id: i64, visible: bool) -> AppResult<RouteEntity> {
        self.write(|store| store.update_visibility(id, visible))
    }

    /// Delete a route and drop it from the selection.
    pub fn delete_route(&self, id: i64) -> AppResult<bool> {
        let removed = self.write(|store| store.delete(id))?;
        self.selection().remove(&id);
        Ok(removed)
    }

    // ========================================================================
    // Selection
    // ========================================================================

    pub fn selected_ids(&self) -> Vec<i64> {
        self.selection().iter().copied().collect()
    }

    pub fn select(&self, id: i64) {
        self.selection().insert(id);
    }

    pub fn deselect(&self, id: i64) {
        self.selection().remove(&id);
    }

    pub fn clear_selection(&self) {
        self.selection().clear();
    }

    /// Summed distance and elevation of the selected routes still stored.
    pub fn selected_info(&self) -> AppResult<SelectionInfo> {
        let ids = self.selected_ids();
        let store = self.store();
        let mut info = SelectionInfo::default();
        for id in ids {
            if let Some(entity) = store.get(id)? {
                info.count += 1;
                info.distance += entity.route.distance;
                info.elevation.positive += entity.route.elevation.positive;
                info.elevation.negative += entity.route.elevation.negative;
            }
        }
        Ok(info)
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    pub fn current_config(&self) -> AppResult<AppConfiguration> {
        Ok(self.store().config_history().current_config()?)
    }

    pub fn save_config(&self, config: &AppConfiguration) -> AppResult<ConfigEntity> {
        self.write(|store| store.config_history().save_config(config))
    }

    /// Live configuration history; see [`ConfigHistory::subscribe`].
    ///
    /// [`ConfigHistory::subscribe`]: crate::store::ConfigHistory::subscribe
    pub fn subscribe_config<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&[ConfigEntity]) + Send + Sync + 'static,
    {
        self.config_events.subscribe(Arc::new(listener))
    }

    // ========================================================================
    // Export
    // ========================================================================

    /// Export routes by id into a ZIP artifact.
    ///
    /// An empty id list exports every stored route. Without `config`, the
    /// export options of the current configuration are used.
    pub fn export_selected_routes(
        &self,
        ids: &[i64],
        config: Option<ExportOptions>,
        on_progress: ProgressCallback,
    ) -> AppResult<ExportArtifact> {
        let routes: Vec<RouteEntity> = self
            .routes()?
            .into_iter()
            .filter(|r| ids.is_empty() || ids.contains(&r.id))
            .collect();

        let archive_name = match routes.as_slice() {
            [] => return Err(AppError::NoRoutesSelected),
            [single] => single.route.name.clone(),
            _ => MULTI_ROUTE_ARCHIVE_NAME.to_string(),
        };

        let options = match config {
            Some(options) => options,
            None => self.current_config()?.export_options,
        };

        routes_export(
            &self.worker,
            routes,
            &archive_name,
            ARCHIVE_DESCRIPTION,
            options,
            on_progress,
        )
    }

    /// Export and hand the archive to `saver`.
    pub fn save_export(
        &self,
        ids: &[i64],
        config: Option<ExportOptions>,
        on_progress: ProgressCallback,
        saver: &dyn FileSaver,
    ) -> AppResult<std::path::PathBuf> {
        let artifact = self.export_selected_routes(ids, config, on_progress)?;
        saver.save(&artifact)
    }

    pub fn cancel_export(&self) {
        self.worker.cancel();
    }

    pub fn is_exporting(&self) -> bool {
        self.worker.is_exporting()
    }
}

// ============================================================================
// Global instance
// ============================================================================

static ROUTES_MANAGER: OnceCell<RoutesManager> = OnceCell::new();

/// Install the process-wide manager. Later calls return the first instance.
pub fn init_routes_manager(db_path: &str) -> AppResult<&'static RoutesManager> {
    ROUTES_MANAGER.get_or_try_init(|| {
        info!("[store] Initializing routes manager at {}", db_path);
        RoutesManager::open(db_path)
    })
}

/// Run `f` against the process-wide manager, if it has been initialized.
pub fn with_routes_manager<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&RoutesManager) -> R,
{
    ROUTES_MANAGER.get().map(f)
}
