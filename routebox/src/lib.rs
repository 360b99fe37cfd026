//! # Routebox
//!
//! Local route library on top of [`routecore`]: SQLite persistence with
//! change subscriptions, configuration history, a background export worker
//! and ZIP archive assembly.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use routebox::{init_routes_manager, DirectorySaver};
//! use routecore::InputFile;
//!
//! let manager = init_routes_manager("routes.db")?;
//! let bytes = std::fs::read("morning_ride.fit")?;
//! let reports = manager.import_files(&[InputFile::new("morning_ride.fit", bytes)])?;
//! println!("{:?}", reports);
//!
//! let saved = manager.save_export(
//!     &[],
//!     None,
//!     Box::new(|p| println!("{}/{} {}", p.current, p.total, p.message)),
//!     &DirectorySaver::new("exports"),
//! )?;
//! println!("saved {}", saved.display());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

// Error handling
pub mod error;
pub use error::{AppError, AppResult, StoreError, StoreResult};

// Persistence
pub mod store;
pub use store::{ConfigEntity, ConfigHistory, RouteStore, Subscription};

// Background export
pub mod worker;
pub use worker::{ExportJob, ExportWorker, ProgressCallback};

// ZIP assembly and saving
pub mod archive;
pub use archive::{build_zip, routes_export, DirectorySaver, ExportArtifact, FileSaver};

// Application façade
pub mod manager;
pub use manager::{
    init_routes_manager, with_routes_manager, ImportReport, RoutesManager, SelectionInfo,
};

#[cfg(test)]
mod testing;
