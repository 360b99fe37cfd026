//! # Routecore
//!
//! GPS activity ingestion, route metrics and export processing.
//!
//! This library provides:
//! - Ingestion of GPX, FIT and GeoJSON files into a unified [`Route`]
//! - Elevation smoothing, climb/descent, bounding boxes and track length
//! - Route simplification for export
//! - Responsive photo transcoding (JPEG, WebP, AVIF) with cancellation
//! - Export orchestration into an ordered archive file set
//!
//! Storage, threads and ZIP packing live in the `routebox` crate.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use routecore::{prepare_routes_from_files, InputFile};
//!
//! let bytes = std::fs::read("morning_ride.gpx")?;
//! let outcomes = prepare_routes_from_files(&[InputFile::new("morning_ride.gpx", bytes)]);
//! for outcome in outcomes {
//!     match outcome.route {
//!         Some(route) => println!("{}: {:.1} km", route.name, route.distance),
//!         None => println!("{} failed: {:?}", outcome.file_name, outcome.errors),
//!     }
//! }
//! # Ok::<(), std::io::Error>(())
//! ```

// Data model
pub mod model;
pub use model::{
    Elevation, Feature, FeatureCollection, Geometry, NoteFeature, PathFeature, PhotoFeature,
    Position, Route, RouteData, RouteEntity, RouteFeatureKind, RoutePaths, SensorFeature,
    SessionSummary,
};

// Error handling
pub mod error;
pub use error::IngestError;

// Configuration
pub mod config;
pub use config::{
    AppConfiguration, ExportOptions, ImageProcessingConfig, RouteSimplification, StaticFilesUrls,
};

// Geographic utilities
pub mod geo_utils;

// FIT decoding
pub mod fit;
pub use fit::{parse_fit, FitParseResult};

// GPX reading / writing
pub mod gpx_convert;

// Ingestion pipeline
pub mod ingest;
pub use ingest::{prepare_routes_from_files, route_name_from_file, InputFile, IngestOutcome};

// Export simplification
pub mod simplify;
pub use simplify::simplify_route_paths;

// File name sanitization
pub mod sanitize;
pub use sanitize::sanitize_file_name;

// Cancellation, progress, transient handles
pub mod progress;
pub use progress::{BlobHandle, CancellationToken, Cancelled, ExportProgress, HandleLedger};

// Image transcoding
pub mod image_pipeline;
pub use image_pipeline::{
    ImageCodec, ImageFormat, ImageProcessingOptions, ImageTranscoder, ProcessedImage, RasterCodec,
    TranscodeError,
};

// Export orchestration
pub mod export;
pub use export::{ExportBundle, ExportError, ExportOrchestrator, RouteManifest};
