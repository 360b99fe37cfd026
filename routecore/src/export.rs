//! Export orchestration.
//!
//! Turns persisted routes into the file set of an export archive: raw and
//! simplified paths as GeoJSON/GPX, the exported route JSON, originals,
//! responsive photo variants and a manifest per route. Everything lands in
//! an ordered path → bytes map; ZIP packing happens elsewhere.
//!
//! Work units are routes plus photos. Progress starts at `(0, total)`,
//! never moves backwards and ends at `(total, total)`. Cancellation is
//! checked before every route and photo and inside image transcoding.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use gpx::errors::GpxError;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{ExportOptions, StaticFilesUrls};
use crate::gpx_convert::paths_to_gpx;
use crate::image_pipeline::{
    ImageCodec, ImageTranscoder, ImageVariant, ProcessedImage, RasterCodec, TranscodeError,
};
use crate::ingest::route_name_from_file;
use crate::model::{
    PhotoFeature, ResponsiveImages, ResponsiveVariant, Route, RouteData, RouteEntity, RoutePaths,
    RoutePhotos,
};
use crate::progress::{CancellationToken, Cancelled, ExportProgress, HandleLedger, ProgressTracker};
use crate::sanitize::sanitize_file_name;
use crate::simplify::simplify_route_paths;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("export cancelled by user")]
    Cancelled,

    #[error("cannot serialize {what}: {source}")]
    Serialization {
        what: String,
        source: serde_json::Error,
    },

    #[error("cannot write GPX for '{route}': {source}")]
    Gpx { route: String, source: GpxError },

    #[error("internal export error: {0}")]
    Internal(String),
}

impl ExportError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExportError::Cancelled)
    }
}

impl From<Cancelled> for ExportError {
    fn from(_: Cancelled) -> Self {
        ExportError::Cancelled
    }
}

pub type Result<T> = std::result::Result<T, ExportError>;

/// Where a route's exported files can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestPaths {
    pub geojson: String,
    pub json: String,
    pub gpx: String,
    pub fit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteManifest {
    pub name: String,
    pub paths: ManifestPaths,
}

/// Everything an archive needs, in deterministic order.
#[derive(Debug, Clone)]
pub struct ExportBundle {
    pub manifests: Vec<RouteManifest>,
    pub entries: BTreeMap<String, Vec<u8>>,
    pub options: ExportOptions,
}

fn to_json<T: Serialize>(what: &str, value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(value).map_err(|source| ExportError::Serialization {
        what: what.to_string(),
        source,
    })
}

pub struct ExportOrchestrator {
    transcoder: ImageTranscoder,
}

impl ExportOrchestrator {
    pub fn new(codec: Arc<dyn ImageCodec>, handles: HandleLedger) -> Self {
        Self {
            transcoder: ImageTranscoder::new(codec, handles),
        }
    }

    /// Orchestrator on the `image`-crate codec with a fresh ledger.
    pub fn with_default_codec() -> Self {
        Self::new(Arc::new(RasterCodec), HandleLedger::new())
    }

    pub fn handles(&self) -> &HandleLedger {
        self.transcoder.ledger()
    }

    pub fn process_routes(
        &self,
        routes: &[RouteEntity],
        options: &ExportOptions,
        token: &CancellationToken,
        on_progress: &dyn Fn(ExportProgress),
    ) -> Result<ExportBundle> {
        let photo_count: usize = routes
            .iter()
            .map(|r| r.route.route_data.photos.features.len())
            .sum();
        let total = u32::try_from(routes.len() + photo_count)
            .map_err(|_| ExportError::Internal("too many work units".to_string()))?;

        let mut progress = ProgressTracker::new(total, on_progress);
        progress.report(
            "Starting export",
            Some(format!("{} routes, {} photos", routes.len(), photo_count)),
        );
        info!(
            "[export] starting: {} routes, {} photos",
            routes.len(),
            photo_count
        );

        let mut bundle = ExportBundle {
            manifests: Vec::with_capacity(routes.len()),
            entries: BTreeMap::new(),
            options: options.clone(),
        };
        let mut folders = HashSet::new();
        let multiple = routes.len() > 1;

        for entity in routes {
            token.check()?;

            let base = match sanitize_file_name(&entity.route.name) {
                s if s.is_empty() => format!("route_{}", entity.id),
                s => s,
            };
            let folder = if multiple {
                format!("{}/", unique_folder(&base, &mut folders))
            } else {
                String::new()
            };

            progress.report(
                format!("Processing route {}", entity.route.name),
                Some("Simplifying route paths".to_string()),
            );
            let simplified = simplify_route_paths(
                &entity.route.route_data.route,
                &options.route_simplification,
            );
            progress.advance();

            let photos = self.export_photos(
                entity,
                &folder,
                options,
                token,
                &mut progress,
                &mut bundle.entries,
            )?;

            let manifest =
                write_route_files(entity, &base, &folder, simplified, photos, options, &mut bundle.entries)?;
            bundle.manifests.push(manifest);
        }

        token.check()?;
        progress.finish("Export complete");
        info!("[export] done: {} entries", bundle.entries.len());
        Ok(bundle)
    }

    fn export_photos(
        &self,
        entity: &RouteEntity,
        folder: &str,
        options: &ExportOptions,
        token: &CancellationToken,
        progress: &mut ProgressTracker<'_>,
        entries: &mut BTreeMap<String, Vec<u8>>,
    ) -> Result<Vec<PhotoFeature>> {
        let photos = &entity.route.route_data.photos.features;
        let mut exported = Vec::with_capacity(photos.len());
        let mut taken = HashSet::new();

        for (i, photo) in photos.iter().enumerate() {
            token.check()?;
            progress.report(
                format!("Processing photo {}/{} of {}", i + 1, photos.len(), entity.route.name),
                Some(photo.properties.filename.clone()),
            );
            let filename = match sanitize_file_name(&photo.properties.filename) {
                s if s.is_empty() => "photo".to_string(),
                s => s,
            };
            let filename = unique_file_name(&filename, &mut taken);
            exported.push(self.export_photo(
                photo, &filename, folder, options, token, progress, entries,
            )?);
            progress.advance();
        }
        Ok(exported)
    }

    #[allow(clippy::too_many_arguments)]
    fn export_photo(
        &self,
        photo: &PhotoFeature,
        filename: &str,
        folder: &str,
        options: &ExportOptions,
        token: &CancellationToken,
        progress: &ProgressTracker<'_>,
        entries: &mut BTreeMap<String, Vec<u8>>,
    ) -> Result<PhotoFeature> {
        let mut out = photo.clone();
        out.properties.binary_content = None;

        let Some(bytes) = photo.properties.binary_content.as_deref() else {
            debug!(
                "[export] photo {} has no binary content",
                photo.properties.filename
            );
            return Ok(out);
        };

        let urls = &options.static_files_urls;
        let imaging = &options.image_processing;

        if imaging.include_original {
            let path = format!("original/{}", filename);
            entries.insert(format!("{}images/{}", folder, path), bytes.to_vec());
            out.properties.original_url = Some(urls.image_url(&path));
        }

        if !imaging.enabled {
            entries.insert(format!("{}images/{}", folder, filename), bytes.to_vec());
            out.properties.url = Some(urls.image_url(filename));
            return Ok(out);
        }

        match self
            .transcoder
            .process_image(bytes, filename, &imaging.options, token)
        {
            Ok(processed) => {
                progress.report(
                    format!("Optimized {}", filename),
                    Some(format!(
                        "{} variants{}",
                        processed.variants.len(),
                        if processed.fallback.is_some() { " + fallback" } else { "" }
                    )),
                );
                let base = route_name_from_file(filename);
                let responsive = store_variants(processed, &base, folder, urls, entries);
                out.properties.url = responsive
                    .fallback
                    .clone()
                    .or_else(|| responsive.variants.first().map(|v| v.src.clone()))
                    .or_else(|| out.properties.original_url.clone());
                out.properties.responsive_images = Some(responsive);
            }
            Err(TranscodeError::Cancelled) => return Err(ExportError::Cancelled),
            Err(e) => {
                warn!("[export] {}; exporting the original instead", e);
                entries.insert(format!("{}images/{}", folder, filename), bytes.to_vec());
                out.properties.url = Some(urls.image_url(filename));
            }
        }
        Ok(out)
    }
}

/// `base`, or `base_2`, `base_3`... if already taken.
fn unique_folder(base: &str, taken: &mut HashSet<String>) -> String {
    let mut candidate = base.to_string();
    let mut n = 2;
    while !taken.insert(candidate.clone()) {
        candidate = format!("{}_{}", base, n);
        n += 1;
    }
    candidate
}

/// `name`, or `stem_2.ext`, `stem_3.ext`... if already taken within a route.
fn unique_file_name(name: &str, taken: &mut HashSet<String>) -> String {
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{}", ext)),
        _ => (name, String::new()),
    };
    let mut candidate = name.to_string();
    let mut n = 2;
    while !taken.insert(candidate.clone()) {
        candidate = format!("{}_{}{}", stem, n, ext);
        n += 1;
    }
    candidate
}

/// Move encoded variants into `entries` and describe them.
fn store_variants(
    processed: ProcessedImage,
    base: &str,
    folder: &str,
    urls: &StaticFilesUrls,
    entries: &mut BTreeMap<String, Vec<u8>>,
) -> ResponsiveImages {
    let mut store = |path: String, variant: ImageVariant| {
        let src = urls.image_url(&path);
        let described = ResponsiveVariant {
            src,
            width: variant.width,
            height: variant.height,
            format: variant.format.as_str().to_string(),
            quality: variant.quality,
        };
        entries.insert(format!("{}images/{}", folder, path), variant.data.into_bytes());
        described
    };

    let variants = processed
        .variants
        .into_iter()
        .map(|v| {
            let path = format!("responsive/{}_{}w.{}", base, v.width, v.format.extension());
            store(path, v)
        })
        .collect();
    let fallback = processed.fallback.map(|v| {
        let path = format!("responsive/{}_fallback.{}", base, v.format.extension());
        store(path, v).src
    });

    ResponsiveImages {
        variants,
        fallback,
        aspect_ratio: processed.aspect_ratio,
        original_width: processed.original_width,
        original_height: processed.original_height,
    }
}

/// The exported route: simplified paths, exported photos, no raw payloads.
fn export_projection(entity: &RouteEntity, simplified: RoutePaths, photos: Vec<PhotoFeature>) -> RouteEntity {
    let route = &entity.route;
    let data = &route.route_data;
    RouteEntity {
        id: entity.id,
        visible: entity.visible,
        route: Route {
            name: route.name.clone(),
            date: route.date,
            created_at: route.created_at,
            updated_at: route.updated_at,
            text_content: route.text_content.clone(),
            tags: route.tags.clone(),
            route_data: RouteData {
                route: simplified,
                notes: data.notes.clone(),
                photos: RoutePhotos::new(photos, data.photos.properties.clone()),
                sensors: data.sensors.clone(),
            },
            distance: route.distance,
            elevation: route.elevation,
            original_gpx_data: None,
            original_fit_data: None,
            original_parsed_fit_data: route.original_parsed_fit_data.clone(),
            color: route.color.clone(),
            bbox: route.bbox,
        },
    }
}

fn write_route_files(
    entity: &RouteEntity,
    base: &str,
    folder: &str,
    simplified: RoutePaths,
    photos: Vec<PhotoFeature>,
    options: &ExportOptions,
    entries: &mut BTreeMap<String, Vec<u8>>,
) -> Result<RouteManifest> {
    let route = &entity.route;
    let gpx_err = |source| ExportError::Gpx {
        route: route.name.clone(),
        source,
    };
    let urls = &options.static_files_urls;

    let geojson_name = format!("{}.geojson", base);
    let json_name = format!("{}.json", base);
    let simplified_gpx_name = format!("{}_simplified.gpx", base);

    entries.insert(
        format!("{}{}", folder, geojson_name),
        to_json("route paths", &route.route_data.route)?,
    );
    entries.insert(
        format!("{}{}", folder, simplified_gpx_name),
        paths_to_gpx(&route.name, &simplified).map_err(gpx_err)?,
    );
    entries.insert(
        format!("{}{}_raw.gpx", folder, base),
        paths_to_gpx(&route.name, &route.route_data.route).map_err(gpx_err)?,
    );
    if let Some(text) = &route.original_gpx_data {
        entries.insert(format!("{}{}_original.gpx", folder, base), text.as_bytes().to_vec());
    }
    let fit_name = route.original_fit_data.as_ref().map(|bytes| {
        let name = format!("{}_original.fit", base);
        entries.insert(format!("{}{}", folder, name), bytes.clone());
        name
    });

    let projection = export_projection(entity, simplified, photos);
    entries.insert(format!("{}{}", folder, json_name), to_json("route", &projection)?);

    let manifest = RouteManifest {
        name: route.name.clone(),
        paths: ManifestPaths {
            geojson: urls.file_url(&geojson_name),
            json: urls.file_url(&json_name),
            gpx: urls.file_url(&simplified_gpx_name),
            fit: fit_name.map(|n| urls.file_url(&n)),
        },
    };
    entries.insert(format!("{}manifest.json", folder), to_json("manifest", &manifest)?);
    Ok(manifest)
}
