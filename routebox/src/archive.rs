//! ZIP assembly and saving of export archives.

use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::info;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use routecore::{sanitize_file_name, ExportBundle, ExportOptions, RouteEntity};

use crate::error::AppResult;
use crate::worker::{ExportWorker, ProgressCallback};

/// A finished archive, ready to be saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub description: String,
    pub extensions: Vec<String>,
}

/// Pack every bundle entry, in path order, into a deflated ZIP.
///
/// Entry timestamps are fixed so identical bundles produce identical bytes.
pub fn build_zip(bundle: &ExportBundle) -> AppResult<Vec<u8>> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (path, bytes) in &bundle.entries {
        writer.start_file(path.as_str(), options)?;
        writer.write_all(bytes)?;
    }
    Ok(writer.finish()?.into_inner())
}

/// `<sanitized name>_<YYYY-MM-DD_HH-MM-SS>.zip`
pub fn archive_file_name(name: &str, now: DateTime<Utc>) -> String {
    let base = match sanitize_file_name(name) {
        s if s.is_empty() => "routes".to_string(),
        s => s,
    };
    format!("{}_{}.zip", base, now.format("%Y-%m-%d_%H-%M-%S"))
}

/// Run an export on the worker and pack the result.
///
/// Blocks until the job completes; a cancelled job returns the
/// cancellation error and no artifact.
pub fn routes_export(
    worker: &ExportWorker,
    routes: Vec<RouteEntity>,
    archive_name: &str,
    description: &str,
    options: ExportOptions,
    on_progress: ProgressCallback,
) -> AppResult<ExportArtifact> {
    let route_count = routes.len();
    let bundle = worker.submit(routes, options, on_progress)?.wait()?;
    let bytes = build_zip(&bundle)?;
    let file_name = archive_file_name(archive_name, Utc::now());

    info!(
        "[export] Packed {} routes into {} ({} bytes)",
        route_count,
        file_name,
        bytes.len()
    );

    Ok(ExportArtifact {
        bytes,
        file_name,
        description: description.to_string(),
        extensions: vec![".zip".to_string()],
    })
}

/// Destination for finished archives.
pub trait FileSaver {
    fn save(&self, artifact: &ExportArtifact) -> AppResult<PathBuf>;
}

/// Writes archives into a directory, creating it if needed.
#[derive(Debug, Clone)]
pub struct DirectorySaver {
    dir: PathBuf,
}

impl DirectorySaver {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

impl FileSaver for DirectorySaver {
    fn save(&self, artifact: &ExportArtifact) -> AppResult<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(&artifact.file_name);
        fs::write(&path, &artifact.bytes)?;
        info!("[export] Saved {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{entity, route};
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use std::io::Read;

    fn bundle(entries: &[(&str, &[u8])]) -> ExportBundle {
        ExportBundle {
            manifests: Vec::new(),
            entries: entries
                .iter()
                .map(|(path, bytes)| (path.to_string(), bytes.to_vec()))
                .collect::<BTreeMap<_, _>>(),
            options: ExportOptions::default(),
        }
    }

    #[test]
    fn test_zip_round_trip_and_order() {
        let bundle = bundle(&[
            ("b/route.gpx", b"<gpx/>"),
            ("a/images/photo.jpg", b"\xff\xd8\xff"),
            ("manifest.json", b"[]"),
        ]);
        let bytes = build_zip(&bundle).unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(names, vec!["a/images/photo.jpg", "b/route.gpx", "manifest.json"]);

        let mut content = String::new();
        archive
            .by_name("b/route.gpx")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "<gpx/>");
    }

    #[test]
    fn test_zip_is_deterministic() {
        let bundle = bundle(&[("x.json", b"{}"), ("y.json", b"[]")]);
        assert_eq!(build_zip(&bundle).unwrap(), build_zip(&bundle).unwrap());
    }

    #[test]
    fn test_archive_file_name() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 7, 5, 9).unwrap();
        assert_eq!(
            archive_file_name("Tour du Mont Blanc", now),
            "Tour_du_Mont_Blanc_2024-06-01_07-05-09.zip"
        );
        assert_eq!(archive_file_name("...", now), "routes_2024-06-01_07-05-09.zip");
    }

    #[test]
    fn test_routes_export_and_save() {
        let worker = ExportWorker::with_default_codec();
        let artifact = routes_export(
            &worker,
            vec![entity(1, route("Lakeside"))],
            "Lakeside",
            "Routes archive",
            ExportOptions::default(),
            Box::new(|_| {}),
        )
        .unwrap();
        assert!(artifact.file_name.starts_with("Lakeside_"));
        assert_eq!(artifact.extensions, vec![".zip"]);
        assert_eq!(artifact.description, "Routes archive");

        let archive = zip::ZipArchive::new(Cursor::new(artifact.bytes.clone())).unwrap();
        assert!(archive.file_names().any(|n| n == "Lakeside.geojson"));

        let dir = tempfile::tempdir().unwrap();
        let saved = DirectorySaver::new(dir.path().join("exports"))
            .save(&artifact)
            .unwrap();
        assert_eq!(fs::read(saved).unwrap(), artifact.bytes);
    }
}
