//! Export and application configuration.
//!
//! Plain serde structs; every field has a documented default so partially
//! stored configurations load cleanly.

use serde::{Deserialize, Serialize};

use crate::image_pipeline::ImageProcessingOptions;

/// URL prefixes/suffixes applied to exported files and images.
///
/// Empty prefix and suffix mean archive-relative paths.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StaticFilesUrls {
    /// Prepended to route file paths in the manifest.
    pub files_url_prefix: String,
    pub files_url_suffix: String,
    /// Prepended to image paths; `images/` is dropped when set.
    pub images_url_prefix: String,
    pub images_url_suffix: String,
}

impl StaticFilesUrls {
    /// URL of an image, given its path below `images/`.
    pub fn image_url(&self, path: &str) -> String {
        if self.images_url_prefix.is_empty() && self.images_url_suffix.is_empty() {
            format!("images/{}", path)
        } else {
            format!("{}{}{}", self.images_url_prefix, path, self.images_url_suffix)
        }
    }

    /// URL of a route file, given its path inside the route folder.
    pub fn file_url(&self, path: &str) -> String {
        if self.files_url_prefix.is_empty() && self.files_url_suffix.is_empty() {
            path.to_string()
        } else {
            format!("{}{}{}", self.files_url_prefix, path, self.files_url_suffix)
        }
    }
}

/// Line simplification applied to exported GPX and GeoJSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouteSimplification {
    /// Douglas-Peucker tolerance in degrees. Default 0.00001.
    pub tolerance: f64,
    /// Skip the radial-distance pre-pass. Default true.
    pub high_quality: bool,
}

impl Default for RouteSimplification {
    fn default() -> Self {
        Self {
            tolerance: 0.00001,
            high_quality: true,
        }
    }
}

/// Photo handling during export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageProcessingConfig {
    /// Transcode photos into responsive variants. Default true.
    pub enabled: bool,
    /// Copy untouched originals into `images/original/`. Default true.
    pub include_original: bool,
    /// Target sizes and per-format encoder tables.
    pub options: ImageProcessingOptions,
}

impl Default for ImageProcessingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            include_original: true,
            options: ImageProcessingOptions::default(),
        }
    }
}

/// Everything an export job needs besides the routes themselves.
///
/// Stored under `exportOptions` in [`AppConfiguration`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportOptions {
    pub static_files_urls: StaticFilesUrls,
    pub route_simplification: RouteSimplification,
    pub image_processing: ImageProcessingConfig,
}

/// Application-wide settings, stored as configuration history.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfiguration {
    pub export_options: ExportOptions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfiguration::default();
        let export = &config.export_options;
        assert_eq!(export.route_simplification.tolerance, 0.00001);
        assert!(export.route_simplification.high_quality);
        assert!(export.image_processing.enabled);
        assert!(export.image_processing.include_original);
        assert_eq!(export.image_processing.options.widths, vec![400, 800, 1200, 1600]);
    }

    #[test]
    fn test_empty_json_loads_defaults() {
        let config: AppConfiguration = serde_json::from_str("{}").unwrap();
        assert_eq!(config, AppConfiguration::default());
    }

    #[test]
    fn test_url_formatting() {
        let mut urls = StaticFilesUrls::default();
        assert_eq!(urls.image_url("responsive/a_400w.webp"), "images/responsive/a_400w.webp");
        assert_eq!(urls.file_url("ride.geojson"), "ride.geojson");

        urls.images_url_prefix = "https://cdn.example.com/img/".to_string();
        urls.images_url_suffix = "?v=1".to_string();
        urls.files_url_prefix = "https://cdn.example.com/files/".to_string();
        assert_eq!(
            urls.image_url("a.jpg"),
            "https://cdn.example.com/img/a.jpg?v=1"
        );
        assert_eq!(
            urls.file_url("ride.geojson"),
            "https://cdn.example.com/files/ride.geojson"
        );
    }
}
