//! Route data model.
//!
//! Routes are stored as four typed GeoJSON feature collections (track paths,
//! notes, photos, sensor samples) plus derived metrics. Every feature and
//! collection carries a `type` discriminator; each discriminator is a closed
//! serde enum, so a document with an unknown kind fails to deserialize.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A GeoJSON position: `[lon, lat]` or `[lon, lat, ele]`.
pub type Position = Vec<f64>;

/// GeoJSON geometry, tagged by `type` with its `coordinates`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point(Position),
    MultiPoint(Vec<Position>),
    LineString(Vec<Position>),
    MultiLineString(Vec<Vec<Position>>),
    Polygon(Vec<Vec<Position>>),
    MultiPolygon(Vec<Vec<Vec<Position>>>),
}

impl Geometry {
    /// Every position of the geometry, in document order.
    pub fn positions(&self) -> Vec<&Position> {
        match self {
            Geometry::Point(p) => vec![p],
            Geometry::MultiPoint(ps) | Geometry::LineString(ps) => ps.iter().collect(),
            Geometry::MultiLineString(lines) | Geometry::Polygon(lines) => {
                lines.iter().flatten().collect()
            }
            Geometry::MultiPolygon(polys) => polys.iter().flatten().flatten().collect(),
        }
    }

    pub fn is_line(&self) -> bool {
        matches!(self, Geometry::LineString(_) | Geometry::MultiLineString(_))
    }

    pub fn is_point(&self) -> bool {
        matches!(self, Geometry::Point(_))
    }

    pub fn is_polygon(&self) -> bool {
        matches!(self, Geometry::Polygon(_) | Geometry::MultiPolygon(_))
    }
}

// ============================================================================
// Discriminators
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FeatureTag {
    #[default]
    Feature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CollectionTag {
    #[default]
    FeatureCollection,
}

/// Kind of a feature in the route collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteFeatureKind {
    #[serde(rename = "Track Path")]
    TrackPath,
    #[serde(rename = "from")]
    From,
    #[serde(rename = "to")]
    To,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NoteKind {
    #[default]
    Note,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PhotoKind {
    #[default]
    Photo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrackerDataKind {
    #[default]
    #[serde(rename = "Tracker Data")]
    TrackerData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RoutePathsKind {
    #[default]
    #[serde(rename = "Route Paths")]
    RoutePaths,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RouteNotesKind {
    #[default]
    #[serde(rename = "Route Notes")]
    RouteNotes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RoutePhotosKind {
    #[default]
    #[serde(rename = "Route Photos")]
    RoutePhotos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SensorsKind {
    #[default]
    #[serde(rename = "Sensors Datas")]
    SensorsDatas,
}

// ============================================================================
// Features and collections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature<P> {
    #[serde(rename = "type", default)]
    pub tag: FeatureTag,
    pub geometry: Geometry,
    pub properties: P,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,
}

impl<P> Feature<P> {
    pub fn new(geometry: Geometry, properties: P) -> Self {
        Self {
            tag: FeatureTag::Feature,
            geometry,
            properties,
            bbox: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection<P, K> {
    #[serde(rename = "type", default)]
    pub tag: CollectionTag,
    pub features: Vec<Feature<P>>,
    pub properties: K,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,
}

impl<P, K> FeatureCollection<P, K> {
    pub fn new(features: Vec<Feature<P>>, properties: K) -> Self {
        Self {
            tag: CollectionTag::FeatureCollection,
            features,
            properties,
            bbox: None,
        }
    }
}

/// Properties of a route-collection feature (track line or start/end marker).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathProperties {
    #[serde(rename = "type")]
    pub kind: RouteFeatureKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionSummary>,
    /// Source properties carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PathProperties {
    pub fn track(name: Option<String>) -> Self {
        Self {
            kind: RouteFeatureKind::TrackPath,
            name,
            session: None,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteProperties {
    #[serde(rename = "type", default)]
    pub kind: NoteKind,
    #[serde(default)]
    pub content: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One encoded responsive variant referenced from an exported photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsiveVariant {
    pub src: String,
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub quality: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsiveImages {
    pub variants: Vec<ResponsiveVariant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
    pub aspect_ratio: f64,
    pub original_width: u32,
    pub original_height: u32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoProperties {
    #[serde(rename = "type", default)]
    pub kind: PhotoKind,
    pub filename: String,
    #[serde(default)]
    pub extension: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternative_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responsive_images: Option<ResponsiveImages>,
    /// Raw image bytes, base64 in JSON.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "base64_bytes"
    )]
    pub binary_content: Option<Vec<u8>>,
}

/// One sensor sample. Context fields are nullable.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorProperties {
    #[serde(rename = "type", default)]
    pub kind: TrackerDataKind,
    pub heart_rate: Option<f64>,
    pub cadence: Option<f64>,
    pub power: Option<f64>,
    pub speed: Option<f64>,
    pub temperature: Option<f64>,
    pub timestamp: Option<String>,
}

/// Aggregate metrics of a recorded session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSummary {
    pub sport: String,
    pub sub_sport: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub total_elapsed_time: f64,
    pub total_timer_time: f64,
    pub total_distance: f64,
    pub total_ascent: f64,
    pub total_descent: f64,
    pub total_calories: f64,
    pub avg_heart_rate: f64,
    pub max_heart_rate: f64,
    pub min_heart_rate: f64,
    pub avg_cadence: f64,
    pub max_cadence: f64,
    pub avg_power: f64,
    pub max_power: f64,
    pub avg_speed: f64,
    pub max_speed: f64,
    pub avg_temperature: f64,
    pub max_temperature: f64,
    pub min_temperature: f64,
}

impl Default for SessionSummary {
    fn default() -> Self {
        Self {
            sport: "unknown".to_string(),
            sub_sport: "unknown".to_string(),
            start_time: None,
            end_time: None,
            total_elapsed_time: 0.0,
            total_timer_time: 0.0,
            total_distance: 0.0,
            total_ascent: 0.0,
            total_descent: 0.0,
            total_calories: 0.0,
            avg_heart_rate: 0.0,
            max_heart_rate: 0.0,
            min_heart_rate: 0.0,
            avg_cadence: 0.0,
            max_cadence: 0.0,
            avg_power: 0.0,
            max_power: 0.0,
            avg_speed: 0.0,
            max_speed: 0.0,
            avg_temperature: 0.0,
            max_temperature: 0.0,
            min_temperature: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RoutePathsProperties {
    #[serde(rename = "type", default)]
    pub kind: RoutePathsKind,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RouteNotesProperties {
    #[serde(rename = "type", default)]
    pub kind: RouteNotesKind,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RoutePhotosProperties {
    #[serde(rename = "type", default)]
    pub kind: RoutePhotosKind,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SensorsProperties {
    #[serde(rename = "type", default)]
    pub kind: SensorsKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionSummary>,
}

pub type PathFeature = Feature<PathProperties>;
pub type NoteFeature = Feature<NoteProperties>;
pub type PhotoFeature = Feature<PhotoProperties>;
pub type SensorFeature = Feature<SensorProperties>;

pub type RoutePaths = FeatureCollection<PathProperties, RoutePathsProperties>;
pub type RouteNotes = FeatureCollection<NoteProperties, RouteNotesProperties>;
pub type RoutePhotos = FeatureCollection<PhotoProperties, RoutePhotosProperties>;
pub type SensorsData = FeatureCollection<SensorProperties, SensorsProperties>;

/// The four collections that make up a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteData {
    pub route: RoutePaths,
    pub notes: RouteNotes,
    pub photos: RoutePhotos,
    pub sensors: SensorsData,
}

impl RouteData {
    /// Wrap route features with empty notes, photos and sensors.
    pub fn from_paths(features: Vec<PathFeature>) -> Self {
        Self {
            route: FeatureCollection::new(features, RoutePathsProperties::default()),
            notes: FeatureCollection::new(Vec::new(), RouteNotesProperties::default()),
            photos: FeatureCollection::new(Vec::new(), RoutePhotosProperties::default()),
            sensors: FeatureCollection::new(Vec::new(), SensorsProperties::default()),
        }
    }

    /// The first `Track Path` feature, if any.
    pub fn track(&self) -> Option<&PathFeature> {
        self.route
            .features
            .iter()
            .find(|f| f.properties.kind == RouteFeatureKind::TrackPath)
    }
}

/// Accumulated climb and descent, in the units of the source elevations.
/// Both components are non-negative magnitudes.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Elevation {
    pub positive: f64,
    pub negative: f64,
}

// ============================================================================
// Route and entity
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub route_data: RouteData,
    /// Length of the first route feature, kilometres.
    pub distance: f64,
    pub elevation: Elevation,
    #[serde(
        rename = "originalGPXData",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub original_gpx_data: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "base64_bytes"
    )]
    pub original_fit_data: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_parsed_fit_data: Option<Value>,
    pub color: String,
    /// `[minLon, minLat, maxLon, maxLat]`
    pub bbox: [f64; 4],
}

impl Route {
    /// Check every structural rule and return all violations.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut violations = Vec::new();

        if self.name.trim().is_empty() {
            violations.push("name must not be empty".to_string());
        }
        if !self.distance.is_finite() || self.distance < 0.0 {
            violations.push(format!("distance must be >= 0, got {}", self.distance));
        }
        if !self.elevation.positive.is_finite() || self.elevation.positive < 0.0 {
            violations.push(format!(
                "elevation.positive must be >= 0, got {}",
                self.elevation.positive
            ));
        }
        if !self.elevation.negative.is_finite() || self.elevation.negative < 0.0 {
            violations.push(format!(
                "elevation.negative must be >= 0, got {}",
                self.elevation.negative
            ));
        }
        if self.bbox.iter().any(|v| !v.is_finite())
            || self.bbox[0] > self.bbox[2]
            || self.bbox[1] > self.bbox[3]
        {
            violations.push(format!("bbox is not a valid envelope: {:?}", self.bbox));
        }
        if !is_hex_color(&self.color) {
            violations.push(format!("color must be #rrggbb, got '{}'", self.color));
        }

        let data = &self.route_data;
        for (i, f) in data.route.features.iter().enumerate() {
            match f.properties.kind {
                RouteFeatureKind::TrackPath if !f.geometry.is_line() => {
                    violations.push(format!("route feature {} (Track Path) is not a line", i))
                }
                RouteFeatureKind::From | RouteFeatureKind::To if !f.geometry.is_point() => {
                    violations.push(format!("route feature {} (marker) is not a point", i))
                }
                _ => {}
            }
            check_positions("route", i, &f.geometry, &mut violations);
        }
        for (i, f) in data.notes.features.iter().enumerate() {
            if !f.geometry.is_point() {
                violations.push(format!("note {} is not a point", i));
            }
            check_positions("note", i, &f.geometry, &mut violations);
        }
        for (i, f) in data.photos.features.iter().enumerate() {
            if !f.geometry.is_point() {
                violations.push(format!("photo {} is not a point", i));
            }
            check_positions("photo", i, &f.geometry, &mut violations);
        }
        for (i, f) in data.sensors.features.iter().enumerate() {
            if !f.geometry.is_point() {
                violations.push(format!("sensor sample {} is not a point", i));
            }
            check_positions("sensor sample", i, &f.geometry, &mut violations);
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

fn check_positions(what: &str, index: usize, geometry: &Geometry, out: &mut Vec<String>) {
    let bad = geometry
        .positions()
        .iter()
        .any(|p| !(2..=3).contains(&p.len()) || p.iter().any(|v| !v.is_finite()));
    if bad {
        out.push(format!("{} {} has a malformed position", what, index));
    }
}

fn is_hex_color(color: &str) -> bool {
    color.len() == 7
        && color.starts_with('#')
        && color[1..].chars().all(|c| c.is_ascii_hexdigit())
}

/// A persisted route: store-assigned id plus visibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteEntity {
    pub id: i64,
    pub visible: bool,
    #[serde(flatten)]
    pub route: Route,
}

impl RouteEntity {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        self.route.validate()
    }
}

/// Serde adapter for optional byte payloads stored as base64 strings.
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => s.serialize_str(&STANDARD.encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(d)?;
        encoded
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
