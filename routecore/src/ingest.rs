//! Route ingestion: raw file bytes to [`Route`].
//!
//! Each file goes through the same stages:
//!
//! ```text
//! Received -> Parsing -> Parsed -> MetricsComputed -> Assembled
//!                     \-> ParseFailed
//! ```
//!
//! A failing file yields an outcome with `route: None` and its errors; the
//! rest of the batch is unaffected and outcomes keep input order.

use std::collections::BTreeSet;
use std::fmt;

use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::error::{IngestError, Result};
use crate::fit::parse_fit;
use crate::geo_utils::{
    calculate_elevation_default, get_bounding_box, get_random_color, line_length_km,
};
use crate::gpx_convert::gpx_to_features;
use crate::model::{
    Feature, FeatureCollection, Geometry, NoteFeature, NoteProperties, PathFeature,
    PathProperties, Route, RouteData, RouteFeatureKind, RouteNotesProperties,
};

/// One file handed to ingestion.
#[derive(Debug, Clone)]
pub struct InputFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl InputFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

/// Result for one input file.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub file_name: String,
    pub route: Option<Route>,
    /// Hard failure reason, or soft warnings accompanying a route.
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStage {
    Received,
    Parsing,
    Parsed,
    ParseFailed,
    MetricsComputed,
    Assembled,
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IngestStage::Received => "received",
            IngestStage::Parsing => "parsing",
            IngestStage::Parsed => "parsed",
            IngestStage::ParseFailed => "parse failed",
            IngestStage::MetricsComputed => "metrics computed",
            IngestStage::Assembled => "assembled",
        };
        f.write_str(s)
    }
}

fn enter(file: &str, stage: IngestStage) {
    debug!("[ingest] {}: {}", file, stage);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Gpx,
    Fit,
    GeoJson,
}

impl SourceFormat {
    /// Format from the lower-cased last extension of `file_name`.
    pub fn from_file_name(file_name: &str) -> Result<Self> {
        let ext = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "gpx" => Ok(SourceFormat::Gpx),
            "fit" => Ok(SourceFormat::Fit),
            "geojson" | "json" => Ok(SourceFormat::GeoJson),
            _ => Err(IngestError::UnsupportedExtension(ext)),
        }
    }
}

/// File name without its last extension; names without one are kept whole.
pub fn route_name_from_file(file_name: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => file_name.to_string(),
    }
}

// ============================================================================
// Raw features
// ============================================================================

/// An untyped GeoJSON feature as found in source files.
#[derive(Debug, Clone, Deserialize)]
pub struct RawFeature {
    #[serde(default)]
    pub geometry: Option<Geometry>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub properties: Map<String, Value>,
}

impl RawFeature {
    pub fn new(geometry: Geometry, properties: Map<String, Value>) -> Self {
        Self {
            geometry: Some(geometry),
            properties,
        }
    }
}

fn null_as_empty<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Map<String, Value>, D::Error> {
    Ok(Option::<Map<String, Value>>::deserialize(d)?.unwrap_or_default())
}

#[derive(Debug, Deserialize)]
struct RawCollection {
    #[serde(default)]
    features: Vec<RawFeature>,
}

fn take_string(props: &mut Map<String, Value>, key: &str) -> Option<String> {
    match props.remove(key) {
        Some(Value::String(s)) => Some(s),
        Some(other) => {
            props.insert(key.to_string(), other);
            None
        }
        None => None,
    }
}

fn note(position: Vec<f64>, mut props: Map<String, Value>) -> NoteFeature {
    props.remove("type");
    let content = take_string(&mut props, "content").unwrap_or_else(|| {
        let parts: Vec<String> = ["name", "desc", "cmt"]
            .iter()
            .filter_map(|k| props.get(*k).and_then(Value::as_str).map(str::to_string))
            .collect();
        parts.join("\n")
    });
    Feature::new(
        Geometry::Point(position),
        NoteProperties {
            content,
            extra: props,
            ..NoteProperties::default()
        },
    )
}

/// Split raw features into route features and notes.
///
/// Lines become `Track Path`; points tagged `from`/`to` stay route markers;
/// other points become notes; polygons are dropped.
pub fn normalize_features(
    file_name: &str,
    raw: Vec<RawFeature>,
) -> (Vec<PathFeature>, Vec<NoteFeature>) {
    let mut paths = Vec::new();
    let mut notes = Vec::new();

    for feature in raw {
        let Some(geometry) = feature.geometry else {
            debug!("[ingest] {}: feature without geometry skipped", file_name);
            continue;
        };
        let mut props = feature.properties;

        match geometry {
            Geometry::LineString(_) | Geometry::MultiLineString(_) => {
                props.remove("type");
                let name = take_string(&mut props, "name");
                paths.push(Feature::new(
                    geometry,
                    PathProperties {
                        name,
                        extra: props,
                        ..PathProperties::track(None)
                    },
                ));
            }
            Geometry::Point(position) => {
                let marker = match props.get("type").and_then(Value::as_str) {
                    Some("from") => Some(RouteFeatureKind::From),
                    Some("to") => Some(RouteFeatureKind::To),
                    _ => None,
                };
                match marker {
                    Some(kind) => {
                        props.remove("type");
                        let name = take_string(&mut props, "name");
                        paths.push(Feature::new(
                            Geometry::Point(position),
                            PathProperties {
                                kind,
                                name,
                                session: None,
                                extra: props,
                            },
                        ));
                    }
                    None => notes.push(note(position, props)),
                }
            }
            Geometry::MultiPoint(positions) => {
                for position in positions {
                    notes.push(note(position, props.clone()));
                }
            }
            Geometry::Polygon(_) | Geometry::MultiPolygon(_) => {
                warn!("[ingest] {}: polygon feature dropped", file_name);
            }
        }
    }

    (paths, notes)
}

// ============================================================================
// Pipeline
// ============================================================================

struct Parsed {
    route_data: RouteData,
    original_gpx_data: Option<String>,
    original_fit_data: Option<Vec<u8>>,
    original_parsed_fit_data: Option<Value>,
    warnings: Vec<String>,
}

fn with_notes(paths: Vec<PathFeature>, notes: Vec<NoteFeature>) -> RouteData {
    let mut data = RouteData::from_paths(paths);
    data.notes = FeatureCollection::new(notes, RouteNotesProperties::default());
    data
}

fn parse(file: &InputFile, format: SourceFormat) -> Result<Parsed> {
    match format {
        SourceFormat::Gpx => {
            let text = String::from_utf8(file.bytes.clone())?;
            let raw = gpx_to_features(&text)?;
            let (paths, notes) = normalize_features(&file.name, raw);
            Ok(Parsed {
                route_data: with_notes(paths, notes),
                original_gpx_data: Some(text),
                original_fit_data: None,
                original_parsed_fit_data: None,
                warnings: Vec::new(),
            })
        }
        SourceFormat::GeoJson => {
            let collection: RawCollection = serde_json::from_slice(&file.bytes)?;
            let (paths, notes) = normalize_features(&file.name, collection.features);
            Ok(Parsed {
                route_data: with_notes(paths, notes),
                original_gpx_data: None,
                original_fit_data: None,
                original_parsed_fit_data: None,
                warnings: Vec::new(),
            })
        }
        SourceFormat::Fit => {
            let result = parse_fit(&file.bytes);
            match result.route_data {
                Some(route_data) => Ok(Parsed {
                    route_data,
                    original_gpx_data: None,
                    original_fit_data: Some(file.bytes.clone()),
                    original_parsed_fit_data: result.original_parsed_fit_data,
                    warnings: result.errors,
                }),
                None => Err(IngestError::Fit(result.errors.join("; "))),
            }
        }
    }
}

fn assemble(name: String, parsed: Parsed) -> Result<Route> {
    let Parsed {
        mut route_data,
        original_gpx_data,
        original_fit_data,
        original_parsed_fit_data,
        ..
    } = parsed;

    let first = route_data.route.features.first().ok_or(IngestError::NoFeatures)?;
    let distance = line_length_km(&first.geometry);
    let elevation = calculate_elevation_default(first);
    let bbox = get_bounding_box(&route_data.route.features).ok_or(IngestError::NoFeatures)?;
    route_data.route.bbox = Some(bbox.to_vec());

    let now = Utc::now();
    let route = Route {
        name,
        date: None,
        created_at: now,
        updated_at: now,
        text_content: None,
        tags: BTreeSet::new(),
        route_data,
        distance,
        elevation,
        original_gpx_data,
        original_fit_data,
        original_parsed_fit_data,
        color: get_random_color(),
        bbox,
    };
    route.validate().map_err(IngestError::Invalid)?;
    Ok(route)
}

/// Run one file through the pipeline.
pub fn prepare_route(file: &InputFile) -> IngestOutcome {
    enter(&file.name, IngestStage::Received);

    let failed = |e: IngestError| {
        warn!("[ingest] {}: {}", file.name, e);
        IngestOutcome {
            file_name: file.name.clone(),
            route: None,
            errors: vec![e.to_string()],
        }
    };

    let format = match SourceFormat::from_file_name(&file.name) {
        Ok(f) => f,
        Err(e) => return failed(e),
    };

    enter(&file.name, IngestStage::Parsing);
    let parsed = match parse(file, format) {
        Ok(p) => p,
        Err(e) => {
            enter(&file.name, IngestStage::ParseFailed);
            return failed(e);
        }
    };
    enter(&file.name, IngestStage::Parsed);

    let warnings = parsed.warnings.clone();
    let route = match assemble(route_name_from_file(&file.name), parsed) {
        Ok(r) => r,
        Err(e) => {
            let mut outcome = failed(e);
            outcome.errors.extend(warnings);
            return outcome;
        }
    };
    enter(&file.name, IngestStage::MetricsComputed);
    enter(&file.name, IngestStage::Assembled);

    IngestOutcome {
        file_name: file.name.clone(),
        route: Some(route),
        errors: warnings,
    }
}

/// One outcome per file, in input order. Never aborts the batch.
pub fn prepare_routes_from_files(files: &[InputFile]) -> Vec<IngestOutcome> {
    let outcomes: Vec<IngestOutcome> = files.iter().map(prepare_route).collect();
    let ok = outcomes.iter().filter(|o| o.route.is_some()).count();
    info!(
        "[ingest] {} of {} files converted to routes",
        ok,
        outcomes.len()
    );
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::testing::three_point_ride;
    use crate::gpx_convert::testing::SAMPLE_GPX;

    const SAMPLE_GEOJSON: &str = r##"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "geometry": {
                    "type": "LineString",
                    "coordinates": [[6.0, 45.0, 100.0], [6.001, 45.001, 120.0], [6.002, 45.002, 110.0]]
                },
                "properties": { "name": "Loop", "stroke": "#ff0000" }
            },
            {
                "type": "Feature",
                "geometry": { "type": "Point", "coordinates": [6.0, 45.0] },
                "properties": { "type": "from" }
            },
            {
                "type": "Feature",
                "geometry": { "type": "Point", "coordinates": [6.001, 45.001] },
                "properties": null
            },
            {
                "type": "Feature",
                "geometry": { "type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,0]]] },
                "properties": {}
            }
        ]
    }"##;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn test_route_name_from_file() {
        assert_eq!(route_name_from_file("ride.gpx"), "ride");
        assert_eq!(route_name_from_file("my.long.name.geojson"), "my.long.name");
        assert_eq!(route_name_from_file("noext"), "noext");
    }

    #[test]
    fn test_gpx_ingest() {
        init();
        let outcomes = prepare_routes_from_files(&[InputFile::new("col.gpx", SAMPLE_GPX)]);
        assert_eq!(outcomes.len(), 1);
        let route = outcomes[0].route.as_ref().unwrap();

        assert_eq!(route.name, "col");
        assert!(route.distance > 0.0);
        assert!(route.elevation.positive > 0.0);
        assert_eq!(route.original_gpx_data.as_deref(), Some(SAMPLE_GPX));
        assert_eq!(route.route_data.route.features[0].properties.kind, RouteFeatureKind::TrackPath);
        assert_eq!(route.route_data.notes.features.len(), 1);
        assert_eq!(route.route_data.notes.features[0].properties.content, "Fountain\nFresh water");
        assert!(route.color.starts_with('#'));
        assert!(route.validate().is_ok());
        assert_eq!(route.created_at, route.updated_at);
    }

    #[test]
    fn test_geojson_ingest_normalizes() {
        init();
        let outcome = prepare_route(&InputFile::new("loop.GeoJSON", SAMPLE_GEOJSON));
        let route = outcome.route.unwrap();
        let paths = &route.route_data.route.features;

        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0].properties.name.as_deref(), Some("Loop"));
        assert_eq!(paths[0].properties.extra["stroke"], "#ff0000");
        assert_eq!(paths[1].properties.kind, RouteFeatureKind::From);
        assert_eq!(route.route_data.notes.features.len(), 1);
        assert_eq!(route.bbox, [6.0, 45.0, 6.002, 45.002]);
        assert_eq!(route.route_data.route.bbox, Some(vec![6.0, 45.0, 6.002, 45.002]));
        assert!(route.original_gpx_data.is_none());
    }

    #[test]
    fn test_gpx_and_geojson_normalize_alike() {
        let gpx = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test" xmlns="http://www.topografix.com/GPX/1/1">
  <trk>
    <name>Pass</name>
    <trkseg>
      <trkpt lat="45.0" lon="6.0"><ele>100</ele></trkpt>
      <trkpt lat="45.01" lon="6.01"><ele>180</ele></trkpt>
    </trkseg>
  </trk>
</gpx>"#;
        let geojson = r#"{
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "geometry": { "type": "LineString", "coordinates": [[6.0, 45.0, 100.0], [6.01, 45.01, 180.0]] },
                "properties": { "name": "Pass" }
            }]
        }"#;

        let from_gpx = prepare_route(&InputFile::new("pass.gpx", gpx)).route.unwrap();
        let from_json = prepare_route(&InputFile::new("pass.geojson", geojson)).route.unwrap();

        assert_eq!(from_gpx.route_data.route, from_json.route_data.route);
        assert_eq!(from_gpx.elevation, from_json.elevation);
        assert!(from_gpx.elevation.positive > 0.0);
        assert_eq!(from_gpx.distance, from_json.distance);
        assert_eq!(from_gpx.bbox, from_json.bbox);
    }

    #[test]
    fn test_fit_ingest_keeps_originals() {
        let bytes = three_point_ride();
        let outcome = prepare_route(&InputFile::new("morning.fit", bytes.clone()));
        assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);
        let route = outcome.route.unwrap();
        assert_eq!(route.original_fit_data, Some(bytes));
        assert!(route.original_parsed_fit_data.is_some());
        assert_eq!(route.route_data.sensors.features.len(), 3);
        assert!(route.distance > 0.0);
    }

    #[test]
    fn test_fit_without_positions_fails_with_soft_errors() {
        let bytes = crate::fit::testing::activity(&[], true);
        let outcome = prepare_route(&InputFile::new("indoor.fit", bytes));
        assert!(outcome.route.is_none());
        assert_eq!(outcome.errors[0], "no route features found");
        assert!(outcome.errors.iter().any(|e| e.contains("no GPS records")));
    }

    #[test]
    fn test_malformed_position_fails_the_file() {
        let geojson = r#"{
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "geometry": { "type": "LineString", "coordinates": [[6.0, 45.0], [6.1], [6.2, 45.2]] },
                "properties": {}
            }]
        }"#;
        let outcome = prepare_route(&InputFile::new("x.geojson", geojson));
        assert!(outcome.route.is_none());
        assert_eq!(
            outcome.errors,
            vec!["invalid route: route 0 has a malformed position".to_string()]
        );
    }

    #[test]
    fn test_failures_do_not_abort_batch() {
        init();
        let files = vec![
            InputFile::new("notes.txt", "hello"),
            InputFile::new("broken.json", "{ not json"),
            InputFile::new("col.gpx", SAMPLE_GPX),
            InputFile::new("fake.fit", "not a fit file"),
            InputFile::new("empty.geojson", r#"{"type":"FeatureCollection","features":[]}"#),
        ];
        let outcomes = prepare_routes_from_files(&files);

        let names: Vec<&str> = outcomes.iter().map(|o| o.file_name.as_str()).collect();
        assert_eq!(names, vec!["notes.txt", "broken.json", "col.gpx", "fake.fit", "empty.geojson"]);
        assert!(outcomes[0].errors[0].contains("unsupported file extension"));
        assert!(outcomes[1].route.is_none());
        assert!(outcomes[2].route.is_some());
        assert!(outcomes[3].errors[0].contains("unrecognizable format"));
        assert_eq!(outcomes[4].errors, vec!["no route features found".to_string()]);
    }
}
