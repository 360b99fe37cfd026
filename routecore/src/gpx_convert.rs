//! GPX reading and writing.
//!
//! Reading turns tracks, routes and waypoints into untyped GeoJSON-style
//! features that ingestion then normalizes. Writing serializes a route
//! collection back to GPX 1.1.

use geo::Point;
use gpx::errors::GpxError;
use gpx::{Gpx, GpxVersion, Metadata, Track, TrackSegment, Waypoint};
use serde_json::{json, Map, Value};

use crate::ingest::RawFeature;
use crate::model::{Geometry, Position, RouteFeatureKind, RoutePaths};

const CREATOR: &str = "routebox";

fn position(wpt: &Waypoint) -> Position {
    let p = wpt.point();
    match wpt.elevation {
        Some(ele) => vec![p.x(), p.y(), ele],
        None => vec![p.x(), p.y()],
    }
}

fn insert_opt(props: &mut Map<String, Value>, key: &str, value: &Option<String>) {
    if let Some(v) = value {
        props.insert(key.to_string(), json!(v));
    }
}

fn line_geometry(mut parts: Vec<Vec<Position>>) -> Option<Geometry> {
    parts.retain(|p| !p.is_empty());
    match parts.len() {
        0 => None,
        1 => parts.pop().map(Geometry::LineString),
        _ => Some(Geometry::MultiLineString(parts)),
    }
}

/// Tracks and routes become line features, waypoints become point features.
pub fn gpx_to_features(text: &str) -> Result<Vec<RawFeature>, GpxError> {
    let doc = gpx::read(text.as_bytes())?;
    let mut features = Vec::new();

    for track in &doc.tracks {
        let parts = track
            .segments
            .iter()
            .map(|s| s.points.iter().map(position).collect())
            .collect();
        if let Some(geometry) = line_geometry(parts) {
            let mut props = Map::new();
            insert_opt(&mut props, "name", &track.name);
            insert_opt(&mut props, "desc", &track.description);
            features.push(RawFeature::new(geometry, props));
        }
    }

    for route in &doc.routes {
        let parts = vec![route.points.iter().map(position).collect()];
        if let Some(geometry) = line_geometry(parts) {
            let mut props = Map::new();
            insert_opt(&mut props, "name", &route.name);
            insert_opt(&mut props, "desc", &route.description);
            features.push(RawFeature::new(geometry, props));
        }
    }

    for wpt in &doc.waypoints {
        let mut props = Map::new();
        insert_opt(&mut props, "name", &wpt.name);
        insert_opt(&mut props, "desc", &wpt.description);
        insert_opt(&mut props, "cmt", &wpt.comment);
        features.push(RawFeature::new(Geometry::Point(position(wpt)), props));
    }

    Ok(features)
}

fn waypoint(pos: &Position) -> Option<Waypoint> {
    if pos.len() < 2 {
        return None;
    }
    let mut wpt = Waypoint::new(Point::new(pos[0], pos[1]));
    wpt.elevation = pos.get(2).copied();
    Some(wpt)
}

fn segment(coords: &[Position]) -> TrackSegment {
    let mut seg = TrackSegment::default();
    seg.points = coords.iter().filter_map(waypoint).collect();
    seg
}

/// Serialize the route collection as a GPX 1.1 document.
///
/// Track paths become tracks (one segment per line part); `from`/`to`
/// markers become named waypoints.
pub fn paths_to_gpx(name: &str, paths: &RoutePaths) -> Result<Vec<u8>, GpxError> {
    let mut metadata = Metadata::default();
    metadata.name = Some(name.to_string());

    let mut doc = Gpx::default();
    doc.version = GpxVersion::Gpx11;
    doc.creator = Some(CREATOR.to_string());
    doc.metadata = Some(metadata);

    for feature in &paths.features {
        let props = &feature.properties;
        match (props.kind, &feature.geometry) {
            (RouteFeatureKind::TrackPath, Geometry::LineString(coords)) => {
                let mut track = Track::default();
                track.name = props.name.clone().or_else(|| Some(name.to_string()));
                track.segments.push(segment(coords));
                doc.tracks.push(track);
            }
            (RouteFeatureKind::TrackPath, Geometry::MultiLineString(lines)) => {
                let mut track = Track::default();
                track.name = props.name.clone().or_else(|| Some(name.to_string()));
                track.segments = lines.iter().map(|l| segment(l)).collect();
                doc.tracks.push(track);
            }
            (RouteFeatureKind::From | RouteFeatureKind::To, Geometry::Point(pos)) => {
                if let Some(mut wpt) = waypoint(pos) {
                    let label = if props.kind == RouteFeatureKind::From { "from" } else { "to" };
                    wpt.name = Some(props.name.clone().unwrap_or_else(|| label.to_string()));
                    doc.waypoints.push(wpt);
                }
            }
            _ => {}
        }
    }

    let mut buf = Vec::new();
    gpx::write(&doc, &mut buf)?;
    Ok(buf)
}
