//! Route path simplification for export.
//!
//! Douglas-Peucker via `geo::SimplifyIdx`, so the kept vertices are taken
//! from the source with their elevation intact. With `high_quality` off a
//! radial-distance pass first drops vertices closer than the tolerance to
//! the previously kept one.

use geo::{Coord, LineString, SimplifyIdx};

use crate::config::RouteSimplification;
use crate::model::{Feature, Geometry, PathFeature, Position, RoutePaths};

/// Drop vertices within `tolerance` of the last kept one. Endpoints stay.
fn radial_filter(coords: &[Position], tolerance: f64) -> Vec<Position> {
    let Some(first) = coords.first() else {
        return Vec::new();
    };
    let sq_tolerance = tolerance * tolerance;
    let mut kept = vec![first.clone()];

    for (i, p) in coords.iter().enumerate().skip(1) {
        let last = &kept[kept.len() - 1];
        let dx = p[0] - last[0];
        let dy = p[1] - last[1];
        if dx * dx + dy * dy > sq_tolerance || i == coords.len() - 1 {
            kept.push(p.clone());
        }
    }
    kept
}

/// Simplify one polyline. Lines of two points or fewer are returned as is.
///
/// Positions without both longitude and latitude are dropped first.
pub fn simplify_positions(coords: &[Position], tolerance: f64, high_quality: bool) -> Vec<Position> {
    let coords: Vec<Position> = coords.iter().filter(|p| p.len() >= 2).cloned().collect();
    if coords.len() <= 2 || tolerance <= 0.0 {
        return coords;
    }

    let candidates = if high_quality {
        coords
    } else {
        radial_filter(&coords, tolerance)
    };

    let line: LineString<f64> = candidates
        .iter()
        .map(|p| Coord { x: p[0], y: p[1] })
        .collect();
    line.simplify_idx(&tolerance)
        .into_iter()
        .map(|i| candidates[i].clone())
        .collect()
}

fn simplify_geometry(geometry: &Geometry, options: &RouteSimplification) -> Geometry {
    let (tolerance, hq) = (options.tolerance, options.high_quality);
    match geometry {
        Geometry::LineString(coords) => {
            Geometry::LineString(simplify_positions(coords, tolerance, hq))
        }
        Geometry::MultiLineString(lines) => Geometry::MultiLineString(
            lines
                .iter()
                .map(|l| simplify_positions(l, tolerance, hq))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Simplified copy of a route collection. Markers and properties are kept.
pub fn simplify_route_paths(paths: &RoutePaths, options: &RouteSimplification) -> RoutePaths {
    let features: Vec<PathFeature> = paths
        .features
        .iter()
        .map(|f| Feature {
            geometry: simplify_geometry(&f.geometry, options),
            ..f.clone()
        })
        .collect();
    RoutePaths {
        features,
        ..paths.clone()
    }
}
