//! # Geographic Utilities
//!
//! Elevation smoothing, climb/descent accumulation, envelopes and track length.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`smooth_elevations`] | Centered moving average over the elevation component |
//! | [`calculate_elevation`] | Smoothed climb and descent of a line feature |
//! | [`get_bounding_box`] | 2D envelope of a set of features |
//! | [`get_random_color`] | Random dark-ish `#rrggbb` display color |
//! | [`line_length_km`] | Great-circle length of a line geometry |
//!
//! All coordinates are GeoJSON order (`[lon, lat, ele?]`, WGS84 degrees).

use geo::{Distance, Haversine, Point};
use rand::Rng;

use crate::model::{Elevation, Feature, Geometry, Position};

/// Window used when smoothing elevations before accumulating climb.
pub const ELEVATION_SMOOTHING_WINDOW: usize = 4;

// =============================================================================
// Elevation
// =============================================================================

/// Replace each elevation by the mean of a centered window.
///
/// For index `i` the window is `[i - floor(w/2), i + ceil(w/2))`, clamped to
/// the sequence. A position without elevation counts as 0 in the mean.
/// Longitude and latitude are left untouched; the output has the input length.
pub fn smooth_elevations(coords: &[Position], window_size: usize) -> Vec<Position> {
    if window_size == 0 {
        return coords.to_vec();
    }
    let before = window_size / 2;
    let after = window_size - before;

    coords
        .iter()
        .enumerate()
        .map(|(i, coord)| {
            let start = i.saturating_sub(before);
            let end = (i + after).min(coords.len());
            let window = &coords[start..end];
            let mean = window.iter().map(elevation_of).sum::<f64>() / window.len() as f64;

            let mut out = coord.clone();
            match out.len() {
                0 | 1 => {}
                2 => out.push(mean),
                _ => out[2] = mean,
            }
            out
        })
        .collect()
}

fn elevation_of(p: &Position) -> f64 {
    p.get(2).copied().unwrap_or(0.0)
}

/// Climb and descent of a LineString feature after smoothing.
///
/// Deltas whose magnitude is not above `threshold` are ignored. The descent
/// is returned as a non-negative magnitude. Any other geometry, including
/// MultiLineString, yields zeros.
pub fn calculate_elevation<P>(feature: &Feature<P>, threshold: f64) -> Elevation {
    match &feature.geometry {
        Geometry::LineString(coords) => accumulate(coords, threshold),
        _ => Elevation::default(),
    }
}

/// [`calculate_elevation`] with a zero threshold.
pub fn calculate_elevation_default<P>(feature: &Feature<P>) -> Elevation {
    calculate_elevation(feature, 0.0)
}

fn accumulate(coords: &[Position], threshold: f64) -> Elevation {
    let smoothed = smooth_elevations(coords, ELEVATION_SMOOTHING_WINDOW);
    let mut elevation = Elevation::default();

    for pair in smoothed.windows(2) {
        let delta = elevation_of(&pair[1]) - elevation_of(&pair[0]);
        if delta.abs() > threshold {
            if delta > 0.0 {
                elevation.positive += delta;
            } else {
                elevation.negative += -delta;
            }
        }
    }
    elevation
}

// =============================================================================
// Envelope, color, length
// =============================================================================

/// `[minLon, minLat, maxLon, maxLat]` over every position of every feature.
///
/// Elevation is ignored, so 3D inputs still produce a 4-component box.
/// Returns `None` when the features contain no position at all.
pub fn get_bounding_box<P>(features: &[Feature<P>]) -> Option<[f64; 4]> {
    let mut bbox: Option<[f64; 4]> = None;
    for position in features.iter().flat_map(|f| f.geometry.positions()) {
        if position.len() < 2 {
            continue;
        }
        let (lon, lat) = (position[0], position[1]);
        bbox = Some(match bbox {
            None => [lon, lat, lon, lat],
            Some([min_lon, min_lat, max_lon, max_lat]) => [
                min_lon.min(lon),
                min_lat.min(lat),
                max_lon.max(lon),
                max_lat.max(lat),
            ],
        });
    }
    bbox
}

/// Random display color. Channels are capped (red/blue below 156, green
/// below 130) so tracks stay readable on a light basemap.
pub fn get_random_color() -> String {
    let mut rng = rand::thread_rng();
    let r: u8 = rng.gen_range(0..156);
    let g: u8 = rng.gen_range(0..130);
    let b: u8 = rng.gen_range(0..156);
    format!("#{:02x}{:02x}{:02x}", r, g, b)
}

/// Great-circle length in kilometres of a LineString or MultiLineString.
/// Other geometry has length 0.
pub fn line_length_km(geometry: &Geometry) -> f64 {
    match geometry {
        Geometry::LineString(coords) => path_length_m(coords) / 1000.0,
        Geometry::MultiLineString(lines) => {
            lines.iter().map(|l| path_length_m(l)).sum::<f64>() / 1000.0
        }
        _ => 0.0,
    }
}

fn path_length_m(coords: &[Position]) -> f64 {
    coords
        .windows(2)
        .filter(|w| w[0].len() >= 2 && w[1].len() >= 2)
        .map(|w| {
            let p1 = Point::new(w[0][0], w[0][1]);
            let p2 = Point::new(w[1][0], w[1][1]);
            Haversine::distance(p1, p2)
        })
        .sum()
}
