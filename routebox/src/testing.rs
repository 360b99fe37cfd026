//! Shared fixtures for unit tests.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use image::DynamicImage;

use routecore::image_pipeline::{CodecError, EncoderParams};
use routecore::model::{PathProperties, PhotoProperties};
use routecore::{Elevation, Feature, Geometry, ImageCodec, Route, RouteData, RouteEntity};

pub fn route(name: &str) -> Route {
    let now = Utc::now();
    Route {
        name: name.to_string(),
        date: None,
        created_at: now,
        updated_at: now,
        text_content: None,
        tags: BTreeSet::new(),
        route_data: RouteData::from_paths(vec![Feature::new(
            Geometry::LineString(vec![
                vec![6.0, 45.0, 100.0],
                vec![6.01, 45.01, 120.0],
                vec![6.02, 45.0, 110.0],
            ]),
            PathProperties::track(Some(name.to_string())),
        )]),
        distance: 2.5,
        elevation: Elevation {
            positive: 20.0,
            negative: 10.0,
        },
        original_gpx_data: None,
        original_fit_data: None,
        original_parsed_fit_data: None,
        color: "#336699".to_string(),
        bbox: [6.0, 45.0, 6.02, 45.01],
    }
}

/// A route carrying one photo with binary content.
pub fn photo_route(name: &str) -> Route {
    let mut route = route(name);
    route.route_data.photos.features.push(Feature::new(
        Geometry::Point(vec![6.01, 45.005]),
        PhotoProperties {
            filename: "summit.jpg".to_string(),
            extension: "jpg".to_string(),
            binary_content: Some(b"not really a jpeg".to_vec()),
            ..Default::default()
        },
    ));
    route
}

pub fn entity(id: i64, route: Route) -> RouteEntity {
    RouteEntity {
        id,
        visible: true,
        route,
    }
}

/// Codec whose `decode` blocks until [`GatedCodec::open`] is called.
pub struct GatedCodec {
    entered: AtomicBool,
    open: AtomicBool,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl GatedCodec {
    pub fn new() -> Self {
        Self {
            entered: AtomicBool::new(false),
            open: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    /// Most decodes ever running at once.
    pub fn peak_decodes(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn wait_until_entered(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.entered.load(Ordering::SeqCst) {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }
}

impl ImageCodec for GatedCodec {
    fn decode(&self, _bytes: &[u8]) -> Result<DynamicImage, CodecError> {
        self.entered.store(true, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        let deadline = Instant::now() + Duration::from_secs(10);
        while !self.open.load(Ordering::SeqCst) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(DynamicImage::new_rgb8(1600, 1200))
    }

    fn resize(
        &self,
        _source: &DynamicImage,
        width: u32,
        height: u32,
    ) -> Result<DynamicImage, CodecError> {
        Ok(DynamicImage::new_rgb8(width, height))
    }

    fn encode(&self, raster: &DynamicImage, params: &EncoderParams) -> Result<Vec<u8>, CodecError> {
        Ok(format!("{}:{}", params.format().as_str(), raster.width()).into_bytes())
    }
}
