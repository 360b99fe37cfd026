//! FIT activity decoding.
//!
//! Recognition and integrity checks are done here on the raw header; the
//! message stream is decoded with `fitparser`. Record messages carrying a
//! position become the track line and one sensor sample each; the session
//! message (or, when absent, the samples themselves) gives the summary.
//!
//! Integrity problems are soft: they are reported in
//! [`FitParseResult::errors`] while decoding still proceeds.

use std::collections::HashMap;

use chrono::Utc;
use fitparser::de::{DecodeOption, FitObject, FitStreamProcessor};
use fitparser::profile::MesgNum;
use fitparser::{FitDataRecord, Value};
use log::{debug, warn};
use serde_json::{json, Map};
use thiserror::Error;

use crate::model::{
    Feature, FeatureCollection, Geometry, PathProperties, Position, RouteData, SensorFeature,
    SensorProperties, SensorsProperties, SessionSummary,
};

/// FIT positions are stored as semicircles: 2^31 per 180 degrees.
pub const SEMICIRCLES_PER_DEGREE: f64 = 2_147_483_648.0 / 180.0;

const FIT_SIGNATURE: &[u8; 4] = b".FIT";

pub fn semicircles_to_degrees(semicircles: f64) -> f64 {
    semicircles / SEMICIRCLES_PER_DEGREE
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FitIntegrityError {
    #[error("FIT file truncated: header declares {declared} bytes, buffer has {actual}")]
    Truncated { declared: usize, actual: usize },
    #[error("FIT header CRC mismatch: stored {stored:#06x}, computed {computed:#06x}")]
    HeaderCrc { stored: u16, computed: u16 },
    #[error("FIT file CRC mismatch: stored {stored:#06x}, computed {computed:#06x}")]
    FileCrc { stored: u16, computed: u16 },
}

/// Outcome of decoding one FIT buffer.
#[derive(Debug, Clone)]
pub struct FitParseResult {
    /// `None` when the buffer is not FIT or the decoder gave up.
    pub route_data: Option<RouteData>,
    pub errors: Vec<String>,
    /// The decoded message set, kept for reference.
    pub original_parsed_fit_data: Option<serde_json::Value>,
}

// ============================================================================
// Header checks
// ============================================================================

/// Header size 12 or 14, buffer long enough, `.FIT` signature at bytes 8..12.
pub fn is_fit(bytes: &[u8]) -> bool {
    let Some(&header_size) = bytes.first() else {
        return false;
    };
    (header_size == 12 || header_size == 14)
        && bytes.len() >= header_size as usize
        && &bytes[8..12] == FIT_SIGNATURE
}

/// Verify declared size, header CRC (when present and non-zero) and file CRC.
///
/// Assumes [`is_fit`] holds.
pub fn check_integrity(bytes: &[u8]) -> Result<(), FitIntegrityError> {
    let header_size = bytes[0] as usize;
    let data_size = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let declared = header_size + data_size + 2;
    if bytes.len() < declared {
        return Err(FitIntegrityError::Truncated {
            declared,
            actual: bytes.len(),
        });
    }

    if header_size == 14 {
        let stored = u16::from_le_bytes([bytes[12], bytes[13]]);
        if stored != 0 {
            let computed = crc16(&bytes[..12]);
            if stored != computed {
                return Err(FitIntegrityError::HeaderCrc { stored, computed });
            }
        }
    }

    let crc_at = header_size + data_size;
    let stored = u16::from_le_bytes([bytes[crc_at], bytes[crc_at + 1]]);
    let computed = crc16(&bytes[..crc_at]);
    if stored != computed {
        return Err(FitIntegrityError::FileCrc { stored, computed });
    }
    Ok(())
}

const CRC_TABLE: [u16; 16] = [
    0x0000, 0xCC01, 0xD801, 0x1400, 0xF001, 0x3C00, 0x2800, 0xE401, 0xA001, 0x6C00, 0x7800,
    0xB401, 0x5000, 0x9C01, 0x8801, 0x4400,
];

/// FIT CRC-16, nibble-wise.
pub fn crc16(bytes: &[u8]) -> u16 {
    bytes.iter().fold(0u16, |crc, &byte| {
        let tmp = CRC_TABLE[(crc & 0xF) as usize];
        let crc = ((crc >> 4) & 0x0FFF) ^ tmp ^ CRC_TABLE[(byte & 0xF) as usize];
        let tmp = CRC_TABLE[(crc & 0xF) as usize];
        ((crc >> 4) & 0x0FFF) ^ tmp ^ CRC_TABLE[((byte >> 4) & 0xF) as usize]
    })
}

// ============================================================================
// Decoding
// ============================================================================

pub fn parse_fit(bytes: &[u8]) -> FitParseResult {
    let mut errors = Vec::new();

    if !is_fit(bytes) {
        errors.push(format!(
            "unrecognizable format: not a FIT file ({} bytes)",
            bytes.len()
        ));
        return FitParseResult {
            route_data: None,
            errors,
            original_parsed_fit_data: None,
        };
    }

    if let Err(e) = check_integrity(bytes) {
        warn!("[fit] integrity check failed, decoding anyway: {}", e);
        errors.push(e.to_string());
    }

    let (records, decode_error) = decode_records(bytes);
    if let Some(e) = decode_error {
        warn!(
            "[fit] decoder stopped after {} messages: {}",
            records.len(),
            e
        );
        errors.push(format!("FIT decode failed: {}", e));
        if records.is_empty() {
            return FitParseResult {
                route_data: None,
                errors,
                original_parsed_fit_data: None,
            };
        }
    }
    debug!("[fit] decoded {} messages", records.len());

    let samples = collect_samples(&records);
    let summary = session_summary(&records).unwrap_or_else(|| summary_from_samples(&samples));

    if samples.is_empty() {
        warn!("[fit] no record message carries a position");
        errors.push("no GPS records found in FIT file".to_string());
    }

    FitParseResult {
        route_data: Some(build_route_data(&samples, summary)),
        errors,
        original_parsed_fit_data: Some(records_to_json(&records)),
    }
}

/// Decode message by message, keeping everything read before a failure.
///
/// Integrity is judged by [`check_integrity`], so CRC validation is skipped
/// here and the decoder reads past bad checksums.
fn decode_records(bytes: &[u8]) -> (Vec<FitDataRecord>, Option<fitparser::Error>) {
    let mut processor = FitStreamProcessor::new();
    processor.add_option(DecodeOption::SkipHeaderCrcValidation);
    processor.add_option(DecodeOption::SkipDataCrcValidation);

    let mut records = Vec::new();
    let mut input = bytes;
    while !input.is_empty() {
        let (rest, object) = match processor.deserialize_next(input) {
            Ok(next) => next,
            Err(e) => return (records, Some(e)),
        };
        match object {
            FitObject::Crc(_) => processor.reset(),
            FitObject::DataMessage(message) => match processor.decode_message(message) {
                Ok(record) => records.push(record),
                Err(e) => return (records, Some(e)),
            },
            FitObject::Header(_) | FitObject::DefinitionMessage(_) => {}
        }
        input = rest;
    }
    (records, None)
}

/// One positioned record message.
#[derive(Debug, Clone, PartialEq)]
struct Sample {
    lon: f64,
    lat: f64,
    altitude: f64,
    heart_rate: Option<f64>,
    cadence: Option<f64>,
    power: Option<f64>,
    speed: Option<f64>,
    temperature: Option<f64>,
    timestamp: Option<String>,
}

fn fields_of(record: &FitDataRecord) -> HashMap<&str, &Value> {
    record
        .fields()
        .iter()
        .map(|f| (f.name(), f.value()))
        .collect()
}

fn number(fields: &HashMap<&str, &Value>, name: &str) -> Option<f64> {
    fields.get(name).and_then(|v| value_as_f64(v))
}

/// First of `names` present as a number.
fn preferred(fields: &HashMap<&str, &Value>, names: &[&str]) -> Option<f64> {
    names.iter().find_map(|n| number(fields, n))
}

fn timestamp(fields: &HashMap<&str, &Value>, name: &str) -> Option<String> {
    match fields.get(name) {
        Some(Value::Timestamp(t)) => Some(t.with_timezone(&Utc).to_rfc3339()),
        _ => None,
    }
}

fn text(fields: &HashMap<&str, &Value>, name: &str) -> Option<String> {
    match fields.get(name) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(v) => value_as_f64(v).map(|n| n.to_string()),
        None => None,
    }
}

fn value_as_f64(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Byte(v) | Value::Enum(v) | Value::UInt8(v) | Value::UInt8z(v) => Some(*v as f64),
        Value::SInt8(v) => Some(*v as f64),
        Value::SInt16(v) => Some(*v as f64),
        Value::UInt16(v) | Value::UInt16z(v) => Some(*v as f64),
        Value::SInt32(v) => Some(*v as f64),
        Value::UInt32(v) | Value::UInt32z(v) => Some(*v as f64),
        Value::SInt64(v) => Some(*v as f64),
        Value::UInt64(v) | Value::UInt64z(v) => Some(*v as f64),
        Value::Float32(v) => Some(*v as f64),
        Value::Float64(v) => Some(*v),
        _ => None,
    };
    number.filter(|v| v.is_finite())
}

fn collect_samples(records: &[FitDataRecord]) -> Vec<Sample> {
    records
        .iter()
        .filter(|r| r.kind() == MesgNum::Record)
        .filter_map(|record| {
            let fields = fields_of(record);
            let lat = number(&fields, "position_lat")?;
            let lon = number(&fields, "position_long")?;
            Some(Sample {
                lon: semicircles_to_degrees(lon),
                lat: semicircles_to_degrees(lat),
                altitude: preferred(&fields, &["enhanced_altitude", "altitude"]).unwrap_or(0.0),
                heart_rate: number(&fields, "heart_rate"),
                cadence: number(&fields, "cadence"),
                power: number(&fields, "power"),
                speed: preferred(&fields, &["enhanced_speed", "speed"]),
                temperature: number(&fields, "temperature"),
                timestamp: timestamp(&fields, "timestamp"),
            })
        })
        .collect()
}

fn session_summary(records: &[FitDataRecord]) -> Option<SessionSummary> {
    let session = records.iter().find(|r| r.kind() == MesgNum::Session)?;
    let f = fields_of(session);
    let num = |name: &str| number(&f, name).unwrap_or(0.0);
    let defaults = SessionSummary::default();

    Some(SessionSummary {
        sport: text(&f, "sport").unwrap_or(defaults.sport),
        sub_sport: text(&f, "sub_sport").unwrap_or(defaults.sub_sport),
        start_time: timestamp(&f, "start_time"),
        end_time: timestamp(&f, "timestamp"),
        total_elapsed_time: num("total_elapsed_time"),
        total_timer_time: num("total_timer_time"),
        total_distance: num("total_distance"),
        total_ascent: num("total_ascent"),
        total_descent: num("total_descent"),
        total_calories: num("total_calories"),
        avg_heart_rate: num("avg_heart_rate"),
        max_heart_rate: num("max_heart_rate"),
        min_heart_rate: num("min_heart_rate"),
        avg_cadence: num("avg_cadence"),
        max_cadence: num("max_cadence"),
        avg_power: num("avg_power"),
        max_power: num("max_power"),
        avg_speed: preferred(&f, &["enhanced_avg_speed", "avg_speed"]).unwrap_or(0.0),
        max_speed: preferred(&f, &["enhanced_max_speed", "max_speed"]).unwrap_or(0.0),
        avg_temperature: num("avg_temperature"),
        max_temperature: num("max_temperature"),
        min_temperature: num("min_temperature"),
    })
}

/// `(avg, max, min)` over the present values, zeros when none.
fn stats(values: impl Iterator<Item = Option<f64>>) -> (f64, f64, f64) {
    let present: Vec<f64> = values.flatten().collect();
    if present.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let avg = present.iter().sum::<f64>() / present.len() as f64;
    let max = present.iter().copied().fold(f64::MIN, f64::max);
    let min = present.iter().copied().fold(f64::MAX, f64::min);
    (avg, max, min)
}

fn summary_from_samples(samples: &[Sample]) -> SessionSummary {
    let (avg_heart_rate, max_heart_rate, min_heart_rate) =
        stats(samples.iter().map(|s| s.heart_rate));
    let (avg_cadence, max_cadence, _) = stats(samples.iter().map(|s| s.cadence));
    let (avg_power, max_power, _) = stats(samples.iter().map(|s| s.power));
    let (avg_speed, max_speed, _) = stats(samples.iter().map(|s| s.speed));
    let (avg_temperature, max_temperature, min_temperature) =
        stats(samples.iter().map(|s| s.temperature));

    SessionSummary {
        start_time: samples.first().and_then(|s| s.timestamp.clone()),
        end_time: samples.last().and_then(|s| s.timestamp.clone()),
        avg_heart_rate,
        max_heart_rate,
        min_heart_rate,
        avg_cadence,
        max_cadence,
        avg_power,
        max_power,
        avg_speed,
        max_speed,
        avg_temperature,
        max_temperature,
        min_temperature,
        ..SessionSummary::default()
    }
}

fn build_route_data(samples: &[Sample], summary: SessionSummary) -> RouteData {
    let coords: Vec<Position> = samples
        .iter()
        .map(|s| vec![s.lon, s.lat, s.altitude])
        .collect();

    let paths = if coords.is_empty() {
        Vec::new()
    } else {
        let mut props = PathProperties::track(Some(summary.sport.clone()));
        props.session = Some(summary.clone());
        vec![Feature::new(Geometry::LineString(coords), props)]
    };

    let sensor_features: Vec<SensorFeature> = samples
        .iter()
        .map(|s| {
            Feature::new(
                Geometry::Point(vec![s.lon, s.lat, s.altitude]),
                SensorProperties {
                    heart_rate: s.heart_rate,
                    cadence: s.cadence,
                    power: s.power,
                    speed: s.speed,
                    temperature: s.temperature,
                    timestamp: s.timestamp.clone(),
                    ..Default::default()
                },
            )
        })
        .collect();

    let mut data = RouteData::from_paths(paths);
    data.sensors = FeatureCollection::new(
        sensor_features,
        SensorsProperties {
            session: Some(summary),
            ..Default::default()
        },
    );
    data
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Timestamp(t) => json!(t.with_timezone(&Utc).to_rfc3339()),
        Value::String(s) => json!(s),
        Value::Array(items) => items.iter().map(value_to_json).collect(),
        other => value_as_f64(other).map_or(serde_json::Value::Null, |n| json!(n)),
    }
}

fn records_to_json(records: &[FitDataRecord]) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = records
        .iter()
        .map(|record| {
            let fields: Map<String, serde_json::Value> = record
                .fields()
                .iter()
                .map(|f| (f.name().to_string(), value_to_json(f.value())))
                .collect();
            json!({ "kind": format!("{:?}", record.kind()), "fields": fields })
        })
        .collect();
    json!({ "messages": messages })
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_empty_buffer_is_not_fit() {
        let result = parse_fit(&[]);
        assert!(result.route_data.is_none());
        assert!(result.errors[0].starts_with("unrecognizable format"));
    }

    #[test]
    fn test_text_is_not_fit() {
        assert!(!is_fit(b"<?xml version=\"1.0\"?><gpx></gpx>"));
        assert!(parse_fit(b"hello world, definitely not fit").route_data.is_none());
    }

    #[test]
    fn test_crc_known_value() {
        // CRC of the empty input is 0; a valid file's CRC over itself plus CRC is 0.
        assert_eq!(crc16(&[]), 0);
        let file = three_point_ride();
        assert_eq!(crc16(&file), 0);
    }

    #[test]
    fn test_valid_activity() {
        let file = three_point_ride();
        assert!(is_fit(&file));
        assert_eq!(check_integrity(&file), Ok(()));

        let result = parse_fit(&file);
        assert!(result.errors.is_empty(), "{:?}", result.errors);
        let data = result.route_data.unwrap();

        let track = data.track().unwrap();
        let Geometry::LineString(coords) = &track.geometry else {
            panic!("track is not a line");
        };
        assert_eq!(coords.len(), 3);
        assert!((coords[0][0] - 6.0).abs() < 1e-6);
        assert!((coords[0][1] - 45.0).abs() < 1e-6);
        assert!((coords[1][2] - 110.0).abs() < 1e-6);

        assert_eq!(data.sensors.features.len(), 3);
        assert_eq!(data.sensors.features[2].properties.heart_rate, Some(160.0));
        assert!(data.sensors.features[0].properties.timestamp.is_some());
        assert_eq!(data.sensors.features[0].properties.power, None);

        let session = data.sensors.properties.session.unwrap();
        assert_eq!(session.sport, "cycling");
        assert!((session.total_distance - 1234.0).abs() < 1e-6);
        assert_eq!(session.max_heart_rate, 170.0);
        assert!(session.start_time.is_some());
        assert!(result.original_parsed_fit_data.is_some());
    }

    #[test]
    fn test_summary_from_samples_without_session() {
        let file = activity(
            &[
                TestSample { lat: 45.0, lon: 6.0, altitude: 0.0, heart_rate: 100 },
                TestSample { lat: 45.1, lon: 6.1, altitude: 0.0, heart_rate: 200 },
            ],
            false,
        );
        let data = parse_fit(&file).route_data.unwrap();
        let session = data.sensors.properties.session.unwrap();
        assert_eq!(session.sport, "unknown");
        assert_eq!(session.avg_heart_rate, 150.0);
        assert_eq!(session.min_heart_rate, 100.0);
        assert_eq!(session.total_distance, 0.0);
    }

    #[test]
    fn test_corrupted_crc_is_soft_error() {
        let mut file = three_point_ride();
        let last = file.len() - 1;
        file[last] ^= 0xFF;

        let result = parse_fit(&file);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("CRC"));
        assert_eq!(result.route_data.unwrap().track().map(|t| t.geometry.positions().len()), Some(3));
    }

    #[test]
    fn test_truncated_file() {
        let file = three_point_ride();
        let truncated = &file[..file.len() - 10];
        assert!(matches!(
            check_integrity(truncated),
            Err(FitIntegrityError::Truncated { .. })
        ));
    }

    #[test]
    fn test_truncated_activity_keeps_decoded_records() {
        let samples: Vec<TestSample> = (0..10)
            .map(|i| TestSample {
                lat: 45.0 + i as f64 * 0.001,
                lon: 6.0,
                altitude: 100.0,
                heart_rate: 120,
            })
            .collect();
        let file = activity(&samples, true);
        // Cuts the CRC, the session message and half of its definition.
        let truncated = &file[..file.len() - 30];

        let result = parse_fit(truncated);
        assert_eq!(result.errors.len(), 2, "{:?}", result.errors);
        assert!(result.errors[0].contains("truncated"));
        assert!(result.errors[1].starts_with("FIT decode failed"));

        let data = result.route_data.unwrap();
        assert_eq!(data.track().map(|t| t.geometry.positions().len()), Some(10));
        assert_eq!(data.sensors.features.len(), 10);
        let session = data.sensors.properties.session.unwrap();
        assert_eq!(session.sport, "unknown");
        assert_eq!(session.avg_heart_rate, 120.0);
        assert!(result.original_parsed_fit_data.is_some());
    }

    #[test]
    fn test_undecodable_stream_has_no_route() {
        let mut file = three_point_ride();
        // First message now refers to a local type that was never defined.
        file[14] = 0x05;

        let result = parse_fit(&file);
        assert!(result.route_data.is_none());
        assert!(result.errors.iter().any(|e| e.contains("CRC")));
        assert!(result.errors.iter().any(|e| e.starts_with("FIT decode failed")));
    }

    #[test]
    fn test_no_positions_is_soft_error() {
        let file = activity(&[], true);
        let result = parse_fit(&file);
        assert!(result.errors.iter().any(|e| e.contains("no GPS records")));
        assert!(result.route_data.unwrap().route.features.is_empty());
    }
}
