//! Coordinate parsing, polygon area and plot size conversion.

use crate::error::{CollectorError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::f64::consts::PI;

/// Mean earth radius in meters used for spherical area.
pub const EARTH_RADIUS: f64 = 6_371_009.0;

const SQUARE_METERS_PER_HECTARE: f64 = 10_000.0;

/// Entered sizes further than this fraction away from the captured area get flagged.
pub const AREA_WARNING_THRESHOLD: f64 = 0.30;

static SCIENTIFIC_NOTATION: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[+-]?\d*\.?\d+([eE][+-]?\d+)?$").ok());

/// Parses a bracketed coordinate string into `(latitude, longitude)` pairs.
///
/// Accepts either a single point `[lon, lat]` or a polygon
/// `[[lon,lat],[lon,lat],...]`. Bad numeric tokens are skipped with a warning
/// and an unrecognized shape yields an empty list.
pub fn parse_coordinates(text: &str) -> Vec<(f64, f64)> {
    let mut result = Vec::new();
    let trimmed = text.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed);
    let cleaned: String = unquoted.chars().filter(|c| *c != ' ').collect();

    if cleaned.is_empty() {
        return result;
    }

    let is_polygon = cleaned.starts_with("[[") && cleaned.ends_with("]]");
    let is_point = !is_polygon && cleaned.starts_with('[') && cleaned.ends_with(']');

    if is_polygon {
        let inner = &cleaned[2..cleaned.len() - 2];
        for pair in inner.split("],[") {
            let parts: Vec<&str> = pair.split(',').collect();
            if parts.len() != 2 {
                continue;
            }
            match (parts[1].parse::<f64>(), parts[0].parse::<f64>()) {
                (Ok(lat), Ok(lon)) => result.push((lat, lon)),
                _ => tracing::warn!("Error parsing polygon coordinate pair: {}", pair),
            }
        }
    } else if is_point {
        let inner = &cleaned[1..cleaned.len() - 1];
        let parts: Vec<&str> = inner.split(',').collect();
        if parts.len() == 2 {
            match (parts[1].parse::<f64>(), parts[0].parse::<f64>()) {
                (Ok(lat), Ok(lon)) => result.push((lat, lon)),
                _ => tracing::warn!("Error parsing point coordinate pair: {}", inner),
            }
        }
    } else {
        tracing::warn!("Unrecognized coordinates format: {}", text);
    }

    result
}

/// Renders `(latitude, longitude)` pairs back into the `[[lon,lat],...]` form
/// that [`parse_coordinates`] reads.
pub fn format_coordinates(coordinates: &[(f64, f64)]) -> String {
    let pairs: Vec<String> = coordinates
        .iter()
        .map(|(lat, lon)| format!("[{},{}]", lon, lat))
        .collect();
    format!("[{}]", pairs.join(","))
}

/// Area in hectares of the ring described by `(latitude, longitude)` pairs.
///
/// The ring is closed implicitly. Fewer than three points have no area.
pub fn calculate_area(coordinates: &[(f64, f64)]) -> f64 {
    signed_area_square_meters(coordinates).abs() / SQUARE_METERS_PER_HECTARE
}

/// Signed spherical area in square meters; the sign follows winding order.
pub fn signed_area_square_meters(coordinates: &[(f64, f64)]) -> f64 {
    if coordinates.len() < 3 {
        return 0.0;
    }

    let (prev_lat, prev_lon) = coordinates[coordinates.len() - 1];
    let mut prev_tan_lat = ((PI / 2.0 - prev_lat.to_radians()) / 2.0).tan();
    let mut prev_lon = prev_lon.to_radians();
    let mut total = 0.0;

    for (lat, lon) in coordinates {
        let tan_lat = ((PI / 2.0 - lat.to_radians()) / 2.0).tan();
        let lon = lon.to_radians();
        total += polar_triangle_area(tan_lat, lon, prev_tan_lat, prev_lon);
        prev_tan_lat = tan_lat;
        prev_lon = lon;
    }

    total * EARTH_RADIUS * EARTH_RADIUS
}

fn polar_triangle_area(tan1: f64, lon1: f64, tan2: f64, lon2: f64) -> f64 {
    let delta_lon = lon1 - lon2;
    let t = tan1 * tan2;
    2.0 * (t * delta_lon.sin()).atan2(1.0 + t * delta_lon.cos())
}

/// Converts a plot size expressed in `unit` to hectares.
pub fn convert_size(size: f64, unit: &str) -> Result<f64> {
    match unit {
        "Ha" => Ok(size),
        "Acres" => Ok(size * 0.404686),
        "Sqm" => Ok(size * 0.0001),
        "Timad" => Ok(size * 0.24),
        "Fichesa" => Ok(size * 0.25),
        "Manzana" => Ok((size * 0.0001) * 7000.0),
        "Tarea" => Ok((size * 0.0001) * 432.0),
        other => Err(CollectorError::UnsupportedUnit(other.to_string())),
    }
}

/// Returns the absolute difference between a captured and an entered area
/// when it is large enough to warn the collector about.
pub fn area_discrepancy(calculated: f64, entered: f64) -> Option<f64> {
    let difference = (calculated - entered).abs();
    if difference > entered * AREA_WARNING_THRESHOLD {
        Some(difference)
    } else {
        None
    }
}

/// Rounds a size to a fixed number of decimals, truncating rather than
/// rounding whenever the rendered value looks numeric.
pub fn format_size(value: f64, decimals: usize) -> f64 {
    let formatted = format!("{:.*}", decimals, value);
    let numeric = SCIENTIFIC_NOTATION
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(&formatted));
    let text = if numeric {
        truncate_to_decimal_places(&formatted, decimals)
    } else {
        formatted
    };
    text.parse::<f64>().unwrap_or(value)
}

fn truncate_to_decimal_places(text: &str, decimals: usize) -> String {
    match text.find('.') {
        Some(dot) => {
            let end = (dot + 1 + decimals).min(text.len());
            if decimals == 0 {
                text[..dot].to_string()
            } else {
                text[..end].to_string()
            }
        }
        None => text.to_string(),
    }
}

/// Text form used for stored latitude and longitude values (`0.0`, `1.23`).
pub fn format_coordinate_text(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e7 {
        format!("{:.1}", value)
    } else {
        value.to_string()
    }
}
