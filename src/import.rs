//! CSV and GeoJSON farm import.
//!
//! Parsing never fails on a single bad row: structurally invalid rows become
//! messages in [`ImportResult::invalid_farms`] and unparseable values fall back
//! to sentinels. Only an undetectable format or an unreadable stream aborts.

use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{CollectorError, Result};
use crate::geometry::{format_coordinate_text, parse_coordinates};
use crate::models::serde_helpers::parse_accuracy_list;
use crate::models::{Farm, ImportResult, UNKNOWN_COORDINATE};
use crate::reconcile::{Candidate, Reconciler};
use crate::storage::FarmRepository;

pub const SUPPORTED_MIME_TYPES: [&str; 4] = [
    "text/csv",
    "application/geo+json",
    "application/octet-stream",
    "text/comma-separated-values",
];

/// Date layout of `created_at`/`updated_at` CSV columns, e.g.
/// `Tue Oct 15 10:20:30 GMT 2024`. The zone name is read but ignored.
pub const CSV_DATE_FORMAT: &str = "%a %b %d %H:%M:%S %Z %Y";

/// Data rows need at least this many columns.
pub const CSV_MIN_FIELDS: usize = 13;

const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    GeoJson,
}

/// Decides how to read a file from its declared MIME type and first line.
///
/// An unsupported or missing MIME type only passes when the first line looks
/// like GeoJSON (`{` with a `"type"` key) or like CSV (contains a comma).
pub fn detect_format(mime_type: Option<&str>, first_line: Option<&str>) -> Result<FileFormat> {
    let first_line = first_line.map(str::trim).unwrap_or("");
    let mime_supported = mime_type
        .map(|mime| SUPPORTED_MIME_TYPES.contains(&mime))
        .unwrap_or(false);

    if !mime_supported {
        if first_line.starts_with('{') && first_line.contains("\"type\"") {
            tracing::debug!("Detected GeoJSON content");
        } else if first_line.contains(',') {
            tracing::debug!("Detected CSV content");
        } else {
            return Err(CollectorError::UnsupportedFormat);
        }
    }

    if first_line.starts_with('{') {
        Ok(FileFormat::GeoJson)
    } else if first_line.contains(',') {
        Ok(FileFormat::Csv)
    } else {
        Err(CollectorError::UnsupportedFormat)
    }
}

/// Candidates read from a file plus descriptions of the rows that were rejected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFarms {
    pub valid: Vec<Candidate>,
    pub invalid: Vec<String>,
}

fn parse_remote_id(value: &str) -> (Uuid, bool) {
    let value = value.trim();
    if value.is_empty() {
        return (Uuid::new_v4(), false);
    }
    match Uuid::parse_str(value) {
        Ok(id) => (id, true),
        Err(e) => {
            tracing::warn!("Invalid remote id {:?}, generating a new one: {}", value, e);
            (Uuid::new_v4(), false)
        }
    }
}

// ===== GEOJSON =====

fn opt_string(properties: &Map<String, Value>, key: &str, fallback: &str) -> String {
    match properties.get(key) {
        None | Some(Value::Null) => fallback.to_string(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

fn opt_f64(properties: &Map<String, Value>, key: &str) -> Option<f64> {
    let value = match properties.get(key) {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    value.filter(|value| !value.is_nan())
}

fn opt_millis(properties: &Map<String, Value>, key: &str, now: i64) -> i64 {
    match properties.get(key) {
        Some(Value::Number(number)) => number.as_i64().unwrap_or(now),
        Some(Value::String(text)) => text.trim().parse::<i64>().unwrap_or(now),
        _ => now,
    }
}

fn number_at(values: &[Value], index: usize) -> std::result::Result<f64, String> {
    values
        .get(index)
        .and_then(Value::as_f64)
        .ok_or_else(|| format!("coordinate {} is not a number", index))
}

/// Reads the geometry of one feature.
///
/// Point coordinates are stored as `(coordinates[1], coordinates[0])` while
/// polygon vertices are stored as `(c[0], c[1])`. Existing stored farms rely on
/// both layouts, so neither is normalised here.
fn parse_geometry(geometry: &Map<String, Value>) -> std::result::Result<Option<Vec<(f64, f64)>>, String> {
    let geo_type = geometry
        .get("type")
        .and_then(Value::as_str)
        .ok_or("geometry has no type")?;
    let coordinates = geometry.get("coordinates").and_then(Value::as_array);

    match geo_type {
        "Point" => {
            let values = coordinates.ok_or("point has no coordinates")?;
            let lon = number_at(values, 1)?;
            let lat = number_at(values, 0)?;
            Ok(Some(vec![(lon, lat)]))
        }
        "Polygon" => {
            let ring = coordinates
                .and_then(|rings| rings.first())
                .and_then(Value::as_array)
                .ok_or("polygon has no outer ring")?;
            let mut vertices = Vec::with_capacity(ring.len());
            for vertex in ring {
                let pair = vertex.as_array().ok_or("polygon vertex is not an array")?;
                vertices.push((number_at(pair, 0)?, number_at(pair, 1)?));
            }
            Ok(Some(vertices))
        }
        other => {
            tracing::debug!("Ignoring geometry of type {}", other);
            Ok(None)
        }
    }
}

fn parse_feature(feature: &Value, site_id: u64) -> std::result::Result<Candidate, String> {
    let properties = feature
        .get("properties")
        .and_then(Value::as_object)
        .ok_or("feature has no properties")?;
    let geometry = feature
        .get("geometry")
        .and_then(Value::as_object)
        .ok_or("feature has no geometry")?;

    let (remote_id, remote_id_supplied) = parse_remote_id(&opt_string(properties, "remote_id", ""));
    let now = Utc::now().timestamp_millis();

    let accuracy_text = match properties.get("accuracyArray") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    };
    let accuracy_array = if accuracy_text.is_empty() {
        None
    } else {
        Some(parse_accuracy_list(&accuracy_text))
    };

    let village = match properties.get("farm_village") {
        Some(_) => opt_string(properties, "farm_village", UNKNOWN),
        None => opt_string(properties, "village", UNKNOWN),
    };
    let district = match properties.get("farm_district") {
        Some(_) => opt_string(properties, "farm_district", UNKNOWN),
        None => opt_string(properties, "district", UNKNOWN),
    };

    let farm = Farm {
        id: 0,
        site_id,
        remote_id,
        farmer_name: opt_string(properties, "farmer_name", UNKNOWN),
        member_id: opt_string(properties, "member_id", UNKNOWN),
        village,
        district,
        agent_name: opt_string(properties, "agent_name", ""),
        size: opt_f64(properties, "farm_size").unwrap_or(0.0) as f32,
        latitude: opt_f64(properties, "latitude")
            .map(format_coordinate_text)
            .unwrap_or_else(|| UNKNOWN_COORDINATE.to_string()),
        longitude: opt_f64(properties, "longitude")
            .map(format_coordinate_text)
            .unwrap_or_else(|| UNKNOWN_COORDINATE.to_string()),
        coordinates: parse_geometry(geometry)?,
        accuracy_array,
        synced: false,
        scheduled_for_sync: false,
        needs_update: false,
        created_at: opt_millis(properties, "created_at", now),
        updated_at: opt_millis(properties, "updated_at", now),
    };
    Ok(Candidate::new(farm, remote_id_supplied))
}

/// Parses a GeoJSON FeatureCollection. A feature that cannot be read is
/// reported as invalid and the remaining features are still parsed.
pub fn parse_geojson(content: &str, site_id: u64) -> ParsedFarms {
    let mut parsed = ParsedFarms::default();

    let document: Value = match serde_json::from_str(content) {
        Ok(document) => document,
        Err(e) => {
            tracing::warn!("GeoJSON document could not be parsed: {}", e);
            parsed.invalid.push(format!("GeoJSON document is not valid: {}", e));
            return parsed;
        }
    };
    let features = match document.get("features").and_then(Value::as_array) {
        Some(features) => features,
        None => {
            parsed
                .invalid
                .push("GeoJSON document has no features".to_string());
            return parsed;
        }
    };

    for (index, feature) in features.iter().enumerate() {
        match parse_feature(feature, site_id) {
            Ok(candidate) => parsed.valid.push(candidate),
            Err(reason) => {
                tracing::warn!("Skipping GeoJSON feature {}: {}", index, reason);
                parsed
                    .invalid
                    .push(format!("Feature {} is not inserted: {}", index, reason));
            }
        }
    }
    parsed
}

// ===== CSV =====

/// Splits a CSV line on commas outside double quotes. Quotes stay in the fields.
pub fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in line.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

fn unquote(field: &str) -> &str {
    if field.len() >= 2 && field.starts_with('"') && field.ends_with('"') {
        &field[1..field.len() - 1]
    } else {
        field
    }
}

fn parse_csv_timestamp(field: Option<&String>, now: i64) -> i64 {
    let text = match field.map(|f| unquote(f).trim()) {
        Some(text) if !text.is_empty() => text,
        _ => return now,
    };
    match NaiveDateTime::parse_from_str(text, CSV_DATE_FORMAT) {
        Ok(parsed) => parsed.and_utc().timestamp_millis(),
        Err(e) => {
            tracing::debug!("Unparseable date {:?}, using current time: {}", text, e);
            now
        }
    }
}

fn coordinate_text(field: &str) -> String {
    let text = unquote(field).trim();
    if text.is_empty() {
        UNKNOWN_COORDINATE.to_string()
    } else {
        text.to_string()
    }
}

fn parse_csv_row(values: &[String], site_id: u64) -> Candidate {
    let text = |index: usize| unquote(&values[index]).replace("\"\"", "\"");
    let (remote_id, remote_id_supplied) = parse_remote_id(unquote(&values[0]));
    let now = Utc::now().timestamp_millis();

    let coordinates = parse_coordinates(unquote(&values[10]));
    let accuracies = unquote(&values[11]);
    let accuracy_array = if accuracies.trim().is_empty() {
        vec![None]
    } else {
        parse_accuracy_list(accuracies)
    };

    let farm = Farm {
        id: 0,
        site_id,
        remote_id,
        farmer_name: text(1),
        member_id: text(2),
        village: text(5),
        district: text(6),
        agent_name: text(4),
        size: unquote(&values[7]).trim().parse::<f32>().unwrap_or(0.0),
        latitude: coordinate_text(&values[8]),
        longitude: coordinate_text(&values[9]),
        coordinates: if coordinates.is_empty() {
            None
        } else {
            Some(coordinates)
        },
        accuracy_array: Some(accuracy_array),
        synced: false,
        scheduled_for_sync: false,
        needs_update: false,
        created_at: parse_csv_timestamp(values.get(12), now),
        updated_at: parse_csv_timestamp(values.get(13), now),
    };
    Candidate::new(farm, remote_id_supplied)
}

/// Parses CSV content whose first line is a header. Rows with fewer than
/// [`CSV_MIN_FIELDS`] columns are reported as invalid; blank lines are skipped.
pub fn parse_csv<B: BufRead>(reader: B, site_id: u64) -> Result<ParsedFarms> {
    let mut parsed = ParsedFarms::default();

    for line in reader.lines().skip(1) {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let values = split_csv_line(&line);
        if values.len() >= CSV_MIN_FIELDS {
            parsed.valid.push(parse_csv_row(&values, site_id));
        } else {
            let name = values
                .get(1)
                .map(String::as_str)
                .unwrap_or("null");
            parsed
                .invalid
                .push(format!("Record of {} is not inserted", name));
        }
    }
    Ok(parsed)
}

// ===== PIPELINE =====

fn run_import<R, B>(
    repository: &R,
    mut reader: B,
    mime_type: Option<&str>,
    site_id: u64,
) -> Result<ImportResult>
where
    R: FarmRepository + ?Sized,
    B: BufRead,
{
    let mut content = String::new();
    reader.read_to_string(&mut content)?;

    let format = detect_format(mime_type, content.lines().next())?;
    tracing::info!("Importing {:?} file into site {}", format, site_id);

    let (parsed, message) = match format {
        FileFormat::GeoJson => (
            parse_geojson(&content, site_id),
            "GeoJSON import successful",
        ),
        FileFormat::Csv => (
            parse_csv(content.as_bytes(), site_id)?,
            "CSV import successful",
        ),
    };

    let mut reconciler = Reconciler::new(repository, site_id)?;
    for candidate in parsed.valid {
        reconciler.apply(candidate)?;
    }
    let outcome = reconciler.finish()?;

    tracing::info!(
        "Import finished: {} imported, {} duplicates, {} need update, {} invalid",
        outcome.imported.len(),
        outcome.duplicates.len(),
        outcome.needs_update.len(),
        parsed.invalid.len()
    );

    Ok(ImportResult {
        success: true,
        message: message.to_string(),
        imported_farms: outcome.imported,
        duplicate_farms: outcome.duplicates,
        farms_needing_update: outcome.needs_update,
        invalid_farms: parsed.invalid,
    })
}

/// Imports farms from `reader` into `site_id`.
///
/// Failures that stop the import are folded into an unsuccessful result with
/// a short message; nothing is returned as an error.
pub fn import_farms<R, B>(
    repository: &R,
    reader: B,
    mime_type: Option<&str>,
    site_id: u64,
) -> ImportResult
where
    R: FarmRepository + ?Sized,
    B: BufRead,
{
    match run_import(repository, reader, mime_type, site_id) {
        Ok(result) => result,
        Err(CollectorError::UnsupportedFormat) => {
            tracing::warn!("Import rejected: unsupported file format");
            ImportResult::failure(CollectorError::UnsupportedFormat.to_string())
        }
        Err(e) => {
            tracing::error!("Import failed: {}", e);
            ImportResult::failure(format!("Import failed: {}", e))
        }
    }
}

/// Opens `path` and runs [`import_farms`] on the blocking thread pool.
pub async fn import_file<R>(
    repository: Arc<R>,
    path: PathBuf,
    mime_type: Option<String>,
    site_id: u64,
) -> ImportResult
where
    R: FarmRepository + ?Sized + 'static,
{
    let task = tokio::task::spawn_blocking(move || {
        let file = match std::fs::File::open(&path) {
            Ok(file) => file,
            Err(e) => {
                tracing::error!("Cannot open {}: {}", path.display(), e);
                return ImportResult::failure(format!("Import failed: {}", CollectorError::Io(e)));
            }
        };
        import_farms(
            repository.as_ref(),
            BufReader::new(file),
            mime_type.as_deref(),
            site_id,
        )
    });

    match task.await {
        Ok(result) => result,
        Err(e) => ImportResult::failure(format!("Import failed: {}", e)),
    }
}

/// Reads every byte from `reader` and imports it; convenient for callers that
/// only hold a plain [`Read`].
pub fn import_from_reader<R, Rd>(
    repository: &R,
    reader: Rd,
    mime_type: Option<&str>,
    site_id: u64,
) -> ImportResult
where
    R: FarmRepository + ?Sized,
    Rd: Read,
{
    import_farms(repository, BufReader::new(reader), mime_type, site_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStore;

    const REMOTE_ID: &str = "6f1c1c7e-3a53-4b0f-9a3e-6a1f0e4b2c11";

    #[test]
    fn test_detect_format_from_content() {
        assert_eq!(
            detect_format(None, Some(r#"{"type": "FeatureCollection","#)).unwrap(),
            FileFormat::GeoJson
        );
        assert_eq!(
            detect_format(Some("text/plain"), Some("remote_id,farmer_name")).unwrap(),
            FileFormat::Csv
        );
        assert!(matches!(
            detect_format(None, Some("hello world")),
            Err(CollectorError::UnsupportedFormat)
        ));
        assert!(matches!(
            detect_format(None, None),
            Err(CollectorError::UnsupportedFormat)
        ));
    }

    #[test]
    fn test_supported_mime_skips_content_gate() {
        // pretty printed GeoJSON has a bare brace on its first line
        assert_eq!(
            detect_format(Some("application/geo+json"), Some("{")).unwrap(),
            FileFormat::GeoJson
        );
        assert!(matches!(
            detect_format(None, Some("{")),
            Err(CollectorError::UnsupportedFormat)
        ));
    }

    #[test]
    fn test_split_respects_quotes() {
        let fields = split_csv_line(r#"a,"b,c",,"[[1,2],[3,4]]""#);
        assert_eq!(fields, vec!["a", "\"b,c\"", "", "\"[[1,2],[3,4]]\""]);
    }

    #[test]
    fn test_csv_row_with_twelve_fields_is_invalid() {
        let csv = "header\n,Amina,M1,Site,Agent,Nyeri,Central,1.5,-0.4,36.9,,\n";
        let parsed = parse_csv(csv.as_bytes(), 1).unwrap();
        assert!(parsed.valid.is_empty());
        assert_eq!(parsed.invalid, vec!["Record of Amina is not inserted"]);
    }

    #[test]
    fn test_csv_row_with_valid_uuid() {
        let csv = format!(
            "header\n{},Amina,M1,Site,Agent,Nyeri,Central,1.5,-0.4,36.9,\"[[36.9,-0.4],[36.91,-0.41]]\",\"3.5,4.0\",Tue Oct 15 10:20:30 GMT 2024\n",
            REMOTE_ID
        );
        let parsed = parse_csv(csv.as_bytes(), 4).unwrap();
        assert_eq!(parsed.valid.len(), 1);

        let candidate = &parsed.valid[0];
        assert!(candidate.remote_id_supplied);
        let farm = &candidate.farm;
        assert_eq!(farm.remote_id.to_string(), REMOTE_ID);
        assert_eq!(farm.site_id, 4);
        assert_eq!(farm.farmer_name, "Amina");
        assert_eq!(farm.agent_name, "Agent");
        assert_eq!(farm.size, 1.5);
        assert_eq!(farm.latitude, "-0.4");
        assert_eq!(farm.coordinates, Some(vec![(-0.4, 36.9), (-0.41, 36.91)]));
        assert_eq!(farm.accuracy_array, Some(vec![Some(3.5), Some(4.0)]));
        assert_eq!(farm.created_at, 1_728_987_630_000);
    }

    #[test]
    fn test_csv_defaults() {
        let csv = "header\nnot-a-uuid,Amina,M1,Site,Agent,Nyeri,Central,abc,,,,,\n";
        let parsed = parse_csv(csv.as_bytes(), 1).unwrap();
        let candidate = &parsed.valid[0];
        assert!(!candidate.remote_id_supplied);
        assert_eq!(candidate.farm.size, 0.0);
        assert_eq!(candidate.farm.latitude, "0.0");
        assert_eq!(candidate.farm.longitude, "0.0");
        assert_eq!(candidate.farm.coordinates, None);
        assert_eq!(candidate.farm.accuracy_array, Some(vec![None]));
    }

    #[test]
    fn test_geojson_point_keeps_axis_order() {
        let geojson = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature",
             "properties":{"farmer_name":"Amina","farm_size":2.0,"latitude":-0.4,"longitude":36.9},
             "geometry":{"type":"Point","coordinates":[36.9,-0.4]}}
        ]}"#;
        let parsed = parse_geojson(geojson, 1);
        let farm = &parsed.valid[0].farm;
        // Point stores (coordinates[1], coordinates[0])
        assert_eq!(farm.coordinates, Some(vec![(-0.4, 36.9)]));
        assert_eq!(farm.member_id, "Unknown");
        assert_eq!(farm.village, "Unknown");
        assert_eq!(farm.latitude, "-0.4");
    }

    #[test]
    fn test_geojson_polygon_keeps_axis_order() {
        let geojson = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature",
             "properties":{"farmer_name":"Amina","remote_id":"6f1c1c7e-3a53-4b0f-9a3e-6a1f0e4b2c11",
                           "accuracyArray":"[3.5, 4.0]"},
             "geometry":{"type":"Polygon","coordinates":[[[36.9,-0.4],[36.91,-0.41],[36.9,-0.41]]]}}
        ]}"#;
        let parsed = parse_geojson(geojson, 1);
        let candidate = &parsed.valid[0];
        assert!(candidate.remote_id_supplied);
        // Polygon stores (c[0], c[1])
        assert_eq!(
            candidate.farm.coordinates,
            Some(vec![(36.9, -0.4), (36.91, -0.41), (36.9, -0.41)])
        );
        assert_eq!(candidate.farm.size, 0.0);
        assert_eq!(candidate.farm.latitude, "0.0");
        assert_eq!(candidate.farm.accuracy_array, Some(vec![Some(3.5), Some(4.0)]));
    }

    #[test]
    fn test_bad_geojson_feature_is_reported() {
        let geojson = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","properties":{"farmer_name":"A"},"geometry":{"type":"Point","coordinates":["x"]}},
            {"type":"Feature","properties":{"farmer_name":"B"},"geometry":{"type":"Point","coordinates":[1.0,2.0]}}
        ]}"#;
        let parsed = parse_geojson(geojson, 1);
        assert_eq!(parsed.valid.len(), 1);
        assert_eq!(parsed.valid[0].farm.farmer_name, "B");
        assert_eq!(parsed.invalid.len(), 1);
        assert!(parsed.invalid[0].starts_with("Feature 0 is not inserted"));
    }

    #[test]
    fn test_import_unsupported_format() {
        let store = LocalStore::in_memory().unwrap();
        let result = import_farms(&store, "just some text\n".as_bytes(), None, 1);
        assert!(!result.success);
        assert_eq!(result.message, "Unsupported file format");
        assert!(store.get_all_farms().unwrap().is_empty());
    }

    #[test]
    fn test_import_reports_invalid_utf8_as_failure() {
        let store = LocalStore::in_memory().unwrap();
        let bytes: &[u8] = &[0xff, 0xfe, b',', b'\n'];
        let result = import_farms(&store, bytes, Some("text/csv"), 1);
        assert!(!result.success);
        assert!(result.message.starts_with("Import failed:"));
    }

    #[tokio::test]
    async fn test_import_file_missing_path() {
        let store = Arc::new(LocalStore::in_memory().unwrap());
        let result = import_file(store, PathBuf::from("/nonexistent/farms.csv"), None, 1).await;
        assert!(!result.success);
        assert!(result.message.starts_with("Import failed:"));
    }
}
