//! Downloadable import templates and bulk export of stored farms.

use std::collections::HashMap;
use std::io::Write;

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

use crate::error::{CollectorError, Result};
use crate::geometry::format_coordinates;
use crate::import::CSV_DATE_FORMAT;
use crate::models::{CollectionSite, Farm, UNKNOWN_COORDINATE};

pub const CSV_TEMPLATE: &str = r#"remote_id,          // Optional: can be null if not provided
           farmer_name,        // can not be null 
           member_id,          // Optional: can be null if not provided
           collection_site,   // Optional: can be null if not provided
           agent_name,        // Optional: can be null if not provided
           farm_village,      // can not be null 
           farm_district,     // can not be null 
           farm_size,         // Optional: can be null if not provided; default value could be 0.0
           latitude,          // Optional: can be null if not provided
           longitude,         // Optional: can be null if not provided
           polygon,           // Optional: can be null if not provided; used for Polygon type
           created_at,        // Optional: can be null if not provided; default to current time if not available
           updated_at         // Optional: can be null if not provided; default to current time if not available
"#;

pub const GEOJSON_TEMPLATE: &str = r#"{
    "type": "FeatureCollection",
    "features": [
        {
            "type": "Feature",
            "properties": {
                "remote_id": "",                    // Optional: can be null if not provided
                "farmer_name": "",                  // can not be null 
                "member_id": "",                   // Optional: can be null if not provided
                "collection_site": "",              // Optional: can be null if not provided
                "agent_name": "",                   // Optional: can be null if not provided
                "farm_village": "",                 // can not be null 
                "farm_district": "",                // can not be null 
                "farm_size": 0.0,                   // Optional: use a default value of 0.0 if not provided
                "latitude": "",                     // Optional: can be null if not provided
                "longitude": "",                    // Optional: can be null if not provided
                "created_at": "",                   // Optional: can be null if not provided
                "updated_at": ""                    // Optional: can be null if not provided
            },
            "geometry": {
                "type": "Point",                    // Use "Polygon" if coordinates are for a polygon
                "coordinates": ["longitude", "latitude"]  // Replace with actual coordinates; can be null if not provided
            }
        },
        
        {
            "type": "Feature",
            "properties": {
                "remote_id": "",                    // Optional: can be null if not provided
                "farmer_name": "",                  // Optional: can be null if not provided
                "member_id": "",                    // Optional: can be null if not provided
                "collection_site": "",              // Optional: can be null if not provided
                "agent_name": "",                   // Optional: can be null if not provided
                "farm_village": "",                 // Optional: can be null if not provided
                "farm_district": "",                // Optional: can be null if not provided
                "farm_size": "farm size is double", // Replace with actual value; can be null if not provided
                "latitude": "latitude value in double", // Replace with actual value; can be null if not provided
                "longitude": "longitude value in double", // Replace with actual value; can be null if not provided
                "created_at": "",                   // Optional: can be null if not provided
                "updated_at": ""                    // Optional: can be null if not provided
            },
            "geometry": {
                "type": "Polygon",                  // Use "Point" if coordinates are for a point
                "coordinates": [[["longitude","latitude"], ["longitude","latitude"],["longitude", "latitude"], ["longitude", "latitude"], ["longitude", "latitude"], ["longitude", "latitude"]]]
                // Replace with actual coordinates; can be null if not provided
            }
        }
    ]
}"#;

/// Column order written by [`export_csv`] and read back by the CSV importer.
pub const CSV_EXPORT_HEADER: &str = "remote_id,farmer_name,member_id,collection_site,agent_name,village,district,size,latitude,longitude,coordinates,accuracyArray,created_at,updated_at";

/// Returns the template for `file_type` (`csv` or `geojson`).
pub fn template_content(file_type: &str) -> Result<&'static str> {
    match file_type {
        "csv" => Ok(CSV_TEMPLATE),
        "geojson" => Ok(GEOJSON_TEMPLATE),
        other => Err(CollectorError::UnsupportedFileType(other.to_string())),
    }
}

/// Writes the template for `file_type` to `sink` unchanged.
pub fn write_template<W: Write>(file_type: &str, sink: &mut W) -> Result<()> {
    let content = template_content(file_type)?;
    sink.write_all(content.as_bytes())?;
    sink.flush()?;
    Ok(())
}

// ===== CSV EXPORT =====

/// Quotes a field holding commas or quotes; embedded quotes are doubled.
fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn format_timestamp(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|dt| dt.format(CSV_DATE_FORMAT).to_string())
        .unwrap_or_default()
}

fn format_accuracy(accuracy: &Option<Vec<Option<f32>>>) -> String {
    let values: Vec<String> = accuracy
        .iter()
        .flatten()
        .map(|value| value.map(|v| v.to_string()).unwrap_or_default())
        .collect();
    format!("[{}]", values.join(","))
}

/// Writes `farms` as CSV the importer reads back. `sites` supplies the
/// collection site names.
pub fn export_csv<W: Write>(farms: &[Farm], sites: &[CollectionSite], sink: &mut W) -> Result<usize> {
    let site_names: HashMap<u64, &str> = sites
        .iter()
        .map(|site| (site.site_id, site.name.as_str()))
        .collect();

    writeln!(sink, "{}", CSV_EXPORT_HEADER)?;
    for farm in farms {
        let coordinates = farm
            .coordinates
            .as_deref()
            .filter(|pairs| !pairs.is_empty())
            .map(format_coordinates)
            .unwrap_or_default();

        let row = [
            farm.remote_id.to_string(),
            farm.farmer_name.clone(),
            farm.member_id.clone(),
            site_names.get(&farm.site_id).copied().unwrap_or_default().to_string(),
            farm.agent_name.clone(),
            farm.village.clone(),
            farm.district.clone(),
            farm.size.to_string(),
            farm.latitude.clone(),
            farm.longitude.clone(),
            coordinates,
            format_accuracy(&farm.accuracy_array),
            format_timestamp(farm.created_at),
            format_timestamp(farm.updated_at),
        ];
        let line: Vec<String> = row.iter().map(|field| csv_field(field)).collect();
        writeln!(sink, "{}", line.join(","))?;
    }
    sink.flush()?;

    tracing::info!("Exported {} farms as CSV", farms.len());
    Ok(farms.len())
}

// ===== GEOJSON EXPORT =====

fn coordinate_value(text: &str) -> Value {
    match text.parse::<f64>() {
        Ok(value) if text != UNKNOWN_COORDINATE => json!(value),
        _ => Value::Null,
    }
}

/// Geometry in the axis layout the GeoJSON importer stores: polygon vertices
/// are written as stored, a single stored point is swapped back.
fn farm_geometry(farm: &Farm) -> Value {
    match farm.coordinates.as_deref() {
        Some(pairs) if pairs.len() > 1 => {
            let ring: Vec<[f64; 2]> = pairs.iter().map(|(a, b)| [*a, *b]).collect();
            json!({ "type": "Polygon", "coordinates": [ring] })
        }
        Some([(a, b)]) => json!({ "type": "Point", "coordinates": [b, a] }),
        _ => json!({
            "type": "Point",
            "coordinates": [
                farm.longitude.parse::<f64>().unwrap_or(0.0),
                farm.latitude.parse::<f64>().unwrap_or(0.0)
            ]
        }),
    }
}

pub fn farm_feature(farm: &Farm) -> Value {
    json!({
        "type": "Feature",
        "properties": {
            "remote_id": farm.remote_id.to_string(),
            "farmer_name": farm.farmer_name,
            "member_id": farm.member_id,
            "agent_name": farm.agent_name,
            "farm_village": farm.village,
            "farm_district": farm.district,
            "farm_size": farm.size,
            "latitude": coordinate_value(&farm.latitude),
            "longitude": coordinate_value(&farm.longitude),
            "accuracyArray": format_accuracy(&farm.accuracy_array),
            "created_at": farm.created_at,
            "updated_at": farm.updated_at,
        },
        "geometry": farm_geometry(farm),
    })
}

/// Writes `farms` as a GeoJSON FeatureCollection.
pub fn export_geojson<W: Write>(farms: &[Farm], sink: &mut W) -> Result<usize> {
    let features: Vec<Value> = farms.iter().map(farm_feature).collect();
    let collection = json!({
        "type": "FeatureCollection",
        "features": features,
    });
    serde_json::to_writer_pretty(&mut *sink, &collection)?;
    sink.flush()?;

    tracing::info!("Exported {} farms as GeoJSON", farms.len());
    Ok(farms.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::{parse_csv, parse_geojson};
    use uuid::Uuid;

    fn farm() -> Farm {
        let mut farm = Farm::new(2, Uuid::new_v4(), "Amina".to_string());
        farm.member_id = "M1".to_string();
        farm.village = "Nyeri".to_string();
        farm.district = "Central".to_string();
        farm.agent_name = "Juma".to_string();
        farm.size = 1.5;
        farm.latitude = "-0.4".to_string();
        farm.longitude = "36.9".to_string();
        farm.accuracy_array = Some(vec![Some(3.5), None]);
        farm.created_at = 1_728_987_630_000;
        farm.updated_at = 1_728_987_630_000;
        farm
    }

    #[test]
    fn test_template_content() {
        assert!(template_content("csv").unwrap().starts_with("remote_id,"));
        assert!(template_content("geojson").unwrap().contains("\"FeatureCollection\""));
        assert!(matches!(
            template_content("xlsx"),
            Err(CollectorError::UnsupportedFileType(ref kind)) if kind == "xlsx"
        ));
    }

    #[test]
    fn test_write_template_is_verbatim() {
        let mut sink = Vec::new();
        write_template("csv", &mut sink).unwrap();
        assert_eq!(sink, CSV_TEMPLATE.as_bytes());
    }

    #[test]
    fn test_csv_export_reads_back() {
        let mut polygon = farm();
        polygon.coordinates = Some(vec![(-0.4, 36.9), (-0.41, 36.91), (-0.42, 36.9)]);
        let mut site = CollectionSite::default();
        site.site_id = 2;
        site.name = "Karatina, upper".to_string();

        let mut sink = Vec::new();
        export_csv(&[farm(), polygon.clone()], &[site], &mut sink).unwrap();
        let text = String::from_utf8(sink).unwrap();
        assert!(text.contains("\"Karatina, upper\""));
        assert!(text.contains("Tue Oct 15 10:20:30 UTC 2024"));

        let parsed = parse_csv(text.as_bytes(), 2).unwrap();
        assert!(parsed.invalid.is_empty());
        assert_eq!(parsed.valid.len(), 2);

        let read_back = &parsed.valid[1].farm;
        assert_eq!(read_back.remote_id, polygon.remote_id);
        assert_eq!(read_back.coordinates, polygon.coordinates);
        assert_eq!(read_back.accuracy_array, polygon.accuracy_array);
        assert_eq!(read_back.created_at, polygon.created_at);
        assert!(!read_back.differs_materially(&polygon));
    }

    #[test]
    fn test_csv_export_keeps_embedded_quotes() {
        let mut quoted = farm();
        quoted.farmer_name = "Amina \"Mama\" Wanjiru".to_string();

        let mut sink = Vec::new();
        export_csv(&[quoted.clone()], &[], &mut sink).unwrap();
        let text = String::from_utf8(sink).unwrap();
        assert!(text.contains("\"Amina \"\"Mama\"\" Wanjiru\""));

        let parsed = parse_csv(text.as_bytes(), 2).unwrap();
        assert_eq!(parsed.valid[0].farm.farmer_name, quoted.farmer_name);
    }

    #[test]
    fn test_export_of_farm_without_captures_reads_back_unchanged() {
        let mut bare = farm();
        bare.accuracy_array = None;
        bare.coordinates = None;

        let mut csv = Vec::new();
        export_csv(&[bare.clone()], &[], &mut csv).unwrap();
        let from_csv = parse_csv(csv.as_slice(), 2).unwrap();
        assert!(!from_csv.valid[0].farm.differs_materially(&bare));

        let mut geojson = Vec::new();
        export_geojson(&[bare.clone()], &mut geojson).unwrap();
        let from_geojson = parse_geojson(std::str::from_utf8(&geojson).unwrap(), 2);
        assert!(!from_geojson.valid[0].farm.differs_materially(&bare));
    }

    #[test]
    fn test_geojson_export_reads_back() {
        let mut point = farm();
        point.coordinates = Some(vec![(-0.4, 36.9)]);
        let mut polygon = farm();
        polygon.coordinates = Some(vec![(36.9, -0.4), (36.91, -0.41), (36.9, -0.41)]);

        let mut sink = Vec::new();
        export_geojson(&[point.clone(), polygon.clone()], &mut sink).unwrap();
        let parsed = parse_geojson(std::str::from_utf8(&sink).unwrap(), 2);

        assert!(parsed.invalid.is_empty());
        assert_eq!(parsed.valid[0].farm.coordinates, point.coordinates);
        assert_eq!(parsed.valid[1].farm.coordinates, polygon.coordinates);
        assert_eq!(parsed.valid[1].farm.village, "Nyeri");
        assert!(parsed.valid[0].remote_id_supplied);
    }
}
