use farmcollector_rs::import::{import_farms, import_file};
use farmcollector_rs::models::{CollectionSite, Farm};
use farmcollector_rs::storage::{FarmRepository, LocalStore};
use farmcollector_rs::templates::{export_csv, export_geojson};
use std::io::Write;
use std::sync::Arc;
use uuid::Uuid;

/// # Import Pipeline Integration Tests
///
/// Runs whole files through detection, parsing and reconciliation against a
/// real `LocalStore`:
/// - **Idempotence**: a second import of the same file only reports duplicates
/// - **Updates**: a changed measurement flags the stored farm without overwriting it
/// - **Row errors**: short rows are reported, valid rows still land
/// - **Files**: imports from disk on the blocking pool, and export/import round trips
///
/// ```bash
/// cargo test --test import_pipeline_test
/// ```

const CSV_FILE: &str = "remote_id,farmer_name,member_id,collection_site,agent_name,farm_village,farm_district,farm_size,latitude,longitude,polygon,accuracyArray,created_at,updated_at
6f1c1c7e-3a53-4b0f-9a3e-6a1f0e4b2c11,Amina Wanjiru,M-001,Kiambu,Juma,Kiambu,Central,1.25,-1.17,36.83,\"[[36.83,-1.17],[36.84,-1.17],[36.84,-1.18]]\",\"3.5,4.0,2.5\",Tue Oct 15 10:20:30 GMT 2024,Tue Oct 15 10:20:30 GMT 2024
0b6d6f3e-91c4-4c55-8f3e-2a2f5b9d1e42,Baraka Otieno,M-002,Kiambu,Juma,Kiambu,Central,0.8,-1.16,36.82,,,Tue Oct 15 10:20:30 GMT 2024,Tue Oct 15 10:20:30 GMT 2024
,Chebet Kiprop,M-003,Kiambu,Juma,Limuru,Central,2.0,-1.1,36.64,,,,
";

const GEOJSON_FILE: &str = r#"{"type": "FeatureCollection", "features": [
    {"type": "Feature",
     "properties": {"remote_id": "2c1f0b3a-5d7e-4f6a-9b8c-1d2e3f4a5b6c", "farmer_name": "Daudi", "member_id": "M-010",
                    "farm_village": "Nyeri", "farm_district": "Central", "farm_size": 1.5,
                    "latitude": -0.42, "longitude": 36.95},
     "geometry": {"type": "Point", "coordinates": [36.95, -0.42]}},
    {"type": "Feature",
     "properties": {"farmer_name": "Esther", "farm_village": "Nyeri", "farm_district": "Central", "farm_size": 3.0},
     "geometry": {"type": "Polygon", "coordinates": [[[36.9, -0.4], [36.91, -0.4], [36.91, -0.41], [36.9, -0.4]]]}}
]}"#;

#[test]
fn test_importing_same_csv_twice_only_reports_duplicates() {
    let store = LocalStore::in_memory().unwrap();

    let first = import_farms(&store, CSV_FILE.as_bytes(), Some("text/csv"), 1);
    assert!(first.success);
    assert_eq!(first.message, "CSV import successful");
    assert_eq!(first.imported_farms.len(), 3);
    assert!(first.duplicate_farms.is_empty());
    assert!(first.invalid_farms.is_empty());

    let second = import_farms(&store, CSV_FILE.as_bytes(), Some("text/csv"), 1);
    assert!(second.success);
    assert!(second.imported_farms.is_empty());
    assert_eq!(second.duplicate_farms.len(), 3);
    assert!(second.farms_needing_update.is_empty());
    assert_eq!(
        second.duplicate_farms[0],
        "Duplicate farm: Amina Wanjiru, Site ID: 1"
    );

    assert_eq!(store.read_all_farms(1).unwrap().len(), 3);
}

#[test]
fn test_changed_size_flags_stored_farm() {
    let store = LocalStore::in_memory().unwrap();
    import_farms(&store, CSV_FILE.as_bytes(), None, 1);

    let changed = CSV_FILE.replace("Central,0.8,", "Central,0.9,");
    let result = import_farms(&store, changed.as_bytes(), None, 1);
    assert!(result.imported_farms.is_empty());
    assert_eq!(result.farms_needing_update.len(), 1);
    assert_eq!(result.farms_needing_update[0].farmer_name, "Baraka Otieno");
    assert_eq!(result.duplicate_farms.len(), 2);

    let stored = store
        .read_all_farms(1)
        .unwrap()
        .into_iter()
        .find(|farm| farm.farmer_name == "Baraka Otieno")
        .unwrap();
    assert!(stored.needs_update);
    assert_eq!(stored.size, 0.8);
}

#[test]
fn test_same_file_into_another_site_is_new() {
    let store = LocalStore::in_memory().unwrap();
    import_farms(&store, CSV_FILE.as_bytes(), None, 1);
    let other = import_farms(&store, CSV_FILE.as_bytes(), None, 2);
    assert_eq!(other.imported_farms.len(), 3);
    assert_eq!(store.get_all_farms().unwrap().len(), 6);
}

#[test]
fn test_short_rows_are_reported() {
    let store = LocalStore::in_memory().unwrap();
    let csv = format!("{}\n,Short Row,M-9,Kiambu\n", CSV_FILE.trim_end());

    let result = import_farms(&store, csv.as_bytes(), Some("text/csv"), 1);
    assert!(result.success);
    assert_eq!(result.imported_farms.len(), 3);
    assert_eq!(result.invalid_farms, vec!["Record of Short Row is not inserted"]);
}

#[test]
fn test_geojson_import_and_reimport() {
    let store = LocalStore::in_memory().unwrap();

    let first = import_farms(&store, GEOJSON_FILE.as_bytes(), Some("application/geo+json"), 4);
    assert!(first.success);
    assert_eq!(first.message, "GeoJSON import successful");
    assert_eq!(first.imported_farms.len(), 2);

    let daudi = &first.imported_farms[0];
    assert_eq!(daudi.coordinates, Some(vec![(-0.42, 36.95)]));
    let esther = &first.imported_farms[1];
    assert_eq!(esther.member_id, "Unknown");
    assert_eq!(esther.coordinates.as_ref().map(Vec::len), Some(4));
    assert_eq!(esther.coordinates.as_ref().unwrap()[0], (36.9, -0.4));

    // Esther has no remote id in the file, so she is matched by her details
    let second = import_farms(&store, GEOJSON_FILE.as_bytes(), None, 4);
    assert!(second.imported_farms.is_empty());
    assert_eq!(second.duplicate_farms.len() + second.farms_needing_update.len(), 2);
    assert_eq!(store.read_all_farms(4).unwrap().len(), 2);
}

#[tokio::test]
async fn test_import_file_from_disk() {
    let store = Arc::new(LocalStore::in_memory().unwrap());
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CSV_FILE.as_bytes()).unwrap();

    let result = import_file(store.clone(), file.path().to_path_buf(), None, 1).await;
    assert!(result.success);
    assert_eq!(result.imported_farms.len(), 3);
}

#[test]
fn test_exported_files_import_as_duplicates() {
    let store = LocalStore::in_memory().unwrap();
    let mut site = CollectionSite::default();
    site.site_id = 1;
    site.name = "Kiambu".to_string();
    store.add_site(site).unwrap();
    import_farms(&store, CSV_FILE.as_bytes(), None, 1);

    let farms = store.read_all_farms(1).unwrap();
    let mut csv = Vec::new();
    export_csv(&farms, &store.get_all_sites().unwrap(), &mut csv).unwrap();
    let again = import_farms(&store, csv.as_slice(), Some("text/csv"), 1);
    assert!(again.imported_farms.is_empty());
    assert_eq!(again.duplicate_farms.len(), 3);

    let mut geojson = Vec::new();
    export_geojson(&farms, &mut geojson).unwrap();
    let into_new_site = import_farms(&store, geojson.as_slice(), Some("application/geo+json"), 5);
    assert!(into_new_site.success);
    assert_eq!(into_new_site.imported_farms.len(), 3);
}

#[test]
fn test_exported_restored_farm_is_not_flagged() {
    let store = LocalStore::in_memory().unwrap();
    let mut restored = Farm::new(1, Uuid::new_v4(), "Fatuma Ali".to_string());
    restored.size = 2.0;
    restored.latitude = "1.5".to_string();
    restored.longitude = "36.5".to_string();
    let stored = store.add_farm(restored).unwrap();
    assert_eq!(stored.accuracy_array, None);
    assert_eq!(stored.coordinates, None);

    let mut csv = Vec::new();
    export_csv(&[stored.clone()], &[], &mut csv).unwrap();
    let from_csv = import_farms(&store, csv.as_slice(), Some("text/csv"), 1);
    assert_eq!(from_csv.duplicate_farms.len(), 1);
    assert!(from_csv.farms_needing_update.is_empty());

    let mut geojson = Vec::new();
    export_geojson(&[stored.clone()], &mut geojson).unwrap();
    let from_geojson = import_farms(&store, geojson.as_slice(), Some("application/geo+json"), 1);
    assert_eq!(from_geojson.duplicate_farms.len(), 1);
    assert!(from_geojson.farms_needing_update.is_empty());

    assert_eq!(store.get_all_farms().unwrap(), vec![stored]);
}
