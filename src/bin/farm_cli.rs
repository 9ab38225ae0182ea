use anyhow::{anyhow, Result};
use clap::Parser;
use farmcollector_rs::client::FarmApiClient;
use farmcollector_rs::config::CollectorConfig;
use farmcollector_rs::geometry::{area_discrepancy, calculate_area, convert_size, parse_coordinates};
use farmcollector_rs::import::import_file;
use farmcollector_rs::models::{CollectionSite, RestoreStatus};
use farmcollector_rs::restore::RestoreEngine;
use farmcollector_rs::storage::{FarmRepository, LocalStore};
use farmcollector_rs::sync::SyncEngine;
use farmcollector_rs::templates::{export_csv, export_geojson, write_template};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, rename_all = "snake_case")]
struct Args {
    /// Command to execute: import, template, export, restore, sync, list_sites, list_farms, add_site, convert_size, area
    #[arg(short, long)]
    command: String,

    /// Local database file (or set FARM_COLLECTOR_DB_PATH)
    #[arg(long, name = "db_path")]
    db_path: Option<String>,

    /// Remote base URL (or set FARM_COLLECTOR_API_URL)
    #[arg(long, name = "api_url")]
    api_url: Option<String>,

    /// Device id sent with restore and sync (or set FARM_COLLECTOR_DEVICE_ID)
    #[arg(long, name = "device_id")]
    device_id: Option<String>,

    /// Input file for import, output file for template and export
    #[arg(long, name = "file_path")]
    file_path: Option<PathBuf>,

    /// Declared MIME type of the import file
    #[arg(long, name = "mime_type")]
    mime_type: Option<String>,

    /// Collection site id (import, list_farms, export)
    #[arg(long, name = "site_id")]
    site_id: Option<u64>,

    /// File type for template and export: csv or geojson
    #[arg(long, name = "file_type", default_value = "csv")]
    file_type: String,

    /// Site fields for add_site
    #[arg(long)]
    name: Option<String>,
    #[arg(long, name = "agent_name", default_value = "")]
    agent_name: String,
    #[arg(long, default_value = "")]
    village: String,
    #[arg(long, default_value = "")]
    district: String,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    phone: Option<String>,

    /// Plot size for convert_size, or entered size to compare with area
    #[arg(long)]
    size: Option<f64>,

    /// Unit for convert_size: Ha, Acres, Sqm, Timad, Fichesa, Manzana, Tarea
    #[arg(long, default_value = "Ha")]
    unit: String,

    /// Boundary for area, as [[lon,lat],[lon,lat],...]
    #[arg(long)]
    coordinates: Option<String>,

    /// Keep syncing on an interval instead of a single pass
    #[arg(long, default_value = "false")]
    periodic: bool,

    /// Seconds between periodic sync passes (or set FARM_COLLECTOR_SYNC_INTERVAL_SECS)
    #[arg(long, name = "interval_secs")]
    interval_secs: Option<u64>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

// example usage:
// FARM_COLLECTOR_DB_PATH=farms.db ./target/release/farm_cli --command add_site --name "Kiambu North" --agent_name Juma --village Kiambu --district Central
// FARM_COLLECTOR_DB_PATH=farms.db ./target/release/farm_cli --command import --file_path farms.csv --mime_type text/csv --site_id 1
// FARM_COLLECTOR_DB_PATH=farms.db ./target/release/farm_cli --command list_farms --site_id 1
// FARM_COLLECTOR_DB_PATH=farms.db ./target/release/farm_cli --command export --file_type geojson --file_path farms.geojson
// ./target/release/farm_cli --command template --file_type csv --file_path template.csv
// FARM_COLLECTOR_DB_PATH=farms.db FARM_COLLECTOR_API_URL=https://collector.example.org ./target/release/farm_cli --command restore --device_id abc123
// FARM_COLLECTOR_DB_PATH=farms.db FARM_COLLECTOR_API_URL=https://collector.example.org ./target/release/farm_cli --command sync --periodic
// ./target/release/farm_cli --command convert_size --size 2 --unit Acres
// ./target/release/farm_cli --command area --coordinates '[[36.9,-0.4],[36.91,-0.4],[36.91,-0.41]]' --size 1.2

fn load_config(args: &Args) -> Result<CollectorConfig> {
    let mut config = CollectorConfig::from_env_with_db_path(args.db_path.clone())?;
    if let Some(url) = &args.api_url {
        config.set_api_url(url)?;
    }
    if let Some(device_id) = &args.device_id {
        config.device_id = device_id.clone();
    }
    if let Some(email) = &args.email {
        config.email = email.clone();
    }
    if let Some(phone) = &args.phone {
        config.phone_number = phone.clone();
    }
    if let Some(interval) = args.interval_secs {
        config.sync_interval_secs = interval;
    }
    Ok(config)
}

fn required_path(args: &Args) -> Result<PathBuf> {
    args.file_path
        .clone()
        .ok_or_else(|| anyhow!("file_path required for {}", args.command))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(format!("farmcollector_rs={},farm_cli={}", args.log_level, args.log_level))
        .init();

    // Commands that need no local store
    match args.command.as_str() {
        "convert_size" => {
            let size = args.size.ok_or_else(|| anyhow!("size required for convert_size"))?;
            let hectares = convert_size(size, &args.unit)?;
            println!("{} {} = {} Ha", size, args.unit, hectares);
            return Ok(());
        }
        "area" => {
            let text = args
                .coordinates
                .as_deref()
                .ok_or_else(|| anyhow!("coordinates required for area"))?;
            let area = calculate_area(&parse_coordinates(text));
            println!("Area: {} Ha", area);
            if let Some(entered) = args.size {
                if let Some(difference) = area_discrepancy(area, entered) {
                    println!(
                        "Warning: captured area differs from entered size {} Ha by {} Ha",
                        entered, difference
                    );
                }
            }
            return Ok(());
        }
        "template" => {
            let path = required_path(&args)?;
            let mut sink = BufWriter::new(File::create(&path)?);
            write_template(&args.file_type, &mut sink)?;
            println!("Template written to {}", path.display());
            return Ok(());
        }
        _ => {}
    }

    let config = load_config(&args)?;
    let store = Arc::new(LocalStore::open(&config.db_path)?);

    match args.command.as_str() {
        "import" => {
            let path = required_path(&args)?;
            let site_id = args.site_id.ok_or_else(|| anyhow!("site_id required for import"))?;

            let result = import_file(store.clone(), path, args.mime_type.clone(), site_id).await;
            if !result.success {
                eprintln!("{}", result.message);
                std::process::exit(1);
            }
            println!("{}", result.message);
            println!(
                "Imported: {}, duplicates: {}, need update: {}, invalid: {}",
                result.imported_farms.len(),
                result.duplicate_farms.len(),
                result.farms_needing_update.len(),
                result.invalid_farms.len()
            );
            for message in result.duplicate_farms.iter().chain(result.invalid_farms.iter()) {
                println!("  {}", message);
            }
        }
        "export" => {
            let path = required_path(&args)?;
            let farms = match args.site_id {
                Some(site_id) => store.read_all_farms(site_id)?,
                None => store.get_all_farms()?,
            };
            let mut sink = BufWriter::new(File::create(&path)?);
            let count = match args.file_type.as_str() {
                "csv" => export_csv(&farms, &store.get_all_sites()?, &mut sink)?,
                "geojson" => export_geojson(&farms, &mut sink)?,
                other => return Err(anyhow!("Unsupported file type: {}", other)),
            };
            println!("Exported {} farms to {}", count, path.display());
        }
        "restore" => {
            let client = FarmApiClient::new(config.require_api_url()?)?;
            let engine = RestoreEngine::new(store.clone(), client);
            match engine.restore(&config.identity()).await {
                RestoreStatus::Success { message, .. } => println!("{}", message),
                RestoreStatus::Error { message } => {
                    eprintln!("{}", message);
                    std::process::exit(1);
                }
                RestoreStatus::InProgress => {
                    return Err(anyhow!("Restore did not finish"));
                }
            }
        }
        "sync" => {
            let client = FarmApiClient::new(config.require_api_url()?)?;
            let engine = SyncEngine::new(store.clone(), client, config.device_id.clone());

            if args.periodic {
                let (shutdown_tx, shutdown_rx) = watch::channel(false);
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("Received interrupt, shutting down");
                        let _ = shutdown_tx.send(true);
                    }
                });
                info!("Syncing every {} seconds", config.sync_interval_secs);
                engine.run_periodic(config.sync_interval(), shutdown_rx).await;
            } else {
                match engine.sync_once().await {
                    Ok(report) => println!(
                        "Synced {} farms across {} sites",
                        report.farms, report.sites
                    ),
                    Err(e) => {
                        error!("Sync failed: {}", e);
                        eprintln!("Sync failed: {}", e);
                        std::process::exit(1);
                    }
                }
            }
        }
        "list_sites" => {
            let sites = store.get_all_sites()?;
            println!("{}", serde_json::to_string_pretty(&sites)?);
        }
        "list_farms" => {
            let farms = match args.site_id {
                Some(site_id) => store.read_all_farms(site_id)?,
                None => store.get_all_farms()?,
            };
            println!("{}", serde_json::to_string_pretty(&farms)?);
        }
        "add_site" => {
            let name = args
                .name
                .clone()
                .ok_or_else(|| anyhow!("name required for add_site"))?;
            let mut site = CollectionSite::new(
                name,
                args.agent_name.clone(),
                args.village.clone(),
                args.district.clone(),
            );
            site.site_id = args.site_id.unwrap_or(0);
            site.email = config.email.clone();
            site.phone_number = config.phone_number.clone();

            if let Some(site_id) = store.add_site(site)? {
                println!("Site {} added successfully", site_id);
            } else {
                eprintln!("Site already exists");
                std::process::exit(1);
            }
        }
        other => {
            eprintln!("Unknown command: {}", other);
            std::process::exit(1);
        }
    }

    Ok(())
}
