use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::watch;

use crate::client::RemoteClient;
use crate::models::{
    CollectionSiteRestore, Farm, FarmRestore, ServerFarmResponse, SyncReport,
};
use crate::storage::FarmRepository;

/// Uploads farms the server has not acknowledged yet.
pub struct SyncEngine<R: FarmRepository + ?Sized + 'static, C: RemoteClient> {
    repository: Arc<R>,
    client: C,
    device_id: String,
}

impl<R: FarmRepository + ?Sized + 'static, C: RemoteClient> SyncEngine<R, C> {
    pub fn new(repository: Arc<R>, client: C, device_id: String) -> Self {
        Self {
            repository,
            client,
            device_id,
        }
    }

    /// Pushes one batch and marks its farms synced once the server accepts it.
    pub async fn sync_once(&self) -> Result<SyncReport> {
        let repository = Arc::clone(&self.repository);
        let device_id = self.device_id.clone();
        let (payload, farm_ids) = tokio::task::spawn_blocking(move || {
            pending_payload(repository.as_ref(), &device_id)
        })
        .await??;
        if payload.is_empty() {
            tracing::debug!("Nothing to sync");
            return Ok(SyncReport::default());
        }

        self.client
            .push_farms(&payload)
            .await
            .map_err(|e| anyhow!("Failed to push farms: {}", e))?;
        let report = SyncReport {
            sites: payload.len(),
            farms: farm_ids.len(),
        };
        let repository = Arc::clone(&self.repository);
        tokio::task::spawn_blocking(move || repository.mark_synced(&farm_ids)).await??;

        tracing::info!("Synced {} farms across {} sites", report.farms, report.sites);
        Ok(report)
    }

    /// Calls [`SyncEngine::sync_once`] every `interval` until `shutdown` turns
    /// true or its sender is dropped. A failed pass waits for the next tick.
    pub async fn run_periodic(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        if *shutdown.borrow_and_update() {
            tracing::info!("Shutdown already requested, periodic sync not started");
            return;
        }

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sync_once().await {
                        tracing::error!("Sync pass failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Stopping periodic sync");
                        break;
                    }
                }
            }
        }
    }
}

/// Groups unsynced farms by site into upload payloads, returning them with
/// the ids of the farms they carry. Farms whose site no longer exists locally
/// are left out.
pub fn pending_payload<R: FarmRepository + ?Sized>(
    repository: &R,
    device_id: &str,
) -> Result<(Vec<ServerFarmResponse>, Vec<u64>)> {
    let farms = repository.get_unsynced_farms()?;
    if farms.is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }

    let sites: BTreeMap<u64, _> = repository
        .get_all_sites()?
        .into_iter()
        .map(|site| (site.site_id, site))
        .collect();

    let mut by_site: BTreeMap<u64, Vec<Farm>> = BTreeMap::new();
    for farm in farms {
        by_site.entry(farm.site_id).or_default().push(farm);
    }

    let mut payload = Vec::with_capacity(by_site.len());
    let mut farm_ids = Vec::new();
    for (site_id, farms) in by_site {
        let Some(site) = sites.get(&site_id) else {
            tracing::warn!(
                "Skipping {} unsynced farms of missing site {}",
                farms.len(),
                site_id
            );
            continue;
        };
        farm_ids.extend(farms.iter().map(|farm| farm.id));
        payload.push(ServerFarmResponse {
            device_id: device_id.to_string(),
            collection_site: CollectionSiteRestore::from_site(site, device_id),
            farms: farms.iter().map(FarmRestore::from_farm).collect(),
        });
    }
    Ok((payload, farm_ids))
}
