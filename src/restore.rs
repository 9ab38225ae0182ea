//! Merges the server's snapshot of sites and farms into the local store.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;
use uuid::Uuid;

use crate::client::RemoteClient;
use crate::error::{CollectorError, Result};
use crate::models::{CollectionSite, Farm, FarmRequest, RestoreStatus, ServerFarmResponse};
use crate::storage::FarmRepository;

/// Counts from merging one snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub added_count: usize,
    pub sites_created: usize,
}

impl MergeReport {
    pub fn message(&self) -> String {
        format!(
            "Restoration completed: {} farms added, {} sites created.",
            self.added_count, self.sites_created
        )
    }
}

/// Writes a server snapshot into `repository`.
///
/// Missing sites are created first so every farm insert has its site. Farms
/// unknown locally are inserted, flagged for a visit when incomplete. A farm
/// already stored is never overwritten; it is only flagged when the server
/// copy is complete and the local copy is not.
///
/// Writes are not grouped: an error part way through leaves earlier writes
/// in place.
pub fn merge_snapshot<R: FarmRepository + ?Sized>(
    repository: &R,
    snapshot: &[ServerFarmResponse],
) -> Result<MergeReport> {
    let mut report = MergeReport::default();

    let mut known_sites: Vec<CollectionSite> = repository.get_all_sites()?;
    let mut local_farms: HashMap<Uuid, Farm> = repository
        .get_all_farms()?
        .into_iter()
        .map(|farm| (farm.remote_id, farm))
        .collect();

    let mut site_ids = Vec::with_capacity(snapshot.len());
    for response in snapshot {
        let site = response.collection_site.to_collection_site();
        if let Some(existing) = find_site(&known_sites, &site) {
            site_ids.push(existing);
            continue;
        }
        tracing::debug!("Creating new site {} ({})", site.site_id, site.name);
        let site_id = match repository.add_site(site.clone())? {
            Some(site_id) => {
                report.sites_created += 1;
                site_id
            }
            None => site.site_id,
        };
        known_sites.push(CollectionSite { site_id, ..site });
        site_ids.push(site_id);
    }

    for (response, &site_id) in snapshot.iter().zip(&site_ids) {
        for farm_restore in &response.farms {
            let mut server_farm = farm_restore.to_farm(site_id);

            match local_farms.get_mut(&server_farm.remote_id) {
                None => {
                    server_farm.needs_update = server_farm.is_incomplete();
                    let stored = repository.add_farm(server_farm)?;
                    report.added_count += 1;
                    local_farms.insert(stored.remote_id, stored);
                }
                Some(local) => {
                    if !server_farm.is_incomplete() && local.is_incomplete() && !local.needs_update {
                        tracing::debug!(
                            "Local farm {} is incomplete, flagging for update",
                            local.remote_id
                        );
                        local.needs_update = true;
                        local.touch();
                        repository.update_farm(local)?;
                    }
                }
            }
        }
    }

    tracing::info!(
        "Merged snapshot: {} farms added, {} sites created",
        report.added_count,
        report.sites_created
    );
    Ok(report)
}

/// Local id of the site a snapshot entry refers to. An entry without a local
/// id is matched on its name and location instead.
fn find_site(known: &[CollectionSite], site: &CollectionSite) -> Option<u64> {
    known
        .iter()
        .find(|existing| {
            if site.site_id != 0 {
                existing.site_id == site.site_id
            } else {
                existing.name == site.name
                    && existing.village == site.village
                    && existing.district == site.district
            }
        })
        .map(|existing| existing.site_id)
}

/// Runs restores and publishes their progress.
///
/// Observers get the latest [`RestoreStatus`] through [`RestoreEngine::subscribe`];
/// `None` means no restore has started yet.
pub struct RestoreEngine<R: FarmRepository + ?Sized + 'static, C: RemoteClient> {
    repository: Arc<R>,
    client: C,
    status: watch::Sender<Option<RestoreStatus>>,
}

impl<R: FarmRepository + ?Sized + 'static, C: RemoteClient> RestoreEngine<R, C> {
    pub fn new(repository: Arc<R>, client: C) -> Self {
        let (status, _) = watch::channel(None);
        Self {
            repository,
            client,
            status,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<RestoreStatus>> {
        self.status.subscribe()
    }

    pub fn current_status(&self) -> Option<RestoreStatus> {
        self.status.borrow().clone()
    }

    fn publish(&self, status: RestoreStatus) {
        self.status.send_replace(Some(status));
    }

    /// Fetches the snapshot for `request` and merges it. The final status is
    /// returned and also published to subscribers.
    pub async fn restore(&self, request: &FarmRequest) -> RestoreStatus {
        self.publish(RestoreStatus::InProgress);
        tracing::info!("Restoring data for device {:?}", request.device_id);

        let status = match self.fetch_and_merge(request).await {
            Ok(report) => RestoreStatus::Success {
                added_count: report.added_count,
                sites_created: report.sites_created,
                message: report.message(),
            },
            Err(e) => {
                tracing::error!("Restore failed: {}", e);
                RestoreStatus::Error {
                    message: format!("Failed to restore data: {}", e),
                }
            }
        };

        self.publish(status.clone());
        status
    }

    async fn fetch_and_merge(&self, request: &FarmRequest) -> Result<MergeReport> {
        let snapshot = self.client.get_farms_by_identity(request).await?;
        let repository = Arc::clone(&self.repository);

        tokio::task::spawn_blocking(move || merge_snapshot(repository.as_ref(), &snapshot))
            .await
            .map_err(|e| CollectorError::Io(std::io::Error::other(e)))?
    }
}
