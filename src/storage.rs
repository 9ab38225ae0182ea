//! Local persistence for farms and collection sites backed by native_db.

use crate::error::Result;
use crate::models::v1::FarmKey;
use crate::models::{CollectionSite, Farm};
use crate::reconcile;
use native_db::{Builder, Database, Models};
use once_cell::sync::OnceCell;
use std::path::Path;
use tokio::sync::watch;

static MODELS: OnceCell<Models> = OnceCell::new();

fn models() -> Result<&'static Models> {
    MODELS.get_or_try_init(|| -> Result<Models> {
        let mut models = Models::new();
        models.define::<Farm>()?;
        models.define::<CollectionSite>()?;
        Ok(models)
    })
}

/// CRUD access to persisted records. Each call is atomic on its own; nothing
/// groups several calls into one transaction.
pub trait FarmRepository: Send + Sync {
    /// Stores a new farm, assigning a local id when it has none.
    fn add_farm(&self, farm: Farm) -> Result<Farm>;
    fn update_farm(&self, farm: &Farm) -> Result<()>;
    fn delete_farm_by_id(&self, id: u64) -> Result<()>;
    fn delete_list(&self, ids: &[u64]) -> Result<()>;
    fn read_all_farms(&self, site_id: u64) -> Result<Vec<Farm>>;
    fn get_all_farms(&self) -> Result<Vec<Farm>>;

    /// Adds a site, assigning an id when it has none. Returns the stored id,
    /// or `None` when a site with the same id already exists.
    fn add_site(&self, site: CollectionSite) -> Result<Option<u64>>;
    fn update_site(&self, site: &CollectionSite) -> Result<()>;
    fn get_all_sites(&self) -> Result<Vec<CollectionSite>>;
    /// Deletes the sites and every farm attached to them.
    fn delete_list_site(&self, ids: &[u64]) -> Result<()>;

    fn get_farm_by_remote_id(&self, site_id: u64, remote_id: uuid::Uuid) -> Result<Option<Farm>> {
        Ok(self
            .read_all_farms(site_id)?
            .into_iter()
            .find(|farm| farm.remote_id == remote_id))
    }

    /// Persisted farm matching `farm` by remote id, or by farmer details when
    /// no farm in the site carries that remote id.
    fn get_farm_by_details(&self, farm: &Farm) -> Result<Option<Farm>> {
        let existing = self.read_all_farms(farm.site_id)?;
        Ok(reconcile::find_match(&existing, farm, true).cloned())
    }

    fn is_farm_duplicate(&self, farm: &Farm) -> Result<bool> {
        Ok(self.get_farm_by_details(farm)?.is_some())
    }

    fn farm_needs_update(&self, farm: &Farm) -> Result<bool> {
        Ok(self
            .get_farm_by_details(farm)?
            .map(|existing| reconcile::needs_update(&existing, farm))
            .unwrap_or(false))
    }

    fn get_unsynced_farms(&self) -> Result<Vec<Farm>> {
        Ok(self
            .get_all_farms()?
            .into_iter()
            .filter(|farm| !farm.synced)
            .collect())
    }

    fn mark_synced(&self, ids: &[u64]) -> Result<()> {
        for mut farm in self
            .get_all_farms()?
            .into_iter()
            .filter(|farm| ids.contains(&farm.id))
        {
            farm.synced = true;
            farm.scheduled_for_sync = false;
            self.update_farm(&farm)?;
        }
        Ok(())
    }
}

pub struct LocalStore {
    database: Database<'static>,
    changes: watch::Sender<u64>,
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("revision", &*self.changes.borrow())
            .finish()
    }
}

impl LocalStore {
    /// Opens (or creates) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let database = Builder::new().create(models()?, path.as_ref())?;
        tracing::debug!("Opened local store at {}", path.as_ref().display());
        Ok(Self::with_database(database))
    }

    pub fn in_memory() -> Result<Self> {
        let database = Builder::new().create_in_memory(models()?)?;
        Ok(Self::with_database(database))
    }

    fn with_database(database: Database<'static>) -> Self {
        let (changes, _) = watch::channel(0);
        Self { database, changes }
    }

    /// Receives a new revision number after every committed write, so list
    /// views can re-read instead of polling.
    pub fn watch_changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    fn notify(&self) {
        self.changes.send_modify(|revision| *revision += 1);
    }

    fn next_farm_id(&self) -> Result<u64> {
        let r = self.database.r_transaction()?;
        let mut max_id = 0;
        for farm in r.scan().primary::<Farm>()?.all()? {
            max_id = max_id.max(farm?.id);
        }
        Ok(max_id + 1)
    }

    fn next_site_id(&self) -> Result<u64> {
        let r = self.database.r_transaction()?;
        let mut max_id = 0;
        for site in r.scan().primary::<CollectionSite>()?.all()? {
            max_id = max_id.max(site?.site_id);
        }
        Ok(max_id + 1)
    }
}

impl FarmRepository for LocalStore {
    fn add_farm(&self, mut farm: Farm) -> Result<Farm> {
        if farm.id == 0 {
            farm.id = self.next_farm_id()?;
        }
        let rw = self.database.rw_transaction()?;
        rw.insert(farm.clone())?;
        rw.commit()?;
        self.notify();
        tracing::debug!("Added farm {} ({}) to site {}", farm.id, farm.farmer_name, farm.site_id);
        Ok(farm)
    }

    fn update_farm(&self, farm: &Farm) -> Result<()> {
        let rw = self.database.rw_transaction()?;
        let existing: Option<Farm> = rw.get().primary(farm.id)?;
        match existing {
            Some(old) => rw.update(old, farm.clone())?,
            None => {
                tracing::warn!("Farm {} not found for update, inserting it", farm.id);
                rw.insert(farm.clone())?
            }
        }
        rw.commit()?;
        self.notify();
        Ok(())
    }

    fn delete_farm_by_id(&self, id: u64) -> Result<()> {
        self.delete_list(&[id])
    }

    fn delete_list(&self, ids: &[u64]) -> Result<()> {
        let rw = self.database.rw_transaction()?;
        for id in ids {
            let existing: Option<Farm> = rw.get().primary(*id)?;
            if let Some(farm) = existing {
                rw.remove(farm)?;
            }
        }
        rw.commit()?;
        self.notify();
        Ok(())
    }

    fn read_all_farms(&self, site_id: u64) -> Result<Vec<Farm>> {
        let r = self.database.r_transaction()?;
        let farms = r
            .scan()
            .secondary::<Farm>(FarmKey::site_id)?
            .range(site_id..=site_id)?
            .collect::<std::result::Result<Vec<Farm>, _>>()?;
        Ok(farms)
    }

    fn get_all_farms(&self) -> Result<Vec<Farm>> {
        let r = self.database.r_transaction()?;
        let farms = r
            .scan()
            .primary::<Farm>()?
            .all()?
            .collect::<std::result::Result<Vec<Farm>, _>>()?;
        Ok(farms)
    }

    fn add_site(&self, mut site: CollectionSite) -> Result<Option<u64>> {
        if site.site_id == 0 {
            site.site_id = self.next_site_id()?;
        }
        let rw = self.database.rw_transaction()?;
        let existing: Option<CollectionSite> = rw.get().primary(site.site_id)?;
        if existing.is_some() {
            tracing::debug!("Site {} already exists", site.site_id);
            return Ok(None);
        }
        rw.insert(site.clone())?;
        rw.commit()?;
        self.notify();
        tracing::debug!("Added site {} ({})", site.site_id, site.name);
        Ok(Some(site.site_id))
    }

    fn update_site(&self, site: &CollectionSite) -> Result<()> {
        let rw = self.database.rw_transaction()?;
        let existing: Option<CollectionSite> = rw.get().primary(site.site_id)?;
        match existing {
            Some(old) => rw.update(old, site.clone())?,
            None => rw.insert(site.clone())?,
        }
        rw.commit()?;
        self.notify();
        Ok(())
    }

    fn get_all_sites(&self) -> Result<Vec<CollectionSite>> {
        let r = self.database.r_transaction()?;
        let sites = r
            .scan()
            .primary::<CollectionSite>()?
            .all()?
            .collect::<std::result::Result<Vec<CollectionSite>, _>>()?;
        Ok(sites)
    }

    fn delete_list_site(&self, ids: &[u64]) -> Result<()> {
        let mut farm_ids = Vec::new();
        for id in ids {
            farm_ids.extend(self.read_all_farms(*id)?.into_iter().map(|farm| farm.id));
        }
        self.delete_list(&farm_ids)?;

        let rw = self.database.rw_transaction()?;
        for id in ids {
            let existing: Option<CollectionSite> = rw.get().primary(*id)?;
            if let Some(site) = existing {
                rw.remove(site)?;
            }
        }
        rw.commit()?;
        self.notify();
        Ok(())
    }
}
