//! Classifies candidate farms against persisted ones and applies the decision.
//!
//! A farm's identity is its remote id within a site. When a candidate's remote
//! id was generated during import (the source had none), farmer details are
//! used instead so re-importing the same file does not create copies.

use std::collections::HashMap;

use crate::error::Result;
use crate::models::{FarmAddResult, Farm};
use crate::storage::FarmRepository;

/// A farm produced by an importer, not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub farm: Farm,
    /// False when the source had no usable remote id and one was generated.
    pub remote_id_supplied: bool,
}

impl Candidate {
    pub fn new(farm: Farm, remote_id_supplied: bool) -> Self {
        Self {
            farm,
            remote_id_supplied,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Classification<'a> {
    New,
    NeedsUpdate(&'a Farm),
    Duplicate(&'a Farm),
}

fn same_details(a: &Farm, b: &Farm) -> bool {
    a.site_id == b.site_id
        && a.farmer_name == b.farmer_name
        && a.member_id == b.member_id
        && a.village == b.village
        && a.district == b.district
}

/// Finds the persisted farm that represents the same physical farm.
pub fn find_match<'a>(
    existing: &'a [Farm],
    candidate: &Farm,
    match_by_details: bool,
) -> Option<&'a Farm> {
    existing
        .iter()
        .find(|farm| farm.site_id == candidate.site_id && farm.remote_id == candidate.remote_id)
        .or_else(|| {
            if match_by_details {
                existing.iter().find(|farm| same_details(farm, candidate))
            } else {
                None
            }
        })
}

/// A persisted farm needs a visit when the candidate measured something
/// different, or when the persisted record was never completed.
pub fn needs_update(persisted: &Farm, candidate: &Farm) -> bool {
    persisted.differs_materially(candidate) || persisted.is_incomplete()
}

/// True when a match exists and nothing about it calls for an update.
pub fn is_duplicate(existing: &[Farm], candidate: &Farm, match_by_details: bool) -> bool {
    find_match(existing, candidate, match_by_details)
        .map(|persisted| !needs_update(persisted, candidate))
        .unwrap_or(false)
}

pub fn classify<'a>(
    existing: &'a [Farm],
    candidate: &Farm,
    match_by_details: bool,
) -> Classification<'a> {
    match find_match(existing, candidate, match_by_details) {
        None => Classification::New,
        Some(persisted) if needs_update(persisted, candidate) => {
            Classification::NeedsUpdate(persisted)
        }
        Some(persisted) => Classification::Duplicate(persisted),
    }
}

pub fn duplicate_message(farm: &Farm) -> String {
    format!("Duplicate farm: {}, Site ID: {}", farm.farmer_name, farm.site_id)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileOutcome {
    pub imported: Vec<Farm>,
    pub duplicates: Vec<String>,
    pub needs_update: Vec<Farm>,
}

/// Applies candidates for one site, one at a time, against the repository.
///
/// The persisted set is read once and kept current as candidates are written,
/// so a file that repeats a farm sees its own earlier rows.
pub struct Reconciler<'r, R: FarmRepository + ?Sized> {
    repository: &'r R,
    site_id: u64,
    existing: Vec<Farm>,
    outcome: ReconcileOutcome,
}

impl<'r, R: FarmRepository + ?Sized> Reconciler<'r, R> {
    pub fn new(repository: &'r R, site_id: u64) -> Result<Self> {
        let existing = repository.read_all_farms(site_id)?;
        Ok(Self {
            repository,
            site_id,
            existing,
            outcome: ReconcileOutcome::default(),
        })
    }

    pub fn apply(&mut self, candidate: Candidate) -> Result<()> {
        let match_by_details = !candidate.remote_id_supplied;
        let classification = classify(&self.existing, &candidate.farm, match_by_details);

        match classification {
            Classification::New => {
                let stored = self.repository.add_farm(candidate.farm)?;
                tracing::debug!(
                    "Adding farm: {}, Site ID: {}",
                    stored.farmer_name,
                    stored.site_id
                );
                self.existing.push(stored.clone());
                self.outcome.imported.push(stored);
            }
            Classification::NeedsUpdate(persisted) => {
                let persisted_id = persisted.id;
                tracing::debug!(
                    "Farm needs update: {}, Site ID: {}",
                    candidate.farm.farmer_name,
                    candidate.farm.site_id
                );
                self.flag_persisted(persisted_id)?;
                self.outcome.needs_update.push(candidate.farm);
            }
            Classification::Duplicate(_) => {
                let message = duplicate_message(&candidate.farm);
                tracing::debug!("{}", message);
                self.outcome.duplicates.push(message);
            }
        }
        Ok(())
    }

    fn flag_persisted(&mut self, id: u64) -> Result<()> {
        if let Some(persisted) = self.existing.iter_mut().find(|farm| farm.id == id) {
            if !persisted.needs_update {
                persisted.needs_update = true;
                persisted.touch();
                self.repository.update_farm(persisted)?;
            }
        }
        Ok(())
    }

    /// Runs the follow-up pass over the farms needing an update and returns
    /// what happened to every candidate.
    pub fn finish(mut self) -> Result<ReconcileOutcome> {
        flag_farms_needing_update(self.repository, self.site_id, &mut self.outcome.needs_update)?;
        Ok(self.outcome)
    }
}

/// Re-reads the site and flags each persisted farm, looked up by remote id,
/// that still differs from its update candidate. Candidates with no persisted
/// counterpart are left unflagged since there is nothing to update.
pub fn flag_farms_needing_update<R: FarmRepository + ?Sized>(
    repository: &R,
    site_id: u64,
    farms_needing_update: &mut [Farm],
) -> Result<()> {
    let existing = repository.read_all_farms(site_id)?;
    let mut by_remote_id: HashMap<uuid::Uuid, Farm> = existing
        .into_iter()
        .map(|farm| (farm.remote_id, farm))
        .collect();

    for candidate in farms_needing_update.iter_mut() {
        match by_remote_id.get_mut(&candidate.remote_id) {
            Some(persisted) => {
                if needs_update(persisted, candidate) && !persisted.needs_update {
                    persisted.needs_update = true;
                    persisted.touch();
                    repository.update_farm(persisted)?;
                }
            }
            None => candidate.needs_update = false,
        }
    }
    Ok(())
}

/// Manual entry: stores `farm` unless the site already has it.
pub fn add_farm_checked<R: FarmRepository + ?Sized>(
    repository: &R,
    farm: Farm,
) -> Result<FarmAddResult> {
    if repository.is_farm_duplicate(&farm)? {
        let message = format!(
            "Duplicate farm: {}, Site ID: {}. Needs update.",
            farm.farmer_name, farm.site_id
        );
        return Ok(FarmAddResult {
            success: false,
            message,
            farm,
        });
    }
    let farm = repository.add_farm(farm)?;
    Ok(FarmAddResult {
        success: true,
        message: "Farm added successfully".to_string(),
        farm,
    })
}
