use serde::{Deserialize, Serialize};

use super::v1::Farm;

/// Outcome of one file import, handed back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportResult {
    pub success: bool,
    pub message: String,
    pub imported_farms: Vec<Farm>,
    pub duplicate_farms: Vec<String>,
    pub farms_needing_update: Vec<Farm>,
    pub invalid_farms: Vec<String>,
}

impl ImportResult {
    pub fn failure(message: String) -> Self {
        Self {
            success: false,
            message,
            imported_farms: Vec::new(),
            duplicate_farms: Vec::new(),
            farms_needing_update: Vec::new(),
            invalid_farms: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FarmAddResult {
    pub success: bool,
    pub message: String,
    pub farm: Farm,
}

/// Progress of a server restore. Observers only ever see the latest value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RestoreStatus {
    InProgress,
    Success {
        added_count: usize,
        sites_created: usize,
        message: String,
    },
    Error {
        message: String,
    },
}

impl RestoreStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, RestoreStatus::InProgress)
    }
}

/// Counts from one upload pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub sites: usize,
    pub farms: usize,
}
