pub mod restore;
pub mod results;
pub mod serde_helpers;
pub mod v1;

// ===== VERSIONED MODELS FOLLOWING NATIVE_DB PATTERN =====
// Persisted models are versioned with native_model; new versions go in a new
// module and the aliases below move to them.

pub mod data {
    pub type Farm = super::v1::Farm;
    pub type CollectionSite = super::v1::CollectionSite;

    pub use super::v1;
}

pub use data::*;

pub use restore::{
    CollectionSiteRestore, FarmRequest, FarmRestore, ServerFarmResponse, DEFAULT_MEMBER_ID,
};
pub use results::{FarmAddResult, ImportResult, RestoreStatus, SyncReport};
pub use v1::UNKNOWN_COORDINATE;
