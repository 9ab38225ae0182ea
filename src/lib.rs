//! Offline-first farm records: file import with duplicate reconciliation,
//! server restore, periodic upload and export.

pub mod client;
pub mod config;
pub mod error;
pub mod geometry;
pub mod import;
pub mod models;
pub mod reconcile;
pub mod restore;
pub mod storage;
pub mod sync;
pub mod templates;

pub use error::{CollectorError, Result};
pub use storage::{FarmRepository, LocalStore};
