//! Backup orchestration and retrieval
//!
//! Takes consistent snapshots of the store through its dump tool, packages them
//! into downloadable artifacts and keeps org-scoped metadata about each run.

pub mod backup;
pub mod config;
pub mod errors;
pub mod logging;
pub mod metadata;
pub mod models;
pub mod response;
pub mod utils;

pub use backup::{BackupOrchestrator, BackupStage};
pub use config::AppConfig;
pub use errors::{BackupError, ErrorKind};
pub use metadata::MetadataStore;
pub use models::{Backup, BackupType};
