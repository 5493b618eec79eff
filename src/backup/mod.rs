pub mod archive;
pub mod db_dump;
pub mod logic;
pub mod naming;

pub use logic::{BackupOrchestrator, BackupStage};
