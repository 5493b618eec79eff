use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::ArchiveFormat;

/// Kind of snapshot a backup record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupType {
    System,
}

impl BackupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupType::System => "SYSTEM",
        }
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SYSTEM" => Ok(BackupType::System),
            other => Err(format!("unknown backup type: {}", other)),
        }
    }
}

/// Metadata of one completed snapshot run. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backup {
    #[serde(rename = "backupID")]
    pub id: String,
    /// Base name of the dump directory and the downloadable artifact.
    #[serde(rename = "backupName")]
    pub name: String,
    #[serde(rename = "backupType")]
    pub backup_type: BackupType,
    #[serde(rename = "orgID")]
    pub org_id: String,
    /// Epoch seconds.
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    /// Container the artifact was written in. Downloads follow this, not the current config.
    #[serde(rename = "archiveFormat")]
    pub archive_format: ArchiveFormat,
}

impl Backup {
    /// New system backup record with a fresh v4 id.
    pub fn system(
        name: impl Into<String>,
        org_id: impl Into<String>,
        created_at: i64,
        archive_format: ArchiveFormat,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            backup_type: BackupType::System,
            org_id: org_id.into(),
            created_at,
            archive_format,
        }
    }
}
