use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;

use crate::errors::{BackupError, ErrorKind};
use crate::models::Backup;

pub const INTENT_BACKUP_TAKEN: &str = "Backup taken";
pub const INTENT_BACKUP_NOT_TAKEN: &str = "Backup not taken";
pub const INTENT_GET_BACKUPS: &str = "GetBackups";
pub const INTENT_DOWNLOAD_BACKUP: &str = "DownloadBackup";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Failed,
}

/// Uniform envelope returned for every operation.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse {
    pub status: Status,
    pub reason: String,
    pub intent: String,
    pub data: Vec<Value>,
}

impl ApiResponse {
    pub fn success(reason: &str, intent: &str, data: Vec<Value>) -> Self {
        Self {
            status: Status::Success,
            reason: reason.to_string(),
            intent: intent.to_string(),
            data,
        }
    }

    /// Failure envelope. Only a short category message is exposed.
    pub fn failure(err: &BackupError, intent: &str) -> Self {
        Self {
            status: Status::Failed,
            reason: failure_reason(err).to_string(),
            intent: intent.to_string(),
            data: Vec::new(),
        }
    }
}

pub fn failure_reason(err: &BackupError) -> &'static str {
    match err {
        BackupError::ArtifactNotFound { .. } => "backup file not found",
        _ => match err.kind() {
            ErrorKind::Config => "invalid organization configuration",
            ErrorKind::Dump => "failed to take backup",
            ErrorKind::Timeout => "backup timed out",
            ErrorKind::Archive => "failed to archive backup",
            ErrorKind::Store => "failed to store backup meta",
            ErrorKind::NotFound => "backup not found",
        },
    }
}

/// Result of a list request.
#[derive(Debug, Clone, PartialEq)]
pub enum BackupListing {
    All(Vec<Backup>),
    /// Newest record, if any, with the organization's total record count.
    Latest { backup: Option<Backup>, total: usize },
}

impl BackupListing {
    pub fn into_data(self) -> Vec<Value> {
        match self {
            BackupListing::All(backups) => vec![serde_json::json!(backups)],
            BackupListing::Latest { backup, total } => {
                vec![serde_json::json!(backup), serde_json::json!(total)]
            }
        }
    }
}

/// Everything needed to serve a backup artifact as an attachment.
#[derive(Debug)]
pub struct ArtifactDownload {
    pub path: PathBuf,
    pub file_name: String,
    pub content_type: &'static str,
    pub content_length: u64,
    pub file: tokio::fs::File,
}

impl ArtifactDownload {
    pub fn content_disposition(&self) -> String {
        format!("attachment; filename={}", self.file_name)
    }

    pub fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Content-Disposition", self.content_disposition()),
            ("Content-Type", self.content_type.to_string()),
            ("Content-Length", self.content_length.to_string()),
        ]
    }
}
