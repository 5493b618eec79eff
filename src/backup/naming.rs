// trasa-backup/src/backup/naming.rs
use chrono::{DateTime, SecondsFormat, Utc};
use chrono_tz::Tz;
use std::path::{Path, PathBuf};

use crate::config::ArchiveFormat;
use crate::errors::{BackupError, Result};

pub const BACKUP_NAME_PREFIX: &str = "trasa-backup";

/// Resolves an IANA timezone identifier. An empty or unknown zone is a configuration error.
pub fn resolve_timezone(timezone: &str) -> Result<Tz> {
    let timezone = timezone.trim();
    if timezone.is_empty() {
        return Err(BackupError::config("organization timezone is not set"));
    }
    timezone
        .parse::<Tz>()
        .map_err(|e| BackupError::config(format!("invalid timezone {:?}: {}", timezone, e)))
}

/// Derives `trasa-backup-<RFC3339 timestamp in the org timezone>`.
///
/// Names sort by creation time within one timezone. Resolution is one second,
/// so two runs for the same organization inside the same second share a name.
pub fn generate_name(reference_time: DateTime<Utc>, timezone: &str) -> Result<String> {
    let tz = resolve_timezone(timezone)?;
    let local = reference_time.with_timezone(&tz);
    Ok(format!(
        "{}-{}",
        BACKUP_NAME_PREFIX,
        local.to_rfc3339_opts(SecondsFormat::Secs, true)
    ))
}

/// Working directory holding the raw dump of a backup.
pub fn backup_dir(backup_root: &Path, name: &str) -> PathBuf {
    backup_root.join(name)
}

/// Downloadable artifact of a backup, a sibling of its working directory.
pub fn artifact_path(backup_root: &Path, name: &str, format: ArchiveFormat) -> PathBuf {
    backup_root.join(artifact_file_name(name, format))
}

pub fn artifact_file_name(name: &str, format: ArchiveFormat) -> String {
    format!("{}.{}", name, format.extension())
}
