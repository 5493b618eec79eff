// trasa-backup/src/backup/logic.rs
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;
use tracing::{error, info, info_span, warn, Instrument};

use super::archive::archive_directory;
use super::db_dump::DumpExecutor;
use super::naming;
use crate::config::{AppConfig, ArchiveFailurePolicy};
use crate::errors::{BackupError, Result};
use crate::metadata::MetadataStore;
use crate::models::Backup;
use crate::response::{ArtifactDownload, BackupListing};

/// Stages of a take-backup run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupStage {
    Requested,
    Naming,
    Dumping,
    Archiving,
    Persisting,
    Completed,
    Failed,
}

impl fmt::Display for BackupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackupStage::Requested => "requested",
            BackupStage::Naming => "naming",
            BackupStage::Dumping => "dumping",
            BackupStage::Archiving => "archiving",
            BackupStage::Persisting => "persisting",
            BackupStage::Completed => "completed",
            BackupStage::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Sequences naming, dumping, archiving and metadata persistence, and serves
/// listings and artifacts back to the owning organization.
#[derive(Debug, Clone)]
pub struct BackupOrchestrator {
    config: AppConfig,
    executor: DumpExecutor,
    store: MetadataStore,
}

impl BackupOrchestrator {
    pub fn new(config: AppConfig, store: MetadataStore) -> Self {
        let executor = DumpExecutor::new(config.database.clone(), config.dump_timeout);
        Self { config, executor, store }
    }

    /// Takes a system backup for `org_id` and returns the organization's full listing.
    pub async fn take_backup(&self, org_id: &str) -> Result<Vec<Backup>> {
        self.take_backup_at(org_id, Utc::now()).await
    }

    pub async fn take_backup_at(&self, org_id: &str, now: DateTime<Utc>) -> Result<Vec<Backup>> {
        let span = info_span!("take_backup", org_id = %org_id);
        async {
            let mut stage = BackupStage::Requested;
            let result = self.run_take_backup(org_id, now, &mut stage).await;
            if let Err(e) = &result {
                error!(stage = %stage, error = %e, "Backup run failed");
                stage = BackupStage::Failed;
            }
            info!(stage = %stage, "Backup run finished");
            result
        }
        .instrument(span)
        .await
    }

    async fn run_take_backup(
        &self,
        org_id: &str,
        now: DateTime<Utc>,
        stage: &mut BackupStage,
    ) -> Result<Vec<Backup>> {
        let timezone = self.timezone_for(org_id)?;

        *stage = BackupStage::Naming;
        let name = naming::generate_name(now, timezone)?;
        let backup_dir = naming::backup_dir(&self.config.backup_root, &name);
        let artifact =
            naming::artifact_path(&self.config.backup_root, &name, self.config.archive_format);
        info!(stage = %stage, backup_name = %name, "Allocated backup name");

        *stage = BackupStage::Dumping;
        let dump = self.executor.run_dump(&backup_dir).await?;
        info!(
            stage = %stage,
            dump_file = %dump.dump_file.display(),
            bytes = dump.bytes_written,
            "Dump written"
        );

        *stage = BackupStage::Archiving;
        if let Err(e) = self.archive(backup_dir, artifact).await {
            match self.config.on_archive_failure {
                ArchiveFailurePolicy::Abort => return Err(e),
                ArchiveFailurePolicy::Record => {
                    warn!(stage = %stage, error = %e, "Archive failed, recording metadata anyway");
                }
            }
        }

        *stage = BackupStage::Persisting;
        let backup = Backup::system(name, org_id, now.timestamp(), self.config.archive_format);
        self.store.put(&backup).await?;
        info!(stage = %stage, backup_id = %backup.id, backup_name = %backup.name, "Backup metadata stored");

        *stage = BackupStage::Completed;
        self.store.list_by_org(org_id).await
    }

    async fn archive(&self, backup_dir: PathBuf, artifact: PathBuf) -> Result<()> {
        let format = self.config.archive_format;
        tokio::task::spawn_blocking(move || archive_directory(format, &backup_dir, &artifact))
            .await
            .map_err(|e| BackupError::Archive(anyhow::anyhow!("archive task failed: {}", e)))?
            .map_err(BackupError::Archive)?;
        Ok(())
    }

    fn timezone_for(&self, org_id: &str) -> Result<&str> {
        self.config
            .organizations
            .get(org_id)
            .map(String::as_str)
            .ok_or_else(|| BackupError::config(format!("organization {} not found", org_id)))
    }

    /// Full listing, or the newest record with a total count when `latest_only` is set.
    pub async fn list_backups(&self, org_id: &str, latest_only: bool) -> Result<BackupListing> {
        let log_failure = |e: &BackupError| {
            error!(org_id = %org_id, error = %e, "Failed to list backups");
        };

        if latest_only {
            let total = self.store.count_by_org(org_id).await.inspect_err(log_failure)?;
            let backup = self.store.latest_by_org(org_id).await.inspect_err(log_failure)?;
            let total = usize::try_from(total)
                .map_err(|_| BackupError::store(format!("invalid backup count {}", total)))?;
            return Ok(BackupListing::Latest { backup, total });
        }

        let backups = self.store.list_by_org(org_id).await.inspect_err(log_failure)?;
        Ok(BackupListing::All(backups))
    }

    /// Resolves the artifact of `backup_id` for `org_id`. The metadata store is always
    /// consulted first, so records of other organizations are never served.
    pub async fn download_artifact(&self, backup_id: &str, org_id: &str) -> Result<ArtifactDownload> {
        let backup = self.store.get_one(backup_id, org_id).await.inspect_err(|e| {
            error!(backup_id = %backup_id, org_id = %org_id, error = %e, "Failed to fetch backup meta");
        })?;

        let format = backup.archive_format;
        let path = naming::artifact_path(&self.config.backup_root, &backup.name, format);
        tracing::trace!(path = %path.display(), "Backup file resolved");

        let missing = |e: std::io::Error| {
            error!(backup_id = %backup_id, path = %path.display(), error = %e, "Backup artifact unavailable");
            BackupError::ArtifactNotFound { path: path.clone() }
        };
        let file = tokio::fs::File::open(&path).await.map_err(missing)?;
        let metadata = file.metadata().await.map_err(missing)?;
        if !metadata.is_file() {
            return Err(BackupError::ArtifactNotFound { path });
        }

        Ok(ArtifactDownload {
            file_name: naming::artifact_file_name(&backup.name, format),
            content_type: format.content_type(),
            content_length: metadata.len(),
            path,
            file,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::db_dump::DUMP_FILE_NAME;
    use crate::config::ArchiveFormat;
    use chrono::TimeZone;
    use serde_json::json;
    use std::fs;
    use std::io::Read;
    use std::path::Path;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    const OK_DUMP: &str = "echo \"-- args: $*\"\necho 'CREATE TABLE users (id INT);'\n";
    const FAILING_DUMP: &str = "echo 'partial'\necho 'boom' >&2\nexit 1\n";
    // numbers its runs in a counter file next to the script
    const COUNTING_DUMP: &str = "runs=\"$(dirname \"$0\")/runs\"\n\
        n=$(( $(cat \"$runs\" 2>/dev/null || echo 0) + 1 ))\n\
        echo \"$n\" > \"$runs\"\n\
        echo \"run-$n\"\n";

    struct Fixture {
        _tmp: TempDir,
        root: PathBuf,
        orchestrator: BackupOrchestrator,
    }

    async fn fixture_with(script: &str, extra: serde_json::Value) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let script_path = tmp.path().join("fake-cockroach.sh");
        fs::write(&script_path, script).unwrap();
        let root = tmp.path().join("backup");

        let mut config = json!({
            "backup_root": root,
            "metadata_database_url": "sqlite::memory:",
            "database": {
                "dump_program": "sh",
                "dump_program_args": [script_path]
            },
            "organizations": {
                "org-1": "Asia/Kathmandu",
                "org-2": "UTC",
                "org-bad": "Not/A_Zone"
            }
        });
        if let (Some(base), Some(extra)) = (config.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }

        let config = AppConfig::from_json_str(&config.to_string()).unwrap();
        let store = MetadataStore::connect(&config.metadata_database_url).await.unwrap();
        Fixture {
            _tmp: tmp,
            root,
            orchestrator: BackupOrchestrator::new(config, store),
        }
    }

    async fn fixture(script: &str) -> Fixture {
        fixture_with(script, json!({})).await
    }

    fn kathmandu_ten_am() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 4, 15, 0).unwrap()
    }

    fn read_zip_entry(path: &Path, entry: &str) -> anyhow::Result<String> {
        let mut zip = zip::ZipArchive::new(fs::File::open(path)?)?;
        let mut contents = String::new();
        zip.by_name(entry)?.read_to_string(&mut contents)?;
        Ok(contents)
    }

    #[tokio::test]
    async fn test_take_backup_kathmandu_scenario() -> anyhow::Result<()> {
        let fx = fixture(OK_DUMP).await;

        let listing = fx.orchestrator.take_backup_at("org-1", kathmandu_ten_am()).await?;

        assert_eq!(listing.len(), 1);
        let backup = &listing[0];
        assert_eq!(backup.name, "trasa-backup-2024-01-01T10:00:00+05:45");
        assert_eq!(backup.backup_type, crate::models::BackupType::System);
        assert_eq!(backup.org_id, "org-1");
        assert_eq!(backup.created_at, kathmandu_ten_am().timestamp());

        let dump = fx.root.join(&backup.name).join(DUMP_FILE_NAME);
        assert!(dump.is_file());
        let artifact = fx.root.join(format!("{}.zip", backup.name));
        assert!(fs::metadata(&artifact)?.len() > 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_download_round_trip_contains_dump() -> anyhow::Result<()> {
        let fx = fixture(OK_DUMP).await;
        let listing = fx.orchestrator.take_backup_at("org-1", kathmandu_ten_am()).await?;
        let backup = &listing[0];

        let mut download = fx.orchestrator.download_artifact(&backup.id, "org-1").await?;
        assert_eq!(download.content_type, "application/zip");
        assert_eq!(
            download.content_disposition(),
            "attachment; filename=trasa-backup-2024-01-01T10:00:00+05:45.zip"
        );

        let mut bytes = Vec::new();
        download.file.read_to_end(&mut bytes).await?;
        assert_eq!(bytes.len() as u64, download.content_length);

        let copy = fx.root.join("downloaded.zip");
        fs::write(&copy, &bytes)?;
        let dumped = fs::read_to_string(fx.root.join(&backup.name).join(DUMP_FILE_NAME))?;
        let unpacked = read_zip_entry(&copy, &format!("{}/{}", backup.name, DUMP_FILE_NAME))?;
        assert_eq!(unpacked, dumped);
        assert!(unpacked.contains("-- args: dump trasadb --insecure"));
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_timezone_writes_nothing() -> anyhow::Result<()> {
        let fx = fixture(OK_DUMP).await;

        let err = fx.orchestrator.take_backup_at("org-bad", Utc::now()).await.unwrap_err();

        assert!(matches!(err, BackupError::Config(_)));
        assert!(!fx.root.exists());
        assert!(fx.orchestrator.store.list_by_org("org-bad").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_org_is_config_error() -> anyhow::Result<()> {
        let fx = fixture(OK_DUMP).await;
        let err = fx.orchestrator.take_backup("org-unknown").await.unwrap_err();
        assert!(matches!(err, BackupError::Config(_)));
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_dump_records_nothing_but_keeps_directory() -> anyhow::Result<()> {
        let fx = fixture(FAILING_DUMP).await;

        let err = fx.orchestrator.take_backup_at("org-1", kathmandu_ten_am()).await.unwrap_err();

        assert!(matches!(err, BackupError::Dump(_)));
        assert!(fx.root.join("trasa-backup-2024-01-01T10:00:00+05:45").is_dir());
        assert!(!fx.root.join("trasa-backup-2024-01-01T10:00:00+05:45.zip").exists());
        assert!(fx.orchestrator.store.list_by_org("org-1").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_same_second_collision_is_store_error() -> anyhow::Result<()> {
        let fx = fixture(OK_DUMP).await;
        let now = kathmandu_ten_am();

        fx.orchestrator.take_backup_at("org-1", now).await?;
        let err = fx.orchestrator.take_backup_at("org-1", now).await.unwrap_err();

        assert!(matches!(err, BackupError::Store(_)));
        assert_eq!(fx.orchestrator.store.list_by_org("org-1").await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_same_second_collision_leaves_first_backup_intact() -> anyhow::Result<()> {
        let fx = fixture(COUNTING_DUMP).await;
        let now = kathmandu_ten_am();

        let first = fx.orchestrator.take_backup_at("org-1", now).await?;
        let err = fx.orchestrator.take_backup_at("org-1", now).await.unwrap_err();
        assert!(matches!(err, BackupError::Store(_)));

        let name = &first[0].name;
        let dump = fs::read_to_string(fx.root.join(name).join(DUMP_FILE_NAME))?;
        assert_eq!(dump, "run-1\n");

        let download = fx.orchestrator.download_artifact(&first[0].id, "org-1").await?;
        let unpacked = read_zip_entry(&download.path, &format!("{}/{}", name, DUMP_FILE_NAME))?;
        assert_eq!(unpacked, "run-1\n");
        assert_eq!(fx.orchestrator.store.count_by_org("org-1").await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_archive_failure_aborts_by_default() -> anyhow::Result<()> {
        let fx = fixture(OK_DUMP).await;
        // a directory squatting on the artifact path makes archiving fail
        fs::create_dir_all(fx.root.join("trasa-backup-2024-01-01T10:00:00+05:45.zip"))?;

        let err = fx.orchestrator.take_backup_at("org-1", kathmandu_ten_am()).await.unwrap_err();

        assert!(matches!(err, BackupError::Archive(_)));
        assert!(fx.orchestrator.store.list_by_org("org-1").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_archive_failure_recorded_when_tolerated() -> anyhow::Result<()> {
        let fx = fixture_with(OK_DUMP, json!({ "on_archive_failure": "record" })).await;
        fs::create_dir_all(fx.root.join("trasa-backup-2024-01-01T10:00:00+05:45.zip"))?;

        let listing = fx.orchestrator.take_backup_at("org-1", kathmandu_ten_am()).await?;
        assert_eq!(listing.len(), 1);

        let err = fx.orchestrator.download_artifact(&listing[0].id, "org-1").await.unwrap_err();
        assert!(matches!(err, BackupError::ArtifactNotFound { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_tar_gz_format_download_headers() -> anyhow::Result<()> {
        let fx = fixture_with(OK_DUMP, json!({ "archive_format": "tar_gz" })).await;
        let listing = fx.orchestrator.take_backup_at("org-2", kathmandu_ten_am()).await?;

        let download = fx.orchestrator.download_artifact(&listing[0].id, "org-2").await?;
        assert_eq!(download.content_type, "application/gzip");
        assert_eq!(download.file_name, "trasa-backup-2024-01-01T04:15:00Z.tar.gz");
        assert!(download.path.is_file());
        Ok(())
    }

    #[tokio::test]
    async fn test_download_follows_recorded_format_after_config_change() -> anyhow::Result<()> {
        let fx = fixture(OK_DUMP).await;
        let listing = fx.orchestrator.take_backup_at("org-1", kathmandu_ten_am()).await?;
        assert_eq!(listing[0].archive_format, ArchiveFormat::Zip);

        let mut reconfigured = fx.orchestrator.clone();
        reconfigured.config.archive_format = ArchiveFormat::TarGz;

        let download = reconfigured.download_artifact(&listing[0].id, "org-1").await?;
        assert_eq!(download.content_type, "application/zip");
        assert_eq!(download.file_name, "trasa-backup-2024-01-01T10:00:00+05:45.zip");
        assert!(download.path.is_file());
        Ok(())
    }

    #[tokio::test]
    async fn test_listing_is_org_scoped_and_latest_has_count() -> anyhow::Result<()> {
        let fx = fixture(OK_DUMP).await;
        let base = kathmandu_ten_am();
        fx.orchestrator.take_backup_at("org-1", base).await?;
        fx.orchestrator
            .take_backup_at("org-1", base + chrono::Duration::seconds(120))
            .await?;
        let full = fx
            .orchestrator
            .take_backup_at("org-1", base + chrono::Duration::seconds(60))
            .await?;
        fx.orchestrator.take_backup_at("org-2", base).await?;

        assert_eq!(full.len(), 3);
        assert!(full.iter().all(|b| b.org_id == "org-1"));

        match fx.orchestrator.list_backups("org-1", true).await? {
            BackupListing::Latest { backup: Some(latest), total } => {
                assert_eq!(total, 3);
                assert_eq!(latest.created_at, (base + chrono::Duration::seconds(120)).timestamp());
                assert_eq!(latest.name, "trasa-backup-2024-01-01T10:02:00+05:45");
            }
            other => panic!("unexpected listing {:?}", other),
        }

        match fx.orchestrator.list_backups("org-2", false).await? {
            BackupListing::All(backups) => {
                assert_eq!(backups.len(), 1);
                assert_eq!(backups[0].org_id, "org-2");
            }
            other => panic!("unexpected listing {:?}", other),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_latest_for_org_without_backups() -> anyhow::Result<()> {
        let fx = fixture(OK_DUMP).await;
        assert_eq!(
            fx.orchestrator.list_backups("org-1", true).await?,
            BackupListing::Latest { backup: None, total: 0 }
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_download_rejects_other_org() -> anyhow::Result<()> {
        let fx = fixture(OK_DUMP).await;
        let listing = fx.orchestrator.take_backup_at("org-2", kathmandu_ten_am()).await?;

        let err = fx.orchestrator.download_artifact(&listing[0].id, "org-1").await.unwrap_err();
        assert!(matches!(err, BackupError::BackupNotFound { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_download_missing_file_is_distinct_from_missing_record() -> anyhow::Result<()> {
        let fx = fixture(OK_DUMP).await;
        let listing = fx.orchestrator.take_backup_at("org-1", kathmandu_ten_am()).await?;
        fs::remove_file(fx.root.join(format!("{}.zip", listing[0].name)))?;

        let err = fx.orchestrator.download_artifact(&listing[0].id, "org-1").await.unwrap_err();
        assert!(matches!(err, BackupError::ArtifactNotFound { .. }));

        let err = fx.orchestrator.download_artifact("no-such-id", "org-1").await.unwrap_err();
        assert!(matches!(err, BackupError::BackupNotFound { .. }));
        Ok(())
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(BackupStage::Dumping.to_string(), "dumping");
        assert_eq!(BackupStage::Failed.to_string(), "failed");
    }
}
