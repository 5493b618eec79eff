// trasa-backup/src/metadata/mod.rs
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use tracing::debug;

use crate::config::ArchiveFormat;
use crate::errors::{BackupError, Result};
use crate::models::{Backup, BackupType};

const BACKUP_COLUMNS: &str = "id, name, backup_type, org_id, created_at, archive_format";

const CREATE_BACKUPS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS backups (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        backup_type TEXT NOT NULL,
        org_id TEXT NOT NULL,
        created_at BIGINT NOT NULL,
        archive_format TEXT NOT NULL,
        UNIQUE (org_id, name)
    )
"#;

/// Durable record of completed backups, scoped by organization.
///
/// Uniqueness of `id` and of `(org_id, name)` is enforced by the database,
/// so concurrent inserts for the same name fail cleanly instead of overwriting.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    pool: AnyPool,
}

impl MetadataStore {
    /// Connects to `database_url` (postgres or sqlite) and ensures the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self> {
        sqlx::any::install_default_drivers();

        let mut options = AnyPoolOptions::new();
        if database_url.starts_with("sqlite::memory:") {
            // every connection to an in-memory database is a separate database
            options = options.max_connections(1).idle_timeout(None).max_lifetime(None);
        } else {
            options = options.max_connections(5);
        }

        let pool = options.connect(database_url).await.map_err(|e| {
            BackupError::store(format!("Failed to connect to metadata database: {}", e))
        })?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(CREATE_BACKUPS_TABLE).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn put(&self, backup: &Backup) -> Result<()> {
        sqlx::query(
            "INSERT INTO backups (id, name, backup_type, org_id, created_at, archive_format) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(backup.id.as_str())
        .bind(backup.name.as_str())
        .bind(backup.backup_type.as_str())
        .bind(backup.org_id.as_str())
        .bind(backup.created_at)
        .bind(backup.archive_format.as_str())
        .execute(&self.pool)
        .await?;
        debug!(backup_id = %backup.id, org_id = %backup.org_id, "Stored backup metadata");
        Ok(())
    }

    /// All backups of an organization, newest first.
    pub async fn list_by_org(&self, org_id: &str) -> Result<Vec<Backup>> {
        let query = format!(
            "SELECT {} FROM backups WHERE org_id = $1 ORDER BY created_at DESC, name DESC",
            BACKUP_COLUMNS
        );
        let rows = sqlx::query(&query).bind(org_id).fetch_all(&self.pool).await?;

        rows.iter().map(backup_from_row).collect()
    }

    /// Newest backup of an organization, if any. Same ordering as `list_by_org`.
    pub async fn latest_by_org(&self, org_id: &str) -> Result<Option<Backup>> {
        let query = format!(
            "SELECT {} FROM backups WHERE org_id = $1 ORDER BY created_at DESC, name DESC LIMIT 1",
            BACKUP_COLUMNS
        );
        let row = sqlx::query(&query).bind(org_id).fetch_optional(&self.pool).await?;

        row.as_ref().map(backup_from_row).transpose()
    }

    pub async fn count_by_org(&self, org_id: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM backups WHERE org_id = $1")
            .bind(org_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("total")?)
    }

    /// Point lookup. A backup owned by another organization is reported as not found.
    pub async fn get_one(&self, backup_id: &str, org_id: &str) -> Result<Backup> {
        let query = format!("SELECT {} FROM backups WHERE id = $1 AND org_id = $2", BACKUP_COLUMNS);
        let row = sqlx::query(&query)
            .bind(backup_id)
            .bind(org_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => backup_from_row(&row),
            None => Err(BackupError::BackupNotFound {
                backup_id: backup_id.to_string(),
            }),
        }
    }
}

fn backup_from_row(row: &AnyRow) -> Result<Backup> {
    let backup_type: String = row.try_get("backup_type")?;
    let archive_format: String = row.try_get("archive_format")?;
    Ok(Backup {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        backup_type: backup_type.parse::<BackupType>().map_err(BackupError::Store)?,
        org_id: row.try_get("org_id")?,
        created_at: row.try_get("created_at")?,
        archive_format: archive_format.parse::<ArchiveFormat>().map_err(BackupError::Store)?,
    })
}
