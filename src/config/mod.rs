// trasa-backup/src/config/mod.rs
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CERTS_DIR: &str = "/etc/trasa/certs";
const DEFAULT_DATABASE_NAME: &str = "trasadb";
const DEFAULT_DUMP_PROGRAM: &str = "cockroach";

// Structs for deserializing config.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonDatabaseConfig {
    pub ssl_enabled: Option<bool>,
    pub server: Option<String>,
    pub port: Option<String>,
    pub certs_dir: Option<PathBuf>,
    pub name: Option<String>,
    pub dump_program: Option<String>,
    pub dump_program_args: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawJsonConfig {
    pub backup_root: Option<PathBuf>,
    pub metadata_database_url: Option<String>,
    pub database: Option<JsonDatabaseConfig>,
    pub dump_timeout_secs: Option<u64>,
    pub archive_format: Option<ArchiveFormat>,
    pub on_archive_failure: Option<ArchiveFailurePolicy>,
    pub organizations: Option<HashMap<String, String>>,
}

/// Container format of the downloadable artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveFormat {
    #[default]
    Zip,
    TarGz,
}

impl ArchiveFormat {
    /// Stored form, identical to the config spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::TarGz => "tar_gz",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::TarGz => "tar.gz",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "application/zip",
            ArchiveFormat::TarGz => "application/gzip",
        }
    }
}

impl FromStr for ArchiveFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "zip" => Ok(ArchiveFormat::Zip),
            "tar_gz" => Ok(ArchiveFormat::TarGz),
            other => Err(format!("unknown archive format: {}", other)),
        }
    }
}

/// What a take-backup run does when packaging the dump directory fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveFailurePolicy {
    /// Fail the run; no metadata is recorded.
    #[default]
    Abort,
    /// Log the failure and record metadata anyway.
    Record,
}

// Application's internal configuration structs
#[derive(Debug, Clone)]
pub enum TransportMode {
    Insecure,
    Secure { certs_dir: PathBuf, host: String, port: String },
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub name: String,
    pub transport: TransportMode,
    pub dump_program: String,
    pub dump_program_args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backup_root: PathBuf,
    pub metadata_database_url: String,
    pub database: DatabaseConfig,
    pub dump_timeout: Option<Duration>,
    pub archive_format: ArchiveFormat,
    pub on_archive_failure: ArchiveFailurePolicy,
    /// Organization id to IANA timezone identifier.
    pub organizations: HashMap<String, String>,
}

impl AppConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        Self::from_json_str(&config_content).with_context(|| {
            format!(
                "Failed to load configuration from {}",
                config_path.display()
            )
        })
    }

    pub fn from_json_str(config_content: &str) -> Result<Self> {
        let raw_json_config: RawJsonConfig =
            serde_json::from_str(config_content).context("Failed to parse configuration JSON")?;
        Self::from_raw(raw_json_config)
    }

    fn from_raw(raw: RawJsonConfig) -> Result<Self> {
        let backup_root = raw
            .backup_root
            .context("backup_root must be set in config.json")?;
        if backup_root.as_os_str().is_empty() {
            anyhow::bail!("backup_root cannot be empty in config.json.");
        }

        let metadata_database_url = raw
            .metadata_database_url
            .filter(|url| !url.trim().is_empty())
            .context("metadata_database_url must be set in config.json")?;

        let database = parse_database_config(raw.database.unwrap_or_default())?;

        let dump_timeout = match raw.dump_timeout_secs {
            Some(0) => anyhow::bail!("dump_timeout_secs must be greater than zero when set"),
            Some(secs) => Some(Duration::from_secs(secs)),
            None => None,
        };

        Ok(AppConfig {
            backup_root,
            metadata_database_url,
            database,
            dump_timeout,
            archive_format: raw.archive_format.unwrap_or_default(),
            on_archive_failure: raw.on_archive_failure.unwrap_or_default(),
            organizations: raw.organizations.unwrap_or_default(),
        })
    }
}

/// Builds the dump target description. Secured transport needs an explicit host and port.
fn parse_database_config(raw: JsonDatabaseConfig) -> Result<DatabaseConfig> {
    let transport = if raw.ssl_enabled.unwrap_or(false) {
        let host = raw
            .server
            .filter(|s| !s.trim().is_empty())
            .context("database.server must be set when database.ssl_enabled is true")?;
        let port = raw
            .port
            .filter(|s| !s.trim().is_empty())
            .context("database.port must be set when database.ssl_enabled is true")?;
        TransportMode::Secure {
            certs_dir: raw.certs_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_CERTS_DIR)),
            host,
            port,
        }
    } else {
        TransportMode::Insecure
    };

    Ok(DatabaseConfig {
        name: raw
            .name
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_DATABASE_NAME.to_string()),
        transport,
        dump_program: raw
            .dump_program
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_DUMP_PROGRAM.to_string()),
        dump_program_args: raw.dump_program_args.unwrap_or_default(),
    })
}
