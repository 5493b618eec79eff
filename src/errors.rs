use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dump failed: {0}")]
    Dump(String),

    #[error("Dump timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),

    #[error("Archive failed: {0:#}")]
    Archive(anyhow::Error),

    #[error("Metadata store error: {0}")]
    Store(String),

    #[error("Backup {backup_id} not found")]
    BackupNotFound { backup_id: String },

    #[error("Backup artifact not found: {}", path.display())]
    ArtifactNotFound { path: PathBuf },
}

/// Coarse error category, used when a failure is reported outside the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Dump,
    Timeout,
    Archive,
    Store,
    NotFound,
}

impl BackupError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    pub fn dump<S: Into<String>>(msg: S) -> Self {
        Self::Dump(msg.into())
    }

    pub fn store<S: Into<String>>(msg: S) -> Self {
        Self::Store(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::Dump(_) => ErrorKind::Dump,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Archive(_) => ErrorKind::Archive,
            Self::Store(_) => ErrorKind::Store,
            Self::BackupNotFound { .. } | Self::ArtifactNotFound { .. } => ErrorKind::NotFound,
        }
    }
}

impl From<sqlx::Error> for BackupError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                BackupError::Store(format!("backup already recorded: {}", db_err.message()))
            }
            _ => BackupError::Store(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
