// trasa-backup/src/backup/db_dump.rs
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{DatabaseConfig, TransportMode};
use crate::errors::{BackupError, Result};
use crate::utils::find_dump_executable;

/// File inside the backup directory that receives the raw dump stream.
pub const DUMP_FILE_NAME: &str = "cockroach-back.sql";

/// Bytes of the dump tool's stderr kept for the error message.
const STDERR_CAPTURE_LIMIT: u64 = 64 * 1024;

#[derive(Debug, Clone)]
pub struct DumpOutcome {
    pub dump_file: PathBuf,
    pub bytes_written: u64,
}

/// Runs the external dump tool and streams its stdout into the backup directory.
#[derive(Debug, Clone)]
pub struct DumpExecutor {
    database: DatabaseConfig,
    timeout: Option<Duration>,
}

impl DumpExecutor {
    pub fn new(database: DatabaseConfig, timeout: Option<Duration>) -> Self {
        Self { database, timeout }
    }

    /// Arguments passed to the dump program, selected by transport mode.
    pub fn dump_args(&self) -> Vec<String> {
        let mut args = self.database.dump_program_args.clone();
        args.push("dump".to_string());
        args.push(self.database.name.clone());
        match &self.database.transport {
            TransportMode::Insecure => args.push("--insecure".to_string()),
            TransportMode::Secure { certs_dir, host, port } => {
                args.push(format!("--certs-dir={}", certs_dir.display()));
                args.push(format!("--host={}:{}", host, port));
            }
        }
        args
    }

    /// Dumps the database into `target_dir`, which must not exist yet.
    ///
    /// The stdout pipe is drained concurrently with the wait for exit, and both
    /// are joined before returning. On failure the directory and any partial
    /// dump are left in place. An existing `target_dir` belongs to another run
    /// and is reported as a store conflict without touching it.
    pub async fn run_dump(&self, target_dir: &Path) -> Result<DumpOutcome> {
        create_backup_dir(target_dir).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                BackupError::store(format!(
                    "backup directory {} already exists",
                    target_dir.display()
                ))
            } else {
                BackupError::dump(format!(
                    "Failed to create backup directory {}: {}",
                    target_dir.display(),
                    e
                ))
            }
        })?;

        let program = find_dump_executable(&self.database.dump_program)
            .map_err(|e| BackupError::dump(format!("{:#}", e)))?;
        let args = self.dump_args();
        debug!(program = %program.display(), ?args, "Resolved dump command");

        let dump_file = target_dir.join(DUMP_FILE_NAME);
        let outfile = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&dump_file)
            .await
            .map_err(|e| {
                BackupError::dump(format!(
                    "Failed to create dump file {}: {}",
                    dump_file.display(),
                    e
                ))
            })?;

        let mut child = Command::new(&program)
            .args(&args)
            .current_dir(target_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                BackupError::dump(format!(
                    "Failed to start {}: {}",
                    program.display(),
                    e
                ))
            })?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackupError::dump("dump process stdout was not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| BackupError::dump("dump process stderr was not captured"))?;

        info!(dump_file = %dump_file.display(), "Dump process started");

        let drain = async move {
            let mut writer = BufWriter::new(outfile);
            let copied = tokio::io::copy(&mut stdout, &mut writer).await;
            // flush and close even if the copy failed
            let flushed = writer.flush().await;
            let closed = match flushed {
                Ok(()) => writer.into_inner().sync_all().await,
                Err(e) => Err(e),
            };
            let bytes = copied?;
            closed?;
            Ok::<u64, std::io::Error>(bytes)
        };
        let collect_stderr = async move {
            let mut buf = Vec::new();
            if let Err(e) = (&mut stderr).take(STDERR_CAPTURE_LIMIT).read_to_end(&mut buf).await {
                debug!(error = %e, "Failed to read dump stderr");
            }
            // keep draining so the child never blocks on a full stderr pipe
            if let Err(e) = tokio::io::copy(&mut stderr, &mut tokio::io::sink()).await {
                debug!(error = %e, "Failed to drain dump stderr");
            }
            String::from_utf8_lossy(&buf).trim().to_string()
        };
        let run = async { tokio::join!(drain, collect_stderr, child.wait()) };

        let outcome = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, run).await.ok(),
            None => Some(run.await),
        };

        let Some((drained, stderr_text, status)) = outcome else {
            let limit = self.timeout.unwrap_or_default();
            warn!(timeout_secs = limit.as_secs(), "Dump deadline expired, killing process");
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill dump process");
            }
            return Err(BackupError::Timeout(limit));
        };

        let status = status
            .map_err(|e| BackupError::dump(format!("Failed to wait for dump process: {}", e)))?;
        if !status.success() {
            let detail = if stderr_text.is_empty() {
                String::new()
            } else {
                format!(": {}", stderr_text)
            };
            return Err(BackupError::dump(format!(
                "dump process exited with {}{}",
                status, detail
            )));
        }

        let bytes_written = drained.map_err(|e| {
            BackupError::dump(format!(
                "Failed to copy dump output to {}: {}",
                dump_file.display(),
                e
            ))
        })?;

        info!(bytes = bytes_written, "✓ Dump completed");
        Ok(DumpOutcome { dump_file, bytes_written })
    }
}

/// Creates the backup root as needed, then the backup directory itself
/// exclusively. Fails with `AlreadyExists` if another run owns the directory.
async fn create_backup_dir(dir: &Path) -> std::io::Result<()> {
    if let Some(parent) = dir.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut builder = tokio::fs::DirBuilder::new();
    #[cfg(unix)]
    builder.mode(0o700);
    builder.create(dir).await
}
