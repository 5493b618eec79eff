//! Trasa Backup Tool
//!
//! Provides CLI interface for taking, listing and downloading system backups

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::io::AsyncWriteExt;
use tracing::{error, info};

use trasa_backup::logging::init_logging;
use trasa_backup::response::{
    ApiResponse, INTENT_BACKUP_NOT_TAKEN, INTENT_BACKUP_TAKEN, INTENT_DOWNLOAD_BACKUP,
    INTENT_GET_BACKUPS, Status,
};
use trasa_backup::{AppConfig, BackupOrchestrator, MetadataStore};

#[derive(Parser)]
#[command(name = "trasa-backup")]
#[command(about = "Take, list and download system backups")]
#[command(version)]
struct Cli {
    /// Path to config.json
    #[arg(short, long, global = true, env = "TRASA_BACKUP_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Take a system backup now
    Backup {
        #[arg(long)]
        org: String,
    },
    /// List backups of an organization, newest first
    List {
        #[arg(long)]
        org: String,
        /// Only show the newest backup and the total count
        #[arg(long)]
        latest: bool,
    },
    /// Copy a backup artifact to a local directory
    Download {
        #[arg(long)]
        org: String,
        backup_id: String,
        /// Destination directory
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },
}

/// Main entry point for the backup tool
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_logging(cli.verbose, cli.json_logs) {
        eprintln!("❌ Error: {:?}", e);
        return ExitCode::FAILURE;
    }

    match run_app(cli).await {
        Ok(response) => {
            let failed = response.status == Status::Failed;
            match serde_json::to_string_pretty(&response) {
                Ok(body) => println!("{}", body),
                Err(e) => {
                    eprintln!("❌ Error: {:?}", e);
                    return ExitCode::FAILURE;
                }
            }
            if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS }
        }
        Err(e) => {
            error!("{:#}", e);
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app(cli: Cli) -> Result<ApiResponse> {
    let app_config = AppConfig::load_from_json(&cli.config)
        .context(format!("Failed to load application configuration from {}", cli.config.display()))?;
    let store = match MetadataStore::connect(&app_config.metadata_database_url).await {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "Failed to open metadata store");
            return Ok(ApiResponse::failure(&e, failure_intent(&cli.command)));
        }
    };
    let orchestrator = BackupOrchestrator::new(app_config, store);

    let response = match cli.command {
        Commands::Backup { org } => {
            info!(org_id = %org, "🚀 Starting backup");
            match orchestrator.take_backup(&org).await {
                Ok(listing) => ApiResponse::success(
                    "backup created",
                    INTENT_BACKUP_TAKEN,
                    vec![serde_json::to_value(listing)?],
                ),
                Err(e) => ApiResponse::failure(&e, INTENT_BACKUP_NOT_TAKEN),
            }
        }
        Commands::List { org, latest } => match orchestrator.list_backups(&org, latest).await {
            Ok(listing) => ApiResponse::success("Backups fetched", INTENT_GET_BACKUPS, listing.into_data()),
            Err(e) => ApiResponse::failure(&e, INTENT_GET_BACKUPS),
        },
        Commands::Download { org, backup_id, out } => {
            download(&orchestrator, &org, &backup_id, &out).await?
        }
    };
    Ok(response)
}

/// Intent reported when a command fails before it runs.
fn failure_intent(command: &Commands) -> &'static str {
    match command {
        Commands::Backup { .. } => INTENT_BACKUP_NOT_TAKEN,
        Commands::List { .. } => INTENT_GET_BACKUPS,
        Commands::Download { .. } => INTENT_DOWNLOAD_BACKUP,
    }
}

async fn download(
    orchestrator: &BackupOrchestrator,
    org_id: &str,
    backup_id: &str,
    out_dir: &Path,
) -> Result<ApiResponse> {
    let mut artifact = match orchestrator.download_artifact(backup_id, org_id).await {
        Ok(artifact) => artifact,
        Err(e) => return Ok(ApiResponse::failure(&e, INTENT_DOWNLOAD_BACKUP)),
    };
    let dest = out_dir.join(&artifact.file_name);

    tokio::fs::create_dir_all(out_dir)
        .await
        .with_context(|| format!("Failed to create output directory {}", out_dir.display()))?;
    let mut out = tokio::fs::File::create(&dest)
        .await
        .with_context(|| format!("Failed to create {}", dest.display()))?;
    let bytes = tokio::io::copy(&mut artifact.file, &mut out)
        .await
        .with_context(|| format!("Failed to copy {} to {}", artifact.path.display(), dest.display()))?;
    out.flush()
        .await
        .with_context(|| format!("Failed to flush {}", dest.display()))?;
    info!(dest = %dest.display(), bytes, "✓ Backup downloaded");

    let headers: serde_json::Map<String, serde_json::Value> = artifact
        .headers()
        .into_iter()
        .map(|(k, v)| (k.to_string(), serde_json::Value::String(v)))
        .collect();
    Ok(ApiResponse::success(
        "Backup downloaded",
        INTENT_DOWNLOAD_BACKUP,
        vec![
            serde_json::Value::Object(headers),
            serde_json::Value::String(dest.display().to_string()),
        ],
    ))
}
