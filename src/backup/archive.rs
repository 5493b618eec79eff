// trasa-backup/src/backup/archive.rs
use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{File, OpenOptions};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tar::Builder;
use tracing::info;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::config::ArchiveFormat;

/// Packages `source_dir` into a single artifact at `archive_dest_path`.
///
/// Entries are stored under the source directory's own name, so a dump at
/// `<root>/<name>/cockroach-back.sql` unpacks to `<name>/cockroach-back.sql`.
pub fn archive_directory(
    format: ArchiveFormat,
    source_dir: &Path,
    archive_dest_path: &Path,
) -> Result<PathBuf> {
    if !source_dir.is_dir() {
        return Err(anyhow::anyhow!(
            "Source for archival is not a directory: {}",
            source_dir.display()
        ));
    }
    if let Some(parent) = archive_dest_path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!(
                    "Failed to create parent directory for archive: {}",
                    parent.display()
                )
            })?;
        }
    }

    info!(
        source = %source_dir.display(),
        dest = %archive_dest_path.display(),
        format = format.extension(),
        "Creating archive"
    );

    match format {
        ArchiveFormat::Zip => create_zip_archive(source_dir, archive_dest_path)?,
        ArchiveFormat::TarGz => create_tar_gz_archive(source_dir, archive_dest_path)?,
    }

    info!(dest = %archive_dest_path.display(), "✓ Archive created");
    Ok(archive_dest_path.to_path_buf())
}

/// Walks `source_dir` and yields `(path, entry name)` pairs, root excluded.
fn archive_entries(source_dir: &Path) -> Result<Vec<(PathBuf, String)>> {
    let root_name = source_dir
        .file_name()
        .with_context(|| format!("Archive source has no directory name: {}", source_dir.display()))?;
    let root_name = Path::new(root_name);

    let mut entries = Vec::new();
    for entry in WalkDir::new(source_dir).sort_by_file_name() {
        let entry = entry
            .with_context(|| format!("Failed to walk directory: {}", source_dir.display()))?;
        let path = entry.path();
        let relative = path.strip_prefix(source_dir).with_context(|| {
            format!(
                "Failed to strip prefix {} from {}",
                source_dir.display(),
                path.display()
            )
        })?;

        if relative.as_os_str().is_empty() {
            continue;
        }

        let name = root_name
            .join(relative)
            .to_string_lossy()
            .replace('\\', "/");
        entries.push((path.to_path_buf(), name));
    }
    Ok(entries)
}

/// Opens the artifact for writing. An existing artifact is never overwritten.
fn create_archive_file(archive_dest_path: &Path) -> Result<File> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(archive_dest_path)
        .with_context(|| {
            format!(
                "Failed to create archive file: {}",
                archive_dest_path.display()
            )
        })
}

fn create_zip_archive(source_dir: &Path, archive_dest_path: &Path) -> Result<()> {
    let archive_file = create_archive_file(archive_dest_path)?;
    let mut zip = ZipWriter::new(BufWriter::new(archive_file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let root_name = source_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    zip.add_directory(format!("{}/", root_name), options)
        .context("Failed to add root directory to zip archive")?;

    for (path, name) in archive_entries(source_dir)? {
        if path.is_dir() {
            zip.add_directory(format!("{}/", name), options)
                .with_context(|| format!("Failed to add directory {} to archive", path.display()))?;
        } else if path.is_file() {
            zip.start_file(name.clone(), options)
                .with_context(|| format!("Failed to start zip entry {}", name))?;
            let mut file = File::open(&path)
                .with_context(|| format!("Failed to open {} for archiving", path.display()))?;
            std::io::copy(&mut file, &mut zip).with_context(|| {
                format!("Failed to append file {} as {} to archive", path.display(), name)
            })?;
        }
    }

    let mut writer = zip.finish().with_context(|| {
        format!(
            "Failed to finish zip archive: {}",
            archive_dest_path.display()
        )
    })?;
    std::io::Write::flush(&mut writer)
        .with_context(|| format!("Failed to flush archive: {}", archive_dest_path.display()))?;
    Ok(())
}

fn create_tar_gz_archive(source_dir: &Path, archive_dest_path: &Path) -> Result<()> {
    let archive_file = create_archive_file(archive_dest_path)?;
    let enc = GzEncoder::new(archive_file, Compression::default());
    let mut tar_builder = Builder::new(enc);

    for (path, name) in archive_entries(source_dir)? {
        if path.is_dir() {
            tar_builder.append_dir(&name, &path).with_context(|| {
                format!("Failed to append directory {} to archive", path.display())
            })?;
        } else if path.is_file() {
            tar_builder.append_path_with_name(&path, &name).with_context(|| {
                format!("Failed to append file {} as {} to archive", path.display(), name)
            })?;
        }
    }

    let encoder = tar_builder.into_inner().with_context(|| {
        format!(
            "Failed to get inner encoder from tar builder for archive: {}",
            archive_dest_path.display()
        )
    })?;

    encoder.finish().with_context(|| {
        format!(
            "Failed to finish Gzip encoding for archive: {}",
            archive_dest_path.display()
        )
    })?;
    Ok(())
}
