use anyhow::{Context, Result};
use std::path::PathBuf;
use which::which;

/// Finds the dump tool executable in the system PATH.
pub fn find_dump_executable(program: &str) -> Result<PathBuf> {
    which(program).with_context(|| {
        format!(
            "{} executable not found in PATH. Please ensure the database client tools are installed and in your PATH.",
            program
        )
    })
}
