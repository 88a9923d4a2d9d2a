//! File-system helpers that map `std::io` failures onto stable placeholders.

use crate::domain::errors::DIRECTORY_EXISTS;
use crate::domain::{AtlasError, AtlasResult};
use crate::formatting::normalize_text_artifact;
use std::fs;
use std::path::{Path, PathBuf};

pub fn read_text(path: &Path, artifact_name: &str) -> AtlasResult<String> {
    fs::read_to_string(path).map_err(|source| {
        AtlasError::io_system(
            "IO.READ",
            format!(
                "failed to read {} '{}': {}",
                artifact_name,
                path.display(),
                source
            ),
        )
    })
}

pub fn read_bytes(path: &Path, artifact_name: &str) -> AtlasResult<Vec<u8>> {
    fs::read(path).map_err(|source| {
        AtlasError::io_system(
            "IO.READ",
            format!(
                "failed to read {} '{}': {}",
                artifact_name,
                path.display(),
                source
            ),
        )
    })
}

pub fn write_text(path: &Path, content: &str) -> AtlasResult<()> {
    fs::write(path, normalize_text_artifact(content)).map_err(|source| {
        AtlasError::io_system(
            "IO.WRITE",
            format!("failed to write '{}': {}", path.display(), source),
        )
    })
}

pub fn copy_file(from: &Path, to: &Path) -> AtlasResult<()> {
    fs::copy(from, to).map(|_| ()).map_err(|source| {
        AtlasError::io_system(
            "IO.COPY",
            format!(
                "failed to copy '{}' to '{}': {}",
                from.display(),
                to.display(),
                source
            ),
        )
    })
}

pub fn ensure_directory(path: &Path) -> AtlasResult<()> {
    fs::create_dir_all(path).map_err(|source| {
        AtlasError::io_system(
            "IO.MKDIR",
            format!("failed to create directory '{}': {}", path.display(), source),
        )
    })
}

/// Creates a fresh run directory and returns its canonical path. An existing
/// directory is never reused.
pub fn create_run_directory(path: &Path) -> AtlasResult<PathBuf> {
    if path.exists() {
        return Err(AtlasError::input_validation(
            DIRECTORY_EXISTS,
            format!("directory '{}' already exists", path.display()),
        ));
    }
    fs::create_dir_all(path).map_err(|source| {
        AtlasError::io_system(
            "IO.MKDIR",
            format!("failed to create run directory '{}': {}", path.display(), source),
        )
    })?;
    canonical(path)
}

pub fn canonical(path: &Path) -> AtlasResult<PathBuf> {
    fs::canonicalize(path).map_err(|source| {
        AtlasError::io_system(
            "IO.CANONICALIZE",
            format!("failed to resolve '{}': {}", path.display(), source),
        )
    })
}

pub fn require_directory(path: &Path) -> AtlasResult<()> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(AtlasError::input_validation(
            "INPUT.RUN_DIRECTORY",
            format!("run directory '{}' not found", path.display()),
        ))
    }
}
