//! Committing processed text to the destination tree

use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::PreprocessorError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitOptions {
    pub dry_run: bool,
    pub skip_unchanged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    Written,
    Unchanged,
    DryRun,
}

/// blake3 digest of some bytes, as hex
pub fn content_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// True when `path` exists and holds exactly `bytes`
pub fn is_unchanged(path: &Path, bytes: &[u8]) -> bool {
    match fs::read(path) {
        Ok(existing) => blake3::hash(&existing) == blake3::hash(bytes),
        Err(_) => false,
    }
}

/// Write `bytes` to `destination` through a temporary file in the same
/// directory, renamed into place once complete.
pub fn commit(destination: &Path, bytes: &[u8], options: CommitOptions) -> Result<Commit, PreprocessorError> {
    if options.dry_run {
        return Ok(Commit::DryRun);
    }
    if options.skip_unchanged && is_unchanged(destination, bytes) {
        return Ok(Commit::Unchanged);
    }

    let dir = match destination.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)
        .map_err(|e| PreprocessorError::io(format!("cannot create directory ({})", e), dir))?;

    let mut temp = NamedTempFile::new_in(dir)
        .map_err(|e| PreprocessorError::io(format!("cannot create temporary file ({})", e), dir))?;
    temp.write_all(bytes)
        .and_then(|_| temp.flush())
        .map_err(|e| PreprocessorError::io(format!("cannot write ({})", e), destination))?;
    temp.persist(destination)
        .map_err(|e| PreprocessorError::io(format!("cannot replace file ({})", e.error), destination))?;
    Ok(Commit::Written)
}
