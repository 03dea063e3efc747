//! Atomic artifact writes
//!
//! Content goes to a temporary file in the destination directory, which is
//! renamed over the target only once fully written. On any error the
//! temporary file is dropped and the target is left as it was.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::{ExportError, Result};

/// Write `contents` to `path` atomically
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| ExportError::Io(e.error))?;

    tracing::debug!(path = %path.display(), bytes = contents.len(), "artifact written");
    Ok(())
}
