//! On-disk notebook storage.
//!
//! Loads are always fresh from disk. Saves go through a temporary file in the
//! target's directory that is renamed over the target, so a failed save
//! leaves the previous file intact. Undo snapshots are the file's text as it
//! was read, so restoring one gives back the exact bytes.

use std::fs;
use std::io::Write;
use std::path::Path;

use tracing::debug;

use crate::error::{NbError, Result};
use crate::notebook::Notebook;

/// Read the file at `path`, or `None` when there is no file.
pub fn read_text(path: &Path) -> Result<Option<String>> {
    if path.is_dir() {
        return Ok(None);
    }
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Parse the text of the notebook stored at `path`.
pub fn parse(path: &Path, text: &str) -> Result<Notebook> {
    let nb = Notebook::from_json(text).map_err(|e| NbError::InvalidNotebook {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    if nb.nbformat != crate::notebook::NBFORMAT {
        return Err(NbError::InvalidNotebook {
            path: path.to_path_buf(),
            reason: format!("unsupported nbformat {}", nb.nbformat),
        });
    }
    Ok(nb)
}

/// Load a notebook along with the text it was parsed from.
pub fn load_with_text(path: &Path) -> Result<(String, Notebook)> {
    let text = read_text(path)?.ok_or_else(|| NbError::NotebookNotFound(path.to_path_buf()))?;
    let nb = parse(path, &text)?;
    Ok((text, nb))
}

/// Load a notebook from `path`.
pub fn load(path: &Path) -> Result<Notebook> {
    load_with_text(path).map(|(_, nb)| nb)
}

/// Atomically write `nb` to `path`, creating parent directories.
pub fn save(nb: &Notebook, path: &Path) -> Result<()> {
    write_atomic(path, &nb.to_json()?)?;
    debug!(path = %path.display(), cells = nb.cells.len(), "saved notebook");
    Ok(())
}

fn write_atomic(path: &Path, text: &str) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(text.as_bytes())?;
    tmp.as_file().sync_all()?;
    // The temp file is private; an existing target keeps its own mode.
    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(tmp.path(), meta.permissions())?;
    }
    tmp.persist(path).map_err(|e| NbError::Io(e.error))?;
    Ok(())
}

/// Restore a snapshot: write its text back, or remove the file if it was absent.
pub fn restore(snapshot: Option<&str>, path: &Path) -> Result<()> {
    match snapshot {
        Some(text) => write_atomic(path, text),
        None => match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        },
    }
}
