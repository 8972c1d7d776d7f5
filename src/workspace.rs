//! Workspace directory and path resolution.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{NbError, Result};

/// Base directory for relative notebook paths.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Create a workspace rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Workspace rooted at the process's current directory.
    pub fn current_dir() -> Result<Self> {
        Ok(Self::new(std::env::current_dir()?))
    }

    /// The workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Replace the root with `directory`.
    ///
    /// The directory must be absolute and exist.
    pub fn set_root(&mut self, directory: &str) -> Result<()> {
        let trimmed = directory.trim();
        let invalid = |reason: &str| NbError::InvalidWorkspace {
            path: directory.to_string(),
            reason: reason.to_string(),
        };

        if trimmed.is_empty() {
            return Err(invalid("a directory path is required"));
        }
        let path = PathBuf::from(trimmed);
        if !path.is_absolute() {
            return Err(invalid("relative paths are not allowed, pass an absolute path"));
        }
        if !path.exists() {
            return Err(invalid("directory does not exist"));
        }
        if !path.is_dir() {
            return Err(invalid("not a directory"));
        }

        self.root = path;
        Ok(())
    }

    /// Resolve `path` against the root. Absolute paths pass through.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        }
    }

    /// Every `*.ipynb` under `directory`, relative to the workspace root.
    ///
    /// Hidden directories (`.ipynb_checkpoints`, `.git`, ...) are skipped.
    pub fn list_notebooks(&self, directory: &str) -> Result<Vec<String>> {
        let base = self.resolve(directory);
        if !base.is_dir() {
            return Err(NbError::InvalidWorkspace {
                path: base.display().to_string(),
                reason: "not a directory".to_string(),
            });
        }

        let mut found = Vec::new();
        let walker = WalkDir::new(&base)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));
        for entry in walker {
            let entry = entry?;
            let is_notebook = entry.file_type().is_file()
                && entry.path().extension().map_or(false, |ext| ext == "ipynb");
            if !is_notebook {
                continue;
            }
            let shown = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path());
            found.push(shown.display().to_string());
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_resolve_relative_and_absolute() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        assert_eq!(ws.resolve("a.ipynb"), dir.path().join("a.ipynb"));
        let abs = dir.path().join("b.ipynb");
        assert_eq!(ws.resolve(abs.to_str().unwrap()), abs);
    }

    #[test]
    fn test_set_root_rejects_relative_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let mut ws = Workspace::new(dir.path());
        assert!(matches!(ws.set_root("./x"), Err(NbError::InvalidWorkspace { .. })));
        assert!(matches!(ws.set_root(""), Err(NbError::InvalidWorkspace { .. })));
        let missing = dir.path().join("missing");
        assert!(ws.set_root(missing.to_str().unwrap()).is_err());
        assert_eq!(ws.root(), dir.path());
    }

    #[test]
    fn test_set_root_rejects_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.txt");
        fs::write(&file, "x").unwrap();
        let mut ws = Workspace::new(dir.path());
        assert!(ws.set_root(file.to_str().unwrap()).is_err());
    }

    #[test]
    fn test_list_notebooks_skips_hidden_dirs() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::create_dir_all(dir.path().join(".ipynb_checkpoints")).unwrap();
        fs::write(dir.path().join("a.ipynb"), "{}").unwrap();
        fs::write(dir.path().join("sub/b.ipynb"), "{}").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();
        fs::write(dir.path().join(".ipynb_checkpoints/a-checkpoint.ipynb"), "{}").unwrap();

        let ws = Workspace::new(dir.path());
        let found = ws.list_notebooks(".").unwrap();
        let expected_sub = Path::new("sub").join("b.ipynb").display().to_string();
        assert_eq!(found, vec!["a.ipynb".to_string(), expected_sub]);
    }
}
