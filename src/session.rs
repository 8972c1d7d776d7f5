//! Notebook session state.
//!
//! Replaces process-wide globals with one context object: the workspace used
//! to resolve paths, the undo history and the kernel client. Every tool call
//! receives the session explicitly. Mutations hold the notebook's advisory
//! lock from the read to the save.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::info;

use crate::error::{NbError, Result};
use crate::history::History;
use crate::kernel::KernelClient;
use crate::lock::NotebookLock;
use crate::notebook::Notebook;
use crate::store;
use crate::workspace::Workspace;

/// Tunables fixed at start-up.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Kernel for new notebooks and for documents without a kernelspec
    pub default_kernel: String,
    /// Per-cell timeout when a tool call doesn't give one
    pub cell_timeout: Duration,
    /// Undo snapshots kept per notebook
    pub history_size: usize,
    /// How long to wait for another process's lock on a notebook
    pub lock_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_kernel: "python3".to_string(),
            cell_timeout: Duration::from_secs(60),
            history_size: 10,
            lock_timeout: Duration::from_secs(10),
        }
    }
}

/// Session state shared by all tool calls of one server process.
pub struct NotebookSession {
    workspace: Workspace,
    history: History,
    kernel: Box<dyn KernelClient>,
    config: SessionConfig,
}

impl NotebookSession {
    /// Create a session.
    pub fn new(workspace: Workspace, kernel: Box<dyn KernelClient>, config: SessionConfig) -> Self {
        Self {
            workspace,
            history: History::new(config.history_size),
            kernel,
            config,
        }
    }

    /// The current workspace.
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Point the workspace at another absolute directory.
    pub fn set_workspace(&mut self, directory: &str) -> Result<()> {
        self.workspace.set_root(directory)?;
        info!(workspace = %self.workspace.root().display(), "workspace changed");
        Ok(())
    }

    /// Start-up configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The kernel client.
    pub fn kernel(&mut self) -> &mut dyn KernelClient {
        self.kernel.as_mut()
    }

    /// Resolve a tool-supplied path against the workspace.
    pub fn resolve(&self, path: &str) -> PathBuf {
        self.workspace.resolve(path)
    }

    /// Load the notebook at a tool-supplied path.
    pub fn load(&self, path: &str) -> Result<(PathBuf, Notebook)> {
        let resolved = self.resolve(path);
        let nb = store::load(&resolved)?;
        Ok((resolved, nb))
    }

    /// Take the advisory lock of a resolved notebook path.
    pub fn lock(&self, path: &Path) -> Result<NotebookLock> {
        NotebookLock::acquire(path, self.config.lock_timeout)
    }

    /// Save `nb` to `path` and remember `before`, the file text it replaces,
    /// for undo.
    pub fn commit(&mut self, path: &Path, before: Option<String>, nb: &Notebook) -> Result<()> {
        store::save(nb, path)?;
        self.history.record(path, before);
        Ok(())
    }

    /// Lock, load, apply `f`, save. Nothing is written if `f` fails.
    pub fn update<T>(
        &mut self,
        path: &str,
        f: impl FnOnce(&mut Notebook) -> Result<T>,
    ) -> Result<(PathBuf, T)> {
        let resolved = self.resolve(path);
        let _lock = self.lock(&resolved)?;
        let (before, mut nb) = store::load_with_text(&resolved)?;
        let value = f(&mut nb)?;
        self.commit(&resolved, Some(before), &nb)?;
        Ok((resolved, value))
    }

    /// Restore the state before the last recorded mutation of `path`.
    ///
    /// Returns the number of snapshots still available.
    pub fn undo(&mut self, path: &str) -> Result<(PathBuf, usize)> {
        let resolved = self.resolve(path);
        let _lock = self.lock(&resolved)?;
        let snapshot = self
            .history
            .pop(&resolved)
            .ok_or_else(|| NbError::NothingToUndo(resolved.clone()))?;

        if let Err(e) = store::restore(snapshot.as_deref(), &resolved) {
            self.history.record(&resolved, snapshot);
            return Err(e);
        }
        info!(path = %resolved.display(), "undid last operation");
        Ok((resolved.clone(), self.history.depth(&resolved)))
    }
}
