//! Error types for the notebook server.
//!
//! Every store, execution and registry failure is an [`NbError`]; the server
//! turns it into a JSON-RPC error object at the outermost boundary.

use std::path::PathBuf;

/// Notebook server errors.
#[derive(Debug, thiserror::Error)]
pub enum NbError {
    /// Unknown tool requested.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// Tool arguments did not match the tool's parameters.
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArgs {
        /// Tool name
        tool: String,
        /// Why the arguments were rejected
        reason: String,
    },

    /// Request params missing or malformed.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// The notebook file does not exist.
    #[error("notebook not found: {}", .0.display())]
    NotebookNotFound(PathBuf),

    /// The notebook file exists and overwrite was not requested.
    #[error("notebook already exists: {}", .0.display())]
    NotebookExists(PathBuf),

    /// The file is not a readable nbformat v4 document.
    #[error("invalid notebook {}: {reason}", path.display())]
    InvalidNotebook {
        /// File that failed to parse
        path: PathBuf,
        /// Parser message
        reason: String,
    },

    /// Another process holds the notebook's lock.
    #[error("notebook is locked by another process: {}", .0.display())]
    NotebookLocked(PathBuf),

    /// No cell with the given id or index.
    #[error("cell not found: {0}")]
    CellNotFound(String),

    /// Workspace directory rejected.
    #[error("invalid workspace '{path}': {reason}")]
    InvalidWorkspace {
        /// Directory that was requested
        path: String,
        /// Why it was refused
        reason: String,
    },

    /// Undo requested with an empty history.
    #[error("no operations to undo for {}", .0.display())]
    NothingToUndo(PathBuf),

    /// The kernel client could not run at all.
    #[error("kernel error: {0}")]
    Kernel(String),

    /// JSON-RPC protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for NbError {
    fn from(err: serde_json::Error) -> Self {
        NbError::Protocol(format!("JSON error: {}", err))
    }
}

impl From<walkdir::Error> for NbError {
    fn from(err: walkdir::Error) -> Self {
        match err.into_io_error() {
            Some(io) => NbError::Io(io),
            None => NbError::Internal("filesystem loop while listing notebooks".to_string()),
        }
    }
}

/// JSON-RPC error codes.
pub mod rpc_codes {
    /// Parse error - Invalid JSON was received.
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid Request - The JSON sent is not a valid Request object.
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found - The method does not exist / is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params - Unknown tool or malformed tool arguments.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error - The tool failed while running.
    pub const INTERNAL_ERROR: i32 = -32603;
}

impl NbError {
    /// Shorthand for [`NbError::InvalidArgs`].
    pub fn invalid_args(tool: &str, reason: impl Into<String>) -> Self {
        NbError::InvalidArgs {
            tool: tool.to_string(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`NbError::InvalidParams`].
    pub fn invalid_params(reason: impl Into<String>) -> Self {
        NbError::InvalidParams(reason.into())
    }

    /// Convert to JSON-RPC error code.
    pub fn rpc_code(&self) -> i32 {
        match self {
            NbError::UnknownTool(_) | NbError::InvalidArgs { .. } | NbError::InvalidParams(_) => {
                rpc_codes::INVALID_PARAMS
            }
            NbError::Protocol(_) => rpc_codes::INVALID_REQUEST,
            _ => rpc_codes::INTERNAL_ERROR,
        }
    }

    /// Stable machine-readable error kind, sent as `error.data.kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            NbError::UnknownTool(_) => "unknown_tool",
            NbError::InvalidArgs { .. } => "invalid_args",
            NbError::InvalidParams(_) => "invalid_params",
            NbError::NotebookNotFound(_) => "notebook_not_found",
            NbError::NotebookExists(_) => "notebook_exists",
            NbError::InvalidNotebook { .. } => "invalid_notebook",
            NbError::NotebookLocked(_) => "notebook_locked",
            NbError::CellNotFound(_) => "cell_not_found",
            NbError::InvalidWorkspace { .. } => "invalid_workspace",
            NbError::NothingToUndo(_) => "nothing_to_undo",
            NbError::Kernel(_) => "kernel_error",
            NbError::Protocol(_) => "protocol_error",
            NbError::Io(_) => "io_error",
            NbError::Internal(_) => "internal_error",
        }
    }
}

/// Result type for notebook operations.
pub type Result<T> = std::result::Result<T, NbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_kinds_are_distinct() {
        let file = NbError::NotebookNotFound(PathBuf::from("a.ipynb"));
        let cell = NbError::CellNotFound("index 7".to_string());
        assert_ne!(file.kind(), cell.kind());
        assert_eq!(file.rpc_code(), rpc_codes::INTERNAL_ERROR);
        assert_eq!(cell.rpc_code(), rpc_codes::INTERNAL_ERROR);
    }

    #[test]
    fn test_registry_errors_are_invalid_params() {
        assert_eq!(
            NbError::UnknownTool("nope".into()).rpc_code(),
            rpc_codes::INVALID_PARAMS
        );
        assert_eq!(
            NbError::invalid_args("add_cell", "missing field").rpc_code(),
            rpc_codes::INVALID_PARAMS
        );
    }
}
