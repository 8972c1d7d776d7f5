//! # nbmcp
//!
//! Jupyter notebook tools served over JSON-RPC.
//!
//! This crate exposes notebook editing and execution as tools for AI agents.
//! It speaks line-delimited JSON-RPC 2.0 on stdin/stdout, answering both the
//! `mcp.list_tools` / `mcp.use_tool` methods and the standard MCP
//! `tools/list` / `tools/call` pair.
//!
//! ## Features
//!
//! - **19 tools**: create, read, write, diff and undo notebooks; read, add, edit
//!   and delete cells; execute cells, read their outputs and shut kernels down
//! - **Session state**: the workspace used to resolve relative paths and a
//!   bounded per-file undo history
//! - **Atomic saves**: documents are written to a temporary file and renamed,
//!   under an advisory `<notebook>.lock`
//! - **Delegated execution**: cells run on a real Jupyter kernel through
//!   `nbclient`, one kernel per notebook, with per-cell timeouts
//!
//! ## Usage
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "notebooks": {
//!       "command": "/path/to/nbmcp",
//!       "args": ["--workspace", "/path/to/project"]
//!     }
//!   }
//! }
//! ```
//!
//! ## Library Usage
//!
//! ```no_run
//! use nbmcp::{McpServer, NbClientKernel, NotebookSession, SessionConfig, Workspace};
//!
//! let workspace = Workspace::current_dir().expect("no current directory");
//! let kernel = Box::new(NbClientKernel::new("python3"));
//! let session = NotebookSession::new(workspace, kernel, SessionConfig::default());
//! let mut server = McpServer::new(session);
//!
//! // Run the server (reads from stdin, writes to stdout)
//! // server.run_sync().expect("Server error");
//! ```

#![warn(missing_docs)]

pub mod convert;
pub mod diff;
pub mod error;
pub mod history;
pub mod kernel;
pub mod lock;
pub mod notebook;
pub mod server;
pub mod session;
pub mod store;
pub mod tools;
pub mod workspace;

pub use error::{NbError, Result};
pub use kernel::{CellRun, ExecutionRequest, KernelClient, NbClientKernel, RunStatus};
pub use notebook::{Cell, CellKind, CellRef, Notebook, Output};
pub use server::{JsonRpcRequest, JsonRpcResponse, McpServer};
pub use session::{NotebookSession, SessionConfig};
pub use tools::{ToolCall, ToolDef, ToolRegistry};
pub use workspace::Workspace;
