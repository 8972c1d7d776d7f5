//! Workspace tools.
//!
//! Tools: get_workspace, set_workspace, list_notebooks

use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::error::Result;
use crate::schema;
use crate::session::NotebookSession;
use crate::tools::ToolDef;

/// Arguments of `set_workspace`.
#[derive(Debug, Clone, Deserialize)]
pub struct SetWorkspaceArgs {
    /// Absolute directory
    pub directory: String,
}

/// Arguments of `list_notebooks`.
#[derive(Debug, Clone, Deserialize)]
pub struct ListNotebooksArgs {
    /// Directory to search, relative to the workspace
    #[serde(default = "current_dir")]
    pub directory: String,
}

fn current_dir() -> String {
    ".".to_string()
}

/// Get all workspace tool definitions.
pub fn tools() -> Vec<ToolDef> {
    vec![
        ToolDef::new(
            "get_workspace",
            "Get the workspace directory that relative notebook paths resolve against.",
            schema!(object {}),
        ),
        ToolDef::new(
            "set_workspace",
            "Set the workspace directory. Requires a FULL ABSOLUTE PATH to an existing \
             directory. Returns the notebooks found under it.",
            schema!(object {
                required: { "directory": string => "Absolute path of the project directory" }
            }),
        ),
        ToolDef::new(
            "list_notebooks",
            "Recursively list .ipynb files under a directory of the workspace.",
            schema!(object {
                optional: { "directory": string => "Directory relative to the workspace (default '.')" }
            }),
        ),
    ]
}

/// `get_workspace`
pub fn get_workspace(session: &mut NotebookSession) -> Result<JsonValue> {
    Ok(serde_json::json!({
        "workspace": session.workspace().root().display().to_string(),
    }))
}

/// `set_workspace`
pub fn set_workspace(session: &mut NotebookSession, args: SetWorkspaceArgs) -> Result<JsonValue> {
    session.set_workspace(&args.directory)?;
    let notebooks = session.workspace().list_notebooks(".")?;
    Ok(serde_json::json!({
        "success": true,
        "workspace": session.workspace().root().display().to_string(),
        "notebooks": notebooks,
    }))
}

/// `list_notebooks`
pub fn list_notebooks(session: &mut NotebookSession, args: ListNotebooksArgs) -> Result<JsonValue> {
    let notebooks = session.workspace().list_notebooks(&args.directory)?;
    Ok(serde_json::json!({
        "directory": session.resolve(&args.directory).display().to_string(),
        "count": notebooks.len(),
        "notebooks": notebooks,
    }))
}
