//! Single-cell tools.
//!
//! Tools: read_cell, add_cell, edit_cell, delete_cell

use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::convert::cell_to_json;
use crate::error::Result;
use crate::notebook::{Cell, CellKind};
use crate::schema;
use crate::session::NotebookSession;
use crate::tools::{CellTarget, ToolDef};

/// Arguments of `add_cell`.
#[derive(Debug, Clone, Deserialize)]
pub struct AddCellArgs {
    /// Notebook to modify
    pub notebook_path: String,
    /// Source of the new cell
    pub cell_content: String,
    /// Kind of the new cell
    #[serde(default = "default_kind")]
    pub cell_type: CellKind,
    /// Insert position; negative counts from the end
    #[serde(default = "append")]
    pub position: i64,
}

fn default_kind() -> CellKind {
    CellKind::Code
}

fn append() -> i64 {
    -1
}

/// Arguments of `edit_cell`.
#[derive(Debug, Clone, Deserialize)]
pub struct EditCellArgs {
    /// Cell to edit
    #[serde(flatten)]
    pub target: CellTarget,
    /// Replacement source
    pub new_content: String,
}

/// Get all cell tool definitions.
pub fn tools() -> Vec<ToolDef> {
    vec![
        ToolDef::new(
            "read_cell",
            "Read one cell, with its outputs, by cell_id or cell_index.",
            schema!(object {
                required: { "notebook_path": string => "Notebook path" },
                optional: {
                    "cell_id": string => "Cell id",
                    "cell_index": integer => "Cell index"
                }
            }),
        ),
        ToolDef::new(
            "add_cell",
            "Insert a new cell. Position -1 appends; negative positions count from the end.",
            schema!(object {
                required: {
                    "notebook_path": string => "Notebook path",
                    "cell_content": string => "Source of the new cell"
                },
                optional: {
                    "cell_type": cell_type => "Cell type (default code)",
                    "position": integer => "Insert position (default -1)"
                }
            }),
        ),
        ToolDef::new(
            "edit_cell",
            "Replace the source of a cell. Outputs are kept until the cell is executed again.",
            schema!(object {
                required: {
                    "notebook_path": string => "Notebook path",
                    "new_content": string => "Replacement source"
                },
                optional: {
                    "cell_id": string => "Cell id",
                    "cell_index": integer => "Cell index"
                }
            }),
        ),
        ToolDef::new(
            "delete_cell",
            "Delete a cell by cell_id or cell_index.",
            schema!(object {
                required: { "notebook_path": string => "Notebook path" },
                optional: {
                    "cell_id": string => "Cell id",
                    "cell_index": integer => "Cell index"
                }
            }),
        ),
    ]
}

/// `read_cell`
pub fn read_cell(session: &mut NotebookSession, target: CellTarget) -> Result<JsonValue> {
    let cell_ref = target.cell_ref("read_cell")?;
    let (_, nb) = session.load(&target.notebook_path)?;
    let idx = nb.find(&cell_ref)?;
    Ok(cell_to_json(idx, &nb.cells[idx]))
}

/// `add_cell`
pub fn add_cell(session: &mut NotebookSession, args: AddCellArgs) -> Result<JsonValue> {
    let (path, (cell_id, index)) = session.update(&args.notebook_path, |nb| {
        let id = nb.fresh_cell_id();
        let cell = Cell::new(args.cell_type, id.clone(), &args.cell_content);
        let index = nb.insert_cell(args.position, cell);
        Ok((id, index))
    })?;
    Ok(serde_json::json!({
        "success": true,
        "message": format!("Added {} cell at index {}", args.cell_type, index),
        "cell_id": cell_id,
        "index": index,
        "notebook_path": path.display().to_string(),
    }))
}

/// `edit_cell`
pub fn edit_cell(session: &mut NotebookSession, args: EditCellArgs) -> Result<JsonValue> {
    let cell_ref = args.target.cell_ref("edit_cell")?;
    let (path, (cell_id, index)) = session.update(&args.target.notebook_path, |nb| {
        let idx = nb.find(&cell_ref)?;
        let cell = &mut nb.cells[idx];
        cell.set_source(&args.new_content);
        Ok((cell.id().to_string(), idx))
    })?;
    Ok(serde_json::json!({
        "success": true,
        "message": format!("Updated cell at index {}", index),
        "cell_id": cell_id,
        "index": index,
        "notebook_path": path.display().to_string(),
    }))
}

/// `delete_cell`
pub fn delete_cell(session: &mut NotebookSession, target: CellTarget) -> Result<JsonValue> {
    let cell_ref = target.cell_ref("delete_cell")?;
    let (path, (cell_id, index, remaining)) = session.update(&target.notebook_path, |nb| {
        let idx = nb.find(&cell_ref)?;
        let removed = nb.cells.remove(idx);
        Ok((removed.id().to_string(), idx, nb.cells.len()))
    })?;
    Ok(serde_json::json!({
        "success": true,
        "message": format!("Deleted cell at index {}", index),
        "cell_id": cell_id,
        "index": index,
        "remaining_cells": remaining,
        "notebook_path": path.display().to_string(),
    }))
}
