//! Whole-document tools.
//!
//! Tools: create_notebook, read_notebook, write_notebook, list_cells,
//! get_structure, notebook_diff, undo_last_operation

use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};

use crate::convert::{cell_summary, output_brief};
use crate::diff;
use crate::error::{NbError, Result};
use crate::notebook::{Cell, CellKind, Notebook};
use crate::schema;
use crate::session::NotebookSession;
use crate::store;
use crate::tools::{NotebookArgs, ToolDef};

/// Arguments of `create_notebook`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateNotebookArgs {
    /// Where to create the document
    pub notebook_path: String,
    /// Kernel recorded in the kernelspec
    #[serde(default)]
    pub kernel_name: Option<String>,
    /// Replace an existing file
    #[serde(default)]
    pub overwrite: bool,
}

/// Arguments of `read_notebook`.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadNotebookArgs {
    /// Document to read
    pub notebook_path: String,
    /// Render outputs of code cells
    #[serde(default = "default_true")]
    pub include_outputs: bool,
}

fn default_true() -> bool {
    true
}

/// One cell of a `write_notebook` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct CellSpec {
    /// Cell kind
    #[serde(rename = "type", default = "default_kind")]
    pub kind: CellKind,
    /// Source text
    #[serde(default)]
    pub content: String,
    /// Cell id; generated when absent
    #[serde(default)]
    pub id: Option<String>,
}

fn default_kind() -> CellKind {
    CellKind::Code
}

/// Document body of a `write_notebook` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct NotebookContent {
    /// Cells in order
    #[serde(default)]
    pub cells: Vec<CellSpec>,
    /// Replacement metadata; the current (or default) metadata is kept when absent
    #[serde(default)]
    pub metadata: Option<Map<String, JsonValue>>,
}

/// Arguments of `write_notebook`.
#[derive(Debug, Clone, Deserialize)]
pub struct WriteNotebookArgs {
    /// Document to replace
    pub notebook_path: String,
    /// New body
    pub content: NotebookContent,
}

/// Arguments of `notebook_diff`.
#[derive(Debug, Clone, Deserialize)]
pub struct DiffArgs {
    /// First document
    pub notebook_path_a: String,
    /// Second document
    pub notebook_path_b: String,
    /// Also compare rendered outputs of code cells
    #[serde(default)]
    pub include_outputs: bool,
}

/// Get all document tool definitions.
pub fn tools() -> Vec<ToolDef> {
    vec![
        ToolDef::new(
            "create_notebook",
            "Create an empty notebook with default metadata. Fails if the file exists \
             unless overwrite is true.",
            schema!(object {
                required: { "notebook_path": string => "Path of the new notebook" },
                optional: {
                    "kernel_name": string => "Kernel name (default python3)",
                    "overwrite": boolean => "Replace an existing file (default false)"
                }
            }),
        ),
        ToolDef::new(
            "read_notebook",
            "Read every cell of a notebook: id, type, source and optionally outputs.",
            schema!(object {
                required: { "notebook_path": string => "Notebook path" },
                optional: { "include_outputs": boolean => "Include rendered outputs (default true)" }
            }),
        ),
        ToolDef::new(
            "write_notebook",
            "Replace a notebook's content with {cells: [{type, content, id?}], metadata?}.",
            schema!(object {
                required: {
                    "notebook_path": string => "Notebook path",
                    "content": object => "Document body with a cells list and optional metadata"
                }
            }),
        ),
        ToolDef::new(
            "list_cells",
            "List cells with index, id, type and a short preview of the source.",
            schema!(object {
                required: { "notebook_path": string => "Notebook path" }
            }),
        ),
        ToolDef::new(
            "get_structure",
            "Summarize a notebook: cell counts per type, cell previews and kernel metadata.",
            schema!(object {
                required: { "notebook_path": string => "Notebook path" }
            }),
        ),
        ToolDef::new(
            "notebook_diff",
            "Compare two notebooks position by position.",
            schema!(object {
                required: {
                    "notebook_path_a": string => "First notebook",
                    "notebook_path_b": string => "Second notebook"
                },
                optional: { "include_outputs": boolean => "Compare outputs of code cells (default false)" }
            }),
        ),
        ToolDef::new(
            "undo_last_operation",
            "Revert the most recent change made to a notebook through this server. \
             The file is restored byte for byte as it was before that change.",
            schema!(object {
                required: { "notebook_path": string => "Notebook path" }
            }),
        ),
    ]
}

/// `create_notebook`
pub fn create_notebook(session: &mut NotebookSession, args: CreateNotebookArgs) -> Result<JsonValue> {
    let path = session.resolve(&args.notebook_path);
    let _lock = session.lock(&path)?;
    if path.exists() && !args.overwrite {
        return Err(NbError::NotebookExists(path));
    }
    let before = store::read_text(&path)?;

    let kernel = args
        .kernel_name
        .unwrap_or_else(|| session.config().default_kernel.clone());
    let nb = Notebook::new(&kernel);
    session.commit(&path, before, &nb)?;

    Ok(serde_json::json!({
        "success": true,
        "message": format!("Created notebook {}", path.display()),
        "notebook_path": path.display().to_string(),
        "kernel_name": kernel,
    }))
}

/// `read_notebook`
pub fn read_notebook(session: &mut NotebookSession, args: ReadNotebookArgs) -> Result<JsonValue> {
    let (path, nb) = session.load(&args.notebook_path)?;
    let cells: Vec<JsonValue> = nb
        .cells
        .iter()
        .map(|cell| {
            let mut obj = Map::new();
            obj.insert("id".to_string(), cell.id().into());
            obj.insert("type".to_string(), cell.kind().as_str().into());
            obj.insert("source".to_string(), cell.source().into());
            if args.include_outputs && cell.kind() == CellKind::Code {
                let outputs = cell.outputs().iter().map(output_brief).collect();
                obj.insert("outputs".to_string(), JsonValue::Array(outputs));
            }
            JsonValue::Object(obj)
        })
        .collect();

    Ok(serde_json::json!({
        "notebook_path": path.display().to_string(),
        "cells": cells,
        "metadata": {
            "kernelspec": nb.kernelspec(),
            "language_info": nb.language_info(),
        },
    }))
}

/// `write_notebook`
pub fn write_notebook(session: &mut NotebookSession, args: WriteNotebookArgs) -> Result<JsonValue> {
    let mut seen = HashSet::new();
    for spec in &args.content.cells {
        if let Some(id) = spec.id.as_deref() {
            if id.is_empty() {
                return Err(NbError::invalid_args("write_notebook", "cell ids must not be empty"));
            }
            if !seen.insert(id) {
                return Err(NbError::invalid_args(
                    "write_notebook",
                    format!("duplicate cell id {}", id),
                ));
            }
        }
    }

    let path = session.resolve(&args.notebook_path);
    let _lock = session.lock(&path)?;
    let before = store::read_text(&path)?;

    let mut nb = match &before {
        Some(text) => {
            let mut nb = store::parse(&path, text)?;
            nb.cells.clear();
            nb
        }
        None => Notebook::new(&session.config().default_kernel),
    };
    if let Some(metadata) = args.content.metadata {
        nb.metadata = metadata;
    }
    // Supplied ids go in first so generated ones cannot collide with them.
    for spec in &args.content.cells {
        let id = spec.id.clone().unwrap_or_default();
        nb.cells.push(Cell::new(spec.kind, id, &spec.content));
    }
    nb.ensure_cell_ids();

    session.commit(&path, before, &nb)?;
    Ok(serde_json::json!({
        "success": true,
        "notebook_path": path.display().to_string(),
        "cell_count": nb.cells.len(),
        "cell_ids": nb.cells.iter().map(Cell::id).collect::<Vec<_>>(),
    }))
}

/// `list_cells`
pub fn list_cells(session: &mut NotebookSession, args: NotebookArgs) -> Result<JsonValue> {
    let (path, nb) = session.load(&args.notebook_path)?;
    let cells: Vec<JsonValue> = nb
        .cells
        .iter()
        .enumerate()
        .map(|(idx, cell)| cell_summary(idx, cell))
        .collect();
    Ok(serde_json::json!({
        "notebook_path": path.display().to_string(),
        "cell_count": cells.len(),
        "cells": cells,
    }))
}

/// `get_structure`
pub fn get_structure(session: &mut NotebookSession, args: NotebookArgs) -> Result<JsonValue> {
    let (path, nb) = session.load(&args.notebook_path)?;

    let mut cell_types: BTreeMap<&str, usize> = BTreeMap::new();
    for cell in &nb.cells {
        *cell_types.entry(cell.kind().as_str()).or_default() += 1;
    }
    let cells: Vec<JsonValue> = nb
        .cells
        .iter()
        .enumerate()
        .map(|(idx, cell)| cell_summary(idx, cell))
        .collect();

    Ok(serde_json::json!({
        "notebook_path": path.display().to_string(),
        "cell_count": nb.cells.len(),
        "cell_types": cell_types,
        "cells": cells,
        "metadata": {
            "kernelspec": nb.kernelspec(),
            "language_info": nb.language_info(),
        },
        "nbformat": format!("{}.{}", nb.nbformat, nb.nbformat_minor),
    }))
}

/// `notebook_diff`
pub fn notebook_diff(session: &mut NotebookSession, args: DiffArgs) -> Result<JsonValue> {
    let (path_a, a) = session.load(&args.notebook_path_a)?;
    let (path_b, b) = session.load(&args.notebook_path_b)?;
    let result = diff::compare(&a, &b, args.include_outputs);

    Ok(serde_json::json!({
        "notebook_a": path_a.display().to_string(),
        "notebook_b": path_b.display().to_string(),
        "cell_count_diff": result.cell_count_diff,
        "total_differences": result.differences.len(),
        "differences": result.differences,
        "metadata_diff": result.metadata_diff,
    }))
}

/// `undo_last_operation`
pub fn undo_last_operation(session: &mut NotebookSession, args: NotebookArgs) -> Result<JsonValue> {
    let (path, remaining) = session.undo(&args.notebook_path)?;
    Ok(serde_json::json!({
        "success": true,
        "message": format!("Reverted last change to {}", path.display()),
        "notebook_path": path.display().to_string(),
        "remaining": remaining,
    }))
}
