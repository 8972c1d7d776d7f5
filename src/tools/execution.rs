//! Execution and output tools.
//!
//! Tools: execute_cell, run_all_cells, read_cell_output, read_notebook_outputs,
//! shutdown_kernel
//!
//! Each notebook keeps one kernel across calls, so `execute_cell` sees the
//! variables defined by earlier executions until the kernel is shut down.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::info;

use crate::convert::outputs_to_json;
use crate::error::{NbError, Result};
use crate::kernel::{run_cells, RunStatus};
use crate::notebook::CellKind;
use crate::schema;
use crate::session::NotebookSession;
use crate::store;
use crate::tools::{CellTarget, NotebookArgs, ToolDef};

/// Arguments of `execute_cell`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteCellArgs {
    /// Cell to run
    #[serde(flatten)]
    pub target: CellTarget,
    /// Seconds before the cell is interrupted
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// Arguments of `run_all_cells`.
#[derive(Debug, Clone, Deserialize)]
pub struct RunAllArgs {
    /// Notebook to run
    pub notebook_path: String,
    /// Seconds allowed per cell
    #[serde(default)]
    pub timeout: Option<u64>,
    /// Stop after the first failing cell
    #[serde(default)]
    pub stop_on_error: bool,
}

fn status_str(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Completed => "completed",
        RunStatus::Errored => "error",
        RunStatus::TimedOut => "timeout",
    }
}

/// Per-cell timeout of a call, never below one second.
fn cell_timeout(session: &NotebookSession, timeout: Option<u64>) -> Duration {
    timeout
        .map(|secs| Duration::from_secs(secs.max(1)))
        .unwrap_or(session.config().cell_timeout)
}

/// Get all execution tool definitions.
pub fn tools() -> Vec<ToolDef> {
    vec![
        ToolDef::new(
            "execute_cell",
            "Execute one code cell in the notebook's kernel and store its outputs. The kernel \
             is started on first use and keeps its state across calls.",
            schema!(object {
                required: { "notebook_path": string => "Notebook path" },
                optional: {
                    "cell_id": string => "Cell id",
                    "cell_index": integer => "Cell index",
                    "timeout": integer => "Timeout in seconds (default 60)"
                }
            }),
        ),
        ToolDef::new(
            "run_all_cells",
            "Execute every code cell in order in the notebook's kernel and store the outputs.",
            schema!(object {
                required: { "notebook_path": string => "Notebook path" },
                optional: {
                    "timeout": integer => "Timeout per cell in seconds (default 60)",
                    "stop_on_error": boolean => "Stop at the first failing cell (default false)"
                }
            }),
        ),
        ToolDef::new(
            "read_cell_output",
            "Read the outputs of one cell.",
            schema!(object {
                required: { "notebook_path": string => "Notebook path" },
                optional: {
                    "cell_id": string => "Cell id",
                    "cell_index": integer => "Cell index"
                }
            }),
        ),
        ToolDef::new(
            "read_notebook_outputs",
            "Read the outputs of every code cell that has any.",
            schema!(object {
                required: { "notebook_path": string => "Notebook path" }
            }),
        ),
        ToolDef::new(
            "shutdown_kernel",
            "Shut down the kernel of a notebook, discarding its state. The next execution \
             starts a new kernel.",
            schema!(object {
                required: { "notebook_path": string => "Notebook path" }
            }),
        ),
    ]
}

/// `execute_cell`
pub fn execute_cell(session: &mut NotebookSession, args: ExecuteCellArgs) -> Result<JsonValue> {
    let cell_ref = args.target.cell_ref("execute_cell")?;
    let path = session.resolve(&args.target.notebook_path);
    let _lock = session.lock(&path)?;
    let (before, mut nb) = store::load_with_text(&path)?;
    let idx = nb.find(&cell_ref)?;
    let kind = nb.cells[idx].kind();
    if kind != CellKind::Code {
        return Err(NbError::invalid_args(
            "execute_cell",
            format!("cell {} is a {} cell, only code cells can be executed", idx, kind),
        ));
    }

    let timeout = cell_timeout(session, args.timeout);
    let default_kernel = session.config().default_kernel.clone();
    let report = run_cells(session.kernel(), &path, &mut nb, &[idx], timeout, false, &default_kernel);
    session.commit(&path, Some(before), &nb)?;

    let status = report
        .ran
        .first()
        .map(|(_, s)| *s)
        .unwrap_or(RunStatus::Errored);
    let cell = &nb.cells[idx];
    Ok(serde_json::json!({
        "success": status == RunStatus::Completed,
        "cell_id": cell.id(),
        "index": idx,
        "status": status_str(status),
        "execution_count": cell.execution_count(),
        "outputs": outputs_to_json(cell.outputs()),
    }))
}

/// `run_all_cells`
pub fn run_all_cells(session: &mut NotebookSession, args: RunAllArgs) -> Result<JsonValue> {
    let path = session.resolve(&args.notebook_path);
    let _lock = session.lock(&path)?;
    let (before, mut nb) = store::load_with_text(&path)?;
    let indices: Vec<usize> = nb
        .cells
        .iter()
        .enumerate()
        .filter(|(_, c)| c.kind() == CellKind::Code)
        .map(|(idx, _)| idx)
        .collect();

    let timeout = cell_timeout(session, args.timeout);
    let default_kernel = session.config().default_kernel.clone();
    let report = run_cells(
        session.kernel(),
        &path,
        &mut nb,
        &indices,
        timeout,
        args.stop_on_error,
        &default_kernel,
    );
    session.commit(&path, Some(before), &nb)?;
    info!(
        path = %path.display(),
        ran = report.ran.len(),
        failed = report.failed(),
        "ran notebook"
    );

    let results: Vec<JsonValue> = report
        .ran
        .iter()
        .map(|(idx, status)| {
            serde_json::json!({
                "index": idx,
                "cell_id": nb.cells[*idx].id(),
                "status": status_str(*status),
            })
        })
        .collect();

    Ok(serde_json::json!({
        "success": report.failed() == 0 && report.skipped.is_empty(),
        "notebook_path": path.display().to_string(),
        "cells_executed": report.ran.len(),
        "successful_cells": report.successful(),
        "failed_cells": report.failed(),
        "skipped_cells": report.skipped.len(),
        "results": results,
    }))
}

/// `read_cell_output`
pub fn read_cell_output(session: &mut NotebookSession, target: CellTarget) -> Result<JsonValue> {
    let cell_ref = target.cell_ref("read_cell_output")?;
    let (_, nb) = session.load(&target.notebook_path)?;
    let idx = nb.find(&cell_ref)?;
    let cell = &nb.cells[idx];
    Ok(serde_json::json!({
        "cell_id": cell.id(),
        "index": idx,
        "outputs": outputs_to_json(cell.outputs()),
    }))
}

/// `read_notebook_outputs`
pub fn read_notebook_outputs(session: &mut NotebookSession, args: NotebookArgs) -> Result<JsonValue> {
    let (path, nb) = session.load(&args.notebook_path)?;
    let cells: Vec<JsonValue> = nb
        .cells
        .iter()
        .enumerate()
        .filter(|(_, c)| !c.outputs().is_empty())
        .map(|(idx, cell)| {
            serde_json::json!({
                "cell_index": idx,
                "cell_id": cell.id(),
                "outputs": outputs_to_json(cell.outputs()),
            })
        })
        .collect();
    Ok(serde_json::json!({
        "notebook_path": path.display().to_string(),
        "cells": cells,
    }))
}

/// `shutdown_kernel`
pub fn shutdown_kernel(session: &mut NotebookSession, args: NotebookArgs) -> Result<JsonValue> {
    let path = session.resolve(&args.notebook_path);
    let was_running = session.kernel().shutdown(&path);
    Ok(serde_json::json!({
        "success": true,
        "notebook_path": path.display().to_string(),
        "was_running": was_running,
    }))
}
