//! Cell execution.
//!
//! A [`KernelClient`] runs code on a real kernel, one long-lived kernel per
//! notebook; [`run_cells`] prepares the request from a document and writes
//! the produced outputs back into it.
//! Timeouts and kernel failures end up as `error` outputs on the affected
//! cell, never as a separate channel.

mod nbclient;

pub use nbclient::NbClientKernel;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::notebook::{CellKind, Notebook, Output};

/// Error name recorded when a cell exceeds its timeout.
pub const TIMEOUT_ENAME: &str = "CellTimeoutError";
/// Error name recorded when the kernel fails outside of user code.
pub const KERNEL_ENAME: &str = "KernelError";

/// Source of one code cell to run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellSource {
    /// Position of the cell in its document
    pub index: usize,
    /// Code to run
    pub source: String,
}

/// Everything a kernel client needs to run a batch of cells.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRequest {
    /// Notebook the cells belong to; selects the kernel
    #[serde(skip)]
    pub notebook: PathBuf,
    /// Kernel to start (e.g. `python3`)
    pub kernel_name: String,
    /// Limit for each cell
    #[serde(rename = "timeout", serialize_with = "as_secs")]
    pub cell_timeout: Duration,
    /// Stop after the first cell that errors or times out
    pub stop_on_error: bool,
    /// Cells in execution order
    pub cells: Vec<CellSource>,
}

fn as_secs<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs().max(1))
}

/// Terminal state of a cell run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Ran to completion without raising
    Completed,
    /// Raised, or the kernel failed while running it
    Errored,
    /// Hit the timeout
    TimedOut,
}

/// Result of running one cell.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CellRun {
    /// Position of the cell in its document
    pub index: usize,
    /// How the run ended
    pub status: RunStatus,
    /// Counter assigned by the kernel
    #[serde(default)]
    pub execution_count: Option<u32>,
    /// Outputs captured, possibly partial
    #[serde(default)]
    pub outputs: Vec<Output>,
}

/// Runs code cells on a kernel.
///
/// Kernels are kept per notebook, so state defined by one request is visible
/// to the next request for the same notebook.
pub trait KernelClient {
    /// Run `request.cells` in order on the kernel of `request.notebook`,
    /// starting it first if needed.
    ///
    /// Returns one run per cell that was attempted. With `stop_on_error`
    /// the list ends at the first failing cell. An `Err` means the kernel
    /// could not be used at all.
    fn execute(&mut self, request: &ExecutionRequest) -> Result<Vec<CellRun>>;

    /// Shut down the kernel of `notebook`. Returns whether one was running.
    fn shutdown(&mut self, _notebook: &Path) -> bool {
        false
    }

    /// Shut down every kernel. Returns how many were running.
    fn shutdown_all(&mut self) -> usize {
        0
    }
}

/// Per-cell outcome of [`run_cells`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionReport {
    /// `(index, status)` of every cell that ran
    pub ran: Vec<(usize, RunStatus)>,
    /// Indices that were never attempted
    pub skipped: Vec<usize>,
}

impl ExecutionReport {
    /// Cells that completed cleanly.
    pub fn successful(&self) -> usize {
        self.ran
            .iter()
            .filter(|(_, s)| *s == RunStatus::Completed)
            .count()
    }

    /// Cells that errored or timed out.
    pub fn failed(&self) -> usize {
        self.ran.len() - self.successful()
    }
}

/// Run the code cells at `indices` and replace their outputs.
///
/// Non-code indices are ignored. The kernel is taken from the document's
/// kernelspec, falling back to `default_kernel`.
pub fn run_cells(
    client: &mut dyn KernelClient,
    notebook: &Path,
    nb: &mut Notebook,
    indices: &[usize],
    cell_timeout: Duration,
    stop_on_error: bool,
    default_kernel: &str,
) -> ExecutionReport {
    let cells: Vec<CellSource> = indices
        .iter()
        .filter_map(|&index| {
            let cell = nb.cells.get(index)?;
            (cell.kind() == CellKind::Code).then(|| CellSource {
                index,
                source: cell.source().to_string(),
            })
        })
        .collect();
    let request = ExecutionRequest {
        notebook: notebook.to_path_buf(),
        kernel_name: nb.kernel_name().unwrap_or(default_kernel).to_string(),
        cell_timeout,
        stop_on_error,
        cells,
    };

    let runs = match client.execute(&request) {
        Ok(runs) => runs,
        Err(e) => {
            warn!(error = %e, "kernel client failed");
            failed_runs(&request, &e.to_string())
        }
    };

    let mut report = ExecutionReport::default();
    for run in runs {
        if !request.cells.iter().any(|c| c.index == run.index) {
            warn!(index = run.index, "kernel reported a cell that was not requested");
            continue;
        }
        report.ran.push((run.index, run.status));
        apply_run(nb, run, cell_timeout);
    }
    report.skipped = request
        .cells
        .iter()
        .map(|c| c.index)
        .filter(|i| !report.ran.iter().any(|(r, _)| r == i))
        .collect();
    report
}

/// Runs recorded when the client could not be used: every cell gets the
/// failure, or only the first one when stopping on error.
fn failed_runs(request: &ExecutionRequest, message: &str) -> Vec<CellRun> {
    let take = if request.stop_on_error { 1 } else { request.cells.len() };
    request
        .cells
        .iter()
        .take(take)
        .map(|c| CellRun {
            index: c.index,
            status: RunStatus::Errored,
            execution_count: None,
            outputs: vec![Output::error(KERNEL_ENAME, message)],
        })
        .collect()
}

fn apply_run(nb: &mut Notebook, run: CellRun, cell_timeout: Duration) {
    let Some(code) = nb.cells.get_mut(run.index).and_then(|c| c.as_code_mut()) else {
        return;
    };
    let mut outputs = run.outputs;
    match run.status {
        RunStatus::TimedOut => outputs.push(Output::error(
            TIMEOUT_ENAME,
            format!(
                "cell execution timed out after {} seconds",
                cell_timeout.as_secs()
            ),
        )),
        RunStatus::Errored if !outputs.iter().any(Output::is_error) => outputs.push(
            Output::error(KERNEL_ENAME, "kernel failed while running the cell"),
        ),
        _ => {}
    }
    code.execution_count = run.execution_count;
    code.outputs = outputs;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NbError;
    use crate::notebook::Cell;

    /// Replays canned runs and remembers the last request.
    struct Scripted {
        runs: std::result::Result<Vec<CellRun>, String>,
        seen: Option<ExecutionRequest>,
    }

    impl KernelClient for Scripted {
        fn execute(&mut self, request: &ExecutionRequest) -> Result<Vec<CellRun>> {
            self.seen = Some(request.clone());
            self.runs.clone().map_err(NbError::Kernel)
        }
    }

    fn scripted(runs: std::result::Result<Vec<CellRun>, String>) -> Scripted {
        Scripted { runs, seen: None }
    }

    fn path() -> &'static Path {
        Path::new("/w/nb.ipynb")
    }

    fn nb() -> Notebook {
        let mut nb = Notebook::new("python3");
        for (kind, src) in [
            (CellKind::Code, "print('a')"),
            (CellKind::Markdown, "# md"),
            (CellKind::Code, "1/0"),
        ] {
            let id = nb.fresh_cell_id();
            nb.cells.push(Cell::new(kind, id, src));
        }
        nb
    }

    fn run(index: usize, status: RunStatus, outputs: Vec<Output>) -> CellRun {
        CellRun {
            index,
            status,
            execution_count: Some(index as u32 + 1),
            outputs,
        }
    }

    #[test]
    fn test_only_code_cells_are_requested() {
        let mut client = scripted(Ok(vec![]));
        let mut doc = nb();
        run_cells(&mut client, path(), &mut doc, &[0, 1, 2], Duration::from_secs(5), false, "python3");
        let req = client.seen.unwrap();
        let indices: Vec<usize> = req.cells.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 2]);
        assert_eq!(req.kernel_name, "python3");
        assert_eq!(req.notebook, path());
    }

    #[test]
    fn test_outputs_replaced_wholesale() {
        let mut doc = nb();
        doc.cells[0].as_code_mut().unwrap().outputs = vec![Output::stdout("old\n")];
        let mut client = scripted(Ok(vec![run(0, RunStatus::Completed, vec![Output::stdout("a\n")])]));

        let report = run_cells(&mut client, path(), &mut doc, &[0], Duration::from_secs(5), false, "python3");
        assert_eq!(doc.cells[0].outputs(), &[Output::stdout("a\n")]);
        assert_eq!(doc.cells[0].execution_count(), Some(1));
        assert_eq!(report.successful(), 1);
    }

    #[test]
    fn test_timeout_keeps_partial_outputs() {
        let mut doc = nb();
        let mut client = scripted(Ok(vec![run(
            0,
            RunStatus::TimedOut,
            vec![Output::stdout("partial\n")],
        )]));

        let report = run_cells(&mut client, path(), &mut doc, &[0], Duration::from_secs(2), false, "python3");
        let outputs = doc.cells[0].outputs();
        assert_eq!(outputs[0], Output::stdout("partial\n"));
        match &outputs[1] {
            Output::Error { ename, evalue, .. } => {
                assert_eq!(ename, TIMEOUT_ENAME);
                assert!(evalue.contains("2 seconds"));
            }
            other => panic!("expected error output, got {:?}", other),
        }
        assert_eq!(report.failed(), 1);
    }

    #[test]
    fn test_client_failure_becomes_error_output() {
        let mut doc = nb();
        let mut client = scripted(Err("No module named 'nbclient'".to_string()));
        let report = run_cells(&mut client, path(), &mut doc, &[0, 2], Duration::from_secs(5), false, "python3");

        assert_eq!(report.failed(), 2);
        for idx in [0, 2] {
            let outputs = doc.cells[idx].outputs();
            assert_eq!(outputs.len(), 1);
            assert!(crate::convert::output_text(&outputs[0]).contains("nbclient"));
        }
    }

    #[test]
    fn test_client_failure_with_stop_on_error_skips_rest() {
        let mut doc = nb();
        let mut client = scripted(Err("boom".to_string()));
        let report = run_cells(&mut client, path(), &mut doc, &[0, 2], Duration::from_secs(5), true, "python3");
        assert_eq!(report.ran.len(), 1);
        assert_eq!(report.skipped, vec![2]);
        assert!(doc.cells[2].outputs().is_empty());
    }

    #[test]
    fn test_errored_without_error_output_gets_one() {
        let mut doc = nb();
        let mut client = scripted(Ok(vec![run(2, RunStatus::Errored, vec![])]));
        run_cells(&mut client, path(), &mut doc, &[2], Duration::from_secs(5), false, "python3");
        assert!(doc.cells[2].outputs()[0].is_error());
    }

    #[test]
    fn test_unreported_cells_are_skipped() {
        let mut doc = nb();
        let err = Output::error("ZeroDivisionError", "division by zero");
        let mut client = scripted(Ok(vec![run(0, RunStatus::Errored, vec![err])]));
        let report = run_cells(&mut client, path(), &mut doc, &[0, 2], Duration::from_secs(5), true, "python3");
        assert_eq!(report.skipped, vec![2]);
        assert_eq!(doc.cells[0].outputs().len(), 1);
    }

    #[test]
    fn test_kernel_name_from_document() {
        let mut doc = Notebook::new("ir");
        let id = doc.fresh_cell_id();
        doc.cells.push(Cell::new(CellKind::Code, id, "1"));
        let mut client = scripted(Ok(vec![]));
        run_cells(&mut client, path(), &mut doc, &[0], Duration::from_secs(5), false, "python3");
        assert_eq!(client.seen.unwrap().kernel_name, "ir");
    }
}
