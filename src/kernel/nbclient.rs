//! Kernel client backed by Jupyter's `nbclient` package.
//!
//! Each notebook gets its own driver: the configured Python interpreter
//! running a small script that keeps one kernel alive between requests.
//! A request goes to the driver as one JSON line; the driver answers with one
//! line per finished cell and a closing `done` line. `nbclient` enforces the
//! per-cell timeout by interrupting the kernel. This side enforces an overall
//! deadline per request and stops the driver when it is exceeded, keeping the
//! lines already read.
//!
//! Closing a driver's stdin makes it shut its kernel down and exit. A busy
//! driver gets SIGTERM, which unwinds it through the same shutdown, and is
//! killed only if it is still running after the stop grace period.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{CellRun, ExecutionRequest, KernelClient, RunStatus, KERNEL_ENAME};
use crate::error::{NbError, Result};
use crate::notebook::Output;

/// Python side of the protocol. Reads one request per stdin line and prints
/// one `{index, status, execution_count, outputs}` line per cell, then
/// `{"done": true}` (with an `error` when the request could not be served).
const DRIVER: &str = r#"
import json, signal, sys, time
import nbformat
from nbclient import NotebookClient
from nbclient.exceptions import CellTimeoutError, DeadKernelError

client = None

def stop():
    global client
    if client is None:
        return
    try:
        client.kc.stop_channels()
        client.km.shutdown_kernel(now=True)
    except Exception as e:
        print(f"kernel shutdown failed: {e}", file=sys.stderr, flush=True)
    client = None

def terminate(signum, frame):
    raise SystemExit(0)

signal.signal(signal.SIGTERM, terminate)

def emit(record):
    print(json.dumps(record), flush=True)

def report(index, status, cell):
    emit({"index": index, "status": status,
          "execution_count": cell.get("execution_count"),
          "outputs": cell.get("outputs", [])})

def not_run(cells, reason):
    for c in cells:
        emit({"index": c["index"], "status": "errored", "execution_count": None,
              "outputs": [{"output_type": "error", "ename": "KernelError",
                           "evalue": reason, "traceback": []}]})

def run(req):
    global client
    nb = nbformat.v4.new_notebook()
    nb.cells = [nbformat.v4.new_code_cell(c["source"]) for c in req["cells"]]
    if client is not None and client.kernel_name != req["kernel_name"]:
        stop()
    if client is None:
        client = NotebookClient(nb, kernel_name=req["kernel_name"],
                                allow_errors=True, interrupt_on_timeout=True)
        client.km = client.create_kernel_manager()
        client.start_new_kernel()
        client.start_new_kernel_client()
    client.nb = nb
    client.timeout = req["timeout"]
    for pos, cell in enumerate(nb.cells):
        index = req["cells"][pos]["index"]
        started = time.monotonic()
        try:
            client.execute_cell(cell, pos)
        except CellTimeoutError:
            status = "timed_out"
        except DeadKernelError:
            report(index, "errored", cell)
            stop()
            if not req["stop_on_error"]:
                not_run(req["cells"][pos + 1:], "kernel died before the cell ran")
            return
        else:
            if time.monotonic() - started >= req["timeout"]:
                status = "timed_out"
            elif any(o.get("output_type") == "error" for o in cell.outputs):
                status = "errored"
            else:
                status = "completed"
        report(index, status, cell)
        if status != "completed" and req["stop_on_error"]:
            return

try:
    for line in sys.stdin:
        if not line.strip():
            continue
        try:
            run(json.loads(line))
            emit({"done": True})
        except Exception as e:
            stop()
            emit({"done": True, "error": f"{type(e).__name__}: {e}"})
finally:
    stop()
"#;

/// Time allowed for interpreter and kernel start-up on top of cell timeouts.
const DEFAULT_STARTUP_GRACE: Duration = Duration::from_secs(60);

/// Time a driver gets to shut its kernel down before it is signalled, and
/// again before it is killed.
const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

/// How long to wait for the rest of a stopped driver's stderr.
const STDERR_DRAIN: Duration = Duration::from_secs(1);

/// Characters of stderr kept in kernel error messages.
const STDERR_TAIL: usize = 2000;

/// [`KernelClient`] running cells through `nbclient`, one driver process per
/// notebook.
#[derive(Debug)]
pub struct NbClientKernel {
    python: String,
    startup_grace: Duration,
    stop_grace: Duration,
    runtime: Option<Runtime>,
    drivers: HashMap<PathBuf, Driver>,
}

impl NbClientKernel {
    /// Client using the `python` interpreter (which must have `nbclient`).
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
            startup_grace: DEFAULT_STARTUP_GRACE,
            stop_grace: DEFAULT_STOP_GRACE,
            runtime: None,
            drivers: HashMap::new(),
        }
    }

    /// Override the start-up allowance.
    pub fn with_startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }

    /// Override how long a driver gets to stop before it is signalled.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Number of notebooks with a running kernel.
    pub fn running(&self) -> usize {
        self.drivers.len()
    }

    /// Overall deadline for a request.
    fn deadline_for(&self, request: &ExecutionRequest) -> Duration {
        let cells = u32::try_from(request.cells.len()).unwrap_or(u32::MAX);
        self.startup_grace + request.cell_timeout.saturating_mul(cells)
    }

    fn take_runtime(&mut self) -> Result<Runtime> {
        match self.runtime.take() {
            Some(runtime) => Ok(runtime),
            None => Ok(tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?),
        }
    }

    async fn run(&mut self, request: &ExecutionRequest) -> Result<Vec<CellRun>> {
        let mut payload = serde_json::to_string(request)?;
        payload.push('\n');
        let deadline = Instant::now() + self.deadline_for(request);

        let driver = match self.drivers.entry(request.notebook.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                debug!(python = %self.python, notebook = %request.notebook.display(), "starting kernel driver");
                entry.insert(Driver::spawn(&self.python)?)
            }
        };
        debug!(kernel = %request.kernel_name, cells = request.cells.len(), "sending cells to kernel driver");
        let (runs, ending) = driver.exchange(payload.as_bytes(), deadline).await;

        let stderr = match ending {
            Ending::Done | Ending::Failed(_) => String::new(),
            Ending::Exited | Ending::Deadline => {
                let busy = ending == Ending::Deadline;
                if busy {
                    warn!(cells_done = runs.len(), "kernel driver exceeded its deadline, stopping it");
                }
                match self.drivers.remove(&request.notebook) {
                    Some(driver) => driver.stop(self.stop_grace, busy).await,
                    None => String::new(),
                }
            }
        };
        finish(request, runs, &ending, &stderr)
    }
}

impl KernelClient for NbClientKernel {
    fn execute(&mut self, request: &ExecutionRequest) -> Result<Vec<CellRun>> {
        if request.cells.is_empty() {
            return Ok(Vec::new());
        }
        let runtime = self.take_runtime()?;
        let result = runtime.block_on(self.run(request));
        self.runtime = Some(runtime);
        result
    }

    fn shutdown(&mut self, notebook: &Path) -> bool {
        let Some(driver) = self.drivers.remove(notebook) else {
            return false;
        };
        // Drivers only exist after a runtime was built.
        if let Some(runtime) = self.runtime.take() {
            runtime.block_on(driver.stop(self.stop_grace, false));
            self.runtime = Some(runtime);
        }
        info!(notebook = %notebook.display(), "kernel shut down");
        true
    }

    fn shutdown_all(&mut self) -> usize {
        let notebooks: Vec<PathBuf> = self.drivers.keys().cloned().collect();
        notebooks.iter().filter(|nb| self.shutdown(nb)).count()
    }
}

impl Drop for NbClientKernel {
    fn drop(&mut self) {
        self.shutdown_all();
    }
}

/// How a request ended on the driver side.
#[derive(Debug, Clone, PartialEq)]
enum Ending {
    /// The driver answered the whole request
    Done,
    /// The driver gave up on the request and dropped its kernel
    Failed(String),
    /// The driver process went away
    Exited,
    /// The request ran past its deadline
    Deadline,
}

/// One line printed by the driver.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DriverLine {
    Run(CellRun),
    Done {
        done: bool,
        #[serde(default)]
        error: Option<String>,
    },
}

/// A driver process and the kernel it keeps.
#[derive(Debug)]
struct Driver {
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
    stderr: Arc<Mutex<String>>,
    stderr_task: JoinHandle<()>,
}

impl Driver {
    fn spawn(python: &str) -> Result<Self> {
        let mut cmd = Command::new(python);
        cmd.arg("-c")
            .arg(DRIVER)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| NbError::Kernel(format!("failed to start {}: {}", python, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| NbError::Kernel("failed to capture driver stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| NbError::Kernel("failed to capture driver stdout".into()))?;
        let stderr_pipe = child
            .stderr
            .take()
            .ok_or_else(|| NbError::Kernel("failed to capture driver stderr".into()))?;

        let stderr = Arc::new(Mutex::new(String::new()));
        let stderr_task = tokio::spawn(collect_stderr(stderr_pipe, Arc::clone(&stderr)));

        Ok(Self {
            child,
            stdin,
            lines: BufReader::new(stdout).lines(),
            stderr,
            stderr_task,
        })
    }

    /// Send one request and read its lines until `done`, the driver's exit
    /// or the deadline.
    async fn exchange(&mut self, payload: &[u8], deadline: Instant) -> (Vec<CellRun>, Ending) {
        let mut runs = Vec::new();
        if let Err(e) = self.send(payload).await {
            debug!(error = %e, "kernel driver closed its input");
            return (runs, Ending::Exited);
        }

        loop {
            match tokio::time::timeout_at(deadline, self.lines.next_line()).await {
                Ok(Ok(Some(line))) => match parse_line(&line) {
                    Some(DriverLine::Run(run)) => runs.push(run),
                    Some(DriverLine::Done { done: true, error }) => {
                        let ending = error.map_or(Ending::Done, Ending::Failed);
                        return (runs, ending);
                    }
                    Some(DriverLine::Done { .. }) | None => {}
                },
                Ok(Ok(None)) => return (runs, Ending::Exited),
                Ok(Err(e)) => {
                    debug!(error = %e, "reading from kernel driver failed");
                    return (runs, Ending::Exited);
                }
                Err(_) => return (runs, Ending::Deadline),
            }
        }
    }

    async fn send(&mut self, payload: &[u8]) -> std::io::Result<()> {
        self.stdin.write_all(payload).await?;
        self.stdin.flush().await
    }

    /// Stop the driver and return the tail of its stderr.
    ///
    /// An idle driver exits on end of input. A `busy` one is signalled
    /// straight away.
    async fn stop(self, grace: Duration, busy: bool) -> String {
        let Driver {
            mut child,
            stdin,
            lines,
            stderr,
            mut stderr_task,
        } = self;
        drop(stdin);
        drop(lines);

        if busy || tokio::time::timeout(grace, child.wait()).await.is_err() {
            send_sigterm(&child);
        }
        if tokio::time::timeout(grace, child.wait()).await.is_err() {
            warn!(grace_secs = grace.as_secs_f64(), "kernel driver did not stop, killing it");
            let _ = child.kill().await;
        }

        if tokio::time::timeout(STDERR_DRAIN, &mut stderr_task).await.is_err() {
            stderr_task.abort();
        }
        let tail = stderr.lock().map(|text| stderr_tail(&text)).unwrap_or_default();
        tail
    }
}

async fn collect_stderr(pipe: ChildStderr, buf: Arc<Mutex<String>>) {
    let mut lines = BufReader::new(pipe).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(%line, "kernel driver stderr");
        if let Ok(mut text) = buf.lock() {
            text.push_str(&line);
            text.push('\n');
            if text.len() > STDERR_TAIL * 4 {
                *text = stderr_tail(&text);
            }
        }
    }
}

#[cfg(unix)]
fn send_sigterm(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!(pid, error = %e, "failed to signal kernel driver");
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child) {}

/// Parse one driver line; anything else is logged.
fn parse_line(line: &str) -> Option<DriverLine> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<DriverLine>(line) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            debug!(?line, ?e, "unrecognised line from kernel driver");
            None
        }
    }
}

fn stderr_tail(stderr: &str) -> String {
    let trimmed = stderr.trim();
    let count = trimmed.chars().count();
    if count <= STDERR_TAIL {
        return trimmed.to_string();
    }
    trimmed.chars().skip(count - STDERR_TAIL).collect()
}

fn errored(index: usize, message: String) -> CellRun {
    CellRun {
        index,
        status: RunStatus::Errored,
        execution_count: None,
        outputs: vec![Output::error(KERNEL_ENAME, message)],
    }
}

/// Account for the cells a request left unreported.
///
/// The first unreported cell was in flight and gets the blame. The cells
/// after it never ran and are marked as such, unless the request stops on
/// error.
fn finish(
    request: &ExecutionRequest,
    mut runs: Vec<CellRun>,
    ending: &Ending,
    stderr: &str,
) -> Result<Vec<CellRun>> {
    if *ending == Ending::Done {
        return Ok(runs);
    }
    let stopped_on_error = request.stop_on_error
        && runs
            .last()
            .map_or(false, |r| r.status != RunStatus::Completed);
    if stopped_on_error {
        return Ok(runs);
    }
    let pending: Vec<usize> = request
        .cells
        .iter()
        .map(|c| c.index)
        .filter(|index| !runs.iter().any(|r| r.index == *index))
        .collect();
    let Some((&in_flight, rest)) = pending.split_first() else {
        return Ok(runs);
    };

    match ending {
        Ending::Deadline => runs.push(CellRun {
            index: in_flight,
            status: RunStatus::TimedOut,
            execution_count: None,
            outputs: Vec::new(),
        }),
        _ => {
            let (what, detail) = match ending {
                Ending::Failed(message) => ("failed", message.clone()),
                _ => ("exited", stderr_tail(stderr)),
            };
            if runs.is_empty() {
                return Err(NbError::Kernel(if detail.is_empty() {
                    format!("kernel driver {} without output", what)
                } else {
                    detail
                }));
            }
            runs.push(errored(
                in_flight,
                format!("kernel {} before the cell finished: {}", what, detail),
            ));
        }
    }
    if !request.stop_on_error {
        for &index in rest {
            runs.push(errored(index, "kernel stopped before the cell ran".to_string()));
        }
    }
    Ok(runs)
}
