//! Jupyter notebook tool server.
//!
//! Run with `nbmcp --workspace /path/to/project`.

use std::time::Duration;

use clap::Parser;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

use nbmcp::{McpServer, NbClientKernel, NotebookSession, SessionConfig, Workspace};

/// Jupyter notebook tool server.
///
/// Exposes notebook editing and execution as tools for AI agents.
/// Communicates via JSON-RPC 2.0 over stdin/stdout.
#[derive(Parser)]
#[command(name = "nbmcp")]
#[command(version, about, long_about = None)]
struct Args {
    /// Directory that relative notebook paths resolve against.
    /// Defaults to the current directory.
    #[arg(long, value_name = "DIR")]
    workspace: Option<String>,

    /// Python interpreter used to run kernels (needs nbclient).
    #[arg(long, env = "NBMCP_PYTHON", default_value = "python3")]
    python: String,

    /// Kernel for new notebooks and for notebooks without a kernelspec.
    #[arg(long, default_value = "python3")]
    kernel: String,

    /// Default per-cell timeout in seconds.
    #[arg(long, value_name = "SECS", default_value_t = 60)]
    timeout: u64,

    /// Undo snapshots kept per notebook.
    #[arg(long, value_name = "N", default_value_t = 10)]
    history_size: usize,

    /// Seconds to wait for another process's lock on a notebook.
    #[arg(long, value_name = "SECS", default_value_t = 10)]
    lock_timeout: u64,

    /// Enable debug logging to stderr.
    #[arg(long, short)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    // Set up logging; stdout carries the protocol
    let mut filter = EnvFilter::from_default_env();
    if args.verbose {
        if let Ok(directive) = "nbmcp=debug".parse::<Directive>() {
            filter = filter.add_directive(directive);
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut workspace = match Workspace::current_dir() {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("Error: Failed to read the current directory: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(dir) = &args.workspace {
        let absolute = match std::path::absolute(dir) {
            Ok(path) => path,
            Err(e) => {
                eprintln!("Error: Invalid workspace '{}': {}", dir, e);
                std::process::exit(1);
            }
        };
        if let Err(e) = workspace.set_root(&absolute.to_string_lossy()) {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }

    let config = SessionConfig {
        default_kernel: args.kernel,
        cell_timeout: Duration::from_secs(args.timeout.max(1)),
        history_size: args.history_size,
        lock_timeout: Duration::from_secs(args.lock_timeout),
    };
    let kernel = Box::new(NbClientKernel::new(args.python));

    // Create session and server
    let session = NotebookSession::new(workspace, kernel, config);
    let mut server = McpServer::new(session);

    tracing::info!(workspace = %server.session().workspace().root().display(), "serving notebook tools");

    // Run the server; dropping it shuts the kernels down
    let result = server.run_sync();
    drop(server);
    if let Err(e) = result {
        eprintln!("Error: Server error: {}", e);
        std::process::exit(1);
    }
}
