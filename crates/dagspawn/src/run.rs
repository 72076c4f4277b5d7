use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use base64::Engine as _;
use clap::Args;
use dagspawn_contracts as contracts;
use dagspawn_graph::{doc, GraphDescriptor};
use dagspawn_node::backend::resolve_backend;
use dagspawn_node::logging::{init_logging, LogConfig};
use dagspawn_node::sim::{SimConfig, SimKernel};
use dagspawn_node::{Backend, Limits, NodeError};
use serde::Serialize;

use crate::util;

#[derive(Debug, Args)]
pub(crate) struct RunArgs {
    /// Graph to run (`*.json` document or binary).
    #[arg(long)]
    graph: PathBuf,

    #[arg(long, value_enum)]
    backend: Option<Backend>,

    #[arg(long, default_value_t = contracts::DEFAULT_WALL_MS)]
    wall_ms: u64,

    #[arg(long)]
    max_spawns: Option<usize>,

    #[arg(long)]
    max_pipes: Option<usize>,

    /// Node program for the `os` backend (defaults to `dagspawn-node` next to
    /// this executable, then `PATH`).
    #[arg(long)]
    node_bin: Option<PathBuf>,

    /// Log filter for the nodes (`DAGSPAWN_LOG` syntax).
    #[arg(long)]
    log: Option<String>,
}

#[derive(Debug, Serialize)]
struct GraphSummary {
    spawns: usize,
    pipes: usize,
    writes: usize,
    sha256: String,
}

#[derive(Debug, Serialize)]
struct RunReport {
    schema_version: &'static str,
    backend: &'static str,
    ok: bool,
    exit_code: Option<u8>,
    exit_name: Option<&'static str>,
    timed_out: bool,
    elapsed_ms: u64,
    graph: GraphSummary,
    stderr_b64: String,
    stderr_truncated: bool,
}

struct RunOutcome {
    exit_code: Option<u8>,
    timed_out: bool,
    stderr: Vec<u8>,
    stderr_truncated: bool,
}

pub(crate) fn cmd_run(args: RunArgs) -> Result<ExitCode> {
    let backend = resolve_backend(args.backend)?;
    let graph = doc::read_graph_file(&args.graph, contracts::DEFAULT_MAX_GRAPH_BYTES)?;
    let bin = graph.encode();

    let defaults = Limits::default();
    let limits = Limits {
        max_spawns: args.max_spawns.unwrap_or(defaults.max_spawns),
        max_pipes: args.max_pipes.unwrap_or(defaults.max_pipes),
    };
    if limits.max_spawns == 0 || limits.max_pipes == 0 {
        anyhow::bail!("--max-spawns and --max-pipes must be > 0");
    }

    // The node program refuses binary graphs above this size.
    if backend == Backend::Os && bin.len() > contracts::DEFAULT_MAX_GRAPH_BYTES {
        anyhow::bail!(
            "graph encodes to {} bytes, over the {} byte limit of the os backend; use --backend sim",
            bin.len(),
            contracts::DEFAULT_MAX_GRAPH_BYTES
        );
    }

    let start = Instant::now();
    let outcome = match backend {
        Backend::Os => run_os(&args, &bin, limits)?,
        Backend::Sim => run_sim(&args, graph.clone(), limits)?,
    };
    let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    let report = RunReport {
        schema_version: contracts::RUN_REPORT_SCHEMA_VERSION,
        backend: backend.as_str(),
        ok: outcome.exit_code == Some(contracts::EXIT_OK),
        exit_code: outcome.exit_code,
        exit_name: outcome.exit_code.and_then(contracts::exit_code_name),
        timed_out: outcome.timed_out,
        elapsed_ms,
        graph: GraphSummary {
            spawns: graph.spawns().len(),
            pipes: graph.pipes().len(),
            writes: graph.writes().len(),
            sha256: util::sha256_hex(&bin),
        },
        stderr_b64: base64::engine::general_purpose::STANDARD.encode(&outcome.stderr),
        stderr_truncated: outcome.stderr_truncated,
    };
    println!("{}", serde_json::to_string(&report)?);

    let code = match outcome.exit_code {
        Some(code) => code,
        None => contracts::EXIT_WALL_TIMEOUT,
    };
    Ok(ExitCode::from(code))
}

fn run_sim(args: &RunArgs, graph: GraphDescriptor, limits: Limits) -> Result<RunOutcome> {
    let filter = args
        .log
        .clone()
        .or_else(|| std::env::var(contracts::ENV_LOG).ok());
    if let Some(filter) = filter {
        let cfg = LogConfig {
            filter,
            ..LogConfig::default()
        };
        if let Err(err) = init_logging(&cfg) {
            eprintln!("dagspawn: {err:#}");
        }
    }

    if let Err(issues) = graph.validate(contracts::ROOT_NODE) {
        let err = NodeError::InvalidGraph(issues);
        tracing::error!(error = %err, "refusing to run");
        return Ok(RunOutcome {
            exit_code: Some(err.exit_code()),
            timed_out: false,
            stderr: Vec::new(),
            stderr_truncated: false,
        });
    }

    let kernel = SimKernel::new(graph, limits, SimConfig::default());
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::Builder::new()
        .name("sim-root".to_string())
        .spawn(move || {
            let _ = tx.send(kernel.run_root());
        })
        .context("spawn simulation thread")?;

    // On timeout the simulation threads are left blocked; the process exits
    // right after the report is printed.
    let (exit_code, timed_out) = match rx.recv_timeout(Duration::from_millis(args.wall_ms.max(1))) {
        Ok(status) => (Some(status as u8), false),
        Err(std::sync::mpsc::RecvTimeoutError::Timeout) => (None, true),
        Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
            anyhow::bail!("simulation thread panicked")
        }
    };
    Ok(RunOutcome {
        exit_code,
        timed_out,
        stderr: Vec::new(),
        stderr_truncated: false,
    })
}

#[cfg(unix)]
fn apply_child_limits() -> std::io::Result<()> {
    unsafe {
        // One process group for the whole tree so a timeout can kill it at once.
        if libc::setpgid(0, 0) == -1 {
            return Err(std::io::Error::last_os_error());
        }
        let core = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        if libc::setrlimit(libc::RLIMIT_CORE, &core) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(unix)]
fn wait_tree_with_wall_timeout_ms(
    child: &mut std::process::Child,
    wall_ms: u64,
) -> Result<(std::process::ExitStatus, bool)> {
    let deadline = Instant::now().checked_add(Duration::from_millis(wall_ms.max(1)));

    loop {
        if let Some(status) = child.try_wait().context("try_wait root node")? {
            return Ok((status, false));
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
                unsafe {
                    libc::kill(-pgid, libc::SIGKILL);
                }
            }
            let _ = child.kill();
            let status = child.wait().context("wait root node after kill")?;
            return Ok((status, true));
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[cfg(unix)]
fn run_os(args: &RunArgs, bin: &[u8], limits: Limits) -> Result<RunOutcome> {
    use std::os::unix::process::CommandExt as _;
    use std::os::unix::process::ExitStatusExt as _;
    use std::process::{Command, Stdio};

    let graph_file = util::TempFile::with_contents("dagspawn_run", bin)?;
    let node_bin = args
        .node_bin
        .clone()
        .unwrap_or_else(|| util::resolve_sibling_or_path(contracts::NODE_BIN_NAME));

    let mut cmd = Command::new(&node_bin);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::null());
    cmd.stderr(Stdio::piped());
    cmd.env(contracts::ENV_GRAPH, graph_file.path());
    cmd.env(contracts::ENV_MAX_SPAWNS, limits.max_spawns.to_string());
    cmd.env(contracts::ENV_MAX_PIPES, limits.max_pipes.to_string());
    if let Some(filter) = &args.log {
        cmd.env(contracts::ENV_LOG, filter);
    }
    unsafe {
        cmd.pre_exec(apply_child_limits);
    }

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawn node program: {}", node_bin.display()))?;
    let stderr = child.stderr.take().context("take stderr")?;
    let stderr_thread = std::thread::spawn(move || -> std::io::Result<(Vec<u8>, bool)> {
        util::read_to_end_capped(stderr, contracts::RUN_STDERR_CAP_BYTES)
    });

    let (status, timed_out) = wait_tree_with_wall_timeout_ms(&mut child, args.wall_ms)?;
    let (stderr, stderr_truncated) = stderr_thread
        .join()
        .unwrap_or_else(|_| Ok((Vec::new(), false)))?;

    let exit_code = if timed_out {
        None
    } else {
        let code = match status.code() {
            Some(code) => code,
            None => status.signal().map(|s| 128 + s).unwrap_or(1),
        };
        Some((code & 0xff) as u8)
    };

    Ok(RunOutcome {
        exit_code,
        timed_out,
        stderr,
        stderr_truncated,
    })
}

#[cfg(not(unix))]
fn run_os(_args: &RunArgs, _bin: &[u8], _limits: Limits) -> Result<RunOutcome> {
    anyhow::bail!("the os backend is only supported on unix; use --backend sim")
}
