use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dagspawn_contracts as contracts;
use dagspawn_graph::doc::{self, GraphDoc};
use dagspawn_graph::gen::{generate, GenParams};
use dagspawn_graph::GraphDescriptor;
use serde::Serialize;

mod run;
mod util;

#[derive(Parser)]
#[command(name = "dagspawn")]
#[command(about = "Build, check and run process graphs.", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert a graph (JSON or binary) to the binary form.
    Encode(EncodeArgs),
    /// Print a graph as a JSON document.
    Inspect(GraphArg),
    /// Check a graph for structural problems.
    Validate(GraphArg),
    /// Generate a random tree-shaped graph from a seed.
    Gen(GenArgs),
    /// Run a graph and print a JSON report.
    Run(run::RunArgs),
}

#[derive(Debug, Args)]
struct EncodeArgs {
    #[arg(long)]
    input: PathBuf,
    #[arg(long)]
    output: PathBuf,
}

#[derive(Debug, Args)]
struct GraphArg {
    #[arg(long)]
    graph: PathBuf,
}

#[derive(Debug, Args)]
struct GenArgs {
    #[arg(long, default_value_t = 8)]
    nodes: u64,
    #[arg(long, default_value_t = 0)]
    seed: u64,
    #[arg(long, default_value_t = 64)]
    max_payload: usize,
    /// `*.json` writes the document form, anything else the binary form.
    /// Prints the document to stdout when omitted.
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct ValidateReport {
    schema_version: &'static str,
    ok: bool,
    spawns: usize,
    pipes: usize,
    writes: usize,
    issues: Vec<String>,
}

fn main() -> ExitCode {
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("dagspawn: {err:#}");
            ExitCode::from(contracts::EXIT_DRIVER_ERROR)
        }
    }
}

fn try_main() -> Result<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Command::Encode(args) => cmd_encode(args),
        Command::Inspect(args) => cmd_inspect(args),
        Command::Validate(args) => cmd_validate(args),
        Command::Gen(args) => cmd_gen(args),
        Command::Run(args) => run::cmd_run(args),
    }
}

fn read_graph(path: &std::path::Path) -> Result<GraphDescriptor> {
    doc::read_graph_file(path, contracts::DEFAULT_MAX_GRAPH_BYTES)
}

fn write_graph(path: &std::path::Path, graph: &GraphDescriptor) -> Result<()> {
    let bytes = if doc::is_json_path(path) {
        let mut v = serde_json::to_vec_pretty(&GraphDoc::from(graph))?;
        v.push(b'\n');
        v
    } else {
        graph.encode()
    };
    std::fs::write(path, bytes).with_context(|| format!("write graph: {}", path.display()))
}

fn print_doc(graph: &GraphDescriptor) -> Result<()> {
    let mut out = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, &GraphDoc::from(graph))?;
    writeln!(out)?;
    Ok(())
}

fn cmd_encode(args: EncodeArgs) -> Result<ExitCode> {
    let graph = read_graph(&args.input)?;
    std::fs::write(&args.output, graph.encode())
        .with_context(|| format!("write graph: {}", args.output.display()))?;
    Ok(ExitCode::SUCCESS)
}

fn cmd_inspect(args: GraphArg) -> Result<ExitCode> {
    let graph = read_graph(&args.graph)?;
    print_doc(&graph)?;
    Ok(ExitCode::SUCCESS)
}

fn cmd_validate(args: GraphArg) -> Result<ExitCode> {
    let graph = read_graph(&args.graph)?;
    let issues = match graph.validate(contracts::ROOT_NODE) {
        Ok(()) => Vec::new(),
        Err(issues) => issues.iter().map(ToString::to_string).collect(),
    };
    let report = ValidateReport {
        schema_version: contracts::VALIDATE_REPORT_SCHEMA_VERSION,
        ok: issues.is_empty(),
        spawns: graph.spawns().len(),
        pipes: graph.pipes().len(),
        writes: graph.writes().len(),
        issues,
    };
    println!("{}", serde_json::to_string(&report)?);
    Ok(if report.ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn cmd_gen(args: GenArgs) -> Result<ExitCode> {
    if args.nodes == 0 {
        anyhow::bail!("--nodes must be > 0");
    }
    let graph = generate(GenParams {
        nodes: args.nodes,
        seed: args.seed,
        max_payload: args.max_payload,
    });
    match &args.output {
        Some(path) => write_graph(path, &graph)?,
        None => print_doc(&graph)?,
    }
    Ok(ExitCode::SUCCESS)
}
