use std::process::ExitCode;

#[cfg(unix)]
fn run() -> u8 {
    use dagspawn_contracts as contracts;
    use dagspawn_graph::GraphDescriptor;
    use dagspawn_node::config::NodeConfig;
    use dagspawn_node::os::{ignore_sigpipe, OsSyscalls};
    use dagspawn_node::{logging, Invocation, NodeError, NodeExecutor};

    let cfg = match NodeConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("dagspawn-node: {err:#}");
            return contracts::EXIT_CONFIG;
        }
    };
    if let Err(err) = logging::init_logging(&cfg.log) {
        eprintln!("dagspawn-node: {err:#}");
    }
    ignore_sigpipe();

    let bytes = match std::fs::read(&cfg.graph_path) {
        Ok(b) => b,
        Err(err) => {
            tracing::error!(path = %cfg.graph_path.display(), error = %err, "cannot read graph");
            return contracts::EXIT_CONFIG;
        }
    };
    let graph = match GraphDescriptor::decode_with_limit(&bytes, cfg.max_graph_bytes) {
        Ok(g) => g,
        Err(err) => {
            let err = NodeError::from(err);
            tracing::error!(error = %err, "cannot decode graph");
            return err.exit_code();
        }
    };
    if let Err(issues) = graph.validate(contracts::ROOT_NODE) {
        let err = NodeError::InvalidGraph(issues);
        tracing::error!(error = %err, "refusing to run");
        return err.exit_code();
    }

    let sys = match OsSyscalls::current_exe() {
        Ok(sys) => sys,
        Err(err) => {
            let err = NodeError::Syscall {
                op: "current_exe",
                source: err,
            };
            tracing::error!(error = %err, "cannot locate node program");
            return err.exit_code();
        }
    };

    let invocation = Invocation::from_env();
    match NodeExecutor::new(sys, &graph, cfg.limits).run(&invocation) {
        Ok(_) => contracts::EXIT_OK,
        Err(err) => err.exit_code(),
    }
}

#[cfg(not(unix))]
fn run() -> u8 {
    eprintln!("dagspawn-node: process backend is only supported on unix");
    dagspawn_contracts::EXIT_CONFIG
}

fn main() -> ExitCode {
    ExitCode::from(run())
}
