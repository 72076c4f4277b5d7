//! Shared, version-pinned protocol identifiers.
//!
//! These constants are the single source of truth for schema strings, exit
//! codes and environment variable names shared by the node binary, the driver
//! CLI and their tests.

pub const GRAPH_DOC_SCHEMA_VERSION: &str = "dagspawn.graph@0.1.0";
pub const RUN_REPORT_SCHEMA_VERSION: &str = "dagspawn.run.report@0.1.0";
pub const VALIDATE_REPORT_SCHEMA_VERSION: &str = "dagspawn.validate.report@0.1.0";

pub const NODE_BIN_NAME: &str = "dagspawn-node";

/// Node index of the process that was not produced by a spawn call.
pub const ROOT_NODE: u64 = 0;

/// Number of arguments every spawned node receives.
pub const SPAWN_ARGC: usize = 2;

pub const DEFAULT_MAX_PIPES: usize = 3200;
pub const DEFAULT_MAX_SPAWNS: usize = 1024;
pub const DEFAULT_MAX_GRAPH_BYTES: usize = 600 * 1024;

pub const ENV_GRAPH: &str = "DAGSPAWN_GRAPH";
pub const ENV_MAX_SPAWNS: &str = "DAGSPAWN_MAX_SPAWNS";
pub const ENV_MAX_PIPES: &str = "DAGSPAWN_MAX_PIPES";
pub const ENV_LOG: &str = "DAGSPAWN_LOG";
pub const ENV_LOG_FORMAT: &str = "DAGSPAWN_LOG_FORMAT";
pub const ENV_BACKEND: &str = "DAGSPAWN_BACKEND";

pub const EXIT_OK: u8 = 0;

const EXIT_BASE: u8 = 42;
pub const EXIT_NO_SPACE_FOR_PIPES: u8 = EXIT_BASE + 1;
pub const EXIT_NOT_FOUND: u8 = EXIT_BASE + 2;
pub const EXIT_ENCODING: u8 = EXIT_BASE + 3;
pub const EXIT_ARGV: u8 = EXIT_BASE + 4;
pub const EXIT_TOO_MANY_SPAWNS: u8 = EXIT_BASE + 5;
pub const EXIT_PIPE_CLOSED: u8 = EXIT_BASE + 6;
pub const EXIT_CORRUPTED_DATA: u8 = EXIT_BASE + 7;
pub const EXIT_INVALID_GRAPH: u8 = EXIT_BASE + 8;
pub const EXIT_CONFIG: u8 = EXIT_BASE + 9;

/// Collaborator failure without an OS error number.
pub const EXIT_SYSCALL_GENERIC: u8 = 1;

/// Exit code used by the driver CLI for its own failures.
pub const EXIT_DRIVER_ERROR: u8 = 2;

/// Exit code used by the driver CLI when a run exceeds its wall-clock budget.
pub const EXIT_WALL_TIMEOUT: u8 = 124;

/// Capture limit for the root's stderr in run reports.
pub const RUN_STDERR_CAP_BYTES: usize = 256 * 1024;

pub const DEFAULT_WALL_MS: u64 = 30_000;

pub fn exit_code_name(code: u8) -> Option<&'static str> {
    match code {
        EXIT_OK => Some("ok"),
        EXIT_NO_SPACE_FOR_PIPES => Some("no_space_for_pipes"),
        EXIT_NOT_FOUND => Some("not_found"),
        EXIT_ENCODING => Some("encoding"),
        EXIT_ARGV => Some("argv"),
        EXIT_TOO_MANY_SPAWNS => Some("too_many_spawns"),
        EXIT_PIPE_CLOSED => Some("pipe_closed"),
        EXIT_CORRUPTED_DATA => Some("corrupted_data"),
        EXIT_INVALID_GRAPH => Some("invalid_graph"),
        EXIT_CONFIG => Some("config"),
        EXIT_WALL_TIMEOUT => Some("wall_timeout"),
        _ => None,
    }
}
