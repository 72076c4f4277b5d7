use std::fmt;
use std::io;

use dagspawn_contracts as contracts;
use dagspawn_graph::{GraphIssue, PipeIndex, WireError};

use crate::escape::EscapeError;
use crate::syscalls::ProcessId;

/// Every way a node run can fail. Each variant maps to one process exit code.
#[derive(Debug)]
pub enum NodeError {
    NoSpaceForPipes {
        capacity: usize,
    },
    NotFound {
        pipe: PipeIndex,
    },
    Escape(EscapeError),
    Wire(WireError),
    Argv(String),
    TooManySpawns {
        limit: usize,
    },
    PipeClosed {
        pipe: PipeIndex,
        done: usize,
        expected: usize,
    },
    CorruptedData {
        pipe: PipeIndex,
        offset: usize,
    },
    InvalidGraph(Vec<GraphIssue>),
    Syscall {
        op: &'static str,
        source: io::Error,
    },
    ChildFailed {
        pid: ProcessId,
        status: i8,
    },
}

impl NodeError {
    pub(crate) fn syscall(op: &'static str) -> impl FnOnce(io::Error) -> NodeError {
        move |source| NodeError::Syscall { op, source }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            NodeError::NoSpaceForPipes { .. } => contracts::EXIT_NO_SPACE_FOR_PIPES,
            NodeError::NotFound { .. } => contracts::EXIT_NOT_FOUND,
            NodeError::Escape(_) | NodeError::Wire(_) => contracts::EXIT_ENCODING,
            NodeError::Argv(_) => contracts::EXIT_ARGV,
            NodeError::TooManySpawns { .. } => contracts::EXIT_TOO_MANY_SPAWNS,
            NodeError::PipeClosed { .. } => contracts::EXIT_PIPE_CLOSED,
            NodeError::CorruptedData { .. } => contracts::EXIT_CORRUPTED_DATA,
            NodeError::InvalidGraph(_) => contracts::EXIT_INVALID_GRAPH,
            NodeError::Syscall { source, .. } => match source.raw_os_error() {
                Some(errno) => errno.clamp(1, 255) as u8,
                None => contracts::EXIT_SYSCALL_GENERIC,
            },
            NodeError::ChildFailed { status, .. } => *status as u8,
        }
    }
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::NoSpaceForPipes { capacity } => {
                write!(f, "pipe registry is full ({capacity} entries)")
            }
            NodeError::NotFound { pipe } => write!(f, "pipe {pipe} is not visible to this node"),
            NodeError::Escape(err) => write!(f, "malformed escaped argument: {err}"),
            NodeError::Wire(err) => write!(f, "malformed graph: {err}"),
            NodeError::Argv(msg) => write!(f, "bad invocation arguments: {msg}"),
            NodeError::TooManySpawns { limit } => {
                write!(f, "spawn ceiling of {limit} children reached")
            }
            NodeError::PipeClosed {
                pipe,
                done,
                expected,
            } => write!(
                f,
                "pipe {pipe} closed by peer after {done} of {expected} bytes"
            ),
            NodeError::CorruptedData { pipe, offset } => {
                write!(f, "data read from pipe {pipe} differs at byte {offset}")
            }
            NodeError::InvalidGraph(issues) => {
                write!(f, "graph is not well formed ({} issues)", issues.len())?;
                for issue in issues {
                    write!(f, "; {issue}")?;
                }
                Ok(())
            }
            NodeError::Syscall { op, source } => write!(f, "{op} failed: {source}"),
            NodeError::ChildFailed { pid, status } => {
                write!(f, "child process {pid} exited with status {status}")
            }
        }
    }
}

impl std::error::Error for NodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NodeError::Escape(err) => Some(err),
            NodeError::Wire(err) => Some(err),
            NodeError::Syscall { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<EscapeError> for NodeError {
    fn from(err: EscapeError) -> Self {
        NodeError::Escape(err)
    }
}

impl From<WireError> for NodeError {
    fn from(err: WireError) -> Self {
        NodeError::Wire(err)
    }
}
