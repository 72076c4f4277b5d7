//! Executes one node of a process graph.
//!
//! Every node runs the same program. The root starts without arguments; every
//! other node is spawned by its parent with two escape-encoded arguments: its
//! node index and the handles of the pipe endpoints it inherits. A node creates
//! the pipes it owns, spawns its children, performs its writes and reads in
//! graph order, and finally joins its children.

pub mod backend;
pub mod bootstrap;
pub mod children;
pub mod config;
pub mod error;
pub mod escape;
pub mod executor;
pub mod logging;
#[cfg(unix)]
pub mod os;
pub mod registry;
pub mod sim;
pub mod syscalls;

#[cfg(test)]
mod testing;

pub use backend::Backend;
pub use bootstrap::{Identity, Invocation};
pub use error::NodeError;
pub use executor::{Limits, NodeExecutor, NodeSummary, Phase};
pub use registry::PipeRegistry;
pub use syscalls::{Handle, ProcessId, Syscalls};
