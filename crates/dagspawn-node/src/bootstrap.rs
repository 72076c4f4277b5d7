//! Working out which graph node this process is.

use dagspawn_contracts::{ROOT_NODE, SPAWN_ARGC};
use dagspawn_graph::{GraphDescriptor, NodeIndex};

use crate::error::NodeError;
use crate::escape;
use crate::registry::PipeRegistry;
use crate::syscalls::Syscalls;

/// How this process was started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Started without arguments: the root of the graph.
    Root,
    /// Started by a parent node with escape-encoded arguments.
    Spawned(Vec<Vec<u8>>),
}

impl Invocation {
    pub fn from_args(args: Vec<Vec<u8>>) -> Self {
        if args.is_empty() {
            Invocation::Root
        } else {
            Invocation::Spawned(args)
        }
    }

    /// Raw process arguments, program name excluded.
    #[cfg(unix)]
    pub fn from_env() -> Self {
        use std::os::unix::ffi::OsStringExt as _;
        Self::from_args(std::env::args_os().skip(1).map(|a| a.into_vec()).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub node: NodeIndex,
    pub inherited: usize,
}

impl Identity {
    /// Resolves the node index and binds every inherited handle to the pipe
    /// index its parent listed for it.
    pub fn resolve<S: Syscalls + ?Sized>(
        invocation: &Invocation,
        graph: &GraphDescriptor,
        registry: &mut PipeRegistry,
        sys: &S,
    ) -> Result<Self, NodeError> {
        let args = match invocation {
            Invocation::Root => {
                return Ok(Identity {
                    node: ROOT_NODE,
                    inherited: 0,
                })
            }
            Invocation::Spawned(args) => args,
        };

        if args.len() != SPAWN_ARGC {
            return Err(NodeError::Argv(format!(
                "expected {SPAWN_ARGC} arguments, got {}",
                args.len()
            )));
        }

        let node = escape::decode_u64_le(&args[0])?
            .ok_or_else(|| NodeError::Argv("node index is not 8 bytes".to_string()))?;

        let spawn = graph
            .find_spawn_by_child(node)
            .ok_or_else(|| NodeError::Argv(format!("no spawn entry creates node {node}")))?;

        let handles = escape::decode_handles(&args[1], spawn.pipes.len())?.ok_or_else(|| {
            NodeError::Argv(format!(
                "handle list does not hold {} handles",
                spawn.pipes.len()
            ))
        })?;

        for (&pipe, &handle) in spawn.pipes.iter().zip(&handles) {
            registry.add(pipe, handle)?;
            sys.adopt(handle).map_err(NodeError::syscall("adopt"))?;
            tracing::debug!(node, pipe, handle, "obtained inherited pipe");
        }

        Ok(Identity {
            node,
            inherited: handles.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{hello_graph, RecordingSyscalls};

    fn spawned(args: Vec<Vec<u8>>) -> Invocation {
        Invocation::from_args(args)
    }

    #[test]
    fn no_arguments_means_root() {
        let sys = RecordingSyscalls::default();
        let mut reg = PipeRegistry::with_capacity(8);
        let id =
            Identity::resolve(&Invocation::from_args(vec![]), &hello_graph(), &mut reg, &sys)
                .unwrap();
        assert_eq!(id, Identity { node: 0, inherited: 0 });
        assert!(reg.is_empty());
    }

    #[test]
    fn spawned_node_binds_inherited_handles() {
        let sys = RecordingSyscalls::default();
        let mut reg = PipeRegistry::with_capacity(8);
        let inv = spawned(vec![escape::encode_u64_le(1), escape::encode_handles(&[7])]);
        let id = Identity::resolve(&inv, &hello_graph(), &mut reg, &sys).unwrap();
        assert_eq!(id, Identity { node: 1, inherited: 1 });
        assert_eq!(reg.find(10).unwrap(), 7);
        assert_eq!(sys.adopted(), vec![7]);
    }

    #[test]
    fn argument_errors() {
        let g = hello_graph();
        let sys = RecordingSyscalls::default();
        let cases = [
            vec![escape::encode_u64_le(1)],
            vec![escape::encode(&[1, 2, 3]), escape::encode_handles(&[7])],
            vec![escape::encode_u64_le(5), escape::encode_handles(&[7])],
            vec![escape::encode_u64_le(1), escape::encode_handles(&[7, 8])],
        ];
        for args in cases {
            let mut reg = PipeRegistry::with_capacity(8);
            let err = Identity::resolve(&spawned(args), &g, &mut reg, &sys).unwrap_err();
            assert!(matches!(err, NodeError::Argv(_)), "{err}");
        }
    }

    #[test]
    fn malformed_escape_is_an_encoding_error() {
        let g = hello_graph();
        let sys = RecordingSyscalls::default();
        let mut reg = PipeRegistry::with_capacity(8);
        let inv = spawned(vec![vec![1, 2, 0xFE], escape::encode_handles(&[7])]);
        let err = Identity::resolve(&inv, &g, &mut reg, &sys).unwrap_err();
        assert_eq!(err.exit_code(), dagspawn_contracts::EXIT_ENCODING);
    }

    #[test]
    fn full_registry_rejects_inherited_handles() {
        let g = hello_graph();
        let sys = RecordingSyscalls::default();
        let mut reg = PipeRegistry::with_capacity(0);
        let inv = spawned(vec![escape::encode_u64_le(1), escape::encode_handles(&[7])]);
        let err = Identity::resolve(&inv, &g, &mut reg, &sys).unwrap_err();
        assert!(matches!(err, NodeError::NoSpaceForPipes { capacity: 0 }));
    }
}
