use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::{GraphDescriptor, NodeIndex, PipeIndex};

/// A well-formedness violation found by [`GraphDescriptor::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphIssue {
    ChildSpawnedTwice {
        child: NodeIndex,
    },
    RootIsChild {
        root: NodeIndex,
    },
    SelfSpawn {
        node: NodeIndex,
    },
    SelfWrite {
        write: usize,
        node: NodeIndex,
    },
    PipeDeclaredTwice {
        pipe: PipeIndex,
    },
    PipeHandedDownTwice {
        node: NodeIndex,
        pipe: PipeIndex,
    },
    PipeUsedAfterHandDown {
        node: NodeIndex,
        pipe: PipeIndex,
        write: usize,
    },
}

impl fmt::Display for GraphIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphIssue::ChildSpawnedTwice { child } => {
                write!(f, "node {child} is the child of more than one spawn entry")
            }
            GraphIssue::RootIsChild { root } => {
                write!(f, "root node {root} appears as a spawned child")
            }
            GraphIssue::SelfSpawn { node } => write!(f, "node {node} spawns itself"),
            GraphIssue::SelfWrite { write, node } => {
                write!(f, "write #{write} goes from node {node} to itself")
            }
            GraphIssue::PipeDeclaredTwice { pipe } => {
                write!(f, "pipe index {pipe} is declared more than once")
            }
            GraphIssue::PipeHandedDownTwice { node, pipe } => write!(
                f,
                "node {node} hands pipe {pipe} to more than one child"
            ),
            GraphIssue::PipeUsedAfterHandDown { node, pipe, write } => write!(
                f,
                "write #{write}: node {node} uses pipe {pipe} after handing it to a child"
            ),
        }
    }
}

impl GraphDescriptor {
    /// Checks the structural invariants the executor relies on and returns
    /// every violation found.
    ///
    /// References to pipes a node neither owns nor inherits are not reported;
    /// the executor surfaces those as not-found errors at run time.
    pub fn validate(&self, root: NodeIndex) -> Result<(), Vec<GraphIssue>> {
        let mut issues = Vec::new();

        let mut children = BTreeSet::new();
        for s in self.spawns() {
            if s.from == s.child {
                issues.push(GraphIssue::SelfSpawn { node: s.from });
            }
            if s.child == root {
                issues.push(GraphIssue::RootIsChild { root });
            }
            if !children.insert(s.child) {
                issues.push(GraphIssue::ChildSpawnedTwice { child: s.child });
            }
        }

        let mut declared = BTreeSet::new();
        for p in self.pipes() {
            for pipe in [p.read_pipe, p.write_pipe] {
                if !declared.insert(pipe) {
                    issues.push(GraphIssue::PipeDeclaredTwice { pipe });
                }
            }
        }

        let mut handed_down: BTreeMap<NodeIndex, BTreeSet<PipeIndex>> = BTreeMap::new();
        for s in self.spawns() {
            let given = handed_down.entry(s.from).or_default();
            for &pipe in &s.pipes {
                if !given.insert(pipe) {
                    issues.push(GraphIssue::PipeHandedDownTwice { node: s.from, pipe });
                }
            }
        }

        for (i, w) in self.writes().iter().enumerate() {
            if w.from == w.to {
                issues.push(GraphIssue::SelfWrite {
                    write: i,
                    node: w.from,
                });
            }
            for (node, pipe) in [(w.from, w.from_pipe), (w.to, w.to_pipe)] {
                if handed_down
                    .get(&node)
                    .is_some_and(|given| given.contains(&pipe))
                {
                    issues.push(GraphIssue::PipeUsedAfterHandDown {
                        node,
                        pipe,
                        write: i,
                    });
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }
}
