use std::collections::BTreeSet;

use dagspawn_contracts::{DEFAULT_MAX_PIPES, DEFAULT_MAX_SPAWNS};
use dagspawn_graph::{GraphDescriptor, NodeIndex, PipeIndex, SpawnEntry, WriteEntry};

use crate::bootstrap::{Identity, Invocation};
use crate::children::SpawnedChildSet;
use crate::error::NodeError;
use crate::escape;
use crate::registry::PipeRegistry;
use crate::syscalls::{Handle, Syscalls};

/// Per-run resource ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_pipes: usize,
    pub max_spawns: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_pipes: DEFAULT_MAX_PIPES,
            max_spawns: DEFAULT_MAX_SPAWNS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    IdentityResolved,
    PipesOwned,
    ChildrenSpawned,
    TransfersExecuted,
    ChildrenJoined,
    Done,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Uninitialized => "uninitialized",
            Phase::IdentityResolved => "identity_resolved",
            Phase::PipesOwned => "pipes_owned",
            Phase::ChildrenSpawned => "children_spawned",
            Phase::TransfersExecuted => "transfers_executed",
            Phase::ChildrenJoined => "children_joined",
            Phase::Done => "done",
        }
    }

    /// The step that runs once this phase has been reached; a failure while
    /// in this phase belongs to it.
    pub fn next_step(self) -> &'static str {
        match self {
            Phase::Uninitialized => "resolve_identity",
            Phase::IdentityResolved => "create_pipes",
            Phase::PipesOwned => "spawn_children",
            Phase::ChildrenSpawned => "transfer",
            Phase::TransfersExecuted => "join_children",
            Phase::ChildrenJoined | Phase::Done => "finish",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSummary {
    pub node: NodeIndex,
    pub pipes_created: usize,
    pub pipes_inherited: usize,
    pub children_spawned: usize,
    pub bytes_written: u64,
    pub bytes_read: u64,
}

/// Runs one node of a graph against a set of primitives.
pub struct NodeExecutor<'g, S> {
    sys: S,
    graph: &'g GraphDescriptor,
    limits: Limits,
}

struct NodeRun<'s, S: Syscalls> {
    phase: Phase,
    summary: NodeSummary,
    registry: PipeRegistry,
    handed_down: BTreeSet<PipeIndex>,
    children: SpawnedChildSet<'s, S>,
}

impl<'s, S: Syscalls> NodeRun<'s, S> {
    fn new(sys: &'s S, limits: Limits) -> Self {
        Self {
            phase: Phase::Uninitialized,
            summary: NodeSummary::default(),
            registry: PipeRegistry::with_capacity(limits.max_pipes),
            handed_down: BTreeSet::new(),
            children: SpawnedChildSet::new(sys, limits.max_spawns),
        }
    }
}

impl<'g, S: Syscalls> NodeExecutor<'g, S> {
    pub fn new(sys: S, graph: &'g GraphDescriptor, limits: Limits) -> Self {
        Self { sys, graph, limits }
    }

    pub fn run(&self, invocation: &Invocation) -> Result<NodeSummary, NodeError> {
        let mut run = NodeRun::new(&self.sys, self.limits);

        match self.drive(invocation, &mut run) {
            Ok(()) => {
                run.summary.children_spawned = run.children.spawned();
                let s = &run.summary;
                tracing::info!(
                    node = s.node,
                    inherited = s.pipes_inherited,
                    pipes = s.pipes_created,
                    children = s.children_spawned,
                    written = s.bytes_written,
                    read = s.bytes_read,
                    "node finished"
                );
                Ok(std::mem::take(&mut run.summary))
            }
            Err(err) => {
                tracing::error!(
                    node = run.summary.node,
                    phase = run.phase.next_step(),
                    reached = run.phase.as_str(),
                    error = %err,
                    "node failed"
                );
                self.release(&run);
                // Dropping `run` joins whatever children are still pending.
                Err(err)
            }
        }
    }

    fn drive(&self, invocation: &Invocation, run: &mut NodeRun<'_, S>) -> Result<(), NodeError> {
        let id = Identity::resolve(invocation, self.graph, &mut run.registry, &self.sys)?;
        run.summary.node = id.node;
        run.summary.pipes_inherited = id.inherited;
        run.phase = Phase::IdentityResolved;

        self.create_owned_pipes(id.node, run)?;
        run.phase = Phase::PipesOwned;

        for spawn in self.graph.spawns_from(id.node) {
            self.spawn_child(id.node, spawn, run)?;
        }
        run.phase = Phase::ChildrenSpawned;

        for w in self.graph.writes() {
            if w.from == id.node {
                let handle = run.registry.find(w.from_pipe)?;
                self.write_all(handle, w)?;
                run.summary.bytes_written += w.data.len() as u64;
            } else if w.to == id.node {
                let handle = run.registry.find(w.to_pipe)?;
                self.read_and_compare(handle, w)?;
                run.summary.bytes_read += w.data.len() as u64;
            }
        }
        run.phase = Phase::TransfersExecuted;

        run.children.join_all()?;
        run.phase = Phase::ChildrenJoined;

        run.phase = Phase::Done;
        Ok(())
    }

    fn create_owned_pipes(&self, node: NodeIndex, run: &mut NodeRun<'_, S>) -> Result<(), NodeError> {
        for p in self.graph.pipes_owned_by(node) {
            let (read, write) = self.sys.pipe().map_err(NodeError::syscall("pipe"))?;
            run.registry.add(p.read_pipe, read)?;
            run.registry.add(p.write_pipe, write)?;
            run.summary.pipes_created += 1;
            tracing::debug!(
                node,
                read_pipe = p.read_pipe,
                write_pipe = p.write_pipe,
                read,
                write,
                "created pipe"
            );
        }
        Ok(())
    }

    fn spawn_child(
        &self,
        node: NodeIndex,
        spawn: &SpawnEntry,
        run: &mut NodeRun<'_, S>,
    ) -> Result<(), NodeError> {
        run.children.ensure_room()?;
        if spawn.pipes.len() > self.limits.max_pipes {
            return Err(NodeError::NoSpaceForPipes {
                capacity: self.limits.max_pipes,
            });
        }

        let mut handles = Vec::with_capacity(spawn.pipes.len());
        for &pipe in &spawn.pipes {
            let handle = run.registry.find(pipe)?;
            tracing::debug!(node, child = spawn.child, pipe, handle, "passing pipe to child");
            handles.push(handle);
        }

        let args = vec![
            escape::encode_u64_le(spawn.child),
            escape::encode_handles(&handles),
        ];
        let pid = self
            .sys
            .spawn(&args, &handles)
            .map_err(NodeError::syscall("spawn"))?;
        run.children.push(pid);
        run.handed_down.extend(spawn.pipes.iter().copied());
        tracing::debug!(node, child = spawn.child, pid, "spawned child");
        Ok(())
    }

    fn write_all(&self, handle: Handle, w: &WriteEntry) -> Result<(), NodeError> {
        let data = &w.data;
        let mut done = 0usize;
        while done < data.len() {
            let n = self
                .sys
                .write(handle, &data[done..])
                .map_err(NodeError::syscall("write"))?;
            if n == 0 {
                return Err(NodeError::PipeClosed {
                    pipe: w.from_pipe,
                    done,
                    expected: data.len(),
                });
            }
            done = (done + n).min(data.len());
        }
        tracing::debug!(node = w.from, pipe = w.from_pipe, bytes = data.len(), "wrote payload");
        Ok(())
    }

    fn read_and_compare(&self, handle: Handle, w: &WriteEntry) -> Result<(), NodeError> {
        let expected = &w.data;
        let mut buf = vec![0u8; expected.len()];
        let mut done = 0usize;
        while done < buf.len() {
            let n = self
                .sys
                .read(handle, &mut buf[done..])
                .map_err(NodeError::syscall("read"))?;
            if n == 0 {
                return Err(NodeError::PipeClosed {
                    pipe: w.to_pipe,
                    done,
                    expected: expected.len(),
                });
            }
            done = (done + n).min(buf.len());
        }
        tracing::debug!(node = w.to, pipe = w.to_pipe, bytes = buf.len(), "read payload");

        if let Some(offset) = buf.iter().zip(expected).position(|(a, b)| a != b) {
            return Err(NodeError::CorruptedData {
                pipe: w.to_pipe,
                offset,
            });
        }
        Ok(())
    }

    /// Closes every handle still held so that peers blocked on them observe
    /// end-of-stream.
    fn release(&self, run: &NodeRun<'_, S>) {
        for (pipe, handle) in run.registry.iter() {
            if run.handed_down.contains(&pipe) {
                continue;
            }
            if let Err(err) = self.sys.close(handle) {
                tracing::debug!(pipe, handle, error = %err, "close during teardown failed");
            }
        }
    }
}
