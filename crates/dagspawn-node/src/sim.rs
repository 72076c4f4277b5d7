//! In-process backend: every node is a thread, pipes are bounded byte queues.
//!
//! One mutex guards the whole simulated kernel (pipes, handle ownership and
//! the process table); one condvar wakes every blocked reader, writer and
//! waiter after any state change. Handles are owned by exactly one process;
//! `spawn` moves the inherited ones to the child and a process closes all the
//! handles it still owns when it exits.

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use dagspawn_graph::GraphDescriptor;

use crate::bootstrap::Invocation;
use crate::executor::{Limits, NodeExecutor};
use crate::syscalls::{Handle, ProcessId, Syscalls};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimConfig {
    /// Bytes a pipe buffers before writers block.
    pub pipe_capacity: usize,
    /// Upper bound on the bytes moved by one `read` or `write`.
    pub max_chunk: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            pipe_capacity: 4096,
            max_chunk: usize::MAX,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    pub processes: u64,
    pub pipes: u64,
    pub spawn_calls: u64,
    pub open_handles: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum End {
    Read,
    Write,
}

#[derive(Debug)]
struct HandleEntry {
    pipe: usize,
    end: End,
    owner: ProcessId,
}

#[derive(Debug, Default)]
struct SimPipe {
    buf: VecDeque<u8>,
    readers: usize,
    writers: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcState {
    Running,
    Exited(i8),
}

#[derive(Debug)]
struct Proc {
    parent: Option<ProcessId>,
    state: ProcState,
}

#[derive(Debug)]
struct KernelState {
    next_handle: Handle,
    next_pid: ProcessId,
    pipes: Vec<SimPipe>,
    handles: BTreeMap<Handle, HandleEntry>,
    procs: BTreeMap<ProcessId, Proc>,
    stats: SimStats,
}

struct Shared {
    state: Mutex<KernelState>,
    changed: Condvar,
    graph: GraphDescriptor,
    limits: Limits,
    config: SimConfig,
}

/// A simulated host for one graph run.
#[derive(Clone)]
pub struct SimKernel {
    shared: Arc<Shared>,
}

impl SimKernel {
    pub fn new(graph: GraphDescriptor, limits: Limits, config: SimConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(KernelState {
                    next_handle: 3,
                    next_pid: 1,
                    pipes: Vec::new(),
                    handles: BTreeMap::new(),
                    procs: BTreeMap::new(),
                    stats: SimStats::default(),
                }),
                changed: Condvar::new(),
                graph,
                limits,
                config: SimConfig {
                    pipe_capacity: config.pipe_capacity.max(1),
                    max_chunk: config.max_chunk.max(1),
                },
            }),
        }
    }

    /// Runs the root node on the calling thread and returns its exit status.
    /// Every process spawned along the way has exited when this returns.
    pub fn run_root(&self) -> i8 {
        let pid = {
            let mut st = self.shared.lock();
            st.new_process(None)
        };
        let root = SimProcess {
            shared: Arc::clone(&self.shared),
            pid,
        };
        run_process(root, Vec::new())
    }

    pub fn stats(&self) -> SimStats {
        let st = self.shared.lock();
        SimStats {
            open_handles: st.handles.len(),
            ..st.stats
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, KernelState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, KernelState>) -> MutexGuard<'a, KernelState> {
        self.changed.wait(guard).unwrap_or_else(|e| e.into_inner())
    }
}

impl KernelState {
    fn new_process(&mut self, parent: Option<ProcessId>) -> ProcessId {
        let pid = self.next_pid;
        self.next_pid += 1;
        self.procs.insert(
            pid,
            Proc {
                parent,
                state: ProcState::Running,
            },
        );
        self.stats.processes += 1;
        pid
    }

    fn new_handle(&mut self, pipe: usize, end: End, owner: ProcessId) -> Handle {
        let h = self.next_handle;
        self.next_handle += 1;
        self.handles.insert(h, HandleEntry { pipe, end, owner });
        h
    }

    fn owned(&self, pid: ProcessId, handle: Handle, end: Option<End>) -> io::Result<usize> {
        match self.handles.get(&handle) {
            Some(e) if e.owner == pid && end.map_or(true, |want| want == e.end) => Ok(e.pipe),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("handle {handle} is not a usable endpoint of process {pid}"),
            )),
        }
    }

    fn close(&mut self, handle: Handle) {
        if let Some(e) = self.handles.remove(&handle) {
            let pipe = &mut self.pipes[e.pipe];
            match e.end {
                End::Read => pipe.readers -= 1,
                End::Write => pipe.writers -= 1,
            }
        }
    }

    fn exit(&mut self, pid: ProcessId, status: i8) {
        let owned: Vec<Handle> = self
            .handles
            .iter()
            .filter(|(_, e)| e.owner == pid)
            .map(|(h, _)| *h)
            .collect();
        for h in owned {
            self.close(h);
        }
        if let Some(p) = self.procs.get_mut(&pid) {
            if p.state == ProcState::Running {
                p.state = ProcState::Exited(status);
            }
        }
    }
}

/// The primitives as seen from one simulated process.
pub struct SimProcess {
    shared: Arc<Shared>,
    pid: ProcessId,
}

impl SimProcess {
    pub fn pid(&self) -> ProcessId {
        self.pid
    }
}

/// Marks the process exited even if its executor panics, so that its parent
/// never waits forever.
struct ExitGuard<'a> {
    proc: &'a SimProcess,
    status: i8,
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        let mut st = self.proc.shared.lock();
        st.exit(self.proc.pid, self.status);
        drop(st);
        self.proc.shared.changed.notify_all();
    }
}

fn run_process(proc: SimProcess, args: Vec<Vec<u8>>) -> i8 {
    let shared = Arc::clone(&proc.shared);
    let mut guard = ExitGuard {
        proc: &proc,
        status: -1,
    };
    let exec = NodeExecutor::new(guard.proc, &shared.graph, shared.limits);
    guard.status = match exec.run(&Invocation::from_args(args)) {
        Ok(_) => 0,
        Err(err) => err.exit_code() as i8,
    };
    guard.status
}

impl Syscalls for SimProcess {
    fn pipe(&self) -> io::Result<(Handle, Handle)> {
        let mut st = self.shared.lock();
        let idx = st.pipes.len();
        st.pipes.push(SimPipe {
            buf: VecDeque::new(),
            readers: 1,
            writers: 1,
        });
        st.stats.pipes += 1;
        let r = st.new_handle(idx, End::Read, self.pid);
        let w = st.new_handle(idx, End::Write, self.pid);
        Ok((r, w))
    }

    fn spawn(&self, args: &[Vec<u8>], inherited: &[Handle]) -> io::Result<ProcessId> {
        let child = {
            let mut st = self.shared.lock();
            st.stats.spawn_calls += 1;
            for &h in inherited {
                st.owned(self.pid, h, None)?;
            }
            let child = st.new_process(Some(self.pid));
            for h in inherited {
                if let Some(e) = st.handles.get_mut(h) {
                    e.owner = child;
                }
            }
            child
        };

        let proc = SimProcess {
            shared: Arc::clone(&self.shared),
            pid: child,
        };
        let args = args.to_vec();
        let spawned = std::thread::Builder::new()
            .name(format!("sim-node-{child}"))
            .spawn(move || {
                run_process(proc, args);
            });
        if let Err(err) = spawned {
            let mut st = self.shared.lock();
            st.exit(child, -1);
            if let Some(p) = st.procs.get_mut(&child) {
                p.parent = None;
            }
            return Err(err);
        }
        Ok(child)
    }

    fn write(&self, handle: Handle, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let cap = self.shared.config.pipe_capacity;
        let chunk = self.shared.config.max_chunk;
        let mut st = self.shared.lock();
        let idx = st.owned(self.pid, handle, Some(End::Write))?;
        loop {
            let pipe = &mut st.pipes[idx];
            if pipe.readers == 0 {
                return Ok(0);
            }
            let room = cap.saturating_sub(pipe.buf.len());
            if room > 0 {
                let n = room.min(buf.len()).min(chunk);
                pipe.buf.extend(&buf[..n]);
                drop(st);
                self.shared.changed.notify_all();
                return Ok(n);
            }
            st = self.shared.wait(st);
        }
    }

    fn read(&self, handle: Handle, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let chunk = self.shared.config.max_chunk;
        let mut st = self.shared.lock();
        let idx = st.owned(self.pid, handle, Some(End::Read))?;
        loop {
            let pipe = &mut st.pipes[idx];
            if !pipe.buf.is_empty() {
                let n = pipe.buf.len().min(buf.len()).min(chunk);
                for (dst, src) in buf.iter_mut().zip(pipe.buf.drain(..n)) {
                    *dst = src;
                }
                drop(st);
                self.shared.changed.notify_all();
                return Ok(n);
            }
            if pipe.writers == 0 {
                return Ok(0);
            }
            st = self.shared.wait(st);
        }
    }

    fn wait(&self, pid: ProcessId) -> io::Result<i8> {
        let mut st = self.shared.lock();
        loop {
            let p = match st.procs.get(&pid) {
                Some(p) if p.parent == Some(self.pid) => p,
                _ => {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("process {pid} is not a child of {}", self.pid),
                    ))
                }
            };
            if let ProcState::Exited(status) = p.state {
                st.procs.remove(&pid);
                return Ok(status);
            }
            st = self.shared.wait(st);
        }
    }

    fn close(&self, handle: Handle) -> io::Result<()> {
        let mut st = self.shared.lock();
        st.owned(self.pid, handle, None)?;
        st.close(handle);
        drop(st);
        self.shared.changed.notify_all();
        Ok(())
    }

    fn adopt(&self, handle: Handle) -> io::Result<()> {
        self.shared.lock().owned(self.pid, handle, None).map(|_| ())
    }
}

/// Runs a whole graph in-process and returns the root's exit status.
pub fn run_graph(graph: GraphDescriptor, limits: Limits, config: SimConfig) -> i8 {
    SimKernel::new(graph, limits, config).run_root()
}
