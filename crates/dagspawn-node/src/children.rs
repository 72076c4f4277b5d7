use crate::error::NodeError;
use crate::syscalls::{ProcessId, Syscalls};

/// Processes spawned by one node run, joined in reverse spawn order.
///
/// Whatever has not been joined when the set is dropped is waited for (without
/// inspecting the status), so a failing run never leaves children behind.
pub struct SpawnedChildSet<'s, S: Syscalls + ?Sized> {
    sys: &'s S,
    pids: Vec<ProcessId>,
    limit: usize,
    spawned: usize,
}

impl<'s, S: Syscalls + ?Sized> SpawnedChildSet<'s, S> {
    pub fn new(sys: &'s S, limit: usize) -> Self {
        Self {
            sys,
            pids: Vec::new(),
            limit,
            spawned: 0,
        }
    }

    /// Fails when one more spawn would exceed the ceiling.
    pub fn ensure_room(&self) -> Result<(), NodeError> {
        if self.spawned >= self.limit {
            return Err(NodeError::TooManySpawns { limit: self.limit });
        }
        Ok(())
    }

    pub fn push(&mut self, pid: ProcessId) {
        self.pids.push(pid);
        self.spawned += 1;
    }

    pub fn spawned(&self) -> usize {
        self.spawned
    }

    /// Joins every child, last spawned first. The first wait error or non-zero
    /// status ends the join.
    pub fn join_all(&mut self) -> Result<(), NodeError> {
        while let Some(pid) = self.pids.pop() {
            let status = self.sys.wait(pid).map_err(NodeError::syscall("wait"))?;
            tracing::debug!(pid, status, "joined child");
            if status != 0 {
                return Err(NodeError::ChildFailed { pid, status });
            }
        }
        Ok(())
    }
}

impl<S: Syscalls + ?Sized> Drop for SpawnedChildSet<'_, S> {
    fn drop(&mut self) {
        while let Some(pid) = self.pids.pop() {
            match self.sys.wait(pid) {
                Ok(status) => tracing::debug!(pid, status, "reaped child"),
                Err(err) => tracing::warn!(pid, error = %err, "failed to reap child"),
            }
        }
    }
}
