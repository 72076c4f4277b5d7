//! Single-threaded recording primitives for executor unit tests.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::io;

use dagspawn_graph::{GraphDescriptor, PipeEntry, SpawnEntry, WriteEntry};

use crate::syscalls::{Handle, ProcessId, Syscalls};

pub(crate) fn hello_graph() -> GraphDescriptor {
    GraphDescriptor::new(
        vec![SpawnEntry {
            from: 0,
            child: 1,
            pipes: vec![10],
        }],
        vec![PipeEntry {
            owner: 0,
            read_pipe: 10,
            write_pipe: 11,
        }],
        vec![WriteEntry {
            from: 0,
            from_pipe: 11,
            to: 1,
            to_pipe: 10,
            data: b"Hello World!".to_vec(),
        }],
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Pipe,
    Spawn {
        args: Vec<Vec<u8>>,
        inherited: Vec<Handle>,
    },
    Write {
        handle: Handle,
        bytes: Vec<u8>,
    },
    Read {
        handle: Handle,
        len: usize,
    },
    Wait(ProcessId),
    Close(Handle),
    Adopt(Handle),
}

/// Hands out handles from 3 and process ids from 100. Writes succeed (up to
/// `write_chunk` bytes at a time) unless scripted; reads replay queued chunks
/// and report end-of-stream once the queue is empty.
pub(crate) struct RecordingSyscalls {
    calls: RefCell<Vec<Call>>,
    next_handle: Cell<Handle>,
    next_pid: Cell<ProcessId>,
    write_chunk: usize,
    write_script: RefCell<VecDeque<usize>>,
    reads: RefCell<VecDeque<Vec<u8>>>,
    statuses: RefCell<BTreeMap<ProcessId, i8>>,
}

impl Default for RecordingSyscalls {
    fn default() -> Self {
        Self {
            calls: RefCell::new(Vec::new()),
            next_handle: Cell::new(3),
            next_pid: Cell::new(100),
            write_chunk: usize::MAX,
            write_script: RefCell::new(VecDeque::new()),
            reads: RefCell::new(VecDeque::new()),
            statuses: RefCell::new(BTreeMap::new()),
        }
    }
}

impl RecordingSyscalls {
    pub(crate) fn with_write_chunk(mut self, n: usize) -> Self {
        self.write_chunk = n;
        self
    }

    pub(crate) fn script_writes(&self, results: &[usize]) {
        self.write_script.borrow_mut().extend(results.iter().copied());
    }

    pub(crate) fn push_read(&self, chunk: &[u8]) {
        self.reads.borrow_mut().push_back(chunk.to_vec());
    }

    pub(crate) fn set_status(&self, pid: ProcessId, status: i8) {
        self.statuses.borrow_mut().insert(pid, status);
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub(crate) fn spawns(&self) -> Vec<(Vec<Vec<u8>>, Vec<Handle>)> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                Call::Spawn { args, inherited } => Some((args.clone(), inherited.clone())),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn written(&self) -> Vec<u8> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                Call::Write { bytes, .. } => Some(bytes.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub(crate) fn write_sizes(&self) -> Vec<usize> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                Call::Write { bytes, .. } => Some(bytes.len()),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn reads_on(&self) -> Vec<Handle> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                Call::Read { handle, .. } => Some(*handle),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn waits(&self) -> Vec<ProcessId> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                Call::Wait(pid) => Some(*pid),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn closes(&self) -> Vec<Handle> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                Call::Close(h) => Some(*h),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn adopted(&self) -> Vec<Handle> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                Call::Adopt(h) => Some(*h),
                _ => None,
            })
            .collect()
    }

    fn fresh_handle(&self) -> Handle {
        let h = self.next_handle.get();
        self.next_handle.set(h + 1);
        h
    }
}

impl Syscalls for RecordingSyscalls {
    fn pipe(&self) -> io::Result<(Handle, Handle)> {
        self.calls.borrow_mut().push(Call::Pipe);
        Ok((self.fresh_handle(), self.fresh_handle()))
    }

    fn spawn(&self, args: &[Vec<u8>], inherited: &[Handle]) -> io::Result<ProcessId> {
        self.calls.borrow_mut().push(Call::Spawn {
            args: args.to_vec(),
            inherited: inherited.to_vec(),
        });
        let pid = self.next_pid.get();
        self.next_pid.set(pid + 1);
        Ok(pid)
    }

    fn write(&self, handle: Handle, buf: &[u8]) -> io::Result<usize> {
        let n = match self.write_script.borrow_mut().pop_front() {
            Some(n) => n.min(buf.len()),
            None => buf.len().min(self.write_chunk),
        };
        self.calls.borrow_mut().push(Call::Write {
            handle,
            bytes: buf[..n].to_vec(),
        });
        Ok(n)
    }

    fn read(&self, handle: Handle, buf: &mut [u8]) -> io::Result<usize> {
        self.calls.borrow_mut().push(Call::Read {
            handle,
            len: buf.len(),
        });
        let mut reads = self.reads.borrow_mut();
        let Some(mut chunk) = reads.pop_front() else {
            return Ok(0);
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            chunk.drain(..n);
            reads.push_front(chunk);
        }
        Ok(n)
    }

    fn wait(&self, pid: ProcessId) -> io::Result<i8> {
        self.calls.borrow_mut().push(Call::Wait(pid));
        Ok(self.statuses.borrow().get(&pid).copied().unwrap_or(0))
    }

    fn close(&self, handle: Handle) -> io::Result<()> {
        self.calls.borrow_mut().push(Call::Close(handle));
        Ok(())
    }

    fn adopt(&self, handle: Handle) -> io::Result<()> {
        self.calls.borrow_mut().push(Call::Adopt(handle));
        Ok(())
    }
}
