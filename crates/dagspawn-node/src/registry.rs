use dagspawn_graph::PipeIndex;

use crate::error::NodeError;
use crate::syscalls::Handle;

/// Pipe index to handle bindings visible to one node run.
///
/// Entries are only ever appended; lookups scan in insertion order, so the
/// first binding of a pipe index wins.
#[derive(Debug, Clone)]
pub struct PipeRegistry {
    entries: Vec<(PipeIndex, Handle)>,
    capacity: usize,
}

impl PipeRegistry {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
        }
    }

    pub fn add(&mut self, pipe: PipeIndex, handle: Handle) -> Result<(), NodeError> {
        if self.entries.len() >= self.capacity {
            return Err(NodeError::NoSpaceForPipes {
                capacity: self.capacity,
            });
        }
        self.entries.push((pipe, handle));
        Ok(())
    }

    pub fn find(&self, pipe: PipeIndex) -> Result<Handle, NodeError> {
        self.entries
            .iter()
            .find(|(p, _)| *p == pipe)
            .map(|(_, h)| *h)
            .ok_or(NodeError::NotFound { pipe })
    }

    pub fn iter(&self) -> impl Iterator<Item = (PipeIndex, Handle)> + '_ {
        self.entries.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
