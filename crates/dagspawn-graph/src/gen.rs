//! Deterministic generation of tree-shaped graphs.
//!
//! Node `0` is the root and every other node has exactly one parent with a
//! smaller index. Each parent/child edge carries one or two transfers; every
//! transfer uses its own pipe pair owned by the parent, with the far end handed
//! to the child. Because each write entry involves exactly two nodes and every
//! node processes the entries in descriptor order, the generated graphs cannot
//! deadlock.

use sha2::{Digest as _, Sha256};

use crate::{GraphDescriptor, NodeIndex, PipeEntry, PipeIndex, SpawnEntry, WriteEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenParams {
    pub nodes: u64,
    pub seed: u64,
    pub max_payload: usize,
}

impl Default for GenParams {
    fn default() -> Self {
        Self {
            nodes: 8,
            seed: 0,
            max_payload: 64,
        }
    }
}

/// SHA-256 in counter mode keyed by the seed.
struct DigestStream {
    seed: [u8; 8],
    counter: u64,
    block: [u8; 32],
    pos: usize,
}

impl DigestStream {
    fn new(seed: u64) -> Self {
        Self {
            seed: seed.to_le_bytes(),
            counter: 0,
            block: [0u8; 32],
            pos: 32,
        }
    }

    fn refill(&mut self) {
        let mut h = Sha256::new();
        h.update(b"dagspawn.gen");
        h.update(self.seed);
        h.update(self.counter.to_le_bytes());
        self.block.copy_from_slice(&h.finalize());
        self.counter += 1;
        self.pos = 0;
    }

    fn next_u8(&mut self) -> u8 {
        if self.pos == self.block.len() {
            self.refill();
        }
        let b = self.block[self.pos];
        self.pos += 1;
        b
    }

    fn next_u64(&mut self) -> u64 {
        let mut raw = [0u8; 8];
        for b in &mut raw {
            *b = self.next_u8();
        }
        u64::from_le_bytes(raw)
    }

    /// Uniform enough in `0..n` for graph shapes; `n` must be non-zero.
    fn below(&mut self, n: u64) -> u64 {
        self.next_u64() % n
    }
}

pub fn generate(params: GenParams) -> GraphDescriptor {
    let mut rng = DigestStream::new(params.seed);
    let max_payload = params.max_payload.max(1) as u64;

    let mut spawns = Vec::new();
    let mut pipes = Vec::new();
    let mut writes = Vec::new();
    let mut next_pipe: PipeIndex = 0;

    for child in 1..params.nodes.max(1) {
        let parent: NodeIndex = rng.below(child);
        let transfers = 1 + rng.below(2);

        let mut handed = Vec::new();
        for _ in 0..transfers {
            let read_pipe = next_pipe;
            let write_pipe = next_pipe + 1;
            next_pipe += 2;
            pipes.push(PipeEntry {
                owner: parent,
                read_pipe,
                write_pipe,
            });

            let len = 1 + rng.below(max_payload) as usize;
            let data: Vec<u8> = (0..len).map(|_| rng.next_u8()).collect();

            let downstream = rng.below(2) == 0;
            let (from, to) = if downstream {
                handed.push(read_pipe);
                (parent, child)
            } else {
                handed.push(write_pipe);
                (child, parent)
            };
            writes.push(WriteEntry {
                from,
                from_pipe: write_pipe,
                to,
                to_pipe: read_pipe,
                data,
            });
        }

        spawns.push(SpawnEntry {
            from: parent,
            child,
            pipes: handed,
        });
    }

    for i in (1..writes.len()).rev() {
        let j = rng.below(i as u64 + 1) as usize;
        writes.swap(i, j);
    }

    GraphDescriptor::new(spawns, pipes, writes)
}
