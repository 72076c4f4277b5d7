//! Static description of a process graph.
//!
//! A [`GraphDescriptor`] lists which node spawns which child (and which pipe
//! endpoints the child receives), which node creates which pipe pair, and which
//! payload travels from one node to another over which pipes. It is decoded once
//! per process from an untrusted binary buffer and never mutated afterwards.

pub mod doc;
pub mod gen;
mod validate;
pub mod wire;

pub use validate::GraphIssue;
pub use wire::WireError;

pub type NodeIndex = u64;
pub type PipeIndex = u64;

const SPAWN_FIELDS: usize = 3;
const PIPE_FIELDS: usize = 3;
const WRITE_FIELDS: usize = 5;
const DATA_FIELDS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnEntry {
    pub from: NodeIndex,
    pub child: NodeIndex,
    /// Pipes handed to `child`, in the order their handles are passed.
    pub pipes: Vec<PipeIndex>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeEntry {
    pub owner: NodeIndex,
    pub read_pipe: PipeIndex,
    pub write_pipe: PipeIndex,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteEntry {
    pub from: NodeIndex,
    pub from_pipe: PipeIndex,
    pub to: NodeIndex,
    pub to_pipe: PipeIndex,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphDescriptor {
    spawns: Vec<SpawnEntry>,
    pipes: Vec<PipeEntry>,
    writes: Vec<WriteEntry>,
}

impl GraphDescriptor {
    pub fn new(spawns: Vec<SpawnEntry>, pipes: Vec<PipeEntry>, writes: Vec<WriteEntry>) -> Self {
        Self {
            spawns,
            pipes,
            writes,
        }
    }

    /// Decodes a graph buffer, rejecting anything larger than `max_len`.
    pub fn decode_with_limit(buf: &[u8], max_len: usize) -> Result<Self, WireError> {
        if buf.len() > max_len {
            return Err(WireError::TooLarge {
                len: buf.len(),
                max: max_len,
            });
        }
        Self::decode(buf)
    }

    /// Decodes and fully verifies a graph buffer. The result is a pure function
    /// of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let data = wire::split_table("Data", buf, DATA_FIELDS)?;

        let spawns = wire::split_offsets("Spawns", data[0])?
            .into_iter()
            .map(decode_spawn)
            .collect::<Result<Vec<_>, _>>()?;
        let pipes = wire::split_offsets("Pipes", data[1])?
            .into_iter()
            .map(decode_pipe)
            .collect::<Result<Vec<_>, _>>()?;
        let writes = wire::split_offsets("Writes", data[2])?
            .into_iter()
            .map(decode_write)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            spawns,
            pipes,
            writes,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let spawns: Vec<Vec<u8>> = self
            .spawns
            .iter()
            .map(|s| {
                wire::build_offsets(&[
                    wire::build_uint64(s.from),
                    wire::build_uint64(s.child),
                    wire::build_uint64_fixvec(&s.pipes),
                ])
            })
            .collect();
        let pipes: Vec<Vec<u8>> = self
            .pipes
            .iter()
            .map(|p| {
                wire::build_offsets(&[
                    wire::build_uint64(p.owner),
                    wire::build_uint64(p.read_pipe),
                    wire::build_uint64(p.write_pipe),
                ])
            })
            .collect();
        let writes: Vec<Vec<u8>> = self
            .writes
            .iter()
            .map(|w| {
                wire::build_offsets(&[
                    wire::build_uint64(w.from),
                    wire::build_uint64(w.from_pipe),
                    wire::build_uint64(w.to),
                    wire::build_uint64(w.to_pipe),
                    wire::build_fixvec(w.data.len(), &w.data),
                ])
            })
            .collect();

        wire::build_offsets(&[
            wire::build_offsets(&spawns),
            wire::build_offsets(&pipes),
            wire::build_offsets(&writes),
        ])
    }

    pub fn spawns(&self) -> &[SpawnEntry] {
        &self.spawns
    }

    pub fn pipes(&self) -> &[PipeEntry] {
        &self.pipes
    }

    pub fn writes(&self) -> &[WriteEntry] {
        &self.writes
    }

    /// The spawn entry that creates `child`, if any. First match wins.
    pub fn find_spawn_by_child(&self, child: NodeIndex) -> Option<&SpawnEntry> {
        self.spawns.iter().find(|s| s.child == child)
    }

    pub fn spawns_from(&self, node: NodeIndex) -> impl Iterator<Item = &SpawnEntry> {
        self.spawns.iter().filter(move |s| s.from == node)
    }

    pub fn pipes_owned_by(&self, node: NodeIndex) -> impl Iterator<Item = &PipeEntry> {
        self.pipes.iter().filter(move |p| p.owner == node)
    }
}

fn decode_spawn(seg: &[u8]) -> Result<SpawnEntry, WireError> {
    let f = wire::split_table("Spawn", seg, SPAWN_FIELDS)?;
    Ok(SpawnEntry {
        from: wire::read_uint64("Spawn.from", f[0])?,
        child: wire::read_uint64("Spawn.child", f[1])?,
        pipes: wire::read_uint64_fixvec("Spawn.pipes", f[2])?,
    })
}

fn decode_pipe(seg: &[u8]) -> Result<PipeEntry, WireError> {
    let f = wire::split_table("Pipe", seg, PIPE_FIELDS)?;
    Ok(PipeEntry {
        owner: wire::read_uint64("Pipe.vm", f[0])?,
        read_pipe: wire::read_uint64("Pipe.read_pipe", f[1])?,
        write_pipe: wire::read_uint64("Pipe.write_pipe", f[2])?,
    })
}

fn decode_write(seg: &[u8]) -> Result<WriteEntry, WireError> {
    let f = wire::split_table("Write", seg, WRITE_FIELDS)?;
    Ok(WriteEntry {
        from: wire::read_uint64("Write.from", f[0])?,
        from_pipe: wire::read_uint64("Write.from_pipe", f[1])?,
        to: wire::read_uint64("Write.to", f[2])?,
        to_pipe: wire::read_uint64("Write.to_pipe", f[3])?,
        data: wire::read_fixvec("Write.data", f[4], 1)?.to_vec(),
    })
}
