//! JSON authoring form of a graph (`dagspawn.graph@0.1.0`).

use std::path::Path;

use anyhow::{Context, Result};
use base64::Engine as _;
use dagspawn_contracts::GRAPH_DOC_SCHEMA_VERSION;
use serde::{Deserialize, Serialize};

use crate::{GraphDescriptor, NodeIndex, PipeEntry, PipeIndex, SpawnEntry, WriteEntry};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphDoc {
    pub schema_version: String,
    #[serde(default)]
    pub spawns: Vec<SpawnDoc>,
    #[serde(default)]
    pub pipes: Vec<PipeDoc>,
    #[serde(default)]
    pub writes: Vec<WriteDoc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpawnDoc {
    pub from: NodeIndex,
    pub child: NodeIndex,
    #[serde(default)]
    pub pipes: Vec<PipeIndex>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipeDoc {
    pub owner: NodeIndex,
    pub read_pipe: PipeIndex,
    pub write_pipe: PipeIndex,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriteDoc {
    pub from: NodeIndex,
    pub from_pipe: PipeIndex,
    pub to: NodeIndex,
    pub to_pipe: PipeIndex,
    pub data_b64: String,
}

impl From<&GraphDescriptor> for GraphDoc {
    fn from(g: &GraphDescriptor) -> Self {
        let b64 = base64::engine::general_purpose::STANDARD;
        GraphDoc {
            schema_version: GRAPH_DOC_SCHEMA_VERSION.to_string(),
            spawns: g
                .spawns()
                .iter()
                .map(|s| SpawnDoc {
                    from: s.from,
                    child: s.child,
                    pipes: s.pipes.clone(),
                })
                .collect(),
            pipes: g
                .pipes()
                .iter()
                .map(|p| PipeDoc {
                    owner: p.owner,
                    read_pipe: p.read_pipe,
                    write_pipe: p.write_pipe,
                })
                .collect(),
            writes: g
                .writes()
                .iter()
                .map(|w| WriteDoc {
                    from: w.from,
                    from_pipe: w.from_pipe,
                    to: w.to,
                    to_pipe: w.to_pipe,
                    data_b64: b64.encode(&w.data),
                })
                .collect(),
        }
    }
}

impl GraphDoc {
    pub fn into_descriptor(self) -> Result<GraphDescriptor> {
        if self.schema_version != GRAPH_DOC_SCHEMA_VERSION {
            anyhow::bail!(
                "unsupported graph schema_version {:?} (expected {GRAPH_DOC_SCHEMA_VERSION:?})",
                self.schema_version
            );
        }

        let b64 = base64::engine::general_purpose::STANDARD;
        let mut writes = Vec::with_capacity(self.writes.len());
        for (i, w) in self.writes.into_iter().enumerate() {
            let data = b64
                .decode(w.data_b64.as_bytes())
                .with_context(|| format!("writes[{i}].data_b64 is not valid base64"))?;
            writes.push(WriteEntry {
                from: w.from,
                from_pipe: w.from_pipe,
                to: w.to,
                to_pipe: w.to_pipe,
                data,
            });
        }

        Ok(GraphDescriptor::new(
            self.spawns
                .into_iter()
                .map(|s| SpawnEntry {
                    from: s.from,
                    child: s.child,
                    pipes: s.pipes,
                })
                .collect(),
            self.pipes
                .into_iter()
                .map(|p| PipeEntry {
                    owner: p.owner,
                    read_pipe: p.read_pipe,
                    write_pipe: p.write_pipe,
                })
                .collect(),
            writes,
        ))
    }
}

pub fn is_json_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

/// Parses graph bytes, choosing the JSON form for `*.json` paths and the
/// binary form otherwise.
pub fn parse_graph_bytes(path: &Path, bytes: &[u8], max_binary_len: usize) -> Result<GraphDescriptor> {
    if is_json_path(path) {
        let doc: GraphDoc = serde_json::from_slice(bytes)
            .with_context(|| format!("parse graph JSON: {}", path.display()))?;
        doc.into_descriptor()
            .with_context(|| format!("invalid graph document: {}", path.display()))
    } else {
        GraphDescriptor::decode_with_limit(bytes, max_binary_len)
            .with_context(|| format!("decode binary graph: {}", path.display()))
    }
}

pub fn read_graph_file(path: &Path, max_binary_len: usize) -> Result<GraphDescriptor> {
    let bytes =
        std::fs::read(path).with_context(|| format!("read graph: {}", path.display()))?;
    parse_graph_bytes(path, &bytes, max_binary_len)
}
