//! Node configuration, read from the environment so that every spawned node
//! sees the same values as the root.

use std::path::PathBuf;
use std::str::FromStr as _;

use anyhow::{Context, Result};
use dagspawn_contracts as contracts;

use crate::executor::Limits;
use crate::logging::{LogConfig, LogFormat};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub graph_path: PathBuf,
    pub limits: Limits,
    pub max_graph_bytes: usize,
    pub log: LogConfig,
}

fn parse_count_env(name: &str, raw: &str) -> Result<usize> {
    let v: usize = raw
        .trim()
        .parse()
        .with_context(|| format!("invalid environment variable {name}={raw:?}"))?;
    if v == 0 {
        anyhow::bail!("invalid environment variable {name}={raw:?} (must be > 0)");
    }
    Ok(v)
}

impl NodeConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let graph_path = lookup(contracts::ENV_GRAPH)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .with_context(|| format!("missing environment variable {}", contracts::ENV_GRAPH))?;

        let mut limits = Limits::default();
        if let Some(raw) = lookup(contracts::ENV_MAX_SPAWNS) {
            limits.max_spawns = parse_count_env(contracts::ENV_MAX_SPAWNS, &raw)?;
        }
        if let Some(raw) = lookup(contracts::ENV_MAX_PIPES) {
            limits.max_pipes = parse_count_env(contracts::ENV_MAX_PIPES, &raw)?;
        }

        let mut log = LogConfig::default();
        if let Some(filter) = lookup(contracts::ENV_LOG) {
            log.filter = filter;
        }
        if let Some(raw) = lookup(contracts::ENV_LOG_FORMAT) {
            log.format = LogFormat::from_str(&raw).with_context(|| {
                format!("invalid environment variable {}", contracts::ENV_LOG_FORMAT)
            })?;
        }

        Ok(Self {
            graph_path,
            limits,
            max_graph_bytes: contracts::DEFAULT_MAX_GRAPH_BYTES,
            log,
        })
    }
}
