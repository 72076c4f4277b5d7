use std::fmt;
use std::str::FromStr;

use anyhow::Context;
use dagspawn_contracts::ENV_BACKEND;

/// Where graph nodes run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// One operating system process per node.
    Os,
    /// One thread per node inside the calling process.
    Sim,
}

impl Backend {
    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Os => "os",
            Backend::Sim => "sim",
        }
    }

    pub fn platform_default() -> Self {
        if cfg!(unix) {
            Backend::Os
        } else {
            Backend::Sim
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct BackendParseError {
    value: String,
}

impl fmt::Display for BackendParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid backend {:?} (expected one of: os, sim)",
            self.value
        )
    }
}

impl std::error::Error for BackendParseError {}

impl FromStr for Backend {
    type Err = BackendParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "os" | "process" => Ok(Backend::Os),
            "sim" | "thread" => Ok(Backend::Sim),
            _ => Err(BackendParseError { value: s }),
        }
    }
}

#[cfg(feature = "clap")]
impl clap::ValueEnum for Backend {
    fn value_variants<'a>() -> &'a [Self] {
        const ALL: [Backend; 2] = [Backend::Os, Backend::Sim];
        &ALL
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            Backend::Os => Some(clap::builder::PossibleValue::new("os").alias("process")),
            Backend::Sim => Some(clap::builder::PossibleValue::new("sim").alias("thread")),
        }
    }
}

fn read_backend_env() -> anyhow::Result<Option<Backend>> {
    let Ok(raw) = std::env::var(ENV_BACKEND) else {
        return Ok(None);
    };
    let backend = Backend::from_str(&raw)
        .with_context(|| format!("invalid environment variable {ENV_BACKEND}={raw:?}"))?;
    Ok(Some(backend))
}

/// An explicit choice wins over the environment, which wins over the platform
/// default.
pub fn resolve_backend(requested: Option<Backend>) -> anyhow::Result<Backend> {
    if let Some(b) = requested {
        return Ok(b);
    }
    Ok(read_backend_env()?.unwrap_or_else(Backend::platform_default))
}
