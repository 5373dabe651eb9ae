//! Failures that abort a benchmark run.

use std::path::PathBuf;

use thiserror::Error;

/// Every variant is fatal: timings from a run that hit any of these are discarded.
#[derive(Debug, Error)]
pub enum BenchError {
    /// Rejected before anything touched disk
    #[error("invalid benchmark config: {0}")]
    Config(String),

    #[error("failed to open store '{name}'")]
    Open {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// An operation's read or write failed
    #[error("operation '{op}' failed in step {step} of '{name}'")]
    Operation {
        name: String,
        op: String,
        step: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to close store '{name}'")]
    Close {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to write report")]
    Output(#[from] std::io::Error),

    #[error("failed to remove {}", path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, BenchError>;
