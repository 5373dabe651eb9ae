use std::path::PathBuf;

use crate::db::BackendKind;
use crate::error::{BenchError, Result};

pub const DEFAULT_TOTAL_STEPS: usize = 100;
pub const DEFAULT_STEP_SCALE: usize = 100;
pub const DEFAULT_VALUE_LEN: usize = 24;
pub const DEFAULT_DIR: &str = ".";
/// Overrides the default artifact directory.
pub const DIR_ENV: &str = "TINYKV_BENCH_DIR";

/// One benchmark run: which store, where, and how many steps of what size.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub name: String,
    pub dir: PathBuf,
    pub kind: BackendKind,
    pub total_steps: usize,
    /// Items each operation handles per step.
    pub step_scale: usize,
    /// Random bytes per value, before hex encoding.
    pub value_len: usize,
    /// Fixed seed for reproducible keys and payloads; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl BenchConfig {
    pub fn new(name: impl Into<String>, kind: BackendKind) -> Self {
        Self {
            name: name.into(),
            dir: PathBuf::from(DEFAULT_DIR),
            kind,
            total_steps: DEFAULT_TOTAL_STEPS,
            step_scale: DEFAULT_STEP_SCALE,
            value_len: DEFAULT_VALUE_LEN,
            seed: None,
        }
    }

    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    pub fn steps(mut self, total_steps: usize, step_scale: usize) -> Self {
        self.total_steps = total_steps;
        self.step_scale = step_scale;
        self
    }

    pub fn value_len(mut self, value_len: usize) -> Self {
        self.value_len = value_len;
        self
    }

    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(BenchError::Config("name must not be empty".into()));
        }
        if self.name.contains(['/', '\\']) {
            return Err(BenchError::Config(format!(
                "name {:?} must not contain a path separator",
                self.name
            )));
        }
        if self.total_steps == 0 {
            return Err(BenchError::Config("total_steps must be at least 1".into()));
        }
        if self.step_scale == 0 {
            return Err(BenchError::Config("step_scale must be at least 1".into()));
        }
        if self.value_len == 0 {
            return Err(BenchError::Config("value_len must be at least 1".into()));
        }
        Ok(())
    }
}
