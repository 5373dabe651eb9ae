use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::config::BenchConfig;
use crate::db::{DbHandle, artifact_path};
use crate::error::{BenchError, Result};
use crate::ops::{StepContext, Suite};

/// What a finished run did.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub name: String,
    pub steps: usize,
    pub op_lines: usize,
    /// Time spent in each operation across all steps, in suite order.
    pub op_totals: Vec<(String, Duration)>,
    pub elapsed: Duration,
}

/// Drives one store through `total_steps` steps of a suite, one report line per
/// operation per step:
///
/// ```text
/// <name>, <op>, <scale>, <op report>
/// ! step <n> done
/// ```
///
/// The store's files are removed when the run ends, whether it succeeded or not.
pub struct WorkloadRunner {
    config: BenchConfig,
    rng: StdRng,
}

impl WorkloadRunner {
    pub fn new(config: BenchConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self { config, rng }
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    pub fn run<W: Write>(&mut self, suite: &Suite, out: &mut W) -> Result<RunSummary> {
        self.config.validate()?;
        if suite.is_empty() {
            return Err(BenchError::Config("suite has no operations".into()));
        }
        let cfg = &self.config;
        let started = Instant::now();

        let guard = ArtifactGuard::new(artifact_path(&cfg.dir, &cfg.name));
        tracing::info!(
            name = %cfg.name,
            kind = %cfg.kind,
            steps = cfg.total_steps,
            step_scale = cfg.step_scale,
            "starting run"
        );
        let mut handle = DbHandle::open(&cfg.name, cfg.kind, &cfg.dir)
            .map_err(|source| BenchError::Open { name: cfg.name.clone(), source })?;

        let mut op_totals: Vec<(String, Duration)> =
            suite.names().map(|n| (n.to_string(), Duration::ZERO)).collect();
        let mut op_lines = 0;
        for step in 0..cfg.total_steps {
            let scale = step * cfg.step_scale;
            for (i, (op_name, op)) in suite.iter().enumerate() {
                let mut ctx = StepContext {
                    item_count: cfg.step_scale,
                    scale,
                    value_len: cfg.value_len,
                    rng: &mut self.rng,
                };
                let report = op.run(&mut ctx, &mut handle).map_err(|source| BenchError::Operation {
                    name: cfg.name.clone(),
                    op: op_name.to_string(),
                    step,
                    source,
                })?;
                writeln!(out, "{}, {}, {}, {}", cfg.name, op_name, scale, report)?;
                op_totals[i].1 += report.elapsed;
                op_lines += 1;
            }
            writeln!(out, "! step {} done", step + 1)?;
            tracing::debug!(name = %cfg.name, step = step + 1, "step done");
        }
        out.flush()?;

        handle
            .close()
            .map_err(|source| BenchError::Close { name: cfg.name.clone(), source })?;
        guard.remove()?;

        let summary = RunSummary {
            name: cfg.name.clone(),
            steps: cfg.total_steps,
            op_lines,
            op_totals,
            elapsed: started.elapsed(),
        };
        tracing::info!(name = %summary.name, op_lines, elapsed = ?summary.elapsed, "run finished");
        Ok(summary)
    }
}

/// Removes a store's files on drop unless `remove` already did.
struct ArtifactGuard {
    path: PathBuf,
    armed: bool,
}

impl ArtifactGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn remove(mut self) -> Result<()> {
        self.armed = false;
        remove_artifact(&self.path)
            .map_err(|source| BenchError::Cleanup { path: self.path.clone(), source })
    }
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = remove_artifact(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "cleanup after failed run");
        }
    }
}

fn remove_artifact(path: &Path) -> std::io::Result<()> {
    let res = if path.is_dir() { fs::remove_dir_all(path) } else { fs::remove_file(path) };
    match res {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
