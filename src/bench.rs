use std::io::Write;
use std::path::Path;

use crate::config::{BenchConfig, DEFAULT_STEP_SCALE, DEFAULT_TOTAL_STEPS};
use crate::db::BackendKind;
use crate::error::Result;
use crate::ops::{OpKind, Suite};
use crate::runner::{RunSummary, WorkloadRunner};

/// Durable single puts plus random reads.
pub const DIRECT_SUITE: [OpKind; 2] = [OpKind::SetSync, OpKind::GetRand];
/// Batched puts plus random reads.
pub const BATCH_SUITE: [OpKind; 2] = [OpKind::SetInBatch, OpKind::GetRand];

pub struct Preset {
    pub name: &'static str,
    pub kind: BackendKind,
    pub total_steps: usize,
    pub ops: &'static [OpKind],
}

/// The standard comparison: direct writes on both backends, then batched writes on lsmdb.
/// fsdb gets fewer steps because every key is its own fsync'd file.
pub fn presets() -> Vec<Preset> {
    vec![
        Preset {
            name: "direct_fsdb",
            kind: BackendKind::FsDb,
            total_steps: 10,
            ops: &DIRECT_SUITE,
        },
        Preset {
            name: "direct_lsmdb",
            kind: BackendKind::LsmDb,
            total_steps: DEFAULT_TOTAL_STEPS,
            ops: &DIRECT_SUITE,
        },
        Preset {
            name: "batch_lsmdb",
            kind: BackendKind::LsmDb,
            total_steps: DEFAULT_TOTAL_STEPS,
            ops: &BATCH_SUITE,
        },
    ]
}

/// Runs every preset in order under `dir`. Stops at the first failing run.
pub fn run_presets<W: Write>(
    dir: &Path,
    seed: Option<u64>,
    out: &mut W,
) -> Result<Vec<RunSummary>> {
    let mut summaries = Vec::new();
    for preset in presets() {
        let config = BenchConfig::new(preset.name, preset.kind)
            .dir(dir)
            .steps(preset.total_steps, DEFAULT_STEP_SCALE)
            .seed(seed);
        let suite = Suite::from_kinds(preset.ops)?;
        let summary = WorkloadRunner::new(config).run(&suite, out)?;
        for (op, total) in &summary.op_totals {
            tracing::info!(run = preset.name, op = %op, total = ?total, "op total");
        }
        summaries.push(summary);
    }
    Ok(summaries)
}
