use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use anyhow::Context;
use rand::rngs::StdRng;
use rand::{Rng, RngCore};

use crate::db::{Batch, DbHandle};
use crate::error::{BenchError, Result};
use crate::util::to_hex;

/// What an operation gets to work with in one step.
pub struct StepContext<'a> {
    /// Items to handle this step.
    pub item_count: usize,
    /// First key of this step. Keys written in a step stay in `[scale, scale + item_count)`.
    pub scale: usize,
    pub value_len: usize,
    pub rng: &'a mut StdRng,
}

/// Outcome of one operation in one step, rendered as `op, detail, Nms`.
#[derive(Debug, Clone)]
pub struct OpReport {
    pub op: &'static str,
    pub detail: Option<String>,
    pub elapsed: Duration,
}

impl OpReport {
    pub fn new(op: &'static str, detail: Option<String>, elapsed: Duration) -> Self {
        Self { op, detail, elapsed }
    }
}

impl fmt::Display for OpReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}, {}, {}ms", self.op, detail, self.elapsed.as_millis()),
            None => write!(f, "{}, {}ms", self.op, self.elapsed.as_millis()),
        }
    }
}

/// A timed pattern of backend calls.
pub trait Operation {
    fn run(&self, ctx: &mut StepContext<'_>, handle: &mut DbHandle) -> anyhow::Result<OpReport>;
}

fn step_key(ctx: &StepContext<'_>, i: usize) -> Vec<u8> {
    (ctx.scale + i).to_string().into_bytes()
}

fn random_value(ctx: &mut StepContext<'_>) -> Vec<u8> {
    let mut raw = vec![0u8; ctx.value_len];
    ctx.rng.fill_bytes(&mut raw);
    to_hex(&raw).into_bytes()
}

/// One durable put per item.
pub struct SetSync;

impl Operation for SetSync {
    fn run(&self, ctx: &mut StepContext<'_>, handle: &mut DbHandle) -> anyhow::Result<OpReport> {
        let start = Instant::now();
        for i in 0..ctx.item_count {
            let key = step_key(ctx, i);
            let val = random_value(ctx);
            handle.db().put_sync(&key, &val).context("write")?;
        }
        Ok(OpReport::new("setSync", Some(ctx.item_count.to_string()), start.elapsed()))
    }
}

/// All items staged in one batch, committed with a single durable write.
pub struct SetInBatch;

impl SetInBatch {
    fn stage_and_commit(batch: &mut dyn Batch, ctx: &mut StepContext<'_>) -> anyhow::Result<()> {
        for i in 0..ctx.item_count {
            let key = step_key(ctx, i);
            let val = random_value(ctx);
            batch.set(&key, &val);
        }
        batch.write_sync().context("batch write")
    }
}

impl Operation for SetInBatch {
    fn run(&self, ctx: &mut StepContext<'_>, handle: &mut DbHandle) -> anyhow::Result<OpReport> {
        let start = Instant::now();
        let mut batch = handle.db().new_batch();
        let res = Self::stage_and_commit(batch.as_mut(), ctx);
        batch.close();
        res?;
        Ok(OpReport::new("setInBatch", Some(ctx.item_count.to_string()), start.elapsed()))
    }
}

/// `item_count / 100` point reads at uniform keys in `[0, scale + item_count)`.
pub struct GetRand;

impl Operation for GetRand {
    fn run(&self, ctx: &mut StepContext<'_>, handle: &mut DbHandle) -> anyhow::Result<OpReport> {
        let start = Instant::now();
        let get_count = ctx.item_count / 100;
        let upper = ctx.scale + ctx.item_count;
        for _ in 0..get_count {
            let key = ctx.rng.random_range(0..upper).to_string();
            // absent keys are expected early on
            let _ = handle.db().get(key.as_bytes()).context("read")?;
        }
        Ok(OpReport::new("getRand", Some(get_count.to_string()), start.elapsed()))
    }
}

/// Backend stats as `[k1:v1,k2:v2]`.
pub struct Stat;

impl Operation for Stat {
    fn run(&self, _ctx: &mut StepContext<'_>, handle: &mut DbHandle) -> anyhow::Result<OpReport> {
        let start = Instant::now();
        let rendered = render_stats(handle.stats().iter());
        Ok(OpReport::new("stat", Some(rendered), start.elapsed()))
    }
}

pub fn render_stats<'a>(stats: impl Iterator<Item = (&'a String, &'a String)>) -> String {
    let parts: Vec<String> = stats.map(|(k, v)| format!("{k}:{v}")).collect();
    format!("[{}]", parts.join(","))
}

/// Close and reopen the store. The handle keeps pointing at the fresh store.
pub struct Reopen;

impl Operation for Reopen {
    fn run(&self, _ctx: &mut StepContext<'_>, handle: &mut DbHandle) -> anyhow::Result<OpReport> {
        let start = Instant::now();
        handle.reopen()?;
        Ok(OpReport::new("reopen", None, start.elapsed()))
    }
}

/// Built-in operations, by the name they report under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    SetSync,
    SetInBatch,
    GetRand,
    Stat,
    Reopen,
}

impl OpKind {
    pub const ALL: [OpKind; 5] =
        [OpKind::SetSync, OpKind::SetInBatch, OpKind::GetRand, OpKind::Stat, OpKind::Reopen];

    pub fn name(&self) -> &'static str {
        match self {
            OpKind::SetSync => "setSync",
            OpKind::SetInBatch => "setInBatch",
            OpKind::GetRand => "getRand",
            OpKind::Stat => "stat",
            OpKind::Reopen => "reopen",
        }
    }

    pub fn operation(&self) -> Box<dyn Operation> {
        match self {
            OpKind::SetSync => Box::new(SetSync),
            OpKind::SetInBatch => Box::new(SetInBatch),
            OpKind::GetRand => Box::new(GetRand),
            OpKind::Stat => Box::new(Stat),
            OpKind::Reopen => Box::new(Reopen),
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OpKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        OpKind::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown operation {:?}", s))
    }
}

/// Named operations, run in registration order every step.
#[derive(Default)]
pub struct Suite {
    ops: Vec<(String, Box<dyn Operation>)>,
}

impl Suite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_kinds(kinds: &[OpKind]) -> Result<Self> {
        let mut suite = Self::new();
        for kind in kinds {
            suite.register(kind.name(), kind.operation())?;
        }
        Ok(suite)
    }

    pub fn register(&mut self, name: impl Into<String>, op: Box<dyn Operation>) -> Result<()> {
        let name = name.into();
        if name.is_empty() {
            return Err(BenchError::Config("operation name must not be empty".into()));
        }
        if self.ops.iter().any(|(n, _)| *n == name) {
            return Err(BenchError::Config(format!("operation {name:?} registered twice")));
        }
        self.ops.push((name, op));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.ops.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &dyn Operation)> {
        self.ops.iter().map(|(n, op)| (n.as_str(), op.as_ref()))
    }
}
