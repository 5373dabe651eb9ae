pub mod bench;
pub mod config;
pub mod db;
pub mod error;
pub mod ops;
pub mod runner;
pub mod util;
pub mod wal;

pub use config::BenchConfig;
pub use db::{BackendKind, Batch, Db, DbHandle};
pub use error::BenchError;
pub use ops::{OpKind, OpReport, Operation, StepContext, Suite};
pub use runner::{RunSummary, WorkloadRunner};
