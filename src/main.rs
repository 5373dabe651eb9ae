use std::io;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tinykv_bench::config::{
    DEFAULT_DIR, DEFAULT_STEP_SCALE, DEFAULT_TOTAL_STEPS, DEFAULT_VALUE_LEN, DIR_ENV,
};
use tinykv_bench::{bench, BackendKind, BenchConfig, DbHandle, OpKind, Suite, WorkloadRunner};

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Step-scaled latency benchmarks for fsdb and lsmdb",
    long_about = None
)]
struct Cli {
    /// Directory the stores are created in
    #[arg(long, global = true, env = DIR_ENV, default_value = DEFAULT_DIR)]
    dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the standard direct/batch comparison on both backends
    Preset {
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Run one suite against one store
    Run {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "lsmdb")]
        kind: BackendKind,
        #[arg(long, default_value_t = DEFAULT_TOTAL_STEPS)]
        steps: usize,
        /// Items per operation per step
        #[arg(long, default_value_t = DEFAULT_STEP_SCALE)]
        scale: usize,
        /// Comma separated: setSync,setInBatch,getRand,stat,reopen
        #[arg(long, value_delimiter = ',', default_value = "setSync,getRand")]
        ops: Vec<OpKind>,
        #[arg(long, default_value_t = DEFAULT_VALUE_LEN)]
        value_len: usize,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Durably write one key into a store, keeping the store on disk
    Put {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "lsmdb")]
        kind: BackendKind,
        key: String,
        value: String,
    },
    /// Read one key from a store
    Get {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "lsmdb")]
        kind: BackendKind,
        key: String,
    },
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_writer(io::stderr).with_env_filter(filter).init();

    let cli = Cli::parse();
    std::fs::create_dir_all(&cli.dir)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Commands::Preset { seed } => {
            let summaries = bench::run_presets(&cli.dir, seed, &mut out)?;
            tracing::info!(runs = summaries.len(), "presets done");
        }
        Commands::Run { name, kind, steps, scale, ops, value_len, seed } => {
            let config = BenchConfig::new(name, kind)
                .dir(&cli.dir)
                .steps(steps, scale)
                .value_len(value_len)
                .seed(seed);
            let suite = Suite::from_kinds(&ops)?;
            WorkloadRunner::new(config).run(&suite, &mut out)?;
        }
        Commands::Put { name, kind, key, value } => {
            let mut db = DbHandle::open(&name, kind, &cli.dir)?;
            db.db().put_sync(key.as_bytes(), value.as_bytes())?;
            db.close()?;
            println!("OK");
        }
        Commands::Get { name, kind, key } => {
            let mut db = DbHandle::open(&name, kind, &cli.dir)?;
            match db.db().get(key.as_bytes())? {
                Some(v) => println!("Value: {}", String::from_utf8_lossy(&v)),
                None => println!("Not found"),
            }
            db.close()?;
        }
    }
    Ok(())
}
