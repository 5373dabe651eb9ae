pub mod fsdb;
pub mod lsm;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;

pub use fsdb::FsDb;
pub use lsm::{LsmDb, LsmOptions};

/// Uniform interface for a key-value store the harness can drive.
pub trait Db {
    /// Buffered write; durability is up to the backend.
    fn put(&mut self, key: &[u8], value: &[u8]) -> anyhow::Result<()>;

    /// Write that is durable once this returns.
    fn put_sync(&mut self, key: &[u8], value: &[u8]) -> anyhow::Result<()>;

    /// A missing key is `Ok(None)`, never an error.
    fn get(&mut self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>>;

    fn new_batch(&mut self) -> Box<dyn Batch + '_>;

    fn stats(&self) -> BTreeMap<String, String>;

    /// Calling close twice is a no-op. Every other call after close fails.
    fn close(&mut self) -> anyhow::Result<()>;
}

/// Pending writes staged against one store.
pub trait Batch {
    fn set(&mut self, key: &[u8], value: &[u8]);

    /// Durably commits everything staged so far.
    fn write_sync(&mut self) -> anyhow::Result<()>;

    /// Releases staged writes. Idempotent, and fine to call after `write_sync`.
    fn close(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// One file per key.
    FsDb,
    /// WAL + memtable + sorted tables.
    LsmDb,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::FsDb => "fsdb",
            BackendKind::LsmDb => "lsmdb",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fsdb" => Ok(BackendKind::FsDb),
            "lsmdb" | "lsm" => Ok(BackendKind::LsmDb),
            other => Err(anyhow::anyhow!("unknown backend kind {:?} (expected fsdb|lsmdb)", other)),
        }
    }
}

/// Where a store named `name` keeps its files under `dir`.
pub fn artifact_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.db"))
}

pub fn open(name: &str, kind: BackendKind, dir: &Path) -> anyhow::Result<Box<dyn Db>> {
    if !dir.is_dir() {
        return Err(anyhow::anyhow!("{} is not a directory", dir.display()));
    }
    let path = artifact_path(dir, name);
    let db: Box<dyn Db> = match kind {
        BackendKind::FsDb => Box::new(FsDb::open(&path)?),
        BackendKind::LsmDb => Box::new(LsmDb::open(&path, LsmOptions::default())?),
    };
    Ok(db)
}

/// An open store plus what is needed to open it again.
pub struct DbHandle {
    name: String,
    kind: BackendKind,
    dir: PathBuf,
    db: Box<dyn Db>,
}

impl DbHandle {
    pub fn open<P: AsRef<Path>>(name: &str, kind: BackendKind, dir: P) -> anyhow::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let db = open(name, kind, &dir).with_context(|| format!("open {kind} store {name:?}"))?;
        Ok(Self { name: name.to_string(), kind, dir, db })
    }

    /// Wraps an already open store, e.g. a test double.
    pub fn from_db(name: &str, kind: BackendKind, dir: PathBuf, db: Box<dyn Db>) -> Self {
        Self { name: name.to_string(), kind, dir, db }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn artifact_path(&self) -> PathBuf {
        artifact_path(&self.dir, &self.name)
    }

    pub fn db(&mut self) -> &mut dyn Db {
        self.db.as_mut()
    }

    pub fn stats(&self) -> BTreeMap<String, String> {
        self.db.stats()
    }

    /// Closes the current store and swaps in a freshly opened one.
    pub fn reopen(&mut self) -> anyhow::Result<()> {
        self.db.close().context("close before reopen")?;
        self.db = open(&self.name, self.kind, &self.dir)
            .with_context(|| format!("reopen {} store {:?}", self.kind, self.name))?;
        Ok(())
    }

    pub fn close(mut self) -> anyhow::Result<()> {
        self.db.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_str() {
        for kind in [BackendKind::FsDb, BackendKind::LsmDb] {
            assert_eq!(kind.as_str().parse::<BackendKind>().unwrap(), kind);
        }
        assert!("goleveldb".parse::<BackendKind>().is_err());
    }

    #[test]
    fn artifact_is_named_after_store() {
        assert_eq!(artifact_path(Path::new("/tmp/x"), "direct"), PathBuf::from("/tmp/x/direct.db"));
    }

    #[test]
    fn open_rejects_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(DbHandle::open("s", BackendKind::FsDb, &missing).is_err());
        assert!(!artifact_path(&missing, "s").exists());
    }

    #[test]
    fn reopen_keeps_data_for_both_kinds() {
        for kind in [BackendKind::FsDb, BackendKind::LsmDb] {
            let dir = tempfile::tempdir().unwrap();
            let mut h = DbHandle::open("s", kind, dir.path()).unwrap();
            h.db().put_sync(b"k", b"v").unwrap();
            h.reopen().unwrap();
            assert_eq!(h.db().get(b"k").unwrap(), Some(b"v".to_vec()), "{kind}");
            h.close().unwrap();
        }
    }
}
