use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;

use super::{Batch, Db};
use crate::util::{from_hex, to_hex};

const TMP_SUFFIX: &str = ".tmp";
// keeps the empty key from naming the store directory itself
const KEY_PREFIX: &str = "k";

/// File-per-key store. The file name is `k` plus the key in hex, the file body is the value.
/// Writes go to `k<hex>.tmp` first and are renamed into place.
pub struct FsDb {
    dir: PathBuf,
    closed: bool,
}

impl FsDb {
    pub fn open<P: AsRef<Path>>(dir: P) -> anyhow::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        // leftovers from an interrupted write never became visible
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == &TMP_SUFFIX[1..]) {
                fs::remove_file(&path)?;
            }
        }
        Ok(Self { dir, closed: false })
    }

    fn key_path(&self, key: &[u8]) -> PathBuf {
        self.dir.join(format!("{KEY_PREFIX}{}", to_hex(key)))
    }

    fn check_open(&self) -> anyhow::Result<()> {
        if self.closed {
            return Err(anyhow::anyhow!("fsdb {} is closed", self.dir.display()));
        }
        Ok(())
    }

    fn write_file(&self, key: &[u8], value: &[u8], sync: bool) -> anyhow::Result<()> {
        let path = self.key_path(key);
        let mut tmp = path.clone().into_os_string();
        tmp.push(TMP_SUFFIX);

        let mut f = OpenOptions::new().create(true).write(true).truncate(true).open(&tmp)?;
        f.write_all(value)?;
        if sync {
            f.sync_all()?;
        }
        fs::rename(&tmp, &path)
            .with_context(|| format!("rename into {}", path.display()))?;
        Ok(())
    }

    fn sync_dir(&self) -> anyhow::Result<()> {
        File::open(&self.dir)?.sync_all()?;
        Ok(())
    }

    fn keys(&self) -> anyhow::Result<Vec<(Vec<u8>, u64)>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(key) = name
                .to_str()
                .and_then(|n| n.strip_prefix(KEY_PREFIX))
                .and_then(from_hex)
            else {
                continue;
            };
            out.push((key, entry.metadata()?.len()));
        }
        Ok(out)
    }
}

impl Db for FsDb {
    fn put(&mut self, key: &[u8], value: &[u8]) -> anyhow::Result<()> {
        self.check_open()?;
        self.write_file(key, value, false)
    }

    fn put_sync(&mut self, key: &[u8], value: &[u8]) -> anyhow::Result<()> {
        self.check_open()?;
        self.write_file(key, value, true)?;
        self.sync_dir()
    }

    fn get(&mut self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        self.check_open()?;
        match fs::read(self.key_path(key)) {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn new_batch(&mut self) -> Box<dyn Batch + '_> {
        Box::new(FsBatch { db: self, ops: Vec::new(), closed: false })
    }

    fn stats(&self) -> BTreeMap<String, String> {
        let mut stats = BTreeMap::new();
        stats.insert("fsdb.path".to_string(), self.dir.display().to_string());
        match self.keys() {
            Ok(keys) => {
                let bytes: u64 = keys.iter().map(|(_, len)| len).sum();
                stats.insert("fsdb.keys".to_string(), keys.len().to_string());
                stats.insert("fsdb.bytes".to_string(), bytes.to_string());
            }
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "fsdb stats scan failed");
            }
        }
        stats
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.closed = true;
        Ok(())
    }
}

struct FsBatch<'a> {
    db: &'a mut FsDb,
    ops: Vec<(Vec<u8>, Vec<u8>)>,
    closed: bool,
}

impl Batch for FsBatch<'_> {
    fn set(&mut self, key: &[u8], value: &[u8]) {
        self.ops.push((key.to_vec(), value.to_vec()));
    }

    fn write_sync(&mut self) -> anyhow::Result<()> {
        if self.closed {
            return Err(anyhow::anyhow!("batch already closed"));
        }
        self.db.check_open()?;
        for (key, value) in self.ops.drain(..) {
            self.db.write_file(&key, &value, true)?;
        }
        self.db.sync_dir()
    }

    fn close(&mut self) {
        self.ops.clear();
        self.closed = true;
    }
}
