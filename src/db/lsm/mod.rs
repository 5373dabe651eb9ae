/*
put(k, v)  -> [ WAL ] -> [ MemTable ] --flush--> [ SSTable ]
get(k)     -> [ MemTable ] -> [ SSTables newest..oldest ]
too many tables -> merge all into one, newest value wins
*/

mod memtable;
mod sstable;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

use super::{Batch, Db};
use crate::util::read_u32;
use crate::wal::Wal;
use memtable::MemTable;
use sstable::{parse_table_id, SsTable};

const WAL_FILE: &str = "wal.log";
const TAG_PUT: &[u8; 3] = b"PUT";
const TAG_BATCH: &[u8; 3] = b"BAT";

#[derive(Debug, Clone)]
pub struct LsmOptions {
    /// Flush the memtable to a table once it holds this many key+value bytes.
    pub memtable_bytes: usize,
    /// Merge all tables into one when there are more than this many.
    pub max_tables: usize,
}

impl Default for LsmOptions {
    fn default() -> Self {
        Self { memtable_bytes: 4 << 20, max_tables: 4 }
    }
}

pub struct LsmDb {
    dir: PathBuf,
    opts: LsmOptions,
    wal: Wal,
    memtable: MemTable,
    // oldest first
    tables: Vec<SsTable>,
    next_table_id: u64,
    flushes: u64,
    compactions: u64,
    closed: bool,
}

impl LsmDb {
    pub fn open<P: AsRef<Path>>(dir: P, opts: LsmOptions) -> anyhow::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;

        let mut tables = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "tmp") {
                fs::remove_file(&path)?;
            } else if parse_table_id(&path).is_some() {
                tables.push(SsTable::open(&path)?);
            }
        }
        tables.sort_by_key(|t| t.id());
        let next_table_id = tables.last().map_or(1, |t| t.id() + 1);

        let walpath = dir.join(WAL_FILE);
        let wal = Wal::open(&walpath).context("open wal")?;
        let mut memtable = MemTable::new();
        Wal::replay_from_start(&walpath, |lsn, payload| {
            let entries = decode(&payload).with_context(|| format!("decode wal record {lsn}"))?;
            for (k, v) in entries {
                memtable.insert(&k, &v);
            }
            Ok(())
        })?;

        tracing::debug!(
            dir = %dir.display(),
            tables = tables.len(),
            replayed = memtable.len(),
            "opened lsmdb"
        );
        Ok(Self {
            dir,
            opts,
            wal,
            memtable,
            tables,
            next_table_id,
            flushes: 0,
            compactions: 0,
            closed: false,
        })
    }

    fn check_open(&self) -> anyhow::Result<()> {
        if self.closed {
            return Err(anyhow::anyhow!("lsmdb {} is closed", self.dir.display()));
        }
        Ok(())
    }

    /// Logs `entries` as one WAL record, then applies them to the memtable.
    fn write(&mut self, entries: &[(&[u8], &[u8])], sync: bool) -> anyhow::Result<()> {
        self.check_open()?;
        if entries.is_empty() {
            return Ok(());
        }
        self.wal.append(&encode(entries))?;
        if sync {
            self.wal.sync()?;
        }
        for (k, v) in entries {
            self.memtable.insert(k, v);
        }
        if self.memtable.bytes() >= self.opts.memtable_bytes {
            self.flush()?;
        }
        Ok(())
    }

    /// Writes the memtable out as a new table and empties the WAL.
    pub fn flush(&mut self) -> anyhow::Result<()> {
        if self.memtable.is_empty() {
            return Ok(());
        }
        let id = self.next_table_id;
        self.next_table_id += 1;
        let table = SsTable::write(&self.dir, id, self.memtable.iter())
            .with_context(|| format!("flush memtable to table {id}"))?;
        tracing::debug!(id, entries = table.len(), bytes = table.size(), "flushed memtable");
        self.tables.push(table);
        self.memtable.clear();
        self.wal.reset()?;
        self.flushes += 1;

        if self.tables.len() > self.opts.max_tables {
            self.compact()?;
        }
        Ok(())
    }

    fn compact(&mut self) -> anyhow::Result<()> {
        let mut merged = BTreeMap::new();
        for table in &self.tables {
            for (k, v) in table.entries()? {
                merged.insert(k, v);
            }
        }
        let id = self.next_table_id;
        self.next_table_id += 1;
        let table = SsTable::write(
            &self.dir,
            id,
            merged.iter().map(|(k, v)| (k.as_slice(), v.as_slice())),
        )
        .with_context(|| format!("compact into table {id}"))?;

        let old = std::mem::replace(&mut self.tables, vec![table]);
        for t in &old {
            fs::remove_file(t.path())
                .with_context(|| format!("remove compacted table {}", t.path().display()))?;
        }
        self.compactions += 1;
        tracing::debug!(id, inputs = old.len(), entries = merged.len(), "compacted tables");
        Ok(())
    }
}

impl Db for LsmDb {
    fn put(&mut self, key: &[u8], value: &[u8]) -> anyhow::Result<()> {
        self.write(&[(key, value)], false)
    }

    fn put_sync(&mut self, key: &[u8], value: &[u8]) -> anyhow::Result<()> {
        self.write(&[(key, value)], true)
    }

    fn get(&mut self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        self.check_open()?;
        if let Some(v) = self.memtable.get(key) {
            return Ok(Some(v.to_vec()));
        }
        for table in self.tables.iter().rev() {
            if let Some(v) = table.get(key)? {
                return Ok(Some(v));
            }
        }
        Ok(None)
    }

    fn new_batch(&mut self) -> Box<dyn Batch + '_> {
        Box::new(LsmBatch { db: self, ops: Vec::new(), closed: false })
    }

    fn stats(&self) -> BTreeMap<String, String> {
        let table_bytes: u64 = self.tables.iter().map(|t| t.size()).sum();
        [
            ("lsm.memtable.entries", self.memtable.len().to_string()),
            ("lsm.memtable.bytes", self.memtable.bytes().to_string()),
            ("lsm.tables", self.tables.len().to_string()),
            ("lsm.table.bytes", table_bytes.to_string()),
            ("lsm.wal.next_lsn", self.wal.next_lsn().to_string()),
            ("lsm.flushes", self.flushes.to_string()),
            ("lsm.compactions", self.compactions.to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    fn close(&mut self) -> anyhow::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.wal
            .sync()
            .with_context(|| format!("sync {}", self.wal.path().display()))?;
        self.closed = true;
        Ok(())
    }
}

struct LsmBatch<'a> {
    db: &'a mut LsmDb,
    ops: Vec<(Vec<u8>, Vec<u8>)>,
    closed: bool,
}

impl Batch for LsmBatch<'_> {
    fn set(&mut self, key: &[u8], value: &[u8]) {
        self.ops.push((key.to_vec(), value.to_vec()));
    }

    fn write_sync(&mut self) -> anyhow::Result<()> {
        if self.closed {
            return Err(anyhow::anyhow!("batch already closed"));
        }
        let entries: Vec<(&[u8], &[u8])> =
            self.ops.iter().map(|(k, v)| (k.as_slice(), v.as_slice())).collect();
        self.db.write(&entries, true)?;
        self.ops.clear();
        Ok(())
    }

    fn close(&mut self) {
        self.ops.clear();
        self.closed = true;
    }
}

// payload = b"PUT" + entry | b"BAT" + count(4) + entry*
// entry   = key_len(4) + val_len(4) + key + val
fn encode(entries: &[(&[u8], &[u8])]) -> Vec<u8> {
    let body: usize = entries.iter().map(|(k, v)| 8 + k.len() + v.len()).sum();
    let mut payload = Vec::with_capacity(3 + 4 + body);
    if let [(k, v)] = entries {
        payload.extend_from_slice(TAG_PUT);
        push_entry(&mut payload, k, v);
    } else {
        payload.extend_from_slice(TAG_BATCH);
        payload.extend_from_slice(&(entries.len() as u32).to_le_bytes());
        for (k, v) in entries {
            push_entry(&mut payload, k, v);
        }
    }
    payload
}

fn push_entry(buf: &mut Vec<u8>, key: &[u8], val: &[u8]) {
    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
    buf.extend_from_slice(&(val.len() as u32).to_le_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(val);
}

fn decode(payload: &[u8]) -> anyhow::Result<Vec<(Vec<u8>, Vec<u8>)>> {
    if payload.len() < 3 {
        return Err(anyhow::anyhow!("wal payload too short"));
    }
    let (tag, mut rest) = payload.split_at(3);
    let count = match tag {
        t if t == TAG_PUT => 1,
        t if t == TAG_BATCH => {
            if rest.len() < 4 {
                return Err(anyhow::anyhow!("batch record missing count"));
            }
            let n = read_u32(rest, 0) as usize;
            rest = &rest[4..];
            n
        }
        other => {
            return Err(anyhow::anyhow!("unknown wal op {:?}", String::from_utf8_lossy(other)));
        }
    };

    // every entry needs at least its 8-byte header, so a bogus count cannot over-allocate
    let mut out = Vec::with_capacity(count.min(rest.len() / 8));
    for _ in 0..count {
        if rest.len() < 8 {
            return Err(anyhow::anyhow!("wal entry header truncated"));
        }
        let key_len = read_u32(rest, 0) as usize;
        let val_len = read_u32(rest, 4) as usize;
        let end = 8 + key_len + val_len;
        if rest.len() < end {
            return Err(anyhow::anyhow!("wal entry body truncated"));
        }
        out.push((rest[8..8 + key_len].to_vec(), rest[8 + key_len..end].to_vec()));
        rest = &rest[end..];
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_opts() -> LsmOptions {
        LsmOptions { memtable_bytes: 64, max_tables: 2 }
    }

    fn key(i: usize) -> Vec<u8> {
        i.to_string().into_bytes()
    }

    #[test]
    fn payload_codec() {
        let single = encode(&[(&b"k"[..], &b"v"[..])]);
        assert_eq!(&single[..3], TAG_PUT);
        assert_eq!(decode(&single).unwrap(), vec![(b"k".to_vec(), b"v".to_vec())]);

        let batch = encode(&[(&b"a"[..], &b"1"[..]), (&b"b"[..], &b"22"[..])]);
        assert_eq!(&batch[..3], TAG_BATCH);
        assert_eq!(decode(&batch).unwrap().len(), 2);

        assert!(decode(b"DEL").is_err());
        assert!(decode(&batch[..batch.len() - 1]).is_err());
    }

    #[test]
    fn huge_batch_count_is_rejected() {
        let mut payload = TAG_BATCH.to_vec();
        payload.extend_from_slice(&u32::MAX.to_le_bytes());
        push_entry(&mut payload, b"k", b"v");
        assert!(decode(&payload).is_err());
    }

    #[test]
    fn reads_own_writes_across_flush_and_compaction() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = LsmDb::open(dir.path().join("t.db"), small_opts()).unwrap();
        for i in 0..200 {
            db.put(&key(i), format!("value-{i}").as_bytes()).unwrap();
        }
        // overwrite some keys that were already flushed
        for i in 0..10 {
            db.put_sync(&key(i), b"new").unwrap();
        }

        let stats = db.stats();
        assert!(stats["lsm.flushes"].parse::<u64>().unwrap() > 0);
        assert!(stats["lsm.compactions"].parse::<u64>().unwrap() > 0);
        assert!(stats["lsm.tables"].parse::<usize>().unwrap() <= 2);

        assert_eq!(db.get(&key(3)).unwrap(), Some(b"new".to_vec()));
        assert_eq!(db.get(&key(150)).unwrap(), Some(b"value-150".to_vec()));
        assert_eq!(db.get(b"missing").unwrap(), None);
    }

    #[test]
    fn reopen_replays_wal_and_loads_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.db");
        {
            let mut db = LsmDb::open(&path, small_opts()).unwrap();
            for i in 0..50 {
                db.put_sync(&key(i), b"0123456789").unwrap();
            }
            db.close().unwrap();
        }
        let mut db = LsmDb::open(&path, small_opts()).unwrap();
        for i in 0..50 {
            assert_eq!(db.get(&key(i)).unwrap(), Some(b"0123456789".to_vec()), "key {i}");
        }
    }

    #[test]
    fn batch_commits_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = LsmDb::open(dir.path().join("t.db"), LsmOptions::default()).unwrap();
        {
            let mut batch = db.new_batch();
            for i in 0..5 {
                batch.set(&key(i), b"b");
            }
            batch.write_sync().unwrap();
            batch.close();
        }
        assert_eq!(db.stats()["lsm.wal.next_lsn"], "1");
        assert_eq!(db.stats()["lsm.memtable.entries"], "5");
        assert_eq!(db.get(&key(4)).unwrap(), Some(b"b".to_vec()));
    }

    #[test]
    fn closed_store_rejects_calls() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = LsmDb::open(dir.path().join("t.db"), LsmOptions::default()).unwrap();
        db.close().unwrap();
        assert!(db.put(b"a", b"1").is_err());
        assert!(db.get(b"a").is_err());
        assert!(db.close().is_ok());
    }
}
