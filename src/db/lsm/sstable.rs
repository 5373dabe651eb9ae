use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::util::{crc32, read_u32};

pub const TABLE_EXT: &str = "sst";
const MAGIC: u32 = 0x5354_4231;
const ENTRY_HDR: usize = 8;

/// Footer layout, after the data region.
struct Footer;

impl Footer {
    const MAGIC_OFF: usize = 0;
    const COUNT_OFF: usize = Self::MAGIC_OFF + 4;
    const DATA_LEN_OFF: usize = Self::COUNT_OFF + 4;
    const CRC_OFF: usize = Self::DATA_LEN_OFF + 4;
    const SIZE: usize = Self::CRC_OFF + 4;
}

struct IndexEntry {
    key: Vec<u8>,
    val_off: u64,
    val_len: u32,
}

/// Immutable sorted table on disk. Keys and value offsets are indexed in memory,
/// values are read from the file on demand.
pub struct SsTable {
    id: u64,
    path: PathBuf,
    file: File,
    index: Vec<IndexEntry>,
    size: u64,
}

pub fn table_file_name(id: u64) -> String {
    format!("{id:06}.{TABLE_EXT}")
}

/// Parses `000042.sst` into 42.
pub fn parse_table_id(path: &Path) -> Option<u64> {
    if path.extension()? != TABLE_EXT {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

impl SsTable {
    /// Writes `entries` (sorted, unique keys) as table `id` in `dir`.
    pub fn write<'a, I>(dir: &Path, id: u64, entries: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = (&'a [u8], &'a [u8])>,
    {
        let mut data = Vec::new();
        let mut count: u32 = 0;
        let mut last: Option<&[u8]> = None;
        for (key, val) in entries {
            debug_assert!(last.is_none_or(|l| l < key), "table keys must be sorted and unique");
            last = Some(key);
            data.extend_from_slice(&(key.len() as u32).to_le_bytes());
            data.extend_from_slice(&(val.len() as u32).to_le_bytes());
            data.extend_from_slice(key);
            data.extend_from_slice(val);
            count += 1;
        }

        let mut footer = [0u8; Footer::SIZE];
        footer[Footer::MAGIC_OFF..Footer::MAGIC_OFF + 4].copy_from_slice(&MAGIC.to_le_bytes());
        footer[Footer::COUNT_OFF..Footer::COUNT_OFF + 4].copy_from_slice(&count.to_le_bytes());
        footer[Footer::DATA_LEN_OFF..Footer::DATA_LEN_OFF + 4]
            .copy_from_slice(&(data.len() as u32).to_le_bytes());
        footer[Footer::CRC_OFF..Footer::CRC_OFF + 4].copy_from_slice(&crc32(&data).to_le_bytes());

        let path = dir.join(table_file_name(id));
        let tmp = path.with_extension("tmp");
        {
            let mut f = OpenOptions::new().create(true).write(true).truncate(true).open(&tmp)?;
            f.write_all(&data)?;
            f.write_all(&footer)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        File::open(dir)?.sync_all()?;

        Self::open(&path)
    }

    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let id = parse_table_id(path)
            .ok_or_else(|| anyhow::anyhow!("not a table file: {}", path.display()))?;
        let mut file = File::open(path).with_context(|| format!("open table {}", path.display()))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        if buf.len() < Footer::SIZE {
            return Err(anyhow::anyhow!("table {} too short ({} bytes)", id, buf.len()));
        }
        let footer = &buf[buf.len() - Footer::SIZE..];
        let magic = read_u32(footer, Footer::MAGIC_OFF);
        if magic != MAGIC {
            return Err(anyhow::anyhow!("bad table magic in {}: {:08x}", id, magic));
        }
        let count = read_u32(footer, Footer::COUNT_OFF) as usize;
        let data_len = read_u32(footer, Footer::DATA_LEN_OFF) as usize;
        let crc_stored = read_u32(footer, Footer::CRC_OFF);
        if data_len != buf.len() - Footer::SIZE {
            return Err(anyhow::anyhow!("table {} data length mismatch", id));
        }
        let data = &buf[..data_len];
        if crc32(data) != crc_stored {
            return Err(anyhow::anyhow!("table crc mismatch id={}", id));
        }

        let mut index = Vec::with_capacity(count);
        let mut off = 0usize;
        while off < data.len() {
            if off + ENTRY_HDR > data.len() {
                return Err(anyhow::anyhow!("table {} truncated entry at {}", id, off));
            }
            let key_len = read_u32(data, off) as usize;
            let val_len = read_u32(data, off + 4) as usize;
            let key_start = off + ENTRY_HDR;
            let val_start = key_start + key_len;
            if val_start + val_len > data.len() {
                return Err(anyhow::anyhow!("table {} entry overruns data at {}", id, off));
            }
            index.push(IndexEntry {
                key: data[key_start..val_start].to_vec(),
                val_off: val_start as u64,
                val_len: val_len as u32,
            });
            off = val_start + val_len;
        }
        if index.len() != count {
            return Err(anyhow::anyhow!(
                "table {} holds {} entries, footer says {}",
                id,
                index.len(),
                count
            ));
        }

        Ok(Self { id, path: path.to_path_buf(), file, index, size: buf.len() as u64 })
    }

    pub fn may_contain(&self, key: &[u8]) -> bool {
        match (self.index.first(), self.index.last()) {
            (Some(min), Some(max)) => min.key.as_slice() <= key && key <= max.key.as_slice(),
            _ => false,
        }
    }

    pub fn get(&self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        if !self.may_contain(key) {
            return Ok(None);
        }
        let Ok(pos) = self.index.binary_search_by(|e| e.key.as_slice().cmp(key)) else {
            return Ok(None);
        };
        let entry = &self.index[pos];
        let mut val = vec![0u8; entry.val_len as usize];
        let mut f = &self.file;
        f.seek(SeekFrom::Start(entry.val_off))?;
        f.read_exact(&mut val)?;
        Ok(Some(val))
    }

    /// Every entry in key order.
    pub fn entries(&self) -> anyhow::Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::with_capacity(self.index.len());
        for entry in &self.index {
            if let Some(val) = self.get(&entry.key)? {
                out.push((entry.key.clone(), val));
            }
        }
        Ok(out)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(dir: &Path) -> SsTable {
        let entries: Vec<(&[u8], &[u8])> =
            vec![(&b"a"[..], &b"1"[..]), (&b"c"[..], &b"333"[..]), (&b"e"[..], &b""[..])];
        SsTable::write(dir, 7, entries).unwrap()
    }

    #[test]
    fn write_then_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let t = sample(dir.path());
        assert_eq!(t.id(), 7);
        assert_eq!(t.len(), 3);
        assert_eq!(t.get(b"c").unwrap(), Some(b"333".to_vec()));
        assert_eq!(t.get(b"e").unwrap(), Some(Vec::new()));
        assert_eq!(t.get(b"b").unwrap(), None);
        assert_eq!(t.get(b"z").unwrap(), None);
        assert!(!t.may_contain(b"0"));
    }

    #[test]
    fn reopened_table_reads_same_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = sample(dir.path()).path().to_path_buf();
        let t = SsTable::open(&path).unwrap();
        let entries = t.entries().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1], (b"c".to_vec(), b"333".to_vec()));
    }

    #[test]
    fn flipped_byte_fails_crc() {
        let dir = tempfile::tempdir().unwrap();
        let path = sample(dir.path()).path().to_path_buf();
        let mut bytes = fs::read(&path).unwrap();
        bytes[9] ^= 0x01;
        fs::write(&path, bytes).unwrap();
        assert!(SsTable::open(&path).is_err());
    }

    #[test]
    fn file_names_round_trip() {
        let name = table_file_name(42);
        assert_eq!(name, "000042.sst");
        assert_eq!(parse_table_id(Path::new(&name)), Some(42));
        assert_eq!(parse_table_id(Path::new("wal.log")), None);
    }
}
