use std::fs::{File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::util::crc32;

pub type Lsn = u64;

const RECORD_HDR: u64 = 8 + 4; // lsn + crc

/*
Append-only WAL: [total_len u64][lsn u64][crc u32][payload]
total_len counts lsn + crc + payload. A record cut short at the tail
(crash mid-append) or a zeroed header ends replay and is truncated away on open.
*/

pub struct Wal {
    path: PathBuf,
    file: File,
    next_lsn: Lsn,
}

impl Wal {
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let f = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)
            .with_context(|| format!("open wal {}", path.display()))?;

        let mut next = 0;
        let mut valid_len = 0;
        scan(&path, |lsn, payload| {
            next = lsn + 1;
            valid_len += 8 + RECORD_HDR + payload.len() as u64;
            Ok(())
        })?;
        if f.metadata()?.len() > valid_len {
            tracing::warn!(path = %path.display(), valid_len, "truncating torn wal tail");
            f.set_len(valid_len)?;
        }

        Ok(Self { path, file: f, next_lsn: next })
    }

    pub fn append(&mut self, payload: &[u8]) -> anyhow::Result<Lsn> {
        let lsn = self.next_lsn;
        let crc = crc32(payload);
        let total_len = RECORD_HDR + payload.len() as u64;

        let mut record = Vec::with_capacity(8 + total_len as usize);
        record.extend_from_slice(&total_len.to_le_bytes());
        record.extend_from_slice(&lsn.to_le_bytes());
        record.extend_from_slice(&crc.to_le_bytes());
        record.extend_from_slice(payload);
        self.file.write_all(&record)?;

        self.next_lsn += 1;
        Ok(lsn)
    }

    pub fn sync(&mut self) -> anyhow::Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Drops every record once their contents are durable elsewhere. LSNs keep counting
    /// while this `Wal` stays open; a later `open` of the empty file starts again at 0.
    pub fn reset(&mut self) -> anyhow::Result<()> {
        self.file.set_len(0)?;
        self.file.sync_all()?;
        Ok(())
    }

    pub fn next_lsn(&self) -> Lsn {
        self.next_lsn
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn replay_from_start<P: AsRef<Path>>(
        path: P,
        visitor: impl FnMut(Lsn, Vec<u8>) -> anyhow::Result<()>,
    ) -> anyhow::Result<()> {
        scan(path.as_ref(), visitor)
    }
}

fn scan(
    path: &Path,
    mut visitor: impl FnMut(Lsn, Vec<u8>) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    let f = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    let mut r = BufReader::new(f);
    while let Some((lsn, payload)) = read_record(&mut r)? {
        visitor(lsn, payload)?;
    }
    Ok(())
}

fn read_record<R: Read>(r: &mut R) -> anyhow::Result<Option<(Lsn, Vec<u8>)>> {
    let mut hdr = [0u8; 20];
    if !read_full(r, &mut hdr)? {
        return Ok(None);
    }
    let total_len = u64::from_le_bytes(hdr[0..8].try_into()?);
    let lsn = u64::from_le_bytes(hdr[8..16].try_into()?);
    let crc = u32::from_le_bytes(hdr[16..20].try_into()?);
    // a crash can leave zero-filled space past the last record
    if total_len < RECORD_HDR {
        tracing::debug!(total_len, lsn, "wal header too short, treating as end of log");
        return Ok(None);
    }

    let payload_len = total_len - RECORD_HDR;
    let mut payload = Vec::new();
    r.by_ref().take(payload_len).read_to_end(&mut payload)?;
    if (payload.len() as u64) < payload_len {
        return Ok(None);
    }
    if crc32(&payload) != crc {
        return Err(anyhow::anyhow!("WAL Payload CRC Mismatch at LSN {}", lsn));
    }
    Ok(Some((lsn, payload)))
}

/// false on EOF before `buf` is filled.
fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> anyhow::Result<bool> {
    match r.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}
