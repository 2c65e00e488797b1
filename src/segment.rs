// Copyright (c) 2025-present, the SiloBang authors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Owns a single topic's segment directory: the active `.dat` file that
//! accepts appends, and reader handles onto sealed segments.

use crate::record;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const FIRST_SEGMENT_ID: u32 = 1;
const CREATE_WIDTH: usize = 6;
const MIN_READ_WIDTH: usize = 3;
const MAX_READ_WIDTH: usize = 6;

/// Manages append and read access to one topic's segment files.
pub struct SegmentManager {
    dir: PathBuf,
    cap: u64,
    inner: Mutex<Inner>,
}

struct Inner {
    active_id: u32,
    active_size: u64,
    writer: BufWriter<File>,
    readers: HashMap<u32, File>,
}

impl SegmentManager {
    /// Opens (creating if necessary) the segment directory under `dir`.
    ///
    /// A brand-new directory gets an empty `000001.dat`; an existing
    /// directory resumes appending to its highest-numbered segment.
    pub fn open(dir: &Path, cap: u64) -> crate::Result<Self> {
        std::fs::create_dir_all(dir)?;

        let ids = list_segment_ids(dir)?;
        let (active_id, active_size, writer) = match ids.last() {
            None => {
                let path = segment_path(dir, FIRST_SEGMENT_ID, CREATE_WIDTH);
                let file = OpenOptions::new()
                    .create_new(true)
                    .append(true)
                    .open(&path)?;
                (FIRST_SEGMENT_ID, 0, BufWriter::new(file))
            }
            Some(&id) => {
                let path = find_segment_path(dir, id)?;
                let size = std::fs::metadata(&path)?.len();
                let file = OpenOptions::new().append(true).open(&path)?;
                (id, size, BufWriter::new(file))
            }
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            cap,
            inner: Mutex::new(Inner {
                active_id,
                active_size,
                writer,
                readers: HashMap::new(),
            }),
        })
    }

    /// Appends an encoded record, sealing and rotating the active segment
    /// first if it would not fit. Returns `(segment_id, payload_offset)`,
    /// where `payload_offset` is the absolute offset of the first payload
    /// byte (i.e. past this record's 110-byte header).
    ///
    /// Fsyncs before returning: the caller's index row is only durable once
    /// this returns `Ok`.
    pub fn append(&self, payload: &[u8]) -> crate::Result<(u32, u64)> {
        let record = record::encode(payload);
        let record_len = record.len() as u64;

        let mut inner = self.inner.lock().expect("segment manager mutex poisoned");

        if inner.active_size + record_len > self.cap {
            self.rotate(&mut inner)?;
        }

        let record_offset = inner.active_size;
        inner.writer.write_all(&record)?;
        inner.writer.flush()?;
        inner.writer.get_ref().sync_all()?;
        inner.active_size += record_len;

        let payload_offset = record_offset + record::HEADER_LEN as u64;
        Ok((inner.active_id, payload_offset))
    }

    fn rotate(&self, inner: &mut Inner) -> crate::Result<()> {
        inner.writer.flush()?;
        inner.writer.get_ref().sync_all()?;

        let next_id = inner.active_id + 1;
        let path = segment_path(&self.dir, next_id, CREATE_WIDTH);
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)?;

        inner.writer = BufWriter::new(file);
        inner.active_id = next_id;
        inner.active_size = 0;

        log::debug!("sealed segment, rolled over to segment {next_id}");
        Ok(())
    }

    /// Reads `len` bytes starting at the absolute offset `offset` in `segment_id`.
    pub fn read_at(&self, segment_id: u32, offset: u64, len: usize) -> crate::Result<Vec<u8>> {
        let file = self.reader_for(segment_id)?;
        let mut buf = vec![0u8; len];
        file.read_exact_at(&mut buf, offset)?;
        Ok(buf)
    }

    fn reader_for(&self, segment_id: u32) -> crate::Result<File> {
        let mut inner = self.inner.lock().expect("segment manager mutex poisoned");
        if let Some(file) = inner.readers.get(&segment_id) {
            return Ok(file.try_clone()?);
        }
        let path = find_segment_path(&self.dir, segment_id)?;
        let file = File::open(&path)?;
        let clone = file.try_clone()?;
        inner.readers.insert(segment_id, file);
        Ok(clone)
    }

    /// Lists known segment ids in ascending order; errors if the sequence
    /// has a gap (segments are contiguous by construction).
    pub fn list_segments(&self) -> crate::Result<Vec<u32>> {
        list_segment_ids(&self.dir)
    }

    /// Absolute path of a segment file, accepting any back-compat width.
    pub fn segment_path(&self, segment_id: u32) -> crate::Result<PathBuf> {
        find_segment_path(&self.dir, segment_id)
    }

    /// Current on-disk size of a segment file.
    pub fn segment_size(&self, segment_id: u32) -> crate::Result<u64> {
        Ok(std::fs::metadata(self.segment_path(segment_id)?)?.len())
    }

    /// The currently-active segment id and its logical size.
    pub fn active(&self) -> (u32, u64) {
        let inner = self.inner.lock().expect("segment manager mutex poisoned");
        (inner.active_id, inner.active_size)
    }

    /// Truncates a segment file to `len` bytes and fsyncs it. Used by the
    /// verifier's recovery pass to drop a torn trailing record. Refuses to
    /// truncate the active segment's writer out from under itself; callers
    /// must not call this on a segment that is still being appended to.
    pub fn truncate_segment(&self, segment_id: u32, len: u64) -> crate::Result<()> {
        let path = self.segment_path(segment_id)?;
        let file = OpenOptions::new().write(true).open(&path)?;
        file.set_len(len)?;
        file.sync_all()?;

        let mut inner = self.inner.lock().expect("segment manager mutex poisoned");
        inner.readers.remove(&segment_id);
        if inner.active_id == segment_id {
            inner.active_size = len;
        }
        Ok(())
    }
}

fn segment_path(dir: &Path, id: u32, width: usize) -> PathBuf {
    dir.join(format!("{id:0width$}.dat"))
}

fn find_segment_path(dir: &Path, id: u32) -> crate::Result<PathBuf> {
    for width in MIN_READ_WIDTH..=MAX_READ_WIDTH {
        let path = segment_path(dir, id, width);
        if path.exists() {
            return Ok(path);
        }
    }
    Err(crate::Error::Internal(format!(
        "segment {id} not found under {}",
        dir.display()
    )))
}

fn list_segment_ids(dir: &Path) -> crate::Result<Vec<u32>> {
    let mut ids = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(stem) = name.strip_suffix(".dat") {
            let width = stem.len();
            if (MIN_READ_WIDTH..=MAX_READ_WIDTH).contains(&width)
                && stem.chars().all(|c| c.is_ascii_digit())
            {
                if let Ok(id) = stem.parse::<u32>() {
                    ids.push(id);
                }
            }
        }
    }
    ids.sort_unstable();

    for (i, id) in ids.iter().enumerate() {
        let expected = i as u32 + 1;
        if *id != expected {
            return Err(crate::Error::Internal(format!(
                "segment sequence gap in {}: expected {expected}, found {id}",
                dir.display()
            )));
        }
    }

    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn creates_initial_segment() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = SegmentManager::open(dir.path(), 1_000_000).unwrap();
        assert_eq!(mgr.list_segments().unwrap(), vec![1]);
        assert!(dir.path().join("000001.dat").exists());
    }

    #[test]
    fn appends_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = SegmentManager::open(dir.path(), 1_000_000).unwrap();

        let (segment_id, offset) = mgr.append(b"hello").unwrap();
        assert_eq!(segment_id, 1);
        assert_eq!(offset, record::HEADER_LEN as u64);

        let read = mgr.read_at(segment_id, offset, 5).unwrap();
        assert_eq!(read, b"hello");
    }

    #[test]
    fn rolls_over_when_cap_would_be_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        // record len = 110 + 80 = 190; cap chosen so two records don't fit
        let mgr = SegmentManager::open(dir.path(), 200).unwrap();

        let (seg1, off1) = mgr.append(&[b'A'; 80]).unwrap();
        let (seg2, off2) = mgr.append(&[b'B'; 80]).unwrap();

        assert_eq!(seg1, 1);
        assert_eq!(off1, record::HEADER_LEN as u64);
        assert_eq!(seg2, 2);
        assert_eq!(off2, record::HEADER_LEN as u64);
        assert_eq!(mgr.list_segments().unwrap(), vec![1, 2]);
    }

    #[test]
    fn exact_fit_does_not_roll_over() {
        let dir = tempfile::tempdir().unwrap();
        // one record of 110 + 80 = 190 bytes exactly fills a 190-byte cap
        let mgr = SegmentManager::open(dir.path(), 190).unwrap();
        let (seg1, _) = mgr.append(&[b'A'; 80]).unwrap();
        // second record would need another 190 bytes -> 380 > 190, rolls
        let (seg2, _) = mgr.append(&[b'B'; 80]).unwrap();
        assert_eq!(seg1, 1);
        assert_eq!(seg2, 2);
    }
}
