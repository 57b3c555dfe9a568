use std::fs::{self, File, OpenOptions};
use std::io;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs4::fs_std::FileExt;
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::config::Config;
use crate::error::{LogError, LogResult};
use crate::record::Record;
use crate::segment::Segment;
use crate::store::Store;

const LOCK_FILE: &str = ".lock";
const STORE_EXT: &str = "store";
const INDEX_EXT: &str = "index";

/// An append-only commit log: an ordered sequence of segments in one
/// directory, with the last segment accepting appends.
///
/// Many readers may proceed in parallel; appends, truncation, and
/// lifecycle changes are serialized behind the write half of a
/// reader-writer lock. A `.lock` file keeps a second process from
/// opening the same directory.
pub struct Log {
    dir: PathBuf,
    config: Config,
    inner: RwLock<LogInner>,
}

struct LogInner {
    segments: Vec<Segment>,
    dir_lock: Option<File>,
}

impl Log {
    /// Opens the log in `dir`, creating the directory if needed and
    /// rebuilding segments from the `{base_offset}.store` /
    /// `{base_offset}.index` pairs found there. Zero byte caps in
    /// `config` fall back to 1024.
    pub fn open(dir: impl AsRef<Path>, config: Config) -> LogResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        let config = config.with_defaults();
        config.validate()?;

        let inner = Self::setup(&dir, config)?;
        Ok(Log {
            dir,
            config,
            inner: RwLock::new(inner),
        })
    }

    fn setup(dir: &Path, config: Config) -> LogResult<LogInner> {
        fs::create_dir_all(dir)?;

        let lock_path = dir.join(LOCK_FILE);
        let dir_lock = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&lock_path)?;
        dir_lock
            .try_lock_exclusive()
            .map_err(|_| LogError::DirectoryLocked { path: lock_path })?;

        let mut base_offsets = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            match parse_base_offset(&path) {
                Some(base) => base_offsets.push(base),
                None => trace!(path = ?path, "skipping unrelated file"),
            }
        }

        // Each base offset appears once per extension; sorting and
        // deduplicating leaves one segment per pair.
        base_offsets.sort_unstable();
        base_offsets.dedup();

        let mut segments = Vec::with_capacity(base_offsets.len().max(1));
        for base in base_offsets {
            segments.push(Segment::open(dir, base, config)?);
        }
        if segments.is_empty() {
            segments.push(Segment::open(dir, config.segment.initial_offset, config)?);
        }

        debug!(
            dir = ?dir,
            segments = segments.len(),
            "log opened"
        );
        Ok(LogInner {
            segments,
            dir_lock: Some(dir_lock),
        })
    }

    /// Appends `record` to the active segment, rolling a new segment
    /// first when the active one is maxed, and returns the offset the
    /// log assigned to the record.
    pub fn append(&self, record: Record) -> LogResult<u64> {
        let mut inner = self.inner.write();
        Self::ensure_open(&inner)?;

        if inner.segments.last().map_or(true, Segment::is_maxed) {
            let base = inner
                .segments
                .last()
                .map_or(self.config.segment.initial_offset, Segment::next_offset);
            debug!(base_offset = base, "rolling over to a new segment");
            let segment = Segment::open(&self.dir, base, self.config)?;
            inner.segments.push(segment);
        }

        let active = inner
            .segments
            .last_mut()
            .expect("log always holds an active segment");
        active.append(record)
    }

    /// Reads the record stored at `offset`.
    pub fn read(&self, offset: u64) -> LogResult<Record> {
        let inner = self.inner.read();
        Self::ensure_open(&inner)?;
        match inner.segments.iter().find(|s| s.contains(offset)) {
            Some(segment) => segment.read(offset),
            None => Err(LogError::OffsetOutOfRange { offset }),
        }
    }

    /// Offset of the oldest record still present.
    pub fn lowest_offset(&self) -> u64 {
        let inner = self.inner.read();
        inner.segments.first().map_or(0, Segment::base_offset)
    }

    /// Offset of the newest record, or 0 when the log is empty.
    pub fn highest_offset(&self) -> u64 {
        let inner = self.inner.read();
        let next = inner.segments.last().map_or(0, Segment::next_offset);
        next.saturating_sub(1)
    }

    /// Removes every segment whose records all fall at or below
    /// `lowest`, i.e. whose `next_offset <= lowest + 1`. Removal happens
    /// while the write lock is held so readers never observe a
    /// half-removed segment list.
    pub fn truncate(&self, lowest: u64) -> LogResult<()> {
        let mut inner = self.inner.write();
        Self::ensure_open(&inner)?;

        let mut retained = Vec::with_capacity(inner.segments.len());
        for segment in mem::take(&mut inner.segments) {
            if segment.next_offset() <= lowest + 1 {
                segment.remove()?;
            } else {
                retained.push(segment);
            }
        }
        inner.segments = retained;

        debug!(lowest, remaining = inner.segments.len(), "truncated log");
        Ok(())
    }

    /// Closes every segment in order, truncating their index files down
    /// to the written entries, and releases the directory lock. Closing
    /// is terminal: further appends, reads, and truncations fail with
    /// [`LogError::Closed`] until the directory is opened again.
    pub fn close(&self) -> LogResult<()> {
        let mut inner = self.inner.write();
        Self::close_segments(&mut inner)?;
        inner.dir_lock = None;
        Ok(())
    }

    /// Closes the log and deletes its directory tree.
    pub fn remove(&self) -> LogResult<()> {
        let mut inner = self.inner.write();
        Self::teardown(&self.dir, &mut inner)
    }

    /// Removes the log and sets up a fresh empty one in the same
    /// directory.
    pub fn reset(&self) -> LogResult<()> {
        let mut inner = self.inner.write();
        Self::teardown(&self.dir, &mut inner)?;
        *inner = Self::setup(&self.dir, self.config)?;
        Ok(())
    }

    /// Returns a reader over the raw stores of every segment,
    /// concatenated in offset order from position 0. The segment list is
    /// snapshotted under the read lock; appends that happen after this
    /// call are not guaranteed to appear in the stream. The caller
    /// parses the length-delimited frames itself.
    pub fn reader(&self) -> LogReader {
        let inner = self.inner.read();
        let stores = inner.segments.iter().map(Segment::store_handle).collect();
        LogReader {
            stores,
            current: 0,
            pos: 0,
        }
    }

    /// A live log always holds the directory lock; it is only given up
    /// by `close` and `teardown`.
    fn ensure_open(inner: &LogInner) -> LogResult<()> {
        if inner.dir_lock.is_none() {
            return Err(LogError::Closed);
        }
        Ok(())
    }

    fn close_segments(inner: &mut LogInner) -> LogResult<()> {
        for segment in mem::take(&mut inner.segments) {
            segment.close()?;
        }
        Ok(())
    }

    fn teardown(dir: &Path, inner: &mut LogInner) -> LogResult<()> {
        Self::close_segments(inner)?;
        inner.dir_lock = None;
        fs::remove_dir_all(dir)?;
        debug!(dir = ?dir, "log removed");
        Ok(())
    }
}

/// Extracts the base offset from a `{base_offset}.store` or
/// `{base_offset}.index` path. Anything else, the `.lock` file included,
/// is not segment metadata.
fn parse_base_offset(path: &Path) -> Option<u64> {
    let ext = path.extension()?.to_str()?;
    if ext != STORE_EXT && ext != INDEX_EXT {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

/// Byte-stream reader over a snapshot of the log's stores, in segment
/// order. Yields the raw length-delimited frames, suitable for bulk
/// transfer to a peer that parses them itself.
pub struct LogReader {
    stores: Vec<Arc<Store>>,
    current: usize,
    pos: u64,
}

impl io::Read for LogReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while let Some(store) = self.stores.get(self.current) {
            let n = store.read_at(buf, self.pos)?;
            if n > 0 {
                self.pos += n as u64;
                return Ok(n);
            }
            self.current += 1;
            self.pos = 0;
        }
        Ok(0)
    }
}
