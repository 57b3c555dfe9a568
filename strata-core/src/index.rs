use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder};
use memmap2::MmapMut;
use tracing::{debug, warn};

use crate::error::{LogError, LogResult};

/// Width of the relative-offset column of an entry.
const OFF_WIDTH: u64 = 4;
/// Width of the store-position column of an entry.
const POS_WIDTH: u64 = 8;
/// Width of one entry on disk: `[u32 BE rel offset][u64 BE position]`.
pub(crate) const ENTRY_WIDTH: u64 = OFF_WIDTH + POS_WIDTH;

/// Fixed-width memory-mapped table translating a record's relative offset
/// to its position in the store.
///
/// The file is extended to `max_index_bytes` at open so the mapping never
/// has to grow, and truncated back to the logical size on close so the
/// file length on disk is the entry count times [`ENTRY_WIDTH`] and the
/// next open can recover the entry count from it.
pub(crate) struct Index {
    file: File,
    path: PathBuf,
    mmap: Option<MmapMut>,
    size: u64,
}

impl Index {
    pub(crate) fn open(path: impl AsRef<Path>, max_index_bytes: u64) -> LogResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let size = file.metadata()?.len();
        if size > max_index_bytes {
            return Err(LogError::IndexMaxSizeExceeded {
                size,
                max_index_bytes,
            });
        }

        extend_to(&file, max_index_bytes)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        debug!(path = ?path, entries = size / ENTRY_WIDTH, "index opened");
        Ok(Index {
            file,
            path,
            mmap: Some(mmap),
            size,
        })
    }

    /// Reads the entry selected by `rel`. A negative input selects the
    /// last entry. Signals [`LogError::Eof`] when the index is empty or
    /// the entry does not exist.
    pub(crate) fn read(&self, rel: i64) -> LogResult<(u32, u64)> {
        let Some(mmap) = self.mmap.as_ref() else {
            return Err(LogError::Eof);
        };
        if self.size == 0 {
            return Err(LogError::Eof);
        }

        let entry = if rel < 0 {
            self.size / ENTRY_WIDTH - 1
        } else {
            rel as u64
        };

        let byte_off = entry * ENTRY_WIDTH;
        if self.size < byte_off + ENTRY_WIDTH {
            return Err(LogError::Eof);
        }

        let at = byte_off as usize;
        let out = BigEndian::read_u32(&mmap[at..at + OFF_WIDTH as usize]);
        let pos = BigEndian::read_u64(&mmap[at + OFF_WIDTH as usize..at + ENTRY_WIDTH as usize]);
        Ok((out, pos))
    }

    /// Appends one entry. Signals [`LogError::Eof`] when the mapping has
    /// no room left for it.
    pub(crate) fn write(&mut self, rel: u32, pos: u64) -> LogResult<()> {
        let Some(mmap) = self.mmap.as_mut() else {
            return Err(LogError::Eof);
        };
        if (mmap.len() as u64) < self.size + ENTRY_WIDTH {
            return Err(LogError::Eof);
        }

        let at = self.size as usize;
        BigEndian::write_u32(&mut mmap[at..at + OFF_WIDTH as usize], rel);
        BigEndian::write_u64(
            &mut mmap[at + OFF_WIDTH as usize..at + ENTRY_WIDTH as usize],
            pos,
        );
        self.size += ENTRY_WIDTH;
        Ok(())
    }

    /// Logical size in bytes: entries written times [`ENTRY_WIDTH`].
    pub(crate) fn size(&self) -> u64 {
        self.size
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes and unmaps the mapping, fsyncs the file, then truncates it
    /// down to the logical size so the reserved tail does not survive to
    /// the next open.
    pub(crate) fn close(&mut self) -> LogResult<()> {
        let Some(mmap) = self.mmap.take() else {
            return Ok(());
        };
        mmap.flush()?;
        drop(mmap);

        self.file.sync_all()?;
        self.file.set_len(self.size)?;
        debug!(path = ?self.path, entries = self.size / ENTRY_WIDTH, "index closed");
        Ok(())
    }
}

impl Drop for Index {
    fn drop(&mut self) {
        // Best effort: without the truncation the next open would read the
        // reserved tail as entries.
        if self.mmap.is_some() {
            if let Err(error) = self.close() {
                warn!(path = ?self.path, %error, "failed to close index cleanly");
            }
        }
    }
}

#[cfg(unix)]
fn extend_to(file: &File, len: u64) -> std::io::Result<()> {
    rustix::fs::ftruncate(file, len).map_err(|e| {
        std::io::Error::new(std::io::ErrorKind::Other, format!("ftruncate failed: {}", e))
    })
}

#[cfg(not(unix))]
fn extend_to(file: &File, len: u64) -> std::io::Result<()> {
    use fs4::fs_std::FileExt;
    file.allocate(len)
}
