use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use tracing::trace;

use crate::error::LogResult;

/// Width of the big-endian length prefix in front of every frame.
pub(crate) const LEN_WIDTH: u64 = 8;

/// Append-only byte file with length-prefixed framing.
///
/// Appends go through a buffered writer; positional reads flush the buffer
/// first so a read issued after an append always observes it. A single
/// mutex serializes appends, reads, and the size counter because the
/// buffered writer is shared between them.
pub(crate) struct Store {
    path: PathBuf,
    inner: Mutex<StoreInner>,
}

struct StoreInner {
    reader: File,
    writer: BufWriter<File>,
    size: u64,
    sync_on_append: bool,
}

impl Store {
    pub(crate) fn open(path: impl AsRef<Path>, sync_on_append: bool) -> LogResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(&path)?;
        let size = file.metadata()?.len();
        let reader = file.try_clone()?;

        Ok(Store {
            path,
            inner: Mutex::new(StoreInner {
                reader,
                writer: BufWriter::new(file),
                size,
                sync_on_append,
            }),
        })
    }

    /// Appends one frame and returns `(bytes_written, position)`, where
    /// the position is the offset at which the frame begins and the byte
    /// count includes the length prefix.
    pub(crate) fn append(&self, payload: &[u8]) -> LogResult<(u64, u64)> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");

        let pos = inner.size;
        inner.writer.write_u64::<BigEndian>(payload.len() as u64)?;
        inner.writer.write_all(payload)?;

        let written = LEN_WIDTH + payload.len() as u64;
        inner.size += written;

        if inner.sync_on_append {
            inner.writer.flush()?;
            inner.writer.get_ref().sync_data()?;
        }

        trace!(path = ?self.path, pos, written, "appended frame");
        Ok((written, pos))
    }

    /// Reads the frame payload that begins at `pos`.
    pub(crate) fn read(&self, pos: u64) -> LogResult<Vec<u8>> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.writer.flush()?;

        let mut len_buf = [0u8; LEN_WIDTH as usize];
        read_exact_at(&inner.reader, &mut len_buf, pos)?;
        let len = BigEndian::read_u64(&len_buf);

        let mut payload = vec![0u8; len as usize];
        read_exact_at(&inner.reader, &mut payload, pos + LEN_WIDTH)?;

        trace!(path = ?self.path, pos, len, "read frame");
        Ok(payload)
    }

    /// Positional read of raw bytes into `buf`, used by the bulk stream
    /// reader to scan frames sequentially. Returns the number of bytes
    /// read; zero at end of file.
    pub(crate) fn read_at(&self, buf: &mut [u8], off: u64) -> LogResult<usize> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.writer.flush()?;
        Ok(read_at(&inner.reader, buf, off)?)
    }

    /// Bytes written so far, including bytes still sitting in the buffer.
    pub(crate) fn size(&self) -> u64 {
        self.inner.lock().expect("store mutex poisoned").size
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes buffered writes. The file handle closes on drop.
    pub(crate) fn close(&self) -> LogResult<()> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.writer.flush()?;
        Ok(())
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], off: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, off)
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], off: u64) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, off)
}

#[cfg(not(unix))]
fn read_exact_at(file: &File, buf: &mut [u8], off: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.seek_read(&mut buf[filled..], off + filled as u64)?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "frame extends past end of store",
            ));
        }
        filled += n;
    }
    Ok(())
}

#[cfg(not(unix))]
fn read_at(file: &File, buf: &mut [u8], off: u64) -> std::io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, off)
}
