use std::fs;
use std::path::Path;
use std::sync::Arc;

use prost::Message;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{LogError, LogResult};
use crate::index::{Index, ENTRY_WIDTH};
use crate::record::Record;
use crate::store::{Store, LEN_WIDTH};

const STORE_EXT: &str = "store";
const INDEX_EXT: &str = "index";

/// One store/index pair covering the offset range
/// `[base_offset, next_offset)`.
pub(crate) struct Segment {
    store: Arc<Store>,
    index: Index,
    base_offset: u64,
    next_offset: u64,
    config: Config,
}

impl Segment {
    /// Opens (or creates) the `{base_offset}.store` / `{base_offset}.index`
    /// pair in `dir` and recovers `next_offset` from the index's last
    /// entry.
    pub(crate) fn open(dir: &Path, base_offset: u64, config: Config) -> LogResult<Self> {
        let store_path = dir.join(format!("{}.{}", base_offset, STORE_EXT));
        let index_path = dir.join(format!("{}.{}", base_offset, INDEX_EXT));

        let store = Arc::new(Store::open(&store_path, config.segment.sync_on_append)?);
        let index = Index::open(&index_path, config.segment.max_index_bytes)?;

        let next_offset = match index.read(-1) {
            Ok((rel, _)) => base_offset + u64::from(rel) + 1,
            Err(LogError::Eof) => base_offset,
            Err(err) => return Err(err),
        };

        let segment = Segment {
            store,
            index,
            base_offset,
            next_offset,
            config,
        };
        segment.check_for_orphan_frames()?;

        debug!(
            base_offset,
            next_offset = segment.next_offset,
            store_size = segment.store.size(),
            "segment opened"
        );
        Ok(segment)
    }

    /// A crash between the store append and the index write leaves bytes
    /// in the store that no index entry points at. Detect and report;
    /// the indexed prefix stays readable, repair is a human decision.
    fn check_for_orphan_frames(&self) -> LogResult<()> {
        let indexed_end = match self.index.read(-1) {
            Ok((_, pos)) => {
                let payload = self.store.read(pos)?;
                pos + LEN_WIDTH + payload.len() as u64
            }
            Err(LogError::Eof) => 0,
            Err(err) => return Err(err),
        };

        if self.store.size() > indexed_end {
            warn!(
                store = ?self.store.path(),
                indexed_end,
                store_size = self.store.size(),
                "store holds bytes past the last indexed frame"
            );
        }
        Ok(())
    }

    /// Assigns the next offset to `record`, persists it, and returns the
    /// assigned offset.
    pub(crate) fn append(&mut self, mut record: Record) -> LogResult<u64> {
        let cur = self.next_offset;
        record.offset = cur;

        let bytes = record.encode_to_vec();
        let (_, pos) = self.store.append(&bytes)?;
        self.index
            .write((self.next_offset - self.base_offset) as u32, pos)?;

        self.next_offset += 1;
        Ok(cur)
    }

    /// Reads the record at the absolute `offset`.
    pub(crate) fn read(&self, offset: u64) -> LogResult<Record> {
        let (_, pos) = self.index.read((offset - self.base_offset) as i64)?;
        let bytes = self.store.read(pos)?;
        let record = Record::decode(bytes.as_slice())?;
        Ok(record)
    }

    /// True once either the store or the index has no room for another
    /// record; the log then replaces this segment as active.
    pub(crate) fn is_maxed(&self) -> bool {
        self.store.size() >= self.config.segment.max_store_bytes
            || self.index.size() + ENTRY_WIDTH > self.config.segment.max_index_bytes
    }

    pub(crate) fn contains(&self, offset: u64) -> bool {
        self.base_offset <= offset && offset < self.next_offset
    }

    pub(crate) fn base_offset(&self) -> u64 {
        self.base_offset
    }

    pub(crate) fn next_offset(&self) -> u64 {
        self.next_offset
    }

    /// Shared handle to the store, for bulk stream readers that outlive
    /// the segment list snapshot they came from.
    pub(crate) fn store_handle(&self) -> Arc<Store> {
        Arc::clone(&self.store)
    }

    /// Closes the index first so its file is truncated to the logical
    /// size, then flushes the store.
    pub(crate) fn close(mut self) -> LogResult<()> {
        self.index.close()?;
        self.store.close()?;
        Ok(())
    }

    /// Closes the segment and deletes both files.
    pub(crate) fn remove(self) -> LogResult<()> {
        let index_path = self.index.path().to_path_buf();
        let store_path = self.store.path().to_path_buf();
        debug!(base_offset = self.base_offset, "removing segment");

        self.close()?;
        fs::remove_file(index_path)?;
        fs::remove_file(store_path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{BigEndian, WriteBytesExt};
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::tempdir;

    fn config(max_store_bytes: u64, max_index_bytes: u64) -> Config {
        let mut config = Config::default();
        config.segment.max_store_bytes = max_store_bytes;
        config.segment.max_index_bytes = max_index_bytes;
        config
    }

    #[test]
    fn test_append_read_with_base_offset() -> LogResult<()> {
        let dir = tempdir()?;
        let mut segment = segment_at(dir.path(), 16, config(1024, ENTRY_WIDTH * 3))?;

        for i in 0..3u64 {
            let offset = segment.append(Record::new(b"hello world".as_slice()))?;
            assert_eq!(offset, 16 + i);

            let record = segment.read(16 + i)?;
            assert_eq!(record.value, b"hello world");
            assert_eq!(record.offset, 16 + i);
        }
        assert_eq!(segment.next_offset(), 19);
        Ok(())
    }

    #[test]
    fn test_maxed_index_then_maxed_store() -> LogResult<()> {
        let dir = tempdir()?;
        let base = 16;
        let record = || Record::new(b"hello world".as_slice());

        // Three entries fit the index; the fourth append hits the cap. The
        // reads after each append flush the three indexed frames to disk,
        // while the fourth frame stays buffered in this handle.
        let mut first = segment_at(dir.path(), base, config(1024, ENTRY_WIDTH * 3))?;
        assert_eq!(first.next_offset(), base);
        assert!(!first.is_maxed());
        for i in 0..3u64 {
            let off = first.append(record())?;
            assert_eq!(off, base + i);
            assert_eq!(first.read(off)?.value, b"hello world");
        }
        assert!(matches!(first.append(record()), Err(LogError::Eof)));
        assert!(first.is_maxed());

        // A shrunken index cap no longer admits the on-disk file.
        assert!(matches!(
            segment_at(dir.path(), base, config(1024, ENTRY_WIDTH * 2)),
            Err(LogError::IndexMaxSizeExceeded { .. })
        ));

        // With room in the index, the store cap decides. The disk holds
        // the three indexed frames of length prefix plus encoded record.
        let frame_len = LEN_WIDTH + record_len(base);
        let roomy = segment_at(dir.path(), base, config(frame_len * 4, ENTRY_WIDTH * 4))?;
        assert!(!roomy.is_maxed());

        let tight = segment_at(dir.path(), base, config(frame_len * 3, ENTRY_WIDTH * 4))?;
        assert!(tight.is_maxed());

        tight.remove()?;
        let fresh = segment_at(dir.path(), base, config(frame_len * 3, ENTRY_WIDTH * 4))?;
        assert!(!fresh.is_maxed());
        Ok(())
    }

    #[test]
    fn test_reopen_recovers_next_offset() -> LogResult<()> {
        let dir = tempdir()?;
        let cfg = config(1024, 1024);

        {
            let mut segment = segment_at(dir.path(), 0, cfg)?;
            for _ in 0..3 {
                segment.append(Record::new(b"persisted".as_slice()))?;
            }
            segment.close()?;
        }

        let segment = segment_at(dir.path(), 0, cfg)?;
        assert_eq!(segment.next_offset(), 3);
        assert_eq!(segment.read(2)?.value, b"persisted");
        Ok(())
    }

    #[test]
    fn test_open_tolerates_orphan_frame() -> LogResult<()> {
        let dir = tempdir()?;
        let cfg = config(1024, 1024);

        {
            let mut segment = segment_at(dir.path(), 0, cfg)?;
            segment.append(Record::new(b"indexed-0".as_slice()))?;
            segment.append(Record::new(b"indexed-1".as_slice()))?;
            segment.close()?;
        }

        // A crash between the store append and the index write leaves a
        // frame in the store that no index entry points at.
        let mut orphan = Record::new(b"orphan".as_slice());
        orphan.offset = 2;
        let bytes = orphan.encode_to_vec();
        let mut store = OpenOptions::new()
            .append(true)
            .open(dir.path().join("0.store"))?;
        store.write_u64::<BigEndian>(bytes.len() as u64)?;
        store.write_all(&bytes)?;
        store.sync_all()?;
        drop(store);

        // The segment opens anyway and keeps serving the indexed prefix;
        // the orphan bytes get no offset.
        let segment = segment_at(dir.path(), 0, cfg)?;
        assert_eq!(segment.next_offset(), 2);
        assert_eq!(segment.read(0)?.value, b"indexed-0");
        assert_eq!(segment.read(1)?.value, b"indexed-1");
        assert!(matches!(segment.read(2), Err(LogError::Eof)));
        Ok(())
    }

    #[test]
    fn test_remove_deletes_files() -> LogResult<()> {
        let dir = tempdir()?;
        let mut segment = segment_at(dir.path(), 0, config(1024, 1024))?;
        segment.append(Record::new(b"doomed".as_slice()))?;
        segment.remove()?;

        assert!(!dir.path().join("0.store").exists());
        assert!(!dir.path().join("0.index").exists());
        Ok(())
    }

    fn segment_at(dir: &Path, base_offset: u64, config: Config) -> LogResult<Segment> {
        Segment::open(dir, base_offset, config)
    }

    fn record_len(offset: u64) -> u64 {
        let mut record = Record::new(b"hello world".as_slice());
        record.offset = offset;
        record.encode_to_vec().len() as u64
    }
}
