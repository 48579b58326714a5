//! Memory-mapped persistent vector list.
//!
//! Two sibling files back the list: an index file of fixed-width entries
//! (see [`super::entry`]) and an append-only data file holding serialized
//! records. Both are pre-sized at construction and sparse-allocated; growth
//! is not online.
//!
//! A single reader-writer lock guards both files as a unit. Readers proceed
//! in parallel; writers are exclusive, so a reader never observes a
//! partially written entry. Removal tombstones the slot in O(1); the data
//! bytes are reclaimed by [`VectorList::defrag`] or amortized via
//! [`VectorList::defrag_batch`].

use super::defrag::DefragState;
use super::entry::{tombstone_id, IndexEntry, DATA_BYTES_PER_ENTRY, ENTRY_SIZE};
use crate::error::{Error, Result};
use crate::vector::Vector;

use memmap2::MmapMut;
use parking_lot::{RwLock, RwLockReadGuard};
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Default entry capacity when none is configured.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Memory-mapped, tombstoned, append-friendly vector container.
#[derive(Debug)]
pub struct VectorList {
    inner: RwLock<ListInner>,
}

#[derive(Debug)]
pub(super) struct ListInner {
    /// Index file mapping (entries).
    pub(super) index_mmap: MmapMut,
    /// Data file mapping (record arena).
    pub(super) data_mmap: MmapMut,
    index_path: PathBuf,
    data_path: PathBuf,
    /// Set when the files live under the system temp dir and must be
    /// deleted on drop.
    temp_dir: Option<PathBuf>,
    /// Maximum number of index entries.
    pub(super) capacity: usize,
    /// Entries written so far, tombstones included.
    pub(super) entries: usize,
    /// Live (non-tombstone) entries.
    pub(super) live: usize,
    /// Sum of live record lengths, for fragmentation accounting.
    pub(super) live_bytes: usize,
    /// Next free offset in the data file.
    pub(super) data_cursor: usize,
    /// Fast sequential append: the tail slot is known, so `add` never
    /// rescans the index stream. Established by the one scan at open.
    at_end: bool,
    /// Batched-defrag cursor, persisted across calls.
    pub(super) defrag: DefragState,
}

impl VectorList {
    /// Creates a list backed by uniquely named files under the system temp
    /// directory. The files are deleted when the list is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the files cannot be created or mapped, or if
    /// `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self> {
        let dir = std::env::temp_dir().join(format!("vicinity-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir)?;
        Self::create(&dir, capacity, true)
    }

    /// Opens (or creates) a list rooted at `dir`.
    ///
    /// Existing files are scanned once to recover the tail position and
    /// counts; they are kept on drop.
    ///
    /// # Errors
    ///
    /// Returns an error if the files cannot be created or mapped, if
    /// `capacity` is zero, or if an existing index file does not match the
    /// requested capacity.
    pub fn open<P: AsRef<Path>>(dir: P, capacity: usize) -> Result<Self> {
        std::fs::create_dir_all(dir.as_ref())?;
        Self::create(dir.as_ref(), capacity, false)
    }

    fn create(dir: &Path, capacity: usize, temp: bool) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidArgument(
                "vector list capacity must be at least 1".into(),
            ));
        }

        let index_path = dir.join("vectors.idx");
        let data_path = dir.join("vectors.dat");

        let index_len = (capacity * ENTRY_SIZE) as u64;
        let data_len = (capacity * DATA_BYTES_PER_ENTRY) as u64;

        let index_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&index_path)?;
        let existing_index_len = index_file.metadata()?.len();
        if existing_index_len == 0 {
            index_file.set_len(index_len)?;
        } else if existing_index_len != index_len {
            return Err(Error::InvalidFormat(format!(
                "index file size {existing_index_len} does not match capacity {capacity}"
            )));
        }

        let data_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&data_path)?;
        if data_file.metadata()?.len() == 0 {
            data_file.set_len(data_len)?;
        }

        // SAFETY: both files are open read+write and sized with set_len
        // above, so the mapped ranges are fully allocated.
        let index_mmap = unsafe { MmapMut::map_mut(&index_file)? };
        let data_mmap = unsafe { MmapMut::map_mut(&data_file)? };

        let mut inner = ListInner {
            index_mmap,
            data_mmap,
            index_path,
            data_path,
            temp_dir: temp.then(|| dir.to_path_buf()),
            capacity,
            entries: 0,
            live: 0,
            live_bytes: 0,
            data_cursor: 0,
            at_end: false,
            defrag: DefragState::default(),
        };
        inner.scan_tail();

        Ok(Self {
            inner: RwLock::new(inner),
        })
    }

    /// Appends a record.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when the pre-sized entry capacity is
    /// exhausted, `Io` when the data file has no room for the record.
    pub fn add(&self, vector: &Vector) -> Result<()> {
        let bytes = vector.to_binary()?;
        let mut inner = self.inner.write();
        inner.append(vector.id, &bytes)
    }

    /// Appends many records under one writer-lock acquisition.
    ///
    /// Capacity is validated for the whole batch up front, so a failing
    /// batch appends nothing. Returns the number of records appended.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument`/`Io` under the same conditions as
    /// [`Self::add`], before any record is written.
    pub fn add_batch(&self, vectors: &[Vector]) -> Result<usize> {
        if vectors.is_empty() {
            return Ok(0);
        }

        let mut encoded = Vec::with_capacity(vectors.len());
        let mut total_bytes = 0usize;
        for vector in vectors {
            let bytes = vector.to_binary()?;
            total_bytes += bytes.len();
            encoded.push((vector.id, bytes));
        }

        let mut inner = self.inner.write();
        if inner.entries + encoded.len() > inner.capacity {
            return Err(Error::InvalidArgument(format!(
                "vector list entry capacity ({}) exhausted",
                inner.capacity
            )));
        }
        if inner.data_cursor + total_bytes > inner.data_mmap.len() {
            return Err(Error::Io(io::Error::other(
                "vector list data capacity exhausted",
            )));
        }

        for (id, bytes) in &encoded {
            inner.append(*id, bytes)?;
        }
        Ok(encoded.len())
    }

    /// Returns the record at logical `index` (tombstones excluded), or
    /// `None` when out of range.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<Vector> {
        let inner = self.inner.read();
        let mut live_seen = 0;
        for slot in 0..inner.entries {
            let entry = inner.entry_at(slot);
            if !entry.is_live() {
                continue;
            }
            if live_seen == index {
                return inner.decode(&entry);
            }
            live_seen += 1;
        }
        None
    }

    /// Returns the record with the given id, or `None`.
    #[must_use]
    pub fn get_by_id(&self, id: Uuid) -> Option<Vector> {
        let inner = self.inner.read();
        let slot = inner.find_slot(id)?;
        let entry = inner.entry_at(slot);
        inner.decode(&entry)
    }

    /// Returns the logical index of the record with the given id, or −1.
    #[must_use]
    pub fn find_index_by_id(&self, id: Uuid) -> i64 {
        let inner = self.inner.read();
        let mut live_seen: i64 = 0;
        for slot in 0..inner.entries {
            let entry = inner.entry_at(slot);
            if !entry.is_live() {
                continue;
            }
            if entry.id == id {
                return live_seen;
            }
            live_seen += 1;
        }
        -1
    }

    /// Removes the record, returning whether it was found.
    ///
    /// Tombstones the slot in O(1); data bytes are reclaimed by defrag.
    pub fn remove(&self, vector: &Vector) -> bool {
        self.remove_by_id(vector.id)
    }

    /// Removes the record with the given id, returning whether it was found.
    pub fn remove_by_id(&self, id: Uuid) -> bool {
        let mut inner = self.inner.write();
        let Some(slot) = inner.find_slot(id) else {
            return false;
        };
        inner.tombstone(slot);
        true
    }

    /// Replaces the record with the given id by `updated`.
    ///
    /// The old slot is tombstoned and the new record appended, atomically
    /// under the writer lock; the updated record therefore gets a new
    /// logical index.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument`/`Io` under the same conditions as
    /// [`Self::add`]. A missing id is `Ok(false)`, not an error.
    pub fn update(&self, id: Uuid, updated: &Vector) -> Result<bool> {
        let bytes = updated.to_binary()?;
        let mut inner = self.inner.write();
        let Some(slot) = inner.find_slot(id) else {
            return Ok(false);
        };

        // Validate capacity before tombstoning so a failed update leaves
        // the prior record intact.
        if inner.entries >= inner.capacity {
            return Err(Error::InvalidArgument(format!(
                "vector list entry capacity ({}) exhausted",
                inner.capacity
            )));
        }
        if inner.data_cursor + bytes.len() > inner.data_mmap.len() {
            return Err(Error::Io(io::Error::other(
                "vector list data capacity exhausted",
            )));
        }

        inner.tombstone(slot);
        inner.append(updated.id, &bytes)?;
        Ok(true)
    }

    /// Returns true when a record with the same id and content is stored.
    #[must_use]
    pub fn contains(&self, vector: &Vector) -> bool {
        self.get_by_id(vector.id).is_some_and(|stored| stored == *vector)
    }

    /// Number of live records.
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.read().live
    }

    /// True when the list holds no live records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Drops all records and reinitializes both files.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.index_mmap.fill(0);
        inner.entries = 0;
        inner.live = 0;
        inner.live_bytes = 0;
        inner.data_cursor = 0;
        inner.at_end = true;
        inner.defrag = DefragState::default();
    }

    /// Lazily iterates the live records in logical order.
    ///
    /// The iterator holds the reader lock implicitly: do not hold it across
    /// writer-visible boundaries (an `add`/`remove`/`update` on the same
    /// thread would deadlock), and it is not restartable across writes.
    #[must_use]
    pub fn iter(&self) -> VectorListIter<'_> {
        VectorListIter {
            guard: self.inner.read(),
            slot: 0,
        }
    }

    /// Integer percentage of the used data-file span occupied by gap bytes.
    #[must_use]
    pub fn calculate_fragmentation(&self) -> usize {
        self.inner.read().fragmentation_pct()
    }

    /// Fully compacts both files, blocking writers for the duration.
    ///
    /// Live entries keep their logical order; total file usage never grows.
    pub fn defrag(&self) {
        let mut inner = self.inner.write();
        let before = inner.data_cursor;
        inner.defrag_run_to_completion();
        debug!(
            reclaimed = before.saturating_sub(inner.data_cursor),
            live = inner.live,
            "vector list defragmented"
        );
    }

    /// Compacts up to one batch of entries, persisting the cursor between
    /// calls so foreground traffic can interleave.
    ///
    /// Returns the remaining fragmentation percentage, or 0 once the sweep
    /// has completed.
    pub fn defrag_batch(&self) -> usize {
        let mut inner = self.inner.write();
        let finished = inner.defrag_step_batch();
        if finished {
            0
        } else {
            inner.fragmentation_pct()
        }
    }

    /// Forces mmap writeback of both files.
    ///
    /// # Errors
    ///
    /// Returns an error if either flush fails.
    pub fn flush(&self) -> Result<()> {
        let inner = self.inner.read();
        inner.index_mmap.flush()?;
        inner.data_mmap.flush()?;
        Ok(())
    }

    /// Returns `[index_used, index_capacity, data_used, data_capacity]`
    /// in bytes.
    #[must_use]
    pub fn file_info(&self) -> [usize; 4] {
        let inner = self.inner.read();
        [
            inner.entries * ENTRY_SIZE,
            inner.capacity * ENTRY_SIZE,
            inner.data_cursor,
            inner.capacity * DATA_BYTES_PER_ENTRY,
        ]
    }
}

impl ListInner {
    pub(super) fn entry_at(&self, slot: usize) -> IndexEntry {
        let base = slot * ENTRY_SIZE;
        IndexEntry::read_from(&self.index_mmap[base..base + ENTRY_SIZE])
    }

    pub(super) fn write_entry(&mut self, slot: usize, entry: &IndexEntry) {
        let base = slot * ENTRY_SIZE;
        entry.write_to(&mut self.index_mmap[base..base + ENTRY_SIZE]);
    }

    pub(super) fn zero_entry(&mut self, slot: usize) {
        let base = slot * ENTRY_SIZE;
        self.index_mmap[base..base + ENTRY_SIZE].fill(0);
    }

    fn find_slot(&self, id: Uuid) -> Option<usize> {
        (0..self.entries).find(|&slot| {
            let entry = self.entry_at(slot);
            entry.is_live() && entry.id == id
        })
    }

    fn decode(&self, entry: &IndexEntry) -> Option<Vector> {
        let offset = usize::try_from(entry.offset).ok()?;
        let end = offset.checked_add(entry.length as usize)?;
        if end > self.data_mmap.len() {
            warn!(offset, length = entry.length, "index entry out of bounds");
            return None;
        }
        match Vector::from_binary(&self.data_mmap[offset..end]) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(error = %e, offset, "failed to decode stored record");
                None
            }
        }
    }

    fn append(&mut self, id: Uuid, bytes: &[u8]) -> Result<()> {
        if !self.at_end {
            self.scan_tail();
        }
        if self.entries >= self.capacity {
            return Err(Error::InvalidArgument(format!(
                "vector list entry capacity ({}) exhausted",
                self.capacity
            )));
        }
        let len = bytes.len();
        let offset = self.data_cursor;
        if offset + len > self.data_mmap.len() {
            return Err(Error::Io(io::Error::other(
                "vector list data capacity exhausted",
            )));
        }

        self.data_mmap[offset..offset + len].copy_from_slice(bytes);
        let entry = IndexEntry {
            id,
            offset: offset as u64,
            length: len as u32,
        };
        let slot = self.entries;
        self.write_entry(slot, &entry);

        self.entries += 1;
        self.live += 1;
        self.live_bytes += len;
        self.data_cursor += len;
        Ok(())
    }

    fn tombstone(&mut self, slot: usize) {
        let mut entry = self.entry_at(slot);
        self.live -= 1;
        self.live_bytes -= entry.length as usize;
        entry.id = tombstone_id();
        self.write_entry(slot, &entry);
    }

    pub(super) fn fragmentation_pct(&self) -> usize {
        if self.data_cursor == 0 {
            return 0;
        }
        let gap = self.data_cursor.saturating_sub(self.live_bytes);
        gap * 100 / self.data_cursor
    }

    /// The one scan at open: finds the end marker and recovers counts, so
    /// every later `add` appends without rewinding.
    fn scan_tail(&mut self) {
        self.entries = 0;
        self.live = 0;
        self.live_bytes = 0;
        self.data_cursor = 0;

        let mut slot = 0;
        while slot < self.capacity {
            let entry = self.entry_at(slot);
            if entry.is_end() {
                break;
            }
            if entry.is_live() {
                self.live += 1;
                self.live_bytes += entry.length as usize;
            }
            let end = entry.offset as usize + entry.length as usize;
            self.data_cursor = self.data_cursor.max(end);
            slot += 1;
        }
        self.entries = slot;
        self.at_end = true;
    }
}

impl Drop for VectorList {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if let Err(e) = inner.index_mmap.flush() {
            error!(error = %e, "failed to flush index mmap on drop");
        }
        if let Err(e) = inner.data_mmap.flush() {
            error!(error = %e, "failed to flush data mmap on drop");
        }

        if let Some(dir) = inner.temp_dir.take() {
            // Unmapping happens when the mmaps drop; unlinking first is fine
            // on the platforms we support.
            let _ = std::fs::remove_file(&inner.index_path);
            let _ = std::fs::remove_file(&inner.data_path);
            if let Err(e) = std::fs::remove_dir(&dir) {
                debug!(error = %e, dir = %dir.display(), "temp dir not removed");
            }
        }
    }
}

/// Lazy iterator over live records. Holds the list's reader lock.
pub struct VectorListIter<'a> {
    guard: RwLockReadGuard<'a, ListInner>,
    slot: usize,
}

impl Iterator for VectorListIter<'_> {
    type Item = Vector;

    fn next(&mut self) -> Option<Self::Item> {
        while self.slot < self.guard.entries {
            let entry = self.guard.entry_at(self.slot);
            self.slot += 1;
            if entry.is_live() {
                if let Some(v) = self.guard.decode(&entry) {
                    return Some(v);
                }
            }
        }
        None
    }
}
