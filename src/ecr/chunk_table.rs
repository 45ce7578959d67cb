//! Columnar, chunked component storage.
//!
//! A [`NativeChunkTable<T>`] is a fixed-size directory of chunk slots, each
//! holding up to `entities_per_chunk` rows of `T`. Chunks are committed
//! lazily on first write and may be decommitted once empty, so a table for
//! a rarely-used component type costs nothing beyond the directory itself.
//! Grounded on the teacher's `storage/heap.rs` `DeltaHeap` (lazy chunk
//! allocation under a narrow lock, atomic bookkeeping for the hot path) and
//! `structures/zerocopy_storage/mod.rs` (per-region atomic generation
//! counters read without taking the data lock).

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crate::error::{Result, StorageError};

/// One slot in a [`NativeChunkTable`]'s directory.
struct Chunk<T> {
    data: RwLock<Option<Box<[T]>>>,
    /// Bumped every time the chunk's contents change. Read without taking
    /// `data`'s lock so [`NativeChunkTable::has_changes`] stays lock-free.
    version: AtomicU64,
    /// Number of rows currently considered live, maintained by the caller
    /// via [`ChunkWriteGuard::set_population`].
    population: AtomicUsize,
    committed: AtomicBool,
}

impl<T> Chunk<T> {
    fn new() -> Self {
        Self {
            data: RwLock::new(None),
            version: AtomicU64::new(0),
            population: AtomicUsize::new(0),
            committed: AtomicBool::new(false),
        }
    }
}

/// A directory of fixed-capacity component chunks for a single component
/// type's column.
pub struct NativeChunkTable<T> {
    chunks: Vec<Chunk<T>>,
    entities_per_chunk: usize,
}

/// Read access to one committed chunk's rows.
pub struct ChunkReadGuard<'a, T> {
    guard: RwLockReadGuard<'a, Option<Box<[T]>>>,
}

impl<'a, T> ChunkReadGuard<'a, T> {
    /// The chunk's rows, or `&[]` if the chunk is not committed.
    pub fn rows(&self) -> &[T] {
        match &*self.guard {
            Some(boxed) => boxed,
            None => &[],
        }
    }
}

/// Write access to one chunk's rows. Committing the chunk (allocating its
/// backing storage) happens lazily the first time this guard is obtained.
pub struct ChunkWriteGuard<'a, T> {
    guard: RwLockWriteGuard<'a, Option<Box<[T]>>>,
    population: &'a AtomicUsize,
}

impl<'a, T> ChunkWriteGuard<'a, T> {
    /// The chunk's rows.
    pub fn rows_mut(&mut self) -> &mut [T] {
        self.guard.as_mut().expect("write guard implies committed chunk")
    }

    /// Record the current number of live rows in this chunk. Called by the
    /// repository after it finishes mutating entity liveness within the
    /// chunk.
    pub fn set_population(&self, count: usize) {
        self.population.store(count, Ordering::Release);
    }
}

impl<T: Copy + Default> NativeChunkTable<T> {
    /// Build a table sized to hold `max_rows` rows total, `chunk_bytes`
    /// bytes per chunk.
    pub fn new(max_rows: usize, chunk_bytes: usize) -> Self {
        let row_size = std::mem::size_of::<T>().max(1);
        let entities_per_chunk = (chunk_bytes / row_size).max(1);
        let chunk_count = max_rows.div_ceil(entities_per_chunk).max(1);
        let chunks = (0..chunk_count).map(|_| Chunk::new()).collect();
        Self { chunks, entities_per_chunk }
    }

    /// Rows held per chunk.
    pub fn entities_per_chunk(&self) -> usize {
        self.entities_per_chunk
    }

    /// Number of directory slots.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Which chunk holds row `global_row`, and the row's offset within it.
    pub fn locate(&self, global_row: usize) -> (usize, usize) {
        (global_row / self.entities_per_chunk, global_row % self.entities_per_chunk)
    }

    fn chunk(&self, chunk_idx: usize) -> Result<&Chunk<T>> {
        self.chunks.get(chunk_idx).ok_or_else(|| {
            StorageError::IndexOutOfBounds {
                index: chunk_idx as i32,
                max: self.chunks.len() as i32,
            }
            .into()
        })
    }

    /// Borrow a chunk for reading. Returns a guard whose `rows()` is empty
    /// if the chunk has never been committed.
    pub fn get_ro(&self, chunk_idx: usize) -> Result<ChunkReadGuard<'_, T>> {
        let chunk = self.chunk(chunk_idx)?;
        Ok(ChunkReadGuard { guard: chunk.data.read() })
    }

    /// Borrow a chunk for writing, committing it (allocating
    /// `entities_per_chunk` default-initialized rows) if this is the first
    /// write, and stamping the chunk's version to `version` — the
    /// repository's current tick `V` at the time of the write. Readers
    /// compare this stamp against a `prev_tick` watermark, so it must live
    /// on the same scale as the tick counter rather than count writes.
    pub fn get_rw(&self, chunk_idx: usize, version: u64) -> Result<ChunkWriteGuard<'_, T>> {
        let chunk = self.chunk(chunk_idx)?;
        let mut guard = chunk.data.write();
        if guard.is_none() {
            *guard = Some(vec![T::default(); self.entities_per_chunk].into_boxed_slice());
            chunk.committed.store(true, Ordering::Release);
        }
        chunk.version.store(version, Ordering::Release);
        Ok(ChunkWriteGuard { guard, population: &chunk.population })
    }

    /// Whether chunk `chunk_idx` is currently committed, without taking any
    /// lock.
    pub fn is_committed(&self, chunk_idx: usize) -> bool {
        self.chunks
            .get(chunk_idx)
            .is_some_and(|c| c.committed.load(Ordering::Acquire))
    }

    /// Current version stamp of chunk `chunk_idx`, or `0` if out of range.
    pub fn version_of(&self, chunk_idx: usize) -> u64 {
        self.chunks
            .get(chunk_idx)
            .map(|c| c.version.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Last recorded population of chunk `chunk_idx`.
    pub fn population_of(&self, chunk_idx: usize) -> usize {
        self.chunks
            .get(chunk_idx)
            .map(|c| c.population.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// True iff chunk `chunk_idx`'s version is strictly greater than
    /// `since`. A single atomic load; does not touch the chunk's data lock.
    #[inline]
    pub fn has_changes(&self, chunk_idx: usize, since: u64) -> bool {
        self.version_of(chunk_idx) > since
    }

    /// Zero out rows at the given offsets within a chunk. Used before
    /// copying a chunk into a keyframe so that rows belonging to destroyed
    /// or never-allocated entities don't leak stale bytes into the
    /// recording. `version` stamps the chunk the same way [`Self::get_rw`]
    /// does.
    pub fn sanitize_chunk(&self, chunk_idx: usize, keep_mask: &[bool], version: u64) -> Result<()> {
        let mut guard = self.get_rw(chunk_idx, version)?;
        let rows = guard.rows_mut();
        for (row, keep) in rows.iter_mut().zip(keep_mask.iter()) {
            if !keep {
                *row = T::default();
            }
        }
        Ok(())
    }

    /// Append the raw bytes of a committed chunk's rows to `out`. Rows of
    /// an uncommitted chunk are synthesized as `T::default()` bytes so that
    /// readers that expect a fixed chunk size never have to special-case
    /// holes.
    pub fn copy_chunk_to_buffer(&self, chunk_idx: usize, out: &mut Vec<u8>) -> Result<()> {
        let guard = self.get_ro(chunk_idx)?;
        let row_size = std::mem::size_of::<T>();
        match &*guard.guard {
            Some(boxed) => {
                let bytes = unsafe {
                    std::slice::from_raw_parts(boxed.as_ptr() as *const u8, boxed.len() * row_size)
                };
                out.extend_from_slice(bytes);
            }
            None => {
                out.extend(std::iter::repeat(0u8).take(self.entities_per_chunk * row_size));
            }
        }
        Ok(())
    }

    /// Overwrite a chunk's rows from raw bytes previously produced by
    /// [`Self::copy_chunk_to_buffer`], committing the chunk if needed and
    /// stamping it with `version` — normally the tick the recorded frame
    /// was captured at, so later deltas compare against the right
    /// watermark.
    pub fn restore_chunk_from_buffer(&self, chunk_idx: usize, bytes: &[u8], version: u64) -> Result<()> {
        let row_size = std::mem::size_of::<T>();
        let expected = self.entities_per_chunk * row_size;
        if bytes.len() != expected {
            return Err(StorageError::IndexOutOfBounds {
                index: bytes.len() as i32,
                max: expected as i32,
            }
            .into());
        }
        let mut guard = self.get_rw(chunk_idx, version)?;
        let rows = guard.rows_mut();
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                rows.as_mut_ptr() as *mut u8,
                bytes.len(),
            );
        }
        Ok(())
    }

    /// Release a chunk's backing storage if it currently holds no live
    /// rows. Returns `true` if the chunk was decommitted.
    pub fn try_decommit(&self, chunk_idx: usize) -> bool {
        let Some(chunk) = self.chunks.get(chunk_idx) else { return false };
        if chunk.population.load(Ordering::Acquire) != 0 {
            return false;
        }
        let mut guard = chunk.data.write();
        if chunk.population.load(Ordering::Acquire) != 0 {
            return false;
        }
        if guard.is_some() {
            *guard = None;
            chunk.committed.store(false, Ordering::Release);
            true
        } else {
            false
        }
    }

    /// Iterate over the indices of currently committed chunks.
    pub fn iter_committed_chunks(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.chunks.len()).filter(move |&i| self.is_committed(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Default, PartialEq, Debug)]
    struct Row(u32);

    #[test]
    fn uncommitted_chunk_reads_empty() {
        let table: NativeChunkTable<Row> = NativeChunkTable::new(1024, 256);
        let guard = table.get_ro(0).unwrap();
        assert!(guard.rows().is_empty());
        assert!(!table.is_committed(0));
    }

    #[test]
    fn write_stamps_chunk_with_given_version() {
        let table: NativeChunkTable<Row> = NativeChunkTable::new(1024, 256);
        assert_eq!(table.version_of(0), 0);
        {
            let mut guard = table.get_rw(0, 5).unwrap();
            guard.rows_mut()[0] = Row(42);
        }
        assert!(table.is_committed(0));
        assert_eq!(table.version_of(0), 5);
        let guard = table.get_ro(0).unwrap();
        assert_eq!(guard.rows()[0], Row(42));
    }

    #[test]
    fn has_changes_is_false_immediately_after_a_write_stamped_with_that_version() {
        let table: NativeChunkTable<Row> = NativeChunkTable::new(1024, 256);
        {
            let mut g = table.get_rw(0, 7).unwrap();
            g.rows_mut()[0] = Row(1);
        }
        assert!(!table.has_changes(0, 7));
        assert!(table.has_changes(0, 6));
    }

    #[test]
    fn sanitize_zeroes_dead_rows() {
        let table: NativeChunkTable<Row> = NativeChunkTable::new(1024, 256);
        {
            let mut g = table.get_rw(0, 1).unwrap();
            for (i, row) in g.rows_mut().iter_mut().enumerate() {
                *row = Row(i as u32 + 1);
            }
        }
        let epc = table.entities_per_chunk();
        let mut keep = vec![true; epc];
        keep[0] = false;
        table.sanitize_chunk(0, &keep, 2).unwrap();
        let guard = table.get_ro(0).unwrap();
        assert_eq!(guard.rows()[0], Row(0));
        assert_eq!(guard.rows()[1], Row(2));
    }

    #[test]
    fn round_trip_through_buffer() {
        let table: NativeChunkTable<Row> = NativeChunkTable::new(1024, 256);
        {
            let mut g = table.get_rw(0, 1).unwrap();
            g.rows_mut()[3] = Row(99);
        }
        let mut buf = Vec::new();
        table.copy_chunk_to_buffer(0, &mut buf).unwrap();

        let other: NativeChunkTable<Row> = NativeChunkTable::new(1024, 256);
        other.restore_chunk_from_buffer(0, &buf, 1).unwrap();
        let guard = other.get_ro(0).unwrap();
        assert_eq!(guard.rows()[3], Row(99));
        assert_eq!(other.version_of(0), 1);
    }

    #[test]
    fn decommit_requires_zero_population() {
        let table: NativeChunkTable<Row> = NativeChunkTable::new(1024, 256);
        {
            let g = table.get_rw(0, 1).unwrap();
            g.set_population(1);
        }
        assert!(!table.try_decommit(0));
        {
            let chunk_guard = table.get_rw(0, 2).unwrap();
            chunk_guard.set_population(0);
        }
        assert!(table.try_decommit(0));
        assert!(!table.is_committed(0));
    }

    #[test]
    fn iter_committed_chunks_reflects_state() {
        let table: NativeChunkTable<Row> = NativeChunkTable::new(4096, 256);
        table.get_rw(1, 1).unwrap();
        table.get_rw(3, 1).unwrap();
        let committed: Vec<usize> = table.iter_committed_chunks().collect();
        assert_eq!(committed, vec![1, 3]);
    }

    #[test]
    fn out_of_range_chunk_is_an_error() {
        let table: NativeChunkTable<Row> = NativeChunkTable::new(256, 256);
        assert!(table.get_ro(table.chunk_count() + 10).is_err());
    }
}
