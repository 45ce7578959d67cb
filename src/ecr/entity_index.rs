//! Entity lifecycle: header storage, handle allocation and recycling.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use super::chunk_table::NativeChunkTable;
use super::entity::{Entity, EntityHeader, Lifecycle};
use crate::error::{Error, Result, StorageError};

/// Owns the entity header table and the free-index stack used to recycle
/// destroyed slots. Grounded on the teacher's `storage/heap.rs` combination
/// of chunked backing storage with a narrow `Mutex` guarding only the
/// allocation decision, not the data itself.
pub struct EntityIndex {
    headers: NativeChunkTable<EntityHeader>,
    /// LIFO stack of reusable slot indices. Lock held only long enough to
    /// push/pop.
    free_stack: Mutex<Vec<i32>>,
    active_count: AtomicUsize,
    /// Highest index ever issued. Starts at `-1` (none issued) and never
    /// decreases, even as slots are freed and recycled.
    max_issued_index: AtomicI64,
    entities_per_chunk: usize,
}

impl EntityIndex {
    /// Build an index with room for `max_entities` slots.
    pub fn new(max_entities: usize, chunk_bytes: usize) -> Self {
        let headers = NativeChunkTable::new(max_entities, chunk_bytes);
        let entities_per_chunk = headers.entities_per_chunk();
        Self {
            headers,
            free_stack: Mutex::new(Vec::new()),
            active_count: AtomicUsize::new(0),
            max_issued_index: AtomicI64::new(-1),
            entities_per_chunk,
        }
    }

    /// Number of currently live entities.
    pub fn active_count(&self) -> usize {
        self.active_count.load(Ordering::Acquire)
    }

    /// Highest slot index ever issued, or `-1` if none has been.
    pub fn max_issued_index(&self) -> i64 {
        self.max_issued_index.load(Ordering::Acquire)
    }

    /// Total slot capacity.
    pub fn capacity(&self) -> usize {
        self.headers.chunk_count() * self.entities_per_chunk
    }

    fn write_header(&self, index: i32, version: u64, f: impl FnOnce(&mut EntityHeader)) -> Result<()> {
        let (chunk_idx, offset) = self.headers.locate(index as usize);
        let mut guard = self.headers.get_rw(chunk_idx, version)?;
        f(&mut guard.rows_mut()[offset]);
        Ok(())
    }

    /// Read a copy of the header at `index`, regardless of liveness.
    fn read_header_raw(&self, index: i32) -> Result<EntityHeader> {
        let (chunk_idx, offset) = self.headers.locate(index as usize);
        if !self.headers.is_committed(chunk_idx) {
            return Ok(EntityHeader::default());
        }
        let guard = self.headers.get_ro(chunk_idx)?;
        Ok(guard.rows()[offset])
    }

    /// Create a new entity, recycling a free slot if one exists, otherwise
    /// extending `max_issued_index`. `version` stamps the header chunk with
    /// the repository's current tick.
    pub fn create(&self, version: u64) -> Result<Entity> {
        let index = {
            let mut stack = self.free_stack.lock();
            match stack.pop() {
                Some(i) => i,
                None => {
                    let next = self.max_issued_index.fetch_add(1, Ordering::AcqRel) + 1;
                    if next as usize >= self.capacity() {
                        self.max_issued_index.fetch_sub(1, Ordering::AcqRel);
                        return Err(Error::Storage(StorageError::IndexOutOfBounds {
                            index: next as i32,
                            max: self.capacity() as i32,
                        }));
                    }
                    next as i32
                }
            }
        };

        // `destroy` already bumps the stored generation when it frees a
        // slot, so the header's current generation is always the next one
        // to hand out — a never-used slot starts at its default, 0.
        let generation = self.read_header_raw(index)?.generation;

        self.write_header(index, version, |h| {
            *h = EntityHeader {
                active: true,
                generation,
                lifecycle: Lifecycle::Active,
                ..EntityHeader::default()
            };
        })?;
        self.active_count.fetch_add(1, Ordering::AcqRel);
        Ok(Entity { index, generation })
    }

    /// True iff `e` refers to the current occupant of its slot.
    pub fn is_alive(&self, e: Entity) -> bool {
        if e.is_null() || e.index < 0 {
            return false;
        }
        match self.read_header_raw(e.index) {
            Ok(h) => h.active && h.generation == e.generation,
            Err(_) => false,
        }
    }

    /// Destroy `e`, bumping its slot's generation and returning it to the
    /// free stack. No-op (returns `Ok(false)`) if `e` is already stale or
    /// null. `version` stamps the header chunk with the repository's
    /// current tick.
    pub fn destroy(&self, e: Entity, version: u64) -> Result<bool> {
        if !self.is_alive(e) {
            return Ok(false);
        }
        self.write_header(e.index, version, |h| {
            let next_gen = h.generation.wrapping_add(1);
            h.reset_inactive();
            h.generation = next_gen;
        })?;
        self.free_stack.lock().push(e.index);
        self.active_count.fetch_sub(1, Ordering::AcqRel);
        Ok(true)
    }

    /// Read a header by raw slot index, regardless of liveness. Used by the
    /// query engine, which iterates slot indices directly rather than
    /// pre-validated handles.
    pub fn read_header_at(&self, index: i32) -> Result<EntityHeader> {
        self.read_header_raw(index)
    }

    /// Fetch a copy of the header for a live entity.
    pub fn get_header(&self, e: Entity) -> Result<EntityHeader> {
        if !self.is_alive(e) {
            return Err(Error::InvalidHandle(e));
        }
        self.read_header_raw(e.index)
    }

    /// Apply `f` to the header of a live entity, stamping its header chunk
    /// with `version`.
    pub fn with_header_mut(&self, e: Entity, version: u64, f: impl FnOnce(&mut EntityHeader)) -> Result<()> {
        if !self.is_alive(e) {
            return Err(Error::InvalidHandle(e));
        }
        self.write_header(e.index, version, f)
    }

    /// Per-row liveness for every slot in a header chunk, for use when
    /// sanitizing component chunks before they're copied into a keyframe.
    pub fn get_chunk_liveness(&self, chunk_idx: usize) -> Result<Vec<bool>> {
        if !self.headers.is_committed(chunk_idx) {
            return Ok(vec![false; self.entities_per_chunk]);
        }
        let guard = self.headers.get_ro(chunk_idx)?;
        Ok(guard.rows().iter().map(|h| h.active).collect())
    }

    /// Recompute `active_count`, `max_issued_index` and the free-index
    /// stack from scratch by scanning every committed header chunk. Used
    /// after restoring headers directly from a recording (via
    /// [`NativeChunkTable::restore_chunk_from_buffer`] on
    /// [`Self::headers`]), where incremental bookkeeping from `create`/
    /// `destroy` can't be trusted — the chunks were overwritten wholesale.
    pub fn rebuild_metadata(&self) -> Result<()> {
        let mut max_index: i64 = -1;
        for chunk_idx in self.headers.iter_committed_chunks() {
            let end = (chunk_idx + 1) * self.entities_per_chunk;
            max_index = max_index.max(end as i64 - 1);
        }

        let mut free = Vec::new();
        let mut active = 0usize;
        if max_index >= 0 {
            // Push in descending order so the lowest inactive index ends up
            // on top of the stack and is the next one `create` recycles.
            for i in (0..=max_index).rev() {
                let header = self.read_header_raw(i as i32)?;
                if header.active {
                    active += 1;
                } else {
                    free.push(i as i32);
                }
            }
        }

        self.max_issued_index.store(max_index, Ordering::Release);
        *self.free_stack.lock() = free;
        self.active_count.store(active, Ordering::Release);
        Ok(())
    }

    /// Direct access to the backing header chunk table, for the recorder
    /// and query engine.
    pub fn headers(&self) -> &NativeChunkTable<EntityHeader> {
        &self.headers
    }

    pub fn entities_per_chunk(&self) -> usize {
        self.entities_per_chunk
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_destroy_recreate_bumps_generation() {
        let idx = EntityIndex::new(64, 256);
        let e1 = idx.create(0).unwrap();
        assert!(idx.is_alive(e1));
        assert!(idx.destroy(e1, 1).unwrap());
        assert!(!idx.is_alive(e1));

        let e2 = idx.create(2).unwrap();
        assert_eq!(e2.index, e1.index);
        assert_ne!(e2.generation, e1.generation);
        assert!(idx.is_alive(e2));
        assert!(!idx.is_alive(e1));
    }

    #[test]
    fn destroy_is_idempotent() {
        let idx = EntityIndex::new(64, 256);
        let e = idx.create(0).unwrap();
        assert!(idx.destroy(e, 1).unwrap());
        assert!(!idx.destroy(e, 2).unwrap());
    }

    #[test]
    fn max_issued_index_never_decreases() {
        let idx = EntityIndex::new(64, 256);
        let e1 = idx.create(0).unwrap();
        let e2 = idx.create(0).unwrap();
        assert_eq!(idx.max_issued_index(), e2.index as i64);
        idx.destroy(e2, 1).unwrap();
        assert_eq!(idx.max_issued_index(), e2.index as i64);
        let _ = e1;
    }

    #[test]
    fn active_count_tracks_create_destroy() {
        let idx = EntityIndex::new(64, 256);
        assert_eq!(idx.active_count(), 0);
        let e = idx.create(0).unwrap();
        assert_eq!(idx.active_count(), 1);
        idx.destroy(e, 1).unwrap();
        assert_eq!(idx.active_count(), 0);
    }

    #[test]
    fn rebuild_metadata_recycles_lowest_index_first() {
        let idx = EntityIndex::new(64, 256);
        let e0 = idx.create(0).unwrap();
        let e1 = idx.create(0).unwrap();
        let e2 = idx.create(0).unwrap();
        idx.destroy(e0, 1).unwrap();
        idx.destroy(e2, 1).unwrap();
        idx.rebuild_metadata().unwrap();
        let recreated = idx.create(2).unwrap();
        assert_eq!(recreated.index, e0.index);
        let _ = e1;
    }

    #[test]
    fn null_entity_is_never_alive() {
        let idx = EntityIndex::new(64, 256);
        assert!(!idx.is_alive(Entity::NULL));
    }
}
