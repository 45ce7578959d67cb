//! The top-level entity-component repository.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::chunk_table::NativeChunkTable;
use super::entity::{Entity, EntityHeader};
use super::entity_index::EntityIndex;
use super::query::QueryBuilder;
use super::registry::{ComponentKind, ComponentTypeRegistry};
use crate::error::{Error, Result};

/// Type-erased capability surface every component column exposes to the
/// repository and the flight recorder, regardless of whether the
/// underlying storage is a [`super::chunk_table::NativeChunkTable`] (plain
/// components) or a sparse map (managed components). Modeled after the
/// teacher's `WriteHandle`/`ChunkRef` split in `types/storage.rs`, flattened
/// into one object-safe trait so the repository can hold a
/// `HashMap<u8, Arc<dyn Column>>` without per-type generics leaking out.
pub trait Column: Send + Sync {
    fn has_changes_since(&self, chunk_idx: usize, since: u64) -> bool;
    fn chunk_version(&self, chunk_idx: usize) -> u64;
    fn sanitize_chunk(&self, chunk_idx: usize, keep_mask: &[bool], version: u64) -> Result<()>;
    fn copy_chunk_to_buffer(&self, chunk_idx: usize, out: &mut Vec<u8>) -> Result<()>;
    fn restore_chunk_from_buffer(&self, chunk_idx: usize, bytes: &[u8], version: u64) -> Result<()>;
    fn remove_row(&self, row: usize, version: u64) -> Result<()>;
    fn as_any(&self) -> &dyn Any;
}

/// A column of fixed-width plain-old-data rows, backed directly by a
/// [`NativeChunkTable`].
pub struct PlainColumn<T: Copy + Default + Send + Sync + 'static> {
    table: NativeChunkTable<T>,
}

impl<T: Copy + Default + Send + Sync + 'static> PlainColumn<T> {
    pub fn new(max_rows: usize, chunk_bytes: usize) -> Self {
        Self { table: NativeChunkTable::new(max_rows, chunk_bytes) }
    }

    pub fn get(&self, row: usize) -> Result<T> {
        let (chunk_idx, offset) = self.table.locate(row);
        if !self.table.is_committed(chunk_idx) {
            return Ok(T::default());
        }
        let guard = self.table.get_ro(chunk_idx)?;
        Ok(guard.rows()[offset])
    }

    pub fn set(&self, row: usize, value: T, version: u64) -> Result<()> {
        let (chunk_idx, offset) = self.table.locate(row);
        let mut guard = self.table.get_rw(chunk_idx, version)?;
        guard.rows_mut()[offset] = value;
        Ok(())
    }
}

impl<T: Copy + Default + Send + Sync + 'static> Column for PlainColumn<T> {
    fn has_changes_since(&self, chunk_idx: usize, since: u64) -> bool {
        self.table.has_changes(chunk_idx, since)
    }
    fn chunk_version(&self, chunk_idx: usize) -> u64 {
        self.table.version_of(chunk_idx)
    }
    fn sanitize_chunk(&self, chunk_idx: usize, keep_mask: &[bool], version: u64) -> Result<()> {
        self.table.sanitize_chunk(chunk_idx, keep_mask, version)
    }
    fn copy_chunk_to_buffer(&self, chunk_idx: usize, out: &mut Vec<u8>) -> Result<()> {
        self.table.copy_chunk_to_buffer(chunk_idx, out)
    }
    fn restore_chunk_from_buffer(&self, chunk_idx: usize, bytes: &[u8], version: u64) -> Result<()> {
        self.table.restore_chunk_from_buffer(chunk_idx, bytes, version)
    }
    fn remove_row(&self, row: usize, version: u64) -> Result<()> {
        self.set(row, T::default(), version)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A column of variable-shaped managed values, serialized on demand.
/// Change tracking is column-wide rather than per-chunk: a write anywhere
/// bumps one shared version counter. That is coarser than
/// [`PlainColumn`]'s per-chunk versions, but managed components are
/// expected to be rare relative to plain ones, so the recorder re-scanning
/// a whole managed column on any change is an acceptable trade for a much
/// simpler implementation.
pub struct ManagedColumn<T: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static> {
    rows: dashmap::DashMap<usize, T>,
    version: AtomicU64,
    entities_per_chunk: usize,
}

impl<T: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static> ManagedColumn<T> {
    pub fn new(entities_per_chunk: usize) -> Self {
        Self { rows: dashmap::DashMap::new(), version: AtomicU64::new(0), entities_per_chunk }
    }

    pub fn get(&self, row: usize) -> T {
        self.rows.get(&row).map(|r| r.clone()).unwrap_or_default()
    }

    pub fn set(&self, row: usize, value: T, version: u64) {
        self.rows.insert(row, value);
        self.version.store(version, Ordering::Release);
    }
}

const MANAGED_ABSENT_MARKER: u32 = u32::MAX;

impl<T: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static> Column
    for ManagedColumn<T>
{
    fn has_changes_since(&self, _chunk_idx: usize, since: u64) -> bool {
        self.version.load(Ordering::Acquire) > since
    }
    fn chunk_version(&self, _chunk_idx: usize) -> u64 {
        self.version.load(Ordering::Acquire)
    }
    fn sanitize_chunk(&self, chunk_idx: usize, keep_mask: &[bool], version: u64) -> Result<()> {
        let base = chunk_idx * self.entities_per_chunk;
        let mut removed_any = false;
        for (offset, keep) in keep_mask.iter().enumerate() {
            if !keep && self.rows.remove(&(base + offset)).is_some() {
                removed_any = true;
            }
        }
        if removed_any {
            self.version.store(version, Ordering::Release);
        }
        Ok(())
    }
    fn copy_chunk_to_buffer(&self, chunk_idx: usize, out: &mut Vec<u8>) -> Result<()> {
        let base = chunk_idx * self.entities_per_chunk;
        for offset in 0..self.entities_per_chunk {
            match self.rows.get(&(base + offset)) {
                Some(value) => {
                    let bytes = serde_json::to_vec(&*value)
                        .map_err(|e| Error::out_of_range(e.to_string()))?;
                    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                    out.extend_from_slice(&bytes);
                }
                None => out.extend_from_slice(&MANAGED_ABSENT_MARKER.to_le_bytes()),
            }
        }
        Ok(())
    }
    fn restore_chunk_from_buffer(&self, chunk_idx: usize, bytes: &[u8], version: u64) -> Result<()> {
        let base = chunk_idx * self.entities_per_chunk;
        let mut cursor = 0usize;
        for offset in 0..self.entities_per_chunk {
            if cursor + 4 > bytes.len() {
                return Err(Error::out_of_range("truncated managed chunk buffer"));
            }
            let len = u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().unwrap());
            cursor += 4;
            if len == MANAGED_ABSENT_MARKER {
                self.rows.remove(&(base + offset));
                continue;
            }
            let len = len as usize;
            if cursor + len > bytes.len() {
                return Err(Error::out_of_range("truncated managed chunk payload"));
            }
            let value: T = serde_json::from_slice(&bytes[cursor..cursor + len])
                .map_err(|e| Error::out_of_range(e.to_string()))?;
            cursor += len;
            self.rows.insert(base + offset, value);
        }
        self.version.store(version, Ordering::Release);
        Ok(())
    }
    fn remove_row(&self, row: usize, version: u64) -> Result<()> {
        self.rows.remove(&row);
        self.version.store(version, Ordering::Release);
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct ColumnEntry {
    column: Arc<dyn Column>,
    type_id: TypeId,
}

/// Owns entity lifecycle and every registered component's storage for one
/// simulation world.
pub struct EntityRepository {
    index: EntityIndex,
    columns: RwLock<HashMap<u8, ColumnEntry>>,
    destruction_log: Mutex<Vec<Entity>>,
    tick: AtomicU64,
    max_entities: usize,
    chunk_bytes: usize,
    paranoid: bool,
}

impl EntityRepository {
    pub fn new(max_entities: usize, chunk_bytes: usize, paranoid: bool) -> Self {
        Self {
            index: EntityIndex::new(max_entities, chunk_bytes),
            columns: RwLock::new(HashMap::new()),
            destruction_log: Mutex::new(Vec::new()),
            tick: AtomicU64::new(0),
            max_entities,
            chunk_bytes,
            paranoid,
        }
    }

    pub fn from_config(cfg: &crate::config::RepositoryConfig) -> Self {
        Self::new(cfg.max_entities, cfg.chunk_bytes, cfg.paranoid)
    }

    /// Direct access to the entity-lifecycle index, for queries and the
    /// recorder.
    pub fn index(&self) -> &EntityIndex {
        &self.index
    }

    pub fn create_entity(&self) -> Result<Entity> {
        self.index.create(self.tick.load(Ordering::Acquire))
    }

    /// Destroy `e`. In paranoid mode, destroying a stale or null handle is
    /// an error; otherwise it is a silent no-op returning `Ok(false)`.
    pub fn destroy_entity(&self, e: Entity) -> Result<bool> {
        let destroyed = self.index.destroy(e, self.tick.load(Ordering::Acquire))?;
        if destroyed {
            self.destruction_log.lock().push(e);
            Ok(true)
        } else if self.paranoid {
            Err(Error::InvalidHandle(e))
        } else {
            Ok(false)
        }
    }

    /// Destroy `e` without recording it in the destruction log. Used only
    /// by the recording reader when applying a recorded frame's own
    /// destruction list to a playback target — that list already represents
    /// the destructions for this frame and must not be re-logged onto the
    /// target's own log.
    pub(crate) fn destroy_entity_quiet(&self, e: Entity, version: u64) -> Result<bool> {
        self.index.destroy(e, version)
    }

    pub fn get_header(&self, e: Entity) -> Result<EntityHeader> {
        self.index.get_header(e)
    }

    /// Register a plain (fixed-width, `Copy`) component type, returning its
    /// dense component ID. Idempotent: re-registering the same `T` returns
    /// the same CID without reallocating storage.
    pub fn register_plain<T: Copy + Default + Send + Sync + 'static>(
        &self,
        name: &'static str,
    ) -> u8 {
        let cid = ComponentTypeRegistry::global().get_or_register(
            TypeId::of::<T>(),
            name,
            ComponentKind::Plain,
        );
        let mut columns = self.columns.write();
        columns.entry(cid).or_insert_with(|| ColumnEntry {
            column: Arc::new(PlainColumn::<T>::new(self.max_entities, self.chunk_bytes)),
            type_id: TypeId::of::<T>(),
        });
        cid
    }

    /// Register a managed (variable-shape, serializable) component type.
    pub fn register_managed<T>(&self, name: &'static str) -> u8
    where
        T: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let cid = ComponentTypeRegistry::global().get_or_register(
            TypeId::of::<T>(),
            name,
            ComponentKind::Managed,
        );
        let mut columns = self.columns.write();
        columns.entry(cid).or_insert_with(|| ColumnEntry {
            column: Arc::new(ManagedColumn::<T>::new(self.index.entities_per_chunk())),
            type_id: TypeId::of::<T>(),
        });
        cid
    }

    fn column_for<T: 'static>(&self, cid: u8) -> Result<Arc<dyn Column>> {
        let columns = self.columns.read();
        let entry = columns
            .get(&cid)
            .ok_or(Error::NotRegistered(std::any::type_name::<T>()))?;
        if entry.type_id != TypeId::of::<T>() {
            return Err(Error::NotRegistered(std::any::type_name::<T>()));
        }
        Ok(entry.column.clone())
    }

    pub fn has_component(&self, e: Entity, cid: u8) -> Result<bool> {
        let header = self.index.get_header(e)?;
        Ok(header.component_mask.is_set(cid as u16))
    }

    pub fn add_component<T: Copy + Default + Send + Sync + 'static>(
        &self,
        e: Entity,
        cid: u8,
        value: T,
    ) -> Result<()> {
        let column = self.column_for::<T>(cid)?;
        let plain = column
            .as_any()
            .downcast_ref::<PlainColumn<T>>()
            .ok_or(Error::NotRegistered(std::any::type_name::<T>()))?;
        let version = self.tick.load(Ordering::Acquire);
        plain.set(e.index as usize, value, version)?;
        self.index.with_header_mut(e, version, |h| {
            h.component_mask.set_bit(cid as u16);
            h.last_change_tick = version as u32;
        })?;
        Ok(())
    }

    pub fn set_component<T: Copy + Default + Send + Sync + 'static>(
        &self,
        e: Entity,
        cid: u8,
        value: T,
    ) -> Result<()> {
        self.add_component(e, cid, value)
    }

    pub fn get_component<T: Copy + Default + Send + Sync + 'static>(
        &self,
        e: Entity,
        cid: u8,
    ) -> Result<T> {
        if !self.has_component(e, cid)? {
            return Err(Error::NotRegistered(std::any::type_name::<T>()));
        }
        let column = self.column_for::<T>(cid)?;
        let plain = column
            .as_any()
            .downcast_ref::<PlainColumn<T>>()
            .ok_or(Error::NotRegistered(std::any::type_name::<T>()))?;
        plain.get(e.index as usize)
    }

    pub fn set_managed_component<T>(&self, e: Entity, cid: u8, value: T) -> Result<()>
    where
        T: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let column = self.column_for::<T>(cid)?;
        let managed = column
            .as_any()
            .downcast_ref::<ManagedColumn<T>>()
            .ok_or(Error::NotRegistered(std::any::type_name::<T>()))?;
        let version = self.tick.load(Ordering::Acquire);
        managed.set(e.index as usize, value, version);
        self.index.with_header_mut(e, version, |h| {
            h.component_mask.set_bit(cid as u16);
            h.last_change_tick = version as u32;
        })?;
        Ok(())
    }

    pub fn get_managed_component<T>(&self, e: Entity, cid: u8) -> Result<T>
    where
        T: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        if !self.has_component(e, cid)? {
            return Err(Error::NotRegistered(std::any::type_name::<T>()));
        }
        let column = self.column_for::<T>(cid)?;
        let managed = column
            .as_any()
            .downcast_ref::<ManagedColumn<T>>()
            .ok_or(Error::NotRegistered(std::any::type_name::<T>()))?;
        Ok(managed.get(e.index as usize))
    }

    pub fn remove_component(&self, e: Entity, cid: u8) -> Result<()> {
        let version = self.tick.load(Ordering::Acquire);
        let columns = self.columns.read();
        if let Some(entry) = columns.get(&cid) {
            entry.column.remove_row(e.index as usize, version)?;
        }
        drop(columns);
        self.index.with_header_mut(e, version, |h| {
            h.component_mask.clear_bit(cid as u16);
        })
    }

    /// Whether `cid`'s column changed, for the chunk holding `e`, since
    /// tick `since`.
    pub fn has_component_changed(&self, e: Entity, cid: u8, since: u64) -> bool {
        let (chunk_idx, _) = self.index.headers().locate(e.index as usize);
        let columns = self.columns.read();
        columns
            .get(&cid)
            .is_some_and(|entry| entry.column.has_changes_since(chunk_idx, since))
    }

    /// Start building a query over this repository's entities.
    pub fn query(&self) -> QueryBuilder {
        QueryBuilder::new()
    }

    /// Advance and return the global tick counter.
    pub fn tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn global_version(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }

    /// Force the tick counter to a specific value, used when restoring
    /// repository state from a recording.
    pub fn set_global_version(&self, value: u64) {
        self.tick.store(value, Ordering::Release);
    }

    pub fn entity_count(&self) -> usize {
        self.index.active_count()
    }

    pub fn max_entity_index(&self) -> i64 {
        self.index.max_issued_index()
    }

    pub fn drain_destruction_log(&self) -> Vec<Entity> {
        std::mem::take(&mut self.destruction_log.lock())
    }

    pub fn clear_destruction_log(&self) {
        self.destruction_log.lock().clear();
    }

    pub fn destruction_log_snapshot(&self) -> Vec<Entity> {
        self.destruction_log.lock().clone()
    }

    /// Registered column for `cid`, for the recorder to iterate without
    /// knowing concrete component types.
    pub(crate) fn column_dyn(&self, cid: u8) -> Option<Arc<dyn Column>> {
        self.columns.read().get(&cid).map(|e| e.column.clone())
    }

    /// Overwrite an entity-header chunk from recorded bytes, stamping it
    /// with `version` (the tick the recorded frame was captured at). Used
    /// only by the recording reader during playback.
    pub fn restore_header_chunk(&self, chunk_idx: usize, bytes: &[u8], version: u64) -> Result<()> {
        self.index.headers().restore_chunk_from_buffer(chunk_idx, bytes, version)
    }

    /// Overwrite a component chunk from recorded bytes, by local CID,
    /// stamping it with `version`. Used only by the recording reader during
    /// playback.
    pub fn restore_component_chunk(&self, cid: u8, chunk_idx: usize, bytes: &[u8], version: u64) -> Result<()> {
        match self.column_dyn(cid) {
            Some(column) => column.restore_chunk_from_buffer(chunk_idx, bytes, version),
            None => Err(Error::NotRegistered("unregistered component id during restore")),
        }
    }

    /// Recompute entity-lifecycle bookkeeping after restoring header chunks
    /// directly. Must be called after applying a recorded frame's header
    /// chunks, before the repository is queried or mutated again.
    pub fn rebuild_after_restore(&self) -> Result<()> {
        self.index.rebuild_metadata()
    }

    /// Look up the component registry's name for `cid`, for resolving
    /// tolerant ID remaps during playback.
    pub fn registered_name(&self, cid: u8) -> Option<&'static str> {
        ComponentTypeRegistry::global().name_of(cid)
    }
}
