//! Process-wide component type registry.
//!
//! Maps each component type's identity to a small dense integer ID
//! (`CID`) in `[0, MAX_COMPONENT_TYPES)`, plus per-CID capability flags.
//! Mutations (ID assignment, flag writes) serialize through a single lock;
//! flag reads are lock-free atomic loads, matching the teacher's
//! `system/metrics.rs` global-`Lazy` + atomics shape.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use crate::constants::MAX_COMPONENT_TYPES;

/// Whether a component type is stored as raw plain-old-data in a chunk
/// column, or as an opaque managed payload with caller-supplied
/// serialization.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ComponentKind {
    /// Fixed-width POD type stored directly in chunk bytes.
    Plain,
    /// Opaque managed payload, serialized by the application.
    Managed,
}

const FLAG_SNAPSHOTABLE: u8 = 1 << 0;
const FLAG_RECORDABLE: u8 = 1 << 1;
const FLAG_SAVEABLE: u8 = 1 << 2;
const FLAG_NEEDS_CLONE: u8 = 1 << 3;
/// Marks a CID slot as having been claimed; distinguishes "never
/// registered" from "registered with all flags clear".
const FLAG_REGISTERED: u8 = 1 << 7;

struct Inner {
    by_type: HashMap<TypeId, u8>,
    names: Vec<&'static str>,
}

/// The process-wide component type registry.
pub struct ComponentTypeRegistry {
    next_cid: AtomicUsize,
    inner: Mutex<Inner>,
    flags: [AtomicU8; MAX_COMPONENT_TYPES],
}

fn new_flags_array() -> [AtomicU8; MAX_COMPONENT_TYPES] {
    std::array::from_fn(|_| AtomicU8::new(0))
}

impl ComponentTypeRegistry {
    fn new() -> Self {
        Self {
            next_cid: AtomicUsize::new(0),
            inner: Mutex::new(Inner { by_type: HashMap::new(), names: Vec::new() }),
            flags: new_flags_array(),
        }
    }

    /// The global registry instance.
    pub fn global() -> &'static ComponentTypeRegistry {
        static INSTANCE: Lazy<ComponentTypeRegistry> = Lazy::new(ComponentTypeRegistry::new);
        &INSTANCE
    }

    /// Look up or assign the CID for a component type. The first call for a
    /// given `(type_id, name)` pair claims the next unused CID
    /// deterministically for the life of the process; later calls return
    /// the same CID. Defaults differ by `kind` as specified:
    /// plain types get `{snap:true, rec:true, save:true, clone:false}`,
    /// managed types get `{snap:false, rec:true, save:true, clone:false}`.
    pub fn get_or_register(&self, type_id: TypeId, name: &'static str, kind: ComponentKind) -> u8 {
        let mut guard = self.inner.lock();
        if let Some(&cid) = guard.by_type.get(&type_id) {
            return cid;
        }
        let cid = self.next_cid.fetch_add(1, Ordering::SeqCst);
        assert!(
            cid < MAX_COMPONENT_TYPES,
            "component type capacity exhausted ({MAX_COMPONENT_TYPES} types)"
        );
        let cid = cid as u8;
        guard.by_type.insert(type_id, cid);
        guard.names.push(name);

        let mut flag_bits = FLAG_REGISTERED | FLAG_RECORDABLE | FLAG_SAVEABLE;
        if kind == ComponentKind::Plain {
            flag_bits |= FLAG_SNAPSHOTABLE;
        }
        self.flags[cid as usize].store(flag_bits, Ordering::Release);
        cid
    }

    fn flag(&self, cid: u8, mask: u8) -> bool {
        (cid as usize) < MAX_COMPONENT_TYPES
            && self.flags[cid as usize].load(Ordering::Acquire) & mask != 0
    }

    /// Whether `cid` is snapshotable (included in keyframes as plain
    /// bytes). Out-of-range CIDs return `false`.
    pub fn is_snapshotable(&self, cid: u8) -> bool {
        self.flag(cid, FLAG_SNAPSHOTABLE)
    }

    /// Whether `cid` participates in flight recording.
    pub fn is_recordable(&self, cid: u8) -> bool {
        self.flag(cid, FLAG_RECORDABLE)
    }

    /// Whether `cid` is included when the repository is saved.
    pub fn is_saveable(&self, cid: u8) -> bool {
        self.flag(cid, FLAG_SAVEABLE)
    }

    /// Whether `cid` requires a deep clone when copied (managed types that
    /// own heap allocations typically do).
    pub fn needs_clone(&self, cid: u8) -> bool {
        self.flag(cid, FLAG_NEEDS_CLONE)
    }

    /// Mark `cid` as requiring deep clone.
    pub fn set_needs_clone(&self, cid: u8, value: bool) {
        if (cid as usize) >= MAX_COMPONENT_TYPES {
            return;
        }
        if value {
            self.flags[cid as usize].fetch_or(FLAG_NEEDS_CLONE, Ordering::AcqRel);
        } else {
            self.flags[cid as usize].fetch_and(!FLAG_NEEDS_CLONE, Ordering::AcqRel);
        }
    }

    /// All currently registered CIDs whose `recordable` flag is set.
    pub fn recordable_ids(&self) -> Vec<u8> {
        self.ids_matching(FLAG_RECORDABLE)
    }

    /// All currently registered CIDs whose `saveable` flag is set.
    pub fn saveable_ids(&self) -> Vec<u8> {
        self.ids_matching(FLAG_SAVEABLE)
    }

    /// All currently registered CIDs whose `snapshotable` flag is set.
    pub fn snapshotable_ids(&self) -> Vec<u8> {
        self.ids_matching(FLAG_SNAPSHOTABLE)
    }

    fn ids_matching(&self, mask: u8) -> Vec<u8> {
        (0..MAX_COMPONENT_TYPES)
            .filter(|&cid| {
                let bits = self.flags[cid].load(Ordering::Acquire);
                bits & FLAG_REGISTERED != 0 && bits & mask != 0
            })
            .map(|cid| cid as u8)
            .collect()
    }

    /// Registered type name for `cid`, if any. Used by the tolerant
    /// component-ID remapping on recording load.
    pub fn name_of(&self, cid: u8) -> Option<&'static str> {
        let guard = self.inner.lock();
        guard.names.get(cid as usize).copied()
    }

    /// CID previously assigned to `name`, if the name has been registered
    /// in this process. Used by the tolerant component-ID remapping on
    /// recording load: two recordings that registered the same types in
    /// different orders still decode correctly because the reader looks
    /// components up by name rather than trusting the stored CID directly.
    pub fn cid_of_name(&self, name: &str) -> Option<u8> {
        let guard = self.inner.lock();
        guard.names.iter().position(|&n| n == name).map(|i| i as u8)
    }

    /// Reset all registrations and flags. Intended for test boundaries:
    /// the registry is process-wide state, so tests that assume specific
    /// CIDs must clear it first.
    pub fn clear(&self) {
        let mut guard = self.inner.lock();
        guard.by_type.clear();
        guard.names.clear();
        self.next_cid.store(0, Ordering::SeqCst);
        for flag in &self.flags {
            flag.store(0, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    // Serializes tests against the process-wide registry singleton.
    static TEST_LOCK: StdMutex<()> = StdMutex::new(());

    struct Health;
    struct Transform;

    #[test]
    fn get_or_register_is_idempotent_and_deterministic() {
        let _guard = TEST_LOCK.lock().unwrap();
        let reg = ComponentTypeRegistry::global();
        reg.clear();
        let cid1 = reg.get_or_register(TypeId::of::<Health>(), "Health", ComponentKind::Plain);
        let cid2 = reg.get_or_register(TypeId::of::<Health>(), "Health", ComponentKind::Plain);
        assert_eq!(cid1, cid2);
        let cid3 = reg.get_or_register(TypeId::of::<Transform>(), "Transform", ComponentKind::Plain);
        assert_ne!(cid1, cid3);
    }

    #[test]
    fn plain_vs_managed_defaults() {
        let _guard = TEST_LOCK.lock().unwrap();
        let reg = ComponentTypeRegistry::global();
        reg.clear();
        let plain = reg.get_or_register(TypeId::of::<Health>(), "Health", ComponentKind::Plain);
        let managed = reg.get_or_register(TypeId::of::<Transform>(), "Transform", ComponentKind::Managed);
        assert!(reg.is_snapshotable(plain));
        assert!(reg.is_recordable(plain));
        assert!(reg.is_saveable(plain));
        assert!(!reg.needs_clone(plain));

        assert!(!reg.is_snapshotable(managed));
        assert!(reg.is_recordable(managed));
        assert!(reg.is_saveable(managed));
    }

    #[test]
    fn out_of_range_cid_returns_false() {
        let reg = ComponentTypeRegistry::global();
        assert!(!reg.is_recordable(255));
        assert!(!reg.is_snapshotable(200));
    }

    #[test]
    fn name_lookup_supports_tolerant_remap() {
        let _guard = TEST_LOCK.lock().unwrap();
        let reg = ComponentTypeRegistry::global();
        reg.clear();
        let cid = reg.get_or_register(TypeId::of::<Health>(), "Health", ComponentKind::Plain);
        assert_eq!(reg.name_of(cid), Some("Health"));
        assert_eq!(reg.cid_of_name("Health"), Some(cid));
        assert_eq!(reg.cid_of_name("DoesNotExist"), None);
    }
}
