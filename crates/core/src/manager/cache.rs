//! Code cache.
//!
//! Process-wide table of installed native entries keyed by guest PC. The
//! backing store is a fixed array of atomic slots indexed by PC modulo the
//! table size; a slot holds a 1-based index into the installed-regions
//! vector. Publication uses a release store and lookups an acquire load, so
//! a PC observed as native always dispatches to fully installed code.
//! Entries live until process exit; nothing is ever evicted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::ir::exec::CompiledRegion;

/// Number of slots in the dispatch table.
pub const NATIVE_REGION_SIZE: usize = 1_000_000;

/// The installed-regions table.
pub struct CodeCache {
    slots: Box<[AtomicU64]>,
    installed: RwLock<Vec<CompiledRegion>>,
}

impl std::fmt::Debug for CodeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let installed = read_lock(&self.installed).len();
        f.debug_struct("CodeCache")
            .field("installed", &installed)
            .finish_non_exhaustive()
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl Default for CodeCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        let slots: Vec<AtomicU64> = (0..NATIVE_REGION_SIZE).map(|_| AtomicU64::new(0)).collect();
        Self {
            slots: slots.into_boxed_slice(),
            installed: RwLock::new(Vec::new()),
        }
    }

    #[inline]
    fn index(pc: u32) -> usize {
        pc as usize % NATIVE_REGION_SIZE
    }

    /// Whether a native entry is published for `pc`.
    #[inline]
    pub fn contains(&self, pc: u32) -> bool {
        self.slots[Self::index(pc)].load(Ordering::Acquire) != 0
    }

    /// Publishes a compiled region. Returns `false` when the slot is
    /// already taken (each entry is installed at most once).
    pub fn install(&self, region: CompiledRegion) -> bool {
        let idx = Self::index(region.entry());
        let mut installed = write_lock(&self.installed);
        if self.slots[idx].load(Ordering::Relaxed) != 0 {
            return false;
        }
        installed.push(region);
        let handle = installed.len() as u64;
        self.slots[idx].store(handle, Ordering::Release);
        true
    }

    /// Fetches the installed region for `pc`, verifying the entry address
    /// (distinct PCs can share a slot through the modulo).
    pub fn lookup(&self, pc: u32) -> Option<CompiledRegion> {
        let handle = self.slots[Self::index(pc)].load(Ordering::Acquire);
        if handle == 0 {
            return None;
        }
        let installed = read_lock(&self.installed);
        let region = installed.get(handle as usize - 1)?;
        (region.entry() == pc).then(|| region.clone())
    }

    /// Number of installed regions.
    pub fn len(&self) -> usize {
        read_lock(&self.installed).len()
    }

    /// Whether nothing has been installed yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
