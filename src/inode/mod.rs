//! Inode context store (spec §3 "Inode context", §4.B): per-inode
//! bookkeeping the core keeps alongside whatever the child layer tracks
//! — cached stat, whether it needs a refresh, the owning base inode for
//! a shard, and fsync-pending bookkeeping.
//!
//! Grounded on the teacher's per-entry metadata cell pattern
//! (`db/storage/entry.rs`): a small `Arc`-shared cell behind a
//! concurrent map, created lazily on first touch and dropped via an
//! explicit `forget`.

#[cfg(test)]
mod inode_test;

use dashmap::DashMap;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::iatt::{Gfid, Iatt};

/// Stand-in for a real inode-table identity: the gfid plus the relative
/// path the core resolved it from. Two lookups of the same gfid always
/// produce the same `InodeId`.
pub type InodeId = Gfid;

/// Per-inode context cell (§3 "Inode context").
pub struct InodeCtxCell {
    pub id: InodeId,
    pub path: Mutex<PathBuf>,

    /// Shard block size in force for this file (0 if not yet known).
    pub block_size: AtomicU64,

    /// Last stat snapshot observed for this inode.
    pub cached_stat: Mutex<Option<Iatt>>,

    /// Set when the cached stat must not be trusted and should be
    /// refreshed on next use (§4.B).
    pub refresh_needed: AtomicBool,

    /// True once at least one refresh has completed for this inode.
    pub refreshed: AtomicBool,

    /// For a shard inode: the base file's gfid and this shard's block
    /// number (`None` for the base file's own context).
    pub shard_of: Mutex<Option<(Gfid, u64)>>,

    /// Number of writes against this shard inode awaiting fsync before
    /// it may be evicted from the LRU (§4.C).
    pub fsync_needed: AtomicU32,
}

impl InodeCtxCell {
    fn new(id: InodeId, path: PathBuf) -> Self {
        Self {
            id,
            path: Mutex::new(path),
            block_size: AtomicU64::new(0),
            cached_stat: Mutex::new(None),
            refresh_needed: AtomicBool::new(true),
            refreshed: AtomicBool::new(false),
            shard_of: Mutex::new(None),
            fsync_needed: AtomicU32::new(0),
        }
    }

    pub fn mark_refreshed(&self, stat: Iatt) {
        *self.cached_stat.lock() = Some(stat);
        self.refresh_needed.store(false, Ordering::Release);
        self.refreshed.store(true, Ordering::Release);
    }

    pub fn needs_refresh(&self) -> bool {
        self.refresh_needed.load(Ordering::Acquire)
    }

    pub fn invalidate(&self) {
        self.refresh_needed.store(true, Ordering::Release);
    }

    pub fn bump_fsync_needed(&self) -> u32 {
        self.fsync_needed.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn clear_fsync_needed(&self) -> u32 {
        self.fsync_needed.swap(0, Ordering::AcqRel)
    }

    pub fn has_fsync_pending(&self) -> bool {
        self.fsync_needed.load(Ordering::Acquire) > 0
    }
}

/// The inode context store: a concurrent map from `InodeId` to its
/// context cell, created lazily (§4.B).
pub struct InodeCtxStore {
    cells: DashMap<InodeId, Arc<InodeCtxCell>>,
}

impl InodeCtxStore {
    pub fn new() -> Self {
        Self { cells: DashMap::new() }
    }

    /// Returns the existing cell for `id`, or creates one rooted at
    /// `path` if this is the first time the core has seen it.
    pub fn get_or_create(&self, id: InodeId, path: impl Into<PathBuf>) -> Arc<InodeCtxCell> {
        self.cells
            .entry(id)
            .or_insert_with(|| Arc::new(InodeCtxCell::new(id, path.into())))
            .clone()
    }

    pub fn get(&self, id: InodeId) -> Option<Arc<InodeCtxCell>> {
        self.cells.get(&id).map(|e| e.clone())
    }

    /// Drops the context cell for `id`. Callers are responsible for
    /// unlinking it from the LRU first if it was tracked there.
    pub fn forget(&self, id: InodeId) {
        self.cells.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl Default for InodeCtxStore {
    fn default() -> Self {
        Self::new()
    }
}
