//! Orchestrator tying the dictionary, inode-context store, LRU, resolver,
//! composite ops and the unlink/rename critical section together behind
//! one `Arc<dyn Child>` collaborator (spec §2 "Control flow").
//!
//! Grounded on the teacher's top-level `Cache` object (`db/storage/`):
//! one struct holding every subsystem, constructed once from `Config` and
//! handed to the ops/remove/gc free-function modules.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex as PlMutex;
use tracing::{debug, info};

use crate::child::Child;
use crate::config::{Config, ConfigTrait};
use crate::dict::Dict;
use crate::error::Result;
use crate::iatt::{Gfid, Iatt};
use crate::inode::InodeCtxStore;
use crate::lru::ShardLru;
use crate::resolve::Resolver;
use crate::xdata;

/// Lock domain string used for every inodelk/entrylk acquired by the
/// critical section (§4.F: "the lock domain string is the translator's
/// own identity").
pub const LOCK_DOMAIN: &str = "shardfs-core";

/// Background-deletion state bits (spec §4.G), guarded by the LRU lock
/// per §5 "Shared resources".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GcState {
    None = 0,
    Launching = 1,
    InProgress = 2,
}

pub struct ShardCore {
    pub child: Arc<dyn Child>,
    pub config: Config,
    pub resolver: Resolver,
    pub inode_ctx: Arc<InodeCtxStore>,
    gc_state: AtomicU8,
}

/// Cached view of a base file's sharding-relevant state (§4.B).
pub struct BaseInfo {
    pub gfid: Gfid,
    pub stat: Iatt,
    pub block_size: u64,
    pub logical_size: u64,
}

impl ShardCore {
    pub fn new(child: Arc<dyn Child>, config: Config) -> Self {
        let inode_ctx = Arc::new(InodeCtxStore::new());
        let lru = Arc::new(PlMutex::new(ShardLru::new(config.shard().lru_limit as usize)));
        let resolver = Resolver::new(child.clone(), inode_ctx.clone(), lru);
        Self { child, config, resolver, inode_ctx, gc_state: AtomicU8::new(GcState::None as u8) }
    }

    /// Refreshes the base file's stat, requesting the block-size and
    /// file-size xattrs (§4.E step 1). A missing file-size xattr on an
    /// otherwise-sharded file is fatal `invalid-argument`.
    pub async fn refresh_base(&self, path: &Path) -> Result<BaseInfo> {
        let req = Dict::new(2);
        req.set(xdata::XATTR_BLOCK_SIZE, crate::dict::Value::uint64(0));
        req.set(xdata::XATTR_FILE_SIZE, crate::dict::Value::uint64(0));
        let (stat, reply) = self.child.stat(path, &req).await?;

        let block_size = match reply.get(xdata::XATTR_BLOCK_SIZE) {
            Some(v) => v.as_uint64(xdata::XATTR_BLOCK_SIZE).unwrap_or(0),
            None => 0,
        };
        let logical_size = if block_size == 0 {
            stat.size
        } else {
            match reply.get(xdata::XATTR_FILE_SIZE) {
                Some(v) => v.as_uint64(xdata::XATTR_FILE_SIZE)?,
                None => {
                    return Err(crate::error::ShardError::InvalidArgument(
                        "sharded file missing file-size xattr".into(),
                    ))
                }
            }
        };

        let cell = self.inode_ctx.get_or_create(stat.gfid, path.to_path_buf());
        cell.block_size.store(block_size, Ordering::Release);
        cell.mark_refreshed(stat);

        Ok(BaseInfo { gfid: stat.gfid, stat, block_size, logical_size })
    }

    pub fn invalidate_base(&self, gfid: Gfid) {
        if let Some(cell) = self.inode_ctx.get(gfid) {
            cell.invalidate();
        }
    }

    /// Applies the §4.G state machine's launch signal. Returns `true` if
    /// this call is the one that must spawn the worker task.
    pub fn gc_request_launch(&self) -> bool {
        self.gc_state
            .compare_exchange(
                GcState::None as u8,
                GcState::Launching as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Worker enters its loop: transitions LAUNCHING/NONE to IN_PROGRESS.
    pub fn gc_enter_progress(&self) {
        self.gc_state.store(GcState::InProgress as u8, Ordering::Release);
    }

    /// End of a pass: if state is still IN_PROGRESS, transition to NONE
    /// and report "done"; if a launch request landed mid-pass, report
    /// "run again" without resetting to NONE.
    pub fn gc_end_pass(&self) -> bool {
        match self.gc_state.compare_exchange(
            GcState::InProgress as u8,
            GcState::None as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                debug!("background deletion worker idling");
                false
            }
            Err(_) => true,
        }
    }

    pub fn remove_me_dir(&self) -> PathBuf {
        PathBuf::from(".shard").join(".remove_me")
    }
}

/// Spawns the background deletion worker if it isn't already running
/// (spec §4.G "Launch request"). No-op otherwise.
pub fn maybe_launch_gc(core: Arc<ShardCore>) {
    if core.gc_request_launch() {
        info!("launching background shard deletion worker");
        tokio::spawn(async move {
            crate::gc::run(core).await;
        });
    }
}
