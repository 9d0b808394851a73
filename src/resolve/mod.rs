//! Shard resolver (spec §4.D): given a base file and a logical byte
//! range, produce the ordered array of participant shard handles,
//! creating missing ones along the way.
//!
//! Grounded on the teacher's fan-out dispatch pattern in
//! `controller/*` (resolve-then-fan-out-then-barrier), generalized from
//! HTTP upstream calls to child-layer `lookup`/`mknod` calls joined with
//! `futures::future::join_all`.

#[cfg(test)]
mod resolve_test;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tracing::debug;

use crate::child::Child;
use crate::dict::Dict;
use crate::error::{Result, ShardError};
use crate::iatt::Gfid;
use crate::inode::InodeCtxStore;
use crate::lru::ShardLru;
use crate::xdata;

/// The operation driving a resolve, per §4.D step 2-3 branching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Read,
    Write,
    /// `fallocate` with a mode that must materialize shards (not a hole).
    Allocate,
    Truncate,
}

/// The reserved client pid identifying the split-brain recovery tool
/// (§4.D "Policies"): ops from this pid bypass sharding entirely and
/// forward to the child unchanged, same as an unsharded (`block_size ==
/// 0`) file.
pub const GSYNCD_PID: i64 = -1;

/// Per-call flags a higher translator would normally carry on the fd/frame
/// (§4.D "Policies"): whether the write should append at the base file's
/// current `ia_size` instead of the caller's offset, and the requesting
/// client's pid (checked against [`GSYNCD_PID`] for the sharding bypass).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestFlags {
    pub append: bool,
    pub pid: i64,
}

impl RequestFlags {
    pub fn bypasses_sharding(&self) -> bool {
        self.pid == GSYNCD_PID
    }
}

/// One resolved participant (§4.D output: "an array of `num_blocks`
/// owning inode references").
#[derive(Debug, Clone)]
pub struct ResolvedShard {
    pub block_no: u64,
    pub path: PathBuf,
    pub gfid: Gfid,
    /// True if this slot already existed before this resolve call.
    pub pre_existing: bool,
}

/// `.shard/<gfid>.<n>` naming (spec §3 "Shard naming").
pub fn shard_relpath(base_gfid: Gfid, block_no: u64) -> PathBuf {
    PathBuf::from(".shard").join(format!("{}.{}", base_gfid, block_no))
}

pub fn remove_me_relpath(base_gfid: Gfid) -> PathBuf {
    PathBuf::from(".shard").join(".remove_me").join(base_gfid.to_string())
}

pub struct Resolver {
    child: Arc<dyn Child>,
    inode_ctx: Arc<InodeCtxStore>,
    lru: Arc<Mutex<ShardLru>>,
    shard_dir_ready: std::sync::atomic::AtomicBool,
    remove_me_dir_ready: std::sync::atomic::AtomicBool,
    mkdir_lock: tokio::sync::Mutex<()>,
}

impl Resolver {
    pub fn new(child: Arc<dyn Child>, inode_ctx: Arc<InodeCtxStore>, lru: Arc<Mutex<ShardLru>>) -> Self {
        Self {
            child,
            inode_ctx,
            lru,
            shard_dir_ready: std::sync::atomic::AtomicBool::new(false),
            remove_me_dir_ready: std::sync::atomic::AtomicBool::new(false),
            mkdir_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Ensures `.shard` exists, tolerating a racing `mkdir` from another
    /// caller (§4.D step 4).
    pub async fn ensure_shard_dir(&self) -> Result<()> {
        if self.shard_dir_ready.load(std::sync::atomic::Ordering::Acquire) {
            return Ok(());
        }
        let _guard = self.mkdir_lock.lock().await;
        if self.shard_dir_ready.load(std::sync::atomic::Ordering::Acquire) {
            return Ok(());
        }
        match self.child.mkdir(Path::new(".shard"), 0o755).await {
            Ok(_) => {}
            Err(ShardError::Exists) => {
                debug!(".shard already exists, reusing");
            }
            Err(e) => return Err(e),
        }
        self.shard_dir_ready.store(true, std::sync::atomic::Ordering::Release);
        Ok(())
    }

    /// Ensures `.shard/.remove_me/` exists (same lazy-mkdir contract).
    pub async fn ensure_remove_me_dir(&self) -> Result<()> {
        self.ensure_shard_dir().await?;
        if self.remove_me_dir_ready.load(std::sync::atomic::Ordering::Acquire) {
            return Ok(());
        }
        let _guard = self.mkdir_lock.lock().await;
        if self.remove_me_dir_ready.load(std::sync::atomic::Ordering::Acquire) {
            return Ok(());
        }
        match self.child.mkdir(&PathBuf::from(".shard").join(".remove_me"), 0o755).await {
            Ok(_) => {}
            Err(ShardError::Exists) => {}
            Err(e) => return Err(e),
        }
        self.remove_me_dir_ready.store(true, std::sync::atomic::Ordering::Release);
        Ok(())
    }

    /// Computes `(first_block, last_block, num_blocks)` per §4.D.
    pub fn block_range(offset: u64, len: u64, block_size: u64) -> (u64, u64, u64) {
        let first_block = offset / block_size;
        let last_block = if len == 0 { first_block } else { (offset + len - 1) / block_size };
        (first_block, last_block, last_block - first_block + 1)
    }

    /// Resolves every shard in `[first_block, last_block]`, creating
    /// missing ones when `kind` calls for it (§4.D steps 1-7).
    pub async fn resolve_range(
        &self,
        base_gfid: Gfid,
        first_block: u64,
        last_block: u64,
        block_size: u64,
        mode: u32,
        kind: OpKind,
    ) -> Result<Vec<ResolvedShard>> {
        if last_block == 0 {
            // Only block 0 (the base file itself) participates.
            return Ok(vec![]);
        }
        self.ensure_shard_dir().await?;

        let lo = first_block.max(1);
        let lookups = join_all((lo..=last_block).map(|n| {
            let child = self.child.clone();
            async move {
                let path = shard_relpath(base_gfid, n);
                let res = child.lookup(&path, &Dict::new(0)).await;
                (n, path, res)
            }
        }))
        .await;

        let mut resolved = Vec::with_capacity(lookups.len());
        let mut to_create = Vec::new();
        for (n, path, res) in lookups {
            match res {
                Ok((iatt, _)) => {
                    resolved.push(ResolvedShard { block_no: n, path, gfid: iatt.gfid, pre_existing: true });
                }
                Err(ShardError::NotFound) => {
                    if matches!(kind, OpKind::Write | OpKind::Allocate) {
                        to_create.push((n, path));
                    }
                    // Reads/truncates treat a missing shard as a hole; caller skips it.
                }
                Err(e) => return Err(e),
            }
        }

        if !to_create.is_empty() {
            let created = join_all(to_create.into_iter().map(|(n, path)| {
                let child = self.child.clone();
                async move {
                    let xdata = Dict::new(1);
                    xdata.set(xdata::XATTR_BLOCK_SIZE, crate::dict::Value::uint64(block_size));
                    let new_gfid = Gfid::new_v4();
                    xdata.set(xdata::GFID_REQ, crate::dict::Value::uuid(new_gfid));
                    match child.mknod(&path, mode, 0, &xdata).await {
                        Ok(iatt) => Ok((n, path, iatt.gfid)),
                        Err(ShardError::Exists) => {
                            // Racing creator won (§7 "exists"); re-lookup and absorb.
                            let (iatt, _) = child.lookup(&path, &Dict::new(0)).await?;
                            Ok((n, path, iatt.gfid))
                        }
                        Err(e) => Err(e),
                    }
                }
            }))
            .await;

            for r in created {
                let (n, path, gfid) = r?;
                resolved.push(ResolvedShard { block_no: n, path, gfid, pre_existing: false });
            }
        }

        resolved.sort_by_key(|r| r.block_no);

        for r in &resolved {
            let cell = self.inode_ctx.get_or_create(r.gfid, r.path.clone());
            *cell.shard_of.lock() = Some((base_gfid, r.block_no));
            let victim = self.lru.lock().touch(r.gfid);
            if let Some(victim) = victim {
                self.evict(victim).await;
            }
        }

        Ok(resolved)
    }

    /// Applies the §4.C eviction policy to a victim selected by the LRU:
    /// forget it outright if it has no fsync work pending, otherwise fsync
    /// it before dropping the context. Either way the victim leaves the
    /// LRU list — it's what keeps the list itself bounded at `lru_limit`.
    async fn evict(&self, victim: Gfid) {
        self.lru.lock().forget(victim);
        if let Some(cell) = self.inode_ctx.get(victim) {
            if cell.has_fsync_pending() {
                debug!(?victim, "LRU eviction of a shard with fsync pending");
                let path = cell.path.lock().clone();
                if self.child.fsync(&path).await.is_ok() {
                    cell.clear_fsync_needed();
                }
            }
            self.inode_ctx.forget(victim);
        }
    }

    pub fn inode_ctx(&self) -> &InodeCtxStore {
        &self.inode_ctx
    }

    pub fn lru(&self) -> &Mutex<ShardLru> {
        &self.lru
    }
}
