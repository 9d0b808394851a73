//! Unlink / rename critical section (spec §4.F): moves a base file into
//! a `.remove_me` marker directory under a per-gfid lock so that a
//! background worker can delete its shards without racing a concurrent
//! unlink of the same gfid.
//!
//! Grounded on the `with_inodelk`/`with_entrylk` guarded-acquisition
//! helpers in `child/mod.rs` (§9 "guarded acquisition pattern").

#[cfg(test)]
mod remove_test;

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::child::{with_entrylk, with_inodelk};
use crate::dict::{Dict, Value};
use crate::error::Result;
use crate::iatt::Iatt;
use crate::translator::{maybe_launch_gc, ShardCore, LOCK_DOMAIN};
use crate::xdata;

/// Lays the crash-recovery marker for `gfid` inside `.shard/.remove_me/`,
/// carrying the base's logical size and block size (§4.F step 4,
/// §4.G "Read the base size from the marker's size xattr").
async fn lay_marker(core: &ShardCore, base: &Iatt, orig_path: &Path, logical_size: u64, block_size: u64) -> Result<()> {
    core.resolver.ensure_remove_me_dir().await?;
    let marker_path = crate::resolve::remove_me_relpath(base.gfid);

    let xdata = Dict::new(1);
    xdata.set(xdata::XATTR_BLOCK_SIZE, Value::uint64(block_size));
    match core.child.mknod(&marker_path, 0o600, 0, &xdata).await {
        Ok(_) => {}
        Err(crate::error::ShardError::Exists) => {
            debug!(gfid = %base.gfid, "remove_me marker already exists");
        }
        Err(e) => return Err(e),
    }

    core.child
        .setxattr(&marker_path, xdata::REMOVE_ME_ORIG_PATH, orig_path.to_string_lossy().as_bytes())
        .await?;

    core.child
        .xattrop_add_array(&marker_path, xdata::XATTR_FILE_SIZE, &[logical_size as i64, 0, 0, 0])
        .await
}

/// Unlink (spec §4.F): forwards directly when the base is still
/// hard-linked elsewhere; otherwise lays the marker and signals G.
pub async fn unlink(core: &Arc<ShardCore>, path: &Path) -> Result<Dict> {
    let marker_dir = core.remove_me_dir();

    with_inodelk(&*core.child, LOCK_DOMAIN, path, async {
        let base = core.refresh_base(path).await?;

        if base.stat.nlink > 1 {
            return core.child.unlink(path, &Dict::new(0)).await;
        }

        let basename = base.gfid.to_string();
        let result = with_entrylk(&*core.child, LOCK_DOMAIN, &marker_dir, &basename, async {
            lay_marker(core, &base.stat, path, base.logical_size, base.block_size).await?;
            let reply = core.child.unlink(path, &Dict::new(0)).await?;
            Ok(reply)
        })
        .await?;

        match result {
            Some(reply) => {
                core.inode_ctx.forget(base.gfid);
                maybe_launch_gc(core.clone());
                Ok(reply)
            }
            None => {
                warn!(gfid = %base.gfid, "unlink: entrylk busy, another worker owns this gfid");
                Err(crate::error::ShardError::Conflict)
            }
        }
    })
    .await
}

/// Rename (spec §4.F step 5): if `to` already exists and is sharded, its
/// shards are queued for deletion the same way before the rename
/// overwrites it.
pub async fn rename(core: &Arc<ShardCore>, from: &Path, to: &Path) -> Result<Iatt> {
    let marker_dir = core.remove_me_dir();

    with_inodelk(&*core.child, LOCK_DOMAIN, from, async {
        let mut dest_queued = false;
        if let Ok(dest) = core.refresh_base(to).await {
            if dest.block_size > 0 {
                let basename = dest.gfid.to_string();
                let _ = with_entrylk(&*core.child, LOCK_DOMAIN, &marker_dir, &basename, async {
                    lay_marker(core, &dest.stat, to, dest.logical_size, dest.block_size).await
                })
                .await;
                core.inode_ctx.forget(dest.gfid);
                dest_queued = true;
            }
        }

        let stat = core.child.rename(from, to).await?;
        if dest_queued {
            maybe_launch_gc(core.clone());
        }
        core.invalidate_base(stat.gfid);
        Ok(stat)
    })
    .await
}
