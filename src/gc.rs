//! Background deletion worker (spec §4.G): iterates `.shard/.remove_me/`
//! and deletes every shard of each listed gfid with rate limiting,
//! driven by the `NONE → LAUNCHING → IN_PROGRESS → NONE` state machine
//! in `translator::ShardCore`.
//!
//! Grounded on the teacher's `workers/` background-task pattern: a
//! `tokio::spawn`ed loop that re-enters itself when more work lands
//! while a pass is running.


use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::config::ConfigTrait;
use crate::dict::Dict;
use crate::error::ShardError;
use crate::translator::{ShardCore, LOCK_DOMAIN};
use crate::xdata;

/// Runs passes until the state machine settles back to `NONE` (§4.G
/// "Worker enters loop").
pub async fn run(core: Arc<ShardCore>) {
    loop {
        core.gc_enter_progress();
        if let Err(e) = run_pass(&core).await {
            warn!(error = %e, "background deletion pass failed");
        }
        if !core.gc_end_pass() {
            break;
        }
    }
}

/// One pass over `.remove_me/` (§4.G steps 1-2).
async fn run_pass(core: &ShardCore) -> crate::error::Result<()> {
    let marker_dir = core.remove_me_dir();
    let entries = match core.child.readdir(&marker_dir).await {
        Ok(e) => e,
        Err(ShardError::NotFound) => return Ok(()),
        Err(e) => return Err(e),
    };

    for entry in entries {
        if entry.name == "." || entry.name == ".." {
            continue;
        }
        if let Err(e) = process_marker(core, &entry.name).await {
            warn!(marker = %entry.name, error = %e, "failed to process remove_me marker");
        }
    }
    Ok(())
}

/// Handles one marker: non-blocking entrylk, read its size/block-size,
/// delete its shards in batches of `shard-deletion-rate`, then unlink
/// the marker itself (§4.G steps 2.b-2.f).
async fn process_marker(core: &ShardCore, basename: &str) -> crate::error::Result<()> {
    let marker_dir = core.remove_me_dir();

    let token = match core.child.entrylk(LOCK_DOMAIN, &marker_dir, basename).await? {
        Some(t) => t,
        None => {
            debug!(marker = basename, "entrylk busy, another worker owns this gfid");
            return Ok(());
        }
    };

    let result = delete_marker_shards(core, &marker_dir, basename).await;

    core.child.entrylk_release(LOCK_DOMAIN, &marker_dir, basename, token).await?;
    result
}

/// §4.G step (d): the unlink/rename that laid this marker may have been
/// raced by a re-link at the same path reusing the same gfid (gfids are
/// path-derived, so re-creating a file at the original path after an
/// unlink reproduces it exactly). If the base is still there, the
/// marker is stale and must be dropped without touching any shard.
async fn base_still_present(core: &ShardCore, marker_path: &std::path::Path, base_gfid: crate::iatt::Gfid) -> crate::error::Result<bool> {
    let orig_path = match core.child.getxattr(marker_path, xdata::REMOVE_ME_ORIG_PATH).await {
        Ok(bytes) => std::path::PathBuf::from(String::from_utf8_lossy(&bytes).into_owned()),
        Err(ShardError::NotFound) => return Ok(false),
        Err(e) => return Err(e),
    };

    match core.child.lookup(&orig_path, &Dict::new(0)).await {
        Ok((iatt, _)) => Ok(iatt.gfid == base_gfid),
        Err(ShardError::NotFound) => Ok(false),
        Err(e) => Err(e),
    }
}

async fn delete_marker_shards(core: &ShardCore, marker_dir: &std::path::Path, basename: &str) -> crate::error::Result<()> {
    let marker_path = marker_dir.join(basename);
    let base_gfid: crate::iatt::Gfid = basename.parse().map_err(|_| {
        ShardError::InvalidArgument(format!("remove_me entry {basename} is not a gfid"))
    })?;

    let req = Dict::new(2);
    req.set(xdata::XATTR_FILE_SIZE, crate::dict::Value::uint64(0));
    req.set(xdata::XATTR_BLOCK_SIZE, crate::dict::Value::uint64(0));
    let (_, reply) = core.child.stat(&marker_path, &req).await?;

    let size = reply.get(xdata::XATTR_FILE_SIZE).and_then(|v| v.as_uint64(xdata::XATTR_FILE_SIZE).ok()).unwrap_or(0);
    let block_size = reply.get(xdata::XATTR_BLOCK_SIZE).and_then(|v| v.as_uint64(xdata::XATTR_BLOCK_SIZE).ok()).unwrap_or(0);

    if base_still_present(core, &marker_path, base_gfid).await? {
        debug!(gfid = %base_gfid, "remove_me marker raced by a re-link, base still present; skipping shard deletion");
        core.child.unlink(&marker_path, &Dict::new(0)).await?;
        return Ok(());
    }

    if block_size > 0 && size > 0 {
        let shard_count = size.div_ceil(block_size);
        if shard_count > 1 {
            let deletion_rate = core.config.shard().deletion_rate.max(1) as usize;
            let blocks: Vec<u64> = (1..shard_count).collect();

            stream::iter(blocks)
                .for_each_concurrent(deletion_rate, |n| {
                    let core = &*core;
                    async move {
                        let shard_path = crate::resolve::shard_relpath(base_gfid, n);
                        match core.child.unlink(&shard_path, &Dict::new(0)).await {
                            Ok(_) | Err(ShardError::NotFound) => {}
                            Err(e) => warn!(block = n, error = %e, "shard deletion failed"),
                        }
                    }
                })
                .await;
        }
    }

    core.child.unlink(&marker_path, &Dict::new(0)).await?;
    info!(gfid = %base_gfid, "shards reclaimed");
    Ok(())
}
