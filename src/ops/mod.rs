//! Write / read / truncate / fallocate composite operations (spec §4.E),
//! built on the resolver (§4.D). Each function fans out over the
//! resolved shard array and joins replies with `futures::future::join_all`,
//! mirroring the teacher's fan-out-then-combine dispatch in `controller/`.


use std::path::Path;

use futures::future::join_all;

use crate::child::FallocateMode;
use crate::dict::Dict;
use crate::error::{Result, ShardError};
use crate::iatt::Iatt;
use crate::resolve::{OpKind, RequestFlags, Resolver};
use crate::translator::ShardCore;
use crate::xdata;

/// Per-shard accumulator combined arrival-order-independently (§5
/// "Per-operation ordering").
#[derive(Default)]
struct WriteAccumulator {
    written_size: u64,
    delta_blocks: i64,
    delta_size: i64,
}

fn writev_xdata() -> Dict {
    let xdata = Dict::new(1);
    xdata.set(xdata::WRITE_UPDATE_ATOMIC, crate::dict::Value::uint32(1));
    xdata
}

/// Applies an atomic size/block-count delta to the base file's
/// `file-size` xattr (§3 "Size attribute", §4.E step 5). Skipped when
/// both deltas are zero.
async fn apply_size_delta(core: &ShardCore, base_path: &Path, delta_size: i64, delta_blocks: i64) -> Result<()> {
    if delta_size == 0 && delta_blocks == 0 {
        return Ok(());
    }
    // Words 2 and 4 are reserved and must be preserved, never
    // re-zeroed, on forward-compatible readers (§9 open question c).
    core.child
        .xattrop_add_array(base_path, xdata::XATTR_FILE_SIZE, &[delta_size, 0, delta_blocks, 0])
        .await
}

/// Write (and fallocate/zerofill/discard share this shape per §4.E).
pub async fn write(core: &ShardCore, path: &Path, offset: u64, data: &[u8], flags: RequestFlags) -> Result<Iatt> {
    let base = core.refresh_base(path).await?;

    if base.block_size == 0 || flags.bypasses_sharding() {
        // Not sharded, or gsyncd split-brain recovery (§4.D "Policies"):
        // passed through untouched either way.
        let (_, post) = core.child.writev(path, offset, data, &writev_xdata()).await?;
        return Ok(post);
    }

    // O_APPEND redirects the offset to the base file's current logical
    // size before any range is computed (§4.D "Policies").
    let offset = if flags.append { base.logical_size } else { offset };

    let (first_block, last_block, _) = Resolver::block_range(offset, data.len() as u64, base.block_size);
    core.resolver.ensure_shard_dir().await?;
    let shards = core
        .resolver
        .resolve_range(base.gfid, first_block, last_block, base.block_size, base.stat.mode, OpKind::Write)
        .await?;

    let mut acc = WriteAccumulator::default();
    let mut last_post = base.stat;

    // Slot 0 (the base file) always participates when `first_block == 0`.
    if first_block == 0 {
        let shard_len = iovec_subset_len(0, offset, data.len() as u64, base.block_size);
        let (pre, post) = core.child.writev(path, offset, &data[..shard_len as usize], &writev_xdata()).await?;
        acc.written_size += shard_len;
        acc.delta_blocks += post.blocks as i64 - pre.blocks as i64;
        acc.delta_size += post.size as i64 - pre.size as i64;
        last_post = post;
    }

    let results = join_all(shards.iter().map(|shard| {
        let core = &*core;
        async move {
            let shard_offset = offset.saturating_sub(shard.block_no * base.block_size);
            let vec_offset = shard.block_no * base.block_size - offset.min(shard.block_no * base.block_size);
            let shard_len = iovec_subset_len(shard.block_no, offset, data.len() as u64, base.block_size);
            if shard_len == 0 {
                return Ok(None);
            }
            let slice = &data[vec_offset as usize..(vec_offset + shard_len) as usize];
            let within_block_offset = shard_offset % base.block_size;
            let (pre, post) = core.child.writev(&shard.path, within_block_offset, slice, &writev_xdata()).await?;
            // This shard now has unsynced writes; the LRU must not evict it
            // silently until a subsequent fsync clears the counter (§4.C).
            if let Some(cell) = core.inode_ctx.get(shard.gfid) {
                cell.bump_fsync_needed();
            }
            Ok::<_, ShardError>(Some((shard_len, pre, post)))
        }
    }))
    .await;

    for r in results {
        if let Some((len, pre, post)) = r? {
            acc.written_size += len;
            acc.delta_blocks += post.blocks as i64 - pre.blocks as i64;
            acc.delta_size += post.size as i64 - pre.size as i64;
            last_post = post;
        }
    }

    // The logical size grows to cover whatever this write touched, not
    // merely the sum of each participant's physical growth — a write
    // that lands entirely inside a hole still extends `ia_size` up to
    // `offset + len` (§8 property 1 "size conservation").
    let new_logical_size = base.logical_size.max(offset + data.len() as u64);
    let delta_size = new_logical_size as i64 - base.logical_size as i64;
    apply_size_delta(core, path, delta_size, acc.delta_blocks).await?;
    core.invalidate_base(base.gfid);
    let _ = acc.written_size;
    let _ = acc.delta_size;
    last_post.size = new_logical_size;
    Ok(last_post)
}

fn iovec_subset_len(block_no: u64, offset: u64, total_len: u64, block_size: u64) -> u64 {
    let block_start = block_no * block_size;
    let block_end = block_start + block_size;
    let range_start = offset.max(block_start);
    let range_end = (offset + total_len).min(block_end);
    range_end.saturating_sub(range_start)
}

/// Read (spec §4.E "Read"): missing shards are holes, not errors.
pub async fn read(core: &ShardCore, path: &Path, offset: u64, len: u64, flags: RequestFlags) -> Result<Vec<u8>> {
    let base = core.refresh_base(path).await?;

    if flags.bypasses_sharding() {
        return core.child.readv(path, offset, len as usize).await;
    }

    if offset >= base.logical_size {
        return Ok(Vec::new());
    }
    let len = len.min(base.logical_size - offset);

    if base.block_size == 0 {
        return core.child.readv(path, offset, len as usize).await;
    }

    let (first_block, last_block, _) = Resolver::block_range(offset, len, base.block_size);
    let shards = core
        .resolver
        .resolve_range(base.gfid, first_block, last_block, base.block_size, base.stat.mode, OpKind::Read)
        .await?;

    let mut buf = vec![0u8; len as usize];

    if first_block == 0 {
        let shard_len = iovec_subset_len(0, offset, len, base.block_size);
        if shard_len > 0 {
            let data = core.child.readv(path, offset, shard_len as usize).await?;
            buf[..data.len()].copy_from_slice(&data);
        }
    }

    let reads = join_all(shards.iter().map(|shard| {
        let core = &*core;
        async move {
            let shard_len = iovec_subset_len(shard.block_no, offset, len, base.block_size);
            if shard_len == 0 {
                return Ok(None);
            }
            let block_start = shard.block_no * base.block_size;
            let within_block_offset = offset.max(block_start) - block_start;
            let vec_offset = block_start + within_block_offset - offset;
            match core.child.readv(&shard.path, within_block_offset, shard_len as usize).await {
                Ok(data) => Ok::<_, ShardError>(Some((vec_offset, data))),
                Err(ShardError::NotFound) => Ok(None), // hole: region stays zero
                Err(e) => Err(e),
            }
        }
    }))
    .await;

    for r in reads {
        if let Some((vec_offset, data)) = r? {
            let end = (vec_offset as usize + data.len()).min(buf.len());
            buf[vec_offset as usize..end].copy_from_slice(&data[..end - vec_offset as usize]);
        }
    }

    Ok(buf)
}

/// Truncate (spec §4.E "Truncate").
pub async fn truncate(core: &ShardCore, path: &Path, new_size: u64, flags: RequestFlags) -> Result<Iatt> {
    let base = core.refresh_base(path).await?;

    if new_size == base.logical_size {
        return Ok(base.stat);
    }

    if base.block_size == 0 || flags.bypasses_sharding() {
        let (_, post) = core.child.truncate(path, new_size).await?;
        return Ok(post);
    }

    if new_size > base.logical_size {
        // Hole fill: only the size xattr changes, no shard is touched.
        apply_size_delta(core, path, new_size as i64 - base.logical_size as i64, 0).await?;
        core.invalidate_base(base.gfid);
        let mut stat = base.stat;
        stat.size = new_size;
        return Ok(stat);
    }

    let first_block = if new_size == 0 { 0 } else { (new_size - 1) / base.block_size };
    let last_block = if base.logical_size == 0 { 0 } else { (base.logical_size - 1) / base.block_size };

    let mut delta_blocks: i64 = 0;

    if first_block == last_block {
        let trunc_size = new_size % base.block_size;
        if first_block == 0 {
            let (pre, post) = core.child.truncate(path, trunc_size).await?;
            delta_blocks += post.blocks as i64 - pre.blocks as i64;
        } else {
            let shard_path = crate::resolve::shard_relpath(base.gfid, first_block);
            match core.child.truncate(&shard_path, trunc_size).await {
                Ok((pre, post)) => delta_blocks += post.blocks as i64 - pre.blocks as i64,
                Err(ShardError::NotFound) => {}
                Err(e) => return Err(e),
            }
        }
    } else {
        let block_count_req = Dict::new(1);
        block_count_req.set(xdata::GET_FILE_BLOCK_COUNT, crate::dict::Value::uint32(1));

        let unlinks = join_all(((first_block + 1)..=last_block).map(|n| {
            let core = &*core;
            let req = block_count_req.clone();
            async move {
                let shard_path = crate::resolve::shard_relpath(base.gfid, n);
                match core.child.unlink(&shard_path, &req).await {
                    Ok(reply) => {
                        let blocks = reply
                            .get(xdata::GET_FILE_BLOCK_COUNT)
                            .and_then(|v| v.as_uint64(xdata::GET_FILE_BLOCK_COUNT).ok())
                            .unwrap_or(0);
                        Ok::<_, ShardError>(blocks)
                    }
                    Err(ShardError::NotFound) => Ok(0),
                    Err(e) => Err(e),
                }
            }
        }))
        .await;

        for r in unlinks {
            delta_blocks -= r? as i64;
        }

        let trunc_size = new_size % base.block_size;
        if first_block == 0 {
            let (pre, post) = core.child.truncate(path, trunc_size).await?;
            delta_blocks += post.blocks as i64 - pre.blocks as i64;
        } else {
            let shard_path = crate::resolve::shard_relpath(base.gfid, first_block);
            match core.child.truncate(&shard_path, trunc_size).await {
                Ok((pre, post)) => delta_blocks += post.blocks as i64 - pre.blocks as i64,
                Err(ShardError::NotFound) => {}
                Err(e) => return Err(e),
            }
        }
    }

    apply_size_delta(core, path, new_size as i64 - base.logical_size as i64, delta_blocks).await?;
    core.invalidate_base(base.gfid);
    let mut stat = base.stat;
    stat.size = new_size;
    Ok(stat)
}

/// Fallocate/discard/zerofill (spec §4.E "Fallocate"): same shape as
/// write with no user iovec; only two modes are accepted.
pub async fn fallocate(
    core: &ShardCore,
    path: &Path,
    mode: FallocateMode,
    offset: u64,
    len: u64,
    flags: RequestFlags,
) -> Result<Iatt> {
    if !matches!(mode, FallocateMode::KeepSizePunchHole | FallocateMode::ZeroRange) {
        return Err(ShardError::NotSupported("unsupported fallocate mode".into()));
    }

    let base = core.refresh_base(path).await?;

    if base.block_size == 0 || flags.bypasses_sharding() {
        let (_, post) = core.child.fallocate(path, mode, offset, len).await?;
        return Ok(post);
    }

    let (first_block, last_block, _) = Resolver::block_range(offset, len, base.block_size);
    let kind = if base.logical_size == 0 { OpKind::Allocate } else { OpKind::Write };
    let shards = core
        .resolver
        .resolve_range(base.gfid, first_block, last_block, base.block_size, base.stat.mode, kind)
        .await?;

    let mut delta_blocks: i64 = 0;
    let mut last_post = base.stat;

    if first_block == 0 {
        let shard_len = iovec_subset_len(0, offset, len, base.block_size);
        if shard_len > 0 {
            let (pre, post) = core.child.fallocate(path, mode, offset, shard_len).await?;
            delta_blocks += post.blocks as i64 - pre.blocks as i64;
            last_post = post;
        }
    }

    let results = join_all(shards.iter().map(|shard| {
        let core = &*core;
        async move {
            let shard_len = iovec_subset_len(shard.block_no, offset, len, base.block_size);
            if shard_len == 0 {
                return Ok(None);
            }
            let block_start = shard.block_no * base.block_size;
            let within_block_offset = offset.max(block_start) - block_start;
            let (pre, post) = core.child.fallocate(&shard.path, mode, within_block_offset, shard_len).await?;
            if let Some(cell) = core.inode_ctx.get(shard.gfid) {
                cell.bump_fsync_needed();
            }
            Ok::<_, ShardError>(Some((pre, post)))
        }
    }))
    .await;

    for r in results {
        if let Some((pre, post)) = r? {
            delta_blocks += post.blocks as i64 - pre.blocks as i64;
            last_post = post;
        }
    }

    // `KEEP_SIZE|PUNCH_HOLE` never changes `ia_size` by definition;
    // `ZERO_RANGE` extends it like a write would (§4.E, §8 property 1).
    let new_logical_size = match mode {
        FallocateMode::KeepSizePunchHole => base.logical_size,
        FallocateMode::ZeroRange => base.logical_size.max(offset + len),
    };
    let delta_size = new_logical_size as i64 - base.logical_size as i64;
    apply_size_delta(core, path, delta_size, delta_blocks).await?;
    core.invalidate_base(base.gfid);
    last_post.size = new_logical_size;
    Ok(last_post)
}
