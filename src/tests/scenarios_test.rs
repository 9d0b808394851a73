use std::path::Path;
use std::sync::Arc;

use crate::child::mem::MemChild;
use crate::child::Child;
use crate::config::Config;
use crate::gc;
use crate::ops;
use crate::remove;
use crate::resolve::{OpKind, RequestFlags};
use crate::translator::ShardCore;
use crate::xdata;

const BLOCK_SIZE: u64 = 16;

fn core_with_block_size(bs: u64) -> (Arc<MemChild>, Arc<ShardCore>) {
    let child = Arc::new(MemChild::new());
    let mut cfg = Config::default_for_tests();
    cfg.cache.shard.block_size = bs;
    let core = Arc::new(ShardCore::new(child.clone(), cfg));
    (child, core)
}

fn seed_sharded_base(child: &MemChild, path: &Path, bs: u64, size: u64) {
    child.seed_file(path, vec![0u8; size.min(bs) as usize]);
    child.set_xattr_sync(path, xdata::XATTR_BLOCK_SIZE, bs.to_be_bytes().to_vec());
    child.set_xattr_sync(path, xdata::XATTR_FILE_SIZE, {
        let mut b = vec![0u8; 32];
        b[0..8].copy_from_slice(&size.to_be_bytes());
        b
    });
}

#[tokio::test]
async fn write_within_first_block_leaves_no_shard_behind() {
    let (child, core) = core_with_block_size(BLOCK_SIZE);
    let path = Path::new("/f");
    seed_sharded_base(&child, path, BLOCK_SIZE, 0);

    ops::write(&core, path, 0, b"A..J12345", RequestFlags::default()).await.unwrap();

    let base = core.refresh_base(path).await.unwrap();
    assert_eq!(base.logical_size, 9);
    assert!(child.readdir(Path::new(".shard")).await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn write_past_first_block_leaves_base_sparse_with_one_byte_shard() {
    let (child, core) = core_with_block_size(BLOCK_SIZE);
    let path = Path::new("/f");
    seed_sharded_base(&child, path, BLOCK_SIZE, 0);

    ops::write(&core, path, BLOCK_SIZE, b"X", RequestFlags::default()).await.unwrap();

    let base = core.refresh_base(path).await.unwrap();
    assert_eq!(base.logical_size, BLOCK_SIZE + 1);
    let hole = ops::read(&core, path, 0, BLOCK_SIZE, RequestFlags::default()).await.unwrap();
    assert_eq!(hole, vec![0u8; BLOCK_SIZE as usize]);

    let shard1 = crate::resolve::shard_relpath(base.gfid, 1);
    assert_eq!(child.readv(&shard1, 0, 1).await.unwrap(), b"X");
}

#[tokio::test]
async fn read_spanning_base_and_shard_reads_the_right_slices() {
    let (child, core) = core_with_block_size(BLOCK_SIZE);
    let path = Path::new("/f");
    seed_sharded_base(&child, path, BLOCK_SIZE, 3 * BLOCK_SIZE);

    ops::write(&core, path, BLOCK_SIZE - 4, b"aaaabbbb", RequestFlags::default()).await.unwrap();

    let out = ops::read(&core, path, BLOCK_SIZE - 4, 8, RequestFlags::default()).await.unwrap();
    assert_eq!(out, b"aaaabbbb");
    let tail_from_base = ops::read(&core, path, BLOCK_SIZE - 4, 4, RequestFlags::default()).await.unwrap();
    assert_eq!(tail_from_base, b"aaaa");
    let head_from_shard = ops::read(&core, path, BLOCK_SIZE, 4, RequestFlags::default()).await.unwrap();
    assert_eq!(head_from_shard, b"bbbb");
}

#[tokio::test]
async fn truncate_reclaims_trailing_shards_and_reports_base_blocks_only() {
    let (child, core) = core_with_block_size(BLOCK_SIZE);
    let path = Path::new("/f");
    seed_sharded_base(&child, path, BLOCK_SIZE, 0);
    ops::write(&core, path, BLOCK_SIZE, b"Y", RequestFlags::default()).await.unwrap();
    ops::write(&core, path, 2 * BLOCK_SIZE, b"Z", RequestFlags::default()).await.unwrap();
    let base = core.refresh_base(path).await.unwrap();
    let shard1 = crate::resolve::shard_relpath(base.gfid, 1);
    let shard2 = crate::resolve::shard_relpath(base.gfid, 2);
    assert!(child.readv(&shard1, 0, 1).await.is_ok());
    assert!(child.readv(&shard2, 0, 1).await.is_ok());

    let post = ops::truncate(&core, path, BLOCK_SIZE, RequestFlags::default()).await.unwrap();

    assert_eq!(post.size, BLOCK_SIZE);
    assert!(child.readv(&shard1, 0, 1).await.is_err());
    assert!(child.readv(&shard2, 0, 1).await.is_err());

    let (base_stat, _) = child.stat(path, &crate::dict::Dict::new(0)).await.unwrap();
    assert_eq!(base_stat.size, 0);
}

#[tokio::test]
async fn unlink_queues_background_deletion_and_reclaims_everything() {
    let (child, core) = core_with_block_size(BLOCK_SIZE);
    let path = Path::new("/f");
    seed_sharded_base(&child, path, BLOCK_SIZE, 2 * BLOCK_SIZE);
    ops::write(&core, path, BLOCK_SIZE, b"tail", RequestFlags::default()).await.unwrap();
    let base = core.refresh_base(path).await.unwrap();
    let shard1 = crate::resolve::shard_relpath(base.gfid, 1);
    assert!(child.readv(&shard1, 0, 1).await.is_ok());

    remove::unlink(&core, path).await.unwrap();
    let marker = crate::resolve::remove_me_relpath(base.gfid);
    assert!(child.getxattr(&marker, xdata::XATTR_BLOCK_SIZE).await.is_ok());

    gc::run(core.clone()).await;

    assert!(child.readv(&shard1, 0, 1).await.is_err());
    assert!(child.getxattr(&marker, xdata::XATTR_BLOCK_SIZE).await.is_err());
    assert!(child.readv(path, 0, 1).await.is_err());
}

#[tokio::test]
async fn concurrent_resolve_of_the_same_missing_shard_converges_to_one_inode() {
    let (child, core) = core_with_block_size(BLOCK_SIZE);
    let path = Path::new("/f");
    seed_sharded_base(&child, path, BLOCK_SIZE, 0);
    let base = core.refresh_base(path).await.unwrap();

    let resolver = &core.resolver;
    let (a, b) = tokio::join!(
        resolver.resolve_range(base.gfid, 7, 7, BLOCK_SIZE, 0o644, OpKind::Write),
        resolver.resolve_range(base.gfid, 7, 7, BLOCK_SIZE, 0o644, OpKind::Write),
    );
    let a = a.unwrap();
    let b = b.unwrap();
    assert_eq!(a.len(), 1);
    assert_eq!(b.len(), 1);
    assert_eq!(a[0].gfid, b[0].gfid);

    let shard7 = crate::resolve::shard_relpath(base.gfid, 7);
    assert!(child.readv(&shard7, 0, 0).await.is_ok());
    let _ = path;
}

#[tokio::test]
async fn lru_limit_bounds_the_number_of_resident_shard_contexts() {
    const LRU_LIMIT: u32 = 8;
    let (child, core) = core_with_block_size(BLOCK_SIZE);
    let path = Path::new("/f");
    seed_sharded_base(&child, path, BLOCK_SIZE, 0);
    let base = core.refresh_base(path).await.unwrap();

    let resolver = crate::resolve::Resolver::new(
        core.child.clone(),
        core.inode_ctx.clone(),
        Arc::new(parking_lot::Mutex::new(crate::lru::ShardLru::new(LRU_LIMIT as usize))),
    );

    for n in 1..=50u64 {
        resolver.resolve_range(base.gfid, n, n, BLOCK_SIZE, 0o644, OpKind::Write).await.unwrap();
        assert!(resolver.lru().lock().len() <= LRU_LIMIT as usize);
    }
}

#[tokio::test]
async fn lru_eviction_of_a_dirty_shard_fsyncs_it_first() {
    let child = Arc::new(MemChild::new());
    let mut cfg = Config::default_for_tests();
    cfg.cache.shard.block_size = BLOCK_SIZE;
    cfg.cache.shard.lru_limit = crate::config::MIN_LRU_LIMIT;
    let core = Arc::new(ShardCore::new(child.clone(), cfg));

    let path = Path::new("/f");
    seed_sharded_base(&child, path, BLOCK_SIZE, 0);

    // Write to more distinct blocks than the LRU can hold, so earlier
    // shards get evicted while still carrying unsynced writes.
    let rounds = crate::config::MIN_LRU_LIMIT as u64 + 5;
    for n in 1..=rounds {
        ops::write(&core, path, n * BLOCK_SIZE, b"d", RequestFlags::default()).await.unwrap();
    }

    assert!(child.fsync_call_count() > 0);
}

#[tokio::test]
async fn o_append_redirects_offset_to_current_logical_size() {
    let (child, core) = core_with_block_size(BLOCK_SIZE);
    let path = Path::new("/f");
    seed_sharded_base(&child, path, BLOCK_SIZE, 0);

    ops::write(&core, path, 0, b"0123456789", RequestFlags::default()).await.unwrap();

    let flags = RequestFlags { append: true, pid: 0 };
    // Caller passes an offset of 0, but append must land at the current
    // logical size (10), not overwrite the existing bytes.
    ops::write(&core, path, 0, b"X", flags).await.unwrap();

    let base = core.refresh_base(path).await.unwrap();
    assert_eq!(base.logical_size, 11);
    let out = ops::read(&core, path, 0, 11, RequestFlags::default()).await.unwrap();
    assert_eq!(out, b"0123456789X");
}

#[tokio::test]
async fn gsyncd_pid_bypasses_sharding_entirely() {
    let (child, core) = core_with_block_size(BLOCK_SIZE);
    let path = Path::new("/f");
    seed_sharded_base(&child, path, BLOCK_SIZE, 0);

    let flags = RequestFlags { append: false, pid: crate::resolve::GSYNCD_PID };
    ops::write(&core, path, BLOCK_SIZE, b"X", flags).await.unwrap();

    // No shard was created; the write landed on the base path unsharded.
    assert!(child.readdir(Path::new(".shard")).await.unwrap_or_default().is_empty());
    let out = ops::read(&core, path, BLOCK_SIZE, 1, flags).await.unwrap();
    assert_eq!(out, b"X");
}
