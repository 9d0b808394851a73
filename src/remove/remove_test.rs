use std::path::Path;
use std::sync::Arc;

use super::*;
use crate::child::mem::MemChild;
use crate::child::Child;
use crate::config::Config;

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
async fn unlink_single_link_lays_remove_me_marker() {
    let (child, core) = core_with_block_size(BLOCK_SIZE);
    let path = Path::new("/f");
    seed_sharded_base(&child, path, BLOCK_SIZE, 3 * BLOCK_SIZE);
    let base = core.refresh_base(path).await.unwrap();

    unlink(&core, path).await.unwrap();

    assert!(child.readv(path, 0, 1).await.is_err());
    let marker = crate::resolve::remove_me_relpath(base.gfid);
    assert!(child.getxattr(&marker, xdata::XATTR_BLOCK_SIZE).await.is_ok());
}

#[tokio::test]
async fn unlink_hard_linked_file_forwards_without_marker() {
    let (child, core) = core_with_block_size(BLOCK_SIZE);
    let path = Path::new("/f");
    seed_sharded_base(&child, path, BLOCK_SIZE, BLOCK_SIZE);
    let other = Path::new("/g");
    child.link(path, other).await.unwrap();
    let base = core.refresh_base(path).await.unwrap();

    unlink(&core, path).await.unwrap();

    assert!(child.readv(path, 0, 1).await.is_err());
    let marker = crate::resolve::remove_me_relpath(base.gfid);
    assert!(child.getxattr(&marker, xdata::XATTR_BLOCK_SIZE).await.is_err());
}

#[tokio::test]
async fn rename_onto_sharded_destination_queues_its_shards() {
    let (child, core) = core_with_block_size(BLOCK_SIZE);
    let from = Path::new("/from");
    let to = Path::new("/to");
    seed_sharded_base(&child, from, BLOCK_SIZE, BLOCK_SIZE);
    seed_sharded_base(&child, to, BLOCK_SIZE, 3 * BLOCK_SIZE);
    let dest_base = core.refresh_base(to).await.unwrap();

    rename(&core, from, to).await.unwrap();

    let marker = crate::resolve::remove_me_relpath(dest_base.gfid);
    assert!(child.getxattr(&marker, xdata::XATTR_BLOCK_SIZE).await.is_ok());
    assert!(child.readv(from, 0, 1).await.is_err());
    assert!(child.readv(to, 0, 1).await.is_ok());
}

#[tokio::test]
async fn rename_onto_fresh_destination_lays_no_marker() {
    let (child, core) = core_with_block_size(BLOCK_SIZE);
    let from = Path::new("/from");
    let to = Path::new("/to");
    seed_sharded_base(&child, from, BLOCK_SIZE, BLOCK_SIZE);

    let stat = rename(&core, from, to).await.unwrap();

    assert!(child.readv(to, 0, 1).await.is_ok());
    let marker = crate::resolve::remove_me_relpath(stat.gfid);
    assert!(child.getxattr(&marker, xdata::XATTR_BLOCK_SIZE).await.is_err());
}
