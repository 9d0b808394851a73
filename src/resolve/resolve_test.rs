use super::*;

#[test]
fn block_range_single_block_write() {
    let (first, last, n) = Resolver::block_range(0, 10, 64 * (1 << 20));
    assert_eq!((first, last, n), (0, 0, 1));
}

#[test]
fn block_range_spans_two_blocks() {
    let bs = 64 * (1 << 20);
    let (first, last, n) = Resolver::block_range(bs - 1, 2, bs);
    assert_eq!((first, last, n), (0, 1, 2));
}

#[test]
fn block_range_offset_past_first_block() {
    let bs = 64 * (1 << 20);
    let (first, last, n) = Resolver::block_range(bs, 1, bs);
    assert_eq!((first, last, n), (1, 1, 1));
}

#[test]
fn shard_relpath_uses_gfid_dot_block_number() {
    let gfid = Gfid::from_u128(42);
    let p = shard_relpath(gfid, 7);
    assert_eq!(p, PathBuf::from(".shard").join(format!("{}.7", gfid)));
}

#[test]
fn remove_me_relpath_is_under_remove_me_dir() {
    let gfid = Gfid::from_u128(42);
    let p = remove_me_relpath(gfid);
    assert_eq!(p, PathBuf::from(".shard/.remove_me").join(gfid.to_string()));
}
