//! xdata keys recognized at the child-call boundary (spec §6 table).

/// request: set on mknod/create; read on every lookup/stat.
pub const XATTR_BLOCK_SIZE: &str = "trusted.glusterfs.shard.block-size";
/// request: read on stat/lookup to obtain sharded size; written via
/// add-array xattrop.
pub const XATTR_FILE_SIZE: &str = "trusted.glusterfs.shard.file-size";
/// request, 4-byte marker: ask the child to update [amc]time atomically
/// with the write.
pub const WRITE_UPDATE_ATOMIC: &str = "WRITE_UPDATE_ATOMIC";
/// legacy name for the same request.
pub const GLUSTERFS_WRITE_UPDATE_ATOMIC: &str = "GLUSTERFS_WRITE_UPDATE_ATOMIC";
/// request: ask the child to report the file's block count in the reply.
pub const GET_FILE_BLOCK_COUNT: &str = "GET_FILE_BLOCK_COUNT";
/// request: 16-byte UUID to be assigned to a freshly created inode.
pub const GFID_REQ: &str = "gfid-req";
/// reply: full stat snapshots.
pub const GF_PRESTAT: &str = "GF_PRESTAT";
pub const GF_POSTSTAT: &str = "GF_POSTSTAT";
/// stored on a `.remove_me` marker: the base file's path at the time it
/// was unlinked, so the background worker can re-check whether a
/// re-link raced the deletion (§4.G step (d)).
pub const REMOVE_ME_ORIG_PATH: &str = "trusted.glusterfs.shard.remove-me.orig-path";
