//! The abstract child-call surface (spec §6): everything below the
//! sharding core is an external collaborator reached through this trait.
//! §1 explicitly scopes the RPC framing loop, the POSIX brick and its
//! locks bookkeeping out of this core — `Child` is the seam at which a
//! real translator stack would splice those in.
//!
//! Grounded on the teacher's `upstream::Upstream` trait: an
//! `#[async_trait]` collaborator interface plus a test double used by
//! the core's own tests (`src/upstream/backend.rs` pattern).

pub mod demo;
#[cfg(test)]
pub mod mem;

use async_trait::async_trait;
use std::path::Path;

use crate::dict::Dict;
use crate::error::Result;
use crate::iatt::Iatt;

/// fallocate modes accepted by the core (§4.E): `KEEP_SIZE|PUNCH_HOLE`
/// and `ZERO_RANGE` are the only ones that are not rejected up front with
/// `NotSupported`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallocateMode {
    KeepSizePunchHole,
    ZeroRange,
}

/// A directory entry returned by `readdir` (§4.G).
pub struct DirEntry {
    pub name: String,
    pub gfid: Option<crate::iatt::Gfid>,
}

#[async_trait]
pub trait Child: Send + Sync {
    async fn lookup(&self, path: &Path, xdata: &Dict) -> Result<(Iatt, Dict)>;
    async fn stat(&self, path: &Path, xdata: &Dict) -> Result<(Iatt, Dict)>;
    async fn mkdir(&self, path: &Path, mode: u32) -> Result<Iatt>;
    async fn mknod(&self, path: &Path, mode: u32, rdev: u64, xdata: &Dict) -> Result<Iatt>;
    async fn unlink(&self, path: &Path, xdata: &Dict) -> Result<Dict>;
    async fn rename(&self, from: &Path, to: &Path) -> Result<Iatt>;
    async fn link(&self, from: &Path, to: &Path) -> Result<Iatt>;

    async fn readv(&self, path: &Path, offset: u64, len: usize) -> Result<Vec<u8>>;
    /// Returns `(pre, post)` stat pair (§6 `GF_PRESTAT`/`GF_POSTSTAT`).
    async fn writev(&self, path: &Path, offset: u64, data: &[u8], xdata: &Dict) -> Result<(Iatt, Iatt)>;
    async fn truncate(&self, path: &Path, size: u64) -> Result<(Iatt, Iatt)>;
    async fn fallocate(&self, path: &Path, mode: FallocateMode, offset: u64, len: u64) -> Result<(Iatt, Iatt)>;
    async fn fsync(&self, path: &Path) -> Result<()>;

    async fn getxattr(&self, path: &Path, key: &str) -> Result<Vec<u8>>;
    async fn setxattr(&self, path: &Path, key: &str, value: &[u8]) -> Result<()>;
    /// Atomic add-array xattrop primitive (§3 "Size attribute"): adds
    /// `deltas` word-by-word into the stored big-endian `u64` array,
    /// never read-modify-write from the caller's side.
    async fn xattrop_add_array(&self, path: &Path, key: &str, deltas: &[i64]) -> Result<()>;

    async fn readdir(&self, dir: &Path) -> Result<Vec<DirEntry>>;

    /// Acquires an inode lock on `path` in `domain`, returns a token to
    /// release it with. Blocks (conceptually) until granted.
    async fn inodelk(&self, domain: &str, path: &Path) -> Result<u64>;
    async fn inodelk_release(&self, domain: &str, path: &Path, token: u64) -> Result<()>;

    /// Acquires a non-blocking entry lock on `(dir, basename)`. Returns
    /// `Ok(None)` on `EAGAIN` (§7 "conflict": lock busy).
    async fn entrylk(&self, domain: &str, dir: &Path, basename: &str) -> Result<Option<u64>>;
    async fn entrylk_release(&self, domain: &str, dir: &Path, basename: &str, token: u64) -> Result<()>;
}

/// Runs `f` under an inodelk held across `path`, releasing it on every
/// exit path including error (§9 "guarded acquisition pattern").
pub async fn with_inodelk<T>(
    child: &dyn Child,
    domain: &str,
    path: &Path,
    f: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    let token = child.inodelk(domain, path).await?;
    let result = f.await;
    child.inodelk_release(domain, path, token).await?;
    result
}

/// Runs `f` under a non-blocking entrylk on `(dir, basename)`, releasing
/// it on every exit path. Returns `Ok(None)` if the lock is busy.
pub async fn with_entrylk<T>(
    child: &dyn Child,
    domain: &str,
    dir: &Path,
    basename: &str,
    f: impl std::future::Future<Output = Result<T>>,
) -> Result<Option<T>> {
    let token = match child.entrylk(domain, dir, basename).await? {
        Some(t) => t,
        None => return Ok(None),
    };
    let result = f.await;
    child.entrylk_release(domain, dir, basename, token).await?;
    Ok(Some(result?))
}
