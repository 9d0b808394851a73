//! A minimal POSIX-like child backed by a real directory tree, so the
//! end-to-end scenarios of spec §8 can run against real files instead of
//! only mocks. A production brick (the "POSIX sub-layer") is out of this
//! core's scope per §1; this is the demo/self-check collaborator.

use async_trait::async_trait;
use byteorder::{BigEndian, ByteOrder};
use dashmap::DashMap;
use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{Child, DirEntry, FallocateMode};
use crate::dict::Dict;
use crate::error::{Result, ShardError};
use crate::iatt::{Gfid, Iatt, IattType};

pub struct DemoChild {
    root: PathBuf,
    locks: DashMap<String, Arc<Mutex<()>>>,
    held: DashMap<u64, OwnedMutexGuard<()>>,
}

impl DemoChild {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), locks: DashMap::new(), held: DashMap::new() }
    }

    fn full(&self, path: &Path) -> PathBuf {
        self.root.join(path.strip_prefix("/").unwrap_or(path))
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks.entry(key.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    fn io_err(e: std::io::Error) -> ShardError {
        if e.kind() == std::io::ErrorKind::NotFound {
            ShardError::NotFound
        } else if e.kind() == std::io::ErrorKind::AlreadyExists {
            ShardError::Exists
        } else {
            ShardError::Io(e)
        }
    }

    fn stat_of(p: &Path, meta: &std::fs::Metadata) -> Result<Iatt> {
        use std::os::unix::fs::MetadataExt;
        let gfid = gfid_for(p);
        let ia_type = if meta.is_dir() { IattType::Directory } else { IattType::Regular };
        Ok(Iatt {
            gfid,
            ia_type,
            size: meta.size(),
            blocks: meta.blocks(),
            nlink: meta.nlink() as u32,
            uid: meta.uid(),
            gid: meta.gid(),
            mode: meta.mode(),
            rdev: meta.rdev(),
            blksize: meta.blksize() as u32,
            atime_sec: meta.atime(),
            atime_nsec: meta.atime_nsec() as u32,
            mtime_sec: meta.mtime(),
            mtime_nsec: meta.mtime_nsec() as u32,
            ctime_sec: meta.ctime(),
            ctime_nsec: meta.ctime_nsec() as u32,
        })
    }
}

/// Reads the first 8 bytes of a (possibly shorter or longer) xattr
/// buffer as a big-endian word, zero-padding a short buffer.
fn pad8(b: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    let n = b.len().min(8);
    out[..n].copy_from_slice(&b[..n]);
    out
}

/// Deterministic per-path gfid for the demo child (a real brick persists
/// the gfid in a `trusted.gfid` xattr; we derive it so repeated lookups
/// of the same path observe the same identity).
fn gfid_for(p: &Path) -> Gfid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, p.to_string_lossy().as_bytes())
}

#[async_trait]
impl Child for DemoChild {
    async fn lookup(&self, path: &Path, xdata: &Dict) -> Result<(Iatt, Dict)> {
        self.stat(path, xdata).await
    }

    async fn stat(&self, path: &Path, _xdata: &Dict) -> Result<(Iatt, Dict)> {
        let full = self.full(path);
        let meta = tokio::fs::metadata(&full).await.map_err(Self::io_err)?;
        let iatt = Self::stat_of(path, &meta)?;
        let reply = Dict::new(1);
        if let Ok(bs) = self.getxattr(path, crate::xdata::XATTR_BLOCK_SIZE).await {
            reply.set(crate::xdata::XATTR_BLOCK_SIZE, crate::dict::Value::uint64(BigEndian::read_u64(&pad8(&bs))));
        }
        if let Ok(fs) = self.getxattr(path, crate::xdata::XATTR_FILE_SIZE).await {
            reply.set(crate::xdata::XATTR_FILE_SIZE, crate::dict::Value::uint64(BigEndian::read_u64(&pad8(&fs))));
        }
        Ok((iatt, reply))
    }

    async fn mkdir(&self, path: &Path, mode: u32) -> Result<Iatt> {
        let full = self.full(path);
        tokio::fs::create_dir(&full).await.map_err(Self::io_err)?;
        let _ = tokio::fs::set_permissions(&full, std::os::unix::fs::PermissionsExt::from_mode(mode)).await;
        let meta = tokio::fs::metadata(&full).await.map_err(Self::io_err)?;
        Self::stat_of(path, &meta)
    }

    async fn mknod(&self, path: &Path, mode: u32, _rdev: u64, xdata: &Dict) -> Result<Iatt> {
        let full = self.full(path);
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full)
            .await
            .map_err(Self::io_err)?;
        drop(file);
        let _ = tokio::fs::set_permissions(&full, std::os::unix::fs::PermissionsExt::from_mode(mode & 0o777)).await;
        if let Some(v) = xdata.get(crate::xdata::XATTR_BLOCK_SIZE) {
            if let Ok(bs) = v.as_uint64(crate::xdata::XATTR_BLOCK_SIZE) {
                self.setxattr(path, crate::xdata::XATTR_BLOCK_SIZE, &bs.to_be_bytes()).await?;
            }
        }
        let meta = tokio::fs::metadata(&full).await.map_err(Self::io_err)?;
        Self::stat_of(path, &meta)
    }

    async fn unlink(&self, path: &Path, xdata: &Dict) -> Result<Dict> {
        let full = self.full(path);
        let reply = Dict::new(1);
        if xdata.get(crate::xdata::GET_FILE_BLOCK_COUNT).is_some() {
            if let Ok(meta) = tokio::fs::metadata(&full).await {
                use std::os::unix::fs::MetadataExt;
                reply.set(crate::xdata::GET_FILE_BLOCK_COUNT, crate::dict::Value::uint64(meta.blocks()));
            }
        }
        tokio::fs::remove_file(&full).await.map_err(Self::io_err)?;
        Ok(reply)
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<Iatt> {
        let full_from = self.full(from);
        let full_to = self.full(to);
        tokio::fs::rename(&full_from, &full_to).await.map_err(Self::io_err)?;
        let meta = tokio::fs::metadata(&full_to).await.map_err(Self::io_err)?;
        Self::stat_of(to, &meta)
    }

    async fn link(&self, from: &Path, to: &Path) -> Result<Iatt> {
        let full_from = self.full(from);
        let full_to = self.full(to);
        tokio::fs::hard_link(&full_from, &full_to).await.map_err(Self::io_err)?;
        let meta = tokio::fs::metadata(&full_to).await.map_err(Self::io_err)?;
        Self::stat_of(to, &meta)
    }

    async fn readv(&self, path: &Path, offset: u64, len: usize) -> Result<Vec<u8>> {
        use tokio::io::{AsyncReadExt, AsyncSeekExt};
        let full = self.full(path);
        let mut file = match tokio::fs::File::open(&full).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(ShardError::NotFound),
            Err(e) => return Err(Self::io_err(e)),
        };
        file.seek(std::io::SeekFrom::Start(offset)).await.map_err(Self::io_err)?;
        let mut buf = vec![0u8; len];
        let mut total = 0;
        loop {
            let n = file.read(&mut buf[total..]).await.map_err(Self::io_err)?;
            if n == 0 {
                break;
            }
            total += n;
            if total == len {
                break;
            }
        }
        buf.truncate(total);
        Ok(buf)
    }

    async fn writev(&self, path: &Path, offset: u64, data: &[u8], _xdata: &Dict) -> Result<(Iatt, Iatt)> {
        use tokio::io::{AsyncSeekExt, AsyncWriteExt};
        let full = self.full(path);
        let pre = match tokio::fs::metadata(&full).await {
            Ok(m) => Self::stat_of(path, &m)?,
            Err(_) => Iatt::zeroed(gfid_for(path), IattType::Regular),
        };
        let mut file = tokio::fs::OpenOptions::new().write(true).create(true).truncate(false).open(&full).await.map_err(Self::io_err)?;
        file.seek(std::io::SeekFrom::Start(offset)).await.map_err(Self::io_err)?;
        file.write_all(data).await.map_err(Self::io_err)?;
        file.flush().await.map_err(Self::io_err)?;
        let meta = tokio::fs::metadata(&full).await.map_err(Self::io_err)?;
        let post = Self::stat_of(path, &meta)?;
        Ok((pre, post))
    }

    async fn truncate(&self, path: &Path, size: u64) -> Result<(Iatt, Iatt)> {
        let full = self.full(path);
        let pre_meta = tokio::fs::metadata(&full).await.map_err(Self::io_err)?;
        let pre = Self::stat_of(path, &pre_meta)?;
        let file = tokio::fs::OpenOptions::new().write(true).open(&full).await.map_err(Self::io_err)?;
        file.set_len(size).await.map_err(Self::io_err)?;
        let meta = tokio::fs::metadata(&full).await.map_err(Self::io_err)?;
        let post = Self::stat_of(path, &meta)?;
        Ok((pre, post))
    }

    async fn fallocate(&self, path: &Path, mode: FallocateMode, offset: u64, len: u64) -> Result<(Iatt, Iatt)> {
        let full = self.full(path);
        let pre_meta = tokio::fs::metadata(&full).await.map_err(Self::io_err)?;
        let pre = Self::stat_of(path, &pre_meta)?;
        match mode {
            FallocateMode::ZeroRange => {
                let zeros = vec![0u8; len as usize];
                let _ = self.writev(path, offset, &zeros, &Dict::new(0)).await?;
            }
            FallocateMode::KeepSizePunchHole => {
                // Demo child has no real hole-punching syscall available
                // portably; approximate with a zero-fill, keeping size.
                let zeros = vec![0u8; len as usize];
                let _ = self.writev(path, offset, &zeros, &Dict::new(0)).await?;
                let file = tokio::fs::OpenOptions::new().write(true).open(&full).await.map_err(Self::io_err)?;
                file.set_len(pre.size).await.map_err(Self::io_err)?;
            }
        }
        let meta = tokio::fs::metadata(&full).await.map_err(Self::io_err)?;
        let post = Self::stat_of(path, &meta)?;
        Ok((pre, post))
    }

    async fn fsync(&self, path: &Path) -> Result<()> {
        let full = self.full(path);
        let file = tokio::fs::OpenOptions::new().write(true).open(&full).await.map_err(Self::io_err)?;
        file.sync_all().await.map_err(Self::io_err)
    }

    async fn getxattr(&self, path: &Path, key: &str) -> Result<Vec<u8>> {
        let full = self.full(path);
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            xattr::get(&full, &key)
                .map_err(ShardError::Io)?
                .ok_or(ShardError::NotFound)
        })
        .await
        .unwrap()
    }

    async fn setxattr(&self, path: &Path, key: &str, value: &[u8]) -> Result<()> {
        let full = self.full(path);
        let key = key.to_string();
        let value = value.to_vec();
        tokio::task::spawn_blocking(move || xattr::set(&full, &key, &value).map_err(ShardError::Io))
            .await
            .unwrap()
    }

    async fn xattrop_add_array(&self, path: &Path, key: &str, deltas: &[i64]) -> Result<()> {
        let current = self.getxattr(path, key).await.unwrap_or_else(|_| vec![0u8; 32]);
        let mut words = [0i64; 4];
        for (i, w) in words.iter_mut().enumerate() {
            if current.len() >= (i + 1) * 8 {
                *w = BigEndian::read_i64(&current[i * 8..(i + 1) * 8]);
            }
        }
        for (i, d) in deltas.iter().enumerate() {
            if i < 4 {
                words[i] += d;
            }
        }
        let mut out = vec![0u8; 32];
        for (i, w) in words.iter().enumerate() {
            BigEndian::write_i64(&mut out[i * 8..(i + 1) * 8], *w);
        }
        self.setxattr(path, key, &out).await
    }

    async fn readdir(&self, dir: &Path) -> Result<Vec<DirEntry>> {
        let full = self.full(dir);
        let mut rd = tokio::fs::read_dir(&full).await.map_err(Self::io_err)?;
        let mut out = Vec::new();
        while let Some(entry) = rd.next_entry().await.map_err(Self::io_err)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            out.push(DirEntry { name, gfid: None });
        }
        Ok(out)
    }

    async fn inodelk(&self, domain: &str, path: &Path) -> Result<u64> {
        let key = format!("inodelk:{domain}:{}", path.display());
        let lock = self.lock_for(&key);
        let guard = lock.lock_owned().await;
        let token: u64 = rand::thread_rng().gen();
        self.held.insert(token, guard);
        Ok(token)
    }

    async fn inodelk_release(&self, _domain: &str, _path: &Path, token: u64) -> Result<()> {
        self.held.remove(&token);
        Ok(())
    }

    async fn entrylk(&self, domain: &str, dir: &Path, basename: &str) -> Result<Option<u64>> {
        let key = format!("entrylk:{domain}:{}:{}", dir.display(), basename);
        let lock = self.lock_for(&key);
        match lock.try_lock_owned() {
            Ok(guard) => {
                let token: u64 = rand::thread_rng().gen();
                self.held.insert(token, guard);
                Ok(Some(token))
            }
            Err(_) => Ok(None),
        }
    }

    async fn entrylk_release(&self, _domain: &str, _dir: &Path, _basename: &str, token: u64) -> Result<()> {
        self.held.remove(&token);
        Ok(())
    }
}
