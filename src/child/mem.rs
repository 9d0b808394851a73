//! In-memory `Child` test double (spec §9 "test tooling"): used by the
//! core's own unit/integration tests instead of touching a real
//! filesystem, mirroring the teacher's in-process upstream test fake.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::dict::Dict;
use crate::error::{Result, ShardError};
use crate::iatt::{Gfid, Iatt, IattType};
use crate::xdata;

use super::{Child, DirEntry, FallocateMode};

struct Entry {
    data: Vec<u8>,
    xattrs: HashMap<String, Vec<u8>>,
    gfid: Gfid,
    is_dir: bool,
    nlink: u32,
}

impl Entry {
    fn stat(&self, path_gfid: Gfid) -> Iatt {
        let ty = if self.is_dir { IattType::Directory } else { IattType::Regular };
        let mut iatt = Iatt::zeroed(path_gfid, ty);
        iatt.size = self.data.len() as u64;
        iatt.blocks = (self.data.len() as u64).div_ceil(512);
        iatt.nlink = self.nlink;
        iatt
    }
}

pub struct MemChild {
    files: DashMap<PathBuf, Entry>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    held: DashMap<u64, OwnedMutexGuard<()>>,
    next_token: AtomicU64,
    fsync_calls: AtomicU64,
}

impl MemChild {
    pub fn new() -> Self {
        let files = DashMap::new();
        files.insert(
            PathBuf::new(),
            Entry { data: vec![], xattrs: HashMap::new(), gfid: Gfid::nil(), is_dir: true, nlink: 1 },
        );
        Self { files, locks: DashMap::new(), held: DashMap::new(), next_token: AtomicU64::new(1), fsync_calls: AtomicU64::new(0) }
    }

    /// Number of `fsync` calls observed so far (test introspection).
    pub fn fsync_call_count(&self) -> u64 {
        self.fsync_calls.load(Ordering::Relaxed)
    }

    /// Seeds a base file with the given content, as if created upstream.
    pub fn seed_file(&self, path: &Path, data: Vec<u8>) -> Gfid {
        let gfid = Gfid::new_v4();
        self.files.insert(
            path.to_path_buf(),
            Entry { data, xattrs: HashMap::new(), gfid, is_dir: false, nlink: 1 },
        );
        gfid
    }

    pub fn set_xattr_sync(&self, path: &Path, key: &str, value: Vec<u8>) {
        if let Some(mut e) = self.files.get_mut(path) {
            e.xattrs.insert(key.to_string(), value);
        }
    }

    fn lock_for(&self, key: String) -> Arc<Mutex<()>> {
        self.locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    fn next_token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for MemChild {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Child for MemChild {
    async fn lookup(&self, path: &Path, xdata: &Dict) -> Result<(Iatt, Dict)> {
        self.stat(path, xdata).await
    }

    async fn stat(&self, path: &Path, xdata: &Dict) -> Result<(Iatt, Dict)> {
        let entry = self.files.get(path).ok_or(ShardError::NotFound)?;
        let stat = entry.stat(entry.gfid);
        let reply = Dict::new(2);
        if xdata.get(xdata::XATTR_BLOCK_SIZE).is_some() {
            if let Some(bs) = entry.xattrs.get(xdata::XATTR_BLOCK_SIZE) {
                reply.set(xdata::XATTR_BLOCK_SIZE, crate::dict::Value::uint64(be64(bs)));
            }
        }
        if xdata.get(xdata::XATTR_FILE_SIZE).is_some() {
            if let Some(fs) = entry.xattrs.get(xdata::XATTR_FILE_SIZE) {
                reply.set(xdata::XATTR_FILE_SIZE, crate::dict::Value::uint64(be64(fs)));
            }
        }
        Ok((stat, reply))
    }

    async fn mkdir(&self, path: &Path, _mode: u32) -> Result<Iatt> {
        if self.files.contains_key(path) {
            return Err(ShardError::Exists);
        }
        let gfid = Gfid::new_v4();
        self.files.insert(
            path.to_path_buf(),
            Entry { data: vec![], xattrs: HashMap::new(), gfid, is_dir: true, nlink: 1 },
        );
        Ok(Iatt::zeroed(gfid, IattType::Directory))
    }

    async fn mknod(&self, path: &Path, _mode: u32, _rdev: u64, xdata: &Dict) -> Result<Iatt> {
        if self.files.contains_key(path) {
            return Err(ShardError::Exists);
        }
        let gfid = xdata.get(xdata::GFID_REQ).and_then(|v| v.as_uuid(xdata::GFID_REQ).ok()).unwrap_or_else(Gfid::new_v4);
        let mut xattrs = HashMap::new();
        if let Some(v) = xdata.get(xdata::XATTR_BLOCK_SIZE) {
            if let Ok(bs) = v.as_uint64(xdata::XATTR_BLOCK_SIZE) {
                xattrs.insert(xdata::XATTR_BLOCK_SIZE.to_string(), bs.to_be_bytes().to_vec());
            }
        }
        self.files.insert(path.to_path_buf(), Entry { data: vec![], xattrs, gfid, is_dir: false, nlink: 1 });
        Ok(Iatt::zeroed(gfid, IattType::Regular))
    }

    async fn unlink(&self, path: &Path, xdata: &Dict) -> Result<Dict> {
        let (_, entry) = self.files.remove(path).ok_or(ShardError::NotFound)?;
        let reply = Dict::new(1);
        if xdata.get(xdata::GET_FILE_BLOCK_COUNT).is_some() {
            let blocks = (entry.data.len() as u64).div_ceil(512);
            reply.set(xdata::GET_FILE_BLOCK_COUNT, crate::dict::Value::uint64(blocks));
        }
        Ok(reply)
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<Iatt> {
        let (_, entry) = self.files.remove(from).ok_or(ShardError::NotFound)?;
        let gfid = entry.gfid;
        let stat = entry.stat(gfid);
        self.files.insert(to.to_path_buf(), entry);
        Ok(stat)
    }

    async fn link(&self, from: &Path, to: &Path) -> Result<Iatt> {
        let mut entry = self.files.get_mut(from).ok_or(ShardError::NotFound)?;
        entry.nlink += 1;
        let stat = entry.stat(entry.gfid);
        drop(entry);
        let clone = {
            let e = self.files.get(from).unwrap();
            Entry { data: e.data.clone(), xattrs: e.xattrs.clone(), gfid: e.gfid, is_dir: e.is_dir, nlink: e.nlink }
        };
        self.files.insert(to.to_path_buf(), clone);
        Ok(stat)
    }

    async fn readv(&self, path: &Path, offset: u64, len: usize) -> Result<Vec<u8>> {
        let entry = self.files.get(path).ok_or(ShardError::NotFound)?;
        let start = (offset as usize).min(entry.data.len());
        let end = (start + len).min(entry.data.len());
        Ok(entry.data[start..end].to_vec())
    }

    async fn writev(&self, path: &Path, offset: u64, data: &[u8], _xdata: &Dict) -> Result<(Iatt, Iatt)> {
        let mut entry = self.files.get_mut(path).ok_or(ShardError::NotFound)?;
        let pre = entry.stat(entry.gfid);
        let end = offset as usize + data.len();
        if entry.data.len() < end {
            entry.data.resize(end, 0);
        }
        entry.data[offset as usize..end].copy_from_slice(data);
        let post = entry.stat(entry.gfid);
        Ok((pre, post))
    }

    async fn truncate(&self, path: &Path, size: u64) -> Result<(Iatt, Iatt)> {
        let mut entry = self.files.get_mut(path).ok_or(ShardError::NotFound)?;
        let pre = entry.stat(entry.gfid);
        entry.data.resize(size as usize, 0);
        let post = entry.stat(entry.gfid);
        Ok((pre, post))
    }

    async fn fallocate(&self, path: &Path, _mode: FallocateMode, offset: u64, len: u64) -> Result<(Iatt, Iatt)> {
        let mut entry = self.files.get_mut(path).ok_or(ShardError::NotFound)?;
        let pre = entry.stat(entry.gfid);
        let end = (offset + len) as usize;
        if entry.data.len() < end {
            entry.data.resize(end, 0);
        }
        let post = entry.stat(entry.gfid);
        Ok((pre, post))
    }

    async fn fsync(&self, path: &Path) -> Result<()> {
        self.fsync_calls.fetch_add(1, Ordering::Relaxed);
        if self.files.contains_key(path) {
            Ok(())
        } else {
            Err(ShardError::NotFound)
        }
    }

    async fn getxattr(&self, path: &Path, key: &str) -> Result<Vec<u8>> {
        let entry = self.files.get(path).ok_or(ShardError::NotFound)?;
        entry.xattrs.get(key).cloned().ok_or(ShardError::NotFound)
    }

    async fn setxattr(&self, path: &Path, key: &str, value: &[u8]) -> Result<()> {
        let mut entry = self.files.get_mut(path).ok_or(ShardError::NotFound)?;
        entry.xattrs.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn xattrop_add_array(&self, path: &Path, key: &str, deltas: &[i64]) -> Result<()> {
        let mut entry = self.files.get_mut(path).ok_or(ShardError::NotFound)?;
        let mut words = entry
            .xattrs
            .get(key)
            .map(|b| read_be_i64_words(b, deltas.len()))
            .unwrap_or_else(|| vec![0i64; deltas.len()]);
        for (w, d) in words.iter_mut().zip(deltas) {
            *w += d;
        }
        let mut bytes = Vec::with_capacity(words.len() * 8);
        for w in &words {
            bytes.extend_from_slice(&w.to_be_bytes());
        }
        entry.xattrs.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn readdir(&self, dir: &Path) -> Result<Vec<DirEntry>> {
        let mut out = Vec::new();
        for r in self.files.iter() {
            if let Some(parent) = r.key().parent() {
                if parent == dir && r.key() != dir {
                    out.push(DirEntry {
                        name: r.key().file_name().unwrap().to_string_lossy().into_owned(),
                        gfid: Some(r.gfid),
                    });
                }
            }
        }
        Ok(out)
    }

    async fn inodelk(&self, domain: &str, path: &Path) -> Result<u64> {
        let key = format!("inodelk:{domain}:{}", path.display());
        let guard = self.lock_for(key).lock_owned().await;
        let token = self.next_token();
        self.held.insert(token, guard);
        Ok(token)
    }

    async fn inodelk_release(&self, _domain: &str, _path: &Path, token: u64) -> Result<()> {
        self.held.remove(&token);
        Ok(())
    }

    async fn entrylk(&self, domain: &str, dir: &Path, basename: &str) -> Result<Option<u64>> {
        let key = format!("entrylk:{domain}:{}:{basename}", dir.display());
        let mutex = self.lock_for(key);
        match mutex.try_lock_owned() {
            Ok(guard) => {
                let token = self.next_token();
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

fn be64(b: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let n = b.len().min(8);
    buf[..n].copy_from_slice(&b[..n]);
    u64::from_be_bytes(buf)
}

fn read_be_i64_words(bytes: &[u8], n: usize) -> Vec<i64> {
    let mut out = vec![0i64; n];
    for (i, word) in out.iter_mut().enumerate() {
        let start = i * 8;
        if start + 8 <= bytes.len() {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[start..start + 8]);
            *word = i64::from_be_bytes(buf);
        }
    }
    out
}
