//! Dictionary (spec §3 "Dictionary", §4.A): an insertion-ordered
//! string-keyed map with a hash chain for O(1) lookup, used throughout
//! the sharding engine as the xdata side channel (§6).

pub mod value;
pub mod wire;


use parking_lot::Mutex;

use std::sync::Arc;
use xxhash_rust::xxh3::xxh3_64_with_seed;

pub use value::{Value, ValueData};

use crate::error::{Result, ShardError};

struct Pair {
    key: String,
    hash: u64,
    value: Value,
}

struct Inner {
    /// `pairs[i]` is `None` for a deleted slot; order of `Some` entries is
    /// insertion order (§3 "Dictionary" invariant).
    pairs: Vec<Option<Pair>>,
    /// hash -> indices into `pairs` sharing that bucket.
    buckets: Vec<Vec<usize>>,
    count: usize,
    totkvlen: usize,
    single_bucket: bool,
}

impl Inner {
    fn new(size_hint: usize) -> Self {
        let single_bucket = size_hint <= 1;
        let bucket_count = if single_bucket { 1 } else { size_hint.next_power_of_two().max(2) };
        Self {
            pairs: Vec::new(),
            buckets: vec![Vec::new(); bucket_count],
            count: 0,
            totkvlen: 0,
            single_bucket,
        }
    }

    fn bucket_of(&self, hash: u64) -> usize {
        if self.single_bucket {
            0
        } else {
            (hash % self.buckets.len() as u64) as usize
        }
    }

    fn find(&self, key: &str, hash: u64) -> Option<usize> {
        let b = self.bucket_of(hash);
        self.buckets[b].iter().copied().find(|&idx| {
            matches!(&self.pairs[idx], Some(p) if p.key == key)
        })
    }

    fn insert_new(&mut self, key: String, hash: u64, value: Value) {
        self.totkvlen += key.len() + 1 + value.wire_len();
        let idx = self.pairs.len();
        let b = self.bucket_of(hash);
        self.buckets[b].push(idx);
        self.pairs.push(Some(Pair { key, hash, value }));
        self.count += 1;
    }

    fn remove_at(&mut self, idx: usize) -> Option<Value> {
        let pair = self.pairs[idx].take()?;
        let b = self.bucket_of(pair.hash);
        self.buckets[b].retain(|&i| i != idx);
        self.totkvlen -= pair.key.len() + 1 + pair.value.wire_len();
        self.count -= 1;
        Some(pair.value)
    }
}

/// Insertion-ordered string-keyed dictionary with ref-counted values.
/// Cloning a `Dict` is an `Arc` clone (mirrors `dict_ref`).
#[derive(Clone)]
pub struct Dict {
    inner: Arc<Mutex<Inner>>,
}

fn hash_key(key: &str) -> u64 {
    xxh3_64_with_seed(key.as_bytes(), 0)
}

impl Dict {
    pub fn new(size_hint: usize) -> Self {
        Self { inner: Arc::new(Mutex::new(Inner::new(size_hint))) }
    }

    /// `set`: replaces the existing pair if present.
    pub fn set(&self, key: &str, value: Value) {
        let hash = hash_key(key);
        let mut inner = self.inner.lock();
        if let Some(idx) = inner.find(key, hash) {
            let old = inner.pairs[idx].as_ref().unwrap();
            let delta = value.wire_len() as isize - old.value.wire_len() as isize;
            inner.pairs[idx].as_mut().unwrap().value = value;
            inner.totkvlen = (inner.totkvlen as isize + delta) as usize;
        } else {
            inner.insert_new(key.to_string(), hash, value);
        }
    }

    /// `add`: does not check for duplicates, always produces a new pair.
    pub fn add(&self, key: &str, value: Value) {
        let hash = hash_key(key);
        let mut inner = self.inner.lock();
        inner.insert_new(key.to_string(), hash, value);
    }

    /// Borrowed-style get; in Rust this clones the `Arc`-backed `Value`
    /// just like `get_with_ref` (see DESIGN.md — the source's separate
    /// borrowed/owning accessors collapse once refcounting is `Arc`'s job).
    pub fn get(&self, key: &str) -> Option<Value> {
        let hash = hash_key(key);
        let inner = self.inner.lock();
        inner.find(key, hash).map(|idx| inner.pairs[idx].as_ref().unwrap().value.clone())
    }

    pub fn get_with_ref(&self, key: &str) -> Result<Value> {
        self.get(key).ok_or(ShardError::NotFound)
    }

    pub fn del(&self, key: &str) {
        let hash = hash_key(key);
        let mut inner = self.inner.lock();
        if let Some(idx) = inner.find(key, hash) {
            inner.remove_at(idx);
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let size_hint = inner.buckets.len();
        *inner = Inner::new(size_hint);
    }

    pub fn key_count(&self) -> usize {
        self.inner.lock().count
    }

    pub fn totkvlen(&self) -> usize {
        self.inner.lock().totkvlen
    }

    /// `rename_key`: atomic re-key under the dict lock. No-op if
    /// `old == new`; fails with `NotFound` ("no-data") if `old` is absent.
    pub fn rename_key(&self, old: &str, new: &str) -> Result<()> {
        if old == new {
            return Ok(());
        }
        let old_hash = hash_key(old);
        let new_hash = hash_key(new);
        let mut inner = self.inner.lock();
        let idx = inner.find(old, old_hash).ok_or(ShardError::NotFound)?;
        {
            let old_b = inner.bucket_of(old_hash);
            inner.buckets[old_b].retain(|&i| i != idx);
        }
        let old_key_len = inner.pairs[idx].as_ref().unwrap().key.len();
        inner.totkvlen = inner.totkvlen + new.len() - old_key_len;
        let pair = inner.pairs[idx].as_mut().unwrap();
        pair.key = new.to_string();
        pair.hash = new_hash;
        let new_b = inner.bucket_of(new_hash);
        inner.buckets[new_b].push(idx);
        Ok(())
    }

    /// `foreach`: NOT locked against concurrent mutation — the source
    /// never locked this path either, and callers are expected to own the
    /// dict exclusively during iteration (§9 open question a). Returns
    /// the number of matched pairs, or an error the moment `action`
    /// returns one (halts immediately, mirroring the `-1` early-exit).
    pub fn foreach<M, A>(&self, mut is_match: M, mut action: A) -> Result<usize>
    where
        M: FnMut(&str, &Value) -> bool,
        A: FnMut(&str, &Value) -> Result<()>,
    {
        let inner = self.inner.lock();
        let mut matched = 0;
        for pair in inner.pairs.iter().flatten() {
            if is_match(&pair.key, &pair.value) {
                action(&pair.key, &pair.value)?;
                matched += 1;
            }
        }
        Ok(matched)
    }

    /// `copy`: inserts every pair of `self` into `dst` using `set`
    /// semantics.
    pub fn copy_into(&self, dst: &Dict) {
        let inner = self.inner.lock();
        for pair in inner.pairs.iter().flatten() {
            dst.set(&pair.key, pair.value.clone());
        }
    }

    /// Concatenates every key separated by NUL into `buf`, returning the
    /// total length needed even when `buf` is too small (§4.A).
    pub fn keys_join<F>(&self, buf: &mut [u8], mut filter: F) -> usize
    where
        F: FnMut(&str) -> bool,
    {
        let inner = self.inner.lock();
        let mut needed = 0usize;
        let mut cursor = 0usize;
        for pair in inner.pairs.iter().flatten() {
            if !filter(&pair.key) {
                continue;
            }
            let bytes = pair.key.as_bytes();
            let len = bytes.len() + 1;
            if cursor + len <= buf.len() {
                buf[cursor..cursor + bytes.len()].copy_from_slice(bytes);
                buf[cursor + bytes.len()] = 0;
                cursor += len;
            }
            needed += len;
        }
        needed
    }
}

impl Default for Dict {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Flag bitmap value (§3 "Flag bitmap", §4.A `flag_set/clear/check`):
/// an optional per-key bit array up to 256 bits, stored as a 32-byte
/// dictionary value.
pub mod flags {
    use super::{Dict, Value, ValueData};

    const FLAG_BYTES: usize = 32;

    pub fn set(dict: &Dict, key: &str, bit: usize) {
        let mut bytes = current(dict, key);
        bytes[bit / 8] |= 1 << (bit % 8);
        dict.set(key, Value::bytes(bytes));
    }

    pub fn clear(dict: &Dict, key: &str, bit: usize) {
        let mut bytes = current(dict, key);
        bytes[bit / 8] &= !(1 << (bit % 8));
        dict.set(key, Value::bytes(bytes));
    }

    pub fn check(dict: &Dict, key: &str, bit: usize) -> bool {
        let bytes = current(dict, key);
        (bytes[bit / 8] & (1 << (bit % 8))) != 0
    }

    fn current(dict: &Dict, key: &str) -> Vec<u8> {
        match dict.get(key) {
            Some(v) => match v.data() {
                ValueData::Bytes(b) | ValueData::LegacyBytes(b) => {
                    let mut out = vec![0u8; FLAG_BYTES];
                    let n = b.len().min(FLAG_BYTES);
                    out[..n].copy_from_slice(&b[..n]);
                    out
                }
                _ => vec![0u8; FLAG_BYTES],
            },
            None => vec![0u8; FLAG_BYTES],
        }
    }
}
