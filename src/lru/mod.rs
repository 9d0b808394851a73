//! LRU of shard inodes (spec §3 "Inode context" / §4.C): a doubly-linked
//! list bounding the number of resolved shard inodes kept around,
//! evicting the least-recently-used shard — unless it still has pending
//! fsync work, in which case eviction instead hands the victim back to
//! the caller to fsync.
//!
//! Grounded directly on the teacher's `db/storage/lru.rs` intrusive
//! doubly linked list (raw `prev`/`next` pointers + `HashMap` for O(1)
//! lookup), generalized from `u64` cache keys to `InodeId`.


use std::collections::HashMap;
use std::ptr::{self, NonNull};

use crate::inode::InodeId;

struct LruNode {
    id: InodeId,
    prev: *mut LruNode,
    next: *mut LruNode,
}

/// An intrusive LRU list, least-recently-used at the head, most-recently
/// used at the tail (§4.C).
pub struct ShardLru {
    head: *mut LruNode,
    tail: *mut LruNode,
    nodes: HashMap<InodeId, NonNull<LruNode>>,
    limit: usize,
}

// Safety: mirrors the teacher's LRUList — nodes are heap-allocated and
// only ever touched while the owning lock (here: the translator's single
// LRU mutex) is held.
unsafe impl Send for ShardLru {}
unsafe impl Sync for ShardLru {}

impl ShardLru {
    pub fn new(limit: usize) -> Self {
        Self { head: ptr::null_mut(), tail: ptr::null_mut(), nodes: HashMap::new(), limit }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: InodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// `touch`: move to tail if already linked, else link at the tail.
    /// Returns `Some(victim)` if linking this entry pushed the list over
    /// `lru_limit` and a victim was selected for eviction (§4.C).
    pub fn touch(&mut self, id: InodeId) -> Option<InodeId> {
        if let Some(node_ptr) = self.nodes.get(&id).copied() {
            unsafe {
                self.unlink_node(node_ptr.as_ptr());
                self.push_tail(node_ptr.as_ptr());
            }
            return None;
        }

        let node = Box::new(LruNode { id, prev: ptr::null_mut(), next: ptr::null_mut() });
        let node_ptr = NonNull::from(Box::leak(node));
        self.nodes.insert(id, node_ptr);
        unsafe {
            self.push_tail(node_ptr.as_ptr());
        }

        if self.nodes.len() > self.limit {
            self.peek_head()
        } else {
            None
        }
    }

    /// Peeks the head (oldest) candidate without unlinking it.
    pub fn peek_head(&self) -> Option<InodeId> {
        if self.head.is_null() {
            None
        } else {
            unsafe { Some((*self.head).id) }
        }
    }

    /// `forget`: unlinks `id` if present.
    pub fn forget(&mut self, id: InodeId) {
        if let Some(node_ptr) = self.nodes.remove(&id) {
            unsafe {
                let node = node_ptr.as_ptr();
                self.unlink_node(node);
                drop(Box::from_raw(node));
            }
        }
    }

    unsafe fn unlink_node(&mut self, node: *mut LruNode) {
        let prev = (*node).prev;
        let next = (*node).next;
        if prev.is_null() {
            self.head = next;
        } else {
            (*prev).next = next;
        }
        if next.is_null() {
            self.tail = prev;
        } else {
            (*next).prev = prev;
        }
        (*node).prev = ptr::null_mut();
        (*node).next = ptr::null_mut();
    }

    unsafe fn push_tail(&mut self, node: *mut LruNode) {
        (*node).prev = self.tail;
        (*node).next = ptr::null_mut();
        if !self.tail.is_null() {
            (*self.tail).next = node;
        } else {
            self.head = node;
        }
        self.tail = node;
    }
}

impl Drop for ShardLru {
    fn drop(&mut self) {
        unsafe {
            let mut current = self.head;
            while !current.is_null() {
                let next = (*current).next;
                drop(Box::from_raw(current));
                current = next;
            }
        }
    }
}
