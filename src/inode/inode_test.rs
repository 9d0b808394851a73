use super::*;
use uuid::Uuid;

#[test]
fn get_or_create_is_idempotent_for_same_id() {
    let store = InodeCtxStore::new();
    let id = Uuid::from_u128(1);
    let a = store.get_or_create(id, "/vol/.shard/a.1");
    let b = store.get_or_create(id, "/vol/.shard/a.1");
    assert!(Arc::ptr_eq(&a, &b));
}

#[test]
fn fresh_cell_needs_refresh_until_marked() {
    let store = InodeCtxStore::new();
    let cell = store.get_or_create(Uuid::from_u128(2), "/vol/f");
    assert!(cell.needs_refresh());
    cell.mark_refreshed(Iatt::zeroed(Uuid::from_u128(2), crate::iatt::IattType::Regular));
    assert!(!cell.needs_refresh());
    assert!(cell.refreshed.load(Ordering::Acquire));
}

#[test]
fn invalidate_forces_refresh_again() {
    let store = InodeCtxStore::new();
    let cell = store.get_or_create(Uuid::from_u128(3), "/vol/f");
    cell.mark_refreshed(Iatt::zeroed(Uuid::from_u128(3), crate::iatt::IattType::Regular));
    cell.invalidate();
    assert!(cell.needs_refresh());
}

#[test]
fn fsync_needed_counter_tracks_pending_writes() {
    let store = InodeCtxStore::new();
    let cell = store.get_or_create(Uuid::from_u128(4), "/vol/.shard/a.1");
    assert!(!cell.has_fsync_pending());
    cell.bump_fsync_needed();
    cell.bump_fsync_needed();
    assert!(cell.has_fsync_pending());
    assert_eq!(cell.clear_fsync_needed(), 2);
    assert!(!cell.has_fsync_pending());
}

#[test]
fn forget_removes_cell_from_store() {
    let store = InodeCtxStore::new();
    let id = Uuid::from_u128(5);
    store.get_or_create(id, "/vol/f");
    assert_eq!(store.len(), 1);
    store.forget(id);
    assert_eq!(store.len(), 0);
    assert!(store.get(id).is_none());
}
