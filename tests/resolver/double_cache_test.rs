// Double Cache Resolver Tests
// Bounded two-generation cache: lookups, capacity, eviction and forwarding

use gossipmesh::resolver::{
    CallbackResolver, Completion, ContentEntry, ContentId, ContentResolver, DoubleCacheConfig,
    DoubleCacheResolver, ENTRY_OVERHEAD,
};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;

fn data(byte: u8, len: usize) -> Vec<u8> {
    vec![byte; len]
}

fn cache(capacity: usize) -> DoubleCacheResolver {
    DoubleCacheResolver::new(DoubleCacheConfig::new().with_capacity(capacity), None)
}

// ============================================================================
// LOOKUPS
// ============================================================================

proptest! {
    #[test]
    fn test_insert_then_lookup_returns_payload(payload in prop::collection::vec(any::<u8>(), 0..512)) {
        let resolver = cache(1024);
        let id = ContentId::of(&payload);

        resolver.insert(id, ContentEntry::Data(payload.clone()));

        prop_assert_eq!(resolver.content(&id), Some(ContentEntry::Data(payload)));
    }

    #[test]
    fn test_lookup_of_unknown_id_misses(
        inserted in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..16),
        missing in prop::collection::vec(any::<u8>(), 0..64),
    ) {
        prop_assume!(!inserted.contains(&missing));
        let resolver = cache(1024 * 1024);
        for payload in &inserted {
            resolver.insert(ContentId::of(payload), ContentEntry::Data(payload.clone()));
        }

        let found = resolver.content(&ContentId::of(&missing));

        prop_assert!(found.is_none());
        prop_assert!(found.as_ref().and_then(ContentEntry::data).unwrap_or_default().is_empty());
    }
}

#[test]
fn test_delete_removes_entry() {
    let resolver = cache(1024);
    let id = ContentId::of(b"gone");
    resolver.insert(id, ContentEntry::Data(b"gone".to_vec()));

    resolver.delete(&id);

    assert_eq!(resolver.content(&id), None);
    assert!(resolver.is_empty());
}

#[test]
fn test_delete_of_unknown_id_is_noop() {
    let resolver = cache(1024);
    resolver.delete(&ContentId::of(b"never"));
    assert!(resolver.is_empty());
}

#[test]
fn test_pending_marker_is_visible() {
    let resolver = cache(1024);
    let id = ContentId::of(b"soon");
    resolver.insert(id, ContentEntry::Pending);

    let entry = resolver.content(&id).unwrap();
    assert!(entry.is_pending());
    assert_eq!(entry.data(), None);
}

// ============================================================================
// CAPACITY AND EVICTION
// ============================================================================

#[test]
fn test_entry_larger_than_capacity_is_rejected() {
    let resolver = cache(19);
    let payload = data(1, 10);
    let id = ContentId::of(&payload);

    resolver.insert(id, ContentEntry::Data(payload));

    assert_eq!(resolver.content(&id), None);
    assert_eq!(resolver.resident_size(), 0);
}

#[test]
fn test_oldest_generation_is_evicted() {
    let resolver = cache(20);
    let (a, b, c) = (data(b'a', 10), data(b'b', 10), data(b'c', 10));
    let (id_a, id_b, id_c) = (ContentId::of(&a), ContentId::of(&b), ContentId::of(&c));

    resolver.insert(id_a, ContentEntry::Data(a));
    resolver.insert(id_b, ContentEntry::Data(b.clone()));
    resolver.insert(id_c, ContentEntry::Data(c.clone()));

    assert_eq!(resolver.content(&id_a), None);
    assert_eq!(resolver.content(&id_b), Some(ContentEntry::Data(b)));
    assert_eq!(resolver.content(&id_c), Some(ContentEntry::Data(c)));
}

#[test]
fn test_resident_size_stays_within_two_generations() {
    let capacity = 200;
    let resolver = cache(capacity);

    for i in 0..100u8 {
        let payload = data(i, 25);
        resolver.insert(ContentId::of(&payload), ContentEntry::Data(payload));
        assert!(resolver.resident_size() <= 2 * capacity);
    }
}

#[test]
fn test_entry_size_includes_overhead() {
    let resolver = cache(1024);
    let payload = data(7, 5);
    resolver.insert(ContentId::of(&payload), ContentEntry::Data(payload));

    assert_eq!(resolver.resident_size(), 5 + ENTRY_OVERHEAD);
}

#[test]
fn test_default_capacity() {
    assert_eq!(DoubleCacheConfig::default().capacity, 16 * 1024 * 1024);
}

// ============================================================================
// ATOMIC TRANSITIONS
// ============================================================================

#[test]
fn test_insert_if_absent_only_once() {
    let resolver = cache(1024);
    let id = ContentId::of(b"x");

    assert!(resolver.insert_if_absent(id, ContentEntry::Pending));
    assert!(!resolver.insert_if_absent(id, ContentEntry::Pending));
}

#[test]
fn test_complete_transitions() {
    let resolver = cache(1024);
    let payload = b"payload".to_vec();
    let id = ContentId::of(&payload);

    assert_eq!(resolver.complete(id, payload.clone()), Completion::Unsolicited);

    resolver.insert(id, ContentEntry::Pending);
    assert_eq!(resolver.complete(id, payload.clone()), Completion::Resolved);
    assert_eq!(resolver.complete(id, payload.clone()), Completion::AlreadyKnown);
    assert_eq!(resolver.content(&id), Some(ContentEntry::Data(payload)));
}

#[test]
fn test_concurrent_insert_if_absent_has_one_winner() {
    let resolver = Arc::new(cache(1024));
    let id = ContentId::of(b"race");

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let resolver = resolver.clone();
            std::thread::spawn(move || resolver.insert_if_absent(id, ContentEntry::Pending))
        })
        .collect();

    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);
}

// ============================================================================
// FORWARDING TO AN INNER RESOLVER
// ============================================================================

#[derive(Default)]
struct Recorded {
    inserts: Mutex<Vec<ContentId>>,
    deletes: Mutex<Vec<ContentId>>,
    lookups: Mutex<Vec<ContentId>>,
}

fn recording_cache(capacity: usize) -> (DoubleCacheResolver, Arc<Recorded>) {
    let recorded = Arc::new(Recorded::default());
    let (r1, r2, r3) = (recorded.clone(), recorded.clone(), recorded.clone());
    let inner = CallbackResolver::new()
        .on_insert(move |id, _| r1.inserts.lock().push(*id))
        .on_delete(move |id| r2.deletes.lock().push(*id))
        .on_content(move |id| {
            r3.lookups.lock().push(*id);
            None
        });
    let resolver = DoubleCacheResolver::new(
        DoubleCacheConfig::new().with_capacity(capacity),
        Some(Arc::new(inner)),
    );
    (resolver, recorded)
}

#[test]
fn test_each_operation_is_forwarded_once() {
    let (resolver, recorded) = recording_cache(1024);
    let id = ContentId::of(b"fwd");

    resolver.insert(id, ContentEntry::Data(b"fwd".to_vec()));
    resolver.content(&id);
    resolver.delete(&id);

    assert_eq!(*recorded.inserts.lock(), vec![id]);
    assert_eq!(*recorded.lookups.lock(), vec![id]);
    assert_eq!(*recorded.deletes.lock(), vec![id]);
}

#[test]
fn test_rejected_insert_is_still_forwarded() {
    let (resolver, recorded) = recording_cache(19);
    let payload = data(3, 10);
    let id = ContentId::of(&payload);

    resolver.insert(id, ContentEntry::Data(payload));

    assert_eq!(*recorded.inserts.lock(), vec![id]);
}

#[test]
fn test_miss_is_forwarded_and_inner_result_ignored() {
    let inner = CallbackResolver::new().on_content(|_| Some(ContentEntry::Data(b"inner".to_vec())));
    let resolver = DoubleCacheResolver::new(DoubleCacheConfig::default(), Some(Arc::new(inner)));

    assert_eq!(resolver.content(&ContentId::of(b"inner")), None);
}

#[test]
fn test_insert_if_absent_forwards_only_on_insert() {
    let (resolver, recorded) = recording_cache(1024);
    let id = ContentId::of(b"once");

    resolver.insert_if_absent(id, ContentEntry::Pending);
    resolver.insert_if_absent(id, ContentEntry::Pending);

    assert_eq!(recorded.inserts.lock().len(), 1);
}
