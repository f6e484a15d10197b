//! Windowed reads over stored objects.

use std::sync::Arc;

use chainwire_network::ObjectCursor;
use chainwire_nullables::NullStore;
use chainwire_store::{ObjectStore, StoreError};
use chainwire_types::ObjectId;

#[test]
fn cursor_reads_in_windows() {
    let store = Arc::new(NullStore::new());
    let id = ObjectId::new("blk");
    let data: Vec<u8> = (0..25_000u32).map(|n| n as u8).collect();
    store.save(&id, &data).unwrap();

    let cursor = ObjectCursor::open(store.clone(), id, 10_000).unwrap();
    assert_eq!(cursor.size(), 25_000);
    let chunks: Vec<_> = cursor.map(Result::unwrap).collect();

    assert_eq!(
        chunks.iter().map(|c| (c.ordinal, c.len())).collect::<Vec<_>>(),
        vec![(0, 10_000), (1, 10_000), (2, 5_000)]
    );
    assert_eq!(store.range_reads(), 3);
    let joined: Vec<u8> = chunks.into_iter().flat_map(|c| c.items).collect();
    assert_eq!(joined, data);
}

#[test]
fn missing_object_cannot_be_opened() {
    let store = Arc::new(NullStore::new());
    let err = ObjectCursor::open(store, ObjectId::new("nope"), 10).err().unwrap();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[test]
fn store_error_ends_the_cursor() {
    let store = Arc::new(NullStore::new());
    let id = ObjectId::new("obj");
    store.save(&id, &[1; 30]).unwrap();
    let mut cursor = ObjectCursor::open(store.clone(), id, 10).unwrap();
    assert!(cursor.next().unwrap().is_ok());

    store.stop().unwrap();
    assert_eq!(cursor.next().unwrap().unwrap_err(), StoreError::NotRunning);
    assert!(cursor.next().is_none());
}
