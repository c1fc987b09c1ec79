use crate::{Error, MemoryStore, Segment, SegmentRow, Store};
use std::collections::HashSet;
use std::sync::Arc;

async fn reserve_range(store: &dyn Store, key: &str, default_step: u32) -> (u64, u64) {
    let row = store.reserve_next(key, default_step).await.unwrap();
    let segment = Segment::from_reservation(row.max_id, row.step).unwrap();
    (segment.min(), segment.max())
}

#[tokio::test]
async fn first_reservation_registers_key_at_one() {
    let store = MemoryStore::new();
    assert!(store.is_empty());

    let row = store.reserve_next("order", 10).await.unwrap();
    assert_eq!(row.biz_tag, "order");
    assert_eq!(row.max_id, 11);
    assert_eq!(row.step, 10);
    assert_eq!(row.high_water_mark(), 10);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn reservations_are_contiguous_and_disjoint() {
    let store = MemoryStore::new();
    assert_eq!(reserve_range(&store, "order", 1000).await, (1, 1000));
    assert_eq!(reserve_range(&store, "order", 1000).await, (1001, 2000));
    // An explicit count does not change the registered step.
    let row = store.reserve_exact("order", 5, 1000).await.unwrap();
    assert_eq!((row.max_id, row.step), (2006, 5));
    assert_eq!(reserve_range(&store, "order", 1000).await, (2006, 3005));
    // Keys do not share a high-water mark.
    assert_eq!(reserve_range(&store, "user", 3).await, (1, 3));
}

#[tokio::test]
async fn init_max_id_never_lowers() {
    let store = MemoryStore::new();
    store.init_max_id("order", 500, 100).await.unwrap();
    assert_eq!(store.get("order").await.unwrap().unwrap().max_id, 500);

    store.init_max_id("order", 200, 100).await.unwrap();
    assert_eq!(store.get("order").await.unwrap().unwrap().max_id, 500);

    // Repeating is a no-op.
    store.init_max_id("order", 500, 100).await.unwrap();
    assert_eq!(reserve_range(&store, "order", 100).await, (500, 599));
}

#[tokio::test]
async fn registered_step_sizes_every_reservation() {
    let store = MemoryStore::new();
    store
        .create(&SegmentRow::new("small", 10).with_description("small batches"))
        .await
        .unwrap();

    // The default only applies to keys registered on the fly.
    let row = store.reserve_next("small", 1000).await.unwrap();
    assert_eq!((row.max_id, row.step), (11, 10));
    assert_eq!(reserve_range(&store, "small", 1000).await, (11, 20));

    store.init_max_id("small", 100, 3).await.unwrap();
    assert_eq!(reserve_range(&store, "small", 1000).await, (100, 102));
    assert_eq!(store.get("small").await.unwrap().unwrap().step, 3);
}

#[tokio::test]
async fn create_rejects_duplicates() {
    let store = MemoryStore::new();
    let row = SegmentRow::new("order", 50).with_description("order numbers");
    store.create(&row).await.unwrap();

    let stored = store.get("order").await.unwrap().unwrap();
    assert_eq!(stored.description, "order numbers");
    assert_eq!(stored.max_id, 1);

    assert!(matches!(
        store.create(&row).await,
        Err(Error::InvalidRequest { .. })
    ));
    assert_eq!(store.get("missing").await.unwrap(), None);
}

#[tokio::test]
async fn overflow_is_reported_not_wrapped() {
    let store = MemoryStore::new();
    store.init_max_id("order", u64::MAX - 5, 1).await.unwrap();

    let err = store.reserve_exact("order", 10, 1).await.unwrap_err();
    assert!(matches!(err, Error::StoreUnavailable { ref key, .. } if key == "order"));
    assert_eq!(store.get("order").await.unwrap().unwrap().max_id, u64::MAX - 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reservations_never_overlap() {
    let store = Arc::new(MemoryStore::new());

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let mut ranges = Vec::new();
                for _ in 0..50 {
                    ranges.push(reserve_range(store.as_ref(), "order", 7).await);
                }
                ranges
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for task in tasks {
        for (min, max) in task.await.unwrap() {
            for id in min..=max {
                assert!(seen.insert(id), "{id} reserved twice");
            }
        }
    }
    assert_eq!(seen.len(), 8 * 50 * 7);
    assert_eq!(seen.iter().max(), Some(&(8 * 50 * 7)));
}

#[cfg(feature = "postgres")]
mod postgres_rows {
    use crate::store::postgres::{from_tuple, reserved_row};
    use crate::{Error, Segment};

    #[test]
    fn tuple_maps_columns() {
        let row = from_tuple((7, "order".into(), 1001, 1000, "orders".into(), 1_700_000_000))
            .unwrap();
        assert_eq!(row.biz_tag, "order");
        assert_eq!((row.max_id, row.step), (1001, 1000));
        assert_eq!(row.description, "orders");
        assert_eq!(row.update_time, 1_700_000_000);
        assert_eq!(row.high_water_mark(), 1000);
    }

    #[test]
    fn negative_columns_are_rejected() {
        assert!(matches!(
            from_tuple((1, "order".into(), -1, 10, String::new(), 0)),
            Err(Error::StoreUnavailable { .. })
        ));
        assert!(matches!(
            from_tuple((1, "order".into(), 11, -10, String::new(), 0)),
            Err(Error::StoreUnavailable { .. })
        ));
    }

    #[test]
    fn reservation_reports_the_applied_step() {
        let tuple = || (1, "order".to_owned(), 1011, 10, String::new(), 0);

        // Advanced by the row's own step.
        let row = reserved_row(tuple(), None).unwrap();
        let segment = Segment::from_reservation(row.max_id, row.step).unwrap();
        assert_eq!((segment.min(), segment.max()), (1001, 1010));

        // Advanced by an explicit count.
        let row = reserved_row(tuple(), Some(3)).unwrap();
        let segment = Segment::from_reservation(row.max_id, row.step).unwrap();
        assert_eq!((segment.min(), segment.max()), (1008, 1010));

        // A zero step column still advanced by one.
        let row = reserved_row((1, "order".into(), 5, 0, String::new(), 0), None).unwrap();
        assert_eq!(row.step, 1);
    }
}

#[cfg(feature = "mongo")]
mod mongo_documents {
    use crate::store::mongo::{SequencerDocument, last_value_before};
    use crate::{Error, Segment, SegmentRow};

    fn document(sequencer_value: i64, step: i32) -> SequencerDocument {
        SequencerDocument {
            id: "order".into(),
            sequencer_value,
            step,
            description: String::new(),
            update_time: 0,
        }
    }

    #[test]
    fn last_value_maps_to_next_unreserved() {
        let row = document(1000, 1000).into_row().unwrap();
        assert_eq!((row.max_id, row.step), (1001, 1000));
        assert_eq!(row.high_water_mark(), 1000);

        // A fresh upsert of one step of 10 issued 1..=10.
        let row = document(10, 10).into_row().unwrap();
        let segment = Segment::from_reservation(row.max_id, row.step).unwrap();
        assert_eq!((segment.min(), segment.max()), (1, 10));
    }

    #[test]
    fn negative_fields_are_rejected() {
        assert!(matches!(
            document(-1, 10).into_row(),
            Err(Error::StoreUnavailable { .. })
        ));
        assert!(matches!(
            document(10, -10).into_row(),
            Err(Error::StoreUnavailable { .. })
        ));
    }

    #[test]
    fn seeded_start_is_the_first_value_issued() {
        let last = last_value_before(5000).unwrap();
        assert_eq!(last, 4999);

        // The next reservation of 100 increments the counter by 100.
        let row = document(last + 100, 100).into_row().unwrap();
        let segment = Segment::from_reservation(row.max_id, row.step).unwrap();
        assert_eq!((segment.min(), segment.max()), (5000, 5099));

        assert_eq!(last_value_before(0).unwrap(), 0);
        assert!(last_value_before(u64::MAX).is_err());
    }

    #[test]
    fn created_row_keeps_its_high_water_mark() {
        let row = SegmentRow::new("order", 50)
            .with_description("orders")
            .with_max_id(42);
        let stored = SequencerDocument::from_row(&row).unwrap();
        assert_eq!(stored.sequencer_value, 41);

        let back = stored.into_row().unwrap();
        assert_eq!((back.max_id, back.step), (42, 50));
        assert_eq!(back.description, "orders");
    }
}
