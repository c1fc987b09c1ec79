use crate::{
    BackendConfig, Error, MAX_STEP, MemoryStore, SegmentRange, SegmentRow, Sequencer,
    SequencerConfig, Store,
};
use std::sync::Arc;

async fn memory_sequencer(step: u32) -> (Sequencer, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let config = SequencerConfig::default().with_default_step(step);
    let sequencer = Sequencer::with_store(config, store.clone()).await.unwrap();
    (sequencer, store)
}

#[tokio::test]
async fn init_with_memory_backend() {
    let sequencer = Sequencer::init(SequencerConfig::new(BackendConfig::Memory))
        .await
        .unwrap();
    assert_eq!(sequencer.get_next_id("order").await, Ok(1));
    assert_eq!(sequencer.get_next_id("order").await, Ok(2));
    sequencer.close().await.unwrap();
}

#[tokio::test]
async fn init_rejects_invalid_configuration() {
    let config = SequencerConfig::default().with_default_step(MAX_STEP + 1);
    assert!(matches!(
        Sequencer::init(config).await,
        Err(Error::InvalidConfiguration { .. })
    ));
}

#[tokio::test]
async fn empty_key_is_rejected() {
    let (sequencer, _) = memory_sequencer(10).await;
    assert!(matches!(
        sequencer.get_next_id("").await,
        Err(Error::InvalidRequest { .. })
    ));
    assert!(matches!(
        sequencer.get_segment("", 5).await,
        Err(Error::InvalidRequest { .. })
    ));
    sequencer.close().await.unwrap();
}

#[tokio::test]
async fn segments_are_contiguous_and_disjoint_from_cached_ids() {
    let (sequencer, _) = memory_sequencer(1000).await;

    // Caches [1, 1000].
    assert_eq!(sequencer.get_next_id("order").await, Ok(1));

    let first = sequencer.get_segment("order", 100).await.unwrap();
    assert!(first.supported);
    assert_eq!(first.len(), 100);
    assert_eq!((first.from, first.to), (1001, 1100));

    let second = sequencer.get_segment("order", 100).await.unwrap();
    assert!(second.from > first.to);
    assert_eq!((second.from, second.to), (1101, 1200));
    assert_eq!(second.to_string(), "[1101, 1200]");

    assert_eq!(sequencer.get_next_id("order").await, Ok(2));
    sequencer.close().await.unwrap();
}

#[tokio::test]
async fn zero_sized_segment_is_a_probe() {
    let (sequencer, store) = memory_sequencer(10).await;

    let probe = sequencer.get_segment("order", 0).await.unwrap();
    assert_eq!(
        probe,
        SegmentRange {
            supported: true,
            from: 0,
            to: 0
        }
    );
    assert!(probe.is_empty());
    assert!(store.is_empty(), "a probe must not allocate");

    assert!(matches!(
        sequencer.get_segment("order", MAX_STEP + 1).await,
        Err(Error::InvalidRequest { .. })
    ));
    sequencer.close().await.unwrap();
}

#[tokio::test]
async fn bigger_than_guards_startup() {
    let store = Arc::new(MemoryStore::new());
    store.init_max_id("order", 500, 100).await.unwrap();

    let too_high = SequencerConfig::default().with_bigger_than("order", 1000);
    assert!(matches!(
        Sequencer::with_store(too_high, store.clone()).await,
        Err(Error::InvalidConfiguration { .. })
    ));

    let missing = SequencerConfig::default().with_bigger_than("user", 1);
    assert!(Sequencer::with_store(missing, store.clone()).await.is_err());

    let satisfied = SequencerConfig::default()
        .with_bigger_than("order", 500)
        .with_bigger_than("user", 0);
    let sequencer = Sequencer::with_store(satisfied, store.clone()).await.unwrap();
    assert_eq!(sequencer.get_next_id("order").await, Ok(500));
    sequencer.close().await.unwrap();
}

#[tokio::test]
async fn describe_and_create_key() {
    let (sequencer, _) = memory_sequencer(10).await;

    assert_eq!(
        sequencer.describe("invoice").await,
        Err(Error::UnknownKey {
            key: String::from("invoice")
        })
    );

    let row = SegmentRow::new("invoice", 0).with_description("invoice numbers");
    sequencer.create_key(row.clone()).await.unwrap();

    let stored = sequencer.describe("invoice").await.unwrap();
    assert_eq!(stored.step, 1);
    assert_eq!(stored.max_id, 1);
    assert_eq!(stored.description, "invoice numbers");

    assert!(matches!(
        sequencer.create_key(row).await,
        Err(Error::InvalidRequest { .. })
    ));
    assert!(matches!(
        sequencer.create_key(SegmentRow::new("blank", 10)).await,
        Err(Error::InvalidRequest { .. })
    ));
    assert!(matches!(
        sequencer
            .create_key(SegmentRow::new("huge", MAX_STEP + 1).with_description("x"))
            .await,
        Err(Error::InvalidRequest { .. })
    ));

    sequencer.close().await.unwrap();
}

#[tokio::test]
async fn init_max_id_moves_next_id_forward() {
    let (sequencer, _) = memory_sequencer(1000).await;
    assert_eq!(sequencer.get_next_id("order").await, Ok(1));
    assert_eq!(sequencer.cached_keys(), vec![String::from("order")]);

    sequencer.init_max_id("order", 5000, 0).await.unwrap();
    assert!(sequencer.cached_keys().is_empty());
    assert_eq!(sequencer.describe("order").await.unwrap().step, 1000);
    assert_eq!(sequencer.get_next_id("order").await, Ok(5000));

    // Lower starts are ignored.
    sequencer.init_max_id("order", 10, 0).await.unwrap();
    assert_eq!(sequencer.get_next_id("order").await, Ok(6000));

    sequencer.close().await.unwrap();
}

#[tokio::test]
async fn registered_step_sizes_cached_segments() {
    let (sequencer, _) = memory_sequencer(1000).await;
    sequencer
        .create_key(SegmentRow::new("small", 10).with_description("small batches"))
        .await
        .unwrap();

    assert_eq!(sequencer.get_next_id("small").await, Ok(1));
    let row = sequencer.describe("small").await.unwrap();
    assert_eq!((row.max_id, row.step), (11, 10));

    for expected in 2..=25 {
        assert_eq!(sequencer.get_next_id("small").await, Ok(expected));
    }
    let row = sequencer.describe("small").await.unwrap();
    assert_eq!(row.step, 10);
    assert_eq!((row.max_id - 1) % 10, 0, "advanced by a foreign step");
    assert!(row.max_id <= 41);

    // A step given to init_max_id sizes the next segment.
    sequencer.init_max_id("batch", 1, 5).await.unwrap();
    assert_eq!(sequencer.get_next_id("batch").await, Ok(1));
    assert_eq!(sequencer.describe("batch").await.unwrap().max_id, 6);

    sequencer.close().await.unwrap();
}

#[tokio::test]
async fn zero_start_never_issues_zero() {
    let (sequencer, _) = memory_sequencer(10).await;
    sequencer.init_max_id("zero", 0, 1).await.unwrap();
    assert_eq!(sequencer.describe("zero").await.unwrap().max_id, 1);

    let range = sequencer.get_segment("zero", 1).await.unwrap();
    assert_eq!((range.from, range.to), (1, 1));
    assert_eq!(range.len(), 1);
    assert!(!range.is_empty());

    assert_eq!(sequencer.get_next_id("zero").await, Ok(2));
    sequencer.close().await.unwrap();
}

#[tokio::test]
async fn close_is_idempotent_and_final() {
    let (sequencer, _) = memory_sequencer(10).await;
    assert!(!sequencer.is_closed());

    sequencer.close().await.unwrap();
    sequencer.close().await.unwrap();
    assert!(sequencer.is_closed());

    assert_eq!(sequencer.get_next_id("order").await, Err(Error::Shutdown));
    assert_eq!(sequencer.get_segment("order", 1).await, Err(Error::Shutdown));
    assert_eq!(sequencer.describe("order").await, Err(Error::Shutdown));
}
