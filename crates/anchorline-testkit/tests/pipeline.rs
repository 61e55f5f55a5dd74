//! End-to-end behaviour of the pipeline over local backends.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use anchorline::{
    IngestionCoordinator, IngestionError, LoopExit, Pipeline, PipelineError, RetrievalError,
};
use anchorline_core::{ContentAddress, ElementType, ShapeMetadata};
use anchorline_store::{AppendOutcome, ContentStore, FailureKind, Ledger};
use anchorline_testkit::{fruit_items, item, label, FlakyContentStore, FlakyLedger, TestFixture};

#[tokio::test]
async fn test_ingest_round_trip() {
    let pipeline = TestFixture::new().pipeline();
    let record = pipeline.ingest(item("apple", b"red and crisp", 7)).await.unwrap();

    let latest = pipeline.get_latest(&label("apple")).await.unwrap();
    assert_eq!(&latest.payload[..], b"red and crisp");
    assert_eq!(latest.address, record.address);
    assert_eq!(latest.timestamp, 7);
}

#[tokio::test]
async fn test_equal_payloads_share_an_address() {
    let fixture = TestFixture::new();
    let a = fixture.store.put(b"same").await.unwrap();
    let b = fixture.store.put(b"same").await.unwrap();
    assert_eq!(a, b);
    assert_eq!(fixture.store.len(), 1);
}

#[tokio::test]
async fn test_channel_preserves_order() {
    let pipeline = TestFixture::new().pipeline();
    let publisher = pipeline.channel();
    let mut sub = publisher.subscribe().await;

    let first = item("apple", b"i1", 1);
    let second = item("apple", b"i2", 2);
    publisher.publish(&first).await.unwrap();
    publisher.publish(&second).await.unwrap();
    publisher.close().await;

    let report = pipeline.ingestion().run(&mut sub).await;
    assert_eq!(report.ingested, 2);
    assert_eq!(report.exit, LoopExit::ChannelClosed);

    let history: Vec<_> = pipeline
        .list_events(&label("apple"))
        .await
        .unwrap()
        .map(|r| r.address)
        .collect();
    assert_eq!(history, vec![first.address(), second.address()]);
    assert_eq!(&pipeline.get_latest(&label("apple")).await.unwrap().payload[..], b"i2");
}

#[tokio::test]
async fn test_store_failure_is_isolated() {
    let fixture = TestFixture::new();
    let store = Arc::new(FlakyContentStore::new(fixture.store.clone()));
    let ledger = Arc::new(FlakyLedger::new(fixture.ledger.clone()));

    let items = [
        item("apple", b"one", 1),
        item("banana", b"two", 2),
        item("lemon", b"three", 3),
    ];
    store.fail_puts_of(items[1].payload.clone());

    let (tx, mut failures) = mpsc::unbounded_channel();
    let coordinator = IngestionCoordinator::new(store.clone(), ledger.clone())
        .with_receive_timeout(Duration::from_millis(10))
        .with_failure_sink(tx);
    let publisher = anchorline::Channel::new(8);
    let mut sub = publisher.subscribe().await;
    for i in &items {
        publisher.publish(i).await.unwrap();
    }
    publisher.close().await;

    let report = coordinator.run(&mut sub).await;
    assert_eq!((report.ingested, report.failed), (2, 1));

    match failures.try_recv().unwrap() {
        IngestionError::StoreFailure { item, source } => {
            assert_eq!(item, items[1]);
            assert_eq!(source.kind(), FailureKind::Unavailable);
        }
        other => panic!("expected StoreFailure, got {:?}", other),
    }
    assert!(failures.try_recv().is_err());

    assert_eq!(ledger.appends(), 2);
    assert!(fixture.ledger.latest(&label("banana")).await.unwrap().is_none());
    assert!(fixture.ledger.latest(&label("lemon")).await.unwrap().is_some());
}

#[tokio::test]
async fn test_missing_block_and_unknown_label() {
    let fixture = TestFixture::new();
    let pipeline = fixture.pipeline();
    let record = pipeline.ingest(item("apple", b"gone soon", 1)).await.unwrap();
    assert!(fixture.store.purge(&record.address).await.unwrap());

    match pipeline.get_latest(&label("apple")).await {
        Err(PipelineError::Retrieval(RetrievalError::BlockMissing { label: l, address })) => {
            assert_eq!(l, label("apple"));
            assert_eq!(address, record.address);
        }
        other => panic!("expected BlockMissing, got {:?}", other),
    }
    assert!(matches!(
        pipeline.get_latest(&label("quince")).await,
        Err(PipelineError::Retrieval(RetrievalError::NotFound(_)))
    ));
}

#[tokio::test]
async fn test_stop_while_idle_exits_within_one_receive() {
    let pipeline = TestFixture::new().pipeline();
    let publisher = pipeline.channel();
    let mut sub = publisher.subscribe().await;
    let coordinator = pipeline
        .ingestion()
        .with_receive_timeout(Duration::from_millis(20));
    let handle = coordinator.handle();

    let runner = tokio::spawn(async move { coordinator.run(&mut sub).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stopped_at = Instant::now();
    handle.stop();
    let report = tokio::time::timeout(Duration::from_millis(500), runner)
        .await
        .expect("loop did not stop")
        .unwrap();
    assert_eq!(report.exit, LoopExit::Stopped);
    assert!(stopped_at.elapsed() < Duration::from_millis(200));
    drop(publisher);
}

#[tokio::test]
async fn test_anchor_retry_does_not_store_again() {
    let fixture = TestFixture::new();
    let store = Arc::new(FlakyContentStore::new(fixture.store.clone()));
    let ledger = Arc::new(FlakyLedger::new(fixture.ledger.clone()));
    let coordinator = IngestionCoordinator::new(store.clone(), ledger.clone());

    ledger.fail_next_appends(1);
    let record = match coordinator.on_item_received(item("apple", b"late", 5)).await {
        Err(IngestionError::AnchorFailure { record, .. }) => record,
        other => panic!("expected AnchorFailure, got {:?}", other),
    };
    assert_eq!(record.address, ContentAddress::of(b"late"));
    assert!(fixture.ledger.latest(&label("apple")).await.unwrap().is_none());

    assert_eq!(
        coordinator.retry_anchor(record.clone()).await.unwrap(),
        AppendOutcome::Appended { seq: 1 }
    );
    assert_eq!(
        coordinator.retry_anchor(record).await.unwrap(),
        AppendOutcome::AlreadyAnchored { seq: 1 }
    );
    assert_eq!(store.puts(), 1);
}

#[tokio::test]
async fn test_lost_ack_retry_is_idempotent() {
    let fixture = TestFixture::new();
    let ledger = Arc::new(FlakyLedger::new(fixture.ledger.clone()));
    let coordinator = IngestionCoordinator::new(fixture.store.clone(), ledger.clone());

    ledger.lose_next_acks(1);
    let error = coordinator
        .on_item_received(item("apple", b"landed", 5))
        .await
        .unwrap_err();
    assert_eq!(error.label(), Some(&label("apple")));
    let record = match error {
        IngestionError::AnchorFailure { record, .. } => record,
        other => panic!("expected AnchorFailure, got {:?}", other),
    };

    assert_eq!(
        coordinator.retry_anchor(record).await.unwrap(),
        AppendOutcome::AlreadyAnchored { seq: 1 }
    );
    assert_eq!(fixture.ledger.history(&label("apple")).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_tampered_block_is_rejected() {
    let fixture = TestFixture::new();
    let store = Arc::new(FlakyContentStore::new(fixture.store.clone()));
    let pipeline = Pipeline::new(store.clone(), fixture.ledger.clone());

    let record = pipeline.ingest(item("apple", b"genuine", 1)).await.unwrap();
    store.tamper(record.address);

    match pipeline.get_latest(&label("apple")).await {
        Err(PipelineError::Retrieval(RetrievalError::IntegrityMismatch { address, actual, .. })) => {
            assert_eq!(address, record.address);
            assert_ne!(actual, record.address);
        }
        other => panic!("expected IntegrityMismatch, got {:?}", other),
    }
}

#[tokio::test]
async fn test_shape_travels_with_the_item() {
    let pipeline = TestFixture::new().pipeline();
    let publisher = pipeline.channel();
    let mut sub = publisher.subscribe().await;

    let shape = ShapeMetadata::new(vec![4, 3, 3], ElementType::U8);
    let image = item("orange", &[0x80; 36], 9).with_shape(shape.clone());
    publisher.publish(&image).await.unwrap();
    publisher.close().await;
    pipeline.ingestion().run(&mut sub).await;

    let latest = pipeline.get_latest(&label("orange")).await.unwrap();
    assert_eq!(latest.shape, Some(shape));
    assert!(latest.shape.unwrap().fits(latest.payload.len()));
}

#[tokio::test]
async fn test_labels_sharing_bytes_keep_their_own_shape() {
    let fixture = TestFixture::new();
    let pipeline = fixture.pipeline();
    let cube = ShapeMetadata::new(vec![2, 2, 3], ElementType::U8);
    let flat = ShapeMetadata::new(vec![12], ElementType::U8);

    pipeline
        .ingest(item("apple", &[1u8; 12], 1).with_shape(cube.clone()))
        .await
        .unwrap();
    pipeline.ingest(item("lemon", &[1u8; 12], 2)).await.unwrap();
    pipeline
        .ingest(item("pear", &[1u8; 12], 3).with_shape(flat.clone()))
        .await
        .unwrap();
    assert_eq!(fixture.store.len(), 1);

    assert_eq!(pipeline.get_latest(&label("apple")).await.unwrap().shape, Some(cube));
    assert_eq!(pipeline.get_latest(&label("lemon")).await.unwrap().shape, None);
    assert_eq!(pipeline.get_latest(&label("pear")).await.unwrap().shape, Some(flat));
}

#[tokio::test]
async fn test_producer_and_loop_run_concurrently() {
    let pipeline = TestFixture::new().pipeline();
    let publisher = pipeline.channel();
    let mut sub = publisher.subscribe().await;

    let coordinator = pipeline.ingestion();
    let runner = tokio::spawn(async move { coordinator.run(&mut sub).await });

    let items = fruit_items(20);
    let producer = {
        let items = items.clone();
        tokio::spawn(async move {
            for i in &items {
                publisher.publish(i).await.unwrap();
            }
            publisher.close().await;
        })
    };
    producer.await.unwrap();
    let report = runner.await.unwrap();
    assert_eq!(report.ingested, 20);
    assert_eq!(report.exit, LoopExit::ChannelClosed);

    let mut expected = HashMap::new();
    for i in &items {
        expected.insert(i.label.clone(), i.payload.clone());
    }
    for (l, payload) in expected {
        assert_eq!(pipeline.get_latest(&l).await.unwrap().payload, payload);
        assert_eq!(pipeline.list_events(&l).await.unwrap().len(), 5);
    }
}
