use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tick_features_data::{FeatureVector, RawTick};
use tick_features_engine::{
    ColdStore, FlushOutcome, HotStore, HybridFeatureStore, MemoryColdStore, MemoryHotStore,
    ProcessorSettings, RecoveryService, StoreError, StoreSettings, SymbolProcessor,
};

fn tick(symbol: &str, second: i64, close: f64) -> RawTick {
    RawTick {
        symbol: symbol.to_string(),
        timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap()
            + chrono::Duration::seconds(second),
        open: close - 0.25,
        high: close + 0.5,
        low: close - 0.5,
        close,
        volume: 1_000 + second as u64,
    }
}

fn stores() -> (Arc<MemoryHotStore>, Arc<MemoryColdStore>, Arc<HybridFeatureStore>) {
    let hot = Arc::new(MemoryHotStore::new());
    let cold = Arc::new(MemoryColdStore::new());
    let store = Arc::new(HybridFeatureStore::new(
        Some(hot.clone() as Arc<dyn HotStore>),
        Some(cold.clone() as Arc<dyn ColdStore>),
        StoreSettings::default(),
    ));
    (hot, cold, store)
}

fn settings(window_size: usize, threshold: usize, auto_flush: Duration) -> ProcessorSettings {
    ProcessorSettings {
        window_size,
        batch_write_threshold: threshold,
        auto_flush_timeout: auto_flush,
        recover_on_startup: true,
        shutdown_timeout: Duration::from_secs(2),
        close_store_on_cleanup: true,
    }
}

#[tokio::test]
async fn acme_sixth_tick_flushes_batch_of_six() {
    let (hot, cold, store) = stores();
    let processor = SymbolProcessor::start("ACME", store, settings(10, 5, Duration::from_secs(60)))
        .await
        .unwrap();

    for (i, close) in [10.0, 11.0, 12.0, 13.0, 14.0].into_iter().enumerate() {
        processor
            .add_record(tick("ACME", i as i64, close))
            .await
            .unwrap();
    }
    assert_eq!(processor.pending_records().await, 5);

    processor.add_record(tick("ACME", 5, 15.0)).await.unwrap();
    let latest = processor.get_latest_features().await.unwrap();

    assert!((latest.close - 15.0).abs() < f64::EPSILON);
    assert_eq!(cold.batch_sizes(), vec![6]);
    assert_eq!(processor.pending_records().await, 0);

    let cached = hot.get_latest("ACME").await.unwrap().unwrap();
    assert_eq!(cached.timestamp, tick("ACME", 5, 15.0).timestamp);

    // The 6th row has a 5-period mean over the first five closes
    assert_eq!(latest.avg_price_5, Some(12.0));

    processor.cleanup().await;
}

#[tokio::test]
async fn idle_symbol_is_flushed_exactly_once() {
    let (_, cold, store) = stores();
    let processor = SymbolProcessor::start(
        "ACME",
        store,
        settings(400, 100, Duration::from_millis(300)),
    )
    .await
    .unwrap();

    for i in 0..7 {
        processor
            .add_record(tick("ACME", i, 50.0 + i as f64))
            .await
            .unwrap();
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while cold.batch_sizes().is_empty() {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .expect("auto-flush did not happen");

    assert_eq!(processor.pending_records().await, 0);

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(cold.batch_sizes(), vec![7]);

    assert_eq!(processor.cleanup().await, FlushOutcome::Nothing);
}

#[tokio::test]
async fn recovery_round_trip_matches_stored_rows() {
    let (_, cold, store) = stores();
    let original: Vec<RawTick> = (0..12).map(|i| tick("ACME", i, 20.0 + i as f64 * 0.5)).collect();

    let first = SymbolProcessor::start("ACME", Arc::clone(&store), settings(50, 100, Duration::ZERO))
        .await
        .unwrap();
    for t in &original {
        first.add_record(t.clone()).await.unwrap();
    }
    assert_eq!(first.flush_pending().await, FlushOutcome::Written(12));
    assert_eq!(cold.rows_for("ACME").len(), 12);

    let recovered = RecoveryService::new(Arc::clone(&store))
        .recover("ACME", 50)
        .await;
    assert_eq!(recovered, original);

    let restarted = SymbolProcessor::start("ACME", store, settings(8, 100, Duration::ZERO))
        .await
        .unwrap();
    assert_eq!(restarted.buffer_snapshot().await, original[4..].to_vec());
    assert_eq!(restarted.pending_records().await, 0);
}

#[tokio::test]
async fn duplicate_batch_is_rolled_back() {
    let (_, cold, store) = stores();
    let rows: Vec<FeatureVector> = (0..3)
        .map(|i| FeatureVector::from_tick(&tick("ACME", i, 30.0)))
        .collect();
    store.store_historical_batch(rows.clone()).await.unwrap();

    let mut retry = vec![FeatureVector::from_tick(&tick("ACME", 3, 31.0))];
    retry.push(rows[1].clone());

    let err = store.store_historical_batch(retry).await.unwrap_err();
    assert!(matches!(err, StoreError::Duplicate(_)));
    assert_eq!(cold.rows_for("ACME").len(), 3);
    assert_eq!(store.historical_count("ACME").await, Some(3));
}

#[tokio::test]
async fn features_keep_computing_without_stores() {
    let store = Arc::new(HybridFeatureStore::detached(StoreSettings::default()));
    let processor = SymbolProcessor::start("ACME", store, settings(10, 2, Duration::ZERO))
        .await
        .unwrap();

    for i in 0..4 {
        processor
            .add_record(tick("ACME", i, 10.0 + i as f64))
            .await
            .unwrap();
    }

    let latest = processor.get_latest_features().await.unwrap();
    assert!((latest.close - 13.0).abs() < f64::EPSILON);
    assert_eq!(latest.close_1, Some(12.0));
    assert_eq!(processor.pending_records().await, 0);
}
