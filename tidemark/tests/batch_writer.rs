mod support;

use std::sync::{Arc, Mutex};

use support::{RecordingStore, item, items};
use tidemark::{BatchWriter, BatchWriterConfig, CancellationToken, MigrationError, Store};

fn writer(store: &Arc<RecordingStore>) -> BatchWriter {
    let store: Arc<dyn Store> = store.clone();
    BatchWriter::new(store, "audit", BatchWriterConfig::default(), CancellationToken::new())
}

// ============ Chunking ============

#[tokio::test]
async fn full_chunks_are_written_and_remainder_stays_pending() {
    let store = Arc::new(RecordingStore::new());
    let mut writer = writer(&store);

    writer.write(items(57), false).await.unwrap();
    assert_eq!(store.batch_sizes(), vec![25, 25]);
    assert_eq!(writer.written_count(), 50);
    assert_eq!(writer.pending_len(), 7);

    writer.flush().await.unwrap();
    assert_eq!(store.batch_sizes(), vec![25, 25, 7]);
    assert_eq!(writer.written_count(), 57);
    assert_eq!(writer.pending_len(), 0);
    assert_eq!(store.len("audit"), 57);
}

#[tokio::test]
async fn write_with_flush_leaves_nothing_pending() {
    let store = Arc::new(RecordingStore::new());
    let mut writer = writer(&store);

    writer.write(items(3), true).await.unwrap();
    assert_eq!(store.batch_sizes(), vec![3]);
    assert_eq!(writer.pending_len(), 0);
}

#[tokio::test]
async fn pending_items_carry_over_between_writes() {
    let store = Arc::new(RecordingStore::new());
    let mut writer = writer(&store);

    writer.write(items(20), false).await.unwrap();
    assert!(store.batch_sizes().is_empty());

    writer.write((20..30).map(|i| item(format!("{i:04}"))), false).await.unwrap();
    assert_eq!(store.batch_sizes(), vec![25]);
    assert_eq!(writer.pending_len(), 5);
}

#[tokio::test]
async fn chunks_preserve_insertion_order() {
    let store = Arc::new(RecordingStore::new());
    let config = BatchWriterConfig::default().with_chunk_size(4);
    let dyn_store: Arc<dyn Store> = store.clone();
    let mut writer = BatchWriter::new(dyn_store, "audit", config, CancellationToken::new());

    let order = ["d", "a", "c", "b", "e"];
    writer.write(order.iter().map(|sk| item(*sk)), true).await.unwrap();

    assert_eq!(store.batches(), vec![vec!["d", "a", "c", "b"], vec!["e"]]);
    assert_eq!(writer.written_count(), 5);
}

#[tokio::test]
async fn flush_on_empty_writer_makes_no_backend_call() {
    let store = Arc::new(RecordingStore::new());
    let mut writer = writer(&store);

    writer.flush().await.unwrap();
    writer.write(Vec::new(), true).await.unwrap();
    assert!(store.batch_sizes().is_empty());
}

// ============ Partial failure ============

#[tokio::test]
async fn unprocessed_items_fail_with_exactly_the_rejected_records() {
    let store = Arc::new(RecordingStore::new());
    store.reject("0003");
    store.reject("0017");
    let mut writer = writer(&store);

    let err = writer.write(items(25), false).await.unwrap_err();
    match err {
        MigrationError::UnprocessedItems(unprocessed) => {
            assert_eq!(unprocessed.table, "audit");
            let keys: Vec<_> = unprocessed
                .items
                .iter()
                .map(|record| record["sk"].as_str().unwrap().to_string())
                .collect();
            assert_eq!(keys, vec!["0003", "0017"]);
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(writer.written_count(), 23);
    assert_eq!(store.len("audit"), 23);
}

#[tokio::test]
async fn accepted_part_of_a_rejected_chunk_is_reported_as_progress() {
    let store = Arc::new(RecordingStore::new());
    store.reject("0005");
    store.reject("0006");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let mut writer = writer(&store).on_progress(move |total| sink.lock().unwrap().push(total));

    let result = writer.write(items(25), true).await;
    assert!(matches!(result, Err(MigrationError::UnprocessedItems(_))));
    assert_eq!(*seen.lock().unwrap(), vec![23]);
    assert_eq!(writer.written_count(), 23);
}

#[tokio::test]
async fn unprocessed_items_stop_later_chunks() {
    let store = Arc::new(RecordingStore::new());
    store.reject("0001");
    let mut writer = writer(&store);

    let result = writer.write(items(60), true).await;
    assert!(matches!(result, Err(MigrationError::UnprocessedItems(_))));
    assert_eq!(store.batch_sizes(), vec![25]);
    assert_eq!(writer.pending_len(), 35);
}

#[tokio::test]
async fn records_without_keys_surface_a_store_error() {
    let store = Arc::new(RecordingStore::new());
    let mut writer = writer(&store);

    let mut keyless = tidemark::Record::new();
    keyless.insert("value".into(), 1.into());
    let err = writer.write([keyless], true).await.unwrap_err();
    assert!(matches!(err, MigrationError::Store(_)));
    assert_eq!(writer.written_count(), 0);
}

// ============ Cancellation ============

#[tokio::test]
async fn cancellation_between_writes_keeps_remaining_items_pending() {
    let store = Arc::new(RecordingStore::new());
    let cancel = CancellationToken::new();
    let dyn_store: Arc<dyn Store> = store.clone();
    let mut writer = BatchWriter::new(dyn_store, "audit", BatchWriterConfig::default(), cancel.clone());

    writer.write(items(30), false).await.unwrap();
    assert_eq!(writer.written_count(), 25);

    cancel.cancel();
    let err = writer.flush().await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(writer.pending_len(), 5);
    assert_eq!(store.batch_sizes(), vec![25]);
}
