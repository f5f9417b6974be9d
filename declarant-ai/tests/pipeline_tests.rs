//! End-to-end batch pipeline tests
//!
//! Upload bytes → normalization → concurrent classification → store, with a
//! scripted classifier standing in for the external service.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use declarant_ai::db::sessions;
use declarant_ai::models::{BatchState, RowErrorKind, RowStatus};
use declarant_ai::services::exporter;
use declarant_ai::services::{BatchError, BatchWorkflow, NormalizeError, ProgressTracker};
use declarant_common::events::{DeclarantEvent, EventBus};
use helpers::{csv_upload, numbered_csv, test_config, test_pool, Behavior, FakeClassifier};
use tokio_util::sync::CancellationToken;

async fn workflow(client: Arc<FakeClassifier>) -> (BatchWorkflow, sqlx::SqlitePool, EventBus) {
    let pool = test_pool().await;
    let bus = EventBus::new(1000);
    let wf = BatchWorkflow::new(pool.clone(), bus.clone(), client, test_config());
    (wf, pool, bus)
}

#[tokio::test]
async fn test_missing_description_excluded_but_kept_in_session() {
    let client = Arc::new(FakeClassifier::new());
    let (wf, pool, _bus) = workflow(Arc::clone(&client)).await;

    let upload = b"description,quantity,unit\nGreen tea,1,kg\n,2,kg\nCoffee beans,3,kg\n";
    let batch = wf.prepare("goods.csv", upload, None, None).await.unwrap();

    assert_eq!(batch.items.len(), 2);
    assert_eq!(batch.total_rows, 3);
    assert_eq!(batch.row_errors.len(), 1);
    assert_eq!(batch.row_errors[0].row_index, 1);
    assert_eq!(batch.row_errors[0].kind, RowErrorKind::MissingField);

    let session_id = batch.session_id;
    let total = batch.items.len();
    let report = wf
        .run(batch, Arc::new(ProgressTracker::new(total)), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.state, BatchState::Completed);
    assert_eq!(report.successful, 2);
    assert_eq!(report.excluded, 1);
    assert_eq!(client.calls(), 2);

    let session = sessions::get_session(&pool, session_id).await.unwrap();
    assert_eq!(session.rows.len(), 3);
    assert_eq!(session.rows[0].status, RowStatus::Success);
    assert_eq!(session.rows[1].status, RowStatus::Excluded);
    assert!(session.rows[1].exclusion_reason.as_deref().unwrap().contains("description"));
    assert!(session.rows[1].result.is_none());
    assert_eq!(session.rows[2].status, RowStatus::Success);
    assert_eq!(session.rows[2].item.description, "Coffee beans");
}

#[tokio::test]
async fn test_hanging_item_times_out_and_batch_completes() {
    let client = Arc::new(FakeClassifier::new().with(1, Behavior::Hang));
    let (wf, pool, _bus) = workflow(Arc::clone(&client)).await;

    let batch = wf.prepare("goods.csv", &numbered_csv(5), None, None).await.unwrap();
    let session_id = batch.session_id;

    let report = wf
        .run(batch, Arc::new(ProgressTracker::new(5)), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.state, BatchState::Completed);
    assert_eq!(report.successful, 4);
    assert_eq!(report.failed, 1);

    let session = sessions::get_session(&pool, session_id).await.unwrap();
    let timed_out = &session.rows[1];
    assert_eq!(timed_out.status, RowStatus::Failed);
    let result = timed_out.result.as_ref().unwrap();
    assert_eq!(result.confidence, 0.0);
    assert!(result.suggested_code.is_empty());
    assert!(result.rationale.contains("timed out"));
    assert!(session
        .errors
        .iter()
        .any(|e| e.row_index == 1 && e.kind == RowErrorKind::Classification));

    for i in [0, 2, 3, 4] {
        assert_eq!(session.rows[i].status, RowStatus::Success, "row {}", i);
    }
}

#[tokio::test]
async fn test_oversized_batch_rejected_without_session() {
    let client = Arc::new(FakeClassifier::new());
    let (wf, pool, _bus) = workflow(Arc::clone(&client)).await;

    let err = wf.prepare("big.csv", &numbered_csv(1001), None, None).await.unwrap_err();
    assert!(matches!(
        err,
        BatchError::Normalize(NormalizeError::BatchTooLarge { rows: 1001, max: 1000 })
    ));

    assert!(sessions::list_sessions(&pool, 10, 0).await.unwrap().is_empty());
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn test_batch_at_cap_is_accepted() {
    let client = Arc::new(FakeClassifier::new().with_default_delay(Duration::ZERO));
    let (wf, _pool, _bus) = workflow(client).await;

    let batch = wf.prepare("cap.csv", &numbered_csv(1000), None, None).await.unwrap();
    assert_eq!(batch.items.len(), 1000);
}

#[tokio::test]
async fn test_results_aligned_with_rows_despite_completion_order() {
    let client = Arc::new(
        FakeClassifier::new()
            .with(0, Behavior::Slow(Duration::from_millis(150)))
            .with(1, Behavior::Succeed { code: "0902.10.000", confidence: 85.0 })
            .with(2, Behavior::Succeed { code: "7318.15.000", confidence: 55.0 })
            .with(3, Behavior::Succeed { code: "6205.20.000", confidence: 12.0 }),
    );
    let (wf, pool, _bus) = workflow(Arc::clone(&client)).await;

    let upload = csv_upload(&["Widget", "Green tea", "Steel bolts", "Cotton shirt"]);
    let batch = wf.prepare("goods.csv", &upload, None, None).await.unwrap();
    let session_id = batch.session_id;
    wf.run(batch, Arc::new(ProgressTracker::new(4)), CancellationToken::new())
        .await
        .unwrap();

    let session = sessions::get_session(&pool, session_id).await.unwrap();
    let codes: Vec<&str> = session
        .rows
        .iter()
        .map(|r| r.result.as_ref().unwrap().suggested_code.as_str())
        .collect();
    assert_eq!(codes, vec!["0000.00.000", "0902.10.000", "7318.15.000", "6205.20.000"]);
    for (i, row) in session.rows.iter().enumerate() {
        assert_eq!(row.row_index, i);
        assert_eq!(row.result.as_ref().unwrap().row_index, i);
    }

    assert_eq!(session.statistics.high_confidence, 2);
    assert_eq!(session.statistics.medium_confidence, 1);
    assert_eq!(session.statistics.low_confidence, 1);
}

#[tokio::test]
async fn test_concurrency_limit_respected() {
    let client = Arc::new(FakeClassifier::new().with_default_delay(Duration::from_millis(20)));
    let (wf, _pool, _bus) = workflow(Arc::clone(&client)).await;

    let batch = wf.prepare("goods.csv", &numbered_csv(20), None, None).await.unwrap();
    wf.run(batch, Arc::new(ProgressTracker::new(20)), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(client.calls(), 20);
    assert!(client.max_in_flight() <= test_config().concurrency_limit);
}

#[tokio::test]
async fn test_export_is_repeatable() {
    let client = Arc::new(FakeClassifier::new().with(2, Behavior::Fail("quota exceeded")));
    let (wf, pool, _bus) = workflow(client).await;

    let batch = wf.prepare("goods.csv", &numbered_csv(4), None, None).await.unwrap();
    let session_id = batch.session_id;
    wf.run(batch, Arc::new(ProgressTracker::new(4)), CancellationToken::new())
        .await
        .unwrap();
    sessions::annotate(&pool, session_id, 0, Some("verified"), None)
        .await
        .unwrap();

    let first = exporter::export_csv(&sessions::get_session(&pool, session_id).await.unwrap()).unwrap();
    let second = exporter::export_csv(&sessions::get_session(&pool, session_id).await.unwrap()).unwrap();
    assert_eq!(first, second);

    let text = String::from_utf8_lossy(&first);
    assert!(text.contains("verified"));
    assert!(text.contains("quota exceeded"));
    // Header plus one line per row
    assert_eq!(text.lines().count(), 5);
}

#[tokio::test]
async fn test_store_failure_marks_session_failed() {
    let client = Arc::new(
        FakeClassifier::new()
            .with(0, Behavior::Succeed { code: "0101.21.000", confidence: 90.0 })
            .with(1, Behavior::Slow(Duration::from_millis(100)))
            .with(2, Behavior::Slow(Duration::from_millis(100)))
            .with(3, Behavior::Slow(Duration::from_millis(100))),
    );
    let (wf, pool, bus) = workflow(client).await;
    let mut events = bus.subscribe();

    let batch = wf.prepare("goods.csv", &numbered_csv(4), None, None).await.unwrap();
    let session_id = batch.session_id;

    // Remove one slot so its result cannot be stored
    sqlx::query("DELETE FROM session_rows WHERE session_id = ? AND row_index = 2")
        .bind(session_id.to_string())
        .execute(&pool)
        .await
        .unwrap();

    let err = wf
        .run(batch, Arc::new(ProgressTracker::new(4)), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BatchError::StoreWrite(_)));

    let session = sessions::get_session(&pool, session_id).await.unwrap();
    assert_eq!(session.state, BatchState::Failed);
    assert!(session.error_message.is_some());
    assert_eq!(session.rows[0].status, RowStatus::Success);

    let mut saw_failed = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, DeclarantEvent::BatchFailed { .. }) {
            saw_failed = true;
        }
    }
    assert!(saw_failed);
}

#[tokio::test]
async fn test_cancel_stops_issuing_calls() {
    let client = Arc::new(FakeClassifier::new().with_default_delay(Duration::from_millis(200)));
    let (wf, pool, _bus) = workflow(Arc::clone(&client)).await;

    let batch = wf.prepare("goods.csv", &numbered_csv(20), None, None).await.unwrap();
    let session_id = batch.session_id;
    let cancel = CancellationToken::new();
    let progress = Arc::new(ProgressTracker::new(20));

    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        })
    };
    let report = wf.run(batch, progress, cancel).await.unwrap();
    canceller.await.unwrap();

    assert_eq!(report.state, BatchState::Cancelled);
    assert!(client.calls() < 20);

    let session = sessions::get_session(&pool, session_id).await.unwrap();
    assert_eq!(session.state, BatchState::Cancelled);
    assert!(session.statistics.pending > 0);
    // In-flight answers arriving after the cancel are discarded
    assert_eq!(session.statistics.successful, 0);
}
