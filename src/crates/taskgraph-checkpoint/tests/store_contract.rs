//! Behavioural contract shared by every checkpoint backend
//!
//! Each check is written once against `&dyn CheckpointSaver` and run for both
//! the in-memory store and a file-backed SQLite store.

use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;
use taskgraph_checkpoint::{
    CheckpointMetadata, CheckpointSaver, CheckpointSource, HaltKind, InMemoryCheckpointSaver,
    SqliteCheckpointSaver,
};

async fn check_sequences_start_at_zero(saver: &dyn CheckpointSaver) {
    let seq = saver
        .append("fresh", json!({"user_query": "q"}), CheckpointMetadata::new(CheckpointSource::Input))
        .await
        .unwrap();
    assert_eq!(seq, 0);

    let latest = saver.latest("fresh").await.unwrap().unwrap();
    assert_eq!(latest.thread_id, "fresh");
    assert_eq!(latest.metadata.parent, None);
}

async fn check_history_is_ordered_and_linked(saver: &dyn CheckpointSaver) {
    let steps = ["planner", "researcher", "reviewer", "writer"];
    saver
        .append("linked", json!({"n": 0}), CheckpointMetadata::new(CheckpointSource::Input))
        .await
        .unwrap();
    for (i, step) in steps.iter().enumerate() {
        saver
            .append("linked", json!({"n": i + 1}), CheckpointMetadata::after_step(*step))
            .await
            .unwrap();
    }

    let history = saver.list("linked").await.unwrap();
    assert_eq!(history.len(), 5);
    for (i, info) in history.iter().enumerate() {
        assert_eq!(info.sequence, i as u64);
        if i > 0 {
            assert_eq!(info.metadata.parent, Some(i as u64 - 1));
            assert_eq!(info.metadata.step.as_deref(), Some(steps[i - 1]));
        }
    }
}

async fn check_metadata_round_trips(saver: &dyn CheckpointSaver) {
    let metadata = CheckpointMetadata::after_step("writer")
        .with_next(None)
        .with_halt(HaltKind::ForceEnded)
        .with_extra("note", json!("cutoff"));
    let seq = saver
        .append("meta", json!({"final_output": null}), metadata.clone())
        .await
        .unwrap();

    let stored = saver.get("meta", seq).await.unwrap().unwrap();
    assert_eq!(stored.metadata.halt, Some(HaltKind::ForceEnded));
    assert_eq!(stored.metadata.next, None);
    assert_eq!(stored.metadata.extra.get("note"), Some(&json!("cutoff")));
    assert_eq!(stored.state, json!({"final_output": null}));
}

async fn check_unknown_thread_is_empty(saver: &dyn CheckpointSaver) {
    assert!(saver.latest("nobody").await.unwrap().is_none());
    assert!(saver.get("nobody", 0).await.unwrap().is_none());
    assert!(saver.list("nobody").await.unwrap().is_empty());
}

async fn check_threads_are_isolated(saver: &dyn CheckpointSaver) {
    for thread in ["iso-a", "iso-b"] {
        for _ in 0..3 {
            saver
                .append(thread, json!({}), CheckpointMetadata::after_step("s"))
                .await
                .unwrap();
        }
    }
    let summaries = saver.threads().await.unwrap();
    for thread in ["iso-a", "iso-b"] {
        let summary = summaries.iter().find(|s| s.thread_id == thread).unwrap();
        assert_eq!(summary.latest_sequence, 2);
    }
}

async fn check_deleted_thread_starts_over(saver: &dyn CheckpointSaver) {
    for _ in 0..3 {
        saver
            .append("gc", json!({}), CheckpointMetadata::after_step("s"))
            .await
            .unwrap();
    }
    saver.delete_thread("gc").await.unwrap();
    assert!(saver.latest("gc").await.unwrap().is_none());
    assert!(saver.threads().await.unwrap().iter().all(|s| s.thread_id != "gc"));

    let seq = saver
        .append("gc", json!({}), CheckpointMetadata::new(CheckpointSource::Input))
        .await
        .unwrap();
    assert_eq!(seq, 0);
    assert_eq!(saver.list("gc").await.unwrap().len(), 1);
}

async fn run_contract(saver: &dyn CheckpointSaver) {
    check_sequences_start_at_zero(saver).await;
    check_history_is_ordered_and_linked(saver).await;
    check_metadata_round_trips(saver).await;
    check_unknown_thread_is_empty(saver).await;
    check_threads_are_isolated(saver).await;
    check_deleted_thread_starts_over(saver).await;
}

#[tokio::test]
async fn test_in_memory_store_contract() {
    let saver = InMemoryCheckpointSaver::new();
    run_contract(&saver).await;
}

#[tokio::test]
async fn test_sqlite_store_contract() {
    let dir = tempfile::tempdir().unwrap();
    let saver = SqliteCheckpointSaver::open(dir.path().join("contract.db"))
        .await
        .unwrap();
    run_contract(&saver).await;
}

#[tokio::test]
async fn test_sqlite_in_memory_store_contract() {
    let saver = SqliteCheckpointSaver::in_memory().await.unwrap();
    run_contract(&saver).await;
}

async fn concurrent_appends(saver: Arc<dyn CheckpointSaver>) {
    let mut handles = Vec::new();
    for worker in 0..4 {
        for thread in ["busy-1", "busy-2"] {
            let saver = saver.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..5 {
                    saver
                        .append(
                            thread,
                            json!({"worker": worker, "i": i}),
                            CheckpointMetadata::after_step("s"),
                        )
                        .await
                        .unwrap();
                }
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for thread in ["busy-1", "busy-2"] {
        let sequences: Vec<u64> = saver
            .list(thread)
            .await
            .unwrap()
            .iter()
            .map(|c| c.sequence)
            .collect();
        assert_eq!(sequences, (0..20).collect::<Vec<u64>>());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_appends_in_memory() {
    concurrent_appends(Arc::new(InMemoryCheckpointSaver::new())).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_appends_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let saver = SqliteCheckpointSaver::open(dir.path().join("concurrent.db"))
        .await
        .unwrap();
    concurrent_appends(Arc::new(saver)).await;
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_sequences_are_gapless(plan in prop::collection::vec(0usize..3, 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let saver = InMemoryCheckpointSaver::new();
            let threads = ["t0", "t1", "t2"];
            let mut expected = [0u64; 3];

            for idx in plan {
                let seq = saver
                    .append(threads[idx], json!({"idx": idx}), CheckpointMetadata::after_step("s"))
                    .await
                    .unwrap();
                prop_assert_eq!(seq, expected[idx]);
                expected[idx] += 1;
            }

            for (idx, thread) in threads.iter().enumerate() {
                let history = saver.list(thread).await.unwrap();
                prop_assert_eq!(history.len() as u64, expected[idx]);
                for (i, info) in history.iter().enumerate() {
                    prop_assert_eq!(info.sequence, i as u64);
                }
            }
            Ok(())
        })?;
    }
}
