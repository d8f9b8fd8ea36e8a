//! Interrupted generation picks up exactly the remaining gap.

mod common;

use async_trait::async_trait;
use common::{ScriptedClient, TestHarness, run_async};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thumb::error::Result;
use thumb::generate::{CompletionClient, GenerateOptions, generate};
use thumb::matrix::{ComboKey, RunResult, TestMatrix};
use thumb::model::{Completion, CompletionRequest};
use thumb::prompt::Case;
use thumb::store::Store;

fn subject(value: &str) -> Case {
    Case::from([("subject".to_string(), value.to_string())])
}

#[test]
fn partial_runs_survive_a_reload() {
    let harness = TestHarness::new("partial_runs_survive_a_reload");
    let store = harness.store();

    let mut matrix = TestMatrix::create(&store);
    let pids = matrix.add_prompts(["tell me a joke"]).expect("prompts");
    matrix.add_models(["m1"]);
    matrix.add_runs(5).expect("runs");
    for i in 0..2 {
        matrix
            .record_result(
                &pids[0],
                "base-case",
                "m1",
                RunResult {
                    content: format!("joke {i}"),
                    ..RunResult::default()
                },
            )
            .expect("record");
    }
    let test_id = matrix.test_id().to_string();
    drop(matrix);

    harness.section("reload");
    let loaded = TestMatrix::load(&store, &test_id).expect("load");
    let work = loaded.outstanding_work();
    assert_eq!(work.len(), 1);
    assert_eq!(work[0].key, ComboKey::new(pids[0].clone(), "base-case", "m1"));
    assert_eq!(work[0].runs_needed, 3);

    let contents: Vec<&str> = loaded
        .bucket(&work[0].key)
        .iter()
        .map(|entry| entry.result.content.as_str())
        .collect();
    assert_eq!(contents, ["joke 0", "joke 1"]);
}

#[test]
fn resumed_generation_only_fills_the_gap() {
    let harness = TestHarness::new("resumed_generation_only_fills_the_gap");
    let store = harness.store();

    let mut matrix = TestMatrix::create(&store);
    let pids = matrix
        .add_prompts(["tell me a joke about {subject}"])
        .expect("prompts");
    let cids = matrix
        .add_cases([subject("cats"), subject("dogs")])
        .expect("cases");
    matrix.add_models(["m1", "m2"]);
    matrix.add_runs(3).expect("runs");
    assert_eq!(matrix.outstanding_runs(), 12);

    // One combination already finished before the interruption.
    for _ in 0..3 {
        matrix
            .record_result(&pids[0], &cids[0], "m1", RunResult::default())
            .expect("record");
    }
    let test_id = matrix.test_id().to_string();
    drop(matrix);

    let client = ScriptedClient::new();
    let calls = client.clone();
    let reload_store = store.clone();
    let matrix = run_async(async move {
        let mut matrix = TestMatrix::load(&reload_store, &test_id).expect("load");
        generate(&mut matrix, &client, &GenerateOptions::default().batched(4))
            .await
            .expect("generate");
        matrix
    });

    assert_eq!(calls.call_count(), 9);
    assert!(matrix.is_complete());
    assert_eq!(matrix.total_results(), 12);

    harness.section("second pass is a no-op");
    let client = ScriptedClient::new();
    let calls = client.clone();
    let matrix = run_async(async move {
        let mut matrix = matrix;
        let report = generate(&mut matrix, &client, &GenerateOptions::default())
            .await
            .expect("generate");
        assert_eq!(report.requested, 0);
        matrix
    });
    assert_eq!(calls.call_count(), 0);
    assert_eq!(matrix.total_results(), 12);
}

#[test]
fn raising_the_target_adds_work_everywhere() {
    let harness = TestHarness::new("raising_the_target_adds_work_everywhere");
    let store = harness.store();

    let mut matrix = TestMatrix::create(&store);
    matrix.add_prompts(["a", "b"]).expect("prompts");
    matrix.add_models(["m1"]);
    matrix.add_runs(1).expect("runs");

    let client = ScriptedClient::new();
    let matrix = run_async(async move {
        let mut matrix = matrix;
        generate(&mut matrix, &client, &GenerateOptions::default().sequential())
            .await
            .expect("generate");
        matrix
    });
    assert!(matrix.is_complete());

    let mut matrix = TestMatrix::load(&store, matrix.test_id()).expect("load");
    matrix.add_runs(2).expect("more runs");
    assert_eq!(matrix.runs(), 3);
    assert_eq!(matrix.outstanding_runs(), 4);
    assert!(matrix.outstanding_work().iter().all(|unit| unit.runs_needed == 2));
}

/// Counts the results already in the snapshot file each time it is called.
#[derive(Debug, Clone)]
struct SnapshotReader {
    path: PathBuf,
    seen: Arc<Mutex<Vec<usize>>>,
}

impl SnapshotReader {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            seen: Arc::default(),
        }
    }

    fn seen(&self) -> Vec<usize> {
        self.seen.lock().unwrap().clone()
    }

    fn results_on_disk(&self) -> usize {
        let Ok(content) = std::fs::read_to_string(&self.path) else {
            return 0;
        };
        let document: Value = serde_json::from_str(&content).expect("snapshot parses");
        document["data"]
            .as_object()
            .into_iter()
            .flat_map(|by_prompt| by_prompt.values())
            .filter_map(Value::as_object)
            .flat_map(|by_case| by_case.values())
            .filter_map(Value::as_object)
            .flat_map(|by_model| by_model.values())
            .filter_map(Value::as_object)
            .map(serde_json::Map::len)
            .sum()
    }
}

#[async_trait]
impl CompletionClient for SnapshotReader {
    async fn complete(&self, _request: &CompletionRequest) -> Result<Completion> {
        let on_disk = self.results_on_disk();
        self.seen.lock().unwrap().push(on_disk);
        Ok(Completion::text("ok"))
    }
}

#[test]
fn each_finished_batch_is_on_disk_before_the_next_starts() {
    let harness = TestHarness::new("each_finished_batch_is_on_disk_before_the_next_starts");
    let store = harness.store();

    let mut matrix = TestMatrix::create(&store);
    matrix.add_prompts(["tell me a joke"]).expect("prompts");
    matrix.add_models(["m1", "m2"]);
    matrix.add_runs(3).expect("runs");
    let path = matrix.path().expect("path").to_path_buf();

    let client = SnapshotReader::new(path);
    let reader = client.clone();
    let matrix = run_async(async move {
        let mut matrix = matrix;
        let report = generate(&mut matrix, &client, &GenerateOptions::default().batched(2))
            .await
            .expect("generate");
        assert_eq!(report.batches, 3);
        matrix
    });

    assert_eq!(reader.seen(), vec![0, 0, 2, 2, 4, 4]);
    assert!(matrix.is_complete());
    assert_eq!(reader.results_on_disk(), 6);
}

#[test]
fn sequential_checkpoints_after_each_combination() {
    let harness = TestHarness::new("sequential_checkpoints_after_each_combination");
    let store = harness.store();

    let mut matrix = TestMatrix::create(&store);
    matrix.add_prompts(["a", "b"]).expect("prompts");
    matrix.add_models(["m1"]);
    matrix.add_runs(2).expect("runs");
    let path = matrix.path().expect("path").to_path_buf();

    let client = SnapshotReader::new(path);
    let reader = client.clone();
    run_async(async move {
        let mut matrix = matrix;
        generate(&mut matrix, &client, &GenerateOptions::default().sequential())
            .await
            .expect("generate");
    });

    assert_eq!(reader.seen(), vec![0, 0, 2, 2]);
}

#[test]
fn unwritable_checkpoints_do_not_stop_generation() {
    let harness = TestHarness::new("unwritable_checkpoints_do_not_stop_generation");
    // A regular file where the cache directory's parent should be.
    let blocker = harness.create_file("blocked", "not a directory");
    let store = Store::new(harness.temp_path("blocked/cache"));

    for options in [
        GenerateOptions::default().batched(2),
        GenerateOptions::default().sequential(),
    ] {
        let mut matrix = TestMatrix::create(&store);
        matrix.add_prompts(["a", "b"]).expect("prompts");
        matrix.add_models(["m1"]);
        matrix.add_runs(2).expect("runs");
        assert!(matrix.try_save().is_err());

        let client = ScriptedClient::new();
        let calls = client.clone();
        let matrix = run_async(async move {
            let mut matrix = matrix;
            let report = generate(&mut matrix, &client, &options)
                .await
                .expect("generation succeeds without checkpoints");
            assert_eq!(report.requested, 4);
            assert_eq!(report.failed, 0);
            matrix
        });

        assert_eq!(calls.call_count(), 4);
        assert!(matrix.is_complete());
        assert_eq!(matrix.total_results(), 4);
        assert!(!matrix.path().expect("path").exists());
    }
    assert!(blocker.is_file());
}
