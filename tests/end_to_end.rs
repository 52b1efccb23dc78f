//! Integration test: full shard-merge jobs on local disk.
//!
//! Validates that:
//! - Every manifest path reaches exactly one shard's merge request
//! - Each shard's output segment is the sorted merge of its sources
//! - Empty shards get empty segments without an engine call
//! - Replicate and Partition split modes produce identical outputs
//! - Failed attempts are retried; exhausted retries fail the job
//! - Corrupt inputs and cancellation fail the job without committed output

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use shardmerge::segment::{SegmentReader, SegmentWriter};
use shardmerge::sink::shard_file_name;
use shardmerge::{
    run_job, CancelToken, FileSystem, JobConfig, KWayMergeEngine, LocalFileSystem, LocalJobRunner, Manifest,
    ManifestPayload, ManifestStore, MemorySinkFactory, MergeEngine, MergeError, MergedPair, MergedPairs,
    RetryPolicy, ShardMergeRequest, SplitMode, VirtualSplitGenerator,
};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn write_segment(path: &Path, pairs: &[(String, String)]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let mut buf = Vec::new();
    let mut writer = SegmentWriter::new(&mut buf).unwrap();
    for (k, v) in pairs {
        writer.add(k.as_bytes(), v.as_bytes()).unwrap();
    }
    writer.finish().unwrap();
    std::fs::write(path, buf).unwrap();
}

fn read_segment(path: &Path) -> Vec<(String, String)> {
    let fs = LocalFileSystem::new();
    SegmentReader::new(fs.open(&path.to_string_lossy()).unwrap())
        .unwrap()
        .map(|p| {
            let p = p.unwrap();
            (String::from_utf8(p.key).unwrap(), String::from_utf8(p.value).unwrap())
        })
        .collect()
}

/// Producer `p` writes `count` segments; segment `i` holds keys whose
/// prefix grows with `i`, so list position tracks key order.
fn build_producers(root: &Path, counts: &[usize]) -> Vec<Vec<String>> {
    counts
        .iter()
        .enumerate()
        .map(|(p, &count)| {
            (0..count)
                .map(|i| {
                    let rel = format!("producer-{p}/part-{i:04}.seg");
                    let pairs: Vec<(String, String)> = (0..3)
                        .map(|r| (format!("key-{i:04}-{p}-{r}"), format!("p{p}s{i}r{r}")))
                        .collect();
                    write_segment(&root.join(&rel), &pairs);
                    rel
                })
                .collect()
        })
        .collect()
}

fn job_config(root: &Path, num_shards: u32, producers: Vec<Vec<String>>) -> JobConfig {
    let mut config = JobConfig::new(num_shards, producers, "out");
    config.fs_root = Some(root.to_path_buf());
    config.threads = Some(2);
    config
}

fn shard_output(root: &Path, shard_id: u32) -> Vec<(String, String)> {
    read_segment(&root.join("out").join(shard_file_name(shard_id)))
}

type Requests = Arc<Mutex<Vec<(u32, BTreeSet<String>)>>>;

/// Wraps the k-way engine and records every request it receives.
fn recording_kway(requests: Requests) -> Arc<dyn MergeEngine> {
    let inner = KWayMergeEngine::default();
    Arc::new(move |req: ShardMergeRequest| -> shardmerge::Result<MergedPairs> {
        requests.lock().unwrap().push((req.shard_id, req.source_paths.clone()));
        inner.merge(req)
    })
}

fn run_with(
    root: &Path,
    manifest: &Manifest,
    splits: VirtualSplitGenerator,
    engine: Arc<dyn MergeEngine>,
    runner: LocalJobRunner,
) -> shardmerge::Result<(shardmerge::JobReport, MemorySinkFactory)> {
    let sinks = MemorySinkFactory::new();
    let payload = ManifestPayload::encode(manifest).unwrap();
    let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::with_root(root));
    let report = runner.run(&payload, &splits, engine, fs, Arc::new(sinks.clone()))?;
    Ok((report, sinks))
}

// ---------------------------------------------------------------------------
// Assignment scenarios
// ---------------------------------------------------------------------------

#[test]
fn test_four_shards_ten_paths_one_producer() {
    let dir = TempDir::new().unwrap();
    let producers = build_producers(dir.path(), &[10]);
    let manifest = Manifest::new(4, producers.clone()).unwrap();
    let requests: Requests = Arc::default();

    let splits = VirtualSplitGenerator::new(1, SplitMode::Replicate).unwrap();
    run_with(dir.path(), &manifest, splits, recording_kway(Arc::clone(&requests)), LocalJobRunner::new(2)).unwrap();

    let by_shard: BTreeMap<u32, BTreeSet<String>> = requests.lock().unwrap().iter().cloned().collect();
    let expect = |idx: &[usize]| idx.iter().map(|&i| producers[0][i].clone()).collect::<BTreeSet<_>>();
    assert_eq!(by_shard.len(), 4);
    assert_eq!(by_shard[&0], expect(&[0, 1, 2]));
    assert_eq!(by_shard[&1], expect(&[3, 4]));
    assert_eq!(by_shard[&2], expect(&[5, 6, 7]));
    assert_eq!(by_shard[&3], expect(&[8, 9]));
}

#[test]
fn test_two_producers_each_path_in_exactly_one_shard() {
    let dir = TempDir::new().unwrap();
    let producers = build_producers(dir.path(), &[3, 5]);
    let manifest = Manifest::new(2, producers.clone()).unwrap();
    let requests: Requests = Arc::default();

    let splits = VirtualSplitGenerator::new(4, SplitMode::Replicate).unwrap();
    let (report, _) =
        run_with(dir.path(), &manifest, splits, recording_kway(Arc::clone(&requests)), LocalJobRunner::new(3)).unwrap();

    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 2, "one merge call per shard");

    let mut seen: BTreeMap<String, u32> = BTreeMap::new();
    for (shard_id, paths) in requests.iter() {
        for path in paths {
            assert!(seen.insert(path.clone(), *shard_id).is_none(), "{path} merged twice");
        }
    }
    let all: BTreeSet<String> = producers.iter().flatten().cloned().collect();
    assert_eq!(seen.keys().cloned().collect::<BTreeSet<_>>(), all);

    // 4 replicated passes x 8 paths, deduplicated to 8 sources.
    assert_eq!(report.assignments_emitted, 32);
    assert_eq!(report.shards.iter().map(|s| s.source_count).sum::<usize>(), 8);
}

// ---------------------------------------------------------------------------
// Outputs on disk
// ---------------------------------------------------------------------------

#[test]
fn test_run_job_writes_sorted_shard_segments() {
    let dir = TempDir::new().unwrap();
    let producers = build_producers(dir.path(), &[4, 6]);
    let config = job_config(dir.path(), 3, producers.clone());

    let report = run_job(&config, CancelToken::new()).unwrap();
    assert_eq!(report.shards.len(), 3);

    let planned = shardmerge::ShardPlanner::plan_manifest(&Manifest::from_config(&config).unwrap());
    let mut total = 0;
    for shard_id in 0..3 {
        let out = shard_output(dir.path(), shard_id);
        let keys: Vec<&String> = out.iter().map(|(k, _)| k).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted, "shard {shard_id} output not sorted");

        let mut expected: Vec<(String, String)> = planned[&shard_id]
            .iter()
            .flat_map(|rel| read_segment(&dir.path().join(rel)))
            .collect();
        expected.sort();
        assert_eq!(out, expected);
        total += out.len();
    }
    assert_eq!(total, 10 * 3);
    assert_eq!(report.metrics.pairs_written, 30);
}

#[test]
fn test_empty_manifest_produces_empty_shards() {
    let dir = TempDir::new().unwrap();
    let config = job_config(dir.path(), 4, vec![vec![], vec![]]);

    let report = run_job(&config, CancelToken::new()).unwrap();
    assert_eq!(report.metrics.merge_invocations, 0);
    assert_eq!(report.metrics.empty_shards_written, 4);
    for shard_id in 0..4 {
        assert!(shard_output(dir.path(), shard_id).is_empty());
    }
}

#[test]
fn test_replicate_and_partition_modes_agree() {
    let dir = TempDir::new().unwrap();
    let producers = build_producers(dir.path(), &[5, 0, 7]);
    let manifest = Manifest::new(3, producers).unwrap();

    let replicate = VirtualSplitGenerator::new(3, SplitMode::Replicate).unwrap();
    let partition = VirtualSplitGenerator::new(3, SplitMode::Partition).unwrap();
    let engine: Arc<dyn MergeEngine> = Arc::new(KWayMergeEngine::default());

    let (r1, s1) = run_with(dir.path(), &manifest, replicate, Arc::clone(&engine), LocalJobRunner::new(2)).unwrap();
    let (r2, s2) = run_with(dir.path(), &manifest, partition, engine, LocalJobRunner::new(2)).unwrap();

    assert_eq!(s1.snapshot(), s2.snapshot());
    assert_eq!(r1.assignments_emitted, 36);
    assert_eq!(r2.assignments_emitted, 12);
    assert_eq!(r1.job_id, r2.job_id);
}

#[test]
fn test_manifest_store_configure_once() {
    let mut store = ManifestStore::new();
    assert!(matches!(store.seal(), Err(MergeError::NotConfigured)));
    store.configure(2, vec![vec!["a".into()]]).unwrap();
    assert!(matches!(store.configure(3, vec![]), Err(MergeError::AlreadyConfigured)));
    assert_eq!(store.seal().unwrap().decode().unwrap().num_shards(), 2);
}

#[test]
fn test_run_job_rejects_invalid_manifest_before_submission() {
    let dir = TempDir::new().unwrap();

    let zero_shards = job_config(dir.path(), 0, vec![vec!["a.seg".into()]]);
    let err = run_job(&zero_shards, CancelToken::new()).unwrap_err();
    assert!(matches!(err, MergeError::Config(_)));
    assert!(err.to_string().contains("num_shards must be > 0"));

    let blank_path = job_config(dir.path(), 2, vec![vec!["a.seg".into(), String::new()]]);
    let err = run_job(&blank_path, CancelToken::new()).unwrap_err();
    assert!(err.to_string().contains("producer 0 has an empty path at index 1"));

    assert!(!dir.path().join("out").exists());
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[test]
fn test_retry_after_injected_failure_yields_correct_output() {
    let dir = TempDir::new().unwrap();
    let producers = build_producers(dir.path(), &[4]);
    let manifest = Manifest::new(2, producers).unwrap();

    let failures = Arc::new(AtomicUsize::new(0));
    let engine: Arc<dyn MergeEngine> = {
        let failures = Arc::clone(&failures);
        let inner = KWayMergeEngine::default();
        Arc::new(move |req: ShardMergeRequest| -> shardmerge::Result<MergedPairs> {
            let pairs = inner.merge(req)?;
            if failures.fetch_add(1, Ordering::SeqCst) == 0 {
                // Fail mid-stream after the first pair.
                return Ok(Box::new(pairs.take(1).chain(std::iter::once(Err(MergeError::Engine {
                    shard_id: 0,
                    message: "injected".into(),
                })))));
            }
            Ok(pairs)
        })
    };

    let baseline = {
        let splits = VirtualSplitGenerator::new(1, SplitMode::Replicate).unwrap();
        let engine: Arc<dyn MergeEngine> = Arc::new(KWayMergeEngine::default());
        run_with(dir.path(), &manifest, splits, engine, LocalJobRunner::new(1)).unwrap().1
    };
    let splits = VirtualSplitGenerator::new(1, SplitMode::Replicate).unwrap();
    let (report, sinks) = run_with(dir.path(), &manifest, splits, engine, LocalJobRunner::new(1)).unwrap();

    assert_eq!(report.metrics.reduce_failures, 1);
    assert_eq!(sinks.snapshot(), baseline.snapshot());
}

#[test]
fn test_exhausted_retries_surface_task_failed() {
    let dir = TempDir::new().unwrap();
    let manifest = Manifest::new(1, vec![vec!["does/not/exist.seg".into()]]).unwrap();
    let splits = VirtualSplitGenerator::new(1, SplitMode::Replicate).unwrap();
    let runner = LocalJobRunner::new(1).with_retry(RetryPolicy::new(2));

    let err = run_with(dir.path(), &manifest, splits, Arc::new(KWayMergeEngine::default()), runner).unwrap_err();
    match err {
        MergeError::TaskFailed { task, attempts, source } => {
            assert_eq!(task, "reduce-0000");
            assert_eq!(attempts, 2);
            assert!(source.to_string().contains("does/not/exist.seg"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_corrupt_segment_fails_job_without_output() {
    let dir = TempDir::new().unwrap();
    let mut producers = build_producers(dir.path(), &[2]);
    std::fs::write(dir.path().join("producer-0/garbage.seg"), b"not a segment at all").unwrap();
    producers[0].push("producer-0/garbage.seg".into());

    let mut config = job_config(dir.path(), 1, producers);
    config.max_attempts = 1;

    let err = run_job(&config, CancelToken::new()).unwrap_err();
    assert!(matches!(err, MergeError::TaskFailed { .. }));
    assert!(err.to_string().contains("garbage.seg"));
    assert!(!dir.path().join("out").join(shard_file_name(0)).exists());
}

#[test]
fn test_cancelled_job_commits_nothing() {
    let dir = TempDir::new().unwrap();
    let producers = build_producers(dir.path(), &[3]);
    let config = job_config(dir.path(), 2, producers);

    let cancel = CancelToken::new();
    cancel.cancel();
    let err = run_job(&config, cancel).unwrap_err();
    assert!(matches!(err, MergeError::Cancelled));
    assert!(!dir.path().join("out").exists());
}

#[test]
fn test_merge_pass_through_is_verbatim() {
    let dir = TempDir::new().unwrap();
    let manifest = Manifest::new(1, vec![vec!["x".into(), "y".into()]]).unwrap();
    let pairs = vec![MergedPair::new(vec![0u8, 255], vec![1u8]), MergedPair::new(vec![1u8], Vec::new())];
    let engine: Arc<dyn MergeEngine> = {
        let pairs = pairs.clone();
        Arc::new(move |_req: ShardMergeRequest| -> shardmerge::Result<MergedPairs> {
            Ok(Box::new(pairs.clone().into_iter().map(Ok::<_, MergeError>)))
        })
    };
    let splits = VirtualSplitGenerator::new(1, SplitMode::Replicate).unwrap();
    let (_, sinks) = run_with(dir.path(), &manifest, splits, engine, LocalJobRunner::new(1)).unwrap();
    assert_eq!(sinks.shard(0).unwrap(), pairs);
}
