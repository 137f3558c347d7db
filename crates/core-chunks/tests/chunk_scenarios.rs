use core_chunks::{Chunk, ChunkError, ChunkManager, ChunkMetadata, ChunkSource, LoadFuture};
use core_config::ChunkConfig;
use proptest::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn config(chunk_size: usize, max_loaded_chunks: usize) -> ChunkConfig {
    ChunkConfig {
        chunk_size,
        max_loaded_chunks,
        preload_chunks: 2,
        storage_timeout_ms: 5000,
    }
}

fn document(lines: usize) -> String {
    (0..lines)
        .map(|i| format!("line {i}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[tokio::test]
async fn opening_loads_first_three_chunks() {
    let mgr = ChunkManager::new(config(1000, 10));
    mgr.initialize_from_text(&document(2500)).await.unwrap();

    assert_eq!(mgr.total_chunks(), 3);
    assert_eq!(mgr.resident_indices(), vec![0, 1, 2]);
    assert_eq!(
        mgr.metadata(2),
        Some(ChunkMetadata {
            index: 2,
            start_line: 2000,
            end_line: 2500,
            line_count: 500,
            loaded: true,
        })
    );
    assert_eq!(mgr.get_line(2499).await, "line 2499");
    assert_eq!(mgr.get_line(2500).await, "");
}

#[tokio::test]
async fn small_document_loads_single_chunk() {
    let mgr = ChunkManager::new(config(1000, 10));
    mgr.initialize_from_text("# heading\n\nbody").await.unwrap();
    assert_eq!(mgr.total_chunks(), 1);
    assert_eq!(mgr.resident_indices(), vec![0]);
    assert_eq!(mgr.get_lines(0, 3).await, vec!["# heading", "", "body"]);
}

#[tokio::test]
async fn capacity_triggers_thirty_percent_eviction() {
    let mgr = ChunkManager::new(config(100, 10));
    mgr.initialize_from_text(&document(2000)).await.unwrap();
    for i in 3..10 {
        mgr.load_chunk(i).await.unwrap();
    }
    assert_eq!(mgr.stats().resident_chunks, 10);

    mgr.load_chunk(10).await.unwrap();
    let resident = mgr.resident_indices();
    assert_eq!(resident, vec![3, 4, 5, 6, 7, 8, 9, 10]);
    for evicted in 0..3 {
        let meta = mgr.metadata(evicted).unwrap();
        assert!(!meta.loaded);
        assert_eq!(meta.start_line, evicted * 100);
    }
    assert_eq!(mgr.stats().evictions, 3);
}

#[tokio::test]
async fn out_of_range_index_is_an_error() {
    let mgr = ChunkManager::new(config(1000, 10));
    mgr.initialize_from_text(&document(10)).await.unwrap();
    assert_eq!(
        mgr.load_chunk(1).await,
        Err(ChunkError::InvalidChunkIndex { index: 1, total: 1 })
    );
}

#[tokio::test]
async fn get_lines_spans_chunk_boundaries() {
    let mgr = ChunkManager::new(config(10, 10));
    mgr.initialize_from_text(&document(45)).await.unwrap();
    let lines = mgr.get_lines(8, 13).await;
    assert_eq!(lines, vec!["line 8", "line 9", "line 10", "line 11", "line 12"]);

    let tail = mgr.get_lines(43, 47).await;
    assert_eq!(tail, vec!["line 43", "line 44", "", ""]);
    assert!(mgr.is_loaded(4));
}

struct SlowSource {
    calls: AtomicUsize,
    delay: Duration,
}

impl ChunkSource for SlowSource {
    fn load(&self, meta: ChunkMetadata) -> LoadFuture<'_> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            let lines: Vec<String> = (meta.start_line..meta.end_line)
                .map(|i| format!("remote {i}"))
                .collect();
            Ok::<_, anyhow::Error>(lines)
        })
    }
}

#[tokio::test(start_paused = true)]
async fn concurrent_loads_share_one_fetch() {
    let source = Arc::new(SlowSource {
        calls: AtomicUsize::new(0),
        delay: Duration::from_millis(50),
    });
    let mgr = ChunkManager::with_source(config(10, 10), source.clone());
    mgr.initialize_from_source(100).await.unwrap();
    let before = source.calls.load(Ordering::SeqCst);
    assert_eq!(before, 3);

    let (a, b) = tokio::join!(mgr.load_chunk(5), mgr.load_chunk(5));
    let (a, b): (Arc<Chunk>, Arc<Chunk>) = (a.unwrap(), b.unwrap());
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(source.calls.load(Ordering::SeqCst), before + 1);
    assert_eq!(a.lines[0], "remote 50");

    let c = mgr.load_chunk(5).await.unwrap();
    assert!(Arc::ptr_eq(&a, &c));
}

struct FailingSource;

impl ChunkSource for FailingSource {
    fn load(&self, _meta: ChunkMetadata) -> LoadFuture<'_> {
        Box::pin(async { Err::<Vec<String>, _>(anyhow::anyhow!("backend offline")) })
    }
}

#[tokio::test]
async fn storage_errors_degrade_to_uncached_empty_chunk() {
    let mgr = ChunkManager::with_source(config(10, 10), Arc::new(FailingSource));
    mgr.initialize_from_source(30).await.unwrap();
    assert!(mgr.resident_indices().is_empty());
    assert_eq!(mgr.get_line(3).await, "");
    let stats = mgr.stats();
    assert_eq!(stats.storage_failures, 4);
    assert_eq!(stats.resident_chunks, 0);
}

#[tokio::test(start_paused = true)]
async fn storage_timeout_degrades() {
    let source = Arc::new(SlowSource {
        calls: AtomicUsize::new(0),
        delay: Duration::from_secs(3600),
    });
    let mut cfg = config(10, 10);
    cfg.storage_timeout_ms = 100;
    let mgr = ChunkManager::with_source(cfg, source);
    mgr.initialize_from_source(10).await.unwrap();
    assert!(!mgr.is_loaded(0));
    assert_eq!(mgr.stats().storage_failures, 1);
}

#[tokio::test]
async fn unconfigured_storage_serves_empty_lines() {
    let mgr = ChunkManager::new(config(10, 10));
    mgr.initialize_from_source(25).await.unwrap();
    assert_eq!(mgr.get_line(12).await, "");
    assert_eq!(mgr.total_lines(), 25);
}

#[tokio::test]
async fn preload_spawns_missing_neighbours() {
    let mgr = ChunkManager::new(config(10, 20));
    mgr.initialize_from_text(&document(200)).await.unwrap();
    let handles = mgr.preload_adjacent_chunks(10);
    assert_eq!(handles.len(), 4);
    for h in handles {
        h.await.unwrap();
    }
    for idx in [8, 9, 11, 12] {
        assert!(mgr.is_loaded(idx), "chunk {idx} should be resident");
    }
    assert!(!mgr.is_loaded(10), "center itself is not preloaded");

    // Near the start: only existing neighbours, resident ones skipped.
    let handles = mgr.preload_adjacent_chunks(0);
    assert!(handles.is_empty());
}

#[tokio::test]
async fn reinitialize_resets_residency() {
    let mgr = ChunkManager::new(config(10, 10));
    mgr.initialize_from_text(&document(100)).await.unwrap();
    mgr.load_chunk(7).await.unwrap();
    mgr.initialize_from_text(&document(15)).await.unwrap();
    assert_eq!(mgr.total_chunks(), 2);
    assert_eq!(mgr.resident_indices(), vec![0, 1]);
    assert_eq!(mgr.get_line(14).await, "line 14");
}

#[tokio::test]
async fn warm_lines_loads_covering_chunks() {
    let mgr = ChunkManager::new(config(10, 10));
    mgr.initialize_from_text(&document(100)).await.unwrap();
    assert_eq!(mgr.warm_lines(45, 62).await, Ok(3));
    assert_eq!(mgr.resident_indices(), vec![0, 1, 2, 4, 5, 6]);
    assert_eq!(mgr.warm_lines(95, 400).await, Ok(1));
    assert_eq!(mgr.warm_lines(100, 120).await, Ok(0));
    assert!(mgr.is_loaded(9));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn resident_set_never_exceeds_capacity(
        max in 1usize..8,
        loads in proptest::collection::vec(0usize..20, 1..60),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let mgr = ChunkManager::new(config(5, max));
            mgr.initialize_from_text(&document(100)).await.unwrap();
            prop_assert!(mgr.stats().resident_chunks <= max);
            for idx in loads {
                let chunk = mgr.load_chunk(idx).await.unwrap();
                prop_assert_eq!(chunk.lines.len(), 5);
                prop_assert!(mgr.stats().resident_chunks <= max);
                prop_assert!(mgr.is_loaded(idx));
            }
            Ok(())
        })?;
    }
}
