//! `ChunkManager`: resident-set bookkeeping and single-flight chunk loads.

use crate::{
    Chunk, ChunkError, ChunkMetadata, ChunkSource, NullChunkSource, build_metadata, split_lines,
};
use ahash::AHashMap;
use core_cache::{Cache, eviction_batch};
use core_config::ChunkConfig;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Chunks eagerly loaded on document open.
const EAGER_CHUNKS: usize = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChunkStats {
    pub total_lines: usize,
    pub total_chunks: usize,
    pub resident_chunks: usize,
    pub max_loaded_chunks: usize,
    pub hits: u64,
    pub misses: u64,
    pub loads: u64,
    pub evictions: u64,
    pub storage_failures: u64,
}

impl ChunkStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Slot {
    chunk: Arc<Chunk>,
    last_access: u64,
    loaded_seq: u64,
}

type InFlight = Arc<OnceCell<Arc<Chunk>>>;

struct State {
    config: ChunkConfig,
    document: Option<Arc<Vec<String>>>,
    total_lines: usize,
    metadata: Vec<ChunkMetadata>,
    resident: AHashMap<usize, Slot>,
    in_flight: AHashMap<usize, InFlight>,
    /// Logical clock for recency; bumped on every resident access.
    clock: u64,
    load_seq: u64,
    /// Bumped on every document (re)load so stale loads never install.
    generation: u64,
    stats: ChunkStats,
}

impl State {
    fn touch(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn drop_resident(&mut self, index: usize) -> bool {
        if self.resident.remove(&index).is_none() {
            return false;
        }
        if let Some(meta) = self.metadata.get_mut(index) {
            meta.loaded = false;
        }
        true
    }

    /// Evict the least recently accessed 30% when at capacity.
    fn evict_if_needed(&mut self) -> usize {
        let resident = self.resident.len();
        if resident < self.config.max_loaded_chunks {
            return 0;
        }
        let mut by_age: Vec<(usize, u64)> = self
            .resident
            .iter()
            .map(|(&idx, slot)| (idx, slot.last_access))
            .collect();
        by_age.sort_unstable_by_key(|&(_, access)| access);
        let victims: Vec<usize> = by_age
            .into_iter()
            .take(eviction_batch(resident))
            .map(|(idx, _)| idx)
            .collect();
        for &idx in &victims {
            self.drop_resident(idx);
        }
        self.stats.evictions += victims.len() as u64;
        debug!(target: "chunks", resident, evicted = ?victims, "chunks_evicted");
        victims.len()
    }
}

struct Inner {
    state: Mutex<State>,
    source: Arc<dyn ChunkSource>,
}

/// Cheaply cloneable handle; clones share one resident set.
#[derive(Clone)]
pub struct ChunkManager {
    inner: Arc<Inner>,
}

impl ChunkManager {
    pub fn new(config: ChunkConfig) -> Self {
        Self::with_source(config, Arc::new(NullChunkSource))
    }

    pub fn with_source(mut config: ChunkConfig, source: Arc<dyn ChunkSource>) -> Self {
        config.chunk_size = config.chunk_size.max(1);
        config.max_loaded_chunks = config.max_loaded_chunks.max(1);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    config,
                    document: None,
                    total_lines: 0,
                    metadata: Vec::new(),
                    resident: AHashMap::new(),
                    in_flight: AHashMap::new(),
                    clock: 0,
                    load_seq: 0,
                    generation: 0,
                    stats: ChunkStats::default(),
                }),
                source,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn reset(&self, document: Option<Arc<Vec<String>>>, total_lines: usize) {
        let mut st = self.state();
        st.generation += 1;
        st.resident.clear();
        st.in_flight.clear();
        st.metadata = build_metadata(total_lines, st.config.chunk_size);
        st.total_lines = total_lines;
        st.document = document;
        st.stats = ChunkStats::default();
        info!(
            target: "chunks",
            total_lines,
            total_chunks = st.metadata.len(),
            chunk_size = st.config.chunk_size,
            in_memory = st.document.is_some(),
            "document_loaded"
        );
    }

    async fn load_eager(&self) -> Result<(), ChunkError> {
        let eager = self.total_chunks().min(EAGER_CHUNKS);
        for index in 0..eager {
            self.load_chunk(index).await?;
        }
        Ok(())
    }

    /// Split `text` into chunks and eagerly load the first few.
    pub async fn initialize_from_text(&self, text: &str) -> Result<(), ChunkError> {
        let lines = split_lines(text);
        let total = lines.len();
        self.reset(Some(Arc::new(lines)), total);
        self.load_eager().await
    }

    /// Open a document whose lines live in the configured `ChunkSource`.
    pub async fn initialize_from_source(&self, total_lines: usize) -> Result<(), ChunkError> {
        self.reset(None, total_lines);
        self.load_eager().await
    }

    /// Return chunk `index`, loading it if needed. Concurrent calls for one
    /// index share a single load.
    pub async fn load_chunk(&self, index: usize) -> Result<Arc<Chunk>, ChunkError> {
        let cell = {
            let mut st = self.state();
            let total = st.metadata.len();
            if index >= total {
                return Err(ChunkError::InvalidChunkIndex { index, total });
            }
            let tick = st.touch();
            if let Some(slot) = st.resident.get_mut(&index) {
                slot.last_access = tick;
                let chunk = slot.chunk.clone();
                st.stats.hits += 1;
                trace!(target: "chunks", chunk = index, "chunk_hit");
                return Ok(chunk);
            }
            st.stats.misses += 1;
            st.in_flight.entry(index).or_default().clone()
        };
        let chunk = cell.get_or_init(|| self.materialize(index)).await;
        Ok(chunk.clone())
    }

    async fn materialize(&self, index: usize) -> Arc<Chunk> {
        let (meta, document, generation, timeout) = {
            let st = self.state();
            let Some(meta) = st.metadata.get(index).copied() else {
                return Arc::new(Chunk { index, lines: Vec::new() });
            };
            (meta, st.document.clone(), st.generation, st.config.storage_timeout())
        };

        let lines = match document {
            Some(doc) => doc
                .get(meta.start_line..meta.end_line)
                .map(<[String]>::to_vec)
                .unwrap_or_default(),
            None => {
                let source = self.inner.source.clone();
                match tokio::time::timeout(timeout, source.load(meta)).await {
                    Ok(Ok(lines)) => lines,
                    Ok(Err(err)) => {
                        warn!(target: "chunks", chunk = index, error = %err, "storage_load_failed");
                        return self.degrade(index, generation);
                    }
                    Err(_) => {
                        warn!(
                            target: "chunks",
                            chunk = index,
                            timeout_ms = timeout.as_millis() as u64,
                            "storage_load_timed_out"
                        );
                        return self.degrade(index, generation);
                    }
                }
            }
        };

        let chunk = Arc::new(Chunk { index, lines });
        let mut st = self.state();
        if st.generation != generation {
            return chunk;
        }
        st.in_flight.remove(&index);
        st.evict_if_needed();
        let tick = st.touch();
        st.load_seq += 1;
        let loaded_seq = st.load_seq;
        st.resident.insert(
            index,
            Slot {
                chunk: chunk.clone(),
                last_access: tick,
                loaded_seq,
            },
        );
        if let Some(meta) = st.metadata.get_mut(index) {
            meta.loaded = true;
        }
        st.stats.loads += 1;
        debug!(
            target: "chunks",
            chunk = index,
            lines = chunk.lines.len(),
            resident = st.resident.len(),
            "chunk_loaded"
        );
        chunk
    }

    /// Serve an empty chunk without caching it; the next access retries.
    fn degrade(&self, index: usize, generation: u64) -> Arc<Chunk> {
        let mut st = self.state();
        if st.generation == generation {
            st.in_flight.remove(&index);
            st.stats.storage_failures += 1;
        }
        Arc::new(Chunk { index, lines: Vec::new() })
    }

    /// Line text, or `""` past the end of the document.
    pub async fn get_line(&self, line: usize) -> String {
        let (index, offset) = {
            let st = self.state();
            if line >= st.total_lines {
                return String::new();
            }
            let size = st.config.chunk_size;
            (line / size, line % size)
        };
        match self.load_chunk(index).await {
            Ok(chunk) => chunk.lines.get(offset).cloned().unwrap_or_default(),
            Err(err) => {
                debug!(target: "chunks", line, error = %err, "line_lookup_failed");
                String::new()
            }
        }
    }

    /// Lines `start..end`; positions past the document read as `""`.
    pub async fn get_lines(&self, start: usize, end: usize) -> Vec<String> {
        let (total, size) = {
            let st = self.state();
            (st.total_lines, st.config.chunk_size)
        };
        let mut out = Vec::with_capacity(end.saturating_sub(start));
        let mut line = start;
        while line < end {
            if line >= total {
                out.resize(end - start, String::new());
                break;
            }
            let index = line / size;
            let chunk_end = ((index + 1) * size).min(total).min(end);
            let chunk = self.load_chunk(index).await.ok();
            for l in line..chunk_end {
                let text = chunk
                    .as_ref()
                    .and_then(|c| c.lines.get(l - index * size))
                    .cloned()
                    .unwrap_or_default();
                out.push(text);
            }
            line = chunk_end;
        }
        out
    }

    /// Lines `start..end` without loading anything. `None` when a chunk the
    /// range needs is not resident. Positions past the document read as `""`.
    /// Does not count as an access.
    pub fn resident_lines(&self, start: usize, end: usize) -> Option<Vec<String>> {
        let st = self.state();
        let size = st.config.chunk_size;
        let mut out = Vec::with_capacity(end.saturating_sub(start));
        for line in start..end {
            if line >= st.total_lines {
                out.push(String::new());
                continue;
            }
            let index = line / size;
            let slot = st.resident.get(&index)?;
            out.push(slot.chunk.lines.get(line - index * size).cloned().unwrap_or_default());
        }
        Some(out)
    }

    /// `(resident, missing)` chunk counts for lines `start..end`.
    pub fn residency(&self, start: usize, end: usize) -> (u64, u64) {
        let st = self.state();
        let end = end.min(st.total_lines);
        if start >= end {
            return (0, 0);
        }
        let size = st.config.chunk_size;
        (start / size..=(end - 1) / size).fold((0, 0), |(hit, miss), index| {
            if st.resident.contains_key(&index) {
                (hit + 1, miss)
            } else {
                (hit, miss + 1)
            }
        })
    }

    /// Make every chunk covering lines `start..end` resident. Lines past the
    /// document are ignored. Returns the number of chunks touched.
    pub async fn warm_lines(&self, start: usize, end: usize) -> Result<usize, ChunkError> {
        let (total, size) = {
            let st = self.state();
            (st.total_lines, st.config.chunk_size)
        };
        let end = end.min(total);
        if start >= end {
            return Ok(0);
        }
        let chunks = start / size..=(end - 1) / size;
        let touched = chunks.clone().count();
        for index in chunks {
            self.load_chunk(index).await?;
        }
        trace!(target: "chunks", start, end, touched, "lines_warmed");
        Ok(touched)
    }

    /// Spawn background loads for up to `preload_chunks` neighbours on each
    /// side of `center`. Resident and out-of-range neighbours are skipped.
    pub fn preload_adjacent_chunks(&self, center: usize) -> Vec<JoinHandle<()>> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(target: "chunks", center, "preload_skipped_no_runtime");
            return Vec::new();
        };
        let targets: Vec<usize> = {
            let st = self.state();
            let total = st.metadata.len();
            (1..=st.config.preload_chunks)
                .flat_map(|d| [center.checked_sub(d), center.checked_add(d)])
                .flatten()
                .filter(|&i| i < total && !st.resident.contains_key(&i))
                .collect()
        };
        targets
            .into_iter()
            .map(|index| {
                let mgr = self.clone();
                runtime.spawn(async move {
                    if let Err(err) = mgr.load_chunk(index).await {
                        warn!(target: "chunks", chunk = index, error = %err, "preload_failed");
                    }
                })
            })
            .collect()
    }

    /// Evict the oldest 30% of resident chunks if at capacity.
    pub fn evict_if_needed(&self) -> usize {
        self.state().evict_if_needed()
    }

    pub fn stats(&self) -> ChunkStats {
        let st = self.state();
        ChunkStats {
            total_lines: st.total_lines,
            total_chunks: st.metadata.len(),
            resident_chunks: st.resident.len(),
            max_loaded_chunks: st.config.max_loaded_chunks,
            ..st.stats
        }
    }

    pub fn total_lines(&self) -> usize {
        self.state().total_lines
    }

    pub fn total_chunks(&self) -> usize {
        self.state().metadata.len()
    }

    pub fn chunk_size(&self) -> usize {
        self.state().config.chunk_size
    }

    pub fn metadata(&self, index: usize) -> Option<ChunkMetadata> {
        self.state().metadata.get(index).copied()
    }

    pub fn is_loaded(&self, index: usize) -> bool {
        self.state().resident.contains_key(&index)
    }

    /// Resident chunk indices, ascending.
    pub fn resident_indices(&self) -> Vec<usize> {
        let mut v: Vec<usize> = self.state().resident.keys().copied().collect();
        v.sort_unstable();
        v
    }

    /// Chunk index holding `line`, if the line exists.
    pub fn chunk_for_line(&self, line: usize) -> Option<usize> {
        let st = self.state();
        (line < st.total_lines).then(|| line / st.config.chunk_size)
    }

    /// Drop every chunk and the document itself.
    pub fn destroy(&self) {
        let mut st = self.state();
        st.generation += 1;
        st.resident.clear();
        st.in_flight.clear();
        st.metadata.clear();
        st.document = None;
        st.total_lines = 0;
        debug!(target: "chunks", "chunk_manager_destroyed");
    }
}

impl Cache<usize> for ChunkManager {
    fn size(&self) -> usize {
        self.state().resident.len()
    }

    /// Resident indices in load order.
    fn keys(&self) -> Vec<usize> {
        let st = self.state();
        let mut v: Vec<(u64, usize)> = st
            .resident
            .iter()
            .map(|(&idx, slot)| (slot.loaded_seq, idx))
            .collect();
        v.sort_unstable();
        v.into_iter().map(|(_, idx)| idx).collect()
    }

    fn delete(&self, key: &usize) -> bool {
        let mut st = self.state();
        let removed = st.drop_resident(*key);
        if removed {
            st.stats.evictions += 1;
        }
        removed
    }

    fn clear(&self) {
        let mut st = self.state();
        let indices: Vec<usize> = st.resident.keys().copied().collect();
        for idx in indices {
            st.drop_resident(idx);
        }
    }
}
