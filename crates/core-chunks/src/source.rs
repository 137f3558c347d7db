//! Pluggable backing store for documents opened without their full text.

use crate::ChunkMetadata;
use std::future::Future;
use std::pin::Pin;
use tracing::warn;

pub type LoadFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<Vec<String>>> + Send + 'a>>;

/// Supplies the lines of one chunk (remote paging, on-disk index, ...).
///
/// The returned lines should number `meta.line_count`; shorter results are
/// served as-is and missing lines read as empty. Errors are logged by the
/// manager and degrade to an uncached empty chunk.
pub trait ChunkSource: Send + Sync {
    fn load(&self, meta: ChunkMetadata) -> LoadFuture<'_>;
}

/// Default source: no backing store. Every load yields no lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullChunkSource;

impl ChunkSource for NullChunkSource {
    fn load(&self, meta: ChunkMetadata) -> LoadFuture<'_> {
        Box::pin(async move {
            warn!(target: "chunks", chunk = meta.index, "storage_loader_not_configured");
            Ok::<_, anyhow::Error>(Vec::new())
        })
    }
}
