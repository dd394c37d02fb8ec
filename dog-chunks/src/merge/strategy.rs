use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use super::media::MediaTransform;
use super::registry::StrategyKind;
use crate::types::join_path;
use crate::{BlobStore, ChunkError, ChunkEvent, ChunkResult, ChunkStore, DiskTarget, EventSink};

/// Storage a strategy reads chunks from and writes the artifact to
#[derive(Clone)]
pub struct MergeContext {
    pub chunks: ChunkStore,
    pub merge_store: Arc<dyn BlobStore>,
    pub merge: DiskTarget,
    pub transform: Option<Arc<dyn MediaTransform>>,
    pub events: Arc<dyn EventSink>,
}

impl MergeContext {
    /// Whether chunks and artifact live on the same store instance
    pub fn same_store(&self) -> bool {
        Arc::ptr_eq(self.chunks.blob_store(), &self.merge_store)
    }
}

/// What a strategy instance works on: one session folder, one destination
#[derive(Clone, Default)]
pub struct StrategyBinding {
    context: Option<MergeContext>,
    folder: Option<String>,
    destination: Option<String>,
}

impl StrategyBinding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(mut self, context: MergeContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_folder<S: Into<String>>(mut self, folder: S) -> Self {
        self.folder = Some(folder.into());
        self
    }

    /// Destination file name, relative to the merge folder
    pub fn with_destination<S: Into<String>>(mut self, destination: S) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn context(&self) -> ChunkResult<&MergeContext> {
        self.context
            .as_ref()
            .ok_or_else(|| ChunkError::strategy("no manager bound to the merge strategy"))
    }

    pub fn folder(&self) -> ChunkResult<&str> {
        self.folder
            .as_deref()
            .ok_or_else(|| ChunkError::strategy("no chunks folder bound to the merge strategy"))
    }

    pub fn destination(&self) -> ChunkResult<&str> {
        self.destination
            .as_deref()
            .ok_or_else(|| ChunkError::strategy("no destination bound to the merge strategy"))
    }

    /// `<merge folder>/<destination>`
    pub fn destination_path(&self) -> ChunkResult<String> {
        Ok(join_path(&self.context()?.merge.folder, self.destination()?))
    }
}

/// One way of turning a session folder into a single artifact
#[async_trait]
pub trait MergeStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn binding(&self) -> &StrategyBinding;

    /// Verify stored chunk sizes against what the client declared
    async fn check_integrity(&self, chunk_size: u64, total_size: u64) -> ChunkResult<bool> {
        verify_integrity(self.binding(), chunk_size, total_size).await
    }

    /// Merge every chunk into the destination and remove the session.
    ///
    /// Returns the artifact path. On failure no chunk is deleted.
    async fn merge(&self) -> ChunkResult<String>;
}

/// Sum stored chunk sizes; every chunk but the last must be at least
/// `chunk_size` and the sum must reach `total_size`.
pub async fn verify_integrity(
    binding: &StrategyBinding,
    chunk_size: u64,
    total_size: u64,
) -> ChunkResult<bool> {
    let context = binding.context()?;
    let folder = binding.folder()?;
    let paths = context.chunks.chunk_paths(folder).await?;

    let mut total = 0u64;
    for (position, path) in paths.iter().enumerate() {
        let size = context.chunks.size(path).await?;
        let last = position + 1 == paths.len();
        if !last && size < chunk_size {
            debug!(path = %path, size, chunk_size, "truncated chunk");
            return Ok(false);
        }
        total += size;
    }

    debug!(folder = %folder, total, total_size, "integrity totals");
    Ok(total >= total_size)
}

/// Delete the session folder after a successful merge
pub(crate) async fn remove_session(binding: &StrategyBinding) -> ChunkResult<()> {
    let context = binding.context()?;
    let folder = binding.folder()?;
    let events = context.events.clone();
    context
        .chunks
        .delete_folder(folder, |path| events.emit(ChunkEvent::chunk_deleted(folder, path)))
        .await
}

/// Apply the merge target's visibility to the artifact when the store can
pub(crate) async fn apply_visibility(context: &MergeContext, path: &str) -> ChunkResult<()> {
    if let Some(visibility) = context.merge.options.visibility {
        if context.merge_store.capabilities().visibility {
            context.merge_store.set_visibility(path, visibility).await?;
        }
    }
    Ok(())
}

/// Remove what a failed merge left at `path`.
///
/// Only called when nothing was at `path` before the merge started, so an
/// earlier artifact with the same name is never touched.
pub(crate) async fn discard_partial(context: &MergeContext, path: &str) {
    match context.merge_store.exists(path).await {
        Ok(true) => {
            if let Err(e) = context.merge_store.delete(path).await {
                warn!(path = %path, error = %e, "could not discard partial artifact");
            }
        }
        Ok(false) => {}
        Err(e) => warn!(path = %path, error = %e, "could not inspect partial artifact"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryStore, TracingSink};

    fn binding(memory: &MemoryStore) -> StrategyBinding {
        let store: Arc<dyn BlobStore> = Arc::new(memory.clone());
        StrategyBinding::new()
            .with_context(MergeContext {
                chunks: ChunkStore::new(store.clone(), &DiskTarget::new("chunks")),
                merge_store: store,
                merge: DiskTarget::new("merged"),
                transform: None,
                events: Arc::new(TracingSink),
            })
            .with_folder("f")
            .with_destination("f.bin")
    }

    #[tokio::test]
    async fn last_chunk_may_be_short() {
        let memory = MemoryStore::new();
        memory.insert("chunks/f/0_f.bin", vec![0u8; 4]);
        memory.insert("chunks/f/1_f.bin", vec![0u8; 4]);
        memory.insert("chunks/f/2_f.bin", vec![0u8; 1]);
        let binding = binding(&memory);

        assert!(verify_integrity(&binding, 4, 9).await.unwrap());
        assert!(!verify_integrity(&binding, 4, 10).await.unwrap());
        assert!(verify_integrity(&binding, 4, 9).await.unwrap());
    }

    #[tokio::test]
    async fn short_middle_chunk_fails() {
        let memory = MemoryStore::new();
        memory.insert("chunks/f/0_f.bin", vec![0u8; 4]);
        memory.insert("chunks/f/1_f.bin", vec![0u8; 3]);
        memory.insert("chunks/f/2_f.bin", vec![0u8; 4]);

        assert!(!verify_integrity(&binding(&memory), 4, 11).await.unwrap());
    }

    #[tokio::test]
    async fn unbound_strategy_is_a_wiring_error() {
        let err = verify_integrity(&StrategyBinding::new(), 1, 1).await.unwrap_err();
        assert!(matches!(err, ChunkError::Strategy { .. }));
        assert_eq!(
            binding(&MemoryStore::new()).destination_path().unwrap(),
            "merged/f.bin"
        );
    }
}
