use async_trait::async_trait;
use futures_util::StreamExt;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::registry::StrategyKind;
use super::strategy::{
    apply_visibility, discard_partial, remove_session, MergeStrategy, StrategyBinding,
};
use crate::{BlobStore, ByteStream, ChunkError, ChunkResult};

/// Concatenates raw chunk bytes in index order.
///
/// Uses the store's native `concatenate` when chunks and artifact share one
/// store that supports it, and streams chunk after chunk into the destination
/// otherwise.
pub struct ConcatStrategy {
    binding: StrategyBinding,
}

impl ConcatStrategy {
    pub fn new(binding: StrategyBinding) -> Self {
        Self { binding }
    }

    /// Chunk contents one after another as a single stream
    fn sequential_stream(store: Arc<dyn BlobStore>, sources: Vec<String>) -> ByteStream {
        let stream = async_stream::stream! {
            for source in sources {
                match store.read_stream(&source).await {
                    Ok(mut chunk) => {
                        while let Some(frame) = chunk.next().await {
                            yield frame;
                        }
                    }
                    Err(e) => {
                        yield Err(std::io::Error::new(
                            std::io::ErrorKind::Other,
                            format!("failed to read chunk {}: {}", source, e),
                        ));
                        return;
                    }
                }
            }
        };
        Box::pin(stream)
    }
}

#[async_trait]
impl MergeStrategy for ConcatStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Concat
    }

    fn binding(&self) -> &StrategyBinding {
        &self.binding
    }

    #[instrument(skip(self), fields(strategy = "concat"))]
    async fn merge(&self) -> ChunkResult<String> {
        let context = self.binding.context()?;
        let folder = self.binding.folder()?;
        let destination = self.binding.destination_path()?;

        let sources = context.chunks.chunk_paths(folder).await?;
        if sources.is_empty() {
            return Err(ChunkError::integrity(format!("session '{}' holds no chunks", folder)));
        }

        let existed = context.merge_store.exists(&destination).await?;
        let native = context.same_store() && context.merge_store.capabilities().concatenate;
        debug!(folder = %folder, chunks = sources.len(), native, "concatenating chunks");

        let merged = if native {
            context.merge_store.concatenate(&destination, &sources).await
        } else {
            let stream = Self::sequential_stream(context.chunks.blob_store().clone(), sources);
            context
                .merge_store
                .write_stream(&destination, stream, &context.merge.options)
                .await
                .map(|_| ())
        };

        if let Err(e) = merged {
            warn!(
                folder = %folder,
                destination = %destination,
                error = %e,
                "concatenation failed, chunks kept"
            );
            if !existed {
                discard_partial(context, &destination).await;
            }
            return Err(ChunkError::merge(
                format!("could not concatenate session '{}' into '{}'", folder, destination),
                e,
            ));
        }

        if native {
            apply_visibility(context, &destination).await?;
        }
        remove_session(&self.binding).await?;
        Ok(destination)
    }
}
