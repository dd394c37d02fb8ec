//! Turning a finished session into one artifact.
//!
//! The [`StrategyRegistry`] picks a [`MergeStrategy`] by MIME type and a
//! [`MergeHandler`] runs it: integrity check first, then the merge itself,
//! which removes the session only once the artifact is written.

pub mod concat;
pub mod media;
pub mod registry;
pub mod strategy;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

pub use concat::ConcatStrategy;
pub use media::{ConcatJob, MediaFormat, MediaKind, MediaStrategy, MediaTransform};
pub use registry::{StrategyFactory, StrategyKind, StrategyRegistry};
pub use strategy::{verify_integrity, MergeContext, MergeStrategy, StrategyBinding};

use crate::queue::JobId;
use crate::{ChunkError, ChunkEvent, ChunkResult};

/// A session ready to be merged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub folder: String,
    /// File name of the artifact inside the merge folder
    pub destination: String,
    pub mime_type: String,
    pub chunk_size: u64,
    pub total_size: u64,
}

/// How a merge was handed off
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MergeDispatch {
    /// Ran inline; the artifact is at `destination`
    Completed { destination: String },
    /// Deferred to a work queue
    Queued { job_id: JobId },
}

/// Runs the strategy selected for a request
#[derive(Clone)]
pub struct MergeHandler {
    registry: Arc<StrategyRegistry>,
    context: MergeContext,
}

impl MergeHandler {
    pub fn new(registry: Arc<StrategyRegistry>, context: MergeContext) -> Self {
        Self { registry, context }
    }

    /// Fresh strategy instance bound to the request's session
    pub fn strategy(&self, request: &MergeRequest) -> ChunkResult<Box<dyn MergeStrategy>> {
        let kind = self.registry.select(&request.mime_type);
        let binding = StrategyBinding::new()
            .with_context(self.context.clone())
            .with_folder(request.folder.clone())
            .with_destination(request.destination.clone());
        self.registry.build(kind, binding)
    }

    pub async fn check_integrity(&self, request: &MergeRequest) -> ChunkResult<bool> {
        self.strategy(request)?
            .check_integrity(request.chunk_size, request.total_size)
            .await
    }

    /// Verify and merge; returns the artifact path
    #[instrument(skip(self, request), fields(folder = %request.folder, mime = %request.mime_type))]
    pub async fn merge(&self, request: &MergeRequest) -> ChunkResult<String> {
        let strategy = self.strategy(request)?;

        if !strategy
            .check_integrity(request.chunk_size, request.total_size)
            .await?
        {
            return Err(ChunkError::integrity(format!(
                "session '{}' does not add up to the declared {} bytes",
                request.folder, request.total_size
            )));
        }

        let destination = strategy.merge().await?;
        let kind = strategy.kind();
        info!(destination = %destination, strategy = %kind, "session merged");
        self.context
            .events
            .emit(ChunkEvent::chunks_merged(&request.folder, &destination, kind.name()));
        Ok(destination)
    }
}
