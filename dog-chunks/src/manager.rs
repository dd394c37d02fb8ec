use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::chunk::{slug, split_name};
use crate::merge::{
    MediaTransform, MergeContext, MergeDispatch, MergeHandler, MergeRequest, StrategyRegistry,
};
use crate::ordering::ChunkOrdering;
use crate::queue::{MergeChunksJob, QueueConfig, TokioWorkQueue, WorkQueue};
use crate::sequencer::{ChunkSequencer, FolderLocks};
use crate::types::file_name;
use crate::{
    AddChunkRequest, BlobStore, Chunk, ChunkError, ChunkEvent, ChunkFile, ChunkResult,
    ChunkSettings, ChunkStore, Disks, EventSink, TracingSink,
};

/// A stored chunk and, when it completed the upload, what happened to the merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandledChunk {
    pub chunk: Chunk,
    pub merge: Option<MergeDispatch>,
}

/// Outcome of clearing one session folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClearOutcome {
    pub folder: String,
    pub error: Option<String>,
}

impl ClearOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

impl fmt::Display for ClearOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            None => write!(f, "deleted {}", self.folder),
            Some(error) => write!(f, "failed {}: {}", self.folder, error),
        }
    }
}

/// Per-folder results of [`ChunkManager::clear_chunks`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    pub outcomes: Vec<ClearOutcome>,
}

impl ClearReport {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(ClearOutcome::is_success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ClearOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.is_success())
    }
}

/// Accepts chunks, detects the last one and hands finished sessions to the
/// merge strategies.
///
/// Cloning is cheap; clones share stores, locks, sinks and the queue.
#[derive(Clone)]
pub struct ChunkManager {
    settings: Arc<ChunkSettings>,
    disks: Disks,
    chunks: ChunkStore,
    sequencer: ChunkSequencer,
    merge_store: Arc<dyn BlobStore>,
    registry: Arc<StrategyRegistry>,
    transform: Option<Arc<dyn MediaTransform>>,
    events: Arc<dyn EventSink>,
    queue: Arc<dyn WorkQueue>,
    locks: FolderLocks,
}

impl ChunkManager {
    /// Wire a manager; unknown disks, unbound validation keys and unknown
    /// strategies fail here rather than on first use
    pub fn new(settings: ChunkSettings, disks: Disks) -> ChunkResult<Self> {
        Self::with_registry(settings, disks, StrategyRegistry::new())
    }

    /// Like [`ChunkManager::new`], with a registry carrying extra strategies.
    /// The registry's MIME bindings are replaced by the configured ones.
    pub fn with_registry(
        settings: ChunkSettings,
        disks: Disks,
        registry: StrategyRegistry,
    ) -> ChunkResult<Self> {
        settings.validation.validate()?;
        let registry = registry.configure(&settings.strategies)?;
        let chunk_store = disks.resolve(settings.chunks.disk.as_deref())?;
        let merge_store = disks.resolve(settings.merge.disk.as_deref())?;
        let chunks = ChunkStore::new(chunk_store, &settings.chunks);

        debug!(
            chunks_folder = %settings.chunks.folder,
            merge_folder = %settings.merge.folder,
            base = settings.index,
            sync = settings.is_sync(),
            "chunk manager configured"
        );

        Ok(Self {
            sequencer: ChunkSequencer::new(chunks.clone()),
            chunks,
            merge_store,
            registry: Arc::new(registry),
            transform: None,
            events: Arc::new(TracingSink),
            queue: Arc::new(TokioWorkQueue::new(QueueConfig::default())),
            locks: FolderLocks::new(),
            settings: Arc::new(settings),
            disks,
        })
    }

    pub fn with_events<E: EventSink + 'static>(mut self, events: E) -> Self {
        self.events = Arc::new(events);
        self
    }

    pub fn with_transform<T: MediaTransform + 'static>(mut self, transform: T) -> Self {
        self.transform = Some(Arc::new(transform));
        self
    }

    pub fn with_queue<Q: WorkQueue + 'static>(mut self, queue: Q) -> Self {
        self.queue = Arc::new(queue);
        self
    }

    /// Manager storing chunks on another disk/folder; `self` is unchanged
    pub fn with_chunks_location<F: Into<String>>(
        &self,
        disk: Option<&str>,
        folder: F,
    ) -> ChunkResult<Self> {
        let mut settings = (*self.settings).clone();
        settings.chunks.disk = disk.map(str::to_string);
        settings = settings.with_chunks_folder(folder);

        let store = self.disks.resolve(settings.chunks.disk.as_deref())?;
        let chunks = ChunkStore::new(store, &settings.chunks);
        let mut manager = self.clone();
        manager.sequencer = ChunkSequencer::new(chunks.clone());
        manager.chunks = chunks;
        manager.settings = Arc::new(settings);
        Ok(manager)
    }

    /// Manager writing artifacts to another disk/folder; `self` is unchanged
    pub fn with_merge_location<F: Into<String>>(
        &self,
        disk: Option<&str>,
        folder: F,
    ) -> ChunkResult<Self> {
        let mut settings = (*self.settings).clone();
        settings.merge.disk = disk.map(str::to_string);
        settings = settings.with_merge_folder(folder);

        let mut manager = self.clone();
        manager.merge_store = self.disks.resolve(settings.merge.disk.as_deref())?;
        manager.settings = Arc::new(settings);
        Ok(manager)
    }

    pub fn settings(&self) -> &ChunkSettings {
        &self.settings
    }

    pub fn chunk_store(&self) -> &ChunkStore {
        &self.chunks
    }

    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    fn lock_key(&self, folder: &str) -> String {
        format!(
            "{}::{}",
            self.chunks.disk().unwrap_or_default(),
            self.chunks.folder_path(folder)
        )
    }

    fn handler(&self) -> MergeHandler {
        MergeHandler::new(
            self.registry.clone(),
            MergeContext {
                chunks: self.chunks.clone(),
                merge_store: self.merge_store.clone(),
                merge: self.settings.merge.clone(),
                transform: self.transform.clone(),
                events: self.events.clone(),
            },
        )
    }

    /// Store `file` as chunk `index` of `folder` if it is the next one expected
    #[instrument(skip(self, file))]
    pub async fn add_chunk(&self, file: ChunkFile, index: i64, folder: &str) -> ChunkResult<Chunk> {
        let _guard = self.locks.lock(&self.lock_key(folder)).await;

        if !self
            .sequencer
            .check_ordering(folder, index, self.settings.index)
            .await?
        {
            return Err(ChunkError::integrity(format!(
                "chunk {} is not the next chunk of session '{}' (sessions start at {})",
                index, folder, self.settings.index
            )));
        }

        let disk = self.chunks.disk().map(str::to_string);
        let mut chunk = Chunk::new(index, file.original_name, disk);
        self.chunks.store(&mut chunk, folder, file.body).await?;

        let path = chunk.stored_path().unwrap_or_default();
        self.events.emit(ChunkEvent::chunk_added(folder, index, path));
        Ok(chunk)
    }

    /// Number of chunks an upload is split into
    pub fn compute_last_index(&self, total_size: u64, chunk_size: u64) -> ChunkResult<u64> {
        ChunkOrdering::last_index(total_size, chunk_size)
            .ok_or_else(|| ChunkError::invalid("chunk size must be at least 1"))
    }

    /// Whether `index` is the final chunk, in the configured index base
    pub fn is_last_index(&self, index: i64, total_size: u64, chunk_size: u64) -> ChunkResult<bool> {
        ChunkOrdering::is_last(index, total_size, chunk_size, self.settings.index)
            .ok_or_else(|| ChunkError::invalid("chunk size must be at least 1"))
    }

    /// Session folder for an upload: the explicit folder if given, the
    /// file name without extension otherwise, slugified either way
    pub fn resolve_folder(&self, original_name: &str, folder: Option<&str>) -> ChunkResult<String> {
        let folder = match folder {
            Some(folder) => slug(folder),
            None => slug(&split_name(original_name).0),
        };
        if folder.is_empty() {
            return Err(ChunkError::invalid(format!(
                "cannot derive a session folder from '{}'",
                original_name
            )));
        }
        Ok(folder)
    }

    /// Accept one chunk of an upload request; returns the stored chunk
    pub async fn handle(
        &self,
        request: AddChunkRequest,
        folder: Option<&str>,
    ) -> ChunkResult<Chunk> {
        Ok(self.handle_upload(request, folder).await?.chunk)
    }

    /// Accept one chunk and, when it is the last one and auto-merge is on,
    /// dispatch the merge.
    ///
    /// Indexes past the last one of the declared upload are rejected before
    /// anything is stored.
    #[instrument(skip(self, request), fields(index = request.index))]
    pub async fn handle_upload(
        &self,
        request: AddChunkRequest,
        folder: Option<&str>,
    ) -> ChunkResult<HandledChunk> {
        if request.chunk_size == 0 {
            return Err(ChunkError::invalid("chunk size must be at least 1"));
        }
        let past_last = ChunkOrdering::is_past_last(
            request.index,
            request.total_size,
            request.chunk_size,
            self.settings.index,
        );
        if past_last == Some(true) {
            return Err(ChunkError::integrity(format!(
                "chunk {} is past the last chunk of a {} byte upload",
                request.index, request.total_size
            )));
        }

        let folder = self.resolve_folder(&request.file.original_name, folder)?;
        let destination = file_name(&request.file.original_name).to_string();
        let mime_type = request.file.mime_type().to_string();

        let mut chunk = self.add_chunk(request.file, request.index, &folder).await?;

        if !self.is_last_index(request.index, request.total_size, request.chunk_size)? {
            return Ok(HandledChunk { chunk, merge: None });
        }

        chunk.mark_last();
        info!(folder = %folder, "last chunk received");
        if !self.settings.auto_merge {
            return Ok(HandledChunk { chunk, merge: None });
        }

        let dispatch = self
            .dispatch_merge(MergeRequest {
                folder,
                destination,
                mime_type,
                chunk_size: request.chunk_size,
                total_size: request.total_size,
            })
            .await?;
        Ok(HandledChunk {
            chunk,
            merge: Some(dispatch),
        })
    }

    /// Merge inline on the sync connection, enqueue otherwise
    pub async fn dispatch_merge(&self, request: MergeRequest) -> ChunkResult<MergeDispatch> {
        let job = MergeChunksJob::new(request);

        if self.settings.is_sync() {
            let folder = job.request.folder.clone();
            let destination = job.request.destination.clone();
            return match self.queue.dispatch_now(job, self.clone()).await {
                Ok(destination) => Ok(MergeDispatch::Completed { destination }),
                Err(err) => {
                    self.events.emit(ChunkEvent::merge_failed(&folder, &destination, &err));
                    Err(err)
                }
            };
        }

        let job_id = self
            .queue
            .dispatch(
                job,
                self.clone(),
                self.settings.connection_name(),
                self.settings.queue_name(),
            )
            .await?;
        Ok(MergeDispatch::Queued { job_id })
    }

    /// Whether the stored chunks add up to what the request declares
    pub async fn check_integrity(&self, request: &MergeRequest) -> ChunkResult<bool> {
        let _guard = self.locks.lock(&self.lock_key(&request.folder)).await;
        self.handler().check_integrity(request).await
    }

    /// Verify and merge a session now; returns the artifact path
    pub async fn merge(&self, request: &MergeRequest) -> ChunkResult<String> {
        let key = self.lock_key(&request.folder);
        let guard = self.locks.lock(&key).await;
        let merged = self.handler().merge(request).await;
        drop(guard);
        if merged.is_ok() {
            self.locks.forget(&key);
        }
        merged
    }

    /// Persisted chunks of a session, ordered by index
    pub async fn chunks(&self, folder: &str) -> ChunkResult<Vec<Chunk>> {
        self.chunks.chunks(folder).await
    }

    /// Delete every chunk of a session and then its folder, stopping at the
    /// first chunk that cannot be deleted
    #[instrument(skip(self), fields(folder = %folder))]
    pub async fn delete_chunks(&self, folder: &str) -> ChunkResult<()> {
        let key = self.lock_key(folder);
        let guard = self.locks.lock(&key).await;
        let events = self.events.clone();
        let deleted = self
            .chunks
            .delete_folder(folder, |path| events.emit(ChunkEvent::chunk_deleted(folder, path)))
            .await;
        drop(guard);
        if deleted.is_ok() {
            self.locks.forget(&key);
        }
        deleted
    }

    /// Every session folder currently stored
    pub async fn chunk_folders(&self) -> ChunkResult<Vec<String>> {
        self.chunks.folders().await
    }

    /// Delete one session, or every session when `folder` is `None`
    pub async fn clear_chunks(&self, folder: Option<&str>) -> ChunkResult<ClearReport> {
        let folders = match folder {
            Some(folder) => vec![folder.to_string()],
            None => self.chunk_folders().await?,
        };

        let mut report = ClearReport::default();
        for folder in folders {
            let result = match self.chunks.folder_exists(&folder).await {
                Ok(true) => self.delete_chunks(&folder).await,
                Ok(false) => Err(ChunkError::not_found(self.chunks.folder_path(&folder))),
                Err(err) => Err(err),
            };
            if let Err(err) = &result {
                warn!(folder = %folder, error = %err, "could not clear session");
            }
            report.outcomes.push(ClearOutcome {
                folder,
                error: result.err().map(|err| err.to_string()),
            });
        }
        Ok(report)
    }
}
