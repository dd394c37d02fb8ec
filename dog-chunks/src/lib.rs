//! # dog-chunks: Ordered chunked uploads for DogRS
//!
//! `dog-chunks` assembles large files uploaded as a sequence of numbered
//! chunks. Chunks must arrive in strictly increasing order from a configured
//! starting index; the last chunk is detected from the declared total and
//! chunk sizes, and a merge strategy picked by MIME type turns the session
//! into one artifact.
//!
//! ## Key Features
//!
//! - **Strict ordering**: each session folder only ever holds a contiguous run of indexes
//! - **Per-folder locking**: check-and-store is serialized per session
//! - **Integrity checks**: truncated chunks and short sessions never get merged
//! - **Pluggable strategies**: byte concatenation, audio and video, plus your own
//! - **Storage agnostic**: memory, local filesystem, S3-compatible, or any [`BlobStore`]
//! - **Sync or queued merges**: inline with the last request, or on a background worker
//!
//! ## Quick Start
//!
//! ```rust
//! use dog_chunks::prelude::*;
//! use dog_chunks::bytes_stream;
//!
//! # #[tokio::main]
//! # async fn main() -> ChunkResult<()> {
//! let store = MemoryStore::new();
//! let manager = ChunkManager::new(ChunkSettings::default(), Disks::new(store.clone()))?;
//!
//! // Two chunks of a 6 byte upload, 4 bytes per chunk
//! for (index, body) in [(0, "abcd"), (1, "ef")] {
//!     let file = ChunkFile::new("notes.txt", bytes_stream(body));
//!     manager.handle(AddChunkRequest::new(index, file, 4, 6), None).await?;
//! }
//!
//! assert_eq!(store.read("notes.txt").unwrap(), "abcdef");
//! assert!(manager.chunk_folders().await?.is_empty());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │   ChunkManager   │  ← ordering, last-chunk detection, dispatch
//! ├──────────────────┤
//! │  ChunkSequencer  │  ← contiguous index invariant
//! │   MergeHandler   │  ← strategy selection and execution
//! ├──────────────────┤
//! │    ChunkStore    │  ← session folders on a disk
//! ├──────────────────┤
//! │    BlobStore     │  ← storage primitives
//! └──────────────────┘
//! ```

mod chunk;
mod chunk_store;
mod config;
mod error;
mod events;
mod local;
mod manager;
mod memory;
pub mod merge;
mod ordering;
pub mod queue;
mod request;
mod s3_store;
mod sequencer;
pub mod store;
mod types;

// Re-export main types for clean API
pub use chunk::{slug, split_name, Chunk, ChunkFile, ChunkSource};
pub use chunk_store::ChunkStore;
pub use config::{
    ChunkSettings, DiskTarget, StrategyConfig, ValidationKeys, INDEX_ONE, INDEX_ZERO,
    SYNC_CONNECTION,
};
pub use error::{ChunkError, ChunkResult, ErrorKind};
pub use events::{BroadcastSink, ChunkEvent, EventSink, TracingSink};
pub use local::LocalStore;
pub use manager::{ChunkManager, ClearOutcome, ClearReport, HandledChunk};
pub use memory::MemoryStore;
pub use merge::{
    MergeDispatch, MergeHandler, MergeRequest, MergeStrategy, StrategyKind, StrategyRegistry,
};
pub use ordering::ChunkOrdering;
pub use queue::{JobError, JobId, MergeChunksJob, QueueConfig, TokioWorkQueue, WorkQueue};
pub use request::{AddChunkRequest, FormField};
pub use s3_store::{S3CompatibleStore, S3Config};
pub use sequencer::{ChunkSequencer, FolderLocks};
pub use store::{BlobStore, Disks};
pub use types::{
    bytes_stream, collect_stream, ByteStream, StoreCapabilities, StoreOptions, Visibility,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        AddChunkRequest, BlobStore, ByteStream, Chunk, ChunkError, ChunkFile, ChunkManager,
        ChunkResult, ChunkSettings, Disks, LocalStore, MemoryStore, MergeDispatch,
    };
}
