use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Lifecycle notifications for upload sessions.
///
/// Fire-and-forget: sinks observe, they never influence the outcome of the
/// operation that raised the event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChunkEvent {
    /// A chunk was stored in its session folder
    ChunkAdded {
        folder: String,
        index: i64,
        path: String,
        at: DateTime<Utc>,
    },

    /// A chunk file was removed from storage
    ChunkDeleted {
        folder: String,
        path: String,
        at: DateTime<Utc>,
    },

    /// Every chunk of a session was merged into the destination
    ChunksMerged {
        folder: String,
        destination: String,
        strategy: String,
        at: DateTime<Utc>,
    },

    /// A merge gave up; the chunks are still in place
    MergeFailed {
        folder: String,
        destination: String,
        error: String,
        at: DateTime<Utc>,
    },
}

impl ChunkEvent {
    pub fn chunk_added(folder: &str, index: i64, path: &str) -> Self {
        Self::ChunkAdded {
            folder: folder.to_string(),
            index,
            path: path.to_string(),
            at: Utc::now(),
        }
    }

    pub fn chunk_deleted(folder: &str, path: &str) -> Self {
        Self::ChunkDeleted {
            folder: folder.to_string(),
            path: path.to_string(),
            at: Utc::now(),
        }
    }

    pub fn chunks_merged(folder: &str, destination: &str, strategy: &str) -> Self {
        Self::ChunksMerged {
            folder: folder.to_string(),
            destination: destination.to_string(),
            strategy: strategy.to_string(),
            at: Utc::now(),
        }
    }

    pub fn merge_failed(folder: &str, destination: &str, error: impl ToString) -> Self {
        Self::MergeFailed {
            folder: folder.to_string(),
            destination: destination.to_string(),
            error: error.to_string(),
            at: Utc::now(),
        }
    }

    /// Get event type name as string
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::ChunkAdded { .. } => "chunk_added",
            Self::ChunkDeleted { .. } => "chunk_deleted",
            Self::ChunksMerged { .. } => "chunks_merged",
            Self::MergeFailed { .. } => "merge_failed",
        }
    }

    /// Session folder the event belongs to
    pub fn folder(&self) -> &str {
        match self {
            Self::ChunkAdded { folder, .. }
            | Self::ChunkDeleted { folder, .. }
            | Self::ChunksMerged { folder, .. }
            | Self::MergeFailed { folder, .. } => folder,
        }
    }

    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::ChunkAdded { at, .. }
            | Self::ChunkDeleted { at, .. }
            | Self::ChunksMerged { at, .. }
            | Self::MergeFailed { at, .. } => at,
        }
    }
}

/// Receiver of chunk lifecycle events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ChunkEvent);
}

/// Logs every event through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: ChunkEvent) {
        match &event {
            ChunkEvent::ChunkAdded {
                folder,
                index,
                path,
                ..
            } => info!(folder = %folder, index, path = %path, "chunk added"),
            ChunkEvent::ChunkDeleted { folder, path, .. } => {
                info!(folder = %folder, path = %path, "chunk deleted")
            }
            ChunkEvent::ChunksMerged {
                folder,
                destination,
                strategy,
                ..
            } => info!(
                folder = %folder,
                destination = %destination,
                strategy = %strategy,
                "chunks merged"
            ),
            ChunkEvent::MergeFailed {
                folder,
                destination,
                error,
                ..
            } => warn!(
                folder = %folder,
                destination = %destination,
                error = %error,
                "merge failed"
            ),
        }
    }
}

/// Fans events out to any number of subscribers
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<ChunkEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Get a receiver for every event emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ChunkEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: ChunkEvent) {
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_expose_folder_and_name() {
        let event = ChunkEvent::chunk_added("video", 2, "chunks/video/2_video.mp4");
        assert_eq!(event.event_name(), "chunk_added");
        assert_eq!(event.folder(), "video");
        assert!(*event.timestamp() <= Utc::now());
    }

    #[tokio::test]
    async fn broadcast_sink_delivers_to_subscribers() {
        let sink = BroadcastSink::new(8);
        let mut receiver = sink.subscribe();

        sink.emit(ChunkEvent::chunk_deleted("video", "chunks/video/0_video.mp4"));

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.event_name(), "chunk_deleted");
    }
}
