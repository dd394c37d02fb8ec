use async_trait::async_trait;

use dog_chunks::{
    BlobStore, BroadcastSink, ByteStream, ChunkError, ChunkManager, ChunkResult, ChunkSettings,
    Disks, MemoryStore, StoreCapabilities, StoreOptions,
};

/// Memory store that refuses to delete one file
#[derive(Clone)]
struct StickyStore {
    inner: MemoryStore,
    sticky: String,
}

impl StickyStore {
    fn new(inner: MemoryStore, sticky: &str) -> Self {
        Self {
            inner,
            sticky: sticky.to_string(),
        }
    }
}

#[async_trait]
impl BlobStore for StickyStore {
    async fn exists(&self, path: &str) -> ChunkResult<bool> {
        self.inner.exists(path).await
    }

    async fn make_directory(&self, path: &str) -> ChunkResult<()> {
        self.inner.make_directory(path).await
    }

    async fn list_files(&self, path: &str) -> ChunkResult<Vec<String>> {
        self.inner.list_files(path).await
    }

    async fn list_directories(&self, path: &str) -> ChunkResult<Vec<String>> {
        self.inner.list_directories(path).await
    }

    async fn size(&self, path: &str) -> ChunkResult<u64> {
        self.inner.size(path).await
    }

    async fn read_stream(&self, path: &str) -> ChunkResult<ByteStream> {
        self.inner.read_stream(path).await
    }

    async fn write_stream(
        &self,
        path: &str,
        stream: ByteStream,
        options: &StoreOptions,
    ) -> ChunkResult<u64> {
        self.inner.write_stream(path, stream, options).await
    }

    async fn delete(&self, path: &str) -> ChunkResult<()> {
        if path == self.sticky {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "file is locked by another process",
            )
            .into());
        }
        self.inner.delete(path).await
    }

    async fn delete_directory(&self, path: &str) -> ChunkResult<()> {
        self.inner.delete_directory(path).await
    }

    fn capabilities(&self) -> StoreCapabilities {
        self.inner.capabilities()
    }
}

/// Test factory functions
fn create_manager(memory: &MemoryStore, sticky: &str) -> ChunkManager {
    let disks = Disks::new(StickyStore::new(memory.clone(), sticky));
    ChunkManager::new(ChunkSettings::new().with_auto_merge(false), disks).unwrap()
}

fn seed_session(memory: &MemoryStore, folder: &str, count: usize) {
    for index in 0..count {
        memory.insert(&format!("chunks/{}/{}_{}.bin", folder, index, folder), "x");
    }
}

/// 1. Deletion stops at the first chunk that cannot be removed
#[tokio::test]
async fn test_delete_stops_at_first_failure() {
    // Arrange
    let memory = MemoryStore::new();
    seed_session(&memory, "doc", 3);
    let sink = BroadcastSink::new(16);
    let mut receiver = sink.subscribe();
    let manager = create_manager(&memory, "chunks/doc/1_doc.bin").with_events(sink);

    // Act
    let result = manager.delete_chunks("doc").await;

    // Assert: chunk 0 gone, chunk 1 onwards and the folder kept
    assert!(matches!(result, Err(ChunkError::Io { .. })));
    assert!(memory.read("chunks/doc/0_doc.bin").is_none());
    assert!(memory.read("chunks/doc/1_doc.bin").is_some());
    assert!(memory.read("chunks/doc/2_doc.bin").is_some());
    assert!(memory.exists("chunks/doc").await.unwrap());

    let deleted = receiver.try_recv().unwrap();
    assert_eq!(deleted.event_name(), "chunk_deleted");
    assert!(receiver.try_recv().is_err());
}

/// 2. Clearing reports the stuck session and still clears the others
#[tokio::test]
async fn test_clear_reports_stuck_session() {
    // Arrange
    let memory = MemoryStore::new();
    seed_session(&memory, "a", 2);
    seed_session(&memory, "b", 2);
    let manager = create_manager(&memory, "chunks/a/1_a.bin");

    // Act
    let report = manager.clear_chunks(None).await.unwrap();

    // Assert
    assert!(!report.is_success());
    let failed: Vec<&str> = report.failures().map(|o| o.folder.as_str()).collect();
    assert_eq!(failed, vec!["a"]);
    assert!(report.outcomes[0].to_string().starts_with("failed a:"));
    assert_eq!(report.outcomes[1].to_string(), "deleted b");
    assert_eq!(memory.files(), vec!["chunks/a/1_a.bin".to_string()]);
    assert_eq!(manager.chunk_folders().await.unwrap(), vec!["a".to_string()]);
}
