use std::sync::Arc;
use tracing::debug;

use crate::ordering::ChunkOrdering;
use crate::types::{file_name, join_path};
use crate::{BlobStore, ByteStream, Chunk, ChunkResult, DiskTarget, StoreOptions};

/// Chunk files of every upload session, grouped in one folder per session
#[derive(Clone)]
pub struct ChunkStore {
    store: Arc<dyn BlobStore>,
    disk: Option<String>,
    root: String,
    options: StoreOptions,
}

impl ChunkStore {
    pub fn new(store: Arc<dyn BlobStore>, target: &DiskTarget) -> Self {
        Self {
            store,
            disk: target.disk.clone(),
            root: target.folder.clone(),
            options: target.options.clone(),
        }
    }

    pub fn blob_store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    pub fn disk(&self) -> Option<&str> {
        self.disk.as_deref()
    }

    /// Folder all sessions live under
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Storage path of a session folder
    pub fn folder_path(&self, folder: &str) -> String {
        join_path(&self.root, folder)
    }

    pub async fn folder_exists(&self, folder: &str) -> ChunkResult<bool> {
        self.store.exists(&self.folder_path(folder)).await
    }

    pub async fn make_folder(&self, folder: &str) -> ChunkResult<()> {
        self.store.make_directory(&self.folder_path(folder)).await
    }

    /// Chunk paths of a session, ordered by index
    pub async fn chunk_paths(&self, folder: &str) -> ChunkResult<Vec<String>> {
        let path = self.folder_path(folder);
        if !self.store.exists(&path).await? {
            return Ok(Vec::new());
        }
        Ok(ChunkOrdering::sort(self.store.list_files(&path).await?))
    }

    /// Number of chunks already stored for a session
    pub async fn count(&self, folder: &str) -> ChunkResult<usize> {
        Ok(self.chunk_paths(folder).await?.len())
    }

    /// Persisted chunks of a session, ordered by index
    pub async fn chunks(&self, folder: &str) -> ChunkResult<Vec<Chunk>> {
        Ok(self
            .chunk_paths(folder)
            .await?
            .into_iter()
            .filter_map(|path| Chunk::from_stored(path, self.disk.clone()))
            .collect())
    }

    /// Stream a chunk's bytes into its session folder and record where it landed
    pub async fn store(
        &self,
        chunk: &mut Chunk,
        folder: &str,
        body: ByteStream,
    ) -> ChunkResult<u64> {
        let path = join_path(&self.folder_path(folder), &chunk.filename());
        let written = self.store.write_stream(&path, body, &self.options).await?;
        debug!(path = %path, bytes = written, "stored chunk");
        chunk.mark_stored(path);
        Ok(written)
    }

    pub async fn size(&self, path: &str) -> ChunkResult<u64> {
        self.store.size(path).await
    }

    pub async fn read(&self, path: &str) -> ChunkResult<ByteStream> {
        self.store.read_stream(path).await
    }

    /// Delete every chunk of a session, then the folder itself.
    ///
    /// Stops at the first chunk that cannot be deleted; the remaining chunks
    /// and the folder are left in place.
    pub async fn delete_folder<F>(&self, folder: &str, mut on_deleted: F) -> ChunkResult<()>
    where
        F: FnMut(&str) + Send,
    {
        for path in self.chunk_paths(folder).await? {
            self.store.delete(&path).await?;
            on_deleted(&path);
        }
        let path = self.folder_path(folder);
        if self.store.exists(&path).await? {
            self.store.delete_directory(&path).await?;
        }
        Ok(())
    }

    /// Names of every session folder
    pub async fn folders(&self) -> ChunkResult<Vec<String>> {
        if !self.store.exists(&self.root).await? {
            return Ok(Vec::new());
        }
        let mut folders: Vec<String> = self
            .store
            .list_directories(&self.root)
            .await?
            .iter()
            .map(|dir| file_name(dir).to_string())
            .collect();
        folders.sort();
        Ok(folders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::bytes_stream;
    use crate::MemoryStore;

    fn chunk_store(memory: &MemoryStore) -> ChunkStore {
        ChunkStore::new(Arc::new(memory.clone()), &DiskTarget::new("chunks"))
    }

    #[tokio::test]
    async fn store_names_chunk_inside_session_folder() {
        let memory = MemoryStore::new();
        let store = chunk_store(&memory);
        let mut chunk = Chunk::new(0, "Holiday Clip.mp4", None);

        let written = store.store(&mut chunk, "holiday-clip", bytes_stream("abcd")).await.unwrap();

        assert_eq!(written, 4);
        assert_eq!(chunk.stored_path(), Some("chunks/holiday-clip/0_holiday-clip.mp4"));
        assert_eq!(memory.files(), vec!["chunks/holiday-clip/0_holiday-clip.mp4".to_string()]);
    }

    #[tokio::test]
    async fn chunks_are_listed_by_numeric_index() {
        let memory = MemoryStore::new();
        for index in [10, 2, 1, 0] {
            memory.insert(&format!("chunks/f/{}_f.bin", index), "x");
        }
        let store = chunk_store(&memory);

        let indexes: Vec<i64> = store.chunks("f").await.unwrap().iter().map(Chunk::index).collect();
        assert_eq!(indexes, vec![0, 1, 2, 10]);
        assert_eq!(store.count("missing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_folder_reports_each_chunk() {
        let memory = MemoryStore::new();
        memory.insert("chunks/f/0_f.bin", "a");
        memory.insert("chunks/f/1_f.bin", "b");
        let store = chunk_store(&memory);

        let mut deleted = Vec::new();
        store
            .delete_folder("f", |path| deleted.push(path.to_string()))
            .await
            .unwrap();

        assert_eq!(deleted, vec!["chunks/f/0_f.bin", "chunks/f/1_f.bin"]);
        assert!(!store.folder_exists("f").await.unwrap());
        assert!(store.folders().await.unwrap().is_empty());
    }
}
