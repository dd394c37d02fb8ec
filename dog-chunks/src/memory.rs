use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::types::{bytes_stream, collect_stream, normalize_path, parent_path};
use crate::{
    BlobStore, ByteStream, ChunkError, ChunkResult, StoreCapabilities, StoreOptions, Visibility,
};

#[derive(Default)]
struct MemoryState {
    files: BTreeMap<String, Bytes>,
    directories: BTreeSet<String>,
    visibility: HashMap<String, Visibility>,
}

impl MemoryState {
    fn register_parents(&mut self, path: &str) {
        let mut parent = parent_path(path);
        while !parent.is_empty() {
            if !self.directories.insert(parent.clone()) {
                break;
            }
            parent = parent_path(&parent);
        }
    }
}

/// In-process blob store. Clones share the same contents.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
    capabilities: StoreCapabilities,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
            capabilities: StoreCapabilities::basic().with_concatenate().with_visibility(),
        }
    }

    /// Behave like a backend without native concatenation
    pub fn without_concatenate(mut self) -> Self {
        self.capabilities.concatenate = false;
        self
    }

    /// Behave like a backend without visibility metadata
    pub fn without_visibility(mut self) -> Self {
        self.capabilities.visibility = false;
        self
    }

    /// Every file path currently stored, sorted
    pub fn files(&self) -> Vec<String> {
        self.state.read().files.keys().cloned().collect()
    }

    /// Raw content of a file
    pub fn read(&self, path: &str) -> Option<Bytes> {
        self.state.read().files.get(&normalize_path(path)).cloned()
    }

    pub fn visibility(&self, path: &str) -> Option<Visibility> {
        self.state.read().visibility.get(&normalize_path(path)).copied()
    }

    /// Seed a file directly
    pub fn insert<B: Into<Bytes>>(&self, path: &str, data: B) {
        let path = normalize_path(path);
        let mut state = self.state.write();
        state.register_parents(&path);
        state.files.insert(path, data.into());
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn exists(&self, path: &str) -> ChunkResult<bool> {
        let path = normalize_path(path);
        let state = self.state.read();
        Ok(path.is_empty() || state.files.contains_key(&path) || state.directories.contains(&path))
    }

    async fn make_directory(&self, path: &str) -> ChunkResult<()> {
        let path = normalize_path(path);
        if path.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write();
        if state.files.contains_key(&path) {
            return Err(ChunkError::invalid(format!("'{}' is a file", path)));
        }
        state.register_parents(&path);
        state.directories.insert(path);
        Ok(())
    }

    async fn list_files(&self, path: &str) -> ChunkResult<Vec<String>> {
        let path = normalize_path(path);
        let state = self.state.read();
        Ok(state
            .files
            .keys()
            .filter(|key| parent_path(key) == path)
            .cloned()
            .collect())
    }

    async fn list_directories(&self, path: &str) -> ChunkResult<Vec<String>> {
        let path = normalize_path(path);
        let state = self.state.read();
        Ok(state
            .directories
            .iter()
            .filter(|dir| parent_path(dir) == path)
            .cloned()
            .collect())
    }

    async fn size(&self, path: &str) -> ChunkResult<u64> {
        let path = normalize_path(path);
        self.state
            .read()
            .files
            .get(&path)
            .map(|data| data.len() as u64)
            .ok_or_else(|| ChunkError::not_found(path))
    }

    async fn read_stream(&self, path: &str) -> ChunkResult<ByteStream> {
        let path = normalize_path(path);
        let data = self
            .state
            .read()
            .files
            .get(&path)
            .cloned()
            .ok_or_else(|| ChunkError::not_found(path))?;
        Ok(bytes_stream(data))
    }

    async fn write_stream(
        &self,
        path: &str,
        stream: ByteStream,
        options: &StoreOptions,
    ) -> ChunkResult<u64> {
        let path = normalize_path(path);
        let data = collect_stream(stream).await?;
        let written = data.len() as u64;

        let mut state = self.state.write();
        state.register_parents(&path);
        if let Some(visibility) = options.visibility {
            state.visibility.insert(path.clone(), visibility);
        }
        state.files.insert(path, data);
        Ok(written)
    }

    async fn delete(&self, path: &str) -> ChunkResult<()> {
        let path = normalize_path(path);
        let mut state = self.state.write();
        state.visibility.remove(&path);
        state
            .files
            .remove(&path)
            .map(|_| ())
            .ok_or_else(|| ChunkError::not_found(path))
    }

    async fn delete_directory(&self, path: &str) -> ChunkResult<()> {
        let path = normalize_path(path);
        let mut state = self.state.write();
        if !state.directories.remove(&path) {
            return Err(ChunkError::not_found(path));
        }
        let prefix = format!("{}/", path);
        state.directories.retain(|dir| !dir.starts_with(&prefix));
        state.files.retain(|file, _| !file.starts_with(&prefix));
        state.visibility.retain(|file, _| !file.starts_with(&prefix));
        Ok(())
    }

    async fn concatenate(&self, destination: &str, sources: &[String]) -> ChunkResult<()> {
        if !self.capabilities.concatenate {
            return Err(ChunkError::unsupported("concatenate"));
        }
        let destination = normalize_path(destination);
        let mut state = self.state.write();

        let mut merged = BytesMut::new();
        for source in sources {
            let source = normalize_path(source);
            let data = state
                .files
                .get(&source)
                .ok_or_else(|| ChunkError::not_found(source.clone()))?;
            merged.extend_from_slice(data);
        }

        state.register_parents(&destination);
        state.files.insert(destination, merged.freeze());
        Ok(())
    }

    async fn set_visibility(&self, path: &str, visibility: Visibility) -> ChunkResult<()> {
        if !self.capabilities.visibility {
            return Err(ChunkError::unsupported("set_visibility"));
        }
        let path = normalize_path(path);
        let mut state = self.state.write();
        if !state.files.contains_key(&path) {
            return Err(ChunkError::not_found(path));
        }
        state.visibility.insert(path, visibility);
        Ok(())
    }

    fn capabilities(&self) -> StoreCapabilities {
        self.capabilities.clone()
    }
}
