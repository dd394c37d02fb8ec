use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::{ByteStream, ChunkError, ChunkResult, StoreCapabilities, StoreOptions, Visibility};

/// Storage primitives every backend must provide.
///
/// Paths are `/`-separated and relative to the backend root. Directories are
/// created implicitly by writes; `make_directory` exists for backends where an
/// empty directory is observable.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Whether a file or directory exists at `path`
    async fn exists(&self, path: &str) -> ChunkResult<bool>;

    /// Create a directory (and its parents)
    async fn make_directory(&self, path: &str) -> ChunkResult<()>;

    /// Files directly inside `path`, as full storage paths
    async fn list_files(&self, path: &str) -> ChunkResult<Vec<String>>;

    /// Directories directly inside `path`, as full storage paths
    async fn list_directories(&self, path: &str) -> ChunkResult<Vec<String>>;

    /// Size of a file in bytes
    async fn size(&self, path: &str) -> ChunkResult<u64>;

    /// Open a file as a byte stream
    async fn read_stream(&self, path: &str) -> ChunkResult<ByteStream>;

    /// Write a stream to `path`, replacing any previous content. Returns bytes written.
    async fn write_stream(
        &self,
        path: &str,
        stream: ByteStream,
        options: &StoreOptions,
    ) -> ChunkResult<u64>;

    /// Delete a single file
    async fn delete(&self, path: &str) -> ChunkResult<()>;

    /// Delete a directory and anything left inside it
    async fn delete_directory(&self, path: &str) -> ChunkResult<()>;

    /// Write `destination` as the in-order concatenation of `sources`
    async fn concatenate(&self, _destination: &str, _sources: &[String]) -> ChunkResult<()> {
        Err(ChunkError::unsupported("concatenate"))
    }

    /// Apply access visibility to an existing file
    async fn set_visibility(&self, _path: &str, _visibility: Visibility) -> ChunkResult<()> {
        Err(ChunkError::unsupported("set_visibility"))
    }

    /// Get store capabilities
    fn capabilities(&self) -> StoreCapabilities;
}

/// Named storage disks; `None` resolves to the default disk
#[derive(Clone)]
pub struct Disks {
    default: Arc<dyn BlobStore>,
    named: HashMap<String, Arc<dyn BlobStore>>,
}

impl Disks {
    /// Create a registry whose default disk is `store`
    pub fn new<S: BlobStore + 'static>(store: S) -> Self {
        Self::from_arc(Arc::new(store))
    }

    pub fn from_arc(store: Arc<dyn BlobStore>) -> Self {
        Self {
            default: store,
            named: HashMap::new(),
        }
    }

    /// Register an additional named disk
    pub fn with_disk<N: Into<String>, S: BlobStore + 'static>(self, name: N, store: S) -> Self {
        self.with_disk_arc(name, Arc::new(store))
    }

    pub fn with_disk_arc<N: Into<String>>(mut self, name: N, store: Arc<dyn BlobStore>) -> Self {
        self.named.insert(name.into(), store);
        self
    }

    /// Look up a disk by name
    pub fn resolve(&self, name: Option<&str>) -> ChunkResult<Arc<dyn BlobStore>> {
        match name {
            None => Ok(self.default.clone()),
            Some(name) => self.named.get(name).cloned().ok_or_else(|| {
                ChunkError::configuration(format!("disk '{}' is not registered", name))
            }),
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.named.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    #[test]
    fn unknown_disk_is_a_configuration_error() {
        let disks = Disks::new(MemoryStore::new()).with_disk("archive", MemoryStore::new());
        assert!(disks.resolve(None).is_ok());
        assert!(disks.resolve(Some("archive")).is_ok());
        assert!(matches!(
            disks.resolve(Some("missing")),
            Err(ChunkError::Configuration { .. })
        ));
        assert_eq!(disks.names(), vec!["archive".to_string()]);
    }
}
