use async_trait::async_trait;
use futures_util::StreamExt;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::types::normalize_path;
use crate::{
    BlobStore, ByteStream, ChunkError, ChunkResult, StoreCapabilities, StoreOptions, Visibility,
};

const PARTIAL_SUFFIX: &str = ".part";

/// Blob store on the local filesystem, rooted at a directory
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reject storage keys that could escape the root
    fn validate_key(key: &str) -> ChunkResult<()> {
        if key.contains('\\') {
            return Err(ChunkError::invalid(format!(
                "unsafe storage key: contains backslash '{}'",
                key
            )));
        }
        for component in Path::new(key).components() {
            match component {
                Component::ParentDir => {
                    return Err(ChunkError::invalid(format!(
                        "unsafe storage key: parent traversal '{}'",
                        key
                    )))
                }
                Component::Prefix(_) => {
                    return Err(ChunkError::invalid(format!(
                        "unsafe storage key: drive prefix '{}'",
                        key
                    )))
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Resolve a `/`-separated key to a path under the root
    fn resolve(&self, key: &str) -> ChunkResult<PathBuf> {
        let key = normalize_path(key);
        Self::validate_key(&key)?;
        Ok(if key.is_empty() {
            self.root.clone()
        } else {
            self.root.join(key)
        })
    }

    fn map_io(key: &str, err: std::io::Error) -> ChunkError {
        if err.kind() == std::io::ErrorKind::NotFound {
            ChunkError::not_found(normalize_path(key))
        } else {
            err.into()
        }
    }

    /// Sibling temp path a write lands in before being renamed into place
    fn partial_path(path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        path.with_file_name(format!(".{}.{}{}", name, Uuid::new_v4().simple(), PARTIAL_SUFFIX))
    }

    fn is_partial(name: &str) -> bool {
        name.starts_with('.') && name.ends_with(PARTIAL_SUFFIX)
    }

    async fn ensure_parent(path: &Path) -> ChunkResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    async fn list_entries(&self, key: &str, want_dirs: bool) -> ChunkResult<Vec<String>> {
        let dir = self.resolve(key)?;
        let base = normalize_path(key);
        let mut entries = fs::read_dir(&dir).await.map_err(|e| Self::map_io(key, e))?;
        let mut found = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if Self::is_partial(&name) {
                continue;
            }
            if (want_dirs && file_type.is_dir()) || (!want_dirs && file_type.is_file()) {
                found.push(crate::types::join_path(&base, &name));
            }
        }

        found.sort();
        Ok(found)
    }

    #[cfg(unix)]
    async fn apply_visibility(path: &Path, visibility: Visibility) -> ChunkResult<()> {
        use std::os::unix::fs::PermissionsExt;
        let mode = match visibility {
            Visibility::Public => 0o644,
            Visibility::Private => 0o600,
        };
        fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
        Ok(())
    }

    #[cfg(not(unix))]
    async fn apply_visibility(_path: &Path, _visibility: Visibility) -> ChunkResult<()> {
        Err(ChunkError::unsupported("set_visibility"))
    }
}

#[async_trait]
impl BlobStore for LocalStore {
    async fn exists(&self, path: &str) -> ChunkResult<bool> {
        let resolved = self.resolve(path)?;
        match fs::metadata(&resolved).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn make_directory(&self, path: &str) -> ChunkResult<()> {
        let resolved = self.resolve(path)?;
        fs::create_dir_all(&resolved).await?;
        Ok(())
    }

    async fn list_files(&self, path: &str) -> ChunkResult<Vec<String>> {
        self.list_entries(path, false).await
    }

    async fn list_directories(&self, path: &str) -> ChunkResult<Vec<String>> {
        self.list_entries(path, true).await
    }

    async fn size(&self, path: &str) -> ChunkResult<u64> {
        let resolved = self.resolve(path)?;
        let metadata = fs::metadata(&resolved)
            .await
            .map_err(|e| Self::map_io(path, e))?;
        Ok(metadata.len())
    }

    async fn read_stream(&self, path: &str) -> ChunkResult<ByteStream> {
        let resolved = self.resolve(path)?;
        let file = fs::File::open(&resolved)
            .await
            .map_err(|e| Self::map_io(path, e))?;
        Ok(Box::pin(ReaderStream::new(file)))
    }

    async fn write_stream(
        &self,
        path: &str,
        mut stream: ByteStream,
        options: &StoreOptions,
    ) -> ChunkResult<u64> {
        let resolved = self.resolve(path)?;
        Self::ensure_parent(&resolved).await?;

        // Readers never see a partially written file
        let partial = Self::partial_path(&resolved);
        let mut file = fs::File::create(&partial).await?;
        let mut written = 0u64;

        let copied: ChunkResult<()> = async {
            while let Some(frame) = stream.next().await {
                let frame = frame?;
                file.write_all(&frame).await?;
                written += frame.len() as u64;
            }
            file.flush().await?;
            Ok(())
        }
        .await;

        if let Err(e) = copied {
            drop(file);
            let _ = fs::remove_file(&partial).await;
            return Err(e);
        }
        drop(file);

        fs::rename(&partial, &resolved).await?;
        if let Some(visibility) = options.visibility {
            Self::apply_visibility(&resolved, visibility).await?;
        }
        Ok(written)
    }

    async fn delete(&self, path: &str) -> ChunkResult<()> {
        let resolved = self.resolve(path)?;
        fs::remove_file(&resolved)
            .await
            .map_err(|e| Self::map_io(path, e))
    }

    async fn delete_directory(&self, path: &str) -> ChunkResult<()> {
        let resolved = self.resolve(path)?;
        if resolved == self.root {
            return Err(ChunkError::invalid("refusing to delete the store root"));
        }
        fs::remove_dir_all(&resolved)
            .await
            .map_err(|e| Self::map_io(path, e))
    }

    async fn concatenate(&self, destination: &str, sources: &[String]) -> ChunkResult<()> {
        let resolved = self.resolve(destination)?;
        Self::ensure_parent(&resolved).await?;

        let partial = Self::partial_path(&resolved);
        let mut target = fs::File::create(&partial).await?;

        let appended: ChunkResult<()> = async {
            for source in sources {
                let source_path = self.resolve(source)?;
                let mut reader = fs::File::open(&source_path)
                    .await
                    .map_err(|e| Self::map_io(source, e))?;
                tokio::io::copy(&mut reader, &mut target).await?;
            }
            target.flush().await?;
            Ok(())
        }
        .await;

        drop(target);
        if let Err(e) = appended {
            let _ = fs::remove_file(&partial).await;
            return Err(e);
        }

        fs::rename(&partial, &resolved).await?;
        Ok(())
    }

    async fn set_visibility(&self, path: &str, visibility: Visibility) -> ChunkResult<()> {
        let resolved = self.resolve(path)?;
        if !fs::try_exists(&resolved).await? {
            return Err(ChunkError::not_found(normalize_path(path)));
        }
        Self::apply_visibility(&resolved, visibility).await
    }

    fn capabilities(&self) -> StoreCapabilities {
        let capabilities = StoreCapabilities::basic().with_concatenate();
        if cfg!(unix) {
            capabilities.with_visibility()
        } else {
            capabilities
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_keys_are_rejected() {
        let store = LocalStore::new("/tmp/dog-chunks");
        assert!(store.resolve("chunks/../../etc/passwd").is_err());
        assert!(store.resolve("chunks\\video").is_err());
        assert_eq!(
            store.resolve("/chunks/video/").unwrap(),
            PathBuf::from("/tmp/dog-chunks/chunks/video")
        );
    }

    #[test]
    fn partial_files_are_hidden() {
        let partial = LocalStore::partial_path(Path::new("/tmp/x/0_video.mp4"));
        let name = partial.file_name().unwrap().to_string_lossy().into_owned();
        assert!(LocalStore::is_partial(&name));
        assert!(!LocalStore::is_partial("0_video.mp4"));
    }
}
