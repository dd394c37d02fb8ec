use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::pin::Pin;

/// Stream of bytes for chunk and artifact content
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Wrap an in-memory buffer as a one-shot byte stream
pub fn bytes_stream<B: Into<Bytes>>(data: B) -> ByteStream {
    let data = data.into();
    Box::pin(futures_util::stream::once(async move { Ok(data) }))
}

/// Drain a byte stream into a single buffer
pub async fn collect_stream(mut stream: ByteStream) -> std::io::Result<Bytes> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

/// Access visibility applied to a stored file, when the backend supports it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

impl std::str::FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            other => Err(format!("unknown visibility '{}'", other)),
        }
    }
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::Private => write!(f, "private"),
        }
    }
}

/// Extra options passed along with every write to a store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    pub visibility: Option<Visibility>,
    pub content_type: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = Some(visibility);
        self
    }

    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_metadata<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Optional primitives a store may offer
#[derive(Debug, Clone, Default)]
pub struct StoreCapabilities {
    /// Native concatenation of several files into one destination
    pub concatenate: bool,
    /// Per-file access visibility
    pub visibility: bool,
}

impl StoreCapabilities {
    pub fn basic() -> Self {
        Self::default()
    }

    pub fn with_concatenate(mut self) -> Self {
        self.concatenate = true;
        self
    }

    pub fn with_visibility(mut self) -> Self {
        self.visibility = true;
        self
    }
}

/// Normalise a `/`-separated storage path: no leading, trailing or doubled separators
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Join two storage path fragments, ignoring empty ones
pub fn join_path(base: &str, child: &str) -> String {
    normalize_path(&format!("{}/{}", base, child))
}

/// Last segment of a storage path
pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Everything before the last segment of a storage path
pub fn parent_path(path: &str) -> String {
    let normalized = normalize_path(path);
    match normalized.rfind('/') {
        Some(pos) => normalized[..pos].to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_normalized() {
        assert_eq!(normalize_path("/chunks//video/"), "chunks/video");
        assert_eq!(join_path("", "video"), "video");
        assert_eq!(join_path("chunks", "video/0_video.mp4"), "chunks/video/0_video.mp4");
    }

    #[test]
    fn file_name_and_parent() {
        assert_eq!(file_name("chunks/video/3_video.mp4"), "3_video.mp4");
        assert_eq!(file_name("plain"), "plain");
        assert_eq!(parent_path("chunks/video/3_video.mp4"), "chunks/video");
        assert_eq!(parent_path("plain"), "");
    }

    #[test]
    fn visibility_parses_case_insensitively() {
        assert_eq!("Public".parse::<Visibility>(), Ok(Visibility::Public));
        assert!("world-readable".parse::<Visibility>().is_err());
    }

    #[test]
    fn collect_stream_concatenates_frames() {
        let stream: ByteStream = Box::pin(futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"ab")),
            Ok(Bytes::from_static(b"cd")),
        ]));
        let collected = tokio_test::block_on(collect_stream(stream)).unwrap();
        assert_eq!(&collected[..], b"abcd");
    }
}
