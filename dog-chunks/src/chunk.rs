use deunicode::deunicode;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::ordering::ChunkOrdering;
use crate::types::file_name;
use crate::ByteStream;

/// Lowercase ASCII slug. Non-ASCII text is transliterated first (`é` → `e`,
/// `ß` → `ss`), then letters and digits are kept, runs of separators
/// (`-`, `_`, whitespace) collapse to a single `-` and everything else is dropped.
pub fn slug(input: &str) -> String {
    fn push_word(out: &mut String, pending: &mut bool, word: &str) {
        if *pending && !out.is_empty() {
            out.push('-');
        }
        *pending = false;
        out.push_str(word);
    }

    let ascii = deunicode(input);
    let mut out = String::with_capacity(ascii.len());
    let mut pending_separator = false;

    for c in ascii.chars() {
        if c.is_ascii_alphanumeric() {
            let lower = c.to_ascii_lowercase().to_string();
            push_word(&mut out, &mut pending_separator, &lower);
        } else if c == '@' {
            pending_separator = true;
            push_word(&mut out, &mut pending_separator, "at");
            pending_separator = true;
        } else if c == '-' || c == '_' || c.is_whitespace() {
            pending_separator = true;
        }
    }
    out
}

/// Split a file name into its stem and extension (without the dot)
pub fn split_name(name: &str) -> (String, Option<String>) {
    let path = Path::new(file_name(name));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .filter(|e| !e.is_empty());
    (stem, extension)
}

/// An uploaded file as handed over by the transport layer
pub struct ChunkFile {
    pub original_name: String,
    pub mime_type: Option<String>,
    pub body: ByteStream,
}

impl ChunkFile {
    pub fn new<S: Into<String>>(original_name: S, body: ByteStream) -> Self {
        Self {
            original_name: original_name.into(),
            mime_type: None,
            body,
        }
    }

    pub fn with_mime_type<S: Into<String>>(mut self, mime_type: S) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// MIME type reported by the client, `application/octet-stream` if absent
    pub fn mime_type(&self) -> &str {
        self.mime_type.as_deref().unwrap_or("application/octet-stream")
    }
}

impl std::fmt::Debug for ChunkFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkFile")
            .field("original_name", &self.original_name)
            .field("mime_type", &self.mime_type)
            .finish_non_exhaustive()
    }
}

/// Where a chunk's name comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum ChunkSource {
    /// A freshly uploaded file, by its client-side name
    Upload(String),
    /// A file already persisted on a disk
    Stored(String),
}

/// One piece of an in-progress upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    index: i64,
    source: ChunkSource,
    stored_path: Option<String>,
    disk: Option<String>,
    last: bool,
}

impl Chunk {
    /// Describe an uploaded file that is about to be stored
    pub fn new<S: Into<String>>(index: i64, original_name: S, disk: Option<String>) -> Self {
        Self {
            index,
            source: ChunkSource::Upload(original_name.into()),
            stored_path: None,
            disk,
            last: false,
        }
    }

    /// Rebuild a chunk from a persisted path such as `chunks/video/3_video.mp4`
    pub fn from_stored<S: Into<String>>(path: S, disk: Option<String>) -> Option<Self> {
        let path = path.into();
        let index = ChunkOrdering::index_of(&path)?;
        Some(Self {
            index,
            source: ChunkSource::Stored(path.clone()),
            stored_path: Some(path),
            disk,
            last: false,
        })
    }

    pub fn index(&self) -> i64 {
        self.index
    }

    pub fn source(&self) -> &ChunkSource {
        &self.source
    }

    /// Final location, set once the chunk has been stored
    pub fn stored_path(&self) -> Option<&str> {
        self.stored_path.as_deref()
    }

    pub fn disk(&self) -> Option<&str> {
        self.disk.as_deref()
    }

    pub fn is_last(&self) -> bool {
        self.last
    }

    /// Client-side name without any index prefix
    pub fn original_name(&self) -> String {
        match &self.source {
            ChunkSource::Upload(name) => file_name(name).to_string(),
            ChunkSource::Stored(path) => {
                let name = file_name(path);
                name.split_once('_')
                    .map(|(_, rest)| rest.to_string())
                    .unwrap_or_else(|| name.to_string())
            }
        }
    }

    /// Name stem, slugified
    pub fn name(&self) -> String {
        slug(&split_name(&self.original_name()).0)
    }

    pub fn extension(&self) -> Option<String> {
        split_name(&self.original_name()).1
    }

    /// `<index>_<slug>.<ext>`, the on-disk name of this chunk
    pub fn filename(&self) -> String {
        match self.extension() {
            Some(ext) => format!("{}_{}.{}", self.index, self.name(), ext),
            None => format!("{}_{}", self.index, self.name()),
        }
    }

    pub(crate) fn mark_stored(&mut self, path: String) {
        debug_assert!(self.stored_path.is_none(), "chunk stored twice");
        self.stored_path = Some(path);
    }

    pub(crate) fn mark_last(&mut self) {
        self.last = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_collapses_separators_and_drops_punctuation() {
        assert_eq!(slug("My Holiday_Video  2024"), "my-holiday-video-2024");
        assert_eq!(slug("--leading and trailing--"), "leading-and-trailing");
        assert_eq!(slug("report(final).v2"), "reportfinalv2");
        assert_eq!(slug("me@home"), "me-at-home");
    }

    #[test]
    fn slug_transliterates_accented_letters() {
        assert_eq!(slug("Été vidéo"), "ete-video");
        assert_eq!(slug("Über Straße"), "uber-strasse");
        assert_eq!(slug("naïve café"), "naive-cafe");
        assert_eq!(slug("ÉTÉ"), "ete");
    }

    #[test]
    fn filename_prefixes_index() {
        let chunk = Chunk::new(3, "My Video.MP4", None);
        assert_eq!(chunk.filename(), "3_my-video.MP4");
        assert!(chunk.stored_path().is_none());
        assert!(!chunk.is_last());
    }

    #[test]
    fn filename_without_extension_has_no_trailing_dot() {
        let chunk = Chunk::new(0, "README", None);
        assert_eq!(chunk.filename(), "0_readme");
    }

    #[test]
    fn stored_chunks_recover_index_and_name() {
        let chunk =
            Chunk::from_stored("chunks/video/12_my-video.mp4", Some("local".into())).unwrap();
        assert_eq!(chunk.index(), 12);
        assert_eq!(chunk.original_name(), "my-video.mp4");
        assert_eq!(chunk.filename(), "12_my-video.mp4");
        assert_eq!(chunk.stored_path(), Some("chunks/video/12_my-video.mp4"));
        assert_eq!(chunk.disk(), Some("local"));

        assert!(Chunk::from_stored("chunks/video/notes.txt", None).is_none());
    }
}
