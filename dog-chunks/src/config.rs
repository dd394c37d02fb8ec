//! Settings for chunked uploads.
//!
//! [`ChunkSettings`] is an immutable snapshot handed to every component when
//! it is constructed. It can be built in code, deserialized from JSON, or read
//! from flat `section.key` pairs (environment variables use the DogRS
//! convention, `PREFIX__CHUNKS__DISK` becomes `chunks.disk`):
//!
//! ```rust
//! use dog_chunks::{ChunkSettings, INDEX_ONE};
//!
//! let settings = ChunkSettings::from_pairs([
//!     ("chunks.folder", "uploads/chunks"),
//!     ("index", "1"),
//!     ("strategies.mime", "video/*=video,audio/mpeg=audio"),
//! ])
//! .unwrap();
//!
//! assert_eq!(settings.index, INDEX_ONE);
//! assert_eq!(settings.chunks.folder, "uploads/chunks");
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::types::normalize_path;
use crate::{ChunkError, ChunkResult, StoreOptions, Visibility};

/// First chunk is numbered 0
pub const INDEX_ZERO: i64 = 0;
/// First chunk is numbered 1
pub const INDEX_ONE: i64 = 1;

/// Connection name meaning "run the merge inline"
pub const SYNC_CONNECTION: &str = "sync";

/// Where a family of files lives: a named disk and a folder on it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskTarget {
    /// Disk name; `None` selects the default disk
    pub disk: Option<String>,
    pub folder: String,
    /// Extra options applied to every write on this target
    pub options: StoreOptions,
}

impl DiskTarget {
    pub fn new<S: Into<String>>(folder: S) -> Self {
        Self {
            disk: None,
            folder: normalize_path(&folder.into()),
            options: StoreOptions::default(),
        }
    }

    pub fn on_disk<S: Into<String>>(mut self, disk: S) -> Self {
        self.disk = Some(disk.into());
        self
    }
}

/// Names of the request fields an upload request is read from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationKeys {
    pub index: String,
    pub file: String,
    pub chunk_size: String,
    pub total_size: String,
}

impl Default for ValidationKeys {
    fn default() -> Self {
        Self {
            index: "index".to_string(),
            file: "file".to_string(),
            chunk_size: "chunkSize".to_string(),
            total_size: "totalSize".to_string(),
        }
    }
}

impl ValidationKeys {
    /// Every key must be bound to a field name
    pub fn validate(&self) -> ChunkResult<()> {
        for (name, value) in [
            ("index", &self.index),
            ("file", &self.file),
            ("chunk_size", &self.chunk_size),
            ("total_size", &self.total_size),
        ] {
            if value.trim().is_empty() {
                return Err(ChunkError::configuration(format!(
                    "validation key '{}' is not bound to a request field",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// MIME pattern to merge strategy bindings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Strategy used when no MIME pattern matches
    pub default: String,
    /// Exact (`video/mp4`) or wildcard (`video/*`) patterns
    pub mime_types: BTreeMap<String, String>,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        let mut mime_types = BTreeMap::new();
        mime_types.insert("audio/*".to_string(), "audio".to_string());
        mime_types.insert("video/*".to_string(), "video".to_string());
        Self {
            default: "concat".to_string(),
            mime_types,
        }
    }
}

/// Configuration snapshot for a chunk manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkSettings {
    /// Where chunk session folders are created
    pub chunks: DiskTarget,

    /// Where merged artifacts are written
    pub merge: DiskTarget,

    /// Index the first chunk of every session must carry
    pub index: i64,

    /// Merge automatically once the last chunk lands
    pub auto_merge: bool,

    /// Merge connection: `None` or `"sync"` runs inline, anything else is queued
    pub connection: Option<String>,

    /// Queue name used for deferred merges
    pub queue: Option<String>,

    pub validation: ValidationKeys,

    pub strategies: StrategyConfig,
}

impl Default for ChunkSettings {
    fn default() -> Self {
        Self {
            chunks: DiskTarget::new("chunks"),
            merge: DiskTarget::new(""),
            index: INDEX_ZERO,
            auto_merge: true,
            connection: None,
            queue: None,
            validation: ValidationKeys::default(),
            strategies: StrategyConfig::default(),
        }
    }
}

impl ChunkSettings {
    /// Create settings with defaults
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunks_disk<S: Into<String>>(mut self, disk: S) -> Self {
        self.chunks.disk = Some(disk.into());
        self
    }

    pub fn with_chunks_folder<S: Into<String>>(mut self, folder: S) -> Self {
        self.chunks.folder = normalize_path(&folder.into());
        self
    }

    pub fn with_merge_disk<S: Into<String>>(mut self, disk: S) -> Self {
        self.merge.disk = Some(disk.into());
        self
    }

    pub fn with_merge_folder<S: Into<String>>(mut self, folder: S) -> Self {
        self.merge.folder = normalize_path(&folder.into());
        self
    }

    /// Set the starting index (see [`INDEX_ZERO`] and [`INDEX_ONE`])
    pub fn with_index(mut self, index: i64) -> Self {
        self.index = index;
        self
    }

    pub fn with_auto_merge(mut self, enabled: bool) -> Self {
        self.auto_merge = enabled;
        self
    }

    pub fn with_connection<S: Into<String>>(mut self, connection: S) -> Self {
        self.connection = Some(connection.into());
        self
    }

    pub fn with_queue<S: Into<String>>(mut self, queue: S) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn with_chunks_options(mut self, options: StoreOptions) -> Self {
        self.chunks.options = options;
        self
    }

    pub fn with_merge_options(mut self, options: StoreOptions) -> Self {
        self.merge.options = options;
        self
    }

    pub fn with_validation(mut self, keys: ValidationKeys) -> Self {
        self.validation = keys;
        self
    }

    /// Bind a MIME pattern to a strategy name
    pub fn with_strategy<P: Into<String>, N: Into<String>>(mut self, pattern: P, name: N) -> Self {
        self.strategies.mime_types.insert(pattern.into(), name.into());
        self
    }

    pub fn with_default_strategy<N: Into<String>>(mut self, name: N) -> Self {
        self.strategies.default = name.into();
        self
    }

    /// Whether merges run inline with the request that completed the upload
    pub fn is_sync(&self) -> bool {
        match self.connection.as_deref() {
            None => true,
            Some(connection) => connection.trim().is_empty() || connection == SYNC_CONNECTION,
        }
    }

    pub fn connection_name(&self) -> &str {
        self.connection.as_deref().unwrap_or(SYNC_CONNECTION)
    }

    pub fn queue_name(&self) -> &str {
        self.queue.as_deref().unwrap_or("default")
    }

    /// Parse settings from a JSON document
    pub fn from_json(json: &str) -> ChunkResult<Self> {
        let settings: Self = serde_json::from_str(json)
            .map_err(|e| ChunkError::configuration(format!("invalid settings document: {}", e)))?;
        settings.validation.validate()?;
        Ok(settings)
    }

    /// Read settings from environment variables starting with `<prefix>__`
    pub fn from_env(prefix: &str) -> ChunkResult<Self> {
        let marker = format!("{}__", prefix);
        let pairs = std::env::vars().filter_map(|(key, value)| {
            key.strip_prefix(&marker)
                .map(|stripped| (stripped.to_lowercase().replace("__", "."), value))
        });
        Self::from_pairs(pairs)
    }

    /// Read settings from flat `section.key` pairs on top of the defaults
    pub fn from_pairs<I, K, V>(pairs: I) -> ChunkResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut settings = Self::default();
        for (key, value) in pairs {
            settings.apply(key.as_ref(), value.as_ref())?;
        }
        settings.validation.validate()?;
        Ok(settings)
    }

    fn apply(&mut self, key: &str, value: &str) -> ChunkResult<()> {
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        match key.as_str() {
            "chunks.disk" => self.chunks.disk = non_empty(value),
            "chunks.folder" => self.chunks.folder = normalize_path(value),
            "chunks.visibility" => {
                self.chunks.options.visibility = Some(parse_visibility(&key, value)?)
            }
            "merge.disk" => self.merge.disk = non_empty(value),
            "merge.folder" => self.merge.folder = normalize_path(value),
            "merge.visibility" => {
                self.merge.options.visibility = Some(parse_visibility(&key, value)?)
            }
            "index" => {
                self.index = value.parse::<i64>().map_err(|_| {
                    ChunkError::configuration(format!("index must be an integer, got '{}'", value))
                })?
            }
            "auto_merge" => self.auto_merge = parse_bool(&key, value)?,
            "connection" => self.connection = non_empty(value),
            "queue" => self.queue = non_empty(value),
            "validation.index" => self.validation.index = value.to_string(),
            "validation.file" => self.validation.file = value.to_string(),
            "validation.chunk_size" => self.validation.chunk_size = value.to_string(),
            "validation.total_size" => self.validation.total_size = value.to_string(),
            "strategies.default" => self.strategies.default = value.to_string(),
            "strategies.mime" => {
                for binding in value.split(',').filter(|b| !b.trim().is_empty()) {
                    let (pattern, name) = binding.split_once('=').ok_or_else(|| {
                        ChunkError::configuration(format!(
                            "strategy binding '{}' must look like pattern=strategy",
                            binding.trim()
                        ))
                    })?;
                    self.strategies
                        .mime_types
                        .insert(pattern.trim().to_string(), name.trim().to_string());
                }
            }
            other => match other.strip_prefix("strategies.mime.") {
                Some(pattern) => {
                    self.strategies
                        .mime_types
                        .insert(pattern.to_string(), value.to_string());
                }
                None => debug!(key = other, "ignoring unknown chunk setting"),
            },
        }
        Ok(())
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_bool(key: &str, value: &str) -> ChunkResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ChunkError::configuration(format!(
            "{} must be a boolean, got '{}'",
            key, value
        ))),
    }
}

fn parse_visibility(key: &str, value: &str) -> ChunkResult<Visibility> {
    value
        .parse::<Visibility>()
        .map_err(|e| ChunkError::configuration(format!("{}: {}", key, e)))
}
