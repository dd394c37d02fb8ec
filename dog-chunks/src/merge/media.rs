use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, instrument, warn};

use super::registry::StrategyKind;
use super::strategy::{
    apply_visibility, discard_partial, remove_session, MergeStrategy, StrategyBinding,
};
use crate::chunk::split_name;
use crate::{ChunkError, ChunkResult, Visibility};

/// Media family a strategy handles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

/// Output container/codec for a concatenation without re-encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFormat {
    X264,
    WebM,
    Ogg,
    Wmv,
    Mp3,
    Wav,
    Flac,
    Aac,
    Vorbis,
    /// Stream copy, container taken from the input
    Copy,
}

impl MediaFormat {
    /// Format for a destination extension; unknown extensions copy streams as-is
    pub fn for_extension(kind: MediaKind, extension: &str) -> Self {
        let extension = extension.to_ascii_lowercase();
        match (kind, extension.as_str()) {
            (MediaKind::Video, "mp4") => Self::X264,
            (MediaKind::Video, "webm") => Self::WebM,
            (MediaKind::Video, "ogg" | "ogv") => Self::Ogg,
            (MediaKind::Video, "wmv") => Self::Wmv,
            (MediaKind::Audio, "mp3") => Self::Mp3,
            (MediaKind::Audio, "wav") => Self::Wav,
            (MediaKind::Audio, "flac") => Self::Flac,
            (MediaKind::Audio, "aac" | "m4a") => Self::Aac,
            (MediaKind::Audio, "ogg" | "oga") => Self::Vorbis,
            _ => Self::Copy,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::X264 => "x264",
            Self::WebM => "webm",
            Self::Ogg => "ogg",
            Self::Wmv => "wmv",
            Self::Mp3 => "mp3",
            Self::Wav => "wav",
            Self::Flac => "flac",
            Self::Aac => "aac",
            Self::Vorbis => "vorbis",
            Self::Copy => "copy",
        }
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Arguments of one concatenation handed to a [`MediaTransform`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcatJob {
    pub source_disk: Option<String>,
    /// Chunk paths in index order
    pub sources: Vec<String>,
    pub output_disk: Option<String>,
    pub output_path: String,
    pub format: MediaFormat,
    pub visibility: Option<Visibility>,
}

/// External media processor able to join encoded fragments without
/// re-encoding them
#[async_trait]
pub trait MediaTransform: Send + Sync {
    async fn concat(&self, job: ConcatJob) -> ChunkResult<()>;
}

/// Audio or video merge through a [`MediaTransform`]
pub struct MediaStrategy {
    kind: MediaKind,
    binding: StrategyBinding,
}

impl MediaStrategy {
    pub fn new(kind: MediaKind, binding: StrategyBinding) -> Self {
        Self { kind, binding }
    }

    pub fn media_kind(&self) -> MediaKind {
        self.kind
    }

    /// Build the transform arguments for the bound session
    pub async fn concat_job(&self) -> ChunkResult<ConcatJob> {
        let context = self.binding.context()?;
        let folder = self.binding.folder()?;
        let output_path = self.binding.destination_path()?;

        let sources = context.chunks.chunk_paths(folder).await?;
        if sources.is_empty() {
            return Err(ChunkError::integrity(format!("session '{}' holds no chunks", folder)));
        }

        let format = split_name(&output_path)
            .1
            .map(|ext| MediaFormat::for_extension(self.kind, &ext))
            .unwrap_or(MediaFormat::Copy);

        Ok(ConcatJob {
            source_disk: context.chunks.disk().map(str::to_string),
            sources,
            output_disk: context.merge.disk.clone(),
            output_path,
            format,
            visibility: context.merge.options.visibility,
        })
    }
}

#[async_trait]
impl MergeStrategy for MediaStrategy {
    fn kind(&self) -> StrategyKind {
        match self.kind {
            MediaKind::Audio => StrategyKind::Audio,
            MediaKind::Video => StrategyKind::Video,
        }
    }

    fn binding(&self) -> &StrategyBinding {
        &self.binding
    }

    #[instrument(skip(self), fields(strategy = "media"))]
    async fn merge(&self) -> ChunkResult<String> {
        let context = self.binding.context()?;
        let folder = self.binding.folder()?;
        let transform = context
            .transform
            .clone()
            .ok_or_else(|| ChunkError::strategy("no media transform configured"))?;

        let job = self.concat_job().await?;
        let destination = job.output_path.clone();
        let existed = context.merge_store.exists(&destination).await?;
        debug!(
            folder = %folder,
            kind = ?self.kind,
            format = %job.format,
            chunks = job.sources.len(),
            "joining media chunks"
        );

        if let Err(e) = transform.concat(job).await {
            warn!(
                folder = %folder,
                destination = %destination,
                error = %e,
                "media concat failed, chunks kept"
            );
            if !existed {
                discard_partial(context, &destination).await;
            }
            return Err(ChunkError::merge(
                format!("could not join media session '{}' into '{}'", folder, destination),
                e,
            ));
        }

        apply_visibility(context, &destination).await?;
        remove_session(&self.binding).await?;
        Ok(destination)
    }
}
