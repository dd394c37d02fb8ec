use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::concat::ConcatStrategy;
use super::media::{MediaKind, MediaStrategy};
use super::strategy::{MergeStrategy, StrategyBinding};
use crate::{ChunkError, ChunkResult, StrategyConfig};

/// Which merge algorithm to run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Raw byte concatenation
    Concat,
    Audio,
    Video,
    /// A strategy registered under its own name
    Custom(String),
}

impl StrategyKind {
    /// Resolve a configured strategy name; `flysystem` is accepted for `concat`
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "concat" | "flysystem" => Self::Concat,
            "audio" => Self::Audio,
            "video" => Self::Video,
            _ => Self::Custom(name.trim().to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Concat => "concat",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Builds a fresh strategy instance for one merge
pub type StrategyFactory = Arc<dyn Fn(StrategyBinding) -> Box<dyn MergeStrategy> + Send + Sync>;

/// MIME pattern to strategy mapping, validated when it is configured.
///
/// Selection is exact MIME type first, then the `type/*` wildcard, then the
/// default strategy.
#[derive(Clone)]
pub struct StrategyRegistry {
    factories: HashMap<String, StrategyFactory>,
    mime_types: HashMap<String, StrategyKind>,
    default: StrategyKind,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyRegistry {
    /// Registry with the built-in strategies and no MIME bindings
    pub fn new() -> Self {
        let mut factories: HashMap<String, StrategyFactory> = HashMap::new();
        factories.insert(
            StrategyKind::Concat.name().to_string(),
            Arc::new(|binding| Box::new(ConcatStrategy::new(binding)) as Box<dyn MergeStrategy>),
        );
        factories.insert(
            StrategyKind::Audio.name().to_string(),
            Arc::new(|binding| {
                Box::new(MediaStrategy::new(MediaKind::Audio, binding)) as Box<dyn MergeStrategy>
            }),
        );
        factories.insert(
            StrategyKind::Video.name().to_string(),
            Arc::new(|binding| {
                Box::new(MediaStrategy::new(MediaKind::Video, binding)) as Box<dyn MergeStrategy>
            }),
        );

        Self {
            factories,
            mime_types: HashMap::new(),
            default: StrategyKind::Concat,
        }
    }

    /// Built-in strategies configured from settings
    pub fn from_settings(config: &StrategyConfig) -> ChunkResult<Self> {
        Self::new().configure(config)
    }

    /// Register a strategy under its own name
    pub fn with_factory<N, F>(mut self, name: N, factory: F) -> Self
    where
        N: Into<String>,
        F: Fn(StrategyBinding) -> Box<dyn MergeStrategy> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    /// Replace MIME bindings and default from `config`, failing on unknown
    /// strategies or malformed patterns
    pub fn configure(mut self, config: &StrategyConfig) -> ChunkResult<Self> {
        let default = self.resolve_name(&config.default)?;

        let mut mime_types = HashMap::with_capacity(config.mime_types.len());
        for (pattern, name) in &config.mime_types {
            let pattern = normalize_mime(pattern);
            validate_pattern(&pattern)?;
            let kind = self.resolve_name(name)?;
            debug!(pattern = %pattern, strategy = %kind, "bound merge strategy");
            mime_types.insert(pattern, kind);
        }

        self.default = default;
        self.mime_types = mime_types;
        Ok(self)
    }

    fn resolve_name(&self, name: &str) -> ChunkResult<StrategyKind> {
        if name.trim().is_empty() {
            return Err(ChunkError::configuration("merge strategy name is empty"));
        }
        let kind = StrategyKind::from_name(name);
        if !self.factories.contains_key(kind.name()) {
            return Err(ChunkError::configuration(format!(
                "merge strategy '{}' is not registered",
                name
            )));
        }
        Ok(kind)
    }

    pub fn default_kind(&self) -> &StrategyKind {
        &self.default
    }

    /// Pick the strategy for a MIME type
    pub fn select(&self, mime_type: &str) -> &StrategyKind {
        let mime = normalize_mime(mime_type);
        if let Some(kind) = self.mime_types.get(&mime) {
            return kind;
        }
        if let Some((family, _)) = mime.split_once('/') {
            if let Some(kind) = self.mime_types.get(&format!("{}/*", family)) {
                return kind;
            }
        }
        &self.default
    }

    /// Instantiate `kind` for one merge
    pub fn build(
        &self,
        kind: &StrategyKind,
        binding: StrategyBinding,
    ) -> ChunkResult<Box<dyn MergeStrategy>> {
        let factory = self.factories.get(kind.name()).ok_or_else(|| {
            ChunkError::strategy(format!("merge strategy '{}' is not registered", kind))
        })?;
        Ok(factory(binding))
    }
}

/// Lowercase, without parameters (`video/MP4; codecs=avc1` → `video/mp4`)
fn normalize_mime(mime: &str) -> String {
    mime.split(';').next().unwrap_or_default().trim().to_ascii_lowercase()
}

fn validate_pattern(pattern: &str) -> ChunkResult<()> {
    let valid = match pattern.split_once('/') {
        Some((family, subtype)) => {
            !family.is_empty()
                && family != "*"
                && !subtype.is_empty()
                && !subtype.contains('/')
                && (subtype == "*" || !subtype.contains('*'))
                && !pattern.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ChunkError::configuration(format!(
            "'{}' is not a MIME type or type/* pattern",
            pattern
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn config(default: &str, bindings: &[(&str, &str)]) -> StrategyConfig {
        StrategyConfig {
            default: default.to_string(),
            mime_types: bindings
                .iter()
                .map(|(p, n)| (p.to_string(), n.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn exact_beats_wildcard_beats_default() {
        let registry = StrategyRegistry::from_settings(&config(
            "concat",
            &[("video/*", "video"), ("video/x-raw", "concat")],
        ))
        .unwrap();

        assert_eq!(registry.select("video/mp4"), &StrategyKind::Video);
        assert_eq!(registry.select("Video/MP4; codecs=avc1"), &StrategyKind::Video);
        assert_eq!(registry.select("video/x-raw"), &StrategyKind::Concat);
        assert_eq!(registry.select("text/plain"), &StrategyKind::Concat);
    }

    #[test]
    fn flysystem_is_an_alias_for_concat() {
        let registry =
            StrategyRegistry::from_settings(&config("flysystem", &[("video/*", "video")])).unwrap();
        assert_eq!(registry.default_kind(), &StrategyKind::Concat);
    }

    #[test]
    fn unknown_strategy_fails_eagerly() {
        let err = StrategyRegistry::from_settings(&config("concat", &[("image/*", "thumbnail")]))
            .err()
            .unwrap();
        assert!(matches!(err, ChunkError::Configuration { .. }));

        assert!(StrategyRegistry::new()
            .with_factory("thumbnail", |binding| {
                Box::new(ConcatStrategy::new(binding)) as Box<dyn MergeStrategy>
            })
            .configure(&config("concat", &[("image/*", "thumbnail")]))
            .is_ok());
    }

    #[test]
    fn malformed_patterns_are_rejected() {
        for pattern in ["video", "*/*", "video/mp*", "/mp4", "video/"] {
            let result = StrategyRegistry::from_settings(&config("concat", &[(pattern, "video")]));
            assert!(result.is_err(), "{} should be rejected", pattern);
        }
    }
}
