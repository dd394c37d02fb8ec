use thiserror::Error;

/// Result type for chunk operations
pub type ChunkResult<T> = Result<T, ChunkError>;

/// Errors that can occur while accepting, storing or merging chunks
#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Chunk integrity violated: {message}")]
    Integrity { message: String },

    #[error("Invalid request: {message}")]
    Invalid { message: String },

    #[error("Merge strategy misconfigured: {message}")]
    Strategy { message: String },

    #[error("Merge failed: {message}")]
    Merge {
        message: String,
        #[source]
        source: Option<Box<ChunkError>>,
    },

    #[error("Path not found: {path}")]
    NotFound { path: String },

    #[error("Operation not supported by this store: {operation}")]
    Unsupported { operation: &'static str },

    #[error("Storage backend error: {source}")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

/// Coarse classification used by logging and the merge queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Integrity,
    Invalid,
    Strategy,
    Merge,
    Storage,
}

impl ChunkError {
    /// Create a backend error from any error type
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            source: Box::new(error),
        }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn integrity<S: Into<String>>(message: S) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }

    /// Create an invalid request error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    pub fn strategy<S: Into<String>>(message: S) -> Self {
        Self::Strategy {
            message: message.into(),
        }
    }

    /// Wrap the failure of a concatenation step
    pub fn merge<S: Into<String>>(message: S, source: ChunkError) -> Self {
        Self::Merge {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(path: S) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn unsupported(operation: &'static str) -> Self {
        Self::Unsupported { operation }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Integrity { .. } => ErrorKind::Integrity,
            Self::Invalid { .. } => ErrorKind::Invalid,
            Self::Strategy { .. } | Self::Unsupported { .. } => ErrorKind::Strategy,
            Self::Merge { .. } => ErrorKind::Merge,
            Self::NotFound { .. }
            | Self::Backend { .. }
            | Self::Io { .. }
            | Self::Serialization { .. } => ErrorKind::Storage,
        }
    }

    /// Transient storage failures may be retried; ordering, integrity and
    /// wiring failures never are.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Backend { .. } | Self::Io { .. } => true,
            Self::Merge { source, .. } => source.as_ref().map_or(true, |s| s.is_retryable()),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_errors_are_permanent() {
        let err = ChunkError::integrity("index 3 arrived before 2");
        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert!(!err.is_retryable());
    }

    #[test]
    fn storage_errors_are_retryable() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk unplugged");
        let err: ChunkError = io.into();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(err.is_retryable());
    }

    #[test]
    fn merge_error_inherits_retry_policy_from_source() {
        let transient = ChunkError::merge(
            "copy failed",
            std::io::Error::new(std::io::ErrorKind::Other, "timeout").into(),
        );
        assert!(transient.is_retryable());

        let fatal = ChunkError::merge("copy failed", ChunkError::not_found("chunks/a/0_a.bin"));
        assert!(!fatal.is_retryable());
    }
}
