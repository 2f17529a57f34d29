use std::error::Error as StdError;
use std::fmt;

use tracing_error::SpanTrace;

/// Semantic category of a storage failure, independent of the driver
/// which produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// The bucket or object does not exist.
    NotFound,

    /// The caller is not allowed to perform the operation.
    PermissionDenied,

    /// Transport or disk failure.
    Io,

    /// The request was malformed (bad url, bad bucket name, ...).
    InvalidRequest,

    /// Anything else.
    Other,
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageErrorKind::NotFound => f.write_str("not found"),
            StorageErrorKind::PermissionDenied => f.write_str("permission denied"),
            StorageErrorKind::Io => f.write_str("I/O error"),
            StorageErrorKind::InvalidRequest => f.write_str("invalid request"),
            StorageErrorKind::Other => f.write_str("other error"),
        }
    }
}

impl From<std::io::ErrorKind> for StorageErrorKind {
    fn from(kind: std::io::ErrorKind) -> Self {
        match kind {
            std::io::ErrorKind::NotFound => StorageErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => StorageErrorKind::PermissionDenied,
            _ => StorageErrorKind::Io,
        }
    }
}

/// Error returned by every storage driver.
///
/// Carries the semantic [`StorageErrorKind`], the driver (engine) name, the
/// bucket and object path when known, the underlying error and the tracing
/// span context at the point the error was created.
///
/// ```rust
/// use storage::{StorageError, StorageErrorKind};
///
/// let error = StorageError::new(
///     "memory",
///     StorageErrorKind::NotFound,
///     std::io::Error::new(std::io::ErrorKind::NotFound, "no such object"),
/// )
/// .with_bucket("artifacts")
/// .with_path("builds/42/deploy-manifest.json");
///
/// assert!(error.is_not_found());
/// ```
#[derive(Debug)]
pub struct StorageError {
    kind: StorageErrorKind,
    engine: &'static str,
    bucket: Option<String>,
    path: Option<String>,
    source: Box<dyn StdError + Send + Sync + 'static>,
    span_trace: Box<SpanTrace>,
}

impl StorageError {
    /// Create a new storage error.
    pub fn new<E>(engine: &'static str, kind: StorageErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Self {
            kind,
            engine,
            bucket: None,
            path: None,
            source: error.into(),
            span_trace: Box::new(SpanTrace::capture()),
        }
    }

    /// Returns a closure converting a downstream error, for use with `.map_err()`.
    pub fn with<E>(engine: &'static str, kind: StorageErrorKind) -> impl FnOnce(E) -> StorageError
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        move |error: E| StorageError::new(engine, kind, error)
    }

    /// Convert an I/O error, picking the kind from the I/O error kind.
    pub fn io(engine: &'static str, error: std::io::Error) -> Self {
        let kind = error.kind().into();
        StorageError::new(engine, kind, error)
    }

    /// Shorthand for a missing object.
    pub fn not_found(engine: &'static str, bucket: &str, path: &str) -> Self {
        StorageError::new(
            engine,
            StorageErrorKind::NotFound,
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("object not found: {bucket}/{path}"),
            ),
        )
        .with_bucket(bucket)
        .with_path(path)
    }

    /// Attach the bucket name.
    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    /// Attach the object path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// The semantic error kind.
    pub fn kind(&self) -> StorageErrorKind {
        self.kind
    }

    /// True when the bucket or object does not exist.
    pub fn is_not_found(&self) -> bool {
        self.kind == StorageErrorKind::NotFound
    }

    /// The driver which produced this error.
    pub fn engine(&self) -> &'static str {
        self.engine
    }

    /// The bucket, if known.
    pub fn bucket(&self) -> Option<&str> {
        self.bucket.as_deref()
    }

    /// The object path, if known.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Span context captured when this error was created.
    pub fn span_trace(&self) -> &SpanTrace {
        &self.span_trace
    }
}

impl StdError for StorageError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.source.as_ref())
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "storage error [{}] from {}", self.kind, self.engine)?;

        if let Some(bucket) = &self.bucket {
            write!(f, " (bucket: {bucket})")?;
        }

        if let Some(path) = &self.path {
            write!(f, " (path: {path})")?;
        }

        write!(f, ": {}", self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_kind_is_mapped() {
        let error = StorageError::io(
            "local",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope"),
        );
        assert_eq!(error.kind(), StorageErrorKind::PermissionDenied);
        assert!(!error.is_not_found());
    }

    #[test]
    fn display_includes_context() {
        let error = StorageError::not_found("memory", "bucket", "a/b.json");
        let message = error.to_string();
        assert!(message.contains("[not found]"), "{message}");
        assert!(message.contains("(bucket: bucket)"), "{message}");
        assert!(message.contains("(path: a/b.json)"), "{message}");
    }
}
