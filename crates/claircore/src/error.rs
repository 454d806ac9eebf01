use crate::digest::Digest;

/// A specialized result for claircore operations
pub type Result<T> = std::result::Result<T, Error>;

/// The error type returned by every fallible claircore operation.
///
/// Each variant corresponds to one of the error kinds named in the indexer
/// design: validation, storage, realize, scanner, cancellation, timeout,
/// lock botch, and manifest-disappeared. Retryability is not a distinct
/// variant but a wrapper ([`Error::Retryable`]) applied by the state that
/// decides an otherwise-fatal cause should be retried, so the taxonomy of
/// underlying causes does not have to be duplicated for their retryable
/// forms.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Wraps another error to mark it retryable by the indexer state
    /// machine's retry loop. Unwrap with [`Error::into_retryable_cause`]
    /// when deciding whether to retry.
    #[error("{0}")]
    Retryable(Box<Error>),

    /// A manifest or digest string was malformed
    #[error("invalid manifest: {0}")]
    Validation(String),

    #[error("digest error: {0}")]
    Digest(#[from] claircore_encoding::Error),

    /// A store operation failed
    #[error("store error: {0}")]
    Store(String),

    /// A layer could not be fetched or decompressed
    #[error("failed to realize layer {digest}: {reason}")]
    Realize { digest: Digest, reason: String },

    /// A realized layer's content did not match its declared digest
    #[error("digest mismatch for layer {expected}: got {actual}")]
    DigestMismatch { expected: Digest, actual: Digest },

    /// A scanner's `scan` call returned an error
    #[error("scanner {scanner} failed on layer {layer}: {reason}")]
    Scanner {
        scanner: String,
        layer: Digest,
        reason: String,
    },

    /// The calling context was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// A deadline passed before the operation completed
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// An advisory lock invariant was violated: double-lock, or unlock of a
    /// key this process does not hold. Does not corrupt indexer state but
    /// indicates a caller defect.
    #[error("advisory lock protocol botch: {0}")]
    LockBotch(String),

    /// `SeenManifest` found the scanned flag set but no persisted report
    #[error("manifest {0} reported scanned but its report has disappeared")]
    ManifestDisappeared(Digest),

    /// A layer was referenced that is not part of the manifest being indexed
    #[error("layer {0} is not part of the manifest")]
    UnknownLayer(Digest),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("http error: {0}")]
    Http(String),
}

impl Error {
    /// Wrap this error so the indexer's state loop retries the current
    /// state instead of failing the `Index` call outright.
    pub fn retryable(self) -> Self {
        match self {
            already @ Error::Retryable(_) => already,
            other => Error::Retryable(Box::new(other)),
        }
    }

    /// True if this error (or the cause it wraps) was marked retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Retryable(_)) || matches!(self, Error::DeadlineExceeded)
    }

    /// True if this is (or wraps) a cancellation, which the state loop
    /// must propagate immediately rather than retry.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::Retryable(inner) => inner.is_cancelled(),
            _ => false,
        }
    }

    /// Unwrap one layer of [`Error::Retryable`], if present.
    pub fn into_retryable_cause(self) -> Error {
        match self {
            Error::Retryable(inner) => *inner,
            other => other,
        }
    }
}
