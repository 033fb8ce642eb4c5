//! Embedding error types.

/// Errors from an [`Embedder`](super::Embedder).
///
/// `Clone` so a single failed batch request can be reported against every
/// text it carried.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbedError {
    #[error("embedding request failed (HTTP {status}): {body}")]
    HttpError { status: u16, body: String },

    #[error("embedding request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("empty embedding response for {count} inputs")]
    EmptyResponse { count: usize },

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("cannot embed empty text")]
    EmptyInput,
}
