use thiserror::Error;

/// Canonical weir error taxonomy used across crates.
///
/// Classification guidance:
/// - [`WeirError::InvalidConfig`]: contract violations detected at graph-build or
///   repository-call time, non-retryable
/// - [`WeirError::Planning`]: transform-graph lowering failures
/// - [`WeirError::Resource`]: job resource upload failures, retryable after the
///   caller fixes the resource
/// - [`WeirError::Storage`]: transient shared-map failures, retryable by the caller
/// - [`WeirError::Io`]: raw filesystem IO failures from std APIs
#[derive(Debug, Error)]
pub enum WeirError {
    /// Invalid or inconsistent configuration state.
    ///
    /// Examples:
    /// - duplicate job record insertion for the same job id
    /// - co-aggregation builder with zero registered streams
    /// - reading an `ItemsByTag` slot with a tag from a different builder
    /// - a deduct function declared without a combine function
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Transform-graph lowering failures.
    ///
    /// Examples:
    /// - upstream transform id not present in the pipeline
    /// - transform arity not matching its declared key functions
    /// - duplicate inbound edge ordinal on a vertex
    #[error("planning error: {0}")]
    Planning(String),

    /// Job resource upload failures.
    ///
    /// Partially uploaded state is rolled back before this error surfaces, so a
    /// failed upload never leaves an orphaned resources map behind.
    #[error("resource error: {0}")]
    Resource(String),

    /// Transient shared-map failures.
    ///
    /// The repository propagates these without retrying; the caller decides
    /// whether and when to retry.
    #[error("storage error: {0}")]
    Storage(String),

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Standard weir result alias.
pub type Result<T> = std::result::Result<T, WeirError>;
