//! Domain Errors
//!
//! Error taxonomy for the resolution pipeline. Source-level faults are
//! absorbed at the pipeline boundary; only cache storage faults surface
//! to callers, since a broken cache invalidates cache-first resolution.

use thiserror::Error;

/// The persistence medium (sqlite) failed.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// A fault from one of the external source adapters.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The upstream told us to back off; the quota meter is force-exhausted.
    #[error("upstream rate limited")]
    RateLimited,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Terminal outcome of a resolution that produced no record.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Free quota spent (or ineligible) and no usable API key configured.
    #[error("free quota exhausted and no API key configured")]
    QuotaExhausted,
    /// The paid lookup did not know the identifier, or failed.
    #[error("location not found through the paid lookup")]
    NotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::Unavailable("disk full".to_string());
        assert_eq!(err.to_string(), "storage unavailable: disk full");
    }

    #[test]
    fn test_resolution_error_from_storage() {
        let err: ResolutionError = StorageError::Unavailable("x".to_string()).into();
        assert!(matches!(err, ResolutionError::Storage(_)));
    }

    #[test]
    fn test_source_error_from_anyhow() {
        let err: SourceError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, SourceError::Other(_)));
    }
}
