//! Error taxonomy shared by the cache store, history ledger and player.
//!
//! Errors carry rendered messages instead of source errors so they can be
//! cloned: a single in-flight download hands the same result to every caller
//! waiting on it.

/// Core operation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Network failure or timeout while fetching remote content
    FetchFailed(String),
    /// Filesystem read/write failure (permissions, disk full, ...)
    StorageFailed(String),
    /// Requested platform entity does not exist
    NotFound(String),
    /// Malformed caller input (empty keyword, bad index, ...)
    InvalidInput(String),
}

impl CoreError {
    /// Whether the failure leaves the track retryable (network or disk trouble)
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::FetchFailed(_) | CoreError::StorageFailed(_))
    }
}

impl std::fmt::Display for CoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoreError::FetchFailed(e) => write!(f, "Fetch failed: {}", e),
            CoreError::StorageFailed(e) => write!(f, "Storage failed: {}", e),
            CoreError::NotFound(e) => write!(f, "Not found: {}", e),
            CoreError::InvalidInput(e) => write!(f, "Invalid input: {}", e),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<std::io::Error> for CoreError {
    fn from(value: std::io::Error) -> Self {
        CoreError::StorageFailed(value.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(value: serde_json::Error) -> Self {
        CoreError::StorageFailed(format!("serialization error: {}", value))
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_maps_to_storage() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: CoreError = io.into();
        assert!(matches!(err, CoreError::StorageFailed(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_display() {
        let err = CoreError::NotFound("netease/42".into());
        assert_eq!(err.to_string(), "Not found: netease/42");
        assert!(!CoreError::InvalidInput("empty keyword".into()).is_transient());
    }
}
