//! Error types for wearsync

use std::time::Duration;

use thiserror::Error;

/// Main error type for sync operations
///
/// The first five variants are the protocol-level failures a sync cycle can
/// hit. Coordinators log them and move on; none of them is fatal.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Session could not be established within the allotted time
    #[error("Connection timed out after {0:?}")]
    ConnectionTimeout(Duration),

    /// Session opened but no companion node is reachable. The watch turns
    /// this into a skipped cycle, not a failed request.
    #[error("No companion node reachable")]
    NoPeerReachable,

    /// Message or data-item channel rejected the send
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Payload received from a peer could not be decoded
    #[error("Decode failed: {0}")]
    DecodeFailed(String),

    /// Asset reference could not be resolved into bytes
    #[error("Asset resolve failed: {0}")]
    AssetResolveFailed(String),

    /// Operation attempted on a session that was already closed
    #[error("Session closed")]
    SessionClosed,

    /// A sync cycle overran its time budget and was abandoned
    #[error("Cycle abandoned after {0:?}")]
    CycleTimeout(Duration),

    /// Worker pool was shut down before the task could run
    #[error("Worker pool closed")]
    PoolClosed,

    /// Network-related error (endpoint bind, gossip subscription)
    #[error("Network error: {0}")]
    Network(String),

    /// Blob store error
    #[error("Blob error: {0}")]
    Blob(String),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Icon could not be loaded, scaled or encoded
    #[error("Image error: {0}")]
    Image(String),

    /// Snapshot store could not be read
    #[error("Snapshot store error: {0}")]
    Store(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Invalid pairing code
    #[error("Invalid pairing code: {0}")]
    InvalidPairing(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Whether this error should invalidate a cached peer node id.
    pub fn invalidates_peer(&self) -> bool {
        matches!(
            self,
            SyncError::SendFailed(_) | SyncError::NoPeerReachable
        )
    }
}

impl From<postcard::Error> for SyncError {
    fn from(e: postcard::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

impl From<image::ImageError> for SyncError {
    fn from(e: image::ImageError) -> Self {
        SyncError::Image(e.to_string())
    }
}

/// Result type alias using SyncError
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SyncError::ConnectionTimeout(Duration::from_millis(500));
        assert_eq!(format!("{}", err), "Connection timed out after 500ms");

        let err = SyncError::SendFailed("node gone".to_string());
        assert_eq!(format!("{}", err), "Send failed: node gone");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let sync_err: SyncError = io_err.into();
        assert!(matches!(sync_err, SyncError::Io(_)));
    }

    #[test]
    fn test_invalidates_peer() {
        assert!(SyncError::SendFailed("x".into()).invalidates_peer());
        assert!(SyncError::NoPeerReachable.invalidates_peer());
        assert!(!SyncError::ConnectionTimeout(Duration::from_secs(1)).invalidates_peer());
        assert!(!SyncError::DecodeFailed("x".into()).invalidates_peer());
    }
}
