use thiserror::Error;

/// Errors surfaced to cycle triggers and operator handle callers.
///
/// Assembly and advisory failures do not appear here: they end the cycle in
/// the `FAILED` state and are returned as part of its record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CycleError {
    /// Another cycle holds the lock; the trigger was rejected, not queued.
    #[error("a cycle is already in progress")]
    Busy,

    /// The engine actor has stopped.
    #[error("engine is not running")]
    EngineUnavailable,

    #[error("persistence error: {0}")]
    Persistence(String),
}

pub type Result<T> = std::result::Result<T, CycleError>;

impl CycleError {
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy)
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for CycleError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Self::EngineUnavailable
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for CycleError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Self::EngineUnavailable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_message() {
        assert_eq!(CycleError::Busy.to_string(), "a cycle is already in progress");
        assert!(CycleError::Busy.is_busy());
        assert!(!CycleError::EngineUnavailable.is_busy());
    }

    #[tokio::test]
    async fn test_closed_channel_maps_to_unavailable() {
        let (tx, rx) = tokio::sync::mpsc::channel::<u8>(1);
        drop(rx);
        let err: CycleError = tx.send(1).await.unwrap_err().into();
        assert_eq!(err, CycleError::EngineUnavailable);
    }
}
