//! Errors reported by the readback engine.

use readback_core::BackendError;

use crate::slot::SlotId;

/// Readback engine error.
///
/// Transfer failures are also stored in the failed slot and exposed through
/// [`ReadbackRequest::error`](crate::ReadbackRequest::error); the variants here
/// are what an individual call returns.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadbackError {
    /// The id is unknown or its slot was already retired.
    #[error("unknown readback slot {0}")]
    InvalidId(SlotId),
    /// The request was disposed; its data is gone.
    #[error("readback slot {0} was used after dispose")]
    UseAfterDispose(SlotId),
    /// Data was requested before the copy completed.
    #[error("readback slot {0} is not ready")]
    NotReady(SlotId),
    /// The backend rejected or lost the transfer.
    #[error(transparent)]
    Transfer(#[from] BackendError),
    /// A bounded consumer queue refused a new request.
    #[error("readback queue is full ({capacity} requests outstanding)")]
    QueueFull { capacity: usize },
    /// A submission was attempted outside the bound submission context.
    #[error("readback submission issued outside the submission context")]
    WrongContext,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readback_error_display() {
        let err = ReadbackError::NotReady(SlotId::new(3));
        assert!(err.to_string().contains("not ready"));

        let err = ReadbackError::QueueFull { capacity: 8 };
        assert!(err.to_string().contains('8'));

        let err: ReadbackError = BackendError::DeviceLost("reset".to_string()).into();
        assert_eq!(err.to_string(), "device lost: reset");
    }
}
