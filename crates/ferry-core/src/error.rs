//! Error types for Ferry

use thiserror::Error;

use crate::{AttemptFailure, ContentId, EventKind, SessionId, TransportKind};

/// Core Ferry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FerryError {
    // Selection errors
    #[error("Selection rule invalid: {0}")]
    Selection(String),

    // Transport errors
    #[error("Transport {0} timed out")]
    TransportTimeout(TransportKind),

    #[error("Transport {0} unavailable")]
    TransportUnavailable(TransportKind),

    #[error("Transport {transport} error: {detail}")]
    Transport {
        transport: TransportKind,
        detail: String,
    },

    // Session errors
    #[error("Transfer cancelled")]
    Cancelled,

    #[error("All transports exhausted: {}", format_failures(.0))]
    Exhausted(Vec<AttemptFailure>),

    #[error("Session {0} already registered")]
    RegistryConflict(SessionId),

    #[error("Session {0} not found")]
    SessionNotFound(SessionId),

    #[error("Invalid transition for session {session}: {from} -> {to}")]
    InvalidTransition {
        session: SessionId,
        from: String,
        to: String,
    },

    // Content errors
    #[error("Content not found: {0}")]
    ContentNotFound(ContentId),

    // Notification errors
    #[error("Event kind {0} is not a collaborator event")]
    NotExternalEvent(EventKind),

    // Service errors
    #[error("Service is shutting down")]
    ShuttingDown,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

fn format_failures(failures: &[AttemptFailure]) -> String {
    if failures.is_empty() {
        return "no attempts".to_string();
    }
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type for Ferry operations
pub type FerryResult<T> = Result<T, FerryError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AttemptOutcome;

    #[test]
    fn test_exhausted_lists_reasons_in_order() {
        let err = FerryError::Exhausted(vec![
            AttemptFailure {
                transport: TransportKind::MediaTransport,
                outcome: AttemptOutcome::Timeout,
                detail: None,
            },
            AttemptFailure {
                transport: TransportKind::PeerStream,
                outcome: AttemptOutcome::Unavailable,
                detail: None,
            },
        ]);
        assert_eq!(
            err.to_string(),
            "All transports exhausted: media:timeout, p2p:unavailable"
        );
    }
}
