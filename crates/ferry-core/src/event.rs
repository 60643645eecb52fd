//! Notification events
//!
//! Every lifecycle transition of a transfer session is reported as exactly
//! one `NotificationEvent`. Content and pin events originate from
//! collaborators outside the orchestration core and are only re-published.

use std::fmt;
use std::time::SystemTime;

use serde::Serialize;

use crate::{AttemptFailure, AttemptOutcome, BitrateDecision, ContentId, SessionId, TransportKind};

/// Event kind classification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    // Transfer lifecycle
    TransferStarted,
    TransferProgress,
    TransferCompleted,
    TransferFailed,

    // Streaming
    QualityChanged,

    // Collaborator events (re-published)
    ContentAdded,
    ContentRemoved,
    PinStatusChanged,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::TransferStarted,
        EventKind::TransferProgress,
        EventKind::TransferCompleted,
        EventKind::TransferFailed,
        EventKind::QualityChanged,
        EventKind::ContentAdded,
        EventKind::ContentRemoved,
        EventKind::PinStatusChanged,
    ];

    /// Originates outside the orchestration core
    pub fn is_external(self) -> bool {
        matches!(
            self,
            EventKind::ContentAdded | EventKind::ContentRemoved | EventKind::PinStatusChanged
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::TransferStarted => "TRANSFER_STARTED",
            EventKind::TransferProgress => "TRANSFER_PROGRESS",
            EventKind::TransferCompleted => "TRANSFER_COMPLETED",
            EventKind::TransferFailed => "TRANSFER_FAILED",
            EventKind::QualityChanged => "QUALITY_CHANGED",
            EventKind::ContentAdded => "CONTENT_ADDED",
            EventKind::ContentRemoved => "CONTENT_REMOVED",
            EventKind::PinStatusChanged => "PIN_STATUS_CHANGED",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a `TRANSFER_FAILED` event covers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum FailureScope {
    /// One transport attempt failed; `next` is the fallback entered next
    Attempt {
        transport: TransportKind,
        next: Option<TransportKind>,
    },
    /// Every selected transport failed
    Session,
    /// The session was cancelled
    Cancelled,
}

/// Kind-specific event payload
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPayload {
    Started {
        content: ContentId,
        transport: TransportKind,
        plan: Vec<TransportKind>,
    },
    Progress {
        transport: TransportKind,
        transferred: u64,
        total: Option<u64>,
    },
    Completed {
        transport: TransportKind,
        attempts: usize,
    },
    Failed {
        scope: FailureScope,
        /// Attempt scope: the single failure. Session scope: every failure
        /// in attempt order.
        failures: Vec<AttemptFailure>,
    },
    Quality(BitrateDecision),
    Content {
        content: ContentId,
    },
    Pin {
        content: ContentId,
        pinned: bool,
    },
}

/// Immutable notification value, published once
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NotificationEvent {
    pub kind: EventKind,
    pub session: Option<SessionId>,
    pub payload: EventPayload,
    pub timestamp: SystemTime,
}

impl NotificationEvent {
    fn new(kind: EventKind, session: Option<SessionId>, payload: EventPayload) -> Self {
        NotificationEvent {
            kind,
            session,
            payload,
            timestamp: SystemTime::now(),
        }
    }

    pub fn transfer_started(
        session: SessionId,
        content: ContentId,
        transport: TransportKind,
        plan: Vec<TransportKind>,
    ) -> Self {
        Self::new(
            EventKind::TransferStarted,
            Some(session),
            EventPayload::Started {
                content,
                transport,
                plan,
            },
        )
    }

    pub fn transfer_progress(
        session: SessionId,
        transport: TransportKind,
        transferred: u64,
        total: Option<u64>,
    ) -> Self {
        Self::new(
            EventKind::TransferProgress,
            Some(session),
            EventPayload::Progress {
                transport,
                transferred,
                total,
            },
        )
    }

    pub fn transfer_completed(session: SessionId, transport: TransportKind, attempts: usize) -> Self {
        Self::new(
            EventKind::TransferCompleted,
            Some(session),
            EventPayload::Completed {
                transport,
                attempts,
            },
        )
    }

    pub fn attempt_failed(
        session: SessionId,
        failure: AttemptFailure,
        next: Option<TransportKind>,
    ) -> Self {
        Self::new(
            EventKind::TransferFailed,
            Some(session),
            EventPayload::Failed {
                scope: FailureScope::Attempt {
                    transport: failure.transport,
                    next,
                },
                failures: vec![failure],
            },
        )
    }

    pub fn session_failed(session: SessionId, failures: Vec<AttemptFailure>) -> Self {
        Self::new(
            EventKind::TransferFailed,
            Some(session),
            EventPayload::Failed {
                scope: FailureScope::Session,
                failures,
            },
        )
    }

    pub fn session_cancelled(session: SessionId, failures: Vec<AttemptFailure>) -> Self {
        Self::new(
            EventKind::TransferFailed,
            Some(session),
            EventPayload::Failed {
                scope: FailureScope::Cancelled,
                failures,
            },
        )
    }

    pub fn quality_changed(session: SessionId, decision: BitrateDecision) -> Self {
        Self::new(
            EventKind::QualityChanged,
            Some(session),
            EventPayload::Quality(decision),
        )
    }

    pub fn content_added(content: ContentId) -> Self {
        Self::new(EventKind::ContentAdded, None, EventPayload::Content { content })
    }

    pub fn content_removed(content: ContentId) -> Self {
        Self::new(EventKind::ContentRemoved, None, EventPayload::Content { content })
    }

    pub fn pin_status_changed(content: ContentId, pinned: bool) -> Self {
        Self::new(
            EventKind::PinStatusChanged,
            None,
            EventPayload::Pin { content, pinned },
        )
    }

    /// Failure scope for `TRANSFER_FAILED` events
    pub fn failure_scope(&self) -> Option<FailureScope> {
        match &self.payload {
            EventPayload::Failed { scope, .. } => Some(*scope),
            _ => None,
        }
    }

    /// Failure reasons carried by a `TRANSFER_FAILED` event
    pub fn failures(&self) -> &[AttemptFailure] {
        match &self.payload {
            EventPayload::Failed { failures, .. } => failures,
            _ => &[],
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self.failure_scope(), Some(FailureScope::Cancelled))
    }

    /// Failure outcomes in order, handy for assertions and logs
    pub fn failure_outcomes(&self) -> Vec<(TransportKind, AttemptOutcome)> {
        self.failures()
            .iter()
            .map(|f| (f.transport, f.outcome))
            .collect()
    }
}
