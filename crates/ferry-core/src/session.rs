//! Transfer sessions and their lifecycle
//!
//! A session walks forward through
//! `Pending → Attempting(t) → {Succeeded | AttemptFailed(t)} → Attempting(next) → …`
//! and ends in `Succeeded` or `Exhausted`. Attempt history is append-only.

use std::fmt;
use std::time::{Duration, SystemTime};

use serde::Serialize;

use crate::{BitrateDecision, ContentRequest, FerryError, FerryResult, SessionId, TransportKind};

/// Lifecycle state of a transfer session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "state", content = "transport", rename_all = "snake_case")]
pub enum LifecycleState {
    Pending,
    Attempting(TransportKind),
    AttemptFailed(TransportKind),
    Succeeded,
    Exhausted,
}

impl LifecycleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Succeeded | LifecycleState::Exhausted)
    }

    /// Forward-only transition table
    pub fn can_advance_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        match (self, next) {
            (Pending, Attempting(_)) | (Pending, Exhausted) => true,
            (Attempting(_), Succeeded) | (Attempting(_), Exhausted) => true,
            (Attempting(a), AttemptFailed(b)) => a == b,
            (AttemptFailed(_), Attempting(_)) | (AttemptFailed(_), Exhausted) => true,
            _ => false,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Pending => f.write_str("PENDING"),
            LifecycleState::Attempting(t) => write!(f, "ATTEMPTING({t})"),
            LifecycleState::AttemptFailed(t) => write!(f, "ATTEMPT_FAILED({t})"),
            LifecycleState::Succeeded => f.write_str("SUCCEEDED"),
            LifecycleState::Exhausted => f.write_str("EXHAUSTED"),
        }
    }
}

/// Outcome of a single transport attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Timeout,
    Unavailable,
    TransportError,
    Cancelled,
}

impl AttemptOutcome {
    pub fn is_success(self) -> bool {
        matches!(self, AttemptOutcome::Success)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::Timeout => "timeout",
            AttemptOutcome::Unavailable => "unavailable",
            AttemptOutcome::TransportError => "transport_error",
            AttemptOutcome::Cancelled => "cancelled",
        }
    }

    /// Error for a failed outcome; `None` for success
    pub fn to_error(self, transport: TransportKind, detail: Option<&str>) -> Option<FerryError> {
        match self {
            AttemptOutcome::Success => None,
            AttemptOutcome::Timeout => Some(FerryError::TransportTimeout(transport)),
            AttemptOutcome::Unavailable => Some(FerryError::TransportUnavailable(transport)),
            AttemptOutcome::TransportError => Some(FerryError::Transport {
                transport,
                detail: detail.unwrap_or("unspecified").to_string(),
            }),
            AttemptOutcome::Cancelled => Some(FerryError::Cancelled),
        }
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attempt of one transport, recorded once it has ended
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProtocolAttempt {
    pub transport: TransportKind,
    pub started_at: SystemTime,
    pub ended_at: SystemTime,
    pub outcome: AttemptOutcome,
    pub detail: Option<String>,
}

impl ProtocolAttempt {
    pub fn elapsed(&self) -> Duration {
        self.ended_at
            .duration_since(self.started_at)
            .unwrap_or_default()
    }

    pub fn failure(&self) -> Option<AttemptFailure> {
        if self.outcome.is_success() {
            return None;
        }
        Some(AttemptFailure {
            transport: self.transport,
            outcome: self.outcome,
            detail: self.detail.clone(),
        })
    }
}

/// Failure reason of one attempt, as reported to callers and subscribers
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AttemptFailure {
    pub transport: TransportKind,
    pub outcome: AttemptOutcome,
    pub detail: Option<String>,
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.transport, self.outcome)?;
        if let Some(detail) = &self.detail {
            write!(f, " ({detail})")?;
        }
        Ok(())
    }
}

/// A transfer session.
///
/// Owned by the orchestrator for its whole lifetime; everyone else sees
/// cloned snapshots.
#[derive(Clone, Debug, Serialize)]
pub struct TransferSession {
    id: SessionId,
    request: ContentRequest,
    current: Option<TransportKind>,
    attempts: Vec<ProtocolAttempt>,
    state: LifecycleState,
    cancelled: bool,
    created_at: SystemTime,
    last_activity: SystemTime,
    #[serde(skip)]
    attempt_started: Option<SystemTime>,
    bitrate: Option<BitrateDecision>,
}

impl TransferSession {
    pub fn new(id: SessionId, request: ContentRequest) -> Self {
        let now = SystemTime::now();
        TransferSession {
            id,
            request,
            current: None,
            attempts: Vec::new(),
            state: LifecycleState::Pending,
            cancelled: false,
            created_at: now,
            last_activity: now,
            attempt_started: None,
            bitrate: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn request(&self) -> &ContentRequest {
        &self.request
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Transport currently (or most recently) in use
    pub fn current_transport(&self) -> Option<TransportKind> {
        self.current
    }

    pub fn attempts(&self) -> &[ProtocolAttempt] {
        &self.attempts
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn last_activity(&self) -> SystemTime {
        self.last_activity
    }

    pub fn bitrate(&self) -> Option<BitrateDecision> {
        self.bitrate
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn succeeded(&self) -> bool {
        self.state == LifecycleState::Succeeded
    }

    /// Has this transport already been tried in this session?
    pub fn attempted(&self, transport: TransportKind) -> bool {
        self.attempts.iter().any(|a| a.transport == transport)
    }

    /// Ordered failure reasons of every non-successful attempt
    pub fn failures(&self) -> Vec<AttemptFailure> {
        self.attempts.iter().filter_map(|a| a.failure()).collect()
    }

    pub fn touch(&mut self) {
        self.last_activity = SystemTime::now();
    }

    /// Enter `Attempting(transport)`.
    ///
    /// A transport is never attempted twice in the same session.
    pub fn begin_attempt(&mut self, transport: TransportKind) -> FerryResult<()> {
        if self.attempted(transport) {
            return Err(FerryError::InvalidTransition {
                session: self.id,
                from: self.state.to_string(),
                to: format!("ATTEMPTING({transport}) again"),
            });
        }
        self.advance(LifecycleState::Attempting(transport))?;
        self.current = Some(transport);
        self.attempt_started = Some(self.last_activity);
        Ok(())
    }

    /// Record the end of the in-flight attempt and move to the matching state:
    /// `Succeeded`, `AttemptFailed(t)`, or `Exhausted` when cancelled.
    pub fn finish_attempt(
        &mut self,
        outcome: AttemptOutcome,
        detail: Option<String>,
    ) -> FerryResult<&ProtocolAttempt> {
        let transport = match self.state {
            LifecycleState::Attempting(t) => t,
            other => {
                return Err(FerryError::InvalidTransition {
                    session: self.id,
                    from: other.to_string(),
                    to: format!("attempt outcome {outcome}"),
                })
            }
        };

        let next = match outcome {
            AttemptOutcome::Success => LifecycleState::Succeeded,
            AttemptOutcome::Cancelled => LifecycleState::Exhausted,
            _ => LifecycleState::AttemptFailed(transport),
        };
        self.advance(next)?;
        if outcome == AttemptOutcome::Cancelled {
            self.cancelled = true;
        }

        let started_at = self.attempt_started.take().unwrap_or(self.created_at);
        self.attempts.push(ProtocolAttempt {
            transport,
            started_at,
            ended_at: self.last_activity,
            outcome,
            detail,
        });
        let index = self.attempts.len() - 1;
        Ok(&self.attempts[index])
    }

    /// All selected transports failed
    pub fn exhaust(&mut self) -> FerryResult<()> {
        match self.state {
            LifecycleState::AttemptFailed(_) => self.advance(LifecycleState::Exhausted),
            other => Err(FerryError::InvalidTransition {
                session: self.id,
                from: other.to_string(),
                to: LifecycleState::Exhausted.to_string(),
            }),
        }
    }

    /// Cancel while no attempt is in flight (`Pending` or between attempts)
    pub fn cancel_idle(&mut self) -> FerryResult<()> {
        match self.state {
            LifecycleState::Pending | LifecycleState::AttemptFailed(_) => {
                self.advance(LifecycleState::Exhausted)?;
                self.cancelled = true;
                Ok(())
            }
            other => Err(FerryError::InvalidTransition {
                session: self.id,
                from: other.to_string(),
                to: "EXHAUSTED(cancelled)".to_string(),
            }),
        }
    }

    /// Attach a quality decision; only meaningful while streaming
    pub fn attach_bitrate(&mut self, decision: BitrateDecision) {
        self.bitrate = Some(decision);
        self.touch();
    }

    fn advance(&mut self, next: LifecycleState) -> FerryResult<()> {
        if !self.state.can_advance_to(next) {
            return Err(FerryError::InvalidTransition {
                session: self.id,
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        self.touch();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ContentId, MediaKind};
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn session() -> TransferSession {
        let req = ContentRequest::new(ContentId::from("c1"), MediaKind::Video, 1024);
        TransferSession::new(SessionId::new(7), req)
    }

    #[test]
    fn test_fallback_then_success() {
        let mut s = session();
        s.begin_attempt(TransportKind::MediaTransport).unwrap();
        s.finish_attempt(AttemptOutcome::Timeout, None).unwrap();
        assert_eq!(
            s.state(),
            LifecycleState::AttemptFailed(TransportKind::MediaTransport)
        );

        s.begin_attempt(TransportKind::PeerStream).unwrap();
        s.finish_attempt(AttemptOutcome::Success, None).unwrap();
        assert!(s.succeeded());
        assert_eq!(s.attempts().len(), 2);
        assert_eq!(s.current_transport(), Some(TransportKind::PeerStream));
        assert_eq!(s.failures().len(), 1);
    }

    #[test]
    fn test_same_transport_never_retried() {
        let mut s = session();
        s.begin_attempt(TransportKind::PeerStream).unwrap();
        s.finish_attempt(AttemptOutcome::Unavailable, None).unwrap();
        assert!(s.begin_attempt(TransportKind::PeerStream).is_err());
    }

    #[test]
    fn test_no_transition_out_of_terminal() {
        let mut s = session();
        s.begin_attempt(TransportKind::SocketChannel).unwrap();
        s.finish_attempt(AttemptOutcome::Success, None).unwrap();
        assert!(s.begin_attempt(TransportKind::PeerStream).is_err());
        assert!(s.cancel_idle().is_err());
        assert!(s.exhaust().is_err());
    }

    #[test]
    fn test_cancel_in_flight_exhausts() {
        let mut s = session();
        s.begin_attempt(TransportKind::PeerStream).unwrap();
        let attempt = s.finish_attempt(AttemptOutcome::Cancelled, None).unwrap();
        assert_eq!(attempt.outcome, AttemptOutcome::Cancelled);
        assert_eq!(s.state(), LifecycleState::Exhausted);
        assert!(s.is_cancelled());
    }

    #[test]
    fn test_cancel_pending() {
        let mut s = session();
        s.cancel_idle().unwrap();
        assert_eq!(s.state(), LifecycleState::Exhausted);
        assert!(s.attempts().is_empty());
        assert!(s.is_cancelled());
    }

    #[test]
    fn test_finish_without_attempt_rejected() {
        let mut s = session();
        assert!(s.finish_attempt(AttemptOutcome::Success, None).is_err());
    }

    #[test]
    fn test_failure_display() {
        let failure = AttemptFailure {
            transport: TransportKind::SocketChannel,
            outcome: AttemptOutcome::TransportError,
            detail: Some("reset by peer".into()),
        };
        assert_eq!(failure.to_string(), "socket:transport_error (reset by peer)");
    }

    #[test]
    fn test_outcome_names_match_serialized_form() {
        use AttemptOutcome::*;
        for outcome in [Success, Timeout, Unavailable, TransportError, Cancelled] {
            let json = serde_json::to_value(outcome).unwrap();
            assert_eq!(json, serde_json::Value::from(outcome.as_str()));
        }
    }

    #[test]
    fn test_outcome_maps_to_error() {
        assert!(AttemptOutcome::Success
            .to_error(TransportKind::PeerStream, None)
            .is_none());
        assert!(matches!(
            AttemptOutcome::Timeout.to_error(TransportKind::MediaTransport, None),
            Some(FerryError::TransportTimeout(TransportKind::MediaTransport))
        ));
    }

    fn any_outcome() -> impl Strategy<Value = AttemptOutcome> {
        prop_oneof![
            Just(AttemptOutcome::Success),
            Just(AttemptOutcome::Timeout),
            Just(AttemptOutcome::Unavailable),
            Just(AttemptOutcome::TransportError),
            Just(AttemptOutcome::Cancelled),
        ]
    }

    proptest! {
        #[test]
        fn prop_history_is_append_only_and_forward(
            steps in proptest::collection::vec((0usize..3, any_outcome()), 0..8),
        ) {
            let mut s = session();
            let mut history: Vec<ProtocolAttempt> = Vec::new();

            for (index, outcome) in steps {
                let transport = TransportKind::FALLBACK_ORDER[index];
                let before = s.state();
                match s.begin_attempt(transport) {
                    Ok(()) => {
                        prop_assert!(!before.is_terminal());
                        prop_assert!(history.iter().all(|a| a.transport != transport));
                        prop_assert!(s.finish_attempt(outcome, None).is_ok());
                    }
                    Err(_) => {
                        prop_assert!(
                            before.is_terminal()
                                || history.iter().any(|a| a.transport == transport)
                        );
                        prop_assert_eq!(s.state(), before);
                    }
                }
                prop_assert!(s.attempts().starts_with(&history));
                history = s.attempts().to_vec();
            }

            let distinct: HashSet<TransportKind> =
                s.attempts().iter().map(|a| a.transport).collect();
            prop_assert_eq!(distinct.len(), s.attempts().len());

            // At most one success, and only as the last attempt
            let successes = s.attempts().iter().filter(|a| a.outcome.is_success()).count();
            prop_assert!(successes <= 1);
            if s.succeeded() {
                prop_assert!(s.attempts().last().map_or(false, |a| a.outcome.is_success()));
            }
        }
    }
}
