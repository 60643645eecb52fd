//! Scripted transports
//!
//! Each adapter plays back a fixed behaviour and records every call in a
//! shared log, so tests can assert on attempt order across transports.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use ferry_core::{ContentRequest, SessionId, TransportKind};
use ferry_transport::{AttemptContext, Payload, Transport, TransportOutcome, TransportSet};

/// What a scripted transport does when attempted
#[derive(Clone, Debug)]
pub enum Behaviour {
    /// Deliver `data` immediately
    Deliver(Bytes),
    /// Deliver `data` after a delay, reporting progress halfway
    DeliverAfter(Duration, Bytes),
    /// Never answer; only cancellation or the attempt deadline ends it
    Hang,
    /// Report its own timeout after a delay
    TimeOutAfter(Duration),
    /// Refuse the request
    Unavailable,
    /// Fail with a detail
    Fail(String),
}

/// One recorded call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    pub session: SessionId,
    pub transport: TransportKind,
    pub timeout: Duration,
}

/// Call log shared by every scripted transport of a test
#[derive(Clone, Debug, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Transports attempted for `session`, in call order
    pub fn transports_for(&self, session: SessionId) -> Vec<TransportKind> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.session == session)
            .map(|c| c.transport)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }
}

/// Transport adapter that plays back a [`Behaviour`]
pub struct ScriptedTransport {
    kind: TransportKind,
    behaviour: Behaviour,
    log: CallLog,
}

impl ScriptedTransport {
    pub fn new(kind: TransportKind, behaviour: Behaviour, log: CallLog) -> Self {
        ScriptedTransport {
            kind,
            behaviour,
            log,
        }
    }

    /// Build a transport set with one scripted adapter per entry
    pub fn set(scripts: &[(TransportKind, Behaviour)], log: &CallLog) -> TransportSet {
        let mut set = TransportSet::new();
        for (kind, behaviour) in scripts {
            set.register(Arc::new(ScriptedTransport::new(
                *kind,
                behaviour.clone(),
                log.clone(),
            )));
        }
        set
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn attempt(
        &self,
        _request: &ContentRequest,
        timeout: Duration,
        ctx: AttemptContext,
    ) -> TransportOutcome {
        self.log.record(Call {
            session: ctx.session_id(),
            transport: self.kind,
            timeout,
        });

        match &self.behaviour {
            Behaviour::Deliver(data) => TransportOutcome::Delivered(Payload::Bytes(data.clone())),
            Behaviour::DeliverAfter(delay, data) => {
                let total = data.len() as u64;
                tokio::select! {
                    _ = ctx.cancelled() => return TransportOutcome::Errored("cancelled".into()),
                    _ = tokio::time::sleep(*delay / 2) => {}
                }
                ctx.report_progress(total / 2, Some(total));
                tokio::select! {
                    _ = ctx.cancelled() => TransportOutcome::Errored("cancelled".into()),
                    _ = tokio::time::sleep(*delay - *delay / 2) => {
                        ctx.report_progress(total, Some(total));
                        TransportOutcome::Delivered(Payload::Bytes(data.clone()))
                    }
                }
            }
            Behaviour::Hang => {
                ctx.cancelled().await;
                TransportOutcome::Errored("cancelled".into())
            }
            Behaviour::TimeOutAfter(delay) => {
                tokio::select! {
                    _ = ctx.cancelled() => TransportOutcome::Errored("cancelled".into()),
                    _ = tokio::time::sleep(*delay) => TransportOutcome::TimedOut,
                }
            }
            Behaviour::Unavailable => TransportOutcome::Unavailable,
            Behaviour::Fail(detail) => TransportOutcome::Errored(detail.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::{ContentId, MediaKind};
    use tokio_util::sync::CancellationToken;

    fn request() -> ContentRequest {
        ContentRequest::new(ContentId::from("doc"), MediaKind::Document, 4)
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_delivery_reports_progress() {
        let log = CallLog::new();
        let transport = ScriptedTransport::new(
            TransportKind::PeerStream,
            Behaviour::DeliverAfter(Duration::from_millis(100), Bytes::from_static(b"data")),
            log.clone(),
        );
        let (ctx, mut feedback) = AttemptContext::new(
            SessionId::new(1),
            TransportKind::PeerStream,
            CancellationToken::new(),
            8,
        );

        let outcome = transport
            .attempt(&request(), Duration::from_secs(1), ctx)
            .await;
        assert!(outcome.is_delivered());
        assert!(feedback.recv().await.is_some());
        assert!(feedback.recv().await.is_some());
        assert_eq!(log.transports_for(SessionId::new(1)), vec![TransportKind::PeerStream]);
        assert_eq!(log.calls()[0].timeout, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_hang_ends_on_cancel() {
        let transport =
            ScriptedTransport::new(TransportKind::MediaTransport, Behaviour::Hang, CallLog::new());
        let token = CancellationToken::new();
        let (ctx, _feedback) =
            AttemptContext::new(SessionId::new(2), TransportKind::MediaTransport, token.clone(), 8);
        token.cancel();
        let outcome = transport
            .attempt(&request(), Duration::from_secs(1), ctx)
            .await;
        assert!(matches!(outcome, TransportOutcome::Errored(_)));
    }
}
