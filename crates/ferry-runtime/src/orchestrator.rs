//! Fallback Orchestrator - drives one session through its transport plan
//!
//! For each transport in the plan:
//! 1. Check for cancellation
//! 2. Enter `ATTEMPTING(t)`, register on the first attempt
//! 3. Run the adapter under its derived timeout, relaying progress and
//!    quality feedback as events
//! 4. Record the outcome and either finish or fall through to the next
//!
//! Every lifecycle transition publishes exactly one event. Events of one
//! session are published from this task only, so they stay in order.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use ferry_core::{
    AttemptFailure, AttemptOutcome, FerryError, FerryResult, NotificationEvent, TransferSession,
    TransportKind,
};
use ferry_notify::NotificationBus;
use ferry_quality::{QualityConfig, QualityController};
use ferry_transport::{
    AttemptContext, AttemptFeedback, Payload, TimeoutPolicy, TransportOutcome, TransportSet,
    DEFAULT_FEEDBACK_CAPACITY,
};

use crate::{SessionRegistry, StatsRecorder};

/// Final state of an orchestrated session
#[derive(Debug)]
pub struct TransferReport {
    pub session: Arc<TransferSession>,
    /// Content delivered by the successful attempt
    pub delivery: Option<Payload>,
    /// Why the request was refused before its first attempt
    pub rejection: Option<FerryError>,
}

impl TransferReport {
    pub fn is_success(&self) -> bool {
        self.session.succeeded()
    }

    pub fn is_cancelled(&self) -> bool {
        self.session.is_cancelled()
    }

    /// Ordered failure reasons, one per failed attempt
    pub fn failure_reasons(&self) -> Vec<AttemptFailure> {
        self.session.failures()
    }

    /// The delivered payload, or the terminal error
    pub fn into_result(self) -> FerryResult<Payload> {
        if let Some(error) = self.rejection {
            return Err(error);
        }
        if self.session.is_cancelled() {
            return Err(FerryError::Cancelled);
        }
        match self.delivery {
            Some(payload) if self.session.succeeded() => Ok(payload),
            _ => Err(FerryError::Exhausted(self.session.failures())),
        }
    }
}

/// How an in-flight attempt ended, from the orchestrator's side
enum Resolution {
    Finished(TransportOutcome),
    DeadlineElapsed,
    Cancelled,
}

/// Runs transfer sessions through their fallback plan
pub struct FallbackOrchestrator {
    transports: TransportSet,
    registry: Arc<SessionRegistry>,
    bus: NotificationBus,
    timeouts: TimeoutPolicy,
    quality: QualityConfig,
    feedback_capacity: usize,
    stats: Arc<StatsRecorder>,
}

impl FallbackOrchestrator {
    pub fn new(
        transports: TransportSet,
        registry: Arc<SessionRegistry>,
        bus: NotificationBus,
    ) -> Self {
        FallbackOrchestrator {
            transports,
            registry,
            bus,
            timeouts: TimeoutPolicy::default(),
            quality: QualityConfig::default(),
            feedback_capacity: DEFAULT_FEEDBACK_CAPACITY,
            stats: Arc::new(StatsRecorder::new()),
        }
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutPolicy) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_quality(mut self, quality: QualityConfig) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_feedback_capacity(mut self, capacity: usize) -> Self {
        self.feedback_capacity = capacity.max(1);
        self
    }

    pub fn with_stats(mut self, stats: Arc<StatsRecorder>) -> Self {
        self.stats = stats;
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    pub fn stats(&self) -> &Arc<StatsRecorder> {
        &self.stats
    }

    /// Drive `session` through `plan` until it succeeds, every transport has
    /// failed, or `cancel` fires.
    ///
    /// Repeated transports in `plan` are skipped; an empty plan falls back
    /// to the fixed fallback order.
    pub async fn run(
        &self,
        session: TransferSession,
        plan: Vec<TransportKind>,
        cancel: CancellationToken,
    ) -> TransferReport {
        let span = info_span!(
            "transfer",
            session = %session.id(),
            content = %session.request().content(),
        );
        self.drive(session, normalize_plan(plan), cancel)
            .instrument(span)
            .await
    }

    async fn drive(
        &self,
        mut session: TransferSession,
        plan: Vec<TransportKind>,
        cancel: CancellationToken,
    ) -> TransferReport {
        let id = session.id();
        let mut quality: Option<QualityController> = None;
        let mut registered = false;
        let mut started = false;

        for (index, &transport) in plan.iter().enumerate() {
            if cancel.is_cancelled() {
                return self.cancel_between_attempts(session, quality.as_ref());
            }

            if !registered {
                if let Err(e) = self.registry.register(&session) {
                    return self.reject_conflict(session, e);
                }
                registered = true;
            }

            if let Err(e) = session.begin_attempt(transport) {
                warn!(error = %e, "skipping transport");
                continue;
            }
            self.stats.record_attempt();
            self.registry.refresh(&session);

            if !started {
                started = true;
                info!(transport = %transport, plan = ?plan, "transfer started");
                self.bus.publish(NotificationEvent::transfer_started(
                    id,
                    session.request().content().clone(),
                    transport,
                    plan.clone(),
                ));
            }

            if transport.is_streaming() && quality.is_none() {
                let controller = QualityController::new(id, self.quality.clone());
                // Starting point, attached without an event
                session.attach_bitrate(controller.decision());
                self.registry.refresh(&session);
                quality = Some(controller);
            }

            let resolution = self
                .attempt(&mut session, transport, &cancel, &mut quality)
                .await;

            let (outcome, detail, delivery) = match resolution {
                Resolution::Cancelled => (AttemptOutcome::Cancelled, None, None),
                Resolution::DeadlineElapsed => (AttemptOutcome::Timeout, None, None),
                Resolution::Finished(TransportOutcome::Delivered(payload)) => {
                    (AttemptOutcome::Success, None, Some(payload))
                }
                Resolution::Finished(TransportOutcome::TimedOut) => {
                    (AttemptOutcome::Timeout, None, None)
                }
                Resolution::Finished(TransportOutcome::Unavailable) => {
                    (AttemptOutcome::Unavailable, None, None)
                }
                Resolution::Finished(TransportOutcome::Errored(detail)) => {
                    (AttemptOutcome::TransportError, Some(detail), None)
                }
            };

            if let Err(e) = session.finish_attempt(outcome, detail) {
                warn!(error = %e, "attempt outcome rejected");
            }

            match outcome {
                AttemptOutcome::Success => {
                    info!(
                        transport = %transport,
                        attempts = session.attempts().len(),
                        "transfer completed"
                    );
                    self.bus.publish(NotificationEvent::transfer_completed(
                        id,
                        transport,
                        session.attempts().len(),
                    ));
                    return self.finish(session, delivery, quality.as_ref());
                }
                AttemptOutcome::Cancelled => {
                    info!(transport = %transport, "transfer cancelled mid-attempt");
                    self.bus.publish(NotificationEvent::session_cancelled(
                        id,
                        session.failures(),
                    ));
                    return self.finish(session, None, quality.as_ref());
                }
                _ => {
                    let next = plan.get(index + 1).copied();
                    let failure = session
                        .attempts()
                        .last()
                        .and_then(|attempt| attempt.failure());
                    if let Some(failure) = failure {
                        debug!(failure = %failure, next = ?next, "attempt failed");
                        self.bus
                            .publish(NotificationEvent::attempt_failed(id, failure, next));
                    }
                    self.registry.refresh(&session);
                }
            }
        }

        if let Err(e) = session.exhaust() {
            warn!(error = %e, "cannot mark session exhausted");
        }
        let failures = session.failures();
        info!(failures = failures.len(), "all transports exhausted");
        self.bus
            .publish(NotificationEvent::session_failed(id, failures));
        self.finish(session, None, quality.as_ref())
    }

    /// Run one adapter attempt, relaying feedback until it resolves
    async fn attempt(
        &self,
        session: &mut TransferSession,
        transport: TransportKind,
        cancel: &CancellationToken,
        quality: &mut Option<QualityController>,
    ) -> Resolution {
        let Some(adapter) = self.transports.get(transport) else {
            debug!(transport = %transport, "no adapter registered");
            return Resolution::Finished(TransportOutcome::Unavailable);
        };

        let request = session.request().clone();
        let timeout = self
            .timeouts
            .timeout_for(transport, request.size_estimate());
        let attempt_token = cancel.child_token();
        let (ctx, mut feedback) = AttemptContext::new(
            session.id(),
            transport,
            attempt_token.clone(),
            self.feedback_capacity,
        );
        debug!(transport = %transport, timeout = ?timeout, "attempt started");

        let call = adapter.attempt(&request, timeout, ctx);
        tokio::pin!(call);
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut feedback_open = true;

        let resolution = loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break Resolution::Cancelled,
                outcome = &mut call => break Resolution::Finished(outcome),
                _ = &mut deadline => break Resolution::DeadlineElapsed,
                item = feedback.recv(), if feedback_open => match item {
                    Some(item) => self.relay(session, transport, quality, item),
                    None => feedback_open = false,
                },
            }
        };

        // Stop whatever the adapter left running
        attempt_token.cancel();

        if let Resolution::Finished(_) = resolution {
            // Feedback sent just before the outcome still precedes it
            while let Ok(item) = feedback.try_recv() {
                self.relay(session, transport, quality, item);
            }
        }
        resolution
    }

    fn relay(
        &self,
        session: &mut TransferSession,
        transport: TransportKind,
        quality: &mut Option<QualityController>,
        item: AttemptFeedback,
    ) {
        match item {
            AttemptFeedback::Progress { transferred, total } => {
                session.touch();
                self.bus.publish(NotificationEvent::transfer_progress(
                    session.id(),
                    transport,
                    transferred,
                    total,
                ));
            }
            AttemptFeedback::Metric(metric) => {
                let Some(controller) = quality.as_mut() else {
                    debug!(transport = %transport, "quality metric outside a streaming session");
                    return;
                };
                controller.observe(&metric);
                if let Some(decision) = controller.take_publishable() {
                    debug!(
                        target_bps = decision.target_bps,
                        resolution = ?decision.resolution,
                        "quality changed"
                    );
                    session.attach_bitrate(decision);
                    self.registry.refresh(session);
                    self.bus
                        .publish(NotificationEvent::quality_changed(session.id(), decision));
                }
            }
        }
    }

    fn cancel_between_attempts(
        &self,
        mut session: TransferSession,
        quality: Option<&QualityController>,
    ) -> TransferReport {
        if let Err(e) = session.cancel_idle() {
            warn!(error = %e, "cannot cancel session");
        }
        info!(attempts = session.attempts().len(), "transfer cancelled");
        self.bus.publish(NotificationEvent::session_cancelled(
            session.id(),
            session.failures(),
        ));
        self.finish(session, None, quality)
    }

    /// Another session already holds this id. Refuse this request before
    /// any attempt; the registered session and its subscribers never see it.
    fn reject_conflict(&self, session: TransferSession, error: FerryError) -> TransferReport {
        warn!(error = %error, "rejecting transfer");
        self.stats.record_rejected();
        TransferReport {
            session: Arc::new(session),
            delivery: None,
            rejection: Some(error),
        }
    }

    fn finish(
        &self,
        session: TransferSession,
        delivery: Option<Payload>,
        quality: Option<&QualityController>,
    ) -> TransferReport {
        self.registry.retire(&session);
        if let Some(controller) = quality {
            self.stats.record_quality_anomalies(controller.anomalies());
        }
        self.stats
            .record_finished(session.succeeded(), session.is_cancelled());
        TransferReport {
            session: Arc::new(session),
            delivery,
            rejection: None,
        }
    }
}

/// Drop repeated transports, keeping first occurrences
fn normalize_plan(plan: Vec<TransportKind>) -> Vec<TransportKind> {
    if plan.is_empty() {
        return TransportKind::FALLBACK_ORDER.to_vec();
    }
    let mut seen = Vec::with_capacity(plan.len());
    for kind in plan {
        if !seen.contains(&kind) {
            seen.push(kind);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use ferry_core::{
        ContentId, ContentRequest, EventKind, FailureScope, LifecycleState, MediaKind, SessionId,
    };
    use ferry_notify::{EventFilter, Subscription};
    use ferry_transport::Transport;

    #[derive(Clone, Copy)]
    enum Script {
        Deliver,
        Hang,
        Unavailable,
        Fail,
        /// Report progress and metrics, then deliver
        Stream,
    }

    struct Scripted {
        kind: TransportKind,
        script: Script,
    }

    #[async_trait]
    impl Transport for Scripted {
        fn kind(&self) -> TransportKind {
            self.kind
        }

        async fn attempt(
            &self,
            _request: &ContentRequest,
            _timeout: Duration,
            ctx: AttemptContext,
        ) -> TransportOutcome {
            match self.script {
                Script::Deliver => TransportOutcome::Delivered(Payload::Bytes(Bytes::from_static(b"ok"))),
                Script::Hang => {
                    ctx.cancelled().await;
                    TransportOutcome::Errored("cancelled".into())
                }
                Script::Unavailable => TransportOutcome::Unavailable,
                Script::Fail => TransportOutcome::Errored("reset by peer".into()),
                Script::Stream => {
                    ctx.report_progress(512, Some(1024));
                    // Heavy loss: target must drop
                    ctx.report_metric(80.0, 0.3, 200_000.0);
                    ctx.report_progress(1024, Some(1024));
                    TransportOutcome::Delivered(Payload::Bytes(Bytes::from_static(b"stream")))
                }
            }
        }
    }

    fn orchestrator(scripts: &[(TransportKind, Script)]) -> FallbackOrchestrator {
        let mut set = TransportSet::new();
        for &(kind, script) in scripts {
            set.register(Arc::new(Scripted { kind, script }));
        }
        FallbackOrchestrator::new(set, Arc::new(SessionRegistry::new()), NotificationBus::new())
    }

    fn video_session(id: u64) -> TransferSession {
        let req = ContentRequest::new(ContentId::from("movie"), MediaKind::Video, 50 << 20)
            .with_streaming_consumer(true);
        TransferSession::new(SessionId::new(id), req)
    }

    fn drain(sub: &mut Subscription) -> Vec<NotificationEvent> {
        let mut events = Vec::new();
        while let Some(delivery) = sub.try_recv() {
            if let Some(event) = delivery.event() {
                events.push(event.clone());
            }
        }
        events
    }

    const PLAN: [TransportKind; 3] = [
        TransportKind::MediaTransport,
        TransportKind::PeerStream,
        TransportKind::SocketChannel,
    ];

    #[tokio::test(start_paused = true)]
    async fn test_timeout_falls_back_to_next() {
        let orch = orchestrator(&[
            (TransportKind::MediaTransport, Script::Hang),
            (TransportKind::PeerStream, Script::Deliver),
        ]);
        let mut sub = orch.bus().subscribe(EventFilter::all().kind(EventKind::TransferFailed));

        let report = orch
            .run(video_session(1), PLAN.to_vec(), CancellationToken::new())
            .await;

        assert!(report.is_success());
        let outcomes: Vec<_> = report
            .session
            .attempts()
            .iter()
            .map(|a| (a.transport, a.outcome))
            .collect();
        assert_eq!(
            outcomes,
            vec![
                (TransportKind::MediaTransport, AttemptOutcome::Timeout),
                (TransportKind::PeerStream, AttemptOutcome::Success),
            ]
        );
        let failed = drain(&mut sub);
        assert_eq!(failed.len(), 1);
        assert_eq!(
            failed[0].failure_scope(),
            Some(FailureScope::Attempt {
                transport: TransportKind::MediaTransport,
                next: Some(TransportKind::PeerStream),
            })
        );
        assert!(orch.registry().is_empty());
    }

    #[tokio::test]
    async fn test_missing_adapter_counts_as_unavailable() {
        let orch = orchestrator(&[(TransportKind::SocketChannel, Script::Deliver)]);
        let report = orch
            .run(video_session(2), PLAN.to_vec(), CancellationToken::new())
            .await;

        assert!(report.is_success());
        let failures = report.failure_reasons();
        assert_eq!(failures.len(), 2);
        assert!(failures.iter().all(|f| f.outcome == AttemptOutcome::Unavailable));
        assert_eq!(
            report.session.current_transport(),
            Some(TransportKind::SocketChannel)
        );
    }

    #[tokio::test]
    async fn test_exhaustion_reports_every_failure() {
        let orch = orchestrator(&[
            (TransportKind::MediaTransport, Script::Unavailable),
            (TransportKind::PeerStream, Script::Fail),
            (TransportKind::SocketChannel, Script::Unavailable),
        ]);
        let mut sub = orch.bus().subscribe(EventFilter::all());

        let report = orch
            .run(video_session(3), PLAN.to_vec(), CancellationToken::new())
            .await;
        assert_eq!(report.session.state(), LifecycleState::Exhausted);
        assert!(!report.is_cancelled());

        let events = drain(&mut sub);
        let last = events.last().unwrap();
        assert_eq!(last.failure_scope(), Some(FailureScope::Session));
        assert_eq!(
            last.failure_outcomes(),
            vec![
                (TransportKind::MediaTransport, AttemptOutcome::Unavailable),
                (TransportKind::PeerStream, AttemptOutcome::TransportError),
                (TransportKind::SocketChannel, AttemptOutcome::Unavailable),
            ]
        );
        match report.into_result() {
            Err(FerryError::Exhausted(failures)) => {
                assert_eq!(failures.len(), 3);
                assert_eq!(failures[1].detail.as_deref(), Some("reset by peer"));
            }
            other => panic!("expected exhaustion, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_cancel_before_start_has_no_attempts() {
        let orch = orchestrator(&[(TransportKind::PeerStream, Script::Deliver)]);
        let mut sub = orch.bus().subscribe(EventFilter::all());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = orch.run(video_session(4), PLAN.to_vec(), cancel).await;
        assert!(report.is_cancelled());
        assert!(report.session.attempts().is_empty());

        let events = drain(&mut sub);
        assert_eq!(events.len(), 1);
        assert!(events[0].is_cancellation());
        assert!(matches!(report.into_result(), Err(FerryError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_attempt() {
        let orch = Arc::new(orchestrator(&[
            (TransportKind::MediaTransport, Script::Hang),
            (TransportKind::PeerStream, Script::Deliver),
        ]));
        let mut sub = orch.bus().subscribe(EventFilter::all().kind(EventKind::TransferFailed));
        let cancel = CancellationToken::new();

        let task = {
            let orch = Arc::clone(&orch);
            let cancel = cancel.clone();
            tokio::spawn(async move { orch.run(video_session(5), PLAN.to_vec(), cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(orch.registry().contains(SessionId::new(5)));
        cancel.cancel();

        let report = task.await.unwrap();
        assert_eq!(report.session.attempts().len(), 1);
        assert_eq!(
            report.session.attempts()[0].outcome,
            AttemptOutcome::Cancelled
        );
        let failed = drain(&mut sub);
        assert_eq!(failed.len(), 1);
        assert!(failed[0].is_cancellation());
        assert!(!orch.registry().contains(SessionId::new(5)));
    }

    #[tokio::test]
    async fn test_streaming_feedback_becomes_events() {
        let orch = orchestrator(&[(TransportKind::MediaTransport, Script::Stream)]);
        let mut sub = orch.bus().subscribe(EventFilter::all());

        let report = orch
            .run(video_session(6), PLAN.to_vec(), CancellationToken::new())
            .await;
        assert!(report.is_success());

        let kinds: Vec<EventKind> = drain(&mut sub).iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::TransferStarted,
                EventKind::TransferProgress,
                EventKind::QualityChanged,
                EventKind::TransferProgress,
                EventKind::TransferCompleted,
            ]
        );
        let bitrate = report.session.bitrate().unwrap();
        assert!(bitrate.target_bps < QualityConfig::default().initial_bps);
    }

    #[tokio::test]
    async fn test_registry_conflict_only_fails_newcomer() {
        let orch = orchestrator(&[(TransportKind::PeerStream, Script::Deliver)]);
        let existing = video_session(7);
        orch.registry().register(&existing).unwrap();
        let mut sub = orch
            .bus()
            .subscribe(EventFilter::all().session(SessionId::new(7)));

        let report = orch
            .run(video_session(7), PLAN.to_vec(), CancellationToken::new())
            .await;

        // Refused before any transport was invoked
        assert!(report.session.attempts().is_empty());
        assert!(!report.is_success());
        assert_eq!(orch.stats().snapshot().attempts, 0);
        assert_eq!(orch.stats().snapshot().rejected, 1);
        assert!(matches!(
            report.into_result(),
            Err(FerryError::RegistryConflict(id)) if id == SessionId::new(7)
        ));

        // The live session hears nothing and keeps its registry entry
        assert!(drain(&mut sub).is_empty());
        let kept = orch.registry().get(SessionId::new(7)).unwrap();
        assert_eq!(kept.state(), LifecycleState::Pending);
        assert_eq!(orch.registry().len(), 1);
    }

    #[test]
    fn test_normalize_plan() {
        assert_eq!(
            normalize_plan(vec![
                TransportKind::SocketChannel,
                TransportKind::SocketChannel,
                TransportKind::PeerStream,
            ]),
            vec![TransportKind::SocketChannel, TransportKind::PeerStream]
        );
        assert_eq!(normalize_plan(Vec::new()).len(), 3);
    }
}
