//! End-to-end Scenario Suite
//!
//! Runs one transfer through a real `TransferService` over scripted
//! transports and checks the lifecycle contract:
//! - Attempt order follows the selected plan, no transport twice
//! - Exactly one terminal event per session
//! - Success and exhaustion are reported consistently
//! - Nothing stays registered after the session ends

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::warn;

use ferry_core::{
    AttemptOutcome, ContentRequest, EventKind, FailureScope, FerryResult, LifecycleState,
    NotificationEvent, TransferSession, TransportKind,
};
use ferry_notify::{Delivery, EventFilter};
use ferry_runtime::{FerryConfig, TransferService};

use crate::scripted::{Behaviour, CallLog, ScriptedTransport};

// ============================================================================
// SCENARIO
// ============================================================================

/// One transfer request plus the behaviour of every transport
#[derive(Clone, Debug)]
pub struct Scenario {
    pub request: ContentRequest,
    pub scripts: Vec<(TransportKind, Behaviour)>,
    pub config: FerryConfig,
    /// Cancel the session this long after submitting it
    pub cancel_after: Option<Duration>,
}

impl Scenario {
    pub fn new(request: ContentRequest) -> Self {
        Scenario {
            request,
            scripts: Vec::new(),
            config: FerryConfig::default(),
            cancel_after: None,
        }
    }

    pub fn with_script(mut self, transport: TransportKind, behaviour: Behaviour) -> Self {
        self.scripts.retain(|(kind, _)| *kind != transport);
        self.scripts.push((transport, behaviour));
        self
    }

    pub fn with_config(mut self, config: FerryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn cancel_after(mut self, delay: Duration) -> Self {
        self.cancel_after = Some(delay);
        self
    }

    /// Run the scenario to completion and collect everything observed
    pub async fn run(&self) -> FerryResult<ScenarioResult> {
        let log = CallLog::new();
        let service = TransferService::new(
            self.config.clone(),
            ScriptedTransport::set(&self.scripts, &log),
        )?;
        let mut subscription = service.subscribe(EventFilter::all());

        let handle = service.submit(self.request.clone())?;
        let id = handle.id();
        let plan = handle.plan().to_vec();

        if let Some(delay) = self.cancel_after {
            let service = service.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(e) = service.cancel(id) {
                    warn!(session = %id, error = %e, "scheduled cancel failed");
                }
            });
        }

        let report = handle.outcome().await?;
        let still_registered = service.registry().contains(id);
        service.shutdown().await;

        let mut events = Vec::new();
        let mut dropped = 0;
        while let Some(delivery) = subscription.recv().await {
            match delivery {
                Delivery::Event(event) => events.push(NotificationEvent::clone(&event)),
                Delivery::Dropped(n) => dropped += n,
            }
        }

        let delivered = match report.delivery {
            Some(payload) => Some(payload.into_bytes().await),
            None => None,
        };

        Ok(ScenarioResult {
            session: report.session,
            plan,
            calls: log.transports_for(id),
            events,
            dropped,
            still_registered,
            delivered,
        })
    }
}

// ============================================================================
// RESULT
// ============================================================================

/// Everything a scenario run observed
#[derive(Debug)]
pub struct ScenarioResult {
    pub session: Arc<TransferSession>,
    /// Plan chosen by the selector
    pub plan: Vec<TransportKind>,
    /// Adapters actually invoked, in order
    pub calls: Vec<TransportKind>,
    /// Every event published for the run
    pub events: Vec<NotificationEvent>,
    pub dropped: u64,
    pub still_registered: bool,
    pub delivered: Option<Bytes>,
}

impl ScenarioResult {
    pub fn state(&self) -> LifecycleState {
        self.session.state()
    }

    pub fn attempts(&self) -> Vec<(TransportKind, AttemptOutcome)> {
        self.session
            .attempts()
            .iter()
            .map(|a| (a.transport, a.outcome))
            .collect()
    }

    /// Lifecycle events only (no progress or quality)
    pub fn lifecycle_events(&self) -> Vec<&NotificationEvent> {
        self.events
            .iter()
            .filter(|e| {
                matches!(
                    e.kind,
                    EventKind::TransferStarted
                        | EventKind::TransferCompleted
                        | EventKind::TransferFailed
                )
            })
            .collect()
    }

    pub fn lifecycle_kinds(&self) -> Vec<EventKind> {
        self.lifecycle_events().iter().map(|e| e.kind).collect()
    }

    /// Events of one kind
    pub fn events_of(&self, kind: EventKind) -> Vec<&NotificationEvent> {
        self.events.iter().filter(|e| e.kind == kind).collect()
    }

    /// Terminal event: completion, exhaustion or cancellation
    pub fn terminal_events(&self) -> Vec<&NotificationEvent> {
        self.events
            .iter()
            .filter(|e| match e.kind {
                EventKind::TransferCompleted => true,
                EventKind::TransferFailed => !matches!(
                    e.failure_scope(),
                    Some(FailureScope::Attempt { .. })
                ),
                _ => false,
            })
            .collect()
    }

    /// Check the lifecycle contract; returns every violation found
    pub fn check_invariants(&self) -> Vec<String> {
        let mut violations = Vec::new();
        let attempts = self.attempts();
        let attempted: Vec<TransportKind> = attempts.iter().map(|(t, _)| *t).collect();

        // Attempt order follows the plan
        if !self.plan.starts_with(&attempted) {
            violations.push(format!(
                "attempts {:?} do not follow plan {:?}",
                attempted, self.plan
            ));
        }

        // No transport twice
        let unique: HashSet<_> = attempted.iter().collect();
        if unique.len() != attempted.len() {
            violations.push(format!("transport repeated in {:?}", attempted));
        }

        // Adapters were invoked in the recorded order
        let scripted: Vec<TransportKind> = attempted
            .iter()
            .copied()
            .filter(|t| self.calls.contains(t))
            .collect();
        if scripted != self.calls {
            violations.push(format!(
                "calls {:?} disagree with attempts {:?}",
                self.calls, attempted
            ));
        }

        // SUCCEEDED iff exactly one success and it is the last attempt
        let successes = attempts.iter().filter(|(_, o)| o.is_success()).count();
        let last_succeeded = attempts.last().map(|(_, o)| o.is_success()).unwrap_or(false);
        let succeeded = self.state() == LifecycleState::Succeeded;
        if succeeded != (successes == 1 && last_succeeded) {
            violations.push(format!(
                "state {} with {} successful attempts",
                self.state(),
                successes
            ));
        }

        // EXHAUSTED without cancel means the whole plan failed
        if self.state() == LifecycleState::Exhausted && !self.session.is_cancelled() {
            if attempts.len() != self.plan.len() {
                violations.push(format!(
                    "exhausted after {} of {} transports",
                    attempts.len(),
                    self.plan.len()
                ));
            }
            if successes != 0 {
                violations.push("exhausted session has a successful attempt".into());
            }
        }

        if !self.state().is_terminal() {
            violations.push(format!("session ended in {}", self.state()));
        }

        let terminal = self.terminal_events();
        if terminal.len() != 1 {
            violations.push(format!("{} terminal events", terminal.len()));
        }
        if let Some(last) = self.lifecycle_events().last() {
            if !terminal.iter().any(|t| std::ptr::eq(*t, *last)) {
                violations.push("terminal event is not the last lifecycle event".into());
            }
        }

        if !attempts.is_empty() {
            let started = self.events_of(EventKind::TransferStarted);
            if started.len() != 1 {
                violations.push(format!("{} TRANSFER_STARTED events", started.len()));
            }
        }

        if self.still_registered {
            violations.push("session still registered after finishing".into());
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::{ContentId, EventPayload, MediaKind, Priority};
    use ferry_notify::BusConfig;
    use ferry_quality::QualityConfig;
    use ferry_transport::{MemoryContentStore, TransportSet};

    use crate::{ChaosConfig, ChaosLink, LoopbackTransport};

    fn streamed_video() -> ContentRequest {
        ContentRequest::new(ContentId::from("movie.mp4"), MediaKind::Video, 50 * 1024 * 1024)
            .with_priority(Priority::Normal)
            .with_streaming_consumer(true)
    }

    fn urgent_document() -> ContentRequest {
        ContentRequest::new(ContentId::from("contract.pdf"), MediaKind::Document, 2 * 1024)
            .with_priority(Priority::High)
    }

    fn assert_contract(result: &ScenarioResult) {
        let violations = result.check_invariants();
        assert!(violations.is_empty(), "violations: {:?}", violations);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_media_times_out_then_p2p() {
        let result = Scenario::new(streamed_video())
            .with_script(TransportKind::MediaTransport, Behaviour::Hang)
            .with_script(
                TransportKind::PeerStream,
                Behaviour::Deliver(Bytes::from_static(b"frames")),
            )
            .run()
            .await
            .unwrap();

        assert_contract(&result);
        assert_eq!(result.state(), LifecycleState::Succeeded);
        assert_eq!(
            result.attempts(),
            vec![
                (TransportKind::MediaTransport, AttemptOutcome::Timeout),
                (TransportKind::PeerStream, AttemptOutcome::Success),
            ]
        );
        assert_eq!(
            result.lifecycle_kinds(),
            vec![
                EventKind::TransferStarted,
                EventKind::TransferFailed,
                EventKind::TransferCompleted,
            ]
        );
        assert_eq!(
            result.lifecycle_events()[1].failure_scope(),
            Some(FailureScope::Attempt {
                transport: TransportKind::MediaTransport,
                next: Some(TransportKind::PeerStream),
            })
        );
        assert_eq!(result.delivered, Some(Bytes::from_static(b"frames")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_small_urgent_document_uses_socket() {
        let result = Scenario::new(urgent_document())
            .with_script(
                TransportKind::SocketChannel,
                Behaviour::Deliver(Bytes::from_static(b"%PDF")),
            )
            .with_script(
                TransportKind::PeerStream,
                Behaviour::Deliver(Bytes::from_static(b"unused")),
            )
            .run()
            .await
            .unwrap();

        assert_contract(&result);
        assert_eq!(result.plan[0], TransportKind::SocketChannel);
        assert_eq!(
            result.attempts(),
            vec![(TransportKind::SocketChannel, AttemptOutcome::Success)]
        );
        assert_eq!(result.calls, vec![TransportKind::SocketChannel]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_all_transports_fail() {
        let result = Scenario::new(streamed_video())
            .with_script(TransportKind::MediaTransport, Behaviour::Unavailable)
            .with_script(
                TransportKind::PeerStream,
                Behaviour::Fail("no route to peer".into()),
            )
            .with_script(
                TransportKind::SocketChannel,
                Behaviour::TimeOutAfter(Duration::from_secs(1)),
            )
            .run()
            .await
            .unwrap();

        assert_contract(&result);
        assert_eq!(result.state(), LifecycleState::Exhausted);
        assert!(!result.session.is_cancelled());

        let terminal = result.terminal_events();
        assert_eq!(terminal[0].failure_scope(), Some(FailureScope::Session));
        assert_eq!(
            terminal[0].failure_outcomes(),
            vec![
                (TransportKind::MediaTransport, AttemptOutcome::Unavailable),
                (TransportKind::PeerStream, AttemptOutcome::TransportError),
                (TransportKind::SocketChannel, AttemptOutcome::Timeout),
            ]
        );
        assert_eq!(
            terminal[0].failures()[1].detail.as_deref(),
            Some("no route to peer")
        );
        // One attempt-scoped failure per transport plus the session one
        assert_eq!(result.events_of(EventKind::TransferFailed).len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_cancel_mid_attempt() {
        let request = ContentRequest::new(ContentId::from("backup.tar"), MediaKind::Data, 10 << 20);
        let result = Scenario::new(request)
            .with_script(TransportKind::PeerStream, Behaviour::Hang)
            .with_script(
                TransportKind::SocketChannel,
                Behaviour::Deliver(Bytes::from_static(b"never")),
            )
            .cancel_after(Duration::from_secs(2))
            .run()
            .await
            .unwrap();

        assert_contract(&result);
        assert!(result.session.is_cancelled());
        assert_eq!(
            result.attempts().last(),
            Some(&(TransportKind::PeerStream, AttemptOutcome::Cancelled))
        );
        let failed = result.events_of(EventKind::TransferFailed);
        assert_eq!(failed.len(), 1);
        assert!(failed[0].is_cancellation());
        assert!(!result.still_registered);
        assert_eq!(result.calls, vec![TransportKind::PeerStream]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_behaviour_combination_keeps_contract() {
        let behaviours = [
            Behaviour::Deliver(Bytes::from_static(b"x")),
            Behaviour::Hang,
            Behaviour::Unavailable,
            Behaviour::Fail("boom".into()),
        ];
        let requests = [streamed_video(), urgent_document()];

        for request in &requests {
            for media in &behaviours {
                for p2p in &behaviours {
                    for socket in &behaviours {
                        let result = Scenario::new(request.clone())
                            .with_script(TransportKind::MediaTransport, media.clone())
                            .with_script(TransportKind::PeerStream, p2p.clone())
                            .with_script(TransportKind::SocketChannel, socket.clone())
                            .run()
                            .await
                            .unwrap();
                        assert_contract(&result);

                        // Stops at the first delivering transport
                        let first_ok = result.plan.iter().position(|t| {
                            let behaviour = match t {
                                TransportKind::MediaTransport => media,
                                TransportKind::PeerStream => p2p,
                                TransportKind::SocketChannel => socket,
                            };
                            matches!(behaviour, Behaviour::Deliver(_))
                        });
                        match first_ok {
                            Some(index) => {
                                assert_eq!(result.attempts().len(), index + 1);
                                assert_eq!(result.state(), LifecycleState::Succeeded);
                            }
                            None => {
                                assert_eq!(result.attempts().len(), 3);
                                assert_eq!(result.state(), LifecycleState::Exhausted);
                            }
                        }
                    }
                }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_adapters_fall_through() {
        let result = Scenario::new(streamed_video())
            .with_script(
                TransportKind::SocketChannel,
                Behaviour::DeliverAfter(Duration::from_millis(40), Bytes::from_static(b"abcd")),
            )
            .run()
            .await
            .unwrap();

        assert_contract(&result);
        assert_eq!(result.calls, vec![TransportKind::SocketChannel]);
        assert_eq!(
            result.attempts(),
            vec![
                (TransportKind::MediaTransport, AttemptOutcome::Unavailable),
                (TransportKind::PeerStream, AttemptOutcome::Unavailable),
                (TransportKind::SocketChannel, AttemptOutcome::Success),
            ]
        );
        // Progress is not a lifecycle transition
        assert_eq!(result.events_of(EventKind::TransferProgress).len(), 2);
        assert_eq!(result.lifecycle_kinds().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_scale_with_size() {
        let log = CallLog::new();
        let transports = ScriptedTransport::set(
            &[(TransportKind::MediaTransport, Behaviour::Unavailable)],
            &log,
        );
        let service = TransferService::new(FerryConfig::default(), transports).unwrap();

        let small = ContentRequest::new(ContentId::from("s"), MediaKind::Audio, 1024)
            .with_streaming_consumer(true);
        let large = ContentRequest::new(ContentId::from("l"), MediaKind::Audio, 100 << 20)
            .with_streaming_consumer(true);
        service.submit(small).unwrap().outcome().await.unwrap();
        service.submit(large).unwrap().outcome().await.unwrap();

        let calls = log.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].timeout > calls[0].timeout);
        assert!(calls[1].timeout <= FerryConfig::default().timeouts.max);
    }

    #[tokio::test(start_paused = true)]
    async fn test_streaming_quality_stays_in_range() {
        let quality = QualityConfig::default();
        let store = Arc::new(MemoryContentStore::with_streaming(1024, 1024));
        let id = ContentId::from("live");
        store.put(id.clone(), vec![7u8; 64 * 1024]);

        let transports = TransportSet::new().with(Arc::new(
            LoopbackTransport::new(TransportKind::MediaTransport, store)
                .with_link(ChaosLink::new(ChaosConfig::hostile(), 99)),
        ));
        let service = TransferService::new(FerryConfig::default(), transports).unwrap();
        let mut sub = service.subscribe(EventFilter::all().kind(EventKind::QualityChanged));

        let request = ContentRequest::new(id, MediaKind::Video, 64 * 1024).with_streaming_consumer(true);
        let report = service.submit(request).unwrap().outcome().await.unwrap();
        assert!(report.is_success());

        let mut decisions = Vec::new();
        while let Some(delivery) = sub.try_recv() {
            if let Some(event) = delivery.event() {
                if let EventPayload::Quality(decision) = &event.payload {
                    decisions.push(*decision);
                }
            }
        }
        assert!(!decisions.is_empty());
        for decision in &decisions {
            assert!(decision.target_bps >= quality.min_bps);
            assert!(decision.target_bps <= quality.max_bps);
        }
        for pair in decisions.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
        // Hostile link pushes the target down
        assert!(decisions.last().unwrap().target_bps < quality.initial_bps);
        assert_eq!(report.session.bitrate(), decisions.last().copied());
    }

    #[tokio::test]
    async fn test_bus_overflow_accounting() {
        let config = FerryConfig {
            bus: BusConfig { queue_capacity: 8 },
            ..FerryConfig::default()
        };
        let service = TransferService::new(config, TransportSet::new()).unwrap();
        let mut slow = service.subscribe(EventFilter::all());

        const N: u64 = 50;
        for i in 0..N {
            let content = ContentId::new(i.to_be_bytes().to_vec());
            service
                .republish(NotificationEvent::content_added(content))
                .unwrap();
        }
        service.shutdown().await;

        let mut received = 0;
        let mut dropped = 0;
        while let Some(delivery) = slow.recv().await {
            match delivery {
                Delivery::Event(_) => received += 1,
                Delivery::Dropped(n) => dropped += n,
            }
        }
        assert_eq!(received, 8);
        assert_eq!(received + dropped, N);
        assert_eq!(slow.dropped_total(), N - 8);
    }
}
