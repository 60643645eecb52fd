//! Transfer Service - the thin administrative surface
//!
//! Owns the registry, the bus and the orchestrator, admits sessions in FIFO
//! order up to `max_concurrent_sessions`, and shuts down by draining
//! running sessions before closing every subscriber queue.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use ferry_core::{
    ContentRequest, FerryError, FerryResult, NotificationEvent, SessionId, SessionIdGenerator,
    TransferSession, TransportKind,
};
use ferry_notify::{EventFilter, NotificationBus, Subscription};
use ferry_transport::TransportSet;

use crate::{
    FallbackOrchestrator, FerryConfig, ProtocolSelector, RuntimeStats, SessionRegistry,
    StatsRecorder, TransferReport,
};

/// Caller's handle to a submitted transfer
#[derive(Debug)]
pub struct TransferHandle {
    id: SessionId,
    plan: Vec<TransportKind>,
    report: oneshot::Receiver<TransferReport>,
}

impl TransferHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Transport plan chosen for this transfer
    pub fn plan(&self) -> &[TransportKind] {
        &self.plan
    }

    /// Wait for the session to reach a terminal state
    pub async fn outcome(self) -> FerryResult<TransferReport> {
        self.report.await.map_err(|_| FerryError::ShuttingDown)
    }
}

/// A session waiting for an orchestration slot
struct Job {
    session: TransferSession,
    plan: Vec<TransportKind>,
    cancel: CancellationToken,
    reply: oneshot::Sender<TransferReport>,
}

#[derive(Default)]
struct Admission {
    queue: VecDeque<Job>,
    running: usize,
}

struct Control {
    cancel: CancellationToken,
    /// Snapshot answered until the orchestrator registers the session
    pending: Arc<TransferSession>,
}

struct ServiceInner {
    config: FerryConfig,
    selector: ProtocolSelector,
    orchestrator: FallbackOrchestrator,
    registry: Arc<SessionRegistry>,
    bus: NotificationBus,
    ids: SessionIdGenerator,
    admission: Mutex<Admission>,
    controls: Mutex<HashMap<SessionId, Control>>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    closed: AtomicBool,
    stats: Arc<StatsRecorder>,
}

/// Transfer orchestration service.
///
/// Cheap to clone; all clones drive the same sessions. Must be used from
/// within a tokio runtime.
#[derive(Clone)]
pub struct TransferService {
    inner: Arc<ServiceInner>,
}

impl TransferService {
    /// Build a service over the given transport adapters
    pub fn new(config: FerryConfig, transports: TransportSet) -> FerryResult<Self> {
        config.validate()?;
        let registry = Arc::new(SessionRegistry::with_retention(config.retain_finished));
        let bus = NotificationBus::with_config(config.bus.clone());
        let stats = Arc::new(StatsRecorder::new());
        let orchestrator =
            FallbackOrchestrator::new(transports, Arc::clone(&registry), bus.clone())
                .with_timeouts(config.timeouts.clone())
                .with_quality(config.quality.clone())
                .with_stats(Arc::clone(&stats));

        info!(
            max_concurrent = config.max_concurrent_sessions,
            retain_finished = config.retain_finished,
            "transfer service started"
        );
        Ok(TransferService {
            inner: Arc::new(ServiceInner {
                selector: ProtocolSelector::new(config.selector.clone()),
                config,
                orchestrator,
                registry,
                bus,
                ids: SessionIdGenerator::new(),
                admission: Mutex::new(Admission::default()),
                controls: Mutex::new(HashMap::new()),
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
                closed: AtomicBool::new(false),
                stats,
            }),
        })
    }

    pub fn config(&self) -> &FerryConfig {
        &self.inner.config
    }

    pub fn bus(&self) -> &NotificationBus {
        &self.inner.bus
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.inner.registry
    }

    /// Subscribe to lifecycle and collaborator events
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        self.inner.bus.subscribe(filter)
    }

    /// Request a transfer. The session is queued if every orchestration
    /// slot is busy; it is never rejected unless the service is shutting
    /// down.
    pub fn submit(&self, request: ContentRequest) -> FerryResult<TransferHandle> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(FerryError::ShuttingDown);
        }

        let id = self.inner.ids.next_id();
        let plan = self.inner.selector.select(&request);
        let session = TransferSession::new(id, request);
        let cancel = self.inner.shutdown.child_token();
        let (reply, report) = oneshot::channel();

        self.inner.controls.lock().insert(
            id,
            Control {
                cancel: cancel.clone(),
                pending: Arc::new(session.clone()),
            },
        );
        self.inner.stats.record_submitted();
        debug!(session = %id, plan = ?plan, "transfer queued");

        self.inner.admission.lock().queue.push_back(Job {
            session,
            plan: plan.clone(),
            cancel,
            reply,
        });
        ServiceInner::dispatch(&self.inner);

        Ok(TransferHandle { id, plan, report })
    }

    /// Current snapshot of a queued, running or recently finished session
    pub fn status(&self, id: SessionId) -> FerryResult<Arc<TransferSession>> {
        if let Some(session) = self.inner.registry.lookup(id) {
            return Ok(session);
        }
        self.inner
            .controls
            .lock()
            .get(&id)
            .map(|control| Arc::clone(&control.pending))
            .ok_or(FerryError::SessionNotFound(id))
    }

    /// Cancel a session. Cancelling a session that already finished is a
    /// no-op, even once it has aged out of finished-session retention.
    /// Only ids this service never issued are `SessionNotFound`.
    pub fn cancel(&self, id: SessionId) -> FerryResult<()> {
        let token = self
            .inner
            .controls
            .lock()
            .get(&id)
            .map(|control| control.cancel.clone());

        let Some(token) = token else {
            // No control left means the orchestration already finished
            return if self.inner.ids.issued(id) {
                debug!(session = %id, "cancel of a finished session ignored");
                Ok(())
            } else {
                Err(FerryError::SessionNotFound(id))
            };
        };

        info!(session = %id, "cancel requested");
        token.cancel();

        // Still queued: finish it now instead of waiting for a slot
        let queued = {
            let mut admission = self.inner.admission.lock();
            admission
                .queue
                .iter()
                .position(|job| job.session.id() == id)
                .and_then(|index| admission.queue.remove(index))
        };
        if let Some(job) = queued {
            ServiceInner::launch(&self.inner, job, false);
        }
        Ok(())
    }

    /// Sessions currently being orchestrated
    pub fn list_active(&self) -> Vec<Arc<TransferSession>> {
        self.inner.registry.list_active()
    }

    /// Sessions waiting for a slot, in admission order
    pub fn list_queued(&self) -> Vec<Arc<TransferSession>> {
        let queued: Vec<SessionId> = self
            .inner
            .admission
            .lock()
            .queue
            .iter()
            .map(|job| job.session.id())
            .collect();
        let controls = self.inner.controls.lock();
        queued
            .iter()
            .filter_map(|id| controls.get(id).map(|c| Arc::clone(&c.pending)))
            .collect()
    }

    /// Re-publish an event raised by a collaborator (content store, pin
    /// manager). Core lifecycle kinds are rejected.
    pub fn republish(&self, event: NotificationEvent) -> FerryResult<usize> {
        if !event.kind.is_external() {
            return Err(FerryError::NotExternalEvent(event.kind));
        }
        Ok(self.inner.bus.publish(event))
    }

    pub fn stats(&self) -> RuntimeStats {
        let mut stats = self.inner.stats.snapshot();
        stats.active = self.inner.registry.len();
        stats.queued = self.inner.admission.lock().queue.len();
        stats.bus = self.inner.bus.stats();
        stats
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Stop accepting transfers, let running sessions finish for up to
    /// `drain_timeout`, cancel whatever is left, then close the bus.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        if !inner.closed.swap(true, Ordering::AcqRel) {
            info!("transfer service shutting down");
        }
        inner.tracker.close();

        let queued = inner.admission.lock().queue.len();
        if queued > 0 || !inner.tracker.is_empty() {
            let drained =
                tokio::time::timeout(inner.config.drain_timeout, Self::drain(inner)).await;
            if drained.is_err() {
                warn!(
                    active = inner.registry.len(),
                    "drain timeout elapsed, cancelling remaining sessions"
                );
                inner.shutdown.cancel();
                let leftovers: Vec<Job> = inner.admission.lock().queue.drain(..).collect();
                for job in leftovers {
                    ServiceInner::launch(inner, job, false);
                }
                Self::drain(inner).await;
            }
        }

        inner.bus.close();
        info!("transfer service stopped");
    }

    async fn drain(inner: &Arc<ServiceInner>) {
        // Queued jobs are launched from running tasks, so the tracker stays
        // busy until the queue is empty.
        inner.tracker.wait().await;
    }
}

impl ServiceInner {
    /// Start queued sessions while slots are free
    fn dispatch(inner: &Arc<ServiceInner>) {
        let ready: Vec<Job> = {
            let mut admission = inner.admission.lock();
            let mut ready = Vec::new();
            while admission.running < inner.config.max_concurrent_sessions {
                let Some(job) = admission.queue.pop_front() else {
                    break;
                };
                admission.running += 1;
                ready.push(job);
            }
            ready
        };
        for job in ready {
            Self::launch(inner, job, true);
        }
    }

    /// Spawn the orchestration of one session. `admitted` jobs hold a slot
    /// and hand it to the next queued session when done.
    fn launch(inner: &Arc<ServiceInner>, job: Job, admitted: bool) {
        let service = Arc::clone(inner);
        inner.tracker.spawn(async move {
            let Job {
                session,
                plan,
                cancel,
                reply,
            } = job;
            let id = session.id();
            let report = service.orchestrator.run(session, plan, cancel).await;

            service.controls.lock().remove(&id);
            if reply.send(report).is_err() {
                debug!(session = %id, "transfer handle dropped before completion");
            }

            if admitted {
                service.admission.lock().running -= 1;
                Self::dispatch(&service);
            }
        });
    }
}
