//! Transport capability contract
//!
//! Every concrete transport (media stack, socket server, peer-to-peer stack)
//! is adapted behind [`Transport`]. The orchestrator only ever holds
//! `Arc<dyn Transport>`.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ferry_core::{ContentRequest, QualityMetric, SessionId, TransportKind};

/// Default capacity of the per-attempt feedback channel
pub const DEFAULT_FEEDBACK_CAPACITY: usize = 64;

/// Result of one transport attempt
#[derive(Debug)]
pub enum TransportOutcome {
    /// Content delivered, either whole or as a stream
    Delivered(Payload),
    /// The transport gave up waiting
    TimedOut,
    /// The transport cannot serve this request right now
    Unavailable,
    /// Anything else, with a transport-specific detail
    Errored(String),
}

impl TransportOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, TransportOutcome::Delivered(_))
    }
}

/// Delivered content
#[derive(Debug)]
pub enum Payload {
    Bytes(Bytes),
    Stream(ContentStream),
}

impl Payload {
    /// Drain the payload into one contiguous buffer
    pub async fn into_bytes(self) -> Bytes {
        match self {
            Payload::Bytes(bytes) => bytes,
            Payload::Stream(stream) => stream.collect().await,
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Payload::Stream(_))
    }
}

/// Receiving half of a streamed delivery
#[derive(Debug)]
pub struct ContentStream {
    rx: mpsc::Receiver<Bytes>,
}

/// Sending half of a streamed delivery, held by the transport
pub type ContentStreamWriter = mpsc::Sender<Bytes>;

impl ContentStream {
    /// Create a bounded stream; the writer side blocks when the consumer
    /// falls `capacity` chunks behind.
    pub fn channel(capacity: usize) -> (ContentStreamWriter, ContentStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, ContentStream { rx })
    }

    /// Next chunk, or `None` once the writer is gone
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    pub async fn collect(mut self) -> Bytes {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.rx.recv().await {
            buf.extend_from_slice(&chunk);
        }
        buf.freeze()
    }
}

/// Feedback a transport reports while an attempt is in flight
#[derive(Clone, Debug, PartialEq)]
pub enum AttemptFeedback {
    Progress { transferred: u64, total: Option<u64> },
    Metric(QualityMetric),
}

/// Feedback receiver held by the orchestrator
pub type FeedbackReceiver = mpsc::Receiver<AttemptFeedback>;

/// Per-attempt context handed to a transport.
///
/// Carries the cancellation token the transport must honour (best effort)
/// and a non-blocking feedback channel back to the orchestrator.
#[derive(Clone, Debug)]
pub struct AttemptContext {
    session: SessionId,
    transport: TransportKind,
    cancel: CancellationToken,
    feedback: mpsc::Sender<AttemptFeedback>,
}

impl AttemptContext {
    pub fn new(
        session: SessionId,
        transport: TransportKind,
        cancel: CancellationToken,
        feedback_capacity: usize,
    ) -> (Self, FeedbackReceiver) {
        let (feedback, rx) = mpsc::channel(feedback_capacity.max(1));
        (
            AttemptContext {
                session,
                transport,
                cancel,
                feedback,
            },
            rx,
        )
    }

    pub fn session_id(&self) -> SessionId {
        self.session
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the attempt has been cancelled
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Report bytes moved so far. Never blocks; returns false if the
    /// report was dropped because the orchestrator is behind.
    pub fn report_progress(&self, transferred: u64, total: Option<u64>) -> bool {
        self.feedback
            .try_send(AttemptFeedback::Progress { transferred, total })
            .is_ok()
    }

    /// Report a network quality sample for this session. Never blocks.
    pub fn report_metric(&self, rtt_ms: f64, loss_rate: f64, throughput_bps: f64) -> bool {
        let metric = QualityMetric::new(self.session, rtt_ms, loss_rate, throughput_bps);
        self.feedback.try_send(AttemptFeedback::Metric(metric)).is_ok()
    }
}

/// Uniform send/receive capability every transport adapter satisfies
#[async_trait]
pub trait Transport: Send + Sync {
    /// Which transport this adapter drives
    fn kind(&self) -> TransportKind;

    /// Deliver the requested content within `timeout`.
    ///
    /// Implementations should watch `ctx.cancel_token()` and return promptly
    /// once it fires; the orchestrator also drops the future on cancel.
    async fn attempt(
        &self,
        request: &ContentRequest,
        timeout: Duration,
        ctx: AttemptContext,
    ) -> TransportOutcome;
}
