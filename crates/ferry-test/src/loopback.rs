//! Loopback transports backed by a content store
//!
//! Reads content from a [`ContentStore`] chunk by chunk, pacing each chunk
//! and reporting progress like a real transport. With a chaos link
//! attached, every chunk also reports a link quality sample.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tracing::debug;

use ferry_core::{ContentRequest, TransportKind};
use ferry_transport::{AttemptContext, ContentStore, Payload, Transport, TransportOutcome};

use crate::ChaosLink;

/// Store-backed transport adapter
pub struct LoopbackTransport {
    kind: TransportKind,
    store: Arc<dyn ContentStore>,
    chunk_delay: Duration,
    link: Option<Mutex<ChaosLink>>,
}

impl LoopbackTransport {
    pub fn new(kind: TransportKind, store: Arc<dyn ContentStore>) -> Self {
        LoopbackTransport {
            kind,
            store,
            chunk_delay: Duration::from_millis(5),
            link: None,
        }
    }

    /// Pause between chunks
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Report link quality through `link` after every chunk
    pub fn with_link(mut self, link: ChaosLink) -> Self {
        self.link = Some(Mutex::new(link));
        self
    }

    fn report_link(&self, ctx: &AttemptContext) {
        if let Some(link) = &self.link {
            let sample = link.lock().sample();
            ctx.report_metric(sample.rtt_ms, sample.loss_rate, sample.throughput_bps);
        }
    }

    /// Pace one chunk; false if the attempt was cancelled meanwhile
    async fn pace(&self, ctx: &AttemptContext) -> bool {
        tokio::select! {
            _ = ctx.cancelled() => false,
            _ = tokio::time::sleep(self.chunk_delay) => true,
        }
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn attempt(
        &self,
        request: &ContentRequest,
        _timeout: Duration,
        ctx: AttemptContext,
    ) -> TransportOutcome {
        let payload = match self.store.resolve(request.content()).await {
            Ok(payload) => payload,
            Err(e) => return TransportOutcome::Errored(e.to_string()),
        };
        let total = self.store.size_of(request.content()).await;

        let mut received = BytesMut::new();
        match payload {
            Payload::Bytes(bytes) => {
                if !self.pace(&ctx).await {
                    return TransportOutcome::Errored("cancelled".into());
                }
                received.extend_from_slice(&bytes);
                ctx.report_progress(received.len() as u64, total);
                self.report_link(&ctx);
            }
            Payload::Stream(mut stream) => {
                while let Some(chunk) = stream.next_chunk().await {
                    if !self.pace(&ctx).await {
                        return TransportOutcome::Errored("cancelled".into());
                    }
                    received.extend_from_slice(&chunk);
                    ctx.report_progress(received.len() as u64, total);
                    self.report_link(&ctx);
                }
            }
        }

        debug!(transport = %self.kind, bytes = received.len(), "loopback delivered");
        TransportOutcome::Delivered(Payload::Bytes(Bytes::from(received)))
    }
}
