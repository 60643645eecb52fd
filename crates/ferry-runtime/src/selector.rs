//! Protocol Selector - ranks transports for a request
//!
//! Pure and deterministic: the same request and rules always give the same
//! plan. The primary transport comes from the first matching rule; the
//! other transports follow in the fixed fallback order.

use serde::{Deserialize, Serialize};

use ferry_core::{ContentRequest, FerryError, FerryResult, MediaKind, Priority, TransportKind};

/// Static selection rules
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorRules {
    /// Non-media content strictly below this size (bytes) is "small"
    pub small_size_threshold: u64,
}

impl Default for SelectorRules {
    fn default() -> Self {
        SelectorRules {
            small_size_threshold: 64 * 1024,
        }
    }
}

impl SelectorRules {
    pub fn validate(&self) -> FerryResult<()> {
        if self.small_size_threshold == 0 {
            return Err(FerryError::Selection(
                "small_size_threshold must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Chooses and orders transports for a request
#[derive(Clone, Debug, Default)]
pub struct ProtocolSelector {
    rules: SelectorRules,
}

impl ProtocolSelector {
    pub fn new(rules: SelectorRules) -> Self {
        ProtocolSelector { rules }
    }

    pub fn rules(&self) -> &SelectorRules {
        &self.rules
    }

    /// Primary transport for a request.
    ///
    /// Only recognised non-media kinds can take the socket rule; unknown
    /// content always starts on the peer-to-peer stream.
    pub fn primary(&self, request: &ContentRequest) -> TransportKind {
        let kind = request.kind();
        if kind.is_media() && request.streaming_consumer() {
            TransportKind::MediaTransport
        } else if matches!(kind, MediaKind::Image | MediaKind::Document | MediaKind::Data)
            && request.size_estimate() < self.rules.small_size_threshold
            && request.priority() == Priority::High
        {
            TransportKind::SocketChannel
        } else {
            TransportKind::PeerStream
        }
    }

    /// Ordered transport plan: primary first, then the fixed fallback order.
    ///
    /// Never fails and never repeats a transport.
    pub fn select(&self, request: &ContentRequest) -> Vec<TransportKind> {
        let primary = self.primary(request);
        let mut plan = Vec::with_capacity(TransportKind::FALLBACK_ORDER.len());
        plan.push(primary);
        plan.extend(
            TransportKind::FALLBACK_ORDER
                .iter()
                .copied()
                .filter(|k| *k != primary),
        );
        plan
    }
}
