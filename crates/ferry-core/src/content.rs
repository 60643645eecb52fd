//! Content transfer requests

use serde::Serialize;

use crate::{ContentId, MediaKind, Priority};

/// A request to deliver one piece of content.
///
/// Immutable once built; sessions hold it by value and hand out references.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ContentRequest {
    content: ContentId,
    kind: MediaKind,
    size_estimate: u64,
    priority: Priority,
    streaming_consumer: bool,
}

impl ContentRequest {
    pub fn new(content: ContentId, kind: MediaKind, size_estimate: u64) -> Self {
        ContentRequest {
            content,
            kind,
            size_estimate,
            priority: Priority::Normal,
            streaming_consumer: false,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Mark the consumer as able to play content while it arrives
    pub fn with_streaming_consumer(mut self, streaming: bool) -> Self {
        self.streaming_consumer = streaming;
        self
    }

    pub fn content(&self) -> &ContentId {
        &self.content
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Estimated size in bytes
    pub fn size_estimate(&self) -> u64 {
        self.size_estimate
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn streaming_consumer(&self) -> bool {
        self.streaming_consumer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let req = ContentRequest::new(ContentId::from("doc"), MediaKind::Document, 2048);
        assert_eq!(req.priority(), Priority::Normal);
        assert!(!req.streaming_consumer());
        assert_eq!(req.size_estimate(), 2048);
    }

    #[test]
    fn test_request_builder() {
        let req = ContentRequest::new(ContentId::from("clip"), MediaKind::Video, 50 << 20)
            .with_priority(Priority::High)
            .with_streaming_consumer(true);
        assert_eq!(req.priority(), Priority::High);
        assert!(req.streaming_consumer());
        assert_eq!(req.content(), &ContentId::from("clip"));
    }
}
