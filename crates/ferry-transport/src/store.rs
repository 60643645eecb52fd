//! Content store interface
//!
//! The store and its addressing scheme live outside Ferry; transports only
//! need to resolve a content identifier to bytes or a stream.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use ferry_core::{ContentId, FerryError, FerryResult};

use crate::{ContentStream, Payload};

/// Read side of the content store
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Resolve content, or `ContentNotFound`
    async fn resolve(&self, id: &ContentId) -> FerryResult<Payload>;

    /// Size in bytes, if the store knows it without reading the content
    async fn size_of(&self, id: &ContentId) -> Option<u64>;
}

/// In-memory content store.
///
/// Content above `stream_threshold` bytes resolves to a chunked stream.
#[derive(Debug)]
pub struct MemoryContentStore {
    items: RwLock<HashMap<ContentId, Bytes>>,
    stream_threshold: usize,
    chunk_size: usize,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::with_streaming(usize::MAX, 64 * 1024)
    }

    pub fn with_streaming(stream_threshold: usize, chunk_size: usize) -> Self {
        MemoryContentStore {
            items: RwLock::new(HashMap::new()),
            stream_threshold,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Store content; returns true if the identifier was new
    pub fn put(&self, id: ContentId, data: impl Into<Bytes>) -> bool {
        self.items.write().insert(id, data.into()).is_none()
    }

    pub fn remove(&self, id: &ContentId) -> Option<Bytes> {
        self.items.write().remove(id)
    }

    pub fn contains(&self, id: &ContentId) -> bool {
        self.items.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    fn stream(&self, data: Bytes) -> Payload {
        let chunk_size = self.chunk_size;
        let chunks = data.len().div_ceil(chunk_size);
        let (tx, stream) = ContentStream::channel(chunks.clamp(1, 16));
        tokio::spawn(async move {
            let mut offset = 0;
            while offset < data.len() {
                let end = (offset + chunk_size).min(data.len());
                if tx.send(data.slice(offset..end)).await.is_err() {
                    break; // Consumer dropped
                }
                offset = end;
            }
        });
        Payload::Stream(stream)
    }
}

impl Default for MemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn resolve(&self, id: &ContentId) -> FerryResult<Payload> {
        let data = self
            .items
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| FerryError::ContentNotFound(id.clone()))?;

        if data.len() > self.stream_threshold {
            Ok(self.stream(data))
        } else {
            Ok(Payload::Bytes(data))
        }
    }

    async fn size_of(&self, id: &ContentId) -> Option<u64> {
        self.items.read().get(id).map(|d| d.len() as u64)
    }
}
