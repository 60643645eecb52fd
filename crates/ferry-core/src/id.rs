//! Identity types for Ferry
//!
//! Sessions are numbered with 64-bit identifiers; content is addressed by an
//! opaque, immutable byte key owned by the content store.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use serde::{Serialize, Serializer};

/// Transfer session identity - unique per request attempt
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
pub struct SessionId(pub u64);

impl SessionId {
    pub const ZERO: SessionId = SessionId(0);

    #[inline]
    pub fn new(id: u64) -> Self {
        SessionId(id)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Session({:016x})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Monotonic session identifier source.
///
/// Identifiers start at 1 so that `SessionId::ZERO` never names a live
/// session.
#[derive(Debug)]
pub struct SessionIdGenerator {
    first: u64,
    next: AtomicU64,
}

impl SessionIdGenerator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        SessionIdGenerator {
            first,
            next: AtomicU64::new(first),
        }
    }

    pub fn next_id(&self) -> SessionId {
        SessionId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Was `id` already handed out by this generator?
    pub fn issued(&self, id: SessionId) -> bool {
        id.0 >= self.first && id.0 < self.next.load(Ordering::Relaxed)
    }
}

impl Default for SessionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Content identity - opaque byte key understood only by the content store
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct ContentId(Bytes);

impl ContentId {
    pub fn new(key: impl Into<Bytes>) -> Self {
        ContentId(key.into())
    }

    pub fn from_static(key: &'static [u8]) -> Self {
        ContentId(Bytes::from_static(key))
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Lowercase hex rendering of the key
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        if hex.len() > 16 {
            write!(f, "Content({}…)", &hex[..16])
        } else {
            write!(f, "Content({})", hex)
        }
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for ContentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl From<&'static str> for ContentId {
    fn from(key: &'static str) -> Self {
        ContentId::from_static(key.as_bytes())
    }
}

impl From<Vec<u8>> for ContentId {
    fn from(key: Vec<u8>) -> Self {
        ContentId::new(key)
    }
}
