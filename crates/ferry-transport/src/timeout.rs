//! Attempt timeout derivation
//!
//! timeout = base(transport) + size_in_MiB × per_mebibyte, capped at `max`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use ferry_core::{FerryError, FerryResult, TransportKind};

const MIB: f64 = 1024.0 * 1024.0;

/// Per-transport attempt timeouts
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutPolicy {
    /// Base timeout for the peer-to-peer stream
    #[serde(with = "ferry_core::duration")]
    pub peer_stream: Duration,
    /// Base timeout for the socket channel
    #[serde(with = "ferry_core::duration")]
    pub socket_channel: Duration,
    /// Base timeout for the media transport
    #[serde(with = "ferry_core::duration")]
    pub media_transport: Duration,
    /// Extra allowance per MiB of estimated content size
    #[serde(with = "ferry_core::duration")]
    pub per_mebibyte: Duration,
    /// Hard ceiling for any single attempt
    #[serde(with = "ferry_core::duration")]
    pub max: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        TimeoutPolicy {
            peer_stream: Duration::from_secs(30),
            socket_channel: Duration::from_secs(5),
            media_transport: Duration::from_secs(10),
            per_mebibyte: Duration::from_millis(200),
            max: Duration::from_secs(600),
        }
    }
}

impl TimeoutPolicy {
    pub fn base(&self, transport: TransportKind) -> Duration {
        match transport {
            TransportKind::PeerStream => self.peer_stream,
            TransportKind::SocketChannel => self.socket_channel,
            TransportKind::MediaTransport => self.media_transport,
        }
    }

    /// Bounded timeout for one attempt of `transport` moving `size` bytes
    pub fn timeout_for(&self, transport: TransportKind, size: u64) -> Duration {
        let secs = self.per_mebibyte.as_secs_f64() * (size as f64 / MIB);
        let allowance = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);
        self.base(transport).saturating_add(allowance).min(self.max)
    }

    pub fn validate(&self) -> FerryResult<()> {
        for kind in TransportKind::FALLBACK_ORDER {
            let base = self.base(kind);
            if base.is_zero() {
                return Err(FerryError::Config(format!("{kind} base timeout is zero")));
            }
            if base > self.max {
                return Err(FerryError::Config(format!(
                    "{kind} base timeout {:?} exceeds max {:?}",
                    base, self.max
                )));
            }
        }
        Ok(())
    }
}
