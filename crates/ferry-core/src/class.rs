//! Transport, media and priority classes
//!
//! Ferry moves content over three interchangeable transports:
//! - PeerStream: direct peer-to-peer stream, the general-purpose default
//! - SocketChannel: persistent duplex socket, cheapest to set up
//! - MediaTransport: real-time media transport, the only streaming one

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Transport a transfer attempt runs over
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Direct peer-to-peer stream
    PeerStream,
    /// Persistent duplex socket channel
    SocketChannel,
    /// Real-time media transport
    MediaTransport,
}

impl TransportKind {
    /// Fixed fallback priority order
    pub const FALLBACK_ORDER: [TransportKind; 3] = [
        TransportKind::PeerStream,
        TransportKind::SocketChannel,
        TransportKind::MediaTransport,
    ];

    /// Short stable name used in logs and events
    pub fn name(self) -> &'static str {
        match self {
            TransportKind::PeerStream => "p2p",
            TransportKind::SocketChannel => "socket",
            TransportKind::MediaTransport => "media",
        }
    }

    /// Streaming transports get quality control while attempting
    pub fn is_streaming(self) -> bool {
        matches!(self, TransportKind::MediaTransport)
    }

    /// Position in the fixed fallback order (lower = tried earlier)
    pub fn fallback_rank(self) -> u8 {
        match self {
            TransportKind::PeerStream => 0,
            TransportKind::SocketChannel => 1,
            TransportKind::MediaTransport => 2,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "p2p" | "peer_stream" => Ok(TransportKind::PeerStream),
            "socket" | "socket_channel" => Ok(TransportKind::SocketChannel),
            "media" | "media_transport" => Ok(TransportKind::MediaTransport),
            other => Err(format!("unknown transport: {other}")),
        }
    }
}

/// Declared media kind of the content
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Audio,
    Video,
    Image,
    Document,
    Data,
    /// Anything the declaration did not let us recognise
    #[default]
    Unknown,
}

impl MediaKind {
    /// Audio and video are the media kinds eligible for streaming
    pub fn is_media(self) -> bool {
        matches!(self, MediaKind::Audio | MediaKind::Video)
    }

    /// Classify a declared kind: either a bare name ("video") or a MIME
    /// type ("video/mp4", "application/pdf").
    pub fn from_declared(declared: &str) -> Self {
        let declared = declared.trim().to_ascii_lowercase();
        let top = declared.split('/').next().unwrap_or_default();
        match top {
            "audio" => MediaKind::Audio,
            "video" => MediaKind::Video,
            "image" => MediaKind::Image,
            "document" | "text" => MediaKind::Document,
            "data" => MediaKind::Data,
            "application" => match declared.split('/').nth(1) {
                Some("pdf") | Some("msword") | Some("rtf") => MediaKind::Document,
                Some(_) => MediaKind::Data,
                None => MediaKind::Unknown,
            },
            _ => MediaKind::Unknown,
        }
    }
}

/// Request priority tier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_order_matches_rank() {
        let ranks: Vec<u8> = TransportKind::FALLBACK_ORDER
            .iter()
            .map(|k| k.fallback_rank())
            .collect();
        assert_eq!(ranks, vec![0, 1, 2]);
    }

    #[test]
    fn test_only_media_transport_streams() {
        assert!(TransportKind::MediaTransport.is_streaming());
        assert!(!TransportKind::PeerStream.is_streaming());
        assert!(!TransportKind::SocketChannel.is_streaming());
    }

    #[test]
    fn test_transport_names_parse() {
        assert_eq!("p2p".parse::<TransportKind>(), Ok(TransportKind::PeerStream));
        assert_eq!(
            "media_transport".parse::<TransportKind>(),
            Ok(TransportKind::MediaTransport)
        );
        assert!("carrier-pigeon".parse::<TransportKind>().is_err());
    }

    #[test]
    fn test_media_kind_from_declared() {
        assert_eq!(MediaKind::from_declared("video/mp4"), MediaKind::Video);
        assert_eq!(MediaKind::from_declared("Audio"), MediaKind::Audio);
        assert_eq!(MediaKind::from_declared("application/pdf"), MediaKind::Document);
        assert_eq!(
            MediaKind::from_declared("application/octet-stream"),
            MediaKind::Data
        );
        assert_eq!(MediaKind::from_declared("hologram"), MediaKind::Unknown);
        assert!(MediaKind::Video.is_media());
        assert!(!MediaKind::Document.is_media());
    }
}
