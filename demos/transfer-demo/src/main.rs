//! Ferry Transfer Demo
//!
//! Runs three transfers against in-memory loopback transports:
//! - A streamed video over the media transport on a poor link
//! - A small urgent document over the socket channel
//! - A data archive whose preferred transport is missing, so it falls back
//!
//! Pass a JSON config path as the first argument to override the defaults.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use ferry_core::{ContentId, ContentRequest, MediaKind, Priority, TransportKind};
use ferry_notify::{Delivery, EventFilter};
use ferry_runtime::{init_tracing, FerryConfig, LogFormat, TransferService};
use ferry_test::{ChaosConfig, ChaosLink, LoopbackTransport};
use ferry_transport::{ContentStore, MemoryContentStore, TransportSet};

const KIB: usize = 1024;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(LogFormat::Pretty);

    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║           Ferry Transfer Demo                              ║");
    println!("║     Protocol selection, fallback and quality control       ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    println!();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            println!("Loading config from {}", path);
            FerryConfig::from_file(path)?
        }
        None => FerryConfig::default(),
    };

    // Content
    let store = Arc::new(MemoryContentStore::with_streaming(64 * KIB, 16 * KIB));
    let video = ContentId::from("holiday-video");
    let document = ContentId::from("boarding-pass");
    let archive = ContentId::from("photo-archive");
    store.put(video.clone(), Bytes::from(vec![0x56u8; 256 * KIB]));
    store.put(document.clone(), Bytes::from_static(b"GATE 12 SEAT 4A"));
    store.put(archive.clone(), Bytes::from(vec![0x41u8; 512 * KIB]));

    // Transports; no peer-to-peer adapter, so archives have to fall back
    let shared: Arc<dyn ContentStore> = store.clone();
    let transports = TransportSet::new()
        .with(Arc::new(
            LoopbackTransport::new(TransportKind::MediaTransport, Arc::clone(&shared))
                .with_chunk_delay(Duration::from_millis(50))
                .with_link(ChaosLink::new(ChaosConfig::poor(), 2024)),
        ))
        .with(Arc::new(
            LoopbackTransport::new(TransportKind::SocketChannel, shared)
                .with_chunk_delay(Duration::from_millis(2)),
        ));

    let service = TransferService::new(config, transports)?;

    let listener = service
        .bus()
        .spawn_listener(EventFilter::all(), |delivery| -> Result<(), serde_json::Error> {
            match delivery {
                Delivery::Event(event) => {
                    let session = event
                        .session
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "-".into());
                    println!(
                        "  [{:>18}] session {:>3}  {}",
                        event.kind.as_str(),
                        session,
                        serde_json::to_string(&event.payload)?
                    );
                    Ok(())
                }
                Delivery::Dropped(n) => {
                    println!("  ({} events dropped)", n);
                    Ok(())
                }
            }
        });

    // Declared as MIME types, the way uploads arrive
    let requests = vec![
        ContentRequest::new(video, MediaKind::from_declared("video/mp4"), 256 * KIB as u64)
            .with_streaming_consumer(true),
        ContentRequest::new(document, MediaKind::from_declared("application/pdf"), 15)
            .with_priority(Priority::High),
        ContentRequest::new(
            archive,
            MediaKind::from_declared("application/zip"),
            512 * KIB as u64,
        ),
    ];

    let mut handles = Vec::new();
    for request in requests {
        let handle = service.submit(request)?;
        let plan: Vec<&str> = handle.plan().iter().map(|t| t.name()).collect();
        println!("Submitted session {} with plan [{}]", handle.id(), plan.join(", "));
        handles.push(handle);
    }
    println!();

    for handle in handles {
        let report = handle.outcome().await?;
        let session = &report.session;
        if report.is_success() {
            let bytes = match report.delivery {
                Some(payload) => payload.into_bytes().await.len(),
                None => 0,
            };
            println!(
                "Session {} delivered {} bytes over {} after {} attempt(s)",
                session.id(),
                bytes,
                session.current_transport().map(|t| t.name()).unwrap_or("?"),
                session.attempts().len()
            );
            if let Some(bitrate) = session.bitrate() {
                println!("  final bitrate {:?}", bitrate);
            }
        } else {
            println!("Session {} failed: {:?}", session.id(), report.failure_reasons());
        }
    }

    service.shutdown().await;
    let rejected = listener.join().await;

    let stats = service.stats();
    println!();
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║  Runtime stats                                             ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    println!("  submitted:         {}", stats.submitted);
    println!("  succeeded:         {}", stats.succeeded);
    println!("  exhausted:         {}", stats.exhausted);
    println!("  attempts:          {}", stats.attempts);
    println!("  quality anomalies: {}", stats.quality_anomalies);
    println!("  events published:  {}", stats.bus.published);
    println!("  listener errors:   {}", rejected);

    Ok(())
}
