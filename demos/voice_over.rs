//! Voice-over demonstration.
//!
//! Demonstrates:
//! - Building a bridge with an audio sink
//! - Reading a thread message aloud through the host socket
//! - Stopping playback
//!
//! The sink here only counts samples; a real embedder hands them to an
//! audio device.
//!
//! Usage:
//!   cargo run --example voice_over -- --message 2
//!   cargo run --example voice_over -- --message 2 --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Context;

use common::Args;
use cplx_bridge::{
    AudioSink, Bridge, PcmChunk, PendingServer, QueryBoxSnapshot, Settings, TtsVoice,
};

// ============================================================================
// CountingSink
// ============================================================================

#[derive(Default)]
struct CountingSink {
    samples: AtomicUsize,
}

impl AudioSink for CountingSink {
    fn push(&self, chunk: PcmChunk) {
        self.samples.fetch_add(chunk.samples.len(), Ordering::Relaxed);
    }

    fn stop(&self) {
        println!("        ✓ Sink stopped");
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    common::init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    println!("=== Voice-over ===\n");

    let server = PendingServer::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).await?;
    println!("[Setup] Point the page relay at {}", server.ws_url());
    let channel = server.accept().await.context("accepting page relay")?;

    let sink = Arc::new(CountingSink::default());
    let bridge = Bridge::builder()
        .settings(Arc::new(Settings::default()))
        .query_box(Arc::new(QueryBoxSnapshot::default()))
        .audio_sink(Arc::clone(&sink) as Arc<dyn AudioSink>)
        .build(channel)?;

    println!("[Speak] Reading message {}...", args.message_index);
    bridge
        .speak_message(args.message_index, Some(TtsVoice::Kate))
        .await
        .with_context(|| format!("speaking message {}", args.message_index))?;

    let samples = sink.samples.load(Ordering::Relaxed);
    println!(
        "        ✓ {samples} samples ({:.1}s)",
        samples as f64 / f64::from(cplx_bridge::audio::SAMPLE_RATE)
    );

    bridge.stop_speaking();
    bridge.shutdown();
    println!("\n=== Done ===");
    Ok(())
}
