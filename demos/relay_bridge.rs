//! Relay bridge demonstration.
//!
//! Demonstrates:
//! - Binding the local relay server and accepting the page relay
//! - Building a bridge over the relay channel
//! - Installing the default policies
//! - Overriding the model of the next query
//! - Optional traffic inspection
//!
//! Usage:
//!   cargo run --example relay_bridge
//!   cargo run --example relay_bridge -- --inspect --debug
//!   cargo run --example relay_bridge -- --no-wait

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use anyhow::Context;
use parking_lot::RwLock;

use common::Args;
use cplx_bridge::policy::{inspect_long_polling_events, inspect_web_socket_events};
use cplx_bridge::{Bridge, PendingServer, QueryBoxSnapshot, Settings};

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
    println!("=== Relay Bridge ===\n");

    // ========================================================================
    // Setup
    // ========================================================================

    println!("[Setup] Binding relay server...");
    let server = PendingServer::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
        .await
        .context("binding relay server")?;
    println!("        ✓ Point the page relay at {}\n", server.ws_url());

    println!("[Setup] Waiting for the relay...");
    let channel = server.accept().await.context("accepting page relay")?;
    println!("        ✓ Relay connected\n");

    let settings = Arc::new(RwLock::new(Settings::default()));
    let query_box = Arc::new(RwLock::new(QueryBoxSnapshot {
        selected_language_model: "claude2".to_string(),
        focus_mode: "internet".to_string(),
        ..QueryBoxSnapshot::default()
    }));

    let bridge = Bridge::builder()
        .settings(settings)
        .query_box(query_box)
        .build(channel)
        .context("building bridge")?;

    // ========================================================================
    // Policies
    // ========================================================================

    let handles = bridge.install_default_policies();
    println!("[Policies] ✓ {} default policies installed", handles.len());

    if args.inspect {
        inspect_web_socket_events(bridge.messenger());
        inspect_long_polling_events(bridge.messenger());
        println!("[Policies] ✓ Traffic inspection on (use --debug to see it)");
    }

    let next = bridge.alter_next_query(Some("gpt4o".to_string()), true);
    println!("[Policies] ✓ Next query pinned to gpt4o (active={})\n", next.is_active());

    common::wait_for_exit(args.no_wait).await;

    bridge.shutdown();
    println!("\n=== Done ===");
    Ok(())
}
