//! Inbound monitor example
//!
//! Connects to the glove and prints every decoded value as it arrives.
//!
//! Run with: cargo run --example inbound_monitor

use facesynth_link::{InboundSample, Result, SessionConfig, SessionManager};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("warn,facesynth_link=info")
        .init();

    println!("Glove Monitor");
    println!("=============\n");

    let session = SessionManager::with_btleplug(SessionConfig::default()).await?;

    let _inbound_callback = session.on_inbound_sample(|sample: &InboundSample| {
        println!(
            "[{}] {} -> {}",
            sample.received_at.format("%H:%M:%S%.3f"),
            sample.peripheral,
            sample.value
        );
    });

    println!("Press Ctrl+C to stop\n");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = tokio::time::sleep(Duration::from_secs(300)) => {}
    }

    let stats = session.telemetry_stats();
    println!(
        "\n{} samples received, {} malformed",
        stats.samples_received, stats.malformed_samples
    );

    session.shutdown();
    Ok(())
}
