//! Scan and stream example
//!
//! Demonstrates a full telemetry session:
//! - Scanning for the synthesizer board and the glove
//! - Watching connection state changes
//! - Streaming synthetic face-tracking frames at 20 Hz
//!
//! Run with: cargo run --example scan_and_stream
//!
//! To stream for a fixed number of seconds:
//!   cargo run --example scan_and_stream -- --seconds 30

use facesynth_link::{
    ConnectionEvent, Result, SendOutcome, SensorSample, SessionConfig, SessionManager,
};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("warn,facesynth_link=debug")
        .init();

    println!("Face Telemetry Stream");
    println!("=====================\n");

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let seconds = args
        .iter()
        .position(|arg| arg == "--seconds")
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(20);

    let config = SessionConfig::default();
    println!(
        "Looking for '{}' and '{}' for {:?}...\n",
        config.identities.primary_name, config.identities.auxiliary_name, config.scan_timeout
    );

    let session = SessionManager::with_btleplug(config).await?;

    let _connection_callback = session.on_connection_changed(|event: &ConnectionEvent| {
        println!(
            "  {} peripheral {} is now {}",
            event.role, event.identifier, event.state
        );
    });

    let mut interval = tokio::time::interval(Duration::from_millis(50));
    let ticks = seconds * 20;

    for tick in 0..ticks {
        interval.tick().await;

        // Sweep every channel through its range
        let phase = (tick as f32 / 40.0).sin() * 0.5 + 0.5;
        let sample = SensorSample::new(0.2 + phase * 0.8, phase, -0.8 + phase);

        if let SendOutcome::Dropped(reason) = session.send_sample(sample) {
            if tick % 20 == 0 {
                println!("  Waiting for synthesizer ({:?})", reason);
            }
        }
    }

    let stats = session.telemetry_stats();
    println!("\n=== Session Summary ===");
    println!("Frames written:   {}", stats.frames_written);
    println!("Frames dropped:   {}", stats.frames_dropped);
    println!("Write failures:   {}", stats.write_failures);
    println!("Glove samples:    {}", stats.samples_received);
    println!("Last glove value: {}", session.last_inbound_value());

    session.shutdown();
    Ok(())
}
