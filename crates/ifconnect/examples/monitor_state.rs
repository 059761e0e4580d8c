//! Monitor live aircraft state from a simulator on the LAN.
//!
//! Discovers a simulator instance, connects, registers a handful of state
//! variables for round-robin polling, and prints every refresh as it
//! arrives. Useful as a smoke test for the whole pipeline: discovery,
//! manifest negotiation, the poll loop, and event delivery.
//!
//! # Usage
//!
//! ```sh
//! cargo run -p ifconnect --example monitor_state
//! ```

use std::time::Duration;

use ifconnect::{Client, ClientEvent, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    println!("Waiting for a simulator announcement...");
    let instance = ifconnect::discovery::discover(Duration::from_secs(10)).await?;
    println!(
        "Found {} ({}) at {}:{}",
        instance.device_name, instance.version, instance.address, instance.port
    );

    let client = Client::connect(Config {
        host: Some(instance.address),
        poll_throttle: Duration::from_millis(100),
        ..Config::default()
    })
    .await?;

    let manifest = client.manifest().await.expect("manifest is loaded");
    println!("Manifest loaded: {} entries\n", manifest.len());

    let mut events = client.events();

    for name in [
        "aircraft/0/altitude_msl",
        "aircraft/0/heading_magnetic",
        "aircraft/0/groundspeed",
        "aircraft/0/on_ground",
    ] {
        match client.poll_register(name).await {
            Ok(()) => println!("Polling {name}"),
            Err(e) => println!("Skipping {name}: {e}"),
        }
    }

    println!("\nMonitoring for 30 seconds...\n");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }

        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Ok(ClientEvent::Data { name, value })) => {
                println!("{name:<32} = {value}");
            }
            Ok(Ok(ClientEvent::Reconnecting { session, attempt })) => {
                println!("({session} session reconnecting, attempt {attempt})");
            }
            Ok(Ok(ClientEvent::Reconnected { session })) => {
                println!("({session} session reconnected)");
            }
            Ok(Ok(ClientEvent::Disconnected)) => {
                println!("Connection lost.");
                break;
            }
            Ok(Ok(_)) => {}
            Ok(Err(tokio::sync::broadcast::error::RecvError::Lagged(n))) => {
                println!("(missed {n} events due to lag)");
            }
            Ok(Err(tokio::sync::broadcast::error::RecvError::Closed)) => break,
            Err(_) => break,
        }
    }

    client.close().await;
    println!("\nDone.");
    Ok(())
}
