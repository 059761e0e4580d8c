//! Read and change the aircraft callsign.
//!
//! Demonstrates one-shot reads, typed writes, and invoking a command with
//! named arguments against a simulator found by discovery.
//!
//! # Usage
//!
//! ```sh
//! cargo run -p ifconnect --example set_callsign -- NINJA
//! ```

use std::time::Duration;

use ifconnect::{Client, Config, Value};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let callsign = std::env::args().nth(1).unwrap_or_else(|| "NINJA".to_string());

    let instance = ifconnect::discovery::discover(Duration::from_secs(10)).await?;
    let client = Client::connect(Config {
        host: Some(instance.address),
        ..Config::default()
    })
    .await?;

    let before = client.get("aircraft/0/callsign").await?;
    println!("Current callsign: {before}");

    client
        .set("aircraft/0/callsign", Value::Text(callsign.clone()))
        .await?;
    println!("Callsign set to {callsign}");

    // Writes produce no response; read back to confirm.
    let after = client.get("aircraft/0/callsign").await?;
    println!("Readback: {after}");

    client.close().await;
    Ok(())
}
