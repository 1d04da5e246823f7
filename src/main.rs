//! `ble-serial-bridge` binary.
//!
//! Run with: ble-serial-bridge --port /dev/ttyUSB0 [--address AA:BB:CC:DD:EE:FF] [-v]

use anyhow::Context;
use clap::Parser as _;

use ble_serial_bridge::cli::Cli;
use ble_serial_bridge::{BtleplugTransport, Diagnostics, Relay, SerialSink};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_config()?;

    Diagnostics::new(config.verbosity)
        .install()
        .context("failed to install diagnostics")?;

    // Nothing to relay into without the sink, so it is opened before any BLE activity.
    let sink = SerialSink::open(&config.port, config.baud_rate)
        .with_context(|| format!("cannot open output port {}", config.port))?;

    let transport = BtleplugTransport::new(&config)
        .await
        .context("Bluetooth setup failed")?;

    let mut relay = Relay::new(transport, sink, &config);

    let handle = relay.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.stop();
        }
    });

    relay.run().await.context("relay stopped")?;

    Ok(())
}
