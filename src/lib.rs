//! # ble-serial-bridge
//!
//! Relays notifications from a Bluetooth Low Energy telemetry device (for
//! example a BLE multimeter) to a serial port, so software that expects a
//! serial device can read the measurements unchanged.
//!
//! The bridge forwards payload bytes verbatim. It does not interpret them.
//!
//! ## Features
//!
//! - **Discovery**: connect to an explicit address, or scan for the first
//!   device whose advertisement matches a (descriptor, value) filter
//! - **Arming**: one characteristic write to enable notifications
//! - **Filtering**: only notifications from the configured handle are relayed
//! - **Resilience**: any BLE failure sends the relay back to discovery; only
//!   an explicit stop ends it
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ble_serial_bridge::{BridgeConfig, BtleplugTransport, Relay, Result, SerialSink};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = BridgeConfig::new("/dev/ttyUSB0");
//!
//!     // Open the sink first: without it there is nothing to relay into.
//!     let sink = SerialSink::open(&config.port, config.baud_rate)?;
//!     let transport = BtleplugTransport::new(&config).await?;
//!
//!     let mut relay = Relay::new(transport, sink, &config);
//!     let handle = relay.handle();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         handle.stop();
//!     });
//!
//!     relay.run().await
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group and the
//! `dialout` group for the serial port. A `socat` pty pair works as a
//! virtual port.
//!
//! ### macOS
//! Hardware addresses are hidden; pass the platform identifier printed at
//! `-vv` as `--address`, or scan by name.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for configuration types

// Public modules
pub mod ble;
pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod relay;
pub mod router;
pub mod sink;

// Re-exports for convenience
pub use ble::{
    Advertisement, AdvertisementRecord, BleConnection, BleTransport, BtleplugTransport,
    NotificationEvent, ScanOutcome,
};
pub use config::{BridgeConfig, DeviceAddress, GattLayout, ScanFilter, Timing};
pub use diagnostics::{Diagnostics, Verbosity};
pub use error::{Error, Result};
pub use relay::{Relay, RelayHandle, RelayState, StateEvent};
pub use router::NotificationRouter;
pub use sink::{MemorySink, OutputSink, SerialSink};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that key types are exported
        let _ = std::any::TypeId::of::<Relay<BtleplugTransport, SerialSink>>();
        let _ = std::any::TypeId::of::<BridgeConfig>();
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<NotificationEvent>();
        let _ = std::any::TypeId::of::<NotificationRouter<MemorySink>>();
        let _ = std::any::TypeId::of::<Verbosity>();
    }
}
