//! BLE communication module.
//!
//! The transport traits the relay is written against, scan resolution, and
//! the btleplug implementation used by the binary.

pub mod btleplug_transport;
pub mod scanner;
pub mod transport;
pub mod uuids;

pub use btleplug_transport::{BtleplugConnection, BtleplugTransport};
pub use scanner::{find_match, resolve, ScanOutcome};
pub use transport::{
    Advertisement, AdvertisementRecord, BleConnection, BleTransport, NotificationEvent,
};
pub use uuids::*;
