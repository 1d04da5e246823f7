//! BLE transport abstraction.
//!
//! The relay never talks to a BLE stack directly. It drives a
//! [`BleTransport`] to discover and connect, and a [`BleConnection`] to arm
//! and receive notifications.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use crate::config::DeviceAddress;
use crate::error::Result;

/// One (descriptor, value) record from a peer's advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisementRecord {
    /// Human-readable record type, e.g. `Complete Local Name`.
    pub descriptor: String,
    /// Record value rendered as text.
    pub value: String,
}

impl AdvertisementRecord {
    /// Create a record.
    pub fn new(descriptor: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            descriptor: descriptor.into(),
            value: value.into(),
        }
    }
}

/// A peer seen during a scan window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Peer address.
    pub address: DeviceAddress,
    /// Records the peer advertised.
    pub records: Vec<AdvertisementRecord>,
}

/// A notification received on a live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    /// ATT handle the notification was sent from.
    pub source_handle: u16,
    /// Notification value.
    pub payload: Bytes,
}

impl NotificationEvent {
    /// Create an event.
    pub fn new(source_handle: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            source_handle,
            payload: payload.into(),
        }
    }
}

/// Discovery and connection establishment.
#[async_trait]
pub trait BleTransport: Send + Sync {
    /// Live link type returned by [`BleTransport::connect`].
    type Connection: BleConnection;

    /// Listen for advertisements for `duration` and report every peer seen,
    /// in the order the stack enumerated them.
    async fn scan(&self, duration: Duration) -> Result<Vec<Advertisement>>;

    /// Open a link to `address` (public address type).
    async fn connect(&self, address: &DeviceAddress) -> Result<Self::Connection>;
}

/// A single live link, exclusively owned by its user.
#[async_trait]
pub trait BleConnection: Send {
    /// Write `payload` to the attribute at `handle`.
    async fn write_characteristic(&mut self, handle: u16, payload: &[u8]) -> Result<()>;

    /// Block up to `timeout` for the next notification.
    ///
    /// `Ok(None)` means the wait elapsed with nothing delivered, which is
    /// normal idle. Any `Err` means the link is no longer usable.
    async fn wait_for_notification(&mut self, timeout: Duration)
        -> Result<Option<NotificationEvent>>;

    /// Release the link. Errors are reported but the link is unusable
    /// afterwards either way.
    async fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }
}
