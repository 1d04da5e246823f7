//! Relay configuration.
//!
//! Every policy value the relay depends on lives here with its default, so the
//! binary can override any of them from the command line.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use uuid::Uuid;

use crate::ble::uuids::*;
use crate::diagnostics::Verbosity;
use crate::error::{Error, Result};

/// Default bit-rate of the output serial port.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default advertised name of the target device.
pub const DEFAULT_DEVICE_NAME: &str = "BDM";

/// Advertisement descriptor carrying the device name.
pub const LOCAL_NAME_DESCRIPTOR: &str = "Complete Local Name";

/// Hardware address of a BLE peripheral.
///
/// Kept as normalized text (trimmed, upper-case) so it compares equal to the
/// `AA:BB:CC:DD:EE:FF` rendering BLE stacks report.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceAddress(String);

impl DeviceAddress {
    /// Get the address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether a stack-reported address refers to this device.
    pub fn matches(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other.trim())
    }
}

impl FromStr for DeviceAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidParameter {
                name: "address".to_string(),
                value: s.to_string(),
            });
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Recognizes the target device among advertising peers.
///
/// Matches an advertisement record whose descriptor and value are both
/// exactly equal to the filter's.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanFilter {
    /// Advertisement record descriptor, e.g. `Complete Local Name`.
    pub descriptor: String,
    /// Expected record value.
    pub value: String,
}

impl ScanFilter {
    /// Create a filter on an arbitrary descriptor.
    pub fn new(descriptor: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            descriptor: descriptor.into(),
            value: value.into(),
        }
    }

    /// Create a filter matching the advertised local name.
    pub fn local_name(name: impl Into<String>) -> Self {
        Self::new(LOCAL_NAME_DESCRIPTOR, name)
    }

    /// Check a single advertisement record against the filter.
    pub fn matches(&self, descriptor: &str, value: &str) -> bool {
        self.descriptor == descriptor && self.value == value
    }
}

impl Default for ScanFilter {
    fn default() -> Self {
        Self::local_name(DEFAULT_DEVICE_NAME)
    }
}

impl fmt::Display for ScanFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {:?}", self.descriptor, self.value)
    }
}

/// Bounded waits and delays used by the relay loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Timing {
    /// Length of one discovery scan window.
    pub scan_timeout: Duration,
    /// Upper bound for establishing a connection.
    pub connect_timeout: Duration,
    /// How long to block waiting for one notification.
    pub notification_wait: Duration,
    /// Pause between failed discovery/connect attempts.
    pub retry_delay: Duration,
}

impl Timing {
    /// Default scan window (1 second).
    pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(1);
    /// Default connect bound (10 seconds).
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    /// Default notification wait (1 second).
    pub const DEFAULT_NOTIFICATION_WAIT: Duration = Duration::from_secs(1);
    /// Default retry delay (500 ms).
    pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            scan_timeout: Self::DEFAULT_SCAN_TIMEOUT,
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
            notification_wait: Self::DEFAULT_NOTIFICATION_WAIT,
            retry_delay: Self::DEFAULT_RETRY_DELAY,
        }
    }
}

/// Where notifications come from and how they are armed.
///
/// The relay speaks ATT handles; stacks that address characteristics by UUID
/// use [`GattLayout::uuid_for_handle`] and [`GattLayout::handle_for_uuid`] to
/// translate.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GattLayout {
    /// Service containing the notify characteristic.
    pub service_uuid: Uuid,
    /// Characteristic that carries the telemetry notifications.
    pub notify_uuid: Uuid,
    /// Handle notifications are expected on.
    pub notify_handle: u16,
    /// Characteristic the arm handle belongs to.
    pub arm_uuid: Uuid,
    /// Handle written to arm notifications.
    pub arm_handle: u16,
    /// Bytes written to `arm_handle`.
    pub arm_payload: Vec<u8>,
}

impl GattLayout {
    /// Characteristic UUID behind a handle, if the layout knows it.
    ///
    /// A descriptor handle resolves to the characteristic that owns it.
    pub fn uuid_for_handle(&self, handle: u16) -> Option<Uuid> {
        if handle == self.notify_handle {
            Some(self.notify_uuid)
        } else if handle == self.arm_handle {
            Some(self.arm_uuid)
        } else {
            None
        }
    }

    /// Handle a notification from `uuid` is attributed to.
    ///
    /// Unknown sources map to the reserved handle, which never matches.
    pub fn handle_for_uuid(&self, uuid: &Uuid) -> u16 {
        if *uuid == self.notify_uuid {
            self.notify_handle
        } else {
            RESERVED_HANDLE
        }
    }

    /// Whether the arm write is the standard "enable notifications" CCCD write.
    pub fn arms_via_cccd(&self) -> bool {
        self.arm_uuid == self.notify_uuid
            && self.arm_handle != self.notify_handle
            && self.arm_payload == ENABLE_NOTIFICATION_VALUE
    }
}

impl Default for GattLayout {
    fn default() -> Self {
        Self {
            service_uuid: TELEMETRY_SERVICE_UUID,
            notify_uuid: TELEMETRY_NOTIFY_UUID,
            notify_handle: TELEMETRY_NOTIFY_HANDLE,
            arm_uuid: TELEMETRY_NOTIFY_UUID,
            arm_handle: TELEMETRY_CCCD_HANDLE,
            arm_payload: ENABLE_NOTIFICATION_VALUE.to_vec(),
        }
    }
}

/// Complete configuration of one bridge process.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BridgeConfig {
    /// BLE adapter name; `None` picks the first adapter.
    pub interface: Option<String>,
    /// Explicit target; `None` means discover by scanning.
    pub address: Option<DeviceAddress>,
    /// How to recognize the target while scanning.
    pub scan_filter: ScanFilter,
    /// Output sink path.
    pub port: String,
    /// Output sink bit-rate.
    pub baud_rate: u32,
    /// Diagnostics threshold.
    pub verbosity: Verbosity,
    /// Relay loop timing.
    pub timing: Timing,
    /// GATT handles used for arming and notifications.
    pub gatt: GattLayout,
}

impl BridgeConfig {
    /// Create a configuration writing to `port` with all other values defaulted.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            interface: None,
            address: None,
            scan_filter: ScanFilter::default(),
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            verbosity: Verbosity::default(),
            timing: Timing::default(),
            gatt: GattLayout::default(),
        }
    }

    /// Check the configuration before any resource is opened.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] for an empty port, a zero
    /// bit-rate, or a zero notification wait or retry delay (either would
    /// let the relay loop spin).
    pub fn validate(&self) -> Result<()> {
        if self.port.trim().is_empty() {
            return Err(invalid("port", &self.port));
        }
        if self.baud_rate == 0 {
            return Err(invalid("baud_rate", self.baud_rate));
        }
        if self.timing.notification_wait.is_zero() {
            return Err(invalid("notification_wait", "0s"));
        }
        if self.timing.retry_delay.is_zero() {
            return Err(invalid("retry_delay", "0s"));
        }
        Ok(())
    }
}

fn invalid(name: &str, value: impl ToString) -> Error {
    Error::InvalidParameter {
        name: name.to_string(),
        value: value.to_string(),
    }
}
