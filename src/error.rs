//! Error types for the ble-serial-bridge crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// No adapter matches the requested interface name.
    #[error("Bluetooth adapter not found: {interface}")]
    AdapterNotFound {
        /// The interface name that was searched for.
        interface: String,
    },

    /// The target device is not known to the adapter.
    #[error("Device not found: {address}")]
    DeviceNotFound {
        /// The address that was searched for.
        address: String,
    },

    /// Failed to establish a connection to the device.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// The connection to the device was lost.
    #[error("Connection lost")]
    ConnectionLost,

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// An ATT handle that has no characteristic in the GATT layout.
    #[error("No characteristic mapped to handle {handle:#06x}")]
    UnmappedHandle {
        /// The handle that was requested.
        handle: u16,
    },

    /// A bounded BLE operation did not complete in time.
    #[error("Operation timed out: {operation}")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
    },

    /// The output sink could not be opened or written.
    #[error("Output sink error: {0}")]
    Sink(#[source] std::io::Error),

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },
}

impl Error {
    /// Whether the relay may recover from this error by reconnecting.
    ///
    /// Everything raised by the BLE layer is recoverable; only sink and
    /// configuration failures are not.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Sink(_) | Self::InvalidParameter { .. })
    }
}

impl From<tokio_serial::Error> for Error {
    fn from(e: tokio_serial::Error) -> Self {
        Self::Sink(e.into())
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(Error::ConnectionLost.is_recoverable());
        assert!(Error::Timeout { operation: "connect" }.is_recoverable());
        assert!(Error::BluetoothUnavailable.is_recoverable());
        assert!(!Error::Sink(std::io::Error::other("gone")).is_recoverable());
        assert!(!Error::InvalidParameter {
            name: "address".to_string(),
            value: String::new(),
        }
        .is_recoverable());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::UnmappedHandle { handle: 0x2e }.to_string(),
            "No characteristic mapped to handle 0x002e"
        );
        assert_eq!(
            Error::Timeout { operation: "connect" }.to_string(),
            "Operation timed out: connect"
        );
    }
}
