//! BLE service, characteristic and handle constants.
//!
//! Defaults for the FFF0 telemetry service most BLE multimeters expose.

use uuid::Uuid;

/// Telemetry service UUID.
pub const TELEMETRY_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_fff0_0000_1000_8000_00805f9b34fb);
/// Telemetry notify characteristic UUID (Notify).
pub const TELEMETRY_NOTIFY_UUID: Uuid = Uuid::from_u128(0x0000_fff4_0000_1000_8000_00805f9b34fb);
/// Client Characteristic Configuration descriptor UUID.
pub const CLIENT_CONFIG_DESCRIPTOR_UUID: Uuid =
    Uuid::from_u128(0x0000_2902_0000_1000_8000_00805f9b34fb);

/// ATT handle the device sends measurement notifications on.
pub const TELEMETRY_NOTIFY_HANDLE: u16 = 0x002e;
/// ATT handle of the notify characteristic's client configuration descriptor.
pub const TELEMETRY_CCCD_HANDLE: u16 = 0x002f;

/// CCCD value that enables notifications.
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// Handle 0x0000 is reserved by ATT; used for notifications from unmapped sources.
pub const RESERVED_HANDLE: u16 = 0x0000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_format() {
        assert!(TELEMETRY_SERVICE_UUID.to_string().contains("fff0"));
        assert!(TELEMETRY_NOTIFY_UUID.to_string().starts_with("0000fff4"));
        assert!(CLIENT_CONFIG_DESCRIPTOR_UUID.to_string().contains("2902"));
    }

    #[test]
    fn test_handles_are_adjacent() {
        // The CCCD follows its characteristic value in the attribute table.
        assert_eq!(TELEMETRY_CCCD_HANDLE, TELEMETRY_NOTIFY_HANDLE + 1);
        assert_ne!(TELEMETRY_NOTIFY_HANDLE, RESERVED_HANDLE);
    }
}
