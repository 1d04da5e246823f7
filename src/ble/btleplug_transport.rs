//! `btleplug`-backed BLE transport.
//!
//! btleplug addresses characteristics by UUID and does not expose ATT
//! handles, so handles are translated through the configured [`GattLayout`].

use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    PeripheralProperties, ScanFilter as StackScanFilter, ValueNotification, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::{Stream, StreamExt};
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info, trace};

use crate::ble::transport::{
    Advertisement, AdvertisementRecord, BleConnection, BleTransport, NotificationEvent,
};
use crate::ble::uuids::CLIENT_CONFIG_DESCRIPTOR_UUID;
use crate::config::{BridgeConfig, DeviceAddress, GattLayout, LOCAL_NAME_DESCRIPTOR};
use crate::error::{Error, Result};

/// Descriptor for manufacturer-specific data records.
pub const MANUFACTURER_DESCRIPTOR: &str = "Manufacturer";
/// Descriptor for advertised service UUIDs.
pub const SERVICES_DESCRIPTOR: &str = "Complete 128b Services";
/// Descriptor for advertised transmit power.
pub const TX_POWER_DESCRIPTOR: &str = "Tx Power";

type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

/// Check whether an adapter description names `interface`.
///
/// BlueZ describes adapters as `hci0 (usb:v1D6Bp0246d0537)`; either the
/// full description or its first word selects the adapter.
pub fn adapter_matches(info: &str, interface: &str) -> bool {
    info == interface || info.split_whitespace().next() == Some(interface)
}

/// Render peripheral properties as (descriptor, value) advertisement records.
pub fn advertisement_records(properties: &PeripheralProperties) -> Vec<AdvertisementRecord> {
    let mut records = Vec::new();

    if let Some(name) = &properties.local_name {
        records.push(AdvertisementRecord::new(LOCAL_NAME_DESCRIPTOR, name.clone()));
    }

    let mut manufacturers: Vec<_> = properties.manufacturer_data.iter().collect();
    manufacturers.sort_by_key(|(id, _)| **id);
    for (id, data) in manufacturers {
        let mut value: String = id.to_le_bytes().iter().map(|b| format!("{:02x}", b)).collect();
        value.extend(data.iter().map(|b| format!("{:02x}", b)));
        records.push(AdvertisementRecord::new(MANUFACTURER_DESCRIPTOR, value));
    }

    for service in &properties.services {
        records.push(AdvertisementRecord::new(SERVICES_DESCRIPTOR, service.to_string()));
    }

    if let Some(tx_power) = properties.tx_power_level {
        records.push(AdvertisementRecord::new(TX_POWER_DESCRIPTOR, tx_power.to_string()));
    }

    records
}

/// Peripheral an adapter event reports as currently advertising.
fn advertising_peer(event: &CentralEvent) -> Option<&PeripheralId> {
    match event {
        CentralEvent::DeviceDiscovered(id)
        | CentralEvent::DeviceUpdated(id)
        | CentralEvent::ManufacturerDataAdvertisement { id, .. }
        | CentralEvent::ServiceDataAdvertisement { id, .. }
        | CentralEvent::ServicesAdvertisement { id, .. } => Some(id),
        _ => None,
    }
}

/// Remember `id` once, keeping first-sighting order.
fn note_sighting<I: PartialEq>(seen: &mut Vec<I>, id: I) {
    if !seen.contains(&id) {
        seen.push(id);
    }
}

/// Pass `result` through, tearing the link down first if it is an error.
async fn disconnect_on_error<T, E, F>(result: Result<T>, disconnect: F) -> Result<T>
where
    F: Future<Output = std::result::Result<(), E>>,
    E: Display,
{
    if let Err(e) = &result {
        match disconnect.await {
            Ok(()) => debug!("Disconnected after failed setup: {}", e),
            Err(de) => debug!("Disconnect after failed setup ({}) failed: {}", e, de),
        }
    }
    result
}

/// Address a peripheral is known by.
///
/// Platforms that hide hardware addresses (macOS) report an all-zero
/// address; the platform identifier stands in for it there.
fn peripheral_address(peripheral: &Peripheral) -> String {
    let address = peripheral.address();
    if address == BDAddr::default() {
        peripheral.id().to_string()
    } else {
        address.to_string()
    }
}

/// BLE transport over a btleplug adapter.
pub struct BtleplugTransport {
    adapter: Adapter,
    gatt: GattLayout,
    /// Scan window used when connecting to an address the adapter hasn't seen.
    scan_window: Duration,
}

impl BtleplugTransport {
    /// Open the adapter named by `config.interface`, or the first adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available or the named adapter
    /// does not exist.
    pub async fn new(config: &BridgeConfig) -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;
        let adapter = Self::select_adapter(adapters, config.interface.as_deref()).await?;

        info!(
            "Using Bluetooth adapter: {}",
            adapter.adapter_info().await.unwrap_or_default()
        );

        Ok(Self::with_adapter(adapter, config))
    }

    /// Create a transport on a specific adapter.
    pub fn with_adapter(adapter: Adapter, config: &BridgeConfig) -> Self {
        Self {
            adapter,
            gatt: config.gatt.clone(),
            scan_window: config.timing.scan_timeout,
        }
    }

    async fn select_adapter(adapters: Vec<Adapter>, interface: Option<&str>) -> Result<Adapter> {
        let Some(interface) = interface else {
            return adapters.into_iter().next().ok_or(Error::BluetoothUnavailable);
        };

        for adapter in adapters {
            let info = adapter.adapter_info().await.unwrap_or_default();
            if adapter_matches(&info, interface) {
                return Ok(adapter);
            }
            trace!("Skipping adapter {}", info);
        }

        Err(Error::AdapterNotFound {
            interface: interface.to_string(),
        })
    }

    /// Scan for `window` and return the peers that advertised during it, in
    /// the order they were first heard. The adapter is left idle afterwards.
    ///
    /// `peripherals()` also lists cached and paired devices that are not
    /// advertising, so only peers reported by adapter events count.
    async fn scan_peripherals(&self, window: Duration) -> Result<Vec<Peripheral>> {
        let mut events = self.adapter.events().await?;
        self.adapter.start_scan(StackScanFilter::default()).await?;

        let mut seen: Vec<PeripheralId> = Vec::new();
        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                event = events.next() => match event {
                    Some(event) => {
                        if let Some(id) = advertising_peer(&event) {
                            note_sighting(&mut seen, id.clone());
                        }
                    }
                    None => break,
                },
            }
        }

        if let Err(e) = self.adapter.stop_scan().await {
            debug!("Failed to stop scan: {}", e);
        }

        let mut peripherals = Vec::with_capacity(seen.len());
        for id in seen {
            match self.adapter.peripheral(&id).await {
                Ok(peripheral) => peripherals.push(peripheral),
                Err(e) => trace!("Peer {:?} vanished: {}", id, e),
            }
        }

        Ok(peripherals)
    }

    /// Discover the telemetry service and open the notification stream.
    async fn prepare(
        &self,
        peripheral: &Peripheral,
        address: &DeviceAddress,
    ) -> Result<(Vec<Characteristic>, NotificationStream)> {
        peripheral.discover_services().await?;

        let characteristics: Vec<Characteristic> = peripheral
            .characteristics()
            .into_iter()
            .filter(|c| c.service_uuid == self.gatt.service_uuid)
            .collect();
        debug!(
            "Discovered {} characteristic(s) in service {}",
            characteristics.len(),
            self.gatt.service_uuid
        );
        if characteristics.is_empty() {
            return Err(Error::ConnectionFailed {
                reason: format!("service {} not offered by {}", self.gatt.service_uuid, address),
            });
        }

        // Subscribe to the stream before arming so no early notification is lost.
        let notifications = peripheral.notifications().await?;

        Ok((characteristics, notifications))
    }

    async fn find_peripheral(&self, address: &DeviceAddress) -> Result<Option<Peripheral>> {
        let peripherals = self.adapter.peripherals().await?;
        Ok(peripherals
            .into_iter()
            .find(|p| address.matches(&peripheral_address(p))))
    }
}

#[async_trait]
impl BleTransport for BtleplugTransport {
    type Connection = BtleplugConnection;

    async fn scan(&self, duration: Duration) -> Result<Vec<Advertisement>> {
        let peripherals = self.scan_peripherals(duration).await?;
        let mut advertisements = Vec::with_capacity(peripherals.len());

        for peripheral in peripherals {
            let properties = match peripheral.properties().await {
                Ok(Some(p)) => p,
                _ => continue,
            };

            let address = match peripheral_address(&peripheral).parse() {
                Ok(address) => address,
                Err(_) => continue,
            };

            advertisements.push(Advertisement {
                address,
                records: advertisement_records(&properties),
            });
        }

        Ok(advertisements)
    }

    async fn connect(&self, address: &DeviceAddress) -> Result<BtleplugConnection> {
        // A scan interrupted by cancellation may have left the adapter scanning.
        if let Err(e) = self.adapter.stop_scan().await {
            trace!("No scan to stop: {}", e);
        }

        let peripheral = match self.find_peripheral(address).await? {
            Some(p) => p,
            None => {
                debug!("{} not known yet, scanning for it", address);
                self.scan_peripherals(self.scan_window)
                    .await?
                    .into_iter()
                    .find(|p| address.matches(&peripheral_address(p)))
                    .ok_or_else(|| Error::DeviceNotFound {
                        address: address.to_string(),
                    })?
            }
        };

        if !peripheral.is_connected().await.unwrap_or(false) {
            peripheral.connect().await?;
        }

        let prepared = self.prepare(&peripheral, address).await;
        let (characteristics, notifications) =
            disconnect_on_error(prepared, peripheral.disconnect()).await?;

        Ok(BtleplugConnection {
            peripheral,
            gatt: self.gatt.clone(),
            characteristics,
            notifications,
        })
    }
}

/// A live btleplug link.
pub struct BtleplugConnection {
    peripheral: Peripheral,
    gatt: GattLayout,
    characteristics: Vec<Characteristic>,
    notifications: NotificationStream,
}

impl BtleplugConnection {
    fn characteristic(&self, handle: u16) -> Result<Characteristic> {
        let uuid = self
            .gatt
            .uuid_for_handle(handle)
            .ok_or(Error::UnmappedHandle { handle })?;

        self.characteristics
            .iter()
            .find(|c| c.uuid == uuid)
            .cloned()
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: uuid.to_string(),
            })
    }
}

#[async_trait]
impl BleConnection for BtleplugConnection {
    async fn write_characteristic(&mut self, handle: u16, payload: &[u8]) -> Result<()> {
        let characteristic = self.characteristic(handle)?;

        if handle == self.gatt.arm_handle && self.gatt.arms_via_cccd() {
            // btleplug owns the CCCD write; subscribing performs it.
            let has_cccd = characteristic
                .descriptors
                .iter()
                .any(|d| d.uuid == CLIENT_CONFIG_DESCRIPTOR_UUID);
            if !has_cccd {
                return Err(Error::CharacteristicNotFound {
                    uuid: CLIENT_CONFIG_DESCRIPTOR_UUID.to_string(),
                });
            }

            self.peripheral.subscribe(&characteristic).await?;
            trace!("Subscribed to {}", characteristic.uuid);
            return Ok(());
        }

        let write_type = if characteristic.properties.contains(CharPropFlags::WRITE) {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };

        self.peripheral
            .write(&characteristic, payload, write_type)
            .await?;

        trace!(
            "Wrote {} bytes to characteristic {}",
            payload.len(),
            characteristic.uuid
        );

        Ok(())
    }

    async fn wait_for_notification(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<NotificationEvent>> {
        match tokio::time::timeout(timeout, self.notifications.next()).await {
            Ok(Some(notification)) => Ok(Some(NotificationEvent::new(
                self.gatt.handle_for_uuid(&notification.uuid),
                notification.value,
            ))),
            // The stream ends when the peripheral disconnects.
            Ok(None) => Err(Error::ConnectionLost),
            Err(_) => {
                // Some backends keep the stream open across a disconnect.
                if self.peripheral.is_connected().await? {
                    Ok(None)
                } else {
                    Err(Error::ConnectionLost)
                }
            }
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_adapter_matches() {
        assert!(adapter_matches("hci0 (usb:v1D6Bp0246d0537)", "hci0"));
        assert!(adapter_matches("hci1", "hci1"));
        assert!(!adapter_matches("hci1 (usb:v1D6Bp0246d0537)", "hci0"));
        assert!(!adapter_matches("hci10 (usb)", "hci1"));
    }

    #[test]
    fn test_advertisement_records() {
        let mut properties = PeripheralProperties::default();
        properties.local_name = Some("BDM".to_string());
        properties.tx_power_level = Some(-4);
        properties.manufacturer_data = HashMap::from([(0x09c7, vec![0x01, 0xab])]);
        properties.services = vec![crate::ble::uuids::TELEMETRY_SERVICE_UUID];

        let records = advertisement_records(&properties);
        assert_eq!(
            records,
            vec![
                AdvertisementRecord::new("Complete Local Name", "BDM"),
                AdvertisementRecord::new("Manufacturer", "c70901ab"),
                AdvertisementRecord::new(
                    "Complete 128b Services",
                    "0000fff0-0000-1000-8000-00805f9b34fb"
                ),
                AdvertisementRecord::new("Tx Power", "-4"),
            ]
        );
    }

    #[test]
    fn test_advertisement_records_empty() {
        assert!(advertisement_records(&PeripheralProperties::default()).is_empty());
    }

    #[test]
    fn test_sightings_keep_first_heard_order() {
        let mut seen = Vec::new();
        for id in ["peer-b", "peer-a", "peer-b", "peer-c", "peer-a"] {
            note_sighting(&mut seen, id);
        }
        assert_eq!(seen, vec!["peer-b", "peer-a", "peer-c"]);
    }

    #[tokio::test]
    async fn test_failed_setup_disconnects() {
        let disconnected = AtomicBool::new(false);
        let result: Result<()> = disconnect_on_error(Err(Error::ConnectionLost), async {
            disconnected.store(true, Ordering::SeqCst);
            Ok::<(), Error>(())
        })
        .await;

        assert!(matches!(result, Err(Error::ConnectionLost)));
        assert!(disconnected.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failed_disconnect_keeps_setup_error() {
        let result: Result<()> = disconnect_on_error(
            Err(Error::CharacteristicNotFound {
                uuid: "fff4".to_string(),
            }),
            async { Err::<(), _>(Error::BluetoothUnavailable) },
        )
        .await;

        assert!(matches!(result, Err(Error::CharacteristicNotFound { .. })));
    }

    #[tokio::test]
    async fn test_successful_setup_keeps_link() {
        let disconnected = AtomicBool::new(false);
        let result = disconnect_on_error(Ok(7), async {
            disconnected.store(true, Ordering::SeqCst);
            Ok::<(), Error>(())
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert!(!disconnected.load(Ordering::SeqCst));
    }
}
