//! Scan resolution.
//!
//! Turns one bounded scan window into a [`ScanOutcome`].

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::ble::transport::{Advertisement, BleTransport};
use crate::config::{DeviceAddress, ScanFilter};

/// Result of one discovery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// A peer matched the filter.
    Found(DeviceAddress),
    /// Nothing matched, or the scan itself failed. Retry later.
    NotFound,
    /// Interruption was requested during the scan. Stop.
    Interrupted,
}

impl ScanOutcome {
    /// Check if a device was found.
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

/// Address of the first advertisement carrying a record that matches
/// `filter`, in enumeration order.
pub fn find_match(advertisements: &[Advertisement], filter: &ScanFilter) -> Option<DeviceAddress> {
    advertisements
        .iter()
        .find(|adv| {
            adv.records
                .iter()
                .any(|record| filter.matches(&record.descriptor, &record.value))
        })
        .map(|adv| adv.address.clone())
}

/// Run one scan window and look for the target.
///
/// Scan failures are not errors here: they are logged and reported as
/// [`ScanOutcome::NotFound`] so the caller retries.
pub async fn resolve<T>(
    transport: &T,
    filter: &ScanFilter,
    duration: Duration,
    cancel: &CancellationToken,
) -> ScanOutcome
where
    T: BleTransport + ?Sized,
{
    debug!("Scanning {:?} for {}", duration, filter);

    let advertisements = tokio::select! {
        biased;
        _ = cancel.cancelled() => return ScanOutcome::Interrupted,
        result = transport.scan(duration) => match result {
            Ok(advertisements) => advertisements,
            Err(e) => {
                debug!("Scan failed: {}", e);
                return ScanOutcome::NotFound;
            }
        },
    };

    for adv in &advertisements {
        trace!("Saw {} with {} record(s)", adv.address, adv.records.len());
    }

    match find_match(&advertisements, filter) {
        Some(address) => {
            debug!("Found matching device {}", address);
            ScanOutcome::Found(address)
        }
        None => {
            debug!(
                "No device matching {} among {} peer(s)",
                filter,
                advertisements.len()
            );
            ScanOutcome::NotFound
        }
    }
}
