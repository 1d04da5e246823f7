//! Notification routing.
//!
//! Forwards payloads from the expected notification handle to the output
//! sink and drops everything else.

use tracing::debug;

use crate::ble::transport::NotificationEvent;
use crate::error::Result;
use crate::sink::OutputSink;

/// Render bytes as space-separated two-digit hex, e.g. `01 0a ff`.
pub fn format_payload(payload: &[u8]) -> String {
    payload
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Filters notifications by source handle and writes the payload through.
///
/// Owns the output sink for the lifetime of the relay; nothing else writes
/// to it.
#[derive(Debug)]
pub struct NotificationRouter<S> {
    expected_handle: u16,
    sink: S,
    forwarded: u64,
    forwarded_bytes: u64,
}

impl<S: OutputSink> NotificationRouter<S> {
    /// Create a router forwarding notifications from `expected_handle` to `sink`.
    pub fn new(expected_handle: u16, sink: S) -> Self {
        Self {
            expected_handle,
            sink,
            forwarded: 0,
            forwarded_bytes: 0,
        }
    }

    /// Route one event.
    ///
    /// Returns `true` if the payload was written to the sink, `false` if the
    /// event came from another handle and was discarded.
    ///
    /// # Errors
    ///
    /// Propagates sink write failures.
    pub async fn route(&mut self, event: &NotificationEvent) -> Result<bool> {
        if event.source_handle != self.expected_handle {
            return Ok(false);
        }

        self.sink.write(&event.payload).await?;
        self.forwarded += 1;
        self.forwarded_bytes += event.payload.len() as u64;

        debug!("{}", format_payload(&event.payload));

        Ok(true)
    }

    /// Number of notifications forwarded and their total byte count.
    pub fn forwarded(&self) -> (u64, u64) {
        (self.forwarded, self.forwarded_bytes)
    }

    /// Get the sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Consume the router and return the sink.
    pub fn into_sink(self) -> S {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::sink::MemorySink;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    mockall::mock! {
        Sink {}

        #[async_trait]
        impl OutputSink for Sink {
            async fn write(&mut self, bytes: &[u8]) -> Result<()>;
        }
    }

    #[test]
    fn test_format_payload() {
        assert_eq!(format_payload(&[0x01, 0x0a, 0xff]), "01 0a ff");
        assert_eq!(format_payload(&[0x00]), "00");
        assert_eq!(format_payload(&[]), "");
    }

    #[tokio::test]
    async fn test_forwards_expected_handle() {
        let mut sink = MockSink::new();
        sink.expect_write()
            .withf(|bytes: &[u8]| bytes == [0x01u8, 0x02, 0x03])
            .times(1)
            .returning(|_| Ok(()));

        let mut router = NotificationRouter::new(0x2e, sink);
        let forwarded = router
            .route(&NotificationEvent::new(0x2e, vec![0x01, 0x02, 0x03]))
            .await
            .unwrap();

        assert!(forwarded);
        assert_eq!(router.forwarded(), (1, 3));
    }

    #[tokio::test]
    async fn test_other_handles_never_reach_sink() {
        let mut sink = MockSink::new();
        sink.expect_write().never();

        let mut router = NotificationRouter::new(0x2e, sink);
        for handle in [0x0000, 0x0025, 0x002f, 0xffff] {
            let forwarded = router
                .route(&NotificationEvent::new(handle, vec![0xde, 0xad]))
                .await
                .unwrap();
            assert!(!forwarded);
        }
        assert_eq!(router.forwarded(), (0, 0));
    }

    #[tokio::test]
    async fn test_sink_failure_propagates() {
        let mut sink = MockSink::new();
        sink.expect_write()
            .returning(|_| Err(Error::Sink(std::io::Error::other("port closed"))));

        let mut router = NotificationRouter::new(0x2e, sink);
        let result = router.route(&NotificationEvent::new(0x2e, vec![1])).await;
        assert!(matches!(result, Err(Error::Sink(_))));
        assert_eq!(router.forwarded(), (0, 0));
    }

    proptest! {
        #[test]
        fn prop_pass_through_preserves_bytes_and_order(
            events in proptest::collection::vec(
                (prop_oneof![Just(0x2eu16), any::<u16>()], proptest::collection::vec(any::<u8>(), 0..32)),
                0..24,
            )
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let mut router = NotificationRouter::new(0x2e, MemorySink::new());

            runtime.block_on(async {
                for (handle, payload) in &events {
                    router
                        .route(&NotificationEvent::new(*handle, payload.clone()))
                        .await
                        .unwrap();
                }
            });

            let expected: Vec<Vec<u8>> = events
                .iter()
                .filter(|(handle, _)| *handle == 0x2e)
                .map(|(_, payload)| payload.clone())
                .collect();
            prop_assert_eq!(router.sink().writes(), &expected[..]);
        }
    }
}
