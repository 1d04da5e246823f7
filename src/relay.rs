//! Connection lifecycle and relay loop.
//!
//! [`Relay`] owns the only BLE connection the process ever holds. It resolves
//! the target, connects, arms notifications, hands every notification to the
//! [`NotificationRouter`], and starts over from discovery whenever the link
//! fails. Only cancellation ends the loop normally.
//!
//! ```text
//!            +-----------------------------------------------+
//!            v                                               |
//!   Idle -> Resolving -> Connecting -> Armed --(link lost)---+
//!              |  ^          |         |  ^
//!              +--+          |         +--+ (notification / idle wait)
//!         (miss, retry)  (failure, retry via Resolving)
//!
//!   any state --(cancel)--> Stopped
//! ```

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::ble::scanner::{self, ScanOutcome};
use crate::ble::transport::{BleConnection, BleTransport};
use crate::config::{BridgeConfig, DeviceAddress, GattLayout, ScanFilter, Timing};
use crate::error::{Error, Result};
use crate::router::NotificationRouter;
use crate::sink::OutputSink;

/// Relay lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RelayState {
    /// No connection and no resolved target.
    #[default]
    Idle,
    /// Scanning for the target.
    Resolving,
    /// Connecting to and arming the target.
    Connecting,
    /// Connected with notifications enabled.
    Armed,
    /// Interrupted; the loop has exited.
    Stopped,
}

impl RelayState {
    /// Check if a connection is live and relaying.
    pub fn is_armed(&self) -> bool {
        matches!(self, Self::Armed)
    }

    /// Check if the relay has exited.
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

impl std::fmt::Display for RelayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Resolving => write!(f, "Resolving"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Armed => write!(f, "Armed"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Event for relay state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateEvent {
    /// State before the change.
    pub previous: RelayState,
    /// The new state.
    pub state: RelayState,
    /// Device the relay is connecting or connected to, if any.
    pub address: Option<DeviceAddress>,
}

/// Cloneable handle to observe and stop a running relay.
#[derive(Debug, Clone)]
pub struct RelayHandle {
    state: Arc<RwLock<RelayState>>,
    cancel: CancellationToken,
}

impl RelayHandle {
    /// Get the current state.
    pub fn state(&self) -> RelayState {
        *self.state.read()
    }

    /// Ask the relay to stop at its next suspension point.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

/// Whether the outer loop keeps going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Outcome of a connect or arm attempt.
enum Step<C> {
    Ready(C),
    Retry,
    Stop,
}

/// The BLE-to-sink relay.
pub struct Relay<T: BleTransport, S: OutputSink> {
    transport: T,
    router: NotificationRouter<S>,
    /// Explicit target; `None` re-scans after every disconnect.
    target: Option<DeviceAddress>,
    filter: ScanFilter,
    gatt: GattLayout,
    timing: Timing,
    state: Arc<RwLock<RelayState>>,
    event_tx: broadcast::Sender<StateEvent>,
    cancel: CancellationToken,
}

impl<T: BleTransport, S: OutputSink> Relay<T, S> {
    /// Create a relay from `transport` into `sink`.
    ///
    /// The sink must already be open; the relay never reopens it.
    pub fn new(transport: T, sink: S, config: &BridgeConfig) -> Self {
        let (event_tx, _) = broadcast::channel(32);

        Self {
            transport,
            router: NotificationRouter::new(config.gatt.notify_handle, sink),
            target: config.address.clone(),
            filter: config.scan_filter.clone(),
            gatt: config.gatt.clone(),
            timing: config.timing,
            state: Arc::new(RwLock::new(RelayState::Idle)),
            event_tx,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Get a handle to observe or stop the relay.
    pub fn handle(&self) -> RelayHandle {
        RelayHandle {
            state: self.state.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Get the current state.
    pub fn state(&self) -> RelayState {
        *self.state.read()
    }

    /// Subscribe to state change events.
    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.event_tx.subscribe()
    }

    /// Get the notification router.
    pub fn router(&self) -> &NotificationRouter<S> {
        &self.router
    }

    /// Consume the relay and return its router.
    pub fn into_router(self) -> NotificationRouter<S> {
        self.router
    }

    /// Run until cancelled.
    ///
    /// BLE failures never end the loop; they send it back to discovery.
    ///
    /// # Errors
    ///
    /// Returns an error if the output sink fails, or if the link reports an
    /// error that reconnecting cannot fix (see [`Error::is_recoverable`]).
    pub async fn run(&mut self) -> Result<()> {
        match &self.target {
            Some(address) => info!("Relaying from {}", address),
            None => info!("Relaying from first device matching {}", self.filter),
        }

        let result = loop {
            match self.cycle().await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        if result.is_ok() {
            info!("Interrupted, stopping relay");
        }
        let (count, bytes) = self.router.forwarded();
        debug!("Forwarded {} notification(s), {} byte(s)", count, bytes);

        self.set_state(RelayState::Stopped, None);
        result
    }

    /// One discovery/connect attempt and, if it succeeds, one armed session.
    ///
    /// A failed attempt leaves the state where it failed; the next attempt
    /// moves straight back to `Resolving` (or `Connecting`).
    async fn cycle(&mut self) -> Result<Flow> {
        if self.cancel.is_cancelled() {
            return Ok(Flow::Stop);
        }

        let address = match self.resolve_target().await {
            ScanOutcome::Found(address) => address,
            ScanOutcome::NotFound => return Ok(self.pause().await),
            ScanOutcome::Interrupted => return Ok(Flow::Stop),
        };

        let mut connection = match self.establish(&address).await {
            Step::Ready(connection) => connection,
            Step::Retry => return Ok(self.pause().await),
            Step::Stop => return Ok(Flow::Stop),
        };

        info!("Connected to {}, notifications armed", address);
        self.set_state(RelayState::Armed, Some(address));

        let flow = self.listen(&mut connection).await;
        self.release(&mut connection).await;
        drop(connection);
        self.set_state(RelayState::Idle, None);

        match flow? {
            Flow::Continue => Ok(self.pause().await),
            Flow::Stop => Ok(Flow::Stop),
        }
    }

    /// Explicit targets pass straight through; otherwise scan once.
    async fn resolve_target(&self) -> ScanOutcome {
        if let Some(address) = &self.target {
            return ScanOutcome::Found(address.clone());
        }

        self.set_state(RelayState::Resolving, None);
        scanner::resolve(
            &self.transport,
            &self.filter,
            self.timing.scan_timeout,
            &self.cancel,
        )
        .await
    }

    /// Connect and arm. A failed connection is released before returning.
    async fn establish(&self, address: &DeviceAddress) -> Step<T::Connection> {
        self.set_state(RelayState::Connecting, Some(address.clone()));
        debug!("Connecting to {}", address);

        let connect = tokio::time::timeout(
            self.timing.connect_timeout,
            self.transport.connect(address),
        );
        let mut connection = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Step::Stop,
            result = connect => match result {
                Ok(Ok(connection)) => connection,
                Ok(Err(e)) => {
                    debug!("Connection to {} failed: {}", address, e);
                    return Step::Retry;
                }
                Err(_) => {
                    let e = Error::Timeout { operation: "connect" };
                    debug!("Connection to {} failed: {}", address, e);
                    return Step::Retry;
                }
            },
        };

        match self.arm(&mut connection).await {
            Step::Ready(()) => Step::Ready(connection),
            Step::Retry => {
                self.release(&mut connection).await;
                Step::Retry
            }
            Step::Stop => {
                self.release(&mut connection).await;
                Step::Stop
            }
        }
    }

    /// Write the arm payload.
    async fn arm(&self, connection: &mut T::Connection) -> Step<()> {
        let handle = self.gatt.arm_handle;
        let arm = tokio::time::timeout(
            self.timing.connect_timeout,
            connection.write_characteristic(handle, &self.gatt.arm_payload),
        );

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Step::Stop,
            result = arm => result,
        };

        match result {
            Ok(Ok(())) => {
                debug!("Armed notifications via handle {:#06x}", handle);
                Step::Ready(())
            }
            Ok(Err(e)) => {
                debug!("Arming notifications failed: {}", e);
                Step::Retry
            }
            Err(_) => {
                debug!("Arming notifications failed: {}", Error::Timeout { operation: "arm" });
                Step::Retry
            }
        }
    }

    /// Relay notifications until the link fails or a stop is requested.
    async fn listen(&mut self, connection: &mut T::Connection) -> Result<Flow> {
        let wait = self.timing.notification_wait;

        loop {
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(Flow::Stop),
                result = connection.wait_for_notification(wait) => result,
            };

            match result {
                Ok(Some(event)) => {
                    if !self.router.route(&event).await? {
                        trace!(
                            "Ignored notification from handle {:#06x}",
                            event.source_handle
                        );
                    }
                }
                Ok(None) => trace!("No notification within {:?}", wait),
                Err(e) if e.is_recoverable() => {
                    info!("lost BLE connection: {}", e);
                    return Ok(Flow::Continue);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Best-effort disconnect, bounded by one notification wait.
    async fn release(&self, connection: &mut T::Connection) {
        match tokio::time::timeout(self.timing.notification_wait, connection.disconnect()).await {
            Ok(Ok(())) => trace!("Connection released"),
            Ok(Err(e)) => debug!("Disconnect failed: {}", e),
            Err(_) => debug!("Disconnect timed out"),
        }
    }

    /// Sleep the retry delay unless a stop is requested first.
    async fn pause(&self) -> Flow {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Flow::Stop,
            _ = tokio::time::sleep(self.timing.retry_delay) => Flow::Continue,
        }
    }

    /// Update the state and emit an event.
    fn set_state(&self, new_state: RelayState, address: Option<DeviceAddress>) {
        let old_state = {
            let mut state = self.state.write();
            let old = *state;
            *state = new_state;
            old
        };

        if old_state != new_state {
            debug!("Relay state changed: {} -> {}", old_state, new_state);

            let _ = self.event_tx.send(StateEvent {
                previous: old_state,
                state: new_state,
                address,
            });
        }
    }
}
