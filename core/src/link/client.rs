// BLE Link state machine
//
// Owns the full central-role lifecycle: scan for a peripheral advertising a
// known name, connect, resolve the fixed service/characteristic, enable
// notifications, negotiate MTU, then shuttle UTF-8 text in both directions.
//
// Each suspending operation parks on a one-shot completion signal that the
// adapter event pump resolves exactly once. Timeouts race those signals,
// and the losing path still performs its mandatory cleanup (stopping the
// scanner, closing the connection) before the call returns.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::link::adapter::{ConnectionHandle, DeviceId, RadioAdapter, RadioError, RadioEvent};
use crate::link::config::{LinkConfig, CHARACTERISTIC_UUID, REQUESTED_MTU, SERVICE_UUID};
use crate::link::state::LinkState;

/// Errors produced by link operations.
///
/// None of them poison the link: after any failure the link can start a
/// fresh cycle with `start_scan`.
#[derive(Debug, Clone, Error)]
pub enum LinkError {
    #[error("bluetooth radio unavailable or not permitted")]
    PermissionDenied,
    #[error("a scan is already in progress")]
    ScanInProgress,
    #[error("scan timed out with no matching advertisement")]
    ScanTimeout,
    #[error("no target device recorded; scan first")]
    DeviceNotFound,
    #[error("a connection attempt is already in progress")]
    ConnectInProgress,
    #[error("peripheral rejected or dropped the connection")]
    ConnectionRejected,
    #[error("connection attempt timed out")]
    ConnectTimeout,
    #[error("service discovery failed")]
    ServiceDiscoveryFailed,
    #[error("link is not connected")]
    NotConnected,
    #[error("write rejected: {0}")]
    WriteRejected(String),
    #[error("operation cancelled by disconnect")]
    Cancelled,
    #[error("operation not valid while {0}")]
    InvalidState(LinkState),
    #[error(transparent)]
    Radio(#[from] RadioError),
}

type ReceiveCallback = Arc<dyn Fn(String) + Send + Sync>;
type ConnectResult = Result<(), LinkError>;

/// Interior state shared between the public operations and the event pump.
struct LinkShared {
    state: RwLock<LinkState>,
    target_name: RwLock<Option<String>>,
    target_device: RwLock<Option<DeviceId>>,
    connection: RwLock<Option<ConnectionHandle>>,
    pending_scan: Mutex<Option<oneshot::Sender<DeviceId>>>,
    pending_connect: Mutex<Option<oneshot::Sender<ConnectResult>>>,
    on_received: RwLock<Option<ReceiveCallback>>,
}

impl LinkShared {
    fn new() -> Self {
        Self {
            state: RwLock::new(LinkState::Idle),
            target_name: RwLock::new(None),
            target_device: RwLock::new(None),
            connection: RwLock::new(None),
            pending_scan: Mutex::new(None),
            pending_connect: Mutex::new(None),
            on_received: RwLock::new(None),
        }
    }

    fn current_connection(&self) -> Option<ConnectionHandle> {
        *self.connection.read()
    }

    /// Whether an event for `connection` concerns the link's connection.
    ///
    /// During `open_connection` the adapter may deliver the first
    /// connection event before the caller has stored the handle; with a
    /// connect pending, that event is ours.
    fn is_relevant(&self, connection: ConnectionHandle) -> bool {
        match self.current_connection() {
            Some(current) => current == connection,
            None => self.pending_connect.lock().is_some(),
        }
    }

    /// Resolve the pending connect exactly once. Returns whether this call
    /// performed the resolution; late signals find the slot empty.
    fn resolve_connect(&self, result: ConnectResult) -> bool {
        match self.pending_connect.lock().take() {
            Some(resolve) => {
                let _ = resolve.send(result);
                true
            }
            None => false,
        }
    }
}

/// Central-role BLE link to a single peripheral.
///
/// Created once and reused across scan/connect/disconnect cycles. All
/// access to the underlying connection goes through this type; the handle
/// is never handed out.
pub struct BleLink {
    adapter: Arc<dyn RadioAdapter>,
    config: LinkConfig,
    shared: Arc<LinkShared>,
    pump: JoinHandle<()>,
}

impl BleLink {
    /// Create a link over `adapter`, consuming the adapter's event channel.
    ///
    /// Spawns the event pump; must be called within a tokio runtime.
    pub fn new(
        adapter: Arc<dyn RadioAdapter>,
        events: mpsc::UnboundedReceiver<RadioEvent>,
        config: LinkConfig,
    ) -> Self {
        let shared = Arc::new(LinkShared::new());
        let pump = tokio::spawn(run_pump(adapter.clone(), shared.clone(), events));
        Self {
            adapter,
            config,
            shared,
            pump,
        }
    }

    /// `new` with the default timing configuration.
    pub fn with_defaults(
        adapter: Arc<dyn RadioAdapter>,
        events: mpsc::UnboundedReceiver<RadioEvent>,
    ) -> Self {
        Self::new(adapter, events, LinkConfig::default())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LinkState {
        *self.shared.state.read()
    }

    /// True once notifications are enabled and `send` is live.
    pub fn is_ready(&self) -> bool {
        self.state() == LinkState::Ready
    }

    /// Scan for a peripheral advertising exactly `name`.
    ///
    /// Resolves when the first matching advertisement arrives (the scan is
    /// stopped immediately; later matches are dropped), or fails after
    /// `scan_timeout` with the scan explicitly stopped. At most one scan
    /// may be outstanding.
    pub async fn start_scan(&self, name: &str) -> Result<(), LinkError> {
        if !self.adapter.is_available().await {
            return Err(LinkError::PermissionDenied);
        }
        if self.shared.pending_scan.lock().is_some() {
            return Err(LinkError::ScanInProgress);
        }
        let state = self.state();
        if !state.can_start_scan() {
            return Err(LinkError::InvalidState(state));
        }

        let (resolve, found) = oneshot::channel();
        *self.shared.target_name.write() = Some(name.to_string());
        *self.shared.target_device.write() = None;
        *self.shared.pending_scan.lock() = Some(resolve);
        *self.shared.state.write() = LinkState::Scanning;
        info!(%name, "scan started");

        if let Err(e) = self.adapter.start_scan(name).await {
            self.shared.pending_scan.lock().take();
            *self.shared.state.write() = LinkState::Failed;
            warn!(error = %e, "scan could not be started");
            return Err(e.into());
        }

        match tokio::time::timeout(self.config.scan_timeout, found).await {
            Ok(Ok(device)) => {
                debug!(device = %device, "scan resolved");
                Ok(())
            }
            // disconnect() took the completion slot and stopped the radio.
            Ok(Err(_)) => Err(LinkError::Cancelled),
            Err(_) => {
                // Drop the completion slot first so a late match cannot
                // resurrect this scan, then stop the radio.
                self.shared.pending_scan.lock().take();
                if let Err(e) = self.adapter.stop_scan().await {
                    warn!(error = %e, "failed to stop scan on timeout");
                }
                *self.shared.target_device.write() = None;
                *self.shared.state.write() = LinkState::Failed;
                info!(%name, timeout = ?self.config.scan_timeout, "scan timed out");
                Err(LinkError::ScanTimeout)
            }
        }
    }

    /// Connect to the device recorded by the last successful scan.
    ///
    /// Valid from `DeviceFound`, or from `Failed` to retry the recorded
    /// device; anywhere else the call is rejected without touching the
    /// radio, so a live link cannot be clobbered by a second `connect`.
    /// Suspends until the adapter reports connected *and* service discovery
    /// succeeded with notifications enabled, or until it reports
    /// disconnected, discovery failure, or the configured bound elapses.
    /// Every failure path closes the connection handle.
    pub async fn connect(&self) -> Result<(), LinkError> {
        let device = self
            .shared
            .target_device
            .read()
            .clone()
            .ok_or(LinkError::DeviceNotFound)?;
        if self.shared.pending_connect.lock().is_some() {
            return Err(LinkError::ConnectInProgress);
        }
        let state = self.state();
        if !state.can_connect() {
            return Err(LinkError::InvalidState(state));
        }

        let (resolve, settled) = oneshot::channel();
        *self.shared.pending_connect.lock() = Some(resolve);
        *self.shared.state.write() = LinkState::Connecting;
        info!(device = %device, "connecting");

        let connection = match self.adapter.open_connection(&device).await {
            Ok(connection) => connection,
            Err(e) => {
                self.shared.pending_connect.lock().take();
                *self.shared.state.write() = LinkState::Failed;
                warn!(error = %e, "connection could not be opened");
                return Err(LinkError::ConnectionRejected);
            }
        };
        if self.shared.connection.read().is_none() {
            *self.shared.connection.write() = Some(connection);
        }

        let outcome = match self.config.connect_timeout {
            Some(bound) => match tokio::time::timeout(bound, settled).await {
                Ok(result) => result.unwrap_or(Err(LinkError::Cancelled)),
                Err(_) => {
                    self.shared.pending_connect.lock().take();
                    Err(LinkError::ConnectTimeout)
                }
            },
            None => settled.await.unwrap_or(Err(LinkError::Cancelled)),
        };

        match outcome {
            Ok(()) => {
                // disconnect() may have released the connection after the
                // attempt resolved; a released link never becomes Ready.
                if self.shared.current_connection().is_none() {
                    return Err(LinkError::Cancelled);
                }
                *self.shared.state.write() = LinkState::Ready;
                info!(device = %device, %connection, "link ready");
                Ok(())
            }
            Err(e) => {
                // Never leave a half-open connection behind.
                let open = self.shared.connection.write().take();
                if let Some(connection) = open {
                    if let Err(close_err) = self.adapter.close_connection(connection).await {
                        warn!(error = %close_err, "failed to close connection after connect failure");
                    }
                }
                if !matches!(e, LinkError::Cancelled) {
                    *self.shared.state.write() = LinkState::Failed;
                }
                warn!(device = %device, error = %e, "connect failed");
                Err(e)
            }
        }
    }

    /// Write `text` as UTF-8 to the fixed characteristic.
    ///
    /// Returns the submission outcome, not an end-to-end delivery
    /// guarantee.
    pub async fn send(&self, text: &str) -> Result<(), LinkError> {
        if self.state() != LinkState::Ready {
            return Err(LinkError::NotConnected);
        }
        let connection = self
            .shared
            .current_connection()
            .ok_or(LinkError::NotConnected)?;
        self.adapter
            .write_characteristic(connection, SERVICE_UUID, CHARACTERISTIC_UUID, text.as_bytes())
            .await
            .map_err(|e| LinkError::WriteRejected(e.to_string()))?;
        debug!(bytes = text.len(), "write submitted");
        Ok(())
    }

    /// Register the single inbound-text observer.
    ///
    /// Replaces any previous registration. Nothing is replayed to a new
    /// observer, and notifications arriving with no observer are dropped.
    /// The observer lock is not held while the callback runs, so a
    /// callback may itself call `on_received`.
    pub fn on_received<F>(&self, callback: F)
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        *self.shared.on_received.write() = Some(Arc::new(callback));
    }

    /// Tear the link down.
    ///
    /// Idempotent and infallible from any state: cancels a pending scan
    /// (stopping the scanner) or connect (its caller resolves with
    /// [`LinkError::Cancelled`]), closes any open connection, clears the
    /// recorded device, and leaves the link ready for a fresh `start_scan`.
    pub async fn disconnect(&self) {
        if self.shared.pending_scan.lock().take().is_some() {
            if let Err(e) = self.adapter.stop_scan().await {
                warn!(error = %e, "failed to stop scan during disconnect");
            }
        }
        if let Some(resolve) = self.shared.pending_connect.lock().take() {
            let _ = resolve.send(Err(LinkError::Cancelled));
        }
        let open = self.shared.connection.write().take();
        if let Some(connection) = open {
            if let Err(e) = self.adapter.close_connection(connection).await {
                warn!(error = %e, "failed to close connection during disconnect");
            }
        }
        *self.shared.target_device.write() = None;
        *self.shared.target_name.write() = None;
        *self.shared.state.write() = LinkState::Disconnected;
        debug!("link disconnected");
    }
}

impl Drop for BleLink {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Event pump: maps adapter events onto state transitions and resolves the
/// pending operations. Runs until the adapter drops its event sender.
async fn run_pump(
    adapter: Arc<dyn RadioAdapter>,
    shared: Arc<LinkShared>,
    mut events: mpsc::UnboundedReceiver<RadioEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            RadioEvent::DeviceDiscovered { device, name, rssi } => {
                let wanted = shared.target_name.read().clone();
                if wanted.as_deref() != Some(name.as_str()) {
                    debug!(%name, "ignoring advertisement for a different peripheral");
                    continue;
                }
                // First match wins; a near-simultaneous second match finds
                // the completion slot empty and is dropped here.
                let resolve = shared.pending_scan.lock().take();
                let Some(resolve) = resolve else {
                    continue;
                };
                if let Err(e) = adapter.stop_scan().await {
                    warn!(error = %e, "failed to stop scan after match");
                }
                *shared.target_device.write() = Some(device.clone());
                *shared.state.write() = LinkState::DeviceFound;
                info!(%name, %device, ?rssi, "peripheral found");
                let _ = resolve.send(device);
            }
            RadioEvent::Connected { connection } => {
                if !shared.is_relevant(connection) {
                    continue;
                }
                if shared.current_connection().is_none() {
                    *shared.connection.write() = Some(connection);
                }
                *shared.state.write() = LinkState::ServiceDiscovery;
                debug!(%connection, "connected; discovering services");
                if let Err(e) = adapter.discover_services(connection).await {
                    warn!(error = %e, "service discovery could not be started");
                    shared.resolve_connect(Err(LinkError::ServiceDiscoveryFailed));
                }
            }
            RadioEvent::Disconnected { connection } => {
                if !shared.is_relevant(connection) {
                    continue;
                }
                if shared.resolve_connect(Err(LinkError::ConnectionRejected)) {
                    // The awaiting connect() performs the cleanup.
                    continue;
                }
                // Unsolicited drop outside a connect attempt.
                warn!(%connection, "peripheral dropped the connection");
                let open = shared.connection.write().take();
                if let Some(connection) = open {
                    let _ = adapter.close_connection(connection).await;
                }
                *shared.target_device.write() = None;
                *shared.state.write() = LinkState::Disconnected;
            }
            RadioEvent::ServicesDiscovered { connection } => {
                if !shared.is_relevant(connection) {
                    continue;
                }
                if let Err(e) = adapter
                    .enable_notifications(connection, SERVICE_UUID, CHARACTERISTIC_UUID)
                    .await
                {
                    warn!(error = %e, "enabling notifications failed");
                    shared.resolve_connect(Err(LinkError::ServiceDiscoveryFailed));
                    continue;
                }
                // Fire-and-forget: a refused MTU upgrade never fails the
                // connect.
                if let Err(e) = adapter.request_mtu(connection, REQUESTED_MTU).await {
                    debug!(error = %e, "MTU request refused");
                }
                shared.resolve_connect(Ok(()));
            }
            RadioEvent::ServiceDiscoveryFailed { connection, reason } => {
                if !shared.is_relevant(connection) {
                    continue;
                }
                warn!(%reason, "service discovery failed");
                shared.resolve_connect(Err(LinkError::ServiceDiscoveryFailed));
            }
            RadioEvent::CharacteristicChanged {
                connection,
                characteristic,
                value,
            } => {
                if shared.current_connection() != Some(connection) {
                    continue;
                }
                if characteristic != CHARACTERISTIC_UUID {
                    continue;
                }
                let text = String::from_utf8_lossy(&value).into_owned();
                // Clone the handle out so the slot is unlocked while the
                // callback runs.
                let observer = shared.on_received.read().clone();
                match observer {
                    Some(callback) => callback(text),
                    None => {
                        debug!(len = value.len(), "notification dropped: no observer registered")
                    }
                }
            }
        }
    }
    debug!("adapter event channel closed; pump exiting");
}
