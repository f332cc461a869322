// Scriptable in-memory radio for exercising the link state machine
// without hardware. Every adapter call is recorded; behavior knobs pick
// which events the "peripheral" answers with.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::link::adapter::{ConnectionHandle, DeviceId, RadioAdapter, RadioError, RadioEvent};
use crate::link::config::CHARACTERISTIC_UUID;

/// How the fake peripheral answers `open_connection`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectBehavior {
    /// Emit `Connected` for the issued handle.
    Accept,
    /// Emit `Disconnected` for the issued handle.
    Reject,
    /// Emit nothing; the caller is left waiting.
    Silent,
}

/// One recorded adapter invocation, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FakeCall {
    StartScan(String),
    StopScan,
    OpenConnection(DeviceId),
    DiscoverServices,
    EnableNotifications,
    RequestMtu(u16),
    Write(Vec<u8>),
    CloseConnection,
}

pub(crate) struct FakeRadio {
    available: bool,
    events: mpsc::UnboundedSender<RadioEvent>,
    advertisements: Mutex<Vec<(DeviceId, String)>>,
    connect_behavior: Mutex<ConnectBehavior>,
    discovery_succeeds: AtomicBool,
    notifications_succeed: AtomicBool,
    mtu_succeeds: AtomicBool,
    echo_writes: AtomicBool,
    next_connection: AtomicU64,
    last_connection: AtomicU64,
    calls: Mutex<Vec<FakeCall>>,
}

impl FakeRadio {
    pub(crate) fn new(available: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<RadioEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let radio = Arc::new(Self {
            available,
            events: tx,
            advertisements: Mutex::new(Vec::new()),
            connect_behavior: Mutex::new(ConnectBehavior::Accept),
            discovery_succeeds: AtomicBool::new(true),
            notifications_succeed: AtomicBool::new(true),
            mtu_succeeds: AtomicBool::new(true),
            echo_writes: AtomicBool::new(false),
            next_connection: AtomicU64::new(1),
            last_connection: AtomicU64::new(0),
            calls: Mutex::new(Vec::new()),
        });
        (radio, rx)
    }

    /// Queue an advertisement to be emitted when scanning starts.
    pub(crate) fn advertise(&self, address: &str, name: &str) {
        self.advertisements
            .lock()
            .push((DeviceId(address.to_string()), name.to_string()));
    }

    pub(crate) fn set_connect_behavior(&self, behavior: ConnectBehavior) {
        *self.connect_behavior.lock() = behavior;
    }

    pub(crate) fn set_discovery_succeeds(&self, value: bool) {
        self.discovery_succeeds.store(value, Ordering::SeqCst);
    }

    pub(crate) fn set_notifications_succeed(&self, value: bool) {
        self.notifications_succeed.store(value, Ordering::SeqCst);
    }

    pub(crate) fn set_mtu_succeeds(&self, value: bool) {
        self.mtu_succeeds.store(value, Ordering::SeqCst);
    }

    pub(crate) fn set_echo_writes(&self, value: bool) {
        self.echo_writes.store(value, Ordering::SeqCst);
    }

    /// Inject a raw event, bypassing the scripted behaviors.
    pub(crate) fn emit(&self, event: RadioEvent) {
        let _ = self.events.send(event);
    }

    /// Emit a notification on the fixed characteristic for the most
    /// recently issued connection.
    pub(crate) fn notify(&self, value: Vec<u8>) {
        self.emit(RadioEvent::CharacteristicChanged {
            connection: ConnectionHandle(self.last_connection.load(Ordering::SeqCst)),
            characteristic: CHARACTERISTIC_UUID,
            value,
        });
    }

    pub(crate) fn calls(&self) -> Vec<FakeCall> {
        self.calls.lock().clone()
    }

    pub(crate) fn count(&self, predicate: impl Fn(&FakeCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| predicate(c)).count()
    }

    fn record(&self, call: FakeCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl RadioAdapter for FakeRadio {
    async fn is_available(&self) -> bool {
        self.available
    }

    async fn start_scan(&self, name: &str) -> Result<(), RadioError> {
        self.record(FakeCall::StartScan(name.to_string()));
        // All queued peripherals advertise immediately; name filtering is
        // the consumer's job.
        let queued = std::mem::take(&mut *self.advertisements.lock());
        for (device, advertised) in queued {
            self.emit(RadioEvent::DeviceDiscovered {
                device,
                name: advertised,
                rssi: Some(-60),
            });
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), RadioError> {
        self.record(FakeCall::StopScan);
        Ok(())
    }

    async fn open_connection(&self, device: &DeviceId) -> Result<ConnectionHandle, RadioError> {
        self.record(FakeCall::OpenConnection(device.clone()));
        let connection = ConnectionHandle(self.next_connection.fetch_add(1, Ordering::SeqCst));
        self.last_connection.store(connection.0, Ordering::SeqCst);
        match *self.connect_behavior.lock() {
            ConnectBehavior::Accept => self.emit(RadioEvent::Connected { connection }),
            ConnectBehavior::Reject => self.emit(RadioEvent::Disconnected { connection }),
            ConnectBehavior::Silent => {}
        }
        Ok(connection)
    }

    async fn discover_services(&self, connection: ConnectionHandle) -> Result<(), RadioError> {
        self.record(FakeCall::DiscoverServices);
        if self.discovery_succeeds.load(Ordering::SeqCst) {
            self.emit(RadioEvent::ServicesDiscovered { connection });
        } else {
            self.emit(RadioEvent::ServiceDiscoveryFailed {
                connection,
                reason: "scripted failure".to_string(),
            });
        }
        Ok(())
    }

    async fn enable_notifications(
        &self,
        _connection: ConnectionHandle,
        _service: uuid::Uuid,
        _characteristic: uuid::Uuid,
    ) -> Result<(), RadioError> {
        self.record(FakeCall::EnableNotifications);
        if self.notifications_succeed.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RadioError::Gatt("subscribe refused".to_string()))
        }
    }

    async fn request_mtu(&self, _connection: ConnectionHandle, mtu: u16) -> Result<(), RadioError> {
        self.record(FakeCall::RequestMtu(mtu));
        if self.mtu_succeeds.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RadioError::Gatt("MTU negotiation refused".to_string()))
        }
    }

    async fn write_characteristic(
        &self,
        connection: ConnectionHandle,
        _service: uuid::Uuid,
        characteristic: uuid::Uuid,
        value: &[u8],
    ) -> Result<(), RadioError> {
        self.record(FakeCall::Write(value.to_vec()));
        if self.echo_writes.load(Ordering::SeqCst) {
            self.emit(RadioEvent::CharacteristicChanged {
                connection,
                characteristic,
                value: value.to_vec(),
            });
        }
        Ok(())
    }

    async fn close_connection(&self, _connection: ConnectionHandle) -> Result<(), RadioError> {
        self.record(FakeCall::CloseConnection);
        Ok(())
    }
}
