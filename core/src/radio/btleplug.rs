// btleplug-backed RadioAdapter.
//
// Bridges the btleplug central API onto the adapter boundary: central
// events are translated into RadioEvents by one long-lived pump task, and
// notification streams are forwarded by a per-connection task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::link::adapter::{ConnectionHandle, DeviceId, RadioAdapter, RadioError, RadioEvent};

struct OpenConnection {
    handle: ConnectionHandle,
    peripheral: Peripheral,
}

/// BLE central over the host Bluetooth stack.
///
/// One adapter instance serves one [`crate::BleLink`]; the event receiver
/// returned by [`BtleplugRadio::new`] is handed straight to the link.
pub struct BtleplugRadio {
    adapter: Adapter,
    events: mpsc::UnboundedSender<RadioEvent>,
    discovered: Arc<Mutex<HashMap<DeviceId, Peripheral>>>,
    open: Arc<Mutex<Option<OpenConnection>>>,
    scan_target: Arc<Mutex<Option<String>>>,
    next_connection: AtomicU64,
    event_task: JoinHandle<()>,
    notify_task: Mutex<Option<JoinHandle<()>>>,
}

impl BtleplugRadio {
    /// Open the first Bluetooth adapter on the host and start the event
    /// pump. Fails with [`RadioError::Unavailable`] when no adapter is
    /// present.
    pub async fn new() -> Result<(Arc<Self>, mpsc::UnboundedReceiver<RadioEvent>), RadioError> {
        let manager = Manager::new()
            .await
            .map_err(|_| RadioError::Unavailable)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(|_| RadioError::Unavailable)?
            .into_iter()
            .next()
            .ok_or(RadioError::Unavailable)?;
        info!("bluetooth adapter opened");

        let (tx, rx) = mpsc::unbounded_channel();
        let discovered = Arc::new(Mutex::new(HashMap::new()));
        let open = Arc::new(Mutex::new(None));
        let scan_target = Arc::new(Mutex::new(None));

        let central_events = adapter
            .events()
            .await
            .map_err(|e| RadioError::Scan(e.to_string()))?;
        let event_task = tokio::spawn(run_central_pump(
            adapter.clone(),
            tx.clone(),
            discovered.clone(),
            open.clone(),
            scan_target.clone(),
            central_events,
        ));

        let radio = Arc::new(Self {
            adapter,
            events: tx,
            discovered,
            open,
            scan_target,
            next_connection: AtomicU64::new(1),
            event_task,
            notify_task: Mutex::new(None),
        });
        Ok((radio, rx))
    }

    fn peripheral_for(&self, connection: ConnectionHandle) -> Result<Peripheral, RadioError> {
        let open = self.open.lock();
        match open.as_ref() {
            Some(conn) if conn.handle == connection => Ok(conn.peripheral.clone()),
            _ => Err(RadioError::Gatt(format!("no open connection {connection}"))),
        }
    }
}

#[async_trait]
impl RadioAdapter for BtleplugRadio {
    async fn is_available(&self) -> bool {
        // Construction already proved an adapter exists.
        true
    }

    async fn start_scan(&self, name: &str) -> Result<(), RadioError> {
        *self.scan_target.lock() = Some(name.to_string());
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| RadioError::Scan(e.to_string()))
    }

    async fn stop_scan(&self) -> Result<(), RadioError> {
        self.scan_target.lock().take();
        self.adapter
            .stop_scan()
            .await
            .map_err(|e| RadioError::Scan(e.to_string()))
    }

    async fn open_connection(&self, device: &DeviceId) -> Result<ConnectionHandle, RadioError> {
        let peripheral = self
            .discovered
            .lock()
            .get(device)
            .cloned()
            .ok_or_else(|| RadioError::Connection(format!("unknown peripheral {device}")))?;
        peripheral
            .connect()
            .await
            .map_err(|e| RadioError::Connection(e.to_string()))?;

        let handle = ConnectionHandle(self.next_connection.fetch_add(1, Ordering::SeqCst));
        *self.open.lock() = Some(OpenConnection {
            handle,
            peripheral,
        });
        debug!(%device, %handle, "peripheral connected");
        let _ = self.events.send(RadioEvent::Connected { connection: handle });
        Ok(handle)
    }

    async fn discover_services(&self, connection: ConnectionHandle) -> Result<(), RadioError> {
        let peripheral = self.peripheral_for(connection)?;
        match peripheral.discover_services().await {
            Ok(()) => {
                let _ = self
                    .events
                    .send(RadioEvent::ServicesDiscovered { connection });
            }
            Err(e) => {
                let _ = self.events.send(RadioEvent::ServiceDiscoveryFailed {
                    connection,
                    reason: e.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn enable_notifications(
        &self,
        connection: ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), RadioError> {
        let peripheral = self.peripheral_for(connection)?;
        let target = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic && c.service_uuid == service)
            .ok_or_else(|| {
                RadioError::Gatt(format!("characteristic {characteristic} not found"))
            })?;
        peripheral
            .subscribe(&target)
            .await
            .map_err(|e| RadioError::Gatt(e.to_string()))?;

        let mut stream = peripheral
            .notifications()
            .await
            .map_err(|e| RadioError::Gatt(e.to_string()))?;
        let events = self.events.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                let _ = events.send(RadioEvent::CharacteristicChanged {
                    connection,
                    characteristic: notification.uuid,
                    value: notification.value,
                });
            }
        });
        if let Some(previous) = self.notify_task.lock().replace(forwarder) {
            previous.abort();
        }
        debug!(%connection, %characteristic, "notifications enabled");
        Ok(())
    }

    async fn request_mtu(&self, connection: ConnectionHandle, mtu: u16) -> Result<(), RadioError> {
        // The host stacks btleplug wraps negotiate ATT MTU on their own and
        // expose no request call; long writes are fragmented transparently.
        debug!(%connection, mtu, "MTU negotiation left to the platform stack");
        Ok(())
    }

    async fn write_characteristic(
        &self,
        connection: ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), RadioError> {
        let peripheral = self.peripheral_for(connection)?;
        let target = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic && c.service_uuid == service)
            .ok_or_else(|| {
                RadioError::Gatt(format!("characteristic {characteristic} not found"))
            })?;
        peripheral
            .write(&target, value, WriteType::WithResponse)
            .await
            .map_err(|e| RadioError::Gatt(e.to_string()))
    }

    async fn close_connection(&self, connection: ConnectionHandle) -> Result<(), RadioError> {
        let taken = {
            let mut open = self.open.lock();
            match open.as_ref() {
                Some(conn) if conn.handle == connection => open.take(),
                _ => None,
            }
        };
        let Some(conn) = taken else {
            return Ok(());
        };
        if let Some(forwarder) = self.notify_task.lock().take() {
            forwarder.abort();
        }
        if conn.peripheral.is_connected().await.unwrap_or(false) {
            if let Err(e) = conn.peripheral.disconnect().await {
                warn!(error = %e, %connection, "disconnect failed");
            }
        }
        debug!(%connection, "connection closed");
        Ok(())
    }
}

impl Drop for BtleplugRadio {
    fn drop(&mut self) {
        self.event_task.abort();
        if let Some(forwarder) = self.notify_task.lock().take() {
            forwarder.abort();
        }
    }
}

/// Translate btleplug central events into [`RadioEvent`]s.
///
/// Discovery events are filtered against the current scan target by
/// advertised local name; everything not scanned for stays out of the
/// discovered map. Disconnects are matched against the open connection.
async fn run_central_pump(
    adapter: Adapter,
    events: mpsc::UnboundedSender<RadioEvent>,
    discovered: Arc<Mutex<HashMap<DeviceId, Peripheral>>>,
    open: Arc<Mutex<Option<OpenConnection>>>,
    scan_target: Arc<Mutex<Option<String>>>,
    mut central_events: std::pin::Pin<Box<dyn futures::Stream<Item = CentralEvent> + Send>>,
) {
    while let Some(event) = central_events.next().await {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                let wanted = scan_target.lock().clone();
                let Some(wanted) = wanted else {
                    continue;
                };
                let Ok(peripheral) = adapter.peripheral(&id).await else {
                    continue;
                };
                let Ok(Some(properties)) = peripheral.properties().await else {
                    continue;
                };
                let Some(name) = properties.local_name else {
                    continue;
                };
                if name != wanted {
                    continue;
                }
                let device = DeviceId(peripheral.id().to_string());
                discovered.lock().insert(device.clone(), peripheral);
                let _ = events.send(RadioEvent::DeviceDiscovered {
                    device,
                    name,
                    rssi: properties.rssi,
                });
            }
            CentralEvent::DeviceDisconnected(id) => {
                let dropped = {
                    let open = open.lock();
                    open.as_ref()
                        .filter(|conn| conn.peripheral.id() == id)
                        .map(|conn| conn.handle)
                };
                if let Some(connection) = dropped {
                    debug!(%connection, "peripheral reported disconnected");
                    let _ = events.send(RadioEvent::Disconnected { connection });
                }
            }
            _ => {}
        }
    }
    debug!("central event stream ended");
}
