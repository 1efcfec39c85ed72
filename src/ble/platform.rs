//! [`RadioStack`] backed by btleplug.
//!
//! btleplug exposes awaitable operations; each request here spawns a task
//! that awaits the operation and reports the outcome as a [`RadioEvent`].
//! Adapter events and per-peripheral notification streams are pumped into
//! the same channel.

use btleplug::api::{
    Central, CentralEvent, CentralState, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::radio::{RadioEvent, RadioStack};
use crate::error::{Error, Result};
use crate::registry::PeripheralId;

type EventSender = mpsc::UnboundedSender<RadioEvent>;
type PeripheralMap = Arc<RwLock<HashMap<PeripheralId, Peripheral>>>;

/// Radio stack driving a btleplug adapter.
pub struct BtleplugRadio {
    /// The BLE adapter.
    adapter: Adapter,
    /// Peripherals seen by the adapter, by identity.
    peripherals: PeripheralMap,
    /// Channel completions are reported on.
    events: EventSender,
    /// Runtime request tasks are spawned on, so requests can be issued from
    /// threads outside it.
    runtime: Handle,
    /// Handle to the adapter event pump.
    pump_handle: RwLock<Option<JoinHandle<()>>>,
    /// Notification listener per connected peripheral.
    listeners: Arc<RwLock<HashMap<PeripheralId, JoinHandle<()>>>>,
}

impl BtleplugRadio {
    /// Open the first Bluetooth adapter. Requests are spawned on the runtime
    /// this is awaited on.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new(events: EventSender) -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter, events, Handle::current()))
    }

    /// Use a specific adapter, spawning request tasks on `runtime`.
    pub fn with_adapter(adapter: Adapter, events: EventSender, runtime: Handle) -> Self {
        Self {
            adapter,
            peripherals: Arc::new(RwLock::new(HashMap::new())),
            events,
            runtime,
            pump_handle: RwLock::new(None),
            listeners: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start forwarding adapter events (advertisements, disconnects and
    /// power state) to the event channel.
    pub async fn start_event_pump(&self) -> Result<()> {
        if self.pump_handle.read().is_some() {
            debug!("Adapter event pump already running");
            return Ok(());
        }

        let mut events = self.adapter.events().await.map_err(Error::Bluetooth)?;

        let adapter = self.adapter.clone();
        let peripherals = self.peripherals.clone();
        let listeners = self.listeners.clone();
        let tx = self.events.clone();

        let handle = self.runtime.spawn(async move {
            while let Some(event) = events.next().await {
                if tx.is_closed() {
                    break;
                }
                Self::handle_central_event(event, &adapter, &peripherals, &listeners, &tx).await;
            }

            debug!("Adapter event pump ended");
        });

        *self.pump_handle.write() = Some(handle);

        // The adapter may already be on; report it so scanning can start.
        if let Ok(state) = self.adapter.adapter_state().await {
            let _ = self.events.send(RadioEvent::AdapterStateChanged {
                powered_on: state == CentralState::PoweredOn,
            });
        }

        Ok(())
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    async fn handle_central_event(
        event: CentralEvent,
        adapter: &Adapter,
        peripherals: &PeripheralMap,
        listeners: &Arc<RwLock<HashMap<PeripheralId, JoinHandle<()>>>>,
        tx: &EventSender,
    ) {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                trace!("Device seen: {:?}", id);

                let peripheral = match adapter.peripheral(&id).await {
                    Ok(p) => p,
                    Err(e) => {
                        trace!("Failed to get peripheral: {}", e);
                        return;
                    }
                };

                let properties = match peripheral.properties().await {
                    Ok(Some(p)) => p,
                    _ => return,
                };

                let identity = PeripheralId::new(id.to_string());
                peripherals.write().insert(identity.clone(), peripheral);

                let _ = tx.send(RadioEvent::AdvertisementObserved {
                    peripheral: identity,
                    local_name: properties.local_name,
                    rssi: properties.rssi,
                });
            }
            CentralEvent::DeviceConnected(id) => {
                debug!("Device connected: {:?}", id);
            }
            CentralEvent::DeviceDisconnected(id) => {
                debug!("Device disconnected: {:?}", id);

                let identity = PeripheralId::new(id.to_string());
                if let Some(listener) = listeners.write().remove(&identity) {
                    listener.abort();
                }

                let _ = tx.send(RadioEvent::Disconnected {
                    peripheral: identity,
                });
            }
            CentralEvent::StateUpdate(state) => {
                let _ = tx.send(RadioEvent::AdapterStateChanged {
                    powered_on: state == CentralState::PoweredOn,
                });
            }
            CentralEvent::ManufacturerDataAdvertisement { .. } => {}
            CentralEvent::ServiceDataAdvertisement { .. } => {}
            CentralEvent::ServicesAdvertisement { .. } => {}
        }
    }

    fn lookup(&self, id: &PeripheralId) -> Option<Peripheral> {
        self.peripherals.read().get(id).cloned()
    }

    fn find_characteristic(peripheral: &Peripheral, uuid: Uuid) -> Option<Characteristic> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
    }

    /// Forward the peripheral's notifications as [`RadioEvent::ValueUpdated`].
    fn start_notification_listener(
        peripheral: Peripheral,
        id: PeripheralId,
        listeners: Arc<RwLock<HashMap<PeripheralId, JoinHandle<()>>>>,
        tx: EventSender,
    ) {
        if listeners.read().contains_key(&id) {
            return;
        }

        let key = id.clone();
        let handle = tokio::spawn(async move {
            let mut notifications = match peripheral.notifications().await {
                Ok(n) => n,
                Err(e) => {
                    error!("Failed to get notifications stream for {}: {}", id, e);
                    return;
                }
            };

            while let Some(notification) = notifications.next().await {
                trace!(
                    "Notification from {} on {}: {:02X?}",
                    id,
                    notification.uuid,
                    notification.value
                );

                let event = RadioEvent::ValueUpdated {
                    peripheral: id.clone(),
                    characteristic: notification.uuid,
                    value: notification.value,
                };

                if tx.send(event).is_err() {
                    break;
                }
            }

            debug!("Notification listener for {} stopped", id);
        });

        listeners.write().insert(key, handle);
    }
}

impl RadioStack for BtleplugRadio {
    fn start_scan(&self, service: Option<Uuid>) {
        let adapter = self.adapter.clone();
        let tx = self.events.clone();
        let filter = ScanFilter {
            services: service.into_iter().collect(),
        };

        self.runtime.spawn(async move {
            if let Err(e) = adapter.start_scan(filter).await {
                let _ = tx.send(RadioEvent::ScanFailed {
                    reason: e.to_string(),
                });
            }
        });
    }

    fn stop_scan(&self) {
        let adapter = self.adapter.clone();

        self.runtime.spawn(async move {
            if let Err(e) = adapter.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }
        });
    }

    fn connect(&self, id: &PeripheralId) {
        let tx = self.events.clone();

        let Some(peripheral) = self.lookup(id) else {
            let _ = tx.send(RadioEvent::ConnectFailed {
                peripheral: id.clone(),
                reason: unknown(id),
            });
            return;
        };

        let id = id.clone();
        let listeners = self.listeners.clone();

        self.runtime.spawn(async move {
            match peripheral.connect().await {
                Ok(()) => {
                    Self::start_notification_listener(
                        peripheral,
                        id.clone(),
                        listeners,
                        tx.clone(),
                    );
                    let _ = tx.send(RadioEvent::Connected { peripheral: id });
                }
                Err(e) => {
                    let _ = tx.send(RadioEvent::ConnectFailed {
                        peripheral: id,
                        reason: e.to_string(),
                    });
                }
            }
        });
    }

    fn cancel_connection(&self, id: &PeripheralId) {
        if let Some(listener) = self.listeners.write().remove(id) {
            listener.abort();
        }

        let Some(peripheral) = self.lookup(id) else {
            return;
        };
        let id = id.clone();

        self.runtime.spawn(async move {
            if let Err(e) = peripheral.disconnect().await {
                warn!("Failed to disconnect from {}: {}", id, e);
            }
        });
    }

    fn discover_services(&self, id: &PeripheralId) {
        let tx = self.events.clone();

        let Some(peripheral) = self.lookup(id) else {
            let _ = tx.send(RadioEvent::ServicesDiscovered {
                peripheral: id.clone(),
                result: Err(unknown(id)),
            });
            return;
        };
        let id = id.clone();

        self.runtime.spawn(async move {
            let result = match peripheral.discover_services().await {
                Ok(()) => Ok(peripheral.services().iter().map(|s| s.uuid).collect()),
                Err(e) => Err(e.to_string()),
            };

            let _ = tx.send(RadioEvent::ServicesDiscovered {
                peripheral: id,
                result,
            });
        });
    }

    fn discover_characteristics(&self, id: &PeripheralId, service: Uuid) {
        // btleplug resolves characteristics during service discovery.
        let result = match self.lookup(id) {
            Some(peripheral) => peripheral
                .services()
                .into_iter()
                .find(|s| s.uuid == service)
                .map(|s| s.characteristics.iter().map(|c| c.uuid).collect())
                .ok_or_else(|| {
                    Error::ServiceNotFound {
                        uuid: service.to_string(),
                    }
                    .to_string()
                }),
            None => Err(unknown(id)),
        };

        let _ = self.events.send(RadioEvent::CharacteristicsDiscovered {
            peripheral: id.clone(),
            service,
            result,
        });
    }

    fn discover_descriptors(&self, id: &PeripheralId, characteristic: Uuid) {
        let result = match self.lookup(id) {
            Some(peripheral) => Self::find_characteristic(&peripheral, characteristic)
                .map(|c| c.descriptors.iter().map(|d| d.uuid).collect())
                .ok_or_else(|| not_found(characteristic)),
            None => Err(unknown(id)),
        };

        let _ = self.events.send(RadioEvent::DescriptorsDiscovered {
            peripheral: id.clone(),
            characteristic,
            result,
        });
    }

    fn set_notify(&self, id: &PeripheralId, characteristic: Uuid, enabled: bool) {
        let tx = self.events.clone();
        let found = self
            .lookup(id)
            .and_then(|p| Self::find_characteristic(&p, characteristic).map(|c| (p, c)));

        let Some((peripheral, target)) = found else {
            let _ = tx.send(RadioEvent::NotificationStateChanged {
                peripheral: id.clone(),
                characteristic,
                result: Err(not_found(characteristic)),
            });
            return;
        };
        let id = id.clone();

        self.runtime.spawn(async move {
            let result = if enabled {
                peripheral.subscribe(&target).await
            } else {
                peripheral.unsubscribe(&target).await
            };

            let _ = tx.send(RadioEvent::NotificationStateChanged {
                peripheral: id,
                characteristic,
                result: result.map(|()| enabled).map_err(|e| e.to_string()),
            });
        });
    }

    fn read_value(&self, id: &PeripheralId, characteristic: Uuid) {
        let found = self
            .lookup(id)
            .and_then(|p| Self::find_characteristic(&p, characteristic).map(|c| (p, c)));

        let Some((peripheral, target)) = found else {
            debug!("Cannot read {} on {}: not found", characteristic, id);
            return;
        };
        let id = id.clone();
        let tx = self.events.clone();

        self.runtime.spawn(async move {
            match peripheral.read(&target).await {
                Ok(value) => {
                    let _ = tx.send(RadioEvent::ValueUpdated {
                        peripheral: id,
                        characteristic,
                        value,
                    });
                }
                Err(e) => debug!("Read of {} on {} failed: {}", characteristic, id, e),
            }
        });
    }

    fn write_without_response(&self, id: &PeripheralId, characteristic: Uuid, data: Bytes) {
        let tx = self.events.clone();
        let found = self
            .lookup(id)
            .and_then(|p| Self::find_characteristic(&p, characteristic).map(|c| (p, c)));

        let Some((peripheral, target)) = found else {
            let _ = tx.send(RadioEvent::WriteCompleted {
                peripheral: id.clone(),
                characteristic,
                result: Err(not_found(characteristic)),
            });
            return;
        };
        let id = id.clone();

        self.runtime.spawn(async move {
            let result = peripheral
                .write(&target, &data, WriteType::WithoutResponse)
                .await
                .map_err(|e| e.to_string());

            let _ = tx.send(RadioEvent::WriteCompleted {
                peripheral: id,
                characteristic,
                result,
            });
        });
    }
}

fn unknown(id: &PeripheralId) -> String {
    Error::PeripheralNotFound {
        identifier: id.to_string(),
    }
    .to_string()
}

fn not_found(characteristic: Uuid) -> String {
    Error::CharacteristicNotFound {
        uuid: characteristic.to_string(),
    }
    .to_string()
}

impl Drop for BtleplugRadio {
    fn drop(&mut self) {
        if let Some(handle) = self.pump_handle.write().take() {
            handle.abort();
        }
        for (_, listener) in self.listeners.write().drain() {
            listener.abort();
        }
    }
}
