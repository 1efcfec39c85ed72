//! Session manager tying discovery, connection and telemetry together.
//!
//! All mutable session state lives in one [`SessionCore`] behind a single
//! mutex. Radio completions are consumed serially from one channel, so
//! every transition is applied in arrival order.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::ble::connection::{ConnectionEvent, ConnectionState, ConnectionStateMachine};
use crate::ble::platform::BtleplugRadio;
use crate::ble::radio::{RadioEvent, RadioStack};
use crate::ble::scanner::{DiscoveryController, ScanTimer};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::protocol::TelemetryFrame;
use crate::registry::{PeripheralHandle, PeripheralRegistry, PeripheralRole};
use crate::telemetry::{
    InboundSample, SendOutcome, SensorSample, TelemetryChannel, TelemetryStats,
};

/// Handle for managing callback registrations.
///
/// The callback is unregistered when the handle is dropped.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    /// Create a new callback handle.
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

/// Everything guarded by the session lock.
struct SessionCore {
    config: SessionConfig,
    registry: PeripheralRegistry,
    discovery: DiscoveryController,
    connection: ConnectionStateMachine,
    telemetry: TelemetryChannel,
    scan_timer: ScanTimer,
}

impl SessionCore {
    fn new(config: SessionConfig, runtime: Handle) -> Self {
        Self {
            registry: PeripheralRegistry::new(config.identities.clone()),
            discovery: DiscoveryController::new(config.scan_service, config.scan_timeout),
            connection: ConnectionStateMachine::new(config.characteristics.clone()),
            telemetry: TelemetryChannel::new(config.initial_inbound_value),
            scan_timer: ScanTimer::new(runtime),
            config,
        }
    }

    fn start_scan(&mut self, radio: &dyn RadioStack, events: &mpsc::UnboundedSender<RadioEvent>) {
        let ticket = self.discovery.start_scan(&mut self.registry, radio);
        self.scan_timer.arm(ticket, events.clone());
    }

    fn stop_scan(&mut self, radio: &dyn RadioStack) -> bool {
        self.scan_timer.cancel();
        self.discovery.stop_scan(radio)
    }

    fn dispatch(
        &mut self,
        event: RadioEvent,
        radio: &dyn RadioStack,
        events: &mpsc::UnboundedSender<RadioEvent>,
    ) -> Result<()> {
        match event {
            RadioEvent::AdapterStateChanged { powered_on: true } => {
                info!("Bluetooth powered on");
                if self.config.scan_on_power_on && !self.discovery.is_scanning() {
                    self.start_scan(radio, events);
                }
                Ok(())
            }
            RadioEvent::AdapterStateChanged { powered_on: false } => {
                warn!("Bluetooth is not powered on");
                Ok(())
            }
            RadioEvent::ScanFailed { reason } => {
                self.scan_timer.cancel();
                self.discovery.on_scan_failed(&reason);
                Ok(())
            }
            RadioEvent::ScanTimeout { generation } => {
                if self.discovery.on_scan_timeout(generation, radio) {
                    info!("{} peripherals registered at scan end", self.registry.len());
                }
                Ok(())
            }
            RadioEvent::AdvertisementObserved {
                peripheral,
                local_name,
                rssi,
            } => self
                .discovery
                .on_advertisement(
                    &mut self.registry,
                    &self.connection,
                    radio,
                    &peripheral,
                    local_name.as_deref(),
                    rssi,
                )
                .map(|_| ()),
            RadioEvent::Connected { peripheral } => {
                self.connection
                    .on_connected(&mut self.registry, radio, &peripheral)
            }
            RadioEvent::ConnectFailed { peripheral, reason } => {
                self.connection
                    .on_connect_failed(&mut self.registry, &peripheral, &reason)
            }
            RadioEvent::ServicesDiscovered { peripheral, result } => {
                self.connection.on_services_discovered(
                    &mut self.registry,
                    radio,
                    &peripheral,
                    result.as_deref().map_err(String::as_str),
                )
            }
            RadioEvent::CharacteristicsDiscovered {
                peripheral,
                service,
                result,
            } => self.connection.on_characteristics_discovered(
                &mut self.registry,
                radio,
                &peripheral,
                service,
                result.as_deref().map_err(String::as_str),
            ),
            RadioEvent::DescriptorsDiscovered {
                peripheral,
                characteristic,
                result,
            } => {
                self.connection.on_descriptors_discovered(
                    &peripheral,
                    characteristic,
                    result.as_deref().map_err(String::as_str),
                );
                Ok(())
            }
            RadioEvent::NotificationStateChanged {
                peripheral,
                characteristic,
                result,
            } => self.connection.on_notification_state_changed(
                &mut self.registry,
                &peripheral,
                characteristic,
                result.as_ref().map(|enabled| *enabled).map_err(String::as_str),
            ),
            RadioEvent::ValueUpdated {
                peripheral,
                characteristic,
                value,
            } => {
                let handle = self.registry.require(&peripheral)?;
                let Some(purpose) = handle.purpose_of(characteristic) else {
                    trace!(
                        "Value from unbound characteristic {} on {}",
                        characteristic,
                        peripheral
                    );
                    return Ok(());
                };

                self.telemetry
                    .on_notification(&peripheral, purpose, &value)
                    .map(|_| ())
            }
            RadioEvent::WriteCompleted {
                peripheral, result, ..
            } => match result {
                Ok(()) => {
                    self.telemetry.on_write_confirmed();
                    Ok(())
                }
                Err(reason) => {
                    self.telemetry.on_write_failed(&peripheral, &reason);
                    Err(Error::WriteFailed {
                        identifier: peripheral.to_string(),
                        reason,
                    })
                }
            },
            RadioEvent::Disconnected { peripheral } => {
                self.connection.on_disconnected(&mut self.registry, &peripheral)
            }
        }
    }
}

/// State shared with the event loop task.
struct Shared<R> {
    core: Mutex<SessionCore>,
    radio: R,
    events_tx: mpsc::UnboundedSender<RadioEvent>,
}

impl<R: RadioStack> Shared<R> {
    fn handle_event(&self, event: RadioEvent) {
        if let Some(peripheral) = event.peripheral() {
            trace!("Radio event for {}: {:?}", peripheral, event);
        } else {
            trace!("Radio event: {:?}", event);
        }

        let result = self
            .core
            .lock()
            .dispatch(event, &self.radio, &self.events_tx);

        match result {
            Ok(()) => {}
            Err(e @ Error::PeripheralNotFound { .. }) => debug!("{}", e),
            Err(e) => warn!("{}", e),
        }
    }
}

/// Central manager for one `Primary` and one `Auxiliary` peripheral.
pub struct SessionManager<R: RadioStack + 'static = BtleplugRadio> {
    /// Session state, radio and event sender.
    shared: Arc<Shared<R>>,
    /// Runtime background tasks are spawned on.
    runtime: Handle,
    /// Event loop task handle.
    event_loop: RwLock<Option<JoinHandle<()>>>,
    /// Callback ID counter.
    callback_counter: AtomicU64,
}

impl SessionManager<BtleplugRadio> {
    /// Open the first Bluetooth adapter and start processing its events.
    ///
    /// Scanning starts once the adapter reports it is powered on, unless
    /// [`SessionConfig::scan_on_power_on`] is disabled.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn with_btleplug(config: SessionConfig) -> Result<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let radio = BtleplugRadio::new(events_tx.clone()).await?;
        let session = Self::new(config, radio, events_tx);

        session.spawn_event_loop(events_rx);
        session.radio().start_event_pump().await?;

        Ok(session)
    }
}

impl<R: RadioStack + 'static> SessionManager<R> {
    /// Create a session over `radio`, spawning its background tasks on the
    /// current tokio runtime.
    ///
    /// `events_tx` must be the sender the radio reports completions on.
    /// Nothing is processed until [`spawn_event_loop`](Self::spawn_event_loop)
    /// is called or events are fed to [`handle_event`](Self::handle_event).
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime; use
    /// [`with_runtime`](Self::with_runtime) there.
    pub fn new(
        config: SessionConfig,
        radio: R,
        events_tx: mpsc::UnboundedSender<RadioEvent>,
    ) -> Self {
        Self::with_runtime(config, radio, events_tx, Handle::current())
    }

    /// Create a session whose background tasks run on `runtime`.
    ///
    /// Every other method may then be called from any thread, inside a
    /// runtime or not.
    pub fn with_runtime(
        config: SessionConfig,
        radio: R,
        events_tx: mpsc::UnboundedSender<RadioEvent>,
        runtime: Handle,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                core: Mutex::new(SessionCore::new(config, runtime.clone())),
                radio,
                events_tx,
            }),
            runtime,
            event_loop: RwLock::new(None),
            callback_counter: AtomicU64::new(0),
        }
    }

    /// Consume radio events in a background task.
    pub fn spawn_event_loop(&self, mut events: mpsc::UnboundedReceiver<RadioEvent>) {
        let shared = self.shared.clone();

        let handle = self.runtime.spawn(async move {
            while let Some(event) = events.recv().await {
                shared.handle_event(event);
            }

            debug!("Session event loop ended");
        });

        if let Some(previous) = self.event_loop.write().replace(handle) {
            previous.abort();
        }
    }

    /// Apply one radio event.
    pub fn handle_event(&self, event: RadioEvent) {
        self.shared.handle_event(event);
    }

    /// The radio this session drives.
    pub fn radio(&self) -> &R {
        &self.shared.radio
    }

    // === Scanning ===

    /// Start a scan bounded by [`SessionConfig::scan_timeout`].
    ///
    /// Restarting supersedes the previous timeout.
    pub fn start_scan(&self) {
        let shared = &self.shared;
        shared.core.lock().start_scan(&shared.radio, &shared.events_tx);
    }

    /// Stop scanning now. Returns `false` if no scan was active.
    pub fn stop_scan(&self) -> bool {
        self.shared.core.lock().stop_scan(&self.shared.radio)
    }

    /// Check if scanning is active.
    pub fn is_scanning(&self) -> bool {
        self.shared.core.lock().discovery.is_scanning()
    }

    // === Peripherals ===

    /// Connection state of the peripheral holding `role`, if any.
    pub fn connection_state(&self, role: PeripheralRole) -> Option<ConnectionState> {
        self.shared
            .core
            .lock()
            .registry
            .handle_for_role(role)
            .map(PeripheralHandle::state)
    }

    /// Snapshot of every registered peripheral.
    pub fn peripherals(&self) -> Vec<PeripheralHandle> {
        self.shared.core.lock().registry.snapshot()
    }

    /// Subscribe to connection state changes.
    pub fn subscribe_connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.core.lock().connection.subscribe()
    }

    /// Register a callback for connection state changes.
    pub fn on_connection_changed<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        let rx = self.subscribe_connection_events();
        self.forward(rx, callback)
    }

    /// Tear down every peripheral. Roles become free for the next scan.
    pub fn disconnect_all(&self) {
        let mut guard = self.shared.core.lock();
        let core = &mut *guard;

        for id in core.registry.identities() {
            if let Err(e) = core
                .connection
                .teardown(&mut core.registry, &self.shared.radio, &id)
            {
                warn!("Error disconnecting {}: {}", id, e);
            }
        }
    }

    /// Stop scanning, disconnect everything and stop processing events.
    pub fn shutdown(&self) {
        info!("Shutting down session");

        self.stop_scan();
        self.disconnect_all();

        if let Some(handle) = self.event_loop.write().take() {
            handle.abort();
        }
    }

    // === Telemetry ===

    /// Write a frame to the `Primary` peripheral, or drop it if that is not
    /// possible right now.
    ///
    /// Never blocks on the radio and may be called from any thread.
    pub fn send(&self, frame: TelemetryFrame) -> SendOutcome {
        let mut guard = self.shared.core.lock();
        let core = &mut *guard;

        core.telemetry.send(&core.registry, &self.shared.radio, frame)
    }

    /// Map a raw sample to a frame and send it.
    ///
    /// A sample without an auxiliary value uses the last inbound value.
    pub fn send_sample(&self, sample: SensorSample) -> SendOutcome {
        let mut guard = self.shared.core.lock();
        let core = &mut *guard;

        let frame = sample.to_frame(&core.config.source_ranges, core.telemetry.last_value());
        core.telemetry.send(&core.registry, &self.shared.radio, frame)
    }

    /// Whether a write is outstanding.
    pub fn is_sending(&self) -> bool {
        self.shared.core.lock().telemetry.is_sending()
    }

    /// Last value received from the `Auxiliary` peripheral.
    pub fn last_inbound_value(&self) -> i64 {
        self.shared.core.lock().telemetry.last_value()
    }

    /// Subscribe to inbound samples.
    pub fn subscribe_inbound(&self) -> broadcast::Receiver<InboundSample> {
        self.shared.core.lock().telemetry.subscribe()
    }

    /// Register a callback for inbound samples.
    pub fn on_inbound_sample<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&InboundSample) + Send + Sync + 'static,
    {
        let rx = self.subscribe_inbound();
        self.forward(rx, callback)
    }

    /// Diagnostic counters.
    pub fn telemetry_stats(&self) -> TelemetryStats {
        self.shared.core.lock().telemetry.stats()
    }

    fn forward<T, F>(&self, mut rx: broadcast::Receiver<T>, callback: F) -> CallbackHandle
    where
        T: Clone + Send + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);

        let handle = self.runtime.spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(item) => callback(&item),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Callback {} lagged, skipped {} items", callback_id, skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }
}

impl<R: RadioStack + 'static> Drop for SessionManager<R> {
    fn drop(&mut self) {
        if let Some(handle) = self.event_loop.write().take() {
            handle.abort();
        }
    }
}
