//! BLE scanning functionality.
//!
//! Provides the discovery controller that bounds scanning with a one-shot
//! timeout and funnels advertisements into the registry.

use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ble::connection::ConnectionStateMachine;
use crate::ble::radio::{RadioEvent, RadioStack};
use crate::error::Result;
use crate::registry::{PeripheralId, PeripheralRegistry, RegistryAction};

/// A started scan and the timeout that must be armed for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanTicket {
    /// Generation of the scan; a timeout only applies to its own generation.
    pub generation: u64,
    /// How long until the scan is stopped.
    pub timeout: Duration,
}

/// Drives time-bounded scanning.
#[derive(Debug)]
pub struct DiscoveryController {
    /// Service advertisements are filtered to.
    service: Option<Uuid>,
    /// Scan duration.
    timeout: Duration,
    /// Whether scanning is currently active.
    is_scanning: bool,
    /// Incremented on every start and stop.
    generation: u64,
}

impl DiscoveryController {
    /// Create a controller scanning for `service` for at most `timeout`.
    pub fn new(service: Option<Uuid>, timeout: Duration) -> Self {
        Self {
            service,
            timeout,
            is_scanning: false,
            generation: 0,
        }
    }

    /// Start a fresh scan.
    ///
    /// Drops peripherals that were registered but never connected, and
    /// supersedes any timeout armed for an earlier scan.
    pub fn start_scan(
        &mut self,
        registry: &mut PeripheralRegistry,
        radio: &dyn RadioStack,
    ) -> ScanTicket {
        let cleared = registry.clear_unconnected();
        if cleared > 0 {
            debug!("Cleared {} unconnected peripherals", cleared);
        }

        self.generation += 1;
        self.is_scanning = true;

        info!(
            "Starting BLE scan (generation {}, service {:?}, timeout {:?})",
            self.generation, self.service, self.timeout
        );

        radio.start_scan(self.service);

        ScanTicket {
            generation: self.generation,
            timeout: self.timeout,
        }
    }

    /// Stop scanning now. Returns `false` if no scan was active.
    pub fn stop_scan(&mut self, radio: &dyn RadioStack) -> bool {
        if !self.is_scanning {
            debug!("Not scanning, ignoring stop request");
            return false;
        }

        info!("Stopping BLE scan");

        self.generation += 1;
        self.is_scanning = false;
        radio.stop_scan();

        true
    }

    /// Handle a fired timeout. Stale generations are ignored.
    ///
    /// Returns `true` if the scan was stopped.
    pub fn on_scan_timeout(&mut self, generation: u64, radio: &dyn RadioStack) -> bool {
        if generation != self.generation || !self.is_scanning {
            trace!(
                "Ignoring stale scan timeout (generation {}, current {})",
                generation,
                self.generation
            );
            return false;
        }

        info!("Scan timed out after {:?}", self.timeout);

        self.is_scanning = false;
        radio.stop_scan();

        true
    }

    /// The stack could not start scanning.
    pub fn on_scan_failed(&mut self, reason: &str) {
        warn!("Scan failed: {}", reason);
        self.is_scanning = false;
        self.generation += 1;
    }

    /// Feed an advertisement to the registry and connect if it filled a role.
    pub fn on_advertisement(
        &self,
        registry: &mut PeripheralRegistry,
        connection: &ConnectionStateMachine,
        radio: &dyn RadioStack,
        id: &PeripheralId,
        local_name: Option<&str>,
        rssi: Option<i16>,
    ) -> Result<RegistryAction> {
        if !self.is_scanning {
            trace!("Not scanning, dropping advertisement from {}", id);
            return Ok(RegistryAction::Ignored);
        }

        let action = registry.on_advertisement_observed(id, local_name, rssi);

        if action == RegistryAction::ConnectRequested {
            connection.request_connect(registry, radio, id)?;
        }

        Ok(action)
    }

    /// Check if currently scanning.
    pub fn is_scanning(&self) -> bool {
        self.is_scanning
    }

    /// Current scan generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Configured scan timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// The single pending scan timeout.
///
/// The timeout is delivered as [`RadioEvent::ScanTimeout`] on the session's
/// event channel so it is handled in order with the radio callbacks.
#[derive(Debug)]
pub struct ScanTimer {
    /// Runtime the timeout task is spawned on.
    runtime: Handle,
    /// Handle to the pending timeout task.
    pending: Option<JoinHandle<()>>,
}

impl ScanTimer {
    /// Create a timer with nothing armed, spawning on `runtime`.
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            pending: None,
        }
    }

    /// Cancel any pending timeout and arm one for `ticket`.
    ///
    /// May be called from any thread.
    pub fn arm(&mut self, ticket: ScanTicket, events: mpsc::UnboundedSender<RadioEvent>) {
        self.cancel();

        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(ticket.timeout).await;
            trace!("Scan timeout for generation {} fired", ticket.generation);
            let _ = events.send(RadioEvent::ScanTimeout {
                generation: ticket.generation,
            });
        });

        self.pending = Some(handle);
    }

    /// Cancel the pending timeout, if any.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    /// Whether a timeout is armed and has not fired yet.
    pub fn is_armed(&self) -> bool {
        self.pending
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for ScanTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::connection::ConnectionState;
    use crate::ble::radio::MockRadioStack;
    use crate::ble::uuids::*;
    use crate::config::{CharacteristicIdentities, IdentityPatterns};
    use mockall::predicate::*;

    const TIMEOUT: Duration = Duration::from_secs(17);

    fn parts() -> (
        DiscoveryController,
        PeripheralRegistry,
        ConnectionStateMachine,
    ) {
        (
            DiscoveryController::new(Some(UART_SERVICE_UUID), TIMEOUT),
            PeripheralRegistry::new(IdentityPatterns::default()),
            ConnectionStateMachine::new(CharacteristicIdentities::default()),
        )
    }

    #[test]
    fn test_start_scan_filters_to_service() {
        let (mut discovery, mut registry, _) = parts();

        let mut radio = MockRadioStack::new();
        radio
            .expect_start_scan()
            .with(eq(Some(UART_SERVICE_UUID)))
            .times(1)
            .return_const(());

        let ticket = discovery.start_scan(&mut registry, &radio);

        assert!(discovery.is_scanning());
        assert_eq!(ticket.generation, 1);
        assert_eq!(ticket.generation, discovery.generation());
        assert_eq!(ticket.timeout, TIMEOUT);
        assert_eq!(discovery.timeout(), TIMEOUT);
    }

    #[test]
    fn test_timeout_stops_scan_unconditionally() {
        let (mut discovery, mut registry, _) = parts();

        let mut radio = MockRadioStack::new();
        radio.expect_start_scan().return_const(());
        radio.expect_stop_scan().times(1).return_const(());

        let ticket = discovery.start_scan(&mut registry, &radio);
        assert!(discovery.on_scan_timeout(ticket.generation, &radio));

        assert!(!discovery.is_scanning());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_stale_timeout_does_not_stop_newer_scan() {
        let (mut discovery, mut registry, _) = parts();

        let mut radio = MockRadioStack::new();
        radio.expect_start_scan().times(2).return_const(());
        radio.expect_stop_scan().never();

        let first = discovery.start_scan(&mut registry, &radio);
        let second = discovery.start_scan(&mut registry, &radio);
        assert_ne!(first.generation, second.generation);

        assert!(!discovery.on_scan_timeout(first.generation, &radio));
        assert!(discovery.is_scanning());
    }

    #[test]
    fn test_advertisement_connects_and_scan_continues() {
        let (mut discovery, mut registry, connection) = parts();
        let primary = PeripheralId::from("p");
        let glove = PeripheralId::from("g");

        let mut radio = MockRadioStack::new();
        radio.expect_start_scan().return_const(());
        radio.expect_connect().times(2).return_const(());
        radio.expect_stop_scan().never();

        discovery.start_scan(&mut registry, &radio);

        let action = discovery
            .on_advertisement(
                &mut registry,
                &connection,
                &radio,
                &primary,
                Some(PRIMARY_ADVERTISED_NAME),
                Some(-40),
            )
            .unwrap();
        assert_eq!(action, RegistryAction::ConnectRequested);

        discovery
            .on_advertisement(
                &mut registry,
                &connection,
                &radio,
                &glove,
                Some(AUXILIARY_ADVERTISED_NAME),
                None,
            )
            .unwrap();

        // Both roles are filled but scanning keeps running until the timeout.
        assert!(discovery.is_scanning());
        assert_eq!(
            registry.primary().unwrap().state(),
            ConnectionState::Connecting
        );
        assert_eq!(
            registry.auxiliary().unwrap().state(),
            ConnectionState::Connecting
        );
    }

    #[test]
    fn test_advertisement_ignored_when_not_scanning() {
        let (discovery, mut registry, connection) = parts();
        let radio = MockRadioStack::new();

        let action = discovery
            .on_advertisement(
                &mut registry,
                &connection,
                &radio,
                &PeripheralId::from("p"),
                Some(PRIMARY_ADVERTISED_NAME),
                None,
            )
            .unwrap();

        assert_eq!(action, RegistryAction::Ignored);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_restart_clears_unconnected_peripherals() {
        let (mut discovery, mut registry, _) = parts();

        let mut radio = MockRadioStack::new();
        radio.expect_start_scan().return_const(());

        registry.on_advertisement_observed(
            &PeripheralId::from("p"),
            Some(PRIMARY_ADVERTISED_NAME),
            None,
        );
        discovery.start_scan(&mut registry, &radio);

        assert!(registry.is_empty());
    }

    #[test]
    fn test_stop_scan_invalidates_timeout() {
        let (mut discovery, mut registry, _) = parts();

        let mut radio = MockRadioStack::new();
        radio.expect_start_scan().return_const(());
        radio.expect_stop_scan().times(1).return_const(());

        let ticket = discovery.start_scan(&mut registry, &radio);
        assert!(discovery.stop_scan(&radio));
        assert!(!discovery.stop_scan(&radio));
        assert!(!discovery.on_scan_timeout(ticket.generation, &radio));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_timer_fires_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = ScanTimer::new(Handle::current());

        timer.arm(
            ScanTicket {
                generation: 3,
                timeout: TIMEOUT,
            },
            tx,
        );
        assert!(timer.is_armed());

        let event = rx.recv().await.unwrap();
        assert_eq!(event, RadioEvent::ScanTimeout { generation: 3 });
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_scan_timer_armed_outside_runtime() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let runtime = Handle::current();

        let timer = std::thread::spawn(move || {
            let mut timer = ScanTimer::new(runtime);
            timer.arm(
                ScanTicket {
                    generation: 7,
                    timeout: Duration::from_millis(10),
                },
                tx,
            );
            timer
        })
        .join()
        .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event, RadioEvent::ScanTimeout { generation: 7 });
        drop(timer);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearming_cancels_previous_timeout() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = ScanTimer::new(Handle::current());

        timer.arm(
            ScanTicket {
                generation: 1,
                timeout: Duration::from_secs(5),
            },
            tx.clone(),
        );
        timer.arm(
            ScanTicket {
                generation: 2,
                timeout: Duration::from_secs(10),
            },
            tx,
        );

        let event = rx.recv().await.unwrap();
        assert_eq!(event, RadioEvent::ScanTimeout { generation: 2 });

        timer.cancel();
        assert!(rx.recv().await.is_none());
    }
}
