//! BLE connection lifecycle.
//!
//! Advances each registered peripheral from `Discovered` through service,
//! characteristic and subscription setup to `Connected`. Every request is
//! fire-and-forget; the matching `on_*` handler runs when the stack reports
//! back. Failures end the current attempt: the handle is removed from the
//! registry and nothing is retried.

use tokio::sync::broadcast;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::ble::characteristics::CharacteristicPurpose;
use crate::ble::radio::RadioStack;
use crate::config::CharacteristicIdentities;
use crate::error::{Error, Result};
use crate::registry::{PeripheralHandle, PeripheralId, PeripheralRegistry, PeripheralRole};

/// Connection state for a peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// Registered from an advertisement, no connection requested yet.
    #[default]
    Discovered,
    /// Connect request issued.
    Connecting,
    /// Connected, waiting for the service list.
    ServicesDiscovering,
    /// Waiting for characteristics of the discovered services.
    CharacteristicsDiscovering,
    /// Characteristics bound, waiting for notifications to be enabled.
    Subscribing,
    /// Fully set up.
    Connected,
    /// Gone. Terminal for this handle.
    Disconnected,
}

impl ConnectionState {
    /// Check if fully connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(
            self,
            Self::Connecting
                | Self::ServicesDiscovering
                | Self::CharacteristicsDiscovering
                | Self::Subscribing
        )
    }

    /// Check if the peripheral has a link at the radio level.
    pub fn has_link(&self) -> bool {
        matches!(
            self,
            Self::ServicesDiscovering
                | Self::CharacteristicsDiscovering
                | Self::Subscribing
                | Self::Connected
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discovered => write!(f, "Discovered"),
            Self::Connecting => write!(f, "Connecting"),
            Self::ServicesDiscovering => write!(f, "ServicesDiscovering"),
            Self::CharacteristicsDiscovering => write!(f, "CharacteristicsDiscovering"),
            Self::Subscribing => write!(f, "Subscribing"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// Event for connection state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    /// The identifier of the peripheral.
    pub identifier: PeripheralId,
    /// The peripheral's role.
    pub role: PeripheralRole,
    /// The new connection state.
    pub state: ConnectionState,
}

/// Drives peripherals through their connection lifecycle.
pub struct ConnectionStateMachine {
    /// Characteristic UUIDs to bind.
    characteristics: CharacteristicIdentities,
    /// Channel for connection events.
    event_tx: broadcast::Sender<ConnectionEvent>,
}

impl ConnectionStateMachine {
    /// Create a state machine binding the given characteristics.
    pub fn new(characteristics: CharacteristicIdentities) -> Self {
        let (event_tx, _) = broadcast::channel(16);

        Self {
            characteristics,
            event_tx,
        }
    }

    /// Subscribe to connection events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.event_tx.subscribe()
    }

    /// `Discovered -> Connecting`: issue the connect request.
    pub fn request_connect(
        &self,
        registry: &mut PeripheralRegistry,
        radio: &dyn RadioStack,
        id: &PeripheralId,
    ) -> Result<()> {
        let handle = registry.require_mut(id)?;
        expect_state(handle, &[ConnectionState::Discovered], "connect request")?;

        info!("Connecting to {} peripheral {}", handle.role(), id);
        self.set_state(handle, ConnectionState::Connecting);
        radio.connect(id);

        Ok(())
    }

    /// `Connecting -> ServicesDiscovering`: discover every service.
    ///
    /// A link that comes up for a peripheral that is no longer registered
    /// (torn down while the connect was in flight) is cancelled.
    pub fn on_connected(
        &self,
        registry: &mut PeripheralRegistry,
        radio: &dyn RadioStack,
        id: &PeripheralId,
    ) -> Result<()> {
        let handle = match registry.require_mut(id) {
            Ok(handle) => handle,
            Err(e) => {
                debug!("Cancelling orphaned link to {}", id);
                radio.cancel_connection(id);
                return Err(e);
            }
        };
        expect_state(handle, &[ConnectionState::Connecting], "connected")?;

        info!("Connected to {} peripheral {}", handle.role(), id);
        self.set_state(handle, ConnectionState::ServicesDiscovering);
        radio.discover_services(id);

        Ok(())
    }

    /// `Connecting -> Disconnected`: drop the handle and free its role slot.
    ///
    /// Returns [`Error::ConnectFailed`] once the handle is gone.
    pub fn on_connect_failed(
        &self,
        registry: &mut PeripheralRegistry,
        id: &PeripheralId,
        reason: &str,
    ) -> Result<()> {
        let handle = registry.require_mut(id)?;
        expect_state(handle, &[ConnectionState::Connecting], "connect failure")?;

        self.drop_handle(registry, id);

        Err(Error::ConnectFailed {
            identifier: id.to_string(),
            reason: reason.to_string(),
        })
    }

    /// `ServicesDiscovering -> CharacteristicsDiscovering`: discover the
    /// characteristics of every service.
    pub fn on_services_discovered(
        &self,
        registry: &mut PeripheralRegistry,
        radio: &dyn RadioStack,
        id: &PeripheralId,
        result: std::result::Result<&[Uuid], &str>,
    ) -> Result<()> {
        let handle = registry.require_mut(id)?;
        expect_state(handle, &[ConnectionState::ServicesDiscovering], "services discovered")?;

        let services = match result {
            Ok(services) => services,
            Err(reason) => return self.fail_discovery(registry, radio, id, reason),
        };

        debug!("Discovered {} services on {}", services.len(), id);
        self.set_state(handle, ConnectionState::CharacteristicsDiscovering);

        for service in services {
            trace!("Discovering characteristics of service {} on {}", service, id);
            radio.discover_characteristics(id, *service);
        }

        Ok(())
    }

    /// Bind known characteristics, subscribe to the notifying ones and move
    /// to `Subscribing` once anything matched.
    pub fn on_characteristics_discovered(
        &self,
        registry: &mut PeripheralRegistry,
        radio: &dyn RadioStack,
        id: &PeripheralId,
        service: Uuid,
        result: std::result::Result<&[Uuid], &str>,
    ) -> Result<()> {
        let handle = registry.require_mut(id)?;
        expect_state(
            handle,
            &[
                ConnectionState::CharacteristicsDiscovering,
                ConnectionState::Subscribing,
                ConnectionState::Connected,
            ],
            "characteristics discovered",
        )?;

        let characteristics = match result {
            Ok(characteristics) => characteristics,
            Err(reason) => return self.fail_discovery(registry, radio, id, reason),
        };

        debug!(
            "Found {} characteristics in service {} on {}",
            characteristics.len(),
            service,
            id
        );

        let mut matched = false;

        for characteristic in characteristics {
            match CharacteristicPurpose::classify(*characteristic, &self.characteristics) {
                Some(purpose) if purpose.permitted_for(handle.role()) => {
                    debug!("{} characteristic {} on {}", purpose, characteristic, id);
                    handle.bind(purpose, *characteristic);
                    matched = true;

                    if purpose.is_notifying() {
                        radio.set_notify(id, *characteristic, true);
                        radio.read_value(id, *characteristic);
                    }
                }
                Some(purpose) => {
                    debug!(
                        "Not binding {} characteristic {} on {} peripheral {}",
                        purpose,
                        characteristic,
                        handle.role(),
                        id
                    );
                }
                None => trace!("Ignoring characteristic {} on {}", characteristic, id),
            }

            radio.discover_descriptors(id, *characteristic);
        }

        if matched && handle.state() == ConnectionState::CharacteristicsDiscovering {
            self.set_state(handle, ConnectionState::Subscribing);
        }

        Ok(())
    }

    /// Descriptor discovery is diagnostic only.
    pub fn on_descriptors_discovered(
        &self,
        id: &PeripheralId,
        characteristic: Uuid,
        result: std::result::Result<&[Uuid], &str>,
    ) {
        match result {
            Ok(descriptors) => {
                for descriptor in descriptors {
                    debug!(
                        "Descriptor {} on characteristic {} of {}",
                        descriptor, characteristic, id
                    );
                }
            }
            Err(reason) => debug!(
                "Descriptor discovery for {} on {} failed: {}",
                characteristic, id, reason
            ),
        }
    }

    /// `Subscribing -> Connected` once notifications are confirmed enabled.
    ///
    /// A failed subscription leaves the state unchanged and returns
    /// [`Error::SubscriptionFailed`].
    pub fn on_notification_state_changed(
        &self,
        registry: &mut PeripheralRegistry,
        id: &PeripheralId,
        characteristic: Uuid,
        result: std::result::Result<bool, &str>,
    ) -> Result<()> {
        let handle = registry.require_mut(id)?;

        let enabled = result.map_err(|reason| Error::SubscriptionFailed {
            identifier: id.to_string(),
            characteristic: characteristic.to_string(),
            reason: reason.to_string(),
        })?;

        if !enabled {
            debug!("Notifications disabled for {} on {}", characteristic, id);
            return Ok(());
        }

        info!("Subscribed to {} on {}", characteristic, id);

        match handle.state() {
            ConnectionState::Subscribing => {
                self.set_state(handle, ConnectionState::Connected);
                Ok(())
            }
            ConnectionState::Connected => Ok(()),
            state => Err(Error::InvalidTransition {
                identifier: id.to_string(),
                state,
                event: "notification state changed",
            }),
        }
    }

    /// `* -> Disconnected` on a stack-reported disconnect.
    ///
    /// Returns [`Error::UnexpectedDisconnect`] once the handle is gone.
    pub fn on_disconnected(
        &self,
        registry: &mut PeripheralRegistry,
        id: &PeripheralId,
    ) -> Result<()> {
        registry.require(id)?;
        self.drop_handle(registry, id);

        Err(Error::UnexpectedDisconnect {
            identifier: id.to_string(),
        })
    }

    /// `* -> Disconnected` on request: cancel the link and drop the handle.
    pub fn teardown(
        &self,
        registry: &mut PeripheralRegistry,
        radio: &dyn RadioStack,
        id: &PeripheralId,
    ) -> Result<()> {
        let handle = registry.require(id)?;

        info!("Tearing down {} peripheral {}", handle.role(), id);

        if handle.state() != ConnectionState::Discovered {
            radio.cancel_connection(id);
        }
        self.drop_handle(registry, id);

        Ok(())
    }

    fn fail_discovery(
        &self,
        registry: &mut PeripheralRegistry,
        radio: &dyn RadioStack,
        id: &PeripheralId,
        reason: &str,
    ) -> Result<()> {
        radio.cancel_connection(id);
        self.drop_handle(registry, id);

        Err(Error::DiscoveryFailed {
            identifier: id.to_string(),
            reason: reason.to_string(),
        })
    }

    fn drop_handle(&self, registry: &mut PeripheralRegistry, id: &PeripheralId) {
        if let Some(handle) = registry.handle_for_mut(id) {
            self.set_state(handle, ConnectionState::Disconnected);
        }
        registry.remove(id);
    }

    /// Update the connection state and emit an event.
    fn set_state(&self, handle: &mut PeripheralHandle, new_state: ConnectionState) {
        let old_state = handle.set_state(new_state);

        if old_state != new_state {
            debug!(
                "Connection state of {} changed: {} -> {}",
                handle.id(),
                old_state,
                new_state
            );

            let _ = self.event_tx.send(ConnectionEvent {
                identifier: handle.id().clone(),
                role: handle.role(),
                state: new_state,
            });
        }
    }
}

fn expect_state(
    handle: &PeripheralHandle,
    accepted: &[ConnectionState],
    event: &'static str,
) -> Result<()> {
    if accepted.contains(&handle.state()) {
        Ok(())
    } else {
        Err(Error::InvalidTransition {
            identifier: handle.id().to_string(),
            state: handle.state(),
            event,
        })
    }
}
