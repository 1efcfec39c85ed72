//! Peripheral registry.
//!
//! The single owner of every known peripheral and of role assignment.
//! Other components refer to peripherals by [`PeripheralId`] and look them
//! up here.

use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::ble::characteristics::CharacteristicPurpose;
use crate::ble::connection::ConnectionState;
use crate::config::IdentityPatterns;
use crate::error::{Error, Result};

/// Opaque identity of a radio peripheral, as rendered by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeripheralId(String);

impl PeripheralId {
    /// Create an identity from its platform rendering.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self(identifier.into())
    }

    /// The identity as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeripheralId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PeripheralId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Application-level function of a peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PeripheralRole {
    /// The actuator telemetry frames are written to.
    Primary,
    /// The sensor inbound values are read from.
    Auxiliary,
    /// Not matched to any role.
    #[default]
    Unclassified,
}

impl fmt::Display for PeripheralRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "Primary"),
            Self::Auxiliary => write!(f, "Auxiliary"),
            Self::Unclassified => write!(f, "Unclassified"),
        }
    }
}

/// Result of feeding an advertisement to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryAction {
    /// A role slot was filled; the peripheral should be connected.
    ConnectRequested,
    /// Nothing to do.
    Ignored,
}

/// A registered peripheral.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeripheralHandle {
    id: PeripheralId,
    advertised_name: String,
    rssi: Option<i16>,
    role: PeripheralRole,
    state: ConnectionState,
    bindings: HashMap<CharacteristicPurpose, Uuid>,
}

impl PeripheralHandle {
    fn new(
        id: PeripheralId,
        advertised_name: String,
        rssi: Option<i16>,
        role: PeripheralRole,
    ) -> Self {
        Self {
            id,
            advertised_name,
            rssi,
            role,
            state: ConnectionState::Discovered,
            bindings: HashMap::new(),
        }
    }

    /// The peripheral's identity.
    pub fn id(&self) -> &PeripheralId {
        &self.id
    }

    /// The advertised local name.
    pub fn advertised_name(&self) -> &str {
        &self.advertised_name
    }

    /// Last observed signal strength in dBm.
    pub fn rssi(&self) -> Option<i16> {
        self.rssi
    }

    /// The assigned role. Never changes once the handle exists.
    pub fn role(&self) -> PeripheralRole {
        self.role
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The characteristic bound to a purpose, if discovered.
    pub fn binding(&self, purpose: CharacteristicPurpose) -> Option<Uuid> {
        self.bindings.get(&purpose).copied()
    }

    /// Resolve which purpose a characteristic is bound to.
    pub fn purpose_of(&self, characteristic: Uuid) -> Option<CharacteristicPurpose> {
        self.bindings
            .iter()
            .find(|(_, uuid)| **uuid == characteristic)
            .map(|(purpose, _)| *purpose)
    }

    /// Number of recorded bindings.
    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    pub(crate) fn set_state(&mut self, state: ConnectionState) -> ConnectionState {
        std::mem::replace(&mut self.state, state)
    }

    pub(crate) fn bind(&mut self, purpose: CharacteristicPurpose, characteristic: Uuid) {
        self.bindings.insert(purpose, characteristic);
    }
}

/// Registry of known peripherals, keyed by identity.
#[derive(Debug, Default)]
pub struct PeripheralRegistry {
    identities: IdentityPatterns,
    peripherals: HashMap<PeripheralId, PeripheralHandle>,
    primary: Option<PeripheralId>,
    auxiliary: Option<PeripheralId>,
}

impl PeripheralRegistry {
    /// Create an empty registry classifying by the given names.
    pub fn new(identities: IdentityPatterns) -> Self {
        Self {
            identities,
            ..Default::default()
        }
    }

    /// Classify an advertisement and register the peripheral if it fills a
    /// free role slot.
    pub fn on_advertisement_observed(
        &mut self,
        id: &PeripheralId,
        advertised_name: Option<&str>,
        rssi: Option<i16>,
    ) -> RegistryAction {
        if let Some(handle) = self.peripherals.get_mut(id) {
            trace!("Advertisement from registered peripheral {}", id);
            if rssi.is_some() {
                handle.rssi = rssi;
            }
            return RegistryAction::Ignored;
        }

        let Some(name) = advertised_name else {
            return RegistryAction::Ignored;
        };

        let role = if name == self.identities.primary_name {
            PeripheralRole::Primary
        } else if name == self.identities.auxiliary_name {
            PeripheralRole::Auxiliary
        } else {
            trace!("Ignoring advertisement from {} ({:?})", id, name);
            return RegistryAction::Ignored;
        };

        let slot = match role {
            PeripheralRole::Primary => &mut self.primary,
            _ => &mut self.auxiliary,
        };

        if let Some(holder) = slot {
            debug!(
                "{} role already held by {}, ignoring {} ({:?})",
                role, holder, id, name
            );
            return RegistryAction::Ignored;
        }

        *slot = Some(id.clone());
        self.peripherals.insert(
            id.clone(),
            PeripheralHandle::new(id.clone(), name.to_string(), rssi, role),
        );

        info!("Registered {} peripheral {} ({:?})", role, id, name);

        RegistryAction::ConnectRequested
    }

    /// Look up a peripheral.
    pub fn handle_for(&self, id: &PeripheralId) -> Option<&PeripheralHandle> {
        self.peripherals.get(id)
    }

    /// Look up a peripheral for mutation.
    pub fn handle_for_mut(&mut self, id: &PeripheralId) -> Option<&mut PeripheralHandle> {
        self.peripherals.get_mut(id)
    }

    /// Look up a peripheral, failing with [`Error::PeripheralNotFound`].
    pub fn require(&self, id: &PeripheralId) -> Result<&PeripheralHandle> {
        self.peripherals
            .get(id)
            .ok_or_else(|| Error::PeripheralNotFound {
                identifier: id.to_string(),
            })
    }

    /// Look up a peripheral for mutation, failing with
    /// [`Error::PeripheralNotFound`].
    pub fn require_mut(&mut self, id: &PeripheralId) -> Result<&mut PeripheralHandle> {
        self.peripherals
            .get_mut(id)
            .ok_or_else(|| Error::PeripheralNotFound {
                identifier: id.to_string(),
            })
    }

    /// The peripheral holding a role.
    pub fn handle_for_role(&self, role: PeripheralRole) -> Option<&PeripheralHandle> {
        let id = match role {
            PeripheralRole::Primary => self.primary.as_ref(),
            PeripheralRole::Auxiliary => self.auxiliary.as_ref(),
            PeripheralRole::Unclassified => None,
        }?;
        self.peripherals.get(id)
    }

    /// The `Primary` peripheral.
    pub fn primary(&self) -> Option<&PeripheralHandle> {
        self.handle_for_role(PeripheralRole::Primary)
    }

    /// The `Auxiliary` peripheral.
    pub fn auxiliary(&self) -> Option<&PeripheralHandle> {
        self.handle_for_role(PeripheralRole::Auxiliary)
    }

    /// Remove a peripheral together with its bindings and free its role slot.
    pub fn remove(&mut self, id: &PeripheralId) -> Option<PeripheralHandle> {
        let handle = self.peripherals.remove(id)?;

        if self.primary.as_ref() == Some(id) {
            self.primary = None;
        }
        if self.auxiliary.as_ref() == Some(id) {
            self.auxiliary = None;
        }

        debug!("Removed {} peripheral {}", handle.role, id);

        Some(handle)
    }

    /// Drop every peripheral that was registered but never connected.
    pub fn clear_unconnected(&mut self) -> usize {
        let stale: Vec<PeripheralId> = self
            .peripherals
            .values()
            .filter(|h| h.state == ConnectionState::Discovered)
            .map(|h| h.id.clone())
            .collect();

        for id in &stale {
            self.remove(id);
        }

        stale.len()
    }

    /// Identities of all registered peripherals.
    pub fn identities(&self) -> Vec<PeripheralId> {
        self.peripherals.keys().cloned().collect()
    }

    /// Copies of all registered handles.
    pub fn snapshot(&self) -> Vec<PeripheralHandle> {
        self.peripherals.values().cloned().collect()
    }

    /// Number of registered peripherals.
    pub fn len(&self) -> usize {
        self.peripherals.len()
    }

    /// Whether no peripheral is registered.
    pub fn is_empty(&self) -> bool {
        self.peripherals.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PRIMARY: &str = "Adafruit Bluefruit LE";
    const AUXILIARY: &str = "Bluefruit Glove";

    fn registry() -> PeripheralRegistry {
        PeripheralRegistry::new(IdentityPatterns::default())
    }

    #[test]
    fn test_primary_advertisement_requests_connect() {
        let mut registry = registry();
        let id = PeripheralId::from("p1");

        let action = registry.on_advertisement_observed(&id, Some(PRIMARY), Some(-60));

        assert_eq!(action, RegistryAction::ConnectRequested);
        let handle = registry.handle_for(&id).unwrap();
        assert_eq!(handle.role(), PeripheralRole::Primary);
        assert_eq!(handle.state(), ConnectionState::Discovered);
        assert_eq!(handle.rssi(), Some(-60));
        assert_eq!(registry.primary().map(|h| h.id().clone()), Some(id));
    }

    #[test]
    fn test_second_primary_is_ignored() {
        let mut registry = registry();
        let first = PeripheralId::from("p1");
        let second = PeripheralId::from("p2");

        assert_eq!(
            registry.on_advertisement_observed(&first, Some(PRIMARY), None),
            RegistryAction::ConnectRequested
        );
        assert_eq!(
            registry.on_advertisement_observed(&second, Some(PRIMARY), None),
            RegistryAction::Ignored
        );

        assert!(registry.handle_for(&second).is_none());
        assert_eq!(registry.primary().unwrap().id(), &first);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_primary_and_auxiliary_coexist() {
        let mut registry = registry();
        let p = PeripheralId::from("p");
        let a = PeripheralId::from("a");

        registry.on_advertisement_observed(&p, Some(PRIMARY), None);
        let action = registry.on_advertisement_observed(&a, Some(AUXILIARY), None);

        assert_eq!(action, RegistryAction::ConnectRequested);
        assert_eq!(registry.auxiliary().unwrap().role(), PeripheralRole::Auxiliary);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_unknown_or_missing_name_is_ignored() {
        let mut registry = registry();
        let id = PeripheralId::from("x");

        assert_eq!(
            registry.on_advertisement_observed(&id, Some("Adafruit Bluefruit"), None),
            RegistryAction::Ignored
        );
        assert_eq!(
            registry.on_advertisement_observed(&id, None, None),
            RegistryAction::Ignored
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_repeat_advertisement_refreshes_rssi() {
        let mut registry = registry();
        let id = PeripheralId::from("p1");

        registry.on_advertisement_observed(&id, Some(PRIMARY), Some(-70));
        let action = registry.on_advertisement_observed(&id, Some(PRIMARY), Some(-50));

        assert_eq!(action, RegistryAction::Ignored);
        assert_eq!(registry.handle_for(&id).unwrap().rssi(), Some(-50));
    }

    #[test]
    fn test_remove_frees_role_and_bindings() {
        let mut registry = registry();
        let id = PeripheralId::from("p1");

        registry.on_advertisement_observed(&id, Some(PRIMARY), None);
        registry
            .handle_for_mut(&id)
            .unwrap()
            .bind(CharacteristicPurpose::Transmit, Uuid::nil());

        let removed = registry.remove(&id).unwrap();
        assert_eq!(removed.binding_count(), 1);
        assert!(registry.primary().is_none());
        assert!(registry.handle_for(&id).is_none());

        assert_eq!(
            registry.on_advertisement_observed(&id, Some(PRIMARY), None),
            RegistryAction::ConnectRequested
        );
        assert_eq!(registry.handle_for(&id).unwrap().binding_count(), 0);
    }

    #[test]
    fn test_require_unknown_peripheral() {
        let registry = registry();
        let err = registry.require(&PeripheralId::from("ghost")).unwrap_err();
        assert!(matches!(err, Error::PeripheralNotFound { identifier } if identifier == "ghost"));
    }

    #[test]
    fn test_clear_unconnected_keeps_connecting_peripherals() {
        let mut registry = registry();
        let p = PeripheralId::from("p");
        let a = PeripheralId::from("a");

        registry.on_advertisement_observed(&p, Some(PRIMARY), None);
        registry.on_advertisement_observed(&a, Some(AUXILIARY), None);
        registry
            .handle_for_mut(&p)
            .unwrap()
            .set_state(ConnectionState::Connecting);

        assert_eq!(registry.clear_unconnected(), 1);
        assert!(registry.handle_for(&p).is_some());
        assert!(registry.auxiliary().is_none());
    }
}
