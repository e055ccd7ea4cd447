//! Home Assistant Registries
//!
//! In-memory registries for tracking:
//! - Entities (EntityRegistry)
//! - Devices (DeviceRegistry)
//!
//! plus the [`helper_integration`] utilities helpers use to keep their
//! registry footprint in sync with the entity they wrap.

pub mod device_registry;
pub mod entity_registry;
pub mod helper_integration;

pub use device_registry::{DeviceEntry, DeviceIdentifier, DeviceRegistry, DeviceRegistryError};

pub use entity_registry::{
    DisabledBy, EntityEntry, EntityEntryUpdate, EntityRegistry, EntityRegistryError, HiddenBy,
};

pub use helper_integration::{
    remove_helper_config_entry_from_source_device, source_entity_device_id,
};

/// All registries bundled together
#[derive(Default)]
pub struct Registries {
    pub entities: EntityRegistry,
    pub devices: DeviceRegistry,
}

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop everything a config entry registered
    pub fn clear_config_entry(&self, config_entry_id: &str) {
        self.entities.clear_config_entry(config_entry_id);
        self.devices.clear_config_entry(config_entry_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_config_entry_bundle() {
        let registries = Registries::new();

        let device = registries.devices.get_or_create(
            &[DeviceIdentifier::new("demo", "1")],
            "entry-1",
            "Demo",
        );
        registries.entities.get_or_create(
            "switch",
            "demo",
            "u1",
            "Demo switch",
            Some("entry-1"),
            Some(&device.id),
        );

        registries.clear_config_entry("entry-1");

        assert!(registries.entities.is_empty());
        assert!(registries.devices.is_empty());
    }
}
