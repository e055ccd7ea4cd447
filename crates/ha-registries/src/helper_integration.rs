//! Utilities for helper integrations
//!
//! Helpers (integrations whose entities wrap another "source" entity) used
//! to attach their config entry to the source entity's device. Newer helpers
//! link their entities to the device directly instead, so old entries need
//! their config entry taken off the source device.

use tracing::{debug, warn};

use crate::device_registry::DeviceRegistryError;
use crate::entity_registry::EntityEntryUpdate;
use crate::Registries;

/// Device id of the entity a helper wraps, if the entity is registered and
/// belongs to a device. Accepts an entity ID or an entity registry id.
pub fn source_entity_device_id(registries: &Registries, entity_id_or_uuid: &str) -> Option<String> {
    let entity_id = registries.entities.resolve_entity_id(entity_id_or_uuid)?;
    registries.entities.get(&entity_id)?.device_id.clone()
}

/// Take a helper's config entry off its source device.
///
/// Does nothing if the device does not exist or the helper entry is not
/// attached to it. Otherwise every entity of the helper entry that sits on
/// the device is detached from it, then the helper entry is removed from
/// the device's config entries.
pub fn remove_helper_config_entry_from_source_device(
    registries: &Registries,
    helper_config_entry_id: &str,
    source_device_id: &str,
) -> Result<(), DeviceRegistryError> {
    let Some(device) = registries.devices.get(source_device_id) else {
        return Ok(());
    };
    if !device
        .config_entries
        .iter()
        .any(|id| id == helper_config_entry_id)
    {
        return Ok(());
    }

    for entity in registries.entities.get_by_device_id(source_device_id) {
        if entity.config_entry_id.as_deref() != Some(helper_config_entry_id) {
            continue;
        }
        if let Err(err) = registries
            .entities
            .update_entity(&entity.entity_id, EntityEntryUpdate::new().device_id(None))
        {
            warn!(
                "Could not detach {} from device {}: {}",
                entity.entity_id, source_device_id, err
            );
        }
    }

    registries
        .devices
        .remove_config_entry(source_device_id, helper_config_entry_id)?;

    debug!(
        helper_config_entry_id,
        source_device_id,
        "Removed helper config entry from source device"
    );
    Ok(())
}
