//! Hiding and unhiding the source entity

use ha_registries::{EntityEntryUpdate, EntityRegistry, EntityRegistryError, HiddenBy};
use tracing::debug;

/// Hide the source entity on behalf of the helper.
///
/// Returns `true` if the entity was hidden by this call. Unknown entities
/// and entities already hidden (by anyone) are left alone.
pub fn hide_source_entity(
    registry: &EntityRegistry,
    entity_id_or_uuid: &str,
) -> Result<bool, EntityRegistryError> {
    let Some(entity_id) = registry.resolve_entity_id(entity_id_or_uuid) else {
        return Ok(false);
    };
    let Some(entry) = registry.get(&entity_id) else {
        return Ok(false);
    };
    if entry.hidden_by.is_some() {
        return Ok(false);
    }

    registry.update_entity(
        &entity_id,
        EntityEntryUpdate::new().hidden_by(Some(HiddenBy::Integration)),
    )?;
    debug!("Hid source entity {}", entity_id);
    Ok(true)
}

/// Unhide the source entity, but only if the helper was the one hiding it.
///
/// Returns `true` if the entity was unhidden by this call.
pub fn unhide_source_entity(
    registry: &EntityRegistry,
    entity_id_or_uuid: &str,
) -> Result<bool, EntityRegistryError> {
    let Some(entity_id) = registry.resolve_entity_id(entity_id_or_uuid) else {
        return Ok(false);
    };
    let Some(entry) = registry.get(&entity_id) else {
        return Ok(false);
    };
    if entry.hidden_by != Some(HiddenBy::Integration) {
        return Ok(false);
    }

    registry.update_entity(&entity_id, EntityEntryUpdate::new().hidden_by(None))?;
    debug!("Unhid source entity {}", entity_id);
    Ok(true)
}
