//! Creating inverse helpers and changing their options

use ha_config_entries::{
    ConfigEntriesError, ConfigEntriesResult, ConfigEntry, ConfigEntryUpdate, HomeAssistant,
};
use tracing::info;

use crate::constants::{CONF_ENTITY_ID, CONF_INVERSE_TYPE, DOMAIN, MINOR_VERSION, VERSION};
use crate::error::InverseError;
use crate::options::InverseOptions;
use crate::source::{hide_source_entity, unhide_source_entity};

/// Create a helper entry for `options` and hide its source if asked to.
///
/// The entry is added but not set up.
pub fn create_entry(
    hass: &HomeAssistant,
    title: &str,
    options: InverseOptions,
) -> ConfigEntriesResult<ConfigEntry> {
    options.validate()?;

    let entities = &hass.registries.entities;
    let source = entities
        .resolve_entity_id(&options.entity_id)
        .filter(|entity_id| entities.is_registered(entity_id))
        .ok_or_else(|| InverseError::SourceNotFound(options.entity_id.clone()))?;

    let entry = hass.config_entries.add(
        ConfigEntry::new(DOMAIN, title)
            .with_options(options.to_entry_options())
            .with_version(VERSION, MINOR_VERSION),
    )?;

    if options.hide_source {
        hide_source_entity(entities, &source)?;
    }

    info!(
        "Created {} helper {} inverting {}",
        options.inverse_type, entry.entry_id, source
    );
    Ok(entry)
}

/// Replace a helper's options.
///
/// Only `hide_source` may change. The source is hidden or unhidden to match
/// before the entry is updated, which reloads it through its update listener.
pub fn update_options(
    hass: &HomeAssistant,
    entry_id: &str,
    options: InverseOptions,
) -> ConfigEntriesResult<bool> {
    let entry = hass
        .config_entries
        .get(entry_id)
        .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
    let current = InverseOptions::from_entry_options(&entry.options)?;

    if options.entity_id != current.entity_id {
        return Err(InverseError::ImmutableOption(CONF_ENTITY_ID).into());
    }
    if options.inverse_type != current.inverse_type {
        return Err(InverseError::ImmutableOption(CONF_INVERSE_TYPE).into());
    }

    let entities = &hass.registries.entities;
    if options.hide_source {
        hide_source_entity(entities, &options.entity_id)?;
    } else {
        unhide_source_entity(entities, &options.entity_id)?;
    }

    hass.config_entries.update_entry(
        hass,
        entry_id,
        ConfigEntryUpdate::new().options(options.to_entry_options()),
    )
}
