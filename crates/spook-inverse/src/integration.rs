//! Config entry lifecycle of the inverse helper

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use ha_config_entries::{
    ConfigEntries, ConfigEntriesResult, ConfigEntry, ConfigEntryUpdate, HomeAssistant,
    Integration, UpdateListener,
};
use ha_registries::{remove_helper_config_entry_from_source_device, source_entity_device_id};
use tracing::{debug, info, warn};

use crate::constants::{DOMAIN, MINOR_VERSION, VERSION};
use crate::options;
use crate::source::unhide_source_entity;

/// The `spook_inverse` integration
#[derive(Debug, Default)]
pub struct InverseIntegration;

impl InverseIntegration {
    pub fn new() -> Self {
        Self
    }
}

/// Reload the entry whenever its options change
pub async fn reload_on_update(hass: HomeAssistant, entry: ConfigEntry) {
    debug!("Options of {} changed, reloading", entry.entry_id);
    if let Err(err) = hass.config_entries.reload(&hass, &entry.entry_id).await {
        warn!("Reloading {} after update failed: {}", entry.entry_id, err);
    }
}

/// [`reload_on_update`] as an update listener
pub fn config_entry_update_listener() -> UpdateListener {
    Arc::new(|hass: HomeAssistant, entry: ConfigEntry| -> BoxFuture<'static, ()> {
        Box::pin(reload_on_update(hass, entry))
    })
}

#[async_trait]
impl Integration for InverseIntegration {
    fn domain(&self) -> &'static str {
        DOMAIN
    }

    fn version(&self) -> u32 {
        VERSION
    }

    fn minor_version(&self) -> u32 {
        MINOR_VERSION
    }

    fn supports_migrate(&self) -> bool {
        true
    }

    async fn setup_entry(
        &self,
        hass: &HomeAssistant,
        entry: &ConfigEntry,
    ) -> ConfigEntriesResult<bool> {
        let platform = options::inverse_type(&entry.options)?;

        let loaded = hass
            .config_entries
            .forward_entry_setups(hass, entry, &[platform])
            .await?;

        let listener = hass
            .config_entries
            .add_update_listener(&entry.entry_id, config_entry_update_listener());
        let entry_id = entry.entry_id.clone();
        hass.config_entries.on_unload(
            &entry.entry_id,
            Box::new(move |entries: &ConfigEntries| {
                entries.remove_update_listener(&entry_id, listener);
            }),
        );

        Ok(loaded)
    }

    async fn unload_entry(
        &self,
        hass: &HomeAssistant,
        entry: &ConfigEntry,
    ) -> ConfigEntriesResult<bool> {
        let platform = options::inverse_type(&entry.options)?;
        hass.config_entries
            .unload_platforms(hass, entry, &[platform])
            .await
    }

    /// Unhide the source entity if the helper hid it
    async fn remove_entry(
        &self,
        hass: &HomeAssistant,
        entry: &ConfigEntry,
    ) -> ConfigEntriesResult<()> {
        if !options::hide_source(&entry.options) {
            return Ok(());
        }
        let Some(source) = options::source_entity_id(&entry.options) else {
            return Ok(());
        };

        if unhide_source_entity(&hass.registries.entities, source)? {
            info!("Unhid {} after removing {}", source, entry.entry_id);
        }
        Ok(())
    }

    async fn migrate_entry(
        &self,
        hass: &HomeAssistant,
        entry: &ConfigEntry,
    ) -> ConfigEntriesResult<bool> {
        if entry.version != 1 {
            return Ok(true);
        }

        let options = entry.options.clone();

        if entry.minor_version < 2 {
            let device_id = options::source_entity_id(&options)
                .and_then(|source| source_entity_device_id(&hass.registries, source));

            if let Some(device_id) = device_id {
                debug!(
                    "Detaching {} from source device {}",
                    entry.entry_id, device_id
                );
                remove_helper_config_entry_from_source_device(
                    &hass.registries,
                    &entry.entry_id,
                    &device_id,
                )?;
            }
        }

        hass.config_entries.update_entry(
            hass,
            &entry.entry_id,
            ConfigEntryUpdate::new()
                .options(options)
                .minor_version(MINOR_VERSION),
        )?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ha_config_entries::EntryOptions;
    use serde_json::json;

    fn entry(version: u32, minor_version: u32, options: serde_json::Value) -> ConfigEntry {
        let options: EntryOptions = serde_json::from_value(options).unwrap();
        ConfigEntry::new(DOMAIN, "Inverted")
            .with_options(options)
            .with_version(version, minor_version)
    }

    #[tokio::test]
    async fn test_unknown_major_version_is_left_alone() {
        let hass = HomeAssistant::new();
        let entry = hass
            .config_entries
            .add(entry(2, 0, json!({"entity_id": "switch.pump", "inverse_type": "switch"})))
            .unwrap();

        assert!(InverseIntegration::new()
            .migrate_entry(&hass, &entry)
            .await
            .unwrap());

        let stored = hass.config_entries.get(&entry.entry_id).unwrap();
        assert_eq!((stored.version, stored.minor_version), (2, 0));
    }

    #[tokio::test]
    async fn test_migrate_without_registered_source() {
        let hass = HomeAssistant::new();
        let entry = hass
            .config_entries
            .add(entry(1, 1, json!({"entity_id": "switch.pump", "inverse_type": "switch"})))
            .unwrap();

        assert!(InverseIntegration::new()
            .migrate_entry(&hass, &entry)
            .await
            .unwrap());
        assert_eq!(
            hass.config_entries.get(&entry.entry_id).unwrap().minor_version,
            MINOR_VERSION
        );
    }

    #[tokio::test]
    async fn test_remove_without_hide_source_is_noop() {
        let hass = HomeAssistant::new();
        hass.registries
            .entities
            .get_or_create("switch", "demo", "pump", "Pump", None, None);
        hass.registries
            .entities
            .update_entity(
                "switch.pump",
                ha_registries::EntityEntryUpdate::new()
                    .hidden_by(Some(ha_registries::HiddenBy::Integration)),
            )
            .unwrap();
        let entry = entry(
            1,
            2,
            json!({"entity_id": "switch.pump", "inverse_type": "switch", "hide_source": false}),
        );

        InverseIntegration::new()
            .remove_entry(&hass, &entry)
            .await
            .unwrap();

        assert_eq!(
            hass.registries.entities.get("switch.pump").unwrap().hidden_by,
            Some(ha_registries::HiddenBy::Integration)
        );
    }

    #[tokio::test]
    async fn test_setup_rejects_unsupported_type() {
        let hass = HomeAssistant::new();
        let entry = entry(1, 2, json!({"entity_id": "light.desk", "inverse_type": "light"}));

        let result = InverseIntegration::new().setup_entry(&hass, &entry).await;

        assert!(matches!(
            result,
            Err(ha_config_entries::ConfigEntriesError::Integration { .. })
        ));
        assert_eq!(hass.config_entries.update_listener_count(&entry.entry_id), 0);
    }
}
