//! Inverse entity platforms
//!
//! Each supported platform registers one entity per helper entry. The entity
//! reports the opposite of its source's state and sits on the source's
//! device, so it shows up next to the entity it inverts.

use async_trait::async_trait;
use dashmap::DashMap;
use ha_config_entries::{ConfigEntriesResult, ConfigEntry, EntityPlatform, HomeAssistant};
use ha_core::{Platform, STATE_OFF, STATE_ON};
use ha_registries::{source_entity_device_id, EntityEntryUpdate};
use tracing::{debug, warn};

use crate::constants::DOMAIN;
use crate::options;

/// Invert an on/off state; anything else (unknown, unavailable) has no
/// inverse
pub fn invert_state(state: &str) -> Option<&'static str> {
    match state {
        STATE_ON => Some(STATE_OFF),
        STATE_OFF => Some(STATE_ON),
        _ => None,
    }
}

/// Service to call on the source when the inverse entity is asked to run
/// `service`
pub fn inverted_service(service: &str) -> Option<&'static str> {
    match service {
        "turn_on" => Some("turn_off"),
        "turn_off" => Some("turn_on"),
        "toggle" => Some("toggle"),
        _ => None,
    }
}

/// One inverse entity platform
pub struct InversePlatform {
    platform: Platform,
    /// entry_id -> entity_id of the loaded inverse entity
    loaded: DashMap<String, String>,
}

impl InversePlatform {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            loaded: DashMap::new(),
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Entity ID of the inverse entity loaded for an entry
    pub fn entity_id(&self, entry_id: &str) -> Option<String> {
        self.loaded.get(entry_id).map(|r| r.value().clone())
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }
}

#[async_trait]
impl EntityPlatform for InversePlatform {
    async fn setup_entry(
        &self,
        hass: &HomeAssistant,
        entry: &ConfigEntry,
    ) -> ConfigEntriesResult<bool> {
        let entities = &hass.registries.entities;

        let source_device = options::source_entity_id(&entry.options)
            .and_then(|source| source_entity_device_id(&hass.registries, source));
        if source_device.is_none() {
            debug!("Source of {} has no device", entry.entry_id);
        }

        let mut entity = entities.get_or_create(
            self.platform.as_str(),
            DOMAIN,
            &entry.entry_id,
            &entry.title,
            Some(&entry.entry_id),
            source_device.as_deref(),
        );

        // The source may have moved to another device since the entity was
        // first registered
        if entity.device_id != source_device {
            entity = entities.update_entity(
                &entity.entity_id,
                EntityEntryUpdate::new().device_id(source_device),
            )?;
        }

        debug!("Loaded {} for {}", entity.entity_id, entry.entry_id);
        self.loaded
            .insert(entry.entry_id.clone(), entity.entity_id.clone());
        Ok(true)
    }

    async fn unload_entry(
        &self,
        _hass: &HomeAssistant,
        entry: &ConfigEntry,
    ) -> ConfigEntriesResult<bool> {
        match self.loaded.remove(&entry.entry_id) {
            Some((_, entity_id)) => {
                debug!("Unloaded {} for {}", entity_id, entry.entry_id);
                Ok(true)
            }
            None => {
                warn!(
                    "{} platform has nothing loaded for {}",
                    self.platform, entry.entry_id
                );
                Ok(false)
            }
        }
    }
}
