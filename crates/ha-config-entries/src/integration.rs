//! Integration contract
//!
//! Native integrations implement [`Integration`] to take part in the config
//! entry lifecycle, and [`EntityPlatform`] for each entity platform they
//! forward their entries to.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use ha_registries::Registries;

use crate::entry::ConfigEntry;
use crate::manager::{ConfigEntries, ConfigEntriesResult};

/// Handle to the running core, cheap to clone
#[derive(Clone)]
pub struct HomeAssistant {
    pub registries: Arc<Registries>,
    pub config_entries: Arc<ConfigEntries>,
}

impl HomeAssistant {
    pub fn new() -> Self {
        Self {
            registries: Arc::new(Registries::new()),
            config_entries: Arc::new(ConfigEntries::new()),
        }
    }
}

impl Default for HomeAssistant {
    fn default() -> Self {
        Self::new()
    }
}

/// Called with the updated entry whenever an entry changes
pub type UpdateListener =
    Arc<dyn Fn(HomeAssistant, ConfigEntry) -> BoxFuture<'static, ()> + Send + Sync>;

/// Run once when an entry unloads (or fails to set up)
pub type UnloadCallback = Box<dyn FnOnce(&ConfigEntries) + Send + Sync>;

/// Lifecycle hooks of an integration
#[async_trait]
pub trait Integration: Send + Sync {
    /// Integration domain (e.g. "spook_inverse")
    fn domain(&self) -> &'static str;

    /// Current config entry schema version
    fn version(&self) -> u32 {
        1
    }

    fn minor_version(&self) -> u32 {
        1
    }

    /// Whether [`Integration::migrate_entry`] is implemented
    fn supports_migrate(&self) -> bool {
        false
    }

    async fn setup_entry(&self, hass: &HomeAssistant, entry: &ConfigEntry)
        -> ConfigEntriesResult<bool>;

    async fn unload_entry(
        &self,
        hass: &HomeAssistant,
        entry: &ConfigEntry,
    ) -> ConfigEntriesResult<bool>;

    /// Cleanup after the entry has been unloaded for good
    async fn remove_entry(
        &self,
        _hass: &HomeAssistant,
        _entry: &ConfigEntry,
    ) -> ConfigEntriesResult<()> {
        Ok(())
    }

    /// Bring an entry written by an older version up to date
    async fn migrate_entry(
        &self,
        _hass: &HomeAssistant,
        _entry: &ConfigEntry,
    ) -> ConfigEntriesResult<bool> {
        Ok(false)
    }
}

/// One entity platform of an integration (binary_sensor, switch, ...)
#[async_trait]
pub trait EntityPlatform: Send + Sync {
    async fn setup_entry(&self, hass: &HomeAssistant, entry: &ConfigEntry)
        -> ConfigEntriesResult<bool>;

    async fn unload_entry(
        &self,
        hass: &HomeAssistant,
        entry: &ConfigEntry,
    ) -> ConfigEntriesResult<bool>;
}
