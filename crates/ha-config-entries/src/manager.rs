//! Config Entries Manager
//!
//! Manages the lifecycle of configuration entries: migration, setup,
//! forwarding to entity platforms, unload, reload and removal.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use ha_core::Platform;
use ha_registries::{DeviceRegistryError, EntityRegistryError};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::entry::{ConfigEntry, ConfigEntryUpdate};
use crate::integration::{
    EntityPlatform, HomeAssistant, Integration, UnloadCallback, UpdateListener,
};
use crate::state_machine::{ConfigEntryState, InvalidTransition};

/// Config entries errors
#[derive(Debug, Error)]
pub enum ConfigEntriesError {
    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Entry already exists for domain {domain} with unique_id {unique_id}")]
    AlreadyExists { domain: String, unique_id: String },

    #[error("Cannot unload entry in state {0:?}")]
    CannotUnload(ConfigEntryState),

    #[error("Integration not found: {0}")]
    IntegrationNotFound(String),

    #[error("Platform {platform} not provided by {domain}")]
    PlatformNotFound { domain: String, platform: Platform },

    #[error("Platform {platform} was never loaded for entry {entry_id}")]
    PlatformNotLoaded { entry_id: String, platform: Platform },

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error(transparent)]
    EntityRegistry(#[from] EntityRegistryError),

    #[error(transparent)]
    DeviceRegistry(#[from] DeviceRegistryError),

    /// Error raised by an integration's own code
    #[error("{domain}: {message}")]
    Integration { domain: String, message: String },
}

pub type ConfigEntriesResult<T> = Result<T, ConfigEntriesError>;

/// Identifies a registered update listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Config Entries Manager
///
/// Lifecycle operations (setup, unload, reload, remove) are serialized by a
/// single lock. Update listeners run as spawned tasks, so a listener that
/// reloads its entry never waits on the lock held by whoever changed it.
#[derive(Default)]
pub struct ConfigEntries {
    /// Primary index: entry_id -> ConfigEntry
    entries: DashMap<String, ConfigEntry>,

    /// Index: domain -> set of entry_ids
    by_domain: DashMap<String, HashSet<String>>,

    /// Index: (domain, unique_id) -> entry_id
    by_unique_id: DashMap<(String, String), String>,

    /// Lifecycle lock
    setup_lock: Mutex<()>,

    /// Integrations by domain
    integrations: DashMap<String, Arc<dyn Integration>>,

    /// Entity platforms by (domain, platform)
    platforms: DashMap<(String, Platform), Arc<dyn EntityPlatform>>,

    /// Platforms each entry has been forwarded to
    forwarded: DashMap<String, HashSet<Platform>>,

    update_listeners: DashMap<String, Vec<(ListenerId, UpdateListener)>>,
    next_listener_id: AtomicU64,

    unload_callbacks: DashMap<String, Vec<UnloadCallback>>,

    /// Spawned listener tasks not yet awaited
    pending: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl ConfigEntries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_integration(&self, integration: Arc<dyn Integration>) {
        let domain = integration.domain();
        self.integrations.insert(domain.to_string(), integration);
        debug!("Registered integration: {}", domain);
    }

    pub fn register_platform(
        &self,
        domain: &str,
        platform: Platform,
        handler: Arc<dyn EntityPlatform>,
    ) {
        self.platforms
            .insert((domain.to_string(), platform), handler);
        debug!("Registered {} platform for {}", platform, domain);
    }

    fn integration(&self, domain: &str) -> ConfigEntriesResult<Arc<dyn Integration>> {
        self.integrations
            .get(domain)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| ConfigEntriesError::IntegrationNotFound(domain.to_string()))
    }

    fn platform(&self, domain: &str, platform: Platform) -> ConfigEntriesResult<Arc<dyn EntityPlatform>> {
        self.platforms
            .get(&(domain.to_string(), platform))
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| ConfigEntriesError::PlatformNotFound {
                domain: domain.to_string(),
                platform,
            })
    }

    fn index_entry(&self, entry: &ConfigEntry) {
        let entry_id = entry.entry_id.clone();

        self.by_domain
            .entry(entry.domain.clone())
            .or_default()
            .insert(entry_id.clone());

        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .insert((entry.domain.clone(), unique_id.clone()), entry_id.clone());
        }

        self.entries.insert(entry_id, entry.clone());
    }

    fn unindex_entry(&self, entry: &ConfigEntry) {
        if let Some(mut ids) = self.by_domain.get_mut(&entry.domain) {
            ids.remove(&entry.entry_id);
        }

        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .remove(&(entry.domain.clone(), unique_id.clone()));
        }

        self.entries.remove(&entry.entry_id);
    }

    pub fn get(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.entries.get(entry_id).map(|r| r.value().clone())
    }

    fn get_required(&self, entry_id: &str) -> ConfigEntriesResult<ConfigEntry> {
        self.get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))
    }

    pub fn get_by_domain(&self, domain: &str) -> Vec<ConfigEntry> {
        let ids: Vec<String> = self
            .by_domain
            .get(domain)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        ids.iter().filter_map(|id| self.get(id)).collect()
    }

    pub fn get_by_unique_id(&self, domain: &str, unique_id: &str) -> Option<ConfigEntry> {
        let entry_id = self
            .by_unique_id
            .get(&(domain.to_string(), unique_id.to_string()))
            .map(|r| r.value().clone())?;
        self.get(&entry_id)
    }

    /// Add a new config entry
    pub fn add(&self, entry: ConfigEntry) -> ConfigEntriesResult<ConfigEntry> {
        if let Some(ref unique_id) = entry.unique_id {
            if self.get_by_unique_id(&entry.domain, unique_id).is_some() {
                return Err(ConfigEntriesError::AlreadyExists {
                    domain: entry.domain.clone(),
                    unique_id: unique_id.clone(),
                });
            }
        }

        self.index_entry(&entry);
        info!(
            "Added config entry: {} ({}) [{}]",
            entry.title, entry.domain, entry.entry_id
        );
        Ok(entry)
    }

    /// Update an existing entry.
    ///
    /// Returns `false` if the update changed nothing. Otherwise every update
    /// listener of the entry is spawned with the updated entry; use
    /// [`ConfigEntries::block_till_done`] to wait for them.
    pub fn update_entry(
        &self,
        hass: &HomeAssistant,
        entry_id: &str,
        update: ConfigEntryUpdate,
    ) -> ConfigEntriesResult<bool> {
        let entry = self.get_required(entry_id)?;

        let mut updated = entry.clone();
        if !update.apply_to(&mut updated) {
            return Ok(false);
        }

        self.unindex_entry(&entry);
        self.index_entry(&updated);
        debug!(
            "Updated config entry: {} (v{}.{})",
            entry_id, updated.version, updated.minor_version
        );

        let listeners: Vec<UpdateListener> = self
            .update_listeners
            .get(entry_id)
            .map(|l| l.iter().map(|(_, listener)| Arc::clone(listener)).collect())
            .unwrap_or_default();

        if listeners.is_empty() {
            return Ok(true);
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(
                "No async runtime, skipping {} update listener(s) of {}",
                listeners.len(),
                entry_id
            );
            return Ok(true);
        };

        let handles: Vec<JoinHandle<()>> = listeners
            .into_iter()
            .map(|listener| runtime.spawn(listener(hass.clone(), updated.clone())))
            .collect();
        match self.pending.lock() {
            Ok(mut pending) => pending.extend(handles),
            Err(_) => warn!(
                "Listener queue poisoned, {} update listener(s) of {} will not be awaited",
                handles.len(),
                entry_id
            ),
        }

        Ok(true)
    }

    /// Wait for every spawned update listener, including ones spawned while
    /// waiting
    pub async fn block_till_done(&self) {
        loop {
            let handles = match self.pending.lock() {
                Ok(mut pending) => std::mem::take(&mut *pending),
                Err(_) => {
                    warn!("Listener queue poisoned, not waiting for update listeners");
                    return;
                }
            };
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(err) = handle.await {
                    warn!("Update listener task failed: {}", err);
                }
            }
        }
    }

    fn set_state(
        &self,
        entry_id: &str,
        state: ConfigEntryState,
        reason: Option<String>,
    ) -> ConfigEntriesResult<()> {
        let mut entry = self
            .entries
            .get_mut(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        entry.try_set_state(state, reason)?;
        debug!("Entry {} state changed to {:?}", entry_id, state);
        Ok(())
    }

    pub fn add_update_listener(&self, entry_id: &str, listener: UpdateListener) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.update_listeners
            .entry(entry_id.to_string())
            .or_default()
            .push((id, listener));
        id
    }

    pub fn remove_update_listener(&self, entry_id: &str, id: ListenerId) -> bool {
        match self.update_listeners.get_mut(entry_id) {
            Some(mut listeners) => {
                let before = listeners.len();
                listeners.retain(|(listener_id, _)| *listener_id != id);
                listeners.len() != before
            }
            None => false,
        }
    }

    pub fn update_listener_count(&self, entry_id: &str) -> usize {
        self.update_listeners
            .get(entry_id)
            .map(|l| l.len())
            .unwrap_or(0)
    }

    /// Register a callback to run when the entry unloads
    pub fn on_unload(&self, entry_id: &str, callback: UnloadCallback) {
        self.unload_callbacks
            .entry(entry_id.to_string())
            .or_default()
            .push(callback);
    }

    fn process_on_unload(&self, entry_id: &str) {
        let callbacks = self
            .unload_callbacks
            .remove(entry_id)
            .map(|(_, callbacks)| callbacks)
            .unwrap_or_default();
        for callback in callbacks {
            callback(self);
        }
    }

    /// Forward an entry's setup to entity platforms.
    ///
    /// Returns `true` only if every platform set up successfully.
    pub async fn forward_entry_setups(
        &self,
        hass: &HomeAssistant,
        entry: &ConfigEntry,
        platforms: &[Platform],
    ) -> ConfigEntriesResult<bool> {
        let mut all_loaded = true;

        for &platform in platforms {
            let handler = self.platform(&entry.domain, platform)?;
            let loaded = handler.setup_entry(hass, entry).await?;
            if loaded {
                self.forwarded
                    .entry(entry.entry_id.clone())
                    .or_default()
                    .insert(platform);
            } else {
                warn!("Platform {} failed to set up {}", platform, entry.entry_id);
            }
            all_loaded &= loaded;
        }

        Ok(all_loaded)
    }

    /// Unload an entry from entity platforms it was forwarded to.
    ///
    /// Returns `true` only if every platform unloaded.
    pub async fn unload_platforms(
        &self,
        hass: &HomeAssistant,
        entry: &ConfigEntry,
        platforms: &[Platform],
    ) -> ConfigEntriesResult<bool> {
        let mut all_unloaded = true;

        for &platform in platforms {
            let was_forwarded = self
                .forwarded
                .get(&entry.entry_id)
                .map(|loaded| loaded.contains(&platform))
                .unwrap_or(false);
            if !was_forwarded {
                return Err(ConfigEntriesError::PlatformNotLoaded {
                    entry_id: entry.entry_id.clone(),
                    platform,
                });
            }

            let handler = self.platform(&entry.domain, platform)?;
            let unloaded = handler.unload_entry(hass, entry).await?;
            if unloaded {
                if let Some(mut loaded) = self.forwarded.get_mut(&entry.entry_id) {
                    loaded.remove(&platform);
                }
            }
            all_unloaded &= unloaded;
        }

        Ok(all_unloaded)
    }

    pub fn forwarded_platforms(&self, entry_id: &str) -> Vec<Platform> {
        self.forwarded
            .get(entry_id)
            .map(|loaded| loaded.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Migrate (if needed) and set up an entry
    pub async fn setup(&self, hass: &HomeAssistant, entry_id: &str) -> ConfigEntriesResult<bool> {
        let _lock = self.setup_lock.lock().await;
        self.setup_locked(hass, entry_id).await
    }

    /// Unload an entry
    pub async fn unload(&self, hass: &HomeAssistant, entry_id: &str) -> ConfigEntriesResult<bool> {
        let _lock = self.setup_lock.lock().await;
        self.unload_locked(hass, entry_id).await
    }

    /// Unload (if loaded) then set up an entry again
    pub async fn reload(&self, hass: &HomeAssistant, entry_id: &str) -> ConfigEntriesResult<bool> {
        let _lock = self.setup_lock.lock().await;

        if !self.unload_locked(hass, entry_id).await? {
            return Ok(false);
        }
        info!("Reloading config entry {}", entry_id);
        self.setup_locked(hass, entry_id).await
    }

    /// Remove an entry for good
    ///
    /// The entry is unloaded, its integration gets a chance to clean up and
    /// everything it registered is dropped from the registries. Errors from
    /// the integration's cleanup are logged, not returned.
    pub async fn remove(&self, hass: &HomeAssistant, entry_id: &str) -> ConfigEntriesResult<ConfigEntry> {
        let _lock = self.setup_lock.lock().await;

        let entry = self.get_required(entry_id)?;
        if entry.state.is_recoverable() {
            if let Err(err) = self.unload_locked(hass, entry_id).await {
                warn!("Error unloading entry {} before removal: {}", entry_id, err);
            }
        }

        let entry = self.get_required(entry_id)?;
        match self.integration(&entry.domain) {
            Ok(integration) => {
                if let Err(err) = integration.remove_entry(hass, &entry).await {
                    warn!("Error calling remove callback of {}: {}", entry_id, err);
                }
            }
            Err(_) => debug!("No integration loaded for {}, skipping remove callback", entry.domain),
        }

        hass.registries.clear_config_entry(entry_id);
        self.unindex_entry(&entry);
        self.update_listeners.remove(entry_id);
        self.unload_callbacks.remove(entry_id);
        self.forwarded.remove(entry_id);

        info!(
            "Removed config entry: {} ({}) [{}]",
            entry.title, entry.domain, entry_id
        );
        Ok(entry)
    }

    async fn setup_locked(&self, hass: &HomeAssistant, entry_id: &str) -> ConfigEntriesResult<bool> {
        let entry = self.get_required(entry_id)?;
        if entry.is_disabled() {
            debug!("Skipping setup for disabled entry: {}", entry_id);
            return Ok(false);
        }

        let integration = self.integration(&entry.domain)?;
        self.set_state(entry_id, ConfigEntryState::SetupInProgress, None)?;

        match self.migrate(hass, &entry, integration.as_ref()).await {
            Ok(true) => {}
            Ok(false) => {
                self.set_state(
                    entry_id,
                    ConfigEntryState::MigrationError,
                    Some("Migration failed".to_string()),
                )?;
                return Ok(false);
            }
            Err(err) => {
                self.set_state(
                    entry_id,
                    ConfigEntryState::MigrationError,
                    Some(err.to_string()),
                )?;
                return Err(err);
            }
        }

        // Migration may have rewritten the entry
        let entry = self.get_required(entry_id)?;

        match integration.setup_entry(hass, &entry).await {
            Ok(true) => {
                self.set_state(entry_id, ConfigEntryState::Loaded, None)?;
                info!("Setup completed for entry: {} ({})", entry.title, entry_id);
                Ok(true)
            }
            Ok(false) => {
                warn!("Setup failed for entry {}", entry_id);
                self.process_on_unload(entry_id);
                self.set_state(entry_id, ConfigEntryState::SetupError, None)?;
                Ok(false)
            }
            Err(err) => {
                warn!("Error setting up entry {}: {}", entry_id, err);
                self.process_on_unload(entry_id);
                self.set_state(entry_id, ConfigEntryState::SetupError, Some(err.to_string()))?;
                Err(err)
            }
        }
    }

    async fn migrate(
        &self,
        hass: &HomeAssistant,
        entry: &ConfigEntry,
        integration: &dyn Integration,
    ) -> ConfigEntriesResult<bool> {
        let same_major = entry.version == integration.version();
        if same_major && entry.minor_version == integration.minor_version() {
            return Ok(true);
        }

        if !integration.supports_migrate() {
            if same_major {
                return Ok(true);
            }
            warn!(
                "Migration handler not found for entry {} for {}",
                entry.title, entry.domain
            );
            return Ok(false);
        }

        info!(
            "Migrating {} entry {} from version {}.{}",
            entry.domain, entry.entry_id, entry.version, entry.minor_version
        );
        let migrated = integration.migrate_entry(hass, entry).await?;

        if migrated {
            if let Some(current) = self.get(&entry.entry_id) {
                info!(
                    "Migration of {} to version {}.{} successful",
                    entry.entry_id, current.version, current.minor_version
                );
            }
        } else {
            warn!("Migration of {} failed", entry.entry_id);
        }
        Ok(migrated)
    }

    async fn unload_locked(&self, hass: &HomeAssistant, entry_id: &str) -> ConfigEntriesResult<bool> {
        let entry = self.get_required(entry_id)?;

        if entry.state == ConfigEntryState::NotLoaded {
            return Ok(true);
        }
        if !entry.state.is_recoverable() {
            return Err(ConfigEntriesError::CannotUnload(entry.state));
        }

        self.set_state(entry_id, ConfigEntryState::UnloadInProgress, None)?;

        // A failed setup left nothing behind to unload
        if entry.state != ConfigEntryState::Loaded {
            self.process_on_unload(entry_id);
            self.set_state(entry_id, ConfigEntryState::NotLoaded, None)?;
            return Ok(true);
        }

        let integration = self.integration(&entry.domain)?;
        match integration.unload_entry(hass, &entry).await {
            Ok(true) => {
                self.process_on_unload(entry_id);
                self.set_state(entry_id, ConfigEntryState::NotLoaded, None)?;
                info!("Unloaded entry: {} ({})", entry.title, entry_id);
                Ok(true)
            }
            Ok(false) => {
                self.set_state(
                    entry_id,
                    ConfigEntryState::FailedUnload,
                    Some("Unload failed".to_string()),
                )?;
                Ok(false)
            }
            Err(err) => {
                self.set_state(entry_id, ConfigEntryState::FailedUnload, Some(err.to_string()))?;
                Err(err)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::future::BoxFuture;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    const DOMAIN: &str = "demo_helper";

    #[derive(Default)]
    struct FakePlatform {
        setups: AtomicUsize,
        unloads: AtomicUsize,
        fail_setup: bool,
    }

    #[async_trait]
    impl EntityPlatform for FakePlatform {
        async fn setup_entry(
            &self,
            _hass: &HomeAssistant,
            _entry: &ConfigEntry,
        ) -> ConfigEntriesResult<bool> {
            self.setups.fetch_add(1, Ordering::SeqCst);
            Ok(!self.fail_setup)
        }

        async fn unload_entry(
            &self,
            _hass: &HomeAssistant,
            _entry: &ConfigEntry,
        ) -> ConfigEntriesResult<bool> {
            self.unloads.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    struct FakeIntegration {
        version: u32,
        minor_version: u32,
        migrates: bool,
        removed: AtomicUsize,
    }

    impl FakeIntegration {
        fn new() -> Self {
            Self {
                version: 1,
                minor_version: 1,
                migrates: false,
                removed: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Integration for FakeIntegration {
        fn domain(&self) -> &'static str {
            DOMAIN
        }

        fn version(&self) -> u32 {
            self.version
        }

        fn minor_version(&self) -> u32 {
            self.minor_version
        }

        fn supports_migrate(&self) -> bool {
            self.migrates
        }

        async fn setup_entry(
            &self,
            hass: &HomeAssistant,
            entry: &ConfigEntry,
        ) -> ConfigEntriesResult<bool> {
            hass.config_entries
                .forward_entry_setups(hass, entry, &[Platform::Switch])
                .await
        }

        async fn unload_entry(
            &self,
            hass: &HomeAssistant,
            entry: &ConfigEntry,
        ) -> ConfigEntriesResult<bool> {
            hass.config_entries
                .unload_platforms(hass, entry, &[Platform::Switch])
                .await
        }

        async fn remove_entry(
            &self,
            _hass: &HomeAssistant,
            _entry: &ConfigEntry,
        ) -> ConfigEntriesResult<()> {
            self.removed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn migrate_entry(
            &self,
            hass: &HomeAssistant,
            entry: &ConfigEntry,
        ) -> ConfigEntriesResult<bool> {
            hass.config_entries.update_entry(
                hass,
                &entry.entry_id,
                ConfigEntryUpdate::new().minor_version(self.minor_version),
            )?;
            Ok(true)
        }
    }

    fn hass_with(integration: FakeIntegration, platform: Arc<FakePlatform>) -> HomeAssistant {
        let hass = HomeAssistant::new();
        hass.config_entries.register_integration(Arc::new(integration));
        hass.config_entries
            .register_platform(DOMAIN, Platform::Switch, platform);
        hass
    }

    fn state(hass: &HomeAssistant, entry_id: &str) -> ConfigEntryState {
        hass.config_entries.get(entry_id).unwrap().state
    }

    #[test]
    fn test_duplicate_unique_id_rejected() {
        let manager = ConfigEntries::new();

        manager
            .add(ConfigEntry::new(DOMAIN, "One").with_unique_id("same-id"))
            .unwrap();
        let result = manager.add(ConfigEntry::new(DOMAIN, "Two").with_unique_id("same-id"));

        assert!(matches!(
            result,
            Err(ConfigEntriesError::AlreadyExists { .. })
        ));
        assert_eq!(manager.get_by_domain(DOMAIN).len(), 1);
    }

    #[tokio::test]
    async fn test_setup_and_unload_forward_to_platform() {
        let platform = Arc::new(FakePlatform::default());
        let hass = hass_with(FakeIntegration::new(), platform.clone());
        let entry = hass.config_entries.add(ConfigEntry::new(DOMAIN, "Test")).unwrap();

        assert!(hass.config_entries.setup(&hass, &entry.entry_id).await.unwrap());
        assert_eq!(state(&hass, &entry.entry_id), ConfigEntryState::Loaded);
        assert_eq!(
            hass.config_entries.forwarded_platforms(&entry.entry_id),
            vec![Platform::Switch]
        );

        assert!(hass.config_entries.unload(&hass, &entry.entry_id).await.unwrap());
        assert_eq!(state(&hass, &entry.entry_id), ConfigEntryState::NotLoaded);
        assert!(hass.config_entries.forwarded_platforms(&entry.entry_id).is_empty());
        assert_eq!(platform.setups.load(Ordering::SeqCst), 1);
        assert_eq!(platform.unloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_platform_failure_is_setup_error() {
        let platform = Arc::new(FakePlatform {
            fail_setup: true,
            ..Default::default()
        });
        let hass = hass_with(FakeIntegration::new(), platform);
        let entry = hass.config_entries.add(ConfigEntry::new(DOMAIN, "Test")).unwrap();

        assert!(!hass.config_entries.setup(&hass, &entry.entry_id).await.unwrap());
        assert_eq!(state(&hass, &entry.entry_id), ConfigEntryState::SetupError);

        // A failed entry can still be reloaded
        assert!(!hass.config_entries.reload(&hass, &entry.entry_id).await.unwrap());
        assert_eq!(state(&hass, &entry.entry_id), ConfigEntryState::SetupError);
    }

    #[tokio::test]
    async fn test_missing_platform_propagates() {
        let hass = HomeAssistant::new();
        hass.config_entries
            .register_integration(Arc::new(FakeIntegration::new()));
        let entry = hass.config_entries.add(ConfigEntry::new(DOMAIN, "Test")).unwrap();

        let result = hass.config_entries.setup(&hass, &entry.entry_id).await;

        assert!(matches!(
            result,
            Err(ConfigEntriesError::PlatformNotFound {
                platform: Platform::Switch,
                ..
            })
        ));
        let entry = hass.config_entries.get(&entry.entry_id).unwrap();
        assert_eq!(entry.state, ConfigEntryState::SetupError);
        assert!(entry.reason.is_some());
    }

    #[tokio::test]
    async fn test_missing_integration() {
        let hass = HomeAssistant::new();
        let entry = hass.config_entries.add(ConfigEntry::new(DOMAIN, "Test")).unwrap();

        let result = hass.config_entries.setup(&hass, &entry.entry_id).await;

        assert!(matches!(result, Err(ConfigEntriesError::IntegrationNotFound(_))));
        assert_eq!(state(&hass, &entry.entry_id), ConfigEntryState::NotLoaded);
    }

    #[tokio::test]
    async fn test_disabled_entry_is_not_set_up() {
        let platform = Arc::new(FakePlatform::default());
        let hass = hass_with(FakeIntegration::new(), platform.clone());
        let mut entry = ConfigEntry::new(DOMAIN, "Test");
        entry.disabled_by = Some(crate::entry::ConfigEntryDisabledBy::User);
        let entry = hass.config_entries.add(entry).unwrap();

        assert!(!hass.config_entries.setup(&hass, &entry.entry_id).await.unwrap());
        assert_eq!(state(&hass, &entry.entry_id), ConfigEntryState::NotLoaded);
        assert_eq!(platform.setups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_block_till_done_with_poisoned_queue() {
        let manager = ConfigEntries::new();
        std::thread::scope(|s| {
            let _ = s
                .spawn(|| {
                    let _guard = manager.pending.lock().unwrap();
                    panic!("listener queue poisoned");
                })
                .join();
        });
        assert!(manager.pending.is_poisoned());

        let hass = HomeAssistant::new();
        let entry = manager.add(ConfigEntry::new(DOMAIN, "Test")).unwrap();
        manager.add_update_listener(
            &entry.entry_id,
            Arc::new(|_hass: HomeAssistant, _entry: ConfigEntry| -> BoxFuture<'static, ()> {
                Box::pin(async {})
            }),
        );
        let mut options = crate::entry::EntryOptions::new();
        options.insert("flag".into(), json!(true));
        assert!(manager
            .update_entry(&hass, &entry.entry_id, ConfigEntryUpdate::new().options(options))
            .unwrap());

        // Returns instead of waiting on handles it cannot reach
        manager.block_till_done().await;
    }

    #[tokio::test]
    async fn test_unload_platform_never_forwarded() {
        let hass = hass_with(FakeIntegration::new(), Arc::new(FakePlatform::default()));
        let entry = hass.config_entries.add(ConfigEntry::new(DOMAIN, "Test")).unwrap();

        let result = hass
            .config_entries
            .unload_platforms(&hass, &entry, &[Platform::Switch])
            .await;

        assert!(matches!(
            result,
            Err(ConfigEntriesError::PlatformNotLoaded { .. })
        ));
    }

    #[tokio::test]
    async fn test_setup_runs_migration() {
        let integration = FakeIntegration {
            minor_version: 2,
            migrates: true,
            ..FakeIntegration::new()
        };
        let hass = hass_with(integration, Arc::new(FakePlatform::default()));
        let entry = hass.config_entries.add(ConfigEntry::new(DOMAIN, "Test")).unwrap();

        assert!(hass.config_entries.setup(&hass, &entry.entry_id).await.unwrap());

        let entry = hass.config_entries.get(&entry.entry_id).unwrap();
        assert_eq!(entry.minor_version, 2);
        assert!(entry.is_loaded());
    }

    #[tokio::test]
    async fn test_missing_migration_handler() {
        let integration = FakeIntegration {
            version: 2,
            ..FakeIntegration::new()
        };
        let hass = hass_with(integration, Arc::new(FakePlatform::default()));
        let entry = hass.config_entries.add(ConfigEntry::new(DOMAIN, "Test")).unwrap();

        assert!(!hass.config_entries.setup(&hass, &entry.entry_id).await.unwrap());
        assert_eq!(state(&hass, &entry.entry_id), ConfigEntryState::MigrationError);

        // Terminal: neither unload nor setup get it out
        assert!(matches!(
            hass.config_entries.unload(&hass, &entry.entry_id).await,
            Err(ConfigEntriesError::CannotUnload(ConfigEntryState::MigrationError))
        ));
    }

    #[tokio::test]
    async fn test_minor_bump_without_handler_is_fine() {
        let integration = FakeIntegration {
            minor_version: 3,
            ..FakeIntegration::new()
        };
        let hass = hass_with(integration, Arc::new(FakePlatform::default()));
        let entry = hass.config_entries.add(ConfigEntry::new(DOMAIN, "Test")).unwrap();

        assert!(hass.config_entries.setup(&hass, &entry.entry_id).await.unwrap());
        assert_eq!(hass.config_entries.get(&entry.entry_id).unwrap().minor_version, 1);
    }

    #[tokio::test]
    async fn test_update_listener_only_on_change() {
        let hass = HomeAssistant::new();
        let entry = hass.config_entries.add(ConfigEntry::new(DOMAIN, "Test")).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        hass.config_entries.add_update_listener(
            &entry.entry_id,
            Arc::new(move |_hass: HomeAssistant, entry: ConfigEntry| -> BoxFuture<'static, ()> {
                let counter = counter.clone();
                Box::pin(async move {
                    assert_eq!(entry.options["flag"], json!(true));
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            }),
        );

        let mut options = crate::entry::EntryOptions::new();
        options.insert("flag".into(), json!(true));

        let changed = hass
            .config_entries
            .update_entry(&hass, &entry.entry_id, ConfigEntryUpdate::new().options(options.clone()))
            .unwrap();
        assert!(changed);
        let unchanged = hass
            .config_entries
            .update_entry(&hass, &entry.entry_id, ConfigEntryUpdate::new().options(options))
            .unwrap();
        assert!(!unchanged);

        hass.config_entries.block_till_done().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unload_runs_unload_callbacks() {
        let hass = hass_with(FakeIntegration::new(), Arc::new(FakePlatform::default()));
        let entry = hass.config_entries.add(ConfigEntry::new(DOMAIN, "Test")).unwrap();
        hass.config_entries.setup(&hass, &entry.entry_id).await.unwrap();

        let id = hass.config_entries.add_update_listener(
            &entry.entry_id,
            Arc::new(|_hass: HomeAssistant, _entry: ConfigEntry| -> BoxFuture<'static, ()> {
                Box::pin(async {})
            }),
        );
        let entry_id = entry.entry_id.clone();
        hass.config_entries.on_unload(
            &entry.entry_id,
            Box::new(move |entries: &ConfigEntries| {
                entries.remove_update_listener(&entry_id, id);
            }),
        );
        assert_eq!(hass.config_entries.update_listener_count(&entry.entry_id), 1);

        hass.config_entries.unload(&hass, &entry.entry_id).await.unwrap();

        assert_eq!(hass.config_entries.update_listener_count(&entry.entry_id), 0);
    }

    #[tokio::test]
    async fn test_remove_entry() {
        let platform = Arc::new(FakePlatform::default());
        let integration = Arc::new(FakeIntegration::new());
        let hass = HomeAssistant::new();
        hass.config_entries.register_integration(integration.clone());
        hass.config_entries
            .register_platform(DOMAIN, Platform::Switch, platform.clone());

        let entry = hass.config_entries.add(ConfigEntry::new(DOMAIN, "Test")).unwrap();
        hass.registries.entities.get_or_create(
            "switch",
            DOMAIN,
            &entry.entry_id,
            "Test",
            Some(&entry.entry_id),
            None,
        );
        hass.config_entries.setup(&hass, &entry.entry_id).await.unwrap();

        let removed = hass.config_entries.remove(&hass, &entry.entry_id).await.unwrap();

        assert_eq!(removed.state, ConfigEntryState::NotLoaded);
        assert!(hass.config_entries.is_empty());
        assert!(hass.registries.entities.is_empty());
        assert_eq!(platform.unloads.load(Ordering::SeqCst), 1);
        assert_eq!(integration.removed.load(Ordering::SeqCst), 1);
    }
}
