//! Entity Registry
//!
//! Tracks registered entities with unique_id tracking, device linking,
//! and secondary indexes for the lookups integrations rely on.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ha_core::{slugify, valid_entity_id};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur in the entity registry
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EntityRegistryError {
    /// Entity was not found
    #[error("Entity not found: {0}")]
    NotFound(String),
}

/// Reason an entity was disabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisabledBy {
    /// Disabled by a config entry
    ConfigEntry,
    /// Disabled by device
    Device,
    /// Disabled by the integration
    Integration,
    /// Disabled by the user
    User,
}

/// Reason an entity was hidden
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HiddenBy {
    /// Hidden by the integration
    Integration,
    /// Hidden by the user
    User,
}

/// A registered entity entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityEntry {
    /// Internal registry ID
    pub id: String,
    /// Full entity ID (domain.object_id)
    pub entity_id: String,
    /// Platform-specific unique identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
    /// Component/platform that provides this entity
    pub platform: String,

    /// Parent device ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Config entry that created this entity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_entry_id: Option<String>,

    /// User-set name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Platform default name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_by: Option<DisabledBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden_by: Option<HiddenBy>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
}

impl EntityEntry {
    /// Create a new entity entry with minimal required fields
    pub fn new(
        entity_id: impl Into<String>,
        platform: impl Into<String>,
        unique_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ulid::Ulid::new().to_string().to_lowercase(),
            entity_id: entity_id.into(),
            unique_id,
            platform: platform.into(),
            device_id: None,
            config_entry_id: None,
            name: None,
            original_name: None,
            disabled_by: None,
            hidden_by: None,
            created_at: now,
            modified_at: now,
        }
    }

    /// Get the domain from entity_id
    pub fn domain(&self) -> &str {
        self.entity_id.split('.').next().unwrap_or(&self.entity_id)
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled_by.is_some()
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden_by.is_some()
    }
}

/// Patch applied by [`EntityRegistry::update_entity`].
///
/// The outer `Option` says whether the field is touched, the inner one is
/// the new value (`Some(None)` clears it).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityEntryUpdate {
    pub hidden_by: Option<Option<HiddenBy>>,
    pub disabled_by: Option<Option<DisabledBy>>,
    pub device_id: Option<Option<String>>,
    pub name: Option<Option<String>>,
}

impl EntityEntryUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hidden_by(mut self, hidden_by: Option<HiddenBy>) -> Self {
        self.hidden_by = Some(hidden_by);
        self
    }

    pub fn disabled_by(mut self, disabled_by: Option<DisabledBy>) -> Self {
        self.disabled_by = Some(disabled_by);
        self
    }

    pub fn device_id(mut self, device_id: Option<String>) -> Self {
        self.device_id = Some(device_id);
        self
    }

    pub fn name(mut self, name: Option<String>) -> Self {
        self.name = Some(name);
        self
    }
}

/// Entity Registry with multi-index support
///
/// Provides lookups by:
/// - entity_id (primary)
/// - registry id
/// - unique_id (scoped by platform)
/// - device_id (multi)
/// - config_entry_id (multi)
///
/// Entries are stored as `Arc<EntityEntry>` so reads never clone the entry.
#[derive(Default)]
pub struct EntityRegistry {
    /// Primary index: entity_id -> EntityEntry, insertion ordered
    by_entity_id: RwLock<IndexMap<String, Arc<EntityEntry>>>,

    /// Index: registry id -> entity_id
    by_id: DashMap<String, String>,

    /// Index: (platform, unique_id) -> entity_id
    by_unique_id: DashMap<(String, String), String>,

    /// Index: device_id -> set of entity_ids
    by_device_id: DashMap<String, HashSet<String>>,

    /// Index: config_entry_id -> set of entity_ids
    by_config_entry_id: DashMap<String, HashSet<String>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn index_entry(&self, entry: Arc<EntityEntry>) {
        let entity_id = entry.entity_id.clone();

        self.by_id.insert(entry.id.clone(), entity_id.clone());

        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id.insert(
                (entry.platform.clone(), unique_id.clone()),
                entity_id.clone(),
            );
        }

        if let Some(ref device_id) = entry.device_id {
            self.by_device_id
                .entry(device_id.clone())
                .or_default()
                .insert(entity_id.clone());
        }

        if let Some(ref config_entry_id) = entry.config_entry_id {
            self.by_config_entry_id
                .entry(config_entry_id.clone())
                .or_default()
                .insert(entity_id.clone());
        }

        if let Ok(mut idx) = self.by_entity_id.write() {
            idx.insert(entity_id, entry);
        }
    }

    /// Remove an entry from the secondary indexes
    fn unindex_secondary(&self, entry: &EntityEntry) {
        self.by_id.remove(&entry.id);

        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .remove(&(entry.platform.clone(), unique_id.clone()));
        }

        if let Some(ref device_id) = entry.device_id {
            if let Some(mut ids) = self.by_device_id.get_mut(device_id) {
                ids.remove(&entry.entity_id);
            }
        }

        if let Some(ref config_entry_id) = entry.config_entry_id {
            if let Some(mut ids) = self.by_config_entry_id.get_mut(config_entry_id) {
                ids.remove(&entry.entity_id);
            }
        }
    }

    /// Get entity by entity_id
    pub fn get(&self, entity_id: &str) -> Option<Arc<EntityEntry>> {
        self.by_entity_id
            .read()
            .ok()
            .and_then(|idx| idx.get(entity_id).cloned())
    }

    /// Get entity by its internal registry id
    pub fn get_by_registry_id(&self, id: &str) -> Option<Arc<EntityEntry>> {
        let entity_id = self.by_id.get(id).map(|r| r.value().clone())?;
        self.get(&entity_id)
    }

    /// Get entity by platform and unique_id
    pub fn get_by_unique_id(&self, platform: &str, unique_id: &str) -> Option<Arc<EntityEntry>> {
        let entity_id = self
            .by_unique_id
            .get(&(platform.to_string(), unique_id.to_string()))
            .map(|r| r.value().clone())?;
        self.get(&entity_id)
    }

    /// Get all entities for a device
    pub fn get_by_device_id(&self, device_id: &str) -> Vec<Arc<EntityEntry>> {
        let ids: Vec<String> = self
            .by_device_id
            .get(device_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        ids.iter().filter_map(|id| self.get(id)).collect()
    }

    /// Get all entities for a config entry
    pub fn get_by_config_entry_id(&self, config_entry_id: &str) -> Vec<Arc<EntityEntry>> {
        let ids: Vec<String> = self
            .by_config_entry_id
            .get(config_entry_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        ids.iter().filter_map(|id| self.get(id)).collect()
    }

    /// Resolve an entity ID or a registry id to an entity ID.
    ///
    /// A well-formed entity ID is returned as-is, registered or not. Anything
    /// else is looked up as a registry id; `None` if that fails.
    pub fn resolve_entity_id(&self, entity_id_or_uuid: &str) -> Option<String> {
        if valid_entity_id(entity_id_or_uuid) {
            return Some(entity_id_or_uuid.to_string());
        }
        self.get_by_registry_id(entity_id_or_uuid)
            .map(|entry| entry.entity_id.clone())
    }

    /// Get or create an entity entry
    ///
    /// If an entity with the same platform and unique_id exists it is
    /// returned untouched. Otherwise a new entry is registered under an
    /// entity_id derived from `domain` and `suggested_object_id`.
    pub fn get_or_create(
        &self,
        domain: &str,
        platform: &str,
        unique_id: &str,
        suggested_object_id: &str,
        config_entry_id: Option<&str>,
        device_id: Option<&str>,
    ) -> Arc<EntityEntry> {
        if let Some(existing) = self.get_by_unique_id(platform, unique_id) {
            debug!("Found existing entity by unique_id: {}", existing.entity_id);
            return existing;
        }

        let entity_id = self.generate_entity_id(domain, suggested_object_id);
        let mut entry = EntityEntry::new(&entity_id, platform, Some(unique_id.to_string()));
        entry.config_entry_id = config_entry_id.map(String::from);
        entry.device_id = device_id.map(String::from);

        let arc_entry = Arc::new(entry);
        self.index_entry(Arc::clone(&arc_entry));

        info!("Registered new entity: {}", entity_id);
        arc_entry
    }

    /// Register an entry as-is, replacing any entry with the same entity_id
    pub fn insert(&self, entry: EntityEntry) -> Arc<EntityEntry> {
        if let Some(old) = self.get(&entry.entity_id) {
            self.unindex_secondary(&old);
        }
        let arc_entry = Arc::new(entry);
        self.index_entry(Arc::clone(&arc_entry));
        arc_entry
    }

    /// Update an entity entry in place
    ///
    /// The closure receives a mutable clone of the entry, which then replaces
    /// the stored one. `modified_at` is bumped.
    pub fn update<F>(&self, entity_id: &str, f: F) -> Result<Arc<EntityEntry>, EntityRegistryError>
    where
        F: FnOnce(&mut EntityEntry),
    {
        let current = self
            .get(entity_id)
            .ok_or_else(|| EntityRegistryError::NotFound(entity_id.to_string()))?;

        let mut entry = (*current).clone();
        f(&mut entry);
        entry.modified_at = Utc::now();

        self.unindex_secondary(&current);
        if entry.entity_id != current.entity_id {
            if let Ok(mut idx) = self.by_entity_id.write() {
                idx.shift_remove(&current.entity_id);
            }
        }

        let new_arc = Arc::new(entry);
        self.index_entry(Arc::clone(&new_arc));
        Ok(new_arc)
    }

    /// Apply an [`EntityEntryUpdate`] patch
    pub fn update_entity(
        &self,
        entity_id: &str,
        update: EntityEntryUpdate,
    ) -> Result<Arc<EntityEntry>, EntityRegistryError> {
        let updated = self.update(entity_id, |entry| {
            if let Some(hidden_by) = update.hidden_by {
                entry.hidden_by = hidden_by;
            }
            if let Some(disabled_by) = update.disabled_by {
                entry.disabled_by = disabled_by;
            }
            if let Some(device_id) = update.device_id {
                entry.device_id = device_id;
            }
            if let Some(name) = update.name {
                entry.name = name;
            }
        })?;
        debug!(entity_id, "Updated entity registry entry");
        Ok(updated)
    }

    /// Remove an entity
    pub fn remove(&self, entity_id: &str) -> Option<Arc<EntityEntry>> {
        let removed = self
            .by_entity_id
            .write()
            .ok()
            .and_then(|mut idx| idx.shift_remove(entity_id));

        if let Some(ref entry) = removed {
            self.unindex_secondary(entry);
            info!("Removed entity: {}", entity_id);
        }
        removed
    }

    /// Remove every entity created by a config entry
    pub fn clear_config_entry(&self, config_entry_id: &str) -> Vec<String> {
        let entity_ids: Vec<String> = self
            .get_by_config_entry_id(config_entry_id)
            .iter()
            .map(|e| e.entity_id.clone())
            .collect();

        for entity_id in &entity_ids {
            self.remove(entity_id);
        }
        entity_ids
    }

    /// Check if an entity_id is registered
    pub fn is_registered(&self, entity_id: &str) -> bool {
        self.by_entity_id
            .read()
            .map(|idx| idx.contains_key(entity_id))
            .unwrap_or(false)
    }

    /// Generate an entity_id that doesn't conflict with existing registrations
    ///
    /// The object_id is slugified; if `{domain}.{object_id}` is taken,
    /// `_2`, `_3`, ... are appended until a free one is found.
    pub fn generate_entity_id(&self, domain: &str, suggested_object_id: &str) -> String {
        let preferred = format!("{}.{}", domain, slugify(suggested_object_id));
        if !self.is_registered(&preferred) {
            return preferred;
        }

        let mut tries = 2u32;
        loop {
            let candidate = format!("{}_{}", preferred, tries);
            if !self.is_registered(&candidate) {
                return candidate;
            }
            tries += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.by_entity_id.read().map(|idx| idx.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All entries in insertion order
    pub fn iter(&self) -> Vec<Arc<EntityEntry>> {
        self.by_entity_id
            .read()
            .map(|idx| idx.values().cloned().collect())
            .unwrap_or_default()
    }
}
