//! Device Registry
//!
//! Tracks devices and the config entries attached to them.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceRegistryError {
    /// Device was not found
    #[error("Device not found: {0}")]
    NotFound(String),
}

/// Device identifier: (domain, id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentifier(pub String, pub String);

impl DeviceIdentifier {
    pub fn new(domain: impl Into<String>, id: impl Into<String>) -> Self {
        Self(domain.into(), id.into())
    }

    pub fn domain(&self) -> &str {
        &self.0
    }

    pub fn id(&self) -> &str {
        &self.1
    }
}

/// A registered device entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// Internal UUID
    pub id: String,

    /// Unique identifiers by domain (e.g., [["shelly", "abc123"]])
    #[serde(default)]
    pub identifiers: Vec<DeviceIdentifier>,

    /// Associated config entries, in attachment order
    #[serde(default)]
    pub config_entries: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_config_entry: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
}

impl DeviceEntry {
    pub fn new(name: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            identifiers: Vec::new(),
            config_entries: Vec::new(),
            primary_config_entry: None,
            name: name.map(|s| s.to_string()),
            created_at: now,
            modified_at: now,
        }
    }

    /// Attach a config entry; the first one attached becomes primary
    fn attach_config_entry(&mut self, config_entry_id: &str) {
        if self.primary_config_entry.is_none() {
            self.primary_config_entry = Some(config_entry_id.to_string());
        }
        if !self.config_entries.iter().any(|id| id == config_entry_id) {
            self.config_entries.push(config_entry_id.to_string());
        }
    }

    /// Detach a config entry, promoting the next one to primary if needed
    fn detach_config_entry(&mut self, config_entry_id: &str) {
        self.config_entries.retain(|id| id != config_entry_id);
        if self.primary_config_entry.as_deref() == Some(config_entry_id) {
            self.primary_config_entry = self.config_entries.first().cloned();
        }
    }
}

/// Device Registry
///
/// Lookups by device id (primary), identifier and config entry.
#[derive(Default)]
pub struct DeviceRegistry {
    /// Primary index: device_id -> DeviceEntry
    by_id: DashMap<String, Arc<DeviceEntry>>,

    /// Index: identifier -> device_id
    by_identifier: DashMap<DeviceIdentifier, String>,

    /// Index: config_entry_id -> set of device_ids
    by_config_entry_id: DashMap<String, HashSet<String>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn index_entry(&self, entry: Arc<DeviceEntry>) {
        let device_id = entry.id.clone();

        for identifier in &entry.identifiers {
            self.by_identifier
                .insert(identifier.clone(), device_id.clone());
        }

        for config_entry_id in &entry.config_entries {
            self.by_config_entry_id
                .entry(config_entry_id.clone())
                .or_default()
                .insert(device_id.clone());
        }

        self.by_id.insert(device_id, entry);
    }

    fn unindex_entry(&self, entry: &DeviceEntry) {
        for identifier in &entry.identifiers {
            self.by_identifier.remove(identifier);
        }

        for config_entry_id in &entry.config_entries {
            if let Some(mut ids) = self.by_config_entry_id.get_mut(config_entry_id) {
                ids.remove(&entry.id);
            }
        }

        self.by_id.remove(&entry.id);
    }

    pub fn get(&self, device_id: &str) -> Option<Arc<DeviceEntry>> {
        self.by_id.get(device_id).map(|r| Arc::clone(r.value()))
    }

    pub fn get_by_identifier(&self, domain: &str, id: &str) -> Option<Arc<DeviceEntry>> {
        let device_id = self
            .by_identifier
            .get(&DeviceIdentifier::new(domain, id))
            .map(|r| r.value().clone())?;
        self.get(&device_id)
    }

    pub fn get_by_config_entry_id(&self, config_entry_id: &str) -> Vec<Arc<DeviceEntry>> {
        let ids: Vec<String> = self
            .by_config_entry_id
            .get(config_entry_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        ids.iter().filter_map(|id| self.get(id)).collect()
    }

    /// Get or create a device
    ///
    /// An existing device matching any identifier gets `config_entry_id`
    /// attached; otherwise a new device is registered.
    pub fn get_or_create(
        &self,
        identifiers: &[DeviceIdentifier],
        config_entry_id: &str,
        name: &str,
    ) -> Arc<DeviceEntry> {
        let existing = identifiers
            .iter()
            .find_map(|ident| self.get_by_identifier(ident.domain(), ident.id()));

        if let Some(existing) = existing {
            if existing.config_entries.iter().any(|id| id == config_entry_id) {
                return existing;
            }
            let device_id = existing.id.clone();
            if let Ok(updated) =
                self.update(&device_id, |entry| entry.attach_config_entry(config_entry_id))
            {
                return updated;
            }
        }

        let mut entry = DeviceEntry::new(Some(name));
        entry.identifiers = identifiers.to_vec();
        entry.attach_config_entry(config_entry_id);

        let arc_entry = Arc::new(entry);
        self.index_entry(Arc::clone(&arc_entry));

        info!("Registered new device: {} ({})", name, arc_entry.id);
        arc_entry
    }

    /// Update a device in place, bumping `modified_at`
    pub fn update<F>(&self, device_id: &str, f: F) -> Result<Arc<DeviceEntry>, DeviceRegistryError>
    where
        F: FnOnce(&mut DeviceEntry),
    {
        let current = self
            .get(device_id)
            .ok_or_else(|| DeviceRegistryError::NotFound(device_id.to_string()))?;

        let mut entry = (*current).clone();
        f(&mut entry);
        entry.modified_at = Utc::now();

        self.unindex_entry(&current);
        let new_arc = Arc::new(entry);
        self.index_entry(Arc::clone(&new_arc));
        Ok(new_arc)
    }

    /// Detach one config entry from one device.
    ///
    /// The device is kept even if no config entries remain.
    pub fn remove_config_entry(
        &self,
        device_id: &str,
        config_entry_id: &str,
    ) -> Result<Arc<DeviceEntry>, DeviceRegistryError> {
        let updated = self.update(device_id, |entry| entry.detach_config_entry(config_entry_id))?;
        debug!(
            device_id,
            config_entry_id, "Removed config entry from device"
        );
        Ok(updated)
    }

    pub fn remove(&self, device_id: &str) -> Option<Arc<DeviceEntry>> {
        let entry = self.get(device_id)?;
        self.unindex_entry(&entry);
        info!("Removed device: {}", device_id);
        Some(entry)
    }

    /// Clear a config entry from all devices.
    ///
    /// Devices left without any config entry are removed.
    pub fn clear_config_entry(&self, config_entry_id: &str) {
        let device_ids: Vec<String> = self
            .get_by_config_entry_id(config_entry_id)
            .iter()
            .map(|d| d.id.clone())
            .collect();

        for device_id in device_ids {
            let only_entry = match self.get(&device_id) {
                Some(entry) => entry.config_entries.len() <= 1,
                None => continue,
            };

            if only_entry {
                self.remove(&device_id);
            } else {
                let _ = self.remove_config_entry(&device_id, config_entry_id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
