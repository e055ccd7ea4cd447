//! Config Entries
//!
//! This crate provides the configuration entry system for Home Assistant.
//! Config entries represent individual integration instances and manage
//! their lifecycle (migrate, setup, unload, reload, remove).
//!
//! # Key Types
//!
//! - [`ConfigEntry`] - A single integration configuration
//! - [`ConfigEntryState`] - Lifecycle state of an entry
//! - [`ConfigEntries`] - Manager for all config entries
//! - [`Integration`] / [`EntityPlatform`] - What integrations implement
//! - [`HomeAssistant`] - Handle passed to every integration hook

pub mod entry;
pub mod integration;
pub mod manager;
pub mod state_machine;

pub use entry::{
    ConfigEntry, ConfigEntryDisabledBy, ConfigEntryUpdate, EntryOptions,
};

pub use integration::{EntityPlatform, HomeAssistant, Integration, UnloadCallback, UpdateListener};

pub use manager::{ConfigEntries, ConfigEntriesError, ConfigEntriesResult, ListenerId};

pub use state_machine::{ConfigEntryState, InvalidTransition};
