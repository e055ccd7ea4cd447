//! Core types for Home Assistant
//!
//! The small set of types shared by the registries, the config entry
//! manager and integrations: entity IDs and entity platforms.

mod entity_id;
mod platform;

pub use entity_id::{slugify, valid_entity_id, EntityId, EntityIdError};
pub use platform::{Platform, UnknownPlatform};

/// State value of an entity that is on
pub const STATE_ON: &str = "on";

/// State value of an entity that is off
pub const STATE_OFF: &str = "off";

/// State value used when the actual state is not known
pub const STATE_UNKNOWN: &str = "unknown";

/// State value of an entity that cannot be reached
pub const STATE_UNAVAILABLE: &str = "unavailable";

/// Option/data key holding an entity ID
pub const CONF_ENTITY_ID: &str = "entity_id";
