//! Spook Inverse
//!
//! A helper integration that creates a `binary_sensor` or `switch` whose
//! state is the inverse of another entity. Each helper is one config entry
//! whose options name the source entity, the platform of the inverse entity
//! and whether the source should be hidden while the helper exists.
//!
//! # Lifecycle
//!
//! - setup forwards the entry to the platform named by `inverse_type` and
//!   reloads the entry whenever its options change
//! - unload unloads that platform again
//! - remove unhides the source, if the helper hid it
//! - entries older than 1.2 are migrated off the source entity's device
//!
//! ```ignore
//! let hass = HomeAssistant::new();
//! spook_inverse::register(&hass);
//!
//! let entry = spook_inverse::create_entry(
//!     &hass,
//!     "Door closed",
//!     InverseOptions::new("binary_sensor.door_open", Platform::BinarySensor),
//! )?;
//! hass.config_entries.setup(&hass, &entry.entry_id).await?;
//! ```

pub mod config_flow;
pub mod constants;
pub mod error;
pub mod integration;
pub mod options;
pub mod platform;
pub mod source;

use std::sync::Arc;

use ha_config_entries::HomeAssistant;
use tracing::debug;

pub use config_flow::{create_entry, update_options};
pub use constants::DOMAIN;
pub use error::InverseError;
pub use integration::{config_entry_update_listener, reload_on_update, InverseIntegration};
pub use options::InverseOptions;
pub use platform::{invert_state, inverted_service, InversePlatform};

/// Register the integration and its platforms with the config entry manager.
///
/// Returns the platform handlers so callers can look up loaded entities.
pub fn register(hass: &HomeAssistant) -> Vec<Arc<InversePlatform>> {
    hass.config_entries
        .register_integration(Arc::new(InverseIntegration::new()));

    constants::SUPPORTED_PLATFORMS
        .iter()
        .map(|&platform| {
            let handler = Arc::new(InversePlatform::new(platform));
            hass.config_entries
                .register_platform(DOMAIN, platform, handler.clone());
            handler
        })
        .inspect(|handler| debug!("{} platform ready", handler.platform()))
        .collect()
}
