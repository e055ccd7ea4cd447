//! Constants of the inverse helper

use ha_core::Platform;

pub use ha_core::CONF_ENTITY_ID;

/// Integration domain
pub const DOMAIN: &str = "spook_inverse";

/// Option key: hide the source entity while the helper exists
pub const CONF_HIDE_SOURCE: &str = "hide_source";

/// Option key: platform the helper entity lives on
pub const CONF_INVERSE_TYPE: &str = "inverse_type";

/// Config entry schema version
pub const VERSION: u32 = 1;

/// 1.2: the helper no longer attaches its config entry to the source device
pub const MINOR_VERSION: u32 = 2;

/// Platforms an inverse helper can be created for
pub const SUPPORTED_PLATFORMS: &[Platform] = &[Platform::BinarySensor, Platform::Switch];
