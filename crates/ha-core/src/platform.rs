//! Entity platforms
//!
//! A platform is the entity domain an integration forwards its config entry
//! to (e.g. a config entry of `spook_inverse` forwards to `binary_sensor`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown platform: {0}")]
pub struct UnknownPlatform(pub String);

/// Entity platforms known to this core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    BinarySensor,
    Button,
    Cover,
    Fan,
    Light,
    Lock,
    Sensor,
    Switch,
    Valve,
}

impl Platform {
    pub const ALL: &'static [Platform] = &[
        Platform::BinarySensor,
        Platform::Button,
        Platform::Cover,
        Platform::Fan,
        Platform::Light,
        Platform::Lock,
        Platform::Sensor,
        Platform::Switch,
        Platform::Valve,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::BinarySensor => "binary_sensor",
            Platform::Button => "button",
            Platform::Cover => "cover",
            Platform::Fan => "fan",
            Platform::Light => "light",
            Platform::Lock => "lock",
            Platform::Sensor => "sensor",
            Platform::Switch => "switch",
            Platform::Valve => "valve",
        }
    }

    /// Read-only platforms only report state and expose no turn_on/turn_off
    pub fn is_readonly(&self) -> bool {
        matches!(self, Platform::BinarySensor | Platform::Sensor)
    }
}

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| UnknownPlatform(s.to_string()))
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
