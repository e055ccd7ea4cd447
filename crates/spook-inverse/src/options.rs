//! Typed view of an inverse helper's config entry options

use ha_config_entries::EntryOptions;
use ha_core::Platform;
use serde::{Deserialize, Serialize};

use crate::constants::{CONF_ENTITY_ID, CONF_HIDE_SOURCE, CONF_INVERSE_TYPE, SUPPORTED_PLATFORMS};
use crate::error::InverseError;

/// Options of an inverse helper
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InverseOptions {
    /// Source entity, as entity ID or entity registry ID
    pub entity_id: String,

    /// Platform the inverse entity is created on
    pub inverse_type: Platform,

    /// Hide the source entity while the helper exists
    #[serde(default)]
    pub hide_source: bool,
}

impl InverseOptions {
    pub fn new(entity_id: impl Into<String>, inverse_type: Platform) -> Self {
        Self {
            entity_id: entity_id.into(),
            inverse_type,
            hide_source: false,
        }
    }

    pub fn with_hide_source(mut self, hide_source: bool) -> Self {
        self.hide_source = hide_source;
        self
    }

    /// Parse and validate a config entry's options
    pub fn from_entry_options(options: &EntryOptions) -> Result<Self, InverseError> {
        let map: serde_json::Map<String, serde_json::Value> = options
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let parsed: Self = serde_json::from_value(serde_json::Value::Object(map))?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<(), InverseError> {
        if !SUPPORTED_PLATFORMS.contains(&self.inverse_type) {
            return Err(InverseError::UnsupportedPlatform(
                self.inverse_type.to_string(),
            ));
        }
        Ok(())
    }

    pub fn to_entry_options(&self) -> EntryOptions {
        let mut options = EntryOptions::new();
        options.insert(CONF_ENTITY_ID.to_string(), self.entity_id.clone().into());
        options.insert(
            CONF_INVERSE_TYPE.to_string(),
            self.inverse_type.as_str().into(),
        );
        options.insert(CONF_HIDE_SOURCE.to_string(), self.hide_source.into());
        options
    }
}

/// Platform named by the `inverse_type` option
pub fn inverse_type(options: &EntryOptions) -> Result<Platform, InverseError> {
    let raw = options
        .get(CONF_INVERSE_TYPE)
        .and_then(|v| v.as_str())
        .ok_or(InverseError::MissingOption(CONF_INVERSE_TYPE))?;

    let platform: Platform = raw
        .parse()
        .map_err(|_| InverseError::UnsupportedPlatform(raw.to_string()))?;
    if !SUPPORTED_PLATFORMS.contains(&platform) {
        return Err(InverseError::UnsupportedPlatform(raw.to_string()));
    }
    Ok(platform)
}

/// Whether the source entity should be hidden; absent means no
pub fn hide_source(options: &EntryOptions) -> bool {
    options
        .get(CONF_HIDE_SOURCE)
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

/// The configured source entity, if any
pub fn source_entity_id(options: &EntryOptions) -> Option<&str> {
    options.get(CONF_ENTITY_ID).and_then(|v| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry_options(value: serde_json::Value) -> EntryOptions {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_parse_entry_options() {
        let options = entry_options(json!({
            "entity_id": "binary_sensor.front_door",
            "inverse_type": "binary_sensor",
            "hide_source": true
        }));

        let parsed = InverseOptions::from_entry_options(&options).unwrap();

        assert_eq!(
            parsed,
            InverseOptions::new("binary_sensor.front_door", Platform::BinarySensor)
                .with_hide_source(true)
        );
        assert_eq!(parsed.to_entry_options(), options);
    }

    #[test]
    fn test_hide_source_defaults_to_false() {
        let options = entry_options(json!({
            "entity_id": "switch.pump",
            "inverse_type": "switch"
        }));

        assert!(!InverseOptions::from_entry_options(&options).unwrap().hide_source);
        assert!(!hide_source(&options));
    }

    #[test]
    fn test_options_from_yaml() {
        let yaml = r#"
            entity_id: switch.garden_pump
            inverse_type: switch
            hide_source: true
        "#;
        let parsed: InverseOptions = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(parsed.inverse_type, Platform::Switch);
        assert!(parsed.hide_source);
    }

    #[test]
    fn test_unsupported_inverse_type() {
        let options = entry_options(json!({
            "entity_id": "light.desk",
            "inverse_type": "light"
        }));

        assert!(matches!(
            InverseOptions::from_entry_options(&options),
            Err(InverseError::UnsupportedPlatform(p)) if p == "light"
        ));
        assert!(matches!(
            inverse_type(&options),
            Err(InverseError::UnsupportedPlatform(_))
        ));
    }

    #[test]
    fn test_inverse_type_lookup() {
        let options = entry_options(json!({"inverse_type": "binary_sensor"}));
        assert_eq!(inverse_type(&options).unwrap(), Platform::BinarySensor);

        let empty = EntryOptions::new();
        assert!(matches!(
            inverse_type(&empty),
            Err(InverseError::MissingOption(CONF_INVERSE_TYPE))
        ));
        assert_eq!(source_entity_id(&empty), None);
    }

    #[test]
    fn test_missing_entity_id_is_invalid() {
        let options = entry_options(json!({"inverse_type": "switch"}));
        assert!(matches!(
            InverseOptions::from_entry_options(&options),
            Err(InverseError::InvalidOptions(_))
        ));
    }
}
