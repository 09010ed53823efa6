//! Properties: named, typed data points exposed by a device.

use rand::RngCore;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::datatype::DataType;
use crate::error::TslError;

/// A single typed datum in a thing specification
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Property {
    /// Empty, `r` or `rw`
    pub access_mode: String,

    /// Unique within its container
    pub identifier: String,

    pub name: String,
    pub desc: String,
    pub required: bool,
    pub data_type: Option<DataType>,
}

impl Property {
    pub fn validate_spec(&self) -> Result<(), TslError> {
        if self.identifier.is_empty() {
            return Err(TslError::spec("identifier", "identifier is empty"));
        }
        if self.name.is_empty() {
            return Err(TslError::spec("name", "name is empty"));
        }
        let Some(data_type) = &self.data_type else {
            return Err(TslError::spec("dataType", "dataType is empty"));
        };
        if !self.access_mode.is_empty() && self.access_mode != "r" && self.access_mode != "rw" {
            return Err(TslError::spec(
                "accessMode",
                format!("accessMode({}) is invalid", self.access_mode),
            ));
        }
        data_type.validate_spec().map_err(|e| e.nest("dataType"))
    }

    pub fn validate_value(&self, value: &Value) -> Result<(), TslError> {
        let Some(data_type) = &self.data_type else {
            return Err(TslError::spec("dataType", "dataType is empty"));
        };
        data_type.validate_value(value)
    }

    /// Human-readable description. Containers return their data type's
    /// JSON document directly; scalars join kind, name, desc and range.
    pub fn to_entity_string(&self) -> String {
        let Some(data_type) = &self.data_type else {
            return String::new();
        };
        if data_type.kind == "struct" || data_type.kind == "array" {
            return data_type.to_entity_string();
        }
        let mut parts = vec![data_type.kind.clone(), self.name.clone()];
        if !self.desc.is_empty() {
            parts.push(self.desc.clone());
        }
        parts.push(data_type.to_entity_string());
        parts.join(",")
    }

    pub fn random(&self, rng: &mut dyn RngCore) -> Result<Value, TslError> {
        let Some(data_type) = &self.data_type else {
            return Err(TslError::spec("dataType", "dataType is empty"));
        };
        data_type.random(rng)
    }

    /// Whether the property participates in `property.set`
    pub fn is_writable(&self) -> bool {
        self.access_mode == "rw"
    }
}

/// Render a property list as identifier -> description map. Struct and
/// array descriptions are re-parsed so they nest as JSON documents rather
/// than escaped strings.
pub(crate) fn property_entity_map(properties: &[Property]) -> Map<String, Value> {
    let mut map = Map::new();
    for property in properties {
        let description = property.to_entity_string();
        let kind = property
            .data_type
            .as_ref()
            .map(|dt| dt.kind.as_str())
            .unwrap_or_default();
        let value = if kind == "struct" || kind == "array" {
            serde_json::from_str(&description)
                .unwrap_or_else(|_| Value::String(description.clone()))
        } else {
            Value::String(description)
        };
        map.insert(property.identifier.clone(), value);
    }
    map
}

/// Random value for every property, keyed by identifier
pub(crate) fn property_random_map(
    properties: &[Property],
    rng: &mut dyn RngCore,
) -> Result<Map<String, Value>, TslError> {
    let mut map = Map::new();
    for property in properties {
        map.insert(property.identifier.clone(), property.random(rng)?);
    }
    Ok(map)
}

/// Random values for a random, non-empty subset of the properties,
/// simulating a partial device report.
pub(crate) fn property_random_subset_map(
    properties: &[Property],
    rng: &mut dyn RngCore,
) -> Result<Map<String, Value>, TslError> {
    use rand::seq::SliceRandom;
    use rand::Rng;

    if properties.is_empty() {
        return Ok(Map::new());
    }
    let mut shuffled: Vec<&Property> = properties.iter().collect();
    shuffled.shuffle(rng);
    let keep = rng.gen_range(1..=shuffled.len());
    let mut map = Map::new();
    for property in &shuffled[..keep] {
        map.insert(property.identifier.clone(), property.random(rng)?);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn property(json: Value) -> Property {
        serde_json::from_value(json).unwrap()
    }

    fn switch_property() -> Property {
        property(json!({
            "identifier": "switch",
            "name": "power switch",
            "accessMode": "rw",
            "dataType": {"type": "enum", "specs": {"0": "off", "1": "on"}}
        }))
    }

    #[test]
    fn test_validate_spec() {
        switch_property().validate_spec().unwrap();

        let missing_name = property(json!({
            "identifier": "x",
            "dataType": {"type": "bool", "specs": {"0": "a", "1": "b"}}
        }));
        let err = missing_name.validate_spec().unwrap_err();
        assert_eq!(err.to_string(), "name err: name is empty");

        let bad_mode = property(json!({
            "identifier": "x", "name": "x", "accessMode": "w",
            "dataType": {"type": "bool", "specs": {"0": "a", "1": "b"}}
        }));
        assert!(bad_mode
            .validate_spec()
            .unwrap_err()
            .to_string()
            .contains("accessMode(w) is invalid"));

        let missing_type = property(json!({"identifier": "x", "name": "x"}));
        assert!(missing_type.validate_spec().is_err());
    }

    #[test]
    fn test_validate_value_delegates() {
        let p = switch_property();
        p.validate_value(&json!(1)).unwrap();
        assert!(p.validate_value(&json!(3)).is_err());
    }

    #[test]
    fn test_entity_string_for_scalar() {
        let p = property(json!({
            "identifier": "countDown", "name": "count down", "desc": "minutes",
            "dataType": {"type": "int", "specs": {"min": "0", "max": "1440", "step": "1"}}
        }));
        assert_eq!(
            p.to_entity_string(),
            "int,count down,minutes,range: 0-1440 (),step: 1"
        );
    }

    #[test]
    fn test_entity_map_nests_containers() {
        let properties = vec![
            switch_property(),
            property(json!({
                "identifier": "position", "name": "position",
                "dataType": {"type": "struct", "specs": [
                    {"identifier": "lat", "name": "latitude",
                     "dataType": {"type": "float", "specs": {"min": "-90", "max": "90"}}}
                ]}
            })),
        ];
        let map = property_entity_map(&properties);
        assert!(map["switch"].is_string());
        assert!(map["position"].is_object());
    }

    #[test]
    fn test_random_subset_is_nonempty() {
        let properties = vec![
            switch_property(),
            property(json!({
                "identifier": "countDown", "name": "count down",
                "accessMode": "rw",
                "dataType": {"type": "int", "specs": {"min": "0", "max": "1440"}}
            })),
        ];
        let mut rng = rand::thread_rng();
        for _ in 0..16 {
            let map = property_random_subset_map(&properties, &mut rng).unwrap();
            assert!(!map.is_empty());
            assert!(map.len() <= properties.len());
            for key in map.keys() {
                assert!(key == "switch" || key == "countDown");
            }
        }
    }
}
