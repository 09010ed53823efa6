//! Wire entities and entity validation.
//!
//! An entity is one envelope on the wire: id, version, method, params,
//! data, code and timestamp. Validation parses the method, routes to the
//! addressed service or event and checks every parameter against the
//! declared property types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TslError;
use crate::property::Property;
use crate::thing::{Event, Service, Thing};
use crate::method::ThingMethod;

/// Request envelope published by a device or the platform
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EntityRequest {
    /// Decimal string, unique per device
    #[serde(default)]
    pub id: String,

    /// Protocol version, always `1.0`
    #[serde(default)]
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,

    #[serde(default)]
    pub method: String,

    /// Millisecond timestamp
    #[serde(default)]
    pub timestamp: i64,
}

/// Reply envelope; `code` appears on replies only
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EntityReply {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub code: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default)]
    pub method: String,

    #[serde(default)]
    pub timestamp: i64,
}

/// Combined envelope covering both directions
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ThingEntity {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,

    #[serde(default)]
    pub method: String,

    #[serde(default)]
    pub timestamp: i64,

    #[serde(default)]
    pub code: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Check a decoded parameter object against declared properties.
/// Absent params and `{}` are accepted without further checks; every
/// present key must be declared and its value must conform.
fn validate_entity_params(declared: &[Property], params: &Value) -> Result<(), TslError> {
    let map: &Map<String, Value> = match params {
        Value::Null => return Ok(()),
        Value::Object(map) => map,
        other => {
            return Err(TslError::value(
                "value",
                format!("params({other}) is not an object"),
            ))
        }
    };
    if map.is_empty() {
        return Ok(());
    }
    if declared.is_empty() {
        return Err(TslError::parse(
            "no parameters declared, but params is not empty",
        ));
    }
    for (key, value) in map {
        let Some(property) = declared.iter().find(|p| p.identifier == *key) else {
            return Err(TslError::value(format!("[{key}]"), "parameter is not defined"));
        };
        property
            .validate_value(value)
            .map_err(|e| e.nest(&format!("[{key}]")))?;
    }
    Ok(())
}

impl Event {
    /// Validate an inbound payload against the event's output data
    pub fn validate_entity(&self, output: Option<&Value>) -> Result<(), TslError> {
        if let Some(output) = output {
            validate_entity_params(&self.output_data, output)
                .map_err(|e| e.nest("outputData"))?;
        }
        Ok(())
    }
}

impl Service {
    /// Validate an inbound payload: params against the input data, data
    /// against the output data
    pub fn validate_entity(
        &self,
        params: Option<&Value>,
        data: Option<&Value>,
    ) -> Result<(), TslError> {
        if let Some(params) = params {
            validate_entity_params(&self.input_data, params).map_err(|e| e.nest("inputData"))?;
        }
        if let Some(data) = data {
            validate_entity_params(&self.output_data, data).map_err(|e| e.nest("outputData"))?;
        }
        Ok(())
    }
}

impl Thing {
    /// Validate a raw entity document
    pub fn validate_entity_bytes(&self, entity: &[u8]) -> Result<(), TslError> {
        let entity: ThingEntity = serde_json::from_slice(entity)?;
        self.validate_entity(&entity)
    }

    /// Validate a decoded entity: route by parsed method, then require a
    /// positive timestamp
    pub fn validate_entity(&self, entity: &ThingEntity) -> Result<(), TslError> {
        let method = ThingMethod::parse(&entity.method)?;
        if method.is_service() {
            self.validate_service(&method.action, entity.params.as_ref(), entity.data.as_ref())?;
        } else {
            self.validate_event(&method.action, entity.params.as_ref())?;
        }
        if entity.timestamp <= 0 {
            return Err(TslError::value("timestamp", "timestamp must be greater than 0"));
        }
        Ok(())
    }

    /// Validate an event payload by identifier
    pub fn validate_event(
        &self,
        identifier: &str,
        params: Option<&Value>,
    ) -> Result<(), TslError> {
        let Some(event) = self.event(identifier) else {
            return Err(TslError::value(
                format!("events[{identifier}]"),
                "event is not defined",
            ));
        };
        event
            .validate_entity(params)
            .map_err(|e| e.nest(&format!("events[{identifier}]")))
    }

    /// Validate a service payload by identifier
    pub fn validate_service(
        &self,
        identifier: &str,
        params: Option<&Value>,
        data: Option<&Value>,
    ) -> Result<(), TslError> {
        let Some(service) = self.service(identifier) else {
            return Err(TslError::value(
                format!("services[{identifier}]"),
                "service is not defined",
            ));
        };
        service
            .validate_entity(params, data)
            .map_err(|e| e.nest(&format!("services[{identifier}]")))
    }
}
