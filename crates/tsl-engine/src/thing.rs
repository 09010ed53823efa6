//! The Thing aggregate: profile, events, services and properties parsed
//! from a spec document.
//!
//! The first validation builds an identifier index over events and
//! services and injects the three derived entries every thing carries:
//! the `post` event (all properties), the `set` service (writable
//! properties) and the `get` service (all properties).

use std::collections::HashMap;
use std::sync::OnceLock;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::TslError;
use crate::method::ThingMethod;
use crate::property::{property_entity_map, Property};

pub const METHOD_EVENT_PREFIX: &str = "thing.event.";
pub const METHOD_SERVICE_PREFIX: &str = "thing.service.";

/// Product identity of a thing
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Profile {
    pub product_key: String,
    pub device_name: String,
}

impl Profile {
    pub fn validate_spec(&self) -> Result<(), TslError> {
        if self.product_key.is_empty() {
            return Err(TslError::spec("productKey", "productKey is empty"));
        }
        Ok(())
    }
}

/// A device-originated notification
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Event {
    pub identifier: String,
    pub name: String,
    pub desc: String,
    pub method: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub output_data: Vec<Property>,
}

impl Event {
    pub fn validate_spec(&self) -> Result<(), TslError> {
        if self.identifier.is_empty() {
            return Err(TslError::spec("identifier", "identifier is empty"));
        }
        if self.name.is_empty() {
            return Err(TslError::spec("name", "name is empty"));
        }
        if self.method.is_empty() {
            return Err(TslError::spec("method", "method is empty"));
        }
        if !self.method.starts_with(METHOD_EVENT_PREFIX) {
            return Err(TslError::spec(
                "method",
                format!("method must start with {METHOD_EVENT_PREFIX}"),
            ));
        }
        ThingMethod::parse(&self.method).map_err(|e| e.nest("method"))?;
        for (k, property) in self.output_data.iter().enumerate() {
            property
                .validate_spec()
                .map_err(|e| e.nest(&format!("outputData[{k}]")))?;
        }
        Ok(())
    }

    /// Entity-shaped description of this event, output data as params
    pub fn to_entity(&self) -> Value {
        let mut method = vec![self.method.clone()];
        if !self.name.is_empty() {
            method.push(self.name.clone());
        }
        if !self.desc.is_empty() {
            method.push(self.desc.clone());
        }
        json!({
            "id": "int64,message id",
            "version": "1.0",
            "method": method.join(","),
            "params": property_entity_map(&self.output_data),
            "timestamp": chrono::Utc::now().timestamp_millis(),
        })
    }
}

/// A server-originated request to a device
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Service {
    pub identifier: String,
    pub name: String,
    pub desc: String,
    pub method: String,
    pub call_type: String,
    pub required: bool,
    pub input_data: Vec<Property>,
    pub output_data: Vec<Property>,
}

impl Service {
    pub fn validate_spec(&self) -> Result<(), TslError> {
        if self.identifier.is_empty() {
            return Err(TslError::spec("identifier", "identifier is empty"));
        }
        if self.name.is_empty() {
            return Err(TslError::spec("name", "name is empty"));
        }
        if self.call_type.is_empty() {
            return Err(TslError::spec("callType", "callType is empty"));
        }
        if self.method.is_empty() {
            return Err(TslError::spec("method", "method is empty"));
        }
        if !self.method.starts_with(METHOD_SERVICE_PREFIX) {
            return Err(TslError::spec(
                "method",
                format!("method must start with {METHOD_SERVICE_PREFIX}"),
            ));
        }
        ThingMethod::parse(&self.method).map_err(|e| e.nest("method"))?;
        for (k, property) in self.input_data.iter().enumerate() {
            property
                .validate_spec()
                .map_err(|e| e.nest(&format!("inputData[{k}]")))?;
        }
        for (k, property) in self.output_data.iter().enumerate() {
            property
                .validate_spec()
                .map_err(|e| e.nest(&format!("outputData[{k}]")))?;
        }
        Ok(())
    }

    /// Entity-shaped description: input data as params, output as data
    pub fn to_entity(&self) -> Value {
        let mut method = vec![self.method.clone()];
        if !self.name.is_empty() {
            method.push(self.name.clone());
        }
        if !self.desc.is_empty() {
            method.push(self.desc.clone());
        }
        json!({
            "id": "int64,message id",
            "version": "1.0",
            "method": method.join(","),
            "params": property_entity_map(&self.input_data),
            "data": property_entity_map(&self.output_data),
            "timestamp": chrono::Utc::now().timestamp_millis(),
        })
    }
}

/// Identifier index over events and services, including the derived
/// entries. Built once, read-only afterwards.
#[derive(Debug)]
pub(crate) struct Derived {
    pub events: HashMap<String, Event>,
    pub services: HashMap<String, Service>,
}

/// A parsed thing specification
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Thing {
    pub profile: Option<Profile>,
    pub events: Vec<Event>,
    pub services: Vec<Service>,
    pub properties: Vec<Property>,

    #[serde(skip)]
    derived: OnceLock<Derived>,
}

impl Thing {
    /// Parse a spec document and validate it
    pub fn new(spec: &[u8]) -> Result<Self, TslError> {
        let thing: Thing = serde_json::from_slice(spec)?;
        thing.validate_spec()?;
        Ok(thing)
    }

    pub fn validate_spec(&self) -> Result<(), TslError> {
        let Some(profile) = &self.profile else {
            return Err(TslError::spec("profile", "profile is empty"));
        };
        profile.validate_spec().map_err(|e| e.nest("profile"))?;
        for (k, event) in self.events.iter().enumerate() {
            event
                .validate_spec()
                .map_err(|e| e.nest(&format!("events[{k}]")))?;
        }
        for (k, service) in self.services.iter().enumerate() {
            service
                .validate_spec()
                .map_err(|e| e.nest(&format!("services[{k}]")))?;
        }
        for (k, property) in self.properties.iter().enumerate() {
            property
                .validate_spec()
                .map_err(|e| e.nest(&format!("properties[{k},({})]", property.identifier)))?;
        }
        Ok(())
    }

    /// The derived identifier index, built on first use
    pub(crate) fn derived(&self) -> &Derived {
        self.derived.get_or_init(|| {
            let mut events: HashMap<String, Event> = self
                .events
                .iter()
                .map(|e| (e.identifier.clone(), e.clone()))
                .collect();
            events.insert(
                "post".to_string(),
                Event {
                    identifier: "post".to_string(),
                    name: "property post".to_string(),
                    desc: String::new(),
                    method: "thing.event.property.post".to_string(),
                    kind: "info".to_string(),
                    output_data: self.properties.clone(),
                },
            );

            let mut services: HashMap<String, Service> = self
                .services
                .iter()
                .map(|s| (s.identifier.clone(), s.clone()))
                .collect();
            let writable: Vec<Property> = self
                .properties
                .iter()
                .filter(|p| p.is_writable())
                .cloned()
                .collect();
            services.insert(
                "set".to_string(),
                Service {
                    identifier: "set".to_string(),
                    name: "property set".to_string(),
                    desc: String::new(),
                    method: "thing.service.property.set".to_string(),
                    call_type: "sync".to_string(),
                    required: true,
                    input_data: writable,
                    output_data: Vec::new(),
                },
            );
            services.insert(
                "get".to_string(),
                Service {
                    identifier: "get".to_string(),
                    name: "property get".to_string(),
                    desc: String::new(),
                    method: "thing.service.property.get".to_string(),
                    call_type: "sync".to_string(),
                    required: true,
                    input_data: Vec::new(),
                    output_data: self.properties.clone(),
                },
            );

            Derived { events, services }
        })
    }

    pub fn event(&self, identifier: &str) -> Option<&Event> {
        self.derived().events.get(identifier)
    }

    pub fn service(&self, identifier: &str) -> Option<&Service> {
        self.derived().services.get(identifier)
    }

    /// JSON document describing every derived event and service
    pub fn to_entity_string(&self) -> String {
        let derived = self.derived();
        let mut events: Vec<(&String, &Event)> = derived.events.iter().collect();
        events.sort_by(|a, b| a.0.cmp(b.0));
        let mut services: Vec<(&String, &Service)> = derived.services.iter().collect();
        services.sort_by(|a, b| a.0.cmp(b.0));

        let document = json!({
            "events": events.iter().map(|(_, e)| e.to_entity()).collect::<Vec<_>>(),
            "services": services.iter().map(|(_, s)| s.to_entity()).collect::<Vec<_>>(),
        });
        serde_json::to_string_pretty(&document).unwrap_or_default()
    }
}

/// Validate a raw spec document without keeping the parsed thing
pub fn validate_spec_bytes(spec: &[u8]) -> Result<(), TslError> {
    let thing: Thing = serde_json::from_slice(spec)?;
    thing.validate_spec()
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// A small smart-plug specification shared across the engine's tests
    pub(crate) const SWITCH_SPEC: &str = r#"{
        "profile": {"productKey": "pk100", "deviceName": "plug"},
        "properties": [
            {"identifier": "switch", "name": "power switch", "accessMode": "rw",
             "dataType": {"type": "enum", "specs": {"0": "off", "1": "on"}}},
            {"identifier": "countDown", "name": "count down", "accessMode": "rw",
             "dataType": {"type": "int", "specs": {"min": "0", "max": "1440", "step": "1"}}},
            {"identifier": "temperature", "name": "temperature", "accessMode": "r",
             "dataType": {"type": "float", "specs": {"min": "-40", "max": "100", "step": "0.1"}}}
        ],
        "services": [
            {"identifier": "reset", "name": "factory reset", "callType": "async",
             "method": "thing.service.reset"}
        ],
        "events": [
            {"identifier": "alarm", "name": "over temperature", "type": "alert",
             "method": "thing.event.alarm",
             "outputData": [
                 {"identifier": "temperature", "name": "temperature",
                  "dataType": {"type": "float", "specs": {"min": "-40", "max": "100"}}}
             ]}
        ]
    }"#;
}
