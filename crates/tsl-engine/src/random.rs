//! Random entity generation from a thing specification.
//!
//! For the derived `property.set` and `property.post` methods a partial
//! report can be simulated: a random non-empty subset of the properties is
//! reported instead of all of them.

use chrono::Utc;
use rand::Rng;
use serde_json::{json, Map, Value};

use crate::entity::ThingEntity;
use crate::error::TslError;
use crate::property::{property_random_map, property_random_subset_map};
use crate::thing::{Event, Service, Thing};
use crate::method::ThingMethod;

fn random_id(rng: &mut impl Rng) -> String {
    rng.gen_range(0..i32::MAX).to_string()
}

impl Event {
    /// Random conforming entity for this event. With
    /// `generate_all_property = false` a derived property event reports a
    /// random subset of its properties.
    pub fn random(&self, generate_all_property: bool) -> Result<ThingEntity, TslError> {
        let mut rng = rand::thread_rng();
        let method = ThingMethod::parse(&self.method)?;
        let output = if method.is_property && !generate_all_property {
            property_random_subset_map(&self.output_data, &mut rng)?
        } else {
            property_random_map(&self.output_data, &mut rng)?
        };
        Ok(ThingEntity {
            id: random_id(&mut rng),
            version: "1.0".to_string(),
            params: Some(Value::Object(output)),
            method: self.method.clone(),
            timestamp: Utc::now().timestamp_millis(),
            code: 0,
            data: Some(Value::Object(Map::new())),
        })
    }
}

impl Service {
    /// Random conforming entity for this service. With
    /// `generate_all_property = false` the derived `property.set` reports
    /// a random subset of its writable properties.
    pub fn random(&self, generate_all_property: bool) -> Result<ThingEntity, TslError> {
        let mut rng = rand::thread_rng();
        let method = ThingMethod::parse(&self.method)?;
        let input = if method.is_property && method.is_set && !generate_all_property {
            property_random_subset_map(&self.input_data, &mut rng)?
        } else {
            property_random_map(&self.input_data, &mut rng)?
        };
        let output = property_random_map(&self.output_data, &mut rng)?;
        Ok(ThingEntity {
            id: random_id(&mut rng),
            version: "1.0".to_string(),
            params: Some(Value::Object(input)),
            method: self.method.clone(),
            timestamp: Utc::now().timestamp_millis(),
            code: 0,
            data: Some(Value::Object(output)),
        })
    }
}

impl Thing {
    /// Random conforming entity for the event or service the method
    /// addresses
    pub fn random(
        &self,
        method: &str,
        generate_all_property: bool,
    ) -> Result<ThingEntity, TslError> {
        let method = ThingMethod::parse(method)?;
        if method.is_service() {
            let Some(service) = self.service(&method.action) else {
                return Err(TslError::value(
                    format!("services[{}]", method.action),
                    "service is not defined",
                ));
            };
            service.random(generate_all_property)
        } else {
            let Some(event) = self.event(&method.action) else {
                return Err(TslError::value(
                    format!("events[{}]", method.action),
                    "event is not defined",
                ));
            };
            event.random(generate_all_property)
        }
    }

    /// Sample document with one random entity for every derived event and
    /// service
    pub fn random_all(&self) -> Result<String, TslError> {
        let derived = self.derived();
        let mut event_ids: Vec<&String> = derived.events.keys().collect();
        event_ids.sort();
        let mut service_ids: Vec<&String> = derived.services.keys().collect();
        service_ids.sort();

        let mut events = Vec::new();
        for id in event_ids {
            events.push(serde_json::to_value(derived.events[id].random(true)?)?);
        }
        let mut services = Vec::new();
        for id in service_ids {
            services.push(serde_json::to_value(derived.services[id].random(true)?)?);
        }
        let document = json!({"events": events, "services": services});
        Ok(serde_json::to_string_pretty(&document)?)
    }
}
