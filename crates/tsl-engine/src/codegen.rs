//! Template-driven decoder scaffold generation.
//!
//! Walks the derived thing and renders a Rust decoder module through a
//! Tera template. The template sees the product key plus every derived
//! event and service with canonical type tokens, Rust types and default
//! values for their fields.

use serde::Serialize;

use crate::error::TslError;
use crate::property::Property;
use crate::thing::{Event, Thing};

/// Stock template rendering a decoder scaffold module
pub const DEFAULT_CODEC_TEMPLATE: &str = r#"//! Decoder scaffold for product {{ profile.product_key }}.
//!
//! Device payloads decode into entity CODEBLOCKparamsCODEBLOCK maps; fill in the
//! TODO markers with the real wire layout.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

{% for event in events -%}
pub const EVENT_{{ event.const_name | upper }}: &str = "{{ event.method }}"; // {{ event.name }} event
{% endfor -%}
{% for service in services -%}
pub const SERVICE_{{ service.identifier | upper }}: &str = "{{ service.method }}"; // {{ service.name }} service
{% endfor %}
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Event {
    pub params: Params,
    pub method: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct EventData {
    pub events: Vec<Event>,
}

/// Typed access to entity parameters
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Params(pub Map<String, Value>);

{% for event in events %}{% if event.output_data %}// {{ event.name }} event parameters
impl Params {
{% for field in event.output_data -%}
    /// {{ field.name }}
    pub fn set_{{ event.param_prefix }}{{ field.identifier }}(&mut self, v: {{ field.rust_type }}) {
        self.0.insert("{{ field.identifier }}".to_string(), serde_json::json!(v));
    }
{% endfor -%}
}
{% endif %}{% endfor %}
{% for service in services %}{% if service.input_data %}// {{ service.name }} service parameters
impl Params {
{% for field in service.input_data -%}
    /// {{ field.name }}
    pub fn get_{{ service.identifier }}_{{ field.identifier }}(&self) -> {{ field.rust_type }} {
        self.0.get("{{ field.identifier }}")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_else(|| {{ field.default_value }})
    }
{% endfor -%}
}
{% endif %}{% endfor %}
/// Decode a raw device payload into entity form
pub fn decode(payload: &[u8], _metadata: &[u8]) -> serde_json::Result<Vec<u8>> {
    // TODO: parse the device's wire format from payload
    let _ = payload;
    let mut params = Params::default();
{% for event in events %}{% if event.param_prefix == "" %}{% for field in event.output_data -%}
    params.set_{{ field.identifier }}(Default::default()); // TODO: {{ field.name }}
{% endfor %}{% endif %}{% endfor %}
    let document = EventData {
        events: vec![Event {
            params,
            // TODO: pick the event method this payload reports
            method: EVENT_PROPERTY.to_string(),
        }],
    };
    serde_json::to_vec(&document)
}

/// Encode a service entity into the device's wire format
pub fn encode(data: &[u8], _metadata: &[u8]) -> serde_json::Result<Vec<u8>> {
    let event: Event = serde_json::from_slice(data)?;
    match event.method.as_str() {
{% for service in services -%}
        SERVICE_{{ service.identifier | upper }} => {
            // TODO: encode {{ service.name }}
        }
{% endfor -%}
        _ => {}
    }
    serde_json::to_vec(&event.params)
}
"#;

#[derive(Debug, Serialize)]
struct CodegenProfile {
    product_key: String,
}

#[derive(Debug, Serialize)]
struct CodegenField {
    identifier: String,
    name: String,
    type_token: &'static str,
    rust_type: &'static str,
    default_value: &'static str,
}

#[derive(Debug, Serialize)]
struct CodegenEntry {
    identifier: String,
    const_name: String,
    param_prefix: String,
    name: String,
    method: String,
    output_data: Vec<CodegenField>,
    input_data: Vec<CodegenField>,
}

#[derive(Debug, Serialize)]
struct CodegenView {
    profile: CodegenProfile,
    events: Vec<CodegenEntry>,
    services: Vec<CodegenEntry>,
}

fn codegen_fields(properties: &[Property]) -> Result<Vec<CodegenField>, TslError> {
    properties
        .iter()
        .map(|property| {
            let Some(data_type) = &property.data_type else {
                return Err(TslError::spec("dataType", "dataType is empty"));
            };
            Ok(CodegenField {
                identifier: property.identifier.clone(),
                name: property.name.clone(),
                type_token: data_type.type_token()?,
                rust_type: data_type.rust_type()?,
                default_value: data_type.default_value()?,
            })
        })
        .collect()
}

impl Event {
    /// Constant name of the event; `post` renders as `property`
    fn const_name(&self) -> String {
        if self.identifier == "post" {
            "property".to_string()
        } else {
            self.identifier.clone()
        }
    }

    /// Accessor prefix; the `post` event's parameters are unprefixed
    fn param_prefix(&self) -> String {
        if self.identifier == "post" {
            String::new()
        } else {
            format!("{}_", self.identifier)
        }
    }
}

impl Thing {
    fn codegen_view(&self) -> Result<CodegenView, TslError> {
        let derived = self.derived();
        let mut event_ids: Vec<&String> = derived.events.keys().collect();
        event_ids.sort();
        let mut service_ids: Vec<&String> = derived.services.keys().collect();
        service_ids.sort();

        let mut events = Vec::new();
        for id in event_ids {
            let event = &derived.events[id];
            events.push(CodegenEntry {
                identifier: event.identifier.clone(),
                const_name: event.const_name(),
                param_prefix: event.param_prefix(),
                name: event.name.clone(),
                method: event.method.clone(),
                output_data: codegen_fields(&event.output_data)?,
                input_data: Vec::new(),
            });
        }
        let mut services = Vec::new();
        for id in service_ids {
            let service = &derived.services[id];
            services.push(CodegenEntry {
                identifier: service.identifier.clone(),
                const_name: service.identifier.clone(),
                param_prefix: format!("{}_", service.identifier),
                name: service.name.clone(),
                method: service.method.clone(),
                output_data: codegen_fields(&service.output_data)?,
                input_data: codegen_fields(&service.input_data)?,
            });
        }
        Ok(CodegenView {
            profile: CodegenProfile {
                product_key: self
                    .profile
                    .as_ref()
                    .map(|p| p.product_key.clone())
                    .unwrap_or_default(),
            },
            events,
            services,
        })
    }

    /// Render a decoder scaffold from the given template.
    ///
    /// Post-processing substitutes the back-tick placeholders and
    /// normalizes the emitted source's whitespace.
    pub fn generate_codec(&self, template: &str) -> Result<String, TslError> {
        let view = self.codegen_view()?;
        let context = tera::Context::from_serialize(&view).map_err(|e| TslError::Template {
            message: e.to_string(),
        })?;
        let rendered = tera::Tera::one_off(template, &context, false).map_err(|e| {
            TslError::Template {
                message: e.to_string(),
            }
        })?;
        Ok(tidy_source(&rendered.replace("CODEBLOCK", "`")))
    }
}

/// Normalize generated source: strip trailing whitespace, collapse blank
/// line runs and guarantee a final newline.
fn tidy_source(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut blank_run = 0;
    for line in source.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    while out.ends_with("\n\n") {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thing::fixtures::SWITCH_SPEC;

    fn thing() -> Thing {
        Thing::new(SWITCH_SPEC.as_bytes()).unwrap()
    }

    #[test]
    fn test_scaffold_contains_method_constants() {
        let source = thing().generate_codec(DEFAULT_CODEC_TEMPLATE).unwrap();
        assert!(source.contains("pub const EVENT_PROPERTY: &str = \"thing.event.property.post\""));
        assert!(source.contains("pub const EVENT_ALARM: &str = \"thing.event.alarm\""));
        assert!(source.contains("pub const SERVICE_SET: &str = \"thing.service.property.set\""));
        assert!(source.contains("pub const SERVICE_GET: &str = \"thing.service.property.get\""));
        assert!(source.contains("pub const SERVICE_RESET: &str = \"thing.service.reset\""));
    }

    #[test]
    fn test_scaffold_uses_type_tokens() {
        let source = thing().generate_codec(DEFAULT_CODEC_TEMPLATE).unwrap();
        // post parameters are unprefixed setters with mapped Rust types
        assert!(source.contains("pub fn set_switch(&mut self, v: i32)"));
        assert!(source.contains("pub fn set_countDown(&mut self, v: i32)"));
        assert!(source.contains("pub fn set_temperature(&mut self, v: f64)"));
        // other events carry their identifier prefix
        assert!(source.contains("pub fn set_alarm_temperature(&mut self, v: f64)"));
        // set's input data renders typed getters
        assert!(source.contains("pub fn get_set_switch(&self) -> i32"));
    }

    #[test]
    fn test_placeholder_substitution() {
        let source = thing().generate_codec(DEFAULT_CODEC_TEMPLATE).unwrap();
        assert!(!source.contains("CODEBLOCK"));
        assert!(source.contains("`params`"));
    }

    #[test]
    fn test_product_key_in_header() {
        let source = thing().generate_codec(DEFAULT_CODEC_TEMPLATE).unwrap();
        assert!(source.starts_with("//! Decoder scaffold for product pk100."));
    }

    #[test]
    fn test_tidy_source() {
        assert_eq!(tidy_source("a  \n\n\n\nb\n"), "a\n\nb\n");
        assert_eq!(tidy_source("a"), "a\n");
    }

    #[test]
    fn test_broken_template_reports_error() {
        let err = thing().generate_codec("{{ missing.field }}").unwrap_err();
        assert!(matches!(err, TslError::Template { .. }));
    }
}
