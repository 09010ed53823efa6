//! Polymorphic TSL data types.
//!
//! A `DataType` carries its kind string and the raw per-kind spec body.
//! The first use parses the body through the type registry into a typed
//! validator and memoizes it; a failed parse is returned to the caller and
//! may be retried. Decoded entity numbers stay as `serde_json::Number` so
//! the integer/float distinction survives until validation.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::RngCore;
use serde::Deserialize;
use serde_json::{Map, Number, Value};
use tracing::warn;

use crate::error::TslError;
use crate::property::{property_entity_map, Property};

/// Operations every typed validator provides
pub trait Validate: Send + Sync {
    /// Check the spec's internal invariants
    fn validate_spec(&self) -> Result<(), TslError>;

    /// Check a decoded JSON value against the spec
    fn validate_value(&self, value: &Value) -> Result<(), TslError>;

    /// Human-readable description; JSON document for struct and array so
    /// container descriptions nest structurally
    fn to_entity_string(&self) -> String;

    /// Synthesize a conforming value
    fn random(&self, rng: &mut dyn RngCore) -> Value;

    /// Canonical language-independent type token
    fn type_token(&self) -> &'static str;

    /// Rust type emitted by the codec generator
    fn rust_type(&self) -> &'static str;

    /// Default-value expression emitted by the codec generator
    fn default_value(&self) -> &'static str;
}

type Constructor = fn(&str, &Value) -> Result<Box<dyn Validate>, TslError>;

/// Kind registry. New kinds extend the engine here without touching any
/// call site.
static TYPE_REGISTRY: &[(&str, Constructor)] = &[
    ("int", DigitalSpec::parse),
    ("long", DigitalSpec::parse),
    ("float", FloatSpec::parse),
    ("double", FloatSpec::parse),
    ("text", TextSpec::parse),
    ("enum", EnumSpec::parse),
    ("bool", BoolSpec::parse),
    ("array", ArraySpec::parse),
    ("struct", StructSpec::parse),
    ("date", DateSpec::parse),
];

fn constructor_for(kind: &str) -> Option<Constructor> {
    TYPE_REGISTRY
        .iter()
        .find(|(name, _)| *name == kind)
        .map(|(_, constructor)| *constructor)
}

/// A TSL data type: kind string plus raw spec body, with the typed
/// validator built lazily on first use.
#[derive(Deserialize)]
pub struct DataType {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub specs: Value,

    #[serde(skip)]
    validator: OnceLock<Box<dyn Validate>>,
}

impl std::fmt::Debug for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataType")
            .field("kind", &self.kind)
            .field("specs", &self.specs)
            .finish()
    }
}

impl Clone for DataType {
    fn clone(&self) -> Self {
        // the memoized validator is rebuilt on demand in the clone
        Self {
            kind: self.kind.clone(),
            specs: self.specs.clone(),
            validator: OnceLock::new(),
        }
    }
}

impl DataType {
    pub fn new(kind: impl Into<String>, specs: Value) -> Self {
        Self {
            kind: kind.into(),
            specs,
            validator: OnceLock::new(),
        }
    }

    /// The memoized typed validator. A parse failure is returned without
    /// being cached, so callers may retry.
    fn typed(&self) -> Result<&dyn Validate, TslError> {
        if let Some(validator) = self.validator.get() {
            return Ok(validator.as_ref());
        }
        let constructor = constructor_for(&self.kind).ok_or_else(|| {
            TslError::spec("type", format!("type({}) is invalid or unsupported", self.kind))
        })?;
        if self.specs.is_null() && self.kind != "date" {
            return Err(TslError::spec("specs", "specs is empty"));
        }
        let built = constructor(&self.kind, &self.specs)?;
        Ok(self.validator.get_or_init(|| built).as_ref())
    }

    pub fn validate_spec(&self) -> Result<(), TslError> {
        self.typed()?.validate_spec()
    }

    pub fn validate_value(&self, value: &Value) -> Result<(), TslError> {
        self.typed()?.validate_value(value)
    }

    pub fn to_entity_string(&self) -> String {
        match self.typed() {
            Ok(validator) => validator.to_entity_string(),
            Err(e) => {
                warn!(kind = %self.kind, error = %e, "entity string for invalid data type");
                String::new()
            }
        }
    }

    pub fn random(&self, rng: &mut dyn RngCore) -> Result<Value, TslError> {
        Ok(self.typed()?.random(rng))
    }

    pub fn type_token(&self) -> Result<&'static str, TslError> {
        Ok(self.typed()?.type_token())
    }

    pub fn rust_type(&self) -> Result<&'static str, TslError> {
        Ok(self.typed()?.rust_type())
    }

    pub fn default_value(&self) -> Result<&'static str, TslError> {
        Ok(self.typed()?.default_value())
    }
}

fn parse_number_field<T: std::str::FromStr>(
    raw: &str,
    path: String,
) -> Result<T, TslError> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| TslError::spec(path, format!("({raw}) is not a number")))
}

// int / long

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DigitalRaw {
    max: String,
    min: String,
    step: String,
    unit: String,
    unit_name: String,
}

struct DigitalSpec {
    kind: String,
    unit: String,
    unit_name: String,
    min: i64,
    max: i64,
    step: i64,
}

impl DigitalSpec {
    fn parse(kind: &str, specs: &Value) -> Result<Box<dyn Validate>, TslError> {
        let raw: DigitalRaw = serde_json::from_value(specs.clone())
            .map_err(|e| TslError::spec(format!("({kind})"), e.to_string()))?;
        let min = parse_number_field(&raw.min, format!("({kind}).min"))?;
        let max = parse_number_field(&raw.max, format!("({kind}).max"))?;
        let step = if raw.step.is_empty() {
            0
        } else {
            parse_number_field(&raw.step, format!("({kind}).step"))?
        };
        Ok(Box::new(Self {
            kind: kind.to_string(),
            unit: raw.unit,
            unit_name: raw.unit_name,
            min,
            max,
            step,
        }))
    }
}

impl Validate for DigitalSpec {
    fn validate_spec(&self) -> Result<(), TslError> {
        if self.min > self.max {
            return Err(TslError::spec(
                format!("({}).min", self.kind),
                format!("min({}) is larger than max({})", self.min, self.max),
            ));
        }
        if self.step > 0 && i128::from(self.step) > i128::from(self.max) - i128::from(self.min) {
            return Err(TslError::spec(
                format!("({}).step", self.kind),
                format!("step({}) is too large", self.step),
            ));
        }
        Ok(())
    }

    fn validate_value(&self, value: &Value) -> Result<(), TslError> {
        let path = format!("({}).value", self.kind);
        let number = match value {
            Value::Number(n) => n,
            other => return Err(TslError::value(path, format!("value({other}) is not a number"))),
        };
        let Some(v) = number.as_i64() else {
            return Err(TslError::value(path, format!("value({number}) is not an integer")));
        };
        if v < self.min || v > self.max {
            return Err(TslError::value(
                path,
                format!("value({v}) is out of range [{}, {}]", self.min, self.max),
            ));
        }
        Ok(())
    }

    fn to_entity_string(&self) -> String {
        format!(
            "range: {}-{} {}({}),step: {}",
            self.min, self.max, self.unit_name, self.unit, self.step
        )
    }

    fn random(&self, rng: &mut dyn RngCore) -> Value {
        Value::from(rng.gen_range(self.min..=self.max))
    }

    fn type_token(&self) -> &'static str {
        if self.kind == "long" {
            "int64"
        } else {
            "int"
        }
    }

    fn rust_type(&self) -> &'static str {
        if self.kind == "long" {
            "i64"
        } else {
            "i32"
        }
    }

    fn default_value(&self) -> &'static str {
        "0"
    }
}

// float / double

struct FloatSpec {
    kind: String,
    unit: String,
    min: f64,
    max: f64,
    step: f64,
}

impl FloatSpec {
    fn parse(kind: &str, specs: &Value) -> Result<Box<dyn Validate>, TslError> {
        let raw: DigitalRaw = serde_json::from_value(specs.clone())
            .map_err(|e| TslError::spec(format!("({kind})"), e.to_string()))?;
        let min = parse_number_field(&raw.min, format!("({kind}).min"))?;
        let max = parse_number_field(&raw.max, format!("({kind}).max"))?;
        let step = if raw.step.is_empty() {
            0.0
        } else {
            parse_number_field(&raw.step, format!("({kind}).step"))?
        };
        Ok(Box::new(Self {
            kind: kind.to_string(),
            unit: raw.unit,
            min,
            max,
            step,
        }))
    }
}

impl Validate for FloatSpec {
    fn validate_spec(&self) -> Result<(), TslError> {
        if self.min > self.max {
            return Err(TslError::spec(
                format!("({}).min", self.kind),
                format!("min({}) is larger than max({})", self.min, self.max),
            ));
        }
        if self.step > 0.0 && self.step > self.max - self.min {
            return Err(TslError::spec(
                format!("({}).step", self.kind),
                format!("step({}) is too large", self.step),
            ));
        }
        Ok(())
    }

    fn validate_value(&self, value: &Value) -> Result<(), TslError> {
        let path = format!("({}).value", self.kind);
        let number = match value {
            Value::Number(n) => n,
            other => return Err(TslError::value(path, format!("value({other}) is not a number"))),
        };
        let Some(v) = number.as_f64() else {
            return Err(TslError::value(path, format!("value({number}) is not a number")));
        };
        if v < self.min || v > self.max {
            return Err(TslError::value(
                path,
                format!("value({v}) is out of range [{}, {}]", self.min, self.max),
            ));
        }
        Ok(())
    }

    fn to_entity_string(&self) -> String {
        format!(
            "range: {}-{}(unit:{}),step: {}",
            self.min, self.max, self.unit, self.step
        )
    }

    fn random(&self, rng: &mut dyn RngCore) -> Value {
        let v = if self.max > self.min {
            rng.gen_range(self.min..self.max)
        } else {
            self.min
        };
        Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
    }

    fn type_token(&self) -> &'static str {
        "float64"
    }

    fn rust_type(&self) -> &'static str {
        "f64"
    }

    fn default_value(&self) -> &'static str {
        "0.0"
    }
}

// text

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct TextRaw {
    length: String,
}

struct TextSpec {
    length: usize,
}

const TEXT_MIN_LENGTH: usize = 1;
const TEXT_MAX_LENGTH: usize = 10240;

impl TextSpec {
    fn parse(_kind: &str, specs: &Value) -> Result<Box<dyn Validate>, TslError> {
        let raw: TextRaw = serde_json::from_value(specs.clone())
            .map_err(|e| TslError::spec("(text)", e.to_string()))?;
        let length = parse_number_field(&raw.length, "(text).length".to_string())?;
        Ok(Box::new(Self { length }))
    }
}

impl Validate for TextSpec {
    fn validate_spec(&self) -> Result<(), TslError> {
        if self.length < TEXT_MIN_LENGTH || self.length > TEXT_MAX_LENGTH {
            return Err(TslError::spec(
                "(text).length",
                format!(
                    "length({}) out of range [{TEXT_MIN_LENGTH}, {TEXT_MAX_LENGTH}]",
                    self.length
                ),
            ));
        }
        Ok(())
    }

    fn validate_value(&self, value: &Value) -> Result<(), TslError> {
        let Value::String(s) = value else {
            return Err(TslError::value(
                "(text).value",
                format!("value({value}) is not a string"),
            ));
        };
        if s.chars().count() > self.length {
            return Err(TslError::value(
                "(text).value",
                format!("value is longer than {}", self.length),
            ));
        }
        Ok(())
    }

    fn to_entity_string(&self) -> String {
        format!("max-length: {}", self.length)
    }

    fn random(&self, rng: &mut dyn RngCore) -> Value {
        let n = rng.gen_range(1..=self.length.max(1));
        let s: String = (0..n).map(|_| rng.gen_range(b'a'..=b'z') as char).collect();
        Value::String(s)
    }

    fn type_token(&self) -> &'static str {
        "string"
    }

    fn rust_type(&self) -> &'static str {
        "String"
    }

    fn default_value(&self) -> &'static str {
        "String::new()"
    }
}

// enum

struct EnumSpec {
    labels: BTreeMap<i64, String>,
}

impl EnumSpec {
    fn parse(_kind: &str, specs: &Value) -> Result<Box<dyn Validate>, TslError> {
        let raw: BTreeMap<String, String> = serde_json::from_value(specs.clone())
            .map_err(|e| TslError::spec("(enum)", e.to_string()))?;
        let mut labels = BTreeMap::new();
        for (key, label) in raw {
            if label.is_empty() {
                return Err(TslError::spec(format!("(enum).{key}"), "label is empty"));
            }
            let value: i64 = key.parse().map_err(|_| {
                TslError::spec(format!("(enum).{key}"), format!("({key}) is not an enum key"))
            })?;
            labels.insert(value, label);
        }
        Ok(Box::new(Self { labels }))
    }
}

impl Validate for EnumSpec {
    fn validate_spec(&self) -> Result<(), TslError> {
        Ok(())
    }

    fn validate_value(&self, value: &Value) -> Result<(), TslError> {
        let number = match value {
            Value::Number(n) => n,
            other => {
                return Err(TslError::value(
                    "(enum).value",
                    format!("value({other}) is not a number"),
                ))
            }
        };
        let Some(v) = number.as_i64() else {
            return Err(TslError::value(
                "(enum).value",
                format!("value({number}) is not an integer"),
            ));
        };
        if !self.labels.contains_key(&v) {
            return Err(TslError::value(
                "(enum).value",
                format!("value({v}) is not a defined enum"),
            ));
        }
        Ok(())
    }

    fn to_entity_string(&self) -> String {
        self.labels
            .iter()
            .map(|(k, v)| format!("{k}-{v}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn random(&self, rng: &mut dyn RngCore) -> Value {
        let keys: Vec<i64> = self.labels.keys().copied().collect();
        if keys.is_empty() {
            return Value::from(0);
        }
        Value::from(keys[rng.gen_range(0..keys.len())])
    }

    fn type_token(&self) -> &'static str {
        "int"
    }

    fn rust_type(&self) -> &'static str {
        "i32"
    }

    fn default_value(&self) -> &'static str {
        "0"
    }
}

// bool

#[derive(Debug, Clone, Default, Deserialize)]
struct BoolRaw {
    #[serde(rename = "0", default)]
    false_label: String,
    #[serde(rename = "1", default)]
    true_label: String,
}

struct BoolSpec {
    false_label: String,
    true_label: String,
}

impl BoolSpec {
    fn parse(_kind: &str, specs: &Value) -> Result<Box<dyn Validate>, TslError> {
        let raw: BoolRaw = serde_json::from_value(specs.clone())
            .map_err(|e| TslError::spec("(bool)", e.to_string()))?;
        Ok(Box::new(Self {
            false_label: raw.false_label,
            true_label: raw.true_label,
        }))
    }
}

impl Validate for BoolSpec {
    fn validate_spec(&self) -> Result<(), TslError> {
        if self.false_label.is_empty() {
            return Err(TslError::spec("(bool).0", "label is empty"));
        }
        if self.true_label.is_empty() {
            return Err(TslError::spec("(bool).1", "label is empty"));
        }
        Ok(())
    }

    fn validate_value(&self, value: &Value) -> Result<(), TslError> {
        let v = match value {
            Value::Number(n) => n.as_i64(),
            _ => None,
        };
        match v {
            Some(0 | 1) => Ok(()),
            _ => Err(TslError::value(
                "(bool).value",
                format!("value({value}) is not bool"),
            )),
        }
    }

    fn to_entity_string(&self) -> String {
        format!("0-{},1-{}", self.false_label, self.true_label)
    }

    fn random(&self, rng: &mut dyn RngCore) -> Value {
        Value::from(rng.gen_range(0..=1i64))
    }

    fn type_token(&self) -> &'static str {
        "int8"
    }

    fn rust_type(&self) -> &'static str {
        "i8"
    }

    fn default_value(&self) -> &'static str {
        "0"
    }
}

// array

#[derive(Deserialize)]
struct ArrayRaw {
    #[serde(default)]
    size: String,
    item: DataType,
}

struct ArraySpec {
    size: usize,
    item: DataType,
}

const ARRAY_MIN_SIZE: usize = 1;
const ARRAY_MAX_SIZE: usize = 512;

impl ArraySpec {
    fn parse(_kind: &str, specs: &Value) -> Result<Box<dyn Validate>, TslError> {
        let raw: ArrayRaw = serde_json::from_value(specs.clone())
            .map_err(|e| TslError::spec("(array)", e.to_string()))?;
        let size = parse_number_field(&raw.size, "(array).size".to_string())?;
        Ok(Box::new(Self {
            size,
            item: raw.item,
        }))
    }
}

impl Validate for ArraySpec {
    fn validate_spec(&self) -> Result<(), TslError> {
        if self.size < ARRAY_MIN_SIZE || self.size > ARRAY_MAX_SIZE {
            return Err(TslError::spec(
                "(array).size",
                format!("size({}) out of range [{ARRAY_MIN_SIZE}, {ARRAY_MAX_SIZE}]", self.size),
            ));
        }
        self.item
            .validate_spec()
            .map_err(|e| e.nest("(array).item"))
    }

    fn validate_value(&self, value: &Value) -> Result<(), TslError> {
        let Value::Array(items) = value else {
            return Err(TslError::value("(array).value", "value is not an array"));
        };
        if items.len() > self.size {
            return Err(TslError::value(
                "(array).value",
                format!("length({}) is longer than {}", items.len(), self.size),
            ));
        }
        for item in items {
            self.item
                .validate_value(item)
                .map_err(|e| e.nest("(array).value"))?;
        }
        Ok(())
    }

    fn to_entity_string(&self) -> String {
        let items = if self.item.kind == "struct" || self.item.kind == "array" {
            let inner: Value =
                serde_json::from_str(&self.item.to_entity_string()).unwrap_or(Value::Null);
            vec![inner]
        } else {
            vec![Value::String(format!(
                "{},{},size:{}",
                self.item.kind,
                self.item.to_entity_string(),
                self.size
            ))]
        };
        serde_json::to_string(&items).unwrap_or_default()
    }

    fn random(&self, rng: &mut dyn RngCore) -> Value {
        let items: Vec<Value> = (0..self.size)
            .map(|_| self.item.random(rng).unwrap_or(Value::Null))
            .collect();
        Value::Array(items)
    }

    fn type_token(&self) -> &'static str {
        "list"
    }

    fn rust_type(&self) -> &'static str {
        "Vec<Value>"
    }

    fn default_value(&self) -> &'static str {
        "Vec::new()"
    }
}

// struct

struct StructSpec {
    properties: Vec<Property>,
    index: HashMap<String, usize>,
}

impl StructSpec {
    fn parse(_kind: &str, specs: &Value) -> Result<Box<dyn Validate>, TslError> {
        let properties: Vec<Property> = serde_json::from_value(specs.clone())
            .map_err(|e| TslError::spec("(struct)", e.to_string()))?;
        let index = properties
            .iter()
            .enumerate()
            .map(|(i, p)| (p.identifier.clone(), i))
            .collect();
        Ok(Box::new(Self { properties, index }))
    }
}

impl Validate for StructSpec {
    fn validate_spec(&self) -> Result<(), TslError> {
        for (k, property) in self.properties.iter().enumerate() {
            if property.identifier.is_empty() {
                return Err(TslError::spec(
                    format!("(struct)[{k}].identifier"),
                    "identifier is empty",
                ));
            }
            if property.name.is_empty() {
                return Err(TslError::spec("(struct).name", "name is empty"));
            }
            let Some(data_type) = &property.data_type else {
                return Err(TslError::spec("(struct).dataType", "dataType is empty"));
            };
            if data_type.kind == "struct" {
                return Err(TslError::spec(
                    "(struct).dataType.type",
                    "struct wrap struct, not support",
                ));
            }
            data_type
                .validate_spec()
                .map_err(|e| e.nest("(struct).dataType"))?;
        }
        Ok(())
    }

    fn validate_value(&self, value: &Value) -> Result<(), TslError> {
        let Value::Object(map) = value else {
            return Err(TslError::value("(struct).value", "value is not an object"));
        };
        for (key, inner) in map {
            let Some(&i) = self.index.get(key) else {
                return Err(TslError::value(
                    "(struct).value",
                    format!("{key} is not defined"),
                ));
            };
            self.properties[i]
                .validate_value(inner)
                .map_err(|e| e.nest("(struct).value"))?;
        }
        Ok(())
    }

    fn to_entity_string(&self) -> String {
        serde_json::to_string(&property_entity_map(&self.properties)).unwrap_or_default()
    }

    fn random(&self, rng: &mut dyn RngCore) -> Value {
        let mut map = Map::new();
        for property in &self.properties {
            map.insert(
                property.identifier.clone(),
                property.random(rng).unwrap_or(Value::Null),
            );
        }
        Value::Object(map)
    }

    fn type_token(&self) -> &'static str {
        "mapping"
    }

    fn rust_type(&self) -> &'static str {
        "Map<String, Value>"
    }

    fn default_value(&self) -> &'static str {
        "Map::new()"
    }
}

// date

struct DateSpec;

impl DateSpec {
    fn parse(_kind: &str, _specs: &Value) -> Result<Box<dyn Validate>, TslError> {
        Ok(Box::new(Self))
    }
}

impl Validate for DateSpec {
    fn validate_spec(&self) -> Result<(), TslError> {
        Ok(())
    }

    fn validate_value(&self, value: &Value) -> Result<(), TslError> {
        // both wire forms are in use: millisecond numbers and ISO-8601 strings
        let conforms = match value {
            Value::Number(n) => n.as_i64().is_some(),
            Value::String(s) => DateTime::parse_from_rfc3339(s).is_ok(),
            _ => false,
        };
        if conforms {
            Ok(())
        } else {
            Err(TslError::value(
                "(date).value",
                format!("value({value}) is not a millisecond timestamp or ISO date"),
            ))
        }
    }

    fn to_entity_string(&self) -> String {
        "millisecond timestamp or ISO-8601 date".to_string()
    }

    fn random(&self, _rng: &mut dyn RngCore) -> Value {
        Value::from(Utc::now().timestamp_millis())
    }

    fn type_token(&self) -> &'static str {
        "int64"
    }

    fn rust_type(&self) -> &'static str {
        "i64"
    }

    fn default_value(&self) -> &'static str {
        "0"
    }
}
