//! # TSL Engine
//!
//! Thing Specification Language engine for ThingMesh.
//!
//! This crate provides:
//! - `DataType`: polymorphic, lazily validated data types
//! - `Thing`: spec aggregate with derived `post`/`set`/`get` entries
//! - Entity validation with dotted error paths
//! - Random instance generation and decoder scaffold generation
//! - The structured business topic parser

pub mod codegen;
pub mod datatype;
pub mod entity;
pub mod error;
pub mod method;
pub mod property;
pub mod random;
pub mod thing;
pub mod topic;

pub use codegen::DEFAULT_CODEC_TEMPLATE;
pub use datatype::{DataType, Validate};
pub use entity::{EntityReply, EntityRequest, ThingEntity};
pub use error::TslError;
pub use method::{MethodClassify, ThingMethod};
pub use property::Property;
pub use thing::{validate_spec_bytes, Event, Profile, Service, Thing};
pub use topic::{parse_topic, Topic, TopicError};
