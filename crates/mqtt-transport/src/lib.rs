//! # MQTT Transport
//!
//! MQTT RPC transport for ThingMesh - the device-messaging runtime.
//!
//! This crate provides:
//! - `Router`: wildcard-aware, parameter-extracting topic trie
//! - `MqttServer`: connection lifecycle, subscription replay and dispatch
//! - `Context`: pooled per-message request state with codec binding
//! - `Middleware`: ordered handler-wrapping pipeline

pub mod codec;
pub mod context;
pub mod error;
pub mod middleware;
pub mod router;
pub mod server;
mod trie;

pub use codec::{reply_topic, Codec, JsonCodec, DEVICE_TOPIC_PREFIX, SERVER_TOPIC_PREFIX};
pub use context::{Context, Message};
pub use error::{StatusError, TransportError};
pub use middleware::{chain, logging, middleware, Middleware};
pub use router::{handler, Dispatch, Handler, Params, Router};
pub use server::{MqttQos, MqttServer, Route, ServerOptions, ServerState, Subscription};
