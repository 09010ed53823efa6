//! ThingMesh device-messaging runtime - Main Entry Point
//!
//! Wires the MQTT RPC transport to the TSL engine:
//! - topic routes for the derived property services and event post
//! - entity validation against the loaded thing specification
//! - structured replies on the paired reply topics

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use mqtt_transport::{
    handler, logging, MqttQos, MqttServer, ServerOptions, StatusError, TransportError,
};
use tsl_engine::{EntityReply, Thing, ThingEntity};

/// Built-in smart-plug specification used when no spec file is configured
const DEFAULT_THING_SPEC: &str = r#"{
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
    "events": []
}"#;

/// Runtime configuration
#[derive(Debug, Clone)]
struct RuntimeConfig {
    /// MQTT broker URL
    broker_url: String,

    /// MQTT client id
    client_id: String,

    /// Optional path to a thing specification document
    thing_spec_path: Option<String>,
}

impl RuntimeConfig {
    fn from_env() -> Self {
        Self {
            broker_url: std::env::var("THINGMESH_BROKER_URL")
                .unwrap_or_else(|_| "tcp://localhost:1883".to_string()),
            client_id: std::env::var("THINGMESH_CLIENT_ID")
                .unwrap_or_else(|_| "thingmesh-runtime".to_string()),
            thing_spec_path: std::env::var("THINGMESH_THING_SPEC").ok(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("thingmesh_server=info".parse()?)
                .add_directive("mqtt_transport=debug".parse()?)
                .add_directive("tsl_engine=debug".parse()?),
        )
        .with_target(true)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting ThingMesh runtime"
    );

    let config = RuntimeConfig::from_env();
    info!(
        broker = %config.broker_url,
        client_id = %config.client_id,
        "Runtime configuration loaded"
    );

    // Load the thing specification
    let spec = match &config.thing_spec_path {
        Some(path) => std::fs::read(path)?,
        None => DEFAULT_THING_SPEC.as_bytes().to_vec(),
    };
    let thing = Arc::new(Thing::new(&spec)?);
    info!(
        product_key = %thing.profile.as_ref().map(|p| p.product_key.as_str()).unwrap_or_default(),
        properties = thing.properties.len(),
        "Thing specification loaded"
    );

    let options = ServerOptions {
        broker_url: config.broker_url.clone(),
        client_id: config.client_id.clone(),
        ..ServerOptions::default()
    };
    let mut server = MqttServer::new(options).with_middleware(logging());
    register_routes(&mut server, thing)?;

    server.start().await?;
    info!("Runtime started, waiting for device messages");

    tokio::signal::ctrl_c().await?;
    server.stop().await?;
    info!("Runtime stopped");
    Ok(())
}

/// Register the runtime's topic routes: the derived property services,
/// spec-defined services, the device-side property post and a logging
/// fallback.
fn register_routes(server: &mut MqttServer, thing: Arc<Thing>) -> anyhow::Result<()> {
    let mut route = server.route();

    route.handle(
        "/sys/:productKey/:deviceName/thing/service/property/set",
        MqttQos::AtMostOnce,
        validated_entity_handler(thing.clone()),
    )?;
    route.handle(
        "/sys/:productKey/:deviceName/thing/service/property/get",
        MqttQos::AtMostOnce,
        validated_entity_handler(thing.clone()),
    )?;
    route.handle(
        "/sys/:productKey/:deviceName/thing/service/:identifier",
        MqttQos::AtMostOnce,
        validated_entity_handler(thing.clone()),
    )?;
    route.handle(
        "/device/:productKey/:deviceName/thing/event/property/post",
        MqttQos::AtMostOnce,
        validated_entity_handler(thing),
    )?;
    route.fallback(handler(|ctx| async move {
        warn!(topic = %ctx.message().topic, "no route for topic");
    }))?;
    Ok(())
}

/// Handler decoding an entity, validating it against the thing and
/// replying with a structured result on the derived reply topic.
fn validated_entity_handler(thing: Arc<Thing>) -> mqtt_transport::Handler {
    handler(move |ctx| {
        let thing = thing.clone();
        async move {
            let request: ThingEntity = match ctx.bind() {
                Ok(request) => request,
                Err(e) => {
                    warn!(topic = %ctx.message().topic, error = %e, "malformed request");
                    if let Err(e) = ctx.reply_err(&e).await {
                        error!(error = %e, "error reply failed");
                    }
                    return;
                }
            };

            debug!(
                topic = %ctx.message().topic,
                method = %request.method,
                device = ctx.params().by_name("deviceName").unwrap_or_default(),
                "entity received"
            );

            match thing.validate_entity(&request) {
                Ok(()) => {
                    let reply = EntityReply {
                        id: request.id,
                        code: 200,
                        data: None,
                        method: request.method,
                        timestamp: Utc::now().timestamp_millis(),
                    };
                    if let Err(e) = ctx.reply(Some(&reply)).await {
                        error!(error = %e, "reply failed");
                    }
                }
                Err(e) => {
                    let status = StatusError::new(400, "TSL_VALIDATE", e.to_string())
                        .with_id(request.id);
                    if let Err(e) = ctx.reply_err(&TransportError::Status(status)).await {
                        error!(error = %e, "error reply failed");
                    }
                }
            }
        }
    })
}
