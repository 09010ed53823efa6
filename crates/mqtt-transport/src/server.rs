//! MQTT server: connection lifecycle, subscription bookkeeping and the
//! dispatch entrypoint.
//!
//! The server wraps a rumqttc client. `start` performs a bounded-wait
//! connect (failure is fatal), replays recorded subscriptions on every
//! reconnect and runs a single event-loop task that feeds incoming
//! publishes through the trie router into pooled request contexts.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codec::{Codec, JsonCodec};
use crate::context::{Message, Pools};
use crate::error::TransportError;
use crate::middleware::{chain, Middleware};
use crate::router::{Dispatch, Handler, Params, Router};

/// Delivery guarantee recorded for a subscription. Appears in
/// configuration as `atmostonce` / `atleastonce` / `exactlyonce` and
/// maps onto the broker client's three QoS levels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MqttQos {
    /// Fire and forget
    AtMostOnce,
    /// Acknowledged; duplicates possible
    #[default]
    AtLeastOnce,
    /// Assured single delivery
    ExactlyOnce,
}

impl From<MqttQos> for QoS {
    fn from(qos: MqttQos) -> Self {
        match qos {
            MqttQos::AtMostOnce => Self::AtMostOnce,
            MqttQos::AtLeastOnce => Self::AtLeastOnce,
            MqttQos::ExactlyOnce => Self::ExactlyOnce,
        }
    }
}

impl From<QoS> for MqttQos {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => Self::AtMostOnce,
            QoS::AtLeastOnce => Self::AtLeastOnce,
            QoS::ExactlyOnce => Self::ExactlyOnce,
        }
    }
}

/// Server lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Closed,
}

/// MQTT server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerOptions {
    /// Broker URL, e.g. `tcp://localhost:1883`
    pub broker_url: String,

    /// Client ID (must be unique per connection)
    pub client_id: String,

    /// Optional username
    pub username: Option<String>,

    /// Optional password
    pub password: Option<String>,

    /// Enable clean session
    #[serde(default = "default_true")]
    pub clean_session: bool,

    /// Keep polling (and so reconnecting) after a connection loss
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,

    /// Replay recorded subscriptions on every reconnect
    #[serde(default = "default_true")]
    pub resume_subs: bool,

    /// Bounded wait for the initial connect
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Keep alive interval in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// Await each handler inline, preserving per-topic ordering; when
    /// false handlers are spawned and may run concurrently
    #[serde(default = "default_true")]
    pub order_matters: bool,

    /// Quiesce time after disconnect on stop
    #[serde(default = "default_quiesce")]
    pub disconnect_quiesce_ms: u64,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            broker_url: "tcp://localhost:1883".to_string(),
            client_id: String::new(),
            username: None,
            password: None,
            clean_session: true,
            auto_reconnect: true,
            resume_subs: true,
            connect_timeout_ms: default_connect_timeout(),
            keep_alive_secs: default_keep_alive(),
            order_matters: true,
            disconnect_quiesce_ms: default_quiesce(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout() -> u64 {
    1000
}

fn default_keep_alive() -> u64 {
    60
}

fn default_quiesce() -> u64 {
    250
}

/// One recorded broker subscription, replayed on reconnect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub filter: String,
    pub qos: MqttQos,
}

/// Hook invoked on every transition into the connected state
pub type ConnectHook = Arc<dyn Fn() + Send + Sync>;

/// Hook invoked when the broker connection is lost
pub type ConnectionLostHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Split a broker URL into host and port. Accepts `tcp://`/`mqtt://`
/// schemes or a bare `host[:port]`; the port defaults to 1883.
fn parse_broker_url(url: &str) -> Result<(String, u16), TransportError> {
    let invalid = || TransportError::InvalidBrokerUrl {
        url: url.to_string(),
    };
    let rest = match url.split_once("://") {
        Some(("tcp" | "mqtt", rest)) => rest,
        Some(_) => return Err(invalid()),
        None => url,
    };
    if rest.is_empty() {
        return Err(invalid());
    }
    match rest.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port: u16 = port.parse().map_err(|_| invalid())?;
            Ok((host.to_string(), port))
        }
        None => Ok((rest.to_string(), 1883)),
        _ => Err(invalid()),
    }
}

/// MQTT RPC server
pub struct MqttServer {
    options: ServerOptions,
    codec: Arc<dyn Codec>,
    middlewares: Vec<Middleware>,
    router: Option<Router>,
    pools: Arc<Pools>,
    subscriptions: Arc<Mutex<Vec<Subscription>>>,
    state: Arc<Mutex<ServerState>>,
    client: Option<AsyncClient>,
    cancel: CancellationToken,
    on_connect: Option<ConnectHook>,
    on_connection_lost: Option<ConnectionLostHook>,
    loop_handle: Option<JoinHandle<()>>,
}

impl MqttServer {
    pub fn new(options: ServerOptions) -> Self {
        let router = Router::new();
        let pools = Pools::new(router.params_pool());
        Self {
            options,
            codec: Arc::new(JsonCodec),
            middlewares: Vec::new(),
            router: Some(router),
            pools,
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            state: Arc::new(Mutex::new(ServerState::New)),
            client: None,
            cancel: CancellationToken::new(),
            on_connect: None,
            on_connection_lost: None,
            loop_handle: None,
        }
    }

    /// Replace the default JSON codec
    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    /// Append a server-wide middleware; the first appended runs outermost
    pub fn with_middleware(mut self, middleware: Middleware) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Hook every transition into the connected state
    pub fn on_connect(mut self, hook: ConnectHook) -> Self {
        self.on_connect = Some(hook);
        self
    }

    /// Hook connection loss
    pub fn on_connection_lost(mut self, hook: ConnectionLostHook) -> Self {
        self.on_connection_lost = Some(hook);
        self
    }

    /// Route registration facade. Routes must be registered before start.
    pub fn route(&mut self) -> Route<'_> {
        Route {
            server: self,
            middlewares: Vec::new(),
        }
    }

    /// Record a raw broker subscription and, when already connected,
    /// subscribe immediately.
    pub async fn subscribe(&self, filter: &str, qos: MqttQos) -> Result<(), TransportError> {
        self.subscriptions.lock().push(Subscription {
            filter: filter.to_string(),
            qos,
        });
        if let Some(client) = &self.client {
            client.subscribe(filter, qos.into()).await?;
        }
        Ok(())
    }

    /// Snapshot of the recorded subscriptions in registration order
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.lock().clone()
    }

    pub fn state(&self) -> ServerState {
        *self.state.lock()
    }

    /// Connect to the broker and start the dispatch loop.
    ///
    /// Failure to connect within `connect_timeout_ms` is fatal: the error
    /// is returned and the server lands in the closed state.
    pub async fn start(&mut self) -> Result<(), TransportError> {
        *self.state.lock() = ServerState::Connecting;
        let (host, port) = match parse_broker_url(&self.options.broker_url) {
            Ok(parsed) => parsed,
            Err(e) => {
                *self.state.lock() = ServerState::Closed;
                return Err(e);
            }
        };

        let mut mqtt_options = MqttOptions::new(&self.options.client_id, host, port);
        mqtt_options.set_keep_alive(Duration::from_secs(self.options.keep_alive_secs));
        mqtt_options.set_clean_session(self.options.clean_session);
        if let (Some(user), Some(pass)) = (&self.options.username, &self.options.password) {
            mqtt_options.set_credentials(user, pass);
        }

        info!(
            broker = %self.options.broker_url,
            client_id = %self.options.client_id,
            "mqtt server starting"
        );
        let (client, mut eventloop) = AsyncClient::new(mqtt_options, 64);

        // bounded wait for the initial ConnAck
        let timeout = Duration::from_millis(self.options.connect_timeout_ms);
        let connack = tokio::time::timeout(timeout, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                    Ok(_) => continue,
                    Err(e) => {
                        return Err(TransportError::ConnectFailed {
                            reason: e.to_string(),
                        })
                    }
                }
            }
        })
        .await;
        match connack {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                *self.state.lock() = ServerState::Closed;
                return Err(e);
            }
            Err(_) => {
                *self.state.lock() = ServerState::Closed;
                return Err(TransportError::ConnectTimeout {
                    timeout_ms: self.options.connect_timeout_ms,
                });
            }
        }

        *self.state.lock() = ServerState::Connected;
        info!("mqtt connected");
        self.client = Some(client.clone());

        for subscription in self.subscriptions() {
            client
                .subscribe(&subscription.filter, subscription.qos.into())
                .await?;
            debug!(filter = %subscription.filter, "subscribed");
        }
        if let Some(hook) = &self.on_connect {
            hook();
        }

        let router = Arc::new(self.router.take().ok_or(TransportError::AlreadyStarted)?);
        let worker = DispatchLoop {
            router,
            client,
            pools: self.pools.clone(),
            codec: self.codec.clone(),
            subscriptions: self.subscriptions.clone(),
            state: self.state.clone(),
            cancel: self.cancel.clone(),
            on_connect: self.on_connect.clone(),
            on_connection_lost: self.on_connection_lost.clone(),
            auto_reconnect: self.options.auto_reconnect,
            resume_subs: self.options.resume_subs,
            order_matters: self.options.order_matters,
        };
        self.loop_handle = Some(tokio::spawn(worker.run(eventloop)));
        Ok(())
    }

    /// Disconnect from the broker and stop the dispatch loop, waiting the
    /// configured quiesce time for in-flight publishes to drain.
    pub async fn stop(&mut self) -> Result<(), TransportError> {
        info!("mqtt server stopping");
        self.cancel.cancel();
        if let Some(client) = self.client.take() {
            if let Err(e) = client.disconnect().await {
                warn!(error = %e, "disconnect failed");
            }
        }
        tokio::time::sleep(Duration::from_millis(self.options.disconnect_quiesce_ms)).await;
        if let Some(handle) = self.loop_handle.take() {
            handle.abort();
        }
        *self.state.lock() = ServerState::Closed;
        Ok(())
    }
}

/// Route registration facade returned by [`MqttServer::route`]
pub struct Route<'s> {
    server: &'s mut MqttServer,
    middlewares: Vec<Middleware>,
}

impl Route<'_> {
    /// Append a route-scoped middleware, appended after the server's
    /// middlewares in the same outermost-first fashion
    pub fn with(mut self, middleware: Middleware) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Register a handler for a topic pattern and record the derived
    /// broker subscription at the given QoS.
    pub fn handle(
        &mut self,
        pattern: &str,
        qos: MqttQos,
        handler: Handler,
    ) -> Result<(), TransportError> {
        let mut middlewares = self.server.middlewares.clone();
        middlewares.extend(self.middlewares.iter().cloned());
        let wrapped = chain(&middlewares, handler);

        let router = self
            .server
            .router
            .as_mut()
            .ok_or(TransportError::AlreadyStarted)?;
        let filter = router.handle(pattern, wrapped)?;
        self.server.subscriptions.lock().push(Subscription { filter, qos });
        Ok(())
    }

    /// Install the fallback handler for unmatched topics
    pub fn fallback(&mut self, handler: Handler) -> Result<(), TransportError> {
        let router = self
            .server
            .router
            .as_mut()
            .ok_or(TransportError::AlreadyStarted)?;
        router.set_fallback(handler);
        Ok(())
    }
}

/// State shared by the spawned event-loop task
struct DispatchLoop {
    router: Arc<Router>,
    client: AsyncClient,
    pools: Arc<Pools>,
    codec: Arc<dyn Codec>,
    subscriptions: Arc<Mutex<Vec<Subscription>>>,
    state: Arc<Mutex<ServerState>>,
    cancel: CancellationToken,
    on_connect: Option<ConnectHook>,
    on_connection_lost: Option<ConnectionLostHook>,
    auto_reconnect: bool,
    resume_subs: bool,
    order_matters: bool,
}

impl DispatchLoop {
    async fn run(self, mut eventloop: rumqttc::EventLoop) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("mqtt dispatch loop cancelled");
                    break;
                }
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        self.dispatch(publish).await;
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        *self.state.lock() = ServerState::Connected;
                        info!("mqtt reconnected");
                        if self.resume_subs {
                            self.replay_subscriptions().await;
                        }
                        if let Some(hook) = &self.on_connect {
                            hook();
                        }
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        *self.state.lock() = ServerState::Disconnected;
                        warn!("mqtt broker requested disconnect");
                        if let Some(hook) = &self.on_connection_lost {
                            hook("broker disconnect");
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        *self.state.lock() = ServerState::Disconnected;
                        error!(error = %e, "mqtt connection error");
                        if let Some(hook) = &self.on_connection_lost {
                            hook(&e.to_string());
                        }
                        if !self.auto_reconnect {
                            *self.state.lock() = ServerState::Closed;
                            break;
                        }
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }

    /// Re-run every recorded subscription, in registration order
    async fn replay_subscriptions(&self) {
        let snapshot = self.subscriptions.lock().clone();
        for subscription in snapshot {
            if let Err(e) = self
                .client
                .subscribe(&subscription.filter, subscription.qos.into())
                .await
            {
                error!(filter = %subscription.filter, error = %e, "resubscribe failed");
            } else {
                debug!(filter = %subscription.filter, "resubscribed");
            }
        }
    }

    async fn dispatch(&self, publish: rumqttc::Publish) {
        let topic = if publish.topic.starts_with('/') {
            publish.topic.clone()
        } else {
            format!("/{}", publish.topic)
        };
        let (handler, params) = match self.router.dispatch(&topic) {
            Dispatch::Matched { handler, params } => (handler, params),
            Dispatch::Fallback(handler) => (handler, Params::default()),
            Dispatch::NotFound => {
                debug!(topic = %topic, "no route for topic");
                return;
            }
        };

        let message = Message {
            topic: topic.clone(),
            payload: publish.payload,
            qos: publish.qos as u8,
            retain: publish.retain,
        };
        let ctx = self.pools.lease(
            Some(self.client.clone()),
            message,
            params,
            self.cancel.child_token(),
            self.codec.clone(),
        );

        // a panicking handler must never take the dispatch loop down
        let fut = std::panic::AssertUnwindSafe(handler(ctx)).catch_unwind();
        if self.order_matters {
            if fut.await.is_err() {
                error!(topic = %topic, "handler panicked");
            }
        } else {
            tokio::spawn(async move {
                if fut.await.is_err() {
                    error!(topic = %topic, "handler panicked");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::handler;

    fn test_options(broker_url: &str) -> ServerOptions {
        serde_json::from_value(serde_json::json!({
            "broker_url": broker_url,
            "client_id": "test-client",
        }))
        .unwrap()
    }

    #[test]
    fn test_options_defaults() {
        let options = test_options("tcp://localhost:1883");
        assert!(options.clean_session);
        assert!(options.auto_reconnect);
        assert!(options.resume_subs);
        assert!(options.order_matters);
        assert_eq!(options.connect_timeout_ms, 1000);
        assert_eq!(options.keep_alive_secs, 60);
        assert_eq!(options.disconnect_quiesce_ms, 250);
        assert_eq!(options.username, None);
    }

    #[test]
    fn test_parse_broker_url() {
        assert_eq!(
            parse_broker_url("tcp://broker:1884").unwrap(),
            ("broker".to_string(), 1884)
        );
        assert_eq!(
            parse_broker_url("mqtt://broker.local:1883").unwrap(),
            ("broker.local".to_string(), 1883)
        );
        assert_eq!(
            parse_broker_url("localhost").unwrap(),
            ("localhost".to_string(), 1883)
        );
        assert!(parse_broker_url("http://broker:1883").is_err());
        assert!(parse_broker_url("tcp://").is_err());
        assert!(parse_broker_url("tcp://broker:notaport").is_err());
    }

    #[test]
    fn test_routes_record_subscriptions_in_order() {
        let mut server = MqttServer::new(test_options("tcp://localhost:1883"));
        server
            .route()
            .handle(
                "/sys/:productKey/:deviceName/thing/service/:identifier",
                MqttQos::AtMostOnce,
                handler(|_ctx| async {}),
            )
            .unwrap();
        server
            .route()
            .handle(
                "$share/g1/device/:id/+/post",
                MqttQos::AtLeastOnce,
                handler(|_ctx| async {}),
            )
            .unwrap();

        let subscriptions = server.subscriptions();
        assert_eq!(
            subscriptions,
            vec![
                Subscription {
                    filter: "/sys/+/+/thing/service/+".to_string(),
                    qos: MqttQos::AtMostOnce,
                },
                Subscription {
                    filter: "/device/+/+/post".to_string(),
                    qos: MqttQos::AtLeastOnce,
                },
            ]
        );
    }

    #[test]
    fn test_duplicate_route_rejected() {
        let mut server = MqttServer::new(test_options("tcp://localhost:1883"));
        server
            .route()
            .handle("/a/b", MqttQos::AtMostOnce, handler(|_ctx| async {}))
            .unwrap();
        let err = server
            .route()
            .handle("/a/b", MqttQos::AtMostOnce, handler(|_ctx| async {}))
            .unwrap_err();
        assert!(matches!(err, TransportError::DuplicateRoute { .. }));
    }

    #[tokio::test]
    async fn test_start_failure_is_fatal() {
        // nothing listens on port 1; connect must fail within the wait
        let mut options = test_options("tcp://127.0.0.1:1");
        options.connect_timeout_ms = 500;
        let mut server = MqttServer::new(options);

        let err = server.start().await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::ConnectFailed { .. } | TransportError::ConnectTimeout { .. }
        ));
        assert_eq!(server.state(), ServerState::Closed);
    }

    #[test]
    fn test_qos_mapping_roundtrip() {
        let levels = [MqttQos::AtMostOnce, MqttQos::AtLeastOnce, MqttQos::ExactlyOnce];
        for qos in levels {
            assert_eq!(MqttQos::from(QoS::from(qos)), qos);
        }
        assert_eq!(MqttQos::default(), MqttQos::AtLeastOnce);
    }
}
