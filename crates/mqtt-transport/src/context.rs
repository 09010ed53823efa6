//! Per-message request context.
//!
//! A context bundles everything a handler needs for one inbound message:
//! the broker client for publishing, the message itself, the parameter
//! list borrowed from the router pool, a cancellation token derived from
//! the server and the codec. Contexts are pooled; dropping one clears its
//! fields and recycles both the context and its parameter list.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, QoS};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::codec::{reply_topic, Codec};
use crate::error::TransportError;
use crate::router::{Params, ParamsPool};

/// Inbound MQTT message as seen by handlers
#[derive(Debug, Clone, Default)]
pub struct Message {
    /// Topic the message was published to, normalized with a leading `/`
    pub topic: String,

    /// Raw payload
    pub payload: Bytes,

    /// QoS the broker delivered with
    pub qos: u8,

    /// Retain flag
    pub retain: bool,
}

struct ContextInner {
    client: Option<AsyncClient>,
    message: Message,
    params: Option<Params>,
    cancel: CancellationToken,
    codec: Option<Arc<dyn Codec>>,
}

impl ContextInner {
    fn empty() -> Self {
        Self {
            client: None,
            message: Message::default(),
            params: None,
            cancel: CancellationToken::new(),
            codec: None,
        }
    }

    // drop every reference so a pooled context cannot leak a message
    fn clear(&mut self) {
        self.client = None;
        self.message = Message::default();
        self.params = None;
        self.cancel = CancellationToken::new();
        self.codec = None;
    }
}

/// Shared pools for contexts and their parameter lists
pub(crate) struct Pools {
    params: Arc<ParamsPool>,
    contexts: Mutex<Vec<Box<ContextInner>>>,
}

impl Pools {
    pub(crate) fn new(params: Arc<ParamsPool>) -> Arc<Self> {
        Arc::new(Self {
            params,
            contexts: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn lease(
        self: &Arc<Self>,
        client: Option<AsyncClient>,
        message: Message,
        params: Params,
        cancel: CancellationToken,
        codec: Arc<dyn Codec>,
    ) -> Context {
        let mut inner = self
            .contexts
            .lock()
            .pop()
            .unwrap_or_else(|| Box::new(ContextInner::empty()));
        inner.client = client;
        inner.message = message;
        inner.params = Some(params);
        inner.cancel = cancel;
        inner.codec = Some(codec);
        Context {
            inner: Some(inner),
            pools: self.clone(),
        }
    }

    #[cfg(test)]
    pub(crate) fn idle_contexts(&self) -> usize {
        self.contexts.lock().len()
    }
}

/// Request context handed to handlers.
///
/// Owned by exactly one handler invocation; dropping it returns the
/// parameter list to the router pool and the context to the context pool.
pub struct Context {
    inner: Option<Box<ContextInner>>,
    pools: Arc<Pools>,
}

impl Context {
    fn inner(&self) -> &ContextInner {
        self.inner.as_ref().expect("context used after release")
    }

    /// Broker client handle, `None` when the server is not connected
    pub fn client(&self) -> Option<&AsyncClient> {
        self.inner().client.as_ref()
    }

    /// The inbound message
    pub fn message(&self) -> &Message {
        &self.inner().message
    }

    /// Parameters extracted by the router, in pattern wildcard order
    pub fn params(&self) -> &Params {
        self.inner()
            .params
            .as_ref()
            .expect("context used after release")
    }

    /// Cancellation token derived from the server context
    pub fn cancellation(&self) -> &CancellationToken {
        &self.inner().cancel
    }

    fn codec(&self) -> &Arc<dyn Codec> {
        self.inner()
            .codec
            .as_ref()
            .expect("context used after release")
    }

    /// Decode the message payload into `target`'s type. An empty payload
    /// yields the type's default value.
    pub fn bind<T>(&self) -> Result<T, TransportError>
    where
        T: DeserializeOwned + Default,
    {
        let value = self.codec().decode(&self.inner().message.payload)?;
        if value.is_null() {
            return Ok(T::default());
        }
        serde_json::from_value(value).map_err(|e| TransportError::Decode(e.to_string()))
    }

    /// Decode the topic parameters, treated as URL-encoded form data, into
    /// `target`'s fields by name.
    pub fn bind_vars<T>(&self) -> Result<T, TransportError>
    where
        T: DeserializeOwned,
    {
        let pairs: Vec<(&str, &str)> = self.params().iter().collect();
        let query = serde_urlencoded::to_string(&pairs)
            .map_err(|e| TransportError::BindVars(e.to_string()))?;
        serde_urlencoded::from_str(&query).map_err(|e| TransportError::BindVars(e.to_string()))
    }

    /// Encode a reply value. `None` is a successful no-op.
    pub fn encode<T: Serialize>(&self, value: Option<&T>) -> Result<Option<Vec<u8>>, TransportError> {
        let Some(value) = value else {
            return Ok(None);
        };
        let value =
            serde_json::to_value(value).map_err(|e| TransportError::Encode(e.to_string()))?;
        self.codec().encode(&value).map(Some)
    }

    /// Encode an error into the structured reply body
    pub fn encode_err(&self, err: &TransportError) -> Vec<u8> {
        self.codec().encode_error(err)
    }

    /// Encode and publish a reply on the derived reply topic.
    /// A `None` value publishes nothing.
    pub async fn reply<T: Serialize>(&self, value: Option<&T>) -> Result<(), TransportError> {
        let Some(body) = self.encode(value)? else {
            return Ok(());
        };
        self.publish_reply(body).await
    }

    /// Encode and publish an error reply on the derived reply topic
    pub async fn reply_err(&self, err: &TransportError) -> Result<(), TransportError> {
        let body = self.encode_err(err);
        self.publish_reply(body).await
    }

    async fn publish_reply(&self, body: Vec<u8>) -> Result<(), TransportError> {
        let topic = reply_topic(&self.inner().message.topic);
        let client = self.client().ok_or(TransportError::NotConnected)?;
        debug!(topic = %topic, size = body.len(), "publishing reply");
        client
            .publish(topic, QoS::AtMostOnce, false, body)
            .await?;
        Ok(())
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            if let Some(params) = inner.params.take() {
                self.pools.params.give_back(params);
            }
            inner.clear();
            self.pools.contexts.lock().push(inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use serde::Deserialize;

    fn test_context(topic: &str, payload: &[u8], params: Params) -> Context {
        let pool = Arc::new(ParamsPool::default());
        let pools = Pools::new(pool);
        pools.lease(
            None,
            Message {
                topic: topic.to_string(),
                payload: Bytes::copy_from_slice(payload),
                qos: 0,
                retain: false,
            },
            params,
            CancellationToken::new(),
            Arc::new(JsonCodec),
        )
    }

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct SetRequest {
        id: String,
        method: String,
    }

    #[test]
    fn test_bind_json_payload() {
        let ctx = test_context(
            "/sys/pk/dev/thing/service/property/set",
            br#"{"id":"1","method":"thing.service.property.set"}"#,
            Params::default(),
        );
        let req: SetRequest = ctx.bind().unwrap();
        assert_eq!(req.id, "1");
        assert_eq!(req.method, "thing.service.property.set");
    }

    #[test]
    fn test_bind_empty_payload_is_default() {
        let ctx = test_context("/sys/a/b", b"", Params::default());
        let req: SetRequest = ctx.bind().unwrap();
        assert_eq!(req, SetRequest::default());
    }

    #[test]
    fn test_bind_malformed_payload() {
        let ctx = test_context("/sys/a/b", b"{oops", Params::default());
        let err = ctx.bind::<SetRequest>().unwrap_err();
        assert!(matches!(err, TransportError::Decode(_)));
    }

    #[derive(Debug, Deserialize)]
    struct TopicVars {
        product_key: String,
        device_name: String,
    }

    #[test]
    fn test_bind_vars_from_params() {
        let mut params = Params::default();
        params.push("product_key".into(), "pk1".into());
        params.push("device_name".into(), "dev A".into());

        let ctx = test_context("/sys/pk1/devA/thing/service/get", b"", params);
        let vars: TopicVars = ctx.bind_vars().unwrap();
        assert_eq!(vars.product_key, "pk1");
        assert_eq!(vars.device_name, "dev A");
    }

    #[test]
    fn test_encode_none_is_noop() {
        let ctx = test_context("/sys/a/b", b"", Params::default());
        assert!(ctx.encode(None::<&serde_json::Value>).unwrap().is_none());
    }

    #[test]
    fn test_reply_without_client_fails() {
        let ctx = test_context("/sys/a/b", b"", Params::default());
        let err = tokio_test::block_on(ctx.reply(Some(&serde_json::json!({"ok": true}))))
            .unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }

    #[test]
    fn test_drop_recycles_context_and_params() {
        let pool = Arc::new(ParamsPool::default());
        let pools = Pools::new(pool.clone());
        let mut params = Params::default();
        params.push("k".into(), "v".into());

        let ctx = pools.lease(
            None,
            Message::default(),
            params,
            CancellationToken::new(),
            Arc::new(JsonCodec),
        );
        drop(ctx);

        assert_eq!(pools.idle_contexts(), 1);
        assert_eq!(pool.idle(), 1);
    }
}
