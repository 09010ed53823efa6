//! Topic router: registration, normalization and dispatch.
//!
//! The router owns the pattern trie, a pool of reusable parameter lists
//! and an optional fallback handler for unmatched topics. Registration
//! happens before the server starts; dispatch is read-only afterwards, so
//! the hot path takes no locks beyond the parameter pool.

use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::context::Context;
use crate::error::TransportError;
use crate::trie::{count_params, parse_segments, subscribe_filter, Node};

/// A registered message handler. Receives an owned [`Context`]; when the
/// handler future completes and the context drops, its parameter list and
/// pooled internals are recycled.
pub type Handler = Arc<dyn Fn(Context) -> BoxFuture<'static, ()> + Send + Sync>;

/// Build a [`Handler`] from an async closure.
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Ordered topic parameters extracted by the router.
///
/// The order mirrors the wildcard positions of the registered pattern, so
/// reading by index is stable; `by_name` returns the first match.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Params {
    pairs: Vec<(String, String)>,
}

impl Params {
    /// Value of the first parameter whose key matches `name`
    pub fn by_name(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub(crate) fn push(&mut self, key: String, value: String) {
        self.pairs.push((key, value));
    }

    pub(crate) fn pop(&mut self) {
        self.pairs.pop();
    }

    pub(crate) fn clear(&mut self) {
        self.pairs.clear();
    }

    fn reserve_total(&mut self, capacity: usize) {
        if self.pairs.capacity() < capacity {
            self.pairs.reserve(capacity - self.pairs.capacity());
        }
    }
}

/// Pool of parameter lists, sized to the largest wildcard count seen at
/// registration. Leased lists are returned when the request context drops.
#[derive(Default)]
pub(crate) struct ParamsPool {
    free: Mutex<Vec<Params>>,
}

impl ParamsPool {
    pub(crate) fn lease(&self, capacity: usize) -> Params {
        let mut params = self.free.lock().pop().unwrap_or_default();
        params.clear();
        params.reserve_total(capacity);
        params
    }

    pub(crate) fn give_back(&self, mut params: Params) {
        params.clear();
        self.free.lock().push(params);
    }

    #[cfg(test)]
    pub(crate) fn idle(&self) -> usize {
        self.free.lock().len()
    }
}

/// Dispatch outcome for one topic
pub enum Dispatch {
    /// A registered route matched; params are leased from the router pool
    Matched { handler: Handler, params: Params },
    /// No route matched but a fallback handler is installed
    Fallback(Handler),
    /// No route and no fallback
    NotFound,
}

/// Strip broker-side shared-subscription markers and force a leading `/`.
///
/// `$share/<group>/a/b` becomes `/a/b`; `$queue/a/b` becomes `/a/b`.
pub(crate) fn normalize_pattern(pattern: &str) -> Result<String, TransportError> {
    if pattern.is_empty() {
        return Err(TransportError::EmptyPattern);
    }
    let mut topic = pattern.to_string();
    if let Some(rest) = topic.strip_prefix("$share/") {
        match rest.split_once('/') {
            Some((_, tail)) if !tail.is_empty() => topic = tail.to_string(),
            _ => {
                return Err(TransportError::InvalidShare {
                    pattern: pattern.to_string(),
                })
            }
        }
    } else if let Some(rest) = topic.strip_prefix("$queue/") {
        if rest.is_empty() {
            return Err(TransportError::EmptyPattern);
        }
        topic = rest.to_string();
    }
    if !topic.starts_with('/') {
        topic.insert(0, '/');
    }
    Ok(topic)
}

/// Wildcard-aware topic router
pub struct Router {
    root: Node<Handler>,
    pool: Arc<ParamsPool>,
    max_params: usize,
    fallback: Option<Handler>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            root: Node::root(),
            pool: Arc::new(ParamsPool::default()),
            max_params: 0,
            fallback: None,
        }
    }

    /// Register a handler for a topic pattern.
    ///
    /// Returns the broker subscription filter derived from the pattern
    /// (`:name` -> `+`, `*name` -> `#`) so the owning server can subscribe.
    pub fn handle(&mut self, pattern: &str, handler: Handler) -> Result<String, TransportError> {
        let normalized = normalize_pattern(pattern)?;
        let segments = parse_segments(&normalized)?;
        let filter = subscribe_filter(&segments);
        self.root.insert(&segments, &normalized, handler)?;
        self.max_params = self.max_params.max(count_params(&segments));
        Ok(filter)
    }

    /// Install the handler invoked for topics no route matches
    pub fn set_fallback(&mut self, handler: Handler) {
        self.fallback = Some(handler);
    }

    /// Select a handler for an incoming topic and extract its parameters.
    /// Never fails: routing anomalies resolve to the fallback handler.
    pub fn dispatch(&self, topic: &str) -> Dispatch {
        let normalized;
        let topic = if topic.starts_with('/') {
            topic
        } else {
            normalized = format!("/{topic}");
            &normalized
        };
        let parts: Vec<&str> = topic[1..].split('/').collect();
        let mut params = self.pool.lease(self.max_params);
        match self.root.find(&parts, &mut params) {
            Some(handler) => Dispatch::Matched {
                handler: handler.clone(),
                params,
            },
            None => {
                self.pool.give_back(params);
                match &self.fallback {
                    Some(fallback) => Dispatch::Fallback(fallback.clone()),
                    None => Dispatch::NotFound,
                }
            }
        }
    }

    pub(crate) fn params_pool(&self) -> Arc<ParamsPool> {
        self.pool.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn noop() -> Handler {
        handler(|_ctx| async {})
    }

    fn matched(router: &Router, topic: &str) -> Option<Params> {
        match router.dispatch(topic) {
            Dispatch::Matched { params, .. } => Some(params),
            _ => None,
        }
    }

    #[test]
    fn test_normalize_pattern() {
        assert_eq!(normalize_pattern("a/b").unwrap(), "/a/b");
        assert_eq!(normalize_pattern("/a/b").unwrap(), "/a/b");
        assert_eq!(
            normalize_pattern("$share/g1/device/:id/+/post").unwrap(),
            "/device/:id/+/post"
        );
        assert_eq!(normalize_pattern("$queue/a/b").unwrap(), "/a/b");
        assert!(matches!(
            normalize_pattern(""),
            Err(TransportError::EmptyPattern)
        ));
        assert!(matches!(
            normalize_pattern("$share/g1"),
            Err(TransportError::InvalidShare { .. })
        ));
    }

    #[test]
    fn test_shared_subscription_registration() {
        let mut router = Router::new();
        let filter = router
            .handle("$share/g1/device/:id/+/post", noop())
            .unwrap();
        assert_eq!(filter, "/device/+/+/post");

        let params = matched(&router, "/device/42/temp/post").unwrap();
        assert_eq!(params.by_name("id"), Some("42"));
    }

    #[test]
    fn test_dispatch_without_leading_slash() {
        let mut router = Router::new();
        router.handle("/blog/:category/:post", noop()).unwrap();

        let params = matched(&router, "blog/go/routers").unwrap();
        let pairs: Vec<_> = params.iter().collect();
        assert_eq!(pairs, vec![("category", "go"), ("post", "routers")]);
    }

    #[test]
    fn test_unmatched_goes_to_fallback() {
        let mut router = Router::new();
        router.handle("/blog/:category/:post", noop()).unwrap();
        assert!(matches!(
            router.dispatch("/blog/go/routers/comments"),
            Dispatch::NotFound
        ));

        router.set_fallback(noop());
        assert!(matches!(
            router.dispatch("/blog/go/routers/comments"),
            Dispatch::Fallback(_)
        ));
    }

    #[test]
    fn test_params_returned_to_pool_on_fallback() {
        let mut router = Router::new();
        router.handle("/a/:x", noop()).unwrap();
        router.set_fallback(noop());

        let pool = router.params_pool();
        let _ = router.dispatch("/nope/nope/nope");
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_by_name_returns_first_match() {
        let mut params = Params::default();
        params.push("k".into(), "first".into());
        params.push("k".into(), "second".into());
        assert_eq!(params.by_name("k"), Some("first"));
        assert_eq!(params.by_name("missing"), None);
    }

    proptest! {
        #[test]
        fn prop_param_bindings_follow_pattern_order(
            category in "[a-z0-9]{1,12}",
            post in "[a-z0-9]{1,12}",
        ) {
            let mut router = Router::new();
            router.handle("/blog/:category/:post", noop()).unwrap();

            let params = matched(&router, &format!("/blog/{category}/{post}")).unwrap();
            let pairs: Vec<_> = params.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            prop_assert_eq!(pairs, vec![
                ("category".to_string(), category),
                ("post".to_string(), post),
            ]);
        }

        #[test]
        fn prop_catch_all_binds_remainder(
            head in "[a-z]{1,8}",
            tail in proptest::collection::vec("[a-z0-9]{1,8}", 1..4),
        ) {
            let mut router = Router::new();
            router.handle("/data/:head/*rest", noop()).unwrap();

            let topic = format!("/data/{head}/{}", tail.join("/"));
            let params = matched(&router, &topic).unwrap();
            prop_assert_eq!(params.by_name("head"), Some(head.as_str()));
            let rest = tail.join("/");
            prop_assert_eq!(params.by_name("rest"), Some(rest.as_str()));
        }
    }
}
