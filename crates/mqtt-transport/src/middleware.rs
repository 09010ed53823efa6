//! Middleware: ordered handler-wrapping pipeline.
//!
//! A middleware receives a handler and returns a new handler with extra
//! behavior. The server collects middlewares in configuration order and
//! wraps user handlers so that the first-registered middleware runs
//! outermost.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::router::{handler, Handler};

/// A function that wraps a handler, producing a new handler
pub type Middleware = Arc<dyn Fn(Handler) -> Handler + Send + Sync>;

/// Compose `middlewares` around `handler`. Iterates in reverse so the
/// first middleware in the slice ends up outermost.
pub fn chain(middlewares: &[Middleware], handler: Handler) -> Handler {
    let mut next = handler;
    for middleware in middlewares.iter().rev() {
        next = middleware(next);
    }
    next
}

/// Build a [`Middleware`] from a wrapping function
pub fn middleware<F>(f: F) -> Middleware
where
    F: Fn(Handler) -> Handler + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Stock middleware logging each dispatched message with its topic,
/// payload size and handling time.
pub fn logging() -> Middleware {
    middleware(|next: Handler| {
        handler(move |ctx| {
            let next = next.clone();
            async move {
                let topic = ctx.message().topic.clone();
                let size = ctx.message().payload.len();
                let started = Instant::now();
                next(ctx).await;
                debug!(
                    topic = %topic,
                    size = size,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "message handled"
                );
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::context::{Message, Pools};
    use crate::router::{Params, ParamsPool};
    use parking_lot::Mutex;
    use tokio_util::sync::CancellationToken;

    fn empty_context() -> crate::context::Context {
        let pools = Pools::new(Arc::new(ParamsPool::default()));
        pools.lease(
            None,
            Message::default(),
            Params::default(),
            CancellationToken::new(),
            Arc::new(JsonCodec),
        )
    }

    fn recording(tag: &'static str, log: Arc<Mutex<Vec<String>>>) -> Middleware {
        middleware(move |next: Handler| {
            let log = log.clone();
            handler(move |ctx| {
                let next = next.clone();
                let log = log.clone();
                async move {
                    log.lock().push(format!("{tag}:before"));
                    next(ctx).await;
                    log.lock().push(format!("{tag}:after"));
                }
            })
        })
    }

    #[tokio::test]
    async fn test_first_registered_runs_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let inner_log = log.clone();
        let user = handler(move |_ctx| {
            let log = inner_log.clone();
            async move {
                log.lock().push("handler".to_string());
            }
        });

        let chained = chain(
            &[recording("first", log.clone()), recording("second", log.clone())],
            user,
        );
        chained(empty_context()).await;

        assert_eq!(
            *log.lock(),
            vec![
                "first:before",
                "second:before",
                "handler",
                "second:after",
                "first:after"
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_chain_is_identity() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let inner_log = log.clone();
        let user = handler(move |_ctx| {
            let log = inner_log.clone();
            async move {
                log.lock().push("handler".to_string());
            }
        });

        let chained = chain(&[], user);
        chained(empty_context()).await;
        assert_eq!(*log.lock(), vec!["handler"]);
    }
}
