//! Proxy composition layer.
//!
//! A [`ProxyClient`] wraps a [`DataClient`] with one [`Handler`]. Because the
//! proxy is itself a `DataClient`, layers stack: the outermost layer sees the
//! caller's arguments first and the raw client's results last.
//!
//! # Example
//!
//! ```rust,ignore
//! use ormguard::proxy::{CallContext, Handler, ProxyClient};
//!
//! struct Audit;
//!
//! #[async_trait::async_trait]
//! impl Handler for Audit {
//!     fn name(&self) -> &'static str {
//!         "audit"
//!     }
//!
//!     async fn preprocess(&self, ctx: &CallContext<'_>, args: Value) -> OrmResult<Value> {
//!         tracing::info!(model = ctx.model, action = %ctx.action, "call");
//!         Ok(args)
//!     }
//! }
//!
//! let client = ProxyClient::new(raw, meta, Arc::new(Audit));
//! ```

mod shape;


pub use shape::{QueryShape, ShapeRelation, and_filter, and_where, false_filter, visit_rows};

use crate::client::{Action, DataClient};
use crate::error::OrmResult;
use crate::identity::Identity;
use crate::meta::{ModelInfo, ModelMeta};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// What a handler knows about the call being intercepted.
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    /// Target model.
    pub model: &'a str,
    /// Invoked action.
    pub action: &'a Action,
    /// Shared metadata index.
    pub meta: &'a ModelMeta,
    /// Caller identity the enhanced client was built with.
    pub identity: Option<&'a Identity>,
}

impl<'a> CallContext<'a> {
    /// Metadata of the target model.
    pub fn model_info(&self) -> OrmResult<&'a ModelInfo> {
        self.meta.require_model(self.model)
    }
}

/// A behavior layer.
///
/// The default [`Handler::handle`] runs `preprocess`, forwards the rewritten
/// arguments to the next client, then runs `postprocess` on the result.
/// Handlers needing several inner calls override `handle`.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Layer name used in logs.
    fn name(&self) -> &'static str;

    /// Rewrite the call arguments before dispatch.
    async fn preprocess(&self, ctx: &CallContext<'_>, args: Value) -> OrmResult<Value> {
        let _ = ctx;
        Ok(args)
    }

    /// Rewrite the result after dispatch. `args` are the arguments that were
    /// sent to the next client.
    async fn postprocess(
        &self,
        ctx: &CallContext<'_>,
        args: &Value,
        result: Value,
    ) -> OrmResult<Value> {
        let _ = (ctx, args);
        Ok(result)
    }

    /// Intercept one call.
    async fn handle(
        &self,
        ctx: &CallContext<'_>,
        args: Value,
        next: &dyn DataClient,
    ) -> OrmResult<Value> {
        let args = self.preprocess(ctx, args).await?;
        let result = next.call(ctx.model, ctx.action.clone(), args.clone()).await?;
        self.postprocess(ctx, &args, result).await
    }
}

/// A client wrapping `C` with one behavior layer.
pub struct ProxyClient<C> {
    inner: C,
    handler: Arc<dyn Handler>,
    meta: Arc<ModelMeta>,
    identity: Option<Arc<Identity>>,
}

impl<C: DataClient> ProxyClient<C> {
    /// Wrap `inner` with `handler`.
    pub fn new(inner: C, meta: Arc<ModelMeta>, handler: Arc<dyn Handler>) -> Self {
        Self {
            inner,
            handler,
            meta,
            identity: None,
        }
    }

    /// Set the caller identity passed to the handler.
    pub fn with_identity(mut self, identity: Option<Arc<Identity>>) -> Self {
        self.identity = identity;
        self
    }

    /// Name of the wrapped handler.
    pub fn handler_name(&self) -> &'static str {
        self.handler.name()
    }

    /// Get a reference to the inner client.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Get the inner client, consuming this wrapper.
    pub fn into_inner(self) -> C {
        self.inner
    }
}

#[async_trait]
impl<C: DataClient> DataClient for ProxyClient<C> {
    async fn call(&self, model: &str, action: Action, args: Value) -> OrmResult<Value> {
        if let Action::Other(name) = &action {
            tracing::trace!(
                target: "ormguard::proxy",
                layer = self.handler.name(),
                model,
                action = %name,
                "forwarding unrecognized action"
            );
            return self.inner.call(model, action, args).await;
        }

        tracing::debug!(
            target: "ormguard::proxy",
            layer = self.handler.name(),
            model,
            action = %action,
            "intercepting call"
        );
        let ctx = CallContext {
            model,
            action: &action,
            meta: &self.meta,
            identity: self.identity.as_deref(),
        };
        self.handler.handle(&ctx, args, &self.inner).await
    }
}
