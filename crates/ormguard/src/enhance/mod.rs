//! Enhancement assembly.
//!
//! An [`Enhancer`] validates the options once and stacks the enabled
//! behavior layers over the raw client, innermost first:
//!
//! ```text
//! policy -> defaults -> password -> encryption -> delegate -> raw client
//! ```
//!
//! Policy is outermost, so rejected writes never reach the other layers and
//! reads are filtered on the flattened, decrypted rows.
//!
//! # Example
//!
//! ```ignore
//! use ormguard::enhance::{Behavior, EnhancementOptions, Enhancer};
//!
//! let enhancer = Enhancer::new(raw, meta, EnhancementOptions::new()
//!     .behaviors([Behavior::Defaults, Behavior::Policy])
//!     .policy(policy))?;
//!
//! let db = enhancer.enhance(Some(Identity::new(json!({"id": "u1"}))));
//! let posts = db.model("Post").find_many(json!({})).await?;
//! ```

mod config;


pub use config::{
    Behavior, BehaviorDescriptor, EncryptionConfig, EncryptionKeys, EnhancementOptions,
};

use crate::client::{Action, DataClient, ModelHandle};
use crate::error::{OrmError, OrmResult};
use crate::handlers::{
    DefaultAuthHandler, DelegateHandler, EncryptionHandler, PolicyDescriptor, PolicyHandler,
};
use crate::identity::Identity;
use crate::meta::ModelMeta;
use crate::proxy::{Handler, ProxyClient};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

struct Assembly {
    raw: Arc<dyn DataClient>,
    meta: Arc<ModelMeta>,
    /// Innermost first.
    layers: Vec<Arc<dyn Handler>>,
}

/// Builds enhanced clients for a validated set of options.
///
/// Cloning is cheap; clones share the layers.
#[derive(Clone)]
pub struct Enhancer {
    assembly: Arc<Assembly>,
}

impl Enhancer {
    /// Validate `options` against `meta` and prepare the layers.
    pub fn new(
        raw: Arc<dyn DataClient>,
        meta: Arc<ModelMeta>,
        options: EnhancementOptions,
    ) -> OrmResult<Self> {
        let mut layers = Vec::new();
        for behavior in Behavior::ALL {
            if options.is_enabled(behavior) {
                layers.push(build_layer(behavior, &meta, &options)?);
            }
        }
        tracing::debug!(
            target: "ormguard::enhance",
            layers = ?layers.iter().map(|l| l.name()).collect::<Vec<_>>(),
            models = meta.len(),
            "enhancer configured"
        );
        Ok(Self {
            assembly: Arc::new(Assembly { raw, meta, layers }),
        })
    }

    /// Names of the enabled layers, innermost first.
    pub fn layer_names(&self) -> Vec<&'static str> {
        self.assembly.layers.iter().map(|l| l.name()).collect()
    }

    pub fn meta(&self) -> &Arc<ModelMeta> {
        &self.assembly.meta
    }

    /// Build a client acting for `identity` (anonymous when `None`).
    pub fn enhance(&self, identity: Option<Identity>) -> EnhancedClient {
        let identity = identity.map(Arc::new);
        let mut client = self.assembly.raw.clone();
        for layer in &self.assembly.layers {
            let proxy: Arc<dyn DataClient> = Arc::new(
                ProxyClient::new(client, self.assembly.meta.clone(), layer.clone())
                    .with_identity(identity.clone()),
            );
            client = proxy;
        }
        EnhancedClient {
            client,
            enhancer: self.clone(),
            identity,
        }
    }
}

fn build_layer(
    behavior: Behavior,
    meta: &ModelMeta,
    options: &EnhancementOptions,
) -> OrmResult<Arc<dyn Handler>> {
    let layer: Arc<dyn Handler> = match behavior {
        Behavior::Delegate => Arc::new(DelegateHandler::new()),
        Behavior::Encryption => {
            let config = options.encryption_config().ok_or_else(|| {
                OrmError::configuration("the encryption behavior requires an encryption config")
            })?;
            Arc::new(EncryptionHandler::new(config.build_cipher()?))
        }
        Behavior::Password => password_layer()?,
        Behavior::Defaults => {
            let handler = DefaultAuthHandler::new();
            match options.privileged_write_predicate() {
                Some(predicate) => Arc::new(handler.with_privileged_write(predicate.clone())),
                None => Arc::new(handler),
            }
        }
        Behavior::Policy => {
            let policy = options.policy_descriptor().ok_or_else(|| {
                OrmError::configuration("the policy behavior requires a policy descriptor")
            })?;
            validate_policy(meta, policy)?;
            Arc::new(PolicyHandler::new(policy.clone()))
        }
    };
    Ok(layer)
}

#[cfg(feature = "password")]
fn password_layer() -> OrmResult<Arc<dyn Handler>> {
    Ok(Arc::new(crate::handlers::PasswordHandler::new()))
}

#[cfg(not(feature = "password"))]
fn password_layer() -> OrmResult<Arc<dyn Handler>> {
    Err(OrmError::configuration(
        "the password behavior requires the `password` feature",
    ))
}

/// Every policy entry must name a known model and known fields.
fn validate_policy(meta: &ModelMeta, policy: &PolicyDescriptor) -> OrmResult<()> {
    for (name, model_policy) in &policy.models {
        let model = meta.model(name).ok_or_else(|| {
            OrmError::configuration(format!("policy references unknown model '{name}'"))
        })?;
        if let Some(field) = model_policy.fields.keys().find(|f| !model.has_field(f)) {
            return Err(OrmError::configuration(format!(
                "policy references unknown field '{name}.{field}'"
            )));
        }
    }
    Ok(())
}

/// A client with the enabled behaviors applied for one identity.
#[derive(Clone)]
pub struct EnhancedClient {
    client: Arc<dyn DataClient>,
    enhancer: Enhancer,
    identity: Option<Arc<Identity>>,
}

impl EnhancedClient {
    /// Handle for one model.
    pub fn model(&self, name: impl Into<String>) -> ModelHandle<'_> {
        ModelHandle::new(self, name)
    }

    /// The identity this client acts for.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_deref()
    }

    /// A new client with the same behaviors acting for another identity.
    /// This client is unaffected.
    pub fn with_identity(&self, identity: Option<Identity>) -> EnhancedClient {
        self.enhancer.enhance(identity)
    }

    pub fn enhancer(&self) -> &Enhancer {
        &self.enhancer
    }
}

#[async_trait]
impl DataClient for EnhancedClient {
    async fn call(&self, model: &str, action: Action, args: Value) -> OrmResult<Value> {
        self.client.call(model, action, args).await
    }
}

/// Validate `options` and build one enhanced client.
pub fn enhance(
    raw: Arc<dyn DataClient>,
    meta: Arc<ModelMeta>,
    options: EnhancementOptions,
    identity: Option<Identity>,
) -> OrmResult<EnhancedClient> {
    Ok(Enhancer::new(raw, meta, options)?.enhance(identity))
}
