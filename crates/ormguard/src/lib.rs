//! # ormguard
//!
//! Declarative behaviors layered over a generated data client.
//!
//! ## Features
//!
//! - **Access policies**: row and field level rules, pushed into `where`
//!   clauses or checked on payloads and returned rows
//! - **Field encryption**: AES-256-GCM with key rotation
//! - **Password hashing**: Argon2 hashes written in place of plain values
//! - **Auth defaults**: `@default(auth().id)` values filled from the caller
//!   identity, at any depth of a nested write
//! - **Delegate models**: model inheritance emulated over linked rows
//!
//! Every behavior is a [`Handler`](proxy::Handler) wrapped around a
//! [`DataClient`] by a [`ProxyClient`](proxy::ProxyClient). The
//! [`Enhancer`] stacks the enabled ones in a fixed order.
//!
//! ```ignore
//! use ormguard::prelude::*;
//!
//! let meta = Arc::new(ModelMeta::from_registrations()?);
//! let enhancer = Enhancer::new(
//!     raw,
//!     meta,
//!     EnhancementOptions::new()
//!         .without(Behavior::Encryption)
//!         .policy(PolicyDescriptor::from_json(policy_json)?),
//! )?;
//!
//! let db = enhancer.enhance(Some(Identity::new(json!({"id": user_id}))));
//! let post = db
//!     .model("Post")
//!     .create(json!({"data": {"title": "Hello"}}))
//!     .await?;
//! ```

pub mod client;
pub mod enhance;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod meta;
pub mod prelude;
pub mod proxy;
pub mod visitor;

#[cfg(test)]
pub(crate) mod test_support;

pub use client::{Action, DataClient, DataClientExt, ModelHandle, PendingCall};
pub use enhance::{
    Behavior, BehaviorDescriptor, EncryptionConfig, EnhancedClient, EnhancementOptions, Enhancer,
    enhance,
};
pub use error::{OrmError, OrmResult};
pub use identity::Identity;
pub use meta::{FieldInfo, ModelInfo, ModelMeta, ModelRegistration, TypeDefInfo};
pub use proxy::{CallContext, Handler, ProxyClient};
pub use visitor::{NestedWriteVisitor, VisitContext, WriteCallbacks, WriteRole};

// Re-export inventory for generated model registrations
pub use inventory;
