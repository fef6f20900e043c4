//! Convenient imports for typical `ormguard` usage.
//!
//! ```ignore
//! use ormguard::prelude::*;
//! ```

pub use crate::{
    Action, Behavior, DataClient, DataClientExt, EncryptionConfig, EnhancedClient,
    EnhancementOptions, Enhancer, Identity, ModelMeta, OrmError, OrmResult, enhance,
};
pub use crate::handlers::{ModelPolicy, PolicyDescriptor, Rule};
