//! Behavior layers.
//!
//! Each handler implements [`Handler`](crate::proxy::Handler) for one
//! behavior. [`crate::enhance`] stacks the enabled ones in a fixed order.

pub mod defaults;
pub mod delegate;
pub mod encryption;
#[cfg(feature = "password")]
pub mod password;
pub mod policy;
mod privileged;

pub use defaults::DefaultAuthHandler;
pub use delegate::DelegateHandler;
#[cfg(feature = "encryption")]
pub use encryption::AesGcmCipher;
pub use encryption::{EncryptionHandler, FieldCipher};
#[cfg(feature = "password")]
pub use password::{PasswordHandler, hash_password, verify_password};
pub use policy::{
    FieldPolicy, Guard, ModelPolicy, PolicyDescriptor, PolicyHandler, PolicyOperation, Rule,
};
pub use privileged::{PrivilegedWrite, UncheckedInputDetector};
