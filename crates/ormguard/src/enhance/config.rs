//! Enhancement options.

use crate::error::{OrmError, OrmResult};
use crate::handlers::{FieldCipher, PolicyDescriptor, PrivilegedWrite};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// A behavior layer that can be enabled on an enhanced client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Behavior {
    Delegate,
    Encryption,
    Password,
    Defaults,
    Policy,
}

impl Behavior {
    /// Every behavior, innermost layer first.
    pub const ALL: [Behavior; 5] = [
        Behavior::Delegate,
        Behavior::Encryption,
        Behavior::Password,
        Behavior::Defaults,
        Behavior::Policy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Behavior::Delegate => "delegate",
            Behavior::Encryption => "encryption",
            Behavior::Password => "password",
            Behavior::Defaults => "defaults",
            Behavior::Policy => "policy",
        }
    }
}

impl fmt::Display for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How encrypted fields are encrypted.
#[derive(Clone)]
pub enum EncryptionConfig {
    /// AES-256-GCM with a 32-byte key. Values written under any of the
    /// decryption keys are still readable.
    Keys {
        encryption_key: Vec<u8>,
        decryption_keys: Vec<Vec<u8>>,
    },
    /// A caller-provided cipher.
    Custom(Arc<dyn FieldCipher>),
}

impl EncryptionConfig {
    /// Encrypt with `key`.
    pub fn key(key: impl Into<Vec<u8>>) -> Self {
        EncryptionConfig::Keys {
            encryption_key: key.into(),
            decryption_keys: Vec::new(),
        }
    }

    /// Use a custom cipher.
    pub fn custom(cipher: Arc<dyn FieldCipher>) -> Self {
        EncryptionConfig::Custom(cipher)
    }

    /// Also accept values encrypted under a previous key.
    ///
    /// Has no effect on a custom cipher.
    pub fn with_decryption_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        if let EncryptionConfig::Keys {
            decryption_keys, ..
        } = &mut self
        {
            decryption_keys.push(key.into());
        }
        self
    }

    pub(crate) fn build_cipher(&self) -> OrmResult<Arc<dyn FieldCipher>> {
        match self {
            EncryptionConfig::Custom(cipher) => Ok(cipher.clone()),
            #[cfg(feature = "encryption")]
            EncryptionConfig::Keys {
                encryption_key,
                decryption_keys,
            } => {
                let mut cipher = crate::handlers::AesGcmCipher::new(encryption_key)?;
                for key in decryption_keys {
                    cipher = cipher.with_decryption_key(key)?;
                }
                Ok(Arc::new(cipher))
            }
            #[cfg(not(feature = "encryption"))]
            EncryptionConfig::Keys { .. } => Err(OrmError::configuration(
                "key-based encryption requires the `encryption` feature",
            )),
        }
    }
}

impl fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncryptionConfig::Keys {
                decryption_keys, ..
            } => f
                .debug_struct("Keys")
                .field("encryption_key", &"<redacted>")
                .field("decryption_keys", &decryption_keys.len())
                .finish(),
            EncryptionConfig::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Options of an enhanced client. Every behavior is enabled by default.
///
/// ```ignore
/// let options = EnhancementOptions::new()
///     .behaviors([Behavior::Defaults, Behavior::Policy])
///     .policy(PolicyDescriptor::from_json(policy_json)?);
/// ```
#[derive(Clone)]
pub struct EnhancementOptions {
    behaviors: Vec<Behavior>,
    encryption: Option<EncryptionConfig>,
    policy: Option<Arc<PolicyDescriptor>>,
    privileged_write: Option<Arc<dyn PrivilegedWrite>>,
}

impl Default for EnhancementOptions {
    fn default() -> Self {
        Self {
            behaviors: Behavior::ALL.to_vec(),
            encryption: None,
            policy: None,
            privileged_write: None,
        }
    }
}

impl EnhancementOptions {
    /// Create options with every behavior enabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable exactly these behaviors.
    pub fn behaviors(mut self, behaviors: impl IntoIterator<Item = Behavior>) -> Self {
        self.behaviors.clear();
        for behavior in behaviors {
            if !self.behaviors.contains(&behavior) {
                self.behaviors.push(behavior);
            }
        }
        self
    }

    /// Disable one behavior.
    pub fn without(mut self, behavior: Behavior) -> Self {
        self.behaviors.retain(|b| *b != behavior);
        self
    }

    /// Set the encryption configuration.
    pub fn encryption(mut self, config: EncryptionConfig) -> Self {
        self.encryption = Some(config);
        self
    }

    /// Set the access policies.
    pub fn policy(mut self, policy: impl Into<Arc<PolicyDescriptor>>) -> Self {
        self.policy = Some(policy.into());
        self
    }

    /// Replace the predicate deciding which creates may set foreign keys
    /// directly.
    pub fn privileged_write(mut self, predicate: Arc<dyn PrivilegedWrite>) -> Self {
        self.privileged_write = Some(predicate);
        self
    }

    pub fn is_enabled(&self, behavior: Behavior) -> bool {
        self.behaviors.contains(&behavior)
    }

    /// Enabled behaviors, in the order they were given.
    pub fn enabled(&self) -> &[Behavior] {
        &self.behaviors
    }

    pub fn encryption_config(&self) -> Option<&EncryptionConfig> {
        self.encryption.as_ref()
    }

    pub fn policy_descriptor(&self) -> Option<&Arc<PolicyDescriptor>> {
        self.policy.as_ref()
    }

    pub fn privileged_write_predicate(&self) -> Option<&Arc<dyn PrivilegedWrite>> {
        self.privileged_write.as_ref()
    }

    /// Build options from a behavior descriptor document.
    pub fn from_descriptor(descriptor: BehaviorDescriptor) -> OrmResult<Self> {
        let mut options = Self::new();
        if let Some(behaviors) = descriptor.behaviors {
            options = options.behaviors(behaviors);
        }
        if let Some(policy) = descriptor.policy {
            options = options.policy(policy);
        }
        if let Some(keys) = descriptor.encryption {
            options = options.encryption(keys.into_config()?);
        }
        Ok(options)
    }

    /// Parse a behavior descriptor document and build options from it.
    pub fn from_json(value: Value) -> OrmResult<Self> {
        Self::from_descriptor(serde_json::from_value(value)?)
    }
}

impl fmt::Debug for EnhancementOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnhancementOptions")
            .field("behaviors", &self.behaviors)
            .field("encryption", &self.encryption)
            .field("policy", &self.policy.as_ref().map(|p| p.models.len()))
            .field("privileged_write", &self.privileged_write.is_some())
            .finish()
    }
}

/// Serialized form of [`EnhancementOptions`].
///
/// ```json
/// {
///   "behaviors": ["delegate", "encryption", "defaults", "policy"],
///   "encryption": {"encryptionKey": "<base64>", "decryptionKeys": ["<base64>"]},
///   "policy": {"models": {"Post": {"read": {"kind": "allow"}}}}
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorDescriptor {
    /// Enabled behaviors; every behavior when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behaviors: Option<Vec<Behavior>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<EncryptionKeys>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicyDescriptor>,
}

/// Base64-encoded encryption keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionKeys {
    pub encryption_key: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub decryption_keys: Vec<String>,
}

impl EncryptionKeys {
    #[cfg(feature = "encryption")]
    fn into_config(self) -> OrmResult<EncryptionConfig> {
        use base64::Engine;
        use base64::engine::general_purpose::STANDARD;

        let decode = |key: &str| {
            STANDARD
                .decode(key)
                .map_err(|err| OrmError::configuration(format!("invalid base64 key: {err}")))
        };
        let mut config = EncryptionConfig::key(decode(&self.encryption_key)?);
        for key in &self.decryption_keys {
            config = config.with_decryption_key(decode(key)?);
        }
        Ok(config)
    }

    #[cfg(not(feature = "encryption"))]
    fn into_config(self) -> OrmResult<EncryptionConfig> {
        Err(OrmError::configuration(
            "encryption keys require the `encryption` feature",
        ))
    }
}
