//! Field encryption.
//!
//! String values written to fields marked [`FieldAttribute::Encrypted`] are
//! encrypted before they reach the wrapped client, and decrypted in every row
//! read back (including rows of included relations).

#[cfg(feature = "encryption")]
mod aes;

#[cfg(feature = "encryption")]
pub use aes::AesGcmCipher;

use crate::error::OrmResult;
use crate::meta::{FieldAttribute, ModelInfo, ModelMeta};
use crate::proxy::{CallContext, Handler, visit_rows};
use crate::visitor::{NestedWriteVisitor, VisitContext, WriteCallbacks};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Encrypts and decrypts single field values.
pub trait FieldCipher: Send + Sync {
    /// Encrypt `plain` for `model.field`.
    fn encrypt(&self, model: &str, field: &str, plain: &str) -> OrmResult<String>;

    /// Decrypt a value previously produced by [`FieldCipher::encrypt`].
    fn decrypt(&self, model: &str, field: &str, cipher: &str) -> OrmResult<String>;
}

/// Applies a [`FieldCipher`] to encrypted fields.
#[derive(Clone)]
pub struct EncryptionHandler {
    cipher: Arc<dyn FieldCipher>,
}

impl EncryptionHandler {
    pub fn new(cipher: Arc<dyn FieldCipher>) -> Self {
        Self { cipher }
    }

    fn decrypt_row(&self, model: &ModelInfo, row: &mut Map<String, Value>) {
        for field in model.fields.values() {
            if !field.has_attribute(FieldAttribute::Encrypted) {
                continue;
            }
            let Some(Value::String(stored)) = row.get_mut(&field.name) else {
                continue;
            };
            match self.cipher.decrypt(&model.name, &field.name, stored) {
                Ok(plain) => *stored = plain,
                Err(err) => {
                    tracing::warn!(
                        target: "ormguard::encryption",
                        model = %model.name,
                        field = %field.name,
                        error = %err,
                        "failed to decrypt field, returning stored value"
                    );
                }
            }
        }
    }
}

#[async_trait]
impl Handler for EncryptionHandler {
    fn name(&self) -> &'static str {
        "encryption"
    }

    async fn preprocess(&self, ctx: &CallContext<'_>, mut args: Value) -> OrmResult<Value> {
        if !ctx.action.has_write_payload() {
            return Ok(args);
        }
        let mut encrypt = EncryptValues {
            meta: ctx.meta,
            cipher: self.cipher.as_ref(),
        };
        NestedWriteVisitor::new(ctx.meta)
            .visit(ctx.model, ctx.action, &mut args, &mut encrypt)
            .await?;
        Ok(args)
    }

    async fn postprocess(
        &self,
        ctx: &CallContext<'_>,
        args: &Value,
        mut result: Value,
    ) -> OrmResult<Value> {
        if !(ctx.action.returns_row() || ctx.action.returns_rows()) {
            return Ok(result);
        }
        let model = ctx.model_info()?;
        visit_rows(ctx.meta, model, args, &mut result, &mut |model, row| {
            self.decrypt_row(model, row);
            Ok(())
        })?;
        Ok(result)
    }
}

struct EncryptValues<'a> {
    meta: &'a ModelMeta,
    cipher: &'a dyn FieldCipher,
}

impl EncryptValues<'_> {
    fn encrypt_payload(&self, model_name: &str, data: &mut Map<String, Value>) -> OrmResult<()> {
        let model = self.meta.require_model(model_name)?;
        for field in model.fields.values() {
            if !field.has_attribute(FieldAttribute::Encrypted) {
                continue;
            }
            // Plain value, or the `{ set: value }` update form.
            let target = match data.get_mut(&field.name) {
                Some(Value::Object(op)) => op.get_mut("set"),
                other => other,
            };
            if let Some(Value::String(plain)) = target {
                *plain = self.cipher.encrypt(&model.name, &field.name, plain)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<'a> WriteCallbacks for EncryptValues<'a> {
    async fn create(&mut self, ctx: &VisitContext, data: &mut Map<String, Value>) -> OrmResult<()> {
        self.encrypt_payload(&ctx.model, data)
    }

    async fn update(&mut self, ctx: &VisitContext, data: &mut Map<String, Value>) -> OrmResult<()> {
        self.encrypt_payload(&ctx.model, data)
    }
}
