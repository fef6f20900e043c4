//! Password hashing for fields marked [`FieldAttribute::Password`].

use crate::error::{OrmError, OrmResult};
use crate::meta::{FieldAttribute, ModelMeta};
use crate::proxy::{CallContext, Handler};
use crate::visitor::{NestedWriteVisitor, VisitContext, WriteCallbacks};
use argon2::Argon2;
use argon2::password_hash::{
    Error as PasswordHashError, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
    rand_core::OsRng,
};
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Hash a password into an Argon2 PHC string.
pub fn hash_password(plain: &str) -> OrmResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|err| OrmError::crypto(format!("failed to hash password: {err}")))?;
    Ok(hash.to_string())
}

/// Check `candidate` against a stored PHC hash.
pub fn verify_password(hash: &str, candidate: &str) -> OrmResult<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|err| OrmError::crypto(format!("invalid stored hash: {err}")))?;
    match Argon2::default().verify_password(candidate.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(PasswordHashError::Password) => Ok(false),
        Err(err) => Err(OrmError::crypto(format!("failed to verify password: {err}"))),
    }
}

/// Replaces password field values with their hash on create and update.
#[derive(Debug, Clone, Copy, Default)]
pub struct PasswordHandler;

impl PasswordHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Handler for PasswordHandler {
    fn name(&self) -> &'static str {
        "password"
    }

    async fn preprocess(&self, ctx: &CallContext<'_>, mut args: Value) -> OrmResult<Value> {
        if !ctx.action.has_write_payload() {
            return Ok(args);
        }
        let mut hasher = HashValues { meta: ctx.meta };
        NestedWriteVisitor::new(ctx.meta)
            .visit(ctx.model, ctx.action, &mut args, &mut hasher)
            .await?;
        Ok(args)
    }
}

struct HashValues<'a> {
    meta: &'a ModelMeta,
}

impl HashValues<'_> {
    fn hash_payload(&self, model: &str, data: &mut Map<String, Value>) -> OrmResult<()> {
        let model = self.meta.require_model(model)?;
        for field in model.fields.values() {
            if !field.has_attribute(FieldAttribute::Password) {
                continue;
            }
            let target = match data.get_mut(&field.name) {
                Some(Value::Object(op)) => op.get_mut("set"),
                other => other,
            };
            if let Some(Value::String(plain)) = target {
                *plain = hash_password(plain)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<'a> WriteCallbacks for HashValues<'a> {
    async fn create(&mut self, ctx: &VisitContext, data: &mut Map<String, Value>) -> OrmResult<()> {
        self.hash_payload(&ctx.model, data)
    }

    async fn update(&mut self, ctx: &VisitContext, data: &mut Map<String, Value>) -> OrmResult<()> {
        self.hash_payload(&ctx.model, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::DataClientExt;
    use crate::proxy::ProxyClient;
    use crate::test_support::{RecordingClient, fixture_meta};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("hunter2").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password(&hash, "hunter2").unwrap());
        assert!(!verify_password(&hash, "hunter3").unwrap());
        assert!(verify_password("not a hash", "x").is_err());
    }

    #[tokio::test]
    async fn test_hashes_create_and_update_payloads() {
        let raw = Arc::new(RecordingClient::new());
        let db = ProxyClient::new(raw.clone(), fixture_meta(), Arc::new(PasswordHandler));

        db.model("User")
            .create(json!({"data": {"id": "u1", "email": "a@b.c", "password": "secret"}}))
            .await
            .unwrap();
        let stored = raw.last_args()["data"]["password"]
            .as_str()
            .unwrap()
            .to_string();
        assert_ne!(stored, "secret");
        assert!(verify_password(&stored, "secret").unwrap());

        db.model("User")
            .update(json!({"where": {"id": "u1"}, "data": {"password": {"set": "next"}}}))
            .await
            .unwrap();
        let stored = raw.last_args()["data"]["password"]["set"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(verify_password(&stored, "next").unwrap());
    }

    #[tokio::test]
    async fn test_reads_untouched() {
        let raw = Arc::new(RecordingClient::new());
        let db = ProxyClient::new(raw.clone(), fixture_meta(), Arc::new(PasswordHandler));
        db.model("User")
            .find_first(json!({"where": {"password": "x"}}))
            .await
            .unwrap();
        assert_eq!(raw.last_args(), json!({"where": {"password": "x"}}));
    }
}
