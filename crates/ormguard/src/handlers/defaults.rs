//! Identity-derived default values (`@default(auth().<path>)`).
//!
//! For every record being created, anywhere in a write tree, fields left
//! unset by the caller receive the value their [`DefaultProvider`] computes
//! from the caller identity. Foreign keys are written through their relation
//! (`author: { connect: { id } }`) unless the record is a privileged write,
//! because the wrapped client rejects mixing relation and raw foreign-key
//! input in checked payloads.

use super::privileged::{PrivilegedWrite, UncheckedInputDetector};
use crate::client::Action;
use crate::error::{OrmError, OrmResult};
use crate::identity::Identity;
use crate::meta::{DefaultProvider, FieldInfo, ModelInfo, ModelMeta, TypeDefInfo};
use crate::proxy::{CallContext, Handler};
use crate::visitor::{NestedWriteVisitor, VisitContext, WriteCallbacks};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

/// Injects identity-derived defaults into create payloads.
#[derive(Clone)]
pub struct DefaultAuthHandler {
    privileged: Arc<dyn PrivilegedWrite>,
}

impl Default for DefaultAuthHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultAuthHandler {
    /// Handler using [`UncheckedInputDetector`] to spot privileged writes.
    pub fn new() -> Self {
        Self {
            privileged: Arc::new(UncheckedInputDetector),
        }
    }

    /// Replace the privileged-write predicate.
    pub fn with_privileged_write(mut self, predicate: Arc<dyn PrivilegedWrite>) -> Self {
        self.privileged = predicate;
        self
    }

    fn applies_to(action: &Action) -> bool {
        matches!(
            action,
            Action::Create
                | Action::CreateMany
                | Action::CreateManyAndReturn
                | Action::Upsert
                | Action::ConnectOrCreate
                | Action::Update
                | Action::UpdateMany
                | Action::UpdateManyAndReturn
        )
    }
}

#[async_trait]
impl Handler for DefaultAuthHandler {
    fn name(&self) -> &'static str {
        "defaults"
    }

    async fn preprocess(&self, ctx: &CallContext<'_>, mut args: Value) -> OrmResult<Value> {
        if !Self::applies_to(ctx.action) {
            return Ok(args);
        }
        let mut injector = DefaultInjector {
            meta: ctx.meta,
            identity: ctx.identity,
            privileged: self.privileged.as_ref(),
        };
        NestedWriteVisitor::new(ctx.meta)
            .visit(ctx.model, ctx.action, &mut args, &mut injector)
            .await?;
        Ok(args)
    }
}

struct DefaultInjector<'a> {
    meta: &'a ModelMeta,
    identity: Option<&'a Identity>,
    privileged: &'a dyn PrivilegedWrite,
}

#[async_trait]
impl<'a> WriteCallbacks for DefaultInjector<'a> {
    async fn create(&mut self, ctx: &VisitContext, data: &mut Map<String, Value>) -> OrmResult<()> {
        let model = self.meta.require_model(&ctx.model)?;
        self.inject(model, ctx, data)
    }
}

/// Whether `relation` links a nested record back to the record it is created
/// under. The wrapped client fills those keys from the parent.
fn links_parent(ctx: &VisitContext, relation: &FieldInfo) -> bool {
    ctx.backlink.as_deref() == Some(relation.name.as_str())
}

impl DefaultInjector<'_> {
    fn inject(
        &self,
        model: &ModelInfo,
        ctx: &VisitContext,
        data: &mut Map<String, Value>,
    ) -> OrmResult<()> {
        // Decided on the caller's payload, before anything is injected.
        let privileged = ctx.batch || self.privileged.is_privileged_write(model, data);
        let mut connected: HashSet<String> = HashSet::new();

        for field in model.fields.values() {
            if field.is_type_def() {
                if let Some(value) = data.get_mut(&field.name) {
                    self.inject_embedded(field, value)?;
                    continue;
                }
            }
            if data.contains_key(&field.name) {
                continue;
            }
            let Some(provider) = &field.default_provider else {
                continue;
            };
            if field.is_foreign_key
                && field
                    .relation_field
                    .as_deref()
                    .and_then(|name| model.get_field(name))
                    .is_some_and(|relation| links_parent(ctx, relation))
            {
                continue;
            }
            let Some(value) = self.compute(&model.name, field, provider)? else {
                continue;
            };

            if field.is_foreign_key {
                self.set_foreign_key(model, field, value, privileged, &mut connected, data)?;
            } else {
                data.insert(field.name.clone(), value);
            }
        }
        Ok(())
    }

    fn compute(
        &self,
        owner: &str,
        field: &FieldInfo,
        provider: &DefaultProvider,
    ) -> OrmResult<Option<Value>> {
        if provider.requires_identity() && self.identity.is_none() {
            return Err(OrmError::validation(format!(
                "default value of '{owner}.{}' requires an authenticated identity",
                field.name
            )));
        }
        Ok(provider.compute(self.identity))
    }

    fn set_foreign_key(
        &self,
        model: &ModelInfo,
        field: &FieldInfo,
        value: Value,
        privileged: bool,
        connected: &mut HashSet<String>,
        data: &mut Map<String, Value>,
    ) -> OrmResult<()> {
        let relation_name = field.relation_field.as_deref().ok_or_else(|| {
            OrmError::configuration(format!(
                "foreign key '{}.{}' has no relation field",
                model.name, field.name
            ))
        })?;

        // The caller set the relation; sibling keys of a composite foreign
        // key connected by this handler do not count.
        if data.contains_key(relation_name) && !connected.contains(relation_name) {
            return Ok(());
        }

        if privileged {
            data.insert(field.name.clone(), value);
            return Ok(());
        }

        let relation = model
            .get_field(relation_name)
            .filter(|f| f.is_relation())
            .ok_or_else(|| {
                OrmError::configuration(format!(
                    "relation field '{}.{relation_name}' not found",
                    model.name
                ))
            })?;
        let opposite = relation.opposite_fk_field(&field.name).ok_or_else(|| {
            OrmError::configuration(format!(
                "relation '{}.{relation_name}' has no mapping for foreign key '{}'",
                model.name, field.name
            ))
        })?;

        let payload = data
            .entry(relation_name.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        let Value::Object(payload) = payload else {
            return Err(OrmError::schema_mismatch(
                &model.name,
                relation_name,
                "relation payload must be an object",
            ));
        };
        let connect = payload
            .entry("connect")
            .or_insert_with(|| Value::Object(Map::new()));
        let Value::Object(connect) = connect else {
            return Err(OrmError::schema_mismatch(
                &model.name,
                relation_name,
                "connect payload must be an object",
            ));
        };
        connect.insert(opposite.to_string(), value);
        connected.insert(relation_name.to_string());
        Ok(())
    }

    /// Fill defaults inside an embedded value (object or list of objects).
    fn inject_embedded(&self, field: &FieldInfo, value: &mut Value) -> OrmResult<()> {
        let Some(type_def) = field.type_def_name().and_then(|name| self.meta.type_def(name))
        else {
            return Ok(());
        };
        match value {
            Value::Array(items) => {
                for item in items {
                    if let Value::Object(obj) = item {
                        self.inject_type_def(type_def, obj)?;
                    }
                }
            }
            Value::Object(obj) => self.inject_type_def(type_def, obj)?,
            _ => {}
        }
        Ok(())
    }

    fn inject_type_def(&self, type_def: &TypeDefInfo, data: &mut Map<String, Value>) -> OrmResult<()> {
        for field in type_def.fields.values() {
            if field.is_type_def() {
                if let Some(value) = data.get_mut(&field.name) {
                    self.inject_embedded(field, value)?;
                    continue;
                }
            }
            if data.contains_key(&field.name) {
                continue;
            }
            let Some(provider) = &field.default_provider else {
                continue;
            };
            if let Some(value) = self.compute(&type_def.name, field, provider)? {
                data.insert(field.name.clone(), value);
            }
        }
        Ok(())
    }
}
