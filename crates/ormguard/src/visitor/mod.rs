//! Nested-write visitor.
//!
//! Walks a write-operation argument tree and reports every model-scoped
//! sub-payload exactly once, in a fixed pre-order:
//!
//! - the top-level payload first,
//! - then nested relation payloads in field-declaration order,
//! - within one relation payload, nested actions in the order `create`,
//!   `createMany`, `connectOrCreate`, `upsert`, `update`, `updateMany`,
//!   `connect`, `set`, `disconnect`, `delete`, `deleteMany`.
//!
//! Callbacks receive mutable access to the payloads they are given. A callback
//! may add relation payloads to a create/update record (they are visited
//! afterwards) or reshape a structural node before its payloads are located.

use crate::client::Action;
use crate::error::{OrmError, OrmResult};
use crate::meta::{FieldInfo, ModelInfo, ModelMeta};
use async_trait::async_trait;
use futures_core::future::BoxFuture;
use serde_json::{Map, Value};

#[cfg(test)]
mod tests;

/// Nested action keys in visiting order.
const NESTED_ACTIONS: [&str; 11] = [
    "create",
    "createMany",
    "connectOrCreate",
    "upsert",
    "update",
    "updateMany",
    "connect",
    "set",
    "disconnect",
    "delete",
    "deleteMany",
];

/// Role of a visited node in the write tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteRole {
    Create,
    CreateMany,
    ConnectOrCreate,
    Upsert,
    Update,
    UpdateMany,
    Connect,
    Disconnect,
    Set,
    Delete,
    DeleteMany,
}

impl WriteRole {
    fn from_nested_key(key: &str) -> Option<Self> {
        Some(match key {
            "create" => WriteRole::Create,
            "createMany" => WriteRole::CreateMany,
            "connectOrCreate" => WriteRole::ConnectOrCreate,
            "upsert" => WriteRole::Upsert,
            "update" => WriteRole::Update,
            "updateMany" => WriteRole::UpdateMany,
            "connect" => WriteRole::Connect,
            "set" => WriteRole::Set,
            "disconnect" => WriteRole::Disconnect,
            "delete" => WriteRole::Delete,
            "deleteMany" => WriteRole::DeleteMany,
            _ => return None,
        })
    }
}

/// Where a visited payload sits in the write tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitContext {
    /// Model the payload belongs to.
    pub model: String,
    /// Role of the payload.
    pub role: WriteRole,
    /// Relation field traversed from the parent (`None` at the top level).
    pub field: Option<String>,
    /// Model owning `field`.
    pub parent: Option<String>,
    /// Relation field on `model` leading back to the parent record.
    pub backlink: Option<String>,
    /// Nesting depth, 0 at the top level.
    pub depth: usize,
    /// The record belongs to a `createMany` batch, which only takes scalar
    /// input.
    pub batch: bool,
}

impl VisitContext {
    fn new(model: &str, role: WriteRole, field: Option<&str>, depth: usize) -> Self {
        Self {
            model: model.to_string(),
            role,
            field: field.map(str::to_string),
            parent: None,
            backlink: None,
            depth,
            batch: false,
        }
    }

    fn under(mut self, parent: &str, relation: &FieldInfo) -> Self {
        self.parent = Some(parent.to_string());
        self.backlink = relation.opposite_relation.clone();
        self
    }

    fn batched(mut self) -> Self {
        self.batch = true;
        self
    }

    fn with_role(&self, role: WriteRole) -> Self {
        Self {
            role,
            ..self.clone()
        }
    }
}

/// Callbacks invoked by [`NestedWriteVisitor`]. All default to no-ops.
#[async_trait]
pub trait WriteCallbacks: Send {
    /// A record being created.
    async fn create(&mut self, ctx: &VisitContext, data: &mut Map<String, Value>) -> OrmResult<()> {
        let _ = (ctx, data);
        Ok(())
    }

    /// An update data payload.
    async fn update(&mut self, ctx: &VisitContext, data: &mut Map<String, Value>) -> OrmResult<()> {
        let _ = (ctx, data);
        Ok(())
    }

    /// A structural node, before any of its payloads are visited.
    async fn node(&mut self, ctx: &VisitContext, node: &mut Value) -> OrmResult<()> {
        let _ = (ctx, node);
        Ok(())
    }
}

/// Walks write trees against a metadata index.
#[derive(Debug, Clone, Copy)]
pub struct NestedWriteVisitor<'m> {
    meta: &'m ModelMeta,
}

impl<'m> NestedWriteVisitor<'m> {
    pub fn new(meta: &'m ModelMeta) -> Self {
        Self { meta }
    }

    /// Visit the arguments of a top-level `action` on `model`.
    ///
    /// Actions without a write tree are accepted and produce no callbacks.
    pub async fn visit<C: WriteCallbacks>(
        &self,
        model: &str,
        action: &Action,
        args: &mut Value,
        callbacks: &mut C,
    ) -> OrmResult<()> {
        let info = self.meta.require_model(model)?;
        match action {
            Action::Create => {
                let ctx = VisitContext::new(model, WriteRole::Create, None, 0);
                if let Some(data) = args.get_mut("data") {
                    self.visit_creates(info, &ctx, data, callbacks).await?;
                }
            }
            Action::CreateMany | Action::CreateManyAndReturn => {
                let ctx = VisitContext::new(model, WriteRole::CreateMany, None, 0);
                callbacks.node(&ctx, args).await?;
                if let Some(data) = args.get_mut("data") {
                    let ctx = ctx.with_role(WriteRole::Create).batched();
                    self.visit_creates(info, &ctx, data, callbacks).await?;
                }
            }
            Action::ConnectOrCreate => {
                let ctx = VisitContext::new(model, WriteRole::ConnectOrCreate, None, 0);
                self.visit_connect_or_create(info, &ctx, args, callbacks)
                    .await?;
            }
            Action::Upsert => {
                let ctx = VisitContext::new(model, WriteRole::Upsert, None, 0);
                self.visit_upsert(info, &ctx, args, callbacks).await?;
            }
            Action::Update | Action::UpdateMany | Action::UpdateManyAndReturn => {
                let role = if matches!(action, Action::Update) {
                    WriteRole::Update
                } else {
                    WriteRole::UpdateMany
                };
                let ctx = VisitContext::new(model, role, None, 0);
                callbacks.node(&ctx, args).await?;
                if let Some(data) = args.get_mut("data") {
                    self.visit_update_data(info, &ctx, data, callbacks).await?;
                }
            }
            Action::Delete | Action::DeleteMany => {
                let role = if matches!(action, Action::Delete) {
                    WriteRole::Delete
                } else {
                    WriteRole::DeleteMany
                };
                let ctx = VisitContext::new(model, role, None, 0);
                callbacks.node(&ctx, args).await?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Visit one record or a batch of records being created.
    fn visit_creates<'a, C: WriteCallbacks>(
        &'a self,
        model: &'a ModelInfo,
        ctx: &'a VisitContext,
        data: &'a mut Value,
        callbacks: &'a mut C,
    ) -> BoxFuture<'a, OrmResult<()>> {
        Box::pin(async move {
            let ctx = ctx.with_role(WriteRole::Create);
            match data {
                Value::Array(items) => {
                    for item in items.iter_mut() {
                        let record = as_object(model, &ctx, item)?;
                        callbacks.create(&ctx, record).await?;
                        self.visit_record(model, ctx.depth, record, callbacks).await?;
                    }
                }
                item => {
                    let record = as_object(model, &ctx, item)?;
                    callbacks.create(&ctx, record).await?;
                    self.visit_record(model, ctx.depth, record, callbacks).await?;
                }
            }
            Ok(())
        })
    }

    fn visit_update_data<'a, C: WriteCallbacks>(
        &'a self,
        model: &'a ModelInfo,
        ctx: &'a VisitContext,
        data: &'a mut Value,
        callbacks: &'a mut C,
    ) -> BoxFuture<'a, OrmResult<()>> {
        Box::pin(async move {
            let record = as_object(model, ctx, data)?;
            callbacks.update(ctx, record).await?;
            self.visit_record(model, ctx.depth, record, callbacks).await
        })
    }

    fn visit_upsert<'a, C: WriteCallbacks>(
        &'a self,
        model: &'a ModelInfo,
        ctx: &'a VisitContext,
        node: &'a mut Value,
        callbacks: &'a mut C,
    ) -> BoxFuture<'a, OrmResult<()>> {
        Box::pin(async move {
            callbacks.node(ctx, node).await?;
            if let Some(create) = node.get_mut("create") {
                self.visit_creates(model, ctx, create, callbacks).await?;
            }
            if let Some(update) = node.get_mut("update") {
                let ctx = ctx.with_role(WriteRole::Update);
                self.visit_update_data(model, &ctx, update, callbacks)
                    .await?;
            }
            Ok(())
        })
    }

    fn visit_connect_or_create<'a, C: WriteCallbacks>(
        &'a self,
        model: &'a ModelInfo,
        ctx: &'a VisitContext,
        node: &'a mut Value,
        callbacks: &'a mut C,
    ) -> BoxFuture<'a, OrmResult<()>> {
        Box::pin(async move {
            callbacks.node(ctx, node).await?;
            if let Some(create) = node.get_mut("create") {
                self.visit_creates(model, ctx, create, callbacks).await?;
            }
            Ok(())
        })
    }

    /// Validate a create/update record's keys and descend into its relation
    /// payloads in field-declaration order.
    fn visit_record<'a, C: WriteCallbacks>(
        &'a self,
        model: &'a ModelInfo,
        depth: usize,
        record: &'a mut Map<String, Value>,
        callbacks: &'a mut C,
    ) -> BoxFuture<'a, OrmResult<()>> {
        Box::pin(async move {
            if let Some(unknown) = record.keys().find(|key| !model.has_field(key)) {
                return Err(OrmError::schema_mismatch(
                    &model.name,
                    unknown,
                    "unknown field in write payload",
                ));
            }

            for field in model.fields.values() {
                let Some(related_name) = field.related_model() else {
                    continue;
                };
                let Some(payload) = record.get_mut(&field.name) else {
                    continue;
                };
                let related = self.meta.require_model(related_name)?;
                let Value::Object(actions) = payload else {
                    return Err(OrmError::schema_mismatch(
                        &model.name,
                        &field.name,
                        "relation payload must be an object",
                    ));
                };
                self.visit_relation(related, &model.name, field, depth + 1, actions, callbacks)
                    .await?;
            }
            Ok(())
        })
    }

    fn visit_relation<'a, C: WriteCallbacks>(
        &'a self,
        model: &'a ModelInfo,
        parent: &'a str,
        relation: &'a FieldInfo,
        depth: usize,
        actions: &'a mut Map<String, Value>,
        callbacks: &'a mut C,
    ) -> BoxFuture<'a, OrmResult<()>> {
        Box::pin(async move {
            let field = relation.name.as_str();
            let to_many = relation.is_array;
            if let Some(unknown) = actions
                .keys()
                .find(|key| WriteRole::from_nested_key(key).is_none())
            {
                return Err(OrmError::schema_mismatch(
                    &model.name,
                    unknown,
                    format!("unknown nested write action under '{field}'"),
                ));
            }

            for key in NESTED_ACTIONS {
                let Some(payload) = actions.get_mut(key) else {
                    continue;
                };
                let Some(role) = WriteRole::from_nested_key(key) else {
                    continue;
                };
                let ctx =
                    VisitContext::new(&model.name, role, Some(field), depth).under(parent, relation);
                match role {
                    WriteRole::Create => {
                        self.visit_creates(model, &ctx, payload, callbacks).await?;
                    }
                    WriteRole::CreateMany => {
                        callbacks.node(&ctx, payload).await?;
                        if let Some(data) = payload.get_mut("data") {
                            let ctx = ctx.clone().batched();
                            self.visit_creates(model, &ctx, data, callbacks).await?;
                        }
                    }
                    WriteRole::ConnectOrCreate => {
                        for node in batch(payload) {
                            self.visit_connect_or_create(model, &ctx, node, callbacks)
                                .await?;
                        }
                    }
                    WriteRole::Upsert => {
                        for node in batch(payload) {
                            self.visit_upsert(model, &ctx, node, callbacks).await?;
                        }
                    }
                    WriteRole::Update | WriteRole::UpdateMany => {
                        for node in batch(payload) {
                            callbacks.node(&ctx, node).await?;
                            let data = if to_many || role == WriteRole::UpdateMany {
                                node.get_mut("data")
                            } else {
                                to_one_update_data(model, node)
                            };
                            if let Some(data) = data {
                                self.visit_update_data(model, &ctx, data, callbacks)
                                    .await?;
                            }
                        }
                    }
                    _ => {
                        for node in batch(payload) {
                            callbacks.node(&ctx, node).await?;
                        }
                    }
                }
            }
            Ok(())
        })
    }
}

/// Each element of an array payload, or the payload itself.
fn batch(payload: &mut Value) -> Vec<&mut Value> {
    match payload {
        Value::Array(items) => items.iter_mut().collect(),
        other => vec![other],
    }
}

/// Whether a nested update node uses the `{ where, data }` form rather than
/// being the data itself.
pub(crate) fn is_wrapped_update(model: &ModelInfo, node: &Value) -> bool {
    node.as_object()
        .is_some_and(|obj| obj.contains_key("data") && !model.has_field("data"))
}

/// A to-one nested update is either the data itself or `{ where, data }`.
fn to_one_update_data<'v>(model: &ModelInfo, node: &'v mut Value) -> Option<&'v mut Value> {
    if is_wrapped_update(model, node) {
        node.get_mut("data")
    } else {
        Some(node)
    }
}

fn as_object<'v>(
    model: &ModelInfo,
    ctx: &VisitContext,
    value: &'v mut Value,
) -> OrmResult<&'v mut Map<String, Value>> {
    match value {
        Value::Object(obj) => Ok(obj),
        _ => Err(OrmError::schema_mismatch(
            &model.name,
            ctx.field.as_deref().unwrap_or("data"),
            "write payload must be an object",
        )),
    }
}
