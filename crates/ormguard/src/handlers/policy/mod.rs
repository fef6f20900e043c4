//! Row- and field-level access policies.
//!
//! Reads are restricted by pushing the compiled read rule into `where`
//! (top level and to-many includes); to-one includes and field rules are
//! checked on the returned rows. Creates are checked in memory before the call
//! leaves this layer. Updates and deletes are restricted by `where` or
//! pre-checked with a guarded lookup.
//!
//! The layer holds no transaction: a write whose result turns out to be
//! unreadable is reported as rejected after the wrapped client applied it.

mod descriptor;
mod rule;


pub use descriptor::{FieldPolicy, ModelPolicy, PolicyDescriptor, PolicyOperation};
pub use rule::{Guard, Rule};

use crate::client::{Action, DataClient};
use crate::error::{OrmError, OrmResult};
use crate::identity::Identity;
use crate::meta::{FieldInfo, ModelInfo, ModelMeta};
use crate::proxy::{CallContext, Handler, QueryShape, and_filter, and_where};
use crate::visitor::{NestedWriteVisitor, VisitContext, WriteCallbacks, WriteRole, is_wrapped_update};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::sync::Arc;

const NO_ARGS: &Value = &Value::Null;

/// Enforces a [`PolicyDescriptor`] for the caller identity of each call.
#[derive(Debug, Clone)]
pub struct PolicyHandler {
    policy: Arc<PolicyDescriptor>,
}

impl PolicyHandler {
    pub fn new(policy: Arc<PolicyDescriptor>) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &PolicyDescriptor {
        &self.policy
    }

    async fn find(
        &self,
        ctx: &CallContext<'_>,
        model: &ModelInfo,
        mut args: Value,
        next: &dyn DataClient,
    ) -> OrmResult<Value> {
        match self.policy.guard(&model.name, PolicyOperation::Read, ctx.identity) {
            Guard::Deny => {
                tracing::debug!(
                    target: "ormguard::policy",
                    model = %model.name,
                    action = %ctx.action,
                    "read denied"
                );
                return empty_read(ctx.action, &model.name);
            }
            Guard::Filter(filter) => and_where(&mut args, filter),
            Guard::Allow => {}
        }
        self.guard_includes(ctx.meta, model, ctx.identity, &mut args);
        let widening = self.widen_select(ctx.meta, model, &mut args);

        let mut result = next.call(ctx.model, ctx.action.clone(), args.clone()).await?;
        self.filter_rows(ctx.meta, model, ctx.identity, &args, &mut result);
        widening.strip(&mut result);
        Ok(result)
    }

    async fn aggregate(
        &self,
        ctx: &CallContext<'_>,
        model: &ModelInfo,
        mut args: Value,
        next: &dyn DataClient,
    ) -> OrmResult<Value> {
        let guard = self.policy.guard(&model.name, PolicyOperation::Read, ctx.identity);
        if let Some(filter) = guard.as_filter() {
            and_where(&mut args, filter);
        }
        next.call(ctx.model, ctx.action.clone(), args).await
    }

    async fn create(
        &self,
        ctx: &CallContext<'_>,
        model: &ModelInfo,
        mut args: Value,
        next: &dyn DataClient,
    ) -> OrmResult<Value> {
        self.check_write_tree(ctx, &mut args, false).await?;
        self.guard_includes(ctx.meta, model, ctx.identity, &mut args);
        let widening = self.widen_select(ctx.meta, model, &mut args);

        let mut result = next.call(ctx.model, ctx.action.clone(), args.clone()).await?;
        self.check_result(ctx, model, &args, &mut result)?;
        widening.strip(&mut result);
        Ok(result)
    }

    async fn update_one(
        &self,
        ctx: &CallContext<'_>,
        model: &ModelInfo,
        mut args: Value,
        next: &dyn DataClient,
    ) -> OrmResult<Value> {
        match self.policy.guard(&model.name, PolicyOperation::Update, ctx.identity) {
            Guard::Deny => return Err(not_permitted(model, PolicyOperation::Update)),
            Guard::Allow => {}
            Guard::Filter(filter) => {
                let found = self.lookup_target(ctx, &args, Some(filter), next).await?;
                if found.is_null() {
                    return Err(OrmError::rejected(
                        &model.name,
                        PolicyOperation::Update.as_str(),
                        "no record matches the update policy",
                    ));
                }
            }
        }
        self.check_write_tree(ctx, &mut args, false).await?;
        self.guard_includes(ctx.meta, model, ctx.identity, &mut args);
        let widening = self.widen_select(ctx.meta, model, &mut args);

        let mut result = next.call(ctx.model, ctx.action.clone(), args.clone()).await?;
        self.check_result(ctx, model, &args, &mut result)?;
        widening.strip(&mut result);
        Ok(result)
    }

    async fn delete_one(
        &self,
        ctx: &CallContext<'_>,
        model: &ModelInfo,
        mut args: Value,
        next: &dyn DataClient,
    ) -> OrmResult<Value> {
        let guard = self.policy.guard(&model.name, PolicyOperation::Delete, ctx.identity);
        if guard == Guard::Deny {
            return Err(not_permitted(model, PolicyOperation::Delete));
        }
        let restricted = matches!(guard, Guard::Filter(_));

        // The row is gone afterwards, so readability is checked up front.
        let found = self.lookup_target(ctx, &args, guard.as_filter(), next).await?;
        match &found {
            Value::Null if restricted => {
                return Err(OrmError::rejected(
                    &model.name,
                    PolicyOperation::Delete.as_str(),
                    "no record matches the delete policy",
                ));
            }
            Value::Object(row)
                if !self
                    .policy
                    .permits(&model.name, PolicyOperation::Read, ctx.identity, row) =>
            {
                return Err(not_readable(model, ctx.action));
            }
            _ => {}
        }
        self.guard_includes(ctx.meta, model, ctx.identity, &mut args);
        let widening = self.widen_select(ctx.meta, model, &mut args);

        let mut result = next.call(ctx.model, ctx.action.clone(), args.clone()).await?;
        self.filter_rows(ctx.meta, model, ctx.identity, &args, &mut result);
        widening.strip(&mut result);
        Ok(result)
    }

    async fn upsert(
        &self,
        ctx: &CallContext<'_>,
        model: &ModelInfo,
        mut args: Value,
        next: &dyn DataClient,
    ) -> OrmResult<Value> {
        let existing = self.lookup_target(ctx, &args, None, next).await?;
        let updating = match &existing {
            Value::Object(row) => {
                if !self
                    .policy
                    .permits(&model.name, PolicyOperation::Update, ctx.identity, row)
                {
                    return Err(not_permitted(model, PolicyOperation::Update));
                }
                true
            }
            _ => false,
        };
        self.check_write_tree(ctx, &mut args, updating).await?;
        self.guard_includes(ctx.meta, model, ctx.identity, &mut args);
        let widening = self.widen_select(ctx.meta, model, &mut args);

        let mut result = next.call(ctx.model, ctx.action.clone(), args.clone()).await?;
        self.check_result(ctx, model, &args, &mut result)?;
        widening.strip(&mut result);
        Ok(result)
    }

    async fn write_many(
        &self,
        ctx: &CallContext<'_>,
        model: &ModelInfo,
        mut args: Value,
        next: &dyn DataClient,
    ) -> OrmResult<Value> {
        let operation = if matches!(ctx.action, Action::DeleteMany) {
            PolicyOperation::Delete
        } else {
            PolicyOperation::Update
        };
        let guard = self.policy.guard(&model.name, operation, ctx.identity);
        if let Some(filter) = guard.as_filter() {
            and_where(&mut args, filter);
        }
        self.check_write_tree(ctx, &mut args, false).await?;
        let widening = self.widen_select(ctx.meta, model, &mut args);

        let mut result = next.call(ctx.model, ctx.action.clone(), args.clone()).await?;
        self.check_result(ctx, model, &args, &mut result)?;
        widening.strip(&mut result);
        Ok(result)
    }

    /// Look up the row targeted by `args.where`, optionally restricted by `filter`.
    async fn lookup_target(
        &self,
        ctx: &CallContext<'_>,
        args: &Value,
        filter: Option<Value>,
        next: &dyn DataClient,
    ) -> OrmResult<Value> {
        let target = args
            .get("where")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        let mut lookup = json!({ "where": target });
        if let Some(filter) = filter {
            and_where(&mut lookup, filter);
        }
        next.call(ctx.model, Action::FindFirst, lookup).await
    }

    /// Check nested creates and guard nested updates/deletes.
    async fn check_write_tree(
        &self,
        ctx: &CallContext<'_>,
        args: &mut Value,
        skip_root_create: bool,
    ) -> OrmResult<()> {
        let mut checker = WriteChecker {
            policy: &self.policy,
            meta: ctx.meta,
            identity: ctx.identity,
            skip_root_create,
        };
        NestedWriteVisitor::new(ctx.meta)
            .visit(ctx.model, ctx.action, args, &mut checker)
            .await
    }

    /// Rows returned by a write must be readable; then apply read filtering.
    fn check_result(
        &self,
        ctx: &CallContext<'_>,
        model: &ModelInfo,
        args: &Value,
        result: &mut Value,
    ) -> OrmResult<()> {
        if !(ctx.action.returns_row() || ctx.action.returns_rows()) {
            return Ok(());
        }
        let rows: Vec<&Map<String, Value>> = match &*result {
            Value::Array(rows) => rows.iter().filter_map(Value::as_object).collect(),
            Value::Object(row) => vec![row],
            _ => Vec::new(),
        };
        if rows
            .into_iter()
            .any(|row| !self.policy.permits(&model.name, PolicyOperation::Read, ctx.identity, row))
        {
            return Err(not_readable(model, ctx.action));
        }
        self.filter_rows(ctx.meta, model, ctx.identity, args, result);
        Ok(())
    }

    /// Push read guards into the `where` of included to-many relations.
    fn guard_includes(
        &self,
        meta: &ModelMeta,
        model: &ModelInfo,
        identity: Option<&Identity>,
        args: &mut Value,
    ) {
        for key in ["include", "select"] {
            let Some(Value::Object(entries)) = args.get_mut(key) else {
                continue;
            };
            for (name, nested) in entries.iter_mut() {
                let Some(field) = model.get_field(name).filter(|f| f.is_relation()) else {
                    continue;
                };
                let Some(related) = field.related_model().and_then(|m| meta.model(m)) else {
                    continue;
                };
                if matches!(nested, Value::Bool(false)) {
                    continue;
                }
                if field.is_array {
                    let guard = self.policy.guard(&related.name, PolicyOperation::Read, identity);
                    if let Some(filter) = guard.as_filter() {
                        if !nested.is_object() {
                            *nested = Value::Object(Map::new());
                        }
                        and_where(nested, filter);
                    }
                }
                if nested.is_object() {
                    self.guard_includes(meta, related, identity, nested);
                }
            }
        }
    }

    /// Add the fields read rules look at to every narrowing `select`, so
    /// rows can be judged whatever the caller picked.
    fn widen_select(&self, meta: &ModelMeta, model: &ModelInfo, args: &mut Value) -> Widening {
        let mut widening = Widening::default();
        if let Some(Value::Object(select)) = args.get_mut("select") {
            for field in self.policy.read_dependencies(&model.name) {
                let scalar = model.get_field(field).is_some_and(|f| !f.is_relation());
                if scalar && select.get(field) != Some(&Value::Bool(true)) {
                    select.insert(field.to_string(), Value::Bool(true));
                    widening.added.push(field.to_string());
                }
            }
        }

        for key in ["include", "select"] {
            let Some(Value::Object(entries)) = args.get_mut(key) else {
                continue;
            };
            for (name, nested) in entries.iter_mut() {
                let Some(related) = model
                    .get_field(name)
                    .and_then(FieldInfo::related_model)
                    .and_then(|m| meta.model(m))
                else {
                    continue;
                };
                if !nested.is_object() {
                    continue;
                }
                let inner = self.widen_select(meta, related, nested);
                if !inner.is_empty() {
                    widening.relations.push((name.clone(), inner));
                }
            }
        }
        widening
    }

    fn filter_rows(
        &self,
        meta: &ModelMeta,
        model: &ModelInfo,
        identity: Option<&Identity>,
        args: &Value,
        result: &mut Value,
    ) {
        match result {
            Value::Array(rows) => {
                for row in rows {
                    self.filter_rows(meta, model, identity, args, row);
                }
            }
            Value::Object(row) => self.filter_row(meta, model, identity, args, row),
            _ => {}
        }
    }

    /// Null out unreadable to-one relations and drop unreadable fields.
    fn filter_row(
        &self,
        meta: &ModelMeta,
        model: &ModelInfo,
        identity: Option<&Identity>,
        args: &Value,
        row: &mut Map<String, Value>,
    ) {
        for relation in QueryShape::of(model, args).relations() {
            let Some(related) = relation.field.related_model().and_then(|m| meta.model(m)) else {
                continue;
            };
            let Some(nested) = row.get_mut(&relation.field.name) else {
                continue;
            };
            let hidden = !relation.field.is_array
                && matches!(
                    &*nested,
                    Value::Object(nested_row)
                        if !self.policy.permits(&related.name, PolicyOperation::Read, identity, nested_row)
                );
            if hidden {
                *nested = Value::Null;
                continue;
            }
            let nested_args = relation.args.unwrap_or(NO_ARGS);
            self.filter_rows(meta, related, identity, nested_args, nested);
        }

        for field in self.policy.denied_fields(&model.name, identity, row) {
            row.remove(&field);
        }
    }
}

#[async_trait]
impl Handler for PolicyHandler {
    fn name(&self) -> &'static str {
        "policy"
    }

    async fn handle(
        &self,
        ctx: &CallContext<'_>,
        args: Value,
        next: &dyn DataClient,
    ) -> OrmResult<Value> {
        let model = ctx.model_info()?;
        match ctx.action {
            Action::FindUnique
            | Action::FindUniqueOrThrow
            | Action::FindFirst
            | Action::FindFirstOrThrow
            | Action::FindMany => self.find(ctx, model, args, next).await,
            Action::Count | Action::Aggregate | Action::GroupBy => {
                self.aggregate(ctx, model, args, next).await
            }
            Action::Create
            | Action::CreateMany
            | Action::CreateManyAndReturn
            | Action::ConnectOrCreate => self.create(ctx, model, args, next).await,
            Action::Update => self.update_one(ctx, model, args, next).await,
            Action::Delete => self.delete_one(ctx, model, args, next).await,
            Action::Upsert => self.upsert(ctx, model, args, next).await,
            Action::UpdateMany | Action::UpdateManyAndReturn | Action::DeleteMany => {
                self.write_many(ctx, model, args, next).await
            }
            Action::Other(_) => next.call(ctx.model, ctx.action.clone(), args).await,
        }
    }
}

/// Fields added to a caller's `select` by [`PolicyHandler::widen_select`],
/// per fetched relation.
#[derive(Debug, Default)]
struct Widening {
    added: Vec<String>,
    relations: Vec<(String, Widening)>,
}

impl Widening {
    fn is_empty(&self) -> bool {
        self.added.is_empty() && self.relations.is_empty()
    }

    /// Remove the added fields from a result.
    fn strip(&self, result: &mut Value) {
        match result {
            Value::Array(rows) => {
                for row in rows {
                    self.strip(row);
                }
            }
            Value::Object(row) => {
                for field in &self.added {
                    row.remove(field);
                }
                for (relation, nested) in &self.relations {
                    if let Some(value) = row.get_mut(relation) {
                        nested.strip(value);
                    }
                }
            }
            _ => {}
        }
    }
}

/// Visitor callbacks enforcing policies inside a write tree.
struct WriteChecker<'a> {
    policy: &'a PolicyDescriptor,
    meta: &'a ModelMeta,
    identity: Option<&'a Identity>,
    /// The top-level upsert resolves to an update.
    skip_root_create: bool,
}

#[async_trait]
impl<'a> WriteCallbacks for WriteChecker<'a> {
    async fn create(&mut self, ctx: &VisitContext, data: &mut Map<String, Value>) -> OrmResult<()> {
        if self.skip_root_create && ctx.depth == 0 {
            return Ok(());
        }
        let model = self.meta.require_model(&ctx.model)?;
        let effective = effective_payload(model, data, self.identity);
        if !self
            .policy
            .permits(&model.name, PolicyOperation::Create, self.identity, &effective)
        {
            tracing::debug!(
                target: "ormguard::policy",
                model = %model.name,
                depth = ctx.depth,
                "create rejected"
            );
            return Err(OrmError::rejected(
                &model.name,
                PolicyOperation::Create.as_str(),
                "create rule is not satisfied",
            ));
        }
        Ok(())
    }

    async fn node(&mut self, ctx: &VisitContext, node: &mut Value) -> OrmResult<()> {
        // Top-level nodes are guarded by the handler itself.
        if ctx.depth == 0 {
            return Ok(());
        }
        let model = self.meta.require_model(&ctx.model)?;
        match ctx.role {
            WriteRole::Update | WriteRole::UpdateMany => {
                match self.guard(model, PolicyOperation::Update)? {
                    None => {}
                    Some(filter) if is_wrapped_update(model, node) => and_where(node, filter),
                    Some(filter) => {
                        let data = std::mem::take(node);
                        *node = json!({ "where": filter, "data": data });
                    }
                }
            }
            WriteRole::Delete | WriteRole::DeleteMany => {
                if let Some(filter) = self.guard(model, PolicyOperation::Delete)? {
                    if node.as_bool() == Some(true) {
                        *node = filter;
                    } else if node.is_object() {
                        and_filter(node, filter);
                    }
                }
            }
            WriteRole::Upsert => {
                if self.guard(model, PolicyOperation::Update)?.is_some() {
                    return Err(OrmError::rejected(
                        &model.name,
                        PolicyOperation::Update.as_str(),
                        "nested upsert requires unconditional update permission",
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl WriteChecker<'_> {
    /// `Ok(None)` when unrestricted, the filter when conditional, rejection on deny.
    fn guard(&self, model: &ModelInfo, operation: PolicyOperation) -> OrmResult<Option<Value>> {
        match self.policy.guard(&model.name, operation, self.identity) {
            Guard::Allow => Ok(None),
            Guard::Deny => Err(not_permitted(model, operation)),
            Guard::Filter(filter) => Ok(Some(filter)),
        }
    }
}

/// The record as it will be stored, as far as it is known before the write:
/// caller values, foreign keys implied by `connect`, then identity defaults.
fn effective_payload(
    model: &ModelInfo,
    data: &Map<String, Value>,
    identity: Option<&Identity>,
) -> Map<String, Value> {
    let mut effective = data.clone();
    for field in model.fields.values() {
        if effective.contains_key(&field.name) {
            continue;
        }
        let relation_set = field
            .relation_field
            .as_deref()
            .is_some_and(|relation| data.contains_key(relation));
        if field.is_foreign_key && relation_set {
            if let Some(value) = connected_key(model, field, data) {
                effective.insert(field.name.clone(), value);
            }
            continue;
        }
        let Some(provider) = &field.default_provider else {
            continue;
        };
        if provider.requires_identity() && identity.is_none() {
            continue;
        }
        if let Some(value) = provider.compute(identity) {
            effective.insert(field.name.clone(), value);
        }
    }
    effective
}

fn connected_key(model: &ModelInfo, fk: &FieldInfo, data: &Map<String, Value>) -> Option<Value> {
    let relation_name = fk.relation_field.as_deref()?;
    let relation = model.get_field(relation_name)?;
    let opposite = relation.opposite_fk_field(&fk.name)?;
    data.get(relation_name)?
        .get("connect")?
        .get(opposite)
        .cloned()
}

fn empty_read(action: &Action, model: &str) -> OrmResult<Value> {
    if action.throws_if_missing() {
        Err(OrmError::not_found(format!("no '{model}' record found")))
    } else if action.returns_rows() {
        Ok(Value::Array(Vec::new()))
    } else {
        Ok(Value::Null)
    }
}

fn not_permitted(model: &ModelInfo, operation: PolicyOperation) -> OrmError {
    OrmError::rejected(&model.name, operation.as_str(), "operation is not permitted")
}

fn not_readable(model: &ModelInfo, action: &Action) -> OrmError {
    OrmError::rejected(&model.name, action.as_str(), "result is not readable")
}
