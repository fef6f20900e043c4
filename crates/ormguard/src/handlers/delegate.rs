//! Delegate (model inheritance) emulation.
//!
//! A concrete model stores the fields it inherits on a row of its base model,
//! reached through the `delegate_aux_<base>` relation; the base row records the
//! concrete model name in its discriminator. This layer splits writes across
//! both rows, routes inherited filters and orderings through the aux relation,
//! and flattens the aux rows back into the shape callers expect.
//!
//! Hierarchies are one level deep: a concrete model extends a base that does
//! not itself extend another model.

use crate::client::{Action, DataClient};
use crate::error::{OrmError, OrmResult};
use crate::meta::{FieldInfo, ModelInfo, ModelMeta, delegate_aux_field};
use crate::proxy::{CallContext, Handler};
use crate::visitor::{NestedWriteVisitor, VisitContext, WriteCallbacks, WriteRole};
use async_trait::async_trait;
use serde_json::{Map, Value, json};

const AUX_PREFIX: &str = "delegate_aux_";

/// Splits and flattens delegate models.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelegateHandler;

impl DelegateHandler {
    pub fn new() -> Self {
        Self
    }

    /// Rewrite the call, forward it and flatten the result.
    async fn forward(
        &self,
        meta: &ModelMeta,
        model: &ModelInfo,
        action: &Action,
        mut args: Value,
        next: &dyn DataClient,
    ) -> OrmResult<Value> {
        rewrite_call(meta, model, action, &mut args);
        let mut result = next.call(&model.name, action.clone(), args).await?;
        flatten(meta, model, &mut result);
        Ok(result)
    }

    async fn write(
        &self,
        meta: &ModelMeta,
        model: &ModelInfo,
        action: &Action,
        mut args: Value,
        next: &dyn DataClient,
    ) -> OrmResult<Value> {
        NestedWriteVisitor::new(meta)
            .visit(&model.name, action, &mut args, &mut Splitter { meta })
            .await?;
        self.forward(meta, model, action, args, next).await
    }

    /// `createMany` on a concrete model: one `create` per record.
    async fn create_each(
        &self,
        meta: &ModelMeta,
        model: &ModelInfo,
        action: &Action,
        args: Value,
        next: &dyn DataClient,
    ) -> OrmResult<Value> {
        let records = match args.get("data") {
            Some(Value::Array(items)) => items.clone(),
            Some(item @ Value::Object(_)) => vec![item.clone()],
            _ => {
                return Err(OrmError::schema_mismatch(
                    &model.name,
                    "data",
                    "createMany expects a record or a list of records",
                ));
            }
        };
        let returning = matches!(action, Action::CreateManyAndReturn);
        tracing::debug!(
            target: "ormguard::delegate",
            model = %model.name,
            records = records.len(),
            "emulating createMany with sequential creates"
        );

        let mut rows = Vec::with_capacity(records.len());
        for data in records {
            let mut create = json!({ "data": data });
            if returning {
                copy_selection(&args, &mut create);
            }
            rows.push(self.write(meta, model, &Action::Create, create, next).await?);
        }
        if returning {
            Ok(Value::Array(rows))
        } else {
            Ok(json!({ "count": rows.len() }))
        }
    }

    /// `updateMany` on a concrete model touching inherited fields.
    async fn update_each(
        &self,
        meta: &ModelMeta,
        model: &ModelInfo,
        base: &ModelInfo,
        action: &Action,
        mut args: Value,
        next: &dyn DataClient,
    ) -> OrmResult<Value> {
        let inherited = match args.get_mut("data") {
            Some(Value::Object(data)) => {
                reject_discriminator(model, base, data)?;
                take_inherited(model, data, false)
            }
            _ => Map::new(),
        };
        if inherited.is_empty() {
            return self.forward(meta, model, action, args, next).await;
        }

        let ids = self.resolve_ids(meta, model, &args, next).await?;
        let returning = matches!(action, Action::UpdateManyAndReturn);
        if ids.is_empty() {
            return Ok(if returning { json!([]) } else { json!({ "count": 0 }) });
        }
        let target = id_filter(model, &ids);

        next.call(
            &base.name,
            Action::UpdateMany,
            json!({ "where": target.clone(), "data": inherited }),
        )
        .await?;
        let rest = args
            .get("data")
            .and_then(Value::as_object)
            .filter(|data| !data.is_empty())
            .cloned();
        if let Some(rest) = rest {
            next.call(
                &model.name,
                Action::UpdateMany,
                json!({ "where": target.clone(), "data": rest }),
            )
            .await?;
        }

        if returning {
            let mut find = json!({ "where": target });
            copy_selection(&args, &mut find);
            self.forward(meta, model, &Action::FindMany, find, next).await
        } else {
            Ok(json!({ "count": ids.len() }))
        }
    }

    /// `delete` on a concrete model removes the base row.
    async fn delete_one(
        &self,
        meta: &ModelMeta,
        model: &ModelInfo,
        base: &ModelInfo,
        args: Value,
        next: &dyn DataClient,
    ) -> OrmResult<Value> {
        let mut find = json!({ "where": args.get("where").cloned().unwrap_or_else(|| json!({})) });
        copy_selection(&args, &mut find);
        let added = select_ids(model, &mut find);
        rewrite_query(meta, model, &mut find);

        let mut row = next.call(&model.name, Action::FindFirst, find).await?;
        let Value::Object(found) = &mut row else {
            return Err(OrmError::not_found(format!("no '{}' record found", model.name)));
        };
        let key: Map<String, Value> = model
            .id_fields()
            .filter_map(|f| found.get(&f.name).map(|v| (f.name.clone(), v.clone())))
            .collect();
        if key.is_empty() || key.len() != model.id_fields().count() {
            return Err(OrmError::configuration(format!(
                "'{}' row came back without its id, its base row cannot be located",
                model.name
            )));
        }
        for field in &added {
            found.remove(field);
        }
        next.call(&base.name, Action::Delete, json!({ "where": key }))
            .await?;

        flatten(meta, model, &mut row);
        Ok(row)
    }

    /// `deleteMany` on a concrete model removes the matching base rows.
    async fn delete_each(
        &self,
        meta: &ModelMeta,
        model: &ModelInfo,
        base: &ModelInfo,
        args: Value,
        next: &dyn DataClient,
    ) -> OrmResult<Value> {
        let ids = self.resolve_ids(meta, model, &args, next).await?;
        if ids.is_empty() {
            return Ok(json!({ "count": 0 }));
        }
        next.call(
            &base.name,
            Action::DeleteMany,
            json!({ "where": id_filter(model, &ids) }),
        )
        .await
    }

    /// Ids of the concrete rows matching `args.where`.
    async fn resolve_ids(
        &self,
        meta: &ModelMeta,
        model: &ModelInfo,
        args: &Value,
        next: &dyn DataClient,
    ) -> OrmResult<Vec<Map<String, Value>>> {
        let mut find = json!({ "where": args.get("where").cloned().unwrap_or_else(|| json!({})) });
        rewrite_where_of(meta, model, &mut find);
        let select: Map<String, Value> = model
            .id_fields()
            .map(|f| (f.name.clone(), Value::Bool(true)))
            .collect();
        if let Value::Object(obj) = &mut find {
            obj.insert("select".to_string(), Value::Object(select));
        }

        let rows = next.call(&model.name, Action::FindMany, find).await?;
        Ok(match rows {
            Value::Array(rows) => rows
                .into_iter()
                .filter_map(|row| match row {
                    Value::Object(row) => Some(row),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        })
    }
}

#[async_trait]
impl Handler for DelegateHandler {
    fn name(&self) -> &'static str {
        "delegate"
    }

    async fn handle(
        &self,
        ctx: &CallContext<'_>,
        args: Value,
        next: &dyn DataClient,
    ) -> OrmResult<Value> {
        let meta = ctx.meta;
        let model = ctx.model_info()?;
        let base = meta.base_model(&model.name);

        match (ctx.action, base) {
            (Action::CreateMany | Action::CreateManyAndReturn, Some(_)) => {
                self.create_each(meta, model, ctx.action, args, next).await
            }
            (Action::UpdateMany | Action::UpdateManyAndReturn, Some(base)) => {
                self.update_each(meta, model, base, ctx.action, args, next)
                    .await
            }
            (Action::Delete, Some(base)) => self.delete_one(meta, model, base, args, next).await,
            (Action::DeleteMany, Some(base)) => {
                self.delete_each(meta, model, base, args, next).await
            }
            (Action::Count | Action::Aggregate | Action::GroupBy, _) => {
                let mut args = args;
                rewrite_where_of(meta, model, &mut args);
                next.call(ctx.model, ctx.action.clone(), args).await
            }
            (action, _) if action.has_write_payload() => {
                self.write(meta, model, action, args, next).await
            }
            (Action::Other(_), _) => next.call(ctx.model, ctx.action.clone(), args).await,
            (action, _) => self.forward(meta, model, action, args, next).await,
        }
    }
}

/// Moves inherited fields of concrete-model payloads onto the base row.
struct Splitter<'a> {
    meta: &'a ModelMeta,
}

#[async_trait]
impl<'a> WriteCallbacks for Splitter<'a> {
    async fn create(&mut self, ctx: &VisitContext, data: &mut Map<String, Value>) -> OrmResult<()> {
        let model = self.meta.require_model(&ctx.model)?;
        let through_aux = ctx
            .field
            .as_deref()
            .is_some_and(|field| field.starts_with(AUX_PREFIX));
        if model.is_delegate_base() && !through_aux {
            return Err(OrmError::validation(format!(
                "'{}' is a delegate base model and cannot be created directly, create one of its concrete models",
                model.name
            )));
        }
        let Some(base) = self.meta.base_model(&model.name) else {
            return Ok(());
        };
        if ctx.batch {
            return Err(OrmError::validation(format!(
                "nested createMany of delegate model '{}' is not supported, use create",
                model.name
            )));
        }
        let aux = delegate_aux_field(&base.name);
        if data.contains_key(&aux) {
            return Err(OrmError::validation(format!(
                "'{}.{aux}' is managed internally",
                model.name
            )));
        }
        reject_discriminator(model, base, data)?;

        let mut base_data = take_inherited(model, data, true);
        if let Some(discriminator) = &base.discriminator {
            base_data.insert(discriminator.clone(), Value::String(model.name.clone()));
        }
        data.insert(aux, json!({ "create": base_data }));
        Ok(())
    }

    async fn update(&mut self, ctx: &VisitContext, data: &mut Map<String, Value>) -> OrmResult<()> {
        let model = self.meta.require_model(&ctx.model)?;
        let Some(base) = self.meta.base_model(&model.name) else {
            return Ok(());
        };
        reject_discriminator(model, base, data)?;
        let moved = take_inherited(model, data, false);
        if moved.is_empty() {
            return Ok(());
        }
        if ctx.role == WriteRole::UpdateMany {
            return Err(OrmError::validation(format!(
                "nested updateMany of inherited fields of '{}' is not supported",
                model.name
            )));
        }
        data.insert(delegate_aux_field(&base.name), json!({ "update": moved }));
        Ok(())
    }
}

fn reject_discriminator(
    model: &ModelInfo,
    base: &ModelInfo,
    data: &Map<String, Value>,
) -> OrmResult<()> {
    match &base.discriminator {
        Some(discriminator) if data.contains_key(discriminator) => Err(OrmError::validation(
            format!(
                "discriminator '{}.{discriminator}' is set automatically and cannot be written",
                model.name
            ),
        )),
        _ => Ok(()),
    }
}

fn is_inherited(field: &FieldInfo, with_ids: bool) -> bool {
    field.inherited_from.is_some() && (with_ids || !field.is_id)
}

/// Remove the inherited entries of `map`, in declaration order.
fn take_inherited(model: &ModelInfo, map: &mut Map<String, Value>, with_ids: bool) -> Map<String, Value> {
    model
        .fields
        .values()
        .filter(|f| is_inherited(f, with_ids))
        .filter_map(|f| map.remove(&f.name).map(|value| (f.name.clone(), value)))
        .collect()
}

fn id_filter(model: &ModelInfo, ids: &[Map<String, Value>]) -> Value {
    let id_fields: Vec<&FieldInfo> = model.id_fields().collect();
    match id_fields.as_slice() {
        [single] => {
            let values: Vec<Value> = ids
                .iter()
                .filter_map(|row| row.get(&single.name).cloned())
                .collect();
            let mut filter = Map::new();
            filter.insert(single.name.clone(), json!({ "in": values }));
            Value::Object(filter)
        }
        _ => json!({ "OR": ids }),
    }
}

/// Make a narrowing `select` fetch the id fields. Returns the names added.
fn select_ids(model: &ModelInfo, args: &mut Value) -> Vec<String> {
    let Some(Value::Object(select)) = args.get_mut("select") else {
        return Vec::new();
    };
    let mut added = Vec::new();
    for field in model.id_fields() {
        if select.get(&field.name) != Some(&Value::Bool(true)) {
            select.insert(field.name.clone(), Value::Bool(true));
            added.push(field.name.clone());
        }
    }
    added
}

fn copy_selection(from: &Value, to: &mut Value) {
    let Value::Object(target) = to else {
        return;
    };
    for key in ["select", "include"] {
        if let Some(value) = from.get(key) {
            target.insert(key.to_string(), value.clone());
        }
    }
}

/// Rewrite a top-level call. Calls returning counts or aggregates only get
/// their `where` rewritten.
fn rewrite_call(meta: &ModelMeta, model: &ModelInfo, action: &Action, args: &mut Value) {
    if action.returns_row() || action.returns_rows() {
        rewrite_query(meta, model, args);
    } else {
        rewrite_where_of(meta, model, args);
    }
}

/// Rewrite `where`, `orderBy` and the fetched relations of a call on `model`.
fn rewrite_query(meta: &ModelMeta, model: &ModelInfo, args: &mut Value) {
    rewrite_where_of(meta, model, args);
    let aux = meta.base_model(&model.name).map(|base| delegate_aux_field(&base.name));
    if let (Some(aux), Some(order_by)) = (&aux, args.get_mut("orderBy")) {
        match order_by {
            Value::Array(entries) => {
                for entry in entries {
                    rewrite_order_entry(model, aux, entry);
                }
            }
            entry => rewrite_order_entry(model, aux, entry),
        }
    }
    rewrite_selection(meta, model, args);
}

fn rewrite_where_of(meta: &ModelMeta, model: &ModelInfo, args: &mut Value) {
    if let Some(clause) = args.get_mut("where") {
        rewrite_where(meta, model, clause);
    }
}

fn rewrite_where(meta: &ModelMeta, model: &ModelInfo, clause: &mut Value) {
    let Value::Object(filter) = clause else {
        return;
    };
    for key in ["AND", "OR", "NOT"] {
        match filter.get_mut(key) {
            Some(Value::Array(items)) => {
                for item in items {
                    rewrite_where(meta, model, item);
                }
            }
            Some(item) => rewrite_where(meta, model, item),
            None => {}
        }
    }

    for (name, condition) in filter.iter_mut() {
        let Some(related) = model
            .get_field(name)
            .and_then(FieldInfo::related_model)
            .and_then(|m| meta.model(m))
        else {
            continue;
        };
        let wrapped = condition.as_object().is_some_and(|ops| {
            ops.keys()
                .any(|k| matches!(k.as_str(), "some" | "every" | "none" | "is" | "isNot"))
        });
        if !wrapped {
            rewrite_where(meta, related, condition);
            continue;
        }
        if let Value::Object(ops) = condition {
            for op in ["some", "every", "none", "is", "isNot"] {
                if let Some(inner) = ops.get_mut(op) {
                    rewrite_where(meta, related, inner);
                }
            }
        }
    }

    if let Some(base) = meta.base_model(&model.name) {
        let moved = take_inherited(model, filter, false);
        if !moved.is_empty() {
            filter.insert(delegate_aux_field(&base.name), Value::Object(moved));
        }
    }
}

fn rewrite_order_entry(model: &ModelInfo, aux: &str, entry: &mut Value) {
    let Value::Object(order) = entry else {
        return;
    };
    let moved = take_inherited(model, order, false);
    if !moved.is_empty() {
        order.insert(aux.to_string(), Value::Object(moved));
    }
}

/// Fetch the aux relations a delegate model needs and rewrite nested
/// relation arguments.
fn rewrite_selection(meta: &ModelMeta, model: &ModelInfo, args: &mut Value) {
    let Value::Object(obj) = args else {
        return;
    };
    for key in ["include", "select"] {
        let Some(Value::Object(entries)) = obj.get_mut(key) else {
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
            if nested.as_bool() == Some(true) && is_delegate(related) {
                *nested = json!({});
            }
            if nested.is_object() {
                rewrite_query(meta, related, nested);
            }
        }
    }

    let selecting = matches!(obj.get("select"), Some(Value::Object(_)));
    if let Some(base) = meta.base_model(&model.name) {
        let aux = delegate_aux_field(&base.name);
        if selecting {
            if let Some(Value::Object(select)) = obj.get_mut("select") {
                let moved = take_inherited(model, select, false);
                if !moved.is_empty() {
                    select.insert(aux, json!({ "select": moved }));
                }
            }
        } else if let Some(include) = include_entries(obj) {
            let moved = take_inherited(model, include, false);
            let entry = if moved.is_empty() {
                Value::Bool(true)
            } else {
                json!({ "include": moved })
            };
            include.insert(aux, entry);
        }
    }
    if !model.is_delegate_base() || selecting {
        return;
    }
    if let Some(include) = include_entries(obj) {
        for sub in meta.sub_models(&model.name) {
            include
                .entry(delegate_aux_field(&sub.name))
                .or_insert(Value::Bool(true));
        }
    }
}

fn include_entries(obj: &mut Map<String, Value>) -> Option<&mut Map<String, Value>> {
    let include = obj
        .entry("include")
        .or_insert_with(|| Value::Object(Map::new()));
    if !include.is_object() {
        *include = Value::Object(Map::new());
    }
    include.as_object_mut()
}

fn is_delegate(model: &ModelInfo) -> bool {
    model.base_model.is_some() || model.is_delegate_base()
}

/// Lift aux rows into the rows of `model`, recursively through fetched
/// relations.
fn flatten(meta: &ModelMeta, model: &ModelInfo, result: &mut Value) {
    match result {
        Value::Array(rows) => {
            for row in rows {
                flatten(meta, model, row);
            }
        }
        Value::Object(row) => flatten_row(meta, model, row),
        _ => {}
    }
}

fn flatten_row(meta: &ModelMeta, model: &ModelInfo, row: &mut Map<String, Value>) {
    for field in model.fields.values() {
        if field.name.starts_with(AUX_PREFIX) {
            continue;
        }
        let Some(related) = field.related_model().and_then(|m| meta.model(m)) else {
            continue;
        };
        if let Some(nested) = row.get_mut(&field.name) {
            flatten(meta, related, nested);
        }
    }

    if let Some(base) = meta.base_model(&model.name) {
        if let Some(mut aux) = row.remove(&delegate_aux_field(&base.name)) {
            flatten(meta, base, &mut aux);
            lift(row, aux);
        }
    }
    if model.is_delegate_base() {
        for sub in meta.sub_models(&model.name) {
            if let Some(mut aux) = row.remove(&delegate_aux_field(&sub.name)) {
                flatten(meta, sub, &mut aux);
                lift(row, aux);
            }
        }
    }
}

fn lift(row: &mut Map<String, Value>, aux: Value) {
    let Value::Object(aux) = aux else {
        return;
    };
    for (name, value) in aux {
        if !name.starts_with(AUX_PREFIX) && !row.contains_key(&name) {
            row.insert(name, value);
        }
    }
}
