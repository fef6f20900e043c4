//! Shared fixtures for integration tests: a blog schema and an in-memory
//! client answering the subset of the query language the behaviors emit.

#![allow(dead_code)]

use async_trait::async_trait;
use ormguard::meta::{FieldInfo, ModelInfo, ModelMeta, TypeDefInfo};
use ormguard::{Action, DataClient, OrmError, OrmResult};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub type Row = Map<String, Value>;

/// Blog schema: users own posts and comments, videos are delegate assets.
pub fn blog_meta() -> Arc<ModelMeta> {
    let meta = ModelMeta::builder()
        .model(
            ModelInfo::new("User")
                .field(FieldInfo::scalar("id", "String").id())
                .field(FieldInfo::scalar("email", "String"))
                .field(FieldInfo::scalar("password", "String").password())
                .field(FieldInfo::relation("posts", "Post").array())
                .field(FieldInfo::relation("profile", "Profile").optional()),
        )
        .model(
            ModelInfo::new("Profile")
                .field(FieldInfo::scalar("id", "Int").id().auto_increment())
                .field(FieldInfo::scalar("bio", "String"))
                .field(FieldInfo::relation("user", "User").references("id", "userId"))
                .field(
                    FieldInfo::scalar("userId", "String")
                        .foreign_key("user")
                        .default_auth("id"),
                ),
        )
        .model(
            ModelInfo::new("Post")
                .field(FieldInfo::scalar("id", "Int").id().auto_increment())
                .field(FieldInfo::scalar("title", "String"))
                .field(FieldInfo::scalar("secret", "String").optional().encrypted())
                .field(FieldInfo::scalar("published", "Boolean"))
                .field(FieldInfo::relation("author", "User").references("id", "authorId"))
                .field(
                    FieldInfo::scalar("authorId", "String")
                        .foreign_key("author")
                        .default_auth("id"),
                )
                .field(FieldInfo::type_def("meta", "PostMeta").optional()),
        )
        .model(
            ModelInfo::new("Asset")
                .discriminator("assetType")
                .field(FieldInfo::scalar("id", "Int").id().auto_increment())
                .field(FieldInfo::scalar("viewCount", "Int"))
                .field(FieldInfo::scalar("createdBy", "String").default_auth("id"))
                .field(FieldInfo::scalar("assetType", "String")),
        )
        .model(
            ModelInfo::new("Video")
                .extends("Asset")
                .field(FieldInfo::scalar("duration", "Int"))
                .field(FieldInfo::scalar("url", "String")),
        )
        .type_def(
            TypeDefInfo::new("PostMeta")
                .field(FieldInfo::scalar("editedBy", "String").default_auth("id"))
                .field(FieldInfo::scalar("tags", "String").array().optional())
                .field(FieldInfo::type_def("revisions", "Revision").array().optional()),
        )
        .type_def(
            TypeDefInfo::new("Revision")
                .field(FieldInfo::scalar("note", "String"))
                .field(FieldInfo::scalar("reviewer", "String").default_auth("email")),
        )
        .build()
        .expect("blog schema is valid");
    Arc::new(meta)
}

#[derive(Default)]
struct Tables {
    rows: HashMap<String, Vec<Row>>,
    sequences: HashMap<String, i64>,
}

/// An in-memory client.
///
/// Supports nested `create`/`connect`/`createMany`, equality and comparison
/// filters with `AND`/`OR`/`NOT`, relation filters, `select`/`include`,
/// updates of scalar fields, and deletes cascading to rows whose foreign keys
/// reference the deleted row. Unknown actions of type [`Action::Other`] echo
/// their arguments.
pub struct MemoryDb {
    meta: Arc<ModelMeta>,
    tables: Mutex<Tables>,
}

impl MemoryDb {
    pub fn new(meta: Arc<ModelMeta>) -> Self {
        Self {
            meta,
            tables: Mutex::new(Tables::default()),
        }
    }

    /// Store `row` as is, bypassing every behavior.
    pub fn insert(&self, model: &str, row: Value) {
        let Value::Object(row) = row else {
            panic!("seed rows must be objects");
        };
        self.tables
            .lock()
            .unwrap()
            .rows
            .entry(model.to_string())
            .or_default()
            .push(row);
    }

    /// Stored rows of `model`, as the wrapped client sees them.
    pub fn rows(&self, model: &str) -> Vec<Value> {
        self.tables
            .lock()
            .unwrap()
            .rows
            .get(model)
            .map(|rows| rows.iter().cloned().map(Value::Object).collect())
            .unwrap_or_default()
    }

    fn info(&self, name: &str) -> OrmResult<&ModelInfo> {
        self.meta.require_model(name)
    }

    fn dispatch(
        &self,
        tables: &mut Tables,
        info: &ModelInfo,
        action: &Action,
        args: &Value,
    ) -> OrmResult<Value> {
        let filter = args.get("where");
        match action {
            Action::FindMany => {
                let rows = self.matching(tables, info, filter);
                Ok(Value::Array(
                    rows.iter().map(|row| self.shape(tables, info, row, args)).collect(),
                ))
            }
            Action::FindFirst | Action::FindUnique => Ok(self
                .matching(tables, info, filter)
                .first()
                .map_or(Value::Null, |row| self.shape(tables, info, row, args))),
            Action::FindFirstOrThrow | Action::FindUniqueOrThrow => self
                .matching(tables, info, filter)
                .first()
                .map(|row| self.shape(tables, info, row, args))
                .ok_or_else(|| OrmError::not_found(format!("no '{}' record found", info.name))),
            Action::Create => {
                let data = args.get("data").unwrap_or(&Value::Null);
                let row = self.create(tables, info, data)?;
                Ok(self.shape(tables, info, &row, args))
            }
            Action::CreateMany => {
                let data = args.get("data").unwrap_or(&Value::Null);
                let items = list(data);
                for item in &items {
                    self.create(tables, info, item)?;
                }
                Ok(json!({ "count": items.len() }))
            }
            Action::Update => {
                let row = self
                    .matching(tables, info, filter)
                    .into_iter()
                    .next()
                    .ok_or_else(|| OrmError::not_found(format!("no '{}' record found", info.name)))?;
                let data = args.get("data").unwrap_or(&Value::Null);
                let updated = self.update(tables, info, &row, data)?;
                Ok(self.shape(tables, info, &updated, args))
            }
            Action::UpdateMany => {
                let rows = self.matching(tables, info, filter);
                let data = args.get("data").unwrap_or(&Value::Null);
                for row in &rows {
                    self.update(tables, info, row, data)?;
                }
                Ok(json!({ "count": rows.len() }))
            }
            Action::Delete => {
                let row = self
                    .matching(tables, info, filter)
                    .into_iter()
                    .next()
                    .ok_or_else(|| OrmError::not_found(format!("no '{}' record found", info.name)))?;
                let shaped = self.shape(tables, info, &row, args);
                self.remove(tables, info, &[row]);
                Ok(shaped)
            }
            Action::DeleteMany => {
                let rows = self.matching(tables, info, filter);
                self.remove(tables, info, &rows);
                Ok(json!({ "count": rows.len() }))
            }
            Action::Count => Ok(json!(self.matching(tables, info, filter).len())),
            Action::Other(name) => Ok(json!({ "action": name, "args": args })),
            other => Err(OrmError::client(format!("unsupported action {other}"))),
        }
    }

    fn matching(&self, tables: &Tables, info: &ModelInfo, filter: Option<&Value>) -> Vec<Row> {
        tables
            .rows
            .get(&info.name)
            .map(|rows| {
                rows.iter()
                    .filter(|row| filter.is_none_or(|f| self.matches(tables, info, row, f)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn matches(&self, tables: &Tables, info: &ModelInfo, row: &Row, filter: &Value) -> bool {
        let Value::Object(filter) = filter else {
            return true;
        };
        filter.iter().all(|(key, condition)| match key.as_str() {
            "AND" => list(condition)
                .iter()
                .all(|c| self.matches(tables, info, row, c)),
            "OR" => list(condition)
                .iter()
                .any(|c| self.matches(tables, info, row, c)),
            "NOT" => !list(condition)
                .iter()
                .any(|c| self.matches(tables, info, row, c)),
            name => match info.get_field(name) {
                Some(field) if field.is_relation() => {
                    self.relation_matches(tables, info, field, row, condition)
                }
                _ => scalar_matches(row.get(name).unwrap_or(&Value::Null), condition),
            },
        })
    }

    fn relation_matches(
        &self,
        tables: &Tables,
        info: &ModelInfo,
        field: &FieldInfo,
        row: &Row,
        condition: &Value,
    ) -> bool {
        let Some(target) = field.related_model().and_then(|m| self.meta.model(m)) else {
            return false;
        };
        let related = self.related(tables, info, field, row);
        let test = |r: &Row, c: &Value| self.matches(tables, target, r, c);
        if field.is_array {
            if let Some(c) = condition.get("every") {
                return related.iter().all(|r| test(r, c));
            }
            if let Some(c) = condition.get("none") {
                return !related.iter().any(|r| test(r, c));
            }
            let c = condition.get("some").unwrap_or(condition);
            return related.iter().any(|r| test(r, c));
        }
        let first = related.first();
        match condition {
            Value::Null => first.is_none(),
            c if c.get("isNot").is_some() => {
                first.is_none_or(|r| !test(r, c.get("isNot").unwrap_or(&Value::Null)))
            }
            c => {
                let c = c.get("is").unwrap_or(c);
                first.is_some_and(|r| test(r, c))
            }
        }
    }

    /// Rows of the model `field` points to that are linked to `row`.
    fn related(&self, tables: &Tables, info: &ModelInfo, field: &FieldInfo, row: &Row) -> Vec<Row> {
        let Some(target) = field.related_model().and_then(|m| self.meta.model(m)) else {
            return Vec::new();
        };
        let candidates = tables.rows.get(&target.name).cloned().unwrap_or_default();
        if !field.foreign_key_mapping.is_empty() {
            return candidates
                .into_iter()
                .filter(|candidate| {
                    field.foreign_key_mapping.iter().all(|(referenced, fk)| {
                        let key = row.get(fk).unwrap_or(&Value::Null);
                        !key.is_null() && candidate.get(referenced) == Some(key)
                    })
                })
                .collect();
        }
        let Some(back) = back_relation(target, &info.name) else {
            return Vec::new();
        };
        candidates
            .into_iter()
            .filter(|candidate| {
                back.foreign_key_mapping.iter().all(|(referenced, fk)| {
                    let key = candidate.get(fk).unwrap_or(&Value::Null);
                    !key.is_null() && row.get(referenced) == Some(key)
                })
            })
            .collect()
    }

    fn shape(&self, tables: &Tables, info: &ModelInfo, row: &Row, args: &Value) -> Value {
        if let Some(Value::Object(select)) = args.get("select") {
            let mut picked = Map::new();
            for (name, selection) in select {
                if selection == &Value::Bool(false) {
                    continue;
                }
                match info.get_field(name) {
                    Some(field) if field.is_relation() => {
                        picked.insert(name.clone(), self.fetch(tables, info, field, row, selection));
                    }
                    Some(_) => {
                        if let Some(value) = row.get(name) {
                            picked.insert(name.clone(), value.clone());
                        }
                    }
                    None => {}
                }
            }
            return Value::Object(picked);
        }
        let mut out = row.clone();
        if let Some(Value::Object(include)) = args.get("include") {
            for (name, selection) in include {
                if selection == &Value::Bool(false) {
                    continue;
                }
                if let Some(field) = info.get_field(name).filter(|f| f.is_relation()) {
                    out.insert(name.clone(), self.fetch(tables, info, field, row, selection));
                }
            }
        }
        Value::Object(out)
    }

    fn fetch(
        &self,
        tables: &Tables,
        info: &ModelInfo,
        field: &FieldInfo,
        row: &Row,
        selection: &Value,
    ) -> Value {
        let Some(target) = field.related_model().and_then(|m| self.meta.model(m)) else {
            return Value::Null;
        };
        let nested = if selection.is_object() { selection } else { &Value::Null };
        let rows: Vec<Row> = self
            .related(tables, info, field, row)
            .into_iter()
            .filter(|r| {
                nested
                    .get("where")
                    .is_none_or(|w| self.matches(tables, target, r, w))
            })
            .collect();
        if field.is_array {
            Value::Array(
                rows.iter()
                    .map(|r| self.shape(tables, target, r, nested))
                    .collect(),
            )
        } else {
            rows.first()
                .map_or(Value::Null, |r| self.shape(tables, target, r, nested))
        }
    }

    fn create(&self, tables: &mut Tables, info: &ModelInfo, data: &Value) -> OrmResult<Row> {
        let Value::Object(data) = data else {
            return Err(OrmError::client(format!(
                "create data of '{}' must be an object",
                info.name
            )));
        };
        let mut row = Row::new();
        let mut deferred = Vec::new();
        for (name, value) in data {
            let field = info.get_field(name).ok_or_else(|| {
                OrmError::client(format!("unknown field '{}.{name}'", info.name))
            })?;
            if !field.is_relation() {
                row.insert(name.clone(), value.clone());
                continue;
            }
            let target = self.info(field.related_model().unwrap_or_default())?;
            if field.foreign_key_mapping.is_empty() {
                deferred.push((target, value));
                continue;
            }
            let linked = if let Some(condition) = value.get("connect") {
                self.matching(tables, target, Some(condition))
                    .into_iter()
                    .next()
                    .ok_or_else(|| {
                        OrmError::not_found(format!("no '{}' record to connect", target.name))
                    })?
            } else if let Some(nested) = value.get("create") {
                self.create(tables, target, nested)?
            } else {
                continue;
            };
            for (referenced, fk) in &field.foreign_key_mapping {
                row.insert(
                    fk.clone(),
                    linked.get(referenced).cloned().unwrap_or(Value::Null),
                );
            }
        }

        for field in info.fields.values() {
            // Inherited columns live on the base row.
            let inherited = field.inherited_from.is_some() && !field.is_id;
            if field.is_relation() || inherited || row.contains_key(&field.name) {
                continue;
            }
            let value = if field.is_auto_increment {
                let sequence = tables.sequences.entry(info.name.clone()).or_insert(0);
                *sequence += 1;
                json!(*sequence)
            } else {
                Value::Null
            };
            row.insert(field.name.clone(), value);
        }
        tables
            .rows
            .entry(info.name.clone())
            .or_default()
            .push(row.clone());

        for (target, value) in deferred {
            let Some(back) = back_relation(target, &info.name) else {
                continue;
            };
            let link = |child: &mut Row| {
                for (referenced, fk) in &back.foreign_key_mapping {
                    child.insert(fk.clone(), row.get(referenced).cloned().unwrap_or(Value::Null));
                }
            };
            let mut children = value.get("create").map(list).unwrap_or_default();
            if let Some(batch) = value.get("createMany").and_then(|c| c.get("data")) {
                children.extend(list(batch));
            }
            for child in children {
                let mut child = child.as_object().cloned().unwrap_or_default();
                link(&mut child);
                self.create(tables, target, &Value::Object(child))?;
            }
            if let Some(connect) = value.get("connect") {
                for condition in list(connect) {
                    if let Some(rows) = tables.rows.get_mut(&target.name) {
                        for child in rows.iter_mut() {
                            if condition
                                .as_object()
                                .is_some_and(|c| c.iter().all(|(k, v)| child.get(k) == Some(v)))
                            {
                                link(child);
                            }
                        }
                    }
                }
            }
        }
        Ok(row)
    }

    fn update(&self, tables: &mut Tables, info: &ModelInfo, row: &Row, data: &Value) -> OrmResult<Row> {
        let Value::Object(data) = data else {
            return Err(OrmError::client(format!(
                "update data of '{}' must be an object",
                info.name
            )));
        };
        let mut updated = row.clone();
        for (name, value) in data {
            let field = info.get_field(name).ok_or_else(|| {
                OrmError::client(format!("unknown field '{}.{name}'", info.name))
            })?;
            if field.is_relation() {
                self.update_related(tables, info, field, row, value)?;
                continue;
            }
            let value = value.get("set").cloned().unwrap_or_else(|| value.clone());
            updated.insert(name.clone(), value);
        }
        if let Some(rows) = tables.rows.get_mut(&info.name) {
            if let Some(slot) = rows.iter_mut().find(|r| &**r == row) {
                *slot = updated.clone();
            }
        }
        Ok(updated)
    }

    /// Nested `update` of a to-one relation, or `updateMany`.
    fn update_related(
        &self,
        tables: &mut Tables,
        info: &ModelInfo,
        field: &FieldInfo,
        row: &Row,
        value: &Value,
    ) -> OrmResult<()> {
        let target = self.info(field.related_model().unwrap_or_default())?;
        let related = self.related(tables, info, field, row);
        if let Some(update) = value.get("update") {
            let (filter, data) = match update.get("data") {
                Some(data) => (update.get("where"), data),
                None => (None, update),
            };
            for child in self.filtered(tables, target, &related, filter) {
                self.update(tables, target, &child, data)?;
            }
        }
        if let Some(update) = value.get("updateMany") {
            let data = update.get("data").unwrap_or(&Value::Null);
            for child in self.filtered(tables, target, &related, update.get("where")) {
                self.update(tables, target, &child, data)?;
            }
        }
        Ok(())
    }

    fn filtered(
        &self,
        tables: &Tables,
        info: &ModelInfo,
        rows: &[Row],
        filter: Option<&Value>,
    ) -> Vec<Row> {
        rows.iter()
            .filter(|r| filter.is_none_or(|f| self.matches(tables, info, r, f)))
            .cloned()
            .collect()
    }

    /// Delete `rows` and every row whose foreign keys reference them.
    fn remove(&self, tables: &mut Tables, info: &ModelInfo, rows: &[Row]) {
        if rows.is_empty() {
            return;
        }
        if let Some(stored) = tables.rows.get_mut(&info.name) {
            stored.retain(|r| !rows.contains(r));
        }
        for dependent in self.meta.models() {
            let Some(back) = back_relation(dependent, &info.name) else {
                continue;
            };
            let orphans: Vec<Row> = tables
                .rows
                .get(&dependent.name)
                .map(|children| {
                    children
                        .iter()
                        .filter(|child| {
                            rows.iter().any(|parent| {
                                back.foreign_key_mapping.iter().all(|(referenced, fk)| {
                                    child.get(fk).is_some_and(|v| Some(v) == parent.get(referenced))
                                })
                            })
                        })
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            self.remove(tables, dependent, &orphans);
        }
    }
}

#[async_trait]
impl DataClient for MemoryDb {
    async fn call(&self, model: &str, action: Action, args: Value) -> OrmResult<Value> {
        let info = self.info(model)?;
        let mut tables = self.tables.lock().unwrap();
        self.dispatch(&mut tables, info, &action, &args)
    }
}

/// The owning relation of `model` pointing to `parent`.
fn back_relation<'m>(model: &'m ModelInfo, parent: &str) -> Option<&'m FieldInfo> {
    model.fields.values().find(|f| {
        f.related_model() == Some(parent) && !f.foreign_key_mapping.is_empty()
    })
}

fn list(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

const OPERATORS: [&str; 9] = ["equals", "not", "in", "notIn", "gt", "gte", "lt", "lte", "contains"];

fn scalar_matches(actual: &Value, condition: &Value) -> bool {
    let Value::Object(ops) = condition else {
        return actual == condition;
    };
    if ops.is_empty() || !ops.keys().all(|k| OPERATORS.contains(&k.as_str())) {
        return actual == condition;
    }
    ops.iter().all(|(op, expected)| {
        let ordering = || match (actual.as_f64(), expected.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        };
        match op.as_str() {
            "equals" => actual == expected,
            "not" => actual != expected,
            "in" => expected.as_array().is_some_and(|l| l.contains(actual)),
            "notIn" => expected.as_array().is_some_and(|l| !l.contains(actual)),
            "gt" => ordering().is_some_and(|o| o.is_gt()),
            "gte" => ordering().is_some_and(|o| o.is_ge()),
            "lt" => ordering().is_some_and(|o| o.is_lt()),
            "lte" => ordering().is_some_and(|o| o.is_le()),
            "contains" => match (actual.as_str(), expected.as_str()) {
                (Some(a), Some(b)) => a.contains(b),
                _ => false,
            },
            _ => false,
        }
    })
}
