use crate::error::OrmResult;
use crate::meta::{FieldInfo, ModelInfo, ModelMeta};
use serde_json::{Map, Value, json};

const NO_ARGS: &Value = &Value::Null;

/// One relation fetched by a read.
#[derive(Debug, Clone, Copy)]
pub struct ShapeRelation<'a> {
    /// The relation field on the parent model.
    pub field: &'a FieldInfo,
    /// Nested arguments (`None` for `true`).
    pub args: Option<&'a Value>,
}

/// The relations a call fetches through `include` / `select`.
#[derive(Debug, Clone, Default)]
pub struct QueryShape<'a> {
    relations: Vec<ShapeRelation<'a>>,
}

impl<'a> QueryShape<'a> {
    /// Derive the shape of `args` for `model`.
    ///
    /// Keys that are not relation fields (scalars in `select`, `_count`) are
    /// ignored, as are entries set to `false`.
    pub fn of(model: &'a ModelInfo, args: &'a Value) -> Self {
        let mut relations = Vec::new();
        for key in ["include", "select"] {
            let Some(Value::Object(entries)) = args.get(key) else {
                continue;
            };
            for (name, value) in entries {
                let Some(field) = model.get_field(name).filter(|f| f.is_relation()) else {
                    continue;
                };
                let args = match value {
                    Value::Bool(true) => None,
                    Value::Object(_) => Some(value),
                    _ => continue,
                };
                relations.push(ShapeRelation { field, args });
            }
        }
        Self { relations }
    }

    /// Fetched relations.
    pub fn relations(&self) -> &[ShapeRelation<'a>] {
        &self.relations
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}

/// A `where` filter that matches nothing.
pub fn false_filter() -> Value {
    json!({ "OR": [] })
}

/// Conjoin `filter` into the `where` clause of `args`.
///
/// Existing top-level criteria stay in place (unique lookups keep working);
/// the filter is appended to `where.AND`.
pub fn and_where(args: &mut Value, filter: Value) {
    if !args.is_object() {
        *args = Value::Object(Map::new());
    }
    let Value::Object(obj) = args else {
        return;
    };
    let clause = obj
        .entry("where")
        .or_insert_with(|| Value::Object(Map::new()));
    and_filter(clause, filter);
}

/// Conjoin `filter` into a `where` object itself.
pub fn and_filter(clause: &mut Value, filter: Value) {
    if !clause.is_object() {
        *clause = Value::Object(Map::new());
    }
    let Value::Object(clause) = clause else {
        return;
    };
    match clause.remove("AND") {
        None => {
            clause.insert("AND".to_string(), Value::Array(vec![filter]));
        }
        Some(Value::Array(mut items)) => {
            items.push(filter);
            clause.insert("AND".to_string(), Value::Array(items));
        }
        Some(existing) => {
            clause.insert("AND".to_string(), Value::Array(vec![existing, filter]));
        }
    }
}

/// Apply `f` to every row of a result, then recurse into the relations
/// fetched according to `args`.
///
/// `result` may be a row, a list of rows or `null`.
pub fn visit_rows<F>(
    meta: &ModelMeta,
    model: &ModelInfo,
    args: &Value,
    result: &mut Value,
    f: &mut F,
) -> OrmResult<()>
where
    F: FnMut(&ModelInfo, &mut Map<String, Value>) -> OrmResult<()>,
{
    match result {
        Value::Array(rows) => {
            for row in rows {
                visit_rows(meta, model, args, row, f)?;
            }
        }
        Value::Object(row) => {
            f(model, row)?;
            for relation in QueryShape::of(model, args).relations() {
                let Some(related) = relation.field.related_model().and_then(|m| meta.model(m))
                else {
                    continue;
                };
                let Some(nested) = row.get_mut(&relation.field.name) else {
                    continue;
                };
                let nested_args = relation.args.unwrap_or(NO_ARGS);
                visit_rows(meta, related, nested_args, nested, f)?;
            }
        }
        _ => {}
    }
    Ok(())
}
