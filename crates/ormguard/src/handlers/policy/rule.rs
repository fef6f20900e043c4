use crate::identity::Identity;
use crate::proxy::false_filter;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// An access rule.
///
/// Rules are either compiled against the caller identity into a [`Guard`]
/// (pushed down into `where` clauses) or evaluated in memory against a row or
/// a create payload. In memory, a field absent from the row leaves the rule
/// undetermined, which never grants access.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Rule {
    /// Always granted.
    Allow,
    /// Never granted.
    Deny,
    /// Granted when the caller has an identity.
    Authenticated,
    /// `row.field == value`.
    FieldEq { field: String, value: Value },
    /// `row.field == auth().path`.
    #[serde(rename_all = "camelCase")]
    FieldEqAuth { field: String, auth_path: String },
    /// `row.field in auth().path` (the identity value is a list).
    #[serde(rename_all = "camelCase")]
    FieldInAuth { field: String, auth_path: String },
    /// `auth().path == value`.
    #[serde(rename_all = "camelCase")]
    AuthEq { auth_path: String, value: Value },
    And { rules: Vec<Rule> },
    Or { rules: Vec<Rule> },
    Not { rule: Box<Rule> },
}

/// A rule compiled against one identity.
#[derive(Debug, Clone, PartialEq)]
pub enum Guard {
    Allow,
    Deny,
    /// Rows must match this `where` filter.
    Filter(Value),
}

impl Guard {
    /// The guard as a `where` filter (`None` when unrestricted).
    pub fn as_filter(&self) -> Option<Value> {
        match self {
            Guard::Allow => None,
            Guard::Deny => Some(false_filter()),
            Guard::Filter(filter) => Some(filter.clone()),
        }
    }
}

impl Rule {
    pub fn field_eq(field: impl Into<String>, value: Value) -> Self {
        Rule::FieldEq {
            field: field.into(),
            value,
        }
    }

    pub fn field_eq_auth(field: impl Into<String>, auth_path: impl Into<String>) -> Self {
        Rule::FieldEqAuth {
            field: field.into(),
            auth_path: auth_path.into(),
        }
    }

    pub fn field_in_auth(field: impl Into<String>, auth_path: impl Into<String>) -> Self {
        Rule::FieldInAuth {
            field: field.into(),
            auth_path: auth_path.into(),
        }
    }

    pub fn auth_eq(auth_path: impl Into<String>, value: Value) -> Self {
        Rule::AuthEq {
            auth_path: auth_path.into(),
            value,
        }
    }

    pub fn and(rules: impl IntoIterator<Item = Rule>) -> Self {
        Rule::And {
            rules: rules.into_iter().collect(),
        }
    }

    pub fn or(rules: impl IntoIterator<Item = Rule>) -> Self {
        Rule::Or {
            rules: rules.into_iter().collect(),
        }
    }

    pub fn negate(rule: Rule) -> Self {
        Rule::Not {
            rule: Box::new(rule),
        }
    }

    /// Compile into a guard for `identity`.
    pub fn compile(&self, identity: Option<&Identity>) -> Guard {
        match self {
            Rule::Allow => Guard::Allow,
            Rule::Deny => Guard::Deny,
            Rule::Authenticated => {
                if identity.is_some() {
                    Guard::Allow
                } else {
                    Guard::Deny
                }
            }
            Rule::AuthEq { auth_path, value } => {
                if auth_value(identity, auth_path) == Some(value) {
                    Guard::Allow
                } else {
                    Guard::Deny
                }
            }
            Rule::FieldEq { field, value } => Guard::Filter(field_filter(field, value.clone())),
            Rule::FieldEqAuth { field, auth_path } => match auth_value(identity, auth_path) {
                Some(value) => Guard::Filter(field_filter(field, value.clone())),
                None => Guard::Deny,
            },
            Rule::FieldInAuth { field, auth_path } => match auth_value(identity, auth_path) {
                Some(Value::Array(items)) if !items.is_empty() => {
                    Guard::Filter(field_filter(field, json!({ "in": items })))
                }
                _ => Guard::Deny,
            },
            Rule::And { rules } => {
                let mut filters = Vec::new();
                for rule in rules {
                    match rule.compile(identity) {
                        Guard::Deny => return Guard::Deny,
                        Guard::Allow => {}
                        Guard::Filter(filter) => filters.push(filter),
                    }
                }
                combine("AND", filters).map_or(Guard::Allow, Guard::Filter)
            }
            Rule::Or { rules } => {
                let mut filters = Vec::new();
                for rule in rules {
                    match rule.compile(identity) {
                        Guard::Allow => return Guard::Allow,
                        Guard::Deny => {}
                        Guard::Filter(filter) => filters.push(filter),
                    }
                }
                combine("OR", filters).map_or(Guard::Deny, Guard::Filter)
            }
            Rule::Not { rule } => match rule.compile(identity) {
                Guard::Allow => Guard::Deny,
                Guard::Deny => Guard::Allow,
                Guard::Filter(filter) => Guard::Filter(json!({ "NOT": filter })),
            },
        }
    }

    /// Row fields the rule reads, in first-use order.
    pub fn fields(&self) -> Vec<&str> {
        let mut fields = Vec::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields<'r>(&'r self, out: &mut Vec<&'r str>) {
        match self {
            Rule::FieldEq { field, .. }
            | Rule::FieldEqAuth { field, .. }
            | Rule::FieldInAuth { field, .. } => {
                if !out.contains(&field.as_str()) {
                    out.push(field);
                }
            }
            Rule::And { rules } | Rule::Or { rules } => {
                for rule in rules {
                    rule.collect_fields(out);
                }
            }
            Rule::Not { rule } => rule.collect_fields(out),
            Rule::Allow | Rule::Deny | Rule::Authenticated | Rule::AuthEq { .. } => {}
        }
    }

    /// Evaluate against a row; undetermined counts as denied.
    pub fn evaluate(&self, identity: Option<&Identity>, row: &Map<String, Value>) -> bool {
        self.check(identity, row).unwrap_or(false)
    }

    /// Three-valued evaluation: `None` when a referenced field is absent.
    fn check(&self, identity: Option<&Identity>, row: &Map<String, Value>) -> Option<bool> {
        match self {
            Rule::Allow => Some(true),
            Rule::Deny => Some(false),
            Rule::Authenticated => Some(identity.is_some()),
            Rule::AuthEq { auth_path, value } => Some(auth_value(identity, auth_path) == Some(value)),
            Rule::FieldEq { field, value } => row.get(field).map(|actual| actual == value),
            Rule::FieldEqAuth { field, auth_path } => {
                let actual = row.get(field)?;
                Some(auth_value(identity, auth_path) == Some(actual))
            }
            Rule::FieldInAuth { field, auth_path } => {
                let actual = row.get(field)?;
                Some(match auth_value(identity, auth_path) {
                    Some(Value::Array(items)) => items.contains(actual),
                    _ => false,
                })
            }
            Rule::And { rules } => {
                let mut result = Some(true);
                for rule in rules {
                    match rule.check(identity, row) {
                        Some(false) => return Some(false),
                        None => result = None,
                        Some(true) => {}
                    }
                }
                result
            }
            Rule::Or { rules } => {
                let mut result = Some(false);
                for rule in rules {
                    match rule.check(identity, row) {
                        Some(true) => return Some(true),
                        None => result = None,
                        Some(false) => {}
                    }
                }
                result
            }
            Rule::Not { rule } => rule.check(identity, row).map(|granted| !granted),
        }
    }
}

fn auth_value<'i>(identity: Option<&'i Identity>, path: &str) -> Option<&'i Value> {
    identity.and_then(|identity| identity.get(path))
}

fn field_filter(field: &str, condition: Value) -> Value {
    let mut filter = Map::new();
    filter.insert(field.to_string(), condition);
    Value::Object(filter)
}

fn combine(op: &str, mut filters: Vec<Value>) -> Option<Value> {
    match filters.len() {
        0 => None,
        1 => filters.pop(),
        _ => Some(field_filter(op, Value::Array(filters))),
    }
}
