use super::rule::{Guard, Rule};
use crate::identity::Identity;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Operation a model-level rule governs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyOperation {
    Read,
    Create,
    Update,
    Delete,
}

impl PolicyOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyOperation::Read => "read",
            PolicyOperation::Create => "create",
            PolicyOperation::Update => "update",
            PolicyOperation::Delete => "delete",
        }
    }
}

impl fmt::Display for PolicyOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field-level rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldPolicy {
    /// Rows failing this rule are returned without the field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<Rule>,
}

/// Rules for one model. A missing operation rule denies the operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<Rule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create: Option<Rule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<Rule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<Rule>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub fields: IndexMap<String, FieldPolicy>,
}

impl ModelPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(mut self, rule: Rule) -> Self {
        self.read = Some(rule);
        self
    }

    pub fn create(mut self, rule: Rule) -> Self {
        self.create = Some(rule);
        self
    }

    pub fn update(mut self, rule: Rule) -> Self {
        self.update = Some(rule);
        self
    }

    pub fn delete(mut self, rule: Rule) -> Self {
        self.delete = Some(rule);
        self
    }

    /// Grant every operation with the same rule.
    pub fn all(self, rule: Rule) -> Self {
        self.read(rule.clone())
            .create(rule.clone())
            .update(rule.clone())
            .delete(rule)
    }

    /// Restrict reading one field.
    pub fn field_read(mut self, field: impl Into<String>, rule: Rule) -> Self {
        self.fields.insert(field.into(), FieldPolicy { read: Some(rule) });
        self
    }

    pub fn rule(&self, operation: PolicyOperation) -> Option<&Rule> {
        match operation {
            PolicyOperation::Read => self.read.as_ref(),
            PolicyOperation::Create => self.create.as_ref(),
            PolicyOperation::Update => self.update.as_ref(),
            PolicyOperation::Delete => self.delete.as_ref(),
        }
    }
}

/// Access policies of every model, as produced by the schema compiler.
///
/// ```json
/// {
///   "models": {
///     "Post": {
///       "read": {"kind": "or", "rules": [
///         {"kind": "fieldEq", "field": "published", "value": true},
///         {"kind": "fieldEqAuth", "field": "authorId", "authPath": "id"}
///       ]},
///       "create": {"kind": "authenticated"},
///       "fields": {"secret": {"read": {"kind": "fieldEqAuth", "field": "authorId", "authPath": "id"}}}
///     }
///   }
/// }
/// ```
///
/// Models without an entry deny every operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyDescriptor {
    #[serde(default)]
    pub models: IndexMap<String, ModelPolicy>,
}

impl PolicyDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the policy of one model.
    pub fn model(mut self, name: impl Into<String>, policy: ModelPolicy) -> Self {
        self.models.insert(name.into(), policy);
        self
    }

    /// Parse a descriptor document.
    pub fn from_json(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    pub fn rule(&self, model: &str, operation: PolicyOperation) -> Option<&Rule> {
        self.models.get(model).and_then(|p| p.rule(operation))
    }

    /// Compile the rule for `operation` on `model`. Missing rules deny.
    pub fn guard(&self, model: &str, operation: PolicyOperation, identity: Option<&Identity>) -> Guard {
        self.rule(model, operation)
            .map_or(Guard::Deny, |rule| rule.compile(identity))
    }

    /// Evaluate the rule for `operation` on `model` in memory. Missing rules deny.
    pub fn permits(
        &self,
        model: &str,
        operation: PolicyOperation,
        identity: Option<&Identity>,
        row: &Map<String, Value>,
    ) -> bool {
        self.rule(model, operation)
            .is_some_and(|rule| rule.evaluate(identity, row))
    }

    /// Row fields the read rule and the field rules of `model` look at.
    pub fn read_dependencies(&self, model: &str) -> Vec<&str> {
        let Some(policy) = self.models.get(model) else {
            return Vec::new();
        };
        let rules = policy
            .read
            .iter()
            .chain(policy.fields.values().filter_map(|field| field.read.as_ref()));
        let mut fields: Vec<&str> = Vec::new();
        for field in rules.flat_map(Rule::fields) {
            if !fields.contains(&field) {
                fields.push(field);
            }
        }
        fields
    }

    /// Fields of `row` the caller may not read.
    pub fn denied_fields(
        &self,
        model: &str,
        identity: Option<&Identity>,
        row: &Map<String, Value>,
    ) -> Vec<String> {
        let Some(policy) = self.models.get(model) else {
            return Vec::new();
        };
        policy
            .fields
            .iter()
            .filter(|(name, field)| {
                row.contains_key(name.as_str())
                    && field
                        .read
                        .as_ref()
                        .is_some_and(|rule| !rule.evaluate(identity, row))
            })
            .map(|(name, _)| name.clone())
            .collect()
    }
}
