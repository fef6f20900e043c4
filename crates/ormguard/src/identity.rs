//! Caller identity threaded through every enhanced call.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The identity of the caller on whose behalf an enhanced client operates.
///
/// The value is opaque to the core (typically a user record such as
/// `{"id": "u1", "role": "ADMIN"}`). Default-value providers and access
/// policies read from it; nothing here ever persists it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(Value);

impl Identity {
    /// Wrap an identity record.
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// The raw identity record.
    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Look up a dotted path (`"id"`, `"profile.orgId"`) inside the record.
    ///
    /// Returns `None` when any segment is missing or the value is `null`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = &self.0;
        for segment in path.split('.') {
            current = current.as_object()?.get(segment)?;
        }
        (!current.is_null()).then_some(current)
    }
}

impl From<Value> for Identity {
    fn from(value: Value) -> Self {
        Self(value)
    }
}
