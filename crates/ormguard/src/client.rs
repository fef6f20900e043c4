//! Data-access client contract and caller-facing model handles.

use crate::error::{OrmError, OrmResult};
use async_trait::async_trait;
use futures_core::future::BoxFuture;
use serde_json::{Map, Value};
use std::fmt;
use std::future::IntoFuture;
use std::sync::Arc;

/// The fixed set of model operations understood by the interception core.
///
/// Anything else is carried as [`Action::Other`] and forwarded unchanged by
/// every layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Action {
    FindUnique,
    FindUniqueOrThrow,
    FindFirst,
    FindFirstOrThrow,
    FindMany,
    Create,
    CreateMany,
    CreateManyAndReturn,
    Update,
    UpdateMany,
    UpdateManyAndReturn,
    Upsert,
    Delete,
    DeleteMany,
    ConnectOrCreate,
    Count,
    Aggregate,
    GroupBy,
    /// An operation the core does not recognize.
    Other(String),
}

impl Action {
    /// Parse a client method name (`"findMany"`, `"createManyAndReturn"`, ...).
    pub fn parse(name: &str) -> Self {
        match name {
            "findUnique" => Action::FindUnique,
            "findUniqueOrThrow" => Action::FindUniqueOrThrow,
            "findFirst" => Action::FindFirst,
            "findFirstOrThrow" => Action::FindFirstOrThrow,
            "findMany" => Action::FindMany,
            "create" => Action::Create,
            "createMany" => Action::CreateMany,
            "createManyAndReturn" => Action::CreateManyAndReturn,
            "update" => Action::Update,
            "updateMany" => Action::UpdateMany,
            "updateManyAndReturn" => Action::UpdateManyAndReturn,
            "upsert" => Action::Upsert,
            "delete" => Action::Delete,
            "deleteMany" => Action::DeleteMany,
            "connectOrCreate" => Action::ConnectOrCreate,
            "count" => Action::Count,
            "aggregate" => Action::Aggregate,
            "groupBy" => Action::GroupBy,
            other => Action::Other(other.to_string()),
        }
    }

    /// The client method name.
    pub fn as_str(&self) -> &str {
        match self {
            Action::FindUnique => "findUnique",
            Action::FindUniqueOrThrow => "findUniqueOrThrow",
            Action::FindFirst => "findFirst",
            Action::FindFirstOrThrow => "findFirstOrThrow",
            Action::FindMany => "findMany",
            Action::Create => "create",
            Action::CreateMany => "createMany",
            Action::CreateManyAndReturn => "createManyAndReturn",
            Action::Update => "update",
            Action::UpdateMany => "updateMany",
            Action::UpdateManyAndReturn => "updateManyAndReturn",
            Action::Upsert => "upsert",
            Action::Delete => "delete",
            Action::DeleteMany => "deleteMany",
            Action::ConnectOrCreate => "connectOrCreate",
            Action::Count => "count",
            Action::Aggregate => "aggregate",
            Action::GroupBy => "groupBy",
            Action::Other(name) => name,
        }
    }

    /// Read operations (`find*`, `count`, `aggregate`, `groupBy`).
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            Action::FindUnique
                | Action::FindUniqueOrThrow
                | Action::FindFirst
                | Action::FindFirstOrThrow
                | Action::FindMany
                | Action::Count
                | Action::Aggregate
                | Action::GroupBy
        )
    }

    /// Operations whose arguments carry a write payload (`data`, `create`, `update`).
    pub fn has_write_payload(&self) -> bool {
        matches!(
            self,
            Action::Create
                | Action::CreateMany
                | Action::CreateManyAndReturn
                | Action::Update
                | Action::UpdateMany
                | Action::UpdateManyAndReturn
                | Action::Upsert
                | Action::ConnectOrCreate
        )
    }

    /// Operations whose result is one model row (or `null`).
    pub fn returns_row(&self) -> bool {
        matches!(
            self,
            Action::FindUnique
                | Action::FindUniqueOrThrow
                | Action::FindFirst
                | Action::FindFirstOrThrow
                | Action::Create
                | Action::Update
                | Action::Upsert
                | Action::Delete
                | Action::ConnectOrCreate
        )
    }

    /// Operations whose result is a list of model rows.
    pub fn returns_rows(&self) -> bool {
        matches!(
            self,
            Action::FindMany | Action::CreateManyAndReturn | Action::UpdateManyAndReturn
        )
    }

    /// `*OrThrow` reads.
    pub fn throws_if_missing(&self) -> bool {
        matches!(self, Action::FindUniqueOrThrow | Action::FindFirstOrThrow)
    }

    fn supports_fluent(&self) -> bool {
        self.returns_row()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Action {
    fn from(name: &str) -> Self {
        Action::parse(name)
    }
}

/// A generated data-access client, or any layer wrapping one.
///
/// Every model method funnels through [`DataClient::call`], which lets
/// interception layers stack: each layer is itself a `DataClient` holding the
/// next one.
#[async_trait]
pub trait DataClient: Send + Sync {
    /// Invoke `action` on `model` with `args`, returning the client's result.
    async fn call(&self, model: &str, action: Action, args: Value) -> OrmResult<Value>;
}

#[async_trait]
impl<C: DataClient + ?Sized> DataClient for Arc<C> {
    async fn call(&self, model: &str, action: Action, args: Value) -> OrmResult<Value> {
        (**self).call(model, action, args).await
    }
}

#[async_trait]
impl<C: DataClient + ?Sized> DataClient for &C {
    async fn call(&self, model: &str, action: Action, args: Value) -> OrmResult<Value> {
        (**self).call(model, action, args).await
    }
}

/// Model-handle access for any client.
pub trait DataClientExt: DataClient {
    /// Handle for one model's methods.
    fn model(&self, name: &str) -> ModelHandle<'_>;
}

impl<T: DataClient> DataClientExt for T {
    fn model(&self, name: &str) -> ModelHandle<'_> {
        ModelHandle::new(self, name)
    }
}

/// The method surface of one model (`db.model("Post").create(...)`).
#[derive(Clone)]
pub struct ModelHandle<'c> {
    client: &'c dyn DataClient,
    model: String,
}

impl<'c> ModelHandle<'c> {
    /// Create a handle for `model` on `client`.
    pub fn new(client: &'c dyn DataClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    /// The model name.
    pub fn name(&self) -> &str {
        &self.model
    }

    /// Invoke an arbitrary action.
    pub fn call(&self, action: impl Into<Action>, args: Value) -> PendingCall<'c> {
        PendingCall {
            client: self.client,
            model: self.model.clone(),
            action: action.into(),
            args,
            fluent: Vec::new(),
        }
    }

    /// One row by unique criteria, or `null`.
    pub fn find_unique(&self, args: Value) -> PendingCall<'c> {
        self.call(Action::FindUnique, args)
    }

    /// One row by unique criteria; missing rows fail with `NotFound`.
    pub fn find_unique_or_throw(&self, args: Value) -> PendingCall<'c> {
        self.call(Action::FindUniqueOrThrow, args)
    }

    /// The first matching row, or `null`.
    pub fn find_first(&self, args: Value) -> PendingCall<'c> {
        self.call(Action::FindFirst, args)
    }

    /// The first matching row; missing rows fail with `NotFound`.
    pub fn find_first_or_throw(&self, args: Value) -> PendingCall<'c> {
        self.call(Action::FindFirstOrThrow, args)
    }

    /// Every matching row.
    pub fn find_many(&self, args: Value) -> PendingCall<'c> {
        self.call(Action::FindMany, args)
    }

    /// Create one row, with nested writes.
    pub fn create(&self, args: Value) -> PendingCall<'c> {
        self.call(Action::Create, args)
    }

    /// Create a batch of rows; returns `{ count }`.
    pub fn create_many(&self, args: Value) -> PendingCall<'c> {
        self.call(Action::CreateMany, args)
    }

    /// Create a batch of rows and return them.
    pub fn create_many_and_return(&self, args: Value) -> PendingCall<'c> {
        self.call(Action::CreateManyAndReturn, args)
    }

    /// Update one row, with nested writes.
    pub fn update(&self, args: Value) -> PendingCall<'c> {
        self.call(Action::Update, args)
    }

    /// Update every matching row; returns `{ count }`.
    pub fn update_many(&self, args: Value) -> PendingCall<'c> {
        self.call(Action::UpdateMany, args)
    }

    /// Update every matching row and return them.
    pub fn update_many_and_return(&self, args: Value) -> PendingCall<'c> {
        self.call(Action::UpdateManyAndReturn, args)
    }

    /// Update the matching row or create it.
    pub fn upsert(&self, args: Value) -> PendingCall<'c> {
        self.call(Action::Upsert, args)
    }

    /// Delete one row and return it.
    pub fn delete(&self, args: Value) -> PendingCall<'c> {
        self.call(Action::Delete, args)
    }

    /// Delete every matching row; returns `{ count }`.
    pub fn delete_many(&self, args: Value) -> PendingCall<'c> {
        self.call(Action::DeleteMany, args)
    }

    /// Count matching rows.
    pub fn count(&self, args: Value) -> PendingCall<'c> {
        self.call(Action::Count, args)
    }

    /// Aggregate over matching rows.
    pub fn aggregate(&self, args: Value) -> PendingCall<'c> {
        self.call(Action::Aggregate, args)
    }

    /// Group matching rows.
    pub fn group_by(&self, args: Value) -> PendingCall<'c> {
        self.call(Action::GroupBy, args)
    }
}

/// A model call that runs when awaited.
///
/// Single-row calls can be chained into relations before awaiting:
///
/// ```ignore
/// let posts = db.model("User")
///     .find_unique(json!({"where": {"id": "u1"}}))
///     .fluent("posts", json!({"where": {"published": true}}))
///     .await?;
/// ```
///
/// The chain is sent as one call selecting the relation, and the relation is
/// unwrapped from the result.
pub struct PendingCall<'c> {
    client: &'c dyn DataClient,
    model: String,
    action: Action,
    args: Value,
    fluent: Vec<(String, Value)>,
}

impl<'c> PendingCall<'c> {
    /// Traverse into `relation` of the returned row.
    pub fn fluent(mut self, relation: impl Into<String>, args: Value) -> Self {
        self.fluent.push((relation.into(), args));
        self
    }

    /// The action this call will run.
    pub fn action(&self) -> &Action {
        &self.action
    }

    /// The arguments as given.
    pub fn args(&self) -> &Value {
        &self.args
    }

    async fn run(self) -> OrmResult<Value> {
        if self.fluent.is_empty() {
            return self.client.call(&self.model, self.action, self.args).await;
        }
        if !self.action.supports_fluent() {
            return Err(OrmError::validation(format!(
                "fluent relation access is not supported on '{}'",
                self.action
            )));
        }

        let args = select_fluent_chain(self.args, &self.fluent)?;
        let mut current = self.client.call(&self.model, self.action, args).await?;
        let last = self.fluent.len() - 1;
        for (index, (relation, _)) in self.fluent.iter().enumerate() {
            current = match current {
                Value::Null => return Ok(Value::Null),
                Value::Object(mut row) => row.remove(relation).unwrap_or(Value::Null),
                Value::Array(_) if index > 0 => {
                    return Err(OrmError::validation(format!(
                        "fluent access through to-many relation before '{relation}'"
                    )));
                }
                other => {
                    return Err(OrmError::client(format!(
                        "expected a row while resolving '{relation}', got {other}"
                    )));
                }
            };
            if index < last && current.is_array() {
                return Err(OrmError::validation(format!(
                    "fluent access through to-many relation '{relation}'"
                )));
            }
        }
        Ok(current)
    }
}

impl<'c> IntoFuture for PendingCall<'c> {
    type Output = OrmResult<Value>;
    type IntoFuture = BoxFuture<'c, OrmResult<Value>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.run())
    }
}

/// Rewrite `args` so the call selects the fluent relation chain.
fn select_fluent_chain(args: Value, chain: &[(String, Value)]) -> OrmResult<Value> {
    let mut nested = Value::Bool(true);
    for (index, (_, relation_args)) in chain.iter().enumerate().rev() {
        let mut level = match relation_args {
            Value::Null => Map::new(),
            Value::Object(obj) => obj.clone(),
            other => {
                return Err(OrmError::validation(format!(
                    "fluent arguments must be an object, got {other}"
                )));
            }
        };
        if let Some((next_relation, _)) = chain.get(index + 1) {
            level.remove("include");
            let mut select = Map::new();
            select.insert(next_relation.clone(), nested);
            level.insert("select".to_string(), Value::Object(select));
        }
        nested = if level.is_empty() {
            Value::Bool(true)
        } else {
            Value::Object(level)
        };
    }

    let mut root = match args {
        Value::Null => Map::new(),
        Value::Object(obj) => obj,
        other => {
            return Err(OrmError::validation(format!(
                "call arguments must be an object, got {other}"
            )));
        }
    };
    root.remove("include");
    let mut select = Map::new();
    if let Some((first, _)) = chain.first() {
        select.insert(first.clone(), nested);
    }
    root.insert("select".to_string(), Value::Object(select));
    Ok(Value::Object(root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct EchoClient {
        calls: Mutex<Vec<(String, Action, Value)>>,
        response: Value,
    }

    #[async_trait]
    impl DataClient for EchoClient {
        async fn call(&self, model: &str, action: Action, args: Value) -> OrmResult<Value> {
            self.calls
                .lock()
                .unwrap()
                .push((model.to_string(), action, args));
            Ok(self.response.clone())
        }
    }

    #[test]
    fn test_action_names() {
        for name in ["findMany", "createManyAndReturn", "upsert", "groupBy"] {
            assert_eq!(Action::parse(name).as_str(), name);
        }
        assert_eq!(Action::parse("$metrics"), Action::Other("$metrics".into()));
        assert!(Action::FindUniqueOrThrow.throws_if_missing());
        assert!(Action::Upsert.has_write_payload());
        assert!(!Action::DeleteMany.returns_row());
    }

    #[tokio::test]
    async fn test_model_handle_dispatch() {
        let client = EchoClient {
            calls: Mutex::new(Vec::new()),
            response: json!([]),
        };
        let result = client
            .model("Post")
            .find_many(json!({"where": {"published": true}}))
            .await
            .unwrap();
        assert_eq!(result, json!([]));

        let calls = client.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "Post");
        assert_eq!(calls[0].1, Action::FindMany);
    }

    #[tokio::test]
    async fn test_fluent_selects_and_unwraps_relation() {
        let client = EchoClient {
            calls: Mutex::new(Vec::new()),
            response: json!({"profile": {"bio": "hi", "avatar": {"url": "a.png"}}}),
        };
        let avatar = client
            .model("User")
            .find_unique(json!({"where": {"id": "u1"}}))
            .fluent("profile", Value::Null)
            .fluent("avatar", json!({"select": {"url": true}}))
            .await
            .unwrap();
        assert_eq!(avatar, json!({"url": "a.png"}));

        let calls = client.calls.lock().unwrap();
        assert_eq!(
            calls[0].2,
            json!({
                "where": {"id": "u1"},
                "select": {"profile": {"select": {"avatar": {"select": {"url": true}}}}}
            })
        );
    }

    #[tokio::test]
    async fn test_fluent_on_missing_parent_is_null() {
        let client = EchoClient {
            calls: Mutex::new(Vec::new()),
            response: Value::Null,
        };
        let posts = client
            .model("User")
            .find_unique(json!({"where": {"id": "nobody"}}))
            .fluent("posts", Value::Null)
            .await
            .unwrap();
        assert_eq!(posts, Value::Null);
    }

    #[tokio::test]
    async fn test_fluent_rejected_on_list_actions() {
        let client = EchoClient {
            calls: Mutex::new(Vec::new()),
            response: json!([]),
        };
        let err = client
            .model("User")
            .find_many(json!({}))
            .fluent("posts", Value::Null)
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }
}
