//! Shared fixtures for unit tests.

use crate::client::{Action, DataClient};
use crate::error::OrmResult;
use crate::meta::{FieldInfo, ModelInfo, ModelMeta, TypeDefInfo};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Blog schema with a delegate hierarchy and embedded types.
pub(crate) fn fixture_meta() -> Arc<ModelMeta> {
    let meta = ModelMeta::builder()
        .model(
            ModelInfo::new("User")
                .field(FieldInfo::scalar("id", "String").id())
                .field(FieldInfo::scalar("email", "String"))
                .field(FieldInfo::scalar("role", "String").optional())
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
                .field(FieldInfo::relation("comments", "Comment").array())
                .field(FieldInfo::type_def("meta", "PostMeta").optional()),
        )
        .model(
            ModelInfo::new("Comment")
                .field(FieldInfo::scalar("id", "Int").id().auto_increment())
                .field(FieldInfo::scalar("body", "String"))
                .field(FieldInfo::relation("post", "Post").references("id", "postId"))
                .field(FieldInfo::scalar("postId", "Int").foreign_key("post"))
                .field(
                    FieldInfo::relation("author", "User")
                        .optional()
                        .references("id", "authorId"),
                )
                .field(
                    FieldInfo::scalar("authorId", "String")
                        .optional()
                        .foreign_key("author")
                        .default_auth("id"),
                ),
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
        .build();
    match meta {
        Ok(meta) => Arc::new(meta),
        Err(err) => panic!("fixture metadata is invalid: {err}"),
    }
}

/// Records every call and answers from a queue of canned responses
/// (`null` once the queue is empty).
#[derive(Default)]
pub(crate) struct RecordingClient {
    calls: Mutex<Vec<(String, Action, Value)>>,
    responses: Mutex<VecDeque<Value>>,
}

impl RecordingClient {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_responses(responses: impl IntoIterator<Item = Value>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            responses: Mutex::new(responses.into_iter().collect()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<(String, Action, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn last_args(&self) -> Value {
        self.calls
            .lock()
            .unwrap()
            .last()
            .map(|(_, _, args)| args.clone())
            .unwrap_or(Value::Null)
    }
}

#[async_trait]
impl DataClient for RecordingClient {
    async fn call(&self, model: &str, action: Action, args: Value) -> OrmResult<Value> {
        self.calls
            .lock()
            .unwrap()
            .push((model.to_string(), action, args));
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Value::Null))
    }
}
