use super::*;
use crate::test_support::fixture_meta;
use serde_json::json;

#[derive(Default)]
struct Trace {
    events: Vec<String>,
}

#[async_trait]
impl WriteCallbacks for Trace {
    async fn create(&mut self, ctx: &VisitContext, _data: &mut Map<String, Value>) -> OrmResult<()> {
        self.events.push(format!(
            "create {} {} {}",
            ctx.model,
            ctx.field.as_deref().unwrap_or("-"),
            ctx.depth
        ));
        Ok(())
    }

    async fn update(&mut self, ctx: &VisitContext, _data: &mut Map<String, Value>) -> OrmResult<()> {
        self.events.push(format!("update {} {}", ctx.model, ctx.depth));
        Ok(())
    }

    async fn node(&mut self, ctx: &VisitContext, _node: &mut Value) -> OrmResult<()> {
        self.events
            .push(format!("node {:?} {} {}", ctx.role, ctx.model, ctx.depth));
        Ok(())
    }
}

async fn trace(model: &str, action: Action, mut args: Value) -> OrmResult<Vec<String>> {
    let meta = fixture_meta();
    let mut trace = Trace::default();
    NestedWriteVisitor::new(&meta)
        .visit(model, &action, &mut args, &mut trace)
        .await?;
    Ok(trace.events)
}

#[tokio::test]
async fn test_nested_create_order() {
    let events = trace(
        "User",
        Action::Create,
        json!({
            "data": {
                "profile": {"create": {"bio": "hi"}},
                "email": "a@b.c",
                "posts": {
                    "connect": [{"id": 7}],
                    "create": [
                        {"title": "one", "comments": {"create": {"body": "c"}}},
                        {"title": "two"}
                    ]
                }
            }
        }),
    )
    .await
    .unwrap();

    // `posts` is declared before `profile`; `create` before `connect`.
    assert_eq!(
        events,
        vec![
            "create User - 0",
            "create Post posts 1",
            "create Comment comments 2",
            "create Post posts 1",
            "node Connect Post 1",
            "create Profile profile 1",
        ]
    );
}

#[tokio::test]
async fn test_create_many_elements_are_siblings() {
    let events = trace(
        "Post",
        Action::CreateMany,
        json!({"data": [{"title": "a"}, {"title": "b"}]}),
    )
    .await
    .unwrap();
    assert_eq!(
        events,
        vec!["node CreateMany Post 0", "create Post - 0", "create Post - 0"]
    );
}

#[tokio::test]
async fn test_upsert_visits_create_then_update() {
    let events = trace(
        "Post",
        Action::Upsert,
        json!({
            "where": {"id": 1},
            "create": {"title": "new"},
            "update": {"title": "old", "comments": {"deleteMany": {}}}
        }),
    )
    .await
    .unwrap();
    assert_eq!(
        events,
        vec![
            "node Upsert Post 0",
            "create Post - 0",
            "update Post 0",
            "node DeleteMany Comment 1",
        ]
    );
}

#[tokio::test]
async fn test_nested_update_shapes() {
    let events = trace(
        "User",
        Action::Update,
        json!({
            "where": {"id": "u1"},
            "data": {
                "posts": {
                    "update": [{"where": {"id": 1}, "data": {"title": "x"}}],
                    "updateMany": {"where": {}, "data": {"published": false}}
                },
                "profile": {"update": {"bio": "b"}}
            }
        }),
    )
    .await
    .unwrap();
    assert_eq!(
        events,
        vec![
            "node Update User 0",
            "update User 0",
            "node Update Post 1",
            "update Post 1",
            "node UpdateMany Post 1",
            "update Post 1",
            "node Update Profile 1",
            "update Profile 1",
        ]
    );
}

#[tokio::test]
async fn test_connect_and_delete_are_not_descended() {
    let events = trace(
        "User",
        Action::Update,
        json!({
            "where": {"id": "u1"},
            "data": {
                "posts": {
                    "connect": {"id": 1},
                    "disconnect": [{"id": 2}, {"id": 3}],
                    "delete": {"id": 4}
                }
            }
        }),
    )
    .await
    .unwrap();
    assert_eq!(
        events,
        vec![
            "node Update User 0",
            "update User 0",
            "node Connect Post 1",
            "node Disconnect Post 1",
            "node Disconnect Post 1",
            "node Delete Post 1",
        ]
    );
}

#[tokio::test]
async fn test_unknown_data_key_is_schema_mismatch() {
    let err = trace("Post", Action::Create, json!({"data": {"nope": 1}}))
        .await
        .unwrap_err();
    assert!(err.is_schema_mismatch());
    assert!(err.to_string().contains("Post.nope"));
}

#[tokio::test]
async fn test_non_object_relation_payload_is_schema_mismatch() {
    let err = trace(
        "Post",
        Action::Create,
        json!({"data": {"title": "t", "author": "u1"}}),
    )
    .await
    .unwrap_err();
    assert!(err.is_schema_mismatch());
}

#[tokio::test]
async fn test_unknown_nested_action_is_schema_mismatch() {
    let err = trace(
        "Post",
        Action::Create,
        json!({"data": {"title": "t", "author": {"attach": {"id": "u1"}}}}),
    )
    .await
    .unwrap_err();
    assert!(err.is_schema_mismatch());
}

#[tokio::test]
async fn test_unknown_model_is_schema_mismatch() {
    let err = trace("Ghost", Action::Create, json!({"data": {}}))
        .await
        .unwrap_err();
    assert!(err.is_schema_mismatch());
}

#[tokio::test]
async fn test_reads_produce_no_callbacks() {
    let events = trace("Post", Action::FindMany, json!({"where": {"id": 1}}))
        .await
        .unwrap();
    assert!(events.is_empty());
}

#[tokio::test]
async fn test_callback_mutations_are_visible() {
    struct Stamp;

    #[async_trait]
    impl WriteCallbacks for Stamp {
        async fn create(&mut self, ctx: &VisitContext, data: &mut Map<String, Value>) -> OrmResult<()> {
            if ctx.model == "Post" {
                data.insert("title".into(), json!(format!("depth {}", ctx.depth)));
            }
            Ok(())
        }
    }

    let meta = fixture_meta();
    let mut args = json!({"data": {"posts": {"create": {"published": true}}}});
    NestedWriteVisitor::new(&meta)
        .visit("User", &Action::Create, &mut args, &mut Stamp)
        .await
        .unwrap();
    assert_eq!(args["data"]["posts"]["create"]["title"], json!("depth 1"));
}
