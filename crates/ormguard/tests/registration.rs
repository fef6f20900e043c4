//! Metadata collected from `inventory` registrations.

use ormguard::meta::{FieldInfo, ModelInfo, ModelMetaBuilder};
use ormguard::{ModelMeta, ModelRegistration};

fn register_blog(builder: &mut ModelMetaBuilder) {
    builder.add_model(
        ModelInfo::new("User")
            .field(FieldInfo::scalar("id", "String").id())
            .field(FieldInfo::relation("posts", "Post").array()),
    );
    builder.add_model(
        ModelInfo::new("Post")
            .field(FieldInfo::scalar("id", "Int").id().auto_increment())
            .field(FieldInfo::relation("author", "User").references("id", "authorId"))
            .field(
                FieldInfo::scalar("authorId", "String")
                    .foreign_key("author")
                    .default_auth("id"),
            ),
    );
}

fn register_media(builder: &mut ModelMetaBuilder) {
    builder.add_model(
        ModelInfo::new("Asset")
            .discriminator("assetType")
            .field(FieldInfo::scalar("id", "Int").id())
            .field(FieldInfo::scalar("assetType", "String")),
    );
    builder.add_model(
        ModelInfo::new("Image")
            .extends("Asset")
            .field(FieldInfo::scalar("width", "Int")),
    );
}

ormguard::inventory::submit! {
    ModelRegistration { register_fn: register_blog }
}

ormguard::inventory::submit! {
    ModelRegistration { register_fn: register_media }
}

#[test]
fn test_registrations_are_merged() {
    let meta = ModelMeta::from_registrations().unwrap();

    assert_eq!(meta.len(), 4);
    let post = meta.model("Post").unwrap();
    assert!(post.get_field("authorId").unwrap().is_foreign_key);
    assert_eq!(
        meta.field("User", "posts").and_then(|f| f.related_model()),
        Some("Post")
    );
}

#[test]
fn test_delegate_links_span_registrations() {
    let meta = ModelMeta::from_registrations().unwrap();

    let image = meta.model("Image").unwrap();
    assert_eq!(image.base_model.as_deref(), Some("Asset"));
    assert!(image.has_field("assetType"));
    assert!(image.has_field("delegate_aux_asset"));
    assert!(meta.model("Asset").unwrap().has_field("delegate_aux_image"));
    assert_eq!(
        meta.base_model("Image").map(|m| m.name.as_str()),
        Some("Asset")
    );
}
