//! Model metadata index.
//!
//! Describes every model's fields (scalars, relations, foreign keys, embedded
//! type-defs), how relations map to foreign keys, and delegate inheritance
//! links. The index is produced by the schema compiler (usually through
//! generated code calling [`ModelMeta::builder`] or submitting a
//! [`ModelRegistration`]) and is read-only afterwards.
//!
//! # Example
//!
//! ```ignore
//! use ormguard::meta::{FieldInfo, ModelInfo, ModelMeta};
//!
//! let meta = ModelMeta::builder()
//!     .model(
//!         ModelInfo::new("User")
//!             .field(FieldInfo::scalar("id", "String").id())
//!             .field(FieldInfo::relation("posts", "Post").array()),
//!     )
//!     .model(
//!         ModelInfo::new("Post")
//!             .field(FieldInfo::scalar("id", "Int").id().auto_increment())
//!             .field(FieldInfo::relation("author", "User").references("id", "authorId"))
//!             .field(FieldInfo::scalar("authorId", "String").foreign_key("author").default_auth("id")),
//!     )
//!     .build()?;
//!
//! let fk = meta.require_field("Post", "authorId")?;
//! assert!(fk.is_foreign_key);
//! ```

mod field;
mod model;
mod registry;


pub use field::{DefaultProvider, FieldAttribute, FieldInfo, FieldType};
pub use model::{ModelInfo, TypeDefInfo, delegate_aux_field};
pub use registry::{ModelMeta, ModelMetaBuilder, ModelRegistration};
