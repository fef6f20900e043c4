use crate::identity::Identity;
use indexmap::IndexMap;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Declared type of a model field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    /// Scalar column (`"String"`, `"Int"`, `"Boolean"`, ...).
    Scalar(String),
    /// Relation to another model.
    Model(String),
    /// Embedded structured value described by a type-def.
    TypeDef(String),
}

/// Behavior attributes attached to a field by the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldAttribute {
    /// Value is stored encrypted and decrypted on read.
    Encrypted,
    /// Value is replaced by a password hash on write.
    Password,
}

type ProviderFn = dyn Fn(Option<&Identity>) -> Option<Value> + Send + Sync;

/// A default-value expression that depends on the caller identity
/// (for example `@default(auth().id)`).
///
/// Required-ness is declared up front: a provider that requires an identity is
/// never invoked without one.
#[derive(Clone)]
pub struct DefaultProvider {
    requires_identity: bool,
    compute: Arc<ProviderFn>,
}

impl DefaultProvider {
    /// Create a provider from a pure function of the optional identity.
    pub fn new<F>(requires_identity: bool, compute: F) -> Self
    where
        F: Fn(Option<&Identity>) -> Option<Value> + Send + Sync + 'static,
    {
        Self {
            requires_identity,
            compute: Arc::new(compute),
        }
    }

    /// Provider reading a dotted path of the identity record (`auth().<path>`).
    pub fn identity_path(path: impl Into<String>) -> Self {
        let path = path.into();
        Self::new(true, move |identity| {
            identity.and_then(|identity| identity.get(&path)).cloned()
        })
    }

    /// Whether the provider needs an identity to produce a value.
    pub fn requires_identity(&self) -> bool {
        self.requires_identity
    }

    /// Evaluate the provider.
    pub fn compute(&self, identity: Option<&Identity>) -> Option<Value> {
        (self.compute)(identity)
    }
}

impl fmt::Debug for DefaultProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultProvider")
            .field("requires_identity", &self.requires_identity)
            .finish_non_exhaustive()
    }
}

/// Metadata for one model (or type-def) field.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    /// Field name.
    pub name: String,
    /// Declared type.
    pub field_type: FieldType,
    /// List cardinality.
    pub is_array: bool,
    /// Optional cardinality.
    pub is_optional: bool,
    /// Part of the model's id.
    pub is_id: bool,
    /// Id generated by the database sequence.
    pub is_auto_increment: bool,
    /// Scalar foreign key backing a relation field.
    pub is_foreign_key: bool,
    /// Relation field this foreign key backs.
    pub relation_field: Option<String>,
    /// For relation fields owning the foreign key: referenced field on the
    /// opposite model -> local foreign-key field, in declaration order.
    pub foreign_key_mapping: IndexMap<String, String>,
    /// For relation fields: the relation field on the related model pointing
    /// back here. Declared or resolved when metadata is built.
    pub opposite_relation: Option<String>,
    /// Base model this field was inherited from (delegate hierarchies).
    pub inherited_from: Option<String>,
    /// Behavior attributes.
    pub attributes: Vec<FieldAttribute>,
    /// Identity-dependent default value.
    pub default_provider: Option<DefaultProvider>,
}

impl FieldInfo {
    fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            is_array: false,
            is_optional: false,
            is_id: false,
            is_auto_increment: false,
            is_foreign_key: false,
            relation_field: None,
            foreign_key_mapping: IndexMap::new(),
            opposite_relation: None,
            inherited_from: None,
            attributes: Vec::new(),
            default_provider: None,
        }
    }

    /// A scalar field of the given kind.
    pub fn scalar(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::new(name, FieldType::Scalar(kind.into()))
    }

    /// A relation field pointing at `model`.
    pub fn relation(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new(name, FieldType::Model(model.into()))
    }

    /// An embedded field described by the type-def `type_name`.
    pub fn type_def(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self::new(name, FieldType::TypeDef(type_name.into()))
    }

    /// Mark as (part of) the id.
    pub fn id(mut self) -> Self {
        self.is_id = true;
        self
    }

    /// Mark as a database-generated auto-increment id.
    pub fn auto_increment(mut self) -> Self {
        self.is_auto_increment = true;
        self
    }

    /// Mark as optional.
    pub fn optional(mut self) -> Self {
        self.is_optional = true;
        self
    }

    /// Mark as a list.
    pub fn array(mut self) -> Self {
        self.is_array = true;
        self
    }

    /// Mark as the foreign key backing `relation_field`.
    pub fn foreign_key(mut self, relation_field: impl Into<String>) -> Self {
        self.is_foreign_key = true;
        self.relation_field = Some(relation_field.into());
        self
    }

    /// On a relation field: the local `fk_field` references `referenced` on
    /// the opposite model.
    pub fn references(mut self, referenced: impl Into<String>, fk_field: impl Into<String>) -> Self {
        self.foreign_key_mapping
            .insert(referenced.into(), fk_field.into());
        self
    }

    /// On a relation field: name the relation field on the related model
    /// pointing back here. Needed when two models share several relations.
    pub fn opposite(mut self, relation: impl Into<String>) -> Self {
        self.opposite_relation = Some(relation.into());
        self
    }

    /// Attach an identity-dependent default.
    pub fn default_from(mut self, provider: DefaultProvider) -> Self {
        self.default_provider = Some(provider);
        self
    }

    /// Shorthand for `default_from(DefaultProvider::identity_path(path))`.
    pub fn default_auth(self, path: impl Into<String>) -> Self {
        self.default_from(DefaultProvider::identity_path(path))
    }

    /// Mark as encrypted at rest.
    pub fn encrypted(mut self) -> Self {
        self.attributes.push(FieldAttribute::Encrypted);
        self
    }

    /// Mark as a password field.
    pub fn password(mut self) -> Self {
        self.attributes.push(FieldAttribute::Password);
        self
    }

    /// Record the base model this field comes from.
    pub fn inherited_from(mut self, base: impl Into<String>) -> Self {
        self.inherited_from = Some(base.into());
        self
    }

    /// Whether this is a relation field.
    pub fn is_relation(&self) -> bool {
        matches!(self.field_type, FieldType::Model(_))
    }

    /// Whether this is an embedded type-def field.
    pub fn is_type_def(&self) -> bool {
        matches!(self.field_type, FieldType::TypeDef(_))
    }

    /// The related model of a relation field.
    pub fn related_model(&self) -> Option<&str> {
        match &self.field_type {
            FieldType::Model(model) => Some(model),
            _ => None,
        }
    }

    /// The type-def name of an embedded field.
    pub fn type_def_name(&self) -> Option<&str> {
        match &self.field_type {
            FieldType::TypeDef(name) => Some(name),
            _ => None,
        }
    }

    /// Check for a behavior attribute.
    pub fn has_attribute(&self, attribute: FieldAttribute) -> bool {
        self.attributes.contains(&attribute)
    }

    /// On a relation field, find the opposite-model field that `fk_field`
    /// maps to (reverse lookup of the foreign-key mapping).
    pub fn opposite_fk_field(&self, fk_field: &str) -> Option<&str> {
        self.foreign_key_mapping
            .iter()
            .find(|(_, local)| local.as_str() == fk_field)
            .map(|(referenced, _)| referenced.as_str())
    }
}
