use super::field::FieldInfo;
use indexmap::IndexMap;

/// Name of the relation field linking a delegate-hierarchy model to `model`.
///
/// `delegate_aux_field("Asset") == "delegate_aux_asset"`.
pub fn delegate_aux_field(model: &str) -> String {
    let mut chars = model.chars();
    match chars.next() {
        Some(first) => format!(
            "delegate_aux_{}{}",
            first.to_lowercase(),
            chars.as_str()
        ),
        None => "delegate_aux_".to_string(),
    }
}

/// Metadata for one model.
#[derive(Debug, Clone)]
pub struct ModelInfo {
    /// Model name.
    pub name: String,
    /// Fields in declaration order.
    pub fields: IndexMap<String, FieldInfo>,
    /// Delegate base model (concrete -> base edge).
    pub base_model: Option<String>,
    /// On delegate base models: field recording the concrete model name.
    pub discriminator: Option<String>,
}

impl ModelInfo {
    /// Create an empty model.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: IndexMap::new(),
            base_model: None,
            discriminator: None,
        }
    }

    /// Add a field.
    pub fn field(mut self, field: FieldInfo) -> Self {
        self.fields.insert(field.name.clone(), field);
        self
    }

    /// Declare this model as a concrete sub-model of `base`.
    pub fn extends(mut self, base: impl Into<String>) -> Self {
        self.base_model = Some(base.into());
        self
    }

    /// Declare this model as a delegate base discriminated by `field`.
    pub fn discriminator(mut self, field: impl Into<String>) -> Self {
        self.discriminator = Some(field.into());
        self
    }

    /// Get a field by name.
    pub fn get_field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.get(name)
    }

    /// Check if the model has a field with the given name.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Id fields in declaration order.
    pub fn id_fields(&self) -> impl Iterator<Item = &FieldInfo> {
        self.fields.values().filter(|f| f.is_id)
    }

    /// Whether this model is a delegate base.
    pub fn is_delegate_base(&self) -> bool {
        self.discriminator.is_some()
    }
}

/// Metadata for an embedded type-def.
#[derive(Debug, Clone)]
pub struct TypeDefInfo {
    /// Type-def name.
    pub name: String,
    /// Fields in declaration order.
    pub fields: IndexMap<String, FieldInfo>,
}

impl TypeDefInfo {
    /// Create an empty type-def.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: IndexMap::new(),
        }
    }

    /// Add a field.
    pub fn field(mut self, field: FieldInfo) -> Self {
        self.fields.insert(field.name.clone(), field);
        self
    }
}
