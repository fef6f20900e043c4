use super::field::{FieldInfo, FieldType};
use super::model::{ModelInfo, TypeDefInfo, delegate_aux_field};
use crate::error::{OrmError, OrmResult};
use indexmap::IndexMap;

/// Registration entry for auto-registering compiled model metadata.
///
/// Generated schema code submits one of these per schema with
/// `inventory::submit!`; [`ModelMeta::from_registrations`] collects them.
pub struct ModelRegistration {
    /// Function that adds models and type-defs to a builder.
    pub register_fn: fn(&mut ModelMetaBuilder),
}

inventory::collect!(ModelRegistration);

/// Process-wide, read-only index of models and type-defs.
///
/// Built once, then shared (usually behind an `Arc`) by every handler and
/// every concurrent call. There is no mutation API after [`ModelMetaBuilder::build`].
#[derive(Debug, Clone, Default)]
pub struct ModelMeta {
    models: IndexMap<String, ModelInfo>,
    type_defs: IndexMap<String, TypeDefInfo>,
}

impl ModelMeta {
    /// Start building metadata.
    pub fn builder() -> ModelMetaBuilder {
        ModelMetaBuilder::default()
    }

    /// Build metadata from every linked-in [`ModelRegistration`].
    pub fn from_registrations() -> OrmResult<Self> {
        let mut builder = ModelMetaBuilder::default();
        for reg in inventory::iter::<ModelRegistration> {
            (reg.register_fn)(&mut builder);
        }
        builder.build()
    }

    /// Get a model by name.
    pub fn model(&self, name: &str) -> Option<&ModelInfo> {
        self.models.get(name)
    }

    /// Get a model by name, failing with a schema mismatch if unknown.
    pub fn require_model(&self, name: &str) -> OrmResult<&ModelInfo> {
        self.models
            .get(name)
            .ok_or_else(|| OrmError::schema_mismatch(name, "*", "unknown model"))
    }

    /// All models in registration order.
    pub fn models(&self) -> impl Iterator<Item = &ModelInfo> {
        self.models.values()
    }

    /// Ordered fields of a model.
    pub fn fields(&self, model: &str) -> Option<&IndexMap<String, FieldInfo>> {
        self.models.get(model).map(|m| &m.fields)
    }

    /// Get a field, if both model and field exist.
    pub fn field(&self, model: &str, field: &str) -> Option<&FieldInfo> {
        self.models.get(model).and_then(|m| m.fields.get(field))
    }

    /// Get a field or fail with [`OrmError::NotFound`].
    pub fn require_field(&self, model: &str, field: &str) -> OrmResult<&FieldInfo> {
        self.field(model, field)
            .ok_or_else(|| OrmError::not_found(format!("field '{model}.{field}'")))
    }

    /// Get a type-def by name.
    pub fn type_def(&self, name: &str) -> Option<&TypeDefInfo> {
        self.type_defs.get(name)
    }

    /// The delegate base of a concrete model.
    pub fn base_model(&self, model: &str) -> Option<&ModelInfo> {
        self.models
            .get(model)
            .and_then(|m| m.base_model.as_deref())
            .and_then(|base| self.models.get(base))
    }

    /// Concrete models extending `base`.
    pub fn sub_models<'a>(&'a self, base: &'a str) -> impl Iterator<Item = &'a ModelInfo> + 'a {
        self.models
            .values()
            .filter(move |m| m.base_model.as_deref() == Some(base))
    }

    /// Get the number of registered models.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Check if no model is registered.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// One-time builder for [`ModelMeta`].
#[derive(Debug, Default)]
pub struct ModelMetaBuilder {
    models: IndexMap<String, ModelInfo>,
    type_defs: IndexMap<String, TypeDefInfo>,
}

impl ModelMetaBuilder {
    /// Register a model.
    pub fn model(mut self, model: ModelInfo) -> Self {
        self.add_model(model);
        self
    }

    /// Register a type-def.
    pub fn type_def(mut self, type_def: TypeDefInfo) -> Self {
        self.add_type_def(type_def);
        self
    }

    /// Register a model in place.
    pub fn add_model(&mut self, model: ModelInfo) {
        self.models.insert(model.name.clone(), model);
    }

    /// Register a type-def in place.
    pub fn add_type_def(&mut self, type_def: TypeDefInfo) {
        self.type_defs.insert(type_def.name.clone(), type_def);
    }

    /// Expand delegate hierarchies, validate cross references and freeze.
    pub fn build(mut self) -> OrmResult<ModelMeta> {
        self.expand_delegates()?;
        self.link_opposites()?;
        self.validate()?;
        Ok(ModelMeta {
            models: self.models,
            type_defs: self.type_defs,
        })
    }

    /// Copy base fields into concrete models and link both sides through
    /// `delegate_aux_*` relations.
    fn expand_delegates(&mut self) -> OrmResult<()> {
        let edges: Vec<(String, String)> = self
            .models
            .values()
            .filter_map(|m| m.base_model.clone().map(|base| (m.name.clone(), base)))
            .collect();
        let originals = self.models.clone();

        for (concrete, base) in edges {
            let base_info = originals.get(&base).ok_or_else(|| {
                OrmError::configuration(format!(
                    "model '{concrete}' extends unknown model '{base}'"
                ))
            })?;
            if base_info.discriminator.is_none() {
                return Err(OrmError::configuration(format!(
                    "model '{concrete}' extends '{base}', which declares no discriminator"
                )));
            }

            let Some(concrete_info) = self.models.get_mut(&concrete) else {
                continue;
            };

            let mut fields = IndexMap::new();
            for field in base_info.fields.values() {
                if concrete_info.fields.contains_key(&field.name) {
                    continue;
                }
                let mut inherited = field.clone();
                if inherited.inherited_from.is_none() {
                    inherited.inherited_from = Some(base.clone());
                }
                fields.insert(inherited.name.clone(), inherited);
            }
            for (name, field) in concrete_info.fields.drain(..) {
                fields.insert(name, field);
            }

            let mut aux = FieldInfo::relation(delegate_aux_field(&base), base.clone());
            for id in base_info.fields.values().filter(|f| f.is_id) {
                aux = aux.references(id.name.clone(), id.name.clone());
            }
            fields.insert(aux.name.clone(), aux);
            concrete_info.fields = fields;

            if let Some(base_mut) = self.models.get_mut(&base) {
                let back = FieldInfo::relation(delegate_aux_field(&concrete), concrete.clone())
                    .optional();
                base_mut.fields.insert(back.name.clone(), back);
            }
        }
        Ok(())
    }

    /// Pair every relation field with the relation pointing back at it.
    ///
    /// Declared opposites must exist and point back; undeclared ones are
    /// inferred when exactly one candidate remains. A relation with several
    /// candidates and no declaration is rejected. A relation without any
    /// candidate is one-sided.
    fn link_opposites(&mut self) -> OrmResult<()> {
        let mut resolved: Vec<(String, String, String)> = Vec::new();
        for model in self.models.values() {
            for field in model.fields.values() {
                let Some(target) = field.related_model() else {
                    continue;
                };
                let Some(related) = self.models.get(target) else {
                    continue;
                };
                if let Some(declared) = &field.opposite_relation {
                    let points_back = related
                        .fields
                        .get(declared)
                        .is_some_and(|f| f.related_model() == Some(model.name.as_str()));
                    if !points_back {
                        return Err(OrmError::configuration(format!(
                            "opposite of '{}.{}' is '{target}.{declared}', which is not a relation to '{}'",
                            model.name, field.name, model.name
                        )));
                    }
                    continue;
                }

                let candidates: Vec<&FieldInfo> = related
                    .fields
                    .values()
                    .filter(|f| f.related_model() == Some(model.name.as_str()))
                    .filter(|f| !(target == model.name && f.name == field.name))
                    .filter(|f| {
                        f.opposite_relation
                            .as_deref()
                            .is_none_or(|opposite| opposite == field.name)
                    })
                    .collect();
                let declared_back: Vec<&FieldInfo> = candidates
                    .iter()
                    .copied()
                    .filter(|f| f.opposite_relation.as_deref() == Some(field.name.as_str()))
                    .collect();
                let opposite = match (declared_back.as_slice(), candidates.as_slice()) {
                    ([single], _) | ([], [single]) => single.name.clone(),
                    (_, []) => continue,
                    _ => {
                        return Err(OrmError::configuration(format!(
                            "relation '{}.{}' matches several relations on '{target}', declare its opposite",
                            model.name, field.name
                        )));
                    }
                };
                resolved.push((model.name.clone(), field.name.clone(), opposite));
            }
        }

        for (model, field, opposite) in resolved {
            if let Some(field) = self
                .models
                .get_mut(&model)
                .and_then(|m| m.fields.get_mut(&field))
            {
                field.opposite_relation = Some(opposite);
            }
        }
        Ok(())
    }

    fn validate(&self) -> OrmResult<()> {
        for model in self.models.values() {
            if let Some(discriminator) = &model.discriminator {
                if !model.fields.contains_key(discriminator) {
                    return Err(OrmError::configuration(format!(
                        "discriminator '{}.{discriminator}' is not a field",
                        model.name
                    )));
                }
            }
            for field in model.fields.values() {
                self.validate_field(&model.name, field, Some(model))?;
            }
        }
        for type_def in self.type_defs.values() {
            for field in type_def.fields.values() {
                self.validate_field(&type_def.name, field, None)?;
            }
        }
        Ok(())
    }

    fn validate_field(
        &self,
        owner: &str,
        field: &FieldInfo,
        model: Option<&ModelInfo>,
    ) -> OrmResult<()> {
        match &field.field_type {
            FieldType::Model(target) if !self.models.contains_key(target) => {
                return Err(OrmError::configuration(format!(
                    "relation '{owner}.{}' targets unknown model '{target}'",
                    field.name
                )));
            }
            FieldType::TypeDef(name) if !self.type_defs.contains_key(name) => {
                return Err(OrmError::configuration(format!(
                    "field '{owner}.{}' uses unknown type '{name}'",
                    field.name
                )));
            }
            _ => {}
        }

        let (Some(model), true) = (model, field.is_foreign_key) else {
            return Ok(());
        };
        let Some(relation_name) = &field.relation_field else {
            return Ok(());
        };
        let relation = model
            .fields
            .get(relation_name)
            .filter(|f| f.is_relation())
            .ok_or_else(|| {
                OrmError::configuration(format!(
                    "foreign key '{owner}.{}' backs missing relation field '{relation_name}'",
                    field.name
                ))
            })?;
        if relation.opposite_fk_field(&field.name).is_none() {
            return Err(OrmError::configuration(format!(
                "relation '{owner}.{relation_name}' has no mapping for foreign key '{}'",
                field.name
            )));
        }
        Ok(())
    }
}
