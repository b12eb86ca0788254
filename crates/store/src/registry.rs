//! Registry of the model tables known to a store.

use std::collections::BTreeMap;

use engine_core::{Entity, Error, Model, ModelMeta, Result};

use crate::ledger::ALERTED_META;

/// Tables a store can persist. The alert ledger is always present.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: BTreeMap<&'static str, &'static ModelMeta>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        let mut models = BTreeMap::new();
        models.insert(ALERTED_META.table, &ALERTED_META);
        Self { models }
    }

    /// Registers a table; registering a second model under the same table name fails.
    pub fn register(&mut self, meta: &'static ModelMeta) -> Result<()> {
        if self.models.contains_key(meta.table) {
            return Err(Error::improperly_configured(format!(
                "Model table '{}' is already registered",
                meta.table
            )));
        }
        self.models.insert(meta.table, meta);
        Ok(())
    }

    pub fn register_entity<T: Entity>(&mut self) -> Result<()> {
        self.register(T::model_meta())
    }

    pub fn get(&self, table: &str) -> Option<&'static ModelMeta> {
        self.models.get(table).copied()
    }

    /// True when `meta` itself (not merely its table name) is registered.
    pub fn contains(&self, meta: &ModelMeta) -> bool {
        self.models
            .get(meta.table)
            .is_some_and(|known| std::ptr::eq(*known, meta))
    }

    /// Fails with a type error unless `obj` belongs to a registered model.
    pub fn validate(&self, obj: &dyn Model) -> Result<()> {
        if self.contains(obj.meta()) {
            Ok(())
        } else {
            Err(Error::type_error(format!(
                "Object {:?} must be an instance of a registered model",
                obj
            )))
        }
    }

    pub fn all(&self) -> impl Iterator<Item = &'static ModelMeta> + '_ {
        self.models.values().copied()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
