use std::{collections::BTreeMap, sync::Arc};

use comms::specs::model::ModelSpec;

use crate::{Model, Result, SimulationErr, models::BirthDeath};

type Builder = Box<dyn Fn(&ModelSpec) -> Result<Arc<dyn Model>> + Send + Sync>;

/// Maps model kinds to the functions that build them out of a `ModelSpec`.
#[derive(Default)]
pub struct ModelRegistry {
    builders: BTreeMap<String, Builder>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the models shipped with this crate.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(BirthDeath::KIND, |spec| {
            Ok(Arc::new(BirthDeath::from_spec(spec)?) as Arc<dyn Model>)
        });
        registry
    }

    /// Registers `build` under `kind`, replacing any previous builder.
    pub fn register<F>(&mut self, kind: impl Into<String>, build: F)
    where
        F: Fn(&ModelSpec) -> Result<Arc<dyn Model>> + Send + Sync + 'static,
    {
        self.builders.insert(kind.into(), Box::new(build));
    }

    /// Builds the model `spec` describes.
    ///
    /// # Errors
    /// Returns `SimulationErr::UnknownModel` if no builder is registered for its kind,
    /// or whatever the builder reports for invalid parameters.
    pub fn resolve(&self, spec: &ModelSpec) -> Result<Arc<dyn Model>> {
        let build = self
            .builders
            .get(&spec.kind)
            .ok_or_else(|| SimulationErr::UnknownModel(spec.kind.clone()))?;

        build(spec)
    }

    /// The kinds this registry can build, in sorted order.
    pub fn kinds(&self) -> Vec<String> {
        self.builders.keys().cloned().collect()
    }
}
