use crate::error::{RegistryError, RunnerResult};
use crate::schema::ConfigurationSchema;
use crate::{exasol, prometheus, QueryRunner};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Builds a runner from a data source's connection options.
pub type RunnerFactory = fn(&Value) -> RunnerResult<Arc<dyn QueryRunner>>;

/// Registration entry for one runner type.
#[derive(Clone)]
pub struct RunnerDescriptor {
    pub runner_type: &'static str,
    pub name: &'static str,
    pub configuration_schema: fn() -> ConfigurationSchema,
    pub build: RunnerFactory,
}

impl RunnerDescriptor {
    pub const fn new(
        runner_type: &'static str,
        name: &'static str,
        configuration_schema: fn() -> ConfigurationSchema,
        build: RunnerFactory,
    ) -> Self {
        Self {
            runner_type,
            name,
            configuration_schema,
            build,
        }
    }
}

/// Maps runner type names to their descriptors. Populated only through
/// explicit [`RunnerRegistry::register`] calls.
#[derive(Default)]
pub struct RunnerRegistry {
    descriptors: DashMap<String, RunnerDescriptor>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the bundled runners already registered.
    pub fn with_builtin() -> Result<Self, RegistryError> {
        let registry = Self::new();
        registry.register_builtin()?;
        Ok(registry)
    }

    pub fn register(&self, descriptor: RunnerDescriptor) -> Result<(), RegistryError> {
        match self.descriptors.entry(descriptor.runner_type.to_string()) {
            Entry::Occupied(existing) => Err(RegistryError::Duplicate(existing.key().clone())),
            Entry::Vacant(slot) => {
                debug!(runner_type = descriptor.runner_type, "registered query runner");
                slot.insert(descriptor);
                Ok(())
            }
        }
    }

    pub fn register_builtin(&self) -> Result<(), RegistryError> {
        self.register(exasol::descriptor())?;
        self.register(prometheus::descriptor())?;
        Ok(())
    }

    pub fn get(&self, runner_type: &str) -> Option<RunnerDescriptor> {
        self.descriptors.get(runner_type).map(|d| d.value().clone())
    }

    pub fn contains(&self, runner_type: &str) -> bool {
        self.descriptors.contains_key(runner_type)
    }

    /// Registered type names, sorted.
    pub fn runner_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.descriptors.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }

    pub fn configuration_schema(
        &self,
        runner_type: &str,
    ) -> Result<ConfigurationSchema, RegistryError> {
        let descriptor = self
            .get(runner_type)
            .ok_or_else(|| RegistryError::UnknownType(runner_type.to_string()))?;
        Ok((descriptor.configuration_schema)())
    }

    /// Validates `options` against the runner's declared schema.
    pub fn validate_options(&self, runner_type: &str, options: &Value) -> Result<(), RegistryError> {
        self.configuration_schema(runner_type)?.validate(options)?;
        Ok(())
    }

    pub fn build(
        &self,
        runner_type: &str,
        options: &Value,
    ) -> Result<Arc<dyn QueryRunner>, RegistryError> {
        let descriptor = self
            .get(runner_type)
            .ok_or_else(|| RegistryError::UnknownType(runner_type.to_string()))?;
        Ok((descriptor.build)(options)?)
    }
}
