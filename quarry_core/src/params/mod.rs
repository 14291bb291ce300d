//! Parameterized query processing.
//!
//! A [`ParameterizedQuery`] pairs a template (`SELECT ... WHERE x = {{ x }}`)
//! with its declared parameters. [`ParameterizedQuery::apply`] validates
//! values against their declarations and materializes the query text by plain
//! substitution: escaping, if any, is left to the runner.

mod definition;
pub mod template;

pub use crate::error::ParameterError;
pub use definition::{MultiValueOptions, ParameterDefinition, ParameterKind};

use crate::types::QueryId;
use definition::BoundValue;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// One option of a query-backed dropdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropdownOption {
    pub name: String,
    pub value: String,
}

/// Supplies the value space of `query` parameters.
pub trait DropdownResolver: Send + Sync {
    /// Fails with [`ParameterError::Detached`] when `query_id` is unknown or
    /// has no data source.
    fn dropdown_values(&self, query_id: QueryId) -> Result<Vec<DropdownOption>, ParameterError>;
}

#[derive(Clone)]
pub struct ParameterizedQuery {
    template: String,
    definitions: Vec<ParameterDefinition>,
    bound: HashMap<String, BoundValue>,
    query_text: String,
    resolver: Option<Arc<dyn DropdownResolver>>,
}

impl ParameterizedQuery {
    pub fn new(template: impl Into<String>, definitions: Vec<ParameterDefinition>) -> Self {
        let template = template.into();
        Self {
            query_text: template.clone(),
            template,
            definitions,
            bound: HashMap::new(),
            resolver: None,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn DropdownResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn has_resolver(&self) -> bool {
        self.resolver.is_some()
    }

    /// Validates and binds `values`, then re-renders the query text.
    ///
    /// Validation is all-or-nothing: if any value is rejected, nothing from
    /// this call is bound. `null` values are ignored.
    pub fn apply(&mut self, values: &Map<String, Value>) -> Result<&mut Self, ParameterError> {
        let mut staged = Vec::with_capacity(values.len());
        for (name, value) in values {
            if value.is_null() {
                continue;
            }
            let definition = self
                .definition(name)
                .ok_or_else(|| ParameterError::invalid(name, "parameter is not declared"))?;
            let bound = definition
                .kind
                .validate(name, value, self.resolver.as_deref())?;
            staged.push((name.clone(), bound));
        }

        self.bound.extend(staged);
        self.query_text = template::render(&self.template, |placeholder| {
            match placeholder.split_once('.') {
                Some((name, member)) => self.bound.get(name)?.member(member),
                None => self.bound.get(placeholder)?.render(),
            }
        });
        Ok(self)
    }

    /// The materialized query text.
    pub fn text(&self) -> &str {
        &self.query_text
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn definitions(&self) -> &[ParameterDefinition] {
        &self.definitions
    }

    pub fn definition(&self, name: &str) -> Option<&ParameterDefinition> {
        self.definitions.iter().find(|d| d.name == name)
    }

    /// Declared parameter names without a bound value, in declaration order.
    pub fn missing_params(&self) -> Vec<String> {
        self.definitions
            .iter()
            .filter(|d| !self.bound.contains_key(&d.name))
            .map(|d| d.name.clone())
            .collect()
    }

    /// Whether the query may run for a principal with reduced trust
    /// (view-only access, shared dashboards, embeds).
    pub fn is_safe(&self) -> bool {
        self.definitions.iter().all(|d| !d.kind.is_referential())
    }

    /// Placeholders in the template with no matching declaration.
    pub fn undeclared_placeholders(&self) -> Vec<String> {
        template::placeholders(&self.template)
            .into_iter()
            .filter(|p| {
                let base = p.split_once('.').map_or(p.as_str(), |(name, _)| name);
                self.definition(base).is_none()
            })
            .collect()
    }
}

impl fmt::Debug for ParameterizedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterizedQuery")
            .field("template", &self.template)
            .field("definitions", &self.definitions)
            .field("query_text", &self.query_text)
            .finish_non_exhaustive()
    }
}
