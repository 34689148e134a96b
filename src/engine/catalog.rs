// src/engine/catalog.rs

//! Registered templates, looked up by namespace, name and version.

use std::collections::BTreeMap;

use semver::Version;

use crate::dag::template::TaskTemplate;
use crate::errors::{Result, StepgraphError};

#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    /// (namespace, name) -> versions, ordered by semver.
    templates: BTreeMap<(String, String), BTreeMap<Version, TaskTemplate>>,
}

impl TemplateCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a template after checking its graph and version.
    pub fn register(&mut self, template: TaskTemplate) -> Result<()> {
        template.validate()?;
        let version = Version::parse(&template.version).map_err(|e| {
            StepgraphError::TemplateError(format!(
                "template '{}' has invalid version '{}': {e}",
                template.name, template.version
            ))
        })?;
        let versions = self
            .templates
            .entry((template.namespace.clone(), template.name.clone()))
            .or_default();
        if versions.contains_key(&version) {
            return Err(StepgraphError::TemplateError(format!(
                "template '{}' version {} already registered in namespace '{}'",
                template.name, version, template.namespace
            )));
        }
        versions.insert(version, template);
        Ok(())
    }

    pub fn from_templates(templates: impl IntoIterator<Item = TaskTemplate>) -> Result<Self> {
        let mut catalog = Self::new();
        for t in templates {
            catalog.register(t)?;
        }
        Ok(catalog)
    }

    /// Exact version if given, otherwise the highest registered version.
    pub fn resolve(&self, namespace: &str, name: &str, version: Option<&str>) -> Result<&TaskTemplate> {
        let versions = self
            .templates
            .get(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| {
                StepgraphError::TemplateError(format!(
                    "no template '{name}' in namespace '{namespace}'"
                ))
            })?;

        match version {
            Some(v) => {
                let wanted = Version::parse(v).map_err(|e| {
                    StepgraphError::ValidationError(format!("invalid version '{v}': {e}"))
                })?;
                versions.get(&wanted).ok_or_else(|| {
                    StepgraphError::TemplateError(format!(
                        "template '{name}' in namespace '{namespace}' has no version {wanted}"
                    ))
                })
            }
            None => versions.values().next_back().ok_or_else(|| {
                StepgraphError::TemplateError(format!(
                    "no template '{name}' in namespace '{namespace}'"
                ))
            }),
        }
    }

    /// Every template, grouped by namespace and name, versions ascending.
    pub fn iter(&self) -> impl Iterator<Item = &TaskTemplate> {
        self.templates.values().flat_map(|v| v.values())
    }

    pub fn len(&self) -> usize {
        self.templates.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
