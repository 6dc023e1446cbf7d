//! Pool configuration with builder pattern

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Backing node template, forwarded verbatim to the backend on growth
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeTemplate {
    pub image: String,
    pub hardware: String,
    pub location: String,
    pub options: BTreeMap<String, String>,
}

impl NodeTemplate {
    pub fn builder() -> NodeTemplateBuilder {
        NodeTemplateBuilder::default()
    }
}

#[derive(Default)]
pub struct NodeTemplateBuilder {
    template: NodeTemplate,
}

impl NodeTemplateBuilder {
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.template.image = image.into();
        self
    }

    pub fn hardware(mut self, hardware: impl Into<String>) -> Self {
        self.template.hardware = hardware.into();
        self
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.template.location = location.into();
        self
    }

    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.template.options.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> NodeTemplate {
        self.template
    }
}

/// Pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Backend group tag identifying this pool's nodes
    pub group: String,
    /// Minimum nodes kept in the pool once started
    pub min_size: usize,
    /// Maximum total nodes
    pub max_size: usize,
    /// Return released nodes to the pool instead of destroying them
    pub reuse_destroyed: bool,
    /// Template used for every growth call
    pub template: NodeTemplate,
    /// Upper bound on concurrent backend growth calls
    pub growth_workers: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            group: "nodepool".to_string(),
            min_size: 2,
            max_size: 10,
            reuse_destroyed: true,
            template: NodeTemplate::default(),
            growth_workers: 2,
        }
    }
}

impl PoolConfig {
    pub fn new(group: impl Into<String>, template: NodeTemplate) -> Self {
        Self {
            group: group.into(),
            template,
            ..Default::default()
        }
    }

    pub fn min_size(mut self, n: usize) -> Self {
        self.min_size = n;
        self
    }

    pub fn max_size(mut self, n: usize) -> Self {
        self.max_size = n;
        self
    }

    pub fn reuse_destroyed(mut self, reuse: bool) -> Self {
        self.reuse_destroyed = reuse;
        self
    }

    pub fn growth_workers(mut self, n: usize) -> Self {
        self.growth_workers = n;
        self
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.group.is_empty() {
            return Err(crate::Error::Config("group cannot be empty".into()));
        }
        if self.max_size == 0 {
            return Err(crate::Error::Config("max_size must be at least 1".into()));
        }
        if self.min_size > self.max_size {
            return Err(crate::Error::Config(format!(
                "min_size ({}) cannot exceed max_size ({})",
                self.min_size, self.max_size
            )));
        }
        if self.growth_workers == 0 {
            return Err(crate::Error::Config("growth_workers must be at least 1".into()));
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> crate::Result<Self> {
        let config: PoolConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}
