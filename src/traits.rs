//! Pluggable pipeline stages.
//!
//! A source names its [`Connector`] and, optionally, its [`Processor`] by
//! string key. The [`ComponentRegistry`] maps those keys to factory
//! functions that build a fresh instance from the source's config block.
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            ComponentRegistry             │
//! │  connectors: arxiv, filesystem, ...      │
//! │  processors: llm_filter, ...             │
//! └──────────────┬───────────────────────────┘
//!                ▼
//!       Controller::run_source() per source
//! ```
//!
//! # Custom components
//!
//! ```rust
//! use anyhow::Result;
//! use async_trait::async_trait;
//! use crawl_sieve::models::Item;
//! use crawl_sieve::traits::{ComponentRegistry, Connector};
//!
//! struct Fixed;
//!
//! #[async_trait]
//! impl Connector for Fixed {
//!     fn name(&self) -> &str { "fixed" }
//!     async fn fetch(&self) -> Result<Vec<Item>> {
//!         Ok(vec![Item::new("1", "Hello", "world")])
//!     }
//! }
//!
//! let mut registry = ComponentRegistry::with_builtins();
//! registry.register_connector("fixed", |_cfg| Ok(Box::new(Fixed) as Box<dyn Connector>));
//! assert!(registry.connector_names().contains(&"fixed".to_string()));
//! ```

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::SourceConfig;
use crate::connector_arxiv::ArxivConnector;
use crate::connector_fs::FilesystemConnector;
use crate::error::PipelineError;
use crate::llm::OllamaClient;
use crate::models::Item;
use crate::processor_llm::LlmFilterProcessor;

/// Produces a batch of items from an external source.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Registry key this connector was built from (e.g. `"arxiv"`).
    fn name(&self) -> &str;

    /// One-line description for `sieve sources`.
    fn description(&self) -> &str {
        ""
    }

    /// Fetch the current batch. An error means the whole fetch failed.
    async fn fetch(&self) -> Result<Vec<Item>>;
}

/// Post-fetch stage that attaches a verdict to an item.
#[async_trait]
pub trait Processor: Send + Sync {
    fn name(&self) -> &str;

    /// Return `item` with `processed` and `filter_result` filled in.
    ///
    /// Errors are per item; the controller records them and moves on.
    async fn classify(&self, item: Item) -> Result<Item>;
}

pub type ConnectorFactory = Box<dyn Fn(&toml::Table) -> Result<Box<dyn Connector>> + Send + Sync>;

pub type ProcessorFactory =
    Box<dyn Fn(&toml::Table, Arc<OllamaClient>) -> Result<Box<dyn Processor>> + Send + Sync>;

/// Name-to-factory lookup for connectors and processors.
pub struct ComponentRegistry {
    connectors: BTreeMap<String, ConnectorFactory>,
    processors: BTreeMap<String, ProcessorFactory>,
}

impl ComponentRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            connectors: BTreeMap::new(),
            processors: BTreeMap::new(),
        }
    }

    /// A registry holding the built-in `arxiv`, `filesystem` and
    /// `llm_filter` components.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_connector("arxiv", |cfg| {
            Ok(Box::new(ArxivConnector::from_table(cfg)?) as Box<dyn Connector>)
        });
        registry.register_connector("filesystem", |cfg| {
            Ok(Box::new(FilesystemConnector::from_table(cfg)?) as Box<dyn Connector>)
        });
        registry.register_processor("llm_filter", |cfg, client| {
            Ok(Box::new(LlmFilterProcessor::from_table(cfg, client)?) as Box<dyn Processor>)
        });
        registry
    }

    /// Register (or replace) a connector factory.
    pub fn register_connector<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&toml::Table) -> Result<Box<dyn Connector>> + Send + Sync + 'static,
    {
        self.connectors.insert(name.to_string(), Box::new(factory));
    }

    /// Register (or replace) a processor factory.
    pub fn register_processor<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&toml::Table, Arc<OllamaClient>) -> Result<Box<dyn Processor>>
            + Send
            + Sync
            + 'static,
    {
        self.processors.insert(name.to_string(), Box::new(factory));
    }

    pub fn connector_names(&self) -> Vec<String> {
        self.connectors.keys().cloned().collect()
    }

    pub fn processor_names(&self) -> Vec<String> {
        self.processors.keys().cloned().collect()
    }

    pub fn has_connector(&self, name: &str) -> bool {
        self.connectors.contains_key(name)
    }

    pub fn has_processor(&self, name: &str) -> bool {
        self.processors.contains_key(name)
    }

    /// Check that every component a source names is registered.
    pub fn check_source(&self, source: &SourceConfig) -> Result<(), PipelineError> {
        if !self.has_connector(&source.connector) {
            return Err(PipelineError::UnknownConnector {
                name: source.connector.clone(),
                available: self.connector_names().join(", "),
            });
        }
        if let Some(processor) = &source.processor {
            if !self.has_processor(processor) {
                return Err(PipelineError::UnknownProcessor {
                    name: processor.clone(),
                    available: self.processor_names().join(", "),
                });
            }
        }
        Ok(())
    }

    /// Build the named connector from its config block.
    pub fn build_connector(&self, name: &str, config: &toml::Table) -> Result<Box<dyn Connector>> {
        let factory = self
            .connectors
            .get(name)
            .ok_or_else(|| PipelineError::UnknownConnector {
                name: name.to_string(),
                available: self.connector_names().join(", "),
            })?;
        factory(config)
    }

    /// Build the named processor, handing it the shared LLM client.
    pub fn build_processor(
        &self,
        name: &str,
        config: &toml::Table,
        client: Arc<OllamaClient>,
    ) -> Result<Box<dyn Processor>> {
        let factory = self
            .processors
            .get(name)
            .ok_or_else(|| PipelineError::UnknownProcessor {
                name: name.to_string(),
                available: self.processor_names().join(", "),
            })?;
        factory(config, client)
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Empty;

    #[async_trait]
    impl Connector for Empty {
        fn name(&self) -> &str {
            "empty"
        }
        async fn fetch(&self) -> Result<Vec<Item>> {
            Ok(Vec::new())
        }
    }

    fn source(connector: &str, processor: Option<&str>) -> SourceConfig {
        SourceConfig {
            name: "s".to_string(),
            connector: connector.to_string(),
            enabled: true,
            config: toml::Table::new(),
            processor: processor.map(str::to_string),
            processor_config: toml::Table::new(),
        }
    }

    #[test]
    fn test_builtins_registered() {
        let registry = ComponentRegistry::with_builtins();
        assert_eq!(registry.connector_names(), vec!["arxiv", "filesystem"]);
        assert_eq!(registry.processor_names(), vec!["llm_filter"]);
    }

    #[test]
    fn test_check_source_reports_unknown_names() {
        let registry = ComponentRegistry::with_builtins();
        assert!(registry.check_source(&source("arxiv", Some("llm_filter"))).is_ok());

        let err = registry.check_source(&source("rss", None)).unwrap_err();
        assert!(matches!(err, PipelineError::UnknownConnector { .. }));
        assert!(err.to_string().contains("arxiv, filesystem"));

        let err = registry
            .check_source(&source("arxiv", Some("sentiment")))
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnknownProcessor { .. }));
    }

    #[tokio::test]
    async fn test_register_custom_connector() {
        let mut registry = ComponentRegistry::new();
        registry.register_connector("empty", |_| Ok(Box::new(Empty) as Box<dyn Connector>));
        let connector = registry
            .build_connector("empty", &toml::Table::new())
            .unwrap();
        assert_eq!(connector.name(), "empty");
        assert!(connector.fetch().await.unwrap().is_empty());
        assert!(registry
            .build_connector("missing", &toml::Table::new())
            .is_err());
    }
}
