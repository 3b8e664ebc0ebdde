use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Primary dedup store. No URL means the tracker runs degraded.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DedupConfig {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_api_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

/// One configured data source.
///
/// `config` and `processor_config` are opaque to the pipeline; the connector
/// and processor factories interpret them.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub name: String,
    pub connector: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub config: toml::Table,
    #[serde(default)]
    pub processor: Option<String>,
    #[serde(default)]
    pub processor_config: toml::Table,
}

fn default_enabled() -> bool {
    true
}

impl Config {
    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }

    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }
}

/// Deserialize a component's opaque config block into its typed form.
pub fn parse_block<T: DeserializeOwned>(table: &toml::Table, component: &str) -> Result<T> {
    toml::Value::Table(table.clone())
        .try_into()
        .with_context(|| format!("Invalid config for '{}'", component))
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate(&config)?;

    Ok(config)
}

/// Apply environment overrides. `lookup` is injected so tests need not touch
/// the process environment.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = lookup("DATABASE_PATH") {
        config.db.path = PathBuf::from(path);
    }
    if let Some(url) = lookup("REDIS_URL") {
        config.dedup.url = Some(url);
    }
    if let Some(url) = lookup("OLLAMA_URL") {
        config.llm.api_url = url;
    }
    if let Some(model) = lookup("OLLAMA_MODEL") {
        config.llm.model = model;
    }
    if let Some(timeout) = lookup("OLLAMA_TIMEOUT") {
        config.llm.timeout_secs = timeout
            .parse()
            .with_context(|| format!("OLLAMA_TIMEOUT must be an integer, got '{}'", timeout))?;
    }
    if let Some(level) = lookup("LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(file) = lookup("LOG_FILE") {
        config.logging.file = Some(PathBuf::from(file));
    }
    Ok(())
}

pub fn validate(config: &Config) -> Result<()> {
    if config.llm.api_url.trim().is_empty() {
        bail!("llm.api_url must not be empty (LLM filtering is required)");
    }
    if config.llm.model.trim().is_empty() {
        bail!("llm.model must not be empty (LLM filtering is required)");
    }
    if config.llm.timeout_secs == 0 {
        bail!("llm.timeout_secs must be > 0");
    }

    let level = config.logging.level.to_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        bail!(
            "Invalid logging.level: '{}'. Must be one of: {}",
            config.logging.level,
            LOG_LEVELS.join(", ")
        );
    }

    if config.sources.is_empty() {
        bail!("No sources configured: add at least one [[sources]] entry");
    }

    let mut seen = HashSet::new();
    for (idx, source) in config.sources.iter().enumerate() {
        if source.name.trim().is_empty() {
            bail!("sources[{}] is missing a name", idx);
        }
        if source.connector.trim().is_empty() {
            bail!("source '{}' is missing a connector", source.name);
        }
        if !seen.insert(source.name.as_str()) {
            bail!("duplicate source name: '{}'", source.name);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
[db]
path = "./data/sieve.sqlite"

[llm]
model = "llama3"

[[sources]]
name = "arxiv-ai"
connector = "arxiv"
processor = "llm_filter"
[sources.config]
query = "cat:cs.AI"
max_results = 10
[sources.processor_config]
filter_prompt = "Is it about safety?"

[[sources]]
name = "notes"
connector = "filesystem"
enabled = false
[sources.config]
root = "./notes"
"#;

    fn sample() -> Config {
        toml::from_str(SAMPLE).unwrap()
    }

    #[test]
    fn test_defaults_applied() {
        let cfg = sample();
        assert_eq!(cfg.llm.api_url, "http://localhost:11434");
        assert_eq!(cfg.llm.timeout_secs, 30);
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.dedup.url.is_none());
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn test_enabled_sources_filters_disabled() {
        let cfg = sample();
        let names: Vec<&str> = cfg.enabled_sources().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["arxiv-ai"]);
        assert_eq!(
            cfg.source("arxiv-ai").unwrap().config["max_results"].as_integer(),
            Some(10)
        );
    }

    #[test]
    fn test_env_overrides() {
        let mut cfg = sample();
        let env: HashMap<&str, &str> = [
            ("REDIS_URL", "redis://cache:6379/1"),
            ("OLLAMA_MODEL", "mistral"),
            ("OLLAMA_TIMEOUT", "90"),
            ("LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();
        apply_env_overrides(&mut cfg, |k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.dedup.url.as_deref(), Some("redis://cache:6379/1"));
        assert_eq!(cfg.llm.model, "mistral");
        assert_eq!(cfg.llm.timeout_secs, 90);
        assert_eq!(cfg.logging.level, "debug");
    }

    #[test]
    fn test_bad_timeout_override_rejected() {
        let mut cfg = sample();
        let result = apply_env_overrides(&mut cfg, |k| {
            (k == "OLLAMA_TIMEOUT").then(|| "soon".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_rejects_duplicates_and_empty() {
        let mut cfg = sample();
        cfg.sources[1].name = "arxiv-ai".to_string();
        assert!(validate(&cfg).is_err());

        let mut cfg = sample();
        cfg.sources.clear();
        assert!(validate(&cfg).is_err());

        let mut cfg = sample();
        cfg.logging.level = "loud".to_string();
        assert!(validate(&cfg).is_err());

        let mut cfg = sample();
        cfg.llm.model = " ".to_string();
        assert!(validate(&cfg).is_err());
    }
}
