use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::parse_block;
use crate::models::Item;
use crate::traits::Connector;

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

/// Turns text files under a root directory into items keyed by relative path.
pub struct FilesystemConnector {
    config: FilesystemConfig,
}

impl FilesystemConnector {
    pub fn new(config: FilesystemConfig) -> Self {
        Self { config }
    }

    pub fn from_table(table: &toml::Table) -> Result<Self> {
        Ok(Self::new(parse_block(table, "filesystem")?))
    }

    pub fn scan(&self) -> Result<Vec<Item>> {
        let root = &self.config.root;
        if !root.exists() {
            bail!(
                "Filesystem connector root does not exist: {}",
                root.display()
            );
        }

        let include_set = build_globset(&self.config.include_globs)?;

        let mut excludes = vec![
            "**/.git/**".to_string(),
            "**/target/**".to_string(),
            "**/node_modules/**".to_string(),
        ];
        excludes.extend(self.config.exclude_globs.iter().cloned());
        let exclude_set = build_globset(&excludes)?;

        let mut items = Vec::new();

        for entry in WalkDir::new(root).follow_links(self.config.follow_symlinks) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().replace('\\', "/");

            if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
                continue;
            }

            items.push(file_to_item(path, &rel_str)?);
        }

        // Deterministic order, so the last id of a batch is stable.
        items.sort_by(|a, b| a.id.cmp(&b.id));

        Ok(items)
    }
}

#[async_trait]
impl Connector for FilesystemConnector {
    fn name(&self) -> &str {
        "filesystem"
    }

    fn description(&self) -> &str {
        "Text files under a local directory"
    }

    async fn fetch(&self) -> Result<Vec<Item>> {
        self.scan()
    }
}

fn file_to_item(path: &Path, relative_path: &str) -> Result<Item> {
    let metadata = std::fs::metadata(path)?;
    let modified: DateTime<Utc> = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_default();

    let body = std::fs::read_to_string(path).unwrap_or_default();

    let title = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    Ok(Item::new(relative_path, title, body)
        .with_metadata("path", serde_json::json!(path.display().to_string()))
        .with_metadata("size", serde_json::json!(metadata.len()))
        .with_metadata("modified", serde_json::json!(modified.to_rfc3339())))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    #[tokio::test]
    async fn test_scan_applies_globs() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "b.md", "# B");
        write(tmp.path(), "notes/a.txt", "alpha");
        write(tmp.path(), "skip.rs", "fn main() {}");
        write(tmp.path(), "drafts/c.md", "draft");
        write(tmp.path(), "node_modules/x.md", "vendored");

        let mut table = toml::Table::new();
        table.insert(
            "root".into(),
            toml::Value::String(tmp.path().display().to_string()),
        );
        table.insert(
            "exclude_globs".into(),
            toml::Value::Array(vec![toml::Value::String("drafts/**".into())]),
        );

        let connector = FilesystemConnector::from_table(&table).unwrap();
        let items = connector.fetch().await.unwrap();
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["b.md", "notes/a.txt"]);
        assert_eq!(items[1].title, "a.txt");
        assert_eq!(items[1].content, "alpha");
        assert_eq!(items[1].metadata["size"], 5);
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let connector = FilesystemConnector::new(FilesystemConfig {
            root: PathBuf::from("/definitely/not/here"),
            include_globs: default_include_globs(),
            exclude_globs: vec![],
            follow_symlinks: false,
        });
        assert!(connector.scan().is_err());
    }

    #[test]
    fn test_root_is_required() {
        assert!(FilesystemConnector::from_table(&toml::Table::new()).is_err());
    }
}
