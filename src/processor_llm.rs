//! `llm_filter` processor: asks the LLM whether an item matches a prompt.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::parse_block;
use crate::llm::{LlmOutcome, OllamaClient};
use crate::models::{Item, Verdict};
use crate::traits::Processor;

pub const DEFAULT_FILTER_PROMPT: &str =
    "Decide whether the following content is relevant. Answer YES or NO and briefly explain why.";

#[derive(Debug, Deserialize, Clone)]
pub struct LlmFilterConfig {
    #[serde(default)]
    pub filter_prompt: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
}

fn default_max_content_chars() -> usize {
    1000
}

pub struct LlmFilterProcessor {
    filter_prompt: String,
    system_prompt: Option<String>,
    max_content_chars: usize,
    client: Arc<OllamaClient>,
}

impl LlmFilterProcessor {
    pub fn new(config: LlmFilterConfig, client: Arc<OllamaClient>) -> Self {
        let filter_prompt = match config.filter_prompt {
            Some(p) if !p.trim().is_empty() => p,
            _ => {
                warn!("llm_filter has no filter_prompt, using the default");
                DEFAULT_FILTER_PROMPT.to_string()
            }
        };
        Self {
            filter_prompt,
            system_prompt: config.system_prompt,
            max_content_chars: config.max_content_chars,
            client,
        }
    }

    pub fn from_table(table: &toml::Table, client: Arc<OllamaClient>) -> Result<Self> {
        Ok(Self::new(parse_block(table, "llm_filter")?, client))
    }

    /// Filter prompt, title, then the content cut to `max_content_chars`.
    pub fn build_prompt(&self, item: &Item) -> String {
        let mut content: String = item.content.chars().take(self.max_content_chars).collect();
        if content.len() < item.content.len() {
            content.push_str("...");
        }
        format!(
            "{}\n\nTitle: {}\nContent: {}\n",
            self.filter_prompt, item.title, content
        )
    }
}

#[async_trait]
impl Processor for LlmFilterProcessor {
    fn name(&self) -> &str {
        "llm_filter"
    }

    async fn classify(&self, mut item: Item) -> Result<Item> {
        let prompt = self.build_prompt(&item);
        debug!(item_id = %item.id, "classifying");

        let outcome = self
            .client
            .classify(&prompt, self.system_prompt.as_deref())
            .await?;

        let verdict = match outcome {
            LlmOutcome::Answered(result) => {
                item.processed = true;
                Verdict::new(result.valid, result.reason)?
            }
            LlmOutcome::Failed { reason } => {
                item.processed = false;
                Verdict::failure(reason)
            }
        }
        .with_model(self.client.model());

        if verdict.error {
            warn!(item_id = %item.id, reason = %verdict.reason, "classification failed");
        } else {
            let head: String = verdict.reason.chars().take(50).collect();
            info!(item_id = %item.id, passed = verdict.passed, reason = %head, "classified");
        }

        item.filter_result = Some(verdict);
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;

    fn processor(max_content_chars: usize) -> LlmFilterProcessor {
        let client = OllamaClient::new(&LlmConfig {
            api_url: "http://127.0.0.1:9".into(),
            model: "llama3".into(),
            timeout_secs: 1,
            max_retries: 0,
        })
        .unwrap();
        LlmFilterProcessor::new(
            LlmFilterConfig {
                filter_prompt: Some("Is it about robots?".into()),
                system_prompt: None,
                max_content_chars,
            },
            Arc::new(client),
        )
    }

    #[test]
    fn test_prompt_truncates_content() {
        let p = processor(5);
        let prompt = p.build_prompt(&Item::new("1", "Robots", "abcdefghij"));
        assert!(prompt.starts_with("Is it about robots?"));
        assert!(prompt.contains("Title: Robots"));
        assert!(prompt.contains("Content: abcde...\n"));
        assert!(!prompt.contains("abcdef"));
    }

    #[test]
    fn test_short_content_is_not_marked_truncated() {
        let p = processor(1000);
        let prompt = p.build_prompt(&Item::new("1", "T", "short"));
        assert!(prompt.ends_with("Content: short\n"));
    }

    #[test]
    fn test_missing_prompt_uses_default() {
        let client = Arc::new(
            OllamaClient::new(&LlmConfig {
                api_url: "http://127.0.0.1:9".into(),
                model: "llama3".into(),
                timeout_secs: 1,
                max_retries: 0,
            })
            .unwrap(),
        );
        let p = LlmFilterProcessor::from_table(&toml::Table::new(), client).unwrap();
        assert_eq!(p.filter_prompt, DEFAULT_FILTER_PROMPT);
        assert_eq!(p.max_content_chars, 1000);
    }

    #[tokio::test]
    async fn test_unreachable_backend_yields_error_verdict() {
        let p = processor(1000);
        let item = p.classify(Item::new("1", "T", "body")).await.unwrap();
        assert!(!item.processed);
        let verdict = item.filter_result.unwrap();
        assert!(verdict.error);
        assert!(!verdict.passed);
        assert_eq!(verdict.model.as_deref(), Some("llama3"));
    }
}
