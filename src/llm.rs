//! Ollama gateway.
//!
//! [`OllamaClient`] issues structured-output requests to a local Ollama
//! instance and turns the reply into a [`ValidationResult`].
//!
//! # Parsing
//!
//! The request carries the `{valid, reason}` JSON schema in Ollama's
//! `format` field, so a well-behaved model answers with exactly that
//! object. When it doesn't, the raw text is scanned for yes/no style words.
//! Affirmative words are checked first and an answer with neither kind is
//! treated as `valid = false`.
//!
//! # Failures
//!
//! Transport problems never escape [`OllamaClient::classify`]: they become
//! [`LlmOutcome::Failed`]. The only error returned is
//! [`PipelineError::EmptyReason`], raised when the model's reason is blank.
//!
//! Retries follow the usual policy: network errors, HTTP 429 and 5xx are
//! retried with exponential backoff (1s, 2s, 4s, ...) up to
//! `llm.max_retries`; other 4xx responses fail immediately.

use anyhow::{bail, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::LlmConfig;
use crate::error::PipelineError;
use crate::models::ValidationResult;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

const AFFIRMATIVE: &[&str] = &["yes", "true", "valid"];
const NEGATIVE: &[&str] = &["no", "false", "invalid"];

/// What the gateway concluded about one prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmOutcome {
    /// The model answered, either in schema or via the text heuristic.
    Answered(ValidationResult),
    /// The request could not be completed.
    Failed { reason: String },
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Debug, Deserialize)]
struct RawValidation {
    valid: bool,
    reason: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

pub struct OllamaClient {
    api_url: String,
    model: String,
    max_retries: u32,
    http: reqwest::Client,
}

impl OllamaClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        info!(api_url = %config.api_url, model = %config.model, "ollama client ready");

        Ok(Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_retries: config.max_retries,
            http,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// `POST /api/generate` with `stream: false` and temperature 0.
    /// Returns the generated text.
    pub async fn generate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        format: Option<serde_json::Value>,
    ) -> Result<String> {
        let mut body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": { "temperature": 0.0 },
        });
        if let Some(system) = system_prompt {
            body["system"] = serde_json::Value::String(system.to_string());
        }
        if let Some(format) = format {
            body["format"] = format;
        }

        let url = format!("{}/api/generate", self.api_url);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(attempt, delay_secs = delay.as_secs(), "retrying ollama request");
                tokio::time::sleep(delay).await;
            }

            let resp = self.http.post(&url).json(&body).send().await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let parsed: GenerateResponse = response.json().await?;
                        debug!(chars = parsed.response.len(), "ollama responded");
                        return Ok(parsed.response);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow::anyhow!(
                            "Ollama API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    bail!("Ollama API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(anyhow::anyhow!(
                        "Ollama connection error (is Ollama running at {}?): {}",
                        self.api_url,
                        e
                    ));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Ollama request failed after retries")))
    }

    /// Ask the model for a `{valid, reason}` verdict on `prompt`.
    pub async fn classify(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
    ) -> Result<LlmOutcome, PipelineError> {
        let text = match self
            .generate(prompt, system_prompt, Some(ValidationResult::json_schema()))
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "ollama request failed");
                return Ok(LlmOutcome::Failed {
                    reason: format!("LLM request failed: {}", e),
                });
            }
        };

        parse_validation(&text).map(LlmOutcome::Answered)
    }

    /// Probe `GET /api/tags`. `true` means the service answered; a missing
    /// model only produces a warning.
    pub async fn check_connection(&self) -> bool {
        let url = format!("{}/api/tags", self.api_url);
        let resp = self.http.get(&url).timeout(PROBE_TIMEOUT).send().await;

        let response = match resp.and_then(|r| r.error_for_status()) {
            Ok(r) => r,
            Err(e) => {
                warn!(api_url = %self.api_url, error = %e, "ollama unreachable");
                return false;
            }
        };

        match response.json::<TagsResponse>().await {
            Ok(tags) => {
                let names: Vec<&str> = tags.models.iter().map(|m| m.name.as_str()).collect();
                info!(models = %names.join(", "), "ollama reachable");
                if !names.iter().any(|n| model_matches(n, &self.model)) {
                    warn!(model = %self.model, "configured model is not installed in ollama");
                }
            }
            Err(e) => {
                warn!(error = %e, "could not read ollama model list");
            }
        }
        true
    }
}

/// `llama3` matches an installed `llama3:latest`.
fn model_matches(installed: &str, wanted: &str) -> bool {
    installed == wanted
        || installed
            .strip_prefix(wanted)
            .is_some_and(|rest| rest.starts_with(':'))
}

/// Parse the model's text: schema JSON first, word heuristic second.
pub fn parse_validation(text: &str) -> Result<ValidationResult, PipelineError> {
    match serde_json::from_str::<RawValidation>(text) {
        Ok(raw) => ValidationResult::new(raw.valid, raw.reason),
        Err(e) => {
            debug!(error = %e, "response is not schema JSON, using text heuristic");
            ValidationResult::new(heuristic_valid(text), text)
        }
    }
}

/// Whole-word scan of the lower-cased text. An affirmative word anywhere
/// wins; otherwise the answer is negative.
pub fn heuristic_valid(text: &str) -> bool {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    if words.iter().any(|w| AFFIRMATIVE.contains(w)) {
        return true;
    }
    if !words.iter().any(|w| NEGATIVE.contains(w)) {
        debug!("no yes/no word in response, treating as invalid");
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_schema_json() {
        let r = parse_validation(r#"{"valid": true, "reason": " on topic "}"#).unwrap();
        assert!(r.valid);
        assert_eq!(r.reason, "on topic");
    }

    #[test]
    fn test_empty_reason_in_json_is_an_error() {
        let err = parse_validation(r#"{"valid": true, "reason": "  "}"#).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyReason));
    }

    #[test]
    fn test_empty_text_is_an_error() {
        assert!(matches!(
            parse_validation("   "),
            Err(PipelineError::EmptyReason)
        ));
    }

    #[test]
    fn test_heuristic_affirmative() {
        let r = parse_validation("Yes, this seems valid.").unwrap();
        assert!(r.valid);
        assert_eq!(r.reason, "Yes, this seems valid.");
    }

    #[test]
    fn test_heuristic_affirmative_wins_over_negative() {
        let r = parse_validation("Yes, no doubt this is relevant.").unwrap();
        assert!(r.valid);
        assert!(heuristic_valid("true? false."));
    }

    #[test]
    fn test_heuristic_negative() {
        assert!(!heuristic_valid("No, this is off topic."));
        // "invalid" is its own word, not "valid"
        assert!(!heuristic_valid("The claim is INVALID"));
        assert!(!heuristic_valid("false"));
    }

    #[test]
    fn test_heuristic_defaults_to_false() {
        assert!(!heuristic_valid("Maybe, hard to say"));
        // substrings do not count
        assert!(!heuristic_valid("noteworthy yesterday"));
    }

    #[test]
    fn test_schema_mismatch_falls_back_to_heuristic() {
        let r = parse_validation(r#"{"answer": "yes"}"#).unwrap();
        assert!(r.valid);
    }

    #[test]
    fn test_model_matches_tag() {
        assert!(model_matches("llama3:latest", "llama3"));
        assert!(model_matches("llama3", "llama3"));
        assert!(!model_matches("llama3.1:8b", "llama3"));
    }
}
