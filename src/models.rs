//! Core data models that flow through the pipeline.
//!
//! [`Item`] is what connectors produce and the repository stores.
//! [`Verdict`] is the classification attached by a processor, and
//! [`ValidationResult`] is the raw `{valid, reason}` shape the LLM is asked
//! to produce. [`RunStats`] counts what happened to one source in one run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::PipelineError;

/// Canonical unit of crawled content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub processed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_result: Option<Verdict>,
    /// Assigned by the repository on first insert.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Item {
    pub fn new(id: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            metadata: serde_json::Map::new(),
            processed: false,
            filter_result: None,
            created_at: None,
        }
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// Pipeline-level classification result, stored as `filter_result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub passed: bool,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// `true` when the classifier failed to run, as opposed to rejecting.
    #[serde(default)]
    pub error: bool,
}

impl Verdict {
    /// A verdict from a classifier that actually ran.
    pub fn new(passed: bool, reason: impl Into<String>) -> Result<Self, PipelineError> {
        let reason = validate_reason(reason.into())?;
        Ok(Self {
            passed,
            reason,
            model: None,
            confidence: None,
            error: false,
        })
    }

    /// A negative verdict recording that classification could not run.
    ///
    /// Never fails: an empty description is replaced by a generic one.
    pub fn failure(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let reason = if reason.trim().is_empty() {
            "classification failed".to_string()
        } else {
            reason.trim().to_string()
        };
        Self {
            passed: false,
            reason,
            model: None,
            confidence: None,
            error: true,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Result<Self, PipelineError> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(PipelineError::ConfidenceOutOfRange(confidence));
        }
        self.confidence = Some(confidence);
        Ok(self)
    }
}

/// The raw structured answer requested from the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub reason: String,
}

impl ValidationResult {
    /// Build a result, trimming the reason and rejecting empty ones.
    pub fn new(valid: bool, reason: impl Into<String>) -> Result<Self, PipelineError> {
        Ok(Self {
            valid,
            reason: validate_reason(reason.into())?,
        })
    }

    /// JSON schema handed to Ollama's `format` field.
    pub fn json_schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "valid": { "type": "boolean" },
                "reason": { "type": "string", "minLength": 1 }
            },
            "required": ["valid", "reason"]
        })
    }
}

fn validate_reason(reason: String) -> Result<String, PipelineError> {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::EmptyReason);
    }
    Ok(trimmed.to_string())
}

/// Per-source counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub fetched: u64,
    pub processed: u64,
    pub passed: u64,
    pub failed: u64,
    pub errored: u64,
    #[serde(rename = "elapsed_secs", serialize_with = "serialize_secs")]
    pub elapsed: Duration,
}

impl RunStats {
    /// Record one classified item. `error` wins over `passed`.
    pub fn add_result(&mut self, passed: bool, error: bool) {
        self.processed += 1;
        if error {
            self.errored += 1;
        } else if passed {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
    }

    pub fn merge(&mut self, other: &RunStats) {
        self.fetched += other.fetched;
        self.processed += other.processed;
        self.passed += other.passed;
        self.failed += other.failed;
        self.errored += other.errored;
        self.elapsed += other.elapsed;
    }

    pub fn summary(&self) -> String {
        format!(
            "fetched: {}, processed: {}, passed: {}, failed: {}, errored: {}",
            self.fetched, self.processed, self.passed, self.failed, self.errored
        )
    }
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_result_keeps_processed_invariant() {
        let mut stats = RunStats::default();
        stats.add_result(true, false);
        stats.add_result(false, false);
        stats.add_result(true, true);
        stats.add_result(false, true);
        assert_eq!(stats.processed, 4);
        assert_eq!(stats.passed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.errored, 2);
        assert_eq!(
            stats.processed,
            stats.passed + stats.failed + stats.errored
        );
    }

    #[test]
    fn test_merge_sums_counters() {
        let mut a = RunStats {
            fetched: 3,
            elapsed: Duration::from_millis(500),
            ..Default::default()
        };
        a.add_result(true, false);
        let mut b = RunStats {
            fetched: 2,
            elapsed: Duration::from_millis(250),
            ..Default::default()
        };
        b.add_result(false, true);
        a.merge(&b);
        assert_eq!(a.fetched, 5);
        assert_eq!(a.processed, 2);
        assert_eq!(a.errored, 1);
        assert_eq!(a.elapsed, Duration::from_millis(750));
    }

    #[test]
    fn test_empty_reason_rejected() {
        assert!(matches!(
            ValidationResult::new(true, "   \n"),
            Err(PipelineError::EmptyReason)
        ));
        assert!(matches!(
            Verdict::new(false, ""),
            Err(PipelineError::EmptyReason)
        ));
    }

    #[test]
    fn test_reason_is_trimmed() {
        let r = ValidationResult::new(true, "  relevant  ").unwrap();
        assert_eq!(r.reason, "relevant");
    }

    #[test]
    fn test_confidence_bounds() {
        let v = Verdict::new(true, "ok").unwrap();
        assert!(v.clone().with_confidence(0.85).is_ok());
        assert!(matches!(
            v.with_confidence(1.5),
            Err(PipelineError::ConfidenceOutOfRange(_))
        ));
    }

    #[test]
    fn test_failure_verdict_never_empty() {
        let v = Verdict::failure("  ");
        assert!(v.error);
        assert!(!v.passed);
        assert!(!v.reason.is_empty());
    }

    #[test]
    fn test_stats_serialize_elapsed_seconds() {
        let stats = RunStats {
            fetched: 1,
            elapsed: Duration::from_millis(1500),
            ..Default::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["elapsed_secs"], 1.5);
        assert_eq!(json["fetched"], 1);
    }
}
