//! Pipeline orchestration.
//!
//! For each enabled source the controller runs:
//!
//! ```text
//! connector.fetch → dedup (tracker, else repository) → processor.classify
//!   → repository.upsert(batch) → tracker.mark(batch) → RunStats
//! ```
//!
//! Sources run one after another and items are classified one at a time.
//! A failing item becomes an error verdict and the batch continues; a
//! failing source becomes a zero-stat entry with its error and the next
//! source still runs. The repository is shared by all sources and closed
//! once when the run ends.

use anyhow::Result;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{Config, SourceConfig};
use crate::error::PipelineError;
use crate::llm::OllamaClient;
use crate::models::{Item, RunStats, Verdict};
use crate::repository::{Repository, SqliteRepository};
use crate::tracker::{DedupStore, ProcessedTracker};
use crate::traits::{ComponentRegistry, Processor};

/// Outcome of one source within a run.
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub name: String,
    pub stats: RunStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a whole run, in source order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub sources: Vec<SourceReport>,
}

impl RunReport {
    pub fn get(&self, name: &str) -> Option<&SourceReport> {
        self.sources.iter().find(|s| s.name == name)
    }

    pub fn totals(&self) -> RunStats {
        let mut total = RunStats::default();
        for source in &self.sources {
            total.merge(&source.stats);
        }
        total
    }

    pub fn failed_sources(&self) -> usize {
        self.sources.iter().filter(|s| s.error.is_some()).count()
    }

    /// Errored items plus failed sources. Non-zero means the run should
    /// exit with a failure status.
    pub fn error_count(&self) -> u64 {
        self.totals().errored + self.failed_sources() as u64
    }

    /// `{sources, totals, errors}` for `sieve run --json`.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "sources": self.sources,
            "totals": self.totals(),
            "errors": self.error_count(),
        })
    }

    pub fn print_table(&self) {
        println!(
            "{:<20} {:>8} {:>10} {:>7} {:>7} {:>8} {:>9}",
            "SOURCE", "FETCHED", "PROCESSED", "PASSED", "FAILED", "ERRORED", "ELAPSED"
        );
        for source in &self.sources {
            print_row(&source.name, &source.stats);
            if let Some(err) = &source.error {
                println!("  ! {}", err);
            }
        }
        print_row("total", &self.totals());
        println!();
        match self.error_count() {
            0 => println!("ok"),
            n => println!("{} error(s)", n),
        }
    }

    pub fn log_summary(&self) {
        for source in &self.sources {
            match &source.error {
                Some(err) => error!(source = %source.name, error = %err, "source failed"),
                None => info!(
                    source = %source.name,
                    elapsed_secs = source.stats.elapsed.as_secs_f64(),
                    "{}",
                    source.stats.summary()
                ),
            }
        }
        let totals = self.totals();
        info!(
            sources = self.sources.len(),
            failed_sources = self.failed_sources(),
            errors = self.error_count(),
            "run totals: {}",
            totals.summary()
        );
    }
}

fn print_row(name: &str, stats: &RunStats) {
    println!(
        "{:<20} {:>8} {:>10} {:>7} {:>7} {:>8} {:>8.2}s",
        name,
        stats.fetched,
        stats.processed,
        stats.passed,
        stats.failed,
        stats.errored,
        stats.elapsed.as_secs_f64()
    );
}

pub struct Controller {
    config: Config,
    registry: ComponentRegistry,
    gateway: Arc<OllamaClient>,
    store: Option<Arc<dyn DedupStore>>,
}

impl Controller {
    pub fn new(
        config: Config,
        registry: ComponentRegistry,
        gateway: Arc<OllamaClient>,
        store: Option<Arc<dyn DedupStore>>,
    ) -> Self {
        Self {
            config,
            registry,
            gateway,
            store,
        }
    }

    /// Run every enabled source against the configured SQLite database.
    pub async fn run_all(&self) -> Result<RunReport> {
        if self.config.enabled_sources().next().is_none() {
            info!("no enabled sources, nothing to do");
            return Ok(RunReport::default());
        }
        self.ensure_gateway().await?;

        let repo = SqliteRepository::connect(&self.config.db).await?;
        Ok(self.drive(&repo).await)
    }

    /// Like [`run_all`](Self::run_all) but against a caller-supplied
    /// repository. The repository is closed when the run ends.
    pub async fn run_with_repository(&self, repo: &dyn Repository) -> Result<RunReport> {
        if self.config.enabled_sources().next().is_none() {
            info!("no enabled sources, nothing to do");
            repo.close().await;
            return Ok(RunReport::default());
        }
        if let Err(e) = self.ensure_gateway().await {
            repo.close().await;
            return Err(e);
        }
        Ok(self.drive(repo).await)
    }

    async fn ensure_gateway(&self) -> Result<()> {
        info!(api_url = %self.gateway.api_url(), "checking LLM service");
        if !self.gateway.check_connection().await {
            return Err(PipelineError::LlmUnavailable {
                api_url: self.gateway.api_url().to_string(),
                model: self.gateway.model().to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn drive(&self, repo: &dyn Repository) -> RunReport {
        let sources: Vec<&SourceConfig> = self.config.enabled_sources().collect();
        info!(sources = sources.len(), "run starting");

        // Resolve every component name before any source runs.
        let checks: Vec<Result<(), PipelineError>> = sources
            .iter()
            .map(|s| self.registry.check_source(s))
            .collect();
        for (source, check) in sources.iter().zip(&checks) {
            if let Err(e) = check {
                error!(source = %source.name, error = %e, "source misconfigured");
            }
        }

        let mut report = RunReport::default();

        for (source, check) in sources.into_iter().zip(checks) {
            let started = Instant::now();
            let outcome = match check {
                Ok(()) => self.run_source(source, repo).await,
                Err(e) => Err(e.into()),
            };

            let entry = match outcome {
                Ok(stats) => SourceReport {
                    name: source.name.clone(),
                    stats,
                    error: None,
                },
                Err(e) => {
                    error!(source = %source.name, error = %format!("{:#}", e), "source run failed");
                    SourceReport {
                        name: source.name.clone(),
                        stats: RunStats {
                            elapsed: started.elapsed(),
                            ..Default::default()
                        },
                        error: Some(format!("{:#}", e)),
                    }
                }
            };
            report.sources.push(entry);
        }

        repo.close().await;
        report.log_summary();
        report
    }

    /// Fetch, dedup, classify, persist and mark one source.
    pub async fn run_source(&self, source: &SourceConfig, repo: &dyn Repository) -> Result<RunStats> {
        let started = Instant::now();
        let mut stats = RunStats::default();
        let mut tracker = ProcessedTracker::new(source.name.clone(), self.store.clone());

        info!(source = %source.name, connector = %source.connector, "source starting");

        let result = self
            .run_source_inner(source, repo, &tracker, &mut stats)
            .await;

        tracker.close();
        stats.elapsed = started.elapsed();
        result.map(|()| {
            info!(
                source = %source.name,
                elapsed_secs = stats.elapsed.as_secs_f64(),
                "source finished: {}",
                stats.summary()
            );
            stats
        })
    }

    async fn run_source_inner(
        &self,
        source: &SourceConfig,
        repo: &dyn Repository,
        tracker: &ProcessedTracker,
        stats: &mut RunStats,
    ) -> Result<()> {
        let connector = self
            .registry
            .build_connector(&source.connector, &source.config)?;

        let raw = connector.fetch().await?;
        stats.fetched = raw.len() as u64;
        info!(source = %source.name, fetched = raw.len(), "fetched");

        if raw.is_empty() {
            warn!(source = %source.name, "connector returned no items");
            return Ok(());
        }

        let seen = self.known_ids(source, repo, tracker).await?;
        let mut batch_ids = HashSet::new();
        let fresh: Vec<Item> = raw
            .into_iter()
            .filter(|item| !seen.contains(&item.id) && batch_ids.insert(item.id.clone()))
            .collect();
        info!(
            source = %source.name,
            new = fresh.len(),
            known = seen.len(),
            "dedup complete"
        );

        if fresh.is_empty() {
            return Ok(());
        }

        let batch = match &source.processor {
            Some(name) => {
                let processor = self.registry.build_processor(
                    name,
                    &source.processor_config,
                    self.gateway.clone(),
                )?;
                classify_batch(processor.as_ref(), fresh, stats).await
            }
            None => fresh,
        };

        let outcome = repo.upsert(&batch).await?;
        debug!(
            source = %source.name,
            inserted = outcome.inserted,
            updated = outcome.updated,
            "batch persisted"
        );

        for item in &batch {
            tracker.mark_processed(&item.id).await;
        }
        if let Some(last) = batch.last() {
            tracker.set_last_processed_id(&last.id).await;
        }

        Ok(())
    }

    /// Ids to skip: the tracker's set, or the repository's when the tracker
    /// has none.
    async fn known_ids(
        &self,
        source: &SourceConfig,
        repo: &dyn Repository,
        tracker: &ProcessedTracker,
    ) -> Result<HashSet<String>> {
        let ids = tracker.processed_ids().await;
        if !ids.is_empty() {
            debug!(source = %source.name, count = ids.len(), "known ids from dedup store");
            return Ok(ids);
        }
        if tracker.is_enabled() {
            debug!(source = %source.name, "dedup store empty, reading ids from repository");
        } else {
            warn!(source = %source.name, "dedup store unavailable, reading ids from repository");
        }
        repo.processed_ids().await
    }
}

/// Classify items one at a time. Errors stay with their item.
async fn classify_batch(
    processor: &dyn Processor,
    items: Vec<Item>,
    stats: &mut RunStats,
) -> Vec<Item> {
    let total = items.len();
    let mut out = Vec::with_capacity(total);

    for (idx, item) in items.into_iter().enumerate() {
        debug!(item_id = %item.id, "classifying {}/{}", idx + 1, total);
        let fallback = item.clone();

        let classified = match processor.classify(item).await {
            Ok(mut classified) => {
                if classified.filter_result.is_none() {
                    classified.processed = false;
                    classified.filter_result =
                        Some(Verdict::failure("processor returned no verdict"));
                }
                classified
            }
            Err(e) => {
                error!(item_id = %fallback.id, error = %e, "classification error");
                let mut failed = fallback;
                failed.processed = false;
                failed.filter_result = Some(Verdict::failure(format!(
                    "classification error: {}",
                    e
                )));
                failed
            }
        };

        if let Some(verdict) = &classified.filter_result {
            stats.add_result(verdict.passed, verdict.error);
        }
        out.push(classified);
    }

    out
}
