//! `sieve sources` and `sieve check`.

use anyhow::Result;
use serde::Serialize;

use crate::config::Config;
use crate::llm::OllamaClient;
use crate::repository::{Repository, SqliteRepository};
use crate::tracker;
use crate::traits::ComponentRegistry;

/// One configured source and whether its components resolve.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub name: String,
    pub connector: String,
    pub processor: Option<String>,
    pub enabled: bool,
    pub resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem: Option<String>,
}

pub fn source_statuses(config: &Config, registry: &ComponentRegistry) -> Vec<SourceStatus> {
    config
        .sources
        .iter()
        .map(|s| {
            let check = registry.check_source(s);
            SourceStatus {
                name: s.name.clone(),
                connector: s.connector.clone(),
                processor: s.processor.clone(),
                enabled: s.enabled,
                resolved: check.is_ok(),
                problem: check.err().map(|e| e.to_string()),
            }
        })
        .collect()
}

pub fn list_sources(config: &Config, registry: &ComponentRegistry) -> Result<()> {
    println!(
        "{:<20} {:<12} {:<12} {:<8} RESOLVED",
        "SOURCE", "CONNECTOR", "PROCESSOR", "ENABLED"
    );
    for s in source_statuses(config, registry) {
        println!(
            "{:<20} {:<12} {:<12} {:<8} {}",
            s.name,
            s.connector,
            s.processor.as_deref().unwrap_or("-"),
            s.enabled,
            s.resolved
        );
        if let Some(problem) = s.problem {
            println!("  ! {}", problem);
        }
    }
    println!();
    println!("connectors: {}", registry.connector_names().join(", "));
    println!("processors: {}", registry.processor_names().join(", "));
    Ok(())
}

/// Probe every collaborator and print one line each. Returns `true` when
/// the required ones (LLM and database) are healthy.
pub async fn run_check(config: &Config, use_dedup: bool) -> Result<bool> {
    let client = OllamaClient::new(&config.llm)?;
    let llm_ok = client.check_connection().await;
    println!(
        "{:<10} {:<6} {} (model {})",
        "llm",
        status(llm_ok),
        client.api_url(),
        client.model()
    );

    let db = SqliteRepository::connect(&config.db).await;
    let db_ok = db.is_ok();
    match db {
        Ok(repo) => {
            println!("{:<10} {:<6} {}", "database", "OK", config.db.path.display());
            repo.close().await;
        }
        Err(e) => println!("{:<10} {:<6} {:#}", "database", "FAIL", e),
    }

    match (use_dedup, config.dedup.url.as_deref()) {
        (true, Some(url)) => {
            let ok = tracker::connect_store(Some(url)).await.is_some();
            let note = if ok { "" } else { " (runs will fall back to the database)" };
            println!(
                "{:<10} {:<6} {}{}",
                "dedup",
                status(ok),
                tracker::redact_url(url),
                note
            );
        }
        _ => println!("{:<10} {:<6} disabled", "dedup", "-"),
    }

    Ok(llm_ok && db_ok)
}

fn status(ok: bool) -> &'static str {
    if ok {
        "OK"
    } else {
        "FAIL"
    }
}
