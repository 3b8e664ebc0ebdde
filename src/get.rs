//! Item read-back for `sieve get` and `sieve items`.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::models::Item;
use crate::repository::{ItemFilter, Repository, SqliteRepository};

/// Fetch one stored item. Missing ids are an error.
pub async fn get_item(config: &Config, id: &str) -> Result<Item> {
    let repo = SqliteRepository::connect(&config.db).await?;
    let item = repo.get_by_id(id).await;
    repo.close().await;

    match item? {
        Some(item) => Ok(item),
        None => bail!("item not found: {}", id),
    }
}

/// CLI entry point: print one item in full.
pub async fn run_get(config: &Config, id: &str, json: bool) -> Result<()> {
    let item = get_item(config, id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&item)?);
        return Ok(());
    }

    println!("--- Item ---");
    println!("id:          {}", item.id);
    println!("title:       {}", item.title);
    println!("created_at:  {}", format_created(&item));
    println!("processed:   {}", item.processed);
    match &item.filter_result {
        Some(v) => {
            println!("verdict:     {}", verdict_label(&item));
            println!("reason:      {}", v.reason);
            if let Some(model) = &v.model {
                println!("model:       {}", model);
            }
            if let Some(c) = v.confidence {
                println!("confidence:  {:.2}", c);
            }
        }
        None => println!("verdict:     (none)"),
    }
    println!(
        "metadata:    {}",
        serde_json::Value::Object(item.metadata.clone())
    );
    println!();
    println!("--- Content ---");
    println!("{}", item.content);

    Ok(())
}

/// CLI entry point: print a page of items as a table or JSON.
pub async fn run_items(config: &Config, filter: &ItemFilter, json: bool) -> Result<()> {
    let repo = SqliteRepository::connect(&config.db).await?;
    let items = repo.list_items(filter).await;
    repo.close().await;
    let items = items?;

    if json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("No items.");
        return Ok(());
    }

    println!("{:<20} {:<8} {:<48} ID", "CREATED", "VERDICT", "TITLE");
    for item in &items {
        println!(
            "{:<20} {:<8} {:<48} {}",
            format_created(item),
            verdict_label(item),
            truncate(&item.title, 48),
            item.id
        );
    }
    println!();
    println!("{} item(s)", items.len());

    Ok(())
}

fn verdict_label(item: &Item) -> &'static str {
    match &item.filter_result {
        None => "-",
        Some(v) if v.error => "error",
        Some(v) if v.passed => "pass",
        Some(_) => "fail",
    }
}

fn format_created(item: &Item) -> String {
    item.created_at
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", cut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Verdict;

    #[test]
    fn test_verdict_labels() {
        let mut item = Item::new("1", "t", "c");
        assert_eq!(verdict_label(&item), "-");
        item.filter_result = Some(Verdict::new(true, "ok").unwrap());
        assert_eq!(verdict_label(&item), "pass");
        item.filter_result = Some(Verdict::failure("boom"));
        assert_eq!(verdict_label(&item), "error");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
    }
}
