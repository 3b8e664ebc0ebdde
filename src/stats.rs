//! `sieve stats`: what the database holds.

use anyhow::Result;

use crate::config::Config;
use crate::repository::{Repository, SqliteRepository};

pub async fn run_stats(config: &Config, json: bool) -> Result<()> {
    let repo = SqliteRepository::connect(&config.db).await?;
    let stats = repo.statistics().await;
    repo.close().await;
    let stats = stats?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("crawl-sieve: Database Stats");
    println!("===========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Items:       {}", stats.total);
    println!(
        "  Processed:   {} / {} ({}%)",
        stats.processed,
        stats.total,
        percent(stats.processed, stats.total)
    );
    println!("  Passed:      {}", stats.passed);
    println!("  Failed:      {}", stats.failed);

    Ok(())
}

fn percent(part: i64, whole: i64) -> i64 {
    if whole > 0 {
        (part * 100) / whole
    } else {
        0
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_percent_of_empty_is_zero() {
        assert_eq!(percent(0, 0), 0);
        assert_eq!(percent(1, 4), 25);
    }
}
