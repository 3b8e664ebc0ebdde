//! Tracing subscriber setup.
//!
//! Logs go to stderr so stdout stays clean for command output. When
//! `logging.file` is set, a second plain-text layer appends to that file.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

const QUIET_CRATES: &[&str] = &["sqlx", "hyper", "hyper_util", "reqwest", "redis"];

/// Build the filter directive for `level`, capping chatty dependencies.
pub fn filter_directive(level: &str) -> String {
    let mut directive = level.to_lowercase();
    for krate in QUIET_CRATES {
        directive.push_str(&format!(",{}=warn", krate));
    }
    directive
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(&config.level)));

    let stderr_layer = fmt::layer().with_target(true).with_writer(std::io::stderr);

    let file_layer = match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive_caps_dependencies() {
        let d = filter_directive("DEBUG");
        assert!(d.starts_with("debug,"));
        assert!(d.contains("sqlx=warn"));
        assert!(d.contains("redis=warn"));
        assert!(EnvFilter::try_new(&d).is_ok());
    }
}
