//! # crawl-sieve
//!
//! Fetches items from pluggable sources, drops the ones already seen,
//! classifies the rest with a local LLM (Ollama) and stores the results in
//! SQLite, keeping per-source run statistics.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌───────────────┐   ┌──────────────┐   ┌──────────┐
//! │ Connectors  │──▶│ Dedup         │──▶│ Processors   │──▶│  SQLite  │
//! │ arxiv / fs  │   │ Redis, else DB│   │ llm_filter   │   │  items   │
//! └─────────────┘   └───────────────┘   └──────┬───────┘   └────┬─────┘
//!                                              ▼                │
//!                                         ┌──────────┐     ┌────┴─────┐
//!                                         │  Ollama  │     │ CLI/HTTP │
//!                                         └──────────┘     └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Item, verdict and run statistics types |
//! | [`traits`] | Connector / processor traits and the component registry |
//! | [`controller`] | Per-source pipeline orchestration |
//! | [`tracker`] | Dedup tracking over Redis |
//! | [`repository`] | Durable item storage |
//! | [`llm`] | Ollama gateway |
//! | [`connector_arxiv`] | arXiv connector |
//! | [`connector_fs`] | Filesystem connector |
//! | [`processor_llm`] | LLM filter processor |
//! | [`server`] | Read-only status HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod connector_arxiv;
pub mod connector_fs;
pub mod controller;
pub mod db;
pub mod error;
pub mod get;
pub mod llm;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod processor_llm;
pub mod repository;
pub mod server;
pub mod sources;
pub mod stats;
pub mod tracker;
pub mod traits;
