//! arXiv connector.
//!
//! Queries the arXiv export API and converts each Atom `<entry>` into an
//! [`Item`]: the abstract URL is the id, the abstract is the content, and
//! authors, categories, dates, links and journal details go into metadata.
//!
//! ```toml
//! [[sources]]
//! name = "arxiv-ai"
//! connector = "arxiv"
//! [sources.config]
//! query = "cat:cs.AI AND abs:alignment"
//! max_results = 50                  # 1..=1000
//! sort_by = "submittedDate"         # relevance | lastUpdatedDate | submittedDate
//! sort_order = "descending"         # ascending | descending
//! start_date = "2024-01-01"         # optional, on the published date
//! end_date = "2024-06-30"           # optional, inclusive
//! ```

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use quick_xml::events::{BytesStart, Event};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::parse_block;
use crate::models::Item;
use crate::traits::Connector;

const MAX_RESULTS_LIMIT: u32 = 1000;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum SortBy {
    Relevance,
    LastUpdatedDate,
    #[default]
    SubmittedDate,
}

impl SortBy {
    fn as_param(self) -> &'static str {
        match self {
            SortBy::Relevance => "relevance",
            SortBy::LastUpdatedDate => "lastUpdatedDate",
            SortBy::SubmittedDate => "submittedDate",
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

impl SortOrder {
    fn as_param(self) -> &'static str {
        match self {
            SortOrder::Ascending => "ascending",
            SortOrder::Descending => "descending",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArxivConfig {
    pub query: String,
    pub max_results: u32,
    #[serde(default)]
    pub sort_by: SortBy,
    #[serde(default)]
    pub sort_order: SortOrder,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_url() -> String {
    "http://export.arxiv.org/api/query".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

/// One parsed Atom entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArxivEntry {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub authors: Vec<String>,
    pub categories: Vec<String>,
    pub primary_category: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub pdf_url: Option<String>,
    pub comment: Option<String>,
    pub journal_ref: Option<String>,
    pub doi: Option<String>,
}

impl ArxivEntry {
    pub fn into_item(self) -> Item {
        Item::new(self.id, self.title, self.summary)
            .with_metadata("authors", serde_json::json!(self.authors))
            .with_metadata("categories", serde_json::json!(self.categories))
            .with_metadata("primary_category", serde_json::json!(self.primary_category))
            .with_metadata(
                "published",
                serde_json::json!(self.published.map(|d| d.to_rfc3339())),
            )
            .with_metadata(
                "updated",
                serde_json::json!(self.updated.map(|d| d.to_rfc3339())),
            )
            .with_metadata("pdf_url", serde_json::json!(self.pdf_url))
            .with_metadata("comment", serde_json::json!(self.comment))
            .with_metadata("journal_ref", serde_json::json!(self.journal_ref))
            .with_metadata("doi", serde_json::json!(self.doi))
    }
}

pub struct ArxivConnector {
    config: ArxivConfig,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    http: reqwest::Client,
}

impl ArxivConnector {
    pub fn new(config: ArxivConfig) -> Result<Self> {
        if config.query.trim().is_empty() {
            bail!("arxiv.query must not be empty");
        }
        if config.max_results == 0 || config.max_results > MAX_RESULTS_LIMIT {
            bail!(
                "arxiv.max_results must be between 1 and {}, got {}",
                MAX_RESULTS_LIMIT,
                config.max_results
            );
        }

        let start = config
            .start_date
            .as_deref()
            .map(|s| parse_bound(s, false))
            .transpose()?;
        let end = config
            .end_date
            .as_deref()
            .map(|s| parse_bound(s, true))
            .transpose()?;
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                bail!("arxiv.start_date is after arxiv.end_date");
            }
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            config,
            start,
            end,
            http,
        })
    }

    pub fn from_table(table: &toml::Table) -> Result<Self> {
        Self::new(parse_block(table, "arxiv")?)
    }

    fn in_window(&self, entry: &ArxivEntry) -> bool {
        let Some(published) = entry.published else {
            return self.start.is_none() && self.end.is_none();
        };
        if self.start.is_some_and(|s| published < s) {
            debug!(entry = %entry.id, "published before start_date, skipping");
            return false;
        }
        if self.end.is_some_and(|e| published > e) {
            debug!(entry = %entry.id, "published after end_date, skipping");
            return false;
        }
        true
    }
}

#[async_trait]
impl Connector for ArxivConnector {
    fn name(&self) -> &str {
        "arxiv"
    }

    fn description(&self) -> &str {
        "Papers from the arXiv export API"
    }

    async fn fetch(&self) -> Result<Vec<Item>> {
        info!(query = %self.config.query, max_results = self.config.max_results, "querying arxiv");

        let max_results = self.config.max_results.to_string();
        let response = self
            .http
            .get(&self.config.api_url)
            .query(&[
                ("search_query", self.config.query.as_str()),
                ("start", "0"),
                ("max_results", max_results.as_str()),
                ("sortBy", self.config.sort_by.as_param()),
                ("sortOrder", self.config.sort_order.as_param()),
            ])
            .send()
            .await
            .with_context(|| format!("arxiv request to {} failed", self.config.api_url))?
            .error_for_status()?;

        let body = response.text().await?;
        let entries = parse_feed(&body)?;
        let total = entries.len();

        let items: Vec<Item> = entries
            .into_iter()
            .filter(|e| self.in_window(e))
            .map(ArxivEntry::into_item)
            .collect();

        info!(entries = total, kept = items.len(), "arxiv fetch complete");
        Ok(items)
    }
}

/// Accept `YYYY-MM-DD` or RFC 3339. A bare end date covers the whole day.
fn parse_bound(raw: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{}': expected YYYY-MM-DD", raw))?;
    let time = if end_of_day {
        NaiveTime::from_hms_opt(23, 59, 59)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    }
    .unwrap_or_default();
    Ok(date.and_time(time).and_utc())
}

#[derive(Clone, Copy, PartialEq)]
enum Field {
    Id,
    Title,
    Summary,
    Published,
    Updated,
    AuthorName,
    Comment,
    JournalRef,
    Doi,
}

fn field_for(local_name: &[u8], in_author: bool) -> Option<Field> {
    match local_name {
        b"id" => Some(Field::Id),
        b"title" => Some(Field::Title),
        b"summary" => Some(Field::Summary),
        b"published" => Some(Field::Published),
        b"updated" => Some(Field::Updated),
        b"name" if in_author => Some(Field::AuthorName),
        b"comment" => Some(Field::Comment),
        b"journal_ref" => Some(Field::JournalRef),
        b"doi" => Some(Field::Doi),
        _ => None,
    }
}

fn attr(e: &BytesStart<'_>, key: &str) -> Option<String> {
    e.try_get_attribute(key)
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn non_empty(s: String) -> Option<String> {
    let s = collapse_ws(&s);
    (!s.is_empty()).then_some(s)
}

/// Parse an arXiv Atom feed into entries, in feed order.
pub fn parse_feed(xml: &str) -> Result<Vec<ArxivEntry>> {
    let mut reader = quick_xml::Reader::from_str(xml);
    let mut entries = Vec::new();

    let mut current: Option<ArxivEntry> = None;
    let mut in_author = false;
    let mut field: Option<Field> = None;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let local = e.local_name();
                match local.as_ref() {
                    b"entry" => current = Some(ArxivEntry::default()),
                    b"author" if current.is_some() => in_author = true,
                    name if current.is_some() => {
                        field = field_for(name, in_author);
                        text.clear();
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                let Some(entry) = current.as_mut() else {
                    continue;
                };
                match e.local_name().as_ref() {
                    b"category" => {
                        if let Some(term) = attr(&e, "term") {
                            entry.categories.push(term);
                        }
                    }
                    b"primary_category" => entry.primary_category = attr(&e, "term"),
                    b"link" => {
                        if attr(&e, "title").as_deref() == Some("pdf") {
                            entry.pdf_url = attr(&e, "href");
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(t)) if field.is_some() => {
                text.push_str(&t.unescape().unwrap_or_default());
            }
            Ok(Event::CData(c)) if field.is_some() => {
                text.push_str(&String::from_utf8_lossy(&c));
            }
            Ok(Event::End(e)) => {
                let local = e.local_name();
                match local.as_ref() {
                    b"entry" => {
                        if let Some(entry) = current.take() {
                            if !entry.id.is_empty() {
                                entries.push(entry);
                            }
                        }
                    }
                    b"author" => in_author = false,
                    _ => {
                        if let (Some(f), Some(entry)) = (field.take(), current.as_mut()) {
                            let value = std::mem::take(&mut text);
                            match f {
                                Field::Id => entry.id = value.trim().to_string(),
                                Field::Title => entry.title = collapse_ws(&value),
                                Field::Summary => entry.summary = value.trim().to_string(),
                                Field::Published => entry.published = parse_time(&value),
                                Field::Updated => entry.updated = parse_time(&value),
                                Field::AuthorName => {
                                    if let Some(name) = non_empty(value) {
                                        entry.authors.push(name);
                                    }
                                }
                                Field::Comment => entry.comment = non_empty(value),
                                Field::JournalRef => entry.journal_ref = non_empty(value),
                                Field::Doi => entry.doi = non_empty(value),
                            }
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => bail!(
                "malformed arxiv feed at position {}: {}",
                reader.buffer_position(),
                e
            ),
            _ => {}
        }
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <title type="html">ArXiv Query: cat:cs.AI</title>
  <id>http://arxiv.org/api/abc</id>
  <entry>
    <id>http://arxiv.org/abs/2401.00001v1</id>
    <updated>2024-01-03T10:00:00Z</updated>
    <published>2024-01-02T09:30:00Z</published>
    <title>Scalable   Oversight
      for Language Models</title>
    <summary>  We study oversight &amp; alignment.
    </summary>
    <author><name>Ada Lovelace</name></author>
    <author><name>Alan Turing</name><arxiv:affiliation>Bletchley</arxiv:affiliation></author>
    <arxiv:doi>10.1000/xyz</arxiv:doi>
    <arxiv:comment>12 pages</arxiv:comment>
    <link href="http://arxiv.org/abs/2401.00001v1" rel="alternate" type="text/html"/>
    <link title="pdf" href="http://arxiv.org/pdf/2401.00001v1" rel="related" type="application/pdf"/>
    <arxiv:primary_category term="cs.AI" scheme="http://arxiv.org/schemas/atom"/>
    <category term="cs.AI" scheme="http://arxiv.org/schemas/atom"/>
    <category term="cs.LG" scheme="http://arxiv.org/schemas/atom"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2312.09999v2</id>
    <updated>2023-12-30T00:00:00Z</updated>
    <published>2023-12-20T00:00:00Z</published>
    <title>Older Paper</title>
    <summary>Earlier.</summary>
    <author><name>Grace Hopper</name></author>
  </entry>
</feed>"#;

    fn connector(start: Option<&str>, end: Option<&str>) -> ArxivConnector {
        ArxivConnector::new(ArxivConfig {
            query: "cat:cs.AI".into(),
            max_results: 10,
            sort_by: SortBy::default(),
            sort_order: SortOrder::default(),
            start_date: start.map(str::to_string),
            end_date: end.map(str::to_string),
            api_url: default_api_url(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_parse_feed_entries() {
        let entries = parse_feed(FEED).unwrap();
        assert_eq!(entries.len(), 2);

        let e = &entries[0];
        assert_eq!(e.id, "http://arxiv.org/abs/2401.00001v1");
        assert_eq!(e.title, "Scalable Oversight for Language Models");
        assert_eq!(e.summary, "We study oversight & alignment.");
        assert_eq!(e.authors, vec!["Ada Lovelace", "Alan Turing"]);
        assert_eq!(e.categories, vec!["cs.AI", "cs.LG"]);
        assert_eq!(e.primary_category.as_deref(), Some("cs.AI"));
        assert_eq!(
            e.pdf_url.as_deref(),
            Some("http://arxiv.org/pdf/2401.00001v1")
        );
        assert_eq!(e.doi.as_deref(), Some("10.1000/xyz"));
        assert_eq!(e.comment.as_deref(), Some("12 pages"));
        assert!(e.journal_ref.is_none());
        assert_eq!(
            e.published.unwrap().to_rfc3339(),
            "2024-01-02T09:30:00+00:00"
        );
    }

    #[test]
    fn test_entry_into_item_metadata() {
        let item = parse_feed(FEED).unwrap().remove(0).into_item();
        assert_eq!(item.id, "http://arxiv.org/abs/2401.00001v1");
        assert_eq!(item.metadata["authors"][1], "Alan Turing");
        assert_eq!(item.metadata["primary_category"], "cs.AI");
        assert!(item.metadata["journal_ref"].is_null());
        assert!(!item.processed);
    }

    #[test]
    fn test_date_window() {
        let entries = parse_feed(FEED).unwrap();

        let c = connector(Some("2024-01-01"), None);
        assert!(c.in_window(&entries[0]));
        assert!(!c.in_window(&entries[1]));

        let c = connector(None, Some("2023-12-20"));
        assert!(!c.in_window(&entries[0]));
        assert!(c.in_window(&entries[1]));
    }

    #[test]
    fn test_config_validation() {
        let mut table = toml::Table::new();
        table.insert("query".into(), toml::Value::String("cat:cs.AI".into()));
        table.insert("max_results".into(), toml::Value::Integer(1001));
        assert!(ArxivConnector::from_table(&table).is_err());

        table.insert("max_results".into(), toml::Value::Integer(25));
        table.insert("sort_by".into(), toml::Value::String("lastUpdatedDate".into()));
        let c = ArxivConnector::from_table(&table).unwrap();
        assert_eq!(c.config.sort_by, SortBy::LastUpdatedDate);
        assert_eq!(c.config.sort_order, SortOrder::Descending);

        table.insert("sort_by".into(), toml::Value::String("popularity".into()));
        assert!(ArxivConnector::from_table(&table).is_err());

        table.remove("sort_by");
        table.insert("start_date".into(), toml::Value::String("yesterday".into()));
        assert!(ArxivConnector::from_table(&table).is_err());
    }

    #[test]
    fn test_malformed_feed_is_an_error() {
        assert!(parse_feed("<feed><entry><id>x</entry></feed>").is_err());
    }
}
