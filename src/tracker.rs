//! Per-source dedup tracking.
//!
//! A [`ProcessedTracker`] keeps the set of item ids already handled for one
//! namespace (one per source) plus the last id seen. It sits on top of a
//! [`DedupStore`], normally Redis:
//!
//! ```text
//! {namespace}:processed_ids      SET of item ids
//! {namespace}:last_processed_id  STRING
//! ```
//!
//! The tracker never fails its caller. If the store could not be reached at
//! construction the tracker runs without one: lookups answer "not processed"
//! and marks report `false`. Transport errors on a live store, and calls that
//! get no answer within the operation timeout (5 s), are logged and mapped
//! to the same defaults. The pipeline falls back to the repository
//! when the tracker has nothing to say.

use anyhow::Result;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

const PING_TIMEOUT: Duration = Duration::from_secs(5);
const OP_TIMEOUT: Duration = Duration::from_secs(5);

/// Minimal key-value surface the tracker needs.
#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn ping(&self) -> Result<()>;
    async fn add_member(&self, key: &str, member: &str) -> Result<()>;
    async fn is_member(&self, key: &str, member: &str) -> Result<bool>;
    async fn members(&self, key: &str) -> Result<HashSet<String>>;
    async fn cardinality(&self, key: &str) -> Result<usize>;
    async fn set_value(&self, key: &str, value: &str) -> Result<()>;
    async fn get_value(&self, key: &str) -> Result<Option<String>>;
    async fn delete(&self, keys: &[String]) -> Result<()>;
}

/// Redis-backed store over a multiplexed async connection.
pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl DedupStore for RedisStore {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn add_member(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.sadd(key, member).await?;
        Ok(())
    }

    async fn is_member(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.sismember(key, member).await?)
    }

    async fn members(&self, key: &str) -> Result<HashSet<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.smembers(key).await?)
    }

    async fn cardinality(&self, key: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        Ok(conn.scard(key).await?)
    }

    async fn set_value(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(keys.to_vec()).await?;
        Ok(())
    }
}

/// In-process store. Used by tests and by embedders without Redis.
#[derive(Default)]
pub struct MemoryStore {
    sets: Mutex<HashMap<String, HashSet<String>>>,
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> anyhow::Error {
    anyhow::anyhow!("memory store lock poisoned")
}

#[async_trait]
impl DedupStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn add_member(&self, key: &str, member: &str) -> Result<()> {
        let mut sets = self.sets.lock().map_err(|_| poisoned())?;
        sets.entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn is_member(&self, key: &str, member: &str) -> Result<bool> {
        let sets = self.sets.lock().map_err(|_| poisoned())?;
        Ok(sets.get(key).is_some_and(|s| s.contains(member)))
    }

    async fn members(&self, key: &str) -> Result<HashSet<String>> {
        let sets = self.sets.lock().map_err(|_| poisoned())?;
        Ok(sets.get(key).cloned().unwrap_or_default())
    }

    async fn cardinality(&self, key: &str) -> Result<usize> {
        let sets = self.sets.lock().map_err(|_| poisoned())?;
        Ok(sets.get(key).map_or(0, |s| s.len()))
    }

    async fn set_value(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.lock().map_err(|_| poisoned())?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>> {
        let values = self.values.lock().map_err(|_| poisoned())?;
        Ok(values.get(key).cloned())
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        let mut sets = self.sets.lock().map_err(|_| poisoned())?;
        let mut values = self.values.lock().map_err(|_| poisoned())?;
        for key in keys {
            sets.remove(key);
            values.remove(key);
        }
        Ok(())
    }
}

/// Connect and ping the primary store. Any failure, including a ping that
/// takes longer than five seconds, yields `None`.
pub async fn connect_store(url: Option<&str>) -> Option<Arc<dyn DedupStore>> {
    let raw = url?;
    let url = redact_url(raw);
    let attempt = async {
        let store = RedisStore::connect(raw).await?;
        store.ping().await?;
        anyhow::Ok(store)
    };

    match tokio::time::timeout(PING_TIMEOUT, attempt).await {
        Ok(Ok(store)) => {
            info!(url = %url, "dedup store connected");
            Some(Arc::new(store))
        }
        Ok(Err(e)) => {
            warn!(url = %url, error = %e, "dedup store unreachable, tracker disabled");
            None
        }
        Err(_) => {
            warn!(url = %url, "dedup store ping timed out, tracker disabled");
            None
        }
    }
}

/// `url` with any `user:password@` part removed, for logs and output.
pub fn redact_url(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() || !parsed.username().is_empty() {
                let _ = parsed.set_password(None);
                let _ = parsed.set_username("");
            }
            parsed.to_string()
        }
        Err(_) => match (url.find("://"), url.rfind('@')) {
            (Some(scheme_end), Some(at)) if at > scheme_end => {
                format!("{}{}", &url[..scheme_end + 3], &url[at + 1..])
            }
            _ => url.to_string(),
        },
    }
}

/// Dedup tracker for a single namespace.
pub struct ProcessedTracker {
    namespace: String,
    store: Option<Arc<dyn DedupStore>>,
    op_timeout: Duration,
}

impl ProcessedTracker {
    pub fn new(namespace: impl Into<String>, store: Option<Arc<dyn DedupStore>>) -> Self {
        Self {
            namespace: namespace.into(),
            store,
            op_timeout: OP_TIMEOUT,
        }
    }

    /// Override how long a single store call may take.
    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }

    /// A tracker with no backing store.
    pub fn disabled(namespace: impl Into<String>) -> Self {
        Self::new(namespace, None)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    fn set_key(&self) -> String {
        format!("{}:processed_ids", self.namespace)
    }

    fn last_key(&self) -> String {
        format!("{}:last_processed_id", self.namespace)
    }

    /// Bound one store call by the operation timeout.
    async fn call<T>(&self, op: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.op_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!(
                "dedup store did not answer within {} ms",
                self.op_timeout.as_millis()
            )),
        }
    }

    pub async fn is_processed(&self, id: &str) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        match self.call(store.is_member(&self.set_key(), id)).await {
            Ok(found) => found,
            Err(e) => {
                warn!(namespace = %self.namespace, item_id = %id, error = %e, "dedup lookup failed");
                false
            }
        }
    }

    pub async fn mark_processed(&self, id: &str) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        match self.call(store.add_member(&self.set_key(), id)).await {
            Ok(()) => true,
            Err(e) => {
                warn!(namespace = %self.namespace, item_id = %id, error = %e, "dedup mark failed");
                false
            }
        }
    }

    pub async fn processed_ids(&self) -> HashSet<String> {
        let Some(store) = &self.store else {
            return HashSet::new();
        };
        match self.call(store.members(&self.set_key())).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(namespace = %self.namespace, error = %e, "dedup set read failed");
                HashSet::new()
            }
        }
    }

    pub async fn processed_count(&self) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };
        match self.call(store.cardinality(&self.set_key())).await {
            Ok(n) => n,
            Err(e) => {
                warn!(namespace = %self.namespace, error = %e, "dedup count failed");
                0
            }
        }
    }

    pub async fn set_last_processed_id(&self, id: &str) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        match self.call(store.set_value(&self.last_key(), id)).await {
            Ok(()) => true,
            Err(e) => {
                warn!(namespace = %self.namespace, item_id = %id, error = %e, "dedup last-id write failed");
                false
            }
        }
    }

    pub async fn last_processed_id(&self) -> Option<String> {
        let store = self.store.as_ref()?;
        match self.call(store.get_value(&self.last_key())).await {
            Ok(id) => id,
            Err(e) => {
                warn!(namespace = %self.namespace, error = %e, "dedup last-id read failed");
                None
            }
        }
    }

    /// Drop every record for this namespace. Irreversible.
    pub async fn clear(&self) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        match self.call(store.delete(&[self.set_key(), self.last_key()])).await {
            Ok(()) => {
                info!(namespace = %self.namespace, "dedup records cleared");
                true
            }
            Err(e) => {
                warn!(namespace = %self.namespace, error = %e, "dedup clear failed");
                false
            }
        }
    }

    /// Release the store handle. Later calls behave as if disabled.
    pub fn close(&mut self) {
        if self.store.take().is_some() {
            debug!(namespace = %self.namespace, "dedup tracker closed");
        }
    }
}
