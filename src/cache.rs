//! Freshness-aware response caching with LRU eviction.
//!
//! The [`Cache`] memoizes idempotent lookups with explicit staleness
//! semantics: an entry is *fresh* until `stale_at`, *stale but usable* until
//! `expires_at`, and gone afterwards. Capacity is bounded; inserting past
//! `max_entries` evicts the least-recently-used entry. An optional
//! [`CacheAdapter`] provides durable backing (e.g. a KV store shared between
//! worker processes); the in-memory map stays authoritative for recency.
//!
//! There is deliberately no process-wide cache singleton. Whichever client
//! needs caching constructs a [`Cache`] and passes it by reference.

use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// A single cached payload with its freshness window.
///
/// Invariant: `stale_at <= expires_at`. Construction clamps `stale_at` so a
/// stale window longer than the TTL cannot produce an entry that is fresh
/// after it has expired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The cached payload.
    pub data: serde_json::Value,
    /// When the entry was written.
    pub created_at: SystemTime,
    /// When the entry becomes stale.
    pub stale_at: SystemTime,
    /// When the entry expires and must not be served.
    pub expires_at: SystemTime,
}

impl CacheEntry {
    fn new(data: serde_json::Value, now: SystemTime, stale_time: Duration, ttl: Duration) -> Self {
        let expires_at = now + ttl;
        let stale_at = (now + stale_time).min(expires_at);
        Self {
            data,
            created_at: now,
            stale_at,
            expires_at,
        }
    }

    fn is_expired(&self, now: SystemTime) -> bool {
        now >= self.expires_at
    }

    fn is_stale(&self, now: SystemTime) -> bool {
        now >= self.stale_at
    }
}

/// The result of a cache lookup.
#[derive(Debug, Clone)]
pub struct CacheResult {
    /// The cached payload.
    pub data: serde_json::Value,
    /// Whether the entry is past its stale point (still usable; the caller
    /// may choose to revalidate).
    pub is_stale: bool,
    /// When the entry was written.
    pub created_at: SystemTime,
    /// How long until the entry expires.
    pub time_to_expire: Duration,
}

/// Cache sizing and freshness configuration.
///
/// # Examples
///
/// ```
/// use seawall::cache::CacheConfig;
/// use std::time::Duration;
///
/// let config = CacheConfig::new(Duration::from_secs(300))
///     .with_stale_time(Duration::from_secs(60))
///     .with_max_entries(500);
/// ```
#[derive(Clone)]
pub struct CacheConfig {
    /// Time-to-live: entries are unusable after this.
    pub ttl: Duration,
    /// Entries are flagged stale after this. Defaults to `ttl`.
    pub stale_time: Duration,
    /// In-memory capacity; the LRU entry is evicted at this bound.
    pub max_entries: usize,
    /// Optional durable backing store.
    pub adapter: Option<Arc<dyn CacheAdapter>>,
}

impl CacheConfig {
    /// Creates a config with the given TTL; `stale_time` defaults to the TTL.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            stale_time: ttl,
            max_entries: 1000,
            adapter: None,
        }
    }

    /// Sets the stale point.
    pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    /// Sets the in-memory capacity.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Attaches a durable backing store.
    pub fn with_adapter(mut self, adapter: Arc<dyn CacheAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

impl std::fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheConfig")
            .field("ttl", &self.ttl)
            .field("stale_time", &self.stale_time)
            .field("max_entries", &self.max_entries)
            .field("adapter", &self.adapter.is_some())
            .finish()
    }
}

/// Per-entry overrides for [`Cache::set`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SetOptions {
    /// Overrides the configured TTL for this entry.
    pub ttl: Option<Duration>,
    /// Overrides the configured stale point for this entry.
    pub stale_time: Option<Duration>,
}

/// Counts of live entries, split by freshness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Total entries held in memory (including not-yet-collected expired
    /// ones).
    pub size: usize,
    /// Entries before their stale point.
    pub fresh: usize,
    /// Entries past their stale point but not expired.
    pub stale: usize,
}

/// A pluggable durable backing store.
///
/// Pattern syntax for [`keys`](CacheAdapter::keys) is adapter-defined
/// (typically glob); the cache re-validates every returned key against its
/// own regex semantics before acting on it, so an adapter may over-return
/// but must never be trusted to filter exactly.
///
/// "Not found" is represented by `Ok(None)`, never an error. Adapter
/// failures propagate to the caller unchanged.
#[async_trait]
pub trait CacheAdapter: Send + Sync {
    /// Fetches an entry by key.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;
    /// Stores an entry with the given TTL.
    async fn set(&self, key: &str, entry: &CacheEntry, ttl: Duration) -> Result<()>;
    /// Removes an entry.
    async fn delete(&self, key: &str) -> Result<()>;
    /// Removes all entries.
    async fn clear(&self) -> Result<()>;
    /// Lists keys matching an adapter-defined pattern.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;
}

/// Input to [`generate_cache_key`].
#[derive(Debug, Clone, Default)]
pub struct CacheKeyParams<'a> {
    /// The HTTP method; upper-cased in the key.
    pub method: &'a str,
    /// The request path.
    pub path: &'a str,
    /// Query parameters; keys are sorted before serialization so equivalent
    /// requests with differently-ordered parameters hash identically.
    pub params: Option<&'a HashMap<String, String>>,
    /// The request body, serialized as-is.
    pub body: Option<&'a serde_json::Value>,
    /// Extra discriminator tags (store id, locale, auth scope).
    pub tags: &'a [String],
}

/// Builds a deterministic cache key: `METHOD:path:sorted-params:body:tags`.
///
/// Omitted fields are skipped entirely, not serialized as empty
/// placeholders.
///
/// # Examples
///
/// ```
/// use seawall::cache::{generate_cache_key, CacheKeyParams};
/// use std::collections::HashMap;
///
/// let mut a = HashMap::new();
/// a.insert("page".to_string(), "1".to_string());
/// a.insert("limit".to_string(), "24".to_string());
/// let mut b = HashMap::new();
/// b.insert("limit".to_string(), "24".to_string());
/// b.insert("page".to_string(), "1".to_string());
///
/// let key_a = generate_cache_key(&CacheKeyParams {
///     method: "get",
///     path: "/products",
///     params: Some(&a),
///     ..Default::default()
/// });
/// let key_b = generate_cache_key(&CacheKeyParams {
///     method: "GET",
///     path: "/products",
///     params: Some(&b),
///     ..Default::default()
/// });
/// assert_eq!(key_a, key_b);
/// ```
pub fn generate_cache_key(params: &CacheKeyParams<'_>) -> String {
    let mut parts = vec![params.method.to_uppercase(), params.path.to_string()];

    if let Some(query) = params.params {
        if !query.is_empty() {
            let sorted: BTreeMap<&str, &str> = query
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();
            // BTreeMap serializes in lexicographic key order.
            parts.push(serde_json::to_string(&sorted).unwrap_or_default());
        }
    }

    if let Some(body) = params.body {
        parts.push(body.to_string());
    }

    for tag in params.tags {
        parts.push(tag.clone());
    }

    parts.join(":")
}

struct MemoryState {
    entries: HashMap<String, CacheEntry>,
    /// Monotonic access counters; the smallest counter is the LRU victim.
    access_order: HashMap<String, u64>,
    access_counter: u64,
}

impl MemoryState {
    fn touch(&mut self, key: &str) {
        self.access_counter += 1;
        self.access_order
            .insert(key.to_string(), self.access_counter);
    }

    /// Removes the entry with the smallest access counter from memory.
    ///
    /// Adapter entries are not subject to the in-memory capacity bound, so
    /// eviction never touches the adapter.
    fn evict_lru(&mut self) {
        let victim = self
            .access_order
            .iter()
            .min_by_key(|(_, counter)| **counter)
            .map(|(key, _)| key.clone());
        if let Some(key) = victim {
            tracing::debug!(key = %key, "Evicting least-recently-used cache entry");
            self.entries.remove(&key);
            self.access_order.remove(&key);
        }
    }

    fn remove(&mut self, key: &str) -> bool {
        self.access_order.remove(key);
        self.entries.remove(key).is_some()
    }
}

/// A freshness-aware, capacity-bounded key/value cache.
///
/// All mutation happens through these methods; there is no internal
/// parallelism, so a plain mutex around the in-memory state suffices.
/// Adapter I/O is performed outside the lock.
///
/// # Examples
///
/// ```
/// use seawall::cache::{Cache, CacheConfig};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), seawall::Error> {
/// let cache = Cache::new(CacheConfig::new(Duration::from_secs(60)));
/// cache.set("products:1", serde_json::json!({"sku": "A-1"}), None).await?;
///
/// let hit = cache.get("products:1").await?.expect("just written");
/// assert!(!hit.is_stale);
/// # Ok(())
/// # }
/// ```
pub struct Cache {
    config: CacheConfig,
    state: Mutex<MemoryState>,
}

impl Cache {
    /// Creates a cache with the given configuration.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(MemoryState {
                entries: HashMap::new(),
                access_order: HashMap::new(),
                access_counter: 0,
            }),
        }
    }

    /// Stores a value under `key`.
    ///
    /// The write goes to memory and, if an adapter is configured, through to
    /// it as well; the adapter write completes before `set` returns so a
    /// single-process caller always reads its own writes.
    pub async fn set(
        &self,
        key: &str,
        data: serde_json::Value,
        options: Option<SetOptions>,
    ) -> Result<()> {
        let options = options.unwrap_or_default();
        let ttl = options.ttl.unwrap_or(self.config.ttl);
        let stale_time = options.stale_time.unwrap_or(self.config.stale_time);
        let entry = CacheEntry::new(data, SystemTime::now(), stale_time, ttl);

        {
            let mut state = self.state.lock();
            if state.entries.len() >= self.config.max_entries
                && !state.entries.contains_key(key)
            {
                state.evict_lru();
            }
            state.entries.insert(key.to_string(), entry.clone());
            state.touch(key);
        }

        if let Some(adapter) = &self.config.adapter {
            adapter.set(key, &entry, ttl).await?;
        }
        Ok(())
    }

    /// Looks up `key`, returning `None` for misses and expired entries.
    ///
    /// A hit bumps the entry's recency. Expired entries are deleted from
    /// both memory and the adapter. A memory miss consults the adapter and
    /// hydrates memory from it.
    pub async fn get(&self, key: &str) -> Result<Option<CacheResult>> {
        let now = SystemTime::now();

        enum Lookup {
            Hit(CacheResult),
            Expired,
            Miss,
        }

        let lookup = {
            let mut state = self.state.lock();
            match state.entries.get(key) {
                Some(entry) if entry.is_expired(now) => {
                    state.remove(key);
                    Lookup::Expired
                }
                Some(entry) => {
                    let result = Self::result_for(entry, now);
                    state.touch(key);
                    Lookup::Hit(result)
                }
                None => Lookup::Miss,
            }
        };

        match lookup {
            Lookup::Hit(result) => Ok(Some(result)),
            Lookup::Expired => {
                if let Some(adapter) = &self.config.adapter {
                    adapter.delete(key).await?;
                }
                Ok(None)
            }
            Lookup::Miss => {
                let Some(adapter) = &self.config.adapter else {
                    return Ok(None);
                };
                match adapter.get(key).await? {
                    Some(entry) if entry.is_expired(now) => {
                        adapter.delete(key).await?;
                        Ok(None)
                    }
                    Some(entry) => {
                        let result = Self::result_for(&entry, now);
                        let mut state = self.state.lock();
                        if state.entries.len() >= self.config.max_entries {
                            state.evict_lru();
                        }
                        state.entries.insert(key.to_string(), entry);
                        state.touch(key);
                        Ok(Some(result))
                    }
                    None => Ok(None),
                }
            }
        }
    }

    /// Returns `true` if `key` resolves to a live entry.
    pub async fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Removes `key` from memory and the adapter.
    ///
    /// Returns whether the entry was present in memory.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let existed = self.state.lock().remove(key);
        if let Some(adapter) = &self.config.adapter {
            adapter.delete(key).await?;
        }
        Ok(existed)
    }

    /// Removes every key matching the regex `pattern`.
    ///
    /// Memory keys are matched directly. Adapter key listing speaks glob, so
    /// the regex is translated best-effort (anchors stripped, `.*` becomes
    /// `*`) and every adapter-returned key is re-verified against the
    /// original regex before deletion; the translation may under-select for
    /// exotic patterns but never over-deletes. Returns the number of
    /// distinct keys removed across both stores.
    pub async fn invalidate_by_pattern(&self, pattern: &str) -> Result<usize> {
        let regex = Regex::new(pattern)
            .map_err(|e| Error::Configuration(format!("Invalid cache pattern: {}", e)))?;

        let mut removed: HashSet<String> = {
            let mut state = self.state.lock();
            let matching: Vec<String> = state
                .entries
                .keys()
                .filter(|key| regex.is_match(key))
                .cloned()
                .collect();
            for key in &matching {
                state.remove(key);
            }
            matching.into_iter().collect()
        };

        if let Some(adapter) = &self.config.adapter {
            let glob = regex_to_glob(pattern);
            for key in adapter.keys(&glob).await? {
                if regex.is_match(&key) {
                    adapter.delete(&key).await?;
                    removed.insert(key);
                }
            }
        }

        tracing::debug!(pattern = %pattern, removed = removed.len(), "Invalidated cache entries");
        Ok(removed.len())
    }

    /// Removes every key starting with `prefix`.
    ///
    /// Sugar for [`invalidate_by_pattern`](Self::invalidate_by_pattern) with
    /// the prefix regex-escaped and anchored at the start.
    pub async fn invalidate_by_prefix(&self, prefix: &str) -> Result<usize> {
        self.invalidate_by_pattern(&format!("^{}", regex::escape(prefix)))
            .await
    }

    /// Empties memory, resets recency tracking, and clears the adapter.
    pub async fn clear(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.entries.clear();
            state.access_order.clear();
            state.access_counter = 0;
        }
        if let Some(adapter) = &self.config.adapter {
            adapter.clear().await?;
        }
        Ok(())
    }

    /// Returns counts of in-memory entries split by freshness.
    pub fn stats(&self) -> CacheStats {
        let now = SystemTime::now();
        let state = self.state.lock();
        let mut fresh = 0;
        let mut stale = 0;
        for entry in state.entries.values() {
            if entry.is_expired(now) {
                continue;
            }
            if entry.is_stale(now) {
                stale += 1;
            } else {
                fresh += 1;
            }
        }
        CacheStats {
            size: state.entries.len(),
            fresh,
            stale,
        }
    }

    fn result_for(entry: &CacheEntry, now: SystemTime) -> CacheResult {
        CacheResult {
            data: entry.data.clone(),
            is_stale: entry.is_stale(now),
            created_at: entry.created_at,
            time_to_expire: entry
                .expires_at
                .duration_since(now)
                .unwrap_or(Duration::ZERO),
        }
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("config", &self.config)
            .field("size", &self.state.lock().entries.len())
            .finish()
    }
}

/// Best-effort regex-to-glob translation for adapter key listing.
///
/// Strips `^`/`$` anchors, rewrites `.*` to `*`, and pads unanchored ends
/// with `*`. Lossy by design: the result is only used to over-approximate
/// the candidate set, which is then re-filtered with the real regex.
fn regex_to_glob(pattern: &str) -> String {
    let anchored_start = pattern.starts_with('^');
    let anchored_end = pattern.ends_with('$');
    let mut core = pattern;
    core = core.strip_prefix('^').unwrap_or(core);
    core = core.strip_suffix('$').unwrap_or(core);
    let mut glob = core.replace(".*", "*");
    if !anchored_start {
        glob.insert(0, '*');
    }
    if !anchored_end {
        glob.push('*');
    }
    glob
}
