//! Versioned, expiring verdict cache in front of the resolver.
//!
//! Every lookup goes through [`VerdictCache::resolve_with_cache`]:
//! normalize -> cached verdict if fresh -> otherwise resolve, store, return.
//! Resolution failures are never cached; they produce the fallback verdict
//! chosen by the caller's hide-unknown setting, and the next call tries again.
//!
//! The in-memory [`CacheStore`] is authoritative for the life of the process
//! and is mirrored to a [`StorageArea`] under [`STORAGE_KEY`] after every
//! mutation, in this layout:
//!
//! ```json
//! { "items": { "<key>": { "isH1B": true, "timestamp": 1717243200000 } },
//!   "lastCleanup": 1717243200000,
//!   "version": 2 }
//! ```
//!
//! A stored record with a different `version` is discarded whole on load.
//! Storage errors are logged and swallowed; the cache then behaves as empty.
//!
//! ## Concurrency
//!
//! The store lock is released before the resolver is awaited. Two concurrent
//! calls for the same unseen key both miss and both hit the network; the
//! second `put` simply overwrites the first. There is no in-flight
//! de-duplication here.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::normalizer::{CompanyKey, CompanyNormalizer};
use crate::policy;
use crate::rate_limit::RetryHelper;
use crate::resolver::{FailureReason, Resolve, ResolutionFailure, SponsorshipVerdict};
use crate::storage::{StorageArea, StorageError};

/// Bump when the persisted layout or verdict semantics change.
pub const CACHE_VERSION: u32 = 2;

/// Namespace of the cache record in the storage area.
pub const STORAGE_KEY: &str = "companyStatusCache";

pub const DEFAULT_EXPIRY_DAYS: i64 = 7;
pub const DEFAULT_MAX_ITEMS: usize = 1000;
pub const DEFAULT_CLEANUP_INTERVAL_HOURS: i64 = 24;

/// Expiry and size limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub expiry: Duration,
    pub max_items: usize,
    pub cleanup_interval: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            expiry: Duration::days(DEFAULT_EXPIRY_DAYS),
            max_items: DEFAULT_MAX_ITEMS,
            cleanup_interval: Duration::hours(DEFAULT_CLEANUP_INTERVAL_HOURS),
        }
    }
}

impl CacheSettings {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            expiry: Duration::days(config.expiry_days as i64),
            max_items: config.max_items,
            cleanup_interval: Duration::hours(config.cleanup_interval_hours as i64),
        }
    }
}

/// One cached verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: CompanyKey,
    pub verdict: SponsorshipVerdict,
    pub schema_version: u32,
}

/// The whole cache as held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStore {
    pub items: HashMap<CompanyKey, CacheEntry>,
    pub last_cleanup_at: DateTime<Utc>,
    pub schema_version: u32,
}

impl CacheStore {
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            items: HashMap::new(),
            last_cleanup_at: now,
            schema_version: CACHE_VERSION,
        }
    }

    fn to_persisted(&self) -> PersistedStore {
        let items = self
            .items
            .values()
            .map(|entry| {
                (
                    entry.key.as_str().to_string(),
                    PersistedEntry {
                        is_h1b: entry.verdict.is_sponsor,
                        timestamp: entry.verdict.resolved_at.timestamp_millis(),
                    },
                )
            })
            .collect();

        PersistedStore {
            items,
            last_cleanup: self.last_cleanup_at.timestamp_millis(),
            version: self.schema_version,
        }
    }

    fn from_persisted(persisted: PersistedStore, now: DateTime<Utc>) -> Self {
        let version = persisted.version;
        let items = persisted
            .items
            .into_iter()
            .filter_map(|(key, entry)| {
                let resolved_at = DateTime::from_timestamp_millis(entry.timestamp)?;
                let key = CompanyKey::from_normalized(key);
                Some((
                    key.clone(),
                    CacheEntry {
                        key,
                        verdict: SponsorshipVerdict {
                            is_sponsor: entry.is_h1b,
                            resolved_at,
                        },
                        schema_version: version,
                    },
                ))
            })
            .collect();

        Self {
            items,
            last_cleanup_at: DateTime::from_timestamp_millis(persisted.last_cleanup).unwrap_or(now),
            schema_version: version,
        }
    }

    /// Interpret a raw storage record.
    fn from_value(value: Value, now: DateTime<Utc>) -> LoadedStore {
        let found = value.get("version").and_then(Value::as_u64);
        if found != Some(CACHE_VERSION as u64) {
            return LoadedStore::VersionMismatch { found };
        }

        match serde_json::from_value::<PersistedStore>(value) {
            Ok(persisted) => LoadedStore::Current(Self::from_persisted(persisted, now)),
            Err(e) => LoadedStore::Corrupt(e.to_string()),
        }
    }
}

enum LoadedStore {
    Current(CacheStore),
    VersionMismatch { found: Option<u64> },
    Corrupt(String),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedStore {
    #[serde(default)]
    items: BTreeMap<String, PersistedEntry>,
    last_cleanup: i64,
    version: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedEntry {
    #[serde(rename = "isH1B")]
    is_h1b: bool,
    /// epoch milliseconds
    timestamp: i64,
}

/// Where a verdict handed to the caller came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum VerdictSource {
    Cached,
    Resolved,
    Fallback { reason: FailureReason },
}

impl std::fmt::Display for VerdictSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerdictSource::Cached => write!(f, "cached"),
            VerdictSource::Resolved => write!(f, "resolved"),
            VerdictSource::Fallback { reason } => write!(f, "fallback ({})", reason),
        }
    }
}

/// Answer of [`VerdictCache::resolve_with_cache`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerdictOutcome {
    pub key: CompanyKey,
    pub is_sponsor: bool,
    pub source: VerdictSource,
}

impl VerdictOutcome {
    /// The verdict is a policy fallback, not a lookup result.
    pub fn is_unknown(&self) -> bool {
        matches!(self.source, VerdictSource::Fallback { .. })
    }
}

/// Counts from a cleanup sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub expired: usize,
    pub evicted: usize,
    pub remaining: usize,
}

pub struct VerdictCache {
    store: RwLock<CacheStore>,
    storage: Arc<dyn StorageArea>,
    resolver: Arc<dyn Resolve>,
    clock: Arc<dyn Clock>,
    normalizer: CompanyNormalizer,
    settings: CacheSettings,
    retry: Option<RetryHelper>,
}

impl VerdictCache {
    /// Load the persisted store, resetting it if its version is stale or it
    /// cannot be parsed. An unreadable storage area yields an empty cache.
    pub async fn load(
        storage: Arc<dyn StorageArea>,
        resolver: Arc<dyn Resolve>,
        clock: Arc<dyn Clock>,
        settings: CacheSettings,
    ) -> Self {
        let now = clock.now();

        let (store, persist_fresh) = match storage.get(STORAGE_KEY).await {
            Ok(Some(value)) => match CacheStore::from_value(value, now) {
                LoadedStore::Current(store) => {
                    debug!("Loaded verdict cache with {} entries", store.items.len());
                    (store, false)
                }
                LoadedStore::VersionMismatch { found } => {
                    info!(
                        "Verdict cache version {:?} does not match {}, discarding stored entries",
                        found, CACHE_VERSION
                    );
                    (CacheStore::empty(now), true)
                }
                LoadedStore::Corrupt(e) => {
                    warn!("Stored verdict cache is unreadable ({}), starting fresh", e);
                    (CacheStore::empty(now), true)
                }
            },
            Ok(None) => {
                debug!("No stored verdict cache, initializing");
                (CacheStore::empty(now), true)
            }
            Err(e @ StorageError::Serialize(_)) => {
                warn!("Storage file is not valid JSON ({}), starting fresh", e);
                (CacheStore::empty(now), true)
            }
            Err(e) => {
                warn!("Failed to read verdict cache, continuing with empty cache: {}", e);
                (CacheStore::empty(now), false)
            }
        };

        let cache = Self {
            store: RwLock::new(store),
            storage,
            resolver,
            clock,
            normalizer: CompanyNormalizer::new(),
            settings,
            retry: None,
        };

        if persist_fresh {
            let store = cache.store.read().await;
            cache.save(&store).await;
        }

        cache
    }

    pub fn with_normalizer(mut self, normalizer: CompanyNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Retry fetch failures with backoff before falling back.
    pub fn with_retry(mut self, retry: RetryHelper) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn normalizer(&self) -> &CompanyNormalizer {
        &self.normalizer
    }

    fn is_fresh(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        entry.schema_version == CACHE_VERSION && now - entry.verdict.resolved_at < self.settings.expiry
    }

    /// Fresh verdict for `key`, if any. Never triggers a lookup.
    pub async fn get(&self, key: &CompanyKey) -> Option<SponsorshipVerdict> {
        let now = self.clock.now();
        let store = self.store.read().await;

        if store.schema_version != CACHE_VERSION {
            return None;
        }

        store
            .items
            .get(key)
            .filter(|entry| self.is_fresh(entry, now))
            .map(|entry| entry.verdict)
    }

    /// Insert or overwrite the verdict for `key`, sweeping if the store is
    /// over its ceiling or the cleanup interval has elapsed.
    pub async fn put(&self, key: CompanyKey, verdict: SponsorshipVerdict) {
        let now = self.clock.now();
        let mut store = self.store.write().await;

        store.items.insert(
            key.clone(),
            CacheEntry {
                key,
                verdict,
                schema_version: CACHE_VERSION,
            },
        );
        store.schema_version = CACHE_VERSION;

        if store.items.len() > self.settings.max_items
            || now - store.last_cleanup_at > self.settings.cleanup_interval
        {
            let report = sweep(&mut store, now, &self.settings);
            debug!(
                "Cache cleanup after put: {} expired, {} evicted, {} remaining",
                report.expired, report.evicted, report.remaining
            );
        }

        self.save(&store).await;
    }

    /// Drop expired entries, then the oldest ones until at or under the
    /// ceiling.
    pub async fn cleanup(&self) -> CleanupReport {
        let now = self.clock.now();
        let mut store = self.store.write().await;
        let report = sweep(&mut store, now, &self.settings);
        self.save(&store).await;

        info!(
            "Cache cleanup: {} expired, {} evicted, {} remaining",
            report.expired, report.evicted, report.remaining
        );
        report
    }

    /// Verdict for a raw company name. Always produces an answer.
    ///
    /// On resolution failure the fallback is `is_sponsor = !hide_unknown`
    /// and nothing is cached.
    pub async fn resolve_with_cache(&self, raw_name: &str, hide_unknown: bool) -> VerdictOutcome {
        let key = self.normalizer.normalize(raw_name);

        if let Some(verdict) = self.get(&key).await {
            debug!("Cache hit for '{}' (sponsor: {})", key, verdict.is_sponsor);
            return VerdictOutcome {
                key,
                is_sponsor: verdict.is_sponsor,
                source: VerdictSource::Cached,
            };
        }

        debug!("Cache miss for '{}', resolving", key);

        match self.resolve_key(&key).await {
            Ok(verdict) => {
                self.put(key.clone(), verdict).await;
                VerdictOutcome {
                    key,
                    is_sponsor: verdict.is_sponsor,
                    source: VerdictSource::Resolved,
                }
            }
            Err(failure) => {
                let fallback = policy::fallback_verdict(hide_unknown);
                info!(
                    "Could not resolve '{}' ({}), using fallback verdict {}",
                    key, failure, fallback
                );
                VerdictOutcome {
                    key,
                    is_sponsor: fallback,
                    source: VerdictSource::Fallback {
                        reason: failure.reason(),
                    },
                }
            }
        }
    }

    async fn resolve_key(&self, key: &CompanyKey) -> Result<SponsorshipVerdict, ResolutionFailure> {
        match &self.retry {
            Some(retry) => {
                retry
                    .with_retry_if(|| self.resolver.resolve(key), ResolutionFailure::is_fetch)
                    .await
            }
            None => self.resolver.resolve(key).await,
        }
    }

    /// All entries regardless of freshness, most recently resolved first.
    pub async fn entries(&self) -> Vec<CacheEntry> {
        let store = self.store.read().await;
        let mut entries: Vec<CacheEntry> = store.items.values().cloned().collect();
        entries.sort_by(|a, b| {
            b.verdict
                .resolved_at
                .cmp(&a.verdict.resolved_at)
                .then_with(|| a.key.cmp(&b.key))
        });
        entries
    }

    /// Stored entry for `key` regardless of freshness.
    pub async fn entry(&self, key: &CompanyKey) -> Option<CacheEntry> {
        self.store.read().await.items.get(key).cloned()
    }

    /// Whether an entry would still be served by [`get`](Self::get).
    pub fn is_entry_fresh(&self, entry: &CacheEntry) -> bool {
        self.is_fresh(entry, self.clock.now())
    }

    pub async fn remove(&self, key: &CompanyKey) -> bool {
        let mut store = self.store.write().await;
        let removed = store.items.remove(key).is_some();
        if removed {
            self.save(&store).await;
        }
        removed
    }

    /// Drop every entry and persist an empty store.
    pub async fn clear(&self) -> usize {
        let now = self.clock.now();
        let mut store = self.store.write().await;
        let count = store.items.len();
        *store = CacheStore::empty(now);
        self.save(&store).await;
        count
    }

    pub async fn len(&self) -> usize {
        self.store.read().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn last_cleanup(&self) -> DateTime<Utc> {
        self.store.read().await.last_cleanup_at
    }

    async fn save(&self, store: &CacheStore) {
        let value = match serde_json::to_value(store.to_persisted()) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to serialize verdict cache: {}", e);
                return;
            }
        };

        if let Err(e) = self.storage.set(STORAGE_KEY, value).await {
            warn!("Failed to persist verdict cache, keeping in-memory copy: {}", e);
        }
    }
}

fn sweep(store: &mut CacheStore, now: DateTime<Utc>, settings: &CacheSettings) -> CleanupReport {
    let before = store.items.len();
    store.items.retain(|_, entry| {
        entry.schema_version == CACHE_VERSION && now - entry.verdict.resolved_at < settings.expiry
    });
    let expired = before - store.items.len();

    let mut evicted = 0;
    if store.items.len() > settings.max_items {
        let mut by_age: Vec<(DateTime<Utc>, CompanyKey)> = store
            .items
            .values()
            .map(|entry| (entry.verdict.resolved_at, entry.key.clone()))
            .collect();
        by_age.sort();

        evicted = store.items.len() - settings.max_items;
        for (_, key) in by_age.into_iter().take(evicted) {
            store.items.remove(&key);
        }
    }

    store.last_cleanup_at = now;
    store.schema_version = CACHE_VERSION;

    CleanupReport {
        expired,
        evicted,
        remaining: store.items.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingResolver {
        calls: AtomicUsize,
        result: Result<bool, ResolutionFailure>,
        clock: ManualClock,
    }

    #[async_trait]
    impl Resolve for CountingResolver {
        async fn resolve(&self, _key: &CompanyKey) -> Result<SponsorshipVerdict, ResolutionFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone().map(|is_sponsor| SponsorshipVerdict {
                is_sponsor,
                resolved_at: self.clock.now(),
            })
        }
    }

    fn clock() -> ManualClock {
        ManualClock::at_date(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
    }

    async fn cache_with(
        result: Result<bool, ResolutionFailure>,
        settings: CacheSettings,
    ) -> (VerdictCache, Arc<CountingResolver>, Arc<MemoryStorage>, ManualClock) {
        let clock = clock();
        let resolver = Arc::new(CountingResolver {
            calls: AtomicUsize::new(0),
            result,
            clock: clock.clone(),
        });
        let storage = Arc::new(MemoryStorage::new());
        let cache = VerdictCache::load(storage.clone(), resolver.clone(), Arc::new(clock.clone()), settings).await;
        (cache, resolver, storage, clock)
    }

    fn verdict(is_sponsor: bool, at: DateTime<Utc>) -> SponsorshipVerdict {
        SponsorshipVerdict { is_sponsor, resolved_at: at }
    }

    #[tokio::test]
    async fn test_get_respects_expiry_window() {
        let (cache, _, _, clock) = cache_with(Ok(true), CacheSettings::default()).await;
        let key = CompanyKey::from_normalized("stripe");

        cache.put(key.clone(), verdict(true, clock.now())).await;
        assert_eq!(cache.get(&key).await.map(|v| v.is_sponsor), Some(true));

        clock.advance(Duration::days(7) - Duration::seconds(1));
        assert!(cache.get(&key).await.is_some());

        clock.advance(Duration::seconds(2));
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_stale_schema_entry_is_not_served() {
        let (cache, _, _, clock) = cache_with(Ok(true), CacheSettings::default()).await;
        let key = CompanyKey::from_normalized("acme");

        {
            let mut store = cache.store.write().await;
            store.items.insert(
                key.clone(),
                CacheEntry {
                    key: key.clone(),
                    verdict: verdict(true, clock.now()),
                    schema_version: CACHE_VERSION - 1,
                },
            );
        }

        assert!(cache.get(&key).await.is_none());
        let report = cache.cleanup().await;
        assert_eq!(report.expired, 1);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_sweep_evicts_oldest_over_ceiling() {
        let settings = CacheSettings {
            max_items: 3,
            ..CacheSettings::default()
        };
        let (cache, _, _, clock) = cache_with(Ok(true), settings).await;

        for i in 0..5 {
            cache.put(CompanyKey::from_normalized(format!("company-{}", i)), verdict(true, clock.now())).await;
            clock.advance(Duration::minutes(1));
        }

        assert_eq!(cache.len().await, 3);
        let kept: Vec<String> = cache.entries().await.into_iter().map(|e| e.key.into_inner()).collect();
        assert_eq!(kept, vec!["company-4", "company-3", "company-2"]);
    }

    #[tokio::test]
    async fn test_put_sweeps_after_cleanup_interval() {
        let (cache, _, _, clock) = cache_with(Ok(true), CacheSettings::default()).await;
        let old = CompanyKey::from_normalized("old");
        cache.put(old.clone(), verdict(false, clock.now())).await;

        clock.advance(Duration::days(8));
        cache.put(CompanyKey::from_normalized("new"), verdict(true, clock.now())).await;

        assert!(cache.entry(&old).await.is_none());
        assert_eq!(cache.last_cleanup().await, clock.now());
    }

    #[tokio::test]
    async fn test_resolve_with_cache_hits_after_first_lookup() {
        let (cache, resolver, _, _) = cache_with(Ok(true), CacheSettings::default()).await;

        let first = cache.resolve_with_cache(" Stripe ", true).await;
        let second = cache.resolve_with_cache("STRIPE", true).await;

        assert_eq!(first.source, VerdictSource::Resolved);
        assert_eq!(second.source, VerdictSource::Cached);
        assert!(second.is_sponsor);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_uses_policy_fallback_and_is_not_cached() {
        let (cache, resolver, _, _) = cache_with(Err(ResolutionFailure::NoData), CacheSettings::default()).await;

        let hidden = cache.resolve_with_cache("Unknown Corp", true).await;
        assert!(!hidden.is_sponsor);
        assert!(hidden.is_unknown());
        assert_eq!(hidden.source, VerdictSource::Fallback { reason: FailureReason::NoData });

        let shown = cache.resolve_with_cache("Unknown Corp", false).await;
        assert!(shown.is_sponsor);

        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_persisted_layout() {
        let (cache, _, storage, clock) = cache_with(Ok(true), CacheSettings::default()).await;
        cache.put(CompanyKey::from_normalized("meta"), verdict(true, clock.now())).await;

        let stored = storage.get(STORAGE_KEY).await.unwrap().unwrap();
        let ms = clock.now().timestamp_millis();
        assert_eq!(stored["version"], CACHE_VERSION);
        assert_eq!(stored["items"]["meta"]["isH1B"], true);
        assert_eq!(stored["items"]["meta"]["timestamp"], ms);
        assert!(stored["lastCleanup"].is_i64());
    }
}
