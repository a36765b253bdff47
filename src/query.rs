//! Deduplicating, reference-counted query cache.
//!
//! Concurrent requests with the same [`QuerySignature`] share one backend
//! call. A settled result stays cached while at least one [`QueryInterest`]
//! holds it and for a grace period afterwards; failures are not cached unless
//! [`QueryConfig::error_ttl`] says so.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::backend::Backend;
use crate::config::QueryConfig;
use crate::emitter::EventEmitter;
use crate::error::QueryError;
use crate::event::{DashboardEvent, EventBody};

/// A data query: a type name plus JSON parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySpec {
    /// Backend query kind, e.g. `kpiValue`.
    pub query_type: String,
    #[serde(default)]
    pub params: Value,
    /// Stamped on the query lifecycle events; not part of the signature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl QuerySpec {
    /// Create a query spec with no correlation id.
    ///
    /// # Arguments
    ///
    /// * `query_type` - Backend query kind; part of the signature.
    /// * `params` - JSON parameters; object key order does not affect the
    ///   signature.
    pub fn new(query_type: impl Into<String>, params: Value) -> Self {
        Self {
            query_type: query_type.into(),
            params,
            correlation_id: None,
        }
    }

    /// Set the correlation id stamped on this query's lifecycle events.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Deterministic signature over the query type and the canonical form of
    /// the params (object keys sorted at every level).
    pub fn signature(&self) -> QuerySignature {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.query_type.as_bytes());
        hasher.update(&[0]);
        hash_canonical(&self.params, &mut hasher);
        QuerySignature(format!("{}:{}", self.query_type, hasher.finalize().to_hex()))
    }
}

fn hash_canonical(value: &Value, hasher: &mut blake3::Hasher) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            hasher.update(b"{");
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    hasher.update(b",");
                }
                hasher.update(Value::String(key.clone()).to_string().as_bytes());
                hasher.update(b":");
                hash_canonical(&map[key], hasher);
            }
            hasher.update(b"}");
        }
        Value::Array(items) => {
            hasher.update(b"[");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    hasher.update(b",");
                }
                hash_canonical(item, hasher);
            }
            hasher.update(b"]");
        }
        scalar => {
            hasher.update(scalar.to_string().as_bytes());
        }
    }
}

/// Cache key of a query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuerySignature(String);

impl QuerySignature {
    /// `<query type>:<hex digest>`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QuerySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Settled outcome shared by every subscriber of a signature.
pub type QueryResult = Result<Arc<Value>, QueryError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Pending,
    Success,
    Error,
}

/// Snapshot of one cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryEntryInfo {
    pub status: QueryStatus,
    pub subscribers: usize,
}

enum EntryState {
    Pending(watch::Receiver<Option<QueryResult>>),
    Ready(Arc<Value>),
    Failed { error: QueryError, expires_at: Instant },
}

struct CacheEntry {
    state: EntryState,
    subscribers: usize,
    /// Distinguishes this entry from a later one under the same signature.
    generation: u64,
    /// Bumped whenever the subscriber count drops to zero; a pending
    /// eviction only fires if the epoch is unchanged.
    idle_epoch: u64,
}

impl CacheEntry {
    fn is_reusable(&self, now: Instant) -> bool {
        match &self.state {
            EntryState::Failed { expires_at, .. } => now < *expires_at,
            _ => true,
        }
    }

    fn source(&self) -> Source {
        match &self.state {
            EntryState::Pending(rx) => Source::Pending(rx.clone()),
            EntryState::Ready(value) => Source::Settled(Ok(Arc::clone(value))),
            EntryState::Failed { error, .. } => Source::Settled(Err(error.clone())),
        }
    }

    /// How long an idle entry stays cached: the grace period, stretched to
    /// the end of a cached failure's TTL.
    fn idle_lifetime(&self, grace: Duration, now: Instant) -> Duration {
        match &self.state {
            EntryState::Failed { expires_at, .. } => grace.max(expires_at.saturating_duration_since(now)),
            _ => grace,
        }
    }

    fn status(&self) -> QueryStatus {
        match self.state {
            EntryState::Pending(_) => QueryStatus::Pending,
            EntryState::Ready(_) => QueryStatus::Success,
            EntryState::Failed { .. } => QueryStatus::Error,
        }
    }
}

struct Inner {
    entries: Mutex<HashMap<QuerySignature, CacheEntry>>,
    backend: Arc<dyn Backend>,
    emitter: EventEmitter,
    config: QueryConfig,
    next_generation: AtomicU64,
}

impl Inner {
    fn entries(&self) -> MutexGuard<'_, HashMap<QuerySignature, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settle(self: &Arc<Self>, signature: &QuerySignature, generation: u64, outcome: &QueryResult) {
        let mut entries = self.entries();
        let current = entries
            .get(signature)
            .is_some_and(|entry| entry.generation == generation);
        if !current {
            return;
        }
        let state = match (outcome, self.config.error_ttl) {
            (Ok(value), _) => EntryState::Ready(Arc::clone(value)),
            (Err(error), Some(ttl)) => EntryState::Failed {
                error: error.clone(),
                expires_at: Instant::now() + ttl,
            },
            (Err(_), None) => {
                entries.remove(signature);
                tracing::debug!(%signature, "failed query not cached");
                return;
            }
        };
        let Some(entry) = entries.get_mut(signature) else {
            return;
        };
        entry.state = state;
        if entry.subscribers == 0 {
            entry.idle_epoch += 1;
            let epoch = entry.idle_epoch;
            let delay = entry.idle_lifetime(self.config.eviction_grace, Instant::now());
            drop(entries);
            self.schedule_eviction(signature.clone(), generation, epoch, delay);
        }
    }

    /// The fetch ended without settling (panic or runtime shutdown).
    fn abandon_fetch(&self, signature: &QuerySignature, generation: u64) {
        let mut entries = self.entries();
        let pending = entries.get(signature).is_some_and(|entry| {
            entry.generation == generation && matches!(entry.state, EntryState::Pending(_))
        });
        if pending {
            entries.remove(signature);
            tracing::warn!(%signature, "query fetch ended without a result");
        }
    }

    fn release(self: &Arc<Self>, signature: &QuerySignature, generation: u64) {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(signature) else {
            return;
        };
        if entry.generation != generation {
            return;
        }
        entry.subscribers = entry.subscribers.saturating_sub(1);
        // A pending entry schedules its own eviction when it settles.
        if entry.subscribers > 0 || matches!(entry.state, EntryState::Pending(_)) {
            return;
        }
        entry.idle_epoch += 1;
        let epoch = entry.idle_epoch;
        let delay = entry.idle_lifetime(self.config.eviction_grace, Instant::now());
        drop(entries);
        self.schedule_eviction(signature.clone(), generation, epoch, delay);
    }

    fn schedule_eviction(
        self: &Arc<Self>,
        signature: QuerySignature,
        generation: u64,
        epoch: u64,
        delay: Duration,
    ) {
        if delay.is_zero() {
            self.evict(&signature, generation, epoch);
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(self);
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    inner.evict(&signature, generation, epoch);
                });
            }
            // Dropped outside any runtime: nobody can resubscribe in time.
            Err(_) => self.evict(&signature, generation, epoch),
        }
    }

    fn evict(&self, signature: &QuerySignature, generation: u64, epoch: u64) {
        let mut entries = self.entries();
        let idle = entries.get(signature).is_some_and(|entry| {
            entry.generation == generation
                && entry.idle_epoch == epoch
                && entry.subscribers == 0
                && !matches!(entry.state, EntryState::Pending(_))
        });
        if idle {
            entries.remove(signature);
            tracing::debug!(%signature, "query cache entry evicted");
        }
    }
}

/// Removes a still-pending entry if the fetch task never settles it.
struct FetchGuard {
    inner: Arc<Inner>,
    signature: QuerySignature,
    generation: u64,
    settled: bool,
}

impl Drop for FetchGuard {
    fn drop(&mut self) {
        if !self.settled {
            self.inner.abandon_fetch(&self.signature, self.generation);
        }
    }
}

/// Executes queries through the backend with signature-level deduplication.
///
/// Cheap to clone; clones share one cache.
#[derive(Clone)]
pub struct QueryProcessor {
    inner: Arc<Inner>,
}

impl fmt::Debug for QueryProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryProcessor")
            .field("entries", &self.len())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl QueryProcessor {
    pub(crate) fn new(backend: Arc<dyn Backend>, emitter: EventEmitter, config: QueryConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                backend,
                emitter,
                config,
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Register interest in `spec`, issuing the backend call if no usable
    /// entry exists for its signature.
    ///
    /// Must be called from within a tokio runtime: the backend call runs on
    /// a spawned task so that it survives any single subscriber leaving.
    pub fn subscribe(&self, spec: QuerySpec) -> QueryInterest {
        let signature = spec.signature();
        let now = Instant::now();
        let (generation, source, fetch) = {
            let mut entries = self.inner.entries();
            match entries.get_mut(&signature) {
                Some(entry) if entry.is_reusable(now) => {
                    entry.subscribers += 1;
                    tracing::debug!(%signature, subscribers = entry.subscribers, "query cache hit");
                    (entry.generation, entry.source(), None)
                }
                _ => {
                    let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
                    let (tx, rx) = watch::channel(None);
                    entries.insert(
                        signature.clone(),
                        CacheEntry {
                            state: EntryState::Pending(rx.clone()),
                            subscribers: 1,
                            generation,
                            idle_epoch: 0,
                        },
                    );
                    (generation, Source::Pending(rx), Some(tx))
                }
            }
        };

        if let Some(tx) = fetch {
            self.start_fetch(spec, signature.clone(), generation, tx);
        }

        QueryInterest {
            inner: Arc::clone(&self.inner),
            signature,
            generation,
            source,
        }
    }

    /// Run `spec` to completion. The interest is released on return.
    pub async fn query(&self, spec: QuerySpec) -> QueryResult {
        let mut interest = self.subscribe(spec);
        interest.result().await
    }

    /// State of the entry for `signature`, if cached.
    pub fn entry(&self, signature: &QuerySignature) -> Option<QueryEntryInfo> {
        self.inner.entries().get(signature).map(|entry| QueryEntryInfo {
            status: entry.status(),
            subscribers: entry.subscribers,
        })
    }

    /// Drop a settled entry so the next subscriber re-issues the query.
    ///
    /// Pending entries are left alone. Returns `true` if an entry was removed.
    pub fn invalidate(&self, signature: &QuerySignature) -> bool {
        let mut entries = self.inner.entries();
        let settled = entries
            .get(signature)
            .is_some_and(|entry| !matches!(entry.state, EntryState::Pending(_)));
        settled && entries.remove(signature).is_some()
    }

    /// Number of cached entries, pending ones included.
    pub fn len(&self) -> usize {
        self.inner.entries().len()
    }

    /// Whether no entry is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn start_fetch(
        &self,
        spec: QuerySpec,
        signature: QuerySignature,
        generation: u64,
        tx: watch::Sender<Option<QueryResult>>,
    ) {
        let inner = Arc::clone(&self.inner);
        let correlation_id = spec.correlation_id.clone();
        inner.emitter.emit(&DashboardEvent::new(
            EventBody::QueryStarted {
                query_type: spec.query_type.clone(),
                signature: signature.to_string(),
            },
            correlation_id.clone(),
        ));
        tracing::debug!(%signature, "query issued");

        tokio::spawn(async move {
            let mut guard = FetchGuard {
                inner: Arc::clone(&inner),
                signature: signature.clone(),
                generation,
                settled: false,
            };
            let outcome: QueryResult = inner
                .backend
                .execute_query(&spec)
                .await
                .map(Arc::new)
                .map_err(QueryError::from);

            inner.settle(&signature, generation, &outcome);
            guard.settled = true;

            let body = match &outcome {
                Ok(_) => EventBody::QueryCompleted {
                    query_type: spec.query_type.clone(),
                    signature: signature.to_string(),
                },
                Err(error) => EventBody::QueryFailed {
                    query_type: spec.query_type.clone(),
                    signature: signature.to_string(),
                    message: error.to_string(),
                },
            };
            // Every subscriber may already be gone.
            let _ = tx.send(Some(outcome));
            inner.emitter.emit(&DashboardEvent::new(body, correlation_id));
        });
    }
}

enum Source {
    Settled(QueryResult),
    Pending(watch::Receiver<Option<QueryResult>>),
}

/// A subscriber's hold on a cache entry.
///
/// Dropping it releases the hold; the entry is evicted once the last hold is
/// gone and the grace period has passed. A dropped interest receives nothing
/// further, while other subscribers are unaffected.
pub struct QueryInterest {
    inner: Arc<Inner>,
    signature: QuerySignature,
    generation: u64,
    source: Source,
}

impl fmt::Debug for QueryInterest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryInterest")
            .field("signature", &self.signature)
            .field("settled", &matches!(self.source, Source::Settled(_)))
            .finish()
    }
}

impl QueryInterest {
    /// Signature of the entry this interest holds.
    pub fn signature(&self) -> &QuerySignature {
        &self.signature
    }

    /// The result, if already settled.
    pub fn try_result(&self) -> Option<QueryResult> {
        match &self.source {
            Source::Settled(result) => Some(result.clone()),
            Source::Pending(rx) => rx.borrow().clone(),
        }
    }

    /// Wait for the shared result.
    pub async fn result(&mut self) -> QueryResult {
        let rx = match &mut self.source {
            Source::Settled(result) => return result.clone(),
            Source::Pending(rx) => rx,
        };
        let result = loop {
            let current = rx.borrow_and_update().clone();
            if let Some(result) = current {
                break result;
            }
            if rx.changed().await.is_err() {
                let last = rx.borrow().clone();
                break last.unwrap_or(Err(QueryError::Interrupted));
            }
        };
        self.source = Source::Settled(result.clone());
        result
    }
}

impl Drop for QueryInterest {
    fn drop(&mut self) {
        self.inner.release(&self.signature, self.generation);
    }
}
