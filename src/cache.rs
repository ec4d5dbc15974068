/// Read-through caching with request coalescing
///
/// Wraps a network read with the store: positive entries honor a TTL,
/// negative entries record 404s for a bounded window, a stale hit is
/// served immediately while a background fetch refreshes it, and at most
/// one network request per cache key is in flight at any instant.
use crate::error::{ClientError, ClientResult};
use crate::model::promote;
use crate::store::KvStore;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// How a read interacts with the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Serve fresh hits; serve stale hits immediately while revalidating
    #[default]
    Swr,
    /// Never touch the network; fail without a fresh hit
    ForceCache,
    /// Skip the cache read (the result is still written back)
    NoCache,
    /// Like `Swr`, but a fresh negative entry also kicks off a background
    /// revalidation before answering
    BestEffort,
    /// Fetch, but only record negative results
    NegativeOnly,
}

/// Options for one cached read
pub struct CacheOptions<T> {
    pub policy: CachePolicy,

    /// Freshness override; `None` uses the engine default
    pub ttl: Option<Duration>,

    /// Side channel invoked the moment a value (cached or fresh) is
    /// available, before the call returns
    pub express: Option<Arc<dyn Fn(&T) + Send + Sync>>,
}

impl<T> Default for CacheOptions<T> {
    fn default() -> Self {
        Self {
            policy: CachePolicy::default(),
            ttl: None,
            express: None,
        }
    }
}

impl<T> CacheOptions<T> {
    pub fn policy(policy: CachePolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::default()
        }
    }
}

/// The pending fetch that will settle a cache key
type SharedFetch = Shared<BoxFuture<'static, ClientResult<Option<Value>>>>;

/// A network read producing the raw value to cache (`None` records a 404)
pub type FetchFuture = BoxFuture<'static, ClientResult<Option<Value>>>;

/// Read-through cache engine
pub struct CacheEngine {
    store: Arc<dyn KvStore>,
    inflight: Arc<Mutex<HashMap<String, SharedFetch>>>,
    default_ttl: Option<Duration>,
    negative_ttl: Duration,
}

impl CacheEngine {
    pub fn new(
        store: Arc<dyn KvStore>,
        default_ttl: Option<Duration>,
        negative_ttl: Duration,
    ) -> Self {
        Self {
            store,
            inflight: Arc::new(Mutex::new(HashMap::new())),
            default_ttl,
            negative_ttl,
        }
    }

    /// The backing store
    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Cached read
    ///
    /// `fetch` is only invoked when this call actually starts a network
    /// request; a call that joins an existing in-flight request drops it.
    /// `Ok(None)` means the resource does not exist (negatively cached).
    pub async fn fetch<T, F>(
        &self,
        key: &str,
        opts: &CacheOptions<T>,
        fetch: F,
    ) -> ClientResult<Option<T>>
    where
        T: DeserializeOwned,
        F: FnOnce() -> FetchFuture,
    {
        let ttl = opts.ttl.or(self.default_ttl);
        let mut stale: Option<T> = None;

        if opts.policy != CachePolicy::NoCache {
            if let Some(entry) = self.store.get(key).await? {
                match &entry.data {
                    Some(value) => {
                        let promoted: T = promote(value.clone())?;
                        if let Some(express) = &opts.express {
                            express(&promoted);
                        }

                        let fresh = match ttl {
                            None => true,
                            Some(ttl) => {
                                entry.age()
                                    < chrono::Duration::from_std(ttl)
                                        .unwrap_or(chrono::Duration::MAX)
                            }
                        };
                        if fresh {
                            return Ok(Some(promoted));
                        }
                        debug!("stale cache hit for {}, revalidating", key);
                        stale = Some(promoted);
                    }
                    None => {
                        let negative_fresh = entry.age()
                            < chrono::Duration::from_std(self.negative_ttl)
                                .unwrap_or(chrono::Duration::MAX);
                        if negative_fresh {
                            if opts.policy == CachePolicy::BestEffort {
                                // Answer now, refresh behind the caller's back
                                let _ = self.join_or_start(key, fetch, true);
                                return Ok(None);
                            }
                            return Ok(None);
                        }
                        // Expired negative entry; fall through to the network
                    }
                }
            }
        }

        if opts.policy == CachePolicy::ForceCache {
            return Err(ClientError::CacheMiss(key.to_string()));
        }

        let write_positive = opts.policy != CachePolicy::NegativeOnly;
        let pending = self.join_or_start(key, fetch, write_positive);

        // Stale-while-revalidate: the spawned driver completes the fetch
        if let Some(stale) = stale {
            return Ok(Some(stale));
        }

        match pending.await? {
            Some(value) => {
                let promoted: T = promote(value)?;
                if let Some(express) = &opts.express {
                    express(&promoted);
                }
                Ok(Some(promoted))
            }
            None => Ok(None),
        }
    }

    /// Join the in-flight request for `key`, or start one
    ///
    /// Get-or-start is atomic under the map lock, so a key never has two
    /// concurrent network requests. A driver task awaits the shared future
    /// and removes the entry once it settles, success or failure, even if
    /// every interested caller has gone away.
    fn join_or_start<F>(&self, key: &str, fetch: F, write_positive: bool) -> SharedFetch
    where
        F: FnOnce() -> FetchFuture,
    {
        let mut inflight = self.inflight.lock().unwrap();
        if let Some(existing) = inflight.get(key) {
            debug!("joining in-flight request for {}", key);
            return existing.clone();
        }

        let store = self.store.clone();
        let write_key = key.to_string();
        let raw = fetch();
        let shared = async move {
            match raw.await {
                Ok(Some(value)) => {
                    if write_positive {
                        if let Err(e) = store.set(&write_key, Some(value.clone())).await {
                            warn!("failed to write cache entry {}: {}", write_key, e);
                        }
                    }
                    Ok(Some(value))
                }
                Ok(None) => {
                    if let Err(e) = store.set(&write_key, None).await {
                        warn!("failed to write negative entry {}: {}", write_key, e);
                    }
                    Ok(None)
                }
                Err(e) => Err(e),
            }
        }
        .boxed()
        .shared();

        inflight.insert(key.to_string(), shared.clone());

        let map = self.inflight.clone();
        let cleanup_key = key.to_string();
        let driven = shared.clone();
        tokio::spawn(async move {
            let _ = driven.await;
            map.lock().unwrap().remove(&cleanup_key);
        });

        shared
    }

    /// Number of requests currently in flight (diagnostics)
    pub fn inflight_len(&self) -> usize {
        self.inflight.lock().unwrap().len()
    }
}
