/// Client facade
///
/// Wires the store, cache, transport, credentials, and liveness tracking
/// together and exposes the typed API surface. Identifier resolution lives
/// here too: everything addressed as `<id>@<home>` funnels through
/// [`Client::resolve_timeline_host`] before the request goes out.

mod commit;
mod reads;

use crate::auth::AuthProvider;
use crate::cache::CacheEngine;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::liveness::LivenessTracker;
use crate::model::{ids, Domain, Entity};
use crate::socket::TimelineSocket;
use crate::store::{KvStore, MemoryStore};
use crate::transport::{FetchEngine, RequestOptions};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Timeout for explicit domain-status probes
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// A Concrnt client bound to one identity (or none) and one home domain
#[derive(Clone)]
pub struct Client {
    config: Arc<ClientConfig>,
    auth: Arc<AuthProvider>,
    store: Arc<dyn KvStore>,
    cache: Arc<CacheEngine>,
    fetch: Arc<FetchEngine>,
    liveness: LivenessTracker,
}

impl Client {
    fn assemble(
        config: ClientConfig,
        auth: AuthProvider,
        store: Arc<dyn KvStore>,
    ) -> ClientResult<Self> {
        let config = Arc::new(config);
        let auth = Arc::new(auth);
        let liveness = LivenessTracker::new(store.clone());
        let fetch = Arc::new(FetchEngine::new(
            auth.clone(),
            liveness.clone(),
            config.clone(),
        )?);
        let cache = Arc::new(CacheEngine::new(
            store.clone(),
            config.default_cache_ttl,
            config.negative_cache_ttl,
        ));

        Ok(Self {
            config,
            auth,
            store,
            cache,
            fetch,
            liveness,
        })
    }

    /// Client for a master key, homed at `host`
    pub fn new(host: impl Into<String>, private_key: &str) -> ClientResult<Self> {
        let host = host.into();
        let auth = AuthProvider::master(private_key, host.clone())?;
        Self::assemble(ClientConfig::new(host), auth, Arc::new(MemoryStore::new()))
    }

    /// Client for a sub-key blob; the home domain comes from the blob
    pub fn from_subkey(blob: &str) -> ClientResult<Self> {
        let auth = AuthProvider::subkey(blob)?;
        let host = auth.host().to_string();
        Self::assemble(ClientConfig::new(host), auth, Arc::new(MemoryStore::new()))
    }

    /// Read-only client with no identity
    pub fn guest(host: impl Into<String>) -> ClientResult<Self> {
        let host = host.into();
        let auth = AuthProvider::guest(host.clone())?;
        Self::assemble(ClientConfig::new(host), auth, Arc::new(MemoryStore::new()))
    }

    /// Full-control construction with an explicit config and store backend
    pub fn with_store(
        config: ClientConfig,
        auth: AuthProvider,
        store: Arc<dyn KvStore>,
    ) -> ClientResult<Self> {
        Self::assemble(config, auth, store)
    }

    /// The client's home domain
    pub fn host(&self) -> &str {
        &self.config.host
    }

    /// The acting account root
    pub fn ccid(&self) -> ClientResult<&str> {
        self.auth.ccid()
    }

    /// The active sub-key, if any
    pub fn ckid(&self) -> ClientResult<Option<&str>> {
        self.auth.ckid()
    }

    /// The credential provider
    pub fn auth(&self) -> &Arc<AuthProvider> {
        &self.auth
    }

    /// The shared cache store
    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub(crate) fn cache(&self) -> &Arc<CacheEngine> {
        &self.cache
    }

    pub(crate) fn fetch_engine(&self) -> &Arc<FetchEngine> {
        &self.fetch
    }

    /// A realtime socket sharing this client's cache
    ///
    /// `host` overrides the home domain, e.g. to follow timelines hosted
    /// elsewhere. Call [`TimelineSocket::connect`] to bring it up.
    pub fn subscribe(&self, host: Option<&str>) -> TimelineSocket {
        let host = host.unwrap_or(&self.config.host);
        TimelineSocket::new(self.store.clone(), host)
    }

    /// Home domain responsible for an identifier
    ///
    /// CSIDs resolve through the domain registry; anything else is an
    /// account whose entity record names its domain. The `hint` host is
    /// only consulted when the default host is itself offline.
    pub async fn resolve_domain(&self, id: &str, hint: Option<&str>) -> ClientResult<String> {
        if ids::is_csid(id) {
            return Ok(self.get_domain_by_csid(id).await?.fqdn);
        }

        let entity = match self.get_entity(id, hint).await {
            Ok(entity) => entity,
            Err(ClientError::DomainOffline(_)) if hint.is_some() => {
                let hint = hint.unwrap_or_default();
                debug!("default host offline, resolving {} via {}", id, hint);
                self.fetch
                    .get_json::<Entity>(
                        Some(hint),
                        &format!("/api/v1/entity/{}", id),
                        &RequestOptions::default(),
                    )
                    .await?
            }
            Err(e) => return Err(e),
        };
        Ok(entity.domain)
    }

    /// Home domain responsible for a timeline id
    ///
    /// The part after `@` names the home: an FQDN directly, or a
    /// CCID/CSID that still needs resolving. No suffix means the default
    /// host.
    pub async fn resolve_timeline_host(&self, timeline: &str) -> ClientResult<String> {
        let (_, suffix) = ids::split_resource_host(timeline);
        match suffix {
            None => Ok(self.config.host.clone()),
            Some(suffix) if ids::is_ccid(suffix) || ids::is_csid(suffix) => {
                self.resolve_domain(suffix, None).await
            }
            Some(fqdn) => Ok(fqdn.to_string()),
        }
    }

    /// Explicit status probe for a domain
    ///
    /// Served from the short-lived probe cache when fresh; otherwise a
    /// quick unauthenticated request. Independent of the request-path
    /// back-off state.
    pub async fn is_domain_online(&self, host: &str) -> bool {
        if let Some(cached) = self.liveness.fresh_probe(host).await {
            return cached;
        }

        let online = self
            .fetch
            .get_json::<Domain>(
                Some(host),
                "/api/v1/domain",
                &RequestOptions {
                    no_auth: true,
                    timeout: Some(PROBE_TIMEOUT),
                    headers: Vec::new(),
                },
            )
            .await
            .is_ok();
        self.liveness.record_probe(host, online).await;
        online
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TEST_KEY: &str = "8a2c7b4d5e6f708192a3b4c5d6e7f8091a2b3c4d5e6f708192a3b4c5d6e7f809";
    const CCID: &str = "con1aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    #[tokio::test]
    async fn test_construction_variants() {
        let client = Client::new("a.example", TEST_KEY).unwrap();
        assert_eq!(client.host(), "a.example");
        assert!(client.ccid().unwrap().starts_with("con1"));
        assert_eq!(client.ckid().unwrap(), None);

        let guest = Client::guest("a.example").unwrap();
        assert!(guest.ccid().is_err());

        assert!(Client::new("a.example", "bogus").is_err());
    }

    #[tokio::test]
    async fn test_resolve_timeline_host_suffixes() {
        let client = Client::guest("home.example").unwrap();

        // No suffix: the default host
        assert_eq!(
            client.resolve_timeline_host("t1").await.unwrap(),
            "home.example"
        );

        // FQDN suffix: taken as-is
        assert_eq!(
            client.resolve_timeline_host("t1@other.example").await.unwrap(),
            "other.example"
        );
    }

    #[tokio::test]
    async fn test_resolve_timeline_host_ccid_suffix_uses_entity_record() {
        let client = Client::guest("home.example").unwrap();

        // Pre-seeded entity record; resolution stays on the cache
        client
            .store()
            .set(
                &format!("entity:{}", CCID),
                Some(json!({
                    "ccid": CCID,
                    "tag": "",
                    "domain": "their.example",
                    "cdate": "2024-01-01T00:00:00Z"
                })),
            )
            .await
            .unwrap();

        let host = client
            .resolve_timeline_host(&format!("t1@{}", CCID))
            .await
            .unwrap();
        assert_eq!(host, "their.example");
    }
}
