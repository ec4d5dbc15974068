/// Typed read helpers over `/api/v1`
///
/// Single-resource getters read through the cache; list and query
/// endpoints go straight to the network. Every getter with a cache key
/// has a `*_with` form taking explicit [`CacheOptions`].
use super::Client;
use crate::cache::CacheOptions;
use crate::error::{ClientError, ClientResult};
use crate::model::{
    Ack, ApiResponse, Association, Domain, EnactedKey, Entity, KvEntry, Message, Profile,
    Subscription, Timeline, TimelineItem,
};
use crate::model::ids;
use crate::transport::RequestOptions;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::HashMap;

/// Seconds-since-epoch, rounded down (for `since` bounds)
fn floor_secs(t: &DateTime<Utc>) -> i64 {
    t.timestamp()
}

/// Seconds-since-epoch, rounded up (for `until` bounds)
fn ceil_secs(t: &DateTime<Utc>) -> i64 {
    if t.timestamp_subsec_nanos() > 0 {
        t.timestamp() + 1
    } else {
        t.timestamp()
    }
}

fn query_string(params: &[(&str, Option<String>)]) -> String {
    let parts: Vec<String> = params
        .iter()
        .filter_map(|(name, value)| value.as_ref().map(|v| format!("{}={}", name, v)))
        .collect();
    if parts.is_empty() {
        String::new()
    } else {
        format!("?{}", parts.join("&"))
    }
}

impl Client {
    /// Cached read-through: join or start the fetch for `key`
    pub(crate) async fn cached_read<T>(
        &self,
        host: Option<&str>,
        path: String,
        key: &str,
        opts: &CacheOptions<T>,
    ) -> ClientResult<Option<T>>
    where
        T: DeserializeOwned + 'static,
    {
        let fetch = self.fetch_engine().clone();
        let host = host.map(str::to_string);
        self.cache()
            .fetch(key, opts, move || {
                async move {
                    fetch
                        .get_cacheable(host.as_deref(), &path, &RequestOptions::default())
                        .await
                }
                .boxed()
            })
            .await
    }

    fn require<T>(found: Option<T>, what: &str, id: &str) -> ClientResult<T> {
        found.ok_or_else(|| ClientError::NotFound(format!("{} {} not found", what, id)))
    }

    // --- entities ---------------------------------------------------------

    /// Entity record for an account root
    pub async fn get_entity(&self, ccid: &str, hint: Option<&str>) -> ClientResult<Entity> {
        self.get_entity_with(ccid, hint, &CacheOptions::default())
            .await
    }

    pub async fn get_entity_with(
        &self,
        ccid: &str,
        hint: Option<&str>,
        opts: &CacheOptions<Entity>,
    ) -> ClientResult<Entity> {
        let query = query_string(&[("hint", hint.map(str::to_string))]);
        let path = format!("/api/v1/entity/{}{}", ccid, query);
        let found = self
            .cached_read(None, path, &format!("entity:{}", ccid), opts)
            .await?;
        Self::require(found, "entity", ccid)
    }

    /// Every entity homed on the default domain
    pub async fn get_entities(&self) -> ClientResult<Vec<Entity>> {
        self.fetch_engine()
            .get_json(None, "/api/v1/entities", &RequestOptions::default())
            .await
    }

    // --- messages ---------------------------------------------------------

    /// A message by id
    pub async fn get_message(&self, id: &str, host: Option<&str>) -> ClientResult<Message> {
        self.get_message_with(id, host, &CacheOptions::default())
            .await
    }

    pub async fn get_message_with(
        &self,
        id: &str,
        host: Option<&str>,
        opts: &CacheOptions<Message>,
    ) -> ClientResult<Message> {
        let path = format!("/api/v1/message/{}", id);
        let found = self
            .cached_read(host, path, &format!("message:{}", id), opts)
            .await?;
        Self::require(found, "message", id)
    }

    /// All associations hanging off a message
    pub async fn get_message_associations(
        &self,
        id: &str,
        host: Option<&str>,
    ) -> ClientResult<Vec<Association>> {
        self.fetch_engine()
            .get_json(
                host,
                &format!("/api/v1/message/{}/associations", id),
                &RequestOptions::default(),
            )
            .await
    }

    /// Associations on a message, filtered by schema (and variant)
    pub async fn get_message_associations_by_schema(
        &self,
        id: &str,
        host: Option<&str>,
        schema: &str,
        variant: Option<&str>,
    ) -> ClientResult<Vec<Association>> {
        let query = query_string(&[
            ("schema", Some(schema.to_string())),
            ("variant", variant.map(str::to_string)),
        ]);
        self.fetch_engine()
            .get_json(
                host,
                &format!("/api/v1/message/{}/associations{}", id, query),
                &RequestOptions::default(),
            )
            .await
    }

    /// Association counts on a message, keyed by schema
    pub async fn get_message_association_counts(
        &self,
        id: &str,
        host: Option<&str>,
        schema: Option<&str>,
    ) -> ClientResult<HashMap<String, i64>> {
        let query = query_string(&[("schema", schema.map(str::to_string))]);
        self.fetch_engine()
            .get_json(
                host,
                &format!("/api/v1/message/{}/associationcounts{}", id, query),
                &RequestOptions::default(),
            )
            .await
    }

    // --- associations -----------------------------------------------------

    /// An association by id
    pub async fn get_association(
        &self,
        id: &str,
        host: Option<&str>,
    ) -> ClientResult<Association> {
        self.get_association_with(id, host, &CacheOptions::default())
            .await
    }

    pub async fn get_association_with(
        &self,
        id: &str,
        host: Option<&str>,
        opts: &CacheOptions<Association>,
    ) -> ClientResult<Association> {
        let path = format!("/api/v1/association/{}", id);
        let found = self
            .cached_read(host, path, &format!("association:{}", id), opts)
            .await?;
        Self::require(found, "association", id)
    }

    // --- profiles ---------------------------------------------------------

    /// A profile by id
    pub async fn get_profile(&self, id: &str, host: Option<&str>) -> ClientResult<Profile> {
        self.get_profile_with(id, host, &CacheOptions::default())
            .await
    }

    pub async fn get_profile_with(
        &self,
        id: &str,
        host: Option<&str>,
        opts: &CacheOptions<Profile>,
    ) -> ClientResult<Profile> {
        let path = format!("/api/v1/profile/{}", id);
        let found = self
            .cached_read(host, path, &format!("profile:{}", id), opts)
            .await?;
        Self::require(found, "profile", id)
    }

    /// An owner's profile by its well-known name
    pub async fn get_profile_by_semantic_id(
        &self,
        semantic_id: &str,
        owner: &str,
        host: Option<&str>,
    ) -> ClientResult<Profile> {
        self.get_profile_by_semantic_id_with(semantic_id, owner, host, &CacheOptions::default())
            .await
    }

    pub async fn get_profile_by_semantic_id_with(
        &self,
        semantic_id: &str,
        owner: &str,
        host: Option<&str>,
        opts: &CacheOptions<Profile>,
    ) -> ClientResult<Profile> {
        let path = format!("/api/v1/profile/{}/{}", owner, semantic_id);
        let key = format!("profile:{}@{}", semantic_id, owner);
        let found = self.cached_read(host, path, &key, opts).await?;
        Self::require(found, "profile", semantic_id)
    }

    /// Profile search by author, schema, and time window
    pub async fn query_profiles(
        &self,
        author: Option<&str>,
        schema: Option<&str>,
        since: Option<&DateTime<Utc>>,
        until: Option<&DateTime<Utc>>,
        limit: Option<u32>,
    ) -> ClientResult<Vec<Profile>> {
        let query = query_string(&[
            ("author", author.map(str::to_string)),
            ("schema", schema.map(str::to_string)),
            ("since", since.map(|t| floor_secs(t).to_string())),
            ("until", until.map(|t| ceil_secs(t).to_string())),
            ("limit", limit.map(|l| l.to_string())),
        ]);
        self.fetch_engine()
            .get_json(None, &format!("/api/v1/profiles{}", query), &RequestOptions::default())
            .await
    }

    // --- timelines --------------------------------------------------------

    /// Timeline metadata; the home host comes from the id's `@` suffix
    pub async fn get_timeline(&self, id: &str) -> ClientResult<Timeline> {
        self.get_timeline_with(id, &CacheOptions::default()).await
    }

    pub async fn get_timeline_with(
        &self,
        id: &str,
        opts: &CacheOptions<Timeline>,
    ) -> ClientResult<Timeline> {
        let host = self.resolve_timeline_host(id).await?;
        let (bare, _) = ids::split_resource_host(id);
        let path = format!("/api/v1/timeline/{}", bare);
        let found = self
            .cached_read(Some(&host), path, &format!("timeline:{}", id), opts)
            .await?;
        Self::require(found, "timeline", id)
    }

    /// Indexed timelines on the default host, filtered by schema
    pub async fn get_timelines_by_schema(&self, schema: &str) -> ClientResult<Vec<Timeline>> {
        let query = query_string(&[("schema", Some(schema.to_string()))]);
        self.fetch_engine()
            .get_json(None, &format!("/api/v1/timelines{}", query), &RequestOptions::default())
            .await
    }

    /// Latest items across a set of timelines hosted on one domain
    pub async fn get_timelines_recent(
        &self,
        host: Option<&str>,
        timelines: &[String],
    ) -> ClientResult<Vec<TimelineItem>> {
        let query = query_string(&[("timelines", Some(timelines.join(",")))]);
        self.fetch_engine()
            .get_json(
                host,
                &format!("/api/v1/timelines/recent{}", query),
                &RequestOptions::default(),
            )
            .await
    }

    /// Items across a set of timelines within a time window
    pub async fn get_timelines_ranged(
        &self,
        host: Option<&str>,
        timelines: &[String],
        since: Option<&DateTime<Utc>>,
        until: Option<&DateTime<Utc>>,
    ) -> ClientResult<Vec<TimelineItem>> {
        let query = query_string(&[
            ("timelines", Some(timelines.join(","))),
            ("since", since.map(|t| floor_secs(t).to_string())),
            ("until", until.map(|t| ceil_secs(t).to_string())),
        ]);
        self.fetch_engine()
            .get_json(
                host,
                &format!("/api/v1/timelines/range{}", query),
                &RequestOptions::default(),
            )
            .await
    }

    /// Filtered query over one timeline, with pagination cursors
    pub async fn query_timeline(
        &self,
        id: &str,
        schema: Option<&str>,
        owner: Option<&str>,
        author: Option<&str>,
        until: Option<&DateTime<Utc>>,
        limit: Option<u32>,
    ) -> ClientResult<ApiResponse<Vec<TimelineItem>>> {
        let host = self.resolve_timeline_host(id).await?;
        let (bare, _) = ids::split_resource_host(id);
        let query = query_string(&[
            ("schema", schema.map(str::to_string)),
            ("owner", owner.map(str::to_string)),
            ("author", author.map(str::to_string)),
            ("until", until.map(|t| ceil_secs(t).to_string())),
            ("limit", limit.map(|l| l.to_string())),
        ]);
        let envelope: ApiResponse<Vec<TimelineItem>> = self
            .fetch_engine()
            .get_envelope(
                Some(&host),
                &format!("/api/v1/timeline/{}/query{}", bare, query),
                &RequestOptions::default(),
            )
            .await?;
        if envelope.status != "ok" {
            return Err(ClientError::Application(
                envelope.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(envelope)
    }

    /// Associations posted to a timeline
    pub async fn get_timeline_associations(
        &self,
        id: &str,
        host: Option<&str>,
    ) -> ClientResult<Vec<Association>> {
        let (bare, _) = ids::split_resource_host(id);
        self.fetch_engine()
            .get_json(
                host,
                &format!("/api/v1/timeline/{}/associations", bare),
                &RequestOptions::default(),
            )
            .await
    }

    // --- subscriptions ----------------------------------------------------

    /// A subscription by id
    pub async fn get_subscription(&self, id: &str) -> ClientResult<Subscription> {
        self.get_subscription_with(id, &CacheOptions::default()).await
    }

    pub async fn get_subscription_with(
        &self,
        id: &str,
        opts: &CacheOptions<Subscription>,
    ) -> ClientResult<Subscription> {
        let path = format!("/api/v1/subscription/{}", id);
        let found = self
            .cached_read(None, path, &format!("subscription:{}", id), opts)
            .await?;
        Self::require(found, "subscription", id)
    }

    /// All subscriptions owned by the acting account
    pub async fn get_own_subscriptions(&self) -> ClientResult<Vec<Subscription>> {
        self.fetch_engine()
            .get_json(None, "/api/v1/subscriptions/mine", &RequestOptions::default())
            .await
    }

    // --- domains ----------------------------------------------------------

    /// The domain record of a host
    pub async fn get_domain(&self, host: &str) -> ClientResult<Domain> {
        self.get_domain_with(host, &CacheOptions::default()).await
    }

    pub async fn get_domain_with(
        &self,
        host: &str,
        opts: &CacheOptions<Domain>,
    ) -> ClientResult<Domain> {
        let found = self
            .cached_read(
                Some(host),
                "/api/v1/domain".to_string(),
                &format!("domain:{}", host),
                opts,
            )
            .await?;
        Self::require(found, "domain", host)
    }

    /// A domain record looked up by its CSID
    pub async fn get_domain_by_csid(&self, csid: &str) -> ClientResult<Domain> {
        let path = format!("/api/v1/domain/{}", csid);
        let found = self
            .cached_read(None, path, &format!("domain:{}", csid), &CacheOptions::default())
            .await?;
        Self::require(found, "domain", csid)
    }

    /// Every domain the default host federates with
    pub async fn get_domains(&self) -> ClientResult<Vec<Domain>> {
        self.fetch_engine()
            .get_json(None, "/api/v1/domains", &RequestOptions::default())
            .await
    }

    // --- follows ----------------------------------------------------------

    /// Accounts `ccid` follows
    pub async fn get_acking(&self, ccid: &str, host: Option<&str>) -> ClientResult<Vec<Ack>> {
        let path = format!("/api/v1/entity/{}/acking", ccid);
        let found = self
            .cached_read(host, path, &format!("acking:{}", ccid), &CacheOptions::default())
            .await?;
        Ok(found.unwrap_or_default())
    }

    /// Accounts following `ccid`
    pub async fn get_acker(&self, ccid: &str, host: Option<&str>) -> ClientResult<Vec<Ack>> {
        let path = format!("/api/v1/entity/{}/acker", ccid);
        let found = self
            .cached_read(host, path, &format!("acker:{}", ccid), &CacheOptions::default())
            .await?;
        Ok(found.unwrap_or_default())
    }

    // --- keys -------------------------------------------------------------

    /// Sub-keys enacted by the acting account
    pub async fn get_own_keys(&self) -> ClientResult<Vec<EnactedKey>> {
        self.fetch_engine()
            .get_json(None, "/api/v1/keys/mine", &RequestOptions::default())
            .await
    }

    /// The delegation chain of a sub-key
    pub async fn get_key_chain(&self, ckid: &str, host: Option<&str>) -> ClientResult<Vec<EnactedKey>> {
        self.fetch_engine()
            .get_json(host, &format!("/api/v1/key/{}", ckid), &RequestOptions::default())
            .await
    }

    // --- account key-value ------------------------------------------------

    /// A server-side per-account value
    pub async fn get_kv(&self, key: &str) -> ClientResult<Option<String>> {
        match self
            .fetch_engine()
            .get_json::<KvEntry>(None, &format!("/api/v1/kv/{}", key), &RequestOptions::default())
            .await
        {
            Ok(entry) => Ok(Some(entry.value)),
            Err(ClientError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write a server-side per-account value
    pub async fn put_kv(&self, key: &str, value: &str) -> ClientResult<()> {
        self.fetch_engine()
            .put_json_ack(
                None,
                &format!("/api/v1/kv/{}", key),
                &json!({ "value": value }),
                &RequestOptions::default(),
            )
            .await
    }
}
