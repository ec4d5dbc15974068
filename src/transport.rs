/// HTTP fetch engine
///
/// Executes every outbound request: liveness gate first, then merged
/// credential headers, a per-request timeout, and response classification.
/// No retries live here; the realtime socket is the only self-retrying
/// component.
use crate::auth::AuthProvider;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::liveness::LivenessTracker;
use crate::model::ApiResponse;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Per-request options
#[derive(Debug, Default, Clone)]
pub struct RequestOptions {
    /// Skip credential headers entirely
    pub no_auth: bool,

    /// Override the configured request timeout
    pub timeout: Option<Duration>,

    /// Extra headers, applied before credentials
    pub headers: Vec<(String, String)>,
}

impl RequestOptions {
    pub fn no_auth() -> Self {
        Self {
            no_auth: true,
            ..Self::default()
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::default()
        }
    }
}

/// Classify a non-2xx status into its error kind
///
/// 404 never reaches here; `execute` surfaces it as `Ok(None)` so callers
/// can record a negative entry.
fn classify_error(target: &str, status: u16, body: String) -> ClientError {
    match status {
        403 => ClientError::Permission(format!("{} refused the request", target)),
        502 | 503 | 504 => ClientError::DomainOffline(target.to_string()),
        _ => ClientError::Transport { status, body },
    }
}

fn is_gateway_error(status: StatusCode) -> bool {
    matches!(status.as_u16(), 502 | 503 | 504)
}

/// Shared HTTP execution for every API call
pub struct FetchEngine {
    http: reqwest::Client,
    auth: Arc<AuthProvider>,
    liveness: LivenessTracker,
    config: Arc<ClientConfig>,
}

impl FetchEngine {
    pub fn new(
        auth: Arc<AuthProvider>,
        liveness: LivenessTracker,
        config: Arc<ClientConfig>,
    ) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| ClientError::Internal(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            auth,
            liveness,
            config,
        })
    }

    /// The host a request with this override lands on
    pub fn target<'a>(&'a self, host: Option<&'a str>) -> &'a str {
        match host {
            Some(h) if !h.is_empty() => h,
            _ => &self.config.host,
        }
    }

    /// Execute a request and classify its response status
    ///
    /// On 2xx the host is marked online and the raw response returned; 404
    /// is surfaced as `Ok(None)` so the caching layer can record it.
    async fn execute(
        &self,
        method: Method,
        host: Option<&str>,
        path: &str,
        body: Option<&Value>,
        opts: &RequestOptions,
        json_accept: bool,
    ) -> ClientResult<Option<(String, reqwest::Response)>> {
        let target = self.target(host).to_string();

        if !self.liveness.is_online(&target).await {
            debug!("skipping request to {}: host is in back-off", target);
            return Err(ClientError::DomainOffline(target));
        }

        let url = format!("https://{}{}", target, path);
        let mut request = self
            .http
            .request(method, &url)
            .timeout(opts.timeout.unwrap_or(self.config.timeout));

        if json_accept {
            request = request.header("accept", "application/json");
        }
        for (name, value) in &opts.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        if !opts.no_auth {
            match self.auth.get_headers(&target).await {
                Ok(headers) => {
                    for (name, value) in headers {
                        request = request.header(name.as_str(), value.as_str());
                    }
                }
                Err(e) => {
                    // Some reads work unauthenticated; try anyway
                    warn!("proceeding without credentials for {}: {}", target, e);
                }
            }
        }

        if let Some(body) = body {
            request = request.json(body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                if e.is_connect() {
                    self.liveness.mark_offline(&target).await;
                    return Err(ClientError::DomainOffline(target));
                }
                if e.is_timeout() {
                    return Err(ClientError::Internal(format!(
                        "request to {} timed out",
                        url
                    )));
                }
                return Err(ClientError::Internal(format!(
                    "request to {} failed: {}",
                    url, e
                )));
            }
        };

        let status = response.status();
        if status.is_success() {
            self.liveness.mark_online(&target).await;
            return Ok(Some((target, response)));
        }

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if is_gateway_error(status) {
            self.liveness.mark_offline(&target).await;
        }
        let body_text = response.text().await.unwrap_or_default();
        Err(classify_error(&target, status.as_u16(), body_text))
    }

    async fn decode_envelope<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> ClientResult<ApiResponse<T>> {
        response
            .json()
            .await
            .map_err(|e| ClientError::Serialization(format!("invalid response body: {}", e)))
    }

    /// Credentialed JSON GET, full envelope (for paginated queries)
    pub async fn get_envelope<T: DeserializeOwned>(
        &self,
        host: Option<&str>,
        path: &str,
        opts: &RequestOptions,
    ) -> ClientResult<ApiResponse<T>> {
        match self
            .execute(Method::GET, host, path, None, opts, true)
            .await?
        {
            Some((_, response)) => Self::decode_envelope(response).await,
            None => Err(ClientError::NotFound(format!(
                "resource not found: {}",
                path
            ))),
        }
    }

    /// Credentialed JSON GET, unwrapped content
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        host: Option<&str>,
        path: &str,
        opts: &RequestOptions,
    ) -> ClientResult<T> {
        self.get_envelope(host, path, opts).await?.into_content()
    }

    /// Credentialed JSON GET for the caching layer
    ///
    /// 404 returns `Ok(None)` so the caller can record a negative entry.
    pub async fn get_cacheable(
        &self,
        host: Option<&str>,
        path: &str,
        opts: &RequestOptions,
    ) -> ClientResult<Option<Value>> {
        match self
            .execute(Method::GET, host, path, None, opts, true)
            .await?
        {
            Some((_, response)) => {
                let envelope: ApiResponse<Value> = Self::decode_envelope(response).await?;
                envelope.into_content().map(Some)
            }
            None => Ok(None),
        }
    }

    /// Credentialed raw-bytes GET
    pub async fn get_blob(
        &self,
        host: Option<&str>,
        path: &str,
        opts: &RequestOptions,
    ) -> ClientResult<Vec<u8>> {
        match self
            .execute(Method::GET, host, path, None, opts, false)
            .await?
        {
            Some((_, response)) => {
                let bytes = response.bytes().await.map_err(|e| {
                    ClientError::Internal(format!("failed to read response body: {}", e))
                })?;
                Ok(bytes.to_vec())
            }
            None => Err(ClientError::NotFound(format!(
                "resource not found: {}",
                path
            ))),
        }
    }

    /// Credentialed JSON POST, unwrapped content
    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        host: Option<&str>,
        path: &str,
        body: &B,
        opts: &RequestOptions,
    ) -> ClientResult<T> {
        let body = serde_json::to_value(body)?;
        match self
            .execute(Method::POST, host, path, Some(&body), opts, true)
            .await?
        {
            Some((_, response)) => Self::decode_envelope::<T>(response).await?.into_content(),
            None => Err(ClientError::NotFound(format!(
                "resource not found: {}",
                path
            ))),
        }
    }

    /// Credentialed JSON PUT, checking only the envelope status
    ///
    /// Writes may come back with no content; the envelope's `status` is
    /// still required to be "ok".
    pub async fn put_json_ack<B: Serialize>(
        &self,
        host: Option<&str>,
        path: &str,
        body: &B,
        opts: &RequestOptions,
    ) -> ClientResult<()> {
        let body = serde_json::to_value(body)?;
        match self
            .execute(Method::PUT, host, path, Some(&body), opts, true)
            .await?
        {
            Some((_, response)) => {
                let envelope: ApiResponse<Value> = Self::decode_envelope(response).await?;
                if envelope.status != "ok" {
                    return Err(ClientError::Application(
                        envelope.error.unwrap_or_else(|| "unknown error".to_string()),
                    ));
                }
                Ok(())
            }
            None => Err(ClientError::NotFound(format!(
                "resource not found: {}",
                path
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn engine_with(host: &str) -> (FetchEngine, LivenessTracker) {
        let store = Arc::new(MemoryStore::new());
        let liveness = LivenessTracker::new(store);
        let auth = Arc::new(AuthProvider::guest(host).unwrap());
        let config = Arc::new(ClientConfig::new(host));
        (
            FetchEngine::new(auth, liveness.clone(), config).unwrap(),
            liveness,
        )
    }

    #[test]
    fn test_classify_error() {
        assert!(matches!(
            classify_error("a.example", 403, String::new()),
            ClientError::Permission(_)
        ));
        for status in [502, 503, 504] {
            assert_eq!(
                classify_error("a.example", status, String::new()),
                ClientError::DomainOffline("a.example".to_string())
            );
        }
        assert!(matches!(
            classify_error("a.example", 500, "boom".to_string()),
            ClientError::Transport { status: 500, .. }
        ));
    }

    #[test]
    fn test_target_selection() {
        let (engine, _) = engine_with("default.example");
        assert_eq!(engine.target(None), "default.example");
        assert_eq!(engine.target(Some("")), "default.example");
        assert_eq!(engine.target(Some("other.example")), "other.example");
    }

    #[tokio::test]
    async fn test_offline_gate_blocks_before_network() {
        let (engine, liveness) = engine_with("default.example");
        liveness.mark_offline("down.example").await;

        let result: ClientResult<Value> = engine
            .get_json(Some("down.example"), "/api/v1/domain", &RequestOptions::default())
            .await;
        assert_eq!(
            result,
            Err(ClientError::DomainOffline("down.example".to_string()))
        );
    }
}
