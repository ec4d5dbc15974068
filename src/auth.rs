/// Credential provider for authenticated requests
///
/// Produces per-remote bearer tokens and the home-domain passport. Three
/// identities: a master key (account root), a sub-key (delegated signer),
/// and a guest with no identity at all. Guest is a real variant rather
/// than an absent provider so call sites that need an identity fail fast.
use crate::crypto::{self, JwtClaims, KeyPair, SubKey};
use crate::error::{ClientError, ClientResult};
use crate::model::ApiResponse;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::OnceCell;
use tracing::debug;

/// Lifetime of a minted per-remote token
const TOKEN_TTL_SECS: i64 = 1800;

enum Identity {
    Master {
        keypair: KeyPair,
    },
    SubKey {
        keypair: KeyPair,
        ccid: String,
        ckid: String,
    },
    Guest,
}

/// Authentication state for one account (or none)
pub struct AuthProvider {
    identity: Identity,
    host: String,
    /// Last-minted token per remote host; replaced when expired
    tokens: Mutex<HashMap<String, String>>,
    /// Home-domain passport; fetched once per provider lifetime, shared
    /// across concurrent callers
    passport: OnceCell<String>,
    http: reqwest::Client,
}

impl AuthProvider {
    fn build(identity: Identity, host: String) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| ClientError::Internal(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            identity,
            host,
            tokens: Mutex::new(HashMap::new()),
            passport: OnceCell::new(),
            http,
        })
    }

    /// Provider backed by a master key
    pub fn master(private_key: &str, host: impl Into<String>) -> ClientResult<Self> {
        let keypair = KeyPair::from_private_key(private_key)?;
        Self::build(Identity::Master { keypair }, host.into())
    }

    /// Provider backed by a sub-key blob
    pub fn subkey(blob: &str) -> ClientResult<Self> {
        let SubKey {
            domain,
            ccid,
            ckid,
            keypair,
        } = crypto::parse_subkey(blob)?;
        Self::build(Identity::SubKey { keypair, ccid, ckid }, domain)
    }

    /// Identity-less provider; every request goes out unauthenticated
    pub fn guest(host: impl Into<String>) -> ClientResult<Self> {
        Self::build(Identity::Guest, host.into())
    }

    /// Whether this provider can sign anything
    pub fn is_guest(&self) -> bool {
        matches!(self.identity, Identity::Guest)
    }

    /// The provider's home domain
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The account root this provider acts as
    pub fn ccid(&self) -> ClientResult<&str> {
        match &self.identity {
            Identity::Master { keypair } => Ok(keypair.ccid()),
            Identity::SubKey { ccid, .. } => Ok(ccid),
            Identity::Guest => Err(ClientError::NotImplemented(
                "guest provider has no CCID".to_string(),
            )),
        }
    }

    /// The active sub-key, if one is configured
    pub fn ckid(&self) -> ClientResult<Option<&str>> {
        match &self.identity {
            Identity::Master { .. } => Ok(None),
            Identity::SubKey { ckid, .. } => Ok(Some(ckid)),
            Identity::Guest => Err(ClientError::NotImplemented(
                "guest provider has no CKID".to_string(),
            )),
        }
    }

    fn keypair(&self) -> ClientResult<&KeyPair> {
        match &self.identity {
            Identity::Master { keypair } => Ok(keypair),
            Identity::SubKey { keypair, .. } => Ok(keypair),
            Identity::Guest => Err(ClientError::NotImplemented(
                "guest provider cannot sign".to_string(),
            )),
        }
    }

    /// Detached signature over `data`
    pub fn sign(&self, data: &str) -> ClientResult<String> {
        Ok(self.keypair()?.sign(data))
    }

    /// Issuer identifier for minted tokens: CKID when a sub-key is active
    fn issuer(&self) -> ClientResult<&str> {
        match &self.identity {
            Identity::Master { keypair } => Ok(keypair.ccid()),
            Identity::SubKey { ckid, .. } => Ok(ckid),
            Identity::Guest => Err(ClientError::NotImplemented(
                "guest provider cannot mint tokens".to_string(),
            )),
        }
    }

    /// Sign a compact JWT, filling `iss` from this identity when absent
    pub fn issue_jwt(&self, mut claims: JwtClaims) -> ClientResult<String> {
        if claims.iss.is_empty() {
            claims.iss = self.issuer()?.to_string();
        }
        let key_id = self.ckid()?;
        crypto::issue_jwt(self.keypair()?, &claims, key_id)
    }

    /// A valid bearer token for `remote`, minting one if needed
    ///
    /// Concurrent callers for the same remote may each mint a token; both
    /// are valid and the last write wins the cache slot.
    pub fn get_auth_token(&self, remote: &str) -> ClientResult<String> {
        {
            let tokens = self.tokens.lock().unwrap();
            if let Some(token) = tokens.get(remote) {
                if crypto::check_jwt_is_valid(token) {
                    return Ok(token.clone());
                }
            }
        }

        let now = chrono::Utc::now().timestamp();
        let token = self.issue_jwt(JwtClaims {
            iss: String::new(),
            sub: "concrnt".to_string(),
            aud: remote.to_string(),
            iat: now,
            exp: now + TOKEN_TTL_SECS,
            jti: uuid::Uuid::new_v4().to_string(),
        })?;

        self.tokens
            .lock()
            .unwrap()
            .insert(remote.to_string(), token.clone());
        Ok(token)
    }

    /// The home-domain passport text
    ///
    /// Fetched at most once before the first success; concurrent callers
    /// share the same in-flight request. A failed fetch leaves the slot
    /// empty so a later call can retry.
    pub async fn get_passport(&self) -> ClientResult<String> {
        self.passport
            .get_or_try_init(|| async {
                let token = self.get_auth_token(&self.host)?;
                let url = format!("https://{}/api/v1/auth/passport", self.host);
                debug!("fetching passport from {}", url);

                let response = self
                    .http
                    .get(&url)
                    .bearer_auth(token)
                    .send()
                    .await
                    .map_err(|e| {
                        ClientError::Internal(format!("passport request failed: {}", e))
                    })?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(ClientError::Transport {
                        status: status.as_u16(),
                        body,
                    });
                }

                let envelope: ApiResponse<String> = response.json().await.map_err(|e| {
                    ClientError::Serialization(format!("invalid passport response: {}", e))
                })?;
                envelope.into_content()
            })
            .await
            .cloned()
    }

    /// Credential headers for a request to `domain`
    ///
    /// Empty for a guest; bearer token plus passport otherwise.
    pub async fn get_headers(&self, domain: &str) -> ClientResult<Vec<(String, String)>> {
        if self.is_guest() {
            return Ok(Vec::new());
        }

        let token = self.get_auth_token(domain)?;
        let passport = self.get_passport().await?;

        Ok(vec![
            ("authorization".to_string(), format!("Bearer {}", token)),
            ("passport".to_string(), passport),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine as _;

    const TEST_KEY: &str = "8a2c7b4d5e6f708192a3b4c5d6e7f8091a2b3c4d5e6f708192a3b4c5d6e7f809";

    fn decode_claims(token: &str) -> serde_json::Value {
        let payload = token.split('.').nth(1).unwrap();
        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).unwrap()).unwrap()
    }

    #[test]
    fn test_master_identity() {
        let provider = AuthProvider::master(TEST_KEY, "a.example").unwrap();
        assert!(!provider.is_guest());
        assert!(provider.ccid().unwrap().starts_with("con1"));
        assert_eq!(provider.ckid().unwrap(), None);
        assert_eq!(provider.host(), "a.example");
    }

    #[test]
    fn test_guest_refuses_identity_operations() {
        let provider = AuthProvider::guest("a.example").unwrap();
        assert!(provider.is_guest());
        assert!(matches!(
            provider.ccid(),
            Err(ClientError::NotImplemented(_))
        ));
        assert!(matches!(
            provider.sign("x"),
            Err(ClientError::NotImplemented(_))
        ));
        assert!(matches!(
            provider.get_auth_token("b.example"),
            Err(ClientError::NotImplemented(_))
        ));
    }

    #[tokio::test]
    async fn test_guest_headers_are_empty() {
        let provider = AuthProvider::guest("a.example").unwrap();
        assert!(provider.get_headers("b.example").await.unwrap().is_empty());
    }

    #[test]
    fn test_token_claims() {
        let provider = AuthProvider::master(TEST_KEY, "a.example").unwrap();
        let token = provider.get_auth_token("b.example").unwrap();

        let claims = decode_claims(&token);
        assert_eq!(claims["aud"], "b.example");
        assert_eq!(claims["sub"], "concrnt");
        assert_eq!(claims["iss"], provider.ccid().unwrap());
    }

    #[test]
    fn test_token_cached_until_expiry() {
        let provider = AuthProvider::master(TEST_KEY, "a.example").unwrap();
        let first = provider.get_auth_token("b.example").unwrap();
        let second = provider.get_auth_token("b.example").unwrap();
        // Still valid, so the same token comes back
        assert_eq!(first, second);

        // Tokens are per-remote
        let other = provider.get_auth_token("c.example").unwrap();
        assert_ne!(first, other);
    }

    #[test]
    fn test_subkey_issuer_and_kid() {
        let keypair = crate::crypto::KeyPair::from_private_key(TEST_KEY).unwrap();
        let blob = format!(
            "concurrent-subkey {} {} cck1aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa@sub.example",
            TEST_KEY,
            keypair.ccid()
        );
        let provider = AuthProvider::subkey(&blob).unwrap();

        assert_eq!(provider.host(), "sub.example");
        assert_eq!(provider.ccid().unwrap(), keypair.ccid());
        let ckid = provider.ckid().unwrap().unwrap().to_string();

        let token = provider.get_auth_token("b.example").unwrap();
        let claims = decode_claims(&token);
        assert_eq!(claims["iss"], ckid);

        let header_b64 = token.split('.').next().unwrap();
        let header = URL_SAFE_NO_PAD.decode(header_b64).unwrap();
        assert!(String::from_utf8(header).unwrap().contains(&ckid));
    }
}
