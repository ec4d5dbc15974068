/// Commit pipeline
///
/// Every write is a signed document POSTed to `/api/v1/commit`. The text
/// that gets signed is the exact text that goes over the wire, and the
/// server's returned entity is taken as authoritative: locally we only
/// invalidate the affected cache keys and let the next read refresh them.
use super::Client;
use crate::error::ClientResult;
use crate::model::{promote, CommitRequest, Document};
use crate::transport::RequestOptions;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Registration extras carried in the commit `option` field
#[derive(Debug, Clone, Serialize)]
struct RegistrationOption<'a> {
    info: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    invitation: Option<&'a str>,
}

impl Client {
    /// Stamp identity fields and produce the exact signed text
    ///
    /// `signer` is always the provider's CCID; `keyID` appears exactly
    /// when a sub-key is active.
    fn seal(&self, document: &mut Document) -> ClientResult<(String, String)> {
        document.signer = self.auth().ccid()?.to_string();
        document.key_id = self.auth().ckid()?.map(str::to_string);
        document.signed_at = Utc::now();

        let document_text = serde_json::to_string(document)?;
        let signature = self.auth().sign(&document_text)?;
        Ok((document_text, signature))
    }

    /// Sign `document` and commit it, returning the server's entity
    pub async fn commit<T: DeserializeOwned>(
        &self,
        mut document: Document,
        host: Option<&str>,
    ) -> ClientResult<T> {
        let (document_text, signature) = self.seal(&mut document)?;
        debug!("committing {} document", document.doc_type);

        let request = CommitRequest {
            document: document_text,
            signature,
            option: None,
        };
        let content: Value = self
            .fetch_engine()
            .post_json(host, "/api/v1/commit", &request, &RequestOptions::default())
            .await?;

        self.invalidate_for(&document, &content).await;
        promote(content)
    }

    /// Register the acting account on a domain
    ///
    /// Reuses the commit endpoint with an `option` field carrying the
    /// entity info and invitation; `captcha` rides along as a header when
    /// the domain demands one.
    pub async fn register(
        &self,
        mut document: Document,
        info: &Value,
        invitation: Option<&str>,
        captcha: Option<&str>,
        host: Option<&str>,
    ) -> ClientResult<Value> {
        let (document_text, signature) = self.seal(&mut document)?;

        let option = serde_json::to_string(&RegistrationOption { info, invitation })?;
        let request = CommitRequest {
            document: document_text,
            signature,
            option: Some(option),
        };

        let mut opts = RequestOptions::default();
        if let Some(captcha) = captcha {
            opts.headers.push(("captcha".to_string(), captcha.to_string()));
        }

        self.fetch_engine()
            .post_json(host, "/api/v1/commit", &request, &opts)
            .await
    }

    /// Drop the cache entries a committed document makes stale
    pub(crate) async fn invalidate_for(&self, document: &Document, content: &Value) {
        let content_id = content.get("id").and_then(|v| v.as_str());
        let mut keys: Vec<String> = Vec::new();

        match document.doc_type.as_str() {
            "message" => {
                // Nothing cached yet for a fresh message; timeline views
                // learn about it over the socket
            }
            "association" => {
                if let Some(target) = &document.target {
                    keys.push(format!("message:{}", target));
                }
            }
            "profile" => {
                if let Some(id) = content_id {
                    keys.push(format!("profile:{}", id));
                }
                if let Some(semantic_id) = &document.semantic_id {
                    keys.push(format!("profile:{}@{}", semantic_id, document.signer));
                }
            }
            "timeline" => {
                if let Some(id) = content_id {
                    keys.push(format!("timeline:{}", id));
                }
            }
            "subscription" | "subscribe" | "unsubscribe" => {
                if let Some(id) = content_id {
                    keys.push(format!("subscription:{}", id));
                }
                if let Some(target) = &document.target {
                    keys.push(format!("subscription:{}", target));
                }
            }
            "ack" | "unack" => {
                keys.push(format!("acking:{}", document.signer));
                if let Some(target) = &document.target {
                    keys.push(format!("acker:{}", target));
                }
            }
            "delete" => {
                if let Some(target) = &document.target {
                    match target.chars().next() {
                        Some('m') => keys.push(format!("message:{}", target)),
                        Some('a') => keys.push(format!("association:{}", target)),
                        Some('p') => keys.push(format!("profile:{}", target)),
                        Some('t') => keys.push(format!("timeline:{}", target)),
                        _ => {}
                    }
                }
            }
            _ => {}
        }

        for key in keys {
            if let Err(e) = self.store().invalidate(&key).await {
                warn!("failed to invalidate {} after commit: {}", key, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TEST_KEY: &str = "8a2c7b4d5e6f708192a3b4c5d6e7f8091a2b3c4d5e6f708192a3b4c5d6e7f809";

    #[test]
    fn test_seal_stamps_master_identity() {
        let client = Client::new("a.example", TEST_KEY).unwrap();
        let mut document = Document::new("message", json!({"body": "hi"}));

        let (text, signature) = client.seal(&mut document).unwrap();
        assert_eq!(document.signer, client.ccid().unwrap());
        // Master key: no keyID on the document or its serialized form
        assert_eq!(document.key_id, None);
        assert!(!text.contains("keyID"));
        assert_eq!(signature.len(), 128);
    }

    #[test]
    fn test_seal_stamps_subkey_id() {
        let keypair = crate::crypto::KeyPair::from_private_key(TEST_KEY).unwrap();
        let blob = format!(
            "concurrent-subkey {} {} cck1aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa@a.example",
            TEST_KEY,
            keypair.ccid()
        );
        let client = Client::from_subkey(&blob).unwrap();
        let mut document = Document::new("message", json!({"body": "hi"}));

        let (text, _) = client.seal(&mut document).unwrap();
        assert_eq!(document.signer, client.ccid().unwrap());
        assert_eq!(
            document.key_id.as_deref(),
            client.ckid().unwrap()
        );
        assert!(text.contains("\"keyID\":\"cck1"));
    }

    #[tokio::test]
    async fn test_association_commit_invalidates_target_message() {
        let client = Client::new("a.example", TEST_KEY).unwrap();
        client
            .store()
            .set("message:m1", Some(json!({"id": "m1"})))
            .await
            .unwrap();

        let document = Document::new("association", json!({})).target("m1");
        client.invalidate_for(&document, &json!({"id": "a1"})).await;

        assert!(client.store().get("message:m1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_profile_commit_invalidates_both_keys() {
        let client = Client::new("a.example", TEST_KEY).unwrap();
        let ccid = client.ccid().unwrap().to_string();

        client
            .store()
            .set("profile:p1", Some(json!({"id": "p1"})))
            .await
            .unwrap();
        let semantic_key = format!("profile:world.concrnt.prof@{}", ccid);
        client
            .store()
            .set(&semantic_key, Some(json!({"id": "p1"})))
            .await
            .unwrap();

        let mut document = Document::new("profile", json!({}))
            .semantic_id("world.concrnt.prof");
        document.signer = ccid;
        client.invalidate_for(&document, &json!({"id": "p1"})).await;

        assert!(client.store().get("profile:p1").await.unwrap().is_none());
        assert!(client.store().get(&semantic_key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ack_commit_invalidates_both_directions() {
        let client = Client::new("a.example", TEST_KEY).unwrap();
        let ccid = client.ccid().unwrap().to_string();
        let target = "con1bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

        client
            .store()
            .set(&format!("acking:{}", ccid), Some(json!([])))
            .await
            .unwrap();
        client
            .store()
            .set(&format!("acker:{}", target), Some(json!([])))
            .await
            .unwrap();

        let mut document = Document::new("ack", json!({})).target(target);
        document.signer = ccid.clone();
        client.invalidate_for(&document, &json!({})).await;

        assert!(client
            .store()
            .get(&format!("acking:{}", ccid))
            .await
            .unwrap()
            .is_none());
        assert!(client
            .store()
            .get(&format!("acker:{}", target))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_delete_commit_routes_by_prefix() {
        let client = Client::new("a.example", TEST_KEY).unwrap();
        client
            .store()
            .set("timeline:t1", Some(json!({"id": "t1"})))
            .await
            .unwrap();

        let document = Document::new("delete", json!({})).target("t1");
        client.invalidate_for(&document, &json!({})).await;

        assert!(client.store().get("timeline:t1").await.unwrap().is_none());
    }
}
